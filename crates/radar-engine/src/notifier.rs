use std::sync::Arc;

use chrono::Utc;
use radar_adapters::PushChannel;
use radar_core::{Notification, NotificationEvent};
use radar_storage::{InsertOutcome, NotificationStore, StoreError};
use tracing::{debug, warn};

/// Turns new Matches and applications into inbox records and pushes them.
///
/// The inbox record is written at most once per source record (keyed by its id).
/// The push is at-least-once: a retried emit pushes again even if the record existed.
pub struct Notifier {
    inbox: Arc<dyn NotificationStore>,
    push: Arc<dyn PushChannel>,
}

impl Notifier {
    pub fn new(inbox: Arc<dyn NotificationStore>, push: Arc<dyn PushChannel>) -> Self {
        Self { inbox, push }
    }

    pub async fn emit(&self, event: &NotificationEvent) -> Result<InsertOutcome, StoreError> {
        let notification = event.to_notification(Utc::now());
        let outcome = self.inbox.insert_notification(&notification).await?;
        if !outcome.inserted() {
            debug!(ref_id = %notification.ref_id, "notification already recorded");
        }

        if let Err(err) = self.push.push(&notification).await {
            warn!(
                ref_id = %notification.ref_id,
                recipient_id = %notification.recipient_id,
                error = %err,
                "push delivery failed; inbox record kept"
            );
        }
        Ok(outcome)
    }

    /// Emits and logs instead of failing; used from scan loops where a lost push must
    /// not undo a committed match or application.
    pub async fn emit_logged(&self, event: &NotificationEvent) {
        if let Err(err) = self.emit(event).await {
            warn!(ref_id = %event.ref_id(), error = %err, "failed to record notification");
        }
    }

    pub async fn inbox(&self, recipient_id: uuid::Uuid) -> Result<Vec<Notification>, StoreError> {
        self.inbox.list_notifications(recipient_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use radar_adapters::{BroadcastPushChannel, PushError};
    use radar_core::{AutoApplyRecord, Match, NotificationKind};
    use radar_storage::MemoryStore;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    struct FailingPush;

    #[async_trait]
    impl PushChannel for FailingPush {
        async fn push(&self, _notification: &Notification) -> Result<(), PushError> {
            Err(PushError::Transport("gateway down".into()))
        }
    }

    #[tokio::test]
    async fn retried_emit_keeps_one_inbox_record_but_pushes_twice() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(BroadcastPushChannel::new(8));
        let mut rx = push.subscribe();
        let notifier = Notifier::new(store.clone(), push);

        let recruiter_id = Uuid::new_v4();
        let record = Match::new(Uuid::new_v4(), Uuid::new_v4(), 90, BTreeSet::new(), Utc::now());
        let event = NotificationEvent::MatchFound { recruiter_id, record: record.clone() };

        assert_eq!(notifier.emit(&event).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(notifier.emit(&event).await.unwrap(), InsertOutcome::Duplicate);

        let inbox = notifier.inbox(recruiter_id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].ref_id, record.id);
        assert_eq!(inbox[0].kind, NotificationKind::MatchFound);

        assert_eq!(rx.recv().await.unwrap().ref_id, record.id);
        assert_eq!(rx.recv().await.unwrap().ref_id, record.id);
    }

    #[tokio::test]
    async fn application_notifications_go_to_the_candidate_even_if_push_fails() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store.clone(), Arc::new(FailingPush));

        let candidate_id = Uuid::new_v4();
        let record = AutoApplyRecord::applied(candidate_id, Uuid::new_v4(), 92, Utc::now());
        let outcome = notifier
            .emit(&NotificationEvent::ApplicationSubmitted { record })
            .await
            .unwrap();
        assert!(outcome.inserted());

        let inbox = notifier.inbox(candidate_id).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::ApplicationSubmitted);
    }
}
