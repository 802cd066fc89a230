use async_trait::async_trait;
use radar_core::Notification;
use radar_storage::{ServiceClient, ServiceError};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push channel unreachable: {0}")]
    Transport(String),
    #[error("push channel rejected the message: {0}")]
    Rejected(String),
}

impl From<ServiceError> for PushError {
    fn from(err: ServiceError) -> Self {
        if err.is_transport() {
            PushError::Transport(err.to_string())
        } else {
            PushError::Rejected(err.to_string())
        }
    }
}

/// At-least-once delivery primitive. Receivers must tolerate duplicates.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn push(&self, notification: &Notification) -> Result<(), PushError>;
}

/// In-process fan-out to live subscribers (e.g. a websocket layer).
#[derive(Debug, Clone)]
pub struct BroadcastPushChannel {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastPushChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPushChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl PushChannel for BroadcastPushChannel {
    async fn push(&self, notification: &Notification) -> Result<(), PushError> {
        // No live subscriber is not a failure: the durable inbox already has the record.
        let _ = self.sender.send(notification.clone());
        Ok(())
    }
}

/// Webhook-style push gateway.
pub struct HttpPushChannel {
    client: ServiceClient,
}

impl HttpPushChannel {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PushChannel for HttpPushChannel {
    async fn push(&self, notification: &Notification) -> Result<(), PushError> {
        let _ack: serde_json::Value = self.client.post_json("/v1/push", notification).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use radar_core::NotificationKind;
    use uuid::Uuid;

    fn notification() -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            kind: NotificationKind::MatchFound,
            ref_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let channel = BroadcastPushChannel::new(4);
        let mut rx = channel.subscribe();
        let sent = notification();
        channel.push(&sent).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let channel = BroadcastPushChannel::default();
        assert!(channel.push(&notification()).await.is_ok());
    }
}
