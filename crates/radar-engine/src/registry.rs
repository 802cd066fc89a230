use std::sync::Arc;

use chrono::Utc;
use radar_core::{AlertDraft, AlertValidationError, Feature, Match, RadarAlert};
use radar_storage::{AlertStore, MatchCountFix, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::EligibilityGate;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] AlertValidationError),
    /// Unknown alert, or one owned by a different recruiter.
    #[error("alert {0} not found")]
    NotFound(Uuid),
    #[error("plan does not include talent radar")]
    NotEntitled,
    /// The plan service could not be asked; activation is refused until it answers.
    #[error("plan service unavailable")]
    GateUnavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One alert whose cached `match_count` disagreed with its Match rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountCorrection {
    pub alert_id: Uuid,
    pub recorded: u64,
    pub actual: u64,
}

impl From<MatchCountFix> for CountCorrection {
    fn from(fix: MatchCountFix) -> Self {
        Self {
            alert_id: fix.alert_id,
            recorded: fix.recorded,
            actual: fix.actual,
        }
    }
}

/// Recruiter-facing lifecycle over Radar Alerts. Creating an active alert or
/// re-activating a paused one requires Talent Radar in the recruiter's plan.
#[derive(Clone)]
pub struct AlertRegistry {
    alerts: Arc<dyn AlertStore>,
    gate: Arc<EligibilityGate>,
}

impl AlertRegistry {
    pub fn new(alerts: Arc<dyn AlertStore>, gate: Arc<EligibilityGate>) -> Self {
        Self { alerts, gate }
    }

    async fn require_talent_radar(&self, recruiter_id: Uuid) -> Result<(), RegistryError> {
        let decision = self.gate.check(recruiter_id, Feature::TalentRadar).await;
        if decision.degraded {
            return Err(RegistryError::GateUnavailable);
        }
        if !decision.entitlement.allowed {
            return Err(RegistryError::NotEntitled);
        }
        Ok(())
    }

    #[instrument(skip(self, draft), fields(%recruiter_id))]
    pub async fn create(&self, recruiter_id: Uuid, draft: AlertDraft) -> Result<RadarAlert, RegistryError> {
        let alert = RadarAlert::new(recruiter_id, draft, Utc::now())?;
        if alert.is_active {
            self.require_talent_radar(recruiter_id).await?;
        }
        self.alerts.insert_alert(&alert).await?;
        info!(alert_id = %alert.id, "radar alert created");
        Ok(alert)
    }

    pub async fn get(&self, recruiter_id: Uuid, alert_id: Uuid) -> Result<RadarAlert, RegistryError> {
        match self.alerts.get_alert(alert_id).await? {
            Some(alert) if alert.recruiter_id == recruiter_id => Ok(alert),
            _ => Err(RegistryError::NotFound(alert_id)),
        }
    }

    pub async fn update(
        &self,
        recruiter_id: Uuid,
        alert_id: Uuid,
        draft: AlertDraft,
    ) -> Result<RadarAlert, RegistryError> {
        let current = self.get(recruiter_id, alert_id).await?;
        let edited = current.edited(draft, Utc::now())?;
        self.persist(edited).await
    }

    pub async fn toggle(
        &self,
        recruiter_id: Uuid,
        alert_id: Uuid,
        is_active: bool,
    ) -> Result<RadarAlert, RegistryError> {
        let current = self.get(recruiter_id, alert_id).await?;
        if current.is_active == is_active {
            return Ok(current);
        }
        if is_active {
            self.require_talent_radar(recruiter_id).await?;
        }
        let toggled = current.with_active(is_active, Utc::now())?;
        let saved = self.persist(toggled).await?;
        info!(alert_id = %saved.id, is_active, "radar alert toggled");
        Ok(saved)
    }

    /// Deletes the alert together with its matches. Returns how many matches went with it.
    pub async fn delete(&self, recruiter_id: Uuid, alert_id: Uuid) -> Result<u64, RegistryError> {
        self.get(recruiter_id, alert_id).await?;
        let removed = self
            .alerts
            .delete_alert(alert_id)
            .await?
            .ok_or(RegistryError::NotFound(alert_id))?;
        info!(%alert_id, removed_matches = removed, "radar alert deleted");
        Ok(removed)
    }

    pub async fn list(&self, recruiter_id: Uuid) -> Result<Vec<RadarAlert>, RegistryError> {
        Ok(self.alerts.list_alerts_for_recruiter(recruiter_id).await?)
    }

    pub async fn matches(&self, recruiter_id: Uuid, alert_id: Uuid) -> Result<Vec<Match>, RegistryError> {
        self.get(recruiter_id, alert_id).await?;
        let mut matches = self.alerts.list_matches(alert_id).await?;
        matches.sort_by(|a, b| {
            b.fit_score
                .cmp(&a.fit_score)
                .then_with(|| b.matched_at.cmp(&a.matched_at))
        });
        Ok(matches)
    }

    /// Recomputes every alert's `match_count` from the Match table.
    #[instrument(skip(self))]
    pub async fn reconcile_match_counts(&self) -> Result<Vec<CountCorrection>, RegistryError> {
        let fixes = self.alerts.reconcile_match_counts().await?;
        for fix in &fixes {
            warn!(alert_id = %fix.alert_id, recorded = fix.recorded, actual = fix.actual, "match_count drifted");
        }
        info!(corrected = fixes.len(), "match counts reconciled");
        Ok(fixes.into_iter().map(CountCorrection::from).collect())
    }

    async fn persist(&self, alert: RadarAlert) -> Result<RadarAlert, RegistryError> {
        if !self.alerts.update_alert(&alert).await? {
            return Err(RegistryError::NotFound(alert.id));
        }
        // Re-read so the caller sees the live match_count.
        self.alerts
            .get_alert(alert.id)
            .await?
            .ok_or(RegistryError::NotFound(alert.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedPlans;
    use radar_adapters::{DailyLimit, Entitlement};
    use radar_core::WorkMode;
    use radar_storage::MemoryStore;
    use std::collections::BTreeSet;

    fn draft(skills: &[&str]) -> AlertDraft {
        AlertDraft {
            name: "Platform".into(),
            required_skills: skills.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            min_experience_years: 3,
            min_fit_score: 80,
            location: None,
            work_mode: WorkMode::Any,
            is_active: true,
        }
    }

    fn registry() -> (AlertRegistry, Arc<MemoryStore>) {
        let (registry, store, _) = gated_registry();
        (registry, store)
    }

    fn gated_registry() -> (AlertRegistry, Arc<MemoryStore>, Arc<FixedPlans>) {
        let store = Arc::new(MemoryStore::new());
        let plans = FixedPlans::allow(DailyLimit::Unbounded);
        let gate = Arc::new(EligibilityGate::new(plans.clone()));
        (AlertRegistry::new(store.clone(), gate), store, plans)
    }

    #[tokio::test]
    async fn create_rejects_invalid_drafts() {
        let (registry, _) = registry();
        let err = registry.create(Uuid::new_v4(), draft(&[])).await.unwrap_err();
        assert!(matches!(err, RegistryError::Validation(AlertValidationError::NoRequiredSkills)));

        let mut remote = draft(&["Go"]);
        remote.work_mode = WorkMode::Remote;
        remote.location = Some("Berlin".into());
        let err = registry.create(Uuid::new_v4(), remote).await.unwrap_err();
        assert!(matches!(err, RegistryError::Validation(AlertValidationError::LocationOnRemote)));
    }

    #[tokio::test]
    async fn other_recruiters_cannot_see_or_edit_an_alert() {
        let (registry, _) = registry();
        let owner = Uuid::new_v4();
        let alert = registry.create(owner, draft(&["Go"])).await.unwrap();

        let stranger = Uuid::new_v4();
        assert!(matches!(registry.get(stranger, alert.id).await, Err(RegistryError::NotFound(_))));
        assert!(matches!(
            registry.toggle(stranger, alert.id, false).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(registry.list(stranger).await.unwrap().is_empty());
        assert_eq!(registry.list(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn edit_keeps_match_count_and_toggle_pauses() {
        let (registry, store) = registry();
        let owner = Uuid::new_v4();
        let alert = registry.create(owner, draft(&["Go"])).await.unwrap();
        store
            .insert_match(&Match::new(alert.id, Uuid::new_v4(), 90, BTreeSet::new(), Utc::now()))
            .await
            .unwrap();

        let edited = registry.update(owner, alert.id, draft(&["Go", "Rust"])).await.unwrap();
        assert_eq!(edited.match_count, 1);
        assert_eq!(edited.required_skills.len(), 2);

        let paused = registry.toggle(owner, alert.id, false).await.unwrap();
        assert!(!paused.is_active);
        assert_eq!(paused.match_count, 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_matches() {
        let (registry, store) = registry();
        let owner = Uuid::new_v4();
        let alert = registry.create(owner, draft(&["Go"])).await.unwrap();
        for _ in 0..3 {
            store
                .insert_match(&Match::new(alert.id, Uuid::new_v4(), 85, BTreeSet::new(), Utc::now()))
                .await
                .unwrap();
        }

        assert_eq!(registry.delete(owner, alert.id).await.unwrap(), 3);
        assert!(store.list_matches(alert.id).await.unwrap().is_empty());
        assert!(matches!(registry.delete(owner, alert.id).await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn reconcile_repairs_drifted_counts() {
        let (registry, store) = registry();
        let owner = Uuid::new_v4();
        let alert = registry.create(owner, draft(&["Go"])).await.unwrap();
        store
            .insert_match(&Match::new(alert.id, Uuid::new_v4(), 85, BTreeSet::new(), Utc::now()))
            .await
            .unwrap();
        store.set_match_count(alert.id, 7).await;

        let corrections = registry.reconcile_match_counts().await.unwrap();
        assert_eq!(
            corrections,
            vec![CountCorrection {
                alert_id: alert.id,
                recorded: 7,
                actual: 1
            }]
        );
        assert_eq!(registry.get(owner, alert.id).await.unwrap().match_count, 1);
        assert!(registry.reconcile_match_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn matches_are_listed_best_first() {
        let (registry, store) = registry();
        let owner = Uuid::new_v4();
        let alert = registry.create(owner, draft(&["Go"])).await.unwrap();
        for score in [81, 97, 88] {
            store
                .insert_match(&Match::new(alert.id, Uuid::new_v4(), score, BTreeSet::new(), Utc::now()))
                .await
                .unwrap();
        }
        let scores: Vec<u8> = registry
            .matches(owner, alert.id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.fit_score)
            .collect();
        assert_eq!(scores, vec![97, 88, 81]);
    }

    #[tokio::test]
    async fn activation_requires_talent_radar() {
        let (registry, store, plans) = gated_registry();
        let recruiter = Uuid::new_v4();
        plans.set(recruiter, Entitlement::denied());

        let err = registry.create(recruiter, draft(&["Go"])).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotEntitled));
        assert!(store.list_alerts().await.unwrap().is_empty());

        // A paused draft can be saved, but not switched on.
        let paused = AlertDraft {
            is_active: false,
            ..draft(&["Go"])
        };
        let alert = registry.create(recruiter, paused).await.unwrap();
        assert!(matches!(
            registry.toggle(recruiter, alert.id, true).await,
            Err(RegistryError::NotEntitled)
        ));

        plans.unreachable_for(recruiter);
        assert!(matches!(
            registry.toggle(recruiter, alert.id, true).await,
            Err(RegistryError::GateUnavailable)
        ));

        plans.set(recruiter, Entitlement::unbounded());
        assert!(registry.toggle(recruiter, alert.id, true).await.unwrap().is_active);
    }
}
