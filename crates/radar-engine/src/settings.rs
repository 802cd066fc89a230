use std::sync::Arc;

use radar_core::{AutoApplyRecord, CandidateRadarProfile, Feature};
use radar_storage::{ApplicationStore, CandidateStore, StoreError};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::EligibilityGate;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("candidate {0} not found")]
    CandidateNotFound(Uuid),
    #[error("auto-apply needs a complete profile; missing: {}", .missing.join(", "))]
    Ineligible { missing: Vec<&'static str> },
    #[error("current plan does not include auto-apply")]
    NotEntitled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Candidate-facing toggles and history for Talent Radar and Auto-Apply.
#[derive(Clone)]
pub struct CandidateSettings {
    candidates: Arc<dyn CandidateStore>,
    applications: Arc<dyn ApplicationStore>,
    gate: Arc<EligibilityGate>,
}

impl CandidateSettings {
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        applications: Arc<dyn ApplicationStore>,
        gate: Arc<EligibilityGate>,
    ) -> Self {
        Self {
            candidates,
            applications,
            gate,
        }
    }

    async fn load(&self, candidate_id: Uuid) -> Result<CandidateRadarProfile, SettingsError> {
        self.candidates
            .get_candidate(candidate_id)
            .await?
            .ok_or(SettingsError::CandidateNotFound(candidate_id))
    }

    pub async fn set_talent_radar_opt_in(
        &self,
        candidate_id: Uuid,
        enabled: bool,
    ) -> Result<CandidateRadarProfile, SettingsError> {
        if !self.candidates.set_talent_radar_opt_in(candidate_id, enabled).await? {
            return Err(SettingsError::CandidateNotFound(candidate_id));
        }
        info!(%candidate_id, enabled, "talent radar opt-in changed");
        self.load(candidate_id).await
    }

    /// Turning auto-apply off always succeeds. Turning it on requires a complete
    /// profile and an entitled plan.
    pub async fn set_auto_apply_opt_in(
        &self,
        candidate_id: Uuid,
        enabled: bool,
    ) -> Result<CandidateRadarProfile, SettingsError> {
        let candidate = self.load(candidate_id).await?;
        if enabled {
            let missing = candidate.completeness.missing();
            if !missing.is_empty() {
                return Err(SettingsError::Ineligible { missing });
            }
            if !self.gate.can_use(candidate_id, Feature::AutoApply).await.allowed {
                return Err(SettingsError::NotEntitled);
            }
        }
        if !self.candidates.set_auto_apply_opt_in(candidate_id, enabled).await? {
            return Err(SettingsError::CandidateNotFound(candidate_id));
        }
        info!(%candidate_id, enabled, "auto-apply opt-in changed");
        self.load(candidate_id).await
    }

    /// Newest first.
    pub async fn auto_apply_history(&self, candidate_id: Uuid) -> Result<Vec<AutoApplyRecord>, SettingsError> {
        Ok(self.applications.list_applications(candidate_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, FixedPlans};
    use chrono::{Duration, Utc};
    use radar_adapters::{DailyLimit, Entitlement};
    use radar_core::ProfileCompleteness;
    use radar_storage::MemoryStore;

    fn settings(store: &Arc<MemoryStore>, plans: Arc<FixedPlans>) -> CandidateSettings {
        CandidateSettings::new(
            store.clone(),
            store.clone(),
            Arc::new(EligibilityGate::new(plans)),
        )
    }

    #[tokio::test]
    async fn enabling_auto_apply_on_incomplete_profile_lists_what_is_missing() {
        let store = Arc::new(MemoryStore::new());
        let mut c = candidate(&["Rust"], 3);
        c.auto_apply_opt_in = false;
        c.completeness = ProfileCompleteness {
            has_resume: false,
            has_profile_picture: false,
            ..ProfileCompleteness::complete()
        };
        store.upsert_candidate(&c).await.unwrap();
        let settings = settings(&store, FixedPlans::allow(DailyLimit::Unbounded));

        match settings.set_auto_apply_opt_in(c.candidate_id, true).await {
            Err(SettingsError::Ineligible { missing }) => {
                assert_eq!(missing, vec!["resume", "profile_picture"]);
            }
            other => panic!("expected ineligible, got {other:?}"),
        }
        assert!(!store.get_candidate(c.candidate_id).await.unwrap().unwrap().auto_apply_opt_in);

        let off = settings.set_auto_apply_opt_in(c.candidate_id, false).await.unwrap();
        assert!(!off.auto_apply_opt_in);
    }

    #[tokio::test]
    async fn enabling_requires_entitlement() {
        let store = Arc::new(MemoryStore::new());
        let mut c = candidate(&["Rust"], 3);
        c.auto_apply_opt_in = false;
        store.upsert_candidate(&c).await.unwrap();
        let plans = FixedPlans::allow(DailyLimit::Limited(2));
        plans.set(c.candidate_id, Entitlement::denied());
        let settings = settings(&store, plans.clone());

        assert!(matches!(
            settings.set_auto_apply_opt_in(c.candidate_id, true).await,
            Err(SettingsError::NotEntitled)
        ));

        plans.set(
            c.candidate_id,
            Entitlement {
                allowed: true,
                daily_limit: DailyLimit::Limited(2),
            },
        );
        let on = settings.set_auto_apply_opt_in(c.candidate_id, true).await.unwrap();
        assert!(on.auto_apply_opt_in);
    }

    #[tokio::test]
    async fn talent_radar_toggle_and_history() {
        let store = Arc::new(MemoryStore::new());
        let c = candidate(&["Rust"], 3);
        store.upsert_candidate(&c).await.unwrap();
        let settings = settings(&store, FixedPlans::allow(DailyLimit::Unbounded));

        let off = settings.set_talent_radar_opt_in(c.candidate_id, false).await.unwrap();
        assert!(!off.talent_radar_opt_in);
        assert!(matches!(
            settings.set_talent_radar_opt_in(Uuid::new_v4(), true).await,
            Err(SettingsError::CandidateNotFound(_))
        ));

        let older = AutoApplyRecord::applied(c.candidate_id, Uuid::new_v4(), 85, Utc::now() - Duration::hours(3));
        let newer = AutoApplyRecord::applied(c.candidate_id, Uuid::new_v4(), 91, Utc::now());
        for record in [&older, &newer] {
            store.record_application(record).await.unwrap();
        }
        let history = settings.auto_apply_history(c.candidate_id).await.unwrap();
        assert_eq!(history.iter().map(|r| r.id).collect::<Vec<_>>(), vec![newer.id, older.id]);
    }
}
