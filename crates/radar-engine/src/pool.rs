use std::sync::Arc;

use radar_core::{CandidateRadarProfile, RadarAlert, WorkMode};
use radar_storage::{CandidateFilter, CandidateStore, StoreError};

/// Read-only view over the candidate projection, shaped for the two scans.
#[derive(Clone)]
pub struct CandidatePoolView {
    candidates: Arc<dyn CandidateStore>,
}

impl CandidatePoolView {
    pub fn new(candidates: Arc<dyn CandidateStore>) -> Self {
        Self { candidates }
    }

    /// Filter applied for an alert scan. Talent Radar opt-in is always required.
    pub fn filter_for_alert(alert: &RadarAlert) -> CandidateFilter {
        CandidateFilter {
            talent_radar_opt_in: Some(true),
            auto_apply_opt_in: None,
            work_mode: (alert.work_mode != WorkMode::Any).then_some(alert.work_mode),
            city: alert.city_filter().map(str::to_string),
        }
    }

    pub async fn for_alert(&self, alert: &RadarAlert) -> Result<Vec<CandidateRadarProfile>, StoreError> {
        let filter = Self::filter_for_alert(alert);
        let mut pool = self.candidates.query_candidates(&filter).await?;
        // The projection may be served by another system; re-check opt-in locally.
        pool.retain(|c| filter.matches(c));
        Ok(pool)
    }

    pub async fn auto_apply_candidates(&self) -> Result<Vec<CandidateRadarProfile>, StoreError> {
        let filter = CandidateFilter {
            auto_apply_opt_in: Some(true),
            ..Default::default()
        };
        let mut pool = self.candidates.query_candidates(&filter).await?;
        pool.retain(|c| c.auto_apply_opt_in);
        Ok(pool)
    }

    pub async fn get(&self, candidate_id: uuid::Uuid) -> Result<Option<CandidateRadarProfile>, StoreError> {
        self.candidates.get_candidate(candidate_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use radar_core::{AlertDraft, ProfileCompleteness};
    use radar_storage::MemoryStore;
    use uuid::Uuid;

    fn candidate(radar: bool, city: &str, mode: WorkMode) -> CandidateRadarProfile {
        CandidateRadarProfile {
            candidate_id: Uuid::new_v4(),
            skills: ["Go".to_string()].into_iter().collect(),
            experience_years: 4,
            city: Some(city.to_string()),
            work_mode_preference: mode,
            resume_ref: None,
            talent_radar_opt_in: radar,
            auto_apply_opt_in: false,
            completeness: ProfileCompleteness::default(),
        }
    }

    fn alert(location: Option<&str>, mode: WorkMode) -> RadarAlert {
        RadarAlert::new(
            Uuid::new_v4(),
            AlertDraft {
                name: "Go devs".into(),
                required_skills: ["Go".to_string()].into_iter().collect(),
                min_experience_years: 0,
                min_fit_score: 50,
                location: location.map(str::to_string),
                work_mode: mode,
                is_active: true,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn opted_out_candidates_are_never_returned() {
        let store = Arc::new(MemoryStore::new());
        let visible = candidate(true, "Lisbon", WorkMode::Hybrid);
        let hidden = candidate(false, "Lisbon", WorkMode::Hybrid);
        store.upsert_candidate(&visible).await.unwrap();
        store.upsert_candidate(&hidden).await.unwrap();

        let view = CandidatePoolView::new(store);
        let pool = view.for_alert(&alert(None, WorkMode::Any)).await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].candidate_id, visible.candidate_id);
    }

    #[tokio::test]
    async fn city_and_mode_filters_apply_only_where_relevant() {
        let store = Arc::new(MemoryStore::new());
        let lisbon = candidate(true, "lisbon", WorkMode::OnSite);
        let porto = candidate(true, "Porto", WorkMode::OnSite);
        let remote = candidate(true, "Porto", WorkMode::Remote);
        for c in [&lisbon, &porto, &remote] {
            store.upsert_candidate(c).await.unwrap();
        }
        let view = CandidatePoolView::new(store);

        let onsite_lisbon = view.for_alert(&alert(Some("Lisbon"), WorkMode::OnSite)).await.unwrap();
        assert_eq!(onsite_lisbon.len(), 1);
        assert_eq!(onsite_lisbon[0].candidate_id, lisbon.candidate_id);

        let remote_pool = view.for_alert(&alert(None, WorkMode::Remote)).await.unwrap();
        assert_eq!(remote_pool.len(), 1);
        assert_eq!(remote_pool[0].candidate_id, remote.candidate_id);
    }
}
