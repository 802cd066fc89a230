use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radar_core::{AutoApplyRecord, CandidateRadarProfile, JobPosting, Match, Notification, RadarAlert};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    AlertStore, ApplicationStore, CandidateFilter, CandidateStore, ClaimOutcome, ClaimRequest,
    InsertOutcome, JobStore, MatchCountFix, NotificationStore, StoreError,
};

/// Process-local store. Every write happens under one lock, which gives the same
/// per-pair atomicity the Postgres schema gets from its primary keys.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    alerts: HashMap<Uuid, RadarAlert>,
    matches: BTreeMap<(Uuid, Uuid), Match>,
    candidates: HashMap<Uuid, CandidateRadarProfile>,
    jobs: HashMap<Uuid, JobPosting>,
    job_applications: BTreeMap<(Uuid, Uuid), DateTime<Utc>>,
    claims: BTreeMap<(Uuid, Uuid), DateTime<Utc>>,
    applications: BTreeMap<(Uuid, Uuid), AutoApplyRecord>,
    notifications: HashMap<Uuid, Notification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites an alert's cached `match_count`, e.g. to seed drift in tests.
    pub async fn set_match_count(&self, alert_id: Uuid, count: u64) {
        if let Some(alert) = self.state.write().await.alerts.get_mut(&alert_id) {
            alert.match_count = count;
        }
    }
}

impl MemoryState {
    /// Distinct jobs claimed or applied to since `since`, not counting `except`.
    fn used_since(&self, candidate_id: Uuid, since: DateTime<Utc>, except: Uuid) -> u64 {
        let claimed = self
            .claims
            .iter()
            .filter(|(_, at)| **at >= since)
            .map(|(key, _)| *key);
        let applied = self
            .applications
            .values()
            .filter(|r| r.applied_at >= since)
            .map(|r| (r.candidate_id, r.job_id));
        claimed
            .chain(applied)
            .filter(|(c, j)| *c == candidate_id && *j != except)
            .map(|(_, j)| j)
            .collect::<HashSet<_>>()
            .len() as u64
    }
}

fn sorted_alerts<'a>(alerts: impl Iterator<Item = &'a RadarAlert>) -> Vec<RadarAlert> {
    let mut out: Vec<_> = alerts.cloned().collect();
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    out
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &RadarAlert) -> Result<(), StoreError> {
        self.state.write().await.alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn update_alert(&self, alert: &RadarAlert) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(existing) = state.alerts.get_mut(&alert.id) else {
            return Ok(false);
        };
        let match_count = existing.match_count;
        *existing = RadarAlert {
            match_count,
            ..alert.clone()
        };
        Ok(true)
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<RadarAlert>, StoreError> {
        Ok(self.state.read().await.alerts.get(&alert_id).cloned())
    }

    async fn list_alerts(&self) -> Result<Vec<RadarAlert>, StoreError> {
        Ok(sorted_alerts(self.state.read().await.alerts.values()))
    }

    async fn list_alerts_for_recruiter(&self, recruiter_id: Uuid) -> Result<Vec<RadarAlert>, StoreError> {
        let state = self.state.read().await;
        Ok(sorted_alerts(
            state.alerts.values().filter(|a| a.recruiter_id == recruiter_id),
        ))
    }

    async fn list_active_alerts(&self) -> Result<Vec<RadarAlert>, StoreError> {
        let state = self.state.read().await;
        Ok(sorted_alerts(state.alerts.values().filter(|a| a.is_active)))
    }

    async fn delete_alert(&self, alert_id: Uuid) -> Result<Option<u64>, StoreError> {
        let mut state = self.state.write().await;
        if state.alerts.remove(&alert_id).is_none() {
            return Ok(None);
        }
        let before = state.matches.len();
        state.matches.retain(|(a, _), _| *a != alert_id);
        Ok(Some((before - state.matches.len()) as u64))
    }

    async fn insert_match(&self, record: &Match) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.write().await;
        let key = (record.alert_id, record.candidate_id);
        if state.matches.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        let Some(alert) = state.alerts.get_mut(&record.alert_id) else {
            return Err(StoreError::Corrupt {
                table: "radar_matches",
                detail: format!("alert {} does not exist", record.alert_id),
            });
        };
        alert.match_count += 1;
        state.matches.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn matched_candidate_ids(&self, alert_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .matches
            .keys()
            .filter(|(a, _)| *a == alert_id)
            .map(|(_, c)| *c)
            .collect())
    }

    async fn get_match(&self, alert_id: Uuid, candidate_id: Uuid) -> Result<Option<Match>, StoreError> {
        Ok(self.state.read().await.matches.get(&(alert_id, candidate_id)).cloned())
    }

    async fn list_matches(&self, alert_id: Uuid) -> Result<Vec<Match>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state
            .matches
            .values()
            .filter(|m| m.alert_id == alert_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.matched_at.cmp(&a.matched_at).then(a.candidate_id.cmp(&b.candidate_id)));
        Ok(out)
    }

    async fn update_match_score(&self, record: &Match) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.matches.get_mut(&(record.alert_id, record.candidate_id)) {
            Some(existing) => {
                existing.fit_score = record.fit_score;
                existing.matched_skills = record.matched_skills.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reconcile_match_counts(&self) -> Result<Vec<MatchCountFix>, StoreError> {
        let mut state = self.state.write().await;
        let mut actual: HashMap<Uuid, u64> = HashMap::new();
        for (alert_id, _) in state.matches.keys() {
            *actual.entry(*alert_id).or_default() += 1;
        }
        let mut fixes = Vec::new();
        for alert in state.alerts.values_mut() {
            let count = actual.get(&alert.id).copied().unwrap_or(0);
            if alert.match_count != count {
                fixes.push(MatchCountFix {
                    alert_id: alert.id,
                    recorded: alert.match_count,
                    actual: count,
                });
                alert.match_count = count;
            }
        }
        fixes.sort_by_key(|f| f.alert_id);
        Ok(fixes)
    }
}

#[async_trait]
impl CandidateStore for MemoryStore {
    async fn upsert_candidate(&self, candidate: &CandidateRadarProfile) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .candidates
            .insert(candidate.candidate_id, candidate.clone());
        Ok(())
    }

    async fn get_candidate(&self, candidate_id: Uuid) -> Result<Option<CandidateRadarProfile>, StoreError> {
        Ok(self.state.read().await.candidates.get(&candidate_id).cloned())
    }

    async fn query_candidates(&self, filter: &CandidateFilter) -> Result<Vec<CandidateRadarProfile>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state
            .candidates
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.candidate_id);
        Ok(out)
    }

    async fn set_talent_radar_opt_in(&self, candidate_id: Uuid, enabled: bool) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        Ok(match state.candidates.get_mut(&candidate_id) {
            Some(c) => {
                c.talent_radar_opt_in = enabled;
                true
            }
            None => false,
        })
    }

    async fn set_auto_apply_opt_in(&self, candidate_id: Uuid, enabled: bool) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        Ok(match state.candidates.get_mut(&candidate_id) {
            Some(c) => {
                c.auto_apply_opt_in = enabled;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn upsert_job(&self, job: &JobPosting) -> Result<(), StoreError> {
        self.state.write().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        Ok(self.state.read().await.jobs.get(&job_id).cloned())
    }

    async fn list_open_jobs(&self) -> Result<Vec<JobPosting>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state.jobs.values().filter(|j| j.is_open).cloned().collect();
        out.sort_by(|a, b| b.posted_at.cmp(&a.posted_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn insert_job_application(
        &self,
        candidate_id: Uuid,
        job_id: Uuid,
        submitted_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.write().await;
        if state.job_applications.contains_key(&(candidate_id, job_id)) {
            return Ok(InsertOutcome::Duplicate);
        }
        state.job_applications.insert((candidate_id, job_id), submitted_at);
        Ok(InsertOutcome::Inserted)
    }

    async fn list_job_applications(&self, candidate_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .job_applications
            .keys()
            .filter(|(c, _)| *c == candidate_id)
            .map(|(_, j)| *j)
            .collect())
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn claimed_job_ids(
        &self,
        candidate_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<HashSet<Uuid>, StoreError> {
        let state = self.state.read().await;
        let live_claims = state
            .claims
            .iter()
            .filter(|(_, at)| **at >= stale_before)
            .map(|(key, _)| key);
        Ok(live_claims
            .chain(state.applications.keys())
            .filter(|(c, _)| *c == candidate_id)
            .map(|(_, j)| *j)
            .collect())
    }

    async fn claim_application(&self, request: &ClaimRequest) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.write().await;
        let key = (request.candidate_id, request.job_id);
        if state.applications.contains_key(&key) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        if matches!(state.claims.get(&key), Some(at) if *at >= request.stale_before) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        if let Some(quota) = request.quota {
            let used = state.used_since(request.candidate_id, quota.window_start, request.job_id);
            if used >= quota.limit {
                return Ok(ClaimOutcome::QuotaExhausted);
            }
        }
        state.claims.insert(key, request.claimed_at);
        Ok(ClaimOutcome::Claimed)
    }

    async fn release_application_claim(&self, candidate_id: Uuid, job_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let key = (candidate_id, job_id);
        if !state.applications.contains_key(&key) {
            state.claims.remove(&key);
        }
        Ok(())
    }

    async fn record_application(&self, record: &AutoApplyRecord) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.write().await;
        let key = (record.candidate_id, record.job_id);
        if state.applications.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        state.applications.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_applications(&self, candidate_id: Uuid) -> Result<Vec<AutoApplyRecord>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state
            .applications
            .values()
            .filter(|r| r.candidate_id == candidate_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.applied_at.cmp(&a.applied_at).then(a.job_id.cmp(&b.job_id)));
        Ok(out)
    }

    async fn count_applications_since(
        &self,
        candidate_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .applications
            .values()
            .filter(|r| r.candidate_id == candidate_id && r.applied_at >= since)
            .count() as u64)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.write().await;
        if state.notifications.contains_key(&notification.ref_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        state
            .notifications
            .insert(notification.ref_id, notification.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
