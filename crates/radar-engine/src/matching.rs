use std::sync::Arc;

use chrono::Utc;
use radar_adapters::{ScoreTarget, Scorer};
use radar_core::{skill_overlap, Feature, Match, NotificationEvent, RadarAlert};
use radar_storage::{AlertStore, InsertOutcome, StoreError};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{CandidatePoolView, EligibilityGate, EngineError, Notifier, Shutdown, SkipReason, UnitError};

/// What a scan does with a candidate who already holds a Match for the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingMatch {
    Skip,
    Rescore,
}

pub trait DiscoveryPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn existing_match(&self, alert: &RadarAlert, candidate_id: Uuid) -> ExistingMatch;
}

/// A Match is discovered once and never rescored by scans.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoverOnce;

impl DiscoveryPolicy for DiscoverOnce {
    fn name(&self) -> &'static str {
        "discover-once"
    }

    fn existing_match(&self, _alert: &RadarAlert, _candidate_id: Uuid) -> ExistingMatch {
        ExistingMatch::Skip
    }
}

/// Every scan refreshes the score of existing Matches in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct RescoreOnScan;

impl DiscoveryPolicy for RescoreOnScan {
    fn name(&self) -> &'static str {
        "rescore-on-scan"
    }

    fn existing_match(&self, _alert: &RadarAlert, _candidate_id: Uuid) -> ExistingMatch {
        ExistingMatch::Rescore
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertScanResult {
    pub alert_id: Uuid,
    /// Set when the owning recruiter's plan does not cover Talent Radar.
    pub skipped: Option<SkipReason>,
    pub new_matches: Vec<Match>,
    /// Candidates evaluated this scan, including those cut on experience.
    pub scanned: usize,
    pub already_matched: usize,
    pub below_experience: usize,
    pub below_threshold: usize,
    pub refreshed: usize,
    pub errors: Vec<UnitError>,
    /// Stopped early on shutdown.
    pub interrupted: bool,
}

impl AlertScanResult {
    fn new(alert_id: Uuid) -> Self {
        Self {
            alert_id,
            ..Default::default()
        }
    }

    fn skipped(alert_id: Uuid, reason: SkipReason) -> Self {
        Self {
            alert_id,
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// Scans one alert against the candidate pool.
pub struct MatchEngine {
    alerts: Arc<dyn AlertStore>,
    pool: CandidatePoolView,
    scorer: Arc<dyn Scorer>,
    gate: Arc<EligibilityGate>,
    notifier: Arc<Notifier>,
    policy: Arc<dyn DiscoveryPolicy>,
    shutdown: Shutdown,
}

impl MatchEngine {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        pool: CandidatePoolView,
        scorer: Arc<dyn Scorer>,
        gate: Arc<EligibilityGate>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            alerts,
            pool,
            scorer,
            gate,
            notifier,
            policy: Arc::new(DiscoverOnce),
            shutdown: Shutdown::new(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn DiscoveryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Loads the alert and scans it. Used for on-demand scans.
    pub async fn scan_alert_id(&self, alert_id: Uuid) -> Result<AlertScanResult, EngineError> {
        let alert = self
            .alerts
            .get_alert(alert_id)
            .await?
            .ok_or(EngineError::NotFound { kind: "alert", id: alert_id })?;
        Ok(self.scan_alert(&alert).await?)
    }

    /// Only a failure to read the candidate pool or the existing matches is returned
    /// as an error; per-candidate failures land in `errors`. A recruiter whose plan
    /// lacks Talent Radar gets a skipped result and no pool query.
    #[instrument(skip(self, alert), fields(alert_id = %alert.id, policy = self.policy.name()))]
    pub async fn scan_alert(&self, alert: &RadarAlert) -> Result<AlertScanResult, StoreError> {
        let mut result = AlertScanResult::new(alert.id);
        if !alert.is_active {
            debug!("alert paused; scan skipped");
            return Ok(result);
        }

        let decision = self.gate.check(alert.recruiter_id, Feature::TalentRadar).await;
        if decision.degraded {
            return Ok(AlertScanResult::skipped(alert.id, SkipReason::GateUnavailable));
        }
        if !decision.entitlement.allowed {
            debug!(recruiter_id = %alert.recruiter_id, "talent radar not in plan; scan skipped");
            return Ok(AlertScanResult::skipped(alert.id, SkipReason::NotEntitled));
        }

        let candidates = self.pool.for_alert(alert).await?;
        let existing = self.alerts.matched_candidate_ids(alert.id).await?;

        for candidate in candidates {
            if self.shutdown.is_triggered() {
                result.interrupted = true;
                break;
            }

            let candidate_id = candidate.candidate_id;
            let known = existing.contains(&candidate_id);
            if known && self.policy.existing_match(alert, candidate_id) == ExistingMatch::Skip {
                result.already_matched += 1;
                continue;
            }

            result.scanned += 1;
            if candidate.experience_years < alert.min_experience_years {
                result.below_experience += 1;
                continue;
            }

            let overlap = skill_overlap(&candidate.skills, &alert.required_skills);
            let outcome = match self.scorer.score(&candidate, ScoreTarget::Alert(alert)).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(%candidate_id, error = %err, "scoring failed; candidate skipped");
                    result.errors.push(UnitError::new(candidate_id, &err));
                    continue;
                }
            };
            debug!(%candidate_id, fit_score = outcome.fit_score, overlap, "candidate scored");

            let record = Match::new(
                alert.id,
                candidate_id,
                outcome.fit_score,
                outcome.matched_skills,
                Utc::now(),
            );

            if known {
                match self.alerts.update_match_score(&record).await {
                    Ok(true) => result.refreshed += 1,
                    Ok(false) => {}
                    Err(err) => {
                        warn!(%candidate_id, error = %err, "match rescore failed");
                        result.errors.push(UnitError::new(candidate_id, &err));
                    }
                }
                continue;
            }

            if outcome.fit_score < alert.min_fit_score {
                result.below_threshold += 1;
                continue;
            }

            match self.alerts.insert_match(&record).await {
                Ok(InsertOutcome::Inserted) => {
                    info!(%candidate_id, fit_score = record.fit_score, "new radar match");
                    self.notifier
                        .emit_logged(&NotificationEvent::MatchFound {
                            recruiter_id: alert.recruiter_id,
                            record: record.clone(),
                        })
                        .await;
                    result.new_matches.push(record);
                }
                Ok(InsertOutcome::Duplicate) => {
                    debug!(%candidate_id, "match already recorded by a concurrent scan");
                    result.already_matched += 1;
                }
                Err(err) => {
                    warn!(%candidate_id, error = %err, "failed to persist match");
                    result.errors.push(UnitError::new(candidate_id, &err));
                }
            }
        }

        info!(
            scanned = result.scanned,
            new_matches = result.new_matches.len(),
            errors = result.errors.len(),
            "alert scan finished"
        );
        Ok(result)
    }

    /// Rescores one existing Match in place. `Ok(None)` when the pair has no Match.
    /// The Match is kept even if the new score falls below the alert's threshold.
    #[instrument(skip(self))]
    pub async fn refresh_match(&self, alert_id: Uuid, candidate_id: Uuid) -> Result<Option<Match>, EngineError> {
        let Some(existing) = self.alerts.get_match(alert_id, candidate_id).await? else {
            return Ok(None);
        };
        let alert = self
            .alerts
            .get_alert(alert_id)
            .await?
            .ok_or(EngineError::NotFound { kind: "alert", id: alert_id })?;
        let candidate = self
            .pool
            .get(candidate_id)
            .await?
            .ok_or(EngineError::NotFound { kind: "candidate", id: candidate_id })?;

        let outcome = self.scorer.score(&candidate, ScoreTarget::Alert(&alert)).await?;
        let refreshed = Match {
            fit_score: outcome.fit_score,
            matched_skills: outcome.matched_skills,
            ..existing
        };
        if !self.alerts.update_match_score(&refreshed).await? {
            return Ok(None);
        }
        info!(fit_score = refreshed.fit_score, "match rescored");
        Ok(Some(refreshed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alert, candidate, notifier, FixedPlans, ScriptedScorer};
    use radar_adapters::{DailyLimit, Entitlement, GateMode, GatePolicy, PolicyPlanService};
    use radar_storage::{CandidateStore, MemoryStore, NotificationStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        scorer: Arc<ScriptedScorer>,
        plans: Arc<FixedPlans>,
        gate: Arc<EligibilityGate>,
        engine: MatchEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let scorer = ScriptedScorer::new();
        let plans = FixedPlans::allow(DailyLimit::Unbounded);
        let gate = Arc::new(EligibilityGate::new(plans.clone()));
        let engine = engine_for(&store, &scorer, &gate);
        Fixture {
            store,
            scorer,
            plans,
            gate,
            engine,
        }
    }

    fn engine_for(store: &Arc<MemoryStore>, scorer: &Arc<ScriptedScorer>, gate: &Arc<EligibilityGate>) -> MatchEngine {
        MatchEngine::new(
            store.clone(),
            CandidatePoolView::new(store.clone()),
            scorer.clone(),
            gate.clone(),
            notifier(store),
        )
    }

    async fn saved_alert(store: &MemoryStore, alert: &RadarAlert) {
        store.insert_alert(alert).await.unwrap();
    }

    #[tokio::test]
    async fn go_kubernetes_scenario_matches_once_and_rescans_idempotently() {
        let f = fixture();
        let recruiter = Uuid::new_v4();
        let a = alert(recruiter, &["Go", "Kubernetes"], 3, 80);
        saved_alert(&f.store, &a).await;
        let c = candidate(&["Go", "Kubernetes", "SQL"], 5);
        f.store.upsert_candidate(&c).await.unwrap();
        f.scorer.set(c.candidate_id, 85);

        let first = f.engine.scan_alert(&a).await.unwrap();
        assert_eq!(first.new_matches.len(), 1);
        assert_eq!(first.new_matches[0].matched_skills.len(), 2);
        assert_eq!(f.store.get_alert(a.id).await.unwrap().unwrap().match_count, 1);

        let second = f.engine.scan_alert(&a).await.unwrap();
        assert!(second.new_matches.is_empty());
        assert_eq!(second.already_matched, 1);
        assert_eq!(f.store.get_alert(a.id).await.unwrap().unwrap().match_count, 1);
        assert_eq!(f.scorer.calls(), 1);

        let inbox = f.store.list_notifications(recruiter).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].ref_id, first.new_matches[0].id);
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let f = fixture();
        let a = alert(Uuid::new_v4(), &["Go"], 0, 70);
        saved_alert(&f.store, &a).await;
        let below = candidate(&["Go"], 2);
        let at = candidate(&["Go"], 2);
        f.store.upsert_candidate(&below).await.unwrap();
        f.store.upsert_candidate(&at).await.unwrap();
        f.scorer.set(below.candidate_id, 69);
        f.scorer.set(at.candidate_id, 70);

        let result = f.engine.scan_alert(&a).await.unwrap();
        assert_eq!(result.below_threshold, 1);
        let ids: Vec<Uuid> = result.new_matches.iter().map(|m| m.candidate_id).collect();
        assert_eq!(ids, vec![at.candidate_id]);
        assert!(f.store.get_match(a.id, below.candidate_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn candidates_below_experience_are_never_scored() {
        let f = fixture();
        let a = alert(Uuid::new_v4(), &["Go", "Kubernetes"], 3, 50);
        saved_alert(&f.store, &a).await;
        let junior = candidate(&["Go", "Kubernetes"], 2);
        f.store.upsert_candidate(&junior).await.unwrap();
        f.scorer.set(junior.candidate_id, 100);

        let result = f.engine.scan_alert(&a).await.unwrap();
        assert_eq!(result.below_experience, 1);
        assert!(result.new_matches.is_empty());
        assert_eq!(f.scorer.calls(), 0);
    }

    #[tokio::test]
    async fn one_scoring_failure_does_not_abort_the_scan() {
        let f = fixture();
        let a = alert(Uuid::new_v4(), &["Go"], 0, 60);
        saved_alert(&f.store, &a).await;
        let broken = candidate(&["Go"], 1);
        let fine = candidate(&["Go"], 1);
        f.store.upsert_candidate(&broken).await.unwrap();
        f.store.upsert_candidate(&fine).await.unwrap();
        f.scorer.fail(broken.candidate_id);
        f.scorer.set(fine.candidate_id, 90);

        let result = f.engine.scan_alert(&a).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].subject_id, broken.candidate_id);
        assert_eq!(result.new_matches.len(), 1);
        assert_eq!(result.new_matches[0].candidate_id, fine.candidate_id);
    }

    #[tokio::test]
    async fn paused_alert_scan_is_a_no_op() {
        let f = fixture();
        let mut a = alert(Uuid::new_v4(), &["Go"], 0, 10);
        a.is_active = false;
        saved_alert(&f.store, &a).await;
        f.store.upsert_candidate(&candidate(&["Go"], 4)).await.unwrap();

        let result = f.engine.scan_alert(&a).await.unwrap();
        assert_eq!(result.scanned, 0);
        assert!(result.new_matches.is_empty());
    }

    #[tokio::test]
    async fn concurrent_scans_of_one_alert_never_duplicate_matches() {
        let f = fixture();
        let a = alert(Uuid::new_v4(), &["Go"], 0, 50);
        saved_alert(&f.store, &a).await;
        for _ in 0..5 {
            let c = candidate(&["Go"], 3);
            f.store.upsert_candidate(&c).await.unwrap();
            f.scorer.set(c.candidate_id, 75);
        }

        let engine = Arc::new(f.engine);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let a = a.clone();
            handles.push(tokio::spawn(async move { engine.scan_alert(&a).await.unwrap() }));
        }
        let mut created = 0;
        for handle in handles {
            created += handle.await.unwrap().new_matches.len();
        }

        assert_eq!(created, 5);
        assert_eq!(f.store.list_matches(a.id).await.unwrap().len(), 5);
        assert_eq!(f.store.get_alert(a.id).await.unwrap().unwrap().match_count, 5);
    }

    #[tokio::test]
    async fn refresh_match_rescores_in_place() {
        let f = fixture();
        let a = alert(Uuid::new_v4(), &["Go"], 0, 80);
        saved_alert(&f.store, &a).await;
        let c = candidate(&["Go"], 3);
        f.store.upsert_candidate(&c).await.unwrap();
        f.scorer.set(c.candidate_id, 82);
        let original = f.engine.scan_alert(&a).await.unwrap().new_matches.remove(0);

        f.scorer.set(c.candidate_id, 64);
        let refreshed = f.engine.refresh_match(a.id, c.candidate_id).await.unwrap().unwrap();
        assert_eq!(refreshed.id, original.id);
        assert_eq!(refreshed.matched_at, original.matched_at);
        assert_eq!(refreshed.fit_score, 64);
        assert_eq!(f.store.list_matches(a.id).await.unwrap().len(), 1);
        assert_eq!(f.store.get_alert(a.id).await.unwrap().unwrap().match_count, 1);

        assert!(f.engine.refresh_match(a.id, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rescore_policy_refreshes_existing_matches_during_scans() {
        let f = fixture();
        let a = alert(Uuid::new_v4(), &["Go"], 0, 80);
        saved_alert(&f.store, &a).await;
        let c = candidate(&["Go"], 3);
        f.store.upsert_candidate(&c).await.unwrap();
        f.scorer.set(c.candidate_id, 90);
        f.engine.scan_alert(&a).await.unwrap();

        let engine = engine_for(&f.store, &f.scorer, &f.gate).with_policy(Arc::new(RescoreOnScan));
        f.scorer.set(c.candidate_id, 95);
        let result = engine.scan_alert(&a).await.unwrap();
        assert_eq!(result.refreshed, 1);
        assert!(result.new_matches.is_empty());
        assert_eq!(f.store.get_match(a.id, c.candidate_id).await.unwrap().unwrap().fit_score, 95);
        assert_eq!(f.store.get_alert(a.id).await.unwrap().unwrap().match_count, 1);
    }

    #[tokio::test]
    async fn triggered_shutdown_stops_before_the_next_candidate() {
        let f = fixture();
        let shutdown = Shutdown::new();
        let engine = engine_for(&f.store, &f.scorer, &f.gate).with_shutdown(shutdown.clone());
        let a = alert(Uuid::new_v4(), &["Go"], 0, 10);
        saved_alert(&f.store, &a).await;
        f.store.upsert_candidate(&candidate(&["Go"], 3)).await.unwrap();

        shutdown.trigger();
        let result = engine.scan_alert(&a).await.unwrap();
        assert!(result.interrupted);
        assert_eq!(result.scanned, 0);
        assert!(f.store.list_matches(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recruiter_without_talent_radar_gets_no_matches() {
        let f = fixture();
        let recruiter = Uuid::new_v4();
        f.plans.set(recruiter, Entitlement::denied());
        let a = alert(recruiter, &["Go"], 0, 50);
        saved_alert(&f.store, &a).await;
        let c = candidate(&["Go"], 3);
        f.store.upsert_candidate(&c).await.unwrap();
        f.scorer.set(c.candidate_id, 95);

        let result = f.engine.scan_alert(&a).await.unwrap();
        assert_eq!(result.skipped, Some(SkipReason::NotEntitled));
        assert!(result.new_matches.is_empty());
        assert_eq!(f.scorer.calls(), 0);
        assert!(f.store.list_notifications(recruiter).await.unwrap().is_empty());
        assert_eq!(f.gate.degraded_events(), 0);
    }

    #[tokio::test]
    async fn unreachable_plan_service_skips_the_alert_as_degraded() {
        let f = fixture();
        let recruiter = Uuid::new_v4();
        f.plans.unreachable_for(recruiter);
        let a = alert(recruiter, &["Go"], 0, 50);
        saved_alert(&f.store, &a).await;
        let c = candidate(&["Go"], 3);
        f.store.upsert_candidate(&c).await.unwrap();
        f.scorer.set(c.candidate_id, 95);

        let result = f.engine.scan_alert(&a).await.unwrap();
        assert_eq!(result.skipped, Some(SkipReason::GateUnavailable));
        assert!(f.store.list_matches(a.id).await.unwrap().is_empty());
        assert_eq!(f.gate.degraded_events(), 1);
    }

    #[tokio::test]
    async fn enforced_default_policy_blocks_until_unlocked() {
        let store = Arc::new(MemoryStore::new());
        let scorer = ScriptedScorer::new();
        let plans = Arc::new(PolicyPlanService::new(GatePolicy::default()));
        let gate = Arc::new(EligibilityGate::new(plans.clone()));
        let engine = engine_for(&store, &scorer, &gate);
        let a = alert(Uuid::new_v4(), &["Go"], 0, 50);
        saved_alert(&store, &a).await;
        let c = candidate(&["Go"], 3);
        store.upsert_candidate(&c).await.unwrap();
        scorer.set(c.candidate_id, 90);

        let blocked = engine.scan_alert(&a).await.unwrap();
        assert_eq!(blocked.skipped, Some(SkipReason::NotEntitled));
        assert!(blocked.new_matches.is_empty());

        plans
            .set_policy(GatePolicy {
                mode: GateMode::Unlocked,
                ..GatePolicy::default()
            })
            .await;
        let open = engine.scan_alert(&a).await.unwrap();
        assert_eq!(open.skipped, None);
        assert_eq!(open.new_matches.len(), 1);
    }
}
