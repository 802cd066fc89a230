use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use radar_adapters::{
    ApplicationRequest, ApplicationSubmitter, DailyLimit, ScoreOutcome, ScoreTarget, Scorer,
};
use radar_core::{
    AutoApplyRecord, CandidateRadarProfile, Feature, JobPosting, NotificationEvent,
    AUTO_APPLY_THRESHOLD,
};
use radar_storage::{ApplicationStore, ClaimOutcome, ClaimQuota, ClaimRequest, JobStore, StoreError};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{EligibilityGate, Notifier, Shutdown, UnitError};

/// Why a candidate scan did nothing. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotOptedIn,
    ProfileIncomplete,
    NotEntitled,
    /// The plan service could not be reached; the gate denied.
    GateUnavailable,
    QuotaExhausted,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateScanResult {
    pub candidate_id: Uuid,
    pub skipped: Option<SkipReason>,
    pub new_applications: Vec<AutoApplyRecord>,
    /// Jobs scored this scan.
    pub scanned: usize,
    pub qualifying: usize,
    /// Qualifying jobs left for a later scan because the daily quota ran out.
    pub deferred: usize,
    pub errors: Vec<UnitError>,
    pub interrupted: bool,
}

impl CandidateScanResult {
    fn new(candidate_id: Uuid) -> Self {
        Self {
            candidate_id,
            ..Default::default()
        }
    }

    fn skipped(candidate_id: Uuid, reason: SkipReason) -> Self {
        Self {
            candidate_id,
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// How long a claim with no record blocks its job before another scan may retry it.
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 3600;

/// Start of the current UTC day; the quota window.
pub fn quota_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

struct Qualified {
    job: JobPosting,
    outcome: ScoreOutcome,
}

enum Applied {
    Yes,
    No,
    QuotaExhausted,
}

/// Applies to open jobs on behalf of one opted-in candidate.
pub struct AutoApplyEngine {
    jobs: Arc<dyn JobStore>,
    applications: Arc<dyn ApplicationStore>,
    scorer: Arc<dyn Scorer>,
    gate: Arc<EligibilityGate>,
    submitter: Arc<dyn ApplicationSubmitter>,
    notifier: Arc<Notifier>,
    claim_lease: Duration,
    shutdown: Shutdown,
}

impl AutoApplyEngine {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        applications: Arc<dyn ApplicationStore>,
        scorer: Arc<dyn Scorer>,
        gate: Arc<EligibilityGate>,
        submitter: Arc<dyn ApplicationSubmitter>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            jobs,
            applications,
            scorer,
            gate,
            submitter,
            notifier,
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
            shutdown: Shutdown::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Remaining applications the candidate may submit today; `None` when unbounded.
    /// Only a cheap early exit: the authoritative check runs inside each claim.
    async fn remaining_quota(&self, candidate_id: Uuid, limit: DailyLimit) -> Result<Option<u64>, StoreError> {
        if limit == DailyLimit::Unbounded {
            return Ok(None);
        }
        let used = self
            .applications
            .count_applications_since(candidate_id, quota_window_start(Utc::now()))
            .await?;
        Ok(limit.remaining(used))
    }

    /// A failed precondition returns a skipped result, not an error. Errors are
    /// reserved for failing to read jobs, claims or quota usage.
    #[instrument(skip(self, candidate), fields(candidate_id = %candidate.candidate_id))]
    pub async fn scan_candidate(&self, candidate: &CandidateRadarProfile) -> Result<CandidateScanResult, StoreError> {
        let candidate_id = candidate.candidate_id;
        if !candidate.auto_apply_opt_in {
            return Ok(CandidateScanResult::skipped(candidate_id, SkipReason::NotOptedIn));
        }
        if !candidate.auto_apply_eligible() {
            debug!(missing = ?candidate.completeness.missing(), "profile incomplete; auto-apply skipped");
            return Ok(CandidateScanResult::skipped(candidate_id, SkipReason::ProfileIncomplete));
        }

        let decision = self.gate.check(candidate_id, Feature::AutoApply).await;
        if decision.degraded {
            return Ok(CandidateScanResult::skipped(candidate_id, SkipReason::GateUnavailable));
        }
        if !decision.entitlement.allowed {
            return Ok(CandidateScanResult::skipped(candidate_id, SkipReason::NotEntitled));
        }
        let limit = decision.entitlement.daily_limit;

        if self.remaining_quota(candidate_id, limit).await? == Some(0) {
            info!("daily auto-apply quota already used");
            return Ok(CandidateScanResult::skipped(candidate_id, SkipReason::QuotaExhausted));
        }

        let mut result = CandidateScanResult::new(candidate_id);
        let claimed = self
            .applications
            .claimed_job_ids(candidate_id, Utc::now() - self.claim_lease)
            .await?;
        let open_jobs: Vec<JobPosting> = self
            .jobs
            .list_open_jobs()
            .await?
            .into_iter()
            .filter(|job| !claimed.contains(&job.id))
            .collect();

        let mut qualified = Vec::new();
        for job in open_jobs {
            if self.shutdown.is_triggered() {
                result.interrupted = true;
                break;
            }
            result.scanned += 1;
            match self.scorer.score(candidate, ScoreTarget::Job(&job)).await {
                Ok(outcome) if outcome.fit_score >= AUTO_APPLY_THRESHOLD => {
                    qualified.push(Qualified { job, outcome });
                }
                Ok(outcome) => {
                    debug!(job_id = %job.id, fit_score = outcome.fit_score, "below auto-apply threshold");
                }
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "scoring failed; job skipped");
                    result.errors.push(UnitError::new(job.id, &err));
                }
            }
        }
        result.qualifying = qualified.len();

        // Best matches consume the scarce quota first; ties broken newest posting, then id.
        qualified.sort_by_key(|q| (Reverse(q.outcome.fit_score), Reverse(q.job.posted_at), q.job.id));

        let mut pending = qualified.into_iter();
        while let Some(Qualified { job, outcome }) = pending.next() {
            if self.shutdown.is_triggered() {
                result.interrupted = true;
                break;
            }
            if let Applied::QuotaExhausted = self.apply(candidate, &job, outcome.fit_score, limit, &mut result).await {
                result.deferred = 1 + pending.len();
                info!(deferred = result.deferred, "daily auto-apply quota exhausted");
                break;
            }
        }

        info!(
            scanned = result.scanned,
            applied = result.new_applications.len(),
            deferred = result.deferred,
            errors = result.errors.len(),
            "candidate scan finished"
        );
        Ok(result)
    }

    /// Claim, submit, record. The claim carries the quota check, so concurrent scans
    /// of one candidate cannot overrun the daily limit. A failed submission releases
    /// the claim so no record exists without an application behind it.
    async fn apply(
        &self,
        candidate: &CandidateRadarProfile,
        job: &JobPosting,
        fit_score: u8,
        limit: DailyLimit,
        result: &mut CandidateScanResult,
    ) -> Applied {
        let candidate_id = candidate.candidate_id;
        let now = Utc::now();
        let claim = ClaimRequest {
            candidate_id,
            job_id: job.id,
            claimed_at: now,
            stale_before: now - self.claim_lease,
            quota: limit.remaining(0).map(|limit| ClaimQuota {
                window_start: quota_window_start(now),
                limit,
            }),
        };

        match self.applications.claim_application(&claim).await {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyClaimed) => {
                debug!(job_id = %job.id, "already applied or in flight");
                return Applied::No;
            }
            Ok(ClaimOutcome::QuotaExhausted) => return Applied::QuotaExhausted,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "could not claim application");
                result.errors.push(UnitError::new(job.id, &err));
                return Applied::No;
            }
        }

        let request = ApplicationRequest {
            candidate_id,
            job_id: job.id,
            match_score: fit_score,
            resume_ref: candidate.resume_ref.clone(),
            submitted_at: now,
        };
        if let Err(err) = self.submitter.submit(&request).await {
            warn!(job_id = %job.id, error = %err, "application submission failed");
            result.errors.push(UnitError::new(job.id, &err));
            if let Err(release_err) = self.applications.release_application_claim(candidate_id, job.id).await {
                error!(job_id = %job.id, error = %release_err, "failed to release application claim");
            }
            return Applied::No;
        }

        let record = AutoApplyRecord::applied(candidate_id, job.id, fit_score, now);
        match self.applications.record_application(&record).await {
            Ok(_) => {
                info!(job_id = %job.id, fit_score, "auto-applied");
                self.notifier
                    .emit_logged(&NotificationEvent::ApplicationSubmitted { record: record.clone() })
                    .await;
                result.new_applications.push(record);
                Applied::Yes
            }
            Err(err) => {
                // The application exists; the claim stays so the job is never re-submitted.
                error!(job_id = %job.id, error = %err, "application submitted but record write failed");
                result.errors.push(UnitError::new(job.id, &err));
                Applied::No
            }
        }
    }
}
