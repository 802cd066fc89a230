//! Durable keyed store contracts, their in-memory and Postgres implementations, and the
//! outbound HTTP client used to reach external collaborators.

mod http;
mod memory;
mod postgres;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radar_core::{
    AutoApplyRecord, CandidateRadarProfile, JobPosting, Match, Notification, RadarAlert, WorkMode,
};
use thiserror::Error;
use uuid::Uuid;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, RateLimiter, RetryDisposition, ServiceClient,
    ServiceClientConfig, ServiceError,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "radar-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all. Callers treat this as systemic.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

/// Result of a conditional write against a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key already existed; nothing was written.
    Duplicate,
}

impl InsertOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// One alert whose cached `match_count` disagreed with its Match rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCountFix {
    pub alert_id: Uuid,
    pub recorded: u64,
    pub actual: u64,
}

/// Daily cap checked inside the claim write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimQuota {
    pub window_start: DateTime<Utc>,
    /// Claims plus records allowed since `window_start`.
    pub limit: u64,
}

/// A request to reserve `(candidate_id, job_id)` before submitting an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRequest {
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub claimed_at: DateTime<Utc>,
    /// A claim with no record taken before this instant is abandoned and may be taken over.
    pub stale_before: DateTime<Utc>,
    /// `None` means unbounded.
    pub quota: Option<ClaimQuota>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// A record exists, or a live claim is held by another scan.
    AlreadyClaimed,
    /// The candidate's window is full; nothing was written.
    QuotaExhausted,
}

/// Filter for candidate pool queries. `None` means "don't filter on this field".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateFilter {
    pub talent_radar_opt_in: Option<bool>,
    pub auto_apply_opt_in: Option<bool>,
    /// Candidates who prefer `WorkMode::Any` satisfy every work mode.
    pub work_mode: Option<WorkMode>,
    /// Compared case-insensitively.
    pub city: Option<String>,
}

impl CandidateFilter {
    pub fn matches(&self, candidate: &CandidateRadarProfile) -> bool {
        if let Some(opt_in) = self.talent_radar_opt_in {
            if candidate.talent_radar_opt_in != opt_in {
                return false;
            }
        }
        if let Some(opt_in) = self.auto_apply_opt_in {
            if candidate.auto_apply_opt_in != opt_in {
                return false;
            }
        }
        if let Some(mode) = self.work_mode {
            if candidate.work_mode_preference != mode && candidate.work_mode_preference != WorkMode::Any {
                return false;
            }
        }
        if let Some(city) = &self.city {
            match &candidate.city {
                Some(c) if radar_core::same_city(c, city) => {}
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &RadarAlert) -> Result<(), StoreError>;
    /// Writes the editable fields and `is_active`; never touches `match_count`.
    /// Returns `false` when the alert does not exist.
    async fn update_alert(&self, alert: &RadarAlert) -> Result<bool, StoreError>;
    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<RadarAlert>, StoreError>;
    async fn list_alerts(&self) -> Result<Vec<RadarAlert>, StoreError>;
    async fn list_alerts_for_recruiter(&self, recruiter_id: Uuid) -> Result<Vec<RadarAlert>, StoreError>;
    async fn list_active_alerts(&self) -> Result<Vec<RadarAlert>, StoreError>;
    /// Removes the alert and all of its matches in one unit.
    /// Returns the number of matches removed, or `None` if the alert did not exist.
    async fn delete_alert(&self, alert_id: Uuid) -> Result<Option<u64>, StoreError>;

    /// Inserts the match and increments the alert's `match_count` atomically.
    /// An existing `(alert_id, candidate_id)` pair yields `Duplicate` and changes nothing.
    async fn insert_match(&self, record: &Match) -> Result<InsertOutcome, StoreError>;
    async fn matched_candidate_ids(&self, alert_id: Uuid) -> Result<HashSet<Uuid>, StoreError>;
    async fn get_match(&self, alert_id: Uuid, candidate_id: Uuid) -> Result<Option<Match>, StoreError>;
    async fn list_matches(&self, alert_id: Uuid) -> Result<Vec<Match>, StoreError>;
    /// Rewrites score and matched skills of an existing match. `false` if absent.
    async fn update_match_score(&self, record: &Match) -> Result<bool, StoreError>;
    /// Recomputes every alert's `match_count` from its Match rows in one unit, so a
    /// match inserted concurrently is never overwritten. Returns only the alerts whose
    /// count changed.
    async fn reconcile_match_counts(&self) -> Result<Vec<MatchCountFix>, StoreError>;
}

#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn upsert_candidate(&self, candidate: &CandidateRadarProfile) -> Result<(), StoreError>;
    async fn get_candidate(&self, candidate_id: Uuid) -> Result<Option<CandidateRadarProfile>, StoreError>;
    async fn query_candidates(&self, filter: &CandidateFilter) -> Result<Vec<CandidateRadarProfile>, StoreError>;
    async fn set_talent_radar_opt_in(&self, candidate_id: Uuid, enabled: bool) -> Result<bool, StoreError>;
    async fn set_auto_apply_opt_in(&self, candidate_id: Uuid, enabled: bool) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_job(&self, job: &JobPosting) -> Result<(), StoreError>;
    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobPosting>, StoreError>;
    async fn list_open_jobs(&self) -> Result<Vec<JobPosting>, StoreError>;
    /// Application subsystem write: the actual job application row.
    async fn insert_job_application(
        &self,
        candidate_id: Uuid,
        job_id: Uuid,
        submitted_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError>;
    async fn list_job_applications(&self, candidate_id: Uuid) -> Result<Vec<Uuid>, StoreError>;
}

/// Auto-apply bookkeeping. A claim on `(candidate_id, job_id)` is taken before the
/// application is submitted and is the uniqueness guard for the pair. It also
/// counts against the daily quota from the moment it is taken.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Job ids the candidate has applied to or holds a live claim on. Record-less
    /// claims taken before `stale_before` are left out so the job can be retried.
    async fn claimed_job_ids(
        &self,
        candidate_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<HashSet<Uuid>, StoreError>;
    /// Checks the pair, the lease and the quota and writes the claim as one unit
    /// per candidate. Concurrent scans of the same candidate cannot both pass the
    /// quota check.
    async fn claim_application(&self, request: &ClaimRequest) -> Result<ClaimOutcome, StoreError>;
    async fn release_application_claim(&self, candidate_id: Uuid, job_id: Uuid) -> Result<(), StoreError>;
    async fn record_application(&self, record: &AutoApplyRecord) -> Result<InsertOutcome, StoreError>;
    /// Newest first.
    async fn list_applications(&self, candidate_id: Uuid) -> Result<Vec<AutoApplyRecord>, StoreError>;
    async fn count_applications_since(
        &self,
        candidate_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Unique on `ref_id`: a second notification for the same source record is a `Duplicate`.
    async fn insert_notification(&self, notification: &Notification) -> Result<InsertOutcome, StoreError>;
    /// Newest first.
    async fn list_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, StoreError>;
}

pub trait RadarStore: AlertStore + CandidateStore + JobStore + ApplicationStore + NotificationStore {}

impl<T> RadarStore for T where T: AlertStore + CandidateStore + JobStore + ApplicationStore + NotificationStore {}

/// The store split by concern, so each can be swapped independently.
#[derive(Clone)]
pub struct Stores {
    pub alerts: Arc<dyn AlertStore>,
    pub candidates: Arc<dyn CandidateStore>,
    pub jobs: Arc<dyn JobStore>,
    pub applications: Arc<dyn ApplicationStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Stores {
    pub fn from_shared<S: RadarStore + 'static>(store: Arc<S>) -> Self {
        Self {
            alerts: store.clone(),
            candidates: store.clone(),
            jobs: store.clone(),
            applications: store.clone(),
            notifications: store,
        }
    }
}
