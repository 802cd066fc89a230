use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radar_storage::{JobStore, ServiceClient, ServiceError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRequest {
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub match_score: u8,
    pub resume_ref: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("application rejected: {0}")]
    Rejected(String),
    #[error("application subsystem unreachable: {0}")]
    Transport(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ServiceError> for SubmitError {
    fn from(err: ServiceError) -> Self {
        if err.is_transport() {
            SubmitError::Transport(err.to_string())
        } else {
            SubmitError::Rejected(err.to_string())
        }
    }
}

/// The application subsystem's write path. A successful return means the job
/// application exists; resubmitting an existing pair must also succeed.
#[async_trait]
pub trait ApplicationSubmitter: Send + Sync {
    async fn submit(&self, request: &ApplicationRequest) -> Result<(), SubmitError>;
}

/// Writes the application row straight into the shared job store.
pub struct StoreApplicationSubmitter {
    jobs: Arc<dyn JobStore>,
}

impl StoreApplicationSubmitter {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl ApplicationSubmitter for StoreApplicationSubmitter {
    async fn submit(&self, request: &ApplicationRequest) -> Result<(), SubmitError> {
        let job = self
            .jobs
            .get_job(request.job_id)
            .await?
            .ok_or_else(|| SubmitError::Rejected(format!("job {} does not exist", request.job_id)))?;
        if !job.is_open {
            return Err(SubmitError::Rejected(format!("job {} is closed", job.id)));
        }

        let outcome = self
            .jobs
            .insert_job_application(request.candidate_id, request.job_id, request.submitted_at)
            .await?;
        if !outcome.inserted() {
            debug!(candidate_id = %request.candidate_id, job_id = %request.job_id, "application already existed");
        }
        Ok(())
    }
}

pub struct HttpApplicationSubmitter {
    client: ServiceClient,
}

impl HttpApplicationSubmitter {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApplicationSubmitter for HttpApplicationSubmitter {
    async fn submit(&self, request: &ApplicationRequest) -> Result<(), SubmitError> {
        let _ack: serde_json::Value = self.client.post_json("/v1/applications", request).await?;
        Ok(())
    }
}
