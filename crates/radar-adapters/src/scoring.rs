use std::collections::BTreeSet;

use async_trait::async_trait;
use radar_core::{matched_skills, CandidateRadarProfile, JobPosting, RadarAlert, WorkMode, MAX_FIT_SCORE};
use radar_storage::{ServiceClient, ServiceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What a candidate is being scored against.
#[derive(Debug, Clone, Copy)]
pub enum ScoreTarget<'a> {
    Alert(&'a RadarAlert),
    Job(&'a JobPosting),
}

impl ScoreTarget<'_> {
    pub fn id(&self) -> Uuid {
        match self {
            ScoreTarget::Alert(alert) => alert.id,
            ScoreTarget::Job(job) => job.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScoreTarget::Alert(_) => "alert",
            ScoreTarget::Job(_) => "job",
        }
    }

    pub fn required_skills(&self) -> &BTreeSet<String> {
        match self {
            ScoreTarget::Alert(alert) => &alert.required_skills,
            ScoreTarget::Job(job) => &job.required_skills,
        }
    }

    pub fn min_experience_years(&self) -> u32 {
        match self {
            ScoreTarget::Alert(alert) => alert.min_experience_years,
            ScoreTarget::Job(job) => job.min_experience_years,
        }
    }

    fn work_mode(&self) -> WorkMode {
        match self {
            ScoreTarget::Alert(alert) => alert.work_mode,
            ScoreTarget::Job(job) => job.work_mode,
        }
    }

    fn location(&self) -> Option<&str> {
        match self {
            ScoreTarget::Alert(alert) => alert.city_filter(),
            ScoreTarget::Job(job) => job.city.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub fit_score: u8,
    pub matched_skills: BTreeSet<String>,
    pub missing_skills: BTreeSet<String>,
}

/// A scorer that could not produce a score. "Scored but below threshold" is never an error.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scorer unreachable: {0}")]
    Transport(String),
    #[error("scorer returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ServiceError> for ScoringError {
    fn from(err: ServiceError) -> Self {
        match &err {
            ServiceError::Request(inner) if inner.is_decode() => {
                ScoringError::InvalidResponse(err.to_string())
            }
            _ if err.is_transport() => ScoringError::Transport(err.to_string()),
            _ => ScoringError::InvalidResponse(err.to_string()),
        }
    }
}

#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(
        &self,
        candidate: &CandidateRadarProfile,
        target: ScoreTarget<'_>,
    ) -> Result<ScoreOutcome, ScoringError>;
}

/// Deterministic local scorer: 80 points for skill coverage, 20 for meeting the
/// experience floor. Used when no remote scorer is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkillOverlapScorer;

const SKILL_WEIGHT: f64 = 80.0;
const EXPERIENCE_WEIGHT: f64 = 20.0;

#[async_trait]
impl Scorer for SkillOverlapScorer {
    fn name(&self) -> &'static str {
        "skill-overlap"
    }

    async fn score(
        &self,
        candidate: &CandidateRadarProfile,
        target: ScoreTarget<'_>,
    ) -> Result<ScoreOutcome, ScoringError> {
        let required = target.required_skills();
        let matched = matched_skills(&candidate.skills, required);
        let missing: BTreeSet<String> = required.difference(&matched).cloned().collect();

        let skill_part = if required.is_empty() {
            1.0
        } else {
            matched.len() as f64 / required.len() as f64
        };
        let floor = target.min_experience_years();
        let experience_part = if floor == 0 {
            1.0
        } else {
            (candidate.experience_years as f64 / floor as f64).min(1.0)
        };

        let raw = skill_part * SKILL_WEIGHT + experience_part * EXPERIENCE_WEIGHT;
        let fit_score = raw.round().clamp(0.0, MAX_FIT_SCORE as f64) as u8;

        Ok(ScoreOutcome {
            fit_score,
            matched_skills: matched,
            missing_skills: missing,
        })
    }
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    candidate: &'a CandidateRadarProfile,
    target: TargetPayload<'a>,
}

#[derive(Debug, Serialize)]
struct TargetPayload<'a> {
    kind: &'static str,
    id: Uuid,
    required_skills: &'a BTreeSet<String>,
    min_experience_years: u32,
    work_mode: WorkMode,
    location: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    fit_score: i64,
    #[serde(default)]
    matched_skills: Vec<String>,
    #[serde(default)]
    missing_skills: Vec<String>,
}

/// Remote resume-scoring provider reached over JSON.
pub struct HttpScorer {
    client: ServiceClient,
    path: String,
}

impl HttpScorer {
    pub fn new(client: ServiceClient) -> Self {
        Self {
            client,
            path: "/v1/score".to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn score(
        &self,
        candidate: &CandidateRadarProfile,
        target: ScoreTarget<'_>,
    ) -> Result<ScoreOutcome, ScoringError> {
        let body = ScoreRequest {
            candidate,
            target: TargetPayload {
                kind: target.kind(),
                id: target.id(),
                required_skills: target.required_skills(),
                min_experience_years: target.min_experience_years(),
                work_mode: target.work_mode(),
                location: target.location(),
            },
        };
        let response: ScoreResponse = self.client.post_json(&self.path, &body).await?;
        outcome_from_response(response)
    }
}

fn outcome_from_response(response: ScoreResponse) -> Result<ScoreOutcome, ScoringError> {
    let fit_score = u8::try_from(response.fit_score)
        .ok()
        .filter(|s| *s <= MAX_FIT_SCORE)
        .ok_or_else(|| {
            ScoringError::InvalidResponse(format!("fit_score {} outside 0..=100", response.fit_score))
        })?;
    Ok(ScoreOutcome {
        fit_score,
        matched_skills: response.matched_skills.into_iter().collect(),
        missing_skills: response.missing_skills.into_iter().collect(),
    })
}
