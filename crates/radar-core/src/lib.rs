//! Core domain model for the Talent Radar and Auto-Apply engine.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "radar-core";

/// Fixed confidence a job must reach before the engine applies on a candidate's behalf.
/// Not configurable per alert; Radar alerts carry their own `min_fit_score`.
pub const AUTO_APPLY_THRESHOLD: u8 = 80;

pub const MAX_FIT_SCORE: u8 = 100;

const MATCH_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b8e_4d0a_4e51_9a39_5c1e_7b2d_0a11);
const AUTO_APPLY_ID_NAMESPACE: Uuid = Uuid::from_u128(0x2a7d_90c4_13f6_4b8e_a0d2_86e4_51c9_3f72);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    #[default]
    Any,
    Remote,
    OnSite,
    Hybrid,
}

impl WorkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkMode::Any => "any",
            WorkMode::Remote => "remote",
            WorkMode::OnSite => "on_site",
            WorkMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for WorkMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "any" => Ok(WorkMode::Any),
            "remote" => Ok(WorkMode::Remote),
            "on_site" | "onsite" => Ok(WorkMode::OnSite),
            "hybrid" => Ok(WorkMode::Hybrid),
            _ => Err(ParseEnumError {
                kind: "work mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Gated features the Eligibility Gate can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    #[serde(rename = "auto-apply")]
    AutoApply,
    #[serde(rename = "talent-radar")]
    TalentRadar,
}

impl Feature {
    pub fn key(&self) -> &'static str {
        match self {
            Feature::AutoApply => "auto-apply",
            Feature::TalentRadar => "talent-radar",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Status of a submitted application. Transitions are owned by the external
/// application-tracking system; the engine only ever writes `Applied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Applied,
    Reviewed,
    Reject,
    Offer,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Reviewed => "reviewed",
            ApplicationStatus::Reject => "reject",
            ApplicationStatus::Offer => "offer",
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "applied" => Ok(ApplicationStatus::Applied),
            "reviewed" => Ok(ApplicationStatus::Reviewed),
            "reject" | "rejected" => Ok(ApplicationStatus::Reject),
            "offer" => Ok(ApplicationStatus::Offer),
            _ => Err(ParseEnumError {
                kind: "application status",
                value: s.to_string(),
            }),
        }
    }
}

/// Lowercased, whitespace-collapsed form used for every skill comparison.
pub fn normalize_skill(skill: &str) -> String {
    skill.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Case-insensitive city comparison.
pub fn same_city(a: &str, b: &str) -> bool {
    normalize_skill(a) == normalize_skill(b)
}

/// Skills from `required` that the candidate has, keeping the required spelling.
pub fn matched_skills(candidate: &BTreeSet<String>, required: &BTreeSet<String>) -> BTreeSet<String> {
    let have: BTreeSet<String> = candidate.iter().map(|s| normalize_skill(s)).collect();
    required
        .iter()
        .filter(|skill| have.contains(&normalize_skill(skill)))
        .cloned()
        .collect()
}

/// `|candidate ∩ required| / |required|`, or 0.0 for an empty requirement set.
pub fn skill_overlap(candidate: &BTreeSet<String>, required: &BTreeSet<String>) -> f64 {
    if required.is_empty() {
        return 0.0;
    }
    matched_skills(candidate, required).len() as f64 / required.len() as f64
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertValidationError {
    #[error("alert name must not be empty")]
    EmptyName,
    #[error("an active alert needs at least one required skill")]
    NoRequiredSkills,
    #[error("remote alerts cannot carry a location")]
    LocationOnRemote,
    #[error("min fit score {0} is above 100")]
    FitScoreOutOfRange(u8),
}

/// Editable fields of a Radar Alert, as submitted by a recruiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub name: String,
    pub required_skills: BTreeSet<String>,
    #[serde(default)]
    pub min_experience_years: u32,
    pub min_fit_score: u8,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub work_mode: WorkMode,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// A recruiter's standing search criteria, scanned against the candidate pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadarAlert {
    pub id: Uuid,
    pub recruiter_id: Uuid,
    pub name: String,
    pub required_skills: BTreeSet<String>,
    pub min_experience_years: u32,
    pub min_fit_score: u8,
    pub location: Option<String>,
    pub work_mode: WorkMode,
    pub is_active: bool,
    /// Derived cache of the Match table; see the registry's reconciliation path.
    pub match_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RadarAlert {
    pub fn new(
        recruiter_id: Uuid,
        draft: AlertDraft,
        now: DateTime<Utc>,
    ) -> Result<Self, AlertValidationError> {
        let draft = clean_draft(draft);
        let alert = Self {
            id: Uuid::new_v4(),
            recruiter_id,
            name: draft.name,
            required_skills: draft.required_skills,
            min_experience_years: draft.min_experience_years,
            min_fit_score: draft.min_fit_score,
            location: draft.location,
            work_mode: draft.work_mode,
            is_active: draft.is_active,
            match_count: 0,
            created_at: now,
            updated_at: now,
        };
        alert.validate()?;
        Ok(alert)
    }

    pub fn validate(&self) -> Result<(), AlertValidationError> {
        if self.name.trim().is_empty() {
            return Err(AlertValidationError::EmptyName);
        }
        if self.min_fit_score > MAX_FIT_SCORE {
            return Err(AlertValidationError::FitScoreOutOfRange(self.min_fit_score));
        }
        if self.is_active && self.required_skills.is_empty() {
            return Err(AlertValidationError::NoRequiredSkills);
        }
        if self.work_mode == WorkMode::Remote && self.location.is_some() {
            return Err(AlertValidationError::LocationOnRemote);
        }
        Ok(())
    }

    /// Returns an edited copy; `id`, ownership, `match_count` and `created_at` are kept.
    pub fn edited(&self, draft: AlertDraft, now: DateTime<Utc>) -> Result<Self, AlertValidationError> {
        let draft = clean_draft(draft);
        let edited = Self {
            name: draft.name,
            required_skills: draft.required_skills,
            min_experience_years: draft.min_experience_years,
            min_fit_score: draft.min_fit_score,
            location: draft.location,
            work_mode: draft.work_mode,
            is_active: draft.is_active,
            updated_at: now,
            ..self.clone()
        };
        edited.validate()?;
        Ok(edited)
    }

    pub fn with_active(&self, is_active: bool, now: DateTime<Utc>) -> Result<Self, AlertValidationError> {
        let toggled = Self {
            is_active,
            updated_at: now,
            ..self.clone()
        };
        toggled.validate()?;
        Ok(toggled)
    }

    /// City filter that applies to the candidate pool, if any.
    pub fn city_filter(&self) -> Option<&str> {
        if self.work_mode == WorkMode::Remote {
            return None;
        }
        self.location.as_deref().filter(|l| !l.trim().is_empty())
    }
}

fn clean_draft(mut draft: AlertDraft) -> AlertDraft {
    draft.name = draft.name.trim().to_string();
    draft.required_skills = draft
        .required_skills
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    draft.location = draft
        .location
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    draft
}

/// Durable record that a candidate satisfied an alert's threshold at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub candidate_id: Uuid,
    pub fit_score: u8,
    pub matched_skills: BTreeSet<String>,
    pub matched_at: DateTime<Utc>,
}

impl Match {
    pub fn new(
        alert_id: Uuid,
        candidate_id: Uuid,
        fit_score: u8,
        matched_skills: BTreeSet<String>,
        matched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::id_for(alert_id, candidate_id),
            alert_id,
            candidate_id,
            fit_score,
            matched_skills,
            matched_at,
        }
    }

    /// Stable id for an `(alert, candidate)` pair.
    pub fn id_for(alert_id: Uuid, candidate_id: Uuid) -> Uuid {
        Uuid::new_v5(
            &MATCH_ID_NAMESPACE,
            format!("{alert_id}:{candidate_id}").as_bytes(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApplyRecord {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub match_score: u8,
    pub applied_at: DateTime<Utc>,
    pub status: ApplicationStatus,
}

impl AutoApplyRecord {
    pub fn applied(candidate_id: Uuid, job_id: Uuid, match_score: u8, applied_at: DateTime<Utc>) -> Self {
        Self {
            id: Self::id_for(candidate_id, job_id),
            candidate_id,
            job_id,
            match_score,
            applied_at,
            status: ApplicationStatus::Applied,
        }
    }

    /// Stable id for a `(candidate, job)` pair.
    pub fn id_for(candidate_id: Uuid, job_id: Uuid) -> Uuid {
        Uuid::new_v5(
            &AUTO_APPLY_ID_NAMESPACE,
            format!("{candidate_id}:{job_id}").as_bytes(),
        )
    }
}

/// Required-field completeness of a candidate profile. Auto-Apply needs every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProfileCompleteness {
    pub has_resume: bool,
    pub has_skills: bool,
    pub has_phone: bool,
    pub has_date_of_birth: bool,
    pub has_city: bool,
    pub has_education: bool,
    pub has_job_preferences: bool,
    pub has_profile_picture: bool,
}

impl ProfileCompleteness {
    pub fn complete() -> Self {
        Self {
            has_resume: true,
            has_skills: true,
            has_phone: true,
            has_date_of_birth: true,
            has_city: true,
            has_education: true,
            has_job_preferences: true,
            has_profile_picture: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Names of the prerequisites still missing, in display order.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (self.has_resume, "resume"),
            (self.has_skills, "skills"),
            (self.has_phone, "phone"),
            (self.has_date_of_birth, "date_of_birth"),
            (self.has_city, "city"),
            (self.has_education, "education"),
            (self.has_job_preferences, "job_preferences"),
            (self.has_profile_picture, "profile_picture"),
        ]
        .into_iter()
        .filter(|(present, _)| !present)
        .map(|(_, name)| name)
        .collect()
    }
}

/// Read projection of a candidate, owned by the profile service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRadarProfile {
    pub candidate_id: Uuid,
    pub skills: BTreeSet<String>,
    pub experience_years: u32,
    pub city: Option<String>,
    pub work_mode_preference: WorkMode,
    pub resume_ref: Option<String>,
    pub talent_radar_opt_in: bool,
    pub auto_apply_opt_in: bool,
    pub completeness: ProfileCompleteness,
}

impl CandidateRadarProfile {
    pub fn auto_apply_eligible(&self) -> bool {
        self.completeness.is_complete()
    }
}

/// Open job posting as exposed by the job board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub title: String,
    pub company: String,
    pub required_skills: BTreeSet<String>,
    pub min_experience_years: u32,
    pub city: Option<String>,
    pub work_mode: WorkMode,
    pub is_open: bool,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    MatchFound,
    ApplicationSubmitted,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::MatchFound => "match_found",
            NotificationKind::ApplicationSubmitted => "application_submitted",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match_found" => Ok(NotificationKind::MatchFound),
            "application_submitted" => Ok(NotificationKind::ApplicationSubmitted),
            _ => Err(ParseEnumError {
                kind: "notification kind",
                value: s.to_string(),
            }),
        }
    }
}

/// Something the engine produced that a person should hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    MatchFound { recruiter_id: Uuid, record: Match },
    ApplicationSubmitted { record: AutoApplyRecord },
}

impl NotificationEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationEvent::MatchFound { .. } => NotificationKind::MatchFound,
            NotificationEvent::ApplicationSubmitted { .. } => NotificationKind::ApplicationSubmitted,
        }
    }

    pub fn recipient_id(&self) -> Uuid {
        match self {
            NotificationEvent::MatchFound { recruiter_id, .. } => *recruiter_id,
            NotificationEvent::ApplicationSubmitted { record } => record.candidate_id,
        }
    }

    /// Id of the record that caused the event; notifications are unique on it.
    pub fn ref_id(&self) -> Uuid {
        match self {
            NotificationEvent::MatchFound { record, .. } => record.id,
            NotificationEvent::ApplicationSubmitted { record } => record.id,
        }
    }

    pub fn to_notification(&self, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: self.recipient_id(),
            kind: self.kind(),
            ref_id: self.ref_id(),
            created_at,
        }
    }
}

/// Durable inbox entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub ref_id: Uuid,
    pub created_at: DateTime<Utc>,
}
