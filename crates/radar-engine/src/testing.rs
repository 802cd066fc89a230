//! Shared fixtures for the engine's unit tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use radar_adapters::{
    BroadcastPushChannel, DailyLimit, Entitlement, PlanError, PlanService, ScoreOutcome,
    ScoreTarget, Scorer, ScoringError,
};
use radar_core::{
    matched_skills, AlertDraft, CandidateRadarProfile, Feature, JobPosting, ProfileCompleteness,
    RadarAlert, WorkMode,
};
use radar_storage::MemoryStore;
use uuid::Uuid;

use crate::Notifier;

pub fn skills(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn alert(recruiter_id: Uuid, required: &[&str], min_years: u32, min_fit: u8) -> RadarAlert {
    RadarAlert::new(
        recruiter_id,
        AlertDraft {
            name: "Standing search".into(),
            required_skills: skills(required),
            min_experience_years: min_years,
            min_fit_score: min_fit,
            location: None,
            work_mode: WorkMode::Any,
            is_active: true,
        },
        Utc::now(),
    )
    .unwrap()
}

pub fn candidate(have: &[&str], years: u32) -> CandidateRadarProfile {
    CandidateRadarProfile {
        candidate_id: Uuid::new_v4(),
        skills: skills(have),
        experience_years: years,
        city: Some("Berlin".into()),
        work_mode_preference: WorkMode::Any,
        resume_ref: Some("resumes/cv.pdf".into()),
        talent_radar_opt_in: true,
        auto_apply_opt_in: true,
        completeness: ProfileCompleteness::complete(),
    }
}

pub fn job(title: &str) -> JobPosting {
    JobPosting {
        id: Uuid::new_v4(),
        title: title.into(),
        company: "Acme".into(),
        required_skills: skills(&["Rust"]),
        min_experience_years: 1,
        city: None,
        work_mode: WorkMode::Remote,
        is_open: true,
        posted_at: Utc::now(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Scripted {
    Score(u8),
    Fail,
}

/// Scorer answering from a script keyed by target id first, then candidate id.
#[derive(Default)]
pub struct ScriptedScorer {
    script: Mutex<HashMap<Uuid, Scripted>>,
    calls: AtomicUsize,
    scored: Mutex<Vec<Uuid>>,
}

impl ScriptedScorer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, id: Uuid, score: u8) {
        self.script.lock().unwrap().insert(id, Scripted::Score(score));
    }

    pub fn fail(&self, id: Uuid) {
        self.script.lock().unwrap().insert(id, Scripted::Fail);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Candidate ids passed to the scorer, in call order.
    pub fn scored_candidates(&self) -> Vec<Uuid> {
        self.scored.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scorer for ScriptedScorer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn score(
        &self,
        candidate: &CandidateRadarProfile,
        target: ScoreTarget<'_>,
    ) -> Result<ScoreOutcome, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scored.lock().unwrap().push(candidate.candidate_id);
        let entry = {
            let script = self.script.lock().unwrap();
            script
                .get(&target.id())
                .or_else(|| script.get(&candidate.candidate_id))
                .copied()
        };
        match entry {
            Some(Scripted::Fail) => Err(ScoringError::Transport("scorer timed out".into())),
            Some(Scripted::Score(fit_score)) => Ok(ScoreOutcome {
                fit_score,
                matched_skills: matched_skills(&candidate.skills, target.required_skills()),
                missing_skills: BTreeSet::new(),
            }),
            None => Ok(ScoreOutcome {
                fit_score: 0,
                matched_skills: BTreeSet::new(),
                missing_skills: target.required_skills().clone(),
            }),
        }
    }
}

/// Plan service with a fixed answer per actor; unknown actors get `fallback`.
pub struct FixedPlans {
    pub fallback: Result<Entitlement, ()>,
    pub per_actor: Mutex<HashMap<Uuid, Result<Entitlement, ()>>>,
}

impl FixedPlans {
    pub fn allow(limit: DailyLimit) -> Arc<Self> {
        Arc::new(Self {
            fallback: Ok(Entitlement {
                allowed: true,
                daily_limit: limit,
            }),
            per_actor: Mutex::new(HashMap::new()),
        })
    }

    pub fn unreachable_for(&self, actor_id: Uuid) {
        self.per_actor.lock().unwrap().insert(actor_id, Err(()));
    }

    pub fn set(&self, actor_id: Uuid, entitlement: Entitlement) {
        self.per_actor.lock().unwrap().insert(actor_id, Ok(entitlement));
    }
}

#[async_trait]
impl PlanService for FixedPlans {
    async fn can_use(&self, actor_id: Uuid, _feature: Feature) -> Result<Entitlement, PlanError> {
        let answer = self
            .per_actor
            .lock()
            .unwrap()
            .get(&actor_id)
            .copied()
            .unwrap_or(self.fallback);
        answer.map_err(|_| PlanError::Unreachable("plan service down".into()))
    }
}

pub fn notifier(store: &Arc<MemoryStore>) -> Arc<Notifier> {
    Arc::new(Notifier::new(store.clone(), Arc::new(BroadcastPushChannel::default())))
}
