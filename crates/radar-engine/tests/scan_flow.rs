use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use radar_adapters::{
    BroadcastPushChannel, Entitlement, GateMode, GatePolicy, PlanError, PlanService, PolicyPlanService,
    SkillOverlapScorer, StoreApplicationSubmitter,
};
use radar_core::{
    AlertDraft, CandidateRadarProfile, Feature, JobPosting, NotificationKind, ProfileCompleteness, WorkMode,
};
use radar_engine::{Collaborators, RadarEngine, RunState, SchedulerOptions, TickOutcome};
use radar_storage::{
    AlertStore, ApplicationStore, CandidateStore, JobStore, MemoryStore, NotificationStore, Stores,
};
use uuid::Uuid;

fn skills(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn candidate(have: &[&str], years: u32) -> CandidateRadarProfile {
    CandidateRadarProfile {
        candidate_id: Uuid::new_v4(),
        skills: skills(have),
        experience_years: years,
        city: Some("Lisbon".into()),
        work_mode_preference: WorkMode::Remote,
        resume_ref: Some("resumes/cv.pdf".into()),
        talent_radar_opt_in: true,
        auto_apply_opt_in: true,
        completeness: ProfileCompleteness::complete(),
    }
}

fn open_job(required: &[&str]) -> JobPosting {
    JobPosting {
        id: Uuid::new_v4(),
        title: "Backend Engineer".into(),
        company: "Northwind".into(),
        required_skills: skills(required),
        min_experience_years: 2,
        city: None,
        work_mode: WorkMode::Remote,
        is_open: true,
        posted_at: Utc::now(),
    }
}

/// Plan service that is down for some actors and grants unbounded auto-apply to the rest.
#[derive(Default)]
struct PartiallyDownPlans {
    down_for: Mutex<HashSet<Uuid>>,
}

#[async_trait]
impl PlanService for PartiallyDownPlans {
    async fn can_use(&self, actor_id: Uuid, _feature: Feature) -> Result<Entitlement, PlanError> {
        if self.down_for.lock().unwrap().contains(&actor_id) {
            return Err(PlanError::Unreachable("connection refused".into()));
        }
        Ok(Entitlement::unbounded())
    }
}

fn engine_with(plans: Arc<dyn PlanService>) -> (RadarEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores::from_shared(store.clone());
    let collaborators = Collaborators {
        scorer: Arc::new(SkillOverlapScorer),
        plans,
        submitter: Arc::new(StoreApplicationSubmitter::new(store.clone())),
        push: Arc::new(BroadcastPushChannel::default()),
    };
    let options = SchedulerOptions {
        concurrency: 4,
        reports_dir: None,
    };
    (RadarEngine::assemble(stores, collaborators, options), store)
}

fn completed(outcome: TickOutcome) -> radar_engine::RunSummary {
    match outcome {
        TickOutcome::Ran(summary) => {
            assert_eq!(summary.state, RunState::Completed);
            summary
        }
        TickOutcome::Skipped => panic!("tick skipped"),
    }
}

#[tokio::test]
async fn gate_outage_for_one_candidate_does_not_stop_the_run() {
    let plans = Arc::new(PartiallyDownPlans::default());
    let (engine, store) = engine_with(plans.clone());

    let unlucky = candidate(&["Rust", "Postgres"], 6);
    let lucky = candidate(&["Rust", "Postgres"], 6);
    plans.down_for.lock().unwrap().insert(unlucky.candidate_id);
    for c in [&unlucky, &lucky] {
        store.upsert_candidate(c).await.unwrap();
    }
    let job = open_job(&["Rust", "Postgres"]);
    store.upsert_job(&job).await.unwrap();

    let summary = completed(engine.scheduler.tick().await);

    assert_eq!(summary.candidates_scanned, 2);
    assert_eq!(summary.new_applications, 1);
    assert!(summary.unit_failures.is_empty());
    assert!(store.list_applications(unlucky.candidate_id).await.unwrap().is_empty());
    let applied = store.list_applications(lucky.candidate_id).await.unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].job_id, job.id);
    assert_eq!(applied[0].match_score, 100);
    assert_eq!(engine.gate.degraded_events(), 1);
}

#[tokio::test]
async fn unlocking_the_policy_takes_effect_on_the_next_run() {
    let policy = GatePolicy::from_yaml_str(
        r#"
mode: enforced
default_plan: free
plans:
  free:
    features: [talent-radar]
"#,
    )
    .unwrap();
    let plans = Arc::new(PolicyPlanService::new(policy.clone()));
    let (engine, store) = engine_with(plans.clone());

    let c = candidate(&["Rust"], 3);
    store.upsert_candidate(&c).await.unwrap();
    store.upsert_job(&open_job(&["Rust"])).await.unwrap();
    store.upsert_job(&open_job(&["Rust"])).await.unwrap();

    let denied = completed(engine.scheduler.tick().await);
    assert_eq!(denied.new_applications, 0);
    assert_eq!(engine.gate.degraded_events(), 0);

    plans
        .set_policy(GatePolicy {
            mode: GateMode::Unlocked,
            ..policy
        })
        .await;
    let unlocked = completed(engine.scheduler.tick().await);
    assert_eq!(unlocked.new_applications, 2);

    let inbox = store.list_notifications(c.candidate_id).await.unwrap();
    assert_eq!(inbox.len(), 2);
    assert!(inbox.iter().all(|n| n.kind == NotificationKind::ApplicationSubmitted));
}

#[tokio::test]
async fn manual_scan_shares_the_scheduled_invariants() {
    let (engine, store) = engine_with(Arc::new(PartiallyDownPlans::default()));
    let recruiter = Uuid::new_v4();
    let alert = engine
        .registry
        .create(
            recruiter,
            AlertDraft {
                name: "Platform".into(),
                required_skills: skills(&["Go", "Kubernetes"]),
                min_experience_years: 3,
                min_fit_score: 80,
                location: None,
                work_mode: WorkMode::Any,
                is_active: true,
            },
        )
        .await
        .unwrap();

    let mut a = candidate(&["Go", "Kubernetes", "SQL"], 5);
    a.auto_apply_opt_in = false;
    store.upsert_candidate(&a).await.unwrap();

    let manual = engine.matcher.scan_alert_id(alert.id).await.unwrap();
    assert_eq!(manual.new_matches.len(), 1);

    let scheduled = completed(engine.scheduler.tick().await);
    assert_eq!(scheduled.new_matches, 0);

    let listed = engine.registry.list(recruiter).await.unwrap();
    assert_eq!(listed[0].match_count, 1);
    let inbox = store.list_notifications(recruiter).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::MatchFound);

    let removed = engine.registry.delete(recruiter, alert.id).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.list_matches(alert.id).await.unwrap().is_empty());
    assert!(store.get_alert(alert.id).await.unwrap().is_none());
}
