//! Matching engines, eligibility gate and scan scheduler for Talent Radar and Auto-Apply.

mod auto_apply;
mod config;
mod gate;
mod matching;
mod notifier;
mod pool;
mod registry;
mod scheduler;
mod settings;
mod shutdown;
#[cfg(test)]
mod testing;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use radar_adapters::{
    ApplicationSubmitter, BroadcastPushChannel, GatePolicy, HttpApplicationSubmitter, HttpPlanService,
    HttpPushChannel, HttpScorer, PlanService, PolicyPlanService, PushChannel, Scorer, ScoringError,
    SkillOverlapScorer, StoreApplicationSubmitter,
};
use radar_storage::{MemoryStore, PgStore, ServiceClient, ServiceClientConfig, StoreError, Stores};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub use auto_apply::{
    quota_window_start, AutoApplyEngine, CandidateScanResult, SkipReason, DEFAULT_CLAIM_LEASE_SECS,
};
pub use config::RadarConfig;
pub use gate::{EligibilityGate, GateDecision};
pub use matching::{AlertScanResult, DiscoverOnce, DiscoveryPolicy, ExistingMatch, MatchEngine, RescoreOnScan};
pub use notifier::Notifier;
pub use pool::CandidatePoolView;
pub use registry::{AlertRegistry, CountCorrection, RegistryError};
pub use scheduler::{
    write_run_report, RunState, RunSummary, ScanScheduler, SchedulerOptions, TickOutcome, UnitFailure, UnitKind,
};
pub use settings::{CandidateSettings, SettingsError};
pub use shutdown::Shutdown;

pub const CRATE_NAME: &str = "radar-engine";

/// A failure confined to one candidate or job inside a scan. Scan results are
/// returned to recruiters and candidates, so only the subject id is serialized;
/// the message stays in logs and the operator run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitError {
    pub subject_id: Uuid,
    #[serde(skip)]
    pub message: String,
}

impl UnitError {
    pub fn new(subject_id: Uuid, err: &impl Display) -> Self {
        Self {
            subject_id,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
}

/// External collaborators the engines call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub scorer: Arc<dyn Scorer>,
    pub plans: Arc<dyn PlanService>,
    pub submitter: Arc<dyn ApplicationSubmitter>,
    pub push: Arc<dyn PushChannel>,
}

/// Tuning for [`RadarEngine::assemble`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub scheduler: SchedulerOptions,
    pub claim_lease: chrono::Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        SchedulerOptions::default().into()
    }
}

impl From<SchedulerOptions> for EngineOptions {
    fn from(scheduler: SchedulerOptions) -> Self {
        Self {
            scheduler,
            claim_lease: chrono::Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }
}

/// Every service of the radar, wired over one set of stores.
#[derive(Clone)]
pub struct RadarEngine {
    pub stores: Stores,
    pub gate: Arc<EligibilityGate>,
    pub registry: AlertRegistry,
    pub pool: CandidatePoolView,
    pub notifier: Arc<Notifier>,
    pub matcher: Arc<MatchEngine>,
    pub auto_apply: Arc<AutoApplyEngine>,
    pub settings: CandidateSettings,
    pub scheduler: Arc<ScanScheduler>,
    pub shutdown: Shutdown,
}

impl RadarEngine {
    pub fn assemble(stores: Stores, collaborators: Collaborators, options: impl Into<EngineOptions>) -> Self {
        let options = options.into();
        let shutdown = Shutdown::new();
        let gate = Arc::new(EligibilityGate::new(collaborators.plans));
        let pool = CandidatePoolView::new(stores.candidates.clone());
        let notifier = Arc::new(Notifier::new(stores.notifications.clone(), collaborators.push));

        let matcher = Arc::new(
            MatchEngine::new(
                stores.alerts.clone(),
                pool.clone(),
                collaborators.scorer.clone(),
                gate.clone(),
                notifier.clone(),
            )
            .with_shutdown(shutdown.clone()),
        );
        let auto_apply = Arc::new(
            AutoApplyEngine::new(
                stores.jobs.clone(),
                stores.applications.clone(),
                collaborators.scorer,
                gate.clone(),
                collaborators.submitter,
                notifier.clone(),
            )
            .with_claim_lease(options.claim_lease)
            .with_shutdown(shutdown.clone()),
        );
        let scheduler = Arc::new(ScanScheduler::new(
            stores.alerts.clone(),
            pool.clone(),
            matcher.clone(),
            auto_apply.clone(),
            options.scheduler,
            shutdown.clone(),
        ));

        Self {
            registry: AlertRegistry::new(stores.alerts.clone(), gate.clone()),
            settings: CandidateSettings::new(stores.candidates.clone(), stores.applications.clone(), gate.clone()),
            stores,
            gate,
            pool,
            notifier,
            matcher,
            auto_apply,
            scheduler,
            shutdown,
        }
    }

    /// In-memory stores with the built-in scorer, submitter and push channel.
    pub fn in_memory(plans: Arc<dyn PlanService>) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::from_shared(store.clone());
        let collaborators = Collaborators {
            scorer: Arc::new(SkillOverlapScorer),
            plans,
            submitter: Arc::new(StoreApplicationSubmitter::new(stores.jobs.clone())),
            push: Arc::new(BroadcastPushChannel::default()),
        };
        (Self::assemble(stores, collaborators, SchedulerOptions::default()), store)
    }

    /// Builds the engine from configuration. Postgres is used when a database URL
    /// is configured; each remote service falls back to its local stand-in.
    pub async fn from_config(config: &RadarConfig) -> Result<Self> {
        let stores = open_stores(config).await?;
        let collaborators = collaborators_from_config(config, &stores).await?;
        let options = EngineOptions {
            scheduler: SchedulerOptions {
                concurrency: config.scan_concurrency,
                reports_dir: config.reports_dir.clone(),
            },
            claim_lease: chrono::Duration::seconds(config.claim_lease_secs),
        };
        Ok(Self::assemble(stores, collaborators, options))
    }
}

pub async fn open_stores(config: &RadarConfig) -> Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, 10)
                .await
                .context("connecting to postgres")?;
            info!("using postgres store");
            Ok(Stores::from_shared(Arc::new(store)))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store");
            Ok(Stores::from_shared(Arc::new(MemoryStore::new())))
        }
    }
}

fn service_client_config(base_url: &str, config: &RadarConfig) -> ServiceClientConfig {
    let mut client_config = ServiceClientConfig::new(base_url);
    client_config.timeout = Duration::from_secs(config.http_timeout_secs);
    client_config.rate_per_sec = config.service_rate_per_sec;
    client_config.bearer_token = config.service_token.clone();
    client_config
}

fn service_client(base_url: &str, config: &RadarConfig) -> Result<ServiceClient> {
    ServiceClient::new(service_client_config(base_url, config))
        .with_context(|| format!("building client for {base_url}"))
}

async fn collaborators_from_config(config: &RadarConfig, stores: &Stores) -> Result<Collaborators> {
    let scorer: Arc<dyn Scorer> = match &config.scorer_url {
        Some(url) => Arc::new(HttpScorer::new(service_client(url, config)?)),
        None => Arc::new(SkillOverlapScorer),
    };

    let plans: Arc<dyn PlanService> = match &config.plan_service_url {
        Some(url) => Arc::new(HttpPlanService::new(service_client(url, config)?)),
        None if config.plan_policy_path.exists() => Arc::new(
            PolicyPlanService::load(&config.plan_policy_path)
                .await
                .with_context(|| format!("loading plan policy {}", config.plan_policy_path.display()))?,
        ),
        None => {
            warn!(
                path = %config.plan_policy_path.display(),
                "plan policy not found; every feature is denied"
            );
            Arc::new(PolicyPlanService::new(GatePolicy::default()))
        }
    };

    let submitter: Arc<dyn ApplicationSubmitter> = match &config.applications_url {
        Some(url) => Arc::new(HttpApplicationSubmitter::new(service_client(url, config)?)),
        None => Arc::new(StoreApplicationSubmitter::new(stores.jobs.clone())),
    };

    let push: Arc<dyn PushChannel> = match &config.push_url {
        Some(url) => Arc::new(HttpPushChannel::new(service_client(url, config)?)),
        None => Arc::new(BroadcastPushChannel::default()),
    };

    info!(
        scorer = scorer.name(),
        remote_plans = config.plan_service_url.is_some(),
        remote_applications = config.applications_url.is_some(),
        remote_push = config.push_url.is_some(),
        "collaborators configured"
    );
    Ok(Collaborators {
        scorer,
        plans,
        submitter,
        push,
    })
}
