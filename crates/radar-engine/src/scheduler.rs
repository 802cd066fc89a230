use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{self, JoinSet};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use radar_storage::{AlertStore, StoreError};

use crate::{AlertScanResult, AutoApplyEngine, CandidatePoolView, CandidateScanResult, MatchEngine, Shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Alert,
    Candidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub kind: UnitKind,
    pub id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub alerts_total: usize,
    pub alerts_scanned: usize,
    pub candidates_total: usize,
    pub candidates_scanned: usize,
    pub new_matches: usize,
    pub new_applications: usize,
    /// Per-candidate or per-job failures inside otherwise successful units.
    pub scoring_errors: usize,
    pub unit_failures: Vec<UnitFailure>,
    pub interrupted: bool,
    pub abort_reason: Option<String>,
}

impl RunSummary {
    fn started(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            state: RunState::Running,
            started_at,
            finished_at: started_at,
            alerts_total: 0,
            alerts_scanned: 0,
            candidates_total: 0,
            candidates_scanned: 0,
            new_matches: 0,
            new_applications: 0,
            scoring_errors: 0,
            unit_failures: Vec::new(),
            interrupted: false,
            abort_reason: None,
        }
    }

    fn abort(mut self, reason: String) -> Self {
        self.state = RunState::Aborted;
        self.abort_reason = Some(reason);
        self.finished_at = Utc::now();
        self
    }
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    Ran(RunSummary),
    /// A previous run was still in progress.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub concurrency: usize,
    pub reports_dir: Option<PathBuf>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            reports_dir: None,
        }
    }
}

enum UnitOutcome {
    Alert(Result<AlertScanResult, StoreError>),
    Candidate(Result<CandidateScanResult, StoreError>),
}

/// Drives the Match and Auto-Apply engines across the whole population.
pub struct ScanScheduler {
    alerts: Arc<dyn AlertStore>,
    pool: CandidatePoolView,
    matcher: Arc<MatchEngine>,
    auto_apply: Arc<AutoApplyEngine>,
    options: SchedulerOptions,
    shutdown: Shutdown,
    running: Mutex<()>,
    state: RwLock<RunState>,
    last_run: RwLock<Option<RunSummary>>,
}

impl ScanScheduler {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        pool: CandidatePoolView,
        matcher: Arc<MatchEngine>,
        auto_apply: Arc<AutoApplyEngine>,
        options: SchedulerOptions,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            alerts,
            pool,
            matcher,
            auto_apply,
            options,
            shutdown,
            running: Mutex::new(()),
            state: RwLock::new(RunState::Idle),
            last_run: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> RunState {
        *self.state.read().await
    }

    pub async fn last_run(&self) -> Option<RunSummary> {
        self.last_run.read().await.clone()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// One scheduled run. Skipped, not queued, when the previous run is still going.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("scan tick skipped; previous run still running");
            return TickOutcome::Skipped;
        };

        let run_id = Uuid::new_v4();
        *self.state.write().await = RunState::Running;
        let span = info_span!("scan_run", %run_id);
        let summary = self.execute(run_id).instrument(span).await;

        *self.state.write().await = summary.state;
        if let Some(dir) = &self.options.reports_dir {
            if let Err(err) = write_run_report(dir, &summary).await {
                warn!(%run_id, error = %err, "failed to write run report");
            }
        }
        *self.last_run.write().await = Some(summary.clone());
        TickOutcome::Ran(summary)
    }

    async fn execute(&self, run_id: Uuid) -> RunSummary {
        let summary = RunSummary::started(run_id, Utc::now());
        info!("scan run started");

        // Both listings must succeed before any unit runs.
        let alerts = match self.alerts.list_active_alerts().await {
            Ok(alerts) => alerts,
            Err(err) => {
                error!(error = %err, "cannot list active alerts; run aborted");
                return summary.abort(format!("listing active alerts: {err}"));
            }
        };
        let candidates = match self.pool.auto_apply_candidates().await {
            Ok(candidates) => candidates,
            Err(err) => {
                error!(error = %err, "cannot list auto-apply candidates; run aborted");
                return summary.abort(format!("listing auto-apply candidates: {err}"));
            }
        };

        let mut summary = summary;
        summary.alerts_total = alerts.len();
        summary.candidates_total = candidates.len();

        let permits = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut units = JoinSet::new();
        let mut spawned: HashMap<task::Id, (UnitKind, Uuid)> = HashMap::new();

        for alert in alerts {
            if self.shutdown.is_triggered() {
                summary.interrupted = true;
                break;
            }
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let matcher = self.matcher.clone();
            let alert_id = alert.id;
            let handle = units.spawn(async move {
                let _permit = permit;
                UnitOutcome::Alert(matcher.scan_alert(&alert).await)
            });
            spawned.insert(handle.id(), (UnitKind::Alert, alert_id));
        }

        for candidate in candidates {
            if self.shutdown.is_triggered() {
                summary.interrupted = true;
                break;
            }
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let engine = self.auto_apply.clone();
            let candidate_id = candidate.candidate_id;
            let handle = units.spawn(async move {
                let _permit = permit;
                UnitOutcome::Candidate(engine.scan_candidate(&candidate).await)
            });
            spawned.insert(handle.id(), (UnitKind::Candidate, candidate_id));
        }

        while let Some(joined) = units.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok(done) => done,
                Err(join_err) => {
                    // A panicking unit is a failed unit; the rest of the run goes on.
                    let Some((kind, id)) = spawned.remove(&join_err.id()) else {
                        error!(error = %join_err, "untracked scan unit task failed");
                        continue;
                    };
                    let message = if join_err.is_panic() {
                        "unit panicked".to_string()
                    } else {
                        join_err.to_string()
                    };
                    error!(?kind, %id, error = %join_err, "scan unit task failed");
                    summary.unit_failures.push(UnitFailure { kind, id, message });
                    continue;
                }
            };
            let id = spawned.remove(&task_id).map(|(_, id)| id).unwrap_or_default();

            match outcome {
                UnitOutcome::Alert(Ok(result)) => {
                    summary.alerts_scanned += 1;
                    summary.new_matches += result.new_matches.len();
                    summary.scoring_errors += result.errors.len();
                    summary.interrupted |= result.interrupted;
                }
                UnitOutcome::Candidate(Ok(result)) => {
                    summary.candidates_scanned += 1;
                    summary.new_applications += result.new_applications.len();
                    summary.scoring_errors += result.errors.len();
                    summary.interrupted |= result.interrupted;
                }
                UnitOutcome::Alert(Err(err)) => {
                    warn!(alert_id = %id, error = %err, "alert scan failed; continuing");
                    summary.unit_failures.push(UnitFailure {
                        kind: UnitKind::Alert,
                        id,
                        message: err.to_string(),
                    });
                }
                UnitOutcome::Candidate(Err(err)) => {
                    warn!(candidate_id = %id, error = %err, "auto-apply scan failed; continuing");
                    summary.unit_failures.push(UnitFailure {
                        kind: UnitKind::Candidate,
                        id,
                        message: err.to_string(),
                    });
                }
            }
        }

        summary.state = RunState::Completed;
        summary.finished_at = Utc::now();
        info!(
            alerts = summary.alerts_scanned,
            candidates = summary.candidates_scanned,
            new_matches = summary.new_matches,
            new_applications = summary.new_applications,
            unit_failures = summary.unit_failures.len(),
            interrupted = summary.interrupted,
            "scan run finished"
        );
        summary
    }

    /// Registers the recurring tick: a cron expression when given, else a fixed interval.
    pub async fn build_job_scheduler(self: &Arc<Self>, interval: Duration, cron: Option<&str>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let job = match cron {
            Some(expr) => {
                let scheduler = Arc::clone(self);
                Job::new_async(expr, move |_uuid, _l| {
                    let scheduler = Arc::clone(&scheduler);
                    Box::pin(async move {
                        scheduler.tick().await;
                    })
                })
                .with_context(|| format!("creating scan job for cron {expr}"))?
            }
            None => {
                let scheduler = Arc::clone(self);
                Job::new_repeated_async(interval, move |_uuid, _l| {
                    let scheduler = Arc::clone(&scheduler);
                    Box::pin(async move {
                        scheduler.tick().await;
                    })
                })
                .with_context(|| format!("creating scan job every {}s", interval.as_secs()))?
            }
        };
        sched.add(job).await.context("adding scan job")?;
        Ok(sched)
    }

    /// Runs the timer until shutdown, then waits for the in-flight run to finish.
    pub async fn run_until_shutdown(self: Arc<Self>, interval: Duration, cron: Option<String>) -> Result<()> {
        let mut sched = self.build_job_scheduler(interval, cron.as_deref()).await?;
        sched.start().await.context("starting scheduler")?;
        info!(interval_secs = interval.as_secs(), cron = cron.as_deref(), "scan scheduler started");

        self.shutdown.triggered().await;
        info!("shutdown requested; stopping scheduler");
        sched.shutdown().await.context("stopping scheduler")?;
        let _drain = self.running.lock().await;
        info!("scan scheduler stopped");
        Ok(())
    }
}

/// Writes `<dir>/<run_id>/scan_summary.json` and a short markdown brief.
pub async fn write_run_report(dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join("scan_summary.json"), json)
        .await
        .context("writing scan_summary.json")?;

    let failures = if summary.unit_failures.is_empty() {
        "- none".to_string()
    } else {
        summary
            .unit_failures
            .iter()
            .map(|f| format!("- {:?} `{}`: {}", f.kind, f.id, f.message))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let brief = format!(
        "# Radar Scan\n\n- Run ID: `{}`\n- State: {:?}\n- Started: {}\n- Finished: {}\n- Alerts scanned: {}/{}\n- Candidates scanned: {}/{}\n- New matches: {}\n- New applications: {}\n\n## Unit Failures\n{}\n",
        summary.run_id,
        summary.state,
        summary.started_at,
        summary.finished_at,
        summary.alerts_scanned,
        summary.alerts_total,
        summary.candidates_scanned,
        summary.candidates_total,
        summary.new_matches,
        summary.new_applications,
        failures,
    );
    fs::write(run_dir.join("scan_brief.md"), brief)
        .await
        .context("writing scan_brief.md")?;
    Ok(run_dir)
}
