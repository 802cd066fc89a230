use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadarConfig {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub scheduler_enabled: bool,
    pub scan_interval: Duration,
    /// Overrides `scan_interval` when set.
    pub scan_cron: Option<String>,
    pub scan_concurrency: usize,
    pub scorer_url: Option<String>,
    pub plan_service_url: Option<String>,
    pub plan_policy_path: PathBuf,
    pub applications_url: Option<String>,
    pub push_url: Option<String>,
    pub http_timeout_secs: u64,
    /// Per-service request rate; `None` is unthrottled.
    pub service_rate_per_sec: Option<u32>,
    /// Bearer token presented to the remote services.
    pub service_token: Option<String>,
    /// Seconds before a record-less application claim may be retried.
    pub claim_lease_secs: i64,
    pub reports_dir: Option<PathBuf>,
    pub web_port: u16,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            scheduler_enabled: false,
            scan_interval: Duration::from_secs(6 * 60 * 60),
            scan_cron: None,
            scan_concurrency: 8,
            scorer_url: None,
            plan_service_url: None,
            plan_policy_path: PathBuf::from("plans.yaml"),
            applications_url: None,
            push_url: None,
            http_timeout_secs: 20,
            service_rate_per_sec: None,
            service_token: None,
            claim_lease_secs: crate::auto_apply::DEFAULT_CLAIM_LEASE_SECS,
            reports_dir: None,
            web_port: 8000,
        }
    }
}

impl RadarConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            database_url: var("DATABASE_URL"),
            scheduler_enabled: var("RADAR_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
                .unwrap_or(defaults.scheduler_enabled),
            scan_interval: match var("RADAR_SCAN_INTERVAL_SECS") {
                Some(v) => {
                    let secs: u64 = v
                        .parse()
                        .with_context(|| format!("RADAR_SCAN_INTERVAL_SECS must be seconds, got `{v}`"))?;
                    anyhow::ensure!(secs > 0, "RADAR_SCAN_INTERVAL_SECS must be positive");
                    Duration::from_secs(secs)
                }
                None => defaults.scan_interval,
            },
            scan_cron: var("RADAR_SCAN_CRON"),
            scan_concurrency: match var("RADAR_SCAN_CONCURRENCY") {
                Some(v) => v
                    .parse::<usize>()
                    .with_context(|| format!("RADAR_SCAN_CONCURRENCY must be a number, got `{v}`"))?
                    .max(1),
                None => defaults.scan_concurrency,
            },
            scorer_url: var("RADAR_SCORER_URL"),
            plan_service_url: var("RADAR_PLAN_SERVICE_URL"),
            plan_policy_path: var("RADAR_PLAN_POLICY")
                .map(PathBuf::from)
                .unwrap_or(defaults.plan_policy_path),
            applications_url: var("RADAR_APPLICATIONS_URL"),
            push_url: var("RADAR_PUSH_URL"),
            http_timeout_secs: var("RADAR_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            service_rate_per_sec: match var("RADAR_SERVICE_RATE_PER_SEC") {
                Some(v) => {
                    let rate: u32 = v
                        .parse()
                        .with_context(|| format!("RADAR_SERVICE_RATE_PER_SEC must be a number, got `{v}`"))?;
                    (rate > 0).then_some(rate)
                }
                None => defaults.service_rate_per_sec,
            },
            service_token: var("RADAR_SERVICE_TOKEN"),
            claim_lease_secs: match var("RADAR_CLAIM_LEASE_SECS") {
                Some(v) => {
                    let secs: i64 = v
                        .parse()
                        .with_context(|| format!("RADAR_CLAIM_LEASE_SECS must be seconds, got `{v}`"))?;
                    anyhow::ensure!(secs > 0, "RADAR_CLAIM_LEASE_SECS must be positive");
                    secs
                }
                None => defaults.claim_lease_secs,
            },
            reports_dir: var("RADAR_REPORTS_DIR").map(PathBuf::from),
            web_port: match var("RADAR_WEB_PORT") {
                Some(v) => v
                    .parse()
                    .with_context(|| format!("RADAR_WEB_PORT must be a valid port number, got `{v}`"))?,
                None => defaults.web_port,
            },
        })
    }
}
