use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use radar_core::Feature;
use radar_storage::{ServiceClient, ServiceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-day cap on a gated action. On the wire `-1` (any negative) means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum DailyLimit {
    Limited(u32),
    Unbounded,
}

impl DailyLimit {
    /// Remaining allowance after `used` actions today; `None` when unbounded.
    pub fn remaining(&self, used: u64) -> Option<u64> {
        match self {
            DailyLimit::Limited(limit) => Some(u64::from(*limit).saturating_sub(used)),
            DailyLimit::Unbounded => None,
        }
    }
}

impl Default for DailyLimit {
    fn default() -> Self {
        DailyLimit::Limited(0)
    }
}

impl From<i64> for DailyLimit {
    fn from(value: i64) -> Self {
        if value < 0 {
            DailyLimit::Unbounded
        } else {
            DailyLimit::Limited(u32::try_from(value).unwrap_or(u32::MAX))
        }
    }
}

impl From<DailyLimit> for i64 {
    fn from(value: DailyLimit) -> Self {
        match value {
            DailyLimit::Limited(limit) => i64::from(limit),
            DailyLimit::Unbounded => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub allowed: bool,
    pub daily_limit: DailyLimit,
}

impl Entitlement {
    pub fn denied() -> Self {
        Self {
            allowed: false,
            daily_limit: DailyLimit::Limited(0),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            allowed: true,
            daily_limit: DailyLimit::Unbounded,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan service unreachable: {0}")]
    Unreachable(String),
    #[error("plan service returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("plan policy is misconfigured: {0}")]
    Policy(String),
}

impl From<ServiceError> for PlanError {
    fn from(err: ServiceError) -> Self {
        if err.is_transport() {
            PlanError::Unreachable(err.to_string())
        } else {
            PlanError::InvalidResponse(err.to_string())
        }
    }
}

#[async_trait]
pub trait PlanService: Send + Sync {
    async fn can_use(&self, actor_id: Uuid, feature: Feature) -> Result<Entitlement, PlanError>;
}

/// Global gate mode. `Unlocked` grants every feature without limits, the
/// early-access state the product runs under during promotions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    #[default]
    Enforced,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlanEntitlements {
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub auto_apply_daily_limit: DailyLimit,
}

/// Entitlement policy as loaded from `plans.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GatePolicy {
    #[serde(default)]
    pub mode: GateMode,
    /// Plan for actors without an explicit assignment. No default plan means deny.
    #[serde(default)]
    pub default_plan: Option<String>,
    #[serde(default)]
    pub plans: BTreeMap<String, PlanEntitlements>,
    #[serde(default)]
    pub assignments: BTreeMap<Uuid, String>,
}

impl GatePolicy {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing plan policy yaml")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn entitlement(&self, actor_id: Uuid, feature: Feature) -> Result<Entitlement, PlanError> {
        if self.mode == GateMode::Unlocked {
            return Ok(Entitlement::unbounded());
        }

        let Some(plan_name) = self.assignments.get(&actor_id).or(self.default_plan.as_ref()) else {
            return Ok(Entitlement::denied());
        };
        let plan = self
            .plans
            .get(plan_name)
            .ok_or_else(|| PlanError::Policy(format!("unknown plan `{plan_name}`")))?;

        if !plan.features.contains(&feature) {
            return Ok(Entitlement::denied());
        }
        let daily_limit = match feature {
            Feature::AutoApply => plan.auto_apply_daily_limit,
            Feature::TalentRadar => DailyLimit::Unbounded,
        };
        Ok(Entitlement {
            allowed: true,
            daily_limit,
        })
    }
}

/// Plan service answered from a local policy document that can be swapped at runtime.
#[derive(Debug, Default)]
pub struct PolicyPlanService {
    policy: RwLock<Arc<GatePolicy>>,
}

impl PolicyPlanService {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(GatePolicy::load(path).await?))
    }

    pub async fn policy(&self) -> Arc<GatePolicy> {
        self.policy.read().await.clone()
    }

    pub async fn set_policy(&self, policy: GatePolicy) {
        *self.policy.write().await = Arc::new(policy);
    }
}

#[async_trait]
impl PlanService for PolicyPlanService {
    async fn can_use(&self, actor_id: Uuid, feature: Feature) -> Result<Entitlement, PlanError> {
        let policy = self.policy().await;
        policy.entitlement(actor_id, feature)
    }
}

/// Remote plan/entitlement service.
pub struct HttpPlanService {
    client: ServiceClient,
}

impl HttpPlanService {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlanService for HttpPlanService {
    async fn can_use(&self, actor_id: Uuid, feature: Feature) -> Result<Entitlement, PlanError> {
        let path = format!("/v1/entitlements/{actor_id}/{}", feature.key());
        Ok(self.client.get_json::<Entitlement>(&path).await?)
    }
}
