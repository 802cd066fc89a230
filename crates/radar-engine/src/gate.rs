use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use radar_adapters::{Entitlement, PlanService};
use radar_core::Feature;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub entitlement: Entitlement,
    /// The plan service failed and the gate denied by default.
    pub degraded: bool,
}

/// Policy boundary in front of the plan service. Never errors: an unreachable or
/// misbehaving plan service yields a deny.
pub struct EligibilityGate {
    plans: Arc<dyn PlanService>,
    degraded_events: AtomicU64,
}

impl EligibilityGate {
    pub fn new(plans: Arc<dyn PlanService>) -> Self {
        Self {
            plans,
            degraded_events: AtomicU64::new(0),
        }
    }

    pub async fn check(&self, actor_id: Uuid, feature: Feature) -> GateDecision {
        match self.plans.can_use(actor_id, feature).await {
            Ok(entitlement) => {
                debug!(%actor_id, %feature, allowed = entitlement.allowed, "eligibility checked");
                GateDecision {
                    entitlement,
                    degraded: false,
                }
            }
            Err(err) => {
                self.degraded_events.fetch_add(1, Ordering::Relaxed);
                error!(
                    degraded = true,
                    %actor_id,
                    %feature,
                    error = %err,
                    "eligibility gate failed closed"
                );
                GateDecision {
                    entitlement: Entitlement::denied(),
                    degraded: true,
                }
            }
        }
    }

    pub async fn can_use(&self, actor_id: Uuid, feature: Feature) -> Entitlement {
        self.check(actor_id, feature).await.entitlement
    }

    /// Number of fail-closed decisions since start.
    pub fn degraded_events(&self) -> u64 {
        self.degraded_events.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use radar_adapters::{DailyLimit, GateMode, GatePolicy, PlanError, PolicyPlanService};

    struct Unreachable;

    #[async_trait]
    impl PlanService for Unreachable {
        async fn can_use(&self, _actor_id: Uuid, _feature: Feature) -> Result<Entitlement, PlanError> {
            Err(PlanError::Unreachable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_plan_service_fails_closed() {
        let gate = EligibilityGate::new(Arc::new(Unreachable));
        let decision = gate.check(Uuid::new_v4(), Feature::AutoApply).await;
        assert!(!decision.entitlement.allowed);
        assert!(decision.degraded);
        assert_eq!(gate.degraded_events(), 1);
    }

    #[tokio::test]
    async fn flipping_policy_mode_changes_decisions_without_new_gate() {
        let plans = Arc::new(PolicyPlanService::new(GatePolicy::default()));
        let gate = EligibilityGate::new(plans.clone());
        let actor = Uuid::new_v4();
        assert!(!gate.can_use(actor, Feature::AutoApply).await.allowed);

        plans
            .set_policy(GatePolicy {
                mode: GateMode::Unlocked,
                ..Default::default()
            })
            .await;
        let entitlement = gate.can_use(actor, Feature::AutoApply).await;
        assert!(entitlement.allowed);
        assert_eq!(entitlement.daily_limit, DailyLimit::Unbounded);
        assert_eq!(gate.degraded_events(), 0);
    }
}
