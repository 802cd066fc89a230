//! Boundaries to the collaborators the engine consumes but does not own: the fit scorer,
//! the plan/entitlement service, the application subsystem and the push channel.

mod applications;
mod plans;
mod push;
mod scoring;

pub use applications::{
    ApplicationRequest, ApplicationSubmitter, HttpApplicationSubmitter, StoreApplicationSubmitter,
    SubmitError,
};
pub use plans::{
    DailyLimit, Entitlement, GateMode, GatePolicy, HttpPlanService, PlanEntitlements, PlanError,
    PlanService, PolicyPlanService,
};
pub use push::{BroadcastPushChannel, HttpPushChannel, PushChannel, PushError};
pub use scoring::{
    HttpScorer, ScoreOutcome, ScoreTarget, Scorer, ScoringError, SkillOverlapScorer,
};

pub const CRATE_NAME: &str = "radar-adapters";
