//! The gateway's non-session stores: tenants/routes, connectors, plans,
//! incidents, and the rate limiter (spec §4.3, §4.4).

pub mod connector_store;
pub mod incident_store;
pub mod model;
pub mod plan_store;
pub mod rate_limiter;
pub mod rule_store;

pub use connector_store::{ConnectorStore, ConnectorStoreError};
pub use incident_store::IncidentStore;
pub use plan_store::{CapCrossing, PlanStore, PlanStoreError, WARN_THRESHOLD_80, WARN_THRESHOLD_95};
pub use rate_limiter::RateLimiter;
pub use rule_store::{RuleStore, RuleStoreError};

pub use model::*;
