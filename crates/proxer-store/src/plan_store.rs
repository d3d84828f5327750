//! Plan catalog, tenant→plan assignment, and monthly usage counters
//! (spec §3, §4.3, §8 "Monthly-cap warnings").

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use proxer_proto::{normalize_identifier, IdentifierError};
use thiserror::Error;

use crate::model::{
    month_key, Plan, UsageSnapshot, BUILTIN_PLAN_BUSINESS, BUILTIN_PLAN_FREE, BUILTIN_PLAN_PRO,
};

#[derive(Debug, Error)]
pub enum PlanStoreError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
    #[error("plan '{0}' not found")]
    NotFound(String),
    #[error("built-in plan '{0}' cannot be deleted")]
    CannotDeleteBuiltin(String),
}

pub type PlanStoreResult<T> = Result<T, PlanStoreError>;

impl From<PlanStoreError> for proxer_proto::ProxerError {
    fn from(err: PlanStoreError) -> Self {
        use proxer_proto::ErrorKind;
        let kind = match &err {
            PlanStoreError::NotFound(_) => ErrorKind::NotFound,
            PlanStoreError::CannotDeleteBuiltin(_) => ErrorKind::Forbidden,
            PlanStoreError::InvalidIdentifier(_) => ErrorKind::Conflict,
        };
        proxer_proto::ProxerError::new(kind, err.to_string())
    }
}

/// Fraction-of-cap thresholds that trigger an operator-visible warning once
/// crossed (spec §4.2 "Usage accounting").
pub const WARN_THRESHOLD_80: f64 = 0.80;
pub const WARN_THRESHOLD_95: f64 = 0.95;

#[derive(Debug)]
pub enum CapCrossing {
    None,
    Warning80,
    Critical95,
}

#[derive(Debug, Default)]
struct PlanState {
    plans: HashMap<String, Plan>,
    assignments: HashMap<String, String>,
    usage: HashMap<(String, String), UsageSnapshot>,
}

/// Thread-safe registry for the plan catalog, tenant plan assignment, and
/// per-tenant-per-month usage counters.
#[derive(Debug)]
pub struct PlanStore {
    state: RwLock<PlanState>,
}

impl PlanStore {
    /// Creates a store seeded with the built-in `free`/`pro`/`business`
    /// plans (spec §3: "Built-in free/pro/business must always exist").
    pub fn new() -> Self {
        let now = Utc::now();
        let builtin = |id: &str, name: &str, max_routes, max_connectors, max_rps, max_gb, tls, price, order| Plan {
            id: id.to_string(),
            name: name.to_string(),
            max_routes,
            max_connectors,
            max_rps,
            max_monthly_gb: max_gb,
            tls_enabled: tls,
            price_monthly_cents: price,
            public_order: order,
            created_at: now,
            updated_at: now,
        };
        let mut plans = HashMap::new();
        plans.insert(
            BUILTIN_PLAN_FREE.to_string(),
            builtin(BUILTIN_PLAN_FREE, "Free", 1, 1, 5.0, 1.0, false, 0, 0),
        );
        plans.insert(
            BUILTIN_PLAN_PRO.to_string(),
            builtin(BUILTIN_PLAN_PRO, "Pro", 10, 5, 50.0, 50.0, true, 1900, 1),
        );
        plans.insert(
            BUILTIN_PLAN_BUSINESS.to_string(),
            builtin(
                BUILTIN_PLAN_BUSINESS,
                "Business",
                100,
                50,
                500.0,
                500.0,
                true,
                9900,
                2,
            ),
        );
        Self {
            state: RwLock::new(PlanState {
                plans,
                assignments: HashMap::new(),
                usage: HashMap::new(),
            }),
        }
    }

    fn ensure_builtins(plans: &mut HashMap<String, Plan>) {
        let seeded = Self::new();
        let seeded_plans = seeded.state.into_inner().unwrap().plans;
        for id in [BUILTIN_PLAN_FREE, BUILTIN_PLAN_PRO, BUILTIN_PLAN_BUSINESS] {
            plans.entry(id.to_string()).or_insert_with(|| seeded_plans[id].clone());
        }
    }

    pub fn put_plan(&self, plan: Plan) -> PlanStoreResult<Plan> {
        normalize_identifier(&plan.id)?;
        let mut state = self.state.write().unwrap();
        state.plans.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    pub fn get_plan(&self, id: &str) -> Option<Plan> {
        self.state.read().unwrap().plans.get(id).cloned()
    }

    pub fn list_plans(&self) -> Vec<Plan> {
        self.state.read().unwrap().plans.values().cloned().collect()
    }

    pub fn delete_plan(&self, id: &str) -> PlanStoreResult<()> {
        if matches!(id, BUILTIN_PLAN_FREE | BUILTIN_PLAN_PRO | BUILTIN_PLAN_BUSINESS) {
            return Err(PlanStoreError::CannotDeleteBuiltin(id.to_string()));
        }
        let mut state = self.state.write().unwrap();
        if state.plans.remove(id).is_none() {
            return Err(PlanStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn assign_plan(&self, tenant_id: &str, plan_id: &str) -> PlanStoreResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.plans.contains_key(plan_id) {
            return Err(PlanStoreError::NotFound(plan_id.to_string()));
        }
        state.assignments.insert(tenant_id.to_string(), plan_id.to_string());
        Ok(())
    }

    /// Resolves a tenant's effective plan, defaulting to `free` when
    /// unassigned (spec §3).
    pub fn plan_for_tenant(&self, tenant_id: &str) -> Plan {
        let state = self.state.read().unwrap();
        let plan_id = state
            .assignments
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| BUILTIN_PLAN_FREE.to_string());
        state
            .plans
            .get(&plan_id)
            .cloned()
            .unwrap_or_else(|| state.plans[BUILTIN_PLAN_FREE].clone())
    }

    /// Returns the current month's usage snapshot for a tenant, creating an
    /// empty one if none exists yet.
    pub fn usage_for_tenant(&self, tenant_id: &str, now: DateTime<Utc>) -> UsageSnapshot {
        let month = month_key(now);
        let mut state = self.state.write().unwrap();
        state
            .usage
            .entry((tenant_id.to_string(), month.clone()))
            .or_insert_with(|| UsageSnapshot::new(tenant_id, month, now))
            .clone()
    }

    /// Records a successful request's bytes against the tenant's current
    /// month, returning whether this update just crossed the 80% or 95%
    /// monthly cap threshold (spec §4.2, §8).
    pub fn record_usage(
        &self,
        tenant_id: &str,
        plan_max_bytes: u64,
        bytes_in: u64,
        bytes_out: u64,
        now: DateTime<Utc>,
    ) -> CapCrossing {
        let month = month_key(now);
        let mut state = self.state.write().unwrap();
        let snapshot = state
            .usage
            .entry((tenant_id.to_string(), month.clone()))
            .or_insert_with(|| UsageSnapshot::new(tenant_id, month, now));

        snapshot.requests += 1;
        snapshot.bytes_in += bytes_in;
        snapshot.bytes_out += bytes_out;
        snapshot.updated_at = now;

        if plan_max_bytes == 0 {
            return CapCrossing::None;
        }
        let fraction = snapshot.total_bytes() as f64 / plan_max_bytes as f64;

        if fraction >= WARN_THRESHOLD_95 && !snapshot.warned_95 {
            snapshot.warned_95 = true;
            if !snapshot.warned_80 {
                snapshot.warned_80 = true;
            }
            return CapCrossing::Critical95;
        }
        if fraction >= WARN_THRESHOLD_80 && !snapshot.warned_80 {
            snapshot.warned_80 = true;
            return CapCrossing::Warning80;
        }
        CapCrossing::None
    }

    pub fn record_blocked_request(&self, tenant_id: &str, now: DateTime<Utc>) {
        let month = month_key(now);
        let mut state = self.state.write().unwrap();
        let snapshot = state
            .usage
            .entry((tenant_id.to_string(), month.clone()))
            .or_insert_with(|| UsageSnapshot::new(tenant_id, month, now));
        snapshot.blocked_requests += 1;
        snapshot.updated_at = now;
    }

    pub fn restore(&self, plans: Vec<Plan>, assignments: HashMap<String, String>, usage: Vec<UsageSnapshot>) {
        let mut state = self.state.write().unwrap();
        let mut plans: HashMap<String, Plan> = plans.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self::ensure_builtins(&mut plans);
        state.plans = plans;
        state.assignments = assignments;
        state.usage = usage
            .into_iter()
            .map(|u| ((u.tenant_id.clone(), u.month.clone()), u))
            .collect();
    }

    pub fn snapshot(&self) -> (Vec<Plan>, HashMap<String, String>, Vec<UsageSnapshot>) {
        let state = self.state.read().unwrap();
        (
            state.plans.values().cloned().collect(),
            state.assignments.clone(),
            state.usage.values().cloned().collect(),
        )
    }
}

impl Default for PlanStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_plans_always_exist() {
        let store = PlanStore::new();
        assert!(store.get_plan(BUILTIN_PLAN_FREE).is_some());
        assert!(store.get_plan(BUILTIN_PLAN_PRO).is_some());
        assert!(store.get_plan(BUILTIN_PLAN_BUSINESS).is_some());
    }

    #[test]
    fn builtin_plans_cannot_be_deleted() {
        let store = PlanStore::new();
        assert!(matches!(
            store.delete_plan(BUILTIN_PLAN_FREE),
            Err(PlanStoreError::CannotDeleteBuiltin(_))
        ));
    }

    #[test]
    fn unassigned_tenant_resolves_to_free() {
        let store = PlanStore::new();
        assert_eq!(store.plan_for_tenant("team-a").id, BUILTIN_PLAN_FREE);
    }

    #[test]
    fn warned_flags_set_once_and_never_clear_within_month() {
        let store = PlanStore::new();
        let now = Utc::now();
        let max_bytes = 1000u64;

        // 79% - below threshold.
        let crossing = store.record_usage("team-a", max_bytes, 790, 0, now);
        assert!(matches!(crossing, CapCrossing::None));

        // crosses 80%.
        let crossing = store.record_usage("team-a", max_bytes, 20, 0, now);
        assert!(matches!(crossing, CapCrossing::Warning80));

        // stays above 80% but below 95% - no repeat warning.
        let crossing = store.record_usage("team-a", max_bytes, 10, 0, now);
        assert!(matches!(crossing, CapCrossing::None));

        // crosses 95%.
        let crossing = store.record_usage("team-a", max_bytes, 200, 0, now);
        assert!(matches!(crossing, CapCrossing::Critical95));

        let usage = store.usage_for_tenant("team-a", now);
        assert!(usage.warned_80);
        assert!(usage.warned_95);
    }

    #[test]
    fn restore_reseeds_builtins_when_missing() {
        let store = PlanStore::new();
        store.restore(vec![], HashMap::new(), vec![]);
        assert!(store.get_plan(BUILTIN_PLAN_FREE).is_some());
    }
}
