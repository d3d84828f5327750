//! Pure admission arithmetic (spec §4.2 "Admission (order matters)").
//! The actual token-bucket state lives in `proxer_store::RateLimiter`; this
//! module only computes the per-route rate it should be checked against.

/// `min(rule.max_rps if set else plan.max_rps/max_routes, plan.max_rps)`.
/// `plan_max_routes` is floored at 1 to keep the fallback division defined;
/// the resulting rate is deliberately NOT floored at 1 req/s — a route
/// declaring `max_rps=0.5` must produce a one-token burst (spec §8 scenario
/// 5: two back-to-back requests, second rejected).
pub fn effective_route_rate(route_max_rps: Option<f64>, plan_max_rps: f64, plan_max_routes: u32) -> f64 {
    let base = route_max_rps.unwrap_or_else(|| plan_max_rps / plan_max_routes.max(1) as f64);
    base.min(plan_max_rps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_explicit_route_rate_when_set() {
        assert_eq!(effective_route_rate(Some(0.5), 100.0, 10), 0.5);
        assert_eq!(effective_route_rate(Some(5.0), 100.0, 10), 5.0);
    }

    #[test]
    fn derives_from_plan_when_unset() {
        assert_eq!(effective_route_rate(None, 100.0, 10), 10.0);
    }

    #[test]
    fn never_exceeds_plan_rate() {
        assert_eq!(effective_route_rate(Some(1000.0), 100.0, 10), 100.0);
    }
}
