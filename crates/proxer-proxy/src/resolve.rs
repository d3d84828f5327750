//! Route-path resolution: turns the segments after `/t/` into a
//! `(tenant_id, route_id, forward_path)` triple, deterministically and
//! without mutating anything (spec §4.2, §9 "keep resolution
//! deterministic and side-effect-free").

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub tenant_id: String,
    pub route_id: String,
    pub forward_path: String,
}

/// Candidate tunnel_keys for `(tenant_id, route_id)`, in preference order:
/// the namespaced key always, and the bare route id as well when the tenant
/// is the default one (legacy single-tenant compatibility).
pub fn candidate_tunnel_keys(tenant_id: &str, route_id: &str) -> Vec<String> {
    let mut keys = vec![format!("{tenant_id}/{route_id}")];
    if tenant_id == proxer_store::DEFAULT_TENANT_ID {
        keys.push(route_id.to_string());
    }
    keys
}

fn join_segments(segments: &[&str]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// `route_exists_or_connected` lets callers plug in the store/hub lookups
/// this function needs without resolve.rs depending on their types
/// directly, keeping it a pure function of its inputs (spec §9).
pub fn resolve_route_path(
    path_after_prefix: &str,
    route_exists_or_connected: impl Fn(&str, &str) -> bool,
) -> Option<ResolvedPath> {
    let trimmed = path_after_prefix.trim_start_matches('/');
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return None;
    }

    if segments.len() == 1 {
        return Some(ResolvedPath {
            tenant_id: proxer_store::DEFAULT_TENANT_ID.to_string(),
            route_id: segments[0].to_string(),
            forward_path: "/".to_string(),
        });
    }

    let (tenant, route) = (segments[0], segments[1]);
    if route_exists_or_connected(tenant, route) {
        return Some(ResolvedPath {
            tenant_id: tenant.to_string(),
            route_id: route.to_string(),
            forward_path: join_segments(&segments[2..]),
        });
    }

    Some(ResolvedPath {
        tenant_id: proxer_store::DEFAULT_TENANT_ID.to_string(),
        route_id: segments[0].to_string(),
        forward_path: join_segments(&segments[1..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_resolves_to_none() {
        assert_eq!(resolve_route_path("", |_, _| false), None);
        assert_eq!(resolve_route_path("/", |_, _| false), None);
    }

    #[test]
    fn single_segment_is_legacy_default_tenant() {
        let resolved = resolve_route_path("/app3000/hello", |_, _| false).unwrap();
        assert_eq!(resolved.tenant_id, "default");
        assert_eq!(resolved.route_id, "app3000");
        assert_eq!(resolved.forward_path, "/hello");
    }

    #[test]
    fn two_segments_resolve_to_namespaced_route_when_known() {
        let resolved = resolve_route_path("/team-a/web/home", |t, r| t == "team-a" && r == "web").unwrap();
        assert_eq!(resolved.tenant_id, "team-a");
        assert_eq!(resolved.route_id, "web");
        assert_eq!(resolved.forward_path, "/home");
    }

    #[test]
    fn two_segments_fall_back_to_legacy_when_unknown() {
        let resolved = resolve_route_path("/app3000/some/deep/path", |_, _| false).unwrap();
        assert_eq!(resolved.tenant_id, "default");
        assert_eq!(resolved.route_id, "app3000");
        assert_eq!(resolved.forward_path, "/some/deep/path");
    }

    #[test]
    fn root_of_matched_tenant_route_has_slash_forward_path() {
        let resolved = resolve_route_path("/team-a/web", |t, r| t == "team-a" && r == "web").unwrap();
        assert_eq!(resolved.forward_path, "/");
    }

    #[test]
    fn candidate_keys_include_bare_route_only_for_default_tenant() {
        assert_eq!(
            candidate_tunnel_keys("default", "app3000"),
            vec!["default/app3000".to_string(), "app3000".to_string()]
        );
        assert_eq!(candidate_tunnel_keys("team-a", "web"), vec!["team-a/web".to_string()]);
    }
}
