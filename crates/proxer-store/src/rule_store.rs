//! Tenants, per-tenant environments, and routes (spec §4.3).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use proxer_proto::{normalize_identifier, IdentifierError};
use thiserror::Error;

use crate::model::{Environment, Route, Tenant, DEFAULT_TENANT_ID};

#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
    #[error("tenant '{0}' not found")]
    TenantNotFound(String),
    #[error("tenant '{0}' already exists")]
    TenantAlreadyExists(String),
    #[error("the built-in 'default' tenant cannot be deleted")]
    CannotDeleteDefaultTenant,
    #[error("route '{0}/{1}' not found")]
    RouteNotFound(String, String),
    #[error("route '{0}/{1}' already exists")]
    RouteAlreadyExists(String, String),
    #[error("route must be either direct (target_url set) or connector-bound (connector_id set), not both or neither")]
    InvalidRouteShape,
}

pub type RuleStoreResult<T> = Result<T, RuleStoreError>;

impl From<RuleStoreError> for proxer_proto::ProxerError {
    fn from(err: RuleStoreError) -> Self {
        use proxer_proto::ErrorKind;
        let kind = match &err {
            RuleStoreError::TenantAlreadyExists(_) | RuleStoreError::RouteAlreadyExists(_, _) => {
                ErrorKind::Conflict
            }
            RuleStoreError::InvalidRouteShape | RuleStoreError::InvalidIdentifier(_) => {
                ErrorKind::Conflict
            }
            RuleStoreError::CannotDeleteDefaultTenant => ErrorKind::Forbidden,
            RuleStoreError::TenantNotFound(_) | RuleStoreError::RouteNotFound(_, _) => {
                ErrorKind::NotFound
            }
        };
        proxer_proto::ProxerError::new(kind, err.to_string())
    }
}

#[derive(Debug, Default)]
struct RuleState {
    tenants: HashMap<String, Tenant>,
    environments: HashMap<String, Environment>,
    routes: HashMap<(String, String), Route>,
}

/// Thread-safe registry for tenants, environments, and routes.
///
/// `RuleStore` does not itself verify that a route's `connector_id`
/// references a connector of the same tenant (I1's second half) because it
/// has no view of `ConnectorStore`; callers that wire both stores together
/// (the admin surface, persistence restore) are responsible for that
/// cross-store check before calling [`RuleStore::put_route`].
#[derive(Debug)]
pub struct RuleStore {
    state: RwLock<RuleState>,
}

impl RuleStore {
    /// Creates a store seeded with the built-in `default` tenant (spec §3:
    /// "A built-in tenant with id `default` always exists").
    pub fn new() -> Self {
        let now = Utc::now();
        let mut tenants = HashMap::new();
        tenants.insert(
            DEFAULT_TENANT_ID.to_string(),
            Tenant {
                id: DEFAULT_TENANT_ID.to_string(),
                name: "Default".to_string(),
                created_at: now,
                updated_at: now,
            },
        );
        Self {
            state: RwLock::new(RuleState {
                tenants,
                environments: HashMap::new(),
                routes: HashMap::new(),
            }),
        }
    }

    pub fn create_tenant(&self, id: &str, name: &str) -> RuleStoreResult<Tenant> {
        let id = normalize_identifier(id)?;
        let mut state = self.state.write().unwrap();
        if state.tenants.contains_key(&id) {
            return Err(RuleStoreError::TenantAlreadyExists(id));
        }
        let now = Utc::now();
        let tenant = Tenant {
            id: id.clone(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.tenants.insert(id, tenant.clone());
        tracing::info!(tenant_id = %tenant.id, "tenant created");
        Ok(tenant)
    }

    pub fn get_tenant(&self, id: &str) -> Option<Tenant> {
        self.state.read().unwrap().tenants.get(id).cloned()
    }

    pub fn tenant_exists(&self, id: &str) -> bool {
        self.state.read().unwrap().tenants.contains_key(id)
    }

    pub fn list_tenants(&self) -> Vec<Tenant> {
        self.state.read().unwrap().tenants.values().cloned().collect()
    }

    pub fn delete_tenant(&self, id: &str) -> RuleStoreResult<()> {
        if id == DEFAULT_TENANT_ID {
            return Err(RuleStoreError::CannotDeleteDefaultTenant);
        }
        let mut state = self.state.write().unwrap();
        if state.tenants.remove(id).is_none() {
            return Err(RuleStoreError::TenantNotFound(id.to_string()));
        }
        state.environments.remove(id);
        state.routes.retain(|(tenant_id, _), _| tenant_id != id);
        Ok(())
    }

    pub fn put_environment(&self, env: Environment) -> RuleStoreResult<Environment> {
        let mut state = self.state.write().unwrap();
        if !state.tenants.contains_key(&env.tenant_id) {
            return Err(RuleStoreError::TenantNotFound(env.tenant_id.clone()));
        }
        state
            .environments
            .insert(env.tenant_id.clone(), env.clone());
        Ok(env)
    }

    pub fn get_environment(&self, tenant_id: &str) -> Option<Environment> {
        self.state.read().unwrap().environments.get(tenant_id).cloned()
    }

    /// Inserts or replaces a route. Enforces route-shape validity and
    /// `(tenant_id, route_id)` uniqueness is simply overwrite-on-upsert, not
    /// an error — callers wanting create-only semantics should check
    /// [`RuleStore::get_route`] first.
    pub fn put_route(&self, route: Route) -> RuleStoreResult<Route> {
        let tenant_id = normalize_identifier(&route.tenant_id)?;
        let route_id = normalize_identifier(&route.route_id)?;
        let is_direct = route.target_url.is_some() && route.connector_id.is_none();
        let is_connector_bound = route.connector_id.is_some() && route.target_url.is_none();
        if !(is_direct || is_connector_bound) && route.connector_id.is_some() == route.target_url.is_some() {
            return Err(RuleStoreError::InvalidRouteShape);
        }

        let mut state = self.state.write().unwrap();
        if !state.tenants.contains_key(&tenant_id) {
            return Err(RuleStoreError::TenantNotFound(tenant_id));
        }
        let mut route = route;
        route.tenant_id = tenant_id.clone();
        route.route_id = route_id.clone();
        state
            .routes
            .insert((tenant_id, route_id), route.clone());
        Ok(route)
    }

    pub fn get_route(&self, tenant_id: &str, route_id: &str) -> Option<Route> {
        self.state
            .read()
            .unwrap()
            .routes
            .get(&(tenant_id.to_string(), route_id.to_string()))
            .cloned()
    }

    pub fn route_exists(&self, tenant_id: &str, route_id: &str) -> bool {
        self.get_route(tenant_id, route_id).is_some()
    }

    pub fn list_routes(&self, tenant_id: &str) -> Vec<Route> {
        self.state
            .read()
            .unwrap()
            .routes
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn delete_route(&self, tenant_id: &str, route_id: &str) -> RuleStoreResult<()> {
        let mut state = self.state.write().unwrap();
        if state
            .routes
            .remove(&(tenant_id.to_string(), route_id.to_string()))
            .is_none()
        {
            return Err(RuleStoreError::RouteNotFound(
                tenant_id.to_string(),
                route_id.to_string(),
            ));
        }
        Ok(())
    }

    /// Replaces the entire store contents, re-seeding the built-in tenant
    /// if the restored snapshot omits it (spec §4.5 "Restore tolerates
    /// missing fields").
    pub fn restore(&self, tenants: Vec<Tenant>, environments: Vec<Environment>, routes: Vec<Route>) {
        let mut state = self.state.write().unwrap();
        state.tenants = tenants.into_iter().map(|t| (t.id.clone(), t)).collect();
        state
            .tenants
            .entry(DEFAULT_TENANT_ID.to_string())
            .or_insert_with(|| {
                let now = Utc::now();
                Tenant {
                    id: DEFAULT_TENANT_ID.to_string(),
                    name: "Default".to_string(),
                    created_at: now,
                    updated_at: now,
                }
            });
        state.environments = environments
            .into_iter()
            .map(|e| (e.tenant_id.clone(), e))
            .collect();
        state.routes = routes
            .into_iter()
            .map(|r| ((r.tenant_id.clone(), r.route_id.clone()), r))
            .collect();
    }

    pub fn snapshot(&self) -> (Vec<Tenant>, Vec<Environment>, Vec<Route>) {
        let state = self.state.read().unwrap();
        (
            state.tenants.values().cloned().collect(),
            state.environments.values().cloned().collect(),
            state.routes.values().cloned().collect(),
        )
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_route(tenant: &str, route: &str, url: &str) -> Route {
        let now = Utc::now();
        Route {
            tenant_id: tenant.to_string(),
            route_id: route.to_string(),
            target_url: Some(url.to_string()),
            token: None,
            max_rps: None,
            connector_id: None,
            local_scheme: None,
            local_host: None,
            local_port: None,
            local_base_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn default_tenant_exists_and_cannot_be_deleted() {
        let store = RuleStore::new();
        assert!(store.tenant_exists(DEFAULT_TENANT_ID));
        assert!(matches!(
            store.delete_tenant(DEFAULT_TENANT_ID),
            Err(RuleStoreError::CannotDeleteDefaultTenant)
        ));
    }

    #[test]
    fn tenant_ids_are_unique_and_per_tenant_routes_are_isolated() {
        let store = RuleStore::new();
        store.create_tenant("team-a", "Team A").unwrap();
        store.create_tenant("team-b", "Team B").unwrap();
        assert!(matches!(
            store.create_tenant("team-a", "dup"),
            Err(RuleStoreError::TenantAlreadyExists(_))
        ));

        store
            .put_route(direct_route("team-a", "web", "http://127.0.0.1:9001"))
            .unwrap();
        store
            .put_route(direct_route("team-b", "web", "http://127.0.0.1:9002"))
            .unwrap();

        let a = store.get_route("team-a", "web").unwrap();
        let b = store.get_route("team-b", "web").unwrap();
        assert_eq!(a.target_url.unwrap(), "http://127.0.0.1:9001");
        assert_eq!(b.target_url.unwrap(), "http://127.0.0.1:9002");
    }

    #[test]
    fn route_must_be_direct_xor_connector_bound() {
        let store = RuleStore::new();
        let mut both = direct_route(DEFAULT_TENANT_ID, "bad", "http://127.0.0.1:9000");
        both.connector_id = Some("conn-a".to_string());
        assert!(matches!(
            store.put_route(both),
            Err(RuleStoreError::InvalidRouteShape)
        ));

        let mut neither = direct_route(DEFAULT_TENANT_ID, "bad2", "http://127.0.0.1:9000");
        neither.target_url = None;
        assert!(matches!(
            store.put_route(neither),
            Err(RuleStoreError::InvalidRouteShape)
        ));
    }

    #[test]
    fn put_route_requires_existing_tenant() {
        let store = RuleStore::new();
        assert!(matches!(
            store.put_route(direct_route("missing", "web", "http://127.0.0.1:9000")),
            Err(RuleStoreError::TenantNotFound(_))
        ));
    }

    #[test]
    fn restore_reseeds_default_tenant_when_missing() {
        let store = RuleStore::new();
        store.restore(vec![], vec![], vec![]);
        assert!(store.tenant_exists(DEFAULT_TENANT_ID));
    }
}
