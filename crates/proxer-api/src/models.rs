//! Wire DTOs for the HTTP surface: the documented agent/proxy/health
//! endpoints (spec §6) plus the minimal admin CRUD surface the spec leaves
//! as "interfaces only" (spec §1 Out of scope: "admin CRUD REST shape for
//! users/plans/tenants").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

impl From<proxer_proto::ProxerError> for ErrorResponse {
    fn from(err: proxer_proto::ProxerError) -> Self {
        Self {
            error: err.wire_code().to_string(),
            message: err.message.clone(),
            tenant_id: err.tenant_id.clone(),
            route_id: err.route_id.clone(),
            plan_id: err.plan_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub pending: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub persistence_driver: &'static str,
    pub persistence_last_saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TunnelProjection {
    pub tunnel_key: String,
    pub connected: bool,
    pub requests: u64,
    pub errors: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub avg_latency_ms: f64,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TunnelListResponse {
    pub tunnels: Vec<TunnelProjection>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TenantResponse {
    pub id: String,
    pub name: String,
    pub plan_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantResponse {
    pub fn from_tenant(tenant: proxer_store::Tenant, plan_id: String) -> Self {
        Self {
            id: tenant.id,
            name: tenant.name,
            plan_id,
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
        }
    }
}

/// Creates either a direct route (`target_url` set) or a connector-bound
/// one (`connector_id` set) — exactly one, per the route-shape invariant
/// (spec §3 I1, `RuleStore::put_route`).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateRouteRequest {
    pub route_id: String,
    pub target_url: Option<String>,
    pub token: Option<String>,
    pub max_rps: Option<f64>,
    pub connector_id: Option<String>,
    pub local_scheme: Option<String>,
    pub local_host: Option<String>,
    pub local_port: Option<u16>,
    pub local_base_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouteResponse {
    pub tenant_id: String,
    pub route_id: String,
    pub target_url: Option<String>,
    pub max_rps: Option<f64>,
    pub connector_id: Option<String>,
    pub tunnel_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<proxer_store::Route> for RouteResponse {
    fn from(route: proxer_store::Route) -> Self {
        Self {
            tunnel_key: route.tunnel_key(),
            tenant_id: route.tenant_id,
            route_id: route.route_id,
            target_url: route.target_url,
            max_rps: route.max_rps,
            connector_id: route.connector_id,
            created_at: route.created_at,
            updated_at: route.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateConnectorRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectorResponse {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PairTokenResponse {
    pub pair_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AssignPlanRequest {
    pub plan_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlanResponse {
    pub id: String,
    pub name: String,
    pub max_routes: u32,
    pub max_connectors: u32,
    pub max_rps: f64,
    pub max_monthly_gb: f64,
}

impl From<proxer_store::Plan> for PlanResponse {
    fn from(plan: proxer_store::Plan) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            max_routes: plan.max_routes,
            max_connectors: plan.max_connectors,
            max_rps: plan.max_rps,
            max_monthly_gb: plan.max_monthly_gb,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IncidentResponse {
    pub id: String,
    pub severity: String,
    pub source: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<proxer_store::SystemIncident> for IncidentResponse {
    fn from(incident: proxer_store::SystemIncident) -> Self {
        let severity = match incident.severity {
            proxer_store::IncidentSeverity::Info => "info",
            proxer_store::IncidentSeverity::Warning => "warning",
            proxer_store::IncidentSeverity::Critical => "critical",
        };
        Self {
            id: incident.id,
            severity: severity.to_string(),
            source: incident.source,
            message: incident.message,
            created_at: incident.created_at,
        }
    }
}
