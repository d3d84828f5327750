use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, Query, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{body::Bytes, Json};
use chrono::Duration as ChronoDuration;
use tracing::warn;

use proxer_proto::{
    AgentHeartbeatRequest, AgentPairRequest, AgentPairResponse, AgentPullResponse,
    AgentRegisterRequest, AgentRegisterResponse, AgentRespondRequest, ErrorKind, ProxerError,
    TunnelSummary as WireTunnelSummary,
};
use proxer_proxy::InboundRequest;
use proxer_session_hub::TunnelRegistration as HubTunnelRegistration;
use proxer_store::Scheme;

use crate::models::*;
use crate::AppState;

fn error_response(err: impl Into<ProxerError>) -> (StatusCode, Json<ErrorResponse>) {
    let err = err.into();
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(err)))
}

// ---------------------------------------------------------------------
// Agent control channel (spec §6)
// ---------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/agent/register",
    request_body = AgentRegisterRequest,
    responses(
        (status = 200, description = "Session registered", body = AgentRegisterResponse),
        (status = 401, description = "Bad agent token or connector secret", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn agent_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentRegisterRequest>,
) -> Result<Json<AgentRegisterResponse>, (StatusCode, Json<ErrorResponse>)> {
    let token = req.token.unwrap_or_default();

    if let Some(connector_id) = req.connector_id.clone() {
        let secret = req.connector_secret.clone().unwrap_or_default();
        if !state.connector_store.verify_secret(&connector_id, &secret) {
            return Err(error_response(ProxerError::unauthorized(
                "connector secret is missing or incorrect",
            )));
        }
        let session_id = state
            .session_hub
            .register_connector(&req.agent_id, &connector_id, &token)
            .await
            .map_err(error_response)?;
        return Ok(Json(AgentRegisterResponse {
            session_id,
            public_base_url: state.public_base_url.clone(),
            tunnels: Vec::new(),
        }));
    }

    let tunnels = req
        .tunnels
        .into_iter()
        .map(|t| HubTunnelRegistration {
            id: t.id,
            target: t.target,
            token: t.token,
        })
        .collect();

    let (session_id, routes) = state
        .session_hub
        .register_legacy(&req.agent_id, &token, tunnels)
        .await
        .map_err(error_response)?;

    Ok(Json(AgentRegisterResponse {
        session_id,
        public_base_url: state.public_base_url.clone(),
        tunnels: routes
            .into_iter()
            .map(|(id, public_url)| WireTunnelSummary { id, public_url })
            .collect(),
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct PullQuery {
    pub session_id: String,
    pub wait: Option<f64>,
}

#[utoipa::path(
    get,
    path = "/api/agent/pull",
    params(
        ("session_id" = String, Query, description = "Session id returned by register"),
        ("wait" = Option<f64>, Query, description = "Long-poll wait, seconds (default 25, max 60)")
    ),
    responses(
        (status = 200, description = "A request is ready for the agent", body = AgentPullResponse),
        (status = 204, description = "No request became ready within wait"),
        (status = 401, description = "Unknown or expired session", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn agent_pull(State(state): State<Arc<AppState>>, Query(params): Query<PullQuery>) -> Response {
    let wait_secs = params.wait.unwrap_or(25.0).clamp(0.0, 60.0);
    let wait = Duration::from_secs_f64(wait_secs);

    match state.session_hub.pull(&params.session_id, wait).await {
        Ok(Some(request)) => (StatusCode::OK, Json(AgentPullResponse { request })).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/agent/respond",
    request_body = AgentRespondRequest,
    responses(
        (status = 202, description = "Response accepted"),
        (status = 404, description = "Unknown pending request or session", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn agent_respond(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentRespondRequest>,
) -> Response {
    match state.session_hub.respond(&req.session_id, req.response).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/agent/heartbeat",
    request_body = AgentHeartbeatRequest,
    responses(
        (status = 202, description = "Heartbeat accepted"),
        (status = 401, description = "Unknown or expired session", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn agent_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentHeartbeatRequest>,
) -> Response {
    match state.session_hub.heartbeat(&req.session_id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/agent/pair",
    request_body = AgentPairRequest,
    responses(
        (status = 200, description = "Pair token consumed", body = AgentPairResponse),
        (status = 404, description = "Unknown, used, or expired pair token", body = ErrorResponse)
    ),
    tag = "agent"
)]
pub async fn agent_pair(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentPairRequest>,
) -> Result<Json<AgentPairResponse>, (StatusCode, Json<ErrorResponse>)> {
    let (connector_id, connector_secret) = state
        .connector_store
        .consume_pair_token(&req.pair_token)
        .map_err(error_response)?;
    let connector = state
        .connector_store
        .get_connector(&connector_id)
        .ok_or_else(|| error_response(ProxerError::internal("connector vanished after pairing")))?;

    Ok(Json(AgentPairResponse {
        connector_id,
        connector_secret,
        tenant_id: connector.tenant_id,
    }))
}

// ---------------------------------------------------------------------
// Proxy path (spec §4.2)
// ---------------------------------------------------------------------

pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Path(rest): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let forwarded_https = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("https"))
        .unwrap_or(false);

    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();

    let inbound = InboundRequest {
        method: method.as_str().to_string(),
        path_after_prefix: format!("/{rest}"),
        query: query.unwrap_or_default(),
        headers: header_pairs,
        body: body.to_vec(),
        remote_addr: remote_addr.to_string(),
        host,
        is_tls: state.is_https || forwarded_https,
    };

    match state.proxy_path.handle(inbound).await {
        Ok(outcome) => {
            let mut builder = Response::builder().status(outcome.status);
            for (name, value) in &outcome.headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::try_from(name.as_str()),
                    axum::http::HeaderValue::try_from(value.as_str()),
                ) {
                    builder = builder.header(name, value);
                } else {
                    warn!(header = %name, "dropping unencodable response header");
                }
            }
            builder
                .body(axum::body::Body::from(outcome.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(err) => error_response(err).into_response(),
    }
}

// ---------------------------------------------------------------------
// Read-only projections (spec §6)
// ---------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/tunnels",
    responses((status = 200, description = "Connected tunnel projection", body = TunnelListResponse)),
    tag = "tunnels"
)]
pub async fn list_tunnels(State(state): State<Arc<AppState>>) -> Json<TunnelListResponse> {
    let summaries = state.session_hub.snapshot_tunnels().await;

    let mut tunnels = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let metrics = state
            .session_hub
            .tunnel_metrics(&summary.tunnel_key)
            .await
            .unwrap_or_default();
        tunnels.push(TunnelProjection {
            tunnel_key: summary.tunnel_key,
            connected: summary.connected,
            requests: metrics.requests,
            errors: metrics.errors,
            bytes_in: metrics.bytes_in,
            bytes_out: metrics.bytes_out,
            avg_latency_ms: metrics.avg_latency_ms(),
            last_status: metrics.last_status,
            last_error: metrics.last_error,
        });
    }
    Json(TunnelListResponse { tunnels })
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Gateway health", body = HealthResponse)),
    tag = "health"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.session_hub.status().await;
    let persistence = state.persistence.health();
    Json(HealthResponse {
        status: "ok",
        sessions: status.sessions,
        pending: status.pending,
        p50_ms: status.p50_ms,
        p95_ms: status.p95_ms,
        persistence_driver: persistence.driver,
        persistence_last_saved_at: persistence.last_saved_at,
    })
}

// ---------------------------------------------------------------------
// Admin surface: the minimal concrete REST shape needed to exercise the
// tenant/route/connector/plan/incident CRUD the spec leaves as
// "interfaces only", gated by HTTP Basic super-admin auth.
// ---------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/admin/tenants",
    request_body = CreateTenantRequest,
    responses((status = 200, description = "Tenant created", body = TenantResponse)),
    tag = "admin"
)]
pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<Json<TenantResponse>, (StatusCode, Json<ErrorResponse>)> {
    let tenant = state
        .rule_store
        .create_tenant(&req.id, &req.name)
        .map_err(error_response)?;
    let plan = state.plan_store.plan_for_tenant(&tenant.id);
    Ok(Json(TenantResponse::from_tenant(tenant, plan.id)))
}

#[utoipa::path(
    get,
    path = "/api/admin/tenants",
    responses((status = 200, description = "All tenants", body = [TenantResponse])),
    tag = "admin"
)]
pub async fn list_tenants(State(state): State<Arc<AppState>>) -> Json<Vec<TenantResponse>> {
    let tenants = state
        .rule_store
        .list_tenants()
        .into_iter()
        .map(|t| {
            let plan = state.plan_store.plan_for_tenant(&t.id);
            TenantResponse::from_tenant(t, plan.id)
        })
        .collect();
    Json(tenants)
}

#[utoipa::path(
    delete,
    path = "/api/admin/tenants/{tenant_id}",
    params(("tenant_id" = String, Path, description = "Tenant id")),
    responses(
        (status = 204, description = "Tenant deleted"),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.rule_store.delete_tenant(&tenant_id).map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/admin/tenants/{tenant_id}/routes",
    params(("tenant_id" = String, Path, description = "Tenant id")),
    request_body = CreateRouteRequest,
    responses(
        (status = 200, description = "Route created", body = RouteResponse),
        (status = 404, description = "Tenant or connector not found", body = ErrorResponse),
        (status = 409, description = "Invalid route shape or connector-tenant mismatch", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn create_route(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<CreateRouteRequest>,
) -> Result<Json<RouteResponse>, (StatusCode, Json<ErrorResponse>)> {
    if let Some(connector_id) = &req.connector_id {
        let connector = state
            .connector_store
            .get_connector(connector_id)
            .ok_or_else(|| error_response(ProxerError::not_found(format!("connector '{connector_id}' not found"))))?;
        if connector.tenant_id != tenant_id {
            return Err(error_response(ProxerError::new(
                ErrorKind::Conflict,
                format!("connector '{connector_id}' belongs to a different tenant"),
            )));
        }
    }

    let now = chrono::Utc::now();
    let route = proxer_store::Route {
        tenant_id,
        route_id: req.route_id,
        target_url: req.target_url,
        token: req.token,
        max_rps: req.max_rps,
        connector_id: req.connector_id,
        local_scheme: req
            .local_scheme
            .map(|s| if s.eq_ignore_ascii_case("https") { Scheme::Https } else { Scheme::Http }),
        local_host: req.local_host,
        local_port: req.local_port,
        local_base_path: req.local_base_path,
        created_at: now,
        updated_at: now,
    };

    let route = state.rule_store.put_route(route).map_err(error_response)?;
    Ok(Json(route.into()))
}

#[utoipa::path(
    get,
    path = "/api/admin/tenants/{tenant_id}/routes",
    params(("tenant_id" = String, Path, description = "Tenant id")),
    responses((status = 200, description = "Routes for a tenant", body = [RouteResponse])),
    tag = "admin"
)]
pub async fn list_routes(State(state): State<Arc<AppState>>, Path(tenant_id): Path<String>) -> Json<Vec<RouteResponse>> {
    Json(state.rule_store.list_routes(&tenant_id).into_iter().map(Into::into).collect())
}

#[utoipa::path(
    delete,
    path = "/api/admin/tenants/{tenant_id}/routes/{route_id}",
    params(
        ("tenant_id" = String, Path, description = "Tenant id"),
        ("route_id" = String, Path, description = "Route id")
    ),
    responses(
        (status = 204, description = "Route deleted"),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn delete_route(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, route_id)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state
        .rule_store
        .delete_route(&tenant_id, &route_id)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/admin/tenants/{tenant_id}/connectors",
    params(("tenant_id" = String, Path, description = "Tenant id")),
    request_body = CreateConnectorRequest,
    responses((status = 200, description = "Connector created", body = ConnectorResponse)),
    tag = "admin"
)]
pub async fn create_connector(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<CreateConnectorRequest>,
) -> Result<Json<ConnectorResponse>, (StatusCode, Json<ErrorResponse>)> {
    let connector = state
        .connector_store
        .create_connector(&tenant_id, &req.name)
        .map_err(error_response)?;
    Ok(Json(ConnectorResponse {
        connected: state.session_hub.get_connector_connection(&connector.id).await.is_some(),
        id: connector.id,
        tenant_id: connector.tenant_id,
        name: connector.name,
        created_at: connector.created_at,
    }))
}

#[utoipa::path(
    get,
    path = "/api/admin/tenants/{tenant_id}/connectors",
    params(("tenant_id" = String, Path, description = "Tenant id")),
    responses((status = 200, description = "Connectors for a tenant", body = [ConnectorResponse])),
    tag = "admin"
)]
pub async fn list_connectors(State(state): State<Arc<AppState>>, Path(tenant_id): Path<String>) -> Json<Vec<ConnectorResponse>> {
    let mut out = Vec::new();
    for connector in state.connector_store.list_connectors(&tenant_id) {
        let connected = state.session_hub.get_connector_connection(&connector.id).await.is_some();
        out.push(ConnectorResponse {
            id: connector.id,
            tenant_id: connector.tenant_id,
            name: connector.name,
            connected,
            created_at: connector.created_at,
        });
    }
    Json(out)
}

#[utoipa::path(
    delete,
    path = "/api/admin/connectors/{connector_id}",
    params(("connector_id" = String, Path, description = "Connector id")),
    responses(
        (status = 204, description = "Connector deleted"),
        (status = 404, description = "Connector not found", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn delete_connector(
    State(state): State<Arc<AppState>>,
    Path(connector_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state
        .connector_store
        .delete_connector(&connector_id)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/admin/connectors/{connector_id}/pair",
    params(("connector_id" = String, Path, description = "Connector id")),
    responses(
        (status = 200, description = "Single-use pair token issued", body = PairTokenResponse),
        (status = 404, description = "Connector not found", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn issue_pair_token(
    State(state): State<Arc<AppState>>,
    Path(connector_id): Path<String>,
) -> Result<Json<PairTokenResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ttl = ChronoDuration::from_std(state.pair_token_ttl).unwrap_or_else(|_| ChronoDuration::minutes(10));
    let token = state
        .connector_store
        .issue_pair_token(&connector_id, ttl)
        .map_err(error_response)?;
    Ok(Json(PairTokenResponse {
        pair_token: token.token,
        expires_at: token.expires_at,
    }))
}

#[utoipa::path(
    get,
    path = "/api/admin/plans",
    responses((status = 200, description = "Plan catalog", body = [PlanResponse])),
    tag = "admin"
)]
pub async fn list_plans(State(state): State<Arc<AppState>>) -> Json<Vec<PlanResponse>> {
    Json(state.plan_store.list_plans().into_iter().map(Into::into).collect())
}

#[utoipa::path(
    post,
    path = "/api/admin/tenants/{tenant_id}/plan",
    params(("tenant_id" = String, Path, description = "Tenant id")),
    request_body = AssignPlanRequest,
    responses(
        (status = 204, description = "Plan assigned"),
        (status = 404, description = "Plan not found", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn assign_plan(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Json(req): Json<AssignPlanRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state
        .plan_store
        .assign_plan(&tenant_id, &req.plan_id)
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/admin/incidents",
    responses((status = 200, description = "Recent operator-visible incidents", body = [IncidentResponse])),
    tag = "admin"
)]
pub async fn list_incidents(State(state): State<Arc<AppState>>) -> Json<Vec<IncidentResponse>> {
    Json(state.incident_store.list().into_iter().map(Into::into).collect())
}
