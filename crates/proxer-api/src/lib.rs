pub mod handlers;
pub mod middleware;
pub mod models;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use proxer_proxy::ProxyPath;
use proxer_relay_db::PersistenceAdapter;
use proxer_session_hub::SessionHub;
use proxer_store::{ConnectorStore, IncidentStore, PlanStore, RuleStore};

/// Shared state handed to every handler.
pub struct AppState {
    pub rule_store: Arc<RuleStore>,
    pub connector_store: Arc<ConnectorStore>,
    pub plan_store: Arc<PlanStore>,
    pub incident_store: Arc<IncidentStore>,
    pub session_hub: Arc<SessionHub>,
    pub proxy_path: Arc<ProxyPath>,
    pub persistence: Arc<dyn PersistenceAdapter>,
    pub public_base_url: String,
    pub pair_token_ttl: Duration,
    pub super_admin_username: String,
    pub super_admin_password_hash: String,
    pub is_https: bool,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Proxer Gateway API",
        version = "1.0.0",
        description = "Exposes private-network HTTP services to public callers via long-polling connector agents"
    ),
    paths(
        handlers::agent_register,
        handlers::agent_pull,
        handlers::agent_respond,
        handlers::agent_heartbeat,
        handlers::agent_pair,
        handlers::list_tunnels,
        handlers::health,
        handlers::create_tenant,
        handlers::list_tenants,
        handlers::delete_tenant,
        handlers::create_route,
        handlers::list_routes,
        handlers::delete_route,
        handlers::create_connector,
        handlers::list_connectors,
        handlers::delete_connector,
        handlers::issue_pair_token,
        handlers::list_plans,
        handlers::assign_plan,
        handlers::list_incidents,
    ),
    components(
        schemas(
            proxer_proto::LocalTarget,
            proxer_proto::ProxyRequest,
            proxer_proto::ProxyResponse,
            proxer_proto::TunnelRegistration,
            proxer_proto::TunnelSummary,
            proxer_proto::AgentRegisterRequest,
            proxer_proto::AgentRegisterResponse,
            proxer_proto::AgentPullResponse,
            proxer_proto::AgentRespondRequest,
            proxer_proto::AgentHeartbeatRequest,
            proxer_proto::AgentPairRequest,
            proxer_proto::AgentPairResponse,
            models::ErrorResponse,
            models::HealthResponse,
            models::TunnelProjection,
            models::TunnelListResponse,
            models::CreateTenantRequest,
            models::TenantResponse,
            models::CreateRouteRequest,
            models::RouteResponse,
            models::CreateConnectorRequest,
            models::ConnectorResponse,
            models::PairTokenResponse,
            models::AssignPlanRequest,
            models::PlanResponse,
            models::IncidentResponse,
        )
    ),
    tags(
        (name = "agent", description = "Connector agent control channel"),
        (name = "proxy", description = "Public proxy path"),
        (name = "tunnels", description = "Tunnel projection"),
        (name = "health", description = "Gateway health"),
        (name = "admin", description = "Tenant/route/connector/plan administration")
    )
)]
struct ApiDoc;

/// API server configuration.
pub struct ApiServerConfig {
    pub http_addr: Option<SocketAddr>,
    pub https_addr: Option<SocketAddr>,
    pub enable_cors: bool,
    pub cors_origins: Option<Vec<String>>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub super_admin_username: String,
    pub super_admin_password_hash: String,
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ApiServerConfig,
        rule_store: Arc<RuleStore>,
        connector_store: Arc<ConnectorStore>,
        plan_store: Arc<PlanStore>,
        incident_store: Arc<IncidentStore>,
        session_hub: Arc<SessionHub>,
        proxy_path: Arc<ProxyPath>,
        persistence: Arc<dyn PersistenceAdapter>,
        public_base_url: String,
        pair_token_ttl: Duration,
    ) -> Self {
        let is_https = config.https_addr.is_some();
        let state = Arc::new(AppState {
            rule_store,
            connector_store,
            plan_store,
            incident_store,
            session_hub,
            proxy_path,
            persistence,
            public_base_url,
            pair_token_ttl,
            super_admin_username: config.super_admin_username.clone(),
            super_admin_password_hash: config.super_admin_password_hash.clone(),
            is_https,
        });
        Self { config, state }
    }

    /// Builds the full router: public agent/proxy/read-only surface, the
    /// Basic-auth-gated admin surface, and Swagger UI.
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let max_body = self.state.proxy_path.config.max_request_body_bytes;

        let public_router = Router::new()
            .route("/api/agent/register", post(handlers::agent_register))
            .route("/api/agent/pull", get(handlers::agent_pull))
            .route("/api/agent/respond", post(handlers::agent_respond))
            .route("/api/agent/heartbeat", post(handlers::agent_heartbeat))
            .route("/api/agent/pair", post(handlers::agent_pair))
            .route("/api/tunnels", get(handlers::list_tunnels))
            .route("/api/health", get(handlers::health))
            .route(
                "/t/{*rest}",
                get(handlers::proxy)
                    .post(handlers::proxy)
                    .put(handlers::proxy)
                    .patch(handlers::proxy)
                    .delete(handlers::proxy)
                    .head(handlers::proxy)
                    .options(handlers::proxy),
            )
            .layer(DefaultBodyLimit::max(max_body))
            .with_state(self.state.clone());

        let admin_router = Router::new()
            .route("/api/admin/tenants", get(handlers::list_tenants).post(handlers::create_tenant))
            .route("/api/admin/tenants/{tenant_id}", axum::routing::delete(handlers::delete_tenant))
            .route(
                "/api/admin/tenants/{tenant_id}/routes",
                get(handlers::list_routes).post(handlers::create_route),
            )
            .route(
                "/api/admin/tenants/{tenant_id}/routes/{route_id}",
                axum::routing::delete(handlers::delete_route),
            )
            .route(
                "/api/admin/tenants/{tenant_id}/connectors",
                get(handlers::list_connectors).post(handlers::create_connector),
            )
            .route(
                "/api/admin/connectors/{connector_id}",
                axum::routing::delete(handlers::delete_connector),
            )
            .route(
                "/api/admin/connectors/{connector_id}/pair",
                post(handlers::issue_pair_token),
            )
            .route("/api/admin/plans", get(handlers::list_plans))
            .route("/api/admin/tenants/{tenant_id}/plan", post(handlers::assign_plan))
            .route("/api/admin/incidents", get(handlers::list_incidents))
            .with_state(self.state.clone())
            .layer(axum_middleware::from_fn_with_state(
                self.state.clone(),
                middleware::require_admin,
            ));

        let api_router = public_router.merge(admin_router);

        let router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", api_doc))
            .merge(api_router);

        let cors = if self.config.enable_cors {
            let mut layer = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
            layer = match &self.config.cors_origins {
                Some(origins) => {
                    let parsed: Vec<_> = origins
                        .iter()
                        .filter_map(|o| o.parse().ok())
                        .collect();
                    layer.allow_origin(parsed)
                }
                None => layer.allow_origin(tower_http::cors::Any),
            };
            Some(layer)
        } else {
            None
        };

        let mut router = router.layer(TraceLayer::new_for_http());
        if let Some(cors) = cors {
            router = router.layer(cors);
        }
        router
    }

    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        if self.config.http_addr.is_none() && self.config.https_addr.is_none() {
            return Err(anyhow::anyhow!("at least one of http_addr or https_addr must be configured"));
        }
        if self.config.https_addr.is_some()
            && (self.config.tls_cert_path.is_none() || self.config.tls_key_path.is_none())
        {
            return Err(anyhow::anyhow!("https_addr requires both tls_cert_path and tls_key_path"));
        }

        let mut handles: Vec<tokio::task::JoinHandle<Result<(), anyhow::Error>>> = Vec::new();

        if let Some(http_addr) = self.config.http_addr {
            info!("starting HTTP API server on http://{http_addr}");
            info!("OpenAPI spec: http://{http_addr}/api/openapi.json");
            let http_router = router
                .clone()
                .into_make_service_with_connect_info::<SocketAddr>();
            handles.push(tokio::spawn(async move {
                let listener = tokio::net::TcpListener::bind(http_addr).await?;
                axum::serve(listener, http_router)
                    .await
                    .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;
                Ok(())
            }));
        }

        if let Some(https_addr) = self.config.https_addr {
            let cert_path = self.config.tls_cert_path.clone().unwrap();
            let key_path = self.config.tls_key_path.clone().unwrap();
            info!("starting HTTPS API server on https://{https_addr}");
            let https_router = router.into_make_service_with_connect_info::<SocketAddr>();
            handles.push(tokio::spawn(async move {
                let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;
                axum_server::bind_rustls(https_addr, tls_config)
                    .serve(https_router)
                    .await
                    .map_err(|e| anyhow::anyhow!("HTTPS server error: {e}"))?;
                Ok(())
            }));
        }

        if !handles.is_empty() {
            let (result, _index, _remaining) = futures::future::select_all(handles).await;
            result??;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_generation_does_not_panic() {
        let _doc = ApiDoc::openapi();
    }
}
