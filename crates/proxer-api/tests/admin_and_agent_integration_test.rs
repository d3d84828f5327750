//! Router-level integration tests for the agent control channel, the
//! public proxy path, and the Basic-auth-gated admin surface.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
};
use base64::Engine as _;
use serde_json::{json, Value};
use tower::ServiceExt;

use proxer_api::{ApiServer, ApiServerConfig};
use proxer_proxy::{ProxyPath, ProxyPathConfig};
use proxer_relay_db::MemoryAdapter;
use proxer_session_hub::{SessionHub, SessionHubConfig};
use proxer_store::{ConnectorStore, IncidentStore, PlanStore, RateLimiter, RuleStore};

const ADMIN_USER: &str = "admin";
const ADMIN_PASS: &str = "let-me-in";

fn create_test_server() -> ApiServer {
    let rule_store = Arc::new(RuleStore::new());
    let connector_store = Arc::new(ConnectorStore::new());
    let plan_store = Arc::new(PlanStore::new());
    let incident_store = Arc::new(IncidentStore::new());
    let rate_limiter = Arc::new(RateLimiter::new());

    let session_hub = Arc::new(SessionHub::new(SessionHubConfig {
        agent_token: None,
        public_base_url: "http://localhost:8080".to_string(),
        session_ttl: Duration::from_secs(90),
        max_pending_per_session: 1024,
        max_pending_global: 10_000,
    }));

    let proxy_path = Arc::new(ProxyPath::new(
        rule_store.clone(),
        connector_store.clone(),
        plan_store.clone(),
        incident_store.clone(),
        rate_limiter,
        session_hub.clone(),
        ProxyPathConfig::default(),
    ));

    let password_hash = proxer_auth::hash_password(ADMIN_PASS).unwrap();

    let config = ApiServerConfig {
        http_addr: Some("127.0.0.1:0".parse().unwrap()),
        https_addr: None,
        enable_cors: false,
        cors_origins: None,
        tls_cert_path: None,
        tls_key_path: None,
        super_admin_username: ADMIN_USER.to_string(),
        super_admin_password_hash: password_hash,
    };

    ApiServer::new(
        config,
        rule_store,
        connector_store,
        plan_store,
        incident_store,
        session_hub,
        proxy_path,
        Arc::new(MemoryAdapter::new()),
        "http://localhost:8080".to_string(),
        Duration::from_secs(600),
    )
}

fn basic_auth_header(user: &str, pass: &str) -> String {
    let creds = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
    format!("Basic {creds}")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok_with_no_sessions() {
    let app = create_test_server().build_router();

    let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn admin_surface_rejects_missing_credentials() {
    let app = create_test_server().build_router();

    let request = Request::builder()
        .uri("/api/admin/tenants")
        .method("GET")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_surface_rejects_wrong_password() {
    let app = create_test_server().build_router();

    let request = Request::builder()
        .uri("/api/admin/tenants")
        .method("GET")
        .header("authorization", basic_auth_header(ADMIN_USER, "wrong-password"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_can_create_and_list_tenants() {
    let server = create_test_server();
    let app = server.build_router();

    let create_request = Request::builder()
        .uri("/api/admin/tenants")
        .method("POST")
        .header("authorization", basic_auth_header(ADMIN_USER, ADMIN_PASS))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&json!({"id": "acme", "name": "Acme Corp"})).unwrap()))
        .unwrap();

    let create_response = app.clone().oneshot(create_request).await.unwrap();
    assert_eq!(create_response.status(), StatusCode::OK);
    let created = body_json(create_response).await;
    assert_eq!(created["id"], "acme");

    let list_request = Request::builder()
        .uri("/api/admin/tenants")
        .method("GET")
        .header("authorization", basic_auth_header(ADMIN_USER, ADMIN_PASS))
        .body(Body::empty())
        .unwrap();
    let list_response = app.oneshot(list_request).await.unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
    let tenants = body_json(list_response).await;
    assert_eq!(tenants.as_array().unwrap().len(), 1);
    assert_eq!(tenants[0]["id"], "acme");
}

#[tokio::test]
async fn connector_pairing_flow_issues_a_usable_secret() {
    let server = create_test_server();
    let app = server.build_router();

    let create_tenant = Request::builder()
        .uri("/api/admin/tenants")
        .method("POST")
        .header("authorization", basic_auth_header(ADMIN_USER, ADMIN_PASS))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&json!({"id": "acme", "name": "Acme"})).unwrap()))
        .unwrap();
    assert_eq!(app.clone().oneshot(create_tenant).await.unwrap().status(), StatusCode::OK);

    let create_connector = Request::builder()
        .uri("/api/admin/tenants/acme/connectors")
        .method("POST")
        .header("authorization", basic_auth_header(ADMIN_USER, ADMIN_PASS))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&json!({"name": "edge-1"})).unwrap()))
        .unwrap();
    let connector_response = app.clone().oneshot(create_connector).await.unwrap();
    assert_eq!(connector_response.status(), StatusCode::OK);
    let connector = body_json(connector_response).await;
    let connector_id = connector["id"].as_str().unwrap().to_string();
    assert_eq!(connector["connected"], false);

    let issue_pair_token = Request::builder()
        .uri(format!("/api/admin/connectors/{connector_id}/pair"))
        .method("POST")
        .header("authorization", basic_auth_header(ADMIN_USER, ADMIN_PASS))
        .body(Body::empty())
        .unwrap();
    let pair_token_response = app.clone().oneshot(issue_pair_token).await.unwrap();
    assert_eq!(pair_token_response.status(), StatusCode::OK);
    let pair_token = body_json(pair_token_response).await;
    let token = pair_token["pair_token"].as_str().unwrap().to_string();

    let agent_pair = Request::builder()
        .uri("/api/agent/pair")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_string(&json!({"pair_token": token, "agent_id": "edge-1-instance"})).unwrap(),
        ))
        .unwrap();
    let agent_pair_response = app.clone().oneshot(agent_pair).await.unwrap();
    assert_eq!(agent_pair_response.status(), StatusCode::OK);
    let pair_result = body_json(agent_pair_response).await;
    assert_eq!(pair_result["connector_id"], connector_id);
    assert_eq!(pair_result["tenant_id"], "acme");
    let connector_secret = pair_result["connector_secret"].as_str().unwrap().to_string();

    // Re-pairing with the same token must fail: it's single-use.
    let agent_pair_again = Request::builder()
        .uri("/api/agent/pair")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_string(&json!({"pair_token": token, "agent_id": "edge-1-instance"})).unwrap(),
        ))
        .unwrap();
    assert_eq!(app.clone().oneshot(agent_pair_again).await.unwrap().status(), StatusCode::NOT_FOUND);

    // The issued secret registers a connector-bound session.
    let register = Request::builder()
        .uri("/api/agent/register")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_string(&json!({
                "agent_id": "edge-1-instance",
                "connector_id": connector_id,
                "connector_secret": connector_secret,
            }))
            .unwrap(),
        ))
        .unwrap();
    let register_response = app.oneshot(register).await.unwrap();
    assert_eq!(register_response.status(), StatusCode::OK);
    let registered = body_json(register_response).await;
    assert!(!registered["session_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn legacy_agent_register_exposes_tunnel_in_listing() {
    let server = create_test_server();
    let app = server.build_router();

    let register = Request::builder()
        .uri("/api/agent/register")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_string(&json!({
                "agent_id": "legacy-agent",
                "tunnels": [{"id": "app3000", "target": "http://127.0.0.1:3000", "token": null}],
            }))
            .unwrap(),
        ))
        .unwrap();
    let register_response = app.clone().oneshot(register).await.unwrap();
    assert_eq!(register_response.status(), StatusCode::OK);
    let registered = body_json(register_response).await;
    assert_eq!(registered["tunnels"][0]["id"], "app3000");

    let list_tunnels = Request::builder().uri("/api/tunnels").body(Body::empty()).unwrap();
    let list_response = app.oneshot(list_tunnels).await.unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
    let listed = body_json(list_response).await;
    let tunnels = listed["tunnels"].as_array().unwrap();
    assert!(tunnels.iter().any(|t| t["tunnel_key"] == "app3000" && t["connected"] == true));
}

#[tokio::test]
async fn agent_pull_with_unknown_session_is_unauthorized() {
    let app = create_test_server().build_router();

    let request = Request::builder()
        .uri("/api/agent/pull?session_id=does-not-exist&wait=0")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn proxy_path_returns_not_found_for_unknown_route() {
    let app = create_test_server().build_router();

    let peer: std::net::SocketAddr = "127.0.0.1:54321".parse().unwrap();
    let request = Request::builder()
        .uri("/t/no-such-route")
        .extension(ConnectInfo(peer))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
