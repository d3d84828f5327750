//! Rendezvous between the public proxy path and long-polling connector
//! agents: session bookkeeping, tunnel/connector ownership, and the
//! one-shot-per-request dispatch queue.

pub mod error;
pub mod hub;
mod ids;
pub mod session;

pub use error::HubError;
pub use hub::{
    ConnectorConnection, DispatchRequest, HubStatus, SessionHub, SessionHubConfig, TunnelRegistration,
    TunnelSummary,
};
pub use session::TunnelMetrics;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use proxer_proto::LocalTarget;

    use super::*;

    fn hub() -> SessionHub {
        SessionHub::new(SessionHubConfig {
            agent_token: Some("secret-token".to_string()),
            public_base_url: "https://gw.example.com".to_string(),
            session_ttl: Duration::from_millis(200),
            max_pending_per_session: 8,
            max_pending_global: 32,
        })
    }

    fn tunnel(id: &str) -> TunnelRegistration {
        TunnelRegistration {
            id: id.to_string(),
            target: "127.0.0.1:3000".to_string(),
            token: None,
        }
    }

    #[tokio::test]
    async fn register_rejects_bad_token() {
        let hub = hub();
        let err = hub
            .register_legacy("agent-1", "wrong", vec![tunnel("web")])
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Unauthorized));
    }

    #[tokio::test]
    async fn register_requires_at_least_one_tunnel() {
        let hub = hub();
        let err = hub
            .register_legacy("agent-1", "secret-token", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::BadRequest(_)));
    }

    #[tokio::test]
    async fn dispatch_round_trips_through_pull_and_respond() {
        let hub = hub();
        let (session_id, routes) = hub
            .register_legacy("agent-1", "secret-token", vec![tunnel("web")])
            .await
            .unwrap();
        assert_eq!(routes.len(), 1);
        assert!(routes[0].1.ends_with("/t/web"));

        let hub_ref = &hub;
        let dispatch = async {
            hub_ref
                .dispatch(
                    "web",
                    DispatchRequest {
                        local_target: None,
                        method: "GET".to_string(),
                        path: "/hello".to_string(),
                        query: String::new(),
                        headers: HashMap::new(),
                        body: vec![],
                        remote_addr: "203.0.113.1".to_string(),
                    },
                    Duration::from_secs(1),
                )
                .await
        };

        let respond_side = async {
            let request = hub_ref
                .pull(&session_id, Duration::from_secs(1))
                .await
                .unwrap()
                .expect("a request should be queued");
            assert_eq!(request.path, "/hello");

            hub_ref
                .respond(
                    &session_id,
                    proxer_proto::ProxyResponse {
                        request_id: request.request_id,
                        tunnel_id: "web".to_string(),
                        status: 200,
                        headers: HashMap::new(),
                        body: b"hi".to_vec(),
                        bytes_in: 0,
                        bytes_out: 2,
                        latency_ms: 5,
                        error: None,
                    },
                )
                .await
                .unwrap();
        };

        let (response, _) = tokio::join!(dispatch, respond_side);
        let response = response.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hi");
    }

    #[tokio::test]
    async fn dispatch_against_unknown_tunnel_fails_bad_gateway() {
        let hub = hub();
        let err = hub
            .dispatch(
                "missing",
                DispatchRequest {
                    local_target: None,
                    method: "GET".to_string(),
                    path: "/".to_string(),
                    query: String::new(),
                    headers: HashMap::new(),
                    body: vec![],
                    remote_addr: "203.0.113.1".to_string(),
                },
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::TunnelNotConnected(_)));
        assert_eq!(err.kind(), proxer_proto::ErrorKind::BadGateway);
    }

    #[tokio::test]
    async fn dispatch_times_out_when_agent_never_responds() {
        let hub = hub();
        hub.register_legacy("agent-1", "secret-token", vec![tunnel("web")])
            .await
            .unwrap();

        let err = hub
            .dispatch(
                "web",
                DispatchRequest {
                    local_target: None,
                    method: "GET".to_string(),
                    path: "/".to_string(),
                    query: String::new(),
                    headers: HashMap::new(),
                    body: vec![],
                    remote_addr: "203.0.113.1".to_string(),
                },
                Duration::from_millis(30),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::ProxyRequestTimeout));
    }

    #[tokio::test]
    async fn reregistering_same_agent_evicts_prior_session() {
        let hub = hub();
        let (first_session, _) = hub
            .register_legacy("agent-1", "secret-token", vec![tunnel("web")])
            .await
            .unwrap();
        let (second_session, _) = hub
            .register_legacy("agent-1", "secret-token", vec![tunnel("web")])
            .await
            .unwrap();
        assert_ne!(first_session, second_session);

        assert!(matches!(
            hub.heartbeat(&first_session).await,
            Err(HubError::UnknownSession(_))
        ));
        assert!(hub.heartbeat(&second_session).await.is_ok());
    }

    #[tokio::test]
    async fn connector_registration_round_trips_with_explicit_target() {
        let hub = hub();
        let session_id = hub
            .register_connector("agent-9", "conn-1", "secret-token")
            .await
            .unwrap();

        let conn = hub.get_connector_connection("conn-1").await.unwrap();
        assert_eq!(conn.session_id, session_id);

        let hub_ref = &hub;
        let dispatch = hub_ref.dispatch_to_connector(
            "conn-1",
            "default/web",
            DispatchRequest {
                local_target: Some(LocalTarget {
                    scheme: "http".to_string(),
                    host: "10.0.0.5".to_string(),
                    port: 8080,
                }),
                method: "GET".to_string(),
                path: "/".to_string(),
                query: String::new(),
                headers: HashMap::new(),
                body: vec![],
                remote_addr: "203.0.113.1".to_string(),
            },
            Duration::from_secs(1),
        );

        let respond = async {
            let request = hub_ref
                .pull(&session_id, Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(request.local_target.unwrap().port, 8080);
            hub_ref
                .respond(
                    &session_id,
                    proxer_proto::ProxyResponse {
                        request_id: request.request_id,
                        tunnel_id: "default/web".to_string(),
                        status: 204,
                        headers: HashMap::new(),
                        body: vec![],
                        bytes_in: 0,
                        bytes_out: 0,
                        latency_ms: 1,
                        error: None,
                    },
                )
                .await
                .unwrap();
        };

        let (response, _) = tokio::join!(dispatch, respond);
        assert_eq!(response.unwrap().status, 204);
    }

    #[tokio::test]
    async fn pull_returns_none_when_queue_is_empty() {
        let hub = hub();
        let (session_id, _) = hub
            .register_legacy("agent-1", "secret-token", vec![tunnel("web")])
            .await
            .unwrap();
        let result = hub.pull(&session_id, Duration::from_millis(30)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn respond_with_wrong_session_is_rejected() {
        let hub = hub();
        let (_session_id, _) = hub
            .register_legacy("agent-1", "secret-token", vec![tunnel("web")])
            .await
            .unwrap();
        let (other_session, _) = hub
            .register_legacy("agent-2", "secret-token", vec![tunnel("db")])
            .await
            .unwrap();

        let err = hub
            .respond(
                &other_session,
                proxer_proto::ProxyResponse {
                    request_id: "req-does-not-exist".to_string(),
                    tunnel_id: "web".to_string(),
                    status: 200,
                    headers: HashMap::new(),
                    body: vec![],
                    bytes_in: 0,
                    bytes_out: 0,
                    latency_ms: 1,
                    error: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::UnknownPending(_)));
    }

    #[tokio::test]
    async fn stale_sessions_are_evicted_and_pending_requests_fail() {
        let hub = hub();
        let (session_id, _) = hub
            .register_legacy("agent-1", "secret-token", vec![tunnel("web")])
            .await
            .unwrap();

        let hub_ref = &hub;
        let dispatch = hub_ref.dispatch(
            "web",
            DispatchRequest {
                local_target: None,
                method: "GET".to_string(),
                path: "/".to_string(),
                query: String::new(),
                headers: HashMap::new(),
                body: vec![],
                remote_addr: "203.0.113.1".to_string(),
            },
            Duration::from_millis(500),
        );

        // Let the session go stale (ttl=200ms) without ever pulling or
        // heartbeating; the next hub operation should evict it and resolve
        // the in-flight dispatch rather than hang until the timeout.
        let sleep_then_touch_other = async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let _ = hub_ref.heartbeat(&session_id).await; // triggers evict_stale as a side effect
        };

        let (response, _) = tokio::join!(dispatch, sleep_then_touch_other);
        assert!(response.is_err());
    }
}
