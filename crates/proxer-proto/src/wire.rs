//! Records exchanged over the HTTP control channel between the gateway and
//! connector agents, and the `/api/agent/*` request/response bodies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Body bytes are carried as base64 in JSON, matching how agents that are
/// not themselves Rust (any HTTP client) can produce/consume the wire
/// format without a binary encoding.
mod base64_body {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Upstream target reachable from inside the connector agent's network,
/// used for connector-bound routes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LocalTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

/// A request dispatched to an agent session, awaiting a [`ProxyResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProxyRequest {
    pub request_id: String,
    pub tunnel_id: String,
    pub connector_id: Option<String>,
    pub local_target: Option<LocalTarget>,
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, Vec<String>>,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    pub remote_addr: String,
}

/// The agent's answer to a [`ProxyRequest`], matched by `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProxyResponse {
    pub request_id: String,
    pub tunnel_id: String,
    pub status: u16,
    pub headers: HashMap<String, Vec<String>>,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProxyResponse {
    /// Status defaults to 502 when the agent (or a synthesized direct-forward
    /// response) reports a non-positive status.
    pub fn effective_status(&self) -> u16 {
        if self.status == 0 {
            502
        } else {
            self.status
        }
    }
}

/// One entry of the `tunnels[]` array in a legacy `register` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TunnelRegistration {
    pub id: String,
    pub target: String,
    pub token: Option<String>,
}

/// One entry of the `tunnels[]` array returned from `register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TunnelSummary {
    pub id: String,
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentRegisterRequest {
    pub agent_id: String,
    pub token: Option<String>,
    pub connector_id: Option<String>,
    pub connector_secret: Option<String>,
    #[serde(default)]
    pub tunnels: Vec<TunnelRegistration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentRegisterResponse {
    pub session_id: String,
    pub public_base_url: String,
    pub tunnels: Vec<TunnelSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentPullResponse {
    pub request: ProxyRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentRespondRequest {
    pub session_id: String,
    pub response: ProxyResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentHeartbeatRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentPairRequest {
    pub pair_token: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentPairResponse {
    pub connector_id: String,
    pub connector_secret: String,
    pub tenant_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_response_defaults_status_to_bad_gateway() {
        let resp = ProxyResponse {
            request_id: "req-1".into(),
            tunnel_id: "default/web".into(),
            status: 0,
            headers: HashMap::new(),
            body: vec![],
            bytes_in: 0,
            bytes_out: 0,
            latency_ms: 0,
            error: None,
        };
        assert_eq!(resp.effective_status(), 502);
    }

    #[test]
    fn proxy_request_round_trips_through_json() {
        let req = ProxyRequest {
            request_id: "req-1".into(),
            tunnel_id: "default/web".into(),
            connector_id: None,
            local_target: Some(LocalTarget {
                scheme: "http".into(),
                host: "127.0.0.1".into(),
                port: 3000,
            }),
            method: "GET".into(),
            path: "/hello".into(),
            query: "x=1".into(),
            headers: HashMap::new(),
            body: b"hello world".to_vec(),
            remote_addr: "203.0.113.1".into(),
        };

        let json = serde_json::to_string(&req).unwrap();
        let round_tripped: ProxyRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped.body, req.body);
        assert_eq!(round_tripped.path, "/hello");
    }
}
