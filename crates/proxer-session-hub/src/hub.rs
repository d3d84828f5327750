use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};

use proxer_proto::{LocalTarget, ProxyRequest, ProxyResponse};

use crate::error::HubError;
use crate::ids::{next_request_id, next_session_id};
use crate::session::{Session, TunnelConfig, TunnelMetrics};

const LATENCY_WINDOW: usize = 512;

pub struct SessionHubConfig {
    pub agent_token: Option<String>,
    pub public_base_url: String,
    pub session_ttl: Duration,
    pub max_pending_per_session: usize,
    pub max_pending_global: usize,
}

impl Default for SessionHubConfig {
    fn default() -> Self {
        Self {
            agent_token: None,
            public_base_url: "http://localhost:8080".to_string(),
            session_ttl: Duration::from_secs(90),
            max_pending_per_session: 1024,
            max_pending_global: 10_000,
        }
    }
}

/// A tunnel registration request as presented by `register_legacy`. Legacy
/// agents forward to their own local target, so `target` is carried only as
/// display metadata (spec §4.1); connector-bound dispatch is the path that
/// needs a resolvable [`LocalTarget`].
pub struct TunnelRegistration {
    pub id: String,
    pub target: String,
    pub token: Option<String>,
}

/// Request components supplied by the proxy path; the hub fills in
/// `request_id`/`tunnel_id`/`connector_id` before handing it to the agent.
/// `local_target` is `Some` only for connector-bound dispatch.
pub struct DispatchRequest {
    pub local_target: Option<LocalTarget>,
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: std::collections::HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
    pub remote_addr: String,
}

struct PendingEntry {
    session_id: String,
    tunnel_key: String,
    tx: oneshot::Sender<ProxyResponse>,
}

#[derive(Debug, Clone)]
pub struct TunnelSummary {
    pub tunnel_key: String,
    pub session_id: String,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct HubStatus {
    pub sessions: usize,
    pub pending: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ConnectorConnection {
    pub session_id: String,
    pub agent_id: String,
    pub connected: bool,
}

/// The rendezvous point between the long-poll agent connection and the
/// public proxy path (spec §4.1). A session owns exactly one agent
/// connection; dispatch hands a `ProxyRequest` to the session's queue and
/// awaits a one-shot reply correlated by `request_id`.
pub struct SessionHub {
    config: SessionHubConfig,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    agent_index: RwLock<HashMap<String, String>>,
    connector_index: RwLock<HashMap<String, String>>,
    tunnel_index: RwLock<HashMap<String, String>>,
    pending: DashMap<String, PendingEntry>,
    latencies: std::sync::Mutex<VecDeque<u64>>,
}

impl SessionHub {
    pub fn new(config: SessionHubConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            agent_index: RwLock::new(HashMap::new()),
            connector_index: RwLock::new(HashMap::new()),
            tunnel_index: RwLock::new(HashMap::new()),
            pending: DashMap::new(),
            latencies: std::sync::Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    fn check_token(&self, token: &str) -> Result<(), HubError> {
        match &self.config.agent_token {
            Some(expected) if proxer_auth::constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
                Ok(())
            }
            Some(_) => Err(HubError::Unauthorized),
            None => Ok(()),
        }
    }

    /// Evicts sessions whose `last_seen` exceeds `session_ttl`, releasing
    /// their tunnel/connector ownership and resolving any in-flight pending
    /// requests with `SessionEvictedMidDispatch`.
    async fn evict_stale(&self) {
        let now = Utc::now().timestamp_millis();
        let ttl_millis = self.config.session_ttl.as_millis() as i64;

        let stale: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.is_stale(ttl_millis, now))
                .cloned()
                .collect()
        };

        for session in stale {
            self.evict_session(&session.session_id).await;
        }
    }

    async fn evict_session(&self, session_id: &str) {
        let removed = { self.sessions.write().await.remove(session_id) };
        let Some(session) = removed else { return };

        self.agent_index.write().await.remove(&session.agent_id);
        if let Some(connector_id) = session.connector_id() {
            self.connector_index.write().await.remove(connector_id);
        }
        {
            let mut tunnels = self.tunnel_index.write().await;
            tunnels.retain(|_, owner| owner != session_id);
        }

        let stranded: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.value().session_id == session_id)
            .map(|e| e.key().clone())
            .collect();
        for request_id in stranded {
            if let Some((_, entry)) = self.pending.remove(&request_id) {
                let _ = entry.tx; // dropping resolves the waiter's oneshot with RecvError
            }
        }

        warn!(session_id, agent_id = %session.agent_id, "session evicted (stale)");
    }

    pub async fn register_legacy(
        &self,
        agent_id: &str,
        token: &str,
        tunnels: Vec<TunnelRegistration>,
    ) -> Result<(String, Vec<(String, String)>), HubError> {
        self.check_token(token)?;
        if tunnels.is_empty() {
            return Err(HubError::BadRequest("at least one tunnel is required".into()));
        }
        for reg in &tunnels {
            proxer_proto::validate_identifier(&reg.id)
                .map_err(|e| HubError::BadRequest(e.to_string()))?;
        }

        self.evict_stale().await;
        self.evict_agent(agent_id).await;

        let session_id = next_session_id();
        let mut tunnel_map = HashMap::new();
        let mut routes = Vec::new();
        {
            let mut tunnel_index = self.tunnel_index.write().await;
            for reg in tunnels {
                if let Some(prior_owner) = tunnel_index.get(&reg.id).cloned() {
                    self.evict_session(&prior_owner).await;
                }
                routes.push((
                    reg.id.clone(),
                    format!("{}/t/{}", self.config.public_base_url.trim_end_matches('/'), reg.id),
                ));
                tunnel_map.insert(
                    reg.id.clone(),
                    TunnelConfig {
                        id: reg.id.clone(),
                        target: reg.target,
                        token: reg.token,
                    },
                );
                tunnel_index.insert(reg.id.clone(), session_id.clone());
            }
        }

        let session = Arc::new(Session::new_legacy(
            session_id.clone(),
            agent_id.to_string(),
            self.config.max_pending_per_session,
            tunnel_map,
        ));
        self.sessions.write().await.insert(session_id.clone(), session);
        self.agent_index
            .write()
            .await
            .insert(agent_id.to_string(), session_id.clone());

        info!(session_id, agent_id, "legacy agent registered");
        Ok((session_id, routes))
    }

    pub async fn register_connector(
        &self,
        agent_id: &str,
        connector_id: &str,
        token: &str,
    ) -> Result<String, HubError> {
        self.check_token(token)?;
        proxer_proto::validate_identifier(connector_id)
            .map_err(|e| HubError::BadRequest(e.to_string()))?;

        self.evict_stale().await;
        self.evict_agent(agent_id).await;
        if let Some(prior_owner) = self.connector_index.read().await.get(connector_id).cloned() {
            self.evict_session(&prior_owner).await;
        }

        let session_id = next_session_id();
        let session = Arc::new(Session::new_connector(
            session_id.clone(),
            agent_id.to_string(),
            connector_id.to_string(),
            self.config.max_pending_per_session,
        ));
        self.sessions.write().await.insert(session_id.clone(), session);
        self.agent_index
            .write()
            .await
            .insert(agent_id.to_string(), session_id.clone());
        self.connector_index
            .write()
            .await
            .insert(connector_id.to_string(), session_id.clone());

        info!(session_id, agent_id, connector_id, "connector agent registered");
        Ok(session_id)
    }

    async fn evict_agent(&self, agent_id: &str) {
        if let Some(prior) = self.agent_index.read().await.get(agent_id).cloned() {
            self.evict_session(&prior).await;
        }
    }

    pub async fn heartbeat(&self, session_id: &str) -> Result<(), HubError> {
        self.evict_stale().await;
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| HubError::UnknownSession(session_id.to_string()))?;
        session.touch();
        Ok(())
    }

    pub async fn pull(&self, session_id: &str, wait: Duration) -> Result<Option<ProxyRequest>, HubError> {
        self.evict_stale().await;
        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| HubError::UnknownSession(session_id.to_string()))?
        };
        session.touch();

        let mut rx = session.queue_rx.lock().await;
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(request)) => Ok(Some(request)),
            Ok(None) => Err(HubError::UnknownSession(session_id.to_string())),
            Err(_elapsed) => Ok(None),
        }
    }

    pub async fn respond(&self, session_id: &str, response: ProxyResponse) -> Result<(), HubError> {
        self.evict_stale().await;
        let (_, entry) = self
            .pending
            .remove(&response.request_id)
            .ok_or_else(|| HubError::UnknownPending(response.request_id.clone()))?;

        if entry.session_id != session_id {
            // Put it back; a different session than the owner tried to answer it.
            self.pending.insert(response.request_id.clone(), entry);
            return Err(HubError::SessionMismatch(response.request_id));
        }
        if !response.tunnel_id.is_empty() && response.tunnel_id != entry.tunnel_key {
            self.pending.insert(response.request_id.clone(), entry);
            return Err(HubError::TunnelMismatch(response.request_id));
        }

        if let Some(sessions) = self.sessions.read().await.get(session_id) {
            sessions.touch();
            sessions.record_response(&entry.tunnel_key, &response);
            sessions.dec_pending();
        }
        self.record_latency(response.latency_ms);
        let _ = entry.tx.send(response);
        Ok(())
    }

    fn record_latency(&self, latency_ms: u64) {
        let mut latencies = self.latencies.lock().unwrap();
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency_ms);
    }

    /// Resolves `tunnel_key` to a connected session and round-trips a
    /// request through the long-poll queue, awaiting the agent's reply up to
    /// `timeout`.
    pub async fn dispatch(
        &self,
        tunnel_key: &str,
        request: DispatchRequest,
        timeout: Duration,
    ) -> Result<ProxyResponse, HubError> {
        self.evict_stale().await;
        let session_id = self
            .tunnel_index
            .read()
            .await
            .get(tunnel_key)
            .cloned()
            .ok_or_else(|| HubError::TunnelNotConnected(tunnel_key.to_string()))?;

        self.dispatch_to_session(&session_id, tunnel_key, None, request, timeout)
            .await
    }

    pub async fn dispatch_to_connector(
        &self,
        connector_id: &str,
        tunnel_key: &str,
        request: DispatchRequest,
        timeout: Duration,
    ) -> Result<ProxyResponse, HubError> {
        self.evict_stale().await;
        let session_id = self
            .connector_index
            .read()
            .await
            .get(connector_id)
            .cloned()
            .ok_or_else(|| HubError::ConnectorNotConnected(connector_id.to_string()))?;

        self.dispatch_to_session(&session_id, tunnel_key, Some(connector_id), request, timeout)
            .await
    }

    async fn dispatch_to_session(
        &self,
        session_id: &str,
        tunnel_key: &str,
        connector_id: Option<&str>,
        request: DispatchRequest,
        timeout: Duration,
    ) -> Result<ProxyResponse, HubError> {
        if self.pending.len() >= self.config.max_pending_global {
            return Err(HubError::GlobalBackpressure);
        }

        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| HubError::TunnelNotConnected(tunnel_key.to_string()))?
        };

        let request_id = next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id.clone(),
            PendingEntry {
                session_id: session_id.to_string(),
                tunnel_key: tunnel_key.to_string(),
                tx,
            },
        );
        session.inc_pending();

        let proxy_request = ProxyRequest {
            request_id: request_id.clone(),
            tunnel_id: tunnel_key.to_string(),
            connector_id: connector_id.map(|s| s.to_string()),
            local_target: request.local_target,
            method: request.method,
            path: request.path,
            query: request.query,
            headers: request.headers,
            body: request.body,
            remote_addr: request.remote_addr,
        };

        if session.queue_tx.try_send(proxy_request).is_err() {
            self.pending.remove(&request_id);
            session.dec_pending();
            return Err(HubError::AgentQueueFull);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_recv_error)) => {
                self.pending.remove(&request_id);
                session.dec_pending();
                Err(HubError::SessionEvictedMidDispatch(session_id.to_string()))
            }
            Err(_elapsed) => {
                self.pending.remove(&request_id);
                session.dec_pending();
                Err(HubError::ProxyRequestTimeout)
            }
        }
    }

    pub async fn tunnel_connected(&self, tunnel_key: &str) -> bool {
        self.evict_stale().await;
        self.tunnel_index.read().await.contains_key(tunnel_key)
    }

    /// The access token a legacy tunnel was registered with, if any (spec
    /// §4.2 "Access-token gate": "any candidate tunnel (legacy mode)
    /// declares a non-empty token").
    pub async fn tunnel_token(&self, tunnel_key: &str) -> Option<String> {
        let session_id = self.tunnel_index.read().await.get(tunnel_key).cloned()?;
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .and_then(|s| s.tunnel_config(tunnel_key))
            .and_then(|c| c.token)
    }

    pub async fn snapshot_tunnels(&self) -> Vec<TunnelSummary> {
        let tunnel_index = self.tunnel_index.read().await;
        let sessions = self.sessions.read().await;
        tunnel_index
            .iter()
            .map(|(tunnel_key, session_id)| TunnelSummary {
                tunnel_key: tunnel_key.clone(),
                session_id: session_id.clone(),
                connected: sessions.contains_key(session_id),
            })
            .collect()
    }

    pub async fn get_connector_connection(&self, connector_id: &str) -> Option<ConnectorConnection> {
        let session_id = self.connector_index.read().await.get(connector_id).cloned()?;
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).map(|s| ConnectorConnection {
            session_id: s.session_id.clone(),
            agent_id: s.agent_id.clone(),
            connected: true,
        })
    }

    pub async fn tunnel_metrics(&self, tunnel_key: &str) -> Option<TunnelMetrics> {
        let session_id = self.tunnel_index.read().await.get(tunnel_key).cloned()?;
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .and_then(|s| s.snapshot_metrics().get(tunnel_key).cloned())
    }

    pub async fn status(&self) -> HubStatus {
        let sessions = self.sessions.read().await.len();
        let pending = self.pending.len();
        let (p50_ms, p95_ms) = self.latency_percentiles();
        HubStatus {
            sessions,
            pending,
            p50_ms,
            p95_ms,
        }
    }

    fn latency_percentiles(&self) -> (u64, u64) {
        let latencies = self.latencies.lock().unwrap();
        if latencies.is_empty() {
            return (0, 0);
        }
        let mut sorted: Vec<u64> = latencies.iter().copied().collect();
        sorted.sort_unstable();
        let idx_p50 = (sorted.len().saturating_sub(1)) * 50 / 100;
        let idx_p95 = (sorted.len().saturating_sub(1)) * 95 / 100;
        (sorted[idx_p50], sorted[idx_p95])
    }
}
