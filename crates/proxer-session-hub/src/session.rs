//! Session-local state: the tunnels an agent owns and its pull queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use proxer_proto::ProxyRequest;

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub id: String,
    pub target: String,
    pub token: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct TunnelMetrics {
    pub requests: u64,
    pub errors: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub total_latency_ms: u64,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
}

impl TunnelMetrics {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.requests as f64
        }
    }

    fn record(&mut self, response: &proxer_proto::ProxyResponse) {
        self.requests += 1;
        self.bytes_in += response.bytes_in;
        self.bytes_out += response.bytes_out;
        self.total_latency_ms += response.latency_ms;
        self.last_status = Some(response.effective_status());
        if let Some(err) = &response.error {
            self.errors += 1;
            self.last_error = Some(err.clone());
        }
    }
}

/// One connected agent: either a legacy agent owning a fixed set of named
/// tunnels, or a connector-bound agent serving whatever routes point at it.
pub enum SessionKind {
    Legacy {
        tunnels: std::sync::Mutex<HashMap<String, TunnelConfig>>,
    },
    Connector {
        connector_id: String,
    },
}

pub struct Session {
    pub session_id: String,
    pub agent_id: String,
    pub kind: SessionKind,
    pub queue_tx: mpsc::Sender<ProxyRequest>,
    pub queue_rx: AsyncMutex<mpsc::Receiver<ProxyRequest>>,
    last_seen_millis: AtomicI64,
    pub metrics: std::sync::Mutex<HashMap<String, TunnelMetrics>>,
    pending_count: AtomicU64,
}

impl Session {
    pub fn new_legacy(session_id: String, agent_id: String, capacity: usize, tunnels: HashMap<String, TunnelConfig>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            session_id,
            agent_id,
            kind: SessionKind::Legacy {
                tunnels: std::sync::Mutex::new(tunnels),
            },
            queue_tx: tx,
            queue_rx: AsyncMutex::new(rx),
            last_seen_millis: AtomicI64::new(Utc::now().timestamp_millis()),
            metrics: std::sync::Mutex::new(HashMap::new()),
            pending_count: AtomicU64::new(0),
        }
    }

    pub fn new_connector(session_id: String, agent_id: String, connector_id: String, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            session_id,
            agent_id,
            kind: SessionKind::Connector { connector_id },
            queue_tx: tx,
            queue_rx: AsyncMutex::new(rx),
            last_seen_millis: AtomicI64::new(Utc::now().timestamp_millis()),
            metrics: std::sync::Mutex::new(HashMap::new()),
            pending_count: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        self.last_seen_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_seen_millis(&self) -> i64 {
        self.last_seen_millis.load(Ordering::Relaxed)
    }

    pub fn is_stale(&self, ttl_millis: i64, now_millis: i64) -> bool {
        now_millis - self.last_seen_millis() > ttl_millis
    }

    pub fn connector_id(&self) -> Option<&str> {
        match &self.kind {
            SessionKind::Connector { connector_id } => Some(connector_id.as_str()),
            SessionKind::Legacy { .. } => None,
        }
    }

    pub fn tunnel_ids(&self) -> Vec<String> {
        match &self.kind {
            SessionKind::Legacy { tunnels } => tunnels.lock().unwrap().keys().cloned().collect(),
            SessionKind::Connector { .. } => Vec::new(),
        }
    }

    pub fn tunnel_config(&self, tunnel_id: &str) -> Option<TunnelConfig> {
        match &self.kind {
            SessionKind::Legacy { tunnels } => tunnels.lock().unwrap().get(tunnel_id).cloned(),
            SessionKind::Connector { .. } => None,
        }
    }

    pub fn record_response(&self, tunnel_key: &str, response: &proxer_proto::ProxyResponse) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.entry(tunnel_key.to_string()).or_default().record(response);
    }

    pub fn snapshot_metrics(&self) -> HashMap<String, TunnelMetrics> {
        self.metrics.lock().unwrap().clone()
    }

    pub fn inc_pending(&self) -> u64 {
        self.pending_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dec_pending(&self) {
        self.pending_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn pending_count(&self) -> u64 {
        self.pending_count.load(Ordering::Relaxed)
    }
}
