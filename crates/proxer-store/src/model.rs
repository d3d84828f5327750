//! Data model shared by the stores (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_TENANT_ID: &str = "default";
pub const BUILTIN_PLAN_FREE: &str = "free";
pub const BUILTIN_PLAN_PRO: &str = "pro";
pub const BUILTIN_PLAN_BUSINESS: &str = "business";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub tenant_id: String,
    pub scheme: Scheme,
    pub host: String,
    pub default_port: u16,
    pub variables: HashMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

/// A route is either `direct` (has `target_url`, no `connector_id`) or
/// `connector-bound` (`connector_id` set, `local_*` describe the upstream on
/// the agent side).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub tenant_id: String,
    pub route_id: String,
    pub target_url: Option<String>,
    pub token: Option<String>,
    pub max_rps: Option<f64>,
    pub connector_id: Option<String>,
    pub local_scheme: Option<Scheme>,
    pub local_host: Option<String>,
    pub local_port: Option<u16>,
    pub local_base_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    pub fn is_connector_bound(&self) -> bool {
        self.connector_id.is_some()
    }

    pub fn tunnel_key(&self) -> String {
        format!("{}/{}", self.tenant_id, self.route_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connector {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub connector_id: String,
    pub secret_hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairToken {
    pub token: String,
    pub connector_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl PairToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub max_routes: u32,
    pub max_connectors: u32,
    pub max_rps: f64,
    pub max_monthly_gb: f64,
    pub tls_enabled: bool,
    pub price_monthly_cents: u64,
    pub public_order: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn max_monthly_bytes(&self) -> u64 {
        (self.max_monthly_gb * (1u64 << 30) as f64) as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageSnapshot {
    pub tenant_id: String,
    pub month: String,
    pub routes_used: u32,
    pub connectors_used: u32,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub requests: u64,
    pub blocked_requests: u64,
    pub warned_80: bool,
    pub warned_95: bool,
    pub updated_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn new(tenant_id: impl Into<String>, month: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            month: month.into(),
            routes_used: 0,
            connectors_used: 0,
            bytes_in: 0,
            bytes_out: 0,
            requests: 0,
            blocked_requests: 0,
            warned_80: false,
            warned_95: false,
            updated_at: now,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_in + self.bytes_out
    }
}

/// Month key in UTC, `"YYYY-MM"` (spec I8).
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemIncident {
    pub id: String,
    pub severity: IncidentSeverity,
    pub source: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// The full persisted payload (spec §4.5): `version=1, saved_at, users,
/// rules, connectors, plans, incidents, tls_records`. `users` and
/// `tls_records` are out-of-scope surfaces kept only as opaque JSON so a
/// snapshot produced by a future admin-CRUD layer round-trips untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotPayload {
    pub version: u32,
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub users: serde_json::Value,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub connectors: Vec<Connector>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
    #[serde(default)]
    pub pair_tokens: Vec<PairToken>,
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub plan_assignments: HashMap<String, String>,
    #[serde(default)]
    pub usage: Vec<UsageSnapshot>,
    #[serde(default)]
    pub incidents: Vec<SystemIncident>,
    #[serde(default)]
    pub tls_records: serde_json::Value,
}
