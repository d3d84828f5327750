//! The end-to-end handler for `/t/...`: route resolution, multi-tenant
//! admission, dispatch selection, and response write-back (spec §4.2).

pub mod admission;
pub mod error;
pub mod forward;
pub mod headers;
pub mod resolve;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use proxer_proto::LocalTarget;
use proxer_store::{CapCrossing, ConnectorStore, IncidentStore, PlanStore, RateLimiter, RuleStore};

use crate::error::ProxyPathError;
use crate::forward::DirectForwarder;
use crate::headers::{apply_forwarded_headers, strip_hop_by_hop, ProxerMarkers};
use crate::resolve::{candidate_tunnel_keys, resolve_route_path};

pub struct ProxyPathConfig {
    pub max_request_body_bytes: usize,
    pub max_response_body_bytes: usize,
    pub proxy_request_timeout: Duration,
}

impl Default for ProxyPathConfig {
    fn default() -> Self {
        Self {
            max_request_body_bytes: 10 * (1 << 20),
            max_response_body_bytes: 20 * (1 << 20),
            proxy_request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ProxyPath {
    pub rule_store: Arc<RuleStore>,
    pub connector_store: Arc<ConnectorStore>,
    pub plan_store: Arc<PlanStore>,
    pub incident_store: Arc<IncidentStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub session_hub: Arc<proxer_session_hub::SessionHub>,
    pub config: ProxyPathConfig,
    forwarder: DirectForwarder,
}

pub struct InboundRequest {
    pub method: String,
    /// Path after stripping the `/t` prefix, e.g. `/app3000/hello`.
    pub path_after_prefix: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub remote_addr: String,
    pub host: String,
    pub is_tls: bool,
}

pub struct ProxyOutcome {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyPath {
    pub fn new(
        rule_store: Arc<RuleStore>,
        connector_store: Arc<ConnectorStore>,
        plan_store: Arc<PlanStore>,
        incident_store: Arc<IncidentStore>,
        rate_limiter: Arc<RateLimiter>,
        session_hub: Arc<proxer_session_hub::SessionHub>,
        config: ProxyPathConfig,
    ) -> Self {
        Self {
            rule_store,
            connector_store,
            plan_store,
            incident_store,
            rate_limiter,
            session_hub,
            config,
            forwarder: DirectForwarder::new(),
        }
    }

    pub async fn handle(&self, request: InboundRequest) -> Result<ProxyOutcome, ProxyPathError> {
        if request.body.len() > self.config.max_request_body_bytes {
            return Err(ProxyPathError::RequestTooLarge(request.body.len()));
        }

        let resolved = self.resolve(&request.path_after_prefix).await?;
        let route = self.rule_store.get_route(&resolved.tenant_id, &resolved.route_id);
        let plan = self.plan_store.plan_for_tenant(&resolved.tenant_id);
        let tunnel_key = route
            .as_ref()
            .map(|r| r.tunnel_key())
            .unwrap_or_else(|| format!("{}/{}", resolved.tenant_id, resolved.route_id));

        self.check_admission(&resolved.tenant_id, &resolved.route_id, &route, &plan)
            .await?;

        self.check_access_gate(&tunnel_key, &route, &request).await?;

        let headers_in = strip_hop_by_hop(request.headers.clone());

        let (status, mut response_headers, body, bytes_in, bytes_out, request_id) = if let Some(route) = &route {
            if route.is_connector_bound() {
                self.dispatch_connector(route, &resolved.forward_path, &request, headers_in)
                    .await?
            } else {
                let mut connected_key = None;
                for key in candidate_tunnel_keys(&resolved.tenant_id, &resolved.route_id) {
                    if self.session_hub.tunnel_connected(&key).await {
                        connected_key = Some(key);
                        break;
                    }
                }
                match connected_key {
                    Some(key) => self.dispatch_tunnel(&key, &resolved, &request, headers_in).await?,
                    None => {
                        self.dispatch_direct(route, &resolved.forward_path, &request, headers_in)
                            .await?
                    }
                }
            }
        } else {
            let mut connected_key = None;
            for key in candidate_tunnel_keys(&resolved.tenant_id, &resolved.route_id) {
                if self.session_hub.tunnel_connected(&key).await {
                    connected_key = Some(key);
                    break;
                }
            }
            match connected_key {
                Some(key) => self.dispatch_tunnel(&key, &resolved, &request, headers_in).await?,
                None => return Err(ProxyPathError::NotFound),
            }
        };

        ProxerMarkers {
            request_id: &request_id,
            tunnel_id: &resolved.route_id,
            tunnel_key: &tunnel_key,
            tenant_id: &resolved.tenant_id,
            route_id: &resolved.route_id,
        }
        .apply(&mut response_headers);

        self.record_usage(&resolved.tenant_id, &plan, bytes_in, bytes_out).await;

        Ok(ProxyOutcome {
            status,
            headers: response_headers,
            body,
        })
    }

    async fn resolve(&self, path_after_prefix: &str) -> Result<resolve::ResolvedPath, ProxyPathError> {
        let trimmed = path_after_prefix.trim_start_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let known = if segments.len() >= 2 {
            let (tenant, route) = (segments[0], segments[1]);
            if self.rule_store.route_exists(tenant, route) {
                true
            } else {
                let mut connected = false;
                for key in candidate_tunnel_keys(tenant, route) {
                    if self.session_hub.tunnel_connected(&key).await {
                        connected = true;
                        break;
                    }
                }
                connected
            }
        } else {
            false
        };

        resolve_route_path(path_after_prefix, |_, _| known).ok_or(ProxyPathError::EmptyPath)
    }

    async fn check_admission(
        &self,
        tenant_id: &str,
        route_id: &str,
        route: &Option<proxer_store::Route>,
        plan: &proxer_store::Plan,
    ) -> Result<(), ProxyPathError> {
        let now = Utc::now();

        if !self.rate_limiter.allow(tenant_id, plan.max_rps) {
            self.plan_store.record_blocked_request(tenant_id, now);
            return Err(ProxyPathError::TenantRateLimited {
                tenant_id: tenant_id.to_string(),
                plan_id: plan.id.clone(),
            });
        }

        let route_rate = admission::effective_route_rate(
            route.as_ref().and_then(|r| r.max_rps),
            plan.max_rps,
            plan.max_routes,
        );
        let route_key = format!("route:{tenant_id}/{route_id}");
        if !self.rate_limiter.allow(&route_key, route_rate) {
            self.plan_store.record_blocked_request(tenant_id, now);
            return Err(ProxyPathError::RouteRateLimited {
                tenant_id: tenant_id.to_string(),
                route_id: route_id.to_string(),
                plan_id: plan.id.clone(),
            });
        }

        let usage = self.plan_store.usage_for_tenant(tenant_id, now);
        if usage.total_bytes() >= plan.max_monthly_bytes() {
            self.plan_store.record_blocked_request(tenant_id, now);
            return Err(ProxyPathError::MonthlyCapExceeded {
                tenant_id: tenant_id.to_string(),
                plan_id: plan.id.clone(),
            });
        }

        Ok(())
    }

    async fn check_access_gate(
        &self,
        tunnel_key: &str,
        route: &Option<proxer_store::Route>,
        request: &InboundRequest,
    ) -> Result<(), ProxyPathError> {
        let required = match route {
            Some(route) => route.token.clone(),
            None => self.session_hub.tunnel_token(tunnel_key).await,
        };
        match proxer_http_auth::check_access_token(required.as_deref(), &request.headers, &request.query) {
            proxer_http_auth::GateResult::Allowed => Ok(()),
            proxer_http_auth::GateResult::Denied => Err(ProxyPathError::AccessDenied),
        }
    }

    async fn dispatch_tunnel(
        &self,
        tunnel_key: &str,
        resolved: &resolve::ResolvedPath,
        request: &InboundRequest,
        headers_in: Vec<(String, String)>,
    ) -> Result<(u16, Vec<(String, String)>, Vec<u8>, u64, u64, String), ProxyPathError> {
        let mut headers_out = headers_in;
        apply_forwarded_headers(&mut headers_out, &request.host, request.is_tls, &request.remote_addr);

        let response = self
            .session_hub
            .dispatch(
                tunnel_key,
                proxer_session_hub::DispatchRequest {
                    local_target: None,
                    method: request.method.clone(),
                    path: resolved.forward_path.clone(),
                    query: request.query.clone(),
                    headers: to_header_map(&headers_out),
                    body: request.body.clone(),
                    remote_addr: request.remote_addr.clone(),
                },
                self.config.proxy_request_timeout,
            )
            .await?;

        self.finish_agent_response(response)
    }

    async fn dispatch_connector(
        &self,
        route: &proxer_store::Route,
        forward_path: &str,
        request: &InboundRequest,
        headers_in: Vec<(String, String)>,
    ) -> Result<(u16, Vec<(String, String)>, Vec<u8>, u64, u64, String), ProxyPathError> {
        let mut headers_out = headers_in;
        apply_forwarded_headers(&mut headers_out, &request.host, request.is_tls, &request.remote_addr);

        let local_target = LocalTarget {
            scheme: route.local_scheme.unwrap_or(proxer_store::Scheme::Http).as_str().to_string(),
            host: route.local_host.clone().unwrap_or_default(),
            port: route.local_port.unwrap_or(80),
        };
        let path = join_base_path(route.local_base_path.as_deref(), forward_path);

        let response = self
            .session_hub
            .dispatch_to_connector(
                route.connector_id.as_deref().unwrap_or_default(),
                &route.tunnel_key(),
                proxer_session_hub::DispatchRequest {
                    local_target: Some(local_target),
                    method: request.method.clone(),
                    path,
                    query: request.query.clone(),
                    headers: to_header_map(&headers_out),
                    body: request.body.clone(),
                    remote_addr: request.remote_addr.clone(),
                },
                self.config.proxy_request_timeout,
            )
            .await?;

        self.finish_agent_response(response)
    }

    fn finish_agent_response(
        &self,
        response: proxer_proto::ProxyResponse,
    ) -> Result<(u16, Vec<(String, String)>, Vec<u8>, u64, u64, String), ProxyPathError> {
        let headers = strip_hop_by_hop(from_header_map(&response.headers));
        Ok((
            response.effective_status(),
            headers,
            response.body,
            response.bytes_in,
            response.bytes_out,
            response.request_id,
        ))
    }

    async fn dispatch_direct(
        &self,
        route: &proxer_store::Route,
        forward_path: &str,
        request: &InboundRequest,
        headers_in: Vec<(String, String)>,
    ) -> Result<(u16, Vec<(String, String)>, Vec<u8>, u64, u64, String), ProxyPathError> {
        let target_url = route
            .target_url
            .as_deref()
            .ok_or(ProxyPathError::NotFound)?;
        let mut headers_out = headers_in;
        apply_forwarded_headers(&mut headers_out, &request.host, request.is_tls, &request.remote_addr);
        headers_out.push(("X-Proxer-Route-Mode".to_string(), "direct".to_string()));

        let bytes_in = request.body.len() as u64;
        let outcome = self
            .forwarder
            .forward(
                target_url,
                forward_path,
                &request.query,
                &request.method,
                headers_out,
                request.body.clone(),
                self.config.proxy_request_timeout,
                self.config.max_response_body_bytes,
            )
            .await?;
        let bytes_out = outcome.body.len() as u64;
        let request_id = format!("req-{}", uuid::Uuid::new_v4());

        info!(route_id = %route.route_id, latency_ms = outcome.latency_ms, "direct-forward completed");
        Ok((outcome.status, outcome.headers, outcome.body, bytes_in, bytes_out, request_id))
    }

    async fn record_usage(&self, tenant_id: &str, plan: &proxer_store::Plan, bytes_in: u64, bytes_out: u64) {
        let now = Utc::now();
        let crossing = self
            .plan_store
            .record_usage(tenant_id, plan.max_monthly_bytes(), bytes_in, bytes_out, now);
        match crossing {
            CapCrossing::Warning80 => {
                warn!(tenant_id, "tenant crossed 80% of its monthly traffic cap");
                self.incident_store.warning(
                    "proxy_path",
                    &format!("tenant {tenant_id} crossed 80% of its monthly traffic cap"),
                );
            }
            CapCrossing::Critical95 => {
                warn!(tenant_id, "tenant crossed 95% of its monthly traffic cap");
                self.incident_store.critical(
                    "proxy_path",
                    &format!("tenant {tenant_id} crossed 95% of its monthly traffic cap"),
                );
            }
            CapCrossing::None => {}
        }
    }
}

fn to_header_map(headers: &[(String, String)]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        map.entry(name.clone()).or_default().push(value.clone());
    }
    map
}

fn from_header_map(map: &HashMap<String, Vec<String>>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (name, values) in map {
        for value in values {
            out.push((name.clone(), value.clone()));
        }
    }
    out
}

fn join_base_path(base: Option<&str>, forward_path: &str) -> String {
    let base = base.unwrap_or("").trim_end_matches('/');
    let forward = if forward_path.starts_with('/') {
        forward_path.to_string()
    } else {
        format!("/{forward_path}")
    };
    if base.is_empty() {
        forward
    } else {
        format!("{base}{forward}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_base_path_handles_empty_base() {
        assert_eq!(join_base_path(None, "/hello"), "/hello");
        assert_eq!(join_base_path(Some(""), "/hello"), "/hello");
    }

    #[test]
    fn join_base_path_joins_without_double_slash() {
        assert_eq!(join_base_path(Some("/api/"), "/hello"), "/api/hello");
    }

    #[test]
    fn header_map_round_trips_multi_valued_headers() {
        let headers = vec![
            ("X-A".to_string(), "1".to_string()),
            ("X-A".to_string(), "2".to_string()),
            ("X-B".to_string(), "3".to_string()),
        ];
        let map = to_header_map(&headers);
        assert_eq!(map.get("X-A").unwrap().len(), 2);
        let back = from_header_map(&map);
        assert_eq!(back.len(), 3);
    }
}
