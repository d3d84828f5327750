//! Hop-by-hop stripping and the forwarded/`X-Proxer-*` marker headers
//! (spec §4.2 "Header forwarding").

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

pub fn strip_hop_by_hop(headers: Vec<(String, String)>) -> Vec<(String, String)> {
    headers.into_iter().filter(|(name, _)| !is_hop_by_hop(name)).collect()
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Proxer marker headers set on both the outbound agent request and the
/// final caller-facing response.
pub struct ProxerMarkers<'a> {
    pub request_id: &'a str,
    pub tunnel_id: &'a str,
    pub tunnel_key: &'a str,
    pub tenant_id: &'a str,
    pub route_id: &'a str,
}

impl ProxerMarkers<'_> {
    pub fn apply(&self, headers: &mut Vec<(String, String)>) {
        headers.push(("X-Proxer-Request-ID".to_string(), self.request_id.to_string()));
        headers.push(("X-Proxer-Tunnel-ID".to_string(), self.tunnel_id.to_string()));
        headers.push(("X-Proxer-Tunnel-Key".to_string(), self.tunnel_key.to_string()));
        headers.push(("X-Proxer-Tenant-ID".to_string(), self.tenant_id.to_string()));
        headers.push(("X-Proxer-Route-ID".to_string(), self.route_id.to_string()));
    }
}

pub fn apply_forwarded_headers(
    headers: &mut Vec<(String, String)>,
    original_host: &str,
    is_tls: bool,
    remote_addr: &str,
) {
    headers.push(("X-Forwarded-Host".to_string(), original_host.to_string()));
    headers.push((
        "X-Forwarded-Proto".to_string(),
        if is_tls { "https" } else { "http" }.to_string(),
    ));
    if let Some(port) = original_host.rsplit_once(':').map(|(_, p)| p) {
        headers.push(("X-Forwarded-Port".to_string(), port.to_string()));
    }
    headers.push(("X-Forwarded-For".to_string(), remote_addr.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_case_insensitively() {
        let headers = vec![
            ("Connection".to_string(), "keep-alive".to_string()),
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Transfer-Encoding".to_string(), "chunked".to_string()),
        ];
        let stripped = strip_hop_by_hop(headers);
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped[0].0, "Content-Type");
    }

    #[test]
    fn forwarded_headers_carry_port_when_present() {
        let mut headers = vec![];
        apply_forwarded_headers(&mut headers, "example.com:8080", true, "203.0.113.1");
        assert!(headers.contains(&("X-Forwarded-Proto".to_string(), "https".to_string())));
        assert!(headers.contains(&("X-Forwarded-Port".to_string(), "8080".to_string())));
    }
}
