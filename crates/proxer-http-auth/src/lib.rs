//! The per-route/tunnel access-token gate (spec §4.2).
//!
//! A route (direct mode) or any candidate tunnel (legacy mode) may declare
//! a non-empty access token; callers must present it via the
//! `X-Proxer-Tunnel-Token` header or the `access_token` query parameter.
//! Comparison is constant-time so token length/prefix cannot leak through
//! timing.

use proxer_auth::constant_time_eq;
use tracing::debug;

pub const TOKEN_HEADER: &str = "x-proxer-tunnel-token";
pub const TOKEN_QUERY_PARAM: &str = "access_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResult {
    /// No token is required, or the presented token matched.
    Allowed,
    /// A token is required and none was presented, or it didn't match.
    Denied,
}

/// Checks an inbound request against a route/tunnel's configured token.
///
/// `headers` pairs are scanned case-insensitively, matching HTTP semantics.
/// `required_token` of `None` or `Some("")` means the route has no gate.
pub fn check_access_token(
    required_token: Option<&str>,
    headers: &[(String, String)],
    query: &str,
) -> GateResult {
    let Some(required) = required_token.filter(|t| !t.is_empty()) else {
        return GateResult::Allowed;
    };

    if let Some(presented) = extract_header_token(headers) {
        if constant_time_eq(presented.as_bytes(), required.as_bytes()) {
            return GateResult::Allowed;
        }
    }

    if let Some(presented) = extract_query_token(query) {
        if constant_time_eq(presented.as_bytes(), required.as_bytes()) {
            return GateResult::Allowed;
        }
    }

    debug!("access token gate denied request");
    GateResult::Denied
}

fn extract_header_token(headers: &[(String, String)]) -> Option<String> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(TOKEN_HEADER))
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn extract_query_token(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == TOKEN_QUERY_PARAM {
            let decoded = percent_decode(value);
            (!decoded.is_empty()).then_some(decoded)
        } else {
            None
        }
    })
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_token_required_allows_any_request() {
        assert_eq!(check_access_token(None, &[], ""), GateResult::Allowed);
        assert_eq!(check_access_token(Some(""), &[], ""), GateResult::Allowed);
    }

    #[test]
    fn header_token_matches() {
        let headers = vec![("X-Proxer-Tunnel-Token".to_string(), "secret".to_string())];
        assert_eq!(
            check_access_token(Some("secret"), &headers, ""),
            GateResult::Allowed
        );
    }

    #[test]
    fn header_token_is_case_insensitive_on_name() {
        let headers = vec![("x-proxer-tunnel-token".to_string(), "secret".to_string())];
        assert_eq!(
            check_access_token(Some("secret"), &headers, ""),
            GateResult::Allowed
        );
    }

    #[test]
    fn query_token_matches() {
        assert_eq!(
            check_access_token(Some("secret"), &[], "access_token=secret"),
            GateResult::Allowed
        );
    }

    #[test]
    fn query_token_among_other_params() {
        assert_eq!(
            check_access_token(Some("secret"), &[], "x=1&access_token=secret&y=2"),
            GateResult::Allowed
        );
    }

    #[test]
    fn wrong_token_denied() {
        let headers = vec![("X-Proxer-Tunnel-Token".to_string(), "wrong".to_string())];
        assert_eq!(
            check_access_token(Some("secret"), &headers, ""),
            GateResult::Denied
        );
    }

    #[test]
    fn missing_token_denied_when_required() {
        assert_eq!(
            check_access_token(Some("secret"), &[], ""),
            GateResult::Denied
        );
    }
}
