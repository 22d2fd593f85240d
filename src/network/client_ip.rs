//! Client IP extraction from HTTP headers
//!
//! Resolution order:
//! - the first entry of `X-Forwarded-For`
//! - `X-Real-IP`
//! - the socket remote address
//! - a caller supplied fallback
//!
//! No address validation is performed; whatever the proxy wrote is returned.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use tracing::warn;

/// Address returned by [`real_ip`] when nothing else is known
pub const LOOPBACK_FALLBACK: &str = "127.0.0.1";

/// The parts of an inbound request that client IP resolution looks at
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    pub fn new(headers: HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            headers,
            remote_addr,
        }
    }

    /// Capture headers and, when the server was started with connect info,
    /// the socket address
    pub fn from_parts(parts: &Parts) -> Self {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            headers: parts.headers.clone(),
            remote_addr,
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// Resolve the client IP, returning `fallback` when no source is available
///
/// # Arguments
/// * `headers` - HTTP request headers (names match case-insensitively)
/// * `remote_addr` - The socket remote address, if known
/// * `fallback` - Returned when neither headers nor socket yield an address
pub fn resolve_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    fallback: &str,
) -> String {
    if let Some(ip) = extract_forwarded_for(headers) {
        return ip.to_string();
    }

    if let Some(ip) = header_value(headers, "x-real-ip") {
        return ip.to_string();
    }

    match remote_addr {
        Some(addr) => addr.ip().to_string(),
        None => fallback.to_string(),
    }
}

/// Client IP of the current request, or `default` outside of a request
pub fn user_ip(context: Option<&RequestContext>, default: &str) -> String {
    match context {
        Some(ctx) => resolve_client_ip(&ctx.headers, ctx.remote_addr, default),
        None => default.to_string(),
    }
}

/// Client IP of a request, falling back to the loopback address
pub fn real_ip(context: &RequestContext) -> String {
    resolve_client_ip(&context.headers, context.remote_addr, LOOPBACK_FALLBACK)
}

/// First hop of `X-Forwarded-For`
fn extract_forwarded_for(headers: &HeaderMap) -> Option<&str> {
    let xff = header_value(headers, "x-forwarded-for")?;

    xff.split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

/// Trimmed, non-empty header value
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let value = headers.get(name)?;

    match value.to_str() {
        Ok(s) => Some(s.trim()).filter(|s| !s.is_empty()),
        Err(_) => {
            warn!(header = name, "ignoring header with non-ASCII value");
            None
        }
    }
}

/// Extractor resolving the client IP through [`real_ip`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(real_ip(&RequestContext::from_parts(parts))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn socket(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn test_x_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Forwarded-For",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );

        let result = resolve_client_ip(&headers, socket("192.168.1.1:4000"), "");
        assert_eq!(result, "1.2.3.4");
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 10.0.0.7 "));
        assert_eq!(resolve_client_ip(&headers, None, ""), "10.0.0.7");

        let mut headers = HeaderMap::new();
        headers.insert("X-REAL-IP", HeaderValue::from_static("10.0.0.8"));
        assert_eq!(resolve_client_ip(&headers, None, ""), "10.0.0.8");
    }

    #[test]
    fn test_real_ip_header_used_when_forwarded_for_empty() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));

        let result = resolve_client_ip(&headers, socket("192.168.1.1:4000"), "");
        assert_eq!(result, "203.0.113.9");
    }

    #[test]
    fn test_blank_first_hop_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" , 5.6.7.8"));

        let result = resolve_client_ip(&headers, socket("9.9.9.9:80"), "");
        assert_eq!(result, "9.9.9.9");
    }

    #[test]
    fn test_remote_addr_used_without_proxy_headers() {
        let headers = HeaderMap::new();
        let result = resolve_client_ip(&headers, socket("9.9.9.9:51234"), "");
        assert_eq!(result, "9.9.9.9");
    }

    #[test]
    fn test_fallback_when_nothing_known() {
        let ctx = RequestContext::default();
        assert_eq!(user_ip(Some(&ctx), ""), "");
        assert_eq!(real_ip(&ctx), "127.0.0.1");
    }

    #[test]
    fn test_user_ip_without_context_returns_default() {
        assert_eq!(user_ip(None, "unknown"), "unknown");
        assert_eq!(user_ip(None, ""), "");
    }

    #[test]
    fn test_ipv6_remote_addr_drops_port() {
        let ctx = RequestContext::new(HeaderMap::new(), socket("[2001:db8::1]:443"));
        assert_eq!(real_ip(&ctx), "2001:db8::1");
    }

    #[test]
    fn test_non_ascii_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_bytes(b"\xe4\xb8\xad").unwrap(),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));

        assert_eq!(resolve_client_ip(&headers, None, ""), "198.51.100.2");
    }
}
