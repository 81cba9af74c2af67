//! Client address resolution

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Resolve the client address.
///
/// Consults `header_names` in order and returns the first non-empty value;
/// for comma-separated proxy chains the left-most entry wins. Falls back to
/// the socket peer address.
pub fn client_ip(
    headers: &HeaderMap,
    header_names: &[String],
    peer: Option<SocketAddr>,
) -> Option<String> {
    for name in header_names {
        let Some(value) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) else {
            continue;
        };

        let first = value.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    peer.map(|addr| addr.ip().to_string())
}
