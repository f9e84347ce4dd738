use std::net::SocketAddr;
use tokio_tungstenite::tungstenite::http::HeaderMap;

/// Proxy header carrying the forwarded-for chain.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Proxy header carrying a single client address.
pub const REAL_IP: &str = "x-real-ip";

/// Resolve the originating client address of a link attempt.
///
/// Sources are checked in order: `X-Forwarded-For`, `X-Real-IP`, then the
/// transport peer. For each source only the first comma-separated element
/// is used, trimmed. A source that is missing, not valid header text, or
/// empty after trimming yields nothing and the next source is tried.
///
/// Forwarded headers are trusted as-is. The server is expected to sit
/// behind a proxy that overwrites them.
#[must_use]
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    for name in [FORWARDED_FOR, REAL_IP] {
        let value = headers.get(name).and_then(|v| v.to_str().ok());
        if let Some(addr) = value.and_then(first_in_chain) {
            return Some(addr);
        }
    }
    peer.map(|p| p.ip().to_string())
}

fn first_in_chain(raw: &str) -> Option<String> {
    let first = raw.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}
