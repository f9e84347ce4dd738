use crate::ratelimit::RateLimiter;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::warn;

/// Why a link attempt was refused before the link was created.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The address is on the deny-list.
    #[error("denied")]
    Denied,
    /// The address exhausted its admission quota, or is unknown.
    #[error("rate_limited")]
    RateLimited,
    /// The User-Agent matches none of the accepted labels.
    #[error("unrecognized_client")]
    UnrecognizedClient,
}

impl Rejection {
    /// Stable reason code, also used as the metrics label.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::RateLimited => "rate_limited",
            Self::UnrecognizedClient => "unrecognized_client",
        }
    }

    /// HTTP status used to refuse the WebSocket upgrade.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Denied | Self::UnrecognizedClient => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// File-backed set of denied addresses.
///
/// The file is read on every lookup so edits apply to the next attempt.
/// Reads are blocking `std::fs` calls made from the upgrade callback on a
/// runtime worker, so the file is expected to stay small.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    path: Option<PathBuf>,
}

impl DenyList {
    /// Deny-list backed by `path`; `None` denies nothing.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Current entries: trimmed lines, skipping blanks and `#` comments.
    /// A missing or unreadable file yields an empty list.
    #[must_use]
    pub fn load(&self) -> Vec<String> {
        let Some(path) = self.path.as_deref() else {
            return Vec::new();
        };
        match read_entries(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), "failed to read deny-list: {}", e);
                Vec::new()
            }
        }
    }

    /// Returns `true` if `address` is listed.
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.load().iter().any(|entry| entry == address)
    }
}

fn read_entries(path: &Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Pre-link admission policy.
///
/// Checks run in order and stop at the first failure: deny-list, rate
/// quota, then User-Agent labels. A passed rate check is recorded even
/// when the User-Agent check then rejects the attempt.
#[derive(Debug)]
pub struct AdmissionGate {
    deny_list: DenyList,
    rate_limiter: RateLimiter,
    allowed_agents: Vec<String>,
}

impl AdmissionGate {
    /// Creates a gate from its three policy inputs.
    #[must_use]
    pub fn new(deny_list: DenyList, rate_limiter: RateLimiter, allowed_agents: Vec<String>) -> Self {
        Self {
            deny_list,
            rate_limiter,
            allowed_agents,
        }
    }

    /// Decide whether an attempt from `address` carrying `user_agent` may
    /// become a link.
    ///
    /// An absent address, or one that is not a valid IP address, always
    /// fails the rate check.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] of the first failing check.
    pub fn admit(&self, address: Option<&str>, user_agent: &str) -> Result<(), Rejection> {
        if let Some(addr) = address {
            if self.deny_list.contains(addr) {
                return Err(Rejection::Denied);
            }
        }

        let Some(addr) = address.filter(|a| a.parse::<IpAddr>().is_ok()) else {
            return Err(Rejection::RateLimited);
        };
        if !self.rate_limiter.allow(addr) {
            return Err(Rejection::RateLimited);
        }

        if !self
            .allowed_agents
            .iter()
            .any(|label| user_agent.contains(label.as_str()))
        {
            return Err(Rejection::UnrecognizedClient);
        }

        Ok(())
    }

    /// The limiter consulted by [`AdmissionGate::admit`].
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}
