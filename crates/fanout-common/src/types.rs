//! Core type definitions and protocol constants for fanout.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned identity of an admitted client.
///
/// A 128-bit random value rendered as 32 lowercase hex digits. Clients
/// echo it back to correlate state; the server never derives it from
/// anything the client sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u128);

impl ClientId {
    /// Draw a fresh identity from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(u128::from_be_bytes(bytes))
    }

    /// Short prefix used in log lines.
    #[must_use]
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(8);
        s
    }
}

impl From<u128> for ClientId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Error returned when a string is not a 32-digit hex identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid client id")]
pub struct InvalidClientId;

impl FromStr for ClientId {
    type Err = InvalidClientId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(InvalidClientId);
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| InvalidClientId)
    }
}

impl Serialize for ClientId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Labels accepted in the `User-Agent` header when none are configured.
pub const DEFAULT_ALLOWED_AGENTS: &[&str] = &["CitizenFX", "Mozilla", "Chrome", "Safari", "Firefox"];

/// Text sent in the `welcome` frame.
pub const WELCOME_MESSAGE: &str = "connection established";

/// Text sent in generic `acknowledged` frames.
pub const ACK_MESSAGE: &str = "message received";

/// Reason strings sent with WebSocket close frames.
pub mod close_reason {
    /// Another client from the same address is already registered.
    pub const ADDRESS_IN_USE: &str = "address already connected";
    /// The link stayed silent for longer than the idle timeout.
    pub const IDLE: &str = "idle timeout";
    /// The server is shutting down.
    pub const SHUTDOWN: &str = "server shutting down";
}
