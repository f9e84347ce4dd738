use crate::registry::{BroadcastTally, ClientRegistry};
use regex::RegexSet;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::info;

/// Patterns that mark a payload as reaching for host-process internals.
/// Whitespace is tolerated only before the trailing call or member access.
const FORBIDDEN_PATTERNS: &[&str] = &[
    r"(?i)require\s*\(",
    r"(?i)process\s*\.",
    r"(?i)global\s*\.",
    r"(?i)__dirname",
    r"(?i)__filename",
    r"(?i)fs\s*\.",
    r"(?i)child_process",
];

fn forbidden_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| RegexSet::new(FORBIDDEN_PATTERNS).expect("forbidden patterns compile"))
}

/// Reasons a payload is refused before any link is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Nothing left after trimming.
    #[error("payload is empty")]
    Empty,
    /// Trimmed payload exceeds the configured size.
    #[error("payload too large: max {max}, got {actual}")]
    TooLarge {
        /// Maximum allowed size in bytes.
        max: usize,
        /// Actual size in bytes.
        actual: usize,
    },
    /// Payload contains a forbidden fragment.
    #[error("payload contains forbidden operations")]
    Forbidden,
}

/// Outcome of a successful distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Links the payload was queued on.
    pub success_count: usize,
    /// Links that were closed or could not take the payload.
    pub failure_count: usize,
    /// Human-readable summary.
    pub message: String,
}

/// Validates operator payloads and fans them out through the registry.
#[derive(Debug, Clone, Copy)]
pub struct CommandDistributor {
    max_payload: usize,
}

impl CommandDistributor {
    /// Distributor refusing payloads longer than `max_payload` bytes.
    #[must_use]
    pub const fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Check `raw` and return the trimmed payload that would be sent.
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadError`] describing the first failed check.
    pub fn validate<'a>(&self, raw: &'a str) -> Result<&'a str, PayloadError> {
        let payload = raw.trim();
        if payload.is_empty() {
            return Err(PayloadError::Empty);
        }
        if payload.len() > self.max_payload {
            return Err(PayloadError::TooLarge {
                max: self.max_payload,
                actual: payload.len(),
            });
        }

        if forbidden_patterns().is_match(payload) {
            return Err(PayloadError::Forbidden);
        }
        Ok(payload)
    }

    /// Validate `raw` and broadcast it to every registered link.
    ///
    /// Per-link send failures only show up in the counts.
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadError`] without touching the registry if the
    /// payload is refused.
    pub fn distribute(
        &self,
        registry: &ClientRegistry,
        raw: &str,
    ) -> Result<Distribution, PayloadError> {
        let payload = self.validate(raw)?;
        let BroadcastTally { success, failure } = registry.broadcast(payload);

        let preview: String = payload.chars().take(30).collect();
        info!(
            success,
            failure,
            preview = %preview,
            "payload distributed"
        );

        Ok(Distribution {
            success_count: success,
            failure_count: failure,
            message: format!("payload sent to {success} client(s)"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LinkHandle;
    use tokio::sync::mpsc;

    fn distributor() -> CommandDistributor {
        CommandDistributor::new(1000)
    }

    #[test]
    fn empty_and_blank_payloads_fail_without_broadcast() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.try_add("10.0.0.1", "Mozilla", LinkHandle::new(tx)).unwrap();

        assert_eq!(distributor().distribute(&registry, ""), Err(PayloadError::Empty));
        assert_eq!(distributor().distribute(&registry, "   "), Err(PayloadError::Empty));
        assert_eq!(distributor().distribute(&registry, "\n\t"), Err(PayloadError::Empty));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn oversized_payload_fails() {
        let d = CommandDistributor::new(4);
        assert_eq!(
            d.validate("12345"),
            Err(PayloadError::TooLarge { max: 4, actual: 5 })
        );
        assert_eq!(d.validate("  1234  "), Ok("1234"));
    }

    #[test]
    fn forbidden_fragments_fail_regardless_of_case_and_spacing() {
        let d = distributor();
        for payload in [
            "require('x')",
            "REQUIRE ('x')",
            "process.exit(1)",
            "global .foo",
            "console.log(__dirname)",
            "__FILENAME",
            "fs .readFileSync('/etc/passwd')",
            "child_process",
        ] {
            assert_eq!(d.validate(payload), Err(PayloadError::Forbidden), "{payload}");
        }
    }

    #[test]
    fn spacing_between_words_does_not_join_fragments() {
        let d = distributor();
        for payload in [
            "typeof s.name",
            "if (a) return f s.x",
            "let proc = ess.value",
            "requires(1)",
            "globalThis .x",
        ] {
            assert_eq!(d.validate(payload), Ok(payload), "{payload}");
        }
        assert_eq!(
            d.validate("fs .readFileSync('x')"),
            Err(PayloadError::Forbidden)
        );
        assert_eq!(d.validate("Fs\t\n.x"), Err(PayloadError::Forbidden));
    }

    #[test]
    fn ordinary_payload_passes_trimmed() {
        assert_eq!(
            distributor().validate("  console.log('hi')  "),
            Ok("console.log('hi')")
        );
    }

    #[test]
    fn distribute_reports_counts_with_one_closed_link() {
        let registry = ClientRegistry::new();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, rx2) = mpsc::channel(4);
        let (tx3, _rx3) = mpsc::channel(4);
        registry.try_add("10.0.0.1", "Mozilla", LinkHandle::new(tx1)).unwrap();
        registry.try_add("10.0.0.2", "Mozilla", LinkHandle::new(tx2)).unwrap();
        registry.try_add("10.0.0.3", "Mozilla", LinkHandle::new(tx3)).unwrap();
        drop(rx2);

        let result = distributor().distribute(&registry, "alert(1)").unwrap();
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.message, "payload sent to 2 client(s)");
    }

    #[test]
    fn distribution_serializes_camel_case() {
        let json = serde_json::to_value(Distribution {
            success_count: 1,
            failure_count: 0,
            message: "m".into(),
        })
        .unwrap();
        assert_eq!(json["successCount"], 1);
        assert_eq!(json["failureCount"], 0);
    }
}
