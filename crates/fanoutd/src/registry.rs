use crate::error::FanoutError;
use crate::metrics::counters;
use chrono::{DateTime, Utc};
use fanout_common::{ClientId, ServerFrame};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Sending half of a link's outbound queue.
///
/// The link task owns the receiving half; once it exits the handle
/// reports the link as closed.
#[derive(Clone, Debug)]
pub struct LinkHandle {
    tx: mpsc::Sender<Message>,
}

impl LinkHandle {
    /// Wraps the sender of a link's outbound queue.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Whether the link task is still draining the queue.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue `msg` without waiting. Fails if the queue is full or closed.
    pub fn try_send(&self, msg: Message) -> Result<(), TrySendError<Message>> {
        self.tx.try_send(msg)
    }
}

/// Last bulk data received from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadSnapshot {
    /// Data as sent by the client.
    pub data: String,
    /// Server time the data arrived.
    pub received_at: DateTime<Utc>,
}

/// One admitted link.
#[derive(Debug)]
pub struct ClientEntry {
    identity: ClientId,
    address: String,
    user_agent: String,
    connected_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    last_payload: Option<PayloadSnapshot>,
    link: LinkHandle,
}

impl ClientEntry {
    fn summary(&self) -> ClientSummary {
        ClientSummary {
            identity: self.identity,
            address: self.address.clone(),
            user_agent: self.user_agent.clone(),
            connected_at: self.connected_at,
            last_seen_at: self.last_seen_at,
            has_payload_snapshot: self.last_payload.is_some(),
        }
    }
}

/// Point-in-time copy of an entry, safe to hold after the registry changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    /// Server-assigned identity.
    pub identity: ClientId,
    /// Resolved address at admission.
    pub address: String,
    /// User-Agent sent at admission.
    pub user_agent: String,
    /// Admission time.
    pub connected_at: DateTime<Utc>,
    /// Time of the last well-formed inbound frame.
    pub last_seen_at: DateTime<Utc>,
    /// Whether bulk data has been received.
    pub has_payload_snapshot: bool,
}

/// Outcome counts of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastTally {
    /// Links the frame was queued on.
    pub success: usize,
    /// Links that were closed or could not take the frame.
    pub failure: usize,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ClientId, ClientEntry>,
    by_address: HashMap<String, ClientId>,
    closing: bool,
}

/// Authoritative set of admitted links, at most one per address.
///
/// A single mutex guards both the identity map and the address index so
/// that the duplicate check and the insert happen as one step, and so
/// snapshots and broadcasts see a consistent set.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    inner: Mutex<Inner>,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a link for `address` unless one is already registered.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::DuplicateAddress`] if `address` is taken, or
    /// [`FanoutError::ShuttingDown`] once [`ClientRegistry::close_all`] has
    /// run. Nothing is stored and the caller should close the link.
    pub fn try_add(
        &self,
        address: &str,
        user_agent: &str,
        link: LinkHandle,
    ) -> Result<ClientSummary, FanoutError> {
        let mut inner = self.lock();
        if inner.closing {
            return Err(FanoutError::ShuttingDown);
        }
        if inner.by_address.contains_key(address) {
            return Err(FanoutError::DuplicateAddress(address.to_string()));
        }

        let mut identity = ClientId::generate();
        while inner.entries.contains_key(&identity) {
            identity = ClientId::generate();
        }

        let now = Utc::now();
        let entry = ClientEntry {
            identity,
            address: address.to_string(),
            user_agent: user_agent.to_string(),
            connected_at: now,
            last_seen_at: now,
            last_payload: None,
            link,
        };
        let summary = entry.summary();
        inner.by_address.insert(address.to_string(), identity);
        inner.entries.insert(identity, entry);
        Ok(summary)
    }

    /// Remove the entry for `identity`, returning its final state.
    /// Removing an absent identity is a no-op.
    pub fn remove(&self, identity: &ClientId) -> Option<ClientSummary> {
        let mut inner = self.lock();
        let entry = inner.entries.remove(identity)?;
        inner.by_address.remove(&entry.address);
        Some(entry.summary())
    }

    /// Mark `identity` as seen now. No-op if absent.
    pub fn touch(&self, identity: &ClientId) {
        if let Some(entry) = self.lock().entries.get_mut(identity) {
            entry.last_seen_at = Utc::now();
        }
    }

    /// Replace the bulk data snapshot of `identity`. No-op if absent.
    pub fn record_payload(&self, identity: &ClientId, data: String) {
        if let Some(entry) = self.lock().entries.get_mut(identity) {
            entry.last_payload = Some(PayloadSnapshot {
                data,
                received_at: Utc::now(),
            });
        }
    }

    /// Last bulk data snapshot of `identity`, if any.
    #[must_use]
    pub fn payload_snapshot(&self, identity: &ClientId) -> Option<PayloadSnapshot> {
        self.lock()
            .entries
            .get(identity)
            .and_then(|entry| entry.last_payload.clone())
    }

    /// Summary of one entry.
    #[must_use]
    pub fn get(&self, identity: &ClientId) -> Option<ClientSummary> {
        self.lock().entries.get(identity).map(ClientEntry::summary)
    }

    /// Copy of every entry, oldest admission first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ClientSummary> {
        let mut list: Vec<ClientSummary> =
            self.lock().entries.values().map(ClientEntry::summary).collect();
        list.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        list
    }

    /// Queue an `execute` frame carrying `payload` on every open link.
    ///
    /// Sends never wait: a closed link or a full queue counts as a
    /// failure and iteration continues. Failed sends do not remove
    /// entries; that happens only when the link task reports the close.
    pub fn broadcast(&self, payload: &str) -> BroadcastTally {
        let targets: Vec<(ClientId, LinkHandle)> = self
            .lock()
            .entries
            .values()
            .map(|entry| (entry.identity, entry.link.clone()))
            .collect();

        let text = match ServerFrame::execute(payload).to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode execute frame: {}", e);
                return BroadcastTally {
                    success: 0,
                    failure: targets.len(),
                };
            }
        };

        let mut tally = BroadcastTally::default();
        for (identity, link) in targets {
            if !link.is_open() {
                counters::broadcast_sends_total("closed");
                tally.failure += 1;
                continue;
            }
            match link.try_send(Message::Text(text.clone())) {
                Ok(()) => {
                    counters::broadcast_sends_total("queued");
                    tally.success += 1;
                }
                Err(TrySendError::Full(_)) => {
                    counters::broadcast_sends_total("full");
                    debug!(client = %identity.short(), "outbound queue full, broadcast dropped");
                    tally.failure += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    counters::broadcast_sends_total("closed");
                    tally.failure += 1;
                }
            }
        }
        tally
    }

    /// Remove every entry, dropping their link handles so each link task
    /// winds down, and refuse further adds. Returns how many entries were
    /// removed.
    pub fn close_all(&self) -> usize {
        let mut inner = self.lock();
        inner.closing = true;
        inner.by_address.clear();
        let drained = inner.entries.len();
        inner.entries.clear();
        drained
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
