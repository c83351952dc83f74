//! Session, channel, and page-state registries.
//!
//! A *session* is the durable client identity spanning multiple channel
//! connections; a *channel* is one live bidirectional connection, transient
//! relative to its session. The store maintains two invariants:
//!
//! - at most one live channel is associated with a session at any instant;
//!   binding a new channel atomically detaches the old reverse mapping, so
//!   no channel identity ever maps to more than one session and no stale
//!   reverse entry survives a reconnect;
//! - unbinding a channel never deletes the session record, so reconnection
//!   under the same identity recovers cached page state and last inputs.
//!
//! All mutation goes through the operations defined here; no other component
//! touches the underlying maps.

use crate::handler::EventInput;
use crate::protocol::ServerMessage;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info};

/// Opaque session identity (32 hex chars, 16 random bytes).
pub type SessionId = String;

/// Identity of one live transport connection.
pub type ChannelId = String;

/// Generate a cryptographically unpredictable fixed-length hex token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Sending half of one live transport connection.
///
/// Sends are best-effort: a closed channel drops the message without error,
/// matching the contract that a render completed after disconnect is simply
/// discarded.
#[derive(Clone)]
pub struct Channel {
    id: ChannelId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Channel {
    pub fn new(id: ChannelId, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Channel { id, tx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message for delivery; returns false if the channel is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Whether the receiving side is still attached.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Per-session, per-page cache of last-sent variables and last input context.
///
/// Variables are compared with deep structural equality (key order never
/// matters) for change detection; the `commands` key is stripped before
/// anything reaches this cache.
#[derive(Debug, Default)]
pub struct PageStateCache {
    states: HashMap<String, Map<String, Value>>,
    last_inputs: HashMap<String, EventInput>,
}

impl PageStateCache {
    /// Last-sent variables for a page; empty mapping if absent.
    pub fn state(&self, page: &str) -> Map<String, Value> {
        self.states.get(page).cloned().unwrap_or_default()
    }

    pub fn set_state(&mut self, page: &str, variables: Map<String, Value>) {
        self.states.insert(page.to_string(), variables);
    }

    pub fn clear_state(&mut self, page: &str) {
        self.states.remove(page);
    }

    /// Last input context used to produce this page's output.
    pub fn last_input(&self, page: &str) -> Option<&EventInput> {
        self.last_inputs.get(page)
    }

    pub fn set_last_input(&mut self, page: &str, input: EventInput) {
        self.last_inputs.insert(page.to_string(), input);
    }
}

/// One durable session record.
#[derive(Debug)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Zero-or-one live channel; losing it does not destroy the record.
    pub channel: Option<Channel>,
    /// Last page the client reported being on.
    pub current_page: Option<String>,
    pub cache: PageStateCache,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_disconnect: Option<DateTime<Utc>>,
}

impl SessionRecord {
    fn new(session_id: SessionId, channel: Option<Channel>, current_page: Option<String>) -> Self {
        let now = Utc::now();
        SessionRecord {
            session_id,
            channel,
            current_page,
            cache: PageStateCache::default(),
            created_at: now,
            last_activity: now,
            last_disconnect: None,
        }
    }

    fn connected(&self) -> bool {
        self.channel.as_ref().is_some_and(Channel::is_open)
    }
}

/// Aggregate session statistics for the introspection endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: usize,
    pub connected: usize,
    pub disconnected: usize,
    /// Live-connection counts per current page.
    pub page_count: HashMap<String, usize>,
}

/// Read-only per-session summary for the introspection endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub current_page: Option<String>,
    pub connected: bool,
    pub last_activity: DateTime<Utc>,
}

struct StoreInner {
    sessions: HashMap<SessionId, SessionRecord>,
    /// Reverse transport mapping: channel identity to session identity, 1:1.
    channel_to_session: HashMap<ChannelId, SessionId>,
    /// Per-session event guards serializing the read-modify-write of a
    /// single session's state. Distinct sessions proceed in parallel.
    guards: HashMap<SessionId, Arc<Mutex<()>>>,
}

/// Process-scoped registry of sessions and their transport channels.
///
/// Constructed explicitly and passed by reference to the pipeline, never an
/// ambient singleton; tests isolate by creating fresh instances.
pub struct SessionStore {
    inner: RwLock<StoreInner>,
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            inner: RwLock::new(StoreInner {
                sessions: HashMap::new(),
                channel_to_session: HashMap::new(),
                guards: HashMap::new(),
            }),
        }
    }

    /// Create a session record (no channel) if one does not already exist,
    /// touching activity either way.
    pub async fn ensure_session(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(session_id) {
            Some(record) => record.last_activity = Utc::now(),
            None => {
                inner.sessions.insert(
                    session_id.to_string(),
                    SessionRecord::new(session_id.to_string(), None, None),
                );
                info!("New session created: {}", session_id);
            }
        }
        inner
            .guards
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.inner.read().await.sessions.contains_key(session_id)
    }

    /// Touch `last_activity`; returns false when no record exists.
    pub async fn touch(&self, session_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(session_id) {
            Some(record) => {
                record.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Bind a channel to a session, creating the record when absent.
    ///
    /// Any previously bound channel mapping is detached under the same write
    /// lock, so the one-channel-per-session invariant holds atomically.
    pub async fn upsert_channel(
        &self,
        session_id: &str,
        channel: Channel,
        current_page: Option<String>,
    ) {
        let mut inner = self.inner.write().await;
        let channel_id = channel.id().to_string();

        if let Some(record) = inner.sessions.get_mut(session_id) {
            let old_id = record
                .channel
                .as_ref()
                .filter(|old| old.id() != channel_id)
                .map(|old| old.id().to_string());
            record.channel = Some(channel);
            if current_page.is_some() {
                record.current_page = current_page;
            }
            record.last_activity = Utc::now();
            let page = record.current_page.clone();
            if let Some(old_id) = old_id {
                inner.channel_to_session.remove(&old_id);
            }
            info!("Updated channel for session {}, page: {:?}", session_id, page);
        } else {
            inner.sessions.insert(
                session_id.to_string(),
                SessionRecord::new(
                    session_id.to_string(),
                    Some(channel),
                    current_page.clone(),
                ),
            );
            info!("New session {} bound, page: {:?}", session_id, current_page);
        }

        inner
            .channel_to_session
            .insert(channel_id, session_id.to_string());
        inner
            .guards
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
    }

    /// Session identity bound to a channel, if any.
    pub async fn resolve_channel(&self, channel_id: &str) -> Option<SessionId> {
        self.inner
            .read()
            .await
            .channel_to_session
            .get(channel_id)
            .cloned()
    }

    /// Detach a channel on disconnect. Idempotent; never removes the session
    /// record, only the reverse-lookup entry.
    pub async fn unbind_channel(&self, channel_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(session_id) = inner.channel_to_session.remove(channel_id) else {
            return;
        };
        if let Some(record) = inner.sessions.get_mut(&session_id)
            && record.channel.as_ref().is_some_and(|c| c.id() == channel_id)
        {
            record.channel = None;
            record.last_disconnect = Some(Utc::now());
            debug!("Channel {} detached from session {}", channel_id, session_id);
        }
    }

    /// Current live channel for a session, looked up at send time so an
    /// in-flight delta reaches a freshly rebound channel.
    pub async fn channel_for(&self, session_id: &str) -> Option<Channel> {
        self.inner
            .read()
            .await
            .sessions
            .get(session_id)
            .and_then(|record| record.channel.clone())
    }

    pub async fn update_current_page(&self, session_id: &str, page: &str) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.sessions.get_mut(session_id) {
            record.current_page = Some(page.to_string());
            record.last_activity = Utc::now();
            debug!("Session {} navigated to {}", session_id, page);
        }
    }

    /// Per-session serialization guard; `None` when the session is unknown.
    pub async fn event_guard(&self, session_id: &str) -> Option<Arc<Mutex<()>>> {
        let inner = self.inner.read().await;
        if !inner.sessions.contains_key(session_id) {
            return None;
        }
        if let Some(guard) = inner.guards.get(session_id) {
            return Some(guard.clone());
        }
        drop(inner);
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(session_id) {
            return None;
        }
        Some(
            inner
                .guards
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
        )
    }

    /// Last-sent variables for a page; empty mapping if absent.
    pub async fn page_state(&self, session_id: &str, page: &str) -> Map<String, Value> {
        self.inner
            .read()
            .await
            .sessions
            .get(session_id)
            .map(|record| record.cache.state(page))
            .unwrap_or_default()
    }

    pub async fn set_page_state(&self, session_id: &str, page: &str, variables: Map<String, Value>) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.sessions.get_mut(session_id) {
            record.cache.set_state(page, variables);
            record.last_activity = Utc::now();
        }
    }

    pub async fn clear_page_state(&self, session_id: &str, page: &str) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.sessions.get_mut(session_id) {
            record.cache.clear_state(page);
        }
    }

    pub async fn last_input(&self, session_id: &str, page: &str) -> Option<EventInput> {
        self.inner
            .read()
            .await
            .sessions
            .get(session_id)
            .and_then(|record| record.cache.last_input(page).cloned())
    }

    pub async fn set_last_input(&self, session_id: &str, page: &str, input: EventInput) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.sessions.get_mut(session_id) {
            record.cache.set_last_input(page, input);
        }
    }

    /// Remove sessions with no live channel whose `last_activity` exceeds
    /// `max_idle`; returns the number removed. Sessions with a live channel
    /// are never removed regardless of age.
    pub async fn sweep_stale(&self, max_idle: Duration) -> usize {
        self.sweep_stale_at(Utc::now(), max_idle).await
    }

    /// Sweep against an explicit clock, for deterministic callers.
    pub async fn sweep_stale_at(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let mut inner = self.inner.write().await;
        let stale: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|record| !record.connected() && now - record.last_activity > max_idle)
            .map(|record| record.session_id.clone())
            .collect();
        for session_id in &stale {
            info!("Cleaning up stale session {}", session_id);
            inner.sessions.remove(session_id);
            inner.guards.remove(session_id);
        }
        stale.len()
    }

    /// Aggregate statistics: totals plus per-page live counts.
    pub async fn stats(&self) -> SessionStats {
        let inner = self.inner.read().await;
        let mut stats = SessionStats {
            total_sessions: inner.sessions.len(),
            ..Default::default()
        };
        for record in inner.sessions.values() {
            if record.connected() {
                stats.connected += 1;
                if let Some(page) = &record.current_page {
                    *stats.page_count.entry(page.clone()).or_insert(0) += 1;
                }
            } else {
                stats.disconnected += 1;
            }
        }
        stats
    }

    /// Read-only listing of all sessions.
    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        self.inner
            .read()
            .await
            .sessions
            .values()
            .map(|record| SessionSummary {
                session_id: record.session_id.clone(),
                current_page: record.current_page.clone(),
                connected: record.connected(),
                last_activity: record.last_activity,
            })
            .collect()
    }
}
