//! Bounded session registry for the real-time channel.
//!
//! One session id may back several simultaneous connections. The registry
//! bounds total sessions (LRU eviction at capacity), per-session history
//! (FIFO trim at the cap), and reclaims sessions that sit without a
//! connection past the grace window. The registry lock guards only the
//! session map; each session's history and connection set live behind the
//! session's own lock, so independent sessions never contend.

use crate::errors::AdmissionError;
use crate::server::ws::WsEnvelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

/// One retained chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Identifies one live connection within a session.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub session_id: String,
    pub connection_id: Uuid,
}

#[derive(Debug)]
struct SessionState {
    history: VecDeque<ChatEntry>,
    connections: HashMap<Uuid, mpsc::UnboundedSender<WsEnvelope>>,
    last_activity: Instant,
    /// Latest non-confirmation chat text, awaiting a build confirmation.
    pending_build: Option<String>,
    /// Sticky brand for this conversation.
    brand: Option<String>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState {
                history: VecDeque::new(),
                connections: HashMap::new(),
                last_activity: Instant::now(),
                pending_build: None,
                brand: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn set_pending_build(&self, text: Option<String>) {
        self.state.lock().await.pending_build = text;
    }

    pub async fn pending_build(&self) -> Option<String> {
        self.state.lock().await.pending_build.clone()
    }

    /// Establish the conversation's brand. A `None` never clears one.
    pub async fn set_brand(&self, brand: Option<String>) {
        let mut state = self.state.lock().await;
        if brand.is_some() {
            state.brand = brand;
        }
    }

    pub async fn brand(&self) -> Option<String> {
        self.state.lock().await.brand.clone()
    }

    pub async fn history(&self) -> Vec<ChatEntry> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    async fn force_close(&self) {
        let mut state = self.state.lock().await;
        for (_, sender) in state.connections.drain() {
            let _ = sender.send(WsEnvelope::error("session evicted"));
            // Dropping the sender ends the connection's writer task.
        }
    }
}

pub struct SessionRegistry {
    capacity: usize,
    history_cap: usize,
    grace_window: Duration,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(capacity: usize, history_cap: usize, grace_window: Duration) -> Self {
        Self {
            capacity,
            history_cap,
            grace_window,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection for `session_id`, creating the session if
    /// needed. At capacity the least-recently-active session is evicted
    /// first, atomically with the capacity check; its connections are
    /// force-closed.
    pub async fn admit(
        &self,
        session_id: &str,
        sender: mpsc::UnboundedSender<WsEnvelope>,
    ) -> Result<ConnectionHandle, AdmissionError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(session_id) {
                existing.clone()
            } else {
                if sessions.len() >= self.capacity {
                    let Some(lru) = Self::least_recently_active(&sessions).await else {
                        return Err(AdmissionError::CapacityExceeded {
                            capacity: self.capacity,
                        });
                    };
                    let evicted = sessions.remove(&lru);
                    tracing::info!(session = %lru, "evicting least-recently-active session");
                    if let Some(evicted) = evicted {
                        evicted.force_close().await;
                    }
                }
                let session = Arc::new(Session::new(session_id.to_string()));
                sessions.insert(session_id.to_string(), session.clone());
                session
            }
        };

        let connection_id = Uuid::new_v4();
        let mut state = session.state.lock().await;
        state.connections.insert(connection_id, sender);
        state.last_activity = Instant::now();
        Ok(ConnectionHandle {
            session_id: session_id.to_string(),
            connection_id,
        })
    }

    async fn least_recently_active(
        sessions: &HashMap<String, Arc<Session>>,
    ) -> Option<String> {
        let mut oldest: Option<(String, Instant)> = None;
        for (id, session) in sessions {
            let last = session.state.lock().await.last_activity;
            match &oldest {
                Some((_, t)) if *t <= last => {}
                _ => oldest = Some((id.clone(), last)),
            }
        }
        oldest.map(|(id, _)| id)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Append to the session's bounded history; oldest entries are trimmed
    /// first once past the cap. Refreshes activity.
    pub async fn record(&self, session_id: &str, entry: ChatEntry) {
        let Some(session) = self.get(session_id).await else {
            return;
        };
        let mut state = session.state.lock().await;
        state.history.push_back(entry);
        while state.history.len() > self.history_cap {
            state.history.pop_front();
        }
        state.last_activity = Instant::now();
    }

    /// Deliver to every live connection of the session; connections whose
    /// channel is gone are removed lazily.
    pub async fn broadcast(&self, session_id: &str, envelope: WsEnvelope) {
        let Some(session) = self.get(session_id).await else {
            return;
        };
        let mut state = session.state.lock().await;
        state
            .connections
            .retain(|_, sender| sender.send(envelope.clone()).is_ok());
        state.last_activity = Instant::now();
    }

    /// Refresh a session's activity clock (inbound traffic).
    pub async fn touch(&self, session_id: &str) {
        if let Some(session) = self.get(session_id).await {
            session.state.lock().await.last_activity = Instant::now();
        }
    }

    /// Drop one connection. The session itself stays addressable for the
    /// grace window even with zero connections left.
    pub async fn close_connection(&self, handle: &ConnectionHandle) {
        if let Some(session) = self.get(&handle.session_id).await {
            let mut state = session.state.lock().await;
            state.connections.remove(&handle.connection_id);
            state.last_activity = Instant::now();
        }
    }

    /// Tear a session down entirely.
    pub async fn close(&self, session_id: &str) {
        let session = self.sessions.lock().await.remove(session_id);
        if let Some(session) = session {
            session.force_close().await;
        }
    }

    /// Evict connectionless sessions idle past the grace window. Returns
    /// the evicted session ids.
    pub async fn sweep(&self) -> Vec<String> {
        let mut evicted = Vec::new();
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let mut stale = Vec::new();
        for (id, session) in sessions.iter() {
            let state = session.state.lock().await;
            if state.connections.is_empty()
                && now.duration_since(state.last_activity) >= self.grace_window
            {
                stale.push(id.clone());
            }
        }
        for id in stale {
            sessions.remove(&id);
            tracing::debug!(session = %id, "swept idle session");
            evicted.push(id);
        }
        evicted
    }

    /// Background sweeper task; runs until the server shuts down.
    pub fn spawn_sweeper(registry: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        });
    }
}
