//! Session registry
//!
//! Owns every open peer connection. Handles are added when a negotiation
//! starts and removed on explicit close, ICE failure or shutdown; removing an
//! entry always closes it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edgecam_protocol::{FilterMode, SessionInfo};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use uuid::Uuid;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

/// The one capability the registry needs from a peer connection
#[async_trait]
pub trait SessionPeer: Send + Sync + 'static {
    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl SessionPeer for RTCPeerConnection {
    async fn close(&self) -> anyhow::Result<()> {
        RTCPeerConnection::close(self).await?;
        Ok(())
    }
}

pub struct Session<P: SessionPeer> {
    pub id: Uuid,
    pub peer: Arc<P>,
    pub mode: FilterMode,
    pub created_at: DateTime<Utc>,
    /// Tells the media workers of this session to stop
    stop: Arc<AtomicBool>,
}

impl<P: SessionPeer> Session<P> {
    pub fn new(peer: Arc<P>, mode: FilterMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            mode,
            created_at: Utc::now(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            mode: self.mode,
            created_at: self.created_at,
        }
    }

    async fn close(self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.peer.close().await {
            tracing::warn!("Error closing peer connection {}: {}", self.id, e);
        }
    }
}

pub struct SessionRegistry<P: SessionPeer = RTCPeerConnection> {
    sessions: RwLock<HashMap<Uuid, Session<P>>>,
}

impl<P: SessionPeer> SessionRegistry<P> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, session: Session<P>) -> Uuid {
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        tracing::info!("Registered session {}", id);
        id
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Sessions ordered by creation time
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.read().await.values().map(Session::info).collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Drop a session from the registry and close it. Returns false if it was not registered.
    pub async fn remove(&self, id: Uuid) -> bool {
        // Take it out first so the lock is not held while closing
        let session = self.sessions.write().await.remove(&id);

        match session {
            Some(session) => {
                session.close().await;
                tracing::info!("Removed session {}", id);
                true
            }
            None => false,
        }
    }

    /// Close every session concurrently and leave the registry empty.
    /// Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<Session<P>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        let count = sessions.len();
        join_all(sessions.into_iter().map(Session::close)).await;

        if count > 0 {
            tracing::info!("Closed {} sessions", count);
        }
        count
    }
}

/// React to an ICE state change of `session_id`: a failed or closed
/// connection is closed and dropped. Returns true if the session was removed.
pub async fn on_ice_state<P: SessionPeer>(
    registry: Weak<SessionRegistry<P>>,
    session_id: Uuid,
    state: RTCIceConnectionState,
) -> bool {
    match state {
        RTCIceConnectionState::Failed => {
            tracing::warn!("ICE failed for session {}", session_id);
        }
        RTCIceConnectionState::Closed => {}
        _ => return false,
    }

    match registry.upgrade() {
        Some(registry) => registry.remove(session_id).await,
        None => false,
    }
}

impl<P: SessionPeer> Default for SessionRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
