//! Session manager: owns the push session lifecycle.
//!
//! # State machine
//!
//! ```text
//!               connect                 handshake ok
//!  Disconnected ───────▶ Connecting ─────────────────▶ Connected
//!   ▲   ▲  ▲               │  handshake error             │
//!   │   │  │               ▼                              │ transport gave up
//!   │   │  └─ disconnect ─ Failed ◀───────────────────────┘
//!   │   └──── disconnect ─────────────────────────────────┘
//!   └──────── disconnect (while Connecting; late success is discarded)
//! ```
//!
//! `connect` while `Connecting` or `Connected` is a no-op, decided by an
//! atomic check-and-set on the status. Every push event is folded into the
//! shared feed by a single pump task, so prepends are never interleaved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::constants;
use crate::feed::{self, SharedFeed};
use crate::hub::{PushTransport, TransportEvent, TransportFactory};
use crate::keyring::{self, CredentialProvider};
use crate::notification::Notification;

/// Lifecycle state of the push session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No session.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Live; pushes flow into the feed.
    Connected,
    /// Handshake failed or the transport gave up.
    Failed,
}

/// Published status: the state plus the reason for the last failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current state.
    pub state: SessionState,
    /// Set only in [`SessionState::Failed`].
    pub reason: Option<String>,
}

impl SessionStatus {
    fn new(state: SessionState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            state: SessionState::Failed,
            reason: Some(reason),
        }
    }
}

/// What to do with a push whose related id is already in the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Prepend every push.
    #[default]
    KeepAll,
    /// Drop pushes whose related id is already present.
    SkipKnownRelatedId,
}

/// Transport and pump of the current session.
struct ActiveSession {
    transport: Box<dyn PushTransport>,
    pump: JoinHandle<()>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Owns at most one push session and the status channel.
pub struct SessionManager {
    factory: Arc<dyn TransportFactory>,
    feed: SharedFeed,
    policy: DuplicatePolicy,
    status: Arc<watch::Sender<SessionStatus>>,
    arrivals: broadcast::Sender<Notification>,
    active: Mutex<Option<ActiveSession>>,
    /// Bumped by every connect attempt and every disconnect; an attempt
    /// whose ticket is stale must not publish or install anything.
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &*self.status.borrow())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Manager folding pushes into `feed`.
    pub fn new(factory: Arc<dyn TransportFactory>, feed: SharedFeed, policy: DuplicatePolicy) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let (arrivals, _) = broadcast::channel(constants::HUB_EVENT_BUFFER);
        Self {
            factory,
            feed,
            policy,
            status: Arc::new(status),
            arrivals,
            active: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The feed pushes are folded into.
    pub fn feed(&self) -> &SharedFeed {
        &self.feed
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Receiver for notifications as they are folded into the feed.
    pub fn arrivals(&self) -> broadcast::Receiver<Notification> {
        self.arrivals.subscribe()
    }

    /// Start a push session against `hub_url`.
    ///
    /// Returns once the attempt has settled. Without a credential nothing
    /// happens. While a session is connecting or connected this is a no-op.
    pub async fn connect(&self, hub_url: &str, credentials: Arc<dyn CredentialProvider>) {
        if keyring::resolve_token(&credentials).await.is_none() {
            log::warn!("[Session] Not signed in, skipping connect");
            return;
        }

        let began = self.status.send_if_modified(|status| match status.state {
            SessionState::Connecting | SessionState::Connected => false,
            SessionState::Disconnected | SessionState::Failed => {
                *status = SessionStatus::new(SessionState::Connecting);
                true
            }
        });
        if !began {
            log::debug!("[Session] Already {:?}, connect ignored", self.state());
            return;
        }
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // A session left over from a failure still needs its teardown.
        let stale = self.active.lock().await.take();
        if let Some(mut stale) = stale {
            stale.transport.stop().await;
        }

        let (events_tx, events_rx) = mpsc::channel(constants::HUB_EVENT_BUFFER);
        let mut transport = self.factory.create(hub_url, credentials, events_tx);

        log::info!("[Session] Connecting to {}", hub_url);
        let result = transport.start().await;

        let mut active = self.active.lock().await;
        if self.generation.load(Ordering::SeqCst) != ticket {
            drop(active);
            log::info!("[Session] Connect superseded, discarding transport");
            transport.stop().await;
            return;
        }

        match result {
            Ok(()) => {
                let pump = tokio::spawn(pump_events(
                    events_rx,
                    Arc::clone(&self.feed),
                    self.policy,
                    Arc::clone(&self.status),
                    self.arrivals.clone(),
                    Arc::clone(&self.generation),
                    ticket,
                ));
                *active = Some(ActiveSession { transport, pump });
                self.status
                    .send_replace(SessionStatus::new(SessionState::Connected));
                log::info!("[Session] Connected");
            }
            Err(e) => {
                log::warn!("[Session] Connect failed: {}", e);
                self.status.send_replace(SessionStatus::failed(e.to_string()));
                drop(active);
                transport.stop().await;
            }
        }
    }

    /// Stop the current session, if any, and return to `Disconnected`.
    ///
    /// The transport is stopped before this returns. Idempotent.
    pub async fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let session = self.active.lock().await.take();
        if let Some(mut session) = session {
            log::info!("[Session] Disconnecting");
            session.transport.stop().await;
        }
        self.status
            .send_replace(SessionStatus::new(SessionState::Disconnected));
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // ActiveSession aborts the pump; the transport cancels itself on drop.
        if let Some(session) = self.active.get_mut().take() {
            drop(session);
            log::debug!("[Session] Torn down on drop");
        }
    }
}

/// Fold transport events into the feed until the transport ends.
async fn pump_events(
    mut events: mpsc::Receiver<TransportEvent>,
    feed: SharedFeed,
    policy: DuplicatePolicy,
    status: Arc<watch::Sender<SessionStatus>>,
    arrivals: broadcast::Sender<Notification>,
    generation: Arc<AtomicU64>,
    ticket: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(payload) => {
                if let Some(notification) = fold_push(&feed, policy, &payload) {
                    let _ = arrivals.send(notification);
                }
            }
            TransportEvent::Reconnecting(reason) => {
                log::warn!("[Session] Reconnecting: {}", reason);
            }
            TransportEvent::Reconnected => {
                log::info!("[Session] Reconnected");
            }
            TransportEvent::Closed(reason) => {
                if generation.load(Ordering::SeqCst) == ticket {
                    log::error!("[Session] Push channel failed: {}", reason);
                    status.send_if_modified(|current| {
                        if current.state == SessionState::Connected {
                            *current = SessionStatus::failed(reason);
                            true
                        } else {
                            false
                        }
                    });
                }
                break;
            }
        }
    }
}

/// Normalize one push payload and prepend it. Returns the stored entry,
/// or `None` when the duplicate policy dropped it.
fn fold_push(shared: &SharedFeed, policy: DuplicatePolicy, payload: &Value) -> Option<Notification> {
    let notification = Notification::from_push(payload, Utc::now());
    let mut feed = feed::lock(shared);

    if policy == DuplicatePolicy::SkipKnownRelatedId {
        if let Some(related_id) = notification.related_id.as_deref() {
            if feed.contains_related_id(related_id) {
                log::debug!("[Session] Skipping push for known related id {}", related_id);
                return None;
            }
        }
    }

    feed.prepend(notification);
    feed.entries().first().cloned()
}
