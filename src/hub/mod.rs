//! Push hub client.
//!
//! A [`PushTransport`] is one live push session: started once, stopped
//! once, reporting through a [`TransportEvent`] channel. The session manager
//! only sees this seam; [`HubConnectionFactory`] provides the real
//! implementation over the JSON hub protocol on WebSockets.
//!
//! ```text
//!   SessionManager ──create──▶ TransportFactory
//!         ▲                          │
//!         │ TransportEvent           ▼
//!         └────────────────── HubConnection ──ws──▶ hub
//! ```

pub mod connection;
pub mod negotiate;
pub mod protocol;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use connection::{HubConnection, HubConnectionFactory, HubOptions};

use crate::error::HandshakeError;
use crate::keyring::CredentialProvider;

/// Something that happened on a push transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A `ReceiveNotification` payload arrived.
    Message(Value),
    /// The connection dropped; a reconnect is in progress.
    Reconnecting(String),
    /// A reconnect succeeded.
    Reconnected,
    /// The transport ended on its own and will not come back.
    Closed(String),
}

/// A single push session.
#[async_trait]
pub trait PushTransport: Send {
    /// Establish the connection and complete the handshake.
    ///
    /// Returns once the session is live; events flow afterwards.
    async fn start(&mut self) -> Result<(), HandshakeError>;

    /// Close the connection and wait for its background work to finish.
    ///
    /// Safe to call on a transport that never started or already ended.
    async fn stop(&mut self);
}

/// Builds transports bound to a hub, a credential source and an event sink.
pub trait TransportFactory: Send + Sync {
    /// Create an unstarted transport.
    fn create(
        &self,
        hub_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Box<dyn PushTransport>;
}
