//! Reconnecting hub connection.
//!
//! [`HubConnection::start`] negotiates, opens the socket and completes the
//! protocol handshake in the caller's task. After that a background task
//! owns the socket: it answers keep-alives, watches the server timeout,
//! forwards `ReceiveNotification` payloads and reconnects on loss.
//!
//! # Reconnect schedule
//!
//! One attempt after each delay in [`HubOptions::reconnect_delays`]
//! (0s, 2s, 10s, 30s by default). Every attempt asks the credential
//! provider for a fresh token. When the schedule is exhausted the
//! connection reports [`TransportEvent::Closed`] and ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::negotiate;
use super::protocol::{self, HandshakeReply, HubMessage};
use super::{PushTransport, TransportEvent, TransportFactory};
use crate::constants;
use crate::error::HandshakeError;
use crate::keyring::{self, CredentialProvider};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Timing and negotiation knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubOptions {
    /// Connect the socket directly instead of negotiating first.
    pub skip_negotiation: bool,
    /// Interval between client pings.
    pub keep_alive_interval: Duration,
    /// Silence after which the connection counts as lost.
    pub server_timeout: Duration,
    /// Time allowed for the hub's handshake reply.
    pub handshake_timeout: Duration,
    /// Delay before each reconnect attempt.
    pub reconnect_delays: Vec<Duration>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            skip_negotiation: false,
            keep_alive_interval: constants::HUB_KEEP_ALIVE_INTERVAL,
            server_timeout: constants::HUB_SERVER_TIMEOUT,
            handshake_timeout: constants::HUB_HANDSHAKE_TIMEOUT,
            reconnect_delays: constants::HUB_RECONNECT_DELAYS.to_vec(),
        }
    }
}

/// Creates [`HubConnection`]s sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct HubConnectionFactory {
    http: Client,
    options: HubOptions,
}

impl HubConnectionFactory {
    /// Factory using `http` for negotiation.
    pub fn new(http: Client, options: HubOptions) -> Self {
        Self { http, options }
    }
}

impl TransportFactory for HubConnectionFactory {
    fn create(
        &self,
        hub_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Box<dyn PushTransport> {
        Box::new(HubConnection::new(
            self.http.clone(),
            hub_url,
            credentials,
            events,
            self.options.clone(),
        ))
    }
}

/// Everything needed to (re)establish the socket.
struct Endpoint {
    http: Client,
    hub_url: String,
    credentials: Arc<dyn CredentialProvider>,
    options: HubOptions,
}

/// One live socket plus records that arrived together with the handshake
/// reply.
struct Link {
    writer: WsWriter,
    reader: WsReader,
    backlog: VecDeque<String>,
}

/// Push transport over the JSON hub protocol.
pub struct HubConnection {
    endpoint: Arc<Endpoint>,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("hub_url", &self.endpoint.hub_url)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl HubConnection {
    /// Unstarted connection to `hub_url`.
    pub fn new(
        http: Client,
        hub_url: &str,
        credentials: Arc<dyn CredentialProvider>,
        events: mpsc::Sender<TransportEvent>,
        options: HubOptions,
    ) -> Self {
        Self {
            endpoint: Arc::new(Endpoint {
                http,
                hub_url: hub_url.to_string(),
                credentials,
                options,
            }),
            events,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Returns `true` while the background task is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

#[async_trait]
impl PushTransport for HubConnection {
    async fn start(&mut self) -> Result<(), HandshakeError> {
        if self.task.is_some() {
            return Ok(());
        }

        log::info!("[Hub] Connecting to {}", self.endpoint.hub_url);
        let link = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(HandshakeError::Connect("stopped before connecting".to_string()));
            }
            result = establish(&self.endpoint) => result?,
        };
        log::info!("[Hub] Connected");

        self.task = Some(tokio::spawn(run_connection_loop(
            Arc::clone(&self.endpoint),
            link,
            self.events.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[Hub] Connection task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build the socket URL: ws(s) scheme, `id` from negotiation, and the
/// token as `access_token` for hubs that only read it from the query.
fn socket_url(hub_url: &str, connection_key: Option<&str>, token: &str) -> anyhow::Result<String> {
    let mut url = ws::http_to_ws_scheme(hub_url);
    if let Some(key) = connection_key {
        url = ws::with_query(&url, "id", key)?;
    }
    ws::with_query(&url, "access_token", token)
}

/// Negotiate, connect and handshake.
async fn establish(endpoint: &Endpoint) -> Result<Link, HandshakeError> {
    let token = keyring::resolve_token(&endpoint.credentials)
        .await
        .ok_or(HandshakeError::MissingToken)?;

    let (hub_url, connection_key, token) = if endpoint.options.skip_negotiation {
        (endpoint.hub_url.clone(), None, token)
    } else {
        let negotiated = negotiate::negotiate(&endpoint.http, &endpoint.hub_url, &token).await?;
        (
            negotiated.hub_url,
            negotiated.connection_key,
            negotiated.token,
        )
    };

    let url = socket_url(&hub_url, connection_key.as_deref(), &token)
        .map_err(|e| HandshakeError::Connect(format!("{e:#}")))?;
    log::debug!("[Hub] Opening socket to {}", ws::http_to_ws_scheme(&hub_url));

    let (mut writer, mut reader) = ws::connect(&url, Some(&token))
        .await
        .map_err(|e| HandshakeError::Connect(format!("{e:#}")))?;

    writer
        .send_text(&protocol::handshake_request())
        .await
        .map_err(|e| HandshakeError::Connect(format!("{e:#}")))?;

    let backlog = tokio::time::timeout(
        endpoint.options.handshake_timeout,
        await_handshake(&mut writer, &mut reader),
    )
    .await
    .map_err(|_| {
        HandshakeError::Rejected(format!(
            "no handshake reply within {:?}",
            endpoint.options.handshake_timeout
        ))
    })??;

    log::debug!("[Hub] Handshake accepted");
    Ok(Link {
        writer,
        reader,
        backlog,
    })
}

/// Wait for the handshake reply and return any records that followed it
/// in the same frame.
async fn await_handshake(
    writer: &mut WsWriter,
    reader: &mut WsReader,
) -> Result<VecDeque<String>, HandshakeError> {
    while let Some(msg) = reader.recv().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let mut records = protocol::records(&text);
                let Some(first) = records.next() else {
                    continue;
                };
                return match protocol::parse_handshake(first) {
                    HandshakeReply::Accepted => Ok(records.map(str::to_string).collect()),
                    HandshakeReply::Refused(reason) => Err(HandshakeError::Rejected(reason)),
                };
            }
            Ok(WsMessage::Ping(data)) => {
                let _ = writer.send_pong(data).await;
            }
            Ok(WsMessage::Close { code, reason }) => {
                return Err(HandshakeError::Rejected(close_description(code, &reason)));
            }
            Ok(WsMessage::Binary(_)) => {}
            Err(e) => return Err(HandshakeError::Connect(format!("{e:#}"))),
        }
    }

    Err(HandshakeError::Rejected(
        "socket ended before the handshake reply".to_string(),
    ))
}

fn close_description(code: u16, reason: &str) -> String {
    if reason.is_empty() {
        format!("socket closed by the hub (code {code})")
    } else {
        format!("socket closed by the hub (code {code}): {reason}")
    }
}

/// How one socket's message loop ended.
#[derive(Debug)]
enum LoopExit {
    /// `stop` was called or the event receiver went away.
    Stopped,
    /// Connection lost; reconnecting is allowed.
    Lost(String),
    /// The hub closed the connection for good.
    Closed(String),
}

/// Result of working through the reconnect schedule.
enum Reconnect {
    Linked(Link),
    Stopped,
    GaveUp(String),
}

/// Background task: run the socket, reconnect on loss, report the end.
async fn run_connection_loop(
    endpoint: Arc<Endpoint>,
    mut link: Link,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        match run_message_loop(&endpoint.options, &mut link, &events, &cancel).await {
            LoopExit::Stopped => {
                let _ = link.writer.send_text(&protocol::close()).await;
                let _ = link.writer.close().await;
                log::info!("[Hub] Connection stopped");
                return;
            }
            LoopExit::Closed(reason) => {
                log::warn!("[Hub] Connection closed: {}", reason);
                let _ = link.writer.close().await;
                let _ = events.send(TransportEvent::Closed(reason)).await;
                return;
            }
            LoopExit::Lost(reason) => {
                log::warn!("[Hub] Connection lost: {}", reason);
                let _ = link.writer.close().await;
                if events
                    .send(TransportEvent::Reconnecting(reason))
                    .await
                    .is_err()
                {
                    return;
                }

                match reconnect(&endpoint, &cancel).await {
                    Reconnect::Linked(next) => {
                        link = next;
                        log::info!("[Hub] Reconnected");
                        if events.send(TransportEvent::Reconnected).await.is_err() {
                            return;
                        }
                    }
                    Reconnect::Stopped => {
                        log::info!("[Hub] Stopped while reconnecting");
                        return;
                    }
                    Reconnect::GaveUp(reason) => {
                        log::error!("[Hub] Giving up: {}", reason);
                        let _ = events.send(TransportEvent::Closed(reason)).await;
                        return;
                    }
                }
            }
        }
    }
}

async fn reconnect(endpoint: &Endpoint, cancel: &CancellationToken) -> Reconnect {
    let delays = &endpoint.options.reconnect_delays;
    let mut last_error = String::from("no reconnect attempts configured");

    for (attempt, delay) in delays.iter().enumerate() {
        log::info!(
            "[Hub] Reconnect attempt {}/{} in {:?}",
            attempt + 1,
            delays.len(),
            delay
        );
        tokio::select! {
            _ = cancel.cancelled() => return Reconnect::Stopped,
            () = tokio::time::sleep(*delay) => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Reconnect::Stopped,
            result = establish(endpoint) => result,
        };
        match result {
            Ok(link) => return Reconnect::Linked(link),
            Err(e) => {
                log::warn!("[Hub] Reconnect attempt {} failed: {}", attempt + 1, e);
                last_error = e.to_string();
            }
        }
    }

    Reconnect::GaveUp(format!(
        "reconnect failed after {} attempts: {}",
        delays.len(),
        last_error
    ))
}

/// Message loop for a single socket.
async fn run_message_loop(
    options: &HubOptions,
    link: &mut Link,
    events: &mpsc::Sender<TransportEvent>,
    cancel: &CancellationToken,
) -> LoopExit {
    while let Some(record) = link.backlog.pop_front() {
        if let Some(exit) = handle_record(&record, &mut link.writer, events).await {
            return exit;
        }
    }

    let mut keep_alive = tokio::time::interval_at(
        Instant::now() + options.keep_alive_interval,
        options.keep_alive_interval,
    );
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let server_timeout = tokio::time::sleep(options.server_timeout);
    tokio::pin!(server_timeout);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return LoopExit::Stopped,

            () = &mut server_timeout => {
                return LoopExit::Lost(format!(
                    "no message from the hub within {:?}",
                    options.server_timeout
                ));
            }

            _ = keep_alive.tick() => {
                if let Err(e) = link.writer.send_text(&protocol::ping()).await {
                    return LoopExit::Lost(format!("keep-alive failed: {e:#}"));
                }
                log::trace!("[Hub] Sent ping");
            }

            msg = link.reader.recv() => {
                server_timeout
                    .as_mut()
                    .reset(Instant::now() + options.server_timeout);
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        for record in protocol::records(&text) {
                            if let Some(exit) = handle_record(record, &mut link.writer, events).await {
                                return exit;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = link.writer.send_pong(data).await;
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        log::warn!("[Hub] Ignoring binary frame");
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        return LoopExit::Lost(close_description(code, &reason));
                    }
                    Some(Err(e)) => return LoopExit::Lost(format!("{e:#}")),
                    None => return LoopExit::Lost("socket stream ended".to_string()),
                }
            }
        }
    }
}

/// Act on one protocol record. Returns `Some` when the loop must end.
async fn handle_record(
    record: &str,
    writer: &mut WsWriter,
    events: &mpsc::Sender<TransportEvent>,
) -> Option<LoopExit> {
    let message = match protocol::parse_message(record) {
        Ok(message) => message,
        Err(e) => {
            let preview: String = record.chars().take(100).collect();
            log::warn!("[Hub] Unparseable record ({}): {}", e, preview);
            return None;
        }
    };

    match message {
        HubMessage::Invocation {
            target,
            arguments,
            invocation_id,
        } => {
            if let Some(id) = invocation_id.as_deref() {
                let _ = writer.send_text(&protocol::completion(id)).await;
            }
            if !target.eq_ignore_ascii_case(constants::RECEIVE_NOTIFICATION_EVENT) {
                log::debug!("[Hub] No handler for '{}'", target);
                return None;
            }
            let payload = arguments.into_iter().next().unwrap_or(Value::Null);
            log::debug!("[Hub] {} received", target);
            if events.send(TransportEvent::Message(payload)).await.is_err() {
                return Some(LoopExit::Stopped);
            }
            None
        }
        HubMessage::Ping => {
            log::trace!("[Hub] Ping");
            None
        }
        HubMessage::Close {
            error,
            allow_reconnect,
        } => {
            let reason = error.unwrap_or_else(|| "connection closed by the hub".to_string());
            Some(if allow_reconnect {
                LoopExit::Lost(reason)
            } else {
                LoopExit::Closed(reason)
            })
        }
        HubMessage::Other(kind) => {
            log::trace!("[Hub] Ignoring message type {}", kind);
            None
        }
    }
}
