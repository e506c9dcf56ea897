//! Hub negotiation: obtain a connection token before opening the socket.
//!
//! `POST {hub}/negotiate?negotiateVersion=1` returns the connection token
//! and the transports the hub offers. A hub behind a service may answer
//! with a redirect (`url` + `accessToken`) instead; one redirect is
//! followed.

use reqwest::{Client, Url};
use serde::Deserialize;

use crate::error::HandshakeError;

/// Transport name the client requires.
const WEBSOCKETS: &str = "WebSockets";

/// Redirects followed before giving up.
const MAX_REDIRECTS: usize = 1;

/// Negotiation response body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    /// Connection id (protocol version 0).
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Connection token (protocol version 1).
    #[serde(default)]
    pub connection_token: Option<String>,
    /// Negotiate protocol version the server speaks.
    #[serde(default)]
    pub negotiate_version: Option<u32>,
    /// Transports the hub offers.
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    /// Redirect target.
    #[serde(default)]
    pub url: Option<String>,
    /// Token to present at the redirect target.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Negotiation refused.
    #[serde(default)]
    pub error: Option<String>,
}

/// One transport entry of the negotiation response.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    /// Transport name, e.g. `WebSockets`.
    pub transport: String,
    /// Supported transfer formats, e.g. `Text`.
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

impl NegotiateResponse {
    /// The id to pass as the `id` query parameter.
    pub fn connection_key(&self) -> Option<&str> {
        if self.negotiate_version.unwrap_or(0) >= 1 {
            self.connection_token
                .as_deref()
                .or(self.connection_id.as_deref())
        } else {
            self.connection_id.as_deref()
        }
    }

    /// Returns `true` unless the hub lists transports and WebSockets is
    /// not among them.
    pub fn offers_websockets(&self) -> bool {
        self.available_transports.is_empty()
            || self
                .available_transports
                .iter()
                .any(|t| t.transport == WEBSOCKETS)
    }
}

/// Where and how to open the WebSocket after negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedEndpoint {
    /// Hub URL (possibly redirected), still in HTTP(S) form.
    pub hub_url: String,
    /// Value of the `id` query parameter, if the hub issued one.
    pub connection_key: Option<String>,
    /// Bearer token to present on the socket.
    pub token: String,
}

/// Build `{hub}/negotiate?negotiateVersion=1`, keeping any existing query.
pub fn negotiate_url(hub_url: &str) -> Result<Url, HandshakeError> {
    let mut url = Url::parse(hub_url)
        .map_err(|e| HandshakeError::Negotiate(format!("invalid hub URL {hub_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| HandshakeError::Negotiate(format!("hub URL cannot be a base: {hub_url}")))?
        .pop_if_empty()
        .push("negotiate");
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    Ok(url)
}

/// Negotiate with the hub at `hub_url` using `token`.
pub async fn negotiate(
    client: &Client,
    hub_url: &str,
    token: &str,
) -> Result<NegotiatedEndpoint, HandshakeError> {
    let mut hub_url = hub_url.to_string();
    let mut token = token.to_string();

    for _ in 0..=MAX_REDIRECTS {
        let url = negotiate_url(&hub_url)?;
        log::debug!("[Hub] Negotiating at {}", url);

        let response = client
            .post(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| HandshakeError::Negotiate(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandshakeError::Negotiate(format!(
                "hub returned {status}"
            )));
        }

        let body: NegotiateResponse = response
            .json()
            .await
            .map_err(|e| HandshakeError::Negotiate(format!("invalid response: {e}")))?;

        if let Some(error) = body.error {
            return Err(HandshakeError::Negotiate(error));
        }

        if let Some(redirect) = body.url {
            log::info!("[Hub] Negotiation redirected to {}", redirect);
            hub_url = redirect;
            if let Some(access_token) = body.access_token {
                token = access_token;
            }
            continue;
        }

        if !body.offers_websockets() {
            return Err(HandshakeError::Negotiate(
                "hub does not offer the WebSockets transport".to_string(),
            ));
        }

        return Ok(NegotiatedEndpoint {
            connection_key: body.connection_key().map(str::to_string),
            hub_url,
            token,
        });
    }

    Err(HandshakeError::Negotiate("too many redirects".to_string()))
}
