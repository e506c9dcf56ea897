//! Error taxonomy shared by the REST client, sign-in and the push transport.
//!
//! Malformed push or REST payloads are not represented here: they are
//! normalized with defaults instead of failing.

use thiserror::Error;

/// Failure of an authenticated REST call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend could not be reached (DNS, refused, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),
    /// The credential was missing, invalid or expired.
    #[error("not authorized (status {status})")]
    Auth {
        /// HTTP status returned by the backend.
        status: u16,
    },
    /// Any other non-success status.
    #[error("server error (status {status}): {body}")]
    Server {
        /// HTTP status returned by the backend.
        status: u16,
        /// Response body, truncated for display.
        body: String,
    },
    /// A success response whose body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),
    /// No token is stored; the request was not sent.
    #[error("not signed in")]
    NoCredential,
}

impl ApiError {
    /// Map a non-success HTTP status to `Auth` or `Server`.
    pub fn from_status(status: u16, body: &str) -> Self {
        if is_auth_status(status) {
            Self::Auth { status }
        } else {
            Self::Server {
                status,
                body: truncate(body, 200),
            }
        }
    }

    /// Returns `true` if re-authenticating could fix this error.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::NoCredential)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// The push channel could not be established.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// No bearer token was available when the connection was attempted.
    #[error("no credential available")]
    MissingToken,
    /// Negotiation with the hub failed.
    #[error("negotiation failed: {0}")]
    Negotiate(String),
    /// The WebSocket could not be opened.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The hub rejected or never answered the protocol handshake.
    #[error("handshake rejected: {0}")]
    Rejected(String),
}

fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
