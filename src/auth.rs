//! Sign-in: exchange a username and password for a bearer token.
//!
//! The backend answers `POST /api/account/login` with an envelope whose
//! token lives at `data.token` (older deployments: `data.accessToken`,
//! `data.access_token`, or a top-level `token`). Only these fixed
//! locations are read.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::constants;
use crate::error::ApiError;

/// Sign-in failure, with a message fit for display.
#[derive(Debug, Error)]
pub enum SignInError {
    /// Username or password left empty.
    #[error("Please enter email and password.")]
    EmptyInput,
    /// The backend refused the credentials.
    #[error("{0}")]
    Rejected(String),
    /// The backend accepted the request but returned no token.
    #[error("{0}")]
    MissingToken(String),
    /// The request could not be completed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Request body expected by the login controller.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Login response envelope.
#[derive(Debug, Default, Deserialize)]
pub struct LoginResponse {
    /// Token at the top level (legacy).
    #[serde(default)]
    pub token: Option<String>,
    /// Payload carrying the token.
    #[serde(default)]
    pub data: Option<LoginData>,
    /// Human-readable server message.
    #[serde(default)]
    pub message: Option<String>,
    /// Error description.
    #[serde(default)]
    pub error: Option<String>,
}

/// Token-bearing part of the login response.
#[derive(Debug, Default, Deserialize)]
pub struct LoginData {
    /// The bearer token.
    #[serde(default, alias = "accessToken", alias = "access_token")]
    pub token: Option<String>,
}

impl LoginResponse {
    /// The issued token, if present.
    pub fn token(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.token.as_deref())
            .or(self.token.as_deref())
            .filter(|t| !t.is_empty())
    }

    fn server_message(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

/// Sign in and return the bearer token.
///
/// The caller decides where to store the token.
pub async fn sign_in(
    client: &Client,
    api_url: &str,
    username: &str,
    password: &str,
) -> Result<String, SignInError> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(SignInError::EmptyInput);
    }

    let url = format!(
        "{}{}",
        api_url.trim_end_matches('/'),
        constants::LOGIN_PATH
    );
    log::debug!("Signing in at {} as {}", url, username);

    let response = client
        .post(&url)
        .json(&LoginRequest { username, password })
        .send()
        .await
        .map_err(ApiError::from)?;

    let status = response.status();
    let raw = response.text().await.map_err(ApiError::from)?;
    log::debug!("Login response status: {}", status);

    let parsed: Option<serde_json::Value> = serde_json::from_str(&raw).ok();

    if !status.is_success() {
        return Err(SignInError::Rejected(failure_message(
            status.as_u16(),
            &raw,
            parsed.as_ref(),
        )));
    }

    let body: LoginResponse = parsed
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    match body.token() {
        Some(token) => {
            log::info!("Signed in as {}", username);
            Ok(token.to_string())
        }
        None => Err(SignInError::MissingToken(
            body.server_message().map_or_else(
                || format!("Login succeeded but no token was returned by the API. Raw response: {raw}"),
                str::to_string,
            ),
        )),
    }
}

/// Pick the most useful text out of a failed login response.
fn failure_message(status: u16, raw: &str, parsed: Option<&serde_json::Value>) -> String {
    if let Some(json) = parsed {
        for key in ["message", "error"] {
            if let Some(text) = json.get(key).and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
        return json.to_string();
    }
    if raw.trim().is_empty() {
        format!("Request failed with status {status}")
    } else {
        raw.to_string()
    }
}
