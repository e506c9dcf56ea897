//! REST client for stored notifications and invitation responses.
//!
//! [`NotificationApi`] never touches the feed: callers fold the results in
//! themselves (replace the list after a load, mark entries read after a
//! successful respond).

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::constants;
use crate::error::ApiError;
use crate::notification::Notification;

/// Response envelope used by the backend.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
}

/// Client for the notification and invitation endpoints.
#[derive(Debug, Clone)]
pub struct NotificationApi {
    client: Client,
    api_url: String,
}

impl NotificationApi {
    /// Creates a client for the API at `api_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Creates a client around a pre-configured HTTP client.
    pub fn with_client(client: Client, api_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Returns the API origin.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Returns the underlying HTTP client.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Fetch the stored notification list, in server order.
    ///
    /// Records that are not objects are skipped. An envelope without a
    /// `data` field yields an empty list.
    pub async fn load(&self, token: &str) -> Result<Vec<Notification>, ApiError> {
        let url = format!("{}{}", self.api_url, constants::NOTIFICATIONS_PATH);
        log::debug!("Loading notifications from {}", url);

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Loading notifications failed: {}", status);
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        let envelope: Envelope = response.json().await?;
        let records = match envelope.data {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(ApiError::Decode(format!(
                    "expected a list of notifications, got {}",
                    json_kind(&other)
                )));
            }
        };

        let list: Vec<Notification> = records.iter().filter_map(Notification::from_record).collect();
        log::info!("Fetched {} stored notifications", list.len());
        Ok(list)
    }

    /// Accept or reject the invitation identified by `related_id`.
    ///
    /// The response body is ignored beyond the status code.
    pub async fn respond(
        &self,
        related_id: &str,
        accepted: bool,
        token: &str,
    ) -> Result<(), ApiError> {
        let url = format!("{}{}/respond", self.api_url, constants::INVITATION_PATH);
        let accepted_param = if accepted { "true" } else { "false" };

        let response = self
            .client
            .get(&url)
            .query(&[("relatedId", related_id), ("accepted", accepted_param)])
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            log::info!(
                "Invitation {} {}",
                related_id,
                if accepted { "accepted" } else { "rejected" }
            );
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Responding to invitation {} failed: {}", related_id, status);
            Err(ApiError::from_status(status.as_u16(), &body))
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
