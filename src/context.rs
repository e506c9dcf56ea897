//! Per-user application context.
//!
//! One [`AppContext`] per signed-in user per process. It owns the
//! credential store, the REST client, the feed and the session manager,
//! and is passed explicitly to whatever needs them.

use std::sync::Arc;

use anyhow::Result;

use crate::api::NotificationApi;
use crate::config::Config;
use crate::error::ApiError;
use crate::feed::{self, NotificationFeed, SharedFeed};
use crate::hub::{HubConnectionFactory, HubOptions, TransportFactory};
use crate::keyring::{self, CredentialProvider, CredentialStore};
use crate::session::SessionManager;

/// Owned services for one user.
#[derive(Debug)]
pub struct AppContext {
    config: Config,
    credentials: CredentialStore,
    api: NotificationApi,
    feed: SharedFeed,
    session: SessionManager,
}

impl AppContext {
    /// Build the context with the real hub transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: Config, credentials: CredentialStore) -> Result<Self, ApiError> {
        let api = NotificationApi::new(&config.api_url, config.request_timeout())?;
        let options = HubOptions {
            skip_negotiation: config.skip_negotiation,
            ..HubOptions::default()
        };
        let factory = HubConnectionFactory::new(api.http().clone(), options);
        Ok(Self::with_transport(config, credentials, api, Arc::new(factory)))
    }

    /// Build the context around a given transport factory.
    pub fn with_transport(
        config: Config,
        credentials: CredentialStore,
        api: NotificationApi,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let feed = NotificationFeed::shared();
        let session = SessionManager::new(factory, Arc::clone(&feed), config.duplicate_policy());
        Self {
            config,
            credentials,
            api,
            feed,
            session,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Credential store.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// REST client.
    pub fn api(&self) -> &NotificationApi {
        &self.api
    }

    /// The feed shared with the session.
    pub fn feed(&self) -> &SharedFeed {
        &self.feed
    }

    /// Session manager.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Load the stored notifications into the feed, replacing it.
    ///
    /// Returns the number of entries now in the feed. On error the feed is
    /// left as it was.
    pub async fn load_feed(&self) -> Result<usize, ApiError> {
        let token = self.token().await.ok_or(ApiError::NoCredential)?;
        let list = self.api.load(&token).await?;
        let mut feed = feed::lock(&self.feed);
        feed.replace_all(list);
        Ok(feed.len())
    }

    /// Accept or reject an invitation; on success mark the matching
    /// entries read and return how many were marked.
    pub async fn respond(&self, related_id: &str, accepted: bool) -> Result<usize, ApiError> {
        let token = self.token().await.ok_or(ApiError::NoCredential)?;
        self.api.respond(related_id, accepted, &token).await?;
        Ok(feed::lock(&self.feed).mark_read_by_related_id(related_id))
    }

    /// Connect to the configured hub.
    pub async fn connect(&self) {
        let hub_url = self.config.hub_url.clone();
        self.connect_to(&hub_url).await;
    }

    /// Connect to `hub_url`. The token is resolved on every attempt.
    pub async fn connect_to(&self, hub_url: &str) {
        self.session.connect(hub_url, self.provider()).await;
    }

    /// The current token, read off the runtime thread.
    pub async fn token(&self) -> Option<String> {
        keyring::resolve_token(&self.provider()).await
    }

    fn provider(&self) -> Arc<dyn CredentialProvider> {
        Arc::new(self.credentials.clone())
    }

    /// Store a freshly issued token.
    pub fn sign_in_with(&self, token: &str) -> Result<()> {
        self.credentials.set_token(token)
    }

    /// Disconnect, then clear the stored token.
    pub async fn sign_out(&self) -> Result<()> {
        self.session.disconnect().await;
        self.credentials.clear()
    }
}
