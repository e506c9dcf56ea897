//! hubnotify - terminal client for hub push notifications.
//!
//! Keeps a user's notification feed current: an initial REST load, then
//! live pushes over a reconnecting hub session, plus accept/reject of
//! invitations.
//!
//! # Architecture
//!
//! ```text
//!   CredentialStore ──token──▶ NotificationApi ──replace_all──┐
//!          │                                                  ▼
//!          └──token──▶ SessionManager ──prepend──▶ NotificationFeed
//!                            │                                ▲
//!                       HubConnection                 render (CLI)
//! ```
//!
//! # Modules
//!
//! - [`keyring`] - Bearer token storage
//! - [`api`] - Notification and invitation REST client
//! - [`session`] - Push session state machine
//! - [`hub`] - Hub protocol transport
//! - [`feed`] - Notification list and badge counter
//! - [`render`] - Terminal presentation

pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod constants;
pub mod context;
pub mod env;
pub mod error;
pub mod feed;
pub mod hub;
pub mod keyring;
pub mod notification;
pub mod render;
pub mod session;
pub mod ws;

pub use crate::api::NotificationApi;
pub use crate::config::Config;
pub use crate::context::AppContext;
pub use crate::error::{ApiError, HandshakeError};
pub use crate::feed::{NotificationFeed, SharedFeed};
pub use crate::keyring::{CredentialProvider, CredentialStore};
pub use crate::notification::{Category, Notification};
pub use crate::session::{DuplicatePolicy, SessionManager, SessionState, SessionStatus};
