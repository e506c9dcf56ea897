//! CLI subcommand implementations.
//!
//! - [`account`] - Sign in, sign out, status
//! - [`inbox`] - List notifications, respond to invitations
//! - [`watch`] - Live feed with line commands on stdin
//! - [`settings`] - Read and write config values

pub mod account;
pub mod inbox;
pub mod settings;
pub mod watch;
