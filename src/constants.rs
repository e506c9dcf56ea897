//! Application-wide constants for hubnotify.
//!
//! Centralizes endpoint defaults, protocol names and timing values so
//! they are discoverable in one place.
//!
//! # Categories
//!
//! - **Endpoints**: default backend and hub locations
//! - **Notifications**: reserved categories and display defaults
//! - **Hub**: push channel protocol names and timing

use std::time::Duration;

// ============================================================================
// Endpoints
// ============================================================================

/// Default REST API origin.
pub const DEFAULT_API_URL: &str = "https://be.dev.familytree.io.vn";

/// Default push hub endpoint.
pub const DEFAULT_HUB_URL: &str = "https://be.dev.familytree.io.vn/hubs/notification";

/// Path of the stored-notification listing, relative to the API origin.
pub const NOTIFICATIONS_PATH: &str = "/api/notifications";

/// Path of the invitation resource, relative to the API origin.
pub const INVITATION_PATH: &str = "/api/invitation";

/// Path of the sign-in endpoint, relative to the API origin.
pub const LOGIN_PATH: &str = "/api/account/login";

/// HTTP client request timeout for API calls.
///
/// Applies to each REST request and to hub negotiation. The session
/// manager itself imposes no timeout on top of this.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Notifications
// ============================================================================

/// Numeric category code reserved for invitations.
pub const INVITATION_CATEGORY_CODE: i64 = 9003;

/// Symbolic category name reserved for invitations.
pub const INVITATION_CATEGORY_SYMBOL: &str = "INVITE";

/// Title used when a pushed notification carries none.
pub const DEFAULT_NOTIFICATION_TITLE: &str = "Thông báo mới";

/// Shown in place of a timestamp the server did not provide.
pub const UNKNOWN_TIME_LABEL: &str = "Không rõ thời gian";

/// Badge values above this are shown as `9+`.
pub const BADGE_CAP: usize = 9;

// ============================================================================
// Hub
// ============================================================================

/// Hub method name carrying pushed notifications.
pub const RECEIVE_NOTIFICATION_EVENT: &str = "ReceiveNotification";

/// Interval between client keep-alive pings.
pub const HUB_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Server silence after which the connection is considered lost.
pub const HUB_SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time to wait for the handshake reply.
pub const HUB_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Delays between automatic reconnect attempts. Exhausting the list is a
/// permanent failure.
pub const HUB_RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(0),
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Buffer of pushed events between the transport and the session pump.
pub const HUB_EVENT_BUFFER: usize = 256;
