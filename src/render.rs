//! Terminal presentation of the feed and session status.
//!
//! Message bodies are markup produced by the backend. Printing them
//! verbatim means trusting the backend completely, so the renderer goes
//! through a [`MarkupPolicy`]. `Strip` (default) removes terminal escape
//! sequences, control characters and tags, then decodes common entities.
//! `Trusted` prints the raw body.
//!
//! Titles, related ids and failure reasons are never markup and always
//! lose their control characters, whatever the policy.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{BADGE_CAP, UNKNOWN_TIME_LABEL};
use crate::feed::NotificationFeed;
use crate::notification::Notification;
use crate::session::{SessionState, SessionStatus};

#[allow(clippy::unwrap_used, reason = "static pattern")]
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

#[allow(clippy::unwrap_used, reason = "static pattern")]
static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)?|[@-Z\\-_])").unwrap()
});

#[allow(clippy::unwrap_used, reason = "static pattern")]
static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</p>").unwrap());

/// How message markup reaches the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupPolicy {
    /// Remove escapes, control characters and tags; decode entities.
    #[default]
    Strip,
    /// Print message markup untouched.
    Trusted,
}

impl FromStr for MarkupPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strip" => Ok(Self::Strip),
            "trusted" => Ok(Self::Trusted),
            other => anyhow::bail!("Unknown markup policy: {other} (expected strip or trusted)"),
        }
    }
}

impl std::fmt::Display for MarkupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strip => write!(f, "strip"),
            Self::Trusted => write!(f, "trusted"),
        }
    }
}

impl MarkupPolicy {
    /// Apply the policy to a message body.
    pub fn apply(self, message: &str) -> String {
        match self {
            Self::Trusted => message.to_string(),
            Self::Strip => strip_markup(message),
        }
    }
}

/// Remove terminal escape sequences and every control character except
/// newline and tab.
pub fn strip_controls(text: &str) -> String {
    ESCAPE_RE
        .replace_all(text, "")
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

/// Remove escapes and tags, turn line-break tags into newlines, decode
/// basic entities.
pub fn strip_markup(message: &str) -> String {
    let plain = strip_controls(message);
    let with_breaks = BREAK_RE.replace_all(&plain, "\n");
    let text = TAG_RE.replace_all(&with_breaks, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Badge text for the bell: empty at zero, capped at `9+`.
pub fn badge(counter: usize) -> String {
    match counter {
        0 => String::new(),
        n if n > BADGE_CAP => format!("{BADGE_CAP}+"),
        n => n.to_string(),
    }
}

/// Human label for a session state.
pub fn status_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Disconnected => "Disconnected",
        SessionState::Connecting => "Connecting...",
        SessionState::Connected => "Connected",
        SessionState::Failed => "Connection Failed",
    }
}

/// One-line status with the failure reason when there is one.
pub fn status_line(status: &SessionStatus) -> String {
    match &status.reason {
        Some(reason) => format!(
            "Status: {} ({})",
            status_label(status.state),
            strip_controls(reason)
        ),
        None => format!("Status: {}", status_label(status.state)),
    }
}

/// Render one notification as a text block.
pub fn notification_block(n: &Notification, policy: MarkupPolicy) -> String {
    let mut out = String::new();
    let marker = if n.is_read { ' ' } else { '*' };
    let _ = writeln!(out, "{marker} {}", strip_controls(&n.title));

    let body = policy.apply(&n.message);
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let _ = writeln!(out, "    {}", line.trim());
    }

    let when = n.created_at.map_or_else(
        || UNKNOWN_TIME_LABEL.to_string(),
        |t| t.with_timezone(&Local).format("%H:%M:%S %d/%m/%Y").to_string(),
    );
    let _ = writeln!(out, "    {when}");

    if n.is_actionable_invitation() {
        if let Some(related) = &n.related_id {
            let related = strip_controls(related);
            let _ = writeln!(out, "    [accept {related}] [reject {related}]");
        }
    }
    out
}

/// Render the whole feed with a header carrying the badge.
pub fn feed(feed: &NotificationFeed, policy: MarkupPolicy) -> String {
    let mut out = String::new();
    let badge = badge(feed.counter());
    if badge.is_empty() {
        let _ = writeln!(out, "Notifications");
    } else {
        let _ = writeln!(out, "Notifications ({badge} new)");
    }

    if feed.is_empty() {
        let _ = writeln!(out, "  Không có thông báo nào.");
        return out;
    }
    for n in feed.entries() {
        out.push_str(&notification_block(n, policy));
    }
    out
}

/// Result text after an accept/reject attempt.
pub fn respond_message(accepted: bool, ok: bool) -> &'static str {
    match (ok, accepted) {
        (true, true) => "Bạn đã chấp nhận lời mời.",
        (true, false) => "Bạn đã từ chối lời mời.",
        (false, _) => "Có lỗi xảy ra khi phản hồi lời mời.",
    }
}
