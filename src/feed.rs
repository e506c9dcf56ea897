//! In-memory notification feed with a badge counter.
//!
//! The feed holds notifications newest-first. The counter is a badge: it
//! counts events since the user last acknowledged the feed and is only
//! recomputed from read flags on [`NotificationFeed::replace_all`]. Marking
//! entries read never touches it, and resetting it never touches the
//! entries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::notification::{local_id, Notification};

/// Feed shared between the session's push pump and the caller.
pub type SharedFeed = Arc<Mutex<NotificationFeed>>;

/// Lock a shared feed. A panic while holding the lock leaves the feed
/// usable: every mutation keeps it consistent.
pub fn lock(feed: &SharedFeed) -> MutexGuard<'_, NotificationFeed> {
    feed.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered notification list plus badge counter.
#[derive(Debug, Default, Clone)]
pub struct NotificationFeed {
    entries: Vec<Notification>,
    counter: usize,
}

impl NotificationFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty feed wrapped for sharing.
    pub fn shared() -> SharedFeed {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Replace the whole list, keeping the given order.
    ///
    /// The counter becomes the number of unread entries. Entries whose id
    /// repeats an earlier one get a fresh local id.
    pub fn replace_all(&mut self, list: Vec<Notification>) {
        let mut seen = HashSet::with_capacity(list.len());
        self.entries = list
            .into_iter()
            .map(|mut n| {
                if !seen.insert(n.id.clone()) {
                    log::debug!("[Feed] Duplicate id {} reassigned", n.id);
                    n.id = local_id();
                    seen.insert(n.id.clone());
                }
                n
            })
            .collect();
        self.counter = self.entries.iter().filter(|n| !n.is_read).count();
    }

    /// Insert a notification at the front and bump the counter by one.
    pub fn prepend(&mut self, mut notification: Notification) {
        if self.entries.iter().any(|n| n.id == notification.id) {
            log::debug!("[Feed] Duplicate id {} reassigned", notification.id);
            notification.id = local_id();
        }
        self.entries.insert(0, notification);
        self.counter += 1;
    }

    /// Mark every entry with `related_id` read. Returns how many matched.
    pub fn mark_read_by_related_id(&mut self, related_id: &str) -> usize {
        let mut touched = 0;
        for n in &mut self.entries {
            if n.related_id.as_deref() == Some(related_id) {
                n.is_read = true;
                touched += 1;
            }
        }
        touched
    }

    /// Clear the badge.
    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }

    /// Current badge value.
    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.entries.iter().find(|n| n.id == id)
    }

    /// Returns `true` if any entry refers to `related_id`.
    pub fn contains_related_id(&self, related_id: &str) -> bool {
        self.entries
            .iter()
            .any(|n| n.related_id.as_deref() == Some(related_id))
    }

    /// Live count of entries not yet read. Unrelated to the badge.
    pub fn unread_entries(&self) -> usize {
        self.entries.iter().filter(|n| !n.is_read).count()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the feed holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
