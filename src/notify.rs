//! # Notification Sinks — Buffered and Log-Only Delivery
//!
//! The engine hands completed notifications to a [`NotificationSink`] and
//! moves on; delivery is never on the critical path of a grant. Two sinks
//! ship: `BufferedSink` keeps a bounded in-memory queue that the frontend
//! polls through the notifications API, and `TracingSink` only logs (used by
//! the CLI and as a fallback when no frontend is attached).

use crate::{NotificationKind, NotificationSink};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;
use uuid::Uuid;

/// A delivered notification, ready for the frontend.
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    /// Monotonic id, for client-side deduplication.
    pub id: u64,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub content: String,
    pub action_url: Option<String>,
}

const BUFFER_CAP: usize = 200;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded in-memory notification buffer.
#[derive(Default)]
pub struct BufferedSink {
    buffer: Mutex<VecDeque<Notification>>,
    next_id: AtomicU64,
}

impl BufferedSink {
    pub fn new() -> Self {
        BufferedSink {
            buffer: Mutex::new(VecDeque::with_capacity(BUFFER_CAP)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Most recent notifications, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Notification> {
        let buffer = lock_or_recover(&self.buffer);
        buffer.iter().rev().take(limit).cloned().collect()
    }

    /// Most recent notifications for one user, newest first.
    pub fn recent_for(&self, user: Uuid, limit: usize) -> Vec<Notification> {
        let buffer = lock_or_recover(&self.buffer);
        buffer
            .iter()
            .rev()
            .filter(|n| n.user_id == user)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl NotificationSink for BufferedSink {
    fn send(&self, user: Uuid, kind: NotificationKind, content: &str, action_url: Option<&str>) {
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            user_id: user,
            kind,
            content: content.to_string(),
            action_url: action_url.map(str::to_string),
        };
        let mut buffer = lock_or_recover(&self.buffer);
        if buffer.len() >= BUFFER_CAP {
            buffer.pop_front();
        }
        buffer.push_back(notification);
    }
}

/// Log-only sink.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn send(&self, user: Uuid, kind: NotificationKind, content: &str, action_url: Option<&str>) {
        info!(
            user = %user,
            kind = kind.as_str(),
            action_url = action_url.unwrap_or(""),
            "{}",
            content
        );
    }
}
