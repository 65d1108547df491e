//! General helper utilities
//!
//! This module contains miscellaneous utility functions used across the codebase.

use tokio::sync::mpsc;

/// Opens a URL in the system's default browser.
///
/// Fire-and-forget: the spawned browser process is never waited on.
pub fn open_link(url: &str) {
    #[cfg(target_os = "windows")]
    let spawned = std::process::Command::new("explorer").arg(url).spawn();
    #[cfg(target_os = "macos")]
    let spawned = std::process::Command::new("open").arg(url).spawn();
    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    let spawned = std::process::Command::new("xdg-open").arg(url).spawn();

    if let Err(e) = spawned {
        log::warn!("Could not open browser at {}: {}", url, e);
    }
}

// ── Channel Helpers ─────────────────────────────────────────────────────────

/// Result of a try_send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Message was sent successfully.
    Sent,
    /// Channel is full, message was dropped.
    Full,
    /// Channel is closed, no more messages can be sent.
    Closed,
}

impl SendResult {
    /// Returns true if the message was sent.
    #[inline]
    pub fn is_sent(self) -> bool {
        matches!(self, SendResult::Sent)
    }

    /// Returns true if the channel is full.
    #[inline]
    pub fn is_full(self) -> bool {
        matches!(self, SendResult::Full)
    }

    /// Returns true if the channel is closed.
    #[inline]
    pub fn is_closed(self) -> bool {
        matches!(self, SendResult::Closed)
    }
}

/// Try to send a message to an mpsc channel without waiting.
///
/// A full channel drops `value`; the caller never stalls on a slow receiver.
#[inline]
pub fn try_send<T>(tx: &mpsc::Sender<T>, value: T) -> SendResult {
    match tx.try_send(value) {
        Ok(()) => SendResult::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => SendResult::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => SendResult::Closed,
    }
}

/// Try to send a message, logging a warning if the channel is closed.
#[inline]
pub fn try_send_log<T>(tx: &mpsc::Sender<T>, value: T, context: &str) -> SendResult {
    let result = try_send(tx, value);
    if result.is_closed() {
        log::warn!("{}: channel closed", context);
    }
    result
}
