//! Shared provider traits for dependency injection.
//!
//! External side channels (the clock, user-facing notifications) sit behind
//! traits so the generator and the server can be tested with in-memory
//! implementations.

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

/// Trait for providing timestamps.
///
/// # Example
///
/// ```
/// use pagecraft::providers::{TimeProvider, SystemTimeProvider};
///
/// let provider = SystemTimeProvider;
/// let timestamp = provider.now();
/// assert!(timestamp > 0);
/// ```
pub trait TimeProvider: Send + Sync {
    /// Returns the current Unix timestamp in seconds.
    fn now(&self) -> u64;
}

/// Default time provider using system time.
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Visual weight of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastVariant {
    Default,
    Destructive,
}

/// A transient user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: ToastVariant,
    /// Unix timestamp (seconds) when the toast was raised.
    pub created_at: u64,
}

/// Side channel for user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, description: &str, variant: ToastVariant);
}

/// Prints notifications to stderr for the CLI.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, description: &str, variant: ToastVariant) {
        let icon = match variant {
            ToastVariant::Default => "✅",
            ToastVariant::Destructive => "❌",
        };
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "{} {}: {}", icon, title, description);
    }
}

/// Keeps the most recent notifications in memory.
///
/// Used by the preview server so the host page can poll for toasts.
pub struct MemoryNotifier {
    toasts: Mutex<Vec<Toast>>,
    capacity: usize,
    time_provider: Box<dyn TimeProvider>,
}

impl MemoryNotifier {
    pub fn new(capacity: usize) -> Self {
        Self::with_time_provider(capacity, Box::new(SystemTimeProvider))
    }

    /// Creates a notifier with a custom time provider (for testing).
    pub fn with_time_provider(capacity: usize, time_provider: Box<dyn TimeProvider>) -> Self {
        Self {
            toasts: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            time_provider,
        }
    }

    /// Returns the retained toasts, oldest first.
    pub fn toasts(&self) -> Vec<Toast> {
        match self.toasts.lock() {
            Ok(toasts) => toasts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, title: &str, description: &str, variant: ToastVariant) {
        let toast = Toast {
            title: title.to_string(),
            description: description.to_string(),
            variant,
            created_at: self.time_provider.now(),
        };
        let mut toasts = match self.toasts.lock() {
            Ok(toasts) => toasts,
            Err(poisoned) => poisoned.into_inner(),
        };
        toasts.push(toast);
        let overflow = toasts.len().saturating_sub(self.capacity);
        toasts.drain(..overflow);
    }
}
