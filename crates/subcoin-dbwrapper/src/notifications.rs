//! Warning and fatal error reporting shared by the storage layer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

type AlertHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Collects node-level warnings and fatal errors.
///
/// Each instance owns its own warning state: the alert handler fires for the first warning
/// reported through an instance only, later warnings just replace the recorded message.
#[derive(Default)]
pub struct KernelNotifications {
    warned: AtomicBool,
    fatal: AtomicBool,
    misc_warning: Mutex<Option<String>>,
    alert_handler: Option<AlertHandler>,
}

impl std::fmt::Debug for KernelNotifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelNotifications")
            .field("warned", &self.warned.load(Ordering::Relaxed))
            .field("fatal", &self.fatal.load(Ordering::Relaxed))
            .field("misc_warning", &*self.misc_warning.lock())
            .finish()
    }
}

impl KernelNotifications {
    /// Create a notifications instance without an alert handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifications instance that forwards the first warning to `handler`.
    pub fn with_alert_handler(handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            alert_handler: Some(Box::new(handler)),
            ..Default::default()
        }
    }

    /// Record a warning.
    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");

        *self.misc_warning.lock() = Some(message.clone());

        if !self.warned.swap(true, Ordering::SeqCst) {
            if let Some(handler) = &self.alert_handler {
                handler(&message);
            }
        }
    }

    /// Record an unrecoverable error, the node is expected to shut down.
    pub fn fatal_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("*** {message}");

        *self.misc_warning.lock() = Some(message);
        self.fatal.store(true, Ordering::SeqCst);
    }

    /// Returns the latest recorded warning.
    pub fn misc_warning(&self) -> Option<String> {
        self.misc_warning.lock().clone()
    }

    /// Returns `true` if a fatal error has been reported.
    pub fn has_fatal_error(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }
}
