use std::fmt;
use std::sync::Arc;

#[cfg(feature = "native")]
use notify_rust::Notification;
use tracing::{error, info, warn};

#[cfg(feature = "native")]
const DESKTOP_APP_NAME: &str = "autologin";

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification dispatch failed: {0}")]
    DispatchFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Toast {
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
        }
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Severity::Success)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Severity::Warning)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Severity::Error)
    }
}

/// Surface for user-visible messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: &Toast) -> Result<(), NotificationError>;
}

/// Writes toasts to the log at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, toast: &Toast) -> Result<(), NotificationError> {
        let severity = toast.severity.as_str().to_ascii_uppercase();
        match toast.severity {
            Severity::Success => info!("{severity} - {}: {}", toast.title, toast.message),
            Severity::Warning => warn!("{severity} - {}: {}", toast.title, toast.message),
            Severity::Error => error!("{severity} - {}: {}", toast.title, toast.message),
        }
        Ok(())
    }
}

/// Desktop notifications through the platform notification daemon.
#[cfg(feature = "native")]
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

#[cfg(feature = "native")]
impl Notifier for DesktopNotifier {
    fn notify(&self, toast: &Toast) -> Result<(), NotificationError> {
        let mut notification = Notification::new();
        notification
            .appname(DESKTOP_APP_NAME)
            .summary(&toast.title)
            .body(&toast.message);

        #[cfg(all(unix, not(target_os = "macos")))]
        if toast.severity == Severity::Error {
            notification.urgency(notify_rust::Urgency::Critical);
        }

        notification
            .show()
            .map_err(|error| NotificationError::DispatchFailed(error.to_string()))?;
        Ok(())
    }
}

/// Routes toasts to the injected notifier, falling back to the log when no
/// notifier is available or it fails.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Option<Arc<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { notifier }
    }

    pub fn has_notifier(&self) -> bool {
        self.notifier.is_some()
    }

    pub fn dispatch(&self, toast: Toast) {
        let Some(notifier) = &self.notifier else {
            let _ = LogNotifier.notify(&toast);
            return;
        };

        if let Err(error) = notifier.notify(&toast) {
            error!(error = %error, "failed to dispatch notification");
            let _ = LogNotifier.notify(&toast);
        }
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("has_notifier", &self.has_notifier())
            .finish()
    }
}
