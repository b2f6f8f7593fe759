//! # pwacache Common
//!
//! Error taxonomy, logging setup and configuration shared by the cache worker,
//! the update coordinator and the host runtime.
//!
//! ## Features
//!
//! - One error enum covering install, fetch, update-check and apply failures
//! - Logging configuration and setup
//! - JSON configuration with validation

use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{ActivationPolicy, AppConfig, CacheConfig, CoordinatorConfig, PromptPolicy};
pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};

/// Unified error type for pwacache.
#[derive(Error, Debug)]
pub enum Error {
    /// A manifest resource could not be fetched while installing a version.
    /// The previous version stays authoritative.
    #[error("Install of {cache} failed at {resource}: {reason}")]
    InstallFailed {
        cache: String,
        resource: String,
        reason: String,
    },

    /// A request failed and no cached fallback was available.
    #[error("Fetch of {url} failed: {message}")]
    FetchFailed {
        url: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A periodic or visibility-triggered update check failed.
    #[error("Update check failed: {0}")]
    UpdateCheckFailed(String),

    /// Apply was requested while no worker was waiting.
    #[error("No waiting worker to activate")]
    ApplyRace,

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl Error {
    /// Create an install failure.
    pub fn install_failed(
        cache: impl Into<String>,
        resource: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InstallFailed {
            cache: cache.into(),
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a fetch failure.
    pub fn fetch_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FetchFailed {
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a fetch failure with source.
    pub fn fetch_failed_with_source<E: std::error::Error + Send + Sync + 'static>(
        url: impl Into<String>,
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::FetchFailed {
            url: url.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether the failed operation may succeed on its next scheduled attempt.
    ///
    /// Install failures are terminal for their version.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::FetchFailed { .. }
                | Error::UpdateCheckFailed(_)
                | Error::Timeout(_)
                | Error::Io(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Error::InstallFailed { .. } => "install_failed",
            Error::FetchFailed { .. } => "fetch_failed",
            Error::UpdateCheckFailed(_) => "update_check_failed",
            Error::ApplyRace => "apply_race",
            Error::Config { .. } => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Timeout(_) => "timeout",
            Error::NotFound(_) => "not_found",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for pwacache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| Error::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::install_failed("app-v1", "/a.js", "404").category(),
            "install_failed"
        );
        assert_eq!(Error::fetch_failed("/a.js", "offline").category(), "fetch_failed");
        assert_eq!(Error::ApplyRace.category(), "apply_race");
        assert_eq!(
            Error::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::fetch_failed("/a.js", "offline").is_retryable());
        assert!(Error::UpdateCheckFailed("offline".into()).is_retryable());
        assert!(!Error::install_failed("app-v1", "/a.js", "404").is_retryable());
        assert!(!Error::ApplyRace.is_retryable());
    }

    #[test]
    fn test_install_failed_message() {
        let err = Error::install_failed("app-v2", "/c.js", "status 500");
        assert_eq!(
            err.to_string(),
            "Install of app-v2 failed at /c.js: status 500"
        );
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("test").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("test"),
            Err(Error::NotFound(_))
        ));
    }
}
