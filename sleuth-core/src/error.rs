//! Error types for the Sleuth research pipeline.
//!
//! Uses `thiserror` for public API error types. Each pipeline tier has its own
//! error enum: session persistence, external collaborators, pipeline stages, and
//! configuration. The response parser has no error type; it degrades to data.

use std::path::PathBuf;

/// Errors from the session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Permission denied writing session data at {path}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save session data at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize session data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid session id: {id:?}")]
    InvalidId { id: String },
}

impl StoreError {
    /// Tag a raw I/O error with the path it concerned.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            StoreError::PermissionDenied { path, source }
        } else {
            StoreError::Io { path, source }
        }
    }

    /// Stable category name, safe to show to users.
    pub fn category(&self) -> &'static str {
        match self {
            StoreError::PermissionDenied { .. } => "PermissionError",
            StoreError::Io { .. } => "IoError",
            StoreError::Serialization(_) => "SerializationError",
            StoreError::InvalidId { .. } => "InvalidSessionId",
        }
    }
}

/// Errors raised by external collaborators (planner, search provider, report generator).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Authentication failed for {service}")]
    Auth { service: String },

    #[error("Rate limited by {service}")]
    RateLimited { service: String },

    #[error("Connection to {service} failed: {message}")]
    Connection { service: String, message: String },

    #[error("Request to {service} timed out after {timeout_secs}s")]
    Timeout { service: String, timeout_secs: u64 },

    #[error("Invalid response from {service}: {message}")]
    InvalidResponse { service: String, message: String },

    #[error("{message}")]
    Other { message: String },
}

impl CollaboratorError {
    /// Stable category name, safe to show to users.
    pub fn category(&self) -> &'static str {
        match self {
            CollaboratorError::Auth { .. } => "AuthenticationError",
            CollaboratorError::RateLimited { .. } => "RateLimitError",
            CollaboratorError::Connection { .. } => "ConnectionError",
            CollaboratorError::Timeout { .. } => "TimeoutError",
            CollaboratorError::InvalidResponse { .. } => "InvalidResponseError",
            CollaboratorError::Other { .. } => "CollaboratorError",
        }
    }
}

/// The pipeline stage an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Planning,
    Searching,
    Reporting,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Planning => "search planning",
            Stage::Searching => "searching",
            Stage::Reporting => "report writing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A failure that stops the pipeline from advancing past a stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Stage timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Background task failed: {message}")]
    Task { message: String },
}

impl StageError {
    /// Category name only; never includes the underlying message.
    pub fn category(&self) -> &'static str {
        match self {
            StageError::Collaborator(e) => e.category(),
            StageError::Store(e) => e.category(),
            StageError::Timeout { .. } => "TimeoutError",
            StageError::Task { .. } => "TaskError",
        }
    }

    /// Actionable advice for the user, keyed by category.
    pub fn advice(&self) -> &'static str {
        match self.category() {
            "AuthenticationError" => {
                "Please check that your API key is valid and properly set in your environment variables."
            }
            "RateLimitError" => {
                "You've hit the rate limit for the API. Please wait a moment and try again."
            }
            "ConnectionError" => {
                "Could not connect to the API. Please check your internet connection and try again."
            }
            "TimeoutError" => "The request took too long. Try again, or raise the configured timeout.",
            "PermissionError" => {
                "Permission denied when accessing a file. Please check your file permissions."
            }
            "InvalidResponseError" => {
                "The service returned an unexpected response. This is usually temporary; please try again."
            }
            _ => "For more information, run with --verbose to enable debug logging.",
        }
    }

    /// User-facing message for this error: category and advice, no raw detail.
    pub fn sanitized(&self, stage: Stage) -> String {
        format!(
            "A {} occurred during {}. {}",
            self.category(),
            stage,
            self.advice()
        )
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),
}
