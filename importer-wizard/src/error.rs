// Importer error taxonomy
//
// Every step operation returns `Result<T, ImporterError>`; the wizard turns the error into
// the single `last_error` string shown in the banner. Nothing here is fatal to the process.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImporterError {
    /// Client-side check failed before anything was sent to the backend.
    #[error("{0}")]
    Validation(String),

    /// Network/connectivity failure. `details` is for logs only and never rendered.
    #[error("Failed to {action}")]
    Transport { action: String, details: String },

    /// Backend answered but with `status != "success"`; the message is passed through verbatim.
    #[error("{0}")]
    BackendRejection(String),

    #[error("Schema is malformed: {0}")]
    SchemaMalformed(String),

    /// Terminal `failed` status reported by the polling loop.
    #[error("{0}")]
    JobFailed(String),

    /// Local session file could not be written or removed.
    #[error("Session storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ImporterError>;

impl ImporterError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(action: impl Into<String>, details: impl std::fmt::Display) -> Self {
        Self::Transport {
            action: action.into(),
            details: details.to_string(),
        }
    }

    /// Message suitable for the top-level error banner.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Internal details for logging (falls back to the user message).
    pub fn log_details(&self) -> String {
        match self {
            Self::Transport { action, details } => format!("{}: {}", action, details),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display_hides_details() {
        let err = ImporterError::transport("upload file", "tcp connect error: errno=111");
        assert_eq!(err.user_message(), "Failed to upload file");
        assert!(!err.user_message().contains("errno"));
        assert!(err.log_details().contains("errno=111"));
    }

    #[test]
    fn backend_rejection_passes_message_verbatim() {
        let err = ImporterError::BackendRejection("Unsupported file format".to_string());
        assert_eq!(err.to_string(), "Unsupported file format");
    }

    #[test]
    fn importer_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ImporterError>();
    }
}
