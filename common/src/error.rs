use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Circuit breaker for '{provider}' is open, retry after {retry_after_secs}s")]
    CircuitOpen {
        provider: String,
        retry_after_secs: u64,
    },
    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),
    #[error("Provider rate limited: {0}")]
    ProviderRateLimit(String),
    #[error("Provider timeout: {0}")]
    ProviderTimeout(String),
    #[error("Provider transport error: {0}")]
    ProviderTransport(String),
    #[error("Embedding service unavailable: {0}")]
    Embedding(String),
    #[error("Clustering unavailable: {0}")]
    Clustering(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

/// Retry category a background job assigns to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Never retried; the owning entity is marked failed immediately.
    Permanent,
    /// Retried with exponential backoff up to the task's max attempts.
    Transient,
    /// Retried up to max attempts, then marked failed.
    Unknown,
}

impl AppError {
    /// Classify this error for the task orchestrator's retry policy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::NotFound(_) | AppError::Validation(_) | AppError::Auth(_) => {
                ErrorCategory::Permanent
            }
            AppError::ProviderAuth(_) => ErrorCategory::Permanent,
            // Missing files and permission problems never fix themselves
            AppError::Io(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                ErrorCategory::Permanent
            }
            AppError::ProviderTimeout(_)
            | AppError::ProviderTransport(_)
            | AppError::ProviderRateLimit(_)
            | AppError::Embedding(_)
            | AppError::Io(_)
            | AppError::Reqwest(_) => ErrorCategory::Transient,
            AppError::CircuitOpen { .. } => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        }
    }

    /// A user-safe message that never leaks internals.
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(_) => "The requested item could not be found.".to_owned(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Auth(_) => "You are not allowed to access this resource.".to_owned(),
            AppError::CircuitOpen {
                retry_after_secs, ..
            } => format!("The model backend is unavailable. Retry in {retry_after_secs}s."),
            AppError::ProviderAuth(_) => {
                "The configured model credentials were rejected.".to_owned()
            }
            AppError::ProviderRateLimit(_) => {
                "The model backend is rate limiting requests. Try again shortly.".to_owned()
            }
            AppError::ProviderTimeout(_) => "The model backend timed out.".to_owned(),
            AppError::Embedding(_) => "Semantic search is temporarily degraded.".to_owned(),
            _ => "Something went wrong. Please try again.".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_permanent_errors() {
        assert_eq!(
            AppError::NotFound("doc".into()).category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            AppError::Validation("empty".into()).category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            AppError::ProviderAuth("bad key".into()).category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn categorizes_transient_errors() {
        assert_eq!(
            AppError::ProviderTimeout("180s".into()).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            AppError::Embedding("connection refused".into()).category(),
            ErrorCategory::Transient
        );
    }

    #[test]
    fn unknown_errors_fall_through() {
        assert_eq!(
            AppError::InternalError("???".into()).category(),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn user_messages_do_not_leak_internals() {
        let err = AppError::InternalError("stack trace with secrets".into());
        assert!(!err.user_message().contains("secrets"));
    }
}
