// src/error/types.rs
use crate::domain::DomainError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // ------------------------------------------------------------------
    // Typed request failures (surfaced verbatim to the requester)
    // ------------------------------------------------------------------
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NothingFound(String),

    #[error("{0}")]
    MovieNotFound(String),

    #[error("{0}")]
    EpisodeNotFound(String),

    #[error("{0}")]
    QuoteNotFound(String),

    #[error("{0}")]
    SubtitlesNotFound(String),

    #[error("{0}")]
    InexistentTimestamp(String),

    #[error("{0}")]
    LimitExceeded(String),

    #[error("{0}")]
    RecentPostFound(String),

    #[error("{0}")]
    DuplicateRequest(String),

    /// The request cannot be handled and must be skipped (marked used).
    #[error("{0}")]
    Unwanted(String),

    /// A typed failure tied to one bracket of the request.
    #[error("Bracket #{index}: {source}")]
    Bracket {
        index: usize,
        #[source]
        source: Box<AppError>,
    },

    // ------------------------------------------------------------------
    // Infrastructure failures
    // ------------------------------------------------------------------
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Resource not found")]
    NotFound,

    #[error("Other error: {0}")]
    Other(String),
}

impl AppError {
    /// Wrap a typed failure with the index of the bracket that produced it.
    pub fn at_bracket(self, index: usize) -> Self {
        match self {
            already @ AppError::Bracket { .. } => already,
            other => AppError::Bracket {
                index,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, unwrapping bracket annotations.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Bracket { source, .. } => source.root(),
            other => other,
        }
    }

    /// Typed errors are user-facing; everything else is fatal for the job.
    pub fn is_typed(&self) -> bool {
        matches!(
            self.root(),
            AppError::InvalidRequest(_)
                | AppError::NothingFound(_)
                | AppError::MovieNotFound(_)
                | AppError::EpisodeNotFound(_)
                | AppError::QuoteNotFound(_)
                | AppError::SubtitlesNotFound(_)
                | AppError::InexistentTimestamp(_)
                | AppError::LimitExceeded(_)
                | AppError::RecentPostFound(_)
                | AppError::DuplicateRequest(_)
                | AppError::Unwanted(_)
        )
    }

    /// Whether the request that raised this error should be marked used
    /// instead of retried later.
    pub fn should_skip(&self) -> bool {
        self.is_typed()
            && !matches!(
                self.root(),
                AppError::RecentPostFound(_) | AppError::LimitExceeded(_)
            )
    }

    /// Short name of the error kind, used for counters and logs.
    pub fn kind(&self) -> &'static str {
        match self.root() {
            AppError::InvalidRequest(_) => "InvalidRequest",
            AppError::NothingFound(_) => "NothingFound",
            AppError::MovieNotFound(_) => "MovieNotFound",
            AppError::EpisodeNotFound(_) => "EpisodeNotFound",
            AppError::QuoteNotFound(_) => "QuoteNotFound",
            AppError::SubtitlesNotFound(_) => "SubtitlesNotFound",
            AppError::InexistentTimestamp(_) => "InexistentTimestamp",
            AppError::LimitExceeded(_) => "LimitExceeded",
            AppError::RecentPostFound(_) => "RecentPostFound",
            AppError::DuplicateRequest(_) => "DuplicateRequest",
            AppError::Unwanted(_) => "KinoUnwantedException",
            AppError::Bracket { .. } => "Bracket",
            AppError::Database(_) => "Database",
            AppError::Pool(_) => "Pool",
            AppError::Domain(_) => "Domain",
            AppError::Serialization(_) => "Serialization",
            AppError::Io(_) => "Io",
            AppError::Image(_) => "Image",
            AppError::Http(_) => "Http",
            AppError::Timeout(_) => "Timeout",
            AppError::NotFound => "NotFound",
            AppError::Other(_) => "Other",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::Other(format!("UUID error: {}", err))
    }
}

impl From<chrono::ParseError> for AppError {
    fn from(err: chrono::ParseError) -> Self {
        AppError::Other(format!("Date parse error: {}", err))
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::Pool(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Other(format!("Background task failed: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_wrapping_keeps_typed_root() {
        let err = AppError::InexistentTimestamp("beyond duration".to_string()).at_bracket(2);
        assert!(err.is_typed());
        assert_eq!(err.kind(), "InexistentTimestamp");
        assert_eq!(err.to_string(), "Bracket #2: beyond duration");

        // Re-wrapping keeps the original index
        let err = err.at_bracket(5);
        assert!(matches!(err, AppError::Bracket { index: 2, .. }));
    }

    #[test]
    fn test_untyped_errors_are_fatal() {
        assert!(!AppError::Other("boom".to_string()).is_typed());
        assert!(!AppError::NotFound.is_typed());
    }

    #[test]
    fn test_cooldown_is_not_skipped() {
        assert!(!AppError::RecentPostFound("cooldown".to_string()).should_skip());
        assert!(AppError::QuoteNotFound("nope".to_string()).should_skip());
    }
}
