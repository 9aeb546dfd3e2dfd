// src/application/error_handling.rs
//
// Error replies for front-ends
//
// ARCHITECTURE:
// - Maps AppError -> the reply a requester or operator sees
// - Typed failures are shown verbatim, with their bracket when known
// - Infrastructure failures are logged and replaced by a generic message

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Reply sent back to whoever submitted a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error_type: ErrorType,
    /// Short kind name, e.g. `MovieNotFound`
    pub kind: String,
    pub message: String,
    pub bracket: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Grammar or option problem
    InvalidRequest,

    /// Media, quote, subtitle or frame lookup miss
    NotFound,

    /// Daily role limit hit
    Limit,

    /// Already queued or published
    Duplicate,

    /// Channel cooling down
    Cooldown,

    /// Request dropped from the queue
    Skipped,

    /// Anything untyped
    Internal,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        let bracket = match error {
            AppError::Bracket { index, .. } => Some(*index),
            _ => None,
        };

        let error_type = match error.root() {
            AppError::InvalidRequest(_) => ErrorType::InvalidRequest,
            AppError::NothingFound(_)
            | AppError::MovieNotFound(_)
            | AppError::EpisodeNotFound(_)
            | AppError::QuoteNotFound(_)
            | AppError::SubtitlesNotFound(_)
            | AppError::InexistentTimestamp(_) => ErrorType::NotFound,
            AppError::LimitExceeded(_) => ErrorType::Limit,
            AppError::DuplicateRequest(_) => ErrorType::Duplicate,
            AppError::RecentPostFound(_) => ErrorType::Cooldown,
            AppError::Unwanted(_) => ErrorType::Skipped,
            _ => ErrorType::Internal,
        };

        let message = if error.is_typed() {
            error.to_string()
        } else {
            log::error!("Internal error behind a reply: {:?}", error);
            "Something went wrong on our side. The request was not queued".to_string()
        };

        Self {
            success: false,
            error_type,
            kind: error.kind().to_string(),
            message,
            bracket,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_type: ErrorType::InvalidRequest,
            kind: "InvalidRequest".to_string(),
            message: message.into(),
            bracket: None,
        }
    }

    /// Plain text for chat replies
    pub fn reply(&self) -> String {
        match self.error_type {
            ErrorType::Limit => format!(
                "{}. Become a patron to skip daily limits",
                self.message.trim_end_matches('.')
            ),
            _ => self.message.clone(),
        }
    }
}

/// Helper trait to convert Results to ErrorResponse
pub trait ToErrorResponse<T> {
    fn to_error_response(self) -> Result<T, ErrorResponse>;
}

impl<T> ToErrorResponse<T> for Result<T, AppError> {
    fn to_error_response(self) -> Result<T, ErrorResponse> {
        self.map_err(|e| ErrorResponse::from_app_error(&e))
    }
}
