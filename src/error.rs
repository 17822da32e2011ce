//! # Error Handling
//!
//! Every failure a unit of work can hit is expressed as an [`AppError`] and
//! converted into exactly one HTTP response at the handler boundary.
//!
//! ## Error Categories:
//! - **Input**: the client forgot a required field or sent something unreadable (400)
//! - **Configuration**: a required external executable is missing (500)
//! - **Process**: an external tool failed to launch or exited nonzero (500)
//! - **Conversion**: the audio format converter failed (500)
//! - **Io**: reading or writing a workspace file failed (500)
//! - **Timeout**: an external tool outlived the watchdog (500)
//!
//! ## JSON Response Format:
//! ```json
//! { "error": "encode failed", "details": "<captured stderr>" }
//! ```
//! `details` is omitted when there is nothing to add.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error};

#[derive(Debug)]
pub enum AppError {
    /// Missing or malformed request data
    Input(String),

    /// A required external executable is absent or not executable
    Configuration(String),

    /// External tool failed to launch or exited with a nonzero status
    Process {
        error: String,
        details: Option<String>,
    },

    /// The audio format converter failed
    Conversion {
        error: String,
        details: Option<String>,
    },

    /// Temp file read/write failure
    Io {
        error: String,
        details: Option<String>,
    },

    /// External tool exceeded the configured watchdog
    Timeout(String),
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    /// Short machine-readable category, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Input(_) => "input_error",
            AppError::Configuration(_) => "configuration_error",
            AppError::Process { .. } => "process_error",
            AppError::Conversion { .. } => "conversion_error",
            AppError::Io { .. } => "io_error",
            AppError::Timeout(_) => "timeout_error",
        }
    }

    /// The client-facing message.
    pub fn message(&self) -> &str {
        match self {
            AppError::Input(msg) | AppError::Configuration(msg) | AppError::Timeout(msg) => msg,
            AppError::Process { error, .. }
            | AppError::Conversion { error, .. }
            | AppError::Io { error, .. } => error,
        }
    }

    /// Diagnostic detail (usually a captured stderr), if any.
    pub fn details(&self) -> Option<&str> {
        match self {
            AppError::Process { details, .. }
            | AppError::Conversion { details, .. }
            | AppError::Io { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.message().to_string(),
            details: self.details().map(str::to_string),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Input(msg) => write!(f, "Bad request: {}", msg),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Process { error, .. } => write!(f, "Process error: {}", error),
            AppError::Conversion { error, .. } => write!(f, "Conversion error: {}", error),
            AppError::Io { error, .. } => write!(f, "I/O error: {}", error),
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Status code mapping:
/// - Input → 400
/// - everything else → 500
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Input(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), details = ?self.details(), "{}", self);
        } else {
            debug!(kind = self.kind(), "{}", self);
        }
        HttpResponse::build(status).json(self.to_body())
    }
}

/// Workspace and file I/O failures.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io {
            error: "workspace I/O failed".to_string(),
            details: Some(err.to_string()),
        }
    }
}

/// A broken multipart stream is the client's fault.
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::Input(format!("invalid multipart payload: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
