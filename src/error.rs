//! Error types for the Playfeed engine
//!
//! - `thiserror` for the error definitions
//! - Variants grouped by where they originate (config, storage, core computation, API)
//! - HTTP status code mapping for API responses
//!
//! Core failures fall into three buckets. `MissingColumn` and `Decomposition` are
//! absorbed where they happen (the caller gets a degraded but valid result).
//! `Computation` and storage errors surface once as an internal error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Playfeed engine
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    #[error("Configuration error: {message}")]
    Config {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: &'static str },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig {
        key: &'static str,
        message: Cow<'static, str>,
    },

    // ========================================================================
    // Database Errors
    // ========================================================================
    #[error("Database error: {message}")]
    Database {
        message: Cow<'static, str>,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Database connection pool exhausted")]
    PoolExhausted,

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: Cow<'static, str> },

    #[error("Migration error: {0}")]
    Migration(String),

    // ========================================================================
    // Recommendation Core Errors
    // ========================================================================
    #[error("Column '{column}' missing from {table} table")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    #[error("Matrix decomposition failed: {message}")]
    Decomposition { message: Cow<'static, str> },

    #[error("Recommendation computation failed: {message}")]
    Computation { message: Cow<'static, str> },

    #[error("Invalid fusion weights: {message}")]
    InvalidWeights { message: Cow<'static, str> },

    // ========================================================================
    // API Errors
    // ========================================================================
    #[error("Bad request: {message}")]
    BadRequest { message: Cow<'static, str> },

    #[error("Internal server error")]
    Internal {
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn decomposition(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Decomposition {
            message: message.into(),
        }
    }

    pub fn computation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal {
            source: Some(Box::new(source)),
        }
    }

    // ========================================================================
    // Error Classification
    // ========================================================================

    /// Returns true if this error should be logged at error level
    pub fn is_error_level(&self) -> bool {
        matches!(
            self,
            Error::Database { .. }
                | Error::Computation { .. }
                | Error::Internal { .. }
                | Error::Migration(_)
        )
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } | Error::MissingEnvVar { .. } | Error::InvalidConfig { .. } => {
                "CONFIG_ERROR"
            }
            Error::Database { .. }
            | Error::PoolExhausted
            | Error::ConstraintViolation { .. }
            | Error::Migration(_) => "DATABASE_ERROR",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::MissingColumn { .. }
            | Error::Decomposition { .. }
            | Error::Computation { .. }
            | Error::InvalidWeights { .. } => "RECOMMENDATION_ERROR",
            Error::BadRequest { .. } => "BAD_REQUEST",
            Error::Json(_) => "SERIALIZATION_ERROR",
            Error::Internal { .. } | Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ============================================================================
// Error Response for API
// ============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Don't expose internal error details
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound {
                entity_type: "record",
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut => Error::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    return Error::ConstraintViolation {
                        message: format!("Constraint '{}' violated", constraint).into(),
                    };
                }
                Error::Database {
                    message: db_err.message().to_string().into(),
                    source: Some(err),
                }
            }
            _ => Error::Database {
                message: err.to_string().into(),
                source: Some(err),
            },
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::computation(format!("matrix task did not complete: {}", err))
    }
}

/// Degrade a `MissingColumn` failure into an empty result
///
/// Other errors pass through unchanged.
pub fn absorb_missing<T: Default>(result: Result<T>) -> Result<T> {
    match result {
        Err(e @ Error::MissingColumn { .. }) => {
            tracing::warn!("{}; substituting an empty result", e);
            metrics::counter!("playfeed_missing_columns_total").increment(1);
            Ok(T::default())
        }
        other => other,
    }
}
