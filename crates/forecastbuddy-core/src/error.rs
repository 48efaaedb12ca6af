//! Centralized error types for the ForecastBuddy application.
//!
//! This module provides a typed error hierarchy that:
//! - Enables precise error handling throughout the codebase
//! - Provides user-friendly messages suitable for a dismissible notification
//! - Preserves full error context for debugging/logging

use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` to get a UI-appropriate message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Forecast error: {0}")]
    Forecast(#[from] ForecastFailure),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Database(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Forecast(e) => e.user_message(),
            AppError::Io(_) => "A file operation failed. Please try again.",
        }
    }
}

/// HTTP client errors raised before any forecast request is made.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ClientSetup(_) => {
                "Unable to set up secure connections. Check your system TLS setup."
            }
        }
    }
}

/// Database/storage errors (SQLite forecast store).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Data corruption detected: {0}")]
    Corruption(String),
}

impl DatabaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            DatabaseError::ConnectionFailed(_) => {
                "Unable to access saved forecasts. Try restarting the app."
            }
            DatabaseError::QueryFailed(_) => "A data operation failed. Please try again.",
            DatabaseError::Corruption(_) => {
                "Saved forecasts may be corrupted. Consider removing and re-adding your pins."
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or parsed
    #[error("Configuration parse error: {0}")]
    ParseError(String),

    /// The file parsed but failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::MissingSetting(_) => "A required setting is missing. Check your settings.",
        }
    }
}

/// Failures of a single forecast request, as shown to the user.
#[derive(Debug, Error)]
pub enum ForecastFailure {
    #[error("Weather service unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("Weather service returned bad data: {0}")]
    InvalidResponse(String),

    #[error("Forecast request timed out")]
    Timeout,

    #[error("Forecast request cancelled")]
    Cancelled,

    #[error("Failed to save forecast: {0}")]
    StoreWriteFailed(String),
}

impl ForecastFailure {
    pub fn user_message(&self) -> &'static str {
        match self {
            ForecastFailure::NetworkUnavailable(_) => {
                "Weather service unavailable. Check your connection and try again."
            }
            ForecastFailure::InvalidResponse(_) => "Bad weather data received. Please try again.",
            ForecastFailure::Timeout => "The forecast took too long to load. Please try again.",
            ForecastFailure::Cancelled => "The forecast request was cancelled.",
            ForecastFailure::StoreWriteFailed(_) => {
                "Forecast loaded but could not be saved. It may be fetched again later."
            }
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        NetworkError::ClientSetup(self.to_string())
    }
}

/// Extension trait for converting rusqlite errors to our error types.
pub trait RusqliteErrorExt {
    fn into_database_error(self) -> DatabaseError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_database_error(self) -> DatabaseError {
        match &self {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                DatabaseError::Corruption(self.to_string())
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::CannotOpen =>
            {
                DatabaseError::ConnectionFailed(self.to_string())
            }
            _ => DatabaseError::QueryFailed(self.to_string()),
        }
    }
}
