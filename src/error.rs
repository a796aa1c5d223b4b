//! Typed outcomes for the booking core.
//!
//! Rejections are user- or caller-correctable and never come from storage.
//! Storage errors are infrastructure failures; a commit that fails with one
//! leaves nothing behind, and unless `is_retryable` says otherwise it can be
//! resubmitted unchanged.

use chrono::NaiveTime;
use thiserror::Error;

use crate::models::{BookingId, BookingStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "Start {} is outside working hours {}-{}",
        .start.format("%H:%M"),
        .opens.format("%H:%M"),
        .closes.format("%H:%M")
    )]
    OutsideWorkingHours {
        start: NaiveTime,
        opens: NaiveTime,
        closes: NaiveTime,
    },

    #[error(
        "Slot conflicts with booking {conflicting} ({}-{})",
        .start.format("%H:%M"),
        .end.format("%H:%M")
    )]
    SlotConflict {
        conflicting: BookingId,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("Booking cannot move from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        StorageError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

/// Outcome of any core operation that may reach storage.
#[derive(Error, Debug)]
pub enum BookingError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Storage failure: {0}")]
    Failed(#[from] StorageError),
}

impl BookingError {
    /// Transient storage failures are worth resubmitting as-is.
    /// Constraint violations fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::Failed(StorageError::Sqlite(err)) => !matches!(
                err,
                rusqlite::Error::SqliteFailure(e, _)
                    if e.code == rusqlite::ErrorCode::ConstraintViolation
            ),
            BookingError::Failed(StorageError::LockPoisoned) => true,
            _ => false,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            BookingError::Rejected(rejection) => Some(rejection),
            BookingError::Failed(_) => None,
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
