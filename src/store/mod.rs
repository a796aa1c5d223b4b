//! Persistence and profile seams used by the reservation desk.
//!
//! Two adapters ship with the crate: [`MemoryStore`] and [`SqliteStore`].
//! Both enforce the one durable rule the core depends on: a practitioner
//! never holds two overlapping blocking bookings on the same date.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::NaiveDate;
use thiserror::Error;

use crate::error::StorageError;
use crate::models::{
    Booking, BookingId, BookingRequest, BookingStatus, Practitioner, PractitionerId,
};
use crate::validator;

/// Supplies practitioner identity and working hours. Read-only to the core.
pub trait ProfileStore: Send + Sync {
    fn practitioner(&self, id: PractitionerId) -> Result<Practitioner, StorageError>;

    fn save_practitioner(&self, practitioner: &Practitioner) -> Result<(), StorageError>;
}

#[derive(Error, Debug)]
pub enum InsertError {
    /// Another blocking booking already holds part of the interval.
    #[error("Booking overlaps {}", .0.id)]
    Overlap(Booking),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub trait BookingStore: Send + Sync {
    /// Bookings of one practitioner on one date, ordered by start.
    fn bookings_on(
        &self,
        practitioner: PractitionerId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StorageError>;

    /// Every booking of a practitioner, ordered by date then start.
    fn bookings_for(&self, practitioner: PractitionerId) -> Result<Vec<Booking>, StorageError>;

    fn booking(&self, id: BookingId) -> Result<Booking, StorageError>;

    /// Insert atomically. Nothing is written when the booking overlaps a
    /// blocking booking of the same practitioner and date.
    fn insert(&self, booking: &Booking) -> Result<(), InsertError>;

    /// Compare-and-set the status. Returns `false` when the stored status
    /// is no longer `expected`.
    fn set_status(
        &self,
        id: BookingId,
        expected: BookingStatus,
        next: BookingStatus,
    ) -> Result<bool, StorageError>;
}

/// Everything the reservation desk needs from one backend.
pub trait Store: ProfileStore + BookingStore {}

impl<T: ProfileStore + BookingStore> Store for T {}

/// The blocking booking in `existing` that `booking` would collide with, if any.
pub(crate) fn overlap_in(existing: &[Booking], booking: &Booking) -> Option<Booking> {
    if !booking.is_blocking() {
        return None;
    }
    let probe = BookingRequest {
        booking_id: Some(booking.id),
        practitioner: booking.practitioner,
        subject: booking.subject,
        date: booking.date,
        start: booking.start,
        duration_minutes: booking.duration_minutes,
        notes: String::new(),
    };
    validator::first_conflict(&probe, existing).cloned()
}
