//! Appointment booking core.
//!
//! - [`availability`] turns working hours into a grid of candidate start times.
//! - [`validator`] admits or rejects a candidate against the day's bookings.
//! - [`reservation`] commits bookings atomically per practitioner and date.
//! - [`store`] holds the persistence seams and their in-memory and SQLite adapters.

pub mod availability;
pub mod config;
pub mod error;
pub mod models;
pub mod reservation;
pub mod store;
pub mod validator;

pub use error::{BookingError, BookingResult, Rejection, StorageError};
pub use models::{
    Booking, BookingId, BookingRequest, BookingStatus, Practitioner, PractitionerId, SubjectId,
    TimeSpan, WorkingHours,
};
pub use reservation::ReservationDesk;
