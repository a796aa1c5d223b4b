//! Data models for the booking core.
//!
//! This module defines the core data structures used throughout the system:
//! - Identifiers: practitioner, subject (patient) and booking ids
//! - WorkingHours: the daily window a practitioner accepts bookings in
//! - Practitioner: the profile that owns the working hours
//! - BookingStatus: lifecycle of a booking
//! - BookingRequest: a candidate booking submitted by a caller
//! - Booking: a persisted appointment
//! - TimeSpan: half-open interval arithmetic on a single day

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Rejection, StorageError};

/// Default appointment length in minutes.
pub const DEFAULT_DURATION_MINUTES: u32 = 30;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

uuid_id!(PractitionerId);
uuid_id!(SubjectId);
uuid_id!(BookingId);

/// Daily window in which a practitioner accepts bookings.
///
/// `opens < closes` is expected; consumers check it with [`WorkingHours::check`]
/// rather than trusting whatever the profile store handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub opens: NaiveTime,
    pub closes: NaiveTime,
}

impl WorkingHours {
    /// Create working hours, rejecting an empty or inverted window.
    pub fn new(opens: NaiveTime, closes: NaiveTime) -> Result<Self, Rejection> {
        let hours = WorkingHours { opens, closes };
        hours.check()?;
        Ok(hours)
    }

    pub fn check(&self) -> Result<(), Rejection> {
        if self.opens >= self.closes {
            return Err(Rejection::InvalidConfiguration(format!(
                "working hours must open before they close (got {} - {})",
                self.opens.format("%H:%M"),
                self.closes.format("%H:%M")
            )));
        }
        Ok(())
    }

    /// Only the start instant is checked; a booking may run past closing.
    pub fn admits_start(&self, start: NaiveTime) -> bool {
        self.opens <= start && start < self.closes
    }
}

impl fmt::Display for WorkingHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.opens.format("%H:%M"),
            self.closes.format("%H:%M")
        )
    }
}

/// Practitioner profile as supplied by the profile store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Practitioner {
    pub id: PractitionerId,
    pub name: String,
    pub license_number: String,
    pub specialty: String,
    pub phone: String,
    pub hours: WorkingHours,
}

impl Practitioner {
    /// Create a new practitioner profile with validation.
    pub fn new(
        name: String,
        license_number: String,
        specialty: String,
        hours: WorkingHours,
    ) -> Result<Self, Rejection> {
        if name.trim().is_empty() {
            return Err(Rejection::InvalidConfiguration(
                "practitioner name cannot be empty".to_string(),
            ));
        }
        if license_number.trim().is_empty() {
            return Err(Rejection::InvalidConfiguration(
                "license number cannot be empty".to_string(),
            ));
        }
        hours.check()?;

        Ok(Practitioner {
            id: PractitionerId::new(),
            name,
            license_number,
            specialty,
            phone: String::new(),
            hours,
        })
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into().trim().to_string();
        self
    }
}

impl fmt::Display for Practitioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.specialty)
    }
}

/// Lifecycle of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookingStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Scheduled and confirmed bookings hold their interval.
    pub fn is_blocking(&self) -> bool {
        matches!(self, BookingStatus::Scheduled | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Scheduled, Confirmed)
                | (Scheduled, Cancelled)
                | (Scheduled, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "scheduled" => Ok(BookingStatus::Scheduled),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            _ => Err(StorageError::InvalidEnum {
                field: "status".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// Half-open interval `[start, end)` in seconds from midnight.
///
/// The end may exceed 24h; spans never wrap around to the next morning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    start: i64,
    end: i64,
}

impl TimeSpan {
    pub fn new(start: NaiveTime, duration_minutes: u32) -> Self {
        let start = i64::from(start.num_seconds_from_midnight());
        TimeSpan {
            start,
            end: start + i64::from(duration_minutes) * 60,
        }
    }

    pub fn start_secs(&self) -> i64 {
        self.start
    }

    pub fn end_secs(&self) -> i64 {
        self.end
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps_with(&self, other: &TimeSpan) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains(&self, instant: NaiveTime) -> bool {
        let secs = i64::from(instant.num_seconds_from_midnight());
        self.start <= secs && secs < self.end
    }
}

/// Start time plus duration as a clock reading (wraps at midnight).
pub fn end_of(start: NaiveTime, duration_minutes: u32) -> NaiveTime {
    start
        .overflowing_add_signed(Duration::minutes(i64::from(duration_minutes)))
        .0
}

/// A candidate booking submitted for validation or commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    /// Set when re-validating an existing booking so it does not collide with itself.
    pub booking_id: Option<BookingId>,
    pub practitioner: PractitionerId,
    pub subject: SubjectId,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_minutes: u32,
    pub notes: String,
}

impl BookingRequest {
    pub fn new(
        practitioner: PractitionerId,
        subject: SubjectId,
        date: NaiveDate,
        start: NaiveTime,
    ) -> Self {
        BookingRequest {
            booking_id: None,
            practitioner,
            subject,
            date,
            start,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            notes: String::new(),
        }
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn span(&self) -> TimeSpan {
        TimeSpan::new(self.start, self.duration_minutes)
    }

    pub fn end(&self) -> NaiveTime {
        end_of(self.start, self.duration_minutes)
    }
}

/// A persisted appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: BookingId,
    pub practitioner: PractitionerId,
    pub subject: SubjectId,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub notes: String,
}

impl Booking {
    /// Materialize a request into a fresh `scheduled` booking.
    pub fn from_request(request: &BookingRequest) -> Self {
        Booking {
            id: request.booking_id.unwrap_or_default(),
            practitioner: request.practitioner,
            subject: request.subject,
            date: request.date,
            start: request.start,
            duration_minutes: request.duration_minutes,
            status: BookingStatus::Scheduled,
            notes: request.notes.clone(),
        }
    }

    pub fn span(&self) -> TimeSpan {
        TimeSpan::new(self.start, self.duration_minutes)
    }

    pub fn end(&self) -> NaiveTime {
        end_of(self.start, self.duration_minutes)
    }

    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }
}

impl fmt::Display for Booking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}–{} [{}]",
            self.date.format("%Y-%m-%d"),
            self.start.format("%H:%M"),
            self.end().format("%H:%M"),
            self.status
        )
    }
}
