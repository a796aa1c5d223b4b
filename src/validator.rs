//! Admission check for a candidate booking.
//!
//! Pure and storage-free: the same inputs always produce the same answer,
//! so the overlap rules can be exercised without a database.

use tracing::debug;

use crate::error::Rejection;
use crate::models::{Booking, BookingRequest, WorkingHours};

/// Decide whether `candidate` may be admitted next to `existing`.
///
/// `existing` may contain bookings of other practitioners or dates,
/// non-blocking bookings, or the candidate itself; all of those are ignored.
/// Conflicts are reported in chronological order, earliest first.
pub fn validate(
    hours: &WorkingHours,
    candidate: &BookingRequest,
    existing: &[Booking],
) -> Result<(), Rejection> {
    if candidate.duration_minutes == 0 {
        return Err(Rejection::InvalidConfiguration(
            "booking duration must be positive".to_string(),
        ));
    }
    hours.check()?;

    if !hours.admits_start(candidate.start) {
        debug!(
            practitioner = %candidate.practitioner,
            start = %candidate.start,
            hours = %hours,
            "candidate starts outside working hours"
        );
        return Err(Rejection::OutsideWorkingHours {
            start: candidate.start,
            opens: hours.opens,
            closes: hours.closes,
        });
    }

    if let Some(conflict) = first_conflict(candidate, existing) {
        debug!(
            practitioner = %candidate.practitioner,
            date = %candidate.date,
            conflicting = %conflict.id,
            "candidate overlaps an existing booking"
        );
        return Err(Rejection::SlotConflict {
            conflicting: conflict.id,
            start: conflict.start,
            end: conflict.end(),
        });
    }

    Ok(())
}

/// Earliest blocking booking of the same practitioner and date whose
/// interval intersects the candidate's.
pub fn first_conflict<'a>(
    candidate: &BookingRequest,
    existing: &'a [Booking],
) -> Option<&'a Booking> {
    let span = candidate.span();
    let mut rivals: Vec<&Booking> = existing
        .iter()
        .filter(|b| {
            b.is_blocking()
                && b.practitioner == candidate.practitioner
                && b.date == candidate.date
                && Some(b.id) != candidate.booking_id
        })
        .collect();
    rivals.sort_by_key(|b| b.start);

    // Sorted by start: nothing starting at or after the candidate's end can overlap.
    rivals
        .into_iter()
        .take_while(|b| b.span().start_secs() < span.end_secs())
        .find(|b| b.span().overlaps_with(&span))
}
