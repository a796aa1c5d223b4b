//! Slot grid generation for a practitioner's working day.
//!
//! The grid is advisory: it tells a caller which start times to offer, but
//! only the validator (and ultimately the reservation commit) decides whether
//! a booking is admitted.

use chrono::{Duration, NaiveTime};

use crate::error::Rejection;
use crate::models::{Booking, TimeSpan, WorkingHours};

/// Ordered, restartable sequence of slot start times.
///
/// Cloning a grid restarts it from wherever the clone was taken.
#[derive(Debug, Clone)]
pub struct SlotGrid {
    next: Option<NaiveTime>,
    closes: NaiveTime,
    step: Duration,
}

impl Iterator for SlotGrid {
    type Item = NaiveTime;

    fn next(&mut self) -> Option<NaiveTime> {
        let current = self.next?;
        let (advanced, wrapped) = current.overflowing_add_signed(self.step);
        self.next = if wrapped == 0 && advanced < self.closes {
            Some(advanced)
        } else {
            None
        };
        Some(current)
    }
}

/// Generate the slot grid for `hours` in steps of `slot_minutes`.
///
/// A slot is offered when it starts strictly before closing time; it does
/// not have to end before closing.
pub fn generate(hours: &WorkingHours, slot_minutes: u32) -> Result<SlotGrid, Rejection> {
    if slot_minutes == 0 {
        return Err(Rejection::InvalidConfiguration(
            "slot duration must be positive".to_string(),
        ));
    }
    hours.check()?;

    Ok(SlotGrid {
        next: Some(hours.opens),
        closes: hours.closes,
        step: Duration::minutes(i64::from(slot_minutes)),
    })
}

/// Grid slots whose `[slot, slot + slot_minutes)` is clear of every blocking booking.
pub fn open_slots(
    hours: &WorkingHours,
    slot_minutes: u32,
    existing: &[Booking],
) -> Result<Vec<NaiveTime>, Rejection> {
    let blocking: Vec<TimeSpan> = existing
        .iter()
        .filter(|b| b.is_blocking())
        .map(Booking::span)
        .collect();

    Ok(generate(hours, slot_minutes)?
        .filter(|slot| {
            let span = TimeSpan::new(*slot, slot_minutes);
            !blocking.iter().any(|taken| span.overlaps_with(taken))
        })
        .collect())
}

/// Find the first open slot starting at or after `after`.
pub fn next_open_slot(
    hours: &WorkingHours,
    slot_minutes: u32,
    existing: &[Booking],
    after: NaiveTime,
) -> Result<Option<NaiveTime>, Rejection> {
    Ok(open_slots(hours, slot_minutes, existing)?
        .into_iter()
        .find(|slot| *slot >= after))
}
