//! Reservation desk: the only component that writes bookings.
//!
//! The desk serializes commits per (practitioner, date). Validation and
//! insert for one key run under that key's lock, so two concurrent requests
//! for overlapping intervals cannot both pass validation. Requests for other
//! practitioners or other dates take different locks and never wait on each
//! other. The store's own atomic insert remains the durable backstop.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::availability;
use crate::error::{BookingError, BookingResult, Rejection};
use crate::models::{
    Booking, BookingId, BookingRequest, BookingStatus, Practitioner, PractitionerId,
    DEFAULT_DURATION_MINUTES,
};
use crate::store::{InsertError, Store};
use crate::validator;

type DayKey = (PractitionerId, NaiveDate);

pub struct ReservationDesk<S> {
    store: S,
    default_slot_minutes: u32,
    day_locks: DashMap<DayKey, Arc<Mutex<()>>>,
}

impl<S: Store> ReservationDesk<S> {
    pub fn new(store: S) -> Self {
        ReservationDesk {
            store,
            default_slot_minutes: DEFAULT_DURATION_MINUTES,
            day_locks: DashMap::new(),
        }
    }

    pub fn with_slot_minutes(mut self, minutes: u32) -> Self {
        self.default_slot_minutes = minutes;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn default_slot_minutes(&self) -> u32 {
        self.default_slot_minutes
    }

    /// Save a practitioner profile after checking its working hours.
    pub fn register_practitioner(&self, practitioner: &Practitioner) -> BookingResult<()> {
        practitioner.hours.check()?;
        self.store.save_practitioner(practitioner)?;
        info!(
            practitioner = %practitioner.id,
            hours = %practitioner.hours,
            "practitioner registered"
        );
        Ok(())
    }

    /// Open slots for a day, from a snapshot of the current bookings.
    ///
    /// Advisory only: a slot listed here can be taken before it is committed.
    pub fn available_slots(
        &self,
        practitioner: PractitionerId,
        date: NaiveDate,
        slot_minutes: Option<u32>,
    ) -> BookingResult<Vec<NaiveTime>> {
        let profile = self.store.practitioner(practitioner)?;
        let existing = self.store.bookings_on(practitioner, date)?;
        let minutes = slot_minutes.unwrap_or(self.default_slot_minutes);
        Ok(availability::open_slots(&profile.hours, minutes, &existing)?)
    }

    /// First open slot at or after `after`, used to offer an alternative.
    pub fn next_open_slot(
        &self,
        practitioner: PractitionerId,
        date: NaiveDate,
        after: NaiveTime,
        slot_minutes: Option<u32>,
    ) -> BookingResult<Option<NaiveTime>> {
        let profile = self.store.practitioner(practitioner)?;
        let existing = self.store.bookings_on(practitioner, date)?;
        let minutes = slot_minutes.unwrap_or(self.default_slot_minutes);
        Ok(availability::next_open_slot(&profile.hours, minutes, &existing, after)?)
    }

    /// Validate without writing anything.
    pub fn check(&self, request: &BookingRequest) -> BookingResult<()> {
        let profile = self.store.practitioner(request.practitioner)?;
        let existing = self.store.bookings_on(request.practitioner, request.date)?;
        validator::validate(&profile.hours, request, &existing)?;
        Ok(())
    }

    /// Validate and persist a new booking as one atomic step.
    ///
    /// On `Ok` the booking is already visible to every later validation.
    pub fn commit(&self, request: &BookingRequest) -> BookingResult<BookingId> {
        let candidate = BookingRequest {
            booking_id: None,
            ..request.clone()
        };
        let profile = self.store.practitioner(candidate.practitioner)?;

        let key = (candidate.practitioner, candidate.date);
        let lock = self.day_lock(key);
        let outcome = {
            // The guarded value is `()`, so a poisoned lock carries no broken state.
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.validate_and_insert(&profile, &candidate)
        };
        self.release_day_lock(key, lock);

        match &outcome {
            Ok(id) => info!(
                booking = %id,
                practitioner = %candidate.practitioner,
                date = %candidate.date,
                start = %candidate.start,
                minutes = candidate.duration_minutes,
                "booking committed"
            ),
            Err(BookingError::Rejected(reason)) => warn!(
                practitioner = %candidate.practitioner,
                date = %candidate.date,
                start = %candidate.start,
                %reason,
                "booking rejected"
            ),
            Err(BookingError::Failed(err)) => error!(
                practitioner = %candidate.practitioner,
                date = %candidate.date,
                %err,
                "booking commit failed"
            ),
        }
        outcome
    }

    fn validate_and_insert(
        &self,
        profile: &Practitioner,
        candidate: &BookingRequest,
    ) -> BookingResult<BookingId> {
        let existing = self.store.bookings_on(candidate.practitioner, candidate.date)?;
        validator::validate(&profile.hours, candidate, &existing)?;

        let booking = Booking::from_request(candidate);
        match self.store.insert(&booking) {
            Ok(()) => Ok(booking.id),
            Err(InsertError::Overlap(holder)) => {
                // Only reachable when another process wrote to the same store.
                warn!(
                    conflicting = %holder.id,
                    "store refused overlapping insert"
                );
                Err(Rejection::SlotConflict {
                    conflicting: holder.id,
                    start: holder.start,
                    end: holder.end(),
                }
                .into())
            }
            Err(InsertError::Storage(err)) => Err(err.into()),
        }
    }

    fn day_lock(&self, key: DayKey) -> Arc<Mutex<()>> {
        self.day_locks.entry(key).or_default().clone()
    }

    /// Drop our handle and forget the key once nobody else holds it.
    fn release_day_lock(&self, key: DayKey, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.day_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of (practitioner, date) keys with a commit in flight.
    pub fn active_day_locks(&self) -> usize {
        self.day_locks.len()
    }

    /// Move a booking to `next`. Time and duration never change.
    pub fn transition(&self, id: BookingId, next: BookingStatus) -> BookingResult<Booking> {
        let mut booking = self.store.booking(id)?;
        loop {
            if !booking.status.can_transition_to(next) {
                debug!(booking = %id, from = %booking.status, to = %next, "transition refused");
                return Err(Rejection::InvalidTransition {
                    from: booking.status,
                    to: next,
                }
                .into());
            }
            if self.store.set_status(id, booking.status, next)? {
                break;
            }
            // Someone else moved it first; re-read and decide again.
            booking = self.store.booking(id)?;
        }

        info!(booking = %id, from = %booking.status, to = %next, "booking status changed");
        booking.status = next;
        Ok(booking)
    }

    pub fn confirm(&self, id: BookingId) -> BookingResult<Booking> {
        self.transition(id, BookingStatus::Confirmed)
    }

    /// Cancelled bookings stay on record but stop blocking their interval.
    pub fn cancel(&self, id: BookingId) -> BookingResult<Booking> {
        self.transition(id, BookingStatus::Cancelled)
    }

    pub fn complete(&self, id: BookingId) -> BookingResult<Booking> {
        self.transition(id, BookingStatus::Completed)
    }

    pub fn booking(&self, id: BookingId) -> BookingResult<Booking> {
        Ok(self.store.booking(id)?)
    }

    pub fn day_bookings(
        &self,
        practitioner: PractitionerId,
        date: NaiveDate,
    ) -> BookingResult<Vec<Booking>> {
        Ok(self.store.bookings_on(practitioner, date)?)
    }

    /// All bookings of a practitioner, ordered by date then start.
    pub fn agenda(&self, practitioner: PractitionerId) -> BookingResult<Vec<Booking>> {
        Ok(self.store.bookings_for(practitioner)?)
    }
}
