use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::NaiveDate;
use dashmap::DashMap;

use super::{overlap_in, BookingStore, InsertError, ProfileStore};
use crate::error::StorageError;
use crate::models::{Booking, BookingId, BookingStatus, Practitioner, PractitionerId};

type DayKey = (PractitionerId, NaiveDate);
type Day = Arc<Mutex<Vec<Booking>>>;

/// Process-local store.
///
/// Bookings are kept per (practitioner, date), each day behind its own lock.
/// An insert checks and writes while holding only that day, so inserts for
/// other days never contend and the overlap scan covers that day alone.
#[derive(Default)]
pub struct MemoryStore {
    practitioners: RwLock<HashMap<PractitionerId, Practitioner>>,
    days: DashMap<DayKey, Day>,
    index: DashMap<BookingId, DayKey>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn booking_count(&self) -> Result<usize, StorageError> {
        Ok(self.index.len())
    }

    fn day(&self, key: &DayKey) -> Option<Day> {
        self.days.get(key).map(|day| Arc::clone(&day))
    }

    fn day_of(&self, id: BookingId) -> Result<Day, StorageError> {
        self.index
            .get(&id)
            .map(|key| *key)
            .and_then(|key| self.day(&key))
            .ok_or_else(|| StorageError::not_found("booking", id))
    }
}

fn read(day: &Day) -> Result<Vec<Booking>, StorageError> {
    let bookings = day.lock().map_err(|_| StorageError::LockPoisoned)?;
    Ok(bookings.clone())
}

impl ProfileStore for MemoryStore {
    fn practitioner(&self, id: PractitionerId) -> Result<Practitioner, StorageError> {
        let practitioners = self
            .practitioners
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        practitioners
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("practitioner", id))
    }

    fn save_practitioner(&self, practitioner: &Practitioner) -> Result<(), StorageError> {
        let mut practitioners = self
            .practitioners
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        practitioners.insert(practitioner.id, practitioner.clone());
        Ok(())
    }
}

impl BookingStore for MemoryStore {
    fn bookings_on(
        &self,
        practitioner: PractitionerId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StorageError> {
        match self.day(&(practitioner, date)) {
            Some(day) => read(&day),
            None => Ok(Vec::new()),
        }
    }

    fn bookings_for(&self, practitioner: PractitionerId) -> Result<Vec<Booking>, StorageError> {
        let mut days: Vec<(NaiveDate, Day)> = self
            .days
            .iter()
            .filter(|entry| entry.key().0 == practitioner)
            .map(|entry| (entry.key().1, Arc::clone(entry.value())))
            .collect();
        days.sort_by_key(|(date, _)| *date);

        let mut bookings = Vec::new();
        for (_, day) in days {
            bookings.extend(read(&day)?);
        }
        Ok(bookings)
    }

    fn booking(&self, id: BookingId) -> Result<Booking, StorageError> {
        let day = self.day_of(id)?;
        let bookings = day.lock().map_err(|_| StorageError::LockPoisoned)?;
        bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("booking", id))
    }

    fn insert(&self, booking: &Booking) -> Result<(), InsertError> {
        let key = (booking.practitioner, booking.date);
        let day = Arc::clone(&self.days.entry(key).or_default());
        let mut bookings = day.lock().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(existing) = overlap_in(&bookings, booking) {
            return Err(InsertError::Overlap(existing));
        }
        // Kept ordered by start so reads never sort.
        let at = bookings.partition_point(|b| b.start <= booking.start);
        bookings.insert(at, booking.clone());
        self.index.insert(booking.id, key);
        Ok(())
    }

    fn set_status(
        &self,
        id: BookingId,
        expected: BookingStatus,
        next: BookingStatus,
    ) -> Result<bool, StorageError> {
        let day = self.day_of(id)?;
        let mut bookings = day.lock().map_err(|_| StorageError::LockPoisoned)?;
        let booking = bookings
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| StorageError::not_found("booking", id))?;
        if booking.status != expected {
            return Ok(false);
        }
        booking.status = next;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingRequest, SubjectId, WorkingHours};
    use chrono::NaiveTime;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booking(practitioner: PractitionerId, start: NaiveTime, minutes: u32) -> Booking {
        let request = BookingRequest::new(
            practitioner,
            SubjectId::new(),
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            start,
        )
        .with_duration(minutes);
        Booking::from_request(&request)
    }

    #[test]
    fn unknown_practitioner_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.practitioner(PractitionerId::new()),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn saved_practitioner_round_trips() {
        let store = MemoryStore::new();
        let hours = WorkingHours::new(t(8, 0), t(12, 0)).unwrap();
        let doctor = Practitioner::new(
            "Dr. Lima".into(),
            "123456-SP".into(),
            "Cardiology".into(),
            hours,
        )
        .unwrap();
        store.save_practitioner(&doctor).unwrap();
        assert_eq!(store.practitioner(doctor.id).unwrap(), doctor);
    }

    #[test]
    fn insert_refuses_overlap_and_keeps_store_unchanged() {
        let store = MemoryStore::new();
        let doctor = PractitionerId::new();
        let first = booking(doctor, t(9, 0), 30);
        store.insert(&first).unwrap();

        let clash = booking(doctor, t(9, 15), 30);
        match store.insert(&clash) {
            Err(InsertError::Overlap(existing)) => assert_eq!(existing.id, first.id),
            other => panic!("expected overlap, got {:?}", other),
        }
        assert_eq!(store.booking_count().unwrap(), 1);
    }

    #[test]
    fn cancelled_booking_frees_its_start() {
        let store = MemoryStore::new();
        let doctor = PractitionerId::new();
        let first = booking(doctor, t(9, 0), 30);
        store.insert(&first).unwrap();
        assert!(store
            .set_status(first.id, BookingStatus::Scheduled, BookingStatus::Cancelled)
            .unwrap());
        store.insert(&booking(doctor, t(9, 0), 30)).unwrap();
        assert_eq!(store.bookings_on(doctor, first.date).unwrap().len(), 2);
    }

    #[test]
    fn set_status_is_compare_and_set() {
        let store = MemoryStore::new();
        let first = booking(PractitionerId::new(), t(9, 0), 30);
        store.insert(&first).unwrap();
        assert!(!store
            .set_status(first.id, BookingStatus::Confirmed, BookingStatus::Completed)
            .unwrap());
        assert_eq!(store.booking(first.id).unwrap().status, BookingStatus::Scheduled);
    }

    #[test]
    fn listings_are_chronological() {
        let store = MemoryStore::new();
        let doctor = PractitionerId::new();
        let mut tomorrow = booking(doctor, t(8, 0), 30);
        tomorrow.date = tomorrow.date.succ_opt().unwrap();
        store.insert(&tomorrow).unwrap();
        store.insert(&booking(doctor, t(11, 0), 30)).unwrap();
        store.insert(&booking(doctor, t(9, 0), 30)).unwrap();

        let starts: Vec<_> = store
            .bookings_for(doctor)
            .unwrap()
            .into_iter()
            .map(|b| (b.date, b.start))
            .collect();
        let mut expected = starts.clone();
        expected.sort();
        assert_eq!(starts, expected);
        assert_eq!(starts.last().map(|s| s.1), Some(t(8, 0)));
    }

    #[test]
    fn insert_holds_only_its_own_day() {
        let store = MemoryStore::new();
        let doctor = PractitionerId::new();
        let first = booking(doctor, t(9, 0), 30);
        store.insert(&first).unwrap();

        // Hold the 2024-05-02 day the way an in-flight insert would.
        let day = store.day(&(doctor, first.date)).unwrap();
        let held = day.lock().unwrap();
        let mut next_day = booking(doctor, t(9, 0), 30);
        next_day.date = next_day.date.succ_opt().unwrap();
        let other_doctor = booking(PractitionerId::new(), t(9, 0), 30);
        std::thread::scope(|scope| {
            let a = scope.spawn(|| store.insert(&next_day));
            let b = scope.spawn(|| store.insert(&other_doctor));
            assert!(a.join().unwrap().is_ok());
            assert!(b.join().unwrap().is_ok());
        });
        drop(held);
        assert_eq!(store.booking_count().unwrap(), 3);
    }

    #[test]
    fn day_listing_stays_ordered_by_start() {
        let store = MemoryStore::new();
        let doctor = PractitionerId::new();
        for start in [t(11, 0), t(8, 0), t(9, 30)] {
            store.insert(&booking(doctor, start, 30)).unwrap();
        }
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let starts: Vec<_> = store
            .bookings_on(doctor, day)
            .unwrap()
            .into_iter()
            .map(|b| b.start)
            .collect();
        assert_eq!(starts, vec![t(8, 0), t(9, 30), t(11, 0)]);
        assert!(store.bookings_on(PractitionerId::new(), day).unwrap().is_empty());
    }
}
