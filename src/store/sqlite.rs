use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use super::{overlap_in, BookingStore, InsertError, ProfileStore};
use crate::error::StorageError;
use crate::models::{
    Booking, BookingId, BookingStatus, Practitioner, PractitionerId, SubjectId, WorkingHours,
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

const BOOKING_COLUMNS: &str =
    "id, practitioner_id, subject_id, date, start, duration_minutes, status, notes";

/// SQLite-backed store.
///
/// Inserts run inside a `BEGIN IMMEDIATE` transaction that re-reads the
/// day's bookings before writing, and the schema carries a partial unique
/// index on (practitioner, date, start) for blocking statuses. Together they
/// keep the no-overlap rule even when several processes share the file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a database file and run migrations.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing and demos).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        configure(&conn)?;
        run_migrations(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn configure(conn: &Connection) -> Result<(), StorageError> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    let current_version = current_version(conn)?;

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        include_str!("../../resources/migrations/001_initial.sql"),
    )];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql)
                .map_err(|e| StorageError::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }

    Ok(())
}

/// Current schema version (0 if no schema exists yet)
fn current_version(conn: &Connection) -> Result<i64, StorageError> {
    let has_schema: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master
         WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !has_schema {
        return Ok(0);
    }
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn fmt_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn invalid(field: &str, value: &str) -> StorageError {
    StorageError::InvalidEnum {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| invalid("date", value))
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime, StorageError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT).map_err(|_| invalid(field, value))
}

/// Raw booking columns, converted to a [`Booking`] outside the row closure.
struct BookingRow {
    id: String,
    practitioner_id: String,
    subject_id: String,
    date: String,
    start: String,
    duration_minutes: i64,
    status: String,
    notes: String,
}

impl BookingRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(BookingRow {
            id: row.get(0)?,
            practitioner_id: row.get(1)?,
            subject_id: row.get(2)?,
            date: row.get(3)?,
            start: row.get(4)?,
            duration_minutes: row.get(5)?,
            status: row.get(6)?,
            notes: row.get(7)?,
        })
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = StorageError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id.parse().map_err(|_| invalid("id", &row.id))?,
            practitioner: row
                .practitioner_id
                .parse()
                .map_err(|_| invalid("practitioner_id", &row.practitioner_id))?,
            subject: row
                .subject_id
                .parse::<SubjectId>()
                .map_err(|_| invalid("subject_id", &row.subject_id))?,
            date: parse_date(&row.date)?,
            start: parse_time("start", &row.start)?,
            duration_minutes: u32::try_from(row.duration_minutes)
                .map_err(|_| invalid("duration_minutes", &row.duration_minutes.to_string()))?,
            status: row.status.parse()?,
            notes: row.notes,
        })
    }
}

fn query_bookings(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Booking>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, BookingRow::read)?;
    rows.map(|r| r.map_err(StorageError::from).and_then(Booking::try_from))
        .collect()
}

fn day_bookings(
    conn: &Connection,
    practitioner: PractitionerId,
    date: NaiveDate,
) -> Result<Vec<Booking>, StorageError> {
    query_bookings(
        conn,
        &format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE practitioner_id = ?1 AND date = ?2
             ORDER BY start"
        ),
        params![practitioner.to_string(), fmt_date(date)],
    )
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl ProfileStore for SqliteStore {
    fn practitioner(&self, id: PractitionerId) -> Result<Practitioner, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT name, license_number, specialty, phone, opens, closes
                 FROM practitioners WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let (name, license_number, specialty, phone, opens, closes) =
            row.ok_or_else(|| StorageError::not_found("practitioner", id))?;

        // Hours are handed back as stored; consumers validate the window.
        Ok(Practitioner {
            id,
            name,
            license_number,
            specialty,
            phone,
            hours: WorkingHours {
                opens: parse_time("opens", &opens)?,
                closes: parse_time("closes", &closes)?,
            },
        })
    }

    fn save_practitioner(&self, practitioner: &Practitioner) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO practitioners (id, name, license_number, specialty, phone, opens, closes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                license_number = excluded.license_number,
                specialty = excluded.specialty,
                phone = excluded.phone,
                opens = excluded.opens,
                closes = excluded.closes",
            params![
                practitioner.id.to_string(),
                practitioner.name,
                practitioner.license_number,
                practitioner.specialty,
                practitioner.phone,
                fmt_time(practitioner.hours.opens),
                fmt_time(practitioner.hours.closes),
            ],
        )?;
        Ok(())
    }
}

impl BookingStore for SqliteStore {
    fn bookings_on(
        &self,
        practitioner: PractitionerId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StorageError> {
        let conn = self.lock()?;
        day_bookings(&conn, practitioner, date)
    }

    fn bookings_for(&self, practitioner: PractitionerId) -> Result<Vec<Booking>, StorageError> {
        let conn = self.lock()?;
        query_bookings(
            &conn,
            &format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 WHERE practitioner_id = ?1
                 ORDER BY date, start"
            ),
            params![practitioner.to_string()],
        )
    }

    fn booking(&self, id: BookingId) -> Result<Booking, StorageError> {
        let conn = self.lock()?;
        query_bookings(
            &conn,
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id.to_string()],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::not_found("booking", id))
    }

    fn insert(&self, booking: &Booking) -> Result<(), InsertError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let same_day = day_bookings(&tx, booking.practitioner, booking.date)?;
        if let Some(existing) = overlap_in(&same_day, booking) {
            return Err(InsertError::Overlap(existing));
        }

        let inserted = tx.execute(
            "INSERT INTO bookings
                (id, practitioner_id, subject_id, date, start, duration_minutes, status, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                booking.id.to_string(),
                booking.practitioner.to_string(),
                booking.subject.to_string(),
                fmt_date(booking.date),
                fmt_time(booking.start),
                booking.duration_minutes,
                booking.status.as_str(),
                booking.notes,
            ],
        );

        match inserted {
            Ok(_) => {
                tx.commit().map_err(StorageError::from)?;
                Ok(())
            }
            Err(e) if is_constraint_violation(&e) => {
                // The unique start index fired; report whoever holds that start.
                let holder = same_day
                    .into_iter()
                    .find(|b| b.is_blocking() && b.start == booking.start);
                match holder {
                    Some(existing) => Err(InsertError::Overlap(existing)),
                    None => Err(StorageError::from(e).into()),
                }
            }
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    fn set_status(
        &self,
        id: BookingId,
        expected: BookingStatus,
        next: BookingStatus,
    ) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE bookings SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![next.as_str(), id.to_string(), expected.as_str()],
        )?;
        if changed == 0 {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM bookings WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StorageError::not_found("booking", id));
            }
        }
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookingRequest;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    fn setup() -> (SqliteStore, Practitioner) {
        let store = SqliteStore::open_in_memory().unwrap();
        let hours = WorkingHours::new(t(8, 0), t(17, 0)).unwrap();
        let doctor = Practitioner::new(
            "Dr. Ana Souza".into(),
            "123456-CRM/SP".into(),
            "Cardiology".into(),
            hours,
        )
        .unwrap()
        .with_phone("+55 11 5555-0101");
        store.save_practitioner(&doctor).unwrap();
        (store, doctor)
    }

    fn booking(doctor: &Practitioner, start: NaiveTime, minutes: u32) -> Booking {
        let request = BookingRequest::new(doctor.id, SubjectId::new(), day(), start)
            .with_duration(minutes)
            .with_notes("first visit");
        Booking::from_request(&request)
    }

    #[test]
    fn schema_version_is_current() {
        let (store, _) = setup();
        let conn = store.lock().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn migration_idempotent() {
        let (store, _) = setup();
        let conn = store.lock().unwrap();
        assert!(run_migrations(&conn).is_ok());
    }

    #[test]
    fn unreadable_schema_version_is_reported_not_rerun() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_version (version TEXT);
             INSERT INTO schema_version (version) VALUES ('one');",
        )
        .unwrap();
        assert!(matches!(run_migrations(&conn), Err(StorageError::Sqlite(_))));
    }

    #[test]
    fn foreign_keys_enabled() {
        let (store, _) = setup();
        let conn = store.lock().unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn practitioner_round_trips() {
        let (store, doctor) = setup();
        assert_eq!(store.practitioner(doctor.id).unwrap(), doctor);
        assert!(matches!(
            store.practitioner(PractitionerId::new()),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn booking_round_trips() {
        let (store, doctor) = setup();
        let first = booking(&doctor, t(9, 0), 45);
        store.insert(&first).unwrap();
        assert_eq!(store.booking(first.id).unwrap(), first);
        assert_eq!(store.bookings_on(doctor.id, day()).unwrap(), vec![first]);
    }

    #[test]
    fn insert_refuses_overlap() {
        let (store, doctor) = setup();
        let first = booking(&doctor, t(9, 0), 30);
        store.insert(&first).unwrap();
        match store.insert(&booking(&doctor, t(9, 15), 30)) {
            Err(InsertError::Overlap(existing)) => assert_eq!(existing.id, first.id),
            other => panic!("expected overlap, got {:?}", other),
        }
        assert_eq!(store.bookings_on(doctor.id, day()).unwrap().len(), 1);
    }

    #[test]
    fn unique_index_backs_up_the_overlap_check() {
        let (store, doctor) = setup();
        let first = booking(&doctor, t(10, 0), 30);
        store.insert(&first).unwrap();
        let conn = store.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO bookings
                (id, practitioner_id, subject_id, date, start, duration_minutes, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 30, 'confirmed')",
            params![
                BookingId::new().to_string(),
                doctor.id.to_string(),
                SubjectId::new().to_string(),
                fmt_date(day()),
                fmt_time(t(10, 0)),
            ],
        );
        assert!(matches!(result, Err(ref e) if is_constraint_violation(e)));
    }

    #[test]
    fn cancelled_start_can_be_rebooked() {
        let (store, doctor) = setup();
        let first = booking(&doctor, t(9, 0), 30);
        store.insert(&first).unwrap();
        assert!(store
            .set_status(first.id, BookingStatus::Scheduled, BookingStatus::Cancelled)
            .unwrap());
        store.insert(&booking(&doctor, t(9, 0), 30)).unwrap();
        let day = store.bookings_on(doctor.id, day()).unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day.iter().filter(|b| b.is_blocking()).count(), 1);
    }

    #[test]
    fn set_status_reports_stale_expectation_and_missing_rows() {
        let (store, doctor) = setup();
        let first = booking(&doctor, t(9, 0), 30);
        store.insert(&first).unwrap();
        assert!(!store
            .set_status(first.id, BookingStatus::Confirmed, BookingStatus::Completed)
            .unwrap());
        assert!(matches!(
            store.set_status(BookingId::new(), BookingStatus::Scheduled, BookingStatus::Confirmed),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn unknown_practitioner_is_refused_by_foreign_key() {
        let (store, _) = setup();
        let stranger = Practitioner::new(
            "Dr. Nobody".into(),
            "000000-CRM/RJ".into(),
            "General".into(),
            WorkingHours::new(t(8, 0), t(12, 0)).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            store.insert(&booking(&stranger, t(9, 0), 30)),
            Err(InsertError::Storage(StorageError::Sqlite(_)))
        ));
    }

    #[test]
    fn agenda_spans_dates_in_order() {
        let (store, doctor) = setup();
        let mut later = booking(&doctor, t(8, 0), 30);
        later.date = day().succ_opt().unwrap();
        store.insert(&later).unwrap();
        store.insert(&booking(&doctor, t(15, 0), 30)).unwrap();
        store.insert(&booking(&doctor, t(9, 0), 30)).unwrap();
        let starts: Vec<_> = store
            .bookings_for(doctor.id)
            .unwrap()
            .into_iter()
            .map(|b| (b.date, b.start))
            .collect();
        assert_eq!(
            starts,
            vec![(day(), t(9, 0)), (day(), t(15, 0)), (later.date, t(8, 0))]
        );
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agenda.db");
        let (doctor, first) = {
            let store = SqliteStore::open(&path).unwrap();
            let hours = WorkingHours::new(t(8, 0), t(12, 0)).unwrap();
            let doctor = Practitioner::new(
                "Dr. Reis".into(),
                "654321-CRM/MG".into(),
                "Pediatrics".into(),
                hours,
            )
            .unwrap();
            store.save_practitioner(&doctor).unwrap();
            let first = booking(&doctor, t(8, 30), 30);
            store.insert(&first).unwrap();
            (doctor, first)
        };
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.practitioner(doctor.id).unwrap(), doctor);
        assert_eq!(reopened.booking(first.id).unwrap(), first);
    }
}
