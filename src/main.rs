//! Command-line front desk for the booking core.
//!
//! Provides an interactive menu for registering a practitioner, browsing
//! open slots, booking appointments and moving them through their lifecycle.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use tracing_subscriber::EnvFilter;

use agenda::config::{self, Config};
use agenda::store::SqliteStore;
use agenda::{
    Booking, BookingError, BookingRequest, BookingStatus, Practitioner, Rejection,
    ReservationDesk, SubjectId, WorkingHours,
};

struct AgendaCli {
    desk: ReservationDesk<SqliteStore>,
    practitioner: Option<Practitioner>,
    running: bool,
}

impl AgendaCli {
    fn new(desk: ReservationDesk<SqliteStore>) -> Self {
        AgendaCli {
            desk,
            practitioner: None,
            running: true,
        }
    }

    fn print_header(&self) {
        println!("\n{}", "=".repeat(60));
        println!("       {} - APPOINTMENT BOOKING", config::APP_NAME.to_uppercase());
        println!("{}", "=".repeat(60));
    }

    fn print_menu(&self) {
        println!("\n--- Main Menu ---");
        println!("1. Register practitioner");
        println!("2. View available slots");
        println!("3. Book appointment");
        println!("4. Confirm appointment");
        println!("5. Cancel appointment");
        println!("6. Complete appointment");
        println!("7. View agenda");
        println!("8. Run demo");
        println!("9. Exit");
        println!("{}", "-".repeat(20));
    }

    /// Read one trimmed line; `None` on end of input.
    fn get_input(&mut self, prompt: &str, default: Option<&str>) -> Option<String> {
        match default {
            Some(def) => print!("{} [{}]: ", prompt, def),
            None => print!("{}: ", prompt),
        }
        let _ = io::stdout().flush();

        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => {
                self.running = false;
                None
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    Some(default.unwrap_or("").to_string())
                } else {
                    Some(input.to_string())
                }
            }
        }
    }

    fn get_parsed<T>(
        &mut self,
        prompt: &str,
        default: Option<&str>,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        loop {
            let input = self.get_input(prompt, default)?;
            if let Some(value) = parse(&input) {
                return Some(value);
            }
            println!("Invalid value, please try again");
        }
    }

    fn get_time(&mut self, prompt: &str, default: &str) -> Option<NaiveTime> {
        self.get_parsed(prompt, Some(default), |s| {
            NaiveTime::parse_from_str(s, "%H:%M").ok()
        })
    }

    fn get_date(&mut self) -> Option<NaiveDate> {
        let tomorrow = (Local::now() + Duration::days(1)).date_naive();
        let default = tomorrow.format("%Y-%m-%d").to_string();
        self.get_parsed("Date (YYYY-MM-DD)", Some(&default), |s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
        })
    }

    fn get_minutes(&mut self, prompt: &str, default: u32) -> Option<u32> {
        let default = default.to_string();
        self.get_parsed(prompt, Some(&default), |s| {
            s.parse::<u32>().ok().filter(|m| *m > 0)
        })
    }

    fn require_practitioner(&self) -> Option<Practitioner> {
        if self.practitioner.is_none() {
            println!("\nPlease register a practitioner first (option 1)");
        }
        self.practitioner.clone()
    }

    fn register_practitioner(&mut self) -> Option<()> {
        println!("\n--- Register Practitioner ---");

        let name = self.get_input("Name", Some("Dr. Smith"))?;
        let license = self.get_input("License number", Some("123456-CRM/SP"))?;
        let specialty = self.get_input("Specialty", Some("General Practice"))?;
        let phone = self.get_input("Phone", Some(""))?;
        let opens = self.get_time("Working hours start (HH:MM)", "08:00")?;
        let closes = self.get_time("Working hours end (HH:MM)", "17:00")?;

        let registered = WorkingHours::new(opens, closes)
            .and_then(|hours| Practitioner::new(name, license, specialty, hours))
            .map(|p| p.with_phone(phone))
            .map_err(BookingError::from)
            .and_then(|p| self.desk.register_practitioner(&p).map(|_| p));

        match registered {
            Ok(practitioner) => {
                println!("\nRegistered {}", practitioner);
                println!("Working hours: {}", practitioner.hours);
                if !practitioner.phone.is_empty() {
                    println!("Phone: {}", practitioner.phone);
                }
                self.practitioner = Some(practitioner);
            }
            Err(e) => println!("Error registering practitioner: {}", e),
        }
        Some(())
    }

    fn view_available_slots(&mut self) -> Option<()> {
        let practitioner = self.require_practitioner()?;
        let date = self.get_date()?;
        let default_minutes = self.desk.default_slot_minutes();
        let minutes = self.get_minutes("Slot length (minutes)", default_minutes)?;

        match self.desk.available_slots(practitioner.id, date, Some(minutes)) {
            Ok(slots) if slots.is_empty() => println!("\nNo available slots"),
            Ok(slots) => {
                println!("\n--- Available Slots on {} ---", date.format("%A, %Y-%m-%d"));
                for row in slots.chunks(6) {
                    let line: Vec<String> =
                        row.iter().map(|s| s.format("%H:%M").to_string()).collect();
                    println!("  {}", line.join("  "));
                }
            }
            Err(e) => println!("Error listing slots: {}", e),
        }
        Some(())
    }

    fn book_appointment(&mut self) -> Option<()> {
        let practitioner = self.require_practitioner()?;
        println!("\n--- Book Appointment ---");

        let date = self.get_date()?;
        let start = self.get_time("Start time (HH:MM)", "10:00")?;
        let default_minutes = self.desk.default_slot_minutes();
        let minutes = self.get_minutes("Duration (minutes)", default_minutes)?;
        let notes = self.get_input("Notes", Some(""))?;

        let request = BookingRequest::new(practitioner.id, SubjectId::new(), date, start)
            .with_duration(minutes)
            .with_notes(notes);

        match self.desk.commit(&request) {
            Ok(id) => {
                println!("\nAppointment booked");
                println!("  ID: {}", id);
                println!(
                    "  {} {} ({} min)",
                    date.format("%Y-%m-%d"),
                    start.format("%H:%M"),
                    minutes
                );
            }
            Err(e) => {
                self.explain(&e);
                if matches!(e, BookingError::Rejected(Rejection::SlotConflict { .. })) {
                    if let Ok(Some(slot)) =
                        self.desk.next_open_slot(practitioner.id, date, start, Some(minutes))
                    {
                        println!("Next open slot that day: {}", slot.format("%H:%M"));
                    }
                }
            }
        }
        Some(())
    }

    fn explain(&self, err: &BookingError) {
        match err {
            BookingError::Rejected(Rejection::OutsideWorkingHours { opens, closes, .. }) => {
                println!(
                    "\nThat time is outside working hours ({} - {})",
                    opens.format("%H:%M"),
                    closes.format("%H:%M")
                );
            }
            BookingError::Rejected(Rejection::SlotConflict { start, end, .. }) => {
                println!(
                    "\nThat time clashes with the appointment from {} to {}",
                    start.format("%H:%M"),
                    end.format("%H:%M")
                );
            }
            BookingError::Rejected(other) => println!("\nNot possible: {}", other),
            BookingError::Failed(e) if err.is_retryable() => {
                println!("\nTemporary storage problem, please try again: {}", e);
            }
            BookingError::Failed(e) => println!("\nStorage error: {}", e),
        }
    }

    fn pick_booking(&mut self, verb: &str) -> Option<Booking> {
        let practitioner = self.require_practitioner()?;
        let bookings: Vec<Booking> = match self.desk.agenda(practitioner.id) {
            Ok(all) => all.into_iter().filter(|b| !b.status.is_terminal()).collect(),
            Err(e) => {
                println!("Error loading agenda: {}", e);
                return None;
            }
        };
        if bookings.is_empty() {
            println!("\nNo open appointments to {}", verb);
            return None;
        }

        println!("\nOpen appointments:");
        for (i, booking) in bookings.iter().enumerate() {
            println!("  {}. {}", i + 1, booking);
        }

        let count = bookings.len();
        let choice = self.get_parsed(
            &format!("Select appointment to {} (0 to go back)", verb),
            Some("0"),
            |s| s.parse::<usize>().ok().filter(|c| *c <= count),
        )?;
        if choice == 0 {
            return None;
        }
        bookings.into_iter().nth(choice - 1)
    }

    fn change_status(&mut self, next: BookingStatus, verb: &str) -> Option<()> {
        let booking = self.pick_booking(verb)?;
        match self.desk.transition(booking.id, next) {
            Ok(updated) => println!("\nAppointment is now {}: {}", updated.status, updated),
            Err(e) => self.explain(&e),
        }
        Some(())
    }

    fn view_agenda(&self) -> Option<()> {
        let practitioner = self.require_practitioner()?;
        let bookings = match self.desk.agenda(practitioner.id) {
            Ok(bookings) => bookings,
            Err(e) => {
                println!("Error loading agenda: {}", e);
                return Some(());
            }
        };
        if bookings.is_empty() {
            println!("\nNo appointments");
            return Some(());
        }

        println!("\n--- Agenda for {} ({}) ---", practitioner, bookings.len());
        let mut current_date = None;
        for booking in &bookings {
            if Some(booking.date) != current_date {
                current_date = Some(booking.date);
                println!("\n{}:", booking.date.format("%A, %Y-%m-%d"));
            }
            println!(
                "  {} - {} [{}] {}",
                booking.start.format("%H:%M"),
                booking.end().format("%H:%M"),
                booking.status,
                booking.notes
            );
        }
        Some(())
    }

    fn run_demo(&mut self) -> Option<()> {
        println!("\n--- Running Demo ---");

        let eight = NaiveTime::from_hms_opt(8, 0, 0)?;
        let noon = NaiveTime::from_hms_opt(12, 0, 0)?;
        let demo = WorkingHours::new(eight, noon).and_then(demo_practitioner);
        let practitioner = match demo {
            Ok(p) => p,
            Err(e) => {
                println!("Error creating demo practitioner: {}", e);
                return Some(());
            }
        };
        if let Err(e) = self.desk.register_practitioner(&practitioner) {
            println!("Error registering demo practitioner: {}", e);
            return Some(());
        }

        let date = (Local::now() + Duration::days(1)).date_naive();
        let at = |h: u32, m: u32| NaiveTime::from_hms_opt(h, m, 0);
        let attempts = [
            ("Maria Silva", at(9, 0)?, 30, "Annual checkup"),
            ("Joao Pereira", at(9, 15)?, 30, "Follow-up on test results"),
            ("Ana Costa", at(9, 30)?, 30, "Prescription renewal"),
            ("Pedro Alves", at(7, 59)?, 30, "Early bird"),
            ("Lucia Rocha", at(11, 45)?, 45, "Runs past closing"),
        ];

        println!("Working hours: {}", practitioner.hours);
        for (patient, start, minutes, reason) in attempts {
            let request = BookingRequest::new(practitioner.id, SubjectId::new(), date, start)
                .with_duration(minutes)
                .with_notes(format!("{} - {}", patient, reason));
            let outcome = match self.desk.commit(&request) {
                Ok(_) => "booked".to_string(),
                Err(e) => format!("refused ({})", e),
            };
            println!("  {:13} {} +{:>2}m -> {}", patient, start.format("%H:%M"), minutes, outcome);
        }

        if let Ok(slots) = self.desk.available_slots(practitioner.id, date, None) {
            let listed: Vec<String> = slots.iter().map(|s| s.format("%H:%M").to_string()).collect();
            println!("\nStill open: {}", listed.join(", "));
        }

        self.practitioner = Some(practitioner);
        Some(())
    }

    fn run(&mut self) {
        self.print_header();

        while self.running {
            self.print_menu();

            let Some(choice) = self.get_parsed("Enter choice", Some("8"), |s| s.parse::<u32>().ok())
            else {
                break;
            };

            match choice {
                1 => self.register_practitioner(),
                2 => self.view_available_slots(),
                3 => self.book_appointment(),
                4 => self.change_status(BookingStatus::Confirmed, "confirm"),
                5 => self.change_status(BookingStatus::Cancelled, "cancel"),
                6 => self.change_status(BookingStatus::Completed, "complete"),
                7 => self.view_agenda(),
                8 => self.run_demo(),
                9 => {
                    self.running = false;
                    println!("\nGoodbye!");
                    None
                }
                _ => {
                    println!("Invalid choice");
                    None
                }
            };
        }
    }
}

/// A fresh demo profile. License numbers are unique, so every run gets its own.
fn demo_practitioner(hours: WorkingHours) -> Result<Practitioner, Rejection> {
    let mut practitioner = Practitioner::new(
        "Dr. Demo".to_string(),
        "DEMO".to_string(),
        "Family Medicine".to_string(),
        hours,
    )?;
    practitioner.license_number = format!("DEMO-{}", practitioner.id);
    Ok(practitioner.with_phone("+55 11 5555-0199"))
}

fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(io::stderr)
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let store = match &config.database_path {
        Some(path) => SqliteStore::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?,
        None => SqliteStore::open_in_memory().context("Failed to open in-memory database")?,
    };
    let desk = ReservationDesk::new(store).with_slot_minutes(config.slot_minutes);

    AgendaCli::new(desk).run();
    Ok(())
}
