use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

use crate::models::DEFAULT_DURATION_MINUTES;

pub const APP_NAME: &str = "Agenda";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when neither `RUST_LOG` nor `AGENDA_LOG` is set.
pub fn default_log_filter() -> &'static str {
    "agenda=info"
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite file; `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    pub slot_minutes: u32,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: None,
            slot_minutes: DEFAULT_DURATION_MINUTES,
            log_filter: default_log_filter().to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_path = lookup("AGENDA_DATABASE_PATH")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let slot_minutes = match lookup("AGENDA_SLOT_MINUTES") {
            Some(val) => val
                .trim()
                .parse::<u32>()
                .context("Failed to parse AGENDA_SLOT_MINUTES")?,
            None => DEFAULT_DURATION_MINUTES,
        };
        if slot_minutes == 0 {
            bail!("AGENDA_SLOT_MINUTES must be positive");
        }

        let log_filter =
            lookup("AGENDA_LOG").unwrap_or_else(|| default_log_filter().to_string());

        Ok(Config {
            database_path,
            slot_minutes,
            log_filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.slot_minutes, 30);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn reads_all_keys() {
        let config = Config::from_lookup(lookup_from(&[
            ("AGENDA_DATABASE_PATH", "/tmp/agenda.db"),
            ("AGENDA_SLOT_MINUTES", "20"),
            ("AGENDA_LOG", "agenda=debug"),
        ]))
        .unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/agenda.db")));
        assert_eq!(config.slot_minutes, 20);
        assert_eq!(config.log_filter, "agenda=debug");
    }

    #[test]
    fn rejects_bad_slot_minutes() {
        assert!(Config::from_lookup(lookup_from(&[("AGENDA_SLOT_MINUTES", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("AGENDA_SLOT_MINUTES", "half")])).is_err());
    }

    #[test]
    fn app_name_is_agenda() {
        assert_eq!(APP_NAME, "Agenda");
    }
}
