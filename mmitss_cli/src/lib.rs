//! Shared plumbing for the three roadside processes: configuration file,
//! command line, non-blocking UDP endpoints and the termination flag raised
//! from signal handlers.

pub mod cli;
pub mod config;
pub mod net;
pub mod sig;

use chrono::{Datelike, Local};

pub use mmitss::fanout::{minute_of_year, ms_of_day, ms_of_minute};

/// Milliseconds since the UNIX epoch.
pub fn msec_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Local date stamp, used as the suffix when rotating the timing card.
pub fn date_stamp() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// Local day-of-year, to detect the midnight poll restart.
pub fn local_day() -> u32 {
    Local::now().ordinal()
}
