//! Cron-driven scheduling of app work calls.
//!
//! Schedules live in a shared table keyed by call hash. The engine polls the
//! table on a fixed interval and, whenever a schedule's next fire time has
//! passed, pushes a [`ComponentDelta`] onto the app's delta queue.

pub mod cron;
pub mod engine;
pub mod queue;

use thiserror::Error;

pub use self::cron::{Schedule, Schedules};
pub use self::engine::{SchedulerHandle, SchedulerThread};
pub use self::queue::{ComponentDelta, Delta};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{pattern}': {message}")]
    InvalidCron { pattern: String, message: String },

    #[error("Cron expression '{pattern}' has no upcoming fire time")]
    NoUpcomingFire { pattern: String },

    #[error("A {hours}-hour window runs past the end of the calendar")]
    InvalidWindow { hours: u64 },

    #[error("Schedule '{0}' not found")]
    NotFound(String),

    #[error("Schedule table lock was poisoned")]
    LockPoisoned,
}
