use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use serde::Serialize;

use crate::scheduler::ScheduleError;

/// Parse a cron pattern. Five-field patterns (minute resolution) get a
/// leading seconds field of `0`.
pub fn parse_cron(pattern: &str) -> Result<CronSchedule, ScheduleError> {
    let trimmed = pattern.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// One scheduled work call.
#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    /// Component that owns the call; becomes the delta's `id`.
    pub name: String,
    pub cron_pattern: String,
    /// The last fire time, or creation time before the first fire.
    pub start_time: DateTime<Utc>,
    #[serde(skip)]
    cron: CronSchedule,
}

impl Schedule {
    pub fn new(name: &str, cron_pattern: &str, start_time: DateTime<Utc>) -> Result<Self, ScheduleError> {
        let cron = parse_cron(cron_pattern)?;
        if cron.after(&start_time).next().is_none() {
            return Err(ScheduleError::NoUpcomingFire {
                pattern: cron_pattern.to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            cron_pattern: cron_pattern.to_string(),
            start_time,
            cron,
        })
    }

    /// First occurrence strictly after `start_time`.
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.cron.after(&self.start_time).next()
    }

    /// Occurrences after `from` up to and including `until`.
    pub fn fires_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.cron.after(&from).take_while(|t| *t <= until).collect()
    }
}

/// A previewed fire, as printed by `schedule dry-run`.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedFire {
    pub at: DateTime<Utc>,
    pub call_hash: String,
    pub name: String,
}

/// The schedule table shared between the app and the scheduler engine.
#[derive(Debug, Clone, Default)]
pub struct Schedules {
    inner: Arc<Mutex<BTreeMap<String, Schedule>>>,
}

impl Schedules {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Schedule>>, ScheduleError> {
        self.inner.lock().map_err(|_| ScheduleError::LockPoisoned)
    }

    /// Add or replace the schedule for `call_hash`. The pattern is validated
    /// before anything is stored.
    pub fn insert(&self, call_hash: &str, schedule: Schedule) -> Result<(), ScheduleError> {
        self.lock()?.insert(call_hash.to_string(), schedule);
        Ok(())
    }

    pub fn add(
        &self,
        call_hash: &str,
        name: &str,
        cron_pattern: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let schedule = Schedule::new(name, cron_pattern, start_time)?;
        self.insert(call_hash, schedule)
    }

    pub fn remove(&self, call_hash: &str) -> Result<Schedule, ScheduleError> {
        self.lock()?
            .remove(call_hash)
            .ok_or_else(|| ScheduleError::NotFound(call_hash.to_string()))
    }

    pub fn get(&self, call_hash: &str) -> Result<Option<Schedule>, ScheduleError> {
        Ok(self.lock()?.get(call_hash).cloned())
    }

    /// All schedules, ordered by call hash.
    pub fn list(&self) -> Result<Vec<(String, Schedule)>, ScheduleError> {
        Ok(self
            .lock()?
            .iter()
            .map(|(hash, s)| (hash.clone(), s.clone()))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fires expected within the next `hours`, soonest first.
    /// Strictly a dry-run: stored start times are not touched.
    pub fn preview(&self, now: DateTime<Utc>, hours: u64) -> Result<Vec<PlannedFire>, ScheduleError> {
        let end = i64::try_from(hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or(ScheduleError::InvalidWindow { hours })?;
        let table = self.lock()?;
        let mut planned: Vec<PlannedFire> = table
            .iter()
            .flat_map(|(hash, s)| {
                let from = s.start_time.max(now);
                s.fires_between(from, end).into_iter().map(move |at| PlannedFire {
                    at,
                    call_hash: hash.clone(),
                    name: s.name.clone(),
                })
            })
            .collect();
        planned.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.call_hash.cmp(&b.call_hash)));
        Ok(planned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_five_field_pattern_is_accepted() {
        let s = Schedule::new("work", "*/5 * * * *", at(10, 2, 30)).unwrap();
        assert_eq!(s.next_fire(), Some(at(10, 5, 0)));
    }

    #[test]
    fn test_six_field_pattern_keeps_seconds() {
        let s = Schedule::new("work", "30 * * * * *", at(10, 0, 0)).unwrap();
        assert_eq!(s.next_fire(), Some(at(10, 0, 30)));
    }

    #[test]
    fn test_invalid_pattern_is_rejected_before_insert() {
        let table = Schedules::new();
        let err = table.add("abc", "work", "every minute", at(0, 0, 0)).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_preview_is_sorted_and_bounded() {
        let table = Schedules::new();
        table.add("h1", "hourly", "0 * * * *", at(0, 0, 0)).unwrap();
        table.add("h2", "half", "30 * * * *", at(0, 0, 0)).unwrap();
        let plan = table.preview(at(0, 0, 0), 2).unwrap();
        let times: Vec<_> = plan.iter().map(|p| p.at).collect();
        assert_eq!(times, vec![at(0, 30, 0), at(1, 0, 0), at(1, 30, 0), at(2, 0, 0)]);
        assert_eq!(plan[0].name, "half");
        // preview does not advance anything
        assert_eq!(table.get("h1").unwrap().unwrap().start_time, at(0, 0, 0));
    }

    #[test]
    fn test_preview_window_past_calendar_end() {
        let table = Schedules::new();
        table.add("h1", "hourly", "0 * * * *", at(0, 0, 0)).unwrap();
        assert!(matches!(
            table.preview(at(0, 0, 0), u64::MAX),
            Err(ScheduleError::InvalidWindow { hours: u64::MAX })
        ));
        assert!(matches!(
            table.preview(at(0, 0, 0), i64::MAX as u64),
            Err(ScheduleError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_remove_missing() {
        let table = Schedules::new();
        assert!(matches!(table.remove("nope"), Err(ScheduleError::NotFound(_))));
    }
}
