use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::scheduler::queue::{ComponentDelta, DeltaSender};
use crate::scheduler::{ScheduleError, Schedules};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls the schedule table and emits a delta for every schedule whose next
/// fire time has passed.
pub struct SchedulerThread {
    schedules: Schedules,
    queue: DeltaSender,
    interval: Duration,
}

impl SchedulerThread {
    pub fn new(schedules: Schedules, queue: DeltaSender) -> Self {
        Self {
            schedules,
            queue,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One poll. At most one delta per schedule, however many fire times
    /// were missed; the stored start time advances to the fire just taken.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<usize, ScheduleError> {
        let mut table = self.schedules.lock()?;
        let mut emitted = 0;
        for (call_hash, schedule) in table.iter_mut() {
            let Some(next_event) = schedule.next_fire() else {
                continue;
            };
            if now > next_event {
                debug!(schedule = %schedule.name, %call_hash, fire = %next_event, "schedule due");
                let delta = ComponentDelta::scheduled_run(&schedule.name, call_hash);
                if self.queue.send(delta).is_err() {
                    warn!(schedule = %schedule.name, "delta queue closed, dropping scheduled run");
                }
                schedule.start_time = next_event;
                emitted += 1;
            }
        }
        Ok(emitted)
    }

    /// Start the polling loop on the current runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let join = tokio::spawn(async move { self.run(child).await });
        SchedulerHandle { token, join }
    }

    /// Sleep, then poll, until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if let Err(e) = self.run_once(Utc::now()) {
                error!("scheduler poll failed: {}", e);
                break;
            }
        }
        info!("scheduler stopped");
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request a stop and wait for the loop to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!("scheduler task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::queue::delta_queue;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_not_due_emits_nothing() {
        let schedules = Schedules::new();
        schedules.add("h", "work", "0 * * * *", at(10, 0)).unwrap();
        let (tx, mut rx) = delta_queue();
        let engine = SchedulerThread::new(schedules.clone(), tx);
        assert_eq!(engine.run_once(at(10, 59)).unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_due_emits_once_and_advances() {
        let schedules = Schedules::new();
        schedules.add("h", "root.work", "0 * * * *", at(10, 0)).unwrap();
        let (tx, mut rx) = delta_queue();
        let engine = SchedulerThread::new(schedules.clone(), tx);

        // three fire times missed, one delta
        assert_eq!(engine.run_once(at(13, 30)).unwrap(), 1);
        let delta = rx.try_recv().unwrap();
        assert_eq!(delta, ComponentDelta::scheduled_run("root.work", "h"));
        assert!(rx.try_recv().is_err());
        assert_eq!(schedules.get("h").unwrap().unwrap().start_time, at(11, 0));

        // still behind, so the next poll fires again
        assert_eq!(engine.run_once(at(13, 30)).unwrap(), 1);
        assert_eq!(schedules.get("h").unwrap().unwrap().start_time, at(12, 0));
    }

    #[test]
    fn test_closed_queue_still_advances() {
        let schedules = Schedules::new();
        schedules.add("h", "work", "0 * * * *", at(10, 0)).unwrap();
        let (tx, rx) = delta_queue();
        drop(rx);
        let engine = SchedulerThread::new(schedules.clone(), tx);
        assert_eq!(engine.run_once(at(11, 1)).unwrap(), 1);
        assert_eq!(schedules.get("h").unwrap().unwrap().start_time, at(11, 0));
    }

    #[tokio::test]
    async fn test_loop_stops_on_cancel() {
        let schedules = Schedules::new();
        schedules.add("h", "work", "* * * * * *", Utc::now()).unwrap();
        let (tx, mut rx) = delta_queue();
        let handle = SchedulerThread::new(schedules, tx)
            .with_interval(Duration::from_millis(20))
            .spawn();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(first.unwrap().delta.path, "calls.scheduling.h.running");
        handle.stop().await;
    }
}
