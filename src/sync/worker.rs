//! Background scheduler: debounce, failure backoff, and connectivity polling

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use crate::error::{Result, SyncError};

/// What the scheduler drives; implemented by the sync engine
#[async_trait]
pub trait QueueDrainer: Send + Sync {
    /// Run one drain attempt; errors are recorded by the implementor
    async fn drain_queue(&self);

    /// Cheap real remote call plus credential check
    async fn check_reachable(&self) -> bool;
}

/// Commands for the scheduler task
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Restart the debounce timer
    Debounce,
    /// Drain once after a delay (failure backoff)
    RetryIn(Duration),
    /// Check reachability periodically until a check succeeds
    StartPolling,
    StopPolling,
    /// Drop every pending timer
    CancelTimers,
    /// Stop the task
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerTimings {
    pub debounce: Duration,
    pub poll_interval: Duration,
}

/// Handle to the scheduler task
#[derive(Clone)]
pub struct Scheduler {
    sender: mpsc::UnboundedSender<SchedulerCommand>,
}

impl Scheduler {
    /// Spawn the scheduler; must be called inside a tokio runtime
    ///
    /// Holds the drainer weakly so the engine can be dropped while the task
    /// still exists.
    pub fn start(timings: SchedulerTimings, drainer: Weak<dyn QueueDrainer>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(timings, drainer, receiver));
        Self { sender }
    }

    fn send(&self, cmd: SchedulerCommand) -> Result<()> {
        self.sender
            .send(cmd)
            .map_err(|_| SyncError::Internal("Scheduler channel closed".to_string()))
    }

    pub fn debounce(&self) -> Result<()> {
        self.send(SchedulerCommand::Debounce)
    }

    pub fn retry_in(&self, delay: Duration) -> Result<()> {
        self.send(SchedulerCommand::RetryIn(delay))
    }

    pub fn start_polling(&self) -> Result<()> {
        self.send(SchedulerCommand::StartPolling)
    }

    pub fn stop_polling(&self) -> Result<()> {
        self.send(SchedulerCommand::StopPolling)
    }

    pub fn cancel_timers(&self) -> Result<()> {
        self.send(SchedulerCommand::CancelTimers)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(SchedulerCommand::Stop)
    }
}

async fn run(
    timings: SchedulerTimings,
    drainer: Weak<dyn QueueDrainer>,
    mut receiver: mpsc::UnboundedReceiver<SchedulerCommand>,
) {
    let mut debounce_at: Option<Instant> = None;
    let mut retry_at: Option<Instant> = None;
    let mut poll: Option<Interval> = None;

    loop {
        tokio::select! {
            cmd = receiver.recv() => {
                match cmd {
                    Some(SchedulerCommand::Debounce) => {
                        debounce_at = Some(Instant::now() + timings.debounce);
                    }
                    Some(SchedulerCommand::RetryIn(delay)) => {
                        tracing::info!(delay_secs = delay.as_secs_f64(), "Sync retry scheduled");
                        retry_at = Some(Instant::now() + delay);
                    }
                    Some(SchedulerCommand::StartPolling) => {
                        if poll.is_none() {
                            let mut ticker = interval_at(
                                Instant::now() + timings.poll_interval,
                                timings.poll_interval,
                            );
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            poll = Some(ticker);
                            tracing::info!(
                                interval_secs = timings.poll_interval.as_secs(),
                                "Connectivity polling started"
                            );
                        }
                    }
                    Some(SchedulerCommand::StopPolling) => {
                        if poll.take().is_some() {
                            tracing::info!("Connectivity polling stopped");
                        }
                    }
                    Some(SchedulerCommand::CancelTimers) => {
                        debounce_at = None;
                        retry_at = None;
                        poll = None;
                    }
                    Some(SchedulerCommand::Stop) | None => break,
                }
            }
            _ = wait_until(debounce_at) => {
                debounce_at = None;
                spawn_drain(&drainer, "debounce");
            }
            _ = wait_until(retry_at) => {
                retry_at = None;
                spawn_drain(&drainer, "backoff");
            }
            _ = next_tick(&mut poll) => {
                spawn_reachability_check(&drainer);
            }
        }
    }

    tracing::info!("Sync scheduler stopped");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn spawn_drain(drainer: &Weak<dyn QueueDrainer>, cause: &'static str) {
    let Some(drainer) = drainer.upgrade() else {
        tracing::debug!(cause, "Engine dropped, skipping drain");
        return;
    };
    tracing::debug!(cause, "Draining sync queue");
    tokio::spawn(async move { drainer.drain_queue().await });
}

fn spawn_reachability_check(drainer: &Weak<dyn QueueDrainer>) {
    let Some(drainer) = drainer.upgrade() else {
        return;
    };
    tokio::spawn(async move {
        if drainer.check_reachable().await {
            tracing::info!("Connectivity confirmed, resuming sync");
            drainer.drain_queue().await;
        } else {
            tracing::debug!("Remote still unreachable, staying suspended");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct Recorder {
        drains: Mutex<Vec<Instant>>,
        checks: AtomicUsize,
        /// Checks fail until this many have been made
        reachable_from: usize,
    }

    #[async_trait]
    impl QueueDrainer for Recorder {
        async fn drain_queue(&self) {
            self.drains.lock().push(Instant::now());
        }

        async fn check_reachable(&self) -> bool {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            n >= self.reachable_from
        }
    }

    fn timings() -> SchedulerTimings {
        SchedulerTimings {
            debounce: Duration::from_millis(2000),
            poll_interval: Duration::from_secs(30),
        }
    }

    fn start(recorder: &Arc<Recorder>) -> Scheduler {
        let weak: Weak<dyn QueueDrainer> = Arc::downgrade(recorder) as Weak<dyn QueueDrainer>;
        Scheduler::start(timings(), weak)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_drain() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = start(&recorder);
        let t0 = Instant::now();

        scheduler.debounce().unwrap();
        sleep(Duration::from_millis(100)).await;
        scheduler.debounce().unwrap();
        sleep(Duration::from_millis(100)).await;
        scheduler.debounce().unwrap();

        sleep(Duration::from_secs(10)).await;

        let drains = recorder.drains.lock().clone();
        assert_eq!(drains.len(), 1);
        assert_eq!(drains[0] - t0, Duration::from_millis(2200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_drain_separately() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = start(&recorder);

        scheduler.debounce().unwrap();
        sleep(Duration::from_secs(3)).await;
        scheduler.debounce().unwrap();
        sleep(Duration::from_secs(3)).await;

        assert_eq!(recorder.drains.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_fires_after_delay() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = start(&recorder);
        let t0 = Instant::now();

        scheduler.retry_in(Duration::from_secs(4)).unwrap();
        sleep(Duration::from_secs(3)).await;
        assert!(recorder.drains.lock().is_empty());

        sleep(Duration::from_secs(2)).await;
        let drains = recorder.drains.lock().clone();
        assert_eq!(drains, vec![t0 + Duration::from_secs(4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_drains_once_remote_is_reachable() {
        let recorder = Arc::new(Recorder {
            reachable_from: 2,
            ..Default::default()
        });
        let scheduler = start(&recorder);

        scheduler.start_polling().unwrap();
        // starting twice keeps a single ticker
        scheduler.start_polling().unwrap();

        sleep(Duration::from_secs(31)).await;
        assert_eq!(recorder.checks.load(Ordering::SeqCst), 1);
        assert!(recorder.drains.lock().is_empty());

        sleep(Duration::from_secs(30)).await;
        assert_eq!(recorder.checks.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.drains.lock().len(), 1);

        scheduler.stop_polling().unwrap();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(recorder.checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_timers_drops_pending_drain() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = start(&recorder);

        scheduler.debounce().unwrap();
        scheduler.retry_in(Duration::from_secs(1)).unwrap();
        scheduler.cancel_timers().unwrap();
        sleep(Duration::from_secs(10)).await;

        assert!(recorder.drains.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_engine_is_skipped_and_stop_closes_channel() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = start(&recorder);
        drop(recorder);

        scheduler.debounce().unwrap();
        sleep(Duration::from_secs(3)).await;

        scheduler.stop().unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(matches!(scheduler.debounce(), Err(SyncError::Internal(_))));
    }
}
