// Poll scheduler - Drives cycles for one account on an interval
use crate::application::poll_service::{CycleReport, PollError, PollService, PollSettings};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};

/// Receives the outcome of every completed cycle.
#[async_trait]
pub trait CycleSink: Send + Sync {
    async fn publish(&self, report: CycleReport);

    async fn cycle_failed(&self, error: &PollError);
}

/// Cheap handle used to poke a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    service: Arc<PollService>,
    refresh: Arc<Notify>,
    interval: watch::Sender<Duration>,
}

impl SchedulerHandle {
    /// Run a cycle as soon as the current one (if any) finishes.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval.send_if_modified(|current| {
            if *current == interval {
                return false;
            }
            tracing::info!("Updated scan interval to {} minutes", interval.as_secs() / 60);
            *current = interval;
            true
        });
    }

    /// Apply changed settings, refreshing immediately when sensors or PODs changed.
    pub fn reconfigure(&self, settings: PollSettings, interval: Duration) {
        self.set_interval(interval);
        if self.service.update_settings(settings) {
            tracing::info!("Sensor configuration changed, triggering immediate data refresh");
            self.request_refresh();
        } else {
            tracing::debug!("No sensor configuration changes detected");
        }
    }
}

pub struct PollScheduler {
    service: Arc<PollService>,
    sink: Arc<dyn CycleSink>,
    refresh: Arc<Notify>,
    interval_tx: watch::Sender<Duration>,
    interval_rx: watch::Receiver<Duration>,
}

impl PollScheduler {
    pub fn new(service: Arc<PollService>, sink: Arc<dyn CycleSink>, interval: Duration) -> Self {
        let (interval_tx, interval_rx) = watch::channel(interval);
        Self {
            service,
            sink,
            refresh: Arc::new(Notify::new()),
            interval_tx,
            interval_rx,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            service: self.service.clone(),
            refresh: self.refresh.clone(),
            interval: self.interval_tx.clone(),
        }
    }

    pub async fn run_once(&self) {
        match self.service.run_cycle().await {
            Ok(report) => self.sink.publish(report).await,
            Err(e) => self.sink.cycle_failed(&e).await,
        }
    }

    /// Poll forever: once at start, then every interval or on request.
    /// A new interval takes effect from the moment it is set.
    pub async fn run(mut self) {
        let mut first_tick = Instant::now();
        loop {
            let period = *self.interval_rx.borrow_and_update();
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    _ = self.refresh.notified() => {
                        tracing::debug!("Refresh requested");
                        self.run_once().await;
                    }
                    changed = self.interval_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        first_tick = Instant::now() + *self.interval_rx.borrow();
                        break;
                    }
                }
            }
        }
    }
}
