///! Scheduled task manager
///!
///! Runs the tracker pass on a fixed interval aligned to the wall clock
///! (every 10 minutes means xx:00, xx:10, ...), with an optional pass at
///! startup. Stopped through a watch channel on shutdown.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::pipeline::Pipeline;
use crate::config::ScraperConfig;

/// Upper bound for one pass, covering fetch timeouts and a slow SMTP relay
const PASS_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ScheduledTaskConfig {
    pub interval_minutes: u64,
    pub perform_initial_check: bool,
}

impl From<&ScraperConfig> for ScheduledTaskConfig {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            interval_minutes: config.interval_minutes.max(1),
            perform_initial_check: config.perform_initial_check,
        }
    }
}

pub struct ScheduledTaskManager {
    config: ScheduledTaskConfig,
    pipeline: Arc<Pipeline>,
    shutdown_tx: watch::Sender<bool>,
    task_handles: Vec<JoinHandle<()>>,
}

impl ScheduledTaskManager {
    pub fn new(config: ScheduledTaskConfig, pipeline: Arc<Pipeline>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            pipeline,
            shutdown_tx,
            task_handles: Vec::new(),
        }
    }

    pub fn start_all(&mut self) {
        tracing::info!(
            "Scheduling tracker pass (interval: {} minutes, initial: {})",
            self.config.interval_minutes,
            self.config.perform_initial_check
        );

        let pipeline = self.pipeline.clone();
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            Self::tracker_loop(pipeline, config, shutdown_rx).await;
        });
        self.task_handles.push(handle);
    }

    async fn tracker_loop(
        pipeline: Arc<Pipeline>,
        config: ScheduledTaskConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        if config.perform_initial_check {
            tracing::info!("Performing initial availability check...");
            Self::run_pass(&pipeline).await;
        }

        loop {
            let now = Utc::now();
            let next_trigger = Self::calculate_next_run_time(now, config.interval_minutes);
            let sleep_duration = (next_trigger - now).to_std().unwrap_or(Duration::from_secs(60));

            tracing::info!(
                "Next availability check at: {} (in {:.1} min)",
                next_trigger.format("%Y-%m-%d %H:%M:%S UTC"),
                sleep_duration.as_secs_f64() / 60.0
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {}
                _ = shutdown_rx.changed() => {
                    tracing::info!("Tracker loop stopping");
                    return;
                }
            }

            Self::run_pass(&pipeline).await;
        }
    }

    async fn run_pass(pipeline: &Pipeline) {
        match tokio::time::timeout(PASS_TIMEOUT, pipeline.run_pass()).await {
            Ok(report) if report.is_ok() => {}
            Ok(_) => tracing::warn!("Availability check did not complete; will retry next interval"),
            Err(_) => tracing::error!(
                "Availability check timed out after {} seconds",
                PASS_TIMEOUT.as_secs()
            ),
        }
    }

    /// Next multiple of `interval_minutes` since midnight UTC, strictly
    /// after `now`. Intervals that do not divide the day restart at midnight.
    fn calculate_next_run_time(now: DateTime<Utc>, interval_minutes: u64) -> DateTime<Utc> {
        let interval = interval_minutes.clamp(1, 24 * 60) as u32;
        let minute_of_day = now.hour() * 60 + now.minute();
        let next_slot = (minute_of_day / interval + 1) * interval;

        let midnight = now
            .duration_trunc(TimeDelta::days(1))
            .unwrap_or(now - TimeDelta::seconds(i64::from(now.num_seconds_from_midnight())));
        let candidate = midnight + TimeDelta::minutes(i64::from(next_slot));
        let next_midnight = midnight + TimeDelta::days(1);

        candidate.min(next_midnight)
    }

    /// Signal the loop to stop and abort anything still running.
    pub fn shutdown(self) {
        tracing::info!("Shutting down scheduled tasks...");
        let _ = self.shutdown_tx.send(true);
        for handle in self.task_handles {
            handle.abort();
        }
    }
}
