//! Periodic stats reporting.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::counters::Counters;

/// Aggregate counters at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub received: u64,
    pub processed: u64,
    pub decode_failures: u64,
    /// received messages per second since start
    pub rate: f64,
    pub uptime: String,
}

impl StatsSnapshot {
    pub fn compute(counters: &Counters, start: Instant, now: Instant) -> Self {
        let elapsed = now.saturating_duration_since(start);
        let received = counters.received();
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { received as f64 / secs } else { 0.0 };
        Self {
            elapsed,
            received,
            processed: counters.processed(),
            decode_failures: counters.decode_failures(),
            rate,
            uptime: format_uptime(elapsed),
        }
    }
}

/// `HHh MMm SSs`, hours are not capped.
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}h {:02}m {:02}s",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Emits a [`StatsSnapshot`] every interval until cancelled.
#[derive(Debug)]
pub struct StatsReporter {
    counters: Arc<Counters>,
    start: Instant,
    observer: Option<mpsc::UnboundedSender<StatsSnapshot>>,
    linked: Option<CancellationToken>,
}

impl StatsReporter {
    pub fn new(counters: Arc<Counters>, start: Instant) -> Self {
        Self {
            counters,
            start,
            observer: None,
            linked: None,
        }
    }

    /// Cancel `token` whenever the reporting task ends, including by panic.
    pub fn stop_on_exit(mut self, token: CancellationToken) -> Self {
        self.linked = Some(token);
        self
    }

    /// Also send every snapshot on `tx`.
    pub fn with_observer(mut self, tx: mpsc::UnboundedSender<StatsSnapshot>) -> Self {
        self.observer = Some(tx);
        self
    }

    /// Spawn the reporting task. The first snapshot is emitted one interval
    /// after this call.
    pub fn start(self, interval: Duration) -> StatsHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let _stop_on_exit = self.linked.clone().map(CancellationToken::drop_guard);
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        let snap = StatsSnapshot::compute(&self.counters, self.start, Instant::now());
                        info!(
                            received = snap.received,
                            processed = snap.processed,
                            uptime = %snap.uptime,
                            "final stats"
                        );
                        debug!("stats reporter stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        let snap = StatsSnapshot::compute(&self.counters, self.start, Instant::now());
                        info!(
                            received = snap.received,
                            processed = snap.processed,
                            decode_failures = snap.decode_failures,
                            rate = %format!("{:.2}", snap.rate),
                            elapsed_secs = snap.elapsed.as_secs(),
                            uptime = %snap.uptime,
                            "stats"
                        );
                        if let Some(tx) = &self.observer {
                            let _ = tx.send(snap);
                        }
                    }
                }
            }
        });
        StatsHandle {
            token,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle to a running [`StatsReporter`].
#[derive(Debug)]
pub struct StatsHandle {
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatsHandle {
    /// Request the reporter to stop. Calling this more than once is a no-op.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the reporting task to finish.
    pub async fn stop(&self) {
        self.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                debug!(?err, "stats reporter task ended abnormally");
            }
        }
    }
}
