//! Start and shutdown sequencing.
//!
//! Start: connect → subscribe to every target → spawn receive loops → start
//! stats. Shutdown: stop receive loops → cancel stats → close sink → collect
//! loop results → drain the connection. Shutdown runs at most once.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::client::{Broker, Connection};
use crate::config::{Settings, cli::DEFAULT_STATS_INTERVAL_MS};
use crate::counters::Counters;
use crate::error::{ConsumerError, ConsumerResult, SubscriptionError};
use crate::handler::MessageHandler;
use crate::models::{StreamTarget, SubscriptionSummary};
use crate::sink::Sink;
use crate::stats::{StatsHandle, StatsReporter, StatsSnapshot};
use crate::subscription::subscribe_all;

type LoopHandle = JoinHandle<Result<SubscriptionSummary, SubscriptionError>>;

/// Configures and starts a [`Consumer`].
pub struct ConsumerBuilder {
    broker: Arc<dyn Broker>,
    sink: Arc<dyn Sink>,
    targets: Vec<StreamTarget>,
    stats_interval: Duration,
    counters: Arc<Counters>,
    stats_observer: Option<mpsc::UnboundedSender<StatsSnapshot>>,
}

impl ConsumerBuilder {
    pub fn targets(mut self, targets: Vec<StreamTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Use externally owned counters instead of fresh ones.
    pub fn counters(mut self, counters: Arc<Counters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn stats_observer(mut self, tx: mpsc::UnboundedSender<StatsSnapshot>) -> Self {
        self.stats_observer = Some(tx);
        self
    }

    /// Subscribe to every target, spawn the receive loops and start stats.
    ///
    /// Fails without spawning anything if any subscription fails.
    pub async fn start(self) -> ConsumerResult<Consumer> {
        let start_time = Instant::now();
        let subscriptions = subscribe_all(self.broker.as_ref(), &self.targets)
            .await
            .map_err(|mut errors| {
                if errors.len() == 1 {
                    ConsumerError::Subscription(errors.remove(0))
                } else {
                    ConsumerError::Subscriptions(errors)
                }
            })?;

        let running = CancellationToken::new();
        let handler = MessageHandler::new(Arc::clone(&self.counters), Arc::clone(&self.sink));
        let tasks = subscriptions
            .into_iter()
            .map(|sub| {
                let stream = sub.target().name.clone();
                let handler = handler.clone();
                let running = running.clone();
                let task = tokio::spawn(async move {
                    // any exit, a panic included, stops the whole consumer
                    let _stop_on_exit = running.clone().drop_guard();
                    sub.run(handler, running).await
                });
                (stream, task)
            })
            .collect::<Vec<_>>();

        let mut reporter = StatsReporter::new(Arc::clone(&self.counters), start_time)
            .stop_on_exit(running.clone());
        if let Some(tx) = self.stats_observer {
            reporter = reporter.with_observer(tx);
        }
        let stats = reporter.start(self.stats_interval);

        info!(
            subscriptions = tasks.len(),
            stats_interval_ms = self.stats_interval.as_millis() as u64,
            "consumer started"
        );
        Ok(Consumer {
            running,
            broker: self.broker,
            sink: self.sink,
            counters: self.counters,
            stats,
            tasks: Mutex::new(tasks),
            shutdown_started: AtomicBool::new(false),
        })
    }
}

/// A started consumer: receive loops and stats reporter are running.
pub struct Consumer {
    running: CancellationToken,
    broker: Arc<dyn Broker>,
    sink: Arc<dyn Sink>,
    counters: Arc<Counters>,
    stats: StatsHandle,
    tasks: Mutex<Vec<(String, LoopHandle)>>,
    shutdown_started: AtomicBool,
}

impl Consumer {
    pub fn builder(broker: Arc<dyn Broker>, sink: Arc<dyn Sink>) -> ConsumerBuilder {
        ConsumerBuilder {
            broker,
            sink,
            targets: Vec::new(),
            stats_interval: Duration::from_millis(DEFAULT_STATS_INTERVAL_MS),
            counters: Arc::new(Counters::new()),
            stats_observer: None,
        }
    }

    /// False once shutdown has begun or a receive loop has failed.
    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }

    /// Resolves when the shared stop signal has been tripped.
    pub async fn stopped(&self) {
        self.running.cancelled().await
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Run the shutdown sequence. Only the first call does any work; later
    /// calls return `Ok(())` immediately.
    ///
    /// Returns an error if any receive loop failed during the run or the
    /// connection could not be drained.
    pub async fn shutdown(&self) -> ConsumerResult<()> {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return Ok(());
        }
        info!("shutting down consumer");

        self.running.cancel();
        self.stats.stop().await;
        self.sink.close();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut errors = Vec::new();
        for (stream, task) in tasks {
            match task.await {
                Ok(Ok(summary)) => debug!(?summary, "receive loop finished"),
                Ok(Err(err)) => errors.push(err),
                Err(err) => errors.push(SubscriptionError::Task {
                    stream,
                    reason: err.to_string(),
                }),
            }
        }

        let drained = self.broker.drain().await;
        info!(
            received = self.counters.received(),
            processed = self.counters.processed(),
            "consumer stopped"
        );

        match (errors.len(), drained) {
            (0, Ok(())) => Ok(()),
            (0, Err(err)) => Err(err.into()),
            (n, drained) => {
                if let Err(err) = drained {
                    error!(error = %err, "connection drain failed");
                }
                if n == 1 {
                    Err(ConsumerError::Subscription(errors.remove(0)))
                } else {
                    Err(ConsumerError::Subscriptions(errors))
                }
            }
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("running", &self.is_running())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

/// Select credentials, connect, consume until `shutdown` resolves or a
/// component fails, then shut down.
pub async fn run<F>(settings: Settings, sink: Arc<dyn Sink>, shutdown: F) -> ConsumerResult<()>
where
    F: Future<Output = ()>,
{
    debug!(?settings, "starting consumer");
    let credential = auth::select(&settings.auth, settings.anonymous)?;
    let connection = Connection::connect(&settings, &credential).await?;
    let broker: Arc<dyn Broker> = Arc::new(connection);

    let consumer = match Consumer::builder(Arc::clone(&broker), sink)
        .targets(settings.targets.clone())
        .stats_interval(settings.stats_interval)
        .start()
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            if let Err(drain_err) = broker.drain().await {
                warn!(error = %drain_err, "drain after failed start also failed");
            }
            return Err(err);
        }
    };

    tokio::select! {
        _ = shutdown => info!("termination signal received"),
        _ = consumer.stopped() => warn!("consumer stopped after a component failure"),
    }
    consumer.shutdown().await
}
