//! Per-target receive loops.
//!
//! Each [`Subscription`] owns one delivery stream and runs until the shared
//! stop token is cancelled or the stream fails. A message the handler cannot
//! decode is logged and, for at-least-once targets, still acknowledged so it
//! is not redelivered forever.

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::Broker;
use crate::error::SubscriptionError;
use crate::handler::MessageHandler;
use crate::models::{DeliveryStream, StreamTarget, SubscriptionState, SubscriptionSummary};

/// One open subscription and its receive loop.
pub struct Subscription {
    target: StreamTarget,
    stream: DeliveryStream,
    state: watch::Sender<SubscriptionState>,
}

impl Subscription {
    pub fn new(target: StreamTarget, stream: DeliveryStream) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Created);
        Self {
            target,
            stream,
            state,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    /// Observe state transitions of this subscription.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Receive until `running` is cancelled or the stream fails.
    ///
    /// The token is checked before every fetch, and a fetch in progress is
    /// abandoned when the token fires. A handler call in progress always
    /// completes first. On error the token is cancelled so the rest of the
    /// consumer shuts down too.
    pub async fn run(
        mut self,
        handler: MessageHandler,
        running: CancellationToken,
    ) -> Result<SubscriptionSummary, SubscriptionError> {
        let stream_name = self.target.name.clone();
        let mut summary = SubscriptionSummary {
            stream: stream_name.clone(),
            handled: 0,
            failed: 0,
        };
        self.state.send_replace(SubscriptionState::Active);
        debug!(stream = %stream_name, subject = %self.target.subject, "subscription active");

        let result = loop {
            if running.is_cancelled() {
                break Ok(());
            }
            let next = tokio::select! {
                biased;
                _ = running.cancelled() => break Ok(()),
                next = self.stream.next() => next,
            };
            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => break Err(err),
                None if running.is_cancelled() => break Ok(()),
                None => {
                    break Err(SubscriptionError::Closed {
                        subject: self.target.subject.clone(),
                    });
                }
            };

            handler.counters().record_received();
            summary.handled += 1;
            if let Err(err) = handler.handle(&stream_name, &delivery.payload) {
                summary.failed += 1;
                warn!(stream = %stream_name, error = %err, "dropping undecodable message");
            }
            if let Some(acker) = &delivery.acker {
                if let Err(err) = acker.ack().await {
                    warn!(stream = %stream_name, error = %err, "failed to acknowledge message");
                }
            }
        };

        self.state.send_replace(SubscriptionState::Draining);
        drop(self.stream);
        self.state.send_replace(SubscriptionState::Closed);

        match result {
            Ok(()) => {
                info!(
                    stream = %stream_name,
                    handled = summary.handled,
                    failed = summary.failed,
                    "subscription closed"
                );
                Ok(summary)
            }
            Err(err) => {
                error!(stream = %stream_name, error = %err, "subscription failed");
                running.cancel();
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.target)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Open a subscription for every target.
///
/// Every target is attempted even after a failure. If any failed, the
/// subscriptions that did open are dropped and all failures are returned.
pub async fn subscribe_all(
    broker: &dyn Broker,
    targets: &[StreamTarget],
) -> Result<Vec<Subscription>, Vec<SubscriptionError>> {
    let mut opened = Vec::with_capacity(targets.len());
    let mut errors = Vec::new();
    for target in targets {
        match broker.subscribe(target).await {
            Ok(stream) => {
                info!(%target, "subscribed");
                opened.push(Subscription::new(target.clone(), stream));
            }
            Err(err) => {
                error!(%target, error = %err, "subscribe failed");
                errors.push(err);
            }
        }
    }
    if errors.is_empty() {
        Ok(opened)
    } else {
        Err(errors)
    }
}
