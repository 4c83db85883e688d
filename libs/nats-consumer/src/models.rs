//! Shared types passed between the subscription, handler and broker layers.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::SubscriptionError;

// ---------------------------------------------------------------------------
// Stream target
// ---------------------------------------------------------------------------

/// One configured stream: a display name, the subject to subscribe to and,
/// optionally, the JetStream stream that holds the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub name: String,
    pub subject: String,
    pub broker_stream_id: Option<String>,
}

impl StreamTarget {
    pub fn new(name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            broker_stream_id: None,
        }
    }

    pub fn with_stream_id(mut self, id: impl Into<String>) -> Self {
        self.broker_stream_id = Some(id.into());
        self
    }

    /// Returns true if messages for this target are acknowledged.
    pub fn requires_ack(&self) -> bool {
        self.broker_stream_id.is_some()
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.broker_stream_id {
            Some(id) => write!(f, "{} ({} @ {id})", self.name, self.subject),
            None => write!(f, "{} ({})", self.name, self.subject),
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Acknowledges a single delivered message back to the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), SubscriptionError>;
}

/// A received message. `acker` is present only for at-least-once deliveries.
pub struct Delivery {
    pub payload: Bytes,
    pub acker: Option<Box<dyn Acknowledge>>,
}

impl Delivery {
    /// A delivery that needs no acknowledgement.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            acker: None,
        }
    }

    pub fn with_acker(payload: impl Into<Bytes>, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            payload: payload.into(),
            acker: Some(acker),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.payload.len())
            .field("ack", &self.acker.is_some())
            .finish()
    }
}

/// Stream of deliveries produced by one open subscription.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, SubscriptionError>>;

// ---------------------------------------------------------------------------
// Subscription state
// ---------------------------------------------------------------------------

/// Lifecycle of a single subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Active,
    Draining,
    Closed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Created => write!(f, "created"),
            SubscriptionState::Active => write!(f, "active"),
            SubscriptionState::Draining => write!(f, "draining"),
            SubscriptionState::Closed => write!(f, "closed"),
        }
    }
}

/// What a receive loop did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSummary {
    pub stream: String,
    /// Messages passed to the handler.
    pub handled: u64,
    /// Messages the handler rejected.
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_target_ack_requirement() {
        let core = StreamTarget::new("pumpfun", "parsedtx.pumpfun");
        assert!(!core.requires_ack());
        assert_eq!(core.to_string(), "pumpfun (parsedtx.pumpfun)");

        let js = core.with_stream_id("PARSEDTX");
        assert!(js.requires_ack());
        assert_eq!(js.to_string(), "pumpfun (parsedtx.pumpfun @ PARSEDTX)");
    }

    #[test]
    fn test_delivery_debug_hides_payload() {
        let d = Delivery::new(&b"{\"secret\":1}"[..]);
        let dbg = format!("{d:?}");
        assert!(dbg.contains("len: 12"));
        assert!(!dbg.contains("secret"));
    }
}
