//! # nats-consumer
//!
//! Subscribes to one or more NATS subjects, decodes every message as JSON
//! and hands it to a pluggable sink, while periodically reporting throughput.
//!
//! This library provides:
//! - **Configuration** from CLI flags or environment, validated into
//!   immutable [`Settings`].
//! - **Authentication selection** over credentials files, inline JWT/seed
//!   pairs, bare JWTs, bare seeds, or anonymous access.
//! - **Connection manager** performing a single connection attempt with
//!   optional TLS, delegating reconnection to async-nats.
//! - **Receive loops** per subject, with at-least-once acknowledgement for
//!   JetStream-backed targets.
//! - **Lifecycle control** with an idempotent, ordered shutdown.
//!
//! ## Design Principles
//!
//! - A malformed message never stops a subscription.
//! - Counters are shared explicitly, never through globals.
//! - The broker sits behind the [`Broker`] trait so the whole pipeline can
//!   be exercised without a server.

pub mod auth;
pub mod client;
pub mod config;
pub mod counters;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod material;
pub mod models;
pub mod sink;
pub mod stats;
pub mod subscription;

// Re-export key types for convenient access
pub use auth::{AuthCredential, AuthMaterial};
pub use client::{Broker, Connection, ConnectionState};
pub use config::{AnonymousPolicy, Settings};
pub use counters::Counters;
pub use error::{
    AuthError, ConfigError, ConnectionError, ConsumerError, ConsumerResult, DecodeError,
    SinkError, SubscriptionError,
};
pub use handler::MessageHandler;
pub use lifecycle::{Consumer, ConsumerBuilder, run};
pub use models::{Acknowledge, Delivery, DeliveryStream, StreamTarget, SubscriptionState};
pub use sink::{ConsoleSink, Sink};
pub use stats::{StatsHandle, StatsReporter, StatsSnapshot};
pub use subscription::{Subscription, subscribe_all};
