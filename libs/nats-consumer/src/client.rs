//! NATS connection manager.
//!
//! Builds connect options from the settings and the selected credential and
//! performs exactly one connection attempt. Once connected, reconnection is
//! left to async-nats; its connection events are logged.

use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, DeliverPolicy, pull},
};
use async_nats::{ConnectOptions, Event};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::auth::AuthCredential;
use crate::config::Settings;
use crate::error::{AuthError, ConnectionError, SubscriptionError};
use crate::models::{Acknowledge, Delivery, DeliveryStream, StreamTarget};

/// How long an idle ephemeral JetStream consumer survives on the server
/// after this client goes away.
const EPHEMERAL_INACTIVE_THRESHOLD: Duration = Duration::from_secs(30);

/// What the lifecycle controller needs from a broker connection.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a subscription for `target`.
    async fn subscribe(&self, target: &StreamTarget) -> Result<DeliveryStream, SubscriptionError>;

    /// Flush outstanding writes and close. Calling this twice is a no-op.
    async fn drain(&self) -> Result<(), ConnectionError>;
}

/// Connection state observable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected and operating normally.
    Connected,
    /// Connection lost, async-nats is reconnecting.
    Reconnecting,
    /// Drained, or never established.
    Disconnected,
}

/// Inner state shared behind RwLock<…>.
struct ClientInner {
    nats_client: Option<async_nats::Client>,
    state: ConnectionState,
}

/// The single broker connection owned by the lifecycle controller.
pub struct Connection {
    inner: RwLock<ClientInner>,
    server_url: String,
    name: String,
}

impl Connection {
    /// Verify TLS material, build options and connect once.
    pub async fn connect(
        settings: &Settings,
        credential: &AuthCredential,
    ) -> Result<Self, ConnectionError> {
        settings
            .tls
            .verify()
            .map_err(ConnectionError::TlsMaterialUnreadable)?;
        let opts = build_connect_options(settings, credential)?;

        info!(
            server = %settings.server_url,
            name = %settings.connection_name,
            auth = credential.kind(),
            tls = !settings.tls.is_empty(),
            "connecting to NATS"
        );
        let client = opts
            .connect(settings.server_url.as_str())
            .await
            .map_err(|e| {
                error!(server = %settings.server_url, error = %e, "NATS connection failed");
                ConnectionError::Transport(format!(
                    "connect to '{}' failed: {e}",
                    settings.server_url
                ))
            })?;
        info!(server = %settings.server_url, "NATS connection established");

        Ok(Self {
            inner: RwLock::new(ClientInner {
                nats_client: Some(client),
                state: ConnectionState::Connected,
            }),
            server_url: settings.server_url.clone(),
            name: settings.connection_name.clone(),
        })
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> ConnectionState {
        let inner = self.inner.read().await;
        match &inner.nats_client {
            Some(client) => match client.connection_state() {
                async_nats::connection::State::Connected => ConnectionState::Connected,
                async_nats::connection::State::Disconnected => ConnectionState::Reconnecting,
                async_nats::connection::State::Pending => ConnectionState::Reconnecting,
            },
            None => inner.state,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn nats_client(&self) -> Result<async_nats::Client, ConnectionError> {
        let inner = self.inner.read().await;
        inner
            .nats_client
            .clone()
            .ok_or_else(|| ConnectionError::Transport("connection already drained".into()))
    }

    async fn subscribe_core(
        client: async_nats::Client,
        target: &StreamTarget,
    ) -> Result<DeliveryStream, SubscriptionError> {
        let subscriber = client
            .subscribe(target.subject.clone())
            .await
            .map_err(|e| SubscriptionError::Register {
                subject: target.subject.clone(),
                reason: e.to_string(),
            })?;
        Ok(subscriber.map(|msg| Ok(Delivery::new(msg.payload))).boxed())
    }

    async fn subscribe_jetstream(
        &self,
        client: async_nats::Client,
        target: &StreamTarget,
        stream_id: &str,
    ) -> Result<DeliveryStream, SubscriptionError> {
        let register_err = |reason: String| SubscriptionError::Register {
            subject: target.subject.clone(),
            reason,
        };
        let js = jetstream::new(client);
        let stream = js
            .get_stream(stream_id)
            .await
            .map_err(|e| register_err(format!("stream '{stream_id}': {e}")))?;
        let consumer = stream
            .create_consumer(pull::Config {
                filter_subject: target.subject.clone(),
                deliver_policy: DeliverPolicy::New,
                ack_policy: AckPolicy::Explicit,
                inactive_threshold: EPHEMERAL_INACTIVE_THRESHOLD,
                description: Some(format!("{} ({})", self.name, target.name)),
                ..Default::default()
            })
            .await
            .map_err(|e| register_err(format!("ephemeral consumer: {e}")))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| register_err(format!("message stream: {e}")))?;

        let subject = target.subject.clone();
        Ok(messages
            .map(move |res| match res {
                Ok(msg) => {
                    let payload = msg.payload.clone();
                    Ok(Delivery::with_acker(payload, Box::new(JetStreamAck(msg))))
                }
                Err(e) => Err(SubscriptionError::Receive {
                    subject: subject.clone(),
                    reason: e.to_string(),
                }),
            })
            .boxed())
    }
}

#[async_trait]
impl Broker for Connection {
    async fn subscribe(&self, target: &StreamTarget) -> Result<DeliveryStream, SubscriptionError> {
        let client = self
            .nats_client()
            .await
            .map_err(|e| SubscriptionError::Register {
                subject: target.subject.clone(),
                reason: e.to_string(),
            })?;
        match &target.broker_stream_id {
            None => Self::subscribe_core(client, target).await,
            Some(id) => self.subscribe_jetstream(client, target, id).await,
        }
    }

    async fn drain(&self) -> Result<(), ConnectionError> {
        let client = {
            let mut inner = self.inner.write().await;
            inner.state = ConnectionState::Disconnected;
            inner.nats_client.take()
        };
        let Some(client) = client else {
            debug!("NATS connection already drained");
            return Ok(());
        };
        client
            .flush()
            .await
            .map_err(|e| ConnectionError::Transport(format!("flush during drain failed: {e}")))?;
        drop(client);
        info!(server = %self.server_url, "NATS connection drained");
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_url", &self.server_url)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Acknowledges a JetStream message.
struct JetStreamAck(jetstream::Message);

#[async_trait]
impl Acknowledge for JetStreamAck {
    async fn ack(&self) -> Result<(), SubscriptionError> {
        self.0
            .ack()
            .await
            .map_err(|e| SubscriptionError::Ack(e.to_string()))
    }
}

/// Build connect options for the settings and credential.
pub fn build_connect_options(
    settings: &Settings,
    credential: &AuthCredential,
) -> Result<ConnectOptions, ConnectionError> {
    let mut opts = ConnectOptions::new()
        .name(&settings.connection_name)
        .connection_timeout(settings.connect_timeout)
        .event_callback(|event| async move { log_event(event) });

    opts = match credential {
        // file contents and synthesized blobs take the same parsing path; the
        // parser wants a line break after the closing seed marker
        AuthCredential::CredentialsBlob(blob) | AuthCredential::JwtAndSeed(blob) => opts
            .credentials(&format!("{blob}\n"))
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?,
        // bearer JWT: nothing to sign the server nonce with
        AuthCredential::JwtOnly(jwt) => opts.jwt(jwt.clone(), |_nonce| async { Ok(Vec::new()) }),
        AuthCredential::KeyOnly(seed) => opts.nkey(seed.clone()),
        AuthCredential::Anonymous => opts,
    };

    let tls = &settings.tls;
    if let (Some(cert), Some(key)) = (&tls.cert, &tls.key) {
        opts = opts.add_client_certificate(cert.clone(), key.clone());
    }
    if let Some(ca) = &tls.ca {
        opts = opts.add_root_certificates(ca.clone());
    }
    if !tls.is_empty() {
        opts = opts.require_tls(true);
    }

    Ok(opts)
}

fn log_event(event: Event) {
    match event {
        Event::Connected => info!("NATS connected"),
        Event::Disconnected => warn!("NATS disconnected, client will reconnect"),
        Event::SlowConsumer(sid) => warn!(sid, "NATS slow consumer, messages were dropped"),
        Event::ServerError(err) => error!(error = %err, "NATS server error"),
        Event::ClientError(err) => error!(error = %err, "NATS client error"),
        other => debug!(event = %other, "NATS event"),
    }
}
