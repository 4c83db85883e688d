//! Error types for the consumer.
//!
//! One enum per failure category. Startup categories (config, auth,
//! connection, subscription) are fatal; per-message categories (decode,
//! sink) are caught where they happen and never leave a subscription loop.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which piece of external material a file was expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Credentials,
    TlsCert,
    TlsKey,
    TlsCa,
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialKind::Credentials => write!(f, "credentials file"),
            MaterialKind::TlsCert => write!(f, "tls certificate"),
            MaterialKind::TlsKey => write!(f, "tls key"),
            MaterialKind::TlsCa => write!(f, "tls ca"),
        }
    }
}

/// A single file that could not be read.
#[derive(Debug, Error)]
#[error("{kind} '{}' unreadable: {source}", .path.display())]
pub struct MaterialError {
    pub kind: MaterialKind,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Every unreadable file from one loading pass.
#[derive(Debug, Default)]
pub struct MaterialErrors(pub Vec<MaterialError>);

impl MaterialErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialError> {
        self.0.iter()
    }
}

impl fmt::Display for MaterialErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MaterialErrors {}

/// Configuration could not be turned into valid settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command line or environment values could not be parsed.
    #[error("invalid arguments: {0}")]
    Arguments(String),

    /// Parallel stream lists were supplied with different lengths.
    #[error(
        "stream lists have mismatched lengths: {names} names, {subjects} subjects, {ids} stream ids"
    )]
    MismatchedListLengths {
        names: usize,
        subjects: usize,
        ids: usize,
    },

    /// A required file (credentials) could not be read.
    #[error("unreadable file: {0}")]
    UnreadableFile(#[source] MaterialErrors),

    /// A value was present but not acceptable.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// No usable credential could be selected.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Nothing configured and anonymous connections are denied.
    #[error("no authentication material configured and anonymous access is denied")]
    NotConfigured,

    /// The credential could not be applied to the client options.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// The single connection attempt failed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// TLS cert/key/CA files could not be read.
    #[error("tls material unreadable: {0}")]
    TlsMaterialUnreadable(#[source] MaterialErrors),

    /// The credential was rejected while building connect options.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Transport-level failure from the client library.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A subscription could not be opened or stopped working.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Registering the subscription failed.
    #[error("failed to subscribe to '{subject}': {reason}")]
    Register { subject: String, reason: String },

    /// The receive stream yielded a transport error.
    #[error("receive error on '{subject}': {reason}")]
    Receive { subject: String, reason: String },

    /// The receive stream ended while the consumer was still running.
    #[error("subscription to '{subject}' closed unexpectedly")]
    Closed { subject: String },

    /// Acknowledging a message failed.
    #[error("ack failed: {0}")]
    Ack(String),

    /// The receive task panicked or was aborted.
    #[error("subscription task for '{stream}' failed: {reason}")]
    Task { stream: String, reason: String },
}

/// A message payload could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json payload ({len} bytes): {reason}")]
    InvalidJson { len: usize, reason: String },
}

/// The output surface failed.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writes after `close` are refused.
    #[error("sink is closed")]
    Closed,

    #[error("sink write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("sink format failed: {0}")]
    Format(#[from] serde_json::Error),
}

/// Umbrella error for the start and shutdown sequences.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Several subscriptions failed together.
    #[error("{} subscription(s) failed: {}", .0.len(), join_errors(.0))]
    Subscriptions(Vec<SubscriptionError>),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl ConsumerError {
    /// Returns true if this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConsumerError::Decode(_) | ConsumerError::Sink(_))
    }
}

fn join_errors(errors: &[SubscriptionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Shorthand result alias for consumer operations.
pub type ConsumerResult<T> = Result<T, ConsumerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let config: ConsumerError = ConfigError::MismatchedListLengths {
            names: 1,
            subjects: 2,
            ids: 0,
        }
        .into();
        assert!(config.is_fatal());

        let auth: ConsumerError = AuthError::NotConfigured.into();
        assert!(auth.is_fatal());

        let conn: ConsumerError = ConnectionError::Transport("refused".into()).into();
        assert!(conn.is_fatal());

        let decode: ConsumerError = DecodeError::InvalidJson {
            len: 3,
            reason: "eof".into(),
        }
        .into();
        assert!(!decode.is_fatal());

        let sink: ConsumerError = SinkError::Closed.into();
        assert!(!sink.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::MismatchedListLengths {
            names: 2,
            subjects: 3,
            ids: 0,
        };
        let msg = format!("{err}");
        assert!(msg.contains("2 names"));
        assert!(msg.contains("3 subjects"));

        let errs = MaterialErrors(vec![
            MaterialError {
                kind: MaterialKind::TlsCert,
                path: "/missing/cert.pem".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
            MaterialError {
                kind: MaterialKind::TlsKey,
                path: "/missing/key.pem".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
        ]);
        let msg = ConnectionError::TlsMaterialUnreadable(errs).to_string();
        assert!(msg.contains("/missing/cert.pem"));
        assert!(msg.contains("/missing/key.pem"));

        let many = ConsumerError::Subscriptions(vec![
            SubscriptionError::Register {
                subject: "a".into(),
                reason: "x".into(),
            },
            SubscriptionError::Register {
                subject: "b".into(),
                reason: "y".into(),
            },
        ]);
        assert!(many.to_string().starts_with("2 subscription(s) failed"));
    }
}
