//! consumer configuration

pub mod cli {
    //! Parse from either cli or env var

    /// Default broker host
    pub static DEFAULT_NATS_HOST: &str = "localhost";
    /// Default broker port
    pub const DEFAULT_NATS_PORT: u16 = 4222;
    /// Default client connection name
    pub static DEFAULT_CONNECTION_NAME: &str = "solana-stream-consumer";
    /// Default initial connect timeout (ms)
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
    /// Default interval between stats snapshots (ms)
    pub const DEFAULT_STATS_INTERVAL_MS: u64 = 5_000;
    /// default log level. Can use this argument or CONSUMER_LOG env var
    pub static DEFAULT_CONSUMER_LOG: &str = "info";
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "stream-consumer-worker";

    use std::{convert::Infallible, ffi::OsString, fmt, path::PathBuf, str::FromStr};

    pub use clap::Parser;
    use clap::ValueEnum;

    use crate::error::ConfigError;

    /// What to do when no authentication material is configured
    #[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum AnonymousPolicy {
        /// warn and connect without credentials
        #[default]
        Allow,
        /// refuse to start
        Deny,
    }

    /// A secret string whose `Debug` output is redacted
    #[derive(Clone, PartialEq, Eq)]
    pub struct Secret(String);

    impl Secret {
        /// the secret value
        pub fn expose(&self) -> &str {
            &self.0
        }
    }

    impl FromStr for Secret {
        type Err = Infallible;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Ok(Self(s.trim().to_owned()))
        }
    }

    impl fmt::Debug for Secret {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Secret(***)")
        }
    }

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "stream-consumer", bin_name = "stream-consumer", about, long_about = None)]
    /// parses from cli & environment var. a `.env` file in the working dir is loaded as well
    pub struct Config {
        /// full broker url, overrides host and port
        #[clap(long, env, value_parser)]
        pub nats_url: Option<String>,
        /// broker host
        #[clap(long, env, value_parser, default_value = DEFAULT_NATS_HOST)]
        pub nats_host: String,
        /// broker port
        #[clap(long, env, value_parser, default_value_t = DEFAULT_NATS_PORT)]
        pub nats_port: u16,
        /// name this client reports to the broker
        #[clap(long, env, value_parser, default_value = DEFAULT_CONNECTION_NAME)]
        pub nats_connection_name: String,
        /// path to a combined JWT + seed credentials file
        #[clap(long, env, value_parser)]
        pub nats_creds_file: Option<PathBuf>,
        /// inline user JWT
        #[clap(long, env, value_parser, hide_env_values = true)]
        pub nats_jwt: Option<Secret>,
        /// inline user nkey seed
        #[clap(long, env, value_parser, hide_env_values = true)]
        pub nats_nkey_seed: Option<Secret>,
        /// client certificate for mutual TLS
        #[clap(long, env, value_parser)]
        pub nats_tls_cert: Option<PathBuf>,
        /// client key for mutual TLS
        #[clap(long, env, value_parser)]
        pub nats_tls_key: Option<PathBuf>,
        /// root CA used to verify the broker
        #[clap(long, env, value_parser)]
        pub nats_tls_ca: Option<PathBuf>,
        /// connect without credentials when none are configured?
        #[clap(long, env, value_enum, default_value_t = AnonymousPolicy::Allow)]
        pub nats_anonymous: AnonymousPolicy,
        /// initial connect timeout in milliseconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
        pub nats_connect_timeout_ms: u64,
        /// comma separated stream display names, defaults to the subjects
        #[clap(long, env, value_parser)]
        pub stream_names: Option<String>,
        /// comma separated subjects
        #[clap(long, env, value_parser)]
        pub stream_subjects: Option<String>,
        /// comma separated JetStream stream names, one per subject
        #[clap(long, env, value_parser)]
        pub stream_ids: Option<String>,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_CONSUMER_LOG)]
        pub consumer_log: String,
        /// interval between stats snapshots in milliseconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_STATS_INTERVAL_MS)]
        pub stats_interval_ms: u64,
        /// number of tokio worker threads, defaults to logical CPUs
        #[clap(long, env, value_parser)]
        pub consumer_threads: Option<usize>,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub consumer_thread_name: String,
    }

    impl Config {
        /// Parse `args` (falling back to the environment).
        ///
        /// `--help` and `--version` print and exit the process with status 0.
        /// Every other parse failure is returned as
        /// [`ConfigError::Arguments`] instead of exiting, so the caller picks
        /// the exit status.
        pub fn try_parse_args<I, T>(args: I) -> Result<Self, ConfigError>
        where
            I: IntoIterator<Item = T>,
            T: Into<OsString> + Clone,
        {
            match Self::try_parse_from(args) {
                Ok(config) => Ok(config),
                Err(err) if !err.use_stderr() => err.exit(),
                Err(err) => Err(ConfigError::Arguments(err.to_string().trim_end().to_owned())),
            }
        }
    }
}

pub mod trace {
    //! Global tracing subscriber for the consumer process.
    use std::str::FromStr;

    use anyhow::Result;
    use tracing::warn;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use env_parser::parse_var_with_err;

    use super::cli::DEFAULT_CONSUMER_LOG;
    use crate::error::ConfigError;

    /// Output layout of log lines, read from `LOG_FORMAT`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum LogFormat {
        /// single line human readable text
        #[default]
        Standard,
        /// one JSON object per event
        Json,
        /// multi-line text, for local debugging
        Pretty,
    }

    impl FromStr for LogFormat {
        type Err = ConfigError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "" | "standard" => Ok(LogFormat::Standard),
                "json" => Ok(LogFormat::Json),
                "pretty" => Ok(LogFormat::Pretty),
                other => Err(ConfigError::InvalidValue {
                    field: "LOG_FORMAT",
                    reason: format!("unknown format '{other}', expected standard, json or pretty"),
                }),
            }
        }
    }

    /// Installed logging setup.
    #[derive(Debug)]
    pub struct Config {
        pub format: LogFormat,
        /// Directive actually in effect, after any fallback.
        pub directive: String,
    }

    impl Config {
        /// Install the global subscriber filtered by `consumer_log`. An
        /// invalid directive falls back to `info` and is reported once the
        /// subscriber is up.
        pub fn parse(consumer_log: &str) -> Result<Self> {
            let format: LogFormat = parse_var_with_err("LOG_FORMAT", "standard")?;
            let (filter, rejected) = build_filter(consumer_log)?;
            let directive = filter.to_string();

            let registry = tracing_subscriber::registry().with(filter);
            match format {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
                LogFormat::Pretty => registry
                    .with(
                        fmt::layer()
                            .event_format(Format::default().pretty().with_source_location(false))
                            .fmt_fields(PrettyFields::new()),
                    )
                    .try_init()?,
                LogFormat::Standard => registry.with(fmt::layer()).try_init()?,
            }

            if let Some(reason) = rejected {
                warn!(
                    directive = consumer_log,
                    fallback = DEFAULT_CONSUMER_LOG,
                    %reason,
                    "invalid CONSUMER_LOG directive, using fallback"
                );
            }
            Ok(Self { format, directive })
        }
    }

    /// Filter for `directive`, or the default level plus the parse error if
    /// the directive is invalid.
    pub fn build_filter(directive: &str) -> Result<(EnvFilter, Option<String>)> {
        match EnvFilter::try_new(directive) {
            Ok(filter) => Ok((filter, None)),
            Err(err) => Ok((EnvFilter::try_new(DEFAULT_CONSUMER_LOG)?, Some(err.to_string()))),
        }
    }

}

use std::{ffi::OsString, path::Path, time::Duration};

use env_parser::split_opt_list;

use crate::auth::AuthMaterial;
use crate::error::{ConfigError, MaterialKind};
use crate::material::{self, TlsPaths};
use crate::models::StreamTarget;

pub use cli::AnonymousPolicy;

/// Streams consumed when neither names nor subjects are configured.
pub const DEFAULT_STREAMS: &[(&str, &str)] = &[
    ("pumpfun", "parsedtx.pumpfun"),
    ("pumpswap", "parsedtx.pumpswap"),
    ("raydium", "parsedtx.raydium"),
];

/// Validated, immutable settings for one consumer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub connection_name: String,
    pub auth: AuthMaterial,
    pub anonymous: AnonymousPolicy,
    pub tls: TlsPaths,
    pub connect_timeout: Duration,
    pub targets: Vec<StreamTarget>,
    pub stats_interval: Duration,
}

impl Settings {
    /// Parse the process arguments and environment into settings.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(std::env::args_os())
    }

    /// Like [`Settings::load`] with explicit arguments.
    pub fn load_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::from_config(&cli::Config::try_parse_args(args)?)
    }

    /// Validate parsed cli/env values and read the credentials file.
    pub fn from_config(config: &cli::Config) -> Result<Self, ConfigError> {
        if config.stats_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stats_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if config.nats_tls_cert.is_some() != config.nats_tls_key.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "nats_tls_cert/nats_tls_key",
                reason: "client certificate and key must be configured together".into(),
            });
        }

        let targets = build_targets(
            parse_list("stream_names", config.stream_names.as_deref())?,
            parse_list("stream_subjects", config.stream_subjects.as_deref())?,
            parse_list("stream_ids", config.stream_ids.as_deref())?,
        )?;

        let creds = match &config.nats_creds_file {
            Some(path) => read_credentials(path)?,
            None => None,
        };

        let server_url = match &config.nats_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_owned(),
            _ => format!("nats://{}:{}", config.nats_host, config.nats_port),
        };

        Ok(Self {
            server_url,
            connection_name: config.nats_connection_name.clone(),
            auth: AuthMaterial {
                creds,
                jwt: non_empty(config.nats_jwt.as_ref().map(|s| s.expose())),
                seed: non_empty(config.nats_nkey_seed.as_ref().map(|s| s.expose())),
            },
            anonymous: config.nats_anonymous,
            tls: TlsPaths {
                cert: config.nats_tls_cert.clone(),
                key: config.nats_tls_key.clone(),
                ca: config.nats_tls_ca.clone(),
            },
            connect_timeout: Duration::from_millis(config.nats_connect_timeout_ms),
            targets,
            stats_interval: Duration::from_millis(config.stats_interval_ms),
        })
    }
}

/// Zip the parallel stream lists into targets, preserving list order.
///
/// Names default to the subjects; both default to [`DEFAULT_STREAMS`].
/// Stream ids are optional but must match in length when given.
pub fn build_targets(
    names: Vec<String>,
    subjects: Vec<String>,
    ids: Vec<String>,
) -> Result<Vec<StreamTarget>, ConfigError> {
    let (names, subjects) = match (names.is_empty(), subjects.is_empty()) {
        (true, true) => DEFAULT_STREAMS
            .iter()
            .map(|(n, s)| ((*n).to_owned(), (*s).to_owned()))
            .unzip(),
        (true, false) => (subjects.clone(), subjects),
        _ => (names, subjects),
    };

    let ids_mismatch = !ids.is_empty() && ids.len() != names.len();
    if names.len() != subjects.len() || ids_mismatch {
        return Err(ConfigError::MismatchedListLengths {
            names: names.len(),
            subjects: subjects.len(),
            ids: ids.len(),
        });
    }

    let mut ids = ids.into_iter();
    Ok(names
        .into_iter()
        .zip(subjects)
        .map(|(name, subject)| StreamTarget {
            name,
            subject,
            broker_stream_id: ids.next(),
        })
        .collect())
}

fn read_credentials(path: &Path) -> Result<Option<String>, ConfigError> {
    let mut contents =
        material::read_all(&[(MaterialKind::Credentials, path)]).map_err(ConfigError::UnreadableFile)?;
    Ok(contents.pop().filter(|s| !s.is_empty()))
}

fn parse_list(field: &'static str, raw: Option<&str>) -> Result<Vec<String>, ConfigError> {
    split_opt_list(raw).map_err(|err| ConfigError::InvalidValue {
        field,
        reason: err.to_string(),
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use env_parser::split_list;

    use super::cli::Parser;
    use super::*;

    fn parse(args: &[&str]) -> cli::Config {
        let mut argv = vec!["stream-consumer"];
        argv.extend_from_slice(args);
        cli::Config::try_parse_from(argv).unwrap()
    }

    fn list(s: &str) -> Vec<String> {
        split_list(s).unwrap()
    }

    #[test]
    fn test_build_targets_preserves_order() {
        let targets = build_targets(
            list("pumpfun,raydium,orca"),
            list("parsedtx.pumpfun,parsedtx.raydium,parsedtx.orca"),
            vec![],
        )
        .unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], StreamTarget::new("pumpfun", "parsedtx.pumpfun"));
        assert_eq!(targets[2].subject, "parsedtx.orca");
        assert!(targets.iter().all(|t| t.broker_stream_id.is_none()));
    }

    #[test]
    fn test_build_targets_with_ids() {
        let targets = build_targets(list("a,b"), list("s.a,s.b"), list("A,B")).unwrap();
        assert_eq!(targets[0].broker_stream_id.as_deref(), Some("A"));
        assert_eq!(targets[1].broker_stream_id.as_deref(), Some("B"));
    }

    #[test]
    fn test_build_targets_mismatched_lengths() {
        let err = build_targets(list("a,b"), list("s.a"), vec![]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MismatchedListLengths {
                names: 2,
                subjects: 1,
                ids: 0
            }
        ));

        let err = build_targets(list("a,b"), list("s.a,s.b"), list("A")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MismatchedListLengths { ids: 1, .. }
        ));

        let err = build_targets(list("a"), vec![], vec![]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MismatchedListLengths { subjects: 0, .. }
        ));
    }

    #[test]
    fn test_build_targets_defaults() {
        let targets = build_targets(vec![], vec![], vec![]).unwrap();
        assert_eq!(targets.len(), DEFAULT_STREAMS.len());
        assert_eq!(targets[0].name, "pumpfun");
        assert_eq!(targets[0].subject, "parsedtx.pumpfun");

        let targets = build_targets(vec![], list("x.y,z"), vec![]).unwrap();
        assert_eq!(targets[0].name, "x.y");
        assert_eq!(targets[1].name, "z");
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_config(&parse(&[])).unwrap();
        assert_eq!(settings.server_url, "nats://localhost:4222");
        assert_eq!(settings.connection_name, "solana-stream-consumer");
        assert_eq!(settings.stats_interval, Duration::from_millis(5000));
        assert_eq!(settings.anonymous, AnonymousPolicy::Allow);
        assert!(settings.auth.is_empty());
        assert!(settings.tls.is_empty());
    }

    #[test]
    fn test_settings_url_overrides_host_port() {
        let cfg = parse(&[
            "--nats-host",
            "broker",
            "--nats-port",
            "4333",
            "--stream-subjects",
            "a.b",
        ]);
        assert_eq!(
            Settings::from_config(&cfg).unwrap().server_url,
            "nats://broker:4333"
        );

        let cfg = parse(&["--nats-url", "tls://nats.example.com:4443"]);
        assert_eq!(
            Settings::from_config(&cfg).unwrap().server_url,
            "tls://nats.example.com:4443"
        );
    }

    #[test]
    fn test_settings_rejects_empty_entry_inside_list() {
        let cfg = parse(&[
            "--stream-names",
            "pumpfun,,raydium",
            "--stream-subjects",
            "parsedtx.pumpfun,parsedtx.pumpswap",
        ]);
        assert!(matches!(
            Settings::from_config(&cfg),
            Err(ConfigError::InvalidValue {
                field: "stream_names",
                ..
            })
        ));

        let cfg = parse(&["--stream-names", "a,,c", "--stream-subjects", "s.a,s.c"]);
        assert!(Settings::from_config(&cfg).is_err());
    }

    #[test]
    fn test_settings_tolerates_trailing_comma() {
        let cfg = parse(&[
            "--stream-names",
            "pumpfun,raydium,",
            "--stream-subjects",
            "parsedtx.pumpfun,parsedtx.raydium",
        ]);
        let settings = Settings::from_config(&cfg).unwrap();
        assert_eq!(settings.targets.len(), 2);
        assert_eq!(settings.targets[1].subject, "parsedtx.raydium");
    }

    #[test]
    fn test_unparsable_argument_is_config_error() {
        let err = cli::Config::try_parse_args(["stream-consumer", "--stats-interval-ms", "abc"])
            .unwrap_err();
        match err {
            ConfigError::Arguments(msg) => assert!(msg.contains("abc")),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(
            Settings::load_from(["stream-consumer", "--nats-port", "x"]),
            Err(ConfigError::Arguments(_))
        ));
    }

    #[test]
    fn test_settings_rejects_zero_interval() {
        let cfg = parse(&["--stats-interval-ms", "0"]);
        assert!(matches!(
            Settings::from_config(&cfg),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_settings_rejects_cert_without_key() {
        let cfg = parse(&["--nats-tls-cert", "/tmp/cert.pem"]);
        assert!(matches!(
            Settings::from_config(&cfg),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_settings_reads_and_trims_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "\n  creds-blob  \n").unwrap();
        let path = file.path().to_str().unwrap().to_owned();
        let settings = Settings::from_config(&parse(&["--nats-creds-file", &path])).unwrap();
        assert_eq!(settings.auth.creds.as_deref(), Some("creds-blob"));
    }

    #[test]
    fn test_settings_missing_credentials_file_is_fatal() {
        let cfg = parse(&["--nats-creds-file", "/nonexistent/user.creds"]);
        assert!(matches!(
            Settings::from_config(&cfg),
            Err(ConfigError::UnreadableFile(_))
        ));
    }

    #[test]
    fn test_settings_debug_redacts_secrets() {
        let cfg = parse(&["--nats-jwt", "eyJ0eXAi", "--nats-nkey-seed", "SUAMK2FG"]);
        let settings = Settings::from_config(&cfg).unwrap();
        assert_eq!(settings.auth.jwt.as_deref(), Some("eyJ0eXAi"));
        let dbg = format!("{settings:?} {cfg:?}");
        assert!(!dbg.contains("eyJ0eXAi"));
        assert!(!dbg.contains("SUAMK2FG"));
    }
}
