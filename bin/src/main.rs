#![allow(clippy::cognitive_complexity)]
use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use nats_consumer::{
    ConsoleSink, Settings,
    config::{cli, trace},
};
use tokio::{runtime::Builder, signal};
use tracing::*;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("stream-consumer failed to start: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let dotenv_result = dotenv::dotenv();
    // parses from cli or environment var
    let config = match cli::Config::try_parse_args(std::env::args_os()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let trace_config =
        trace::Config::parse(&config.consumer_log).context("failed to install log subscriber")?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv_result {
        debug!(?err, ".env file not loaded");
    }

    let settings = match Settings::from_config(&config) {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "invalid configuration");
            return Ok(ExitCode::FAILURE);
        }
    };
    debug!(?settings);

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder
        .thread_name(&config.consumer_thread_name)
        .enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.consumer_threads {
        builder.worker_threads(num);
    }
    let rt = builder.build().context("failed to build tokio runtime")?;

    let result = rt.block_on(async move {
        let sink = Arc::new(ConsoleSink::stdout());
        nats_consumer::run(settings, sink, shutdown_signal()).await
    });

    Ok(match result {
        Ok(()) => {
            info!("consumer exited cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "consumer exited with error");
            ExitCode::FAILURE
        }
    })
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = signal::ctrl_c() => match res {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(err) => error!(?err, "failed to listen for ctrl-c, shutting down"),
        },
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
