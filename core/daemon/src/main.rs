//! blockwatch entrypoint.
//!
//! Single-process service: authenticate, backfill once, then poll on a fixed
//! interval. A liveness endpoint runs on a side thread.
//!
//! ## Subcommands
//!
//! - `run` (default): the long-running service
//! - `once`: startup, backfill and a single poll, then exit
//! - `resolve <handle>`: print the DID for a handle
//! - `inspect-dms`: show the list owner's conversations and which one is the service

mod backoff;
mod health;
mod logging;

use std::env;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use blockwatch_core::config::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_SERVICE_URL};
use blockwatch_core::scheduler::POLL_FETCH_LIMIT;
use blockwatch_core::{
    AtprotoApi, ChannelAttempt, HandleResolver, HttpAtprotoApi, NotificationSource, Session,
    SystemClock, WatchConfig, WatchError, Watcher,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use health::HealthServer;

#[derive(Parser)]
#[command(name = "blockwatch")]
#[command(about = "Adds accounts that block or list you to a shared moderation list")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watcher until killed (default)
    Run,

    /// Authenticate, backfill, poll once, and exit
    Once,

    /// Resolve a handle to its DID
    Resolve {
        /// Handle to resolve; a leading @ is ignored
        #[arg(value_name = "HANDLE")]
        handle: String,
    },

    /// List the list owner's conversations and recent messages from the service
    InspectDms,
}

fn main() -> ExitCode {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => load_config().and_then(run),
        Commands::Once => load_config().and_then(once),
        Commands::Resolve { handle } => resolve(&handle),
        Commands::InspectDms => load_config().and_then(inspect_dms),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ WatchError::Config { .. }) => {
            error!(error = %err, "Invalid configuration");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(error = %err, "blockwatch failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> blockwatch_core::Result<WatchConfig> {
    WatchConfig::from_env()
}

fn run(config: WatchConfig) -> blockwatch_core::Result<()> {
    if let Some(delay) = backoff::record_start(&config.storage.backoff_file(), Utc::now()) {
        thread::sleep(delay);
    }

    match HealthServer::bind(config.health_port) {
        Ok(server) => server.spawn(),
        Err(err) => warn!(
            port = config.health_port,
            error = %err,
            "Failed to bind health endpoint; continuing without it"
        ),
    }

    let watcher = build_watcher(config)?;
    let mut state = watcher.start()?;
    watcher.backfill(&mut state);

    let stop = AtomicBool::new(false);
    watcher.run(&mut state, &stop);
    Ok(())
}

fn once(config: WatchConfig) -> blockwatch_core::Result<()> {
    let watcher = build_watcher(config)?;
    let mut state = watcher.start()?;
    watcher.backfill(&mut state);
    let report = watcher.tick(&mut state);
    info!(
        added = report.pass.added,
        would_add = report.pass.would_add,
        failed = report.pass.failed,
        "Single pass complete"
    );
    Ok(())
}

fn resolve(handle: &str) -> blockwatch_core::Result<()> {
    let api = Arc::new(HttpAtprotoApi::new(
        &service_url(),
        std::time::Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
    )?);
    let did = HandleResolver::new(api).resolve(handle)?;
    println!("{did}");
    Ok(())
}

fn inspect_dms(config: WatchConfig) -> blockwatch_core::Result<()> {
    let api: Arc<dyn AtprotoApi> =
        Arc::new(HttpAtprotoApi::new(&config.service_url, config.http_timeout)?);
    let owner = &config.list_owner;
    let tokens = api
        .create_session(&owner.handle, &owner.password)
        .map_err(|source| WatchError::Authentication {
            handle: owner.handle.clone(),
            source,
        })?;
    let session = Session::from_tokens(tokens, Utc::now(), config.session_ttl);
    let source = NotificationSource::new(api, config.service.clone());

    println!(
        "Service identity: {} (handle hint \"{}\")",
        config.service.did, config.service.handle_hint
    );
    for convo in source.conversations(&session)? {
        let marker = if convo.is_service { "*" } else { " " };
        println!("{marker} conversation {}", convo.id);
        for member in &convo.members {
            println!(
                "      {} {}",
                member.did,
                member.handle.as_deref().unwrap_or("-")
            );
        }
    }

    match source.direct_messages(&session, POLL_FETCH_LIMIT) {
        ChannelAttempt::Delivered(messages) => {
            println!("Latest messages from the service: {}", messages.len());
            for message in messages {
                println!(
                    "  [{}] {}",
                    message.raw_timestamp.as_deref().unwrap_or("?"),
                    message.text
                );
            }
        }
        ChannelAttempt::Unavailable(failure) => {
            println!("Direct messages unavailable: {}", failure.reason);
        }
    }
    Ok(())
}

fn build_watcher(config: WatchConfig) -> blockwatch_core::Result<Watcher> {
    let api = Arc::new(HttpAtprotoApi::new(&config.service_url, config.http_timeout)?);
    Ok(Watcher::from_config(config, api, Arc::new(SystemClock)))
}

fn service_url() -> String {
    env::var("BLOCKWATCH_SERVICE_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string())
}
