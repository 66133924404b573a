//! # blockwatch-core
//!
//! Watches a set of accounts for moderation notices from a notification bot
//! ("@x has blocked you", "@x has added you to the ... moderation list") and
//! adds each offender to a shared moderation list owned by a separate account.
//!
//! ## Design Principles
//!
//! - **Synchronous**: Blocking HTTP, one pass at a time. No async runtime.
//! - **Injected collaborators**: Network ([`AtprotoApi`]) and time ([`Clock`])
//!   are trait objects so tests run without sockets or sleeping.
//! - **Graceful degradation**: Missing or corrupt state files load as empty;
//!   persistence failures are logged and the run continues in memory.
//! - **Idempotent side effects**: Delivery is at-least-once; list writes check
//!   membership first.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blockwatch_core::{HttpAtprotoApi, SystemClock, WatchConfig, Watcher};
//!
//! let config = WatchConfig::from_env()?;
//! let api = Arc::new(HttpAtprotoApi::new(&config.service_url, config.http_timeout)?);
//! let watcher = Watcher::from_config(config, api, Arc::new(SystemClock));
//! let mut state = watcher.start()?;
//! watcher.backfill(&mut state);
//! watcher.run(&mut state, &stop);
//! ```

pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod list_sync;
pub mod list_uri;
pub mod patterns;
pub mod pipeline;
pub mod resolver;
pub mod scheduler;
pub mod session_store;
pub mod source;
pub mod storage;
pub mod testing;
pub mod types;

pub use auth::{AuthOutcome, AuthPath, AuthSummary, Authenticator};
pub use client::{AtprotoApi, HttpAtprotoApi, XrpcError, XrpcResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ServiceIdentity, WatchConfig};
pub use dedup::Deduplicator;
pub use error::{Result, WatchError};
pub use extract::{extract, Detection};
pub use list_sync::{ListSynchronizer, MembershipCheck, SyncOutcome};
pub use list_uri::ListUri;
pub use pipeline::{EventPipeline, Pass, PassReport};
pub use resolver::HandleResolver;
pub use scheduler::{AccountStatus, TickReport, WatchState, Watcher};
pub use session_store::{SessionMap, SessionStore};
pub use source::{ChannelAttempt, ConversationSummary, FetchOutcome, NotificationSource};
pub use storage::StorageConfig;
pub use types::*;
