//! # relpoll
//!
//! Polls GitHub releases for a list of tracked repositories and announces
//! each new release exactly once.
//!
//! The core is [`ReleasePoller`], which diffs what GitHub reports against a
//! [`NotifiedState`] and returns the announcements to make. [`Runner`] wires
//! it to a [`StateStore`] and a [`NotificationSink`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relpoll::{
//!     FileStore, GitHubReleaseSource, GitHubSourceConfig, PollerConfig, ReleasePoller, Runner,
//!     TelegramConfig, TelegramSink, TrackedRepository,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = GitHubReleaseSource::new(GitHubSourceConfig::new().releases_per_repo(3))?;
//!     let sink = TelegramSink::new(TelegramConfig::new("123:bot-token", "@releases"))?;
//!     let store = FileStore::new("data/notified.json", "badge/tracked-count.json");
//!
//!     let poller = ReleasePoller::new(Arc::new(source), PollerConfig::default());
//!     let runner = Runner::new(poller, Arc::new(sink), Arc::new(store));
//!
//!     let tracked = vec![TrackedRepository::parse("owner/repo")?];
//!     let summary = runner.run(&tracked).await?;
//!     println!("{} new releases", summary.notifications);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
mod error;
mod poller;
mod runner;
mod sink;
mod source;
mod store;
mod summary;
mod types;

pub use config::{dedup_tracked, load_tracked, GitHubSourceConfig, PollerConfig, TelegramConfig};
pub use error::{DeliveryError, Error, FetchError, Result, StateError};
pub use poller::{PollOutcome, ReleasePoller, RepositoryFailure};
pub use runner::Runner;
pub use sink::{format_message, NoopSink, NotificationSink, TelegramSink};
pub use source::{GitHubReleaseSource, ReleaseSource};
pub use store::{FileStore, MemoryStore, StateStore};
pub use summary::RunSummary;
pub use types::{BadgeFormat, BadgeState, Notification, NotifiedState, Release, TrackedRepository};
