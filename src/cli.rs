//! The command-line run, with options already parsed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{dedup_tracked, load_tracked, GitHubSourceConfig, PollerConfig, TelegramConfig};
use crate::error::{Error, Result};
use crate::poller::ReleasePoller;
use crate::runner::Runner;
use crate::sink::{NoopSink, NotificationSink, TelegramSink};
use crate::source::GitHubReleaseSource;
use crate::store::FileStore;
use crate::summary::RunSummary;
use crate::types::{BadgeFormat, TrackedRepository};

/// Options for one scheduled run. Defaults match the binary's flags.
#[derive(Debug, Clone)]
pub struct CliOptions {
    pub tracked_file: PathBuf,
    pub notified_file: PathBuf,
    pub badge_file: PathBuf,
    pub badge_format: BadgeFormat,
    /// Extra repositories, merged after the tracked file's entries.
    pub repos: Vec<TrackedRepository>,
    pub bot_token: Option<String>,
    pub channel: Option<String>,
    pub github_token: Option<String>,
    pub timeout: Duration,
    pub releases_per_repo: usize,
    pub concurrency: usize,
    pub skip_prereleases: bool,
    pub dry_run: bool,
    #[doc(hidden)]
    pub github_api_url: Option<String>,
    #[doc(hidden)]
    pub telegram_api_url: Option<String>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            tracked_file: PathBuf::from("data/tracked.json"),
            notified_file: PathBuf::from("data/notified.json"),
            badge_file: PathBuf::from("badge/tracked-count.json"),
            badge_format: BadgeFormat::default(),
            repos: Vec::new(),
            bot_token: None,
            channel: None,
            github_token: None,
            timeout: Duration::from_secs(10),
            releases_per_repo: 5,
            concurrency: 4,
            skip_prereleases: false,
            dry_run: false,
            github_api_url: None,
            telegram_api_url: None,
        }
    }
}

/// Loads the tracked list, builds the source, sink and store, and runs once.
///
/// Returns `Ok(None)` when there is nothing to track: the tracked file is
/// missing and no extra repositories were given. No file is touched then.
pub async fn execute(options: CliOptions) -> Result<Option<RunSummary>> {
    let mut tracked = match load_tracked(&options.tracked_file)? {
        Some(repos) => repos,
        None if options.repos.is_empty() => {
            warn!(
                path = %options.tracked_file.display(),
                "No tracked repositories file, nothing to do"
            );
            return Ok(None);
        }
        None => Vec::new(),
    };
    tracked.extend(options.repos);
    let tracked = dedup_tracked(tracked);
    info!(count = tracked.len(), "Tracking repositories");

    let timeout = options.timeout.max(Duration::from_secs(1));

    let mut source_config = GitHubSourceConfig::new()
        .timeout(timeout)
        .releases_per_repo(options.releases_per_repo)
        .include_prereleases(!options.skip_prereleases);
    if let Some(token) = options.github_token.filter(|t| !t.is_empty()) {
        source_config = source_config.token(token);
    }
    if let Some(url) = options.github_api_url {
        source_config = source_config.base_url(url);
    }
    let source = GitHubReleaseSource::new(source_config)?;

    let sink: Arc<dyn NotificationSink> = if options.dry_run {
        Arc::new(NoopSink)
    } else {
        let bot_token = options
            .bot_token
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingCredential("TELEGRAM_BOT_TOKEN"))?;
        let channel = options
            .channel
            .filter(|c| !c.is_empty())
            .ok_or(Error::MissingCredential("TELEGRAM_CHANNEL"))?;
        let mut telegram = TelegramConfig::new(bot_token, channel).timeout(timeout);
        if let Some(url) = options.telegram_api_url {
            telegram = telegram.api_base_url(url);
        }
        Arc::new(TelegramSink::new(telegram)?)
    };

    let store = FileStore::new(options.notified_file, options.badge_file)
        .badge_format(options.badge_format);

    let poller = ReleasePoller::new(
        Arc::new(source),
        PollerConfig::default().concurrency(options.concurrency),
    );
    let runner = Runner::new(poller, sink, Arc::new(store)).dry_run(options.dry_run);

    runner.run(&tracked).await.map(Some)
}
