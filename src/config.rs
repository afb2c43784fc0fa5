//! Configuration for the release source, the notification sink and the poller,
//! plus loading of the tracked repositories file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::TrackedRepository;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for fetching releases from GitHub.
#[derive(Debug, Clone)]
pub struct GitHubSourceConfig {
    /// Optional GitHub API token for authentication.
    pub token: Option<String>,
    /// Per-request timeout. Default is 10 seconds.
    pub timeout: Duration,
    /// How many of the most recent releases to consider per repository.
    pub releases_per_repo: usize,
    /// Whether prereleases are announced. Drafts never are.
    pub include_prereleases: bool,
    /// Base URL for GitHub API (for testing). Defaults to "https://api.github.com".
    pub(crate) base_url: String,
}

impl Default for GitHubSourceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubSourceConfig {
    pub fn new() -> Self {
        Self {
            token: None,
            timeout: DEFAULT_TIMEOUT,
            releases_per_repo: 5,
            include_prereleases: true,
            base_url: "https://api.github.com".to_string(),
        }
    }

    /// Sets a custom base URL (for testing or GitHub Enterprise).
    #[doc(hidden)]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the GitHub API token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the release window, clamped to 1..=100 (GitHub's page size limit).
    pub fn releases_per_repo(mut self, count: usize) -> Self {
        self.releases_per_repo = count.clamp(1, 100);
        self
    }

    pub fn include_prereleases(mut self, include: bool) -> Self {
        self.include_prereleases = include;
        self
    }
}

/// Configuration for posting notifications to a Telegram channel.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot credential issued by BotFather.
    pub bot_token: String,
    /// Channel username (`@name`) or numeric chat id.
    pub chat_id: String,
    pub timeout: Duration,
    pub disable_web_page_preview: bool,
    /// Longest `retry_after` we will sleep through before retrying once.
    pub max_retry_after: Duration,
    pub(crate) api_base_url: String,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            timeout: DEFAULT_TIMEOUT,
            disable_web_page_preview: false,
            max_retry_after: Duration::from_secs(30),
            api_base_url: "https://api.telegram.org".to_string(),
        }
    }

    /// Sets a custom Bot API base URL (for testing or a local Bot API server).
    #[doc(hidden)]
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn disable_web_page_preview(mut self, disable: bool) -> Self {
        self.disable_web_page_preview = disable;
        self
    }

    pub fn max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }
}

/// Configuration for the poller core.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum number of repositories fetched at once. Default is 4.
    pub concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

impl PollerConfig {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[derive(Debug, Deserialize)]
struct TrackedFile {
    #[serde(default)]
    repos: Vec<String>,
}

/// Loads the tracked repositories file (`{"repos": ["owner/repo", ...]}`).
///
/// Returns `Ok(None)` when the file does not exist. Invalid identifiers are a
/// configuration error.
pub fn load_tracked(path: &Path) -> Result<Option<Vec<TrackedRepository>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Tracked repositories file not found");
            return Ok(None);
        }
        Err(e) => {
            return Err(Error::Config {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        }
    };

    let file: TrackedFile = serde_json::from_str(&content).map_err(|e| Error::Config {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let repos = file
        .repos
        .into_iter()
        .map(TrackedRepository::parse)
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(repos))
}

/// Removes duplicate repositories, keeping the first occurrence. GitHub names
/// are case-insensitive, so `Owner/Repo` and `owner/repo` are duplicates.
pub fn dedup_tracked(repos: Vec<TrackedRepository>) -> Vec<TrackedRepository> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::with_capacity(repos.len());
    for repo in repos {
        if seen.insert(repo.as_str().to_ascii_lowercase()) {
            unique.push(repo);
        } else {
            warn!(repo = %repo, "Ignoring duplicate tracked repository");
        }
    }
    unique
}
