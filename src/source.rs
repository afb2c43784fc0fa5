use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::GitHubSourceConfig;
use crate::error::{Error, FetchError, Result};
use crate::types::{GitHubReleaseResponse, Release, TrackedRepository};

/// Where releases come from.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetches the most recent releases of `repo`, newest first.
    async fn fetch_releases(
        &self,
        repo: &TrackedRepository,
    ) -> std::result::Result<Vec<Release>, FetchError>;
}

/// Release source backed by the GitHub REST API.
pub struct GitHubReleaseSource {
    config: GitHubSourceConfig,
    client: Client,
}

impl GitHubReleaseSource {
    pub fn new(config: GitHubSourceConfig) -> Result<Self> {
        if Url::parse(&config.base_url).is_err() {
            return Err(Error::InvalidBaseUrl(config.base_url.clone()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::Client)?;

        Ok(Self { config, client })
    }

    fn releases_url(&self, repo: &TrackedRepository) -> String {
        format!(
            "{}/repos/{}/releases",
            self.config.base_url.trim_end_matches('/'),
            repo
        )
    }

    fn map_transport_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.config.timeout)
        } else {
            FetchError::Http(error)
        }
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    async fn fetch_releases(
        &self,
        repo: &TrackedRepository,
    ) -> std::result::Result<Vec<Release>, FetchError> {
        // Ask for a full page so filtering drafts/prereleases still leaves a window.
        let per_page = self.config.releases_per_repo.max(30).min(100);

        let mut request = self
            .client
            .get(self.releases_url(repo))
            .query(&[("per_page", per_page)])
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "relpoll");

        if let Some(ref token) = self.config.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Api { status, message });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let github_releases: Vec<GitHubReleaseResponse> = serde_json::from_str(&body)?;

        let mut releases: Vec<Release> = github_releases
            .into_iter()
            .filter(|r| !r.draft)
            .filter(|r| self.config.include_prereleases || !r.prerelease)
            .map(|r| r.into_release(repo))
            .collect();

        // Newest first; unpublished entries sink to the end.
        releases.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        releases.truncate(self.config.releases_per_repo);

        debug!(repo = %repo, count = releases.len(), "Fetched releases");

        Ok(releases)
    }
}
