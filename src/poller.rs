use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::error::FetchError;
use crate::source::ReleaseSource;
use crate::types::{BadgeState, Notification, NotifiedState, Release, TrackedRepository};

/// A repository whose releases could not be fetched this run.
#[derive(Debug)]
pub struct RepositoryFailure {
    pub repository: TrackedRepository,
    pub error: FetchError,
}

/// Everything a poll produced. Nothing has been delivered or persisted yet.
#[derive(Debug)]
pub struct PollOutcome {
    /// Prior state plus every newly announced tag.
    pub state: NotifiedState,
    /// New releases, in tracked-list order and oldest first per repository.
    pub notifications: Vec<Notification>,
    pub badge: BadgeState,
    pub failures: Vec<RepositoryFailure>,
    /// Repositories with prior history where every fetched release was new.
    /// Releases older than the fetched window may have gone unannounced.
    pub possible_gaps: Vec<TrackedRepository>,
}

/// Diffs upstream releases against the notified set.
pub struct ReleasePoller {
    source: Arc<dyn ReleaseSource>,
    config: PollerConfig,
}

impl ReleasePoller {
    pub fn new(source: Arc<dyn ReleaseSource>, config: PollerConfig) -> Self {
        Self { source, config }
    }

    /// Fetches every tracked repository and works out what is new.
    ///
    /// A fetch failure only affects its own repository: it is logged, listed in
    /// [`PollOutcome::failures`], and its prior state is carried over.
    pub async fn run(&self, tracked: &[TrackedRepository], prior: &NotifiedState) -> PollOutcome {
        let source = &self.source;
        let fetched: Vec<_> = stream::iter(tracked)
            .map(|repo| async move { (repo, source.fetch_releases(repo).await) })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let outcome = reconcile(tracked.len(), prior, fetched);
        info!(
            tracked = tracked.len(),
            new = outcome.notifications.len(),
            failed = outcome.failures.len(),
            "Poll complete"
        );
        outcome
    }
}

fn reconcile(
    tracked_count: usize,
    prior: &NotifiedState,
    fetched: Vec<(&TrackedRepository, Result<Vec<Release>, FetchError>)>,
) -> PollOutcome {
    let mut state = prior.clone();
    let mut notifications = Vec::new();
    let mut failures = Vec::new();
    let mut possible_gaps = Vec::new();

    for (repo, result) in fetched {
        let mut releases = match result {
            Ok(releases) => releases,
            Err(error) => {
                warn!(repo = %repo, error = %error, "Skipping repository, fetch failed");
                failures.push(RepositoryFailure {
                    repository: repo.clone(),
                    error,
                });
                continue;
            }
        };

        releases.sort_by(|a, b| {
            a.published_at
                .cmp(&b.published_at)
                .then_with(|| a.tag_name.cmp(&b.tag_name))
        });

        let had_history = state.tags(repo).is_some_and(|tags| !tags.is_empty())
            || state.legacy_release_id(repo).is_some();
        let absorbed = state.absorb_legacy_id(repo, &releases);
        if absorbed > 0 {
            debug!(repo = %repo, absorbed, "Folded legacy release id into tags");
        }

        let mut new = 0;
        for release in &releases {
            if state.insert(repo, release.tag_name.as_str()) {
                debug!(repo = %repo, tag = %release.tag_name, "New release");
                notifications.push(Notification::from(release));
                new += 1;
            }
        }

        if had_history && new > 0 && new == releases.len() {
            warn!(
                repo = %repo,
                new,
                "Every fetched release is new, older releases may have been missed"
            );
            possible_gaps.push(repo.clone());
        }
    }

    PollOutcome {
        state,
        notifications,
        badge: BadgeState::new(tracked_count),
        failures,
        possible_gaps,
    }
}
