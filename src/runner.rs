//! Orchestrates one poll: load state, find new releases, announce, persist.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::poller::ReleasePoller;
use crate::sink::NotificationSink;
use crate::store::StateStore;
use crate::summary::RunSummary;
use crate::types::TrackedRepository;

/// Runs the poller against a store and a sink.
pub struct Runner {
    poller: ReleasePoller,
    sink: Arc<dyn NotificationSink>,
    store: Arc<dyn StateStore>,
    dry_run: bool,
}

impl Runner {
    pub fn new(
        poller: ReleasePoller,
        sink: Arc<dyn NotificationSink>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            poller,
            sink,
            store,
            dry_run: false,
        }
    }

    /// Logs notifications instead of delivering them and skips persistence.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Executes one run.
    ///
    /// Fetch and delivery failures are counted in the summary. A notification
    /// that fails to deliver still has its tag recorded, so a broken channel
    /// cannot cause the same release to be re-sent every run. Errors returned
    /// from here are state I/O failures; nothing is half-written when they occur.
    pub async fn run(&self, tracked: &[TrackedRepository]) -> Result<RunSummary> {
        let mut summary = RunSummary::new(tracked.len(), self.dry_run);

        let prior = self.store.load_notified()?;
        let outcome = self.poller.run(tracked, &prior).await;
        summary.fetch_failures = outcome.failures.len();
        summary.notifications = outcome.notifications.len();
        summary.possible_gaps = outcome.possible_gaps.len();

        for notification in &outcome.notifications {
            if self.dry_run {
                info!(
                    repo = %notification.repository,
                    tag = %notification.release_tag,
                    link = %notification.link,
                    "[DRY RUN] Would notify"
                );
                continue;
            }

            match self.sink.deliver(notification).await {
                Ok(()) => {
                    info!(
                        repo = %notification.repository,
                        tag = %notification.release_tag,
                        "Notified"
                    );
                    summary.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        repo = %notification.repository,
                        tag = %notification.release_tag,
                        error = %e,
                        "Failed to deliver notification, marking as notified anyway"
                    );
                    summary.delivery_failures += 1;
                }
            }
        }

        if self.dry_run {
            return Ok(summary);
        }

        self.store.save_notified(&outcome.state)?;
        self.store.save_badge(&outcome.badge)?;
        summary.persisted = true;

        Ok(summary)
    }
}
