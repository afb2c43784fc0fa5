/// Summary of a complete run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of tracked repositories.
    pub tracked: usize,

    /// Repositories skipped because their fetch failed.
    pub fetch_failures: usize,

    /// New releases found.
    pub notifications: usize,

    /// Repositories whose fetched window had no overlap with announced history.
    pub possible_gaps: usize,

    /// Notifications the channel accepted.
    pub delivered: usize,

    /// Notifications the channel rejected. Their tags are still recorded.
    pub delivery_failures: usize,

    /// Whether state and badge files were written.
    pub persisted: bool,

    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl RunSummary {
    #[must_use]
    pub fn new(tracked: usize, dry_run: bool) -> Self {
        Self {
            tracked,
            dry_run,
            ..Default::default()
        }
    }

    /// Returns true if any repository or notification failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.fetch_failures > 0 || self.delivery_failures > 0
    }
}
