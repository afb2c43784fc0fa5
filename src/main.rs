//! CLI for relpoll.
//!
//! Meant to be invoked on a schedule. Reads the tracked repositories, announces
//! new releases to a Telegram channel, and rewrites the notified-set and badge
//! files for the caller to commit.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use relpoll::cli::{execute, CliOptions};
use relpoll::{BadgeFormat, RunSummary, TrackedRepository};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// relpoll - Announce new GitHub releases of tracked repositories exactly once.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file listing tracked repositories: {"repos": ["owner/repo", ...]}.
    #[arg(long, default_value = "data/tracked.json")]
    tracked_file: PathBuf,

    /// JSON file recording already announced release tags.
    #[arg(long, default_value = "data/notified.json")]
    notified_file: PathBuf,

    /// JSON file receiving the tracked-count badge.
    #[arg(long, default_value = "badge/tracked-count.json")]
    badge_file: PathBuf,

    /// Layout of the badge file.
    #[arg(long, value_enum, default_value_t = BadgeFormatArg::Count)]
    badge_format: BadgeFormatArg,

    /// Additional repository to track (repeatable).
    #[arg(long = "repo", value_name = "OWNER/REPO")]
    repos: Vec<TrackedRepository>,

    /// Telegram bot token.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Telegram channel (@name or numeric chat id).
    #[arg(long, env = "TELEGRAM_CHANNEL")]
    channel: Option<String>,

    /// GitHub token, raises the API rate limit.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// How many recent releases to consider per repository.
    #[arg(long, default_value_t = 5)]
    releases_per_repo: usize,

    /// Maximum concurrent GitHub requests.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Do not announce prereleases.
    #[arg(long)]
    skip_prereleases: bool,

    /// Log what would be announced without sending or writing anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BadgeFormatArg {
    /// {"tracked_count": N}
    Count,
    /// shields.io endpoint document
    Shields,
}

impl From<BadgeFormatArg> for BadgeFormat {
    fn from(arg: BadgeFormatArg) -> Self {
        match arg {
            BadgeFormatArg::Count => BadgeFormat::Count,
            BadgeFormatArg::Shields => BadgeFormat::Shields,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();

    match execute(args.into()).await {
        Ok(Some(summary)) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Critical failure");
            ExitCode::from(1)
        }
    }
}

/// Sets up the global tracing subscriber with compact output, filtered via
/// `RUST_LOG` (defaults to "info").
fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

impl From<Args> for CliOptions {
    fn from(args: Args) -> Self {
        Self {
            tracked_file: args.tracked_file,
            notified_file: args.notified_file,
            badge_file: args.badge_file,
            badge_format: args.badge_format.into(),
            repos: args.repos,
            bot_token: args.bot_token,
            channel: args.channel,
            github_token: args.github_token,
            timeout: Duration::from_secs(args.timeout_secs),
            releases_per_repo: args.releases_per_repo,
            concurrency: args.concurrency,
            skip_prereleases: args.skip_prereleases,
            dry_run: args.dry_run,
            ..Self::default()
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\nSummary:");
    println!(
        "  Mode: {}",
        if summary.dry_run { "Dry Run" } else { "Live" }
    );
    println!("  Repositories tracked: {}", summary.tracked);
    println!("  Fetch failures: {}", summary.fetch_failures);
    println!("  New releases: {}", summary.notifications);
    if summary.possible_gaps > 0 {
        println!("  Possible gaps: {}", summary.possible_gaps);
    }

    if !summary.dry_run {
        println!("  Delivered: {}", summary.delivered);
        println!("  Delivery failures: {}", summary.delivery_failures);
    }
}
