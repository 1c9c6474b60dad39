//! `unmark` removes delete markers from a versioned bucket.
//!
//! # Usage
//!
//! ```text
//! unmark restore --bucket b --start -2d --end now stack main idx~bid
//! unmark restore --dry-run --bucket b -s 2024-01-01 -e 2024-01-02 stack main
//! unmark restore --zero-frozen --bucket b -s -1d -e now -p prefixes.txt stack
//! unmark list --output markers.txt --bucket b -s -1d -e now stack main
//! unmark fixup --bucket b stack main
//! unmark audit --bucket b stack main
//! unmark dateformat
//! ```

mod bucket_id;
mod config;
mod logging;
mod timeparse;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use unmark_engine::{Mode, Pipeline, PipelineOptions, RunContext, ShutdownCoordinator};
use unmark_store::{AwsStore, ObjectStore, RateLimitedStore, RateLimiter};
use unmark_types::{Status, TimeWindow};

use config::UnmarkConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "unmark",
    version,
    about = "Remove delete markers from a versioned bucket"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove delete markers created inside the window.
    Restore {
        /// Log the markers that would be removed with status=dryrun.
        #[arg(short, long)]
        dry_run: bool,

        /// Also clear `frozen_in_cluster` on every restored receipt.
        #[arg(short, long)]
        zero_frozen: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Write the delete markers inside the window to a file.
    List {
        /// Output file; standard output when omitted.
        #[arg(short = 'l', long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Repair every receipt below the prefixes.
    Fixup {
        /// Clear `frozen_in_cluster` instead of only fixing hashes.
        #[arg(short, long)]
        zero_frozen: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Log every version and delete marker below the prefixes.
    Audit {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the accepted date formats.
    Dateformat,
}

/// Options shared by every run.
#[derive(Args)]
struct RunArgs {
    /// Bucket to operate on.
    #[arg(short, long, env = "UNMARK_BUCKET")]
    bucket: Option<String>,

    /// Bucket region; discovered from the bucket when omitted.
    #[arg(short, long)]
    region: Option<String>,

    /// Window start (see `unmark dateformat`).
    #[arg(short, long, allow_hyphen_values = true)]
    start: Option<String>,

    /// Window end (see `unmark dateformat`).
    #[arg(short, long, allow_hyphen_values = true)]
    end: Option<String>,

    /// Read additional prefixes from a file, one per line.
    #[arg(short, long)]
    prefix_file: Option<PathBuf>,

    /// Remote calls per second: -1 disables limiting, 0 selects the default.
    #[arg(short = 't', long, allow_negative_numbers = true)]
    rate: Option<i64>,

    /// Log file, or a directory to create one in.
    #[arg(short = 'x', long)]
    log: Option<PathBuf>,

    /// Log every skipped and submitted entry.
    #[arg(short, long)]
    verbose: bool,

    /// Stack name prepended to every prefix.
    stack: String,

    /// Index names, `index~bucketid` items or paths below the stack.
    prefixes: Vec<String>,
}

impl RunArgs {
    /// Apply command-line overrides to the file config.
    fn apply(&self, config: &mut UnmarkConfig) {
        if let Some(bucket) = &self.bucket {
            config.store.bucket = Some(bucket.clone());
        }
        if let Some(region) = &self.region {
            config.store.region = Some(region.clone());
        }
        if let Some(rate) = self.rate {
            config.store.rate_limit = rate;
        }
        if let Some(log) = &self.log {
            config.log.file = Some(log.clone());
        }
    }

    /// The time window; modes that do not filter by time may omit it.
    fn window(&self, required: bool, now: DateTime<Utc>) -> Result<TimeWindow> {
        let parse = |value: &Option<String>, name: &str, default: DateTime<Utc>| match value {
            Some(v) => timeparse::parse_time(v, now).with_context(|| format!("invalid --{name}")),
            None if required => bail!("--{name} is required"),
            None => Ok(default),
        };
        let from = parse(&self.start, "start", DateTime::<Utc>::MIN_UTC)?;
        let to = parse(&self.end, "end", DateTime::<Utc>::MAX_UTC)?;
        if from >= to {
            bail!("--start must be before --end");
        }
        Ok(TimeWindow::new(from, to))
    }

    /// Every item from the command line and the prefix file.
    fn items(&self) -> Result<Vec<String>> {
        let mut items = self.prefixes.clone();
        if let Some(path) = &self.prefix_file {
            items.extend(bucket_id::read_prefix_file(path)?);
        }
        if items.is_empty() {
            bail!("no prefixes given");
        }
        Ok(items)
    }
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mode, run) = match cli.command {
        Commands::Dateformat => {
            print!("{}", timeparse::DATE_FORMATS);
            return Ok(());
        }
        Commands::Restore {
            dry_run: true,
            zero_frozen,
            run,
        } => {
            if zero_frozen {
                eprintln!("--zero-frozen has no effect with --dry-run");
            }
            (Mode::DryRun, run)
        }
        Commands::Restore { zero_frozen, run, .. } => (Mode::Restore { zero_frozen }, run),
        Commands::List { output, run } => (Mode::List { output }, run),
        Commands::Fixup { zero_frozen, run } => (Mode::Fixup { zero_frozen }, run),
        Commands::Audit { run } => (Mode::Audit, run),
    };

    let mut config = UnmarkConfig::load(cli.config.as_deref()).context("failed to load config")?;
    run.apply(&mut config);

    let listing_to_stdout = matches!(mode, Mode::List { output: None });
    let log_path = logging::init(&config.log.level, config.log.file.as_deref(), !listing_to_stdout)
        .context("failed to set up logging")?;
    eprintln!("logging to {}", log_path.display());

    let pid = std::process::id();
    let cmdline = std::env::args().collect::<Vec<_>>().join(" ");
    info!(status = %Status::Start, pid, cmdline = %cmdline, "starting");

    let result = cmd_run(config, mode, &run, pid).await;
    if let Err(e) = &result {
        warn!(status = %Status::Error, pid, error = %format!("{e:#}"), "run failed");
    }
    info!(status = %Status::End, pid, "finished");
    result
}

// -----------------------------------------------------------------------
// unmark restore | list | fixup | audit
// -----------------------------------------------------------------------

async fn cmd_run(config: UnmarkConfig, mode: Mode, run: &RunArgs, pid: u32) -> Result<()> {
    let Some(bucket) = config.store.bucket.clone() else {
        bail!("no bucket given (--bucket or [store] bucket)");
    };
    let needs_window = matches!(mode, Mode::Restore { .. } | Mode::DryRun | Mode::List { .. });
    let window = run.window(needs_window, Utc::now())?;
    let prefixes = bucket_id::prefixes(&run.stack, run.items()?.iter().map(String::as_str));

    let aws = AwsStore::connect(&bucket, config.store.region.clone())
        .await
        .context("cannot reach bucket")?;
    let limiter = RateLimiter::from_setting(config.store.rate_limit);
    info!(
        pid,
        bucket = %bucket,
        mode = mode.name(),
        rate = limiter.rate(),
        limited = limiter.is_enabled(),
        prefixes = prefixes.len(),
        "run configuration"
    );
    let store: Arc<dyn ObjectStore> = Arc::new(RateLimitedStore::new(Arc::new(aws), limiter));

    let ctx = Arc::new(RunContext::new(bucket, &run.stack, window).with_verbose(run.verbose));
    let mut options = PipelineOptions::new(mode);
    options.sizes = config.pools.sizes();
    if let Some(dir) = config.fixup.staging_dir {
        options.staging_dir = dir;
    }

    let shutdown = ShutdownCoordinator::new();
    let listener = shutdown.listen_for_signals(pid);

    let pipeline = Arc::new(Pipeline::new(store, ctx, options).await?);
    let summary = pipeline.run(prefixes, shutdown.token()).await?;
    listener.abort();

    info!(
        pid,
        prefixes = summary.prefixes,
        interrupted = summary.interrupted,
        "run complete"
    );
    Ok(())
}
