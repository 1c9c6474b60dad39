//! Pool wiring for one run.
//!
//! Three pools exist per run: scan-input (prefixes, run by the
//! [`ScanCoordinator`]), action (delete markers, run by the restore, dry-run
//! or list executor) and fixup (receipt keys). Which of them are started
//! depends on the [`Mode`]. Shutdown drains them in that order so work handed
//! downstream is never stranded.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unmark_pool::{Action, JobPool, JobSink};
use unmark_store::ObjectStore;
use unmark_types::VersionEntry;

use crate::audit::AuditLog;
use crate::context::RunContext;
use crate::error::EngineError;
use crate::executor::{DryRunExecutor, FixupExecutor, ListExecutor, RestoreExecutor};
use crate::scan::{DEFAULT_EMIT_THRESHOLD, ScanCoordinator, ScanMode};

/// What a run does with what it finds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Remove in-window delete markers.
    Restore {
        /// Also clear `frozen_in_cluster` on restored receipts.
        zero_frozen: bool,
    },
    /// Log the delete markers restore would remove.
    DryRun,
    /// Write in-window delete markers to a file, or standard output.
    List {
        /// Output file; `None` for standard output.
        output: Option<PathBuf>,
    },
    /// Repair every receipt under the prefixes.
    Fixup {
        /// Clear `frozen_in_cluster` instead of only fixing hashes.
        zero_frozen: bool,
    },
    /// Log every version and delete marker under the prefixes.
    Audit,
}

impl Mode {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Restore { .. } => "restore",
            Mode::DryRun => "dryrun",
            Mode::List { .. } => "list",
            Mode::Fixup { .. } => "fixup",
            Mode::Audit => "audit",
        }
    }
}

/// Worker counts, batch sizes and queue bounds for the pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub scan_workers: usize,
    pub scan_batch: usize,
    pub restore_workers: usize,
    pub restore_batch: usize,
    pub fixup_workers: usize,
    pub fixup_batch: usize,
    pub queue_capacity: usize,
    /// Matches per batch submitted by the scanner.
    pub emit_threshold: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            scan_workers: 64,
            scan_batch: 20,
            restore_workers: 64,
            restore_batch: 256,
            fixup_workers: 32,
            fixup_batch: 4,
            queue_capacity: 2048,
            emit_threshold: DEFAULT_EMIT_THRESHOLD,
        }
    }
}

/// Everything a pipeline needs besides the store and context.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub mode: Mode,
    pub sizes: PoolSizes,
    /// Where fixup downloads receipts to.
    pub staging_dir: PathBuf,
    /// Fixed backup suffix; defaults to the start time.
    pub backup_suffix: Option<String>,
}

impl PipelineOptions {
    /// Options with default sizes and a staging directory under the system
    /// temp dir.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            sizes: PoolSizes::default(),
            staging_dir: std::env::temp_dir().join("unmark").join("fixups"),
            backup_suffix: None,
        }
    }
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Prefixes accepted by the scan-input pool.
    pub prefixes: usize,
    /// Whether the run was cut short by shutdown.
    pub interrupted: bool,
}

/// The pools of one run and the actions they are started with.
pub struct Pipeline {
    ctx: Arc<RunContext>,
    mode: Mode,
    input: Arc<JobPool<String>>,
    action: Arc<JobPool<VersionEntry>>,
    fixup: Arc<JobPool<String>>,
    scan_action: Action<String>,
    action_exec: Option<Action<VersionEntry>>,
    fixup_exec: Option<Action<String>>,
    audit: AuditLog,
    shutting_down: AtomicBool,
}

impl Pipeline {
    /// Build the pools and actions for `options.mode`. No worker runs yet.
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        ctx: Arc<RunContext>,
        options: PipelineOptions,
    ) -> Result<Self, EngineError> {
        let sizes = options.sizes;
        let input = Arc::new(JobPool::new(
            "input",
            sizes.scan_workers,
            sizes.scan_batch,
            sizes.queue_capacity,
        ));
        let action = Arc::new(JobPool::new(
            "restore",
            sizes.restore_workers,
            sizes.restore_batch,
            sizes.queue_capacity,
        ));
        let fixup = Arc::new(JobPool::new(
            "fixup",
            sizes.fixup_workers,
            sizes.fixup_batch,
            sizes.queue_capacity,
        ));
        let audit = AuditLog::new(ctx.pid);

        let action_sink: Arc<dyn JobSink<VersionEntry>> = action.clone();
        let fixup_sink: Arc<dyn JobSink<String>> = fixup.clone();
        let markers = ScanMode::DeleteMarkers {
            sink: action_sink,
            emit_threshold: sizes.emit_threshold,
        };
        let fixup_executor = |zero_frozen: bool| {
            let mut executor =
                FixupExecutor::new(store.clone(), ctx.clone(), &options.staging_dir, zero_frozen);
            if let Some(suffix) = &options.backup_suffix {
                executor = executor.with_backup_suffix(suffix.clone());
            }
            Action::PerBatch(Arc::new(executor))
        };

        let (scan_mode, action_exec, fixup_exec) = match &options.mode {
            Mode::Restore { zero_frozen } => {
                let mut restore = RestoreExecutor::new(store.clone(), ctx.clone());
                let mut fixup_exec = None;
                if *zero_frozen {
                    restore = restore.with_fixup(fixup_sink.clone());
                    fixup_exec = Some(fixup_executor(true));
                }
                (markers, Some(Action::PerBatch(Arc::new(restore))), fixup_exec)
            }
            Mode::DryRun => (
                markers,
                Some(Action::PerBatch(Arc::new(DryRunExecutor::new(ctx.clone())))),
                None,
            ),
            Mode::List { output } => {
                let list = ListExecutor::create(ctx.clone(), output.as_deref()).await?;
                (markers, Some(Action::PerBatch(Arc::new(list))), None)
            }
            Mode::Fixup { zero_frozen } => (
                ScanMode::Receipts {
                    sink: fixup_sink.clone(),
                },
                None,
                Some(fixup_executor(*zero_frozen)),
            ),
            Mode::Audit => (ScanMode::Audit, None, None),
        };

        let scanner = ScanCoordinator::new(store, ctx.clone(), scan_mode, audit.clone());
        Ok(Self {
            ctx,
            mode: options.mode,
            input,
            action,
            fixup,
            scan_action: Action::PerItem(Arc::new(scanner)),
            action_exec,
            fixup_exec,
            audit,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// The run's mode.
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Start the workers of every pool this mode uses.
    pub fn start_workers(&self) -> Result<(), EngineError> {
        if let Some(exec) = &self.fixup_exec {
            self.fixup.start(exec.clone())?;
        }
        if let Some(exec) = &self.action_exec {
            self.action.start(exec.clone())?;
        }
        self.input.start(self.scan_action.clone())?;
        debug!(mode = self.mode.name(), pid = self.ctx.pid, "workers started");
        Ok(())
    }

    /// Submit one prefix for scanning.
    pub async fn scan_prefix(&self, prefix: String) -> Result<(), EngineError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown(prefix));
        }
        self.input.add_job(prefix).await?;
        Ok(())
    }

    /// Submit prefixes until they run out or `shutdown` fires.
    ///
    /// Returns the number of prefixes accepted.
    pub async fn feed<I>(&self, prefixes: I, shutdown: &CancellationToken) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut accepted = 0;
        for prefix in prefixes {
            if shutdown.is_cancelled() {
                break;
            }
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.scan_prefix(prefix) => result,
            };
            match result {
                Ok(()) => accepted += 1,
                Err(e) => {
                    warn!(pid = self.ctx.pid, error = %e, "stopping prefix submission");
                    break;
                }
            }
        }
        accepted
    }

    /// Stop accepting prefixes and discard scanning and fixup work that has
    /// not started. Delete markers already found are still processed.
    pub async fn kill(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(pid = self.ctx.pid, "stopping pipeline");
        self.input.kill(false).await;
        self.fixup.kill(false).await;
    }

    /// Drain and close every pool in order, then wait for pending logging.
    pub async fn shutdown(&self) {
        self.input.wait_chan().await;
        self.input.close().await;
        self.input.wait().await;

        self.action.wait_chan().await;
        self.action.close().await;
        self.action.wait().await;

        self.fixup.wait_chan().await;
        self.fixup.close().await;
        self.fixup.wait().await;

        debug!(pid = self.ctx.pid, tasks = self.audit.in_flight(), "waiting for audit log");
        self.audit.wait().await;
        debug!(pid = self.ctx.pid, "pipeline drained");
    }

    /// Start, feed `prefixes`, and shut down.
    ///
    /// If `shutdown` fires at any point the pipeline is killed: prefix
    /// submission stops and queued scan and fixup work is discarded.
    pub async fn run<I>(
        self: &Arc<Self>,
        prefixes: I,
        shutdown: CancellationToken,
    ) -> Result<RunSummary, EngineError>
    where
        I: IntoIterator<Item = String>,
    {
        self.start_workers()?;

        let watcher = {
            let pipeline = self.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                pipeline.kill().await;
            })
        };

        let prefixes = self.feed(prefixes, &shutdown).await;
        self.shutdown().await;
        watcher.abort();

        Ok(RunSummary {
            prefixes,
            interrupted: shutdown.is_cancelled(),
        })
    }
}
