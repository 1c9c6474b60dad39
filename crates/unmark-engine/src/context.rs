//! Immutable run parameters shared by the scanner and every executor.

use unmark_types::TimeWindow;

/// What a run operates on.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Process id stamped on every log line.
    pub pid: u32,
    /// Bucket being repaired.
    pub bucket: String,
    /// Leading path component under which all prefixes live.
    pub stack: String,
    /// Only delete markers created inside this window are touched.
    pub window: TimeWindow,
    /// Log skipped and submitted entries.
    pub verbose: bool,
}

impl RunContext {
    /// Context for the current process.
    pub fn new(bucket: impl Into<String>, stack: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            pid: std::process::id(),
            bucket: bucket.into(),
            stack: stack.into(),
            window,
            verbose: false,
        }
    }

    /// Enable or disable verbose entry logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// `key` relative to the stack, as written to list output.
    pub fn strip_stack<'a>(&self, key: &'a str) -> &'a str {
        let stack = self.stack.trim_matches('/');
        if stack.is_empty() {
            return key;
        }
        key.strip_prefix(stack)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(key)
    }
}
