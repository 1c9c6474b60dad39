//! Shared types for unmark.
//!
//! This crate defines the data model passed between the scan producers, the
//! job pools and the action executors: listed versions ([`VersionEntry`]),
//! delete requests and their outcome ([`ObjectIdentifier`],
//! [`DeleteOutcome`]), listing pages ([`VersionPage`], [`ObjectPage`]), the
//! scan window ([`TimeWindow`]) and the structured log vocabulary
//! ([`Status`], [`BatchId`]).

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};

/// Name of the companion metadata file repaired by the fixup executor.
pub const RECEIPT_FILE_NAME: &str = "receipt.json";

/// Whether `key` addresses a receipt metadata file.
pub fn is_receipt_key(key: &str) -> bool {
    key == RECEIPT_FILE_NAME || key.ends_with("/receipt.json")
}

// ---------------------------------------------------------------------------
// Listed versions
// ---------------------------------------------------------------------------

/// One listed object version, either data or a delete marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Object key.
    pub key: String,
    /// Version identifier assigned by the store.
    pub version_id: String,
    /// When this version was created.
    pub last_modified: DateTime<Utc>,
    /// Whether this is the currently visible version of the key.
    pub is_latest: bool,
    /// Whether this version is a delete marker.
    pub is_delete_marker: bool,
}

impl VersionEntry {
    /// The `(key, version_id)` pair addressing this exact version.
    pub fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier {
            key: self.key.clone(),
            version_id: self.version_id.clone(),
        }
    }

    /// Ordering used by the audit log: key first, then timestamp.
    pub fn audit_order(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.last_modified.cmp(&other.last_modified))
    }
}

/// Exact address of one object version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentifier {
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
}

/// A per-item failure reported inside a bulk-delete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
    /// Store-specific error code, if any.
    pub code: Option<String>,
    /// Human-readable reason.
    pub message: String,
}

/// Result of one bulk-delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Versions that were removed.
    pub deleted: Vec<ObjectIdentifier>,
    /// Versions the store refused to remove.
    pub errors: Vec<DeleteFailure>,
}

// ---------------------------------------------------------------------------
// Listing pages
// ---------------------------------------------------------------------------

/// Position to resume a version listing from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCursor {
    /// Last key of the previous page.
    pub key_marker: String,
    /// Last version id of the previous page.
    pub version_id_marker: Option<String>,
}

/// One page of a version listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionPage {
    /// Data versions and delete markers on this page.
    pub entries: Vec<VersionEntry>,
    /// Cursor for the following page, `None` when the listing is complete.
    pub next: Option<ListCursor>,
}

impl VersionPage {
    /// Delete markers on this page.
    pub fn delete_markers(&self) -> impl Iterator<Item = &VersionEntry> {
        self.entries.iter().filter(|e| e.is_delete_marker)
    }
}

/// One page of a plain (non-versioned) object listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Keys of the currently visible objects.
    pub keys: Vec<String>,
    /// Continuation token for the following page.
    pub next: Option<String>,
}

// ---------------------------------------------------------------------------
// Scan window
// ---------------------------------------------------------------------------

/// Open time interval `(from, to)` selecting which versions a run touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Exclusive lower bound.
    pub from: DateTime<Utc>,
    /// Exclusive upper bound.
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window. Bounds are not reordered.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Whether `at` lies strictly inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from < at && at < self.to
    }

    /// Whether `entry` is a latest delete marker created inside the window.
    pub fn selects_marker(&self, entry: &VersionEntry) -> bool {
        entry.is_delete_marker && entry.is_latest && self.contains(entry.last_modified)
    }
}

// ---------------------------------------------------------------------------
// Log vocabulary
// ---------------------------------------------------------------------------

/// Value of the `status` field on every structured log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Run or step started.
    Start,
    /// Run or step finished.
    End,
    /// Remote action succeeded.
    Ok,
    /// Remote action refused for one item.
    Fail,
    /// Action skipped because of dry-run mode.
    Dryrun,
    /// Entry written to the listing output.
    List,
    /// Call-level failure.
    Error,
    /// Verbose: entry filtered out.
    Skip,
    /// Verbose: entry submitted downstream.
    Submit,
    /// Audit mode listing line.
    Audit,
    /// Informational step inside an action.
    Info,
}

impl Status {
    /// Lowercase name as written in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Start => "start",
            Status::End => "end",
            Status::Ok => "ok",
            Status::Fail => "fail",
            Status::Dryrun => "dryrun",
            Status::List => "list",
            Status::Error => "error",
            Status::Skip => "skip",
            Status::Submit => "submit",
            Status::Audit => "audit",
            Status::Info => "info",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique id grouping the log lines of one action invocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(uuid::Uuid);

impl BatchId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchId({})", self.0)
    }
}
