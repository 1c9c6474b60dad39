//! [`Receipt`]: one receipt file on local disk and its repair operations.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ReceiptError;
use crate::patterns::{CIPHER_BLOB, FROZEN_SET, HASH_BARE, HASH_LEADING, HASH_TRAILING};

/// Position of the last closing brace, used when no anchor field exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClosingBrace {
    line: usize,
    col: usize,
    /// The brace closes an empty object.
    empty_object: bool,
}

/// Snapshot of what a scan of the file found.
#[derive(Debug, Clone)]
struct Inspection {
    path: PathBuf,
    declared: Option<String>,
    computed: String,
    frozen: bool,
    has_anchor: bool,
    closing: Option<ClosingBrace>,
}

/// A receipt file and the hashes found on its last inspection.
///
/// Methods take `&self`; a record-level lock serializes repairs of the same
/// receipt. All operations do blocking file IO.
#[derive(Debug)]
pub struct Receipt {
    state: Mutex<Inspection>,
}

impl Receipt {
    /// Scan `path` and compute its content hash.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReceiptError> {
        let state = inspect(path.as_ref())?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Path of the receipt on disk.
    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    /// Hash declared in the file, if the field is present.
    pub fn content_hash(&self) -> Option<String> {
        self.lock().declared.clone()
    }

    /// Hash computed from the file with the hash field removed.
    pub fn calculated_hash(&self) -> String {
        self.lock().computed.clone()
    }

    /// Whether the declared hash matches the computed one.
    pub fn hashes_match(&self) -> bool {
        let state = self.lock();
        state
            .declared
            .as_deref()
            .is_some_and(|declared| declared.eq_ignore_ascii_case(&state.computed))
    }

    /// Whether `frozen_in_cluster` is set to `"1"`.
    pub fn is_frozen_in_cluster(&self) -> bool {
        self.lock().frozen
    }

    /// Rewrite the file with its `content_hash` set to the computed hash.
    ///
    /// The field value is replaced in place; if the field is missing it is
    /// inserted after `cipher_blob`, or before the final closing brace when
    /// there is no `cipher_blob`. Returns the path of the repaired temp file,
    /// or with `update` replaces the original and returns its path.
    pub fn reset_content_hash(&self, update: bool) -> Result<PathBuf, ReceiptError> {
        let mut state = self.lock();
        let fixed = write_reset_hash(&state)?;

        if update {
            let path = state.path.clone();
            fixed
                .persist(&path)
                .map_err(|e| ReceiptError::io(&path)(e.error))?;
            *state = inspect(&path)?;
            debug!(path = %path.display(), hash = %state.computed, "content hash reset");
            Ok(path)
        } else {
            let (_, kept) = fixed
                .keep()
                .map_err(|e| ReceiptError::io(&state.path)(e.error))?;
            Ok(kept)
        }
    }

    /// Rewrite the file with `frozen_in_cluster` cleared and a fresh hash.
    ///
    /// Clearing the flag invalidates the declared hash, so the hash is always
    /// recomputed, whether or not the flag was set. Returns the path of the
    /// repaired temp file, or with `update` replaces the original and returns
    /// its path.
    pub fn zero_frozen_in_cluster(&self, update: bool) -> Result<PathBuf, ReceiptError> {
        let mut state = self.lock();

        let zeroed = rewrite_beside(&state.path, "resetfrozen-", |_, content| {
            Some(
                FROZEN_SET
                    .replace_all(content, &br#""frozen_in_cluster":${1}"0""#[..])
                    .into_owned(),
            )
        })?;
        let (_, zeroed_path) = zeroed
            .keep()
            .map_err(|e| ReceiptError::io(&state.path)(e.error))?;

        let repaired = Receipt::open(&zeroed_path)?;
        repaired.reset_content_hash(true)?;

        if update {
            let path = state.path.clone();
            std::fs::rename(&zeroed_path, &path).map_err(ReceiptError::io(&path))?;
            *state = inspect(&path)?;
            debug!(path = %path.display(), hash = %state.computed, "frozen flag cleared");
            Ok(path)
        } else {
            Ok(zeroed_path)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inspection> {
        self.state.lock().expect("receipt lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Streaming helpers
// ---------------------------------------------------------------------------

/// Split a raw line into content and its `\n` / `\r\n` terminator.
fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    if line.ends_with(b"\r\n") {
        line.split_at(line.len() - 2)
    } else if line.ends_with(b"\n") {
        line.split_at(line.len() - 1)
    } else {
        (line, &[])
    }
}

/// Call `f(index, content, terminator)` for every line of `path`.
fn for_each_line(
    path: &Path,
    mut f: impl FnMut(usize, &[u8], &[u8]) -> Result<(), ReceiptError>,
) -> Result<(), ReceiptError> {
    let file = File::open(path).map_err(ReceiptError::io(path))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut index = 0;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(ReceiptError::io(path))?;
        if n == 0 {
            return Ok(());
        }
        let (content, terminator) = split_terminator(&buf);
        f(index, content, terminator)?;
        index += 1;
    }
}

/// Stream `path` into a new temp file beside it.
///
/// `patch(index, content)` returns replacement content for a line, or `None`
/// to copy it unchanged. Terminators are always preserved.
fn rewrite_beside(
    path: &Path,
    prefix: &str,
    mut patch: impl FnMut(usize, &[u8]) -> Option<Vec<u8>>,
) -> Result<tempfile::NamedTempFile, ReceiptError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(prefix)
        .suffix("-receipt.json")
        .tempfile_in(dir)
        .map_err(ReceiptError::io(dir))?;

    let mut writer = BufWriter::new(tmp);
    for_each_line(path, |index, content, terminator| {
        let patched = patch(index, content);
        let out = patched.as_deref().unwrap_or(content);
        writer
            .write_all(out)
            .and_then(|_| writer.write_all(terminator))
            .map_err(ReceiptError::io(path))
    })?;

    writer
        .into_inner()
        .map_err(|e| ReceiptError::io(path)(e.into_error()))
}

/// Remove the hash field from `content`, recording its value in `declared`.
fn strip_hash_field(content: &[u8], declared: &mut Option<String>) -> Vec<u8> {
    let mut buf = content.to_vec();
    if let Some(hash) = first_capture(&HASH_LEADING, &buf) {
        declared.get_or_insert(hash);
        buf = HASH_LEADING.replace_all(&buf, &b""[..]).into_owned();
    }
    for re in [&*HASH_TRAILING, &*HASH_BARE] {
        if declared.is_some() {
            break;
        }
        if let Some(hash) = first_capture(re, &buf) {
            *declared = Some(hash);
            buf = re.replace_all(&buf, &b""[..]).into_owned();
        }
    }
    buf
}

fn first_capture(re: &regex::bytes::Regex, content: &[u8]) -> Option<String> {
    re.captures(content)
        .and_then(|c| c.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// Ranges of the hash values to replace on a line: leading form, then
/// trailing, then bare.
fn hash_value_ranges(content: &[u8]) -> Vec<Range<usize>> {
    [&*HASH_LEADING, &*HASH_TRAILING, &*HASH_BARE]
        .into_iter()
        .map(|re| {
            re.captures_iter(content)
                .filter_map(|c| c.get(1).map(|m| m.range()))
                .collect::<Vec<_>>()
        })
        .find(|ranges| !ranges.is_empty())
        .unwrap_or_default()
}

fn splice(content: &[u8], ranges: &[Range<usize>], value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + value.len());
    let mut at = 0;
    for range in ranges {
        out.extend_from_slice(&content[at..range.start]);
        out.extend_from_slice(value);
        at = range.end;
    }
    out.extend_from_slice(&content[at..]);
    out
}

fn inspect(path: &Path) -> Result<Inspection, ReceiptError> {
    let mut hasher = Sha256::new();
    let mut declared = None;
    let mut frozen = false;
    let mut has_anchor = false;
    let mut closing = None;
    let mut last_significant: Option<u8> = None;

    for_each_line(path, |index, content, _| {
        hasher.update(strip_hash_field(content, &mut declared));
        frozen |= FROZEN_SET.is_match(content);
        has_anchor |= CIPHER_BLOB.is_match(content);

        for (col, &b) in content.iter().enumerate() {
            if b == b'}' {
                closing = Some(ClosingBrace {
                    line: index,
                    col,
                    empty_object: last_significant == Some(b'{'),
                });
            }
            if !b.is_ascii_whitespace() {
                last_significant = Some(b);
            }
        }
        Ok(())
    })?;

    Ok(Inspection {
        path: path.to_path_buf(),
        declared,
        computed: hex::encode_upper(hasher.finalize()),
        frozen,
        has_anchor,
        closing,
    })
}

/// Write a copy of the receipt with its hash field set to the computed hash.
fn write_reset_hash(state: &Inspection) -> Result<tempfile::NamedTempFile, ReceiptError> {
    let hash = state.computed.as_bytes();
    let inserted = format!(r#","content_hash":"{}""#, state.computed).into_bytes();

    if state.declared.is_none()
        && !state.has_anchor
        && !state.closing.is_some_and(|c| !c.empty_object)
    {
        return Err(ReceiptError::NoAnchor(state.path.clone()));
    }

    let mut replaced = false;
    rewrite_beside(&state.path, "fixup-", |index, content| {
        if replaced {
            return None;
        }
        if state.declared.is_some() {
            let ranges = hash_value_ranges(content);
            if ranges.is_empty() {
                return None;
            }
            replaced = true;
            return Some(splice(content, &ranges, hash));
        }
        if state.has_anchor {
            let end = CIPHER_BLOB
                .captures(content)
                .and_then(|c| c.get(1))
                .map(|m| m.end())?;
            replaced = true;
            return Some(splice(content, &[end..end], &inserted));
        }
        let brace = state.closing.filter(|c| c.line == index)?;
        replaced = true;
        Some(splice(content, &[brace.col..brace.col], &inserted))
    })
}
