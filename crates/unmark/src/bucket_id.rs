//! Prefix derivation from command-line and prefix-file items.
//!
//! An item `<index>~<bucket id>` names one bucket of an index and maps to the
//! hash-sharded path the indexer stores it under:
//! `<stack>/<index>/db/<H0H1>/<H2H3>/<bucket id>`, where `H` is the upper-case
//! hex SHA-1 of the bucket id. Any other item is a path below the stack.

use std::path::Path;

use anyhow::{Context, bail};
use sha1::{Digest, Sha1};
use tracing::warn;

/// Listing prefix for one item.
pub fn prefix_for(stack: &str, item: &str) -> anyhow::Result<String> {
    let item = item.trim();
    if item.is_empty() {
        bail!("empty prefix");
    }
    let path = match item.split_once('~') {
        Some((index, bid)) => bucket_path(index, bid)?,
        None => item.to_string(),
    };
    Ok(normalize(&format!("{stack}/{path}")))
}

/// `<index>/db/<H0H1>/<H2H3>/<bid>`.
fn bucket_path(index: &str, bid: &str) -> anyhow::Result<String> {
    if index.is_empty() || bid.is_empty() || bid.chars().any(char::is_whitespace) {
        bail!("malformed bucket id {index}~{bid}");
    }
    let hash = hex::encode_upper(Sha1::digest(bid.as_bytes()));
    Ok(format!("{index}/db/{}/{}/{bid}", &hash[0..2], &hash[2..4]))
}

/// Collapse repeated slashes and drop a trailing one.
fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if !out.is_empty() || path.starts_with('/') {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

/// Prefixes for every item; malformed items are logged and skipped.
pub fn prefixes<'a>(stack: &str, items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(|item| match prefix_for(stack, item) {
            Ok(prefix) => Some(prefix),
            Err(e) => {
                warn!(item, error = %e, "skipping prefix");
                None
            }
        })
        .collect()
}

/// Items of a prefix file: one per line, blank lines skipped.
pub fn read_prefix_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read prefix file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
