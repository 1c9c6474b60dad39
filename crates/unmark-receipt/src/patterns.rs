//! Field patterns matched against receipt lines.

use std::sync::LazyLock;

use regex::bytes::Regex;

/// `content_hash` followed by a comma: `"content_hash":"<hex>",`.
pub(crate) static HASH_LEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""content_hash":\s*"([^"]*)"\s*,"#).expect("valid regex")
});

/// `content_hash` preceded by a comma: `,"content_hash":"<hex>"`.
pub(crate) static HASH_TRAILING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#",\s*"content_hash":\s*"([^"]*)""#).expect("valid regex")
});

/// `content_hash` with no comma beside it on its line: the only field of an
/// object, or the last line of a pretty-printed one.
pub(crate) static HASH_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""content_hash":\s*"([^"]*)""#).expect("valid regex")
});

/// Field the hash is inserted after when it is missing.
pub(crate) static CIPHER_BLOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"("cipher_blob":"[^"]+")(,?)"#).expect("valid regex"));

/// A set frozen flag; group 1 is the spacing after the colon.
pub(crate) static FROZEN_SET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""frozen_in_cluster":(\s*)"1""#).expect("valid regex"));
