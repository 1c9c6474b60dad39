//! Parsing of `--start` and `--end` values.
//!
//! Absolute formats are tried first, then RFC 3339, then offsets relative to
//! the current time. Values without a zone are taken as UTC.

use std::sync::LazyLock;

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use regex::Regex;

/// Help text printed by `unmark dateformat`.
pub const DATE_FORMATS: &str = "\
Accepted date formats (UTC unless a zone is given):

  2006-01-02T15:04:05-0700   date, time and zone offset
  2006-01-02T15:04:05        date and time
  2006-01-02                 midnight of the date
  15:04:05                   time today
  15:04                      time today
  2006-01-02T15:04:05Z       RFC 3339
  now                        the current time
  now-1h, now-2d-1h-3m       offsets from now
  -300m, -20d, +1w, -1s      offsets from now

Offset units: s (seconds), m (minutes), h (hours), d (days), w (weeks).
";

static OFFSET_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+-])(\d+)([smhdw])").expect("static regex"));

/// Parse `input` relative to `now`.
pub fn parse_time(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(t) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%z") {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(d.and_time(NaiveTime::MIN).and_utc());
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(input, format) {
            return Ok(now.date_naive().and_time(t).and_utc());
        }
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(input) {
        return Ok(t.with_timezone(&Utc));
    }

    parse_offset(input, now).with_context(|| format!("unrecognised date/time {input:?}"))
}

/// `now`, optionally followed by signed offsets, or offsets alone.
fn parse_offset(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    if input.is_empty() {
        bail!("empty value");
    }
    let mut rest = input.strip_prefix("now").unwrap_or(input);

    let mut at = now;
    while !rest.is_empty() {
        let Some(caps) = OFFSET_TERM.captures(rest) else {
            bail!("bad offset {rest:?}");
        };
        let amount: i64 = caps[2].parse().context("offset out of range")?;
        let unit = match &caps[3] {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => 604_800,
        };
        let delta = amount
            .checked_mul(unit)
            .and_then(TimeDelta::try_seconds)
            .context("offset out of range")?;
        at = if &caps[1] == "-" {
            at.checked_sub_signed(delta)
        } else {
            at.checked_add_signed(delta)
        }
        .context("offset out of range")?;
        rest = &rest[caps[0].len()..];
    }
    Ok(at)
}
