// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ref-to-path mapping for archive segments.
//!
//! A ref becomes a directory tree plus a weekly file:
//!
//! 1. The ref is percent-encoded to a filesystem-safe form.
//! 2. The encoded ref splits on `.` into path segments, except that a
//!    leading `<name>.<digits>` compound (a plugin instance id) stays one
//!    segment.
//! 3. Every segment is byte-bounded: over-long segments are replaced by a
//!    truncated prefix plus `~` plus a short stable hash so the mapping
//!    stays deterministic and below filesystem name limits.
//! 4. The last segment carries the week key and extension:
//!    `<segment>.<YYYYMMDD>.<ext>` where `YYYYMMDD` is the Monday starting
//!    the event's local week.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate};
use sha2::{Digest, Sha256};

/// Characters that survive ref encoding unchanged. `%` is passed through
/// because refs arrive URL-encoded already; re-encoding would fork the
/// path mapping between encoded and raw spellings of the same ref.
fn is_safe_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~' | b'%')
}

/// Percent-encode a ref into a filesystem-safe form.
#[must_use]
pub fn encode_ref(ref_key: &str) -> String {
    let mut out = String::with_capacity(ref_key.len());
    for byte in ref_key.bytes() {
        if is_safe_byte(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Split an encoded ref into path segments.
///
/// Splits on `.`, keeping a leading `<name>.<digits>` compound (the plugin
/// instance id) as a single segment. Empty segments are dropped.
#[must_use]
pub fn split_segments(encoded: &str) -> Vec<String> {
    let mut parts: Vec<&str> = encoded.split('.').filter(|p| !p.is_empty()).collect();
    if parts.len() >= 2 && !parts[1].is_empty() && parts[1].bytes().all(|b| b.is_ascii_digit()) {
        let compound = format!("{}.{}", parts[0], parts[1]);
        parts.drain(..2);
        let mut out = vec![compound];
        out.extend(parts.iter().map(|p| (*p).to_string()));
        return out;
    }
    parts.iter().map(|p| (*p).to_string()).collect()
}

/// Bound one path segment to `max_len` bytes.
///
/// Over-long segments become `<truncatedPrefix>~<hash8>` where the hash is
/// computed stably from the ref key, the segment index, and the segment
/// itself, so the same ref always maps to the same file.
#[must_use]
pub fn bound_segment(ref_key: &str, index: usize, segment: &str, max_len: usize) -> String {
    if segment.len() <= max_len {
        return segment.to_string();
    }
    let digest = Sha256::digest(format!("{ref_key}|{index}|{segment}").as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    let budget = max_len.saturating_sub(hash.len() + 1).max(1);
    let mut cut = budget.min(segment.len());
    while cut > 0 && !segment.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}~{hash}", &segment[..cut])
}

/// `YYYYMMDD` of the Monday starting the week of `ts` (local wall clock).
#[must_use]
pub fn week_key(ts: DateTime<FixedOffset>) -> String {
    let date = ts.date_naive();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    monday.format("%Y%m%d").to_string()
}

/// Parse a week key back into its Monday date.
#[must_use]
pub fn parse_week_key(key: &str) -> Option<NaiveDate> {
    if key.len() != 8 || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(key, "%Y%m%d").ok()
}

/// The directory segments and weekly file name for a ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPath {
    /// Directory segments (possibly empty).
    pub dirs: Vec<String>,
    /// Final file name, `<segment>.<week>.<ext>`.
    pub file_name: String,
}

impl SegmentPath {
    /// Slash-joined relative path of the weekly file.
    #[must_use]
    pub fn file_path(&self) -> String {
        if self.dirs.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.dirs.join("/"), self.file_name)
        }
    }

    /// Slash-joined relative path of the containing directory.
    #[must_use]
    pub fn dir_path(&self) -> String {
        self.dirs.join("/")
    }
}

/// Map a ref and week key to its archive segment path.
#[must_use]
pub fn segment_path(ref_key: &str, week: &str, max_segment_len: usize, ext: &str) -> SegmentPath {
    let encoded = encode_ref(ref_key);
    let raw_segments = split_segments(&encoded);
    let mut bounded: Vec<String> = raw_segments
        .iter()
        .enumerate()
        .map(|(index, segment)| bound_segment(ref_key, index, segment, max_segment_len))
        .collect();
    let last = bounded.pop().unwrap_or_else(|| {
        // A ref that encoded to nothing but dots still needs a stable name.
        bound_segment(ref_key, 0, &encoded, max_segment_len)
    });
    SegmentPath {
        dirs: bounded,
        file_name: format!("{last}.{week}.{ext}"),
    }
}

/// The `(stem, week)` of a weekly file name, or `None` when the name does
/// not follow the `<stem>.<YYYYMMDD>.<ext>` layout for the given extension.
#[must_use]
pub fn parse_segment_file_name<'a>(name: &'a str, ext: &str) -> Option<(&'a str, &'a str)> {
    let rest = name.strip_suffix(ext)?.strip_suffix('.')?;
    let (stem, week) = rest.rsplit_once('.')?;
    parse_week_key(week)?;
    Some((stem, week))
}
