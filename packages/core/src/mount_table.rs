//! Host mount table inspection.
//!
//! The mount table is the ground truth for whether a mountpoint is live.
//! The registry consults it before every decision to launch or detach the
//! helper instead of trusting its own reference counts.

use std::fs;
use std::path::Path;

use crate::error::{IoResultExt, Result};

/// A single line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fs_type: String,
}

/// Parses `/proc/mounts` text.
///
/// Format per line: `<source> <target> <fstype> <options> <dump> <pass>`.
/// Malformed lines are skipped.
pub fn parse_mount_table(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let target = parts.next()?;
            let fs_type = parts.next()?;
            Some(MountEntry {
                source: unescape_mount_path(source),
                target: unescape_mount_path(target),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Returns true if `path` is mounted with filesystem type `fs_type`.
pub fn is_mounted_in(text: &str, path: &Path, fs_type: &str) -> bool {
    let Some(target) = path.to_str() else {
        return false;
    };
    let target = target.trim_end_matches('/');

    parse_mount_table(text)
        .iter()
        .any(|entry| entry.fs_type == fs_type && entry.target == target)
}

/// Reads the mount table at `table` once and checks `path` against it.
///
/// Lines of unrelated mounts may carry labels in any encoding, so the table
/// is decoded lossily instead of rejected.
pub fn probe(table: &Path, path: &Path, fs_type: &str) -> Result<bool> {
    let bytes = fs::read(table).mount_table_context(table)?;
    let text = String::from_utf8_lossy(&bytes);
    let mounted = is_mounted_in(&text, path, fs_type);
    tracing::debug!("probe {}: mounted={}", path.display(), mounted);
    Ok(mounted)
}

/// Unescapes the octal sequences the kernel uses for spaces, tabs,
/// newlines and backslashes.
fn unescape_mount_path(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let digits: String = chars.clone().take(3).collect();
            if digits.len() == 3
                && digits.chars().all(|d| ('0'..='7').contains(&d))
                && let Ok(byte) = u8::from_str_radix(&digits, 8)
            {
                result.push(byte as char);
                for _ in 0..3 {
                    chars.next();
                }
                continue;
            }
        }
        result.push(c);
    }
    result
}
