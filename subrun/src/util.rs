//! Small parsing and path helpers shared by configuration and stages.

use std::path::{Path, PathBuf};

/// Split a whitespace-separated command line into tokens.
///
/// Returns `None` when the value has no tokens at all so callers can tell an
/// explicitly emptied variable apart from a configured command.
pub fn split_command(raw: &str) -> Option<Vec<String>> {
    let tokens: Vec<String> =
        raw.split_whitespace().map(str::to_string).collect();
    if tokens.is_empty() { None } else { Some(tokens) }
}

/// Parse a boolean value from a raw string, accepting common env-style forms.
///
/// Accepted truthy values (case-insensitive): `"1"`, `"true"`, `"yes"`, `"on"`.
/// Accepted falsy values: `"0"`, `"false"`, `"no"`, `"off"`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `true` when `name` is a single plain file name (no separators, no `..`).
pub fn is_plain_file_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.contains('/')
        && !trimmed.contains('\\')
}

/// Parent directory of `path`, treating a bare file name as living in `.`.
pub fn parent_or_cwd(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
