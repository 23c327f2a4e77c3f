//! Helpers for sanitizing values before they reach span attributes or
//! filesystem paths.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the
/// storage root.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns true if `segment` can be used as a single directory name under
/// the storage root without escaping it.
pub fn is_safe_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
        && !segment.starts_with('.')
}

/// Returns the final component of a client-supplied filename, dropping any
/// directory prefix a browser or archive tool may have included.
pub fn base_filename(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim()
}
