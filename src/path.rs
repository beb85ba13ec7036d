//! Absolute-path helpers. Paths are `/`-separated with no `.` or `..`
//! semantics; the root directory is `/`.

/// Splits a path at its last separator into `(parent, leaf)`. The parent of
/// a top-level name is `/`.
pub fn split(full: &str) -> (&str, &str) {
    match full.rfind('/') {
        Some(0) => ("/", &full[1..]),
        Some(index) => (&full[..index], &full[index + 1..]),
        None => ("/", full),
    }
}

/// Joins a parent path and a leaf name with exactly one separator.
pub fn join(parent: &str, leaf: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{leaf}")
    } else {
        format!("{parent}/{leaf}")
    }
}

/// Non-empty components of a path, in walk order.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}
