//! Namespace path normalization

/// Normalize a namespace path
///
/// Enforces a leading slash and strips trailing slashes except for the
/// root. An empty path is the root.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
