//! Path helpers shared by route resolution and not-found fallback
//!
//! All functions are pure and operate on borrowed input where possible.

use std::borrow::Cow;

pub mod hierarchy;
pub use hierarchy::PathHierarchy;

/// Canonical form: leading `/`, no `//` or `\`, no trailing `/` except root.
///
/// ```
/// use strata_router::path::is_canonical;
///
/// assert!(is_canonical("/"));
/// assert!(is_canonical("/users/123"));
/// assert!(!is_canonical("/about/"));
/// assert!(!is_canonical("about"));
/// ```
pub fn is_canonical(path: &str) -> bool {
    if !path.starts_with('/') || path.contains("//") || path.contains('\\') {
        return false;
    }
    path == "/" || !path.ends_with('/')
}

/// Normalize to canonical form, borrowing when nothing changes.
///
/// ```
/// use strata_router::path::normalize_path;
///
/// assert_eq!(normalize_path("/a/b/c/"), "/a/b/c");
/// assert_eq!(normalize_path("\\docs\\\\intro"), "/docs/intro");
/// assert_eq!(normalize_path(""), "/");
/// ```
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if is_canonical(path) {
        return Cow::Borrowed(path);
    }

    let joined = path
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if joined.is_empty() {
        Cow::Borrowed("/")
    } else {
        Cow::Owned(format!("/{joined}"))
    }
}

/// Raw, non-empty segments of a pattern or path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty())
}

/// Whether `pattern` lives at or below directory `dir`, comparing raw
/// pattern segments. The root directory contains everything.
///
/// ```
/// use strata_router::path::directory_contains;
///
/// assert!(directory_contains("/", "/anything/[id]"));
/// assert!(directory_contains("/admin", "/admin/users"));
/// assert!(directory_contains("/admin", "/admin"));
/// assert!(!directory_contains("/admin", "/administrator"));
/// ```
pub fn directory_contains(dir: &str, pattern: &str) -> bool {
    let mut inner = segments(pattern);
    segments(dir).all(|seg| inner.next() == Some(seg))
}

/// Number of raw segments, used to order enclosing directories.
pub fn depth(path: &str) -> usize {
    segments(path).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_borrows_canonical() {
        assert!(matches!(normalize_path("/about"), Cow::Borrowed("/about")));
        assert!(matches!(normalize_path("/"), Cow::Borrowed("/")));
    }

    #[test]
    fn test_normalize_cleans_up() {
        assert_eq!(normalize_path("/about//page/"), "/about/page");
        assert_eq!(normalize_path("///"), "/");
    }

    #[test]
    fn test_directory_contains_segment_boundaries() {
        assert!(directory_contains("/blog/[slug]", "/blog/[slug]/edit"));
        assert!(!directory_contains("/blog/[slug]", "/blog/[id]/edit"));
        assert!(!directory_contains("/a/b", "/a"));
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/a/[b]"), 2);
    }
}
