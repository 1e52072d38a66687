//! Resolution of directory-scoped wrappers (middleware, layouts)
//!
//! A wrapper registered for directory `/admin` applies to every route whose
//! pattern sits at or below `/admin`. Wrappers are returned outermost first,
//! i.e. ordered by directory depth, ties keeping registration order.

use crate::path::{depth, directory_contains};

/// Every wrapper whose directory encloses `pattern`, outermost first.
///
/// ```
/// use strata_router::collect_enclosing;
///
/// let middleware = vec![
///     ("/admin/users".to_string(), "users"),
///     ("/".to_string(), "root"),
///     ("/admin".to_string(), "admin"),
///     ("/blog".to_string(), "blog"),
/// ];
/// let chain = collect_enclosing("/admin/users/[id]", &middleware);
/// assert_eq!(chain, vec![&"root", &"admin", &"users"]);
/// ```
pub fn collect_enclosing<'a, M>(pattern: &str, wrappers: &'a [(String, M)]) -> Vec<&'a M> {
    let mut found: Vec<(usize, &'a M)> = wrappers
        .iter()
        .filter(|(dir, _)| directory_contains(dir, pattern))
        .map(|(dir, m)| (depth(dir), m))
        .collect();
    found.sort_by_key(|(d, _)| *d);
    found.into_iter().map(|(_, m)| m).collect()
}

/// Middleware chain for an endpoint or page pattern, outermost first.
pub fn collect_middleware<'a, M>(pattern: &str, middleware: &'a [(String, M)]) -> Vec<&'a M> {
    collect_enclosing(pattern, middleware)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_no_partial_segment_match() {
        let wrappers = vec![("/api".to_string(), 1), ("/ap".to_string(), 2)];
        assert_eq!(collect_enclosing("/api/items", &wrappers), vec![&1]);
    }

    #[test]
    fn test_same_depth_keeps_registration_order() {
        let wrappers = vec![("/".to_string(), "a"), ("/".to_string(), "b")];
        assert_eq!(collect_middleware("/x", &wrappers), vec![&"a", &"b"]);
    }

    #[test]
    fn test_pattern_equal_to_directory() {
        let wrappers = vec![("/shop/[id]".to_string(), ())];
        assert_eq!(collect_enclosing("/shop/[id]", &wrappers).len(), 1);
        assert!(collect_enclosing("/shop", &wrappers).is_empty());
    }
}
