/// Lazy iterator over a path and each of its ancestors, ending at `/`.
///
/// For `/a/b/c` it yields `/a/b/c`, `/a/b`, `/a`, `/`. A trailing slash on
/// the input is ignored. Nothing is allocated; every item borrows the input.
///
/// ```
/// use strata_router::path::PathHierarchy;
///
/// let paths: Vec<&str> = PathHierarchy::new("/a/b/c/").collect();
/// assert_eq!(paths, vec!["/a/b/c", "/a/b", "/a", "/"]);
/// ```
#[derive(Debug, Clone)]
pub struct PathHierarchy<'a> {
    current: Option<&'a str>,
}

impl<'a> PathHierarchy<'a> {
    pub fn new(path: &'a str) -> Self {
        let trimmed = path.trim_end_matches('/');
        Self {
            current: Some(if trimmed.is_empty() { "/" } else { trimmed }),
        }
    }
}

impl<'a> Iterator for PathHierarchy<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;

        self.current = match current.rfind('/') {
            _ if current == "/" => None,
            Some(0) => Some("/"),
            Some(i) => Some(&current[..i]),
            None => None,
        };

        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walks_to_root() {
        let paths: Vec<&str> = PathHierarchy::new("/users/123").collect();
        assert_eq!(paths, vec!["/users/123", "/users", "/"]);
    }

    #[test]
    fn test_root_only() {
        let paths: Vec<&str> = PathHierarchy::new("/").collect();
        assert_eq!(paths, vec!["/"]);
        let paths: Vec<&str> = PathHierarchy::new("").collect();
        assert_eq!(paths, vec!["/"]);
    }

    #[test]
    fn test_stops_early_with_find() {
        let mut iter = PathHierarchy::new("/a/b/c/d");
        assert_eq!(iter.find(|&p| p == "/a/b"), Some("/a/b"));
        assert_eq!(iter.next(), Some("/a"));
    }
}
