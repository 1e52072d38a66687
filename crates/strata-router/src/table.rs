//! Sorted route tables and first-match lookup

use std::collections::HashMap;
use tracing::debug;

use crate::error::RouteTableError;
use crate::pattern::{compile_with, CompiledPattern, Params};
use crate::sort::{shape_key, sort_routes};

/// A compiled pattern paired with whatever the caller attached to it.
#[derive(Debug, Clone)]
pub struct CompiledRoute<T> {
    pattern: CompiledPattern,
    extra: T,
}

impl<T> CompiledRoute<T> {
    pub fn new(pattern: CompiledPattern, extra: T) -> Self {
        Self { pattern, extra }
    }

    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    pub fn source(&self) -> &str {
        self.pattern.source()
    }

    pub fn extra(&self) -> &T {
        &self.extra
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a, T> {
    pub route: &'a CompiledRoute<T>,
    pub params: Params,
}

impl<'a, T> RouteMatch<'a, T> {
    pub fn extra(&self) -> &'a T {
        self.route.extra()
    }

    /// Source pattern of the matched route.
    pub fn pattern(&self) -> &'a str {
        self.route.source()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }
}

/// Routes sorted by specificity. Lookup returns the first match.
///
/// ```
/// use strata_router::RouteTable;
///
/// let table = RouteTable::build([("/blog/[slug]", 1), ("/blog/new", 2)]).unwrap();
/// let m = table.find("/blog/new").unwrap();
/// assert_eq!(*m.extra(), 2);
///
/// let m = table.find("/blog/hello").unwrap();
/// assert_eq!(m.param("slug"), Some("hello"));
/// ```
#[derive(Debug, Clone)]
pub struct RouteTable<T> {
    routes: Vec<CompiledRoute<T>>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<T> RouteTable<T> {
    pub fn builder() -> RouteTableBuilder<T> {
        RouteTableBuilder::new()
    }

    /// Compile, validate and sort `(pattern, extra)` pairs.
    pub fn build<I, S>(entries: I) -> Result<Self, RouteTableError>
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
    {
        entries
            .into_iter()
            .fold(RouteTableBuilder::new(), |b, (p, e)| b.with_route(p.as_ref(), e))
            .build()
    }

    /// First route, in specificity order, whose pattern matches `path`.
    pub fn find(&self, path: &str) -> Option<RouteMatch<'_, T>> {
        self.routes.iter().find_map(|route| {
            route
                .pattern
                .captures(path)
                .map(|params| RouteMatch { route, params })
        })
    }

    /// Route whose source pattern is exactly `pattern`.
    pub fn get(&self, pattern: &str) -> Option<&CompiledRoute<T>> {
        self.routes.iter().find(|r| r.source() == pattern)
    }

    pub fn routes(&self) -> &[CompiledRoute<T>] {
        &self.routes
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRoute<T>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Collects route entries before validation.
#[derive(Debug)]
pub struct RouteTableBuilder<T> {
    entries: Vec<(String, T)>,
    case_insensitive: bool,
}

impl<T> Default for RouteTableBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RouteTableBuilder<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            case_insensitive: false,
        }
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn with_route(mut self, pattern: &str, extra: T) -> Self {
        self.add_route(pattern, extra);
        self
    }

    pub fn add_route(&mut self, pattern: &str, extra: T) {
        self.entries.push((pattern.to_string(), extra));
    }

    pub fn build(self) -> Result<RouteTable<T>, RouteTableError> {
        let case_insensitive = self.case_insensitive;
        let mut routes = self
            .entries
            .into_iter()
            .map(|(pattern, extra)| {
                compile_with(&pattern, case_insensitive).map(|c| CompiledRoute::new(c, extra))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut shapes: HashMap<String, &str> = HashMap::new();
        for route in &routes {
            let mut key = shape_key(&route.pattern);
            if case_insensitive {
                key = key.to_lowercase();
            }
            if let Some(first) = shapes.insert(key, route.source()) {
                return Err(RouteTableError::Ambiguous {
                    first: first.to_string(),
                    second: route.source().to_string(),
                });
            }
        }

        sort_routes(&mut routes, |r| &r.pattern);
        debug!(count = routes.len(), "route table built");
        Ok(RouteTable { routes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_find_prefers_specific() {
        let table = RouteTable::build([
            ("/[...rest]", "rest"),
            ("/docs/[page]", "page"),
            ("/docs/intro", "intro"),
            ("/", "home"),
        ])
        .unwrap();

        assert_eq!(*table.find("/docs/intro").unwrap().extra(), "intro");
        assert_eq!(*table.find("/docs/other").unwrap().extra(), "page");
        assert_eq!(*table.find("/").unwrap().extra(), "home");
        assert_eq!(*table.find("/x/y").unwrap().extra(), "rest");
    }

    #[test]
    fn test_ambiguous_routes_rejected() {
        let err = RouteTable::build([("/[a]", ()), ("/[b]", ())]).unwrap_err();
        assert_eq!(
            err,
            RouteTableError::Ambiguous {
                first: "/[a]".to_string(),
                second: "/[b]".to_string(),
            }
        );
    }

    #[test]
    fn test_index_collides_with_parent() {
        let err = RouteTable::build([("/blog", ()), ("/blog/index", ())]).unwrap_err();
        assert!(matches!(err, RouteTableError::Ambiguous { .. }));
    }

    #[test]
    fn test_empty_table() {
        let table: RouteTable<()> = RouteTable::default();
        assert!(table.is_empty());
        assert!(table.find("/").is_none());
    }

    #[test]
    fn test_case_insensitive_builder() {
        let table = RouteTable::builder()
            .with_case_insensitive(true)
            .with_route("/About", 1)
            .build()
            .unwrap();
        assert!(table.find("/about").is_some());
    }
}
