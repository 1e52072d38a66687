// File: src/app.rs
// Purpose: Route registry built once from pages, layouts, not-found pages, endpoints and middleware

use std::fmt;
use std::sync::Arc;
use strata_router::path::{normalize_path, PathHierarchy};
use strata_router::{
    collect_enclosing, collect_middleware, compile, Params, RouteMatch, RouteTable,
    RouteTableBuilder,
};
use tracing::{debug, info};

use crate::document;
use crate::endpoint::{EndpointModule, Middleware};
use crate::error::RegistryError;
use crate::page::ViewModule;
use crate::template::Template;

/// A page with its layout chain resolved, outermost layout first.
#[derive(Debug, Clone)]
pub struct PageRoute {
    pub pattern: String,
    pub page: ViewModule,
    /// `(directory, layout)` pairs enclosing the page
    pub layouts: Vec<(String, ViewModule)>,
}

impl PageRoute {
    /// Layouts then the page, each labelled with its directory or pattern.
    pub fn stack(&self) -> impl Iterator<Item = (&str, &ViewModule)> {
        self.layouts
            .iter()
            .map(|(dir, layout)| (dir.as_str(), layout))
            .chain(std::iter::once((self.pattern.as_str(), &self.page)))
    }
}

/// An endpoint with its middleware chain resolved, outermost first.
#[derive(Clone)]
pub struct EndpointRoute {
    pub pattern: String,
    pub module: EndpointModule,
    pub middleware: Arc<[Middleware]>,
}

impl fmt::Debug for EndpointRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRoute")
            .field("pattern", &self.pattern)
            .field("module", &self.module)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Page resolved for a request path.
#[derive(Debug)]
pub struct PageMatch<'a> {
    pub route: &'a PageRoute,
    pub params: Params,
    /// Rendered as the not-found fallback
    pub not_found: bool,
}

// ============================================================================
// App
// ============================================================================

/// Immutable route registry. Rebuild it to change routes.
#[derive(Debug)]
pub struct App {
    pages: RouteTable<PageRoute>,
    not_found: RouteTable<PageRoute>,
    endpoints: RouteTable<EndpointRoute>,
    default_not_found: PageRoute,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn pages(&self) -> &RouteTable<PageRoute> {
        &self.pages
    }

    pub fn endpoints(&self) -> &RouteTable<EndpointRoute> {
        &self.endpoints
    }

    pub fn find_endpoint(&self, path: &str) -> Option<RouteMatch<'_, EndpointRoute>> {
        self.endpoints.find(path)
    }

    pub fn find_page(&self, path: &str) -> Option<RouteMatch<'_, PageRoute>> {
        self.pages.find(path)
    }

    /// Matching page, else the nearest not-found page walking up from the
    /// requested path, else the built-in not-found page.
    pub fn resolve_page(&self, path: &str) -> PageMatch<'_> {
        if let Some(found) = self.pages.find(path) {
            return PageMatch {
                route: found.route.extra(),
                params: found.params,
                not_found: false,
            };
        }

        let normalized = normalize_path(path);
        if let Some(fallback) =
            PathHierarchy::new(&normalized).find_map(|dir| self.not_found.find(dir))
        {
            debug!("No page for {}, using not-found page {}", path, fallback.pattern());
            return PageMatch {
                route: fallback.route.extra(),
                params: fallback.params,
                not_found: true,
            };
        }

        debug!("No page for {}, using built-in not-found page", path);
        PageMatch {
            route: &self.default_not_found,
            params: Params::new(),
            not_found: true,
        }
    }
}

// ============================================================================
// AppBuilder
// ============================================================================

#[derive(Default)]
pub struct AppBuilder {
    pages: Vec<(String, ViewModule)>,
    layouts: Vec<(String, ViewModule)>,
    not_found: Vec<(String, ViewModule)>,
    endpoints: Vec<(String, EndpointModule)>,
    middleware: Vec<(String, Middleware)>,
    case_insensitive: bool,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, pattern: &str, module: ViewModule) -> Self {
        self.pages.push((pattern.to_string(), module));
        self
    }

    /// Layout wrapping every page and not-found page under `dir`.
    pub fn layout(mut self, dir: &str, module: ViewModule) -> Self {
        self.layouts.push((dir.to_string(), module));
        self
    }

    /// Not-found page for requests under `dir` that match no page.
    pub fn not_found(mut self, dir: &str, module: ViewModule) -> Self {
        self.not_found.push((dir.to_string(), module));
        self
    }

    pub fn endpoint(mut self, pattern: &str, module: EndpointModule) -> Self {
        self.endpoints.push((pattern.to_string(), module));
        self
    }

    /// Middleware wrapping every endpoint under `dir`.
    pub fn middleware(mut self, dir: &str, middleware: Middleware) -> Self {
        self.middleware.push((dir.to_string(), middleware));
        self
    }

    pub fn case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    pub fn build(self) -> Result<App, RegistryError> {
        validate_dirs("layout", &self.layouts)?;
        validate_dirs("middleware", &self.middleware)?;

        let with_layouts = |pattern: &str, page: &ViewModule| PageRoute {
            pattern: pattern.to_string(),
            page: page.clone(),
            layouts: resolve_layouts(pattern, &self.layouts),
        };

        let mut pages = RouteTableBuilder::new().with_case_insensitive(self.case_insensitive);
        for (pattern, page) in &self.pages {
            pages.add_route(pattern, with_layouts(pattern, page));
        }
        let pages = pages.build().map_err(RegistryError::Pages)?;

        let mut not_found = RouteTableBuilder::new().with_case_insensitive(self.case_insensitive);
        for (dir, page) in &self.not_found {
            not_found.add_route(dir, with_layouts(dir, page));
        }
        let not_found = not_found.build().map_err(RegistryError::NotFound)?;

        let mut endpoints = RouteTableBuilder::new().with_case_insensitive(self.case_insensitive);
        for (pattern, module) in &self.endpoints {
            let middleware: Vec<Middleware> = collect_middleware(pattern, &self.middleware)
                .into_iter()
                .cloned()
                .collect();
            endpoints.add_route(
                pattern,
                EndpointRoute {
                    pattern: pattern.clone(),
                    module: module.clone(),
                    middleware: middleware.into(),
                },
            );
        }
        let endpoints = endpoints.build().map_err(RegistryError::Endpoints)?;

        info!(
            "Built app: {} pages, {} not-found pages, {} endpoints, {} layouts, {} middleware",
            pages.len(),
            not_found.len(),
            endpoints.len(),
            self.layouts.len(),
            self.middleware.len()
        );

        Ok(App {
            pages,
            not_found,
            endpoints,
            default_not_found: PageRoute {
                pattern: "/".to_string(),
                page: ViewModule::new(|_| Ok(Template::from(document::not_found_page()))),
                layouts: Vec::new(),
            },
        })
    }
}

fn resolve_layouts(pattern: &str, layouts: &[(String, ViewModule)]) -> Vec<(String, ViewModule)> {
    let labelled: Vec<(String, (String, ViewModule))> = layouts
        .iter()
        .map(|(dir, layout)| (dir.clone(), (dir.clone(), layout.clone())))
        .collect();
    collect_enclosing(pattern, &labelled)
        .into_iter()
        .cloned()
        .collect()
}

fn validate_dirs<M>(kind: &'static str, entries: &[(String, M)]) -> Result<(), RegistryError> {
    for (dir, _) in entries {
        compile(dir).map_err(|source| RegistryError::Directory {
            kind,
            dir: dir.clone(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn view() -> ViewModule {
        ViewModule::new(|_| Ok(Template::new()))
    }

    fn layout_dirs(route: &PageRoute) -> Vec<&str> {
        route.layouts.iter().map(|(dir, _)| dir.as_str()).collect()
    }

    #[test]
    fn test_layouts_resolved_outermost_first() {
        let app = App::builder()
            .layout("/blog", view())
            .layout("/", view())
            .layout("/shop", view())
            .page("/blog/[slug]", view())
            .page("/", view())
            .build()
            .unwrap();

        let found = app.resolve_page("/blog/hello");
        assert!(!found.not_found);
        assert_eq!(layout_dirs(found.route), vec!["/", "/blog"]);
        assert_eq!(found.params.get("slug").map(String::as_str), Some("hello"));

        let stack: Vec<&str> = found.route.stack().map(|(label, _)| label).collect();
        assert_eq!(stack, vec!["/", "/blog", "/blog/[slug]"]);
    }

    #[test]
    fn test_nearest_not_found_wins() {
        let app = App::builder()
            .not_found("/", view())
            .not_found("/docs", view())
            .build()
            .unwrap();

        assert_eq!(app.resolve_page("/docs/a/b").route.pattern, "/docs");
        assert_eq!(app.resolve_page("/other").route.pattern, "/");
    }

    #[test]
    fn test_builtin_not_found() {
        let app = App::builder().build().unwrap();
        let found = app.resolve_page("/missing");
        assert!(found.not_found);
        assert!(found.route.layouts.is_empty());
    }

    #[test]
    fn test_bad_layout_dir_rejected() {
        let err = App::builder().layout("/[oops", view()).build().unwrap_err();
        assert!(matches!(err, RegistryError::Directory { kind: "layout", .. }));
    }

    #[test]
    fn test_ambiguous_pages_rejected() {
        let err = App::builder()
            .page("/[a]", view())
            .page("/[b]", view())
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::Pages(_)));
    }
}
