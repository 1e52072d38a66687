//! # Strata Router
//!
//! File-system route patterns for the strata framework:
//!
//! - Literal segments (`/about`)
//! - Dynamic placeholders, several per segment (`/blog/[slug]`, `/[year]-[month]`)
//! - Rest placeholders (`/docs/[...path]`)
//! - Ignored segments (`index`, `_group`)
//!
//! Patterns compile to anchored regular expressions. A [`RouteTable`] keeps
//! routes sorted by specificity so the first match is always the most
//! specific one, independent of registration order.
//!
//! ## Example
//!
//! ```
//! use strata_router::RouteTable;
//!
//! let table = RouteTable::build([
//!     ("/", "home"),
//!     ("/users/[id]", "user"),
//!     ("/[...rest]", "catch-all"),
//! ])
//! .unwrap();
//!
//! let m = table.find("/users/123").unwrap();
//! assert_eq!(*m.extra(), "user");
//! assert_eq!(m.param("id"), Some("123"));
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

mod error;
pub mod nesting;
pub mod path;
pub mod pattern;
pub mod sort;
mod table;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{PatternError, PatternErrorReason, RouteTableError};
pub use nesting::{collect_enclosing, collect_middleware};
pub use pattern::{
    compile, compile_with, decode_component, route_to_regex, CompiledPattern, Params, Piece, Segment,
    SegmentKind,
};
pub use sort::{compare_routes, shape_key, sort_patterns, sort_routes};
pub use table::{CompiledRoute, RouteMatch, RouteTable, RouteTableBuilder};
