//! Specificity ordering for compiled routes
//!
//! Routes are tried in order, so more specific routes must come first:
//!
//! 1. routes without a rest placeholder precede routes with one
//! 2. segment by segment, fewer placeholders win, then raw text byte order
//! 3. when every shared segment ties, the shorter route wins

use std::cmp::Ordering;

use crate::error::PatternError;
use crate::pattern::{compile, CompiledPattern};

/// Total order over compiled patterns. `Less` means `a` is tried first.
pub fn compare_routes(a: &CompiledPattern, b: &CompiledPattern) -> Ordering {
    match (a.rest_param().is_some(), b.rest_param().is_some()) {
        (false, true) => return Ordering::Less,
        (true, false) => return Ordering::Greater,
        _ => {}
    }

    for (x, y) in a.segments().iter().zip(b.segments()) {
        let ord = x
            .placeholder_count()
            .cmp(&y.placeholder_count())
            .then_with(|| x.content().cmp(y.content()));
        if ord != Ordering::Equal {
            return ord;
        }
    }

    a.segments().len().cmp(&b.segments().len())
}

/// Stable sort by specificity.
pub fn sort_routes<T, F>(routes: &mut [T], pattern_of: F)
where
    F: Fn(&T) -> &CompiledPattern,
{
    routes.sort_by(|a, b| compare_routes(pattern_of(a), pattern_of(b)));
}

/// Sort raw pattern strings by specificity.
///
/// ```
/// use strata_router::sort_patterns;
///
/// let sorted = sort_patterns(&["/[slug]", "/[...rest]", "/about"]).unwrap();
/// assert_eq!(sorted, vec!["/about", "/[slug]", "/[...rest]"]);
/// ```
pub fn sort_patterns<'a>(patterns: &[&'a str]) -> Result<Vec<&'a str>, PatternError> {
    let mut compiled = patterns
        .iter()
        .map(|&p| compile(p).map(|c| (p, c)))
        .collect::<Result<Vec<_>, _>>()?;
    sort_routes(&mut compiled, |(_, c)| c);
    Ok(compiled.into_iter().map(|(p, _)| p).collect())
}

/// Pattern identity with placeholder names erased.
///
/// Two routes with the same shape accept exactly the same paths.
pub fn shape_key(pattern: &CompiledPattern) -> String {
    let mut key = String::new();
    for segment in pattern.segments() {
        key.push('/');
        key.push_str(&segment.shape());
    }
    if key.is_empty() {
        key.push('/');
    }
    key
}
