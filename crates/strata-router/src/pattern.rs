//! Route pattern compilation
//!
//! A route pattern is the path-like string derived from a page or endpoint
//! file location, e.g. `/blog/[slug]` or `/files/[...path]`. Compilation
//! validates the segment grammar and produces an anchored regular expression
//! with one named capture group per placeholder.
//!
//! # Segment grammar
//!
//! - plain literal: `about`
//! - dynamic: literal text and `[name]` placeholders, where literal text
//!   touching a placeholder must end (before) or start (after) with `.` or `-`
//!   (`[year]-[month]`, `post-[id].json`)
//! - rest: `[...name]`, only as the whole final segment
//!
//! Segments named `index`, segments starting with `_`, and empty segments
//! do not contribute to the URL.

use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use crate::error::{PatternError, PatternErrorReason};

/// Decoded placeholder values of a successful match, keyed by name.
pub type Params = HashMap<String, String>;

/// One piece of a dynamic segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(String),
    Param(String),
}

/// Classification of a URL-contributing segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// `about`
    Literal(String),
    /// `[slug]`, `[year]-[month]`, `post-[id].json`
    Dynamic(Vec<Piece>),
    /// `[...path]`
    Rest(String),
}

/// A segment that contributes to the URL, with its raw text kept for ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    content: String,
    kind: SegmentKind,
}

impl Segment {
    /// Raw segment text as written in the pattern.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    /// Number of `[` in the raw segment text.
    pub fn placeholder_count(&self) -> usize {
        self.content.matches('[').count()
    }

    pub fn is_rest(&self) -> bool {
        matches!(self.kind, SegmentKind::Rest(_))
    }

    /// Segment text with placeholder names erased, used to detect routes
    /// that can never be told apart.
    pub fn shape(&self) -> Cow<'_, str> {
        match &self.kind {
            SegmentKind::Literal(text) => Cow::Borrowed(text),
            SegmentKind::Rest(_) => Cow::Borrowed("[...]"),
            SegmentKind::Dynamic(pieces) => Cow::Owned(
                pieces
                    .iter()
                    .map(|piece| match piece {
                        Piece::Literal(text) => text.as_str(),
                        Piece::Param(_) => "[]",
                    })
                    .collect(),
            ),
        }
    }
}

/// A validated route pattern with its matching expression.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
    segments: Vec<Segment>,
    param_names: Vec<String>,
    rest_param: Option<String>,
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.regex.as_str() == other.regex.as_str()
    }
}

impl Eq for CompiledPattern {}

impl CompiledPattern {
    /// The pattern this was compiled from, as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// URL-contributing segments in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Every placeholder name, rest parameter included, in pattern order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn rest_param(&self) -> Option<&str> {
        self.rest_param.as_deref()
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match `path` and return the decoded placeholder values.
    ///
    /// Matching happens against the still-encoded path so an encoded `%2F`
    /// stays inside a single placeholder; captures are percent-decoded after.
    pub fn captures(&self, path: &str) -> Option<Params> {
        let caps = self.regex.captures(path)?;
        let params = self
            .param_names
            .iter()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.clone(), decode_component(m.as_str())))
            })
            .collect();
        Some(params)
    }
}

/// Percent-decode a captured component. Invalid UTF-8 leaves the raw text.
pub fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}

/// Compile a route pattern with case-sensitive matching.
///
/// ```
/// use strata_router::compile;
///
/// let pattern = compile("/foo/[bar]-[baz]").unwrap();
/// let params = pattern.captures("/foo/123-456").unwrap();
/// assert_eq!(params["bar"], "123");
/// assert_eq!(params["baz"], "456");
/// assert!(!pattern.is_match("/foo/123"));
/// ```
pub fn compile(pattern: &str) -> Result<CompiledPattern, PatternError> {
    compile_with(pattern, false)
}

/// Compile a route pattern, optionally matching case-insensitively.
pub fn compile_with(pattern: &str, case_insensitive: bool) -> Result<CompiledPattern, PatternError> {
    let normalized = pattern.replace('\\', "/");
    if !normalized.starts_with('/') {
        return Err(PatternError::new(
            pattern,
            "",
            PatternErrorReason::MissingLeadingSlash,
        ));
    }

    let raw: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());

    for (i, &content) in raw.iter().enumerate() {
        if is_elided(content) {
            continue;
        }
        let kind = classify_segment(pattern, content)?;
        if matches!(kind, SegmentKind::Rest(_)) && i + 1 != raw.len() {
            return Err(PatternError::new(
                pattern,
                content,
                PatternErrorReason::MisplacedRest,
            ));
        }
        segments.push(Segment {
            content: content.to_string(),
            kind,
        });
    }

    let mut param_names = Vec::new();
    let mut seen = HashSet::new();
    let mut rest_param = None;
    for segment in &segments {
        let names: Vec<&String> = match &segment.kind {
            SegmentKind::Literal(_) => Vec::new(),
            SegmentKind::Dynamic(pieces) => pieces
                .iter()
                .filter_map(|p| match p {
                    Piece::Param(name) => Some(name),
                    Piece::Literal(_) => None,
                })
                .collect(),
            SegmentKind::Rest(name) => {
                rest_param = Some(name.clone());
                vec![name]
            }
        };
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(PatternError::new(
                    pattern,
                    &segment.content,
                    PatternErrorReason::DuplicateName(name.clone()),
                ));
            }
            param_names.push(name.clone());
        }
    }

    let source = regex_source(&segments);
    let regex = RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| PatternError::new(pattern, "", PatternErrorReason::Regex(e.to_string())))?;

    Ok(CompiledPattern {
        source: pattern.to_string(),
        regex,
        segments,
        param_names,
        rest_param,
    })
}

/// Compile `pattern` and return only its matching expression.
pub fn route_to_regex(pattern: &str) -> Result<Regex, PatternError> {
    compile(pattern).map(|compiled| compiled.regex)
}

/// Build the anchored regex source for a list of segments.
///
/// Placeholders capture one or more non-`/` characters; a rest placeholder
/// captures everything after its leading `/`. Without a rest placeholder a
/// single trailing `/` is tolerated.
pub fn regex_source(segments: &[Segment]) -> String {
    let mut source = String::from("^");

    for segment in segments {
        match &segment.kind {
            SegmentKind::Literal(text) => {
                source.push('/');
                source.push_str(&regex::escape(text));
            }
            SegmentKind::Dynamic(pieces) => {
                source.push('/');
                for piece in pieces {
                    match piece {
                        Piece::Literal(text) => source.push_str(&regex::escape(text)),
                        Piece::Param(name) => {
                            source.push_str("(?P<");
                            source.push_str(name);
                            source.push_str(">[^/]+)");
                        }
                    }
                }
            }
            SegmentKind::Rest(name) => {
                source.push_str("/(?P<");
                source.push_str(name);
                source.push_str(">.*)$");
                return source;
            }
        }
    }

    source.push_str("/?$");
    source
}

/// Segments that never reach the URL.
pub fn is_elided(segment: &str) -> bool {
    segment.is_empty() || segment == "index" || segment.starts_with('_')
}

/// Classify a single non-elided segment.
pub fn classify_segment(pattern: &str, segment: &str) -> Result<SegmentKind, PatternError> {
    let fail = |reason| PatternError::new(pattern, segment, reason);

    if let Some(inner) = segment.strip_prefix("[...") {
        let name = inner
            .strip_suffix(']')
            .ok_or_else(|| fail(PatternErrorReason::UnbalancedBrackets))?;
        if !is_identifier(name) {
            return Err(fail(PatternErrorReason::InvalidName(name.to_string())));
        }
        return Ok(SegmentKind::Rest(name.to_string()));
    }

    if !segment.contains(['[', ']']) {
        return Ok(SegmentKind::Literal(segment.to_string()));
    }

    let mut pieces = Vec::new();
    let mut rest = segment;
    while !rest.is_empty() {
        let Some(open) = rest.find(['[', ']']) else {
            pieces.push(Piece::Literal(rest.to_string()));
            break;
        };
        if rest[open..].starts_with(']') {
            return Err(fail(PatternErrorReason::UnbalancedBrackets));
        }
        if open > 0 {
            pieces.push(Piece::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 1..];
        let close = after
            .find(']')
            .ok_or_else(|| fail(PatternErrorReason::UnbalancedBrackets))?;
        let name = &after[..close];
        if name.starts_with("...") {
            return Err(fail(PatternErrorReason::MisplacedRest));
        }
        if !is_identifier(name) {
            return Err(fail(PatternErrorReason::InvalidName(name.to_string())));
        }
        if matches!(pieces.last(), Some(Piece::Param(_))) {
            return Err(fail(PatternErrorReason::AdjacentPlaceholders));
        }
        pieces.push(Piece::Param(name.to_string()));
        rest = &after[close + 1..];
    }

    let last = pieces.len() - 1;
    for (i, piece) in pieces.iter().enumerate() {
        let Piece::Literal(text) = piece else { continue };
        let follows_param = i > 0;
        let precedes_param = i < last;
        if follows_param && !text.starts_with(['.', '-']) {
            return Err(fail(PatternErrorReason::MissingSeparator));
        }
        if precedes_param && !text.ends_with(['.', '-']) {
            return Err(fail(PatternErrorReason::MissingSeparator));
        }
    }

    Ok(SegmentKind::Dynamic(pieces))
}

/// ASCII identifier: a letter or `_`, then letters, digits or `_`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
