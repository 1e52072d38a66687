// File: src/hydration.rs
// Purpose: Server-to-client hand-off of preloaded query data and page context
//
// The server embeds two JSON scripts in the document head. The client reads
// them back, installs the data into its query cache as hydrated entries and
// starts from the same page context without refetching.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strata_query::QueryCache;

use crate::error::HydrationError;
use crate::page::Meta;

pub const DATA_SCRIPT_ID: &str = "strata-data";
pub const CONTEXT_SCRIPT_ID: &str = "strata-context";

static SCRIPT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<script id="([a-z-]+)" type="application/json">(.*?)</script>"#).unwrap()
});

/// Page context the client starts from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HydrationContext {
    pub url: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub not_found: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydrationPayload {
    /// Query key to value
    pub data: BTreeMap<String, Value>,
    pub context: HydrationContext,
}

impl HydrationPayload {
    /// Both `<script>` elements, safe to embed in HTML.
    pub fn to_scripts(&self) -> Result<String, serde_json::Error> {
        let data = escape_json(&serde_json::to_string(&self.data)?);
        let context = escape_json(&serde_json::to_string(&self.context)?);
        Ok(format!(
            r#"<script id="{DATA_SCRIPT_ID}" type="application/json">{data}</script><script id="{CONTEXT_SCRIPT_ID}" type="application/json">{context}</script>"#
        ))
    }

    pub fn parse(data: &str, context: &str) -> Result<Self, HydrationError> {
        Ok(Self {
            data: serde_json::from_str(data)?,
            context: serde_json::from_str(context)?,
        })
    }

    /// Read the payload back out of a rendered document.
    pub fn from_document(html: &str) -> Result<Self, HydrationError> {
        let mut data = None;
        let mut context = None;
        for caps in SCRIPT_REGEX.captures_iter(html) {
            match &caps[1] {
                DATA_SCRIPT_ID if data.is_none() => data = caps.get(2).map(|m| m.as_str()),
                CONTEXT_SCRIPT_ID if context.is_none() => context = caps.get(2).map(|m| m.as_str()),
                _ => {}
            }
        }

        Self::parse(
            data.ok_or(HydrationError::Missing(DATA_SCRIPT_ID))?,
            context.ok_or(HydrationError::Missing(CONTEXT_SCRIPT_ID))?,
        )
    }

    /// Install the data as hydrated cache entries and hand back the context.
    pub fn install(self, cache: &QueryCache<Value>) -> HydrationContext {
        cache.hydrate(self.data);
        self.context
    }
}

/// Escape characters that could end the script element or break JS parsing.
fn escape_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}
