// File: src/navigation/host.rs
// Purpose: Environment a navigation controller drives: history, scrolling, session storage
//
// [`MemoryHost`] keeps everything in memory and is what tests and
// non-browser embedders use.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
}

impl ScrollPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// State attached to one history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryState {
    pub id: String,
    pub index: u64,
    #[serde(default)]
    pub data: Option<Value>,
}

pub trait NavigationHost: Send + Sync {
    fn location(&self) -> Url;

    fn history_state(&self) -> Option<HistoryState>;

    fn push_state(&self, state: HistoryState, url: &Url);

    fn replace_state(&self, state: HistoryState, url: &Url);

    fn scroll_position(&self) -> ScrollPosition;

    fn scroll_to(&self, position: ScrollPosition);

    /// Scroll the element with id `anchor` into view. False when there is none.
    fn scroll_to_anchor(&self, anchor: &str) -> bool;

    fn session_get(&self, key: &str) -> Option<String>;

    fn session_set(&self, key: &str, value: String);

    /// Leave the application with a full page load.
    fn assign(&self, url: &Url);
}

// ============================================================================
// MemoryHost
// ============================================================================

#[derive(Debug)]
struct Entry {
    url: Url,
    state: Option<HistoryState>,
}

#[derive(Debug)]
struct MemoryState {
    entries: Vec<Entry>,
    cursor: usize,
    scroll: ScrollPosition,
    anchors: HashSet<String>,
    session: HashMap<String, String>,
    assigned: Vec<Url>,
}

/// In-memory history stack with scroll and session storage.
#[derive(Debug)]
pub struct MemoryHost {
    state: Mutex<MemoryState>,
}

impl MemoryHost {
    pub fn new(url: Url) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: vec![Entry { url, state: None }],
                cursor: 0,
                scroll: ScrollPosition::default(),
                anchors: HashSet::new(),
                session: HashMap::new(),
                assigned: Vec::new(),
            }),
        }
    }

    pub fn at(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move back one entry, as the back button does. Returns the entry's state.
    pub fn back(&self) -> Option<Option<HistoryState>> {
        let mut state = self.lock();
        state.cursor = state.cursor.checked_sub(1)?;
        Some(state.entries[state.cursor].state.clone())
    }

    pub fn forward(&self) -> Option<Option<HistoryState>> {
        let mut state = self.lock();
        if state.cursor + 1 >= state.entries.len() {
            return None;
        }
        state.cursor += 1;
        Some(state.entries[state.cursor].state.clone())
    }

    pub fn add_anchor(&self, id: &str) {
        self.lock().anchors.insert(id.to_string());
    }

    pub fn set_scroll(&self, position: ScrollPosition) {
        self.lock().scroll = position;
    }

    pub fn history_len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Urls handed to [`NavigationHost::assign`].
    pub fn assigned(&self) -> Vec<Url> {
        self.lock().assigned.clone()
    }
}

impl NavigationHost for MemoryHost {
    fn location(&self) -> Url {
        let state = self.lock();
        state.entries[state.cursor].url.clone()
    }

    fn history_state(&self) -> Option<HistoryState> {
        let state = self.lock();
        state.entries[state.cursor].state.clone()
    }

    fn push_state(&self, history: HistoryState, url: &Url) {
        let mut state = self.lock();
        let keep = state.cursor + 1;
        state.entries.truncate(keep);
        state.entries.push(Entry {
            url: url.clone(),
            state: Some(history),
        });
        state.cursor = keep;
    }

    fn replace_state(&self, history: HistoryState, url: &Url) {
        let mut state = self.lock();
        let cursor = state.cursor;
        state.entries[cursor] = Entry {
            url: url.clone(),
            state: Some(history),
        };
    }

    fn scroll_position(&self) -> ScrollPosition {
        self.lock().scroll
    }

    fn scroll_to(&self, position: ScrollPosition) {
        self.lock().scroll = position;
    }

    fn scroll_to_anchor(&self, anchor: &str) -> bool {
        let mut state = self.lock();
        if !state.anchors.contains(anchor) {
            return false;
        }
        // Every anchor lands at the same fixed offset.
        state.scroll = ScrollPosition::new(0.0, 100.0);
        true
    }

    fn session_get(&self, key: &str) -> Option<String> {
        self.lock().session.get(key).cloned()
    }

    fn session_set(&self, key: &str, value: String) {
        self.lock().session.insert(key.to_string(), value);
    }

    fn assign(&self, url: &Url) {
        self.lock().assigned.push(url.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("http://localhost/").unwrap().join(path).unwrap()
    }

    fn state(id: &str, index: u64) -> HistoryState {
        HistoryState {
            id: id.to_string(),
            index,
            data: None,
        }
    }

    #[test]
    fn test_push_truncates_forward_entries() {
        let host = MemoryHost::at("http://localhost/").unwrap();
        host.push_state(state("a", 1), &url("/a"));
        host.push_state(state("b", 2), &url("/b"));
        host.back();
        host.push_state(state("c", 2), &url("/c"));

        assert_eq!(host.history_len(), 3);
        assert!(host.forward().is_none());
        assert_eq!(host.location().path(), "/c");
    }

    #[test]
    fn test_back_restores_state() {
        let host = MemoryHost::at("http://localhost/").unwrap();
        host.replace_state(state("root", 0), &url("/"));
        host.push_state(state("a", 1), &url("/a"));

        assert_eq!(host.back(), Some(Some(state("root", 0))));
        assert_eq!(host.location().path(), "/");
        assert_eq!(host.back(), None);
    }

    #[test]
    fn test_anchor_scroll() {
        let host = MemoryHost::at("http://localhost/").unwrap();
        assert!(!host.scroll_to_anchor("intro"));
        host.add_anchor("intro");
        assert!(host.scroll_to_anchor("intro"));
        assert_eq!(host.scroll_position(), ScrollPosition::new(0.0, 100.0));
    }
}
