// File: src/navigation/link.rs
// Purpose: Link primitive: which clicks to intercept and how link state is styled

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

use super::{LocationSnapshot, NavigateOptions, NavigationController};
use crate::error::NavigationError;

/// Mouse click on a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickEvent {
    pub button: i16,
    pub shift: bool,
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub default_prevented: bool,
}

/// Attributes of the clicked anchor element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorInfo {
    pub href: String,
    pub target: Option<String>,
    pub download: bool,
    pub rel: Option<String>,
}

/// Whether a click should become a client-side navigation.
pub fn should_intercept(event: &ClickEvent, anchor: &AnchorInfo) -> bool {
    if event.default_prevented || event.button != 0 {
        return false;
    }
    if event.shift || event.alt || event.ctrl || event.meta {
        return false;
    }
    if !matches!(anchor.target.as_deref(), None | Some("") | Some("_self")) {
        return false;
    }
    if anchor.download {
        return false;
    }
    !anchor
        .rel
        .as_deref()
        .is_some_and(|rel| rel.split_ascii_whitespace().any(|r| r.eq_ignore_ascii_case("external")))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Link {
    pub href: String,
    pub target: Option<String>,
    pub download: bool,
    pub rel: Option<String>,
    /// Stored with the new history entry
    pub history_state: Option<Value>,
    pub replace_state: bool,
    pub no_scroll: bool,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_rel(mut self, rel: impl Into<String>) -> Self {
        self.rel = Some(rel.into());
        self
    }

    pub fn with_download(mut self) -> Self {
        self.download = true;
        self
    }

    pub fn with_history_state(mut self, data: Value) -> Self {
        self.history_state = Some(data);
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace_state = true;
        self
    }

    pub fn without_scroll(mut self) -> Self {
        self.no_scroll = true;
        self
    }

    pub fn anchor(&self) -> AnchorInfo {
        AnchorInfo {
            href: self.href.clone(),
            target: self.target.clone(),
            download: self.download,
            rel: self.rel.clone(),
        }
    }

    /// Intercept `event` when it qualifies: marks it prevented and returns
    /// the navigation to drive. Otherwise the host handles the click.
    pub fn on_click(
        &self,
        event: &mut ClickEvent,
        controller: &NavigationController,
    ) -> Option<BoxFuture<'static, Result<bool, NavigationError>>> {
        if !should_intercept(event, &self.anchor()) {
            return None;
        }
        event.default_prevented = true;

        let controller = controller.clone();
        let href = self.href.clone();
        let options = NavigateOptions {
            replace: self.replace_state,
            scroll: !self.no_scroll,
            data: self.history_state.clone(),
        };
        Some(async move { controller.navigate(&href, options).await }.boxed())
    }
}

pub type CompareUrls = fn(&Url, &Url) -> bool;

fn same_url(current: &Url, href: &Url) -> bool {
    current == href
}

/// A [`Link`] that reports active and pending class names.
#[derive(Debug, Clone)]
pub struct StyledLink {
    pub link: Link,
    pub class: Option<String>,
    pub active_class: Option<String>,
    pub pending_class: Option<String>,
    compare: CompareUrls,
    navigating: Arc<AtomicBool>,
}

impl StyledLink {
    pub fn new(link: Link) -> Self {
        Self {
            link,
            class: None,
            active_class: None,
            pending_class: None,
            compare: same_url,
            navigating: Arc::default(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_active_class(mut self, class: impl Into<String>) -> Self {
        self.active_class = Some(class.into());
        self
    }

    pub fn with_pending_class(mut self, class: impl Into<String>) -> Self {
        self.pending_class = Some(class.into());
        self
    }

    /// How the current location is compared with the link target.
    pub fn with_compare(mut self, compare: CompareUrls) -> Self {
        self.compare = compare;
        self
    }

    pub fn on_click(
        &self,
        event: &mut ClickEvent,
        controller: &NavigationController,
    ) -> Option<BoxFuture<'static, Result<bool, NavigationError>>> {
        let navigation = self.link.on_click(event, controller)?;
        self.navigating.store(true, Ordering::Relaxed);
        Some(navigation)
    }

    /// Class list for the current location.
    pub fn class_names(&self, location: &LocationSnapshot) -> Option<String> {
        if location.pending.is_none() {
            self.navigating.store(false, Ordering::Relaxed);
        }

        let mut classes: Vec<&str> = Vec::new();
        if let Some(class) = &self.class {
            classes.push(class);
        }
        let active = location
            .current
            .join(&self.link.href)
            .is_ok_and(|href| (self.compare)(&location.current, &href));
        if active {
            if let Some(class) = &self.active_class {
                classes.push(class);
            }
        }
        if self.navigating.load(Ordering::Relaxed) {
            if let Some(class) = &self.pending_class {
                classes.push(class);
            }
        }

        (!classes.is_empty()).then(|| classes.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn left_click() -> ClickEvent {
        ClickEvent::default()
    }

    #[test]
    fn test_plain_click_intercepted() {
        assert!(should_intercept(&left_click(), &Link::new("/a").anchor()));
        assert!(should_intercept(&left_click(), &Link::new("/a").with_target("_self").anchor()));
    }

    #[rstest]
    #[case(ClickEvent { button: 1, ..ClickEvent::default() })]
    #[case(ClickEvent { shift: true, ..ClickEvent::default() })]
    #[case(ClickEvent { alt: true, ..ClickEvent::default() })]
    #[case(ClickEvent { ctrl: true, ..ClickEvent::default() })]
    #[case(ClickEvent { meta: true, ..ClickEvent::default() })]
    #[case(ClickEvent { default_prevented: true, ..ClickEvent::default() })]
    fn test_modified_clicks_pass_through(#[case] event: ClickEvent) {
        assert!(!should_intercept(&event, &Link::new("/a").anchor()));
    }

    #[rstest]
    #[case(Link::new("/a").with_target("_blank"))]
    #[case(Link::new("/a").with_download())]
    #[case(Link::new("/a").with_rel("noopener external"))]
    fn test_anchor_attributes_pass_through(#[case] link: Link) {
        assert!(!should_intercept(&left_click(), &link.anchor()));
    }

    #[test]
    fn test_active_class() {
        let link = StyledLink::new(Link::new("/about"))
            .with_class("nav")
            .with_active_class("active");
        let at = |path: &str| LocationSnapshot {
            current: Url::parse("http://localhost/").unwrap().join(path).unwrap(),
            pending: None,
        };

        assert_eq!(link.class_names(&at("/about")).as_deref(), Some("nav active"));
        assert_eq!(link.class_names(&at("/")).as_deref(), Some("nav"));
    }
}
