//! Navigation controller tests against an in-memory host
//!
//! Organized by feature area:
//! - Commit and history entries
//! - Concurrent navigations
//! - Failures, redirects and leaving the app
//! - Scroll restoration
//! - Links and hydration

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata::navigation::{ClickEvent, HistoryState, Link, MemoryHost, NavigationHost, ScrollPosition, StyledLink};
use strata::query::{query_fn, QueryCache, QueryObserver, QueryOptions, Refetch};
use strata::*;

fn view() -> ViewModule {
    ViewModule::new(|_| Ok(Template::new()))
}

fn delayed(delay: Duration, key: &'static str) -> ViewModule {
    view().with_preload(move |ctx: PreloadContext| async move {
        tokio::time::sleep(delay).await;
        ctx.queries.set_query_data(key, json!(true));
        Ok(PreloadResult::new())
    })
}

fn app() -> Arc<App> {
    let app = App::builder()
        .page("/", view())
        .page("/about", view().with_preload(|_| async { Ok(PreloadResult::new().with_title("About")) }))
        .page("/slow", delayed(Duration::from_millis(100), "slow"))
        .page("/fast", delayed(Duration::from_millis(10), "fast"))
        .page(
            "/broken",
            view().with_preload(|_| async { Err::<PreloadResult, BoxError>("offline".into()) }),
        )
        .page(
            "/old",
            view().with_preload(|_| async { Ok(PreloadResult::redirect(Redirect::permanent("/new"))) }),
        )
        .page("/new", view())
        .page(
            "/loop",
            view().with_preload(|_| async { Ok(PreloadResult::redirect(Redirect::temporary("/loop"))) }),
        )
        .build()
        .unwrap();
    Arc::new(app)
}

fn setup() -> (NavigationController, Arc<MemoryHost>) {
    let host = Arc::new(MemoryHost::at("http://localhost/").unwrap());
    let controller = NavigationController::new(app(), QueryCache::new(), host.clone());
    (controller, host)
}

// ============================================================================
// Commit and history entries
// ============================================================================

#[tokio::test]
async fn test_navigate_commits_location() {
    let (controller, host) = setup();

    let landed = controller.navigate("/about", NavigateOptions::default()).await;

    assert_eq!(landed, Ok(true));
    let location = controller.location();
    assert_eq!(location.current.path(), "/about");
    assert_eq!(location.pending, None);
    assert_eq!(host.history_len(), 2);
    assert_eq!(host.history_state().unwrap().index, 1);

    let rendered = controller.rendered().unwrap();
    assert_eq!(rendered.pattern, "/about");
    assert_eq!(rendered.title.as_deref(), Some("About"));
}

#[tokio::test]
async fn test_initial_entry_replaced() {
    let (_controller, host) = setup();
    let state = host.history_state().unwrap();
    assert_eq!(state.index, 0);
    assert_eq!(state.id.len(), 12);
}

#[tokio::test]
async fn test_replace_keeps_index() {
    let (controller, host) = setup();
    controller.navigate("/about", NavigateOptions::default()).await.unwrap();
    let before = host.history_state().unwrap();

    controller
        .navigate("/new", NavigateOptions::replace().with_data(json!({"from": "about"})))
        .await
        .unwrap();

    let after = host.history_state().unwrap();
    assert_eq!(host.history_len(), 2);
    assert_eq!(after.index, before.index);
    assert_ne!(after.id, before.id);
    assert_eq!(after.data, Some(json!({"from": "about"})));
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_see_pending_then_current() {
    let (controller, _host) = setup();
    let seen: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::default();
    let record = Arc::clone(&seen);
    let subscription = controller.subscribe(move |location| {
        record.lock().unwrap().push((
            location.current.path().to_string(),
            location.pending.as_ref().map(|u| u.path().to_string()),
        ));
    });

    controller.navigate("/fast", NavigateOptions::default()).await.unwrap();
    drop(subscription);
    controller.navigate("/", NavigateOptions::default()).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("/".to_string(), Some("/fast".to_string())),
            ("/fast".to_string(), None),
        ]
    );
}

// ============================================================================
// Concurrent navigations
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_later_navigation_wins_when_earlier_is_slower() {
    let (controller, _host) = setup();

    let (slow, fast) = tokio::join!(
        controller.navigate("/slow", NavigateOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            controller.navigate("/fast", NavigateOptions::default()).await
        }
    );

    assert_eq!(slow, Ok(false));
    assert_eq!(fast, Ok(true));
    assert_eq!(controller.location().current.path(), "/fast");
    // The superseded preload still finished and wrote to the cache.
    assert_eq!(controller.cache().get_query_data("slow"), Some(json!(true)));
}

#[tokio::test(start_paused = true)]
async fn test_superseded_fast_navigation_waits_for_latest() {
    let (controller, _host) = setup();

    let (fast, slow) = tokio::join!(
        controller.navigate("/fast", NavigateOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            controller.navigate("/slow", NavigateOptions::default()).await
        }
    );

    assert_eq!(fast, Ok(false));
    assert_eq!(slow, Ok(true));
    assert_eq!(controller.location().current.path(), "/slow");
}

// ============================================================================
// Failures, redirects and leaving the app
// ============================================================================

#[tokio::test]
async fn test_preload_failure_keeps_location() {
    let (controller, _host) = setup();

    let err = controller
        .navigate("/broken", NavigateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, NavigationError::Preload { .. }));
    assert_eq!(controller.location().current.path(), "/");
    assert_eq!(controller.location().pending, None);
}

#[tokio::test]
async fn test_preload_redirect_replaces_entry() {
    let (controller, host) = setup();

    let landed = controller.navigate("/old", NavigateOptions::default()).await;

    assert_eq!(landed, Ok(false));
    assert_eq!(controller.location().current.path(), "/new");
    assert_eq!(host.location().path(), "/new");
    assert_eq!(host.history_len(), 2);
}

#[tokio::test]
async fn test_subscribers_see_redirect_target_pending() {
    let (controller, _host) = setup();
    let seen: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::default();
    let record = Arc::clone(&seen);
    let _subscription = controller.subscribe(move |location| {
        record.lock().unwrap().push((
            location.current.path().to_string(),
            location.pending.as_ref().map(|u| u.path().to_string()),
        ));
    });

    controller.navigate("/old", NavigateOptions::default()).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("/".to_string(), Some("/old".to_string())),
            ("/".to_string(), Some("/new".to_string())),
            ("/new".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let (controller, _host) = setup();
    let err = controller
        .navigate("/loop", NavigateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, NavigationError::TooManyRedirects(_)));
}

#[tokio::test(start_paused = true)]
async fn test_cross_origin_leaves_app() {
    let (controller, host) = setup();

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        controller.navigate("https://example.com/elsewhere", NavigateOptions::default()),
    )
    .await;

    assert!(outcome.is_err(), "cross-origin navigation never resolves");
    assert_eq!(host.assigned()[0].as_str(), "https://example.com/elsewhere");
    assert_eq!(host.history_len(), 1);
}

#[tokio::test]
async fn test_invalid_target() {
    let (controller, _host) = setup();
    let err = controller
        .navigate("http://[::1", NavigateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, NavigationError::InvalidUrl { .. }));
}

// ============================================================================
// Scroll restoration
// ============================================================================

#[tokio::test]
async fn test_scroll_reset_then_restored_on_back() {
    let (controller, host) = setup();
    host.set_scroll(ScrollPosition::new(0.0, 500.0));

    controller.navigate("/about", NavigateOptions::default()).await.unwrap();
    assert_eq!(host.scroll_position(), ScrollPosition::default());

    host.set_scroll(ScrollPosition::new(0.0, 42.0));
    let restored = host.back().unwrap();
    controller.handle_popstate(restored).await.unwrap();

    assert_eq!(controller.location().current.path(), "/");
    assert_eq!(host.scroll_position(), ScrollPosition::new(0.0, 500.0));

    let forward = host.forward().unwrap();
    controller.handle_popstate(forward).await.unwrap();
    assert_eq!(host.scroll_position(), ScrollPosition::new(0.0, 42.0));
}

#[tokio::test]
async fn test_hash_scrolls_to_anchor() {
    let (controller, host) = setup();
    host.add_anchor("team");

    controller.navigate("/about#team", NavigateOptions::default()).await.unwrap();
    assert_eq!(host.scroll_position(), ScrollPosition::new(0.0, 100.0));
}

#[tokio::test]
async fn test_scroll_false_leaves_position() {
    let (controller, host) = setup();
    host.set_scroll(ScrollPosition::new(0.0, 300.0));

    controller
        .navigate("/about", NavigateOptions::default().with_scroll(false))
        .await
        .unwrap();
    assert_eq!(host.scroll_position(), ScrollPosition::new(0.0, 300.0));
}

#[tokio::test]
async fn test_popstate_after_push_keeps_indices_increasing() {
    let (controller, host) = setup();
    controller.navigate("/about", NavigateOptions::default()).await.unwrap();
    controller.navigate("/new", NavigateOptions::default()).await.unwrap();

    let state: Option<HistoryState> = host.back().unwrap();
    controller.handle_popstate(state).await.unwrap();
    controller.navigate("/fast", NavigateOptions::default()).await.unwrap();

    assert_eq!(host.history_state().unwrap().index, 3);
}

// ============================================================================
// Links and hydration
// ============================================================================

#[tokio::test]
async fn test_link_click_navigates() {
    let (controller, _host) = setup();
    let link = Link::new("/about");

    let mut modified = ClickEvent {
        ctrl: true,
        ..ClickEvent::default()
    };
    assert!(link.on_click(&mut modified, &controller).is_none());
    assert!(!modified.default_prevented);

    let mut click = ClickEvent::default();
    let navigation = link.on_click(&mut click, &controller).unwrap();
    assert!(click.default_prevented);
    assert_eq!(navigation.await, Ok(true));
    assert_eq!(controller.location().current.path(), "/about");
}

#[tokio::test(start_paused = true)]
async fn test_styled_link_pending_class() {
    let (controller, _host) = setup();
    let link = StyledLink::new(Link::new("/slow"))
        .with_active_class("active")
        .with_pending_class("pending");

    let navigation = link.on_click(&mut ClickEvent::default(), &controller).unwrap();
    let task = tokio::spawn(navigation);
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(link.class_names(&controller.location()).as_deref(), Some("pending"));

    assert_eq!(task.await.unwrap(), Ok(true));
    assert_eq!(link.class_names(&controller.location()).as_deref(), Some("active"));
}

#[tokio::test]
async fn test_hydrated_data_skips_first_fetch() {
    let server = Dispatcher::new(
        App::builder()
            .page(
                "/users/[id]",
                view().with_preload(|ctx: PreloadContext| async move {
                    ctx.queries.set_query_data("user:7", json!({"name": "Grace"}));
                    Ok(PreloadResult::new().with_title("Grace"))
                }),
            )
            .build()
            .unwrap(),
        Config::default(),
    );
    let html = server
        .handle(Request::get("/users/7"))
        .await
        .text_body()
        .await;

    let host = Arc::new(MemoryHost::at("http://localhost/users/7").unwrap());
    let cache: QueryCache<Value> = QueryCache::new();
    let controller = NavigationController::new(app(), cache.clone(), host);
    controller.hydrate(HydrationPayload::from_document(&html).unwrap());

    let rendered = controller.rendered().unwrap();
    assert_eq!(rendered.pattern, "/users/[id]");
    assert_eq!(rendered.params["id"], "7");

    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fetches);
    let fetch = query_fn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(json!({"name": "refetched"})) }
    });
    let options = QueryOptions::default().with_refetch_on_mount(Refetch::Always);
    let observer = QueryObserver::mount(&cache, "user:7", fetch, options, || {});

    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    assert_eq!(observer.read().data(), Some(&json!({"name": "Grace"})));
}
