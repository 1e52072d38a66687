// File: src/demo.rs
// Purpose: Demo application served by the reference server

use chrono::Utc;
use maud::html;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use strata::query::QueryError;
use strata::{
    handler, middleware, App, EndpointModule, Next, PageModule, PreloadContext, PreloadResult,
    Redirect, RegistryError, RequestContext, Response, StatusCode, Template, ViewModule,
};

const POSTS: &[(&str, &str, &str)] = &[
    ("hello-world", "Hello, world", "The first post on this blog."),
    ("streaming", "Streaming pages", "Slow parts of a page arrive after the rest."),
];

pub fn build_app(case_insensitive: bool) -> Result<App, RegistryError> {
    App::builder()
        .case_insensitive(case_insensitive)
        .layout("/", root_layout())
        .page("/", home_page())
        .page("/blog/[slug]", post_page())
        .page("/posts/[slug]", moved_post())
        .not_found("/", not_found_page())
        .middleware("/api", server_timing())
        .endpoint(
            "/api/time",
            EndpointModule::new().get(handler(|_ctx: RequestContext| async move {
                Ok(Response::json(&json!({ "now": Utc::now().to_rfc3339() })))
            })),
        )
        .build()
}

fn root_layout() -> ViewModule {
    ViewModule::new(|_props| {
        Ok(Template::new()
            .markup(html! {
                header {
                    nav {
                        a href="/" { "Home" }
                        " "
                        a href="/blog/hello-world" { "Blog" }
                    }
                }
            })
            .html("<main>")
            .slot()
            .html("</main>")
            .markup(html! { footer { "Served by Strata" } }))
    })
}

fn home_page() -> PageModule {
    ViewModule::new(|_props| {
        Ok(Template::from(html! {
            h1 { "Welcome to Strata" }
            ul {
                @for (slug, title, _) in POSTS {
                    li { a href={ "/blog/" (slug) } { (title) } }
                }
            }
        }))
    })
    .with_headers(|_ctx, _meta, control| {
        control.set_header("cache-control", "public, max-age=60");
    })
}

async fn load_post(slug: String) -> Result<Value, QueryError> {
    let post = POSTS
        .iter()
        .find(|(s, _, _)| *s == slug)
        .map(|(slug, title, body)| json!({ "slug": slug, "title": title, "body": body }));
    Ok(post.unwrap_or(Value::Null))
}

fn post_page() -> PageModule {
    ViewModule::new(|props| {
        let Some(post) = props.meta.get("post").filter(|p| !p.is_null()) else {
            return Ok(Template::from(html! { h1 { "No such post" } }));
        };
        let title = post["title"].as_str().unwrap_or_default().to_string();
        let body = post["body"].as_str().unwrap_or_default().to_string();

        Ok(Template::new()
            .markup(html! {
                article {
                    h1 { (title) }
                    p { (body) }
                }
            })
            .deferred(async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                Ok(Template::from(html! {
                    section.comments { p { "No comments yet." } }
                }))
            }))
    })
    .with_preload(|ctx: PreloadContext| async move {
        let slug = ctx.param("slug").unwrap_or_default().to_string();
        let post = ctx
            .queries
            .fetch_query(format!("post:{slug}"), || load_post(slug.clone()))
            .await?;

        if post.is_null() {
            ctx.control.set_status(StatusCode::NOT_FOUND);
            return Ok(PreloadResult::new().with_title("Post not found"));
        }
        let title = post["title"].as_str().unwrap_or("Blog").to_string();
        Ok(PreloadResult::new().with_meta("post", post).with_title(title))
    })
}

fn moved_post() -> PageModule {
    ViewModule::new(|_props| Ok(Template::new())).with_preload(|ctx: PreloadContext| async move {
        let slug = ctx.param("slug").unwrap_or_default();
        Ok(PreloadResult::redirect(Redirect::permanent(format!("/blog/{slug}"))))
    })
}

fn not_found_page() -> PageModule {
    ViewModule::new(|props| {
        Ok(Template::from(html! {
            h1 { "Nothing here" }
            p { "No page at " code { (props.url.path()) } }
        }))
    })
}

fn server_timing() -> strata::Middleware {
    middleware(|ctx: RequestContext, next: Next| async move {
        let started = Instant::now();
        let response = next.run(ctx).await?;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        Ok(response.with_header("server-timing", &format!("handler;dur={elapsed:.2}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata::{Config, Dispatcher, Request};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(build_app(false).unwrap(), Config::default())
    }

    #[tokio::test]
    async fn test_home_page() {
        let response = dispatcher().handle(Request::get("/")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("cache-control"), Some("public, max-age=60"));
        let body = response.text_body().await;
        assert!(body.contains("Welcome to Strata"));
        assert!(body.contains("<main>"));
    }

    #[tokio::test]
    async fn test_blog_post_streams_comments() {
        let body = dispatcher()
            .handle(Request::get("/blog/streaming"))
            .await
            .text_body()
            .await;
        assert!(body.contains("<title>Streaming pages</title>"));
        assert!(body.contains("No comments yet."));
    }

    #[tokio::test]
    async fn test_unknown_post_is_404() {
        let response = dispatcher().handle(Request::get("/blog/missing")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_moved_post_redirects() {
        let response = dispatcher().handle(Request::get("/posts/hello-world")).await;
        assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.header("location"), Some("/blog/hello-world"));
    }

    #[tokio::test]
    async fn test_api_has_server_timing() {
        let response = dispatcher().handle(Request::get("/api/time")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response
            .header("server-timing")
            .is_some_and(|v| v.starts_with("handler;dur=")));
    }
}
