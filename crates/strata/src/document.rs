// File: src/document.rs
// Purpose: HTML document shell and the built-in 404 / 500 / redirect documents

use maud::{html, Markup, PreEscaped, DOCTYPE};

/// Closing tags emitted after the streamed body, whatever happened during rendering.
pub const DOCUMENT_CLOSE: &str = "</div></body></html>";

/// Document head up to and including the opening of the root element.
pub fn open(title: Option<&str>, head_extra: &str) -> String {
    let head = html! {
        meta charset="UTF-8";
        meta name="viewport" content="width=device-width, initial-scale=1";
        @if let Some(title) = title {
            title { (title) }
        }
        (PreEscaped(head_extra))
    };
    format!(
        "<!DOCTYPE html><html><head>{}</head><body><div id=\"root\">",
        head.into_string()
    )
}

pub fn not_found_page() -> Markup {
    html! {
        h1 { "Not Found" }
        p { "The page you are looking for does not exist." }
    }
}

/// Minimal 500 document; `message` is shown only when errors are exposed.
pub fn server_error(message: Option<&str>) -> String {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="UTF-8";
                title { "Internal Server Error" }
            }
            body {
                h1 { "Internal Server Error" }
                @if let Some(message) = message {
                    pre { (message) }
                }
            }
        }
    }
    .into_string()
}

/// Body of a redirect response for clients that ignore `location`.
pub fn redirect_page(location: &str) -> String {
    html! {
        (DOCTYPE)
        html {
            head {
                meta http-equiv="refresh" content={ "0; url=" (location) };
            }
            body {
                a href=(location) { (location) }
            }
        }
    }
    .into_string()
}

/// Tag that redirects a document whose head was already sent.
pub fn refresh_tag(location: &str) -> String {
    html! {
        meta http-equiv="refresh" content={ "0; url=" (location) };
    }
    .into_string()
}
