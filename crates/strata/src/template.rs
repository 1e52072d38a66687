// File: src/template.rs
// Purpose: View output: ready HTML, a slot for the nested child and deferred chunks
//
// Layout templates are nested outermost first: each template's first
// [`Chunk::Slot`] receives the next template. Deferred chunks start running
// as soon as rendering begins but are emitted strictly in document order.

use futures::future::{BoxFuture, FutureExt};
use maud::Markup;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{panic_message, BoxError, RenderError};

pub type DeferredChunk = BoxFuture<'static, Result<Template, BoxError>>;

pub enum Chunk {
    Html(String),
    /// Where the nested child renders.
    Slot,
    Deferred(DeferredChunk),
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Html(html) => f.debug_tuple("Html").field(html).finish(),
            Chunk::Slot => f.write_str("Slot"),
            Chunk::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Template {
    chunks: Vec<Chunk>,
}

impl From<Markup> for Template {
    fn from(markup: Markup) -> Self {
        Template::new().markup(markup)
    }
}

impl From<String> for Template {
    fn from(html: String) -> Self {
        Template::new().html(html)
    }
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.chunks.push(Chunk::Html(html.into()));
        self
    }

    pub fn markup(self, markup: Markup) -> Self {
        self.html(markup.into_string())
    }

    pub fn slot(mut self) -> Self {
        self.chunks.push(Chunk::Slot);
        self
    }

    /// Content produced later; it may itself contain deferred chunks.
    pub fn deferred<F>(mut self, content: F) -> Self
    where
        F: Future<Output = Result<Template, BoxError>> + Send + 'static,
    {
        self.chunks.push(Chunk::Deferred(content.boxed()));
        self
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn has_slot(&self) -> bool {
        self.chunks.iter().any(|c| matches!(c, Chunk::Slot))
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

/// Nest templates given outermost first into one chunk list.
pub fn nest(templates: Vec<Template>) -> Vec<Chunk> {
    let mut inner: Vec<Chunk> = Vec::new();

    for template in templates.into_iter().rev() {
        let mut out = Vec::with_capacity(template.chunks.len() + inner.len());
        let mut filled = false;
        for chunk in template.chunks {
            match chunk {
                Chunk::Slot if !filled => {
                    out.append(&mut inner);
                    filled = true;
                }
                Chunk::Slot => {}
                other => out.push(other),
            }
        }
        if !filled && !inner.is_empty() {
            debug!("Layout template has no slot, nested content dropped");
        }
        inner = out;
    }

    inner
}

// ============================================================================
// Production
// ============================================================================

enum Pending {
    Ready(String),
    Task(JoinHandle<Result<Template, BoxError>>),
}

fn spawn_all(chunks: Vec<Chunk>) -> VecDeque<Pending> {
    chunks
        .into_iter()
        .filter_map(|chunk| match chunk {
            Chunk::Html(html) => Some(Pending::Ready(html)),
            Chunk::Deferred(content) => Some(Pending::Task(tokio::spawn(content))),
            Chunk::Slot => None,
        })
        .collect()
}

fn abort_all(queue: VecDeque<Pending>) {
    for pending in queue {
        if let Pending::Task(handle) = pending {
            handle.abort();
        }
    }
}

/// Resolve `chunks` in document order and send each piece of HTML.
///
/// Stops after the first failure (sent as `Err`) or when the receiver is gone.
pub(crate) async fn produce(chunks: Vec<Chunk>, tx: mpsc::Sender<Result<String, RenderError>>) {
    let mut queue = spawn_all(chunks);

    while let Some(pending) = queue.pop_front() {
        let html = match pending {
            Pending::Ready(html) => html,
            Pending::Task(handle) => {
                let failure = match handle.await {
                    Ok(Ok(template)) => {
                        for nested in spawn_all(template.into_chunks()).into_iter().rev() {
                            queue.push_front(nested);
                        }
                        continue;
                    }
                    Ok(Err(err)) => RenderError::View(err),
                    Err(join) if join.is_panic() => {
                        RenderError::Panic(panic_message(join.into_panic().as_ref()))
                    }
                    Err(join) => RenderError::View(join.into()),
                };
                abort_all(queue);
                let _ = tx.send(Err(failure)).await;
                return;
            }
        };

        if tx.send(Ok(html)).await.is_err() {
            abort_all(queue);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maud::html;
    use pretty_assertions::assert_eq;

    fn flatten(chunks: &[Chunk]) -> String {
        chunks
            .iter()
            .map(|c| match c {
                Chunk::Html(h) => h.as_str(),
                Chunk::Slot => "<slot>",
                Chunk::Deferred(_) => "<deferred>",
            })
            .collect()
    }

    #[test]
    fn test_nest_outermost_first() {
        let root = Template::new().html("<main>").slot().html("</main>");
        let section = Template::new().html("<section>").slot().html("</section>");
        let page = Template::from(html! { p { "hi" } });

        let chunks = nest(vec![root, section, page]);
        assert_eq!(flatten(&chunks), "<main><section><p>hi</p></section></main>");
    }

    #[test]
    fn test_second_slot_is_empty() {
        let layout = Template::new().slot().html("|").slot();
        let chunks = nest(vec![layout, Template::from("x".to_string())]);
        assert_eq!(flatten(&chunks), "x|");
    }

    #[tokio::test]
    async fn test_produce_keeps_document_order() {
        let template = Template::new()
            .html("a")
            .deferred(async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok(Template::new().html("b").deferred(async { Ok(Template::from("c".to_string())) }))
            })
            .html("d");

        let (tx, mut rx) = mpsc::channel(8);
        produce(template.into_chunks(), tx).await;

        let mut out = String::new();
        while let Some(piece) = rx.recv().await {
            out.push_str(&piece.unwrap());
        }
        assert_eq!(out, "abcd");
    }

    #[tokio::test]
    async fn test_produce_stops_on_failure() {
        let template = Template::new()
            .html("a")
            .deferred(async { Err::<Template, BoxError>("broken".into()) })
            .html("never");

        let (tx, mut rx) = mpsc::channel(8);
        produce(template.into_chunks(), tx).await;

        assert_eq!(rx.recv().await.unwrap().unwrap(), "a");
        assert!(matches!(rx.recv().await, Some(Err(RenderError::View(_)))));
        assert!(rx.recv().await.is_none());
    }
}
