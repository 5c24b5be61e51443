//! Dispatch of incoming updates to registered handlers.
//!
//! Handlers are registered per update shape with a filter and an async
//! action. For every update, every handler of its shape whose filter matches
//! is launched as its own task (multicast, not first-match). The dispatch loop
//! never waits for handlers; a semaphore caps how many execute at once.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use anyhow::Result;
use futures_util::{future::BoxFuture, FutureExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::telegram::{InlineQuery, Message, Transport, Update, UpdateKind};

/// Everything a handler gets besides the update itself.
#[derive(Clone)]
pub struct HandlerContext {
    pub transport: Arc<dyn Transport>,
    /// Cancelled when the router shuts down.
    pub cancel: CancellationToken,
    pub update_id: i64,
}

/// Predicate deciding whether a handler runs for an update.
pub trait UpdateFilter<U>: Send + Sync {
    fn matches(&self, update: &U) -> bool;
}

/// Exact-match filter for messages. `None` fields are not checked.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub text: Option<String>,
}

impl UpdateFilter<Message> for MessageFilter {
    fn matches(&self, update: &Message) -> bool {
        self.text.as_ref().map_or(true, |t| *t == update.text)
    }
}

/// Exact-match filter for inline queries. `None` fields are not checked.
#[derive(Debug, Clone, Default)]
pub struct InlineQueryFilter {
    pub query: Option<String>,
    pub chat_type: Option<String>,
}

impl UpdateFilter<InlineQuery> for InlineQueryFilter {
    fn matches(&self, update: &InlineQuery) -> bool {
        if self.query.as_ref().is_some_and(|q| *q != update.query) {
            return false;
        }
        if self
            .chat_type
            .as_ref()
            .is_some_and(|c| Some(c) != update.chat_type.as_ref())
        {
            return false;
        }
        true
    }
}

type Action<U> = Arc<dyn Fn(HandlerContext, U) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Route<U> {
    filter: Box<dyn UpdateFilter<U>>,
    action: Action<U>,
}

impl<U: 'static> Route<U> {
    fn new<F, A, Fut>(filter: F, action: A) -> Self
    where
        F: UpdateFilter<U> + 'static,
        A: Fn(HandlerContext, U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            filter: Box::new(filter),
            action: Arc::new(move |ctx, update| action(ctx, update).boxed()),
        }
    }
}

/// Update router. Register handlers first, then hand it to [`Router::serve`].
pub struct Router {
    transport: Arc<dyn Transport>,
    messages: Vec<Route<Message>>,
    inline_queries: Vec<Route<InlineQuery>>,
    permits: Arc<Semaphore>,
}

impl Router {
    /// `max_in_flight` bounds concurrently executing handlers.
    pub fn new(transport: Arc<dyn Transport>, max_in_flight: usize) -> Self {
        Self {
            transport,
            messages: vec![],
            inline_queries: vec![],
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn on_message<A, Fut>(&mut self, filter: MessageFilter, action: A)
    where
        A: Fn(HandlerContext, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.messages.push(Route::new(filter, action));
    }

    pub fn on_inline_query<A, Fut>(&mut self, filter: InlineQueryFilter, action: A)
    where
        A: Fn(HandlerContext, InlineQuery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inline_queries.push(Route::new(filter, action));
    }

    /// Pull updates until the transport feed closes.
    pub async fn serve(self, shutdown: CancellationToken) {
        info!(
            message_handlers = self.messages.len(),
            inline_query_handlers = self.inline_queries.len(),
            "serving updates"
        );
        let mut feed = self.transport.updates(shutdown.clone());
        while let Some(update) = feed.recv().await {
            let update_id = update.id;
            let launched = self.dispatch(update, &shutdown);
            if launched == 0 {
                debug!(update_id, "no handler matched");
            }
        }
        info!("update feed closed");
    }

    /// Launch every matching handler and return how many were started.
    fn dispatch(&self, update: Update, shutdown: &CancellationToken) -> usize {
        match update.kind {
            UpdateKind::Message(msg) => {
                self.launch("message", &self.messages, update.id, msg, shutdown)
            }
            UpdateKind::InlineQuery(query) => self.launch(
                "inline_query",
                &self.inline_queries,
                update.id,
                query,
                shutdown,
            ),
            UpdateKind::Other => 0,
        }
    }

    fn launch<U>(
        &self,
        shape: &'static str,
        routes: &[Route<U>],
        update_id: i64,
        update: U,
        shutdown: &CancellationToken,
    ) -> usize
    where
        U: Clone + Send + 'static,
    {
        let mut launched = 0;
        for (index, route) in routes.iter().enumerate() {
            if !route.filter.matches(&update) {
                continue;
            }
            let ctx = HandlerContext {
                transport: self.transport.clone(),
                cancel: shutdown.child_token(),
                update_id,
            };
            let action = route.action.clone();
            let update = update.clone();
            let permits = self.permits.clone();
            let span = info_span!("handler", update_id, shape, route = index);
            tokio::spawn(
                async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    match AssertUnwindSafe(action(ctx, update)).catch_unwind().await {
                        Ok(Ok(())) => debug!("handler finished"),
                        Ok(Err(e)) => error!(error = %format!("{e:#}"), "handler failed"),
                        Err(_) => error!("handler panicked"),
                    }
                }
                .instrument(span),
            );
            launched += 1;
        }
        launched
    }
}
