//! Fan-out queries across the relay pool.
//!
//! One logical query is sent to every relay in parallel under a single
//! subscription id. Per-relay streams are merged into one channel that never
//! yields the same event id twice and closes once every relay has finished
//! (end of stored events, subscription closed, socket closed or connection
//! failure), the caller cancels, or the maximum wait elapses.

use std::{collections::HashSet, sync::Arc, time::Duration};

use rand::{distributions::Alphanumeric, thread_rng, Rng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument, Span};

use crate::{event::Event, filter::Filter, relay::RelayPool};

const CHANNEL_CAPACITY: usize = 256;

/// Drives [`RelayPool`] to answer filtered queries.
#[derive(Debug, Clone)]
pub struct QueryAggregator {
    pool: Arc<RelayPool>,
    max_wait: Duration,
}

impl QueryAggregator {
    pub fn new(pool: Arc<RelayPool>, max_wait: Duration) -> Self {
        Self { pool, max_wait }
    }

    pub fn pool(&self) -> &RelayPool {
        &self.pool
    }

    /// Start a query and return the merged, deduplicated event stream.
    ///
    /// The receiver yields events in arrival order and is closed when the
    /// query completes. Relays that cannot be reached are logged and skipped.
    /// Must be called inside a tokio runtime.
    pub fn query(
        &self,
        cancel: &CancellationToken,
        relays: &[String],
        filter: Filter,
    ) -> mpsc::Receiver<Event> {
        let span = Span::current();
        let cancel = cancel.child_token();
        let sub_id = subscription_id();
        let filter = Arc::new(filter);
        let (relay_tx, mut relay_rx) = mpsc::channel::<Event>(CHANNEL_CAPACITY);

        for url in relays {
            let pool = self.pool.clone();
            let url = url.clone();
            let sub_id = sub_id.clone();
            let filter = filter.clone();
            let tx = relay_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(
                async move {
                    match pool.fetch(&url, &sub_id, &filter, &tx, &cancel).await {
                        Ok(n) => debug!(relay = %url, events = n, "relay finished"),
                        Err(e) => warn!(relay = %url, error = %e, "relay query failed"),
                    }
                }
                .instrument(span.clone()),
            );
        }
        drop(relay_tx);

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let max_wait = self.max_wait;
        tokio::spawn(
            async move {
                let deadline = tokio::time::sleep(max_wait);
                tokio::pin!(deadline);
                let mut seen = HashSet::new();
                loop {
                    tokio::select! {
                        _ = &mut deadline => {
                            warn!(
                                sub = %sub_id,
                                ?max_wait,
                                "query timed out before all relays finished"
                            );
                            break;
                        }
                        _ = cancel.cancelled() => {
                            debug!(sub = %sub_id, "query cancelled");
                            break;
                        }
                        ev = relay_rx.recv() => match ev {
                            Some(ev) => {
                                if !seen.insert(ev.id.clone()) {
                                    continue;
                                }
                                if out_tx.send(ev).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                // Stop any relay still streaming.
                cancel.cancel();
                debug!(sub = %sub_id, events = seen.len(), "query complete");
            }
            .instrument(span),
        );
        out_rx
    }

    /// Run a query to completion and collect its events.
    pub async fn query_all(
        &self,
        cancel: &CancellationToken,
        relays: &[String],
        filter: Filter,
    ) -> Vec<Event> {
        let mut rx = self.query(cancel, relays, filter);
        let mut events = vec![];
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }
}

/// Random subscription id shared by every relay of one query.
fn subscription_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("q-{suffix}")
}
