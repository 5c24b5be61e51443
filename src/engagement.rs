//! Engagement counters derived from the events that reference a note.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    bolt11,
    event::{Event, KIND_REACTION, KIND_REPOST, KIND_TEXT_NOTE, KIND_ZAP_RECEIPT},
    filter::Filter,
    query::QueryAggregator,
};

/// Reaction contents counted as likes. Everything else, including `-` and an
/// empty reaction, is ignored.
pub const POSITIVE_REACTIONS: [&str; 4] = ["👍", "🤙", "+", "♥️"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementMetrics {
    /// Sum of zap invoice amounts in millisatoshis.
    pub zap_msat: u64,
    pub positive_reactions: u64,
    pub replies: u64,
    pub reposts: u64,
}

impl EngagementMetrics {
    /// Single pass over `events`, counting only those that reference `note_id`.
    ///
    /// Zap receipts whose invoice is missing or cannot be decoded are skipped.
    pub fn compute<'a>(note_id: &str, events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut metrics = Self::default();
        for ev in events {
            if !ev.references(note_id) {
                continue;
            }
            match ev.kind {
                KIND_ZAP_RECEIPT => {
                    let Some(invoice) = ev.first_tag_value("bolt11") else {
                        debug!(id = %ev.id, "zap receipt without bolt11 tag");
                        continue;
                    };
                    match bolt11::amount_msat(invoice) {
                        Ok(msat) => metrics.zap_msat = metrics.zap_msat.saturating_add(msat),
                        Err(e) => debug!(id = %ev.id, error = %e, "skipping undecodable zap"),
                    }
                }
                KIND_REACTION => {
                    if POSITIVE_REACTIONS.contains(&ev.content.as_str()) {
                        metrics.positive_reactions += 1;
                    }
                }
                KIND_TEXT_NOTE => metrics.replies += 1,
                KIND_REPOST => metrics.reposts += 1,
                _ => {}
            }
        }
        metrics
    }
}

/// Replies, reposts, reactions and zap receipts tagging `note_id`.
pub fn engagement_filter(note_id: &str) -> Filter {
    Filter::new()
        .kinds([KIND_TEXT_NOTE, KIND_REPOST, KIND_REACTION, KIND_ZAP_RECEIPT])
        .tag('e', [note_id])
}

/// Query the relays for engagements with `note_id` and count them.
pub async fn fetch(
    aggregator: &QueryAggregator,
    cancel: &CancellationToken,
    relays: &[String],
    note_id: &str,
) -> EngagementMetrics {
    let events = aggregator
        .query_all(cancel, relays, engagement_filter(note_id))
        .await;
    EngagementMetrics::compute(note_id, &events)
}
