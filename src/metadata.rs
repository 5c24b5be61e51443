//! Author profile lookup.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::LookupError,
    event::{Event, KIND_METADATA},
    filter::Filter,
    query::QueryAggregator,
};

/// Fields of a kind-0 profile that the bot displays.
///
/// `null` and missing values both read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, deserialize_with = "nullable")]
    pub display_name: String,
    /// Older clients write `displayName`; profiles often carry both keys.
    #[serde(default, rename = "displayName", deserialize_with = "nullable")]
    pub display_name_legacy: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub nip05: String,
}

impl ProfileMetadata {
    /// Parse the JSON content of a metadata event.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// `display_name` (or legacy `displayName`) when set, otherwise `name`.
    pub fn shown_name(&self) -> &str {
        [&self.display_name, &self.display_name_legacy, &self.name]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or("", String::as_str)
    }
}

fn nullable<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

/// Latest metadata event by `created_at`; the first one seen wins a tie.
pub fn newest(events: &[Event]) -> Option<&Event> {
    let mut best: Option<&Event> = None;
    for ev in events {
        if best.map_or(true, |b| ev.created_at > b.created_at) {
            best = Some(ev);
        }
    }
    best
}

/// Fetches author profiles through a [`QueryAggregator`].
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    aggregator: QueryAggregator,
}

impl MetadataResolver {
    pub fn new(aggregator: QueryAggregator) -> Self {
        Self { aggregator }
    }

    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        relays: &[String],
        pubkey: &str,
    ) -> Result<ProfileMetadata, LookupError> {
        let filter = Filter::new().kinds([KIND_METADATA]).authors([pubkey]);
        let events = self.aggregator.query_all(cancel, relays, filter).await;
        let ev = newest(&events).ok_or_else(|| LookupError::AuthorNotFound(pubkey.to_string()))?;
        ProfileMetadata::parse(&ev.content).map_err(|source| LookupError::MalformedMetadata {
            pubkey: pubkey.to_string(),
            source,
        })
    }
}
