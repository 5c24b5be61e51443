//! Bot handlers: note lookups for inline queries and the `/start` greeting.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    compose::{Composer, RenderedAnswer},
    engagement,
    error::LookupError,
    filter::Filter,
    metadata::MetadataResolver,
    nip19,
    query::QueryAggregator,
    router::HandlerContext,
    telegram::{InlineAnswer, InlineQuery, Message},
};

/// Seconds Telegram may cache an inline answer.
pub const CACHE_TIME_SECS: u32 = 600;

pub const USAGE: &str = "Type @<this bot> followed by a note reference \
(note1…, nevent1…, nostr:… or a hex id) in any chat to share the note \
with its replies, reposts, likes and zaps.";

/// Renders a note reference into an inline answer.
#[derive(Clone)]
pub struct NoteLookup {
    aggregator: QueryAggregator,
    resolver: MetadataResolver,
    composer: Arc<Composer>,
}

impl NoteLookup {
    pub fn new(aggregator: QueryAggregator, composer: Composer) -> Self {
        Self {
            resolver: MetadataResolver::new(aggregator.clone()),
            aggregator,
            composer: Arc::new(composer),
        }
    }

    /// Fetch the referenced note, its engagement and its author, then compose.
    pub async fn render(
        &self,
        cancel: &CancellationToken,
        input: &str,
    ) -> Result<RenderedAnswer, LookupError> {
        let pointer = nip19::parse_reference(input)
            .ok_or_else(|| LookupError::InvalidReference(input.to_string()))?;
        let relays = self.aggregator.pool().relays_with(&pointer.relays);
        debug!(
            id = %pointer.id,
            author = ?pointer.author,
            kind = ?pointer.kind,
            relays = relays.len(),
            "looking up note"
        );

        let note = self
            .aggregator
            .query_all(cancel, &relays, Filter::new().ids([pointer.id.as_str()]).limit(1))
            .await
            .into_iter()
            .find(|ev| ev.id == pointer.id)
            .ok_or_else(|| LookupError::EventNotFound(pointer.id.clone()))?;

        let (metrics, metadata) = tokio::join!(
            engagement::fetch(&self.aggregator, cancel, &relays, &note.id),
            self.resolver.resolve(cancel, &relays, &note.pubkey),
        );
        let metadata = metadata?;
        debug!(id = %note.id, ?metrics, "engagement counted");
        Ok(self.composer.compose(&note, &metadata, &metrics)?)
    }

    /// Answer an inline query with the rendered note.
    ///
    /// Lookup failures are logged and leave the query unanswered; only a
    /// failed delivery is returned as an error.
    pub async fn handle_inline_query(&self, ctx: HandlerContext, query: InlineQuery) -> Result<()> {
        let answer = match self.render(&ctx.cancel, &query.query).await {
            Ok(answer) => answer,
            Err(e) if e.is_expected() => {
                debug!(error = %e, "inline query not answered");
                return Ok(());
            }
            Err(e) => {
                error!(update_id = ctx.update_id, error = %e, "inline query not answered");
                return Ok(());
            }
        };
        ctx.transport
            .answer_inline_query(InlineAnswer::article(&query.id, answer, CACHE_TIME_SECS))
            .await
            .context("answering inline query")?;
        info!(query_id = %query.id, from = query.from.id, "inline query answered");
        Ok(())
    }
}

/// Reply to `/start` with usage instructions.
pub async fn handle_start(ctx: HandlerContext, message: Message) -> Result<()> {
    debug!(chat = message.chat.id, chat_type = %message.chat.kind, "sending usage");
    ctx.transport
        .send_message(message.chat.id, USAGE)
        .await
        .context("sending usage")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{tests::event, Event, KIND_METADATA, KIND_REACTION, KIND_TEXT_NOTE};
    use crate::relay::{tests::spawn_relay, RelayPool};
    use crate::telegram::{tests::FakeTransport, Chat, Transport, User};
    use std::time::Duration;

    const ID: &str = "d94a3f4dd87b9a3b0bed183b32e916fa29c8020107845d1752d72697fe5309a5";

    fn note() -> Event {
        let mut ev = event(ID, KIND_TEXT_NOTE, &[], "hello world");
        ev.created_at = 1_700_000_000;
        ev
    }

    fn alice() -> Event {
        event("m1", KIND_METADATA, &[], r#"{"display_name":"Alice"}"#)
    }

    fn lookup(relays: Vec<String>) -> NoteLookup {
        lookup_with(RelayPool::new(relays, None, false))
    }

    fn lookup_with(pool: RelayPool) -> NoteLookup {
        NoteLookup::new(
            QueryAggregator::new(Arc::new(pool), Duration::from_secs(5)),
            Composer::new("https://nostter.com/").unwrap(),
        )
    }

    /// `nevent1…` for `ID` carrying one relay hint.
    fn nevent_with_hint(relay: &str) -> String {
        let mut data = vec![0u8, 32];
        data.extend(hex::decode(ID).unwrap());
        data.extend([1u8, relay.len() as u8]);
        data.extend(relay.as_bytes());
        let hrp = bech32::Hrp::parse("nevent").unwrap();
        bech32::encode::<bech32::Bech32>(hrp, &data).unwrap()
    }

    fn context(transport: Arc<FakeTransport>) -> HandlerContext {
        HandlerContext {
            transport: transport as Arc<dyn Transport>,
            cancel: CancellationToken::new(),
            update_id: 1,
        }
    }

    fn query(text: &str) -> InlineQuery {
        InlineQuery {
            id: "iq".into(),
            from: User {
                id: 1,
                username: None,
            },
            query: text.into(),
            chat_type: None,
        }
    }

    #[tokio::test]
    async fn renders_note_without_engagement() {
        let relay = spawn_relay(vec![note(), alice()], true).await;
        let reference = format!("nostr:{}", nip19::encode_note(ID).unwrap());
        let answer = lookup(vec![relay])
            .render(&CancellationToken::new(), &reference)
            .await
            .unwrap();
        assert_eq!(answer.id, ID);
        assert_eq!(answer.title, "Alice: hello world");
        assert!(answer.body.contains("0 Replies 0 Reposts 0 Likes 0 Zaps"));
    }

    #[tokio::test]
    async fn counts_engagement_across_relays() {
        let r1 = spawn_relay(
            vec![
                note(),
                event("like", KIND_REACTION, &[&["e", ID]], "+"),
                event("reply", KIND_TEXT_NOTE, &[&["e", ID]], "same"),
            ],
            true,
        )
        .await;
        let r2 = spawn_relay(
            vec![alice(), event("like", KIND_REACTION, &[&["e", ID]], "+")],
            true,
        )
        .await;
        let answer = lookup(vec![r1, r2])
            .render(&CancellationToken::new(), ID)
            .await
            .unwrap();
        assert!(answer.body.contains("1 Replies 0 Reposts 1 Likes 0 Zaps"));
    }

    #[tokio::test]
    async fn relay_hints_are_queried() {
        let configured = spawn_relay(vec![], true).await;
        let hinted = spawn_relay(vec![note(), alice()], true).await;
        let pool = RelayPool::new(vec![configured], None, false).with_local_hints(true);
        let answer = lookup_with(pool)
            .render(&CancellationToken::new(), &nevent_with_hint(&hinted))
            .await
            .unwrap();
        assert_eq!(answer.title, "Alice: hello world");
    }

    #[tokio::test]
    async fn loopback_hint_is_not_contacted() {
        let configured = spawn_relay(vec![], true).await;
        let hinted = spawn_relay(vec![note(), alice()], true).await;
        let res = lookup(vec![configured])
            .render(&CancellationToken::new(), &nevent_with_hint(&hinted))
            .await;
        assert!(matches!(res, Err(LookupError::EventNotFound(id)) if id == ID));
    }

    #[tokio::test]
    async fn lookup_failures() {
        let relay = spawn_relay(vec![note()], true).await;
        let lookup = lookup(vec![relay]);
        let cancel = CancellationToken::new();
        assert!(matches!(
            lookup.render(&cancel, "not a reference").await,
            Err(LookupError::InvalidReference(_))
        ));
        let missing = "a".repeat(64);
        assert!(matches!(
            lookup.render(&cancel, &missing).await,
            Err(LookupError::EventNotFound(id)) if id == missing
        ));
        assert!(matches!(
            lookup.render(&cancel, ID).await,
            Err(LookupError::AuthorNotFound(_))
        ));
    }

    #[tokio::test]
    async fn answers_inline_query() {
        let relay = spawn_relay(vec![note(), alice()], true).await;
        let (transport, _feed) = FakeTransport::new();
        let transport = Arc::new(transport);
        lookup(vec![relay])
            .handle_inline_query(context(transport.clone()), query(ID))
            .await
            .unwrap();
        let answers = transport.answers.lock().unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].inline_query_id, "iq");
        assert_eq!(answers[0].cache_time, CACHE_TIME_SECS);
        assert_eq!(answers[0].results[0].title, "Alice: hello world");
        assert_eq!(answers[0].results[0].input_message_content.parse_mode, "HTML");
    }

    #[tokio::test]
    async fn failed_lookup_sends_no_reply() {
        let relay = spawn_relay(vec![note()], true).await;
        let (transport, _feed) = FakeTransport::new();
        let transport = Arc::new(transport);
        let lookup = lookup(vec![relay]);
        for input in ["not a reference", "", ID] {
            lookup
                .handle_inline_query(context(transport.clone()), query(input))
                .await
                .unwrap();
        }
        assert!(transport.answers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_replies_with_usage() {
        let (transport, _feed) = FakeTransport::new();
        let transport = Arc::new(transport);
        let message = Message {
            chat: Chat {
                id: 42,
                kind: "private".into(),
            },
            text: "/start".into(),
        };
        handle_start(context(transport.clone()), message).await.unwrap();
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![(42, USAGE.to_string())]
        );
    }
}
