//! Telegram Bot API transport.
//!
//! Only the pieces the bot uses are modelled: the long-polling update feed,
//! `getMe`, plain text replies and answering inline queries with article
//! results.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::RenderedAnswer;

/// Seconds a `getUpdates` call may block on the server.
const POLL_TIMEOUT_SECS: u64 = 60;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);
const FEED_CAPACITY: usize = 100;

/// Incoming message, trimmed to the fields handlers filter on.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    pub query: String,
    /// Type of the chat the query was sent from, when Telegram knows it.
    #[serde(default)]
    pub chat_type: Option<String>,
}

/// Update payload, one variant per shape the router understands.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Message(Message),
    InlineQuery(InlineQuery),
    /// Any shape without handlers, e.g. edited messages or callbacks.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub id: i64,
    pub kind: UpdateKind,
}

#[derive(Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    inline_query: Option<InlineQuery>,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let kind = match (raw.message, raw.inline_query) {
            (Some(msg), _) => UpdateKind::Message(msg),
            (None, Some(query)) => UpdateKind::InlineQuery(query),
            (None, None) => UpdateKind::Other,
        };
        Update {
            id: raw.update_id,
            kind,
        }
    }
}

/// `answerInlineQuery` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineAnswer {
    pub inline_query_id: String,
    pub results: Vec<ArticleResult>,
    pub cache_time: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleResult {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub title: String,
    pub input_message_content: TextContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextContent {
    pub message_text: String,
    pub parse_mode: &'static str,
    pub disable_web_page_preview: bool,
}

impl InlineAnswer {
    /// Single HTML article without link previews.
    pub fn article(inline_query_id: &str, answer: RenderedAnswer, cache_time: u32) -> Self {
        Self {
            inline_query_id: inline_query_id.to_string(),
            results: vec![ArticleResult {
                kind: "article",
                id: answer.id,
                title: answer.title,
                input_message_content: TextContent {
                    message_text: answer.body,
                    parse_mode: "HTML",
                    disable_web_page_preview: true,
                },
            }],
            cache_time,
        }
    }
}

/// Chat platform seen by the router and handlers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Long-lived feed of updates; closed when the transport stops or
    /// `cancel` fires.
    fn updates(&self, cancel: CancellationToken) -> mpsc::Receiver<Update>;

    async fn answer_inline_query(&self, answer: InlineAnswer) -> Result<()>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API client over HTTPS.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            http,
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp: ApiResponse<T> = self
            .http
            .post(format!("{}/{method}", self.base))
            .json(body)
            .send()
            .await
            .with_context(|| format!("calling {method}"))?
            .json()
            .await
            .with_context(|| format!("decoding {method} response"))?;
        if !resp.ok {
            return Err(anyhow!(
                "{method} failed: {}",
                resp.description.unwrap_or_default()
            ));
        }
        resp.result
            .ok_or_else(|| anyhow!("{method} returned no result"))
    }

    /// Username of the bot the token belongs to.
    pub async fn get_me(&self) -> Result<String> {
        let me: User = self.call("getMe", &serde_json::json!({})).await?;
        Ok(me.username.unwrap_or_default())
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message", "inline_query"],
        });
        let raw: Vec<RawUpdate> = self.call("getUpdates", &body).await?;
        Ok(raw.into_iter().map(Update::from).collect())
    }

    async fn poll(self, tx: mpsc::Sender<Update>, cancel: CancellationToken) {
        let mut offset = 0;
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.get_updates(offset) => batch,
            };
            match batch {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.id + 1);
                        if tx.send(update).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "polling updates failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }
        }
        info!("update feed stopped");
    }
}

#[async_trait]
impl Transport for TelegramClient {
    fn updates(&self, cancel: CancellationToken) -> mpsc::Receiver<Update> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        tokio::spawn(self.clone().poll(tx, cancel));
        rx
    }

    async fn answer_inline_query(&self, answer: InlineAnswer) -> Result<()> {
        debug!(query = %answer.inline_query_id, "answering inline query");
        let _: bool = self.call("answerInlineQuery", &answer).await?;
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory transport: updates are pushed by the test, answers recorded.
    pub(crate) struct FakeTransport {
        feed: Mutex<Option<mpsc::Receiver<Update>>>,
        pub(crate) answers: Mutex<Vec<InlineAnswer>>,
        pub(crate) sent: Mutex<Vec<(i64, String)>>,
    }

    impl FakeTransport {
        pub(crate) fn new() -> (Self, mpsc::Sender<Update>) {
            let (tx, rx) = mpsc::channel(16);
            let transport = Self {
                feed: Mutex::new(Some(rx)),
                answers: Mutex::new(vec![]),
                sent: Mutex::new(vec![]),
            };
            (transport, tx)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn updates(&self, _cancel: CancellationToken) -> mpsc::Receiver<Update> {
            self.feed.lock().unwrap().take().expect("feed taken twice")
        }

        async fn answer_inline_query(&self, answer: InlineAnswer) -> Result<()> {
            self.answers.lock().unwrap().push(answer);
            Ok(())
        }

        async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    pub(crate) fn inline_query(update_id: i64, query: &str) -> Update {
        Update {
            id: update_id,
            kind: UpdateKind::InlineQuery(InlineQuery {
                id: format!("q{update_id}"),
                from: User {
                    id: 1,
                    username: None,
                },
                query: query.into(),
                chat_type: Some("private".into()),
            }),
        }
    }

    pub(crate) fn text_message(update_id: i64, text: &str) -> Update {
        Update {
            id: update_id,
            kind: UpdateKind::Message(Message {
                chat: Chat {
                    id: 1,
                    kind: "private".into(),
                },
                text: text.into(),
            }),
        }
    }

    #[test]
    fn decodes_update_shapes() {
        let raw: Vec<RawUpdate> = serde_json::from_value(serde_json::json!([
            {"update_id": 1, "message": {"message_id": 5, "chat": {"id": 9, "type": "private"}, "text": "/start"}},
            {"update_id": 2, "inline_query": {"id": "iq", "from": {"id": 3, "is_bot": false, "first_name": "A"}, "query": "nostr:note1", "offset": "", "chat_type": "sender"}},
            {"update_id": 3, "edited_message": {"message_id": 6}},
            {"update_id": 4, "message": {"message_id": 7, "chat": {"id": 9, "type": "group"}, "photo": []}}
        ]))
        .unwrap();
        let updates: Vec<Update> = raw.into_iter().map(Update::from).collect();
        assert_eq!(updates[0], text_message_with(1, 9, "/start"));
        match &updates[1].kind {
            UpdateKind::InlineQuery(q) => {
                assert_eq!(q.id, "iq");
                assert_eq!(q.query, "nostr:note1");
                assert_eq!(q.chat_type.as_deref(), Some("sender"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(updates[2].kind, UpdateKind::Other);
        match &updates[3].kind {
            UpdateKind::Message(m) => assert_eq!(m.text, ""),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn text_message_with(update_id: i64, chat: i64, text: &str) -> Update {
        Update {
            id: update_id,
            kind: UpdateKind::Message(Message {
                chat: Chat {
                    id: chat,
                    kind: "private".into(),
                },
                text: text.into(),
            }),
        }
    }

    #[test]
    fn article_answer_wire_format() {
        let answer = InlineAnswer::article(
            "iq",
            RenderedAnswer {
                id: "ev".into(),
                title: "Alice: hi".into(),
                body: "<b>Alice</b>".into(),
            },
            600,
        );
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            serde_json::json!({
                "inline_query_id": "iq",
                "results": [{
                    "type": "article",
                    "id": "ev",
                    "title": "Alice: hi",
                    "input_message_content": {
                        "message_text": "<b>Alice</b>",
                        "parse_mode": "HTML",
                        "disable_web_page_preview": true
                    }
                }],
                "cache_time": 600
            })
        );
    }

    #[test]
    fn api_error_response_without_result() {
        let resp: ApiResponse<User> = serde_json::from_value(serde_json::json!({
            "ok": false,
            "error_code": 401,
            "description": "Unauthorized"
        }))
        .unwrap();
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.description.as_deref(), Some("Unauthorized"));

        let resp: ApiResponse<User> = serde_json::from_value(serde_json::json!({
            "ok": true,
            "result": {"id": 7, "is_bot": true, "first_name": "Lens", "username": "lens_bot"}
        }))
        .unwrap();
        assert_eq!(resp.result.map(|u| u.id), Some(7));
    }

    #[test]
    fn client_builds_method_base() {
        let client = TelegramClient::new("https://api.telegram.org/", "123:abc").unwrap();
        assert_eq!(client.base, "https://api.telegram.org/bot123:abc");
    }
}
