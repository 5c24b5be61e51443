//! Relay connections used to answer one-shot queries.

use std::{
    net::{Ipv4Addr, Ipv6Addr},
    time::Duration,
};

use anyhow::{anyhow, Result};
use futures_util::{future::join_all, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::{
    event::{verify_event, Event},
    filter::Filter,
};

/// Upper bound for the `CLOSE` handshake once a subscription is finished.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Relay hints taken from one user supplied reference.
pub const MAX_RELAY_HINTS: usize = 3;

type RelaySocket = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Configured relay set plus the options used to reach it.
#[derive(Debug, Clone)]
pub struct RelayPool {
    relays: Vec<String>,
    tor_socks: Option<String>,
    verify_sig: bool,
    allow_local_hints: bool,
}

/// Relay-to-client message, reduced to what a one-shot query cares about.
#[derive(Debug, PartialEq)]
enum RelayMessage {
    Event(Box<Event>),
    Eose,
    Closed(String),
    Notice(String),
    Ignored,
}

impl RelayPool {
    pub fn new(relays: Vec<String>, tor_socks: Option<String>, verify_sig: bool) -> Self {
        Self {
            relays,
            tor_socks,
            verify_sig,
            allow_local_hints: false,
        }
    }

    /// Accept `ws://` hints and hints pointing at loopback or private hosts.
    pub fn with_local_hints(mut self, allow: bool) -> Self {
        self.allow_local_hints = allow;
        self
    }

    /// Configured relays in configuration order.
    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// Configured relays followed by any hinted relay not already present.
    ///
    /// Hints come from anonymous user input, so at most `MAX_RELAY_HINTS`
    /// are taken and only public `wss://` hosts qualify unless local hints
    /// are allowed.
    pub fn relays_with(&self, hints: &[String]) -> Vec<String> {
        let mut relays = self.relays.clone();
        let mut taken = 0;
        for hint in hints {
            if taken == MAX_RELAY_HINTS {
                debug!(limit = MAX_RELAY_HINTS, "relay hint limit reached");
                break;
            }
            let hint = hint.trim();
            let known = relays
                .iter()
                .any(|r| r.trim_end_matches('/') == hint.trim_end_matches('/'));
            if hint.is_empty() || known {
                continue;
            }
            if self.hint_allowed(hint) {
                relays.push(hint.to_string());
                taken += 1;
            } else {
                debug!(relay = %hint, "ignoring relay hint");
            }
        }
        relays
    }

    fn hint_allowed(&self, hint: &str) -> bool {
        let Ok(url) = Url::parse(hint) else {
            return false;
        };
        if self.allow_local_hints {
            return matches!(url.scheme(), "ws" | "wss") && url.host().is_some();
        }
        if url.scheme() != "wss" {
            return false;
        }
        match url.host() {
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                domain != "localhost" && !domain.ends_with(".localhost")
            }
            Some(Host::Ipv4(ip)) => is_public_v4(ip),
            Some(Host::Ipv6(ip)) => is_public_v6(ip),
            None => false,
        }
    }

    /// Try to open a connection to every configured relay, logging failures.
    ///
    /// Returns the number of relays that accepted a connection.
    pub async fn probe(&self, timeout: Duration) -> usize {
        let attempts = self.relays.iter().map(|url| async move {
            let connect = connect_ws(url, self.tor_socks.as_deref());
            match tokio::time::timeout(timeout, connect).await {
                Ok(Ok(mut ws)) => {
                    let _ = ws.close(None).await;
                    info!(relay = %url, "relay reachable");
                    true
                }
                Ok(Err(e)) => {
                    warn!(relay = %url, error = %e, "failed to add relay");
                    false
                }
                Err(_) => {
                    warn!(relay = %url, "failed to add relay: connection timed out");
                    false
                }
            }
        });
        join_all(attempts).await.into_iter().filter(|ok| *ok).count()
    }

    /// Run one subscription on `url` and forward matching events to `tx`.
    ///
    /// Returns once the relay reports end of stored events, closes the
    /// subscription or socket, `cancel` fires, or the receiver is dropped.
    /// The result is the number of forwarded events.
    pub async fn fetch(
        &self,
        url: &str,
        sub_id: &str,
        filter: &Filter,
        tx: &mpsc::Sender<Event>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut ws = tokio::select! {
            _ = cancel.cancelled() => return Ok(0),
            ws = connect_ws(url, self.tor_socks.as_deref()) => ws?,
        };
        let req = json!(["REQ", sub_id, Value::Object(filter.to_json())]);
        ws.send(Message::Text(req.to_string())).await?;

        let mut forwarded = 0;
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = ws.next() => msg,
            };
            let Some(msg) = msg else { break };
            match msg? {
                Message::Text(txt) => match parse_relay_message(&txt, sub_id) {
                    RelayMessage::Event(ev) => {
                        if !filter.matches(&ev) {
                            debug!(relay = %url, id = %ev.id, "dropping event outside filter");
                            continue;
                        }
                        if self.verify_sig {
                            if let Err(e) = verify_event(&ev) {
                                debug!(
                                    relay = %url,
                                    id = %ev.id,
                                    error = %e,
                                    "dropping unverified event"
                                );
                                continue;
                            }
                        }
                        if tx.send(*ev).await.is_err() {
                            break;
                        }
                        forwarded += 1;
                    }
                    RelayMessage::Eose => break,
                    RelayMessage::Closed(reason) => {
                        warn!(relay = %url, %reason, "relay closed subscription");
                        break;
                    }
                    RelayMessage::Notice(notice) => debug!(relay = %url, %notice, "relay notice"),
                    RelayMessage::Ignored => {}
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        let close = json!(["CLOSE", sub_id]);
        let _ = tokio::time::timeout(CLOSE_GRACE, async {
            let _ = ws.send(Message::Text(close.to_string())).await;
            let _ = ws.close(None).await;
        })
        .await;
        Ok(forwarded)
    }
}

/// Decode a relay text frame, keeping only messages for `sub_id`.
fn parse_relay_message(txt: &str, sub_id: &str) -> RelayMessage {
    let Ok(val) = serde_json::from_str::<Value>(txt) else {
        return RelayMessage::Ignored;
    };
    let Some(arr) = val.as_array() else {
        return RelayMessage::Ignored;
    };
    let for_us = arr.get(1).and_then(|v| v.as_str()) == Some(sub_id);
    match arr.first().and_then(|v| v.as_str()) {
        Some("EVENT") if for_us && arr.len() >= 3 => {
            match serde_json::from_value::<Event>(arr[2].clone()) {
                Ok(ev) => RelayMessage::Event(Box::new(ev)),
                Err(_) => RelayMessage::Ignored,
            }
        }
        Some("EOSE") if for_us => RelayMessage::Eose,
        Some("CLOSED") if for_us => RelayMessage::Closed(
            arr.get(2)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
        Some("NOTICE") => RelayMessage::Notice(
            arr.get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
        _ => RelayMessage::Ignored,
    }
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> Result<RelaySocket> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10, carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64))
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(v4);
    }
    let first = ip.segments()[0];
    !(ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local, fe80::/10 link-local
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
