//! Nostr event model.

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Profile metadata (`set_metadata`).
pub const KIND_METADATA: u32 = 0;
/// Plain text note; counted as a reply when it references another note.
pub const KIND_TEXT_NOTE: u32 = 1;
/// Repost of another note.
pub const KIND_REPOST: u32 = 6;
/// Reaction such as `+` or an emoji.
pub const KIND_REACTION: u32 = 7;
/// Zap receipt published by a lightning service after payment.
pub const KIND_ZAP_RECEIPT: u32 = 9735;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The ones this bot reads are:
///
/// - `e` – links to another event ID (replies, reactions, reposts, zaps)
/// - `bolt11` – the paid lightning invoice carried by a zap receipt
///
/// Each tag is kept verbatim so uncommon or custom tags survive signature
/// verification, e.g. `["e", "aa11", "wss://relay", "root"]` becomes
/// `Tag(vec!["e".into(), "aa11".into(), "wss://relay".into(), "root".into()])`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Tag type, e.g. `e`.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First data element following the tag type.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Nostr event as received from a relay.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "b0c1...",
///   "kind": 7,
///   "created_at": 1700000000,
///   "tags": [["e", "bb22"], ["p", "b0c1..."]],
///   "content": "+",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `9735`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags such as `e` (event reference) or `bolt11`.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Value of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.name() == Some(name))
            .and_then(Tag::value)
    }

    /// Whether any `e` tag points at `event_id`.
    pub fn references(&self, event_id: &str) -> bool {
        self.tags
            .iter()
            .any(|tag| tag.name() == Some("e") && tag.value() == Some(event_id))
    }
}

/// Recompute the Nostr event hash from its fields.
pub fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Verify an event's ID and Schnorr signature.
pub fn verify_event(ev: &Event) -> Result<()> {
    let hash = event_hash(ev)?;
    let calc_id = hex::encode(hash);
    if calc_id != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(&hash)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}
