//! Bech32 note references (`note1…`, `nevent1…`) as typed by users.

use bech32::{primitives::decode::CheckedHrpstring, Bech32, Hrp};
use thiserror::Error;

const NOTE_HRP: &str = "note";
const NEVENT_HRP: &str = "nevent";

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

#[derive(Debug, Error)]
pub enum Nip19Error {
    #[error("bech32: {0}")]
    Decode(#[from] bech32::primitives::decode::CheckedHrpstringError),
    #[error("bech32: {0}")]
    Encode(#[from] bech32::EncodeError),
    #[error("unsupported prefix {0}")]
    UnsupportedPrefix(String),
    #[error("event id must be 32 bytes, got {0}")]
    IdLength(usize),
    #[error("event id is not hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("malformed TLV entry")]
    Tlv,
}

/// Pointer to one event, optionally with relays that are known to hold it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPointer {
    /// Hex event id.
    pub id: String,
    pub relays: Vec<String>,
    pub author: Option<String>,
    pub kind: Option<u32>,
}

/// Extract an event pointer from free text.
///
/// Accepts an optional `nostr:` prefix followed by a hex id, `note1…` or
/// `nevent1…`. Anything else yields `None`.
pub fn parse_reference(input: &str) -> Option<EventPointer> {
    let input = input.trim();
    let input = input.strip_prefix("nostr:").unwrap_or(input);
    if input.len() == 64 && input.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Some(EventPointer {
            id: input.to_ascii_lowercase(),
            ..Default::default()
        });
    }
    decode_event(input).ok()
}

/// Decode a `note1…` or `nevent1…` string.
pub fn decode_event(input: &str) -> Result<EventPointer, Nip19Error> {
    let checked = CheckedHrpstring::new::<Bech32>(input)?;
    let hrp = checked.hrp().to_lowercase();
    let data: Vec<u8> = checked.byte_iter().collect();
    match hrp.as_str() {
        NOTE_HRP => Ok(EventPointer {
            id: id_from_bytes(&data)?,
            ..Default::default()
        }),
        NEVENT_HRP => decode_nevent(&data),
        _ => Err(Nip19Error::UnsupportedPrefix(hrp)),
    }
}

fn decode_nevent(mut data: &[u8]) -> Result<EventPointer, Nip19Error> {
    let mut pointer = EventPointer::default();
    let mut id = None;
    while !data.is_empty() {
        let [t, len, rest @ ..] = data else {
            return Err(Nip19Error::Tlv);
        };
        let len = *len as usize;
        if rest.len() < len {
            return Err(Nip19Error::Tlv);
        }
        let (value, tail) = rest.split_at(len);
        match *t {
            TLV_SPECIAL => id = Some(id_from_bytes(value)?),
            TLV_RELAY => {
                if let Ok(relay) = std::str::from_utf8(value) {
                    pointer.relays.push(relay.to_string());
                }
            }
            TLV_AUTHOR if value.len() == 32 => pointer.author = Some(hex::encode(value)),
            TLV_KIND => {
                let bytes: [u8; 4] = value.try_into().map_err(|_| Nip19Error::Tlv)?;
                pointer.kind = Some(u32::from_be_bytes(bytes));
            }
            // Unknown types must be ignored.
            _ => {}
        }
        data = tail;
    }
    pointer.id = id.ok_or(Nip19Error::Tlv)?;
    Ok(pointer)
}

fn id_from_bytes(bytes: &[u8]) -> Result<String, Nip19Error> {
    if bytes.len() != 32 {
        return Err(Nip19Error::IdLength(bytes.len()));
    }
    Ok(hex::encode(bytes))
}

/// Encode a hex event id as `note1…`.
pub fn encode_note(id: &str) -> Result<String, Nip19Error> {
    let bytes = hex::decode(id)?;
    if bytes.len() != 32 {
        return Err(Nip19Error::IdLength(bytes.len()));
    }
    let hrp = Hrp::parse_unchecked(NOTE_HRP);
    Ok(bech32::encode::<Bech32>(hrp, &bytes)?)
}
