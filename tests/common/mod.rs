#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use secp256k1::{Keypair, Message, Secp256k1};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

/// Event signed by the key `[key; 32]`.
pub fn signed_event(key: u8, kind: u32, tags: Vec<Vec<String>>, content: &str) -> Value {
    let secp = Secp256k1::new();
    let kp = Keypair::from_seckey_slice(&secp, &[key; 32]).unwrap();
    let pubkey = hex::encode(kp.x_only_public_key().0.serialize());
    let created_at = 1_700_000_000u64;
    let arr = json!([0, pubkey, created_at, kind, tags, content]);
    let hash = Sha256::digest(serde_json::to_vec(&arr).unwrap());
    let msg = Message::from_digest_slice(&hash).unwrap();
    let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
    json!({
        "id": hex::encode(hash),
        "pubkey": pubkey,
        "kind": kind,
        "created_at": created_at,
        "tags": tags,
        "content": content,
        "sig": hex::encode(sig.as_ref()),
    })
}

pub fn e_tag(id: &str) -> Vec<Vec<String>> {
    vec![vec!["e".to_string(), id.to_string()]]
}

/// `note1…` form of a hex event id.
pub fn note_ref(id: &str) -> String {
    let hrp = bech32::Hrp::parse("note").unwrap();
    bech32::encode::<bech32::Bech32>(hrp, &hex::decode(id).unwrap()).unwrap()
}

/// Local relay that answers every `REQ` with all of `events` and `EOSE`.
pub async fn spawn_relay(events: Vec<Value>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let events = events.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let TMsg::Text(txt) = msg else { continue };
                    let val: Value = serde_json::from_str(&txt).unwrap();
                    if val[0] != "REQ" {
                        continue;
                    }
                    for ev in &events {
                        let frame = json!(["EVENT", val[1], ev]).to_string();
                        if ws.send(TMsg::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                    let _ = ws.send(TMsg::Text(json!(["EOSE", val[1]]).to_string())).await;
                }
            });
        }
    });
    format!("ws://{addr}")
}

pub fn write_env(dir: &TempDir, content: &str) -> String {
    let env_path = dir.path().join("env");
    fs::write(&env_path, content).unwrap();
    env_path.to_str().unwrap().to_string()
}
