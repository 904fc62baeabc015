//! Protocol envelopes and message codes
//!
//! One envelope shape serves both directions: a request (ping) carries the
//! sender's signature over the canonical payload, a response (pong) is
//! signed by whoever answers. The canonical signing payload is the JSON
//! object `{body, message, sender}` with sorted keys and the signature
//! omitted.

use crate::{NetError, Result};
use ballot_core::codec;
use ballot_core::wallet::Wallet;
use ballot_ledger::{Block, Transaction};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Message {
    GetBlockchainHeight,
    CloseConnection,
    GetMissingBlocks,
    GetBlock,
    Register,
    Error,
    Response,
    TransactionReceived,
    NoAction,
    ForgeBlock,
    BlockForged,
    Disconnect,
}

impl Message {
    pub fn as_str(self) -> &'static str {
        match self {
            Message::GetBlockchainHeight => "get-blockchain-height",
            Message::CloseConnection => "close-connection",
            Message::GetMissingBlocks => "get-missing-blocks",
            Message::GetBlock => "get-block",
            Message::Register => "register",
            Message::Error => "error",
            Message::Response => "response",
            Message::TransactionReceived => "transaction-received",
            Message::NoAction => "no-action",
            Message::ForgeBlock => "forge-block",
            Message::BlockForged => "block-forged",
            Message::Disconnect => "disconnect",
        }
    }

    /// Response-kind messages resolve a pending request instead of being
    /// routed to a handler.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            Message::Response | Message::Error | Message::NoAction | Message::Disconnect
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Message,

    #[serde(default)]
    pub body: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl Envelope {
    /// A request envelope with a typed body. Signed separately before
    /// sending.
    pub fn request<T: Serialize>(message: Message, body: &T) -> Result<Envelope> {
        Ok(Envelope {
            message,
            body: serde_json::to_value(body)?,
            signature: None,
            sender: None,
        })
    }

    pub fn response<T: Serialize>(body: &T) -> Result<Envelope> {
        Self::request(Message::Response, body)
    }

    pub fn error(code: &str, detail: &str) -> Envelope {
        Envelope {
            message: Message::Error,
            body: serde_json::json!(ErrorBody {
                code: code.to_string(),
                message: detail.to_string(),
            }),
            signature: None,
            sender: None,
        }
    }

    pub fn no_action() -> Envelope {
        Envelope {
            message: Message::NoAction,
            body: serde_json::Value::Null,
            signature: None,
            sender: None,
        }
    }

    pub fn disconnect() -> Envelope {
        Envelope {
            message: Message::Disconnect,
            body: serde_json::Value::Null,
            signature: None,
            sender: None,
        }
    }

    /// The canonical signing payload: `{body, message, sender}` with the
    /// signature left out.
    fn signable(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("body".to_string(), self.body.clone());
        map.insert(
            "message".to_string(),
            serde_json::Value::String(self.message.as_str().to_string()),
        );
        if let Some(sender) = &self.sender {
            map.insert(
                "sender".to_string(),
                serde_json::Value::String(sender.clone()),
            );
        }
        serde_json::Value::Object(map)
    }

    /// Canonical bytes of the signing payload.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        Ok(codec::canonical_json(&self.signable())?)
    }

    /// Stamp the sender and sign the canonical payload.
    pub fn sign(&mut self, wallet: &Wallet) -> Result<()> {
        self.sender = Some(BASE64.encode(wallet.public_key()));
        let signature = wallet
            .sign(&self.signable())
            .map_err(|e| NetError::BadRequest(e.to_string()))?;
        self.signature = Some(BASE64.encode(signature));
        Ok(())
    }

    /// Whether the envelope carries a valid signature by its sender.
    pub fn verified(&self) -> bool {
        let (Some(sender), Some(signature)) = (&self.sender, &self.signature) else {
            return false;
        };
        let Ok(public_key) = BASE64.decode(sender.as_bytes()) else {
            return false;
        };
        let Ok(raw_signature) = BASE64.decode(signature.as_bytes()) else {
            return false;
        };
        ballot_core::verify(&self.signable(), &raw_signature, &public_key)
    }

    /// Decode the body variant selected by the message code.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| NetError::BadRequest(format!("{} body: {}", self.message, e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResult {
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeightBody {
    pub height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgeBlockBody {
    pub height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockForgedBody {
    pub height: i64,
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceivedBody {
    pub transaction: Transaction,
}

/// Request body for `get-block` and `get-missing-blocks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashBody {
    #[serde(with = "codec::base64_bytes")]
    pub hash: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocksBody {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBody {
    pub block: Option<Block>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_codes_are_kebab_case() {
        let raw = serde_json::to_string(&Message::GetBlockchainHeight).unwrap();
        assert_eq!(raw, "\"get-blockchain-height\"");
        let back: Message = serde_json::from_str("\"block-forged\"").unwrap();
        assert_eq!(back, Message::BlockForged);
    }

    #[test]
    fn test_reply_classification() {
        assert!(Message::Response.is_reply());
        assert!(Message::Error.is_reply());
        assert!(Message::NoAction.is_reply());
        assert!(Message::Disconnect.is_reply());
        assert!(!Message::Register.is_reply());
        assert!(!Message::BlockForged.is_reply());
    }

    #[test]
    fn test_signable_key_order() {
        let mut envelope =
            Envelope::request(Message::ForgeBlock, &ForgeBlockBody { height: 3 }).unwrap();
        envelope.sender = Some("c2VuZGVy".to_string());
        let raw = envelope.signable_bytes().unwrap();
        assert_eq!(
            raw,
            br#"{"body":{"height":3},"message":"forge-block","sender":"c2VuZGVy"}"#
        );
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let wallet = Wallet::generate();
        let mut envelope =
            Envelope::request(Message::ForgeBlock, &ForgeBlockBody { height: 1 }).unwrap();
        envelope.sign(&wallet).unwrap();
        assert!(envelope.verified());

        let mut tampered = envelope.clone();
        tampered.body = serde_json::json!(ForgeBlockBody { height: 2 });
        assert!(!tampered.verified());
    }

    #[test]
    fn test_unsigned_envelope_does_not_verify() {
        let envelope = Envelope::no_action();
        assert!(!envelope.verified());
    }

    #[test]
    fn test_parse_body_dispatches_on_type() {
        let envelope =
            Envelope::request(Message::Register, &RegisterBody { node_id: "n".into() }).unwrap();
        let body: RegisterBody = envelope.parse_body().unwrap();
        assert_eq!(body.node_id, "n");
        assert!(envelope.parse_body::<HeightBody>().is_err());
    }
}
