//! Event envelopes and the wire codec shared by every streaming channel.
//!
//! Every frame is one JSON object discriminated by a `type` field. Chat
//! channels carry [`ChatEvent`]s from the server and [`ChatRequest`]s from the
//! client; ingestion channels carry [`IngestionEvent`]s from the server only.

use crate::error::StreamError;
use crate::types::{DocumentStatus, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events pushed by the server on a chat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    /// One incremental fragment of the answer.
    Token { content: String },
    /// Citations for the in-progress answer.
    Sources { sources: Vec<Source> },
    /// End of the turn.
    Done,
}

impl ChatEvent {
    pub fn token(content: impl Into<String>) -> Self {
        ChatEvent::Token {
            content: content.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::Token { .. } => "token",
            ChatEvent::Sources { .. } => "sources",
            ChatEvent::Done => "done",
        }
    }
}

/// The single client-to-server frame on a chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Status update pushed by the server on an ingestion channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionEvent {
    #[serde(rename = "type")]
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl IngestionEvent {
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status,
            content: None,
            progress: None,
            error_message: None,
        }
    }

    pub fn processing(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::status(DocumentStatus::Processing)
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Self::status(DocumentStatus::Failed)
        }
    }
}

/// The kind of a streaming channel, which fixes its codec and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Chat,
    Ingest,
}

impl ChannelKind {
    /// Only chat channels accept client frames.
    pub fn is_writable(self) -> bool {
        matches!(self, ChannelKind::Chat)
    }

    pub fn prefix(self) -> &'static str {
        match self {
            ChannelKind::Chat => "chat",
            ChannelKind::Ingest => "ingest",
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Chat(ChatEvent),
    Ingestion(IngestionEvent),
}

/// Decode one frame according to the channel kind.
///
/// Fails with `MalformedEvent` when the text is not a JSON object, has no
/// string `type` field, or the `type` is not one the channel understands.
pub fn decode(kind: ChannelKind, text: &str) -> Result<Envelope, StreamError> {
    let value: Value = serde_json::from_str(text).map_err(|e| StreamError::MalformedEvent {
        reason: format!("invalid JSON: {}", e),
    })?;

    match value.get("type") {
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(StreamError::MalformedEvent {
                reason: "`type` discriminator is not a string".to_string(),
            });
        }
        None => {
            return Err(StreamError::MalformedEvent {
                reason: "missing `type` discriminator".to_string(),
            });
        }
    }

    let malformed = |e: serde_json::Error| StreamError::MalformedEvent {
        reason: format!("unrecognised {} event: {}", kind.prefix(), e),
    };

    match kind {
        ChannelKind::Chat => serde_json::from_value(value)
            .map(Envelope::Chat)
            .map_err(malformed),
        ChannelKind::Ingest => serde_json::from_value(value)
            .map(Envelope::Ingestion)
            .map_err(malformed),
    }
}

/// Encode a frame as compact JSON.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, StreamError> {
    serde_json::to_string(frame).map_err(|e| StreamError::MalformedEvent {
        reason: format!("cannot encode frame: {}", e),
    })
}

/// Split a newline-delimited payload into individual frames.
///
/// Blank lines are skipped; a payload without newlines yields itself.
pub fn split_frames(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_token() {
        let env = decode(ChannelKind::Chat, r#"{"type":"token","content":"Hel"}"#).unwrap();
        assert_eq!(env, Envelope::Chat(ChatEvent::token("Hel")));
    }

    #[test]
    fn test_decode_done_ignores_extra_fields() {
        let env = decode(ChannelKind::Chat, r#"{"type":"done","content":null}"#).unwrap();
        assert_eq!(env, Envelope::Chat(ChatEvent::Done));
    }

    #[test]
    fn test_decode_sources() {
        let text = r#"{"type":"sources","sources":[
            {"doc_name":"paper.pdf","page":3,"chunk_text":"...","relevance_score":0.92},
            {"doc_name":"notes.md","page":null,"chunk_text":"x","relevance_score":0.4}
        ]}"#;
        match decode(ChannelKind::Chat, text).unwrap() {
            Envelope::Chat(ChatEvent::Sources { sources }) => {
                assert_eq!(sources.len(), 2);
                assert_eq!(sources[0].page, Some(3));
                assert_eq!(sources[1].page, None);
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn test_decode_ingestion() {
        let env = decode(
            ChannelKind::Ingest,
            r#"{"type":"processing","progress":55}"#,
        )
        .unwrap();
        assert_eq!(env, Envelope::Ingestion(IngestionEvent::processing(55)));
    }

    #[test]
    fn test_decode_not_json() {
        let err = decode(ChannelKind::Chat, "{not json").unwrap_err();
        assert!(matches!(err, StreamError::MalformedEvent { .. }));
    }

    #[test]
    fn test_decode_missing_type() {
        let err = decode(ChannelKind::Chat, r#"{"content":"x"}"#).unwrap_err();
        assert_eq!(
            err,
            StreamError::MalformedEvent {
                reason: "missing `type` discriminator".into()
            }
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        assert!(decode(ChannelKind::Chat, r#"{"type":"thinking"}"#).is_err());
        // A chat event is not an ingestion event and vice versa.
        assert!(decode(ChannelKind::Ingest, r#"{"type":"token","content":"a"}"#).is_err());
        assert!(decode(ChannelKind::Chat, r#"{"type":"completed"}"#).is_err());
    }

    #[test]
    fn test_decode_non_object() {
        assert!(decode(ChannelKind::Chat, "[1,2,3]").is_err());
        assert!(decode(ChannelKind::Chat, r#"{"type":7}"#).is_err());
    }

    #[test]
    fn test_encode_request() {
        let json = encode(&ChatRequest {
            message: "What is RAG?".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"message":"What is RAG?"}"#);
    }

    #[test]
    fn test_encode_done_and_ingestion() {
        assert_eq!(encode(&ChatEvent::Done).unwrap(), r#"{"type":"done"}"#);
        assert_eq!(
            encode(&IngestionEvent::status(DocumentStatus::Completed)).unwrap(),
            r#"{"type":"completed"}"#
        );
    }

    #[test]
    fn test_split_frames() {
        let payload = "{\"type\":\"token\",\"content\":\"a\"}\n\n  {\"type\":\"done\"}  \n";
        let frames: Vec<_> = split_frames(payload).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], r#"{"type":"done"}"#);
    }

    #[test]
    fn test_channel_kind() {
        assert!(ChannelKind::Chat.is_writable());
        assert!(!ChannelKind::Ingest.is_writable());
    }
}
