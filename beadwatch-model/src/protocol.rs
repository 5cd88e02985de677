//! Wire protocol spoken over the realtime WebSocket.
//!
//! Every frame is a JSON text frame shaped `{"event": <name>, "data": <payload>}`.
//! Event names keep the `repo:*` / `issue:*` vocabulary so existing browser
//! clients can talk to the server unchanged.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::events::{ChangeEvent, ChangeKind, RepoSyncEvent};
use crate::ids::RepoId;

/// Messages a client may send to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "repo:subscribe")]
    Subscribe(RepoId),
    #[serde(rename = "repo:unsubscribe")]
    Unsubscribe(RepoId),
}

impl ClientMessage {
    pub fn repo_id(&self) -> &RepoId {
        match self {
            ClientMessage::Subscribe(repo_id)
            | ClientMessage::Unsubscribe(repo_id) => repo_id,
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ModelError::Encode)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(ModelError::Decode)
    }

    pub fn decode_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(ModelError::Decode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedPayload {
    pub repo_id: RepoId,
    pub client_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribedPayload {
    pub repo_id: RepoId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "issue:changed")]
    Changed(ChangeEvent),
    #[serde(rename = "issue:created")]
    Created(ChangeEvent),
    #[serde(rename = "issue:deleted")]
    Deleted(ChangeEvent),
    #[serde(rename = "repo:sync")]
    Sync(RepoSyncEvent),
    #[serde(rename = "repo:subscribed")]
    Subscribed(SubscribedPayload),
    #[serde(rename = "repo:unsubscribed")]
    Unsubscribed(UnsubscribedPayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerMessage {
    /// Wrap a finalized change in the message variant matching its kind.
    pub fn for_change(event: ChangeEvent) -> Self {
        match event.kind() {
            ChangeKind::Created => ServerMessage::Created(event),
            ChangeKind::Modified => ServerMessage::Changed(event),
            ChangeKind::Deleted => ServerMessage::Deleted(event),
        }
    }

    /// Repository the message concerns, if any.
    pub fn repo_id(&self) -> Option<&RepoId> {
        match self {
            ServerMessage::Changed(event)
            | ServerMessage::Created(event)
            | ServerMessage::Deleted(event) => Some(event.repo_id()),
            ServerMessage::Sync(sync) => Some(&sync.repo_id),
            ServerMessage::Subscribed(payload) => Some(&payload.repo_id),
            ServerMessage::Unsubscribed(payload) => Some(&payload.repo_id),
            ServerMessage::Error(_) => None,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Changed(_) => "issue:changed",
            ServerMessage::Created(_) => "issue:created",
            ServerMessage::Deleted(_) => "issue:deleted",
            ServerMessage::Sync(_) => "repo:sync",
            ServerMessage::Subscribed(_) => "repo:subscribed",
            ServerMessage::Unsubscribed(_) => "repo:unsubscribed",
            ServerMessage::Error(_) => "error",
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ModelError::Encode)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(ModelError::Decode)
    }

    pub fn decode_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(ModelError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn subscribe_frame_shape() {
        let raw = r#"{"event":"repo:subscribe","data":"web-abc123"}"#;
        let msg = ClientMessage::decode(raw).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe(RepoId::from("web-abc123")));
        assert_eq!(msg.encode().unwrap(), raw);
    }

    #[test]
    fn unknown_client_event_is_rejected() {
        let err = ClientMessage::decode(r#"{"event":"repo:nuke","data":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, ModelError::Decode(_)));
        assert!(ClientMessage::decode("not json").is_err());
    }

    #[test]
    fn change_kind_selects_variant() {
        let make = |kind| {
            ChangeEvent::new(
                kind,
                RepoId::from("r"),
                None,
                PathBuf::from("/r/.beads/issues.jsonl"),
                Utc::now(),
            )
        };

        assert_eq!(
            ServerMessage::for_change(make(ChangeKind::Created)).event_name(),
            "issue:created"
        );
        assert_eq!(
            ServerMessage::for_change(make(ChangeKind::Modified)).event_name(),
            "issue:changed"
        );
        assert_eq!(
            ServerMessage::for_change(make(ChangeKind::Deleted)).event_name(),
            "issue:deleted"
        );
    }

    #[test]
    fn subscribed_ack_uses_camel_case() {
        let msg = ServerMessage::Subscribed(SubscribedPayload {
            repo_id: RepoId::from("r"),
            client_count: 2,
        });
        let value: serde_json::Value =
            serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["event"], "repo:subscribed");
        assert_eq!(value["data"]["repoId"], "r");
        assert_eq!(value["data"]["clientCount"], 2);
    }

    #[test]
    fn error_code_is_optional() {
        let msg = ServerMessage::decode(
            r#"{"event":"error","data":{"message":"boom"}}"#,
        )
        .unwrap();
        assert_eq!(msg, ServerMessage::Error(ErrorPayload::new("boom")));
        assert_eq!(msg.repo_id(), None);
    }
}
