use axum::extract::ws::Message;
use beadwatch_model::{ClientMessage, ModelError, ServerMessage};

/// Encode an outbound message as a JSON text frame.
pub fn server_to_websocket(
    message: &ServerMessage,
) -> Result<Message, ModelError> {
    Ok(Message::text(message.encode()?))
}

/// Decode an inbound data frame. Control frames yield `None`.
pub fn websocket_to_client(
    message: &Message,
) -> Option<Result<ClientMessage, ModelError>> {
    match message {
        Message::Text(text) => Some(ClientMessage::decode(text.as_str())),
        Message::Binary(bin) => Some(ClientMessage::decode_slice(bin.as_ref())),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beadwatch_model::{ErrorPayload, RepoId};

    #[test]
    fn text_frames_decode() {
        let frame = Message::text(r#"{"event":"repo:subscribe","data":"r1"}"#);
        let decoded = websocket_to_client(&frame).unwrap().unwrap();
        assert_eq!(decoded, ClientMessage::Subscribe(RepoId::from("r1")));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let frame = Message::text("not json");
        assert!(matches!(
            websocket_to_client(&frame),
            Some(Err(ModelError::Decode(_)))
        ));
    }

    #[test]
    fn control_frames_are_skipped() {
        assert!(websocket_to_client(&Message::Ping(Default::default())).is_none());
    }

    #[test]
    fn outbound_is_text() {
        let frame = server_to_websocket(&ServerMessage::Error(
            ErrorPayload::new("nope").with_code("invalid_message"),
        ))
        .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        assert_eq!(
            text.as_str(),
            r#"{"event":"error","data":{"message":"nope","code":"invalid_message"}}"#
        );
    }
}
