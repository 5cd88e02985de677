use axum::extract::ws::Message;
use beadwatch_model::ServerMessage;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::messages;

/// Result of handing a frame to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The subscriber is too far behind; the frame was dropped.
    Full,
    Closed,
}

#[derive(Clone)]
pub struct Connection {
    /// Unique connection ID
    pub id: Uuid,
    /// Channel feeding this connection's socket writer
    sender: mpsc::Sender<Message>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("channel_closed", &self.sender.is_closed())
            .field("queue_capacity", &self.sender.capacity())
            .finish()
    }
}

impl Connection {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
        }
    }

    /// Enqueue an already encoded frame without waiting.
    pub fn try_send_frame(&self, frame: Message) -> Delivery {
        match self.sender.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Encode and enqueue a direct reply to this connection.
    pub fn send_message(&self, message: &ServerMessage) -> Delivery {
        match messages::server_to_websocket(message) {
            Ok(frame) => self.try_send_frame(frame),
            Err(err) => {
                tracing::error!(
                    conn_id = %self.id,
                    error = %err,
                    "failed to encode outbound message"
                );
                Delivery::Closed
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
