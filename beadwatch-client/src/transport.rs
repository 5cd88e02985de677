use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use beadwatch_model::{ClientMessage, ServerMessage};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, Result};

pub type ServerStream =
    Pin<Box<dyn Stream<Item = Result<ServerMessage>> + Send>>;
pub type ClientSink = Pin<Box<dyn Sink<ClientMessage, Error = ClientError> + Send>>;

/// One established session: a sink for client requests and the stream of
/// server pushes. The stream ends when the server closes the session.
pub struct ClientChannel {
    pub outgoing: ClientSink,
    pub incoming: ServerStream,
}

impl fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientChannel").finish_non_exhaustive()
    }
}

/// Opens sessions to the realtime server. The agent calls this once per
/// connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<ClientChannel>;
}

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|err| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(Self { url: parsed }),
            other => Err(ClientError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {other}"),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<ClientChannel> {
        let (socket, response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| ClientError::Connect(err.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "websocket established");

        let (sink, stream) = socket.split();

        let outgoing = sink
            .sink_map_err(|err| ClientError::Transport(err.to_string()))
            .with(|message: ClientMessage| {
                future::ready(
                    message
                        .encode()
                        .map(Message::text)
                        .map_err(ClientError::from),
                )
            });

        let incoming = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => decode(ServerMessage::decode(text.as_str())),
                Ok(Message::Binary(bytes)) => decode(ServerMessage::decode_slice(&bytes)),
                Ok(_) => None,
                Err(err) => Some(Err(ClientError::Transport(err.to_string()))),
            })
        });

        Ok(ClientChannel {
            outgoing: Box::pin(outgoing),
            incoming: Box::pin(incoming),
        })
    }
}

// Frames the client cannot parse are skipped rather than ending the session.
fn decode(
    parsed: beadwatch_model::ModelResult<ServerMessage>,
) -> Option<Result<ServerMessage>> {
    match parsed {
        Ok(message) => Some(Ok(message)),
        Err(err) => {
            warn!(error = %err, "dropping undecodable server frame");
            None
        }
    }
}
