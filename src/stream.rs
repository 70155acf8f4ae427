//! Transport for the machine's streaming endpoint.
//!
//! [`LocalClient`](crate::LocalClient) drives any [`Connector`]; the default
//! one speaks plain websocket through `tokio-tungstenite`.

use futures_util::StreamExt;
use log::debug;
use std::future::Future;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// A payload received from the machine, forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl StreamMessage {
    /// The payload as text, if it was sent as a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StreamMessage::Text(text) => Some(text),
            StreamMessage::Binary(_) => None,
        }
    }
}

/// Receives messages from a running subscription.
///
/// Messages arrive one at a time, in the order the machine sent them. An
/// `Err` returned from [`accept`](MessageSink::accept) is logged and the
/// subscription keeps running: it never stops delivery of later messages and
/// never surfaces from [`LocalClient::websocket_connect`](crate::LocalClient::websocket_connect).
pub trait MessageSink: Send {
    fn accept(&mut self, message: StreamMessage) -> anyhow::Result<()>;
}

impl<F> MessageSink for F
where
    F: FnMut(StreamMessage) -> anyhow::Result<()> + Send,
{
    fn accept(&mut self, message: StreamMessage) -> anyhow::Result<()> {
        self(message)
    }
}

impl MessageSink for UnboundedSender<StreamMessage> {
    fn accept(&mut self, message: StreamMessage) -> anyhow::Result<()> {
        self.send(message)
            .map_err(|_| anyhow::anyhow!("Message receiver has been dropped"))
    }
}

/// How a stream attempt or an open stream ended, other than by a message.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The connection was closed or reset.
    #[error("connection closed")]
    Closed,
    #[error("websocket protocol error: {0}")]
    Protocol(String),
    /// The connection could not be opened.
    #[error("failed to connect: {0}")]
    Connect(String),
    /// The machine answered the upgrade request with an HTTP error.
    #[error("handshake rejected with status {0}")]
    Rejected(u16),
}

/// An open stream to the machine.
pub trait Connection: Send {
    /// Next data message. `None` means the stream ended cleanly.
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Option<Result<StreamMessage, StreamError>>> + Send;

    /// Start an orderly close of the stream.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens streams to the machine.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    fn connect(
        &self,
        url: &str,
        bearer: &str,
    ) -> impl Future<Output = Result<Self::Connection, StreamError>> + Send;
}

/// Plain (non-TLS) websocket connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection;

    async fn connect(
        &self,
        url: &str,
        bearer: &str,
    ) -> Result<WebSocketConnection, StreamError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, auth_value);

        match connect_async(request).await {
            Ok((socket, _)) => Ok(WebSocketConnection { socket }),
            Err(WsError::Http(response)) => {
                Err(StreamError::Rejected(response.status().as_u16()))
            }
            Err(e) => Err(StreamError::Connect(e.to_string())),
        }
    }
}

pub struct WebSocketConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connection for WebSocketConnection {
    async fn next_message(&mut self) -> Option<Result<StreamMessage, StreamError>> {
        while let Some(frame) = self.socket.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    return Some(Ok(StreamMessage::Text(text.as_str().to_owned())))
                }
                Ok(Message::Binary(data)) => {
                    return Some(Ok(StreamMessage::Binary(data.to_vec())))
                }
                // Pings are answered by tungstenite.
                // A close frame ends the stream on the next read.
                Ok(_) => continue,
                Err(e) => return Some(Err(classify(e))),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!("Error while closing websocket: {}", e);
        }
    }
}

fn classify(err: WsError) -> StreamError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Io(_)
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => StreamError::Closed,
        other => StreamError::Protocol(other.to_string()),
    }
}
