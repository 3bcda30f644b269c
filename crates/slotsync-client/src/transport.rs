//! Transport traits for the session
//!
//! A [`Connector`] opens one [`Link`] per connection attempt. The session owns
//! the link for the lifetime of that attempt and drops it before the next one,
//! so frames from a superseded connection can never reach the mirror.
//!
//! [`WsConnector`] is the WebSocket implementation. Other stacks (or an
//! in-memory pair for tests) implement the same two traits.

use crate::codec::SUBPROTOCOL;
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Opens connections to the server
pub trait Connector: Send + Sync + 'static {
    /// Connection produced by this connector
    type Link: Link;

    /// Open a connection to `url`
    ///
    /// Resolves once the transport is open, before any application record.
    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Link>> + Send;
}

/// One open, reliable, ordered connection
pub trait Link: Send + 'static {
    /// Send one frame
    fn send(&mut self, frame: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next frame
    ///
    /// Returns `None` once the peer has closed the connection. Must be
    /// cancel-safe: dropping the future loses no frame.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Vec<u8>>>> + Send;

    /// Close the connection, ignoring failures
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// WebSocket connector negotiating the `slotsync.v1` sub-protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self, url: &str) -> Result<WsLink> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (stream, response) = connect_async(request).await?;
        debug!(url, status = %response.status(), "websocket open");
        Ok(WsLink { stream })
    }
}

/// WebSocket connection carrying binary frames only
#[derive(Debug)]
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Link for WsLink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.stream.send(Message::Binary(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(frame)) => return Some(Ok(frame)),
                Ok(Message::Text(_)) => {
                    return Some(Err(Error::Transport(
                        "unexpected text frame on binary protocol".into(),
                    )))
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(other) => trace!(?other, "skipping control frame"),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
