use crate::{Error, Result};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use rsip::SipMessage;
use std::sync::Arc;
use tokio::{
    net::TcpStream,
    sync::{mpsc::UnboundedSender, Mutex},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) const KEEPALIVE_REQUEST: &[u8] = b"\r\n\r\n";
pub(crate) const KEEPALIVE_RESPONSE: &[u8] = b"\r\n";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Frames leaving the websocket read loop.
pub enum WireEvent {
    Incoming(SipMessage),
    /// The socket dropped without us asking for it.
    Closed(String),
}

pub type WireEventSender = UnboundedSender<WireEvent>;

struct WsInner {
    write: Mutex<WsSink>,
    server: String,
    token: CancellationToken,
}

/// One secure websocket carrying SIP frames, negotiated with the `sip`
/// subprotocol. Cancelling the token tears the read loop down without a
/// `Closed` event; a server-side drop emits one.
#[derive(Clone)]
pub struct WsConnection {
    inner: Arc<WsInner>,
}

impl WsConnection {
    /// Try the configured endpoints in order and keep the first that
    /// completes the handshake.
    pub async fn open(
        servers: &[String],
        events: WireEventSender,
        token: CancellationToken,
    ) -> Result<Self> {
        let mut last_err: Option<Error> = None;
        for server in servers {
            let mut request = server.as_str().into_client_request()?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("sip"));
            match connect_async(request).await {
                Ok((stream, _response)) => {
                    let (write, read) = stream.split();
                    let conn = WsConnection {
                        inner: Arc::new(WsInner {
                            write: Mutex::new(write),
                            server: server.clone(),
                            token,
                        }),
                    };
                    info!(server = %server, "websocket connected");
                    tokio::spawn(Self::serve_loop(conn.clone(), read, events));
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(server = %server, "websocket connect failed: {}", e);
                    last_err = Some(e.into());
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| Error::Error("no websocket endpoint configured".to_string())))
    }

    pub async fn send(&self, msg: SipMessage) -> Result<()> {
        let buf = msg.to_string();
        debug!(server = %self.inner.server, "send {} bytes", buf.len());
        self.send_text(buf).await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut write = self.inner.write.lock().await;
        write.send(Message::Text(text)).await.map_err(Error::from)
    }

    pub fn close(&self) {
        self.inner.token.cancel();
    }

    async fn serve_loop(conn: WsConnection, mut read: WsSource, events: WireEventSender) {
        let token = conn.inner.token.clone();
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return,
                next = read.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => conn.handle_frame(text, &events).await,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => conn.handle_frame(text, &events).await,
                    Err(_) => info!("dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    events
                        .send(WireEvent::Closed("closed by server".to_string()))
                        .ok();
                    return;
                }
                Some(Err(e)) => {
                    events.send(WireEvent::Closed(e.to_string())).ok();
                    return;
                }
                None => {
                    events
                        .send(WireEvent::Closed("websocket stream ended".to_string()))
                        .ok();
                    return;
                }
            }
        }
    }

    async fn handle_frame(&self, text: String, events: &WireEventSender) {
        match text.as_bytes() {
            KEEPALIVE_REQUEST => {
                self.send_text(String::from_utf8_lossy(KEEPALIVE_RESPONSE).into_owned())
                    .await
                    .ok();
                return;
            }
            KEEPALIVE_RESPONSE => return,
            bytes => {
                if bytes.iter().all(|b| b.is_ascii_whitespace()) {
                    return;
                }
            }
        }

        debug!(server = %self.inner.server, "received {} bytes", text.len());
        match SipMessage::try_from(text) {
            Ok(msg) => {
                events.send(WireEvent::Incoming(msg)).ok();
            }
            Err(e) => {
                info!("error parsing SIP message: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws({})", self.inner.server)
    }
}

impl Drop for WsInner {
    fn drop(&mut self) {
        info!(server = %self.server, "dropping websocket connection");
    }
}
