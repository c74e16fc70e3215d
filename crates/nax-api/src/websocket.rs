//! WebSocket stream to the device.
//!
//! Upgrades an authenticated [`Session`] to the device's streaming
//! endpoint and splits the socket into a write half ([`StreamSink`]) and
//! a read half ([`StreamSource`]) that decodes frames through
//! [`FrameDecoder`].
//!
//! # Example
//!
//! ```rust,ignore
//! use nax_api::{Session, TransportConfig, RESYNC_REQUEST, connect_stream};
//! use nax_api::websocket::stream_url;
//!
//! let transport = TransportConfig::default();
//! let session = Session::new(base_url.clone(), &transport)?;
//! session.login("admin", &password).await?;
//!
//! let (mut sink, mut source) = connect_stream(&stream_url(&base_url)?, &session, &transport).await?;
//! sink.send_text(RESYNC_REQUEST).await?;
//!
//! while let Some(frames) = source.next_frames().await? {
//!     for frame in frames {
//!         println!("{frame:?}");
//!     }
//! }
//! ```

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};
use url::Url;

use crate::codec::{Frame, FrameDecoder};
use crate::error::Error;
use crate::session::{Session, TOKEN_REQUEST_HEADER};
use crate::transport::TransportConfig;

/// Fixed streaming endpoint on the device.
pub const STREAM_PATH: &str = "/websockify";

/// First outbound message after connecting: asks the device to emit its
/// full current state as the first frame.
pub const RESYNC_REQUEST: &str = "/Device/";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Derive the stream URL from the device base URL.
///
/// `https://host` becomes `wss://host/websockify`; plain `http` bases map
/// to `ws`.
pub fn stream_url(base_url: &Url) -> Result<Url, Error> {
    let scheme = if base_url.scheme() == "http" { "ws" } else { "wss" };
    let host = base_url
        .host_str()
        .ok_or_else(|| Error::WebSocketConnect(format!("no host in {base_url}")))?;
    let url = match base_url.port() {
        Some(port) => format!("{scheme}://{host}:{port}{STREAM_PATH}"),
        None => format!("{scheme}://{host}{STREAM_PATH}"),
    };
    Ok(Url::parse(&url)?)
}

/// Open the stream, presenting the session's cookie, `Origin` and
/// anti-forgery token on the upgrade request.
///
/// TLS follows `transport.tls`; the default accepts the device's
/// self-signed certificate.
pub async fn connect_stream(
    url: &Url,
    session: &Session,
    transport: &TransportConfig,
) -> Result<(StreamSink, StreamSource), Error> {
    info!(url = %url, "Connecting to WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri).with_header("Origin", session.origin());
    if let Some(cookie) = session.cookie_header() {
        request = request.with_header("Cookie", cookie);
    }
    if let Some(token) = session.csrf_token() {
        request = request.with_header(TOKEN_REQUEST_HEADER, token);
    }

    let connector = transport.build_tls_config()?.map(Connector::Rustls);
    // tungstenite 0.26 has no permessage-deflate; the device accepts
    // uncompressed frames when the extension is not offered.
    let (ws_stream, response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    debug!(status = %response.status(), "WebSocket connected");

    let (write, read) = ws_stream.split();
    Ok((
        StreamSink { inner: write },
        StreamSource {
            inner: read,
            decoder: FrameDecoder::new(),
        },
    ))
}

// ── Write half ───────────────────────────────────────────────────────

/// Outbound half of the stream. Callers serialize access to it.
pub struct StreamSink {
    inner: SplitSink<WsStream, Message>,
}

impl StreamSink {
    /// Send a raw text message (used for the resync request).
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), Error> {
        self.inner
            .send(Message::text(text.into()))
            .await
            .map_err(|e| Error::WebSocketClosed(e.to_string()))
    }

    /// Send a partial document as a single JSON text message.
    pub async fn send_json(&mut self, value: &Value) -> Result<(), Error> {
        let text = serde_json::to_string(value)?;
        trace!(bytes = text.len(), "sending fragment");
        self.send_text(text).await
    }

    /// Send a keep-alive ping.
    pub async fn ping(&mut self) -> Result<(), Error> {
        self.inner
            .send(Message::Ping(Default::default()))
            .await
            .map_err(|e| Error::WebSocketClosed(e.to_string()))
    }

    /// Send a close frame and flush.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.inner
            .close()
            .await
            .map_err(|e| Error::WebSocketClosed(e.to_string()))
    }
}

// ── Read half ────────────────────────────────────────────────────────

/// Inbound half of the stream, with frame reassembly.
pub struct StreamSource {
    inner: SplitStream<WsStream>,
    decoder: FrameDecoder,
}

impl StreamSource {
    /// Wait until at least one complete frame is decoded.
    ///
    /// Returns `Ok(None)` when the device closes the stream cleanly and
    /// `Err` on a transport error. Cancel-safe: partial data stays in the
    /// decoder between calls.
    pub async fn next_frames(&mut self) -> Result<Option<Vec<Frame>>, Error> {
        loop {
            let values = match self.inner.next().await {
                Some(Ok(Message::Text(text))) => self.decoder.push(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => self.decoder.push(&data),
                Some(Ok(Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
                    } else {
                        info!("WebSocket close frame received (no payload)");
                    }
                    return Ok(None);
                }
                Some(Ok(_)) => {
                    // Ping / Pong / raw Frame: tungstenite answers pings itself
                    trace!("WebSocket control frame");
                    continue;
                }
                Some(Err(e)) => return Err(Error::WebSocketClosed(e.to_string())),
                None => {
                    info!("WebSocket stream ended");
                    return Ok(None);
                }
            };

            if !values.is_empty() {
                return Ok(Some(values.into_iter().map(Frame::classify).collect()));
            }
        }
    }
}
