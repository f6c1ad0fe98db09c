use bytes::{BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::{
    error::TransportError,
    json_lines::DEFAULT_SEPARATOR,
    transport::{Transport, TransportSink},
};

/// Receives units as WebSocket messages.
///
/// Messages carry no separator of their own, so each text or binary message
/// is forwarded followed by `separator`, which must match the decoder's
/// record separator.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    separator: Bytes,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::with_separator(DEFAULT_SEPARATOR)
    }
}

impl WebSocketTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_separator(separator: impl AsRef<[u8]>) -> Self {
        Self {
            separator: Bytes::copy_from_slice(separator.as_ref()),
        }
    }

    fn frame(&self, payload: &[u8]) -> Bytes {
        let mut unit = BytesMut::with_capacity(payload.len() + self.separator.len());
        unit.put_slice(payload);
        unit.put_slice(&self.separator);
        unit.freeze()
    }
}

impl Transport for WebSocketTransport {
    fn open(
        &self,
        url: Url,
        sink: TransportSink,
    ) -> impl Future<Output = ()> + Send + 'static {
        let transport = self.clone();
        async move {
            let (mut stream, _response) = match connect_async(url.as_str()).await {
                Ok(connected) => connected,
                Err(err) => {
                    sink.error(TransportError::WebSocket(err.to_string()));
                    return;
                }
            };
            if !sink.opened() {
                return;
            }

            while let Some(message) = stream.next().await {
                let delivered = match message {
                    Ok(Message::Text(text)) => sink.data(transport.frame(text.as_bytes())),
                    Ok(Message::Binary(payload)) => sink.data(transport.frame(&payload)),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => true,
                    Err(err) => {
                        sink.error(TransportError::WebSocket(err.to_string()));
                        return;
                    }
                };
                if !delivered {
                    return;
                }
            }
            sink.end();
        }
    }
}
