use thiserror::Error;

/// A violation of the chunk or payload framing.
///
/// Framing errors are local to one decoder and always recoverable: the
/// stream client resets its decoders and reconnects.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("expected hexadecimal chunk length, got \"{token}\" near \"{context}\"")]
    InvalidChunkLength { token: String, context: String },
    #[error("chunk length line longer than {limit} bytes near \"{context}\"")]
    LengthLineTooLong { limit: usize, context: String },
    #[error("expected \\r\\n (CRLF), got \"{found}\" near \"{context}\"")]
    MissingChunkTerminator { found: String, context: String },
    #[error("expected a valid JSON value, got \"{record}\" near \"{context}\"")]
    InvalidJson {
        record: String,
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A failure reported by the transport underneath a connection.
///
/// Transport errors are never fatal to a subscription; they feed the
/// reconnect policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("unexpected response status {0}")]
    Status(u16),
    #[error("http transport error: {0}")]
    Http(String),
    #[error("websocket transport error: {0}")]
    WebSocket(String),
    #[error("stream closed before the response was accepted")]
    ClosedBeforeOpen,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid stream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
