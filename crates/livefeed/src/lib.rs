//! Resilient, resumable push streams of JSON samples.
//!
//! A backend keeps one HTTP response (or WebSocket) open forever and pushes
//! one JSON value per line, optionally wrapped in chunked framing. This
//! crate turns that single-shot request into a durable subscription:
//!
//! - [`ParserBuffer`], [`ChunkParser`] and [`JsonPerLineParser`] decode the
//!   framing incrementally, never assuming a read lines up with a unit.
//! - [`PersistentConnection`] reconnects with multiplicative backoff, and
//!   [`PersistentConnectionPair`] swaps in a replacement before dropping the
//!   active request.
//! - [`StreamClient`] advances a [`ResumeCursor`] past every decoded
//!   [`Point`] and carries it into the next reconnect URL.
//! - [`stream_data`] runs all of it on Tokio with a pluggable [`Transport`].
//!
//! The connection and client types perform no I/O. They queue commands and
//! events that a driver drains with `poll_output`, which keeps them
//! deterministic under test.
//!
//! ```rust
//! use livefeed::{ClientOutput, Command, StreamClient, StreamDescriptor, StreamOptions,
//!     TransportEvent, encode_chunks};
//! use url::Url;
//!
//! let descriptor = StreamDescriptor::new("cpu", Url::parse("http://feed.test/cpu").unwrap());
//! let mut client = StreamClient::from_options(descriptor, &StreamOptions::default());
//! client.start(1_000.0);
//!
//! let token = std::iter::from_fn(|| client.poll_output())
//!     .find_map(|output| match output {
//!         ClientOutput::Command(Command::Open { token, url }) => {
//!             assert_eq!(url.as_str(), "http://feed.test/cpu?since=1000");
//!             Some(token)
//!         }
//!         _ => None,
//!     })
//!     .unwrap();
//!
//! let body = encode_chunks([r#"{"x":1005,"y":2}"#.to_owned() + "\n"]);
//! client.handle_transport(token, TransportEvent::Data(body.into()));
//! let points: Vec<_> = std::iter::from_fn(|| client.poll_output())
//!     .filter_map(|output| match output {
//!         ClientOutput::Point(point) => Some(point),
//!         ClientOutput::Command(_) => None,
//!     })
//!     .collect();
//! assert_eq!(points.len(), 1);
//! assert_eq!(points[0].x, 1005.0);
//! ```

#![allow(missing_docs)]

mod backoff;
mod buffer;
mod chunk;
mod client;
mod connection;
mod cursor;
mod decoder;
mod error;
mod event;
mod json_lines;
mod options;
mod pair;
mod point;
mod runtime;
mod series;
mod transport;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "websocket")]
mod websocket;

#[cfg(any(test, feature = "fuzzing"))]
#[doc(hidden)]
pub mod chunk_utils;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use buffer::{ParserBuffer, escape_for_logging};
pub use chunk::{
    ChunkEvent, ChunkIter, ChunkParser, ChunkState, MAX_LENGTH_LINE, encode_chunk, encode_chunks,
    encode_terminator,
};
pub use client::{ClientOutput, StreamClient, StreamConnection, StreamDescriptor, StreamId};
pub use connection::{Connection, ConnectionState, PersistentConnection};
pub use cursor::{CountCursor, ResumeCursor, SINCE_PARAM, SinceCursor, with_query_param};
pub use decoder::{DecodeIter, DecodedEvent, Decoder};
pub use error::{Error, FramingError, TransportError};
pub use event::{Command, ConnectionEvent, Output, Token, TransportEvent};
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use json_lines::{DEFAULT_SEPARATOR, JsonIter, JsonPerLineParser, JsonState};
pub use options::{BufferOptions, Framing, ReconnectOptions, ResumePolicy, StreamOptions};
pub use pair::PersistentConnectionPair;
pub use point::{Point, PointValue, decode_points};
pub use runtime::{StreamHandle, StreamPoint, stream_data};
pub use series::{Retention, SeriesStore, SeriesWindow};
pub use transport::{Transport, TransportSink};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
