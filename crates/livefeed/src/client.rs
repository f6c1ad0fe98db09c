//! The sans-IO stream client: one subscription, one connection, one decoder.

use std::{collections::VecDeque, fmt, sync::Arc};

use url::Url;

use crate::{
    connection::{Connection, PersistentConnection},
    cursor::ResumeCursor,
    decoder::{DecodedEvent, Decoder},
    error::Error,
    event::{Command, ConnectionEvent, Output, Token, TransportEvent},
    options::{ResumePolicy, StreamOptions},
    pair::PersistentConnectionPair,
    point::{Point, decode_points},
};

/// Logical identifier of a stream, attached to every forwarded point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Arc<str>);

impl StreamId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub id: StreamId,
    /// Base data URL. The resume parameter is added on every (re)connect.
    pub url: Url,
}

impl StreamDescriptor {
    #[must_use]
    pub fn new(id: impl Into<StreamId>, url: Url) -> Self {
        Self { id: id.into(), url }
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` does not parse.
    pub fn parse(id: impl Into<StreamId>, url: &str) -> Result<Self, Error> {
        Ok(Self::new(id, Url::parse(url)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientOutput {
    Command(Command),
    Point(Point),
}

/// The connection flavour picked by [`StreamOptions::gap_free`].
#[derive(Debug)]
pub enum StreamConnection {
    Single(PersistentConnection),
    Pair(PersistentConnectionPair),
}

impl StreamConnection {
    #[must_use]
    pub fn from_options(options: &StreamOptions) -> Self {
        if options.gap_free {
            Self::Pair(PersistentConnectionPair::new(options.reconnect))
        } else {
            Self::Single(PersistentConnection::new(options.reconnect))
        }
    }

    fn inner(&self) -> &dyn Connection {
        match self {
            Self::Single(conn) => conn,
            Self::Pair(pair) => pair,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Connection {
        match self {
            Self::Single(conn) => conn,
            Self::Pair(pair) => pair,
        }
    }
}

impl Connection for StreamConnection {
    fn connect(&mut self, url: Url) {
        self.inner_mut().connect(url);
    }
    fn set_url(&mut self, url: Url) {
        self.inner_mut().set_url(url);
    }
    fn url(&self) -> Option<&Url> {
        self.inner().url()
    }
    fn reconnect(&mut self) {
        self.inner_mut().reconnect();
    }
    fn disconnect(&mut self) {
        self.inner_mut().disconnect();
    }
    fn reset(&mut self) {
        self.inner_mut().reset();
    }
    fn is_connecting(&self) -> bool {
        self.inner().is_connecting()
    }
    fn is_connected(&self) -> bool {
        self.inner().is_connected()
    }
    fn is_reconnecting(&self) -> bool {
        self.inner().is_reconnecting()
    }
    fn handle_transport(&mut self, token: Token, event: TransportEvent) {
        self.inner_mut().handle_transport(token, event);
    }
    fn handle_timer(&mut self, token: Token) {
        self.inner_mut().handle_timer(token);
    }
    fn poll_output(&mut self) -> Option<Output> {
        self.inner_mut().poll_output()
    }
}

/// Wires a connection, the decoder chain and a resume cursor into one
/// subscription.
///
/// Every decoded point advances the cursor, and the advanced cursor is
/// written into the connection's URL so the next reconnect resumes right
/// after the last forwarded point. Decoder errors and stream ends trigger a
/// reconnect; the decoder is reset whenever a new connection takes over.
pub struct StreamClient<C> {
    descriptor: StreamDescriptor,
    connection: C,
    decoder: Decoder,
    resume: ResumePolicy,
    cursor: Option<Box<dyn ResumeCursor>>,
    dedupe: bool,
    last_key: Option<f64>,
    stopped: bool,
    outputs: VecDeque<ClientOutput>,
}

impl StreamClient<StreamConnection> {
    /// A client using a single connection or a gap-free pair, as configured.
    #[must_use]
    pub fn from_options(descriptor: StreamDescriptor, options: &StreamOptions) -> Self {
        Self::new(descriptor, options, StreamConnection::from_options(options))
    }
}

impl<C: Connection> StreamClient<C> {
    #[must_use]
    pub fn new(descriptor: StreamDescriptor, options: &StreamOptions, connection: C) -> Self {
        Self {
            descriptor,
            connection,
            decoder: Decoder::with_options(options.framing, &options.separator, options.buffer)
                .skip_blank_records(options.skip_blank_records),
            resume: options.resume.clone(),
            cursor: None,
            dedupe: options.dedupe,
            last_key: None,
            stopped: false,
            outputs: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.descriptor.id
    }

    #[must_use]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Current value of the resume parameter, once started.
    #[must_use]
    pub fn cursor_value(&self) -> Option<String> {
        self.cursor.as_ref().map(|cursor| cursor.value())
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Seeds the resume cursor relative to `now_ms` (milliseconds since the
    /// Unix epoch) and connects.
    pub fn start(&mut self, now_ms: f64) {
        if self.stopped {
            return;
        }
        let cursor = self.resume.cursor(now_ms);
        let url = cursor.apply_to(&self.descriptor.url);
        self.cursor = Some(cursor);

        tracing::info!(stream = %self.descriptor.id, %url, "starting stream");
        self.connection.connect(url);
        self.drain_connection();
    }

    pub fn handle_transport(&mut self, token: Token, event: TransportEvent) {
        if self.stopped {
            return;
        }
        self.connection.handle_transport(token, event);
        self.drain_connection();
    }

    pub fn handle_timer(&mut self, token: Token) {
        if self.stopped {
            return;
        }
        self.connection.handle_timer(token);
        self.drain_connection();
    }

    /// Disconnects for good. Pending points are discarded; only the commands
    /// releasing resources remain to be polled. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        tracing::info!(stream = %self.descriptor.id, "stopping stream");
        self.stopped = true;
        self.outputs
            .retain(|output| matches!(output, ClientOutput::Command(_)));
        self.connection.disconnect();
        while let Some(output) = self.connection.poll_output() {
            if let Output::Command(command) = output {
                self.outputs.push_back(ClientOutput::Command(command));
            }
        }
        self.decoder.reset();
    }

    pub fn poll_output(&mut self) -> Option<ClientOutput> {
        self.outputs.pop_front()
    }

    fn drain_connection(&mut self) {
        while let Some(output) = self.connection.poll_output() {
            match output {
                Output::Command(command) => self.outputs.push_back(ClientOutput::Command(command)),
                Output::Event(event) => self.on_connection_event(event),
            }
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        let stream = &self.descriptor.id;
        match event {
            ConnectionEvent::Connected | ConnectionEvent::Reconnected => {
                tracing::debug!(%stream, "resetting decoder for new connection");
                self.decoder.reset();
            }
            ConnectionEvent::Data(data) => self.on_data(&data),
            ConnectionEvent::End => {
                tracing::warn!(%stream, "stream ended");
                self.connection.reconnect();
            }
            ConnectionEvent::Error(error) => {
                tracing::error!(%stream, %error, "stream error");
                self.connection.reconnect();
            }
            ConnectionEvent::Connecting
            | ConnectionEvent::Reconnecting
            | ConnectionEvent::ReconnectScheduled { .. } => {
                tracing::debug!(%stream, ?event, "connection progress");
            }
        }
    }

    fn on_data(&mut self, data: &[u8]) {
        let events: Vec<_> = self.decoder.write(data).collect();
        let mut restart = false;
        let mut advanced = false;

        for event in events {
            match event {
                Ok(DecodedEvent::Value(value)) => {
                    for point in decode_points(&value) {
                        advanced |= self.accept(point);
                    }
                }
                Ok(DecodedEvent::End) => {
                    tracing::debug!(stream = %self.descriptor.id, "terminating chunk");
                    restart = true;
                }
                Err(error) => {
                    tracing::error!(stream = %self.descriptor.id, %error, "framing error");
                    restart = true;
                }
            }
        }

        if advanced {
            if let Some(cursor) = &self.cursor {
                self.connection.set_url(cursor.apply_to(&self.descriptor.url));
            }
        }
        if restart {
            self.connection.reconnect();
        }
    }

    /// Forwards `point` unless it is a replay. Returns whether the cursor
    /// moved.
    fn accept(&mut self, point: Point) -> bool {
        if self.dedupe && point.x.is_finite() {
            if self.last_key.is_some_and(|last| point.x <= last) {
                tracing::trace!(stream = %self.descriptor.id, x = point.x, "dropping replayed point");
                return false;
            }
            self.last_key = Some(point.x);
        }

        let moved = match &mut self.cursor {
            Some(cursor) => {
                cursor.advance(&point);
                true
            }
            None => false,
        };
        self.outputs.push_back(ClientOutput::Point(point));
        moved
    }
}

impl<C: fmt::Debug> fmt::Debug for StreamClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("descriptor", &self.descriptor)
            .field("connection", &self.connection)
            .field("cursor", &self.cursor)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}
