//! A single long-lived request that keeps itself alive.

use std::collections::VecDeque;

use url::Url;

use crate::{
    backoff::Backoff,
    error::TransportError,
    event::{Command, ConnectionEvent, Output, Token, TransportEvent},
    options::ReconnectOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    ReconnectScheduled,
}

/// The surface the stream client needs from a connection, implemented by
/// both [`PersistentConnection`] and
/// [`PersistentConnectionPair`](crate::PersistentConnectionPair).
///
/// Connections perform no I/O themselves. Work for the driver and events for
/// the owner are queued and drained with [`poll_output`](Self::poll_output)
/// after every call.
pub trait Connection {
    /// Drops any current request, resets the backoff and connects to `url`
    /// immediately.
    fn connect(&mut self, url: Url);

    /// Sets the target of the next (re)connect without touching the current
    /// request.
    fn set_url(&mut self, url: Url);

    fn url(&self) -> Option<&Url>;

    /// Forces a reconnect after the current backoff delay. Does nothing while
    /// a reconnect is already pending.
    ///
    /// # Panics
    ///
    /// Panics if no URL was ever set.
    fn reconnect(&mut self);

    /// Releases the request and cancels any pending reconnect. Emits no
    /// events and is idempotent.
    fn disconnect(&mut self);

    /// Like [`disconnect`](Self::disconnect), and restores the base backoff.
    fn reset(&mut self);

    fn is_connecting(&self) -> bool;
    fn is_connected(&self) -> bool;
    fn is_reconnecting(&self) -> bool;

    fn handle_transport(&mut self, token: Token, event: TransportEvent);
    fn handle_timer(&mut self, token: Token);

    fn poll_output(&mut self) -> Option<Output>;
}

/// One request at a time against a mutable URL, with backoff-driven
/// reconnects.
///
/// Data is surfaced as soon as the transport reports it, long before the
/// request finishes. When the stream ends or fails, an `End` or `Error` event
/// is emitted and a reconnect is scheduled after the current backoff delay,
/// until [`disconnect`](Connection::disconnect) is called.
#[derive(Debug)]
pub struct PersistentConnection {
    slot: u8,
    auto_reconnect: bool,
    url: Option<Url>,
    backoff: Backoff,
    next_seq: u64,
    request: Option<Token>,
    timer: Option<Token>,
    connected: bool,
    outputs: VecDeque<Output>,
}

impl PersistentConnection {
    #[must_use]
    pub fn new(options: ReconnectOptions) -> Self {
        Self::with_slot(0, options)
    }

    /// A connection whose tokens carry `slot`.
    #[must_use]
    pub fn with_slot(slot: u8, options: ReconnectOptions) -> Self {
        Self {
            slot,
            auto_reconnect: true,
            url: None,
            backoff: Backoff::new(options),
            next_seq: 0,
            request: None,
            timer: None,
            connected: false,
            outputs: VecDeque::new(),
        }
    }

    /// A connection that reports `End`/`Error` but leaves the retry decision
    /// to its owner.
    pub(crate) fn managed(slot: u8, options: ReconnectOptions) -> Self {
        Self {
            auto_reconnect: false,
            ..Self::with_slot(slot, options)
        }
    }

    #[must_use]
    pub fn slot(&self) -> u8 {
        self.slot
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.connected {
            ConnectionState::Connected
        } else if self.request.is_some() {
            ConnectionState::Connecting
        } else if self.timer.is_some() {
            ConnectionState::ReconnectScheduled
        } else {
            ConnectionState::Idle
        }
    }

    /// Delay the next scheduled reconnect will use.
    #[must_use]
    pub fn reconnect_delay(&self) -> core::time::Duration {
        self.backoff.current()
    }

    fn next_token(&mut self) -> Token {
        let token = Token {
            slot: self.slot,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        token
    }

    fn emit(&mut self, output: impl Into<Output>) {
        self.outputs.push_back(output.into());
    }

    fn establish(&mut self) {
        assert!(!self.connected, "establishing while already connected");
        assert!(self.request.is_none(), "establishing over a live request");
        let Some(url) = self.url.clone() else {
            panic!("establishing without a URL");
        };

        tracing::info!(slot = self.slot, %url, "connecting");
        self.emit(ConnectionEvent::Connecting);

        let token = self.next_token();
        self.request = Some(token);
        self.emit(Command::Open { token, url });
    }

    /// Releases the request and the reconnect timer. Reports `error`, or
    /// `End` if a stream was being served.
    fn drop_connection(&mut self, error: Option<TransportError>) {
        let was_connected = self.connected;
        self.connected = false;

        if let Some(token) = self.timer.take() {
            self.emit(Command::CancelTimer { token });
        }
        if let Some(token) = self.request.take() {
            self.emit(Command::Abort { token });
        }

        if let Some(error) = error {
            tracing::error!(slot = self.slot, %error, "connection error");
            self.emit(ConnectionEvent::Error(error));
        } else if was_connected {
            tracing::warn!(slot = self.slot, "stream ended");
            self.emit(ConnectionEvent::End);
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.next_delay();
        let token = self.next_token();
        self.timer = Some(token);

        tracing::warn!(
            slot = self.slot,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "will reconnect"
        );
        self.emit(Command::StartTimer { token, delay });
        self.emit(ConnectionEvent::ReconnectScheduled { delay });
    }

    fn mark_connected(&mut self) {
        if self.connected {
            return;
        }
        self.connected = true;
        self.backoff.reset();
        tracing::info!(slot = self.slot, "connected");
        self.emit(ConnectionEvent::Connected);
    }

    fn stream_failed(&mut self, error: Option<TransportError>) {
        self.drop_connection(error);
        if self.auto_reconnect {
            self.schedule_reconnect();
        }
    }
}

impl Connection for PersistentConnection {
    fn connect(&mut self, url: Url) {
        self.drop_connection(None);
        self.url = Some(url);
        self.backoff.reset();
        self.establish();
    }

    fn set_url(&mut self, url: Url) {
        self.url = Some(url);
    }

    fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    fn reconnect(&mut self) {
        assert!(self.url.is_some(), "reconnect without a URL");
        if self.timer.is_some() {
            return;
        }
        self.drop_connection(None);
        self.schedule_reconnect();
    }

    fn disconnect(&mut self) {
        self.connected = false;
        if let Some(token) = self.timer.take() {
            self.emit(Command::CancelTimer { token });
        }
        if let Some(token) = self.request.take() {
            self.emit(Command::Abort { token });
        }
    }

    fn reset(&mut self) {
        self.disconnect();
        self.backoff.reset();
    }

    fn is_connecting(&self) -> bool {
        self.request.is_some() && !self.connected
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_reconnecting(&self) -> bool {
        self.timer.is_some()
    }

    fn handle_transport(&mut self, token: Token, event: TransportEvent) {
        if self.request != Some(token) {
            tracing::trace!(slot = self.slot, %token, "ignoring event for stale request");
            return;
        }

        match event {
            TransportEvent::Opened => self.mark_connected(),
            TransportEvent::Data(data) => {
                self.mark_connected();
                if !data.is_empty() {
                    self.emit(ConnectionEvent::Data(data));
                }
            }
            TransportEvent::End if self.connected => self.stream_failed(None),
            TransportEvent::End => self.stream_failed(Some(TransportError::ClosedBeforeOpen)),
            TransportEvent::Error(error) => self.stream_failed(Some(error)),
        }
    }

    fn handle_timer(&mut self, token: Token) {
        if self.timer != Some(token) {
            return;
        }
        self.timer = None;
        if self.connected {
            return;
        }
        tracing::warn!(slot = self.slot, "reconnecting");
        self.emit(ConnectionEvent::Reconnecting);
        self.establish();
    }

    fn poll_output(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn drain(conn: &mut PersistentConnection) -> Vec<Output> {
        core::iter::from_fn(|| conn.poll_output()).collect()
    }

    fn opened_token(outputs: &[Output]) -> Token {
        outputs
            .iter()
            .find_map(|o| match o {
                Output::Command(Command::Open { token, .. }) => Some(*token),
                _ => None,
            })
            .expect("no open command")
    }

    fn timer_token(outputs: &[Output]) -> (Token, Duration) {
        outputs
            .iter()
            .find_map(|o| match o {
                Output::Command(Command::StartTimer { token, delay }) => Some((*token, *delay)),
                _ => None,
            })
            .expect("no timer command")
    }

    #[test]
    fn connect_surfaces_data_immediately() {
        let mut conn = PersistentConnection::new(ReconnectOptions::default());
        conn.connect(url("http://feed.test/a"));
        let outputs = drain(&mut conn);
        let token = opened_token(&outputs);
        assert_eq!(outputs[0], Output::Event(ConnectionEvent::Connecting));
        assert!(conn.is_connecting());
        assert_eq!(conn.state(), ConnectionState::Connecting);

        conn.handle_transport(token, TransportEvent::Data(Bytes::from_static(b"ab")));
        assert_eq!(
            drain(&mut conn),
            [
                Output::Event(ConnectionEvent::Connected),
                Output::Event(ConnectionEvent::Data(Bytes::from_static(b"ab"))),
            ]
        );
        assert!(conn.is_connected());
    }

    #[test]
    fn end_schedules_reconnect_with_growing_delay() {
        let mut conn = PersistentConnection::new(ReconnectOptions::default());
        conn.connect(url("http://feed.test/a"));

        let mut delays = Vec::new();
        for _ in 0..3 {
            let token = opened_token(&drain(&mut conn));
            conn.handle_transport(token, TransportEvent::Error(TransportError::Status(503)));
            let outputs = drain(&mut conn);
            assert!(outputs.contains(&Output::Event(ConnectionEvent::Error(
                TransportError::Status(503)
            ))));
            let (timer, delay) = timer_token(&outputs);
            assert!(conn.is_reconnecting());
            delays.push(delay.as_millis());
            conn.handle_timer(timer);
        }
        assert_eq!(delays, [2000, 2200, 2420]);

        let token = opened_token(&drain(&mut conn));
        conn.handle_transport(token, TransportEvent::Opened);
        assert_eq!(conn.reconnect_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn end_before_open_is_an_error() {
        let mut conn = PersistentConnection::new(ReconnectOptions::default());
        conn.connect(url("http://feed.test/a"));
        let token = opened_token(&drain(&mut conn));
        conn.handle_transport(token, TransportEvent::End);
        let outputs = drain(&mut conn);
        assert!(outputs.contains(&Output::Event(ConnectionEvent::Error(
            TransportError::ClosedBeforeOpen
        ))));
    }

    #[test]
    fn reconnect_does_not_double_schedule() {
        let mut conn = PersistentConnection::new(ReconnectOptions::default());
        conn.connect(url("http://feed.test/a"));
        let token = opened_token(&drain(&mut conn));
        conn.handle_transport(token, TransportEvent::Opened);
        drain(&mut conn);

        conn.reconnect();
        let outputs = drain(&mut conn);
        assert!(outputs.contains(&Output::Command(Command::Abort { token })));
        assert!(outputs.contains(&Output::Event(ConnectionEvent::End)));
        timer_token(&outputs);

        conn.reconnect();
        assert!(drain(&mut conn).is_empty());
    }

    #[test]
    fn set_url_targets_the_next_attempt() {
        let mut conn = PersistentConnection::new(ReconnectOptions::default());
        conn.connect(url("http://feed.test/a?since=1"));
        let token = opened_token(&drain(&mut conn));
        conn.set_url(url("http://feed.test/a?since=2"));
        assert!(conn.is_connecting());

        conn.handle_transport(token, TransportEvent::End);
        let (timer, _) = timer_token(&drain(&mut conn));
        conn.handle_timer(timer);
        let outputs = drain(&mut conn);
        assert!(outputs.iter().any(|o| matches!(
            o,
            Output::Command(Command::Open { url, .. }) if url.as_str() == "http://feed.test/a?since=2"
        )));
    }

    #[test]
    fn disconnect_is_silent_and_final() {
        let mut conn = PersistentConnection::new(ReconnectOptions::default());
        conn.connect(url("http://feed.test/a"));
        let token = opened_token(&drain(&mut conn));
        conn.handle_transport(token, TransportEvent::Opened);
        drain(&mut conn);

        conn.disconnect();
        assert_eq!(
            drain(&mut conn),
            [Output::Command(Command::Abort { token })]
        );
        conn.disconnect();
        assert!(drain(&mut conn).is_empty());

        conn.handle_transport(token, TransportEvent::Data(Bytes::from_static(b"late")));
        conn.handle_transport(token, TransportEvent::End);
        assert!(drain(&mut conn).is_empty());
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut conn = PersistentConnection::new(ReconnectOptions::default());
        conn.connect(url("http://feed.test/a"));
        let token = opened_token(&drain(&mut conn));
        conn.handle_transport(token, TransportEvent::End);
        let (timer, _) = timer_token(&drain(&mut conn));

        conn.disconnect();
        assert_eq!(
            drain(&mut conn),
            [Output::Command(Command::CancelTimer { token: timer })]
        );
        conn.handle_timer(timer);
        assert!(drain(&mut conn).is_empty());
    }

    #[test]
    #[should_panic(expected = "reconnect without a URL")]
    fn reconnect_requires_url() {
        PersistentConnection::new(ReconnectOptions::default()).reconnect();
    }
}
