//! Gap-free reconnects with two alternating connections.
//!
//! While the front connection serves data, the back connection establishes
//! the replacement. Once the back one is connected the roles swap and the
//! old front is torn down, so the stream is never without a live request
//! during a planned reconnect.

use std::collections::VecDeque;

use url::Url;

use crate::{
    connection::{Connection, PersistentConnection},
    event::{ConnectionEvent, Output, Token, TransportEvent},
    options::ReconnectOptions,
};

#[derive(Debug)]
pub struct PersistentConnectionPair {
    slots: [PersistentConnection; 2],
    front: usize,
    url: Option<Url>,
    connected: bool,
    outputs: VecDeque<Output>,
}

impl PersistentConnectionPair {
    #[must_use]
    pub fn new(options: ReconnectOptions) -> Self {
        Self {
            slots: [
                PersistentConnection::managed(0, options),
                PersistentConnection::managed(1, options),
            ],
            front: 1,
            url: None,
            connected: false,
            outputs: VecDeque::new(),
        }
    }

    /// Slot index currently serving data.
    #[must_use]
    pub fn front_slot(&self) -> usize {
        self.front
    }

    fn back_index(&self) -> usize {
        1 - self.front
    }

    fn back(&mut self) -> &mut PersistentConnection {
        let back = self.back_index();
        &mut self.slots[back]
    }

    /// Starts a fresh back connection unless one is already on its way.
    fn restart_back(&mut self) {
        let back = self.back_index();
        if self.slots[back].is_connecting() || self.slots[back].is_reconnecting() {
            return;
        }
        let Some(url) = self.url.clone() else {
            return;
        };

        tracing::debug!(back, "restarting back connection");
        let conn = &mut self.slots[back];
        conn.set_url(url);
        conn.reconnect();
    }

    /// Moves slot outputs into the pair's queue, reacting to slot events,
    /// until both slots are quiescent.
    fn pump(&mut self) {
        loop {
            let mut progressed = false;
            for index in 0..self.slots.len() {
                while let Some(output) = self.slots[index].poll_output() {
                    progressed = true;
                    match output {
                        Output::Command(command) => self.outputs.push_back(command.into()),
                        Output::Event(event) => self.on_slot_event(index, event),
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn on_slot_event(&mut self, index: usize, event: ConnectionEvent) {
        if index == self.front {
            self.on_front_event(index, event);
        } else {
            self.on_back_event(index, event);
        }
    }

    fn on_front_event(&mut self, index: usize, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Data(data) => self.emit(ConnectionEvent::Data(data)),
            ConnectionEvent::End | ConnectionEvent::Error(_) if self.connected => {
                tracing::warn!(front = index, "front connection lost");
                self.connected = false;
                self.emit(event);
                self.restart_back();
            }
            ConnectionEvent::End | ConnectionEvent::Error(_) => self.emit(event),
            // Only the back slot ever (re)connects.
            ConnectionEvent::Connecting
            | ConnectionEvent::Connected
            | ConnectionEvent::Reconnected
            | ConnectionEvent::Reconnecting
            | ConnectionEvent::ReconnectScheduled { .. } => {}
        }
    }

    fn on_back_event(&mut self, index: usize, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connecting if self.connected => {
                tracing::info!(front = self.front, back = index, "reconnecting");
                self.emit(ConnectionEvent::Reconnecting);
            }
            ConnectionEvent::Connecting => {
                tracing::info!(front = self.front, back = index, "connecting");
                self.emit(ConnectionEvent::Connecting);
            }
            ConnectionEvent::Connected => {
                let old_front = self.front;
                tracing::info!(front = index, back = old_front, "swapping connections");
                self.front = index;
                if self.connected {
                    self.slots[old_front].disconnect();
                    self.emit(ConnectionEvent::Reconnected);
                } else {
                    self.connected = true;
                    self.emit(ConnectionEvent::Connected);
                }
            }
            ConnectionEvent::End | ConnectionEvent::Error(_) => {
                self.emit(event);
                let conn = &mut self.slots[index];
                if let Some(url) = &self.url {
                    conn.set_url(url.clone());
                }
                conn.reconnect();
            }
            ConnectionEvent::ReconnectScheduled { .. } => self.emit(event),
            ConnectionEvent::Data(_) => {
                tracing::warn!(slot = index, "dropping data from inactive connection");
            }
            ConnectionEvent::Reconnecting | ConnectionEvent::Reconnected => {}
        }
    }

    fn emit(&mut self, event: ConnectionEvent) {
        self.outputs.push_back(Output::Event(event));
    }
}

impl Connection for PersistentConnectionPair {
    /// Connects the back slot immediately. The pair reports `Connected` once
    /// it takes over.
    fn connect(&mut self, url: Url) {
        self.url = Some(url.clone());
        tracing::debug!(back = self.back_index(), "connect");
        self.back().connect(url);
        self.pump();
    }

    /// Also retargets the back slot, whose reconnect is the next one.
    fn set_url(&mut self, url: Url) {
        self.back().set_url(url.clone());
        self.url = Some(url);
    }

    fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Establishes a replacement in the back slot after its backoff delay,
    /// keeping the front connection serving meanwhile.
    fn reconnect(&mut self) {
        assert!(self.url.is_some(), "reconnect without a URL");
        self.restart_back();
        self.pump();
    }

    fn disconnect(&mut self) {
        for slot in &mut self.slots {
            slot.disconnect();
        }
        self.connected = false;
        self.pump();
    }

    fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
        self.connected = false;
        self.pump();
    }

    fn is_connecting(&self) -> bool {
        !self.connected && self.slots[self.back_index()].is_connecting()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_reconnecting(&self) -> bool {
        let back = &self.slots[self.back_index()];
        back.is_reconnecting() || (self.connected && back.is_connecting())
    }

    fn handle_transport(&mut self, token: Token, event: TransportEvent) {
        if let Some(slot) = self.slots.get_mut(usize::from(token.slot)) {
            slot.handle_transport(token, event);
            self.pump();
        }
    }

    fn handle_timer(&mut self, token: Token) {
        if let Some(slot) = self.slots.get_mut(usize::from(token.slot)) {
            slot.handle_timer(token);
            self.pump();
        }
    }

    fn poll_output(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{error::TransportError, event::Command};

    fn url() -> Url {
        Url::parse("http://feed.test/stream").unwrap()
    }

    fn drain(pair: &mut PersistentConnectionPair) -> Vec<Output> {
        core::iter::from_fn(|| pair.poll_output()).collect()
    }

    fn events(outputs: &[Output]) -> Vec<ConnectionEvent> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Event(e) => Some(e.clone()),
                Output::Command(_) => None,
            })
            .collect()
    }

    fn open_token(outputs: &[Output]) -> Token {
        outputs
            .iter()
            .find_map(|o| match o {
                Output::Command(Command::Open { token, .. }) => Some(*token),
                _ => None,
            })
            .expect("no open command")
    }

    fn timer_token(outputs: &[Output]) -> Token {
        outputs
            .iter()
            .find_map(|o| match o {
                Output::Command(Command::StartTimer { token, .. }) => Some(*token),
                _ => None,
            })
            .expect("no timer command")
    }

    fn connected_pair() -> (PersistentConnectionPair, Token) {
        let mut pair = PersistentConnectionPair::new(ReconnectOptions::default());
        pair.connect(url());
        let first = open_token(&drain(&mut pair));
        assert_eq!(first.slot, 0);
        pair.handle_transport(first, TransportEvent::Opened);
        assert_eq!(events(&drain(&mut pair)), [ConnectionEvent::Connected]);
        assert_eq!(pair.front_slot(), 0);
        (pair, first)
    }

    #[test]
    fn first_connect_goes_through_back_slot() {
        let mut pair = PersistentConnectionPair::new(ReconnectOptions::default());
        pair.connect(url());
        let outputs = drain(&mut pair);
        assert_eq!(events(&outputs), [ConnectionEvent::Connecting]);
        assert!(pair.is_connecting());
        assert!(!pair.is_connected());
    }

    #[test]
    fn swap_is_atomic() {
        let (mut pair, first) = connected_pair();

        pair.reconnect();
        let timer = timer_token(&drain(&mut pair));
        assert!(pair.is_connected());
        assert!(pair.is_reconnecting());

        pair.handle_timer(timer);
        let second = open_token(&drain(&mut pair));
        assert_eq!(second.slot, 1);
        assert!(pair.is_connected());

        pair.handle_transport(first, TransportEvent::Data(Bytes::from_static(b"old")));
        assert_eq!(
            events(&drain(&mut pair)),
            [ConnectionEvent::Data(Bytes::from_static(b"old"))]
        );

        pair.handle_transport(second, TransportEvent::Opened);
        let outputs = drain(&mut pair);
        assert_eq!(events(&outputs), [ConnectionEvent::Reconnected]);
        assert!(outputs.contains(&Output::Command(Command::Abort { token: first })));
        assert!(pair.is_connected());
        assert_eq!(pair.front_slot(), 1);

        pair.handle_transport(first, TransportEvent::Data(Bytes::from_static(b"stale")));
        assert!(drain(&mut pair).is_empty());
        pair.handle_transport(second, TransportEvent::Data(Bytes::from_static(b"new")));
        assert_eq!(
            events(&drain(&mut pair)),
            [ConnectionEvent::Data(Bytes::from_static(b"new"))]
        );
    }

    #[test]
    fn front_failure_starts_back_with_backoff() {
        let (mut pair, first) = connected_pair();

        pair.handle_transport(first, TransportEvent::End);
        let outputs = drain(&mut pair);
        assert_eq!(
            events(&outputs),
            [
                ConnectionEvent::End,
                ConnectionEvent::ReconnectScheduled {
                    delay: core::time::Duration::from_millis(2000)
                },
            ]
        );
        assert!(!pair.is_connected());
        assert!(pair.is_reconnecting());

        pair.handle_timer(timer_token(&outputs));
        let outputs = drain(&mut pair);
        assert_eq!(events(&outputs), [ConnectionEvent::Connecting]);
        let second = open_token(&outputs);
        pair.handle_transport(second, TransportEvent::Opened);
        assert_eq!(events(&drain(&mut pair)), [ConnectionEvent::Connected]);
    }

    #[test]
    fn back_failure_retries_only_the_back_slot() {
        let (mut pair, _first) = connected_pair();
        pair.reconnect();
        let timer = timer_token(&drain(&mut pair));
        pair.handle_timer(timer);
        let second = open_token(&drain(&mut pair));

        pair.handle_transport(second, TransportEvent::Error(TransportError::Status(502)));
        let outputs = drain(&mut pair);
        let events = events(&outputs);
        assert_eq!(events[0], ConnectionEvent::Error(TransportError::Status(502)));
        assert!(matches!(
            events[1],
            ConnectionEvent::ReconnectScheduled { .. }
        ));
        assert!(pair.is_connected());
        assert!(pair.is_reconnecting());
        assert_eq!(pair.front_slot(), 0);
    }

    fn open_url(outputs: &[Output]) -> Url {
        outputs
            .iter()
            .find_map(|o| match o {
                Output::Command(Command::Open { url, .. }) => Some(url.clone()),
                _ => None,
            })
            .expect("no open command")
    }

    fn with_since(since: u32) -> Url {
        Url::parse(&format!("http://feed.test/stream?since={since}")).unwrap()
    }

    #[test]
    fn set_url_retargets_a_pending_back_reconnect() {
        let (mut pair, _first) = connected_pair();
        pair.reconnect();
        let timer = timer_token(&drain(&mut pair));

        pair.set_url(with_since(2));
        pair.handle_timer(timer);
        assert_eq!(open_url(&drain(&mut pair)), with_since(2));
    }

    #[test]
    fn back_retry_uses_the_latest_url() {
        let (mut pair, _first) = connected_pair();
        pair.reconnect();
        let timer = timer_token(&drain(&mut pair));
        pair.handle_timer(timer);
        let second = open_token(&drain(&mut pair));

        pair.set_url(with_since(3));
        pair.handle_transport(second, TransportEvent::Error(TransportError::Status(503)));
        let timer = timer_token(&drain(&mut pair));
        pair.handle_timer(timer);
        assert_eq!(open_url(&drain(&mut pair)), with_since(3));
    }

    #[test]
    fn disconnect_silences_both_slots() {
        let (mut pair, first) = connected_pair();
        pair.reconnect();
        drain(&mut pair);

        pair.disconnect();
        assert!(events(&drain(&mut pair)).is_empty());
        assert!(!pair.is_connected());
        assert!(!pair.is_reconnecting());

        pair.handle_transport(first, TransportEvent::End);
        assert!(drain(&mut pair).is_empty());
    }
}
