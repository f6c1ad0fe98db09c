#![allow(missing_docs, dead_code)]

use core::time::Duration;

use livefeed::{
    ClientOutput, Command, Connection, Point, StreamClient, StreamConnection, StreamDescriptor,
    StreamOptions, Token, TransportEvent,
};
use url::Url;

pub const BASE_URL: &str = "http://feed.test/data";

/// Drives a sans-IO client by hand and records what it asked for.
pub struct Harness {
    pub client: StreamClient<StreamConnection>,
    pub opened: Vec<(Token, Url)>,
    pub aborted: Vec<Token>,
    pub timers: Vec<(Token, Duration)>,
    pub points: Vec<Point>,
}

impl Harness {
    pub fn new(options: &StreamOptions) -> Self {
        let descriptor = StreamDescriptor::parse("series", BASE_URL).unwrap();
        Self {
            client: StreamClient::from_options(descriptor, options),
            opened: Vec::new(),
            aborted: Vec::new(),
            timers: Vec::new(),
            points: Vec::new(),
        }
    }

    pub fn start(options: &StreamOptions, now_ms: f64) -> Self {
        let mut harness = Self::new(options);
        harness.client.start(now_ms);
        harness.drain();
        harness
    }

    pub fn drain(&mut self) {
        while let Some(output) = self.client.poll_output() {
            match output {
                ClientOutput::Command(Command::Open { token, url }) => self.opened.push((token, url)),
                ClientOutput::Command(Command::Abort { token }) => self.aborted.push(token),
                ClientOutput::Command(Command::StartTimer { token, delay }) => {
                    self.timers.push((token, delay));
                }
                ClientOutput::Command(Command::CancelTimer { token }) => {
                    self.timers.retain(|(t, _)| *t != token);
                }
                ClientOutput::Point(point) => self.points.push(point),
            }
        }
    }

    pub fn last_request(&self) -> Token {
        self.opened.last().expect("no request opened").0
    }

    pub fn last_url(&self) -> &Url {
        &self.opened.last().expect("no request opened").1
    }

    pub fn send(&mut self, token: Token, event: TransportEvent) {
        self.client.handle_transport(token, event);
        self.drain();
    }

    pub fn data(&mut self, token: Token, data: &[u8]) {
        self.send(token, TransportEvent::Data(data.to_vec().into()));
    }

    /// Fires the oldest pending timer and returns its delay.
    pub fn fire_timer(&mut self) -> Duration {
        assert!(!self.timers.is_empty(), "no timer pending");
        let (token, delay) = self.timers.remove(0);
        self.client.handle_timer(token);
        self.drain();
        delay
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection().is_connected()
    }

    pub fn query(&self, key: &str) -> Option<String> {
        self.last_url()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}
