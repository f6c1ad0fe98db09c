use core::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::{
    error::TransportError,
    event::{Token, TransportEvent},
};

/// Opens long-lived requests for the stream runtime.
///
/// The returned future drives one request to completion, reporting progress
/// through `sink`. The runtime aborts the future when the request is no
/// longer wanted, so implementations need no cancellation logic of their
/// own; they should simply return once a sink method reports `false`.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: Url, sink: TransportSink) -> impl Future<Output = ()> + Send + 'static;
}

/// Reports the progress of one request back to the runtime.
#[derive(Debug, Clone)]
pub struct TransportSink {
    token: Token,
    events: mpsc::UnboundedSender<(Token, TransportEvent)>,
}

impl TransportSink {
    pub(crate) fn new(token: Token, events: mpsc::UnboundedSender<(Token, TransportEvent)>) -> Self {
        Self { token, events }
    }

    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// The response was accepted. Sending data implies this.
    pub fn opened(&self) -> bool {
        self.send(TransportEvent::Opened)
    }

    pub fn data(&self, data: impl Into<Bytes>) -> bool {
        self.send(TransportEvent::Data(data.into()))
    }

    pub fn end(&self) -> bool {
        self.send(TransportEvent::End)
    }

    pub fn error(&self, error: TransportError) -> bool {
        self.send(TransportEvent::Error(error))
    }

    /// Returns `false` once the runtime is gone.
    fn send(&self, event: TransportEvent) -> bool {
        self.events.send((self.token, event)).is_ok()
    }
}
