//! Tokio driver for [`StreamClient`].
//!
//! The client decides, the driver executes: it spawns transport requests,
//! keeps reconnect deadlines, feeds everything back into the client and
//! forwards decoded points to the subscriber.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::{
    sync::{mpsc, oneshot},
    task::{AbortHandle, JoinHandle},
    time::{Instant, sleep_until},
};

use crate::{
    client::{ClientOutput, StreamClient, StreamConnection, StreamDescriptor, StreamId},
    event::{Command, Token, TransportEvent},
    options::StreamOptions,
    point::Point,
    transport::{Transport, TransportSink},
};

/// A decoded point tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPoint {
    pub stream: StreamId,
    pub point: Point,
}

/// Subscribes to `descriptor` and forwards every decoded point into `sink`
/// until the returned handle is stopped or dropped, or `sink` is closed.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn stream_data<T: Transport>(
    descriptor: StreamDescriptor,
    options: &StreamOptions,
    transport: T,
    sink: mpsc::UnboundedSender<StreamPoint>,
) -> StreamHandle {
    let id = descriptor.id.clone();
    let client = StreamClient::from_options(descriptor, options);
    let (stop_tx, stop_rx) = oneshot::channel();
    let stopped = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let driver = Driver {
        client,
        transport: Arc::new(transport),
        sink,
        stopped: Arc::clone(&stopped),
        events_tx,
        requests: HashMap::new(),
        timers: HashMap::new(),
    };
    let task = tokio::spawn(driver.run(events_rx, stop_rx));

    StreamHandle {
        id,
        stop_tx: Some(stop_tx),
        stopped,
        task: Some(task),
    }
}

/// Owner handle of a running subscription. Dropping it stops the stream.
#[derive(Debug)]
pub struct StreamHandle {
    id: StreamId,
    stop_tx: Option<oneshot::Sender<()>>,
    stopped: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Stops the subscription: no point is forwarded after this returns, and
    /// every request and timer is released. Idempotent.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            tracing::debug!(stream = %self.id, "stop requested");
            let _ = stop_tx.send(());
        }
    }

    /// Stops the subscription and waits until the driver has released
    /// everything.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::error!(stream = %self.id, %err, "stream driver failed");
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Driver<T> {
    client: StreamClient<StreamConnection>,
    transport: Arc<T>,
    sink: mpsc::UnboundedSender<StreamPoint>,
    stopped: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<(Token, TransportEvent)>,
    requests: HashMap<Token, AbortHandle>,
    timers: HashMap<Token, Instant>,
}

impl<T: Transport> Driver<T> {
    async fn run(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<(Token, TransportEvent)>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        self.client.start(unix_now_ms());

        loop {
            if !self.flush() {
                tracing::debug!(stream = %self.client.id(), "subscriber gone");
                break;
            }

            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                Some((token, event)) = events_rx.recv() => {
                    self.client.handle_transport(token, event);
                }
                () = sleep_until_some(deadline) => self.fire_timers(),
            }
        }

        self.client.stop();
        self.flush();
        for (_, request) in self.requests.drain() {
            request.abort();
        }
        self.timers.clear();
        tracing::info!(stream = %self.client.id(), "stream stopped");
    }

    /// Executes pending commands and forwards pending points. Returns `false`
    /// once the subscriber can no longer receive points.
    fn flush(&mut self) -> bool {
        while let Some(output) = self.client.poll_output() {
            match output {
                ClientOutput::Command(command) => self.execute(command),
                ClientOutput::Point(point) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        continue;
                    }
                    let point = StreamPoint {
                        stream: self.client.id().clone(),
                        point,
                    };
                    if self.sink.send(point).is_err() {
                        self.client.stop();
                        return false;
                    }
                }
            }
        }
        true
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Open { token, url } => {
                tracing::debug!(%token, %url, "opening request");
                let sink = TransportSink::new(token, self.events_tx.clone());
                let request = tokio::spawn(self.transport.open(url, sink));
                self.requests.insert(token, request.abort_handle());
            }
            Command::Abort { token } => {
                if let Some(request) = self.requests.remove(&token) {
                    request.abort();
                }
            }
            Command::StartTimer { token, delay } => {
                self.timers.insert(token, Instant::now() + delay);
            }
            Command::CancelTimer { token } => {
                self.timers.remove(&token);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().min().copied()
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        let mut due: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(token, deadline)| (*deadline, *token))
            .collect();
        due.sort_unstable();

        for (_, token) in due {
            self.timers.remove(&token);
            self.client.handle_timer(token);
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => core::future::pending().await,
    }
}

#[allow(clippy::cast_precision_loss)]
fn unix_now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_millis() as f64)
}
