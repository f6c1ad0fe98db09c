//! Tails a live JSON sample stream and prints every point as it arrives.
//!
//! The stream is expected to answer `GET <url>?since=<ms>` with a body of
//! newline-separated JSON records, optionally wrapped in chunked framing that
//! survived the proxy in front of the backend. Each record is one of
//!
//! ```text
//! {"x": 1700000000000, "y": 42}
//! {"point": {"x": 1700000000000, "y": "idle"}}
//! {"value0": {"data": [{"x": 1, "y": 2}, {"x": 2, "y": 3}]}}
//! ```
//!
//! When the connection drops the subscription reconnects with backoff and
//! resumes just past the last point it printed, so no point is shown twice.
//! With `--gap-free` the replacement connection is established before the
//! old one is torn down.
//!
//! Points are also kept in a [`SeriesStore`] trimmed to a one minute window,
//! which is what a dashboard would render.
//!
//! Run with
//!
//! ```bash
//! RUST_LOG=livefeed=debug cargo run -p livefeed --example tail -- http://localhost:8080/data
//! ```
#![allow(missing_docs)]

use std::time::Duration;

use clap::Parser;
use livefeed::{
    Framing, HttpTransport, ResumePolicy, Retention, SeriesStore, StreamDescriptor, StreamOptions,
    stream_data,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Print points from a live JSON sample stream")]
struct Args {
    /// Stream endpoint, without the resume parameter.
    url: String,

    /// Name shown next to every printed point.
    #[arg(long, default_value = "feed")]
    id: String,

    /// The body is plain newline-separated JSON, not chunk frames.
    #[arg(long)]
    raw: bool,

    /// Keep a standby connection so reconnects leave no gap.
    #[arg(long)]
    gap_free: bool,

    /// How far back the first request asks the backend to replay.
    #[arg(long, default_value_t = 0)]
    lookback_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), livefeed::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let descriptor = StreamDescriptor::parse(args.id, &args.url)?;
    let options = StreamOptions {
        framing: if args.raw { Framing::Raw } else { Framing::Chunked },
        resume: ResumePolicy::Since {
            lookback: Duration::from_millis(args.lookback_ms),
        },
        gap_free: args.gap_free,
        ..StreamOptions::default()
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = stream_data(descriptor, &options, HttpTransport::new(), tx);
    let mut store = SeriesStore::new(Retention::TimeWindow(60_000.0));

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(sample) = received else { break };
                println!("{} x={} y={:?}", sample.stream, sample.point.x, sample.point.y);
                let stream = sample.stream.clone();
                store.insert(sample);
                if let Some(window) = store.get(&stream) {
                    tracing::debug!(stream = %stream, retained = window.len(), "window");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.join().await;
    Ok(())
}
