//! Market recorder: streams one instrument's market data to a JSON-lines log.
//!
//! # Design
//!
//! Gateway callbacks run on the reader thread and must not block on disk.
//! Handlers therefore only enqueue a [`RecordedLine`] on a bounded channel;
//! a dedicated writer thread (`MarketRecorder-<SYMBOL>`) serializes and
//! appends each line, flushing as it goes. When the channel is full the line
//! is dropped and counted rather than stalling dispatch.
//!
//! Subscriptions on [`MarketRecorder::start`]:
//!
//! | stream            | request                                             |
//! |-------------------|-----------------------------------------------------|
//! | real-time bars    | `TRADES`, regular hours only                        |
//! | top of book       | generic ticks `165,375,295`                         |
//! | depth (optional)  | contract routed to the depth exchange, 40 rows      |
//!
//! Log path: `<dir>/<YYYY-MM-DD>/Market-<SYMBOL>-<local timestamp>.log`, with
//! `:` replaced by `-` in the timestamp.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use tbot_gateway::{
    Bar, BrokerGateway, Contract, DeepMktDataHandler, DeepOperation, DeepSide,
    RealTimeBarHandler, TickType, TopMktDataHandler, WhatToShow,
};
use tracing::{error, info, warn};

pub mod event;

pub use event::{RecordedEvent, RecordedLine};

pub const CHANNEL_CAPACITY: usize = 64_000;
pub const TOP_OF_BOOK_TICKS: &str = "165,375,295";
pub const DEPTH_ROWS: i32 = 40;
pub const DEFAULT_DEPTH_EXCHANGE: &str = "ISLAND";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RecorderError {
    /// The log directory or file could not be created.
    Io { path: PathBuf, source: io::Error },
    AlreadyStarted { symbol: String },
    WriterSpawn(String),
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Io { path, source } => {
                write!(f, "recorder io error at {}: {source}", path.display())
            }
            RecorderError::AlreadyStarted { symbol } => {
                write!(f, "recorder for {symbol} already started")
            }
            RecorderError::WriterSpawn(reason) => {
                write!(f, "recorder writer thread failed to start: {reason}")
            }
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecorderError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings + paths
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct RecorderSettings {
    pub dir: PathBuf,
    pub deep_book: bool,
    pub depth_exchange: String,
    pub channel_capacity: usize,
}

impl RecorderSettings {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            deep_book: true,
            depth_exchange: DEFAULT_DEPTH_EXCHANGE.to_string(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }

    pub fn with_deep_book(mut self, deep_book: bool) -> Self {
        self.deep_book = deep_book;
        self
    }
}

pub fn log_file_path(dir: &Path, symbol: &str, now: NaiveDateTime) -> PathBuf {
    let day = now.format("%Y-%m-%d").to_string();
    let stamp = now.format("%Y-%m-%dT%H:%M:%S%.3f").to_string().replace(':', "-");
    dir.join(day).join(format!("Market-{symbol}-{stamp}.log"))
}

fn open_log(path: &Path) -> Result<File, RecorderError> {
    let io_err = |source| RecorderError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)
}

// ---------------------------------------------------------------------------
// Sink + handlers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Sink {
    tx: Mutex<Option<SyncSender<RecordedLine>>>,
    dropped: AtomicU64,
}

impl Sink {
    fn push(&self, event: RecordedEvent) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(RecordedLine::now(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(dropped, "recorder queue full; events dropped");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

struct SinkHandler(Arc<Sink>);

impl RealTimeBarHandler for SinkHandler {
    fn real_time_bar(&self, bar: &Bar) {
        self.0.push(RecordedEvent::RealTimeBar { bar: bar.clone() });
    }
}

impl TopMktDataHandler for SinkHandler {
    fn tick_price(&self, tick_type: TickType, price: f64) {
        self.0.push(RecordedEvent::TickPrice { tick_type, price });
    }

    fn tick_size(&self, tick_type: TickType, size: i64) {
        self.0.push(RecordedEvent::TickSize { tick_type, size });
    }

    fn tick_string(&self, tick_type: TickType, value: &str) {
        self.0.push(RecordedEvent::TickString {
            tick_type,
            value: value.to_string(),
        });
    }
}

impl DeepMktDataHandler for SinkHandler {
    fn update_mkt_depth(
        &self,
        position: i32,
        market_maker: Option<&str>,
        operation: DeepOperation,
        side: DeepSide,
        price: f64,
        size: i64,
    ) {
        self.0.push(RecordedEvent::MarketDepth {
            position,
            market_maker: market_maker.map(str::to_string),
            operation,
            side,
            price,
            size,
        });
    }
}

fn write_loop(rx: Receiver<RecordedLine>, file: File, path: PathBuf) -> u64 {
    let mut out = BufWriter::new(file);
    let mut written = 0u64;
    for line in rx {
        let result = serde_json::to_writer(&mut out, &line)
            .map_err(io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(e) = result {
            error!(path = %path.display(), error = %e, "recorder write failed; writer stopping");
            break;
        }
        written += 1;
    }
    written
}

// ---------------------------------------------------------------------------
// MarketRecorder
// ---------------------------------------------------------------------------

struct Running {
    path: PathBuf,
    writer: JoinHandle<u64>,
}

pub struct MarketRecorder {
    contract: Contract,
    settings: RecorderSettings,
    sink: Arc<Sink>,
    bars: Arc<dyn RealTimeBarHandler>,
    top: Arc<dyn TopMktDataHandler>,
    depth: Arc<dyn DeepMktDataHandler>,
    running: Mutex<Option<Running>>,
}

impl MarketRecorder {
    pub fn new(contract: Contract, settings: RecorderSettings) -> Self {
        let sink = Arc::new(Sink::default());
        Self {
            contract,
            settings,
            bars: Arc::new(SinkHandler(Arc::clone(&sink))),
            top: Arc::new(SinkHandler(Arc::clone(&sink))),
            depth: Arc::new(SinkHandler(Arc::clone(&sink))),
            sink,
            running: Mutex::new(None),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.contract.symbol
    }

    /// Path of the current log, while recording.
    pub fn path(&self) -> Option<PathBuf> {
        self.running.lock().as_ref().map(|r| r.path.clone())
    }

    pub fn dropped(&self) -> u64 {
        self.sink.dropped.load(Ordering::Relaxed)
    }

    /// Opens the log, starts the writer, then subscribes.
    pub fn start(&self, gateway: &BrokerGateway) -> Result<PathBuf, RecorderError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(RecorderError::AlreadyStarted {
                symbol: self.symbol().to_string(),
            });
        }

        let path = log_file_path(&self.settings.dir, self.symbol(), Local::now().naive_local());
        let file = open_log(&path)?;
        let (tx, rx) = mpsc::sync_channel(self.settings.channel_capacity);
        let writer_path = path.clone();
        let writer = thread::Builder::new()
            .name(format!("MarketRecorder-{}", self.symbol()))
            .spawn(move || write_loop(rx, file, writer_path))
            .map_err(|e| RecorderError::WriterSpawn(e.to_string()))?;
        *self.sink.tx.lock() = Some(tx);
        *running = Some(Running {
            path: path.clone(),
            writer,
        });
        drop(running);

        gateway.request_real_time_bars(&self.contract, WhatToShow::Trades, true, Arc::clone(&self.bars));
        gateway.request_top_mkt_data(&self.contract, TOP_OF_BOOK_TICKS, false, Arc::clone(&self.top));
        if self.settings.deep_book {
            let routed = self.contract.routed_to(self.settings.depth_exchange.as_str());
            gateway.request_deep_mkt_data(&routed, DEPTH_ROWS, Arc::clone(&self.depth));
        }

        info!(symbol = %self.symbol(), path = %path.display(), deep_book = self.settings.deep_book, "recording");
        Ok(path)
    }

    /// Records a broker error against this instrument's log.
    pub fn error(&self, id: i32, code: i32, message: &str) {
        self.sink.push(RecordedEvent::Error {
            id,
            code,
            message: message.to_string(),
        });
    }

    /// Cancels the subscriptions, drains the queue and closes the log.
    /// Returns the number of lines written, `None` if not recording.
    /// Without a connection the cancels are not sent, but the gateway still
    /// forgets the handlers.
    pub fn stop(&self, gateway: &BrokerGateway) -> Option<u64> {
        let running = self.running.lock().take()?;

        gateway.cancel_real_time_bars(&self.bars);
        gateway.cancel_top_mkt_data(&self.top);
        if self.settings.deep_book {
            gateway.cancel_deep_mkt_data(&self.depth);
        }

        // Dropping the sender ends the writer once the queue is drained.
        self.sink.tx.lock().take();
        let written = match running.writer.join() {
            Ok(n) => n,
            Err(_) => {
                error!(symbol = %self.symbol(), "recorder writer panicked");
                0
            }
        };
        info!(
            symbol = %self.symbol(),
            path = %running.path.display(),
            written,
            dropped = self.dropped(),
            "recording stopped"
        );
        Some(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn log_path_layout() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 13)
            .unwrap()
            .and_hms_milli_opt(9, 30, 5, 42)
            .unwrap();
        let p = log_file_path(Path::new("log"), "AAPL", now);
        assert_eq!(
            p,
            Path::new("log/2024-03-13/Market-AAPL-2024-03-13T09-30-05.042.log")
        );
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let sink = Sink::default();
        let (tx, _rx) = mpsc::sync_channel(1);
        *sink.tx.lock() = Some(tx);

        sink.push(RecordedEvent::TickSize {
            tick_type: TickType::Volume,
            size: 1,
        });
        sink.push(RecordedEvent::TickSize {
            tick_type: TickType::Volume,
            size: 2,
        });
        assert_eq!(sink.dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn events_before_start_are_ignored() {
        let sink = Sink::default();
        sink.push(RecordedEvent::Error {
            id: 1,
            code: 2,
            message: String::new(),
        });
        assert_eq!(sink.dropped.load(Ordering::Relaxed), 0);
    }
}
