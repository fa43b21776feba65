//! Bulk data transfer
//!
//! After a data header, a controller streams rows of whitespace separated
//! numbers. A background task owns the gateway lock while it reads them and
//! forwards every row over a bounded channel. The foreground side folds the
//! events into column buffers whenever the caller polls.

use super::{query_error, read_reply, ReadUntil};
use crate::core::eol;
use crate::core::error::GcsError;
use crate::core::logger::CommLog;
use crate::core::transport::Gateway;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Rows buffered between the reader task and the caller
const ROW_CHANNEL_CAPACITY: usize = 4096;

/// Progress reported while streaming, kept below completion
const MAX_PARTIAL: f64 = 1.0 - f64::EPSILON;

/// Declared size of a bulk transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcsData {
    /// Exactly this many rows are expected; `Rows(0)` is treated as unknown
    Rows(usize),
    /// Read until the terminating line
    Unknown,
}

impl GcsData {
    fn limit(self) -> Option<usize> {
        match self {
            Self::Rows(n) if n > 0 => Some(n),
            _ => None,
        }
    }
}

/// Fill state of the bulk buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufState {
    /// No transfer started, or its size is unknown and it is still running
    NotReady,
    /// Fraction of the declared rows received, in `[0, 1)`
    Partial(f64),
    /// All rows received and checked
    Ready,
}

#[derive(Debug)]
pub(super) enum BulkEvent {
    Row(Vec<f64>),
    Failed(GcsError),
    Done,
}

/// Foreground side of a bulk transfer
pub(super) struct BulkBuffer {
    expected: Option<GcsData>,
    columns: Vec<Vec<f64>>,
    index: usize,
    complete: bool,
    error: Option<GcsError>,
    last_index: usize,
    last_update: Option<Instant>,
    rx: Option<mpsc::Receiver<BulkEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BulkBuffer {
    pub(super) fn new() -> Self {
        Self {
            expected: None,
            columns: Vec::new(),
            index: 0,
            complete: false,
            error: None,
            last_index: 0,
            last_update: None,
            rx: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Forget the previous transfer and prepare for `expected`
    pub(super) fn reset(&mut self, expected: GcsData) {
        self.cancel.cancel();
        *self = Self::new();
        self.expected = Some(expected);
    }

    /// The transfer announced no rows
    pub(super) fn finish_empty(&mut self) {
        self.complete = true;
    }

    /// Spawn the reader task; it keeps `gateway` locked until it ends
    pub(super) fn start(
        &mut self,
        gateway: OwnedMutexGuard<Box<dyn Gateway>>,
        log: Arc<CommLog>,
        errcheck: bool,
        pending: String,
    ) {
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let reader = BulkReader {
            limit: self.expected.and_then(GcsData::limit),
            errcheck,
            log,
            pending,
            tx,
            cancel: self.cancel.clone(),
        };
        self.rx = Some(rx);
        self.task = Some(tokio::spawn(reader.run(gateway)));
    }

    /// Receiver to drain while waiting for the gateway
    pub(super) fn receiver(&mut self) -> Option<&mut mpsc::Receiver<BulkEvent>> {
        self.rx.as_mut()
    }

    /// Fold one channel event into the buffer; `None` means the channel closed
    pub(super) fn apply(&mut self, event: Option<BulkEvent>) {
        match event {
            Some(BulkEvent::Row(values)) => {
                if self.columns.is_empty() {
                    self.columns = vec![Vec::new(); values.len()];
                }
                for (column, value) in self.columns.iter_mut().zip(values) {
                    column.push(value);
                }
                self.index += 1;
            }
            Some(BulkEvent::Failed(e)) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
            Some(BulkEvent::Done) => self.complete = true,
            None => {
                self.rx = None;
                if !self.complete && self.error.is_none() && !self.cancel.is_cancelled() {
                    self.error = Some(GcsError::GcsDataRead(
                        "bulk reader stopped unexpectedly".to_string(),
                    ));
                }
            }
        }
    }

    /// Take everything the reader has sent so far
    pub(super) fn pump(&mut self) {
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return;
            };
            let event = match rx.try_recv() {
                Ok(event) => Some(event),
                Err(mpsc::error::TryRecvError::Empty) => return,
                Err(mpsc::error::TryRecvError::Disconnected) => None,
            };
            self.apply(event);
        }
    }

    fn sticky_error(&self) -> Result<(), GcsError> {
        match &self.error {
            Some(e) => {
                self.cancel.cancel();
                Err(e.clone())
            }
            None => Ok(()),
        }
    }

    /// Current fill state, raising the sticky error or a stall timeout
    pub(super) fn state(&mut self, timeout: Duration) -> Result<BufState, GcsError> {
        self.pump();
        self.sticky_error()?;

        let Some(expected) = self.expected else {
            return Ok(BufState::NotReady);
        };
        if self.complete {
            self.last_update = None;
            return Ok(BufState::Ready);
        }

        let now = Instant::now();
        let last_update = *self.last_update.get_or_insert(now);
        if self.index != self.last_index {
            self.last_index = self.index;
            self.last_update = Some(now);
        } else if now.duration_since(last_update) > timeout {
            return Err(GcsError::Timeout(format!(
                "no GCS data for {} ms, {} rows received",
                timeout.as_millis(),
                self.index
            )));
        }

        Ok(match expected.limit() {
            None => BufState::NotReady,
            Some(n) => BufState::Partial((self.index as f64 / n as f64).min(MAX_PARTIAL)),
        })
    }

    /// Received values per column
    pub(super) fn data(&mut self) -> Result<&[Vec<f64>], GcsError> {
        self.pump();
        self.sticky_error()?;
        Ok(&self.columns)
    }

    /// Number of rows received
    pub(super) fn index(&mut self) -> usize {
        self.pump();
        self.index
    }

    pub(super) fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the reader task and wait until it has released the gateway.
    /// Rows received so far are kept.
    pub(super) async fn abort(&mut self) {
        self.pump();
        self.cancel.cancel();
        self.rx = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("GcsMessages: bulk reader ended abnormally: {}", e);
            }
        }
        self.expected = None;
    }

    /// Signal the reader task to stop without waiting for it
    pub(super) fn signal_stop(&self) {
        self.cancel.cancel();
    }
}

/// Background side of a bulk transfer
struct BulkReader {
    limit: Option<usize>,
    errcheck: bool,
    log: Arc<CommLog>,
    /// Received text not yet split into lines
    pending: String,
    tx: mpsc::Sender<BulkEvent>,
    cancel: CancellationToken,
}

/// Parse one data line, which must have `columns` values once known
fn parse_row(line: &str, columns: Option<usize>) -> Result<Vec<f64>, GcsError> {
    let values = line
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| GcsError::UnexpectedResponse(format!("cannot convert to float: {line:?}")))?;
    match columns {
        Some(n) if n != values.len() => Err(GcsError::UnexpectedResponse(format!(
            "expected {} values, got {} in {:?}",
            n,
            values.len(),
            line
        ))),
        _ => Ok(values),
    }
}

impl BulkReader {
    /// Send `event` unless the transfer was abandoned
    async fn emit(&self, event: BulkEvent) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    async fn run(mut self, mut gateway: OwnedMutexGuard<Box<dyn Gateway>>) {
        tracing::debug!("GcsMessages: start background task to read GCS data");
        let mut columns = None;
        let mut index = 0usize;
        let mut failed = false;

        loop {
            while let Some(pos) = self.pending.find('\n') {
                let line: String = self.pending.drain(..=pos).collect();
                index += 1;

                if !failed {
                    let event = match parse_row(&line, columns) {
                        Ok(values) => {
                            columns.get_or_insert(values.len());
                            BulkEvent::Row(values)
                        }
                        Err(e) => {
                            tracing::error!("GcsMessages: {}", e);
                            failed = true;
                            BulkEvent::Failed(e)
                        }
                    };
                    if !self.emit(event).await {
                        return;
                    }
                }

                let last = eol::is_complete(&line);
                if let Some(n) = self.limit {
                    let mismatch = if index > n {
                        Some(GcsError::TooManyData(format!("{n} rows expected, {index} received")))
                    } else if last && index < n {
                        Some(GcsError::TooFewData(format!("{n} rows expected, {index} received")))
                    } else {
                        None
                    };
                    if let Some(e) = mismatch.filter(|_| !failed) {
                        tracing::error!("GcsMessages: {}", e);
                        failed = true;
                        if !self.emit(BulkEvent::Failed(e)).await {
                            return;
                        }
                    }
                }

                if last {
                    self.finish(&mut gateway, failed).await;
                    return;
                }
            }

            if self.cancel.is_cancelled() {
                tracing::debug!("GcsMessages: stop background task, {} rows read", index);
                return;
            }
            let received = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("GcsMessages: stop background task, {} rows read", index);
                    return;
                }
                received = read_reply(&mut **gateway, &self.log, ReadUntil::Line) => received,
            };
            match received {
                Ok(text) => self.pending.push_str(&text),
                Err(e) => {
                    tracing::error!("GcsMessages: reading GCS data failed: {}", e);
                    self.emit(BulkEvent::Failed(GcsError::GcsDataRead(e.to_string())))
                        .await;
                    return;
                }
            }
        }
    }

    async fn finish(&self, gateway: &mut OwnedMutexGuard<Box<dyn Gateway>>, failed: bool) {
        tracing::debug!("GcsMessages: end of GCS data");
        if failed {
            return;
        }
        if self.errcheck {
            if let Err(e) = query_error(&mut ***gateway, &self.log, true, "GCS data").await {
                self.emit(BulkEvent::Failed(e)).await;
                return;
            }
        }
        self.emit(BulkEvent::Done).await;
    }
}
