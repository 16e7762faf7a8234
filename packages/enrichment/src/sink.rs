//! Output channels for enriched records.
//!
//! The processor only publishes and reads connectivity; destination
//! lifecycle belongs to whoever constructs the sink.

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use geonames_enrichment_models::{EnrichedRecord, EventDestination};

use crate::PublishError;

/// An event sink addressed by processor instance.
pub trait OutputSink: Send + Sync {
    /// Publishes a record. Ownership passes to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the record was not accepted.
    fn publish(&self, record: EnrichedRecord) -> Result<(), PublishError>;

    /// Whether the sink can currently publish.
    fn is_connected(&self) -> bool;

    /// Stops accepting records.
    fn disconnect(&self);

    /// Free-form status details.
    fn status(&self) -> String;

    /// Destinations this sink publishes to.
    fn destinations(&self) -> Vec<EventDestination>;
}

/// Collects published records in memory.
///
/// Can be told to reject specific publish attempts (zero-based), which is
/// how hosts and tests exercise partial-failure handling.
#[derive(Debug)]
pub struct MemorySink {
    destination: EventDestination,
    records: Mutex<Vec<EnrichedRecord>>,
    attempts: AtomicUsize,
    reject_attempts: BTreeSet<usize>,
    connected: AtomicBool,
}

impl MemorySink {
    /// Creates a connected sink.
    #[must_use]
    pub fn new(destination: EventDestination) -> Self {
        Self {
            destination,
            records: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            reject_attempts: BTreeSet::new(),
            connected: AtomicBool::new(true),
        }
    }

    /// Rejects the given publish attempts.
    #[must_use]
    pub fn rejecting(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.reject_attempts.extend(attempts);
        self
    }

    /// Returns a copy of everything published so far.
    #[must_use]
    pub fn records(&self) -> Vec<EnrichedRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns everything published so far.
    pub fn take(&self) -> Vec<EnrichedRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl OutputSink for MemorySink {
    fn publish(&self, record: EnrichedRecord) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected {
                destination: self.destination.name.clone(),
            });
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_attempts.contains(&attempt) {
            return Err(PublishError::Rejected {
                message: format!("attempt {attempt} refused"),
            });
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn status(&self) -> String {
        let held = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        format!("{held} records held for {}", self.destination)
    }

    fn destinations(&self) -> Vec<EventDestination> {
        vec![self.destination.clone()]
    }
}

/// Writes each record as a single-line `GeoJSON` `Feature`.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    destination: EventDestination,
    writer: Mutex<W>,
    written: AtomicUsize,
    connected: AtomicBool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Creates a connected sink over a writer.
    #[must_use]
    pub const fn new(destination: EventDestination, writer: W) -> Self {
        Self {
            destination,
            writer: Mutex::new(writer),
            written: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
        }
    }

    /// Consumes the sink, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> OutputSink for JsonLinesSink<W> {
    fn publish(&self, record: EnrichedRecord) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected {
                destination: self.destination.name.clone(),
            });
        }

        let line = serde_json::to_string(&record.to_geojson_feature())?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")?;
        writer.flush()?;

        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
        {
            log::warn!("Failed to flush {} on disconnect: {e}", self.destination);
        }
    }

    fn status(&self) -> String {
        let state = if self.is_connected() {
            "connected"
        } else {
            "disconnected"
        };
        format!(
            "{state}, {} records written to {}",
            self.written.load(Ordering::SeqCst),
            self.destination
        )
    }

    fn destinations(&self) -> Vec<EventDestination> {
        vec![self.destination.clone()]
    }
}
