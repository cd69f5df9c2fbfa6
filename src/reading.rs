//! The record model flowing through the filter pipeline.
//!
//! A [`Reading`] is one timestamped observation from an asset: a named set of
//! datapoint values plus the acquisition time. Batches travel as a
//! [`ReadingSet`], an ordered sequence — arrival order is semantically
//! significant for downstream aggregation and must survive every conversion.
//!
//! Ownership rule: a `ReadingSet` handed to `plugin_ingest` is consumed by
//! the bridge. The marshaller is the last native reader; the host must not
//! touch the batch again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single datapoint value within a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatapointValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer measurement.
    Integer(i64),
    /// Floating point measurement.
    Float(f64),
    /// Free-form text value.
    Text(String),
    /// Array of floating point samples, e.g. a waveform slice.
    FloatArray(Vec<f64>),
}

/// One timestamped record from a source asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Source asset identifier.
    pub asset: String,
    /// Acquisition timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Named datapoint values carried by this reading.
    pub values: BTreeMap<String, DatapointValue>,
}

impl Reading {
    /// Creates a reading with no datapoints yet.
    pub fn new(asset: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            asset: asset.into(),
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Adds a datapoint value, returning the reading for chaining.
    pub fn with_value(mut self, name: impl Into<String>, value: DatapointValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

/// An ordered batch of readings.
///
/// A zero-length batch is a valid value, distinct from a failed conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingSet {
    readings: Vec<Reading>,
}

impl ReadingSet {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of readings in the batch.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// True when the batch holds no readings.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Appends a reading, preserving arrival order.
    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    /// Borrows the readings in order.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }
}

impl From<Vec<Reading>> for ReadingSet {
    fn from(readings: Vec<Reading>) -> Self {
        Self { readings }
    }
}

impl IntoIterator for ReadingSet {
    type Item = Reading;
    type IntoIter = std::vec::IntoIter<Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.into_iter()
    }
}
