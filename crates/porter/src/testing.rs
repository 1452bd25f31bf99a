//! Test utilities for porter
//!
//! Reusable stand-in models and processors for unit and integration tests.

use crate::frame::Frame;
use crate::model::{Model, Processor};
use anyhow::Result;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Predicts the same value for every row.
pub struct ConstantModel(pub Value);

impl Model for ConstantModel {
    fn predict(&self, input: &Frame) -> Result<Vec<Value>> {
        Ok(vec![self.0.clone(); input.len()])
    }
}

/// Echoes one column back as the prediction, `null` where absent.
pub struct ColumnModel {
    column: String,
}

impl ColumnModel {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Model for ColumnModel {
    fn predict(&self, input: &Frame) -> Result<Vec<Value>> {
        Ok(input
            .column(&self.column)
            .map(|value| value.cloned().unwrap_or(Value::Null))
            .collect())
    }
}

/// Always fails with the given message.
pub struct FailingModel {
    message: String,
}

impl FailingModel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Model for FailingModel {
    fn predict(&self, _input: &Frame) -> Result<Vec<Value>> {
        anyhow::bail!("{}", self.message)
    }
}

/// Counts calls and records the batch sizes it was given.
///
/// Thread-safe, so it can sit behind a service shared by concurrent requests.
#[derive(Default)]
pub struct RecordingModel {
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl RecordingModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }
}

impl Model for RecordingModel {
    fn predict(&self, input: &Frame) -> Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.batch_sizes.lock() {
            sizes.push(input.len());
        }
        Ok((0..input.len()).map(|i| json!(i)).collect())
    }
}

/// Multiplies a numeric column by a constant.
pub struct ScaleProcessor {
    column: String,
    factor: f64,
}

impl ScaleProcessor {
    pub fn new(column: impl Into<String>, factor: f64) -> Self {
        Self {
            column: column.into(),
            factor,
        }
    }
}

impl Processor for ScaleProcessor {
    fn process(&self, frame: Frame) -> Result<Frame> {
        let mut bad = None;
        let frame = frame.map_column(&self.column, |value| match value.as_f64() {
            Some(number) => json!(number * self.factor),
            None => {
                bad = Some(value.clone());
                Value::Null
            },
        });
        match bad {
            Some(value) => anyhow::bail!("cannot scale non-numeric value {}", value),
            None => Ok(frame),
        }
    }
}

/// Reverses row order.
pub struct ReverseRows;

impl Processor for ReverseRows {
    fn process(&self, mut frame: Frame) -> Result<Frame> {
        frame.rows_mut().reverse();
        Ok(frame)
    }
}

/// Always fails.
pub struct FailingProcessor;

impl Processor for FailingProcessor {
    fn process(&self, _frame: Frame) -> Result<Frame> {
        anyhow::bail!("processor failed")
    }
}
