//! Capability contracts for models and processors.
//!
//! Any closure of the right shape is a [`Model`] or [`Processor`], so simple
//! services need no wrapper types.

use anyhow::Result;
use serde_json::Value;

use crate::frame::Frame;

/// A predictive model.
///
/// `predict` receives the whole batch and returns one prediction per row, in
/// row order. Implementations are called concurrently without any locking
/// by the framework.
#[cfg_attr(test, mockall::automock)]
pub trait Model: Send + Sync {
    fn predict(&self, input: &Frame) -> Result<Vec<Value>>;
}

impl<F> Model for F
where
    F: Fn(&Frame) -> Result<Vec<Value>> + Send + Sync,
{
    fn predict(&self, input: &Frame) -> Result<Vec<Value>> {
        self(input)
    }
}

/// A pre- or post-processing stage.
#[cfg_attr(test, mockall::automock)]
pub trait Processor: Send + Sync {
    fn process(&self, frame: Frame) -> Result<Frame>;
}

impl<F> Processor for F
where
    F: Fn(Frame) -> Result<Frame> + Send + Sync,
{
    fn process(&self, frame: Frame) -> Result<Frame> {
        self(frame)
    }
}
