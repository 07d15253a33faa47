/// Step-wise, single-use units of work
pub mod process;
pub mod search;

use async_trait::async_trait;

use crate::error::TaskError;

pub use process::{ProcessEmailResult, ProcessTask};
pub use search::{SearchStep, SearchTask};

/// A resumable unit of work executed one step at a time.
///
/// A task is owned by the caller that drives it and is not reusable once
/// `has_more_steps` returns false. Each step performs at most one call to the
/// remote API; the caller decides whether a failed step aborts the whole run.
#[async_trait]
pub trait LongTask: Send {
    type Output: Send;

    /// Number of steps, possibly an estimate that later steps refine.
    fn step_count(&self) -> usize;

    fn has_more_steps(&self) -> bool;

    /// Fails with `TaskError::IllegalState` when no step remains.
    async fn take_step(&mut self) -> Result<Self::Output, TaskError>;
}
