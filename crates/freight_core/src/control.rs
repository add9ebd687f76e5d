//! Cooperative run control threaded from the dispatcher into algorithms.
//!
//! Long-running algorithms call [RunControl::checkpoint] at suspension
//! points (progress boundaries, external calls, major loop iterations). A
//! cancelled run returns a Conflict failure from the checkpoint, which the
//! dispatcher recognizes against the job's cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Control surface observed by a running algorithm.
pub trait RunControl: Send {
    /// True once the owning job has been cancelled.
    fn cancelled(&self) -> bool;

    /// Report progress in percent, [0, 100].
    fn progress(&mut self, pct: u8);

    /// Suspension point: fails fast when the run has been cancelled.
    fn checkpoint(&self) -> EngineResult<()> {
        if self.cancelled() {
            return Err(EngineError::Conflict("run cancelled".into()));
        }
        Ok(())
    }
}

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Control implementation driven by a [CancelFlag] and a progress sink.
pub struct FlagControl<'a> {
    flag: CancelFlag,
    sink: Box<dyn FnMut(u8) + Send + 'a>,
}

impl<'a> FlagControl<'a> {
    pub fn new(flag: CancelFlag, sink: impl FnMut(u8) + Send + 'a) -> Self {
        Self { flag, sink: Box::new(sink) }
    }
}

impl RunControl for FlagControl<'_> {
    fn cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    fn progress(&mut self, pct: u8) {
        (self.sink)(pct.min(100));
    }
}

/// Control that never cancels and drops progress. For direct library calls
/// and tests.
#[derive(Debug, Default)]
pub struct NoopControl;

impl RunControl for NoopControl {
    fn cancelled(&self) -> bool {
        false
    }

    fn progress(&mut self, _pct: u8) {}
}
