//! Ordered pool of stage executors.

use std::sync::Arc;

use crate::common::{Executable, ThreadedExecutor};
use crate::error::{Error, Result};

/// Fixed-capacity, ordered collection of pipeline stages.
///
/// Stages are added while stopped and started in insertion order;
/// `stop` tears them down in reverse order so downstream consumers
/// outlive their producers during shutdown.
pub struct Pipeline {
    capacity: usize,
    running: bool,
    items: Vec<(Arc<dyn Executable>, ThreadedExecutor)>,
}

impl Pipeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            running: false,
            items: Vec::with_capacity(capacity),
        }
    }

    /// Append a stage. Fails while running or when the capacity is
    /// exhausted.
    pub fn add(&mut self, executable: Arc<dyn Executable>) -> Result<()> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }
        if self.items.len() == self.capacity {
            return Err(Error::PipelineFull(self.capacity));
        }

        let executor = ThreadedExecutor::new(executable.clone());
        self.items.push((executable, executor));
        Ok(())
    }

    /// Start all stages in insertion order. If one fails, the stages
    /// already started are stopped again in reverse order.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }

        for (index, (executable, executor)) in self.items.iter().enumerate() {
            if let Err(e) = executor.start() {
                tracing::error!(stage = executable.name(), error = %e, "failed to start stage");
                for (_, started) in self.items[..index].iter().rev() {
                    let _ = started.stop();
                }
                return Err(e);
            }
            tracing::debug!(stage = executable.name(), "stage started");
        }

        self.running = true;
        Ok(())
    }

    /// Stop all stages in reverse insertion order.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Err(Error::NotRunning);
        }

        for (executable, executor) in self.items.iter().rev() {
            if let Err(e) = executor.stop() {
                tracing::warn!(stage = executable.name(), error = %e, "failed to stop stage");
            } else {
                tracing::debug!(stage = executable.name(), "stage stopped");
            }
        }

        self.running = false;
        Ok(())
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
