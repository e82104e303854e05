//! # Sharding Managers
//!
//! A sharding manager brackets one generation phase of a training iteration. `enter`
//! hands the training replica's weights to the inference engine, `exit` puts the engine
//! back to sleep and returns the device to training. In between, `preprocess_data` and
//! `postprocess_data` reshape each request for the engine's own parallel layout.
//!
//! Callers should not pair `enter` and `exit` by hand. [`ShardingManager::scope`] returns
//! a guard that runs `exit` when it goes out of scope, on early return and on panic:
//!
//! ```rust
//! use rollout_sync::sharding::{NoopShardingManager, ShardingManager};
//!
//! let mut manager = NoopShardingManager;
//! let rows = manager
//!     .run_in_scope(|_manager| {
//!         // generate here
//!         Ok(4)
//!     })
//!     .unwrap();
//! assert_eq!(rows, 4);
//! ```

pub mod fsdp_inference;
pub mod rng;

pub use fsdp_inference::{DATA_PARALLEL_DIM, FsdpInferenceShardingManager};
pub use rng::{RngIsolation, generation_seed};

use crate::error::Result;
use crate::protocol::Batch;
use crate::tensor::{Device, TensorElem};
use std::ops::{Deref, DerefMut};
use tracing::error;

/// Mode-transition protocol between a training replica and an inference engine.
///
/// Every method defaults to a no-op, which is the right behaviour when both sides
/// already share one copy of the weights.
pub trait ShardingManager {
    fn enter(&mut self) -> Result<()> {
        Ok(())
    }

    fn exit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reshapes a request before it reaches the engine. Collective.
    fn preprocess_data<T: TensorElem, D: Device>(&self, _batch: &mut Batch<T, D>) -> Result<()> {
        Ok(())
    }

    /// Reshapes the engine's output before it returns to training. Undoes `preprocess_data`.
    fn postprocess_data<T: TensorElem, D: Device>(&self, _batch: &mut Batch<T, D>) -> Result<()> {
        Ok(())
    }

    /// Enters and returns a guard that exits on drop.
    ///
    /// If `enter` fails no guard is created and `exit` is not called.
    fn scope(&mut self) -> Result<ShardingScope<'_, Self>>
    where
        Self: Sized,
    {
        self.enter()?;
        Ok(ShardingScope {
            manager: self,
            finished: false,
        })
    }

    /// Runs `body` between `enter` and `exit`.
    ///
    /// `exit` runs whatever `body` returns. When both fail, the body's error is returned
    /// and the exit error is logged.
    fn run_in_scope<R, F>(&mut self, body: F) -> Result<R>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<R>,
    {
        let mut scope = self.scope()?;
        let result = body(&mut *scope);
        let exited = scope.finish();
        match (result, exited) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(exit_err)) => {
                error!(error = %exit_err, "exit failed after generation error");
                Err(e)
            }
        }
    }
}

/// An active generation scope. Runs [`ShardingManager::exit`] exactly once.
#[must_use = "dropping the scope exits immediately"]
pub struct ShardingScope<'a, M: ShardingManager> {
    manager: &'a mut M,
    finished: bool,
}

impl<M: ShardingManager> ShardingScope<'_, M> {
    /// Exits now and surfaces the result.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.manager.exit()
    }
}

impl<M: ShardingManager> Deref for ShardingScope<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.manager
    }
}

impl<M: ShardingManager> DerefMut for ShardingScope<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.manager
    }
}

impl<M: ShardingManager> Drop for ShardingScope<'_, M> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.manager.exit() {
            error!(error = %e, "exit failed while leaving generation scope");
        }
    }
}

/// The base manager: weights are already shared, so there is nothing to hand over.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopShardingManager;

impl ShardingManager for NoopShardingManager {}
