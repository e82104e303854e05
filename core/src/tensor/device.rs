//! Device abstraction for Tensor storage.
//!
//! A `Device` decides which container backs a tensor's elements. Where that container
//! sits (host memory, an accelerator ordinal) is tracked separately by
//! [`Placement`](crate::accelerator::Placement), because the handoff protocol moves
//! tensors between placements at runtime.

use crate::tensor::{Storage, TensorElem};
use std::fmt::Debug;

/// A trait representing the underlying storage device for a Tensor.
pub trait Device: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// The type of storage used by this device.
    type Storage<T>: Storage<T>
    where
        T: TensorElem;

    /// Returns the name of the device.
    ///
    /// ```rust
    /// use rollout_sync::tensor::{Cpu, Device};
    /// assert_eq!(Cpu.name(), "CPU");
    /// ```
    fn name(&self) -> &'static str;

    /// Builds device storage from host data.
    ///
    /// Collectives receive plain vectors from peers and use this to rebuild a tensor on
    /// the caller's device.
    fn storage_from_vec<T: TensorElem>(&self, data: Vec<T>) -> Self::Storage<T>;
}

/// A CPU Device. Data is stored in system RAM using `Vec<T>`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cpu;

impl Device for Cpu {
    type Storage<T>
        = Vec<T>
    where
        T: TensorElem;

    fn name(&self) -> &'static str {
        "CPU"
    }

    fn storage_from_vec<T: TensorElem>(&self, data: Vec<T>) -> Self::Storage<T> {
        data
    }
}
