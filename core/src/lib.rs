//! # rollout-sync
//!
//! `rollout-sync` moves model weights between a training replica and an inference engine
//! that share the same accelerators but cannot both be resident at full size.
//!
//! A training iteration alternates between two modes. During generation the inference
//! engine holds the weights, resharded for its own tensor-parallel layout. During training
//! the engine sleeps and the fully sharded replica owns the device again. A
//! [`ShardingManager`](sharding::ShardingManager) performs that switch and reshapes each
//! request so every tensor-parallel peer sees the same input.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: Rank-generic tensors and the row operations used by collectives.
//! - [`distributed`]: Process groups, the collective backend, device meshes and FSDP.
//! - [`accelerator`]: Device placement, the RNG register and memory reclamation.
//! - [`memory`]: The caching allocator model behind peak-memory accounting.
//! - [`protocol`]: Aligned tensor and non-tensor request batches.
//! - [`rollout`]: The inference engine seam.
//! - [`sharding`]: The mode-transition managers.
//! - [`config`]: Manager configuration.
//!
//! ## Example
//!
//! ```rust
//! use rollout_sync::sharding::{NoopShardingManager, ShardingManager};
//! use rollout_sync::tensor;
//!
//! let t = tensor!([1.0f32, 2.0, 3.0, 4.0], [2, 2]);
//! assert_eq!(t.rows(), 2);
//!
//! let mut manager = NoopShardingManager;
//! manager.run_in_scope(|_| Ok(())).unwrap();
//! ```

/// Macro for creating a Tensor with compile-time shape checking.
///
/// ```rust
/// use rollout_sync::tensor;
///
/// let t = tensor!([1, 2, 3, 4, 5, 6], [3, 2]);
/// assert_eq!(t.shape(), &[3, 2]);
///
/// // Fails to compile:
/// // let t = tensor!([1, 2, 3], [2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($data:expr, $shape:expr) => {{
        const DATA_LEN: usize = (&$data as &[_]).len();
        const SHAPE: [usize; (&$shape as &[_]).len()] = $shape;
        const EXPECTED_SIZE: usize = {
            let mut size = 1;
            let mut i = 0;
            while i < SHAPE.len() {
                size *= SHAPE[i];
                i += 1;
            }
            size
        };
        const _: () = assert!(
            DATA_LEN == EXPECTED_SIZE,
            "Shape mismatch: data length does not match shape product"
        );

        // Checked at compile time above.
        $crate::tensor::Tensor::new($data.to_vec(), $shape).unwrap()
    }};
}

pub mod accelerator;
pub mod config;
pub mod distributed;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod rollout;
pub mod sharding;
pub mod state_dict;
pub mod tensor;

pub use accelerator::{Accelerator, HostAccelerator, Placement, RngState};
pub use config::ShardingConfig;
pub use error::{Error, Result};
pub use protocol::Batch;
pub use rollout::{InferenceEngine, SleepLevel};
pub use sharding::{FsdpInferenceShardingManager, NoopShardingManager, ShardingManager, ShardingScope};
pub use state_dict::StateDict;
pub use tensor::{Cpu, Device, Storage, Tensor, TensorElem, TensorError};
