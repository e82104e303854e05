//! # Distributed Communication
//!
//! Everything here is about moving tensors between ranks that each hold part of the
//! picture.
//!
//! *   [`CollectiveBackend`](backend::CollectiveBackend): the communication capability.
//!     Every call is a synchronous barrier over a [`ProcessGroup`](backend::ProcessGroup).
//! *   [`CpuBackend`](cpu_backend::CpuBackend): a pure Rust ring all-gather over
//!     in-process channels, one backend per thread.
//! *   [`DeviceMesh`](mesh::DeviceMesh): named parallel axes (`dp`, `tp`, ...) over global
//!     ranks.
//! *   [`Fsdp`](fsdp::Fsdp): a fully sharded training replica that can hand out its full
//!     parameters as a [`StateDict`](crate::state_dict::StateDict).
//!
//! ## Quick Start
//!
//! ```rust
//! use rollout_sync::distributed::{CollectiveBackend, CpuBackend};
//! use rollout_sync::tensor::Tensor;
//! use std::thread;
//!
//! let handles: Vec<_> = CpuBackend::cluster(2)
//!     .into_iter()
//!     .map(|backend| {
//!         thread::spawn(move || {
//!             let rank = backend.rank() as f32;
//!             let t = Tensor::<f32, 2>::new(vec![rank, rank], [1, 2]).unwrap();
//!             backend.all_gather(&t, &backend.world_group(), 0).unwrap()
//!         })
//!     })
//!     .collect();
//!
//! for h in handles {
//!     assert_eq!(h.join().unwrap().data(), &[0.0, 0.0, 1.0, 1.0]);
//! }
//! ```

pub mod backend;
pub mod cpu_backend;
pub mod fsdp;
pub mod mesh;

pub use backend::{CollectiveBackend, ProcessGroup};
pub use cpu_backend::CpuBackend;
pub use fsdp::{Fsdp, Shardable, StateDictType, TrainingReplica};
pub use mesh::DeviceMesh;
