//! Handoff from a fully sharded training replica to a tensor-parallel inference engine.
//!
//! ## Entering
//!
//! 1. The training replica materializes a full [`StateDict`](crate::state_dict::StateDict).
//!    This is the peak: one full copy next to the local shards. If the device cannot
//!    hold it, `enter` fails before the engine wakes.
//! 2. The engine wakes and loads the mapping, resharding it for its own layout.
//! 3. The mapping is dropped and the cache emptied, so only the engine's copy remains.
//! 4. With a data-parallel unit, the live RNG register switches to the generation state.
//!
//! ## Exiting
//!
//! The engine sleeps, the replica returns to training mode and the cache is emptied.
//! The RNG register then switches back to the training state. Every exit step is
//! attempted even if an earlier one failed, and the first failure is returned.
//!
//! ## Redistribution
//!
//! The inference engine's tensor-parallel peers must see the same input. Each request is
//! all-gathered across the tensor-parallel group on the way in and split again on the way
//! out, so a process gets back exactly the rows it submitted.

use super::ShardingManager;
use super::rng::RngIsolation;
use crate::accelerator::Accelerator;
use crate::config::ShardingConfig;
use crate::distributed::{CollectiveBackend, DeviceMesh, StateDictType, TrainingReplica};
use crate::error::{Error, Result};
use crate::protocol::{Batch, NonTensorFields, TensorFields};
use crate::rollout::InferenceEngine;
use crate::tensor::{Device, TensorElem};
use tracing::{debug, error, info, trace, warn};
use validator::Validate;

/// Mesh dimension whose local rank identifies the data-parallel unit.
pub const DATA_PARALLEL_DIM: &str = "dp";

pub struct FsdpInferenceShardingManager<R, E, A, B> {
    training: R,
    engine: E,
    accelerator: A,
    backend: B,
    config: ShardingConfig,
    rng: RngIsolation,
    unit_rank: Option<usize>,
    active: bool,
}

impl<R, E, A, B> FsdpInferenceShardingManager<R, E, A, B>
where
    R: TrainingReplica,
    E: InferenceEngine<R::Elem, R::Device>,
    A: Accelerator,
    B: CollectiveBackend,
{
    /// Creates a manager with the default configuration.
    ///
    /// `mesh` describes the training-side topology. When present, its `dp` local rank
    /// selects the generation RNG seed. Without it the manager runs single-rank and never
    /// touches the RNG register after construction.
    pub fn new(training: R, engine: E, accelerator: A, backend: B, mesh: Option<&DeviceMesh>) -> Result<Self> {
        Self::with_config(training, engine, accelerator, backend, mesh, ShardingConfig::default())
    }

    pub fn with_config(
        mut training: R,
        engine: E,
        accelerator: A,
        backend: B,
        mesh: Option<&DeviceMesh>,
        config: ShardingConfig,
    ) -> Result<Self> {
        config.validate()?;

        let tp_size = backend.group_size(engine.tensor_parallel_group());
        if let Some(expected) = config.expected_tensor_parallel_size {
            if expected != tp_size {
                return Err(Error::Config(format!(
                    "expected tensor-parallel size {}, engine group has {}",
                    expected, tp_size
                )));
            }
        }

        let unit_rank = match mesh {
            Some(mesh) => Some(mesh.local_rank(DATA_PARALLEL_DIM).ok_or_else(|| {
                Error::Config(format!("device mesh has no '{}' dimension", DATA_PARALLEL_DIM))
            })?),
            None => None,
        };

        training.set_state_dict_type(StateDictType::Sharded);
        let rng = RngIsolation::new(&accelerator, unit_rank, config.generation_seed_offset)?;

        info!(
            rank = backend.rank(),
            tp_size,
            unit_rank = ?unit_rank,
            sleep_level = ?config.sleep_level,
            "sharding manager ready"
        );

        Ok(Self {
            training,
            engine,
            accelerator,
            backend,
            config,
            rng,
            unit_rank,
            active: false,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn unit_rank(&self) -> Option<usize> {
        self.unit_rank
    }

    pub fn config(&self) -> &ShardingConfig {
        &self.config
    }

    pub fn rng(&self) -> &RngIsolation {
        &self.rng
    }

    pub fn training(&self) -> &R {
        &self.training
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn accelerator(&self) -> &A {
        &self.accelerator
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tensor_parallel_size(&self) -> usize {
        self.backend.group_size(self.engine.tensor_parallel_group())
    }

    pub fn into_parts(self) -> (R, E, A, B) {
        (self.training, self.engine, self.accelerator, self.backend)
    }

    fn log_memory(&self, label: &str) {
        if self.config.log_memory {
            self.accelerator.memory_pool().log_memory_usage(label);
        }
    }
}

fn record_failure(first: &mut Option<Error>, step: &str, result: Result<()>) {
    if let Err(e) = result {
        match first {
            None => {
                error!(step, error = %e, "exit step failed");
                *first = Some(e);
            }
            Some(_) => warn!(step, error = %e, "further exit step failed"),
        }
    }
}

impl<R, E, A, B> ShardingManager for FsdpInferenceShardingManager<R, E, A, B>
where
    R: TrainingReplica,
    E: InferenceEngine<R::Elem, R::Device>,
    A: Accelerator,
    B: CollectiveBackend,
{
    fn enter(&mut self) -> Result<()> {
        if self.active {
            return Err(Error::InvalidState("enter called inside an active generation scope".into()));
        }

        self.log_memory("before state_dict() in sharding manager");
        let weights = self.training.state_dict()?;
        self.log_memory("after state_dict() in sharding manager");

        self.engine.wake_up()?;
        self.engine.load_weights(&weights)?;
        self.log_memory("after sync model weights in sharding manager");

        let params = weights.len();
        drop(weights);
        let released = self.accelerator.empty_cache();
        self.log_memory("after del state_dict and empty_cache in sharding manager");

        self.rng.enter_generation(&self.accelerator)?;
        self.active = true;
        debug!(params, released_bytes = released, "entered generation mode");
        Ok(())
    }

    fn exit(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::InvalidState("exit called without an active generation scope".into()));
        }
        self.active = false;

        let mut failure = None;
        self.log_memory("before engine offload in sharding manager");
        record_failure(&mut failure, "sleep", self.engine.sleep(self.config.sleep_level));
        self.log_memory("after engine offload in sharding manager");
        record_failure(&mut failure, "train", self.training.train());
        self.accelerator.empty_cache();
        record_failure(&mut failure, "restore rng", self.rng.exit_generation(&self.accelerator));

        match failure {
            Some(e) => Err(e),
            None => {
                debug!("returned to training mode");
                Ok(())
            }
        }
    }

    fn preprocess_data<T: TensorElem, D: Device>(&self, batch: &mut Batch<T, D>) -> Result<()> {
        let group = self.engine.tensor_parallel_group();
        let tp_size = self.backend.group_size(group);
        let device = self.accelerator.current_device();
        let original = batch.placement();
        let relocate = original != device;

        let mut tensors = TensorFields::new();
        for (name, tensor) in &batch.tensors {
            let staged;
            let local = if relocate {
                staged = self.accelerator.to_device(tensor, device)?;
                &staged
            } else {
                tensor
            };
            let mut gathered = self.backend.all_gather(local, group, 0)?;
            if relocate {
                gathered = self.accelerator.to_device(&gathered, original)?;
            }
            tensors.insert(name.clone(), gathered);
        }

        let contributions = self.backend.all_gather_object(&batch.non_tensors, group)?;
        let mut non_tensors = NonTensorFields::new();
        for name in batch.non_tensors.keys() {
            let mut values = Vec::new();
            for (peer, contribution) in contributions.iter().enumerate() {
                let field = contribution.get(name).ok_or_else(|| {
                    Error::InvalidBatch(format!(
                        "tensor-parallel peer {} has no non-tensor field '{}'",
                        peer, name
                    ))
                })?;
                values.extend(field.iter().cloned());
            }
            non_tensors.insert(name.clone(), values);
        }

        let gathered = Batch::new(tensors, non_tensors)?
            .with_meta_info(batch.meta_info.clone())
            .with_placement(original);
        trace!(tp_size, rows_in = batch.len(), rows_out = gathered.len(), "preprocessed batch");
        *batch = gathered;
        Ok(())
    }

    fn postprocess_data<T: TensorElem, D: Device>(&self, batch: &mut Batch<T, D>) -> Result<()> {
        let tp_size = self.backend.group_size(self.engine.tensor_parallel_group());
        if tp_size > 1 {
            let index = self.backend.rank() % tp_size;
            let mut chunks = batch.chunk(tp_size)?;
            *batch = chunks.swap_remove(index);
        }
        Ok(())
    }
}
