use crate::distributed::backend::{CollectiveBackend, ProcessGroup};
use crate::error::{Error, Result};
use crate::memory::{Allocation, MemoryPool};
use crate::state_dict::StateDict;
use crate::tensor::{Device, Tensor, TensorElem};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// How [`TrainingReplica::state_dict`] materializes full parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateDictType {
    /// Unshard the whole module first, then copy every parameter out.
    ///
    /// Simple, but a full copy lives inside the module while a second one is being built
    /// for the caller. Peak is shard + 2x full.
    #[default]
    Full,

    /// Gather parameter by parameter straight into the output mapping.
    ///
    /// Each rank only ever keeps its own shard plus what it is handing out. Peak is
    /// shard + 1x full.
    Sharded,
}

/// A module whose parameters are sharded along dim 0 across a data-parallel group.
///
/// Since Rust traits don't allow iterating over fields easily without macros,
/// modules list their local shards explicitly.
pub trait Shardable {
    type Elem: TensorElem;
    type Device: Device;

    /// Local shards in a stable order, keyed by the full parameter name.
    fn named_shards(&self) -> Vec<(&str, &Tensor<Self::Elem, 2, Self::Device>)>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;
}

/// The capability the handoff needs from the training side.
pub trait TrainingReplica {
    type Elem: TensorElem;
    type Device: Device;

    fn set_state_dict_type(&mut self, kind: StateDictType);

    /// Produces the full, unsharded value of every parameter.
    ///
    /// Collective over the replica's shard group.
    fn state_dict(&self) -> Result<StateDict<Self::Elem, Self::Device>>;

    /// Returns the replica to trainable mode.
    fn train(&mut self) -> Result<()>;
}

/// A wrapper for Fully Sharded Data Parallelism.
///
/// The wrapper accounts for its local shards in the device's [`MemoryPool`] for as
/// long as it lives, and charges every materialized state dict against the same pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Arc::new(MemoryPool::new());
/// let mut fsdp = Fsdp::new(model, backend, group, pool)?;
/// fsdp.set_state_dict_type(StateDictType::Sharded);
/// let full = fsdp.state_dict()?;
/// ```
pub struct Fsdp<M, B> {
    module: M,
    backend: B,
    group: ProcessGroup,
    state_dict_type: StateDictType,
    pool: Arc<MemoryPool>,
    _shards: Allocation,
}

impl<M, B> Fsdp<M, B>
where
    M: Shardable,
    B: CollectiveBackend,
{
    /// Wraps `module`, whose shards are split across `group`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResourceExhausted` if the local shards do not fit in `pool`.
    pub fn new(module: M, backend: B, group: ProcessGroup, pool: Arc<MemoryPool>) -> Result<Self> {
        if !group.contains(backend.rank()) {
            return Err(Error::Training(format!(
                "rank {} is not part of its shard group {:?}",
                backend.rank(),
                group.ranks()
            )));
        }
        let shards = pool.allocate(Self::shard_bytes(&module))?;
        debug!(
            rank = backend.rank(),
            params = module.named_shards().len(),
            shard_bytes = shards.bytes(),
            "fsdp module wrapped"
        );
        Ok(Self {
            module,
            backend,
            group,
            state_dict_type: StateDictType::default(),
            pool,
            _shards: shards,
        })
    }

    fn shard_bytes(module: &M) -> u64 {
        module
            .named_shards()
            .iter()
            .map(|(_, t)| t.nbytes() as u64)
            .sum()
    }

    /// Bytes of one full, unsharded copy of the module.
    pub fn full_bytes(&self) -> u64 {
        Self::shard_bytes(&self.module) * self.group.size() as u64
    }

    pub fn state_dict_type(&self) -> StateDictType {
        self.state_dict_type
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    /// Access the inner module.
    pub fn module(&self) -> &M {
        &self.module
    }

    /// Access the inner module mutably.
    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    fn gather_into(&self, out: &mut StateDict<M::Elem, M::Device>) -> Result<()> {
        for (name, shard) in self.module.named_shards() {
            let full = self.backend.all_gather(shard, &self.group, 0)?;
            out.insert(name, full);
        }
        Ok(())
    }
}

impl<M, B> TrainingReplica for Fsdp<M, B>
where
    M: Shardable,
    B: CollectiveBackend,
{
    type Elem = M::Elem;
    type Device = M::Device;

    fn set_state_dict_type(&mut self, kind: StateDictType) {
        self.state_dict_type = kind;
    }

    fn state_dict(&self) -> Result<StateDict<M::Elem, M::Device>> {
        let full_bytes = self.full_bytes();
        // Reserve before gathering so an infeasible handoff fails before any rank
        // commits to a collective.
        let output = self.pool.allocate(full_bytes)?;
        let mut out = StateDict::new().with_allocation(output);

        match self.state_dict_type {
            StateDictType::Full => {
                let mut unsharded = StateDict::new().with_allocation(self.pool.allocate(full_bytes)?);
                self.gather_into(&mut unsharded)?;
                for (name, tensor) in &unsharded {
                    out.insert(name, tensor.clone());
                }
            }
            StateDictType::Sharded => self.gather_into(&mut out)?,
        }

        debug!(
            rank = self.backend.rank(),
            mode = ?self.state_dict_type,
            params = out.len(),
            full_bytes,
            "state dict materialized"
        );
        Ok(out)
    }

    fn train(&mut self) -> Result<()> {
        self.module.set_training(true);
        Ok(())
    }
}
