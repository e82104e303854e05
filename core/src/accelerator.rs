//! The accelerator a process drives: its placement, its live random-number register and
//! its memory pool.
//!
//! All three are process-wide shared state. The sharding managers only touch them through
//! the explicit calls on [`Accelerator`]: snapshot and restore the RNG state, move tensors,
//! request cache reclamation.

use crate::error::{Error, Result};
use crate::memory::{MemoryPool, MemoryStats};
use crate::tensor::{Device, Tensor, TensorElem};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Where a tensor's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Placement {
    #[default]
    Host,
    Accelerator(usize),
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Host => write!(f, "host"),
            Placement::Accelerator(ordinal) => write!(f, "accel:{}", ordinal),
        }
    }
}

/// An opaque snapshot of an accelerator's random-number generator.
#[derive(Clone, PartialEq, Eq)]
pub struct RngState(Vec<u8>);

impl RngState {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RngState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RngState")
            .field(&format_args!("{} bytes", self.0.len()))
            .finish()
    }
}

/// Capability surface of the device this process computes on.
pub trait Accelerator: Send + Sync {
    /// The placement new device tensors land on.
    fn current_device(&self) -> Placement;

    /// Copies a tensor to `placement`.
    fn to_device<T: TensorElem, D: Device>(
        &self,
        tensor: &Tensor<T, 2, D>,
        placement: Placement,
    ) -> Result<Tensor<T, 2, D>>;

    /// Snapshots the live RNG register.
    fn get_rng_state(&self) -> RngState;

    /// Overwrites the live RNG register with a snapshot.
    fn set_rng_state(&self, state: &RngState) -> Result<()>;

    /// Reseeds the live RNG register.
    fn manual_seed(&self, seed: u64);

    fn memory_pool(&self) -> &Arc<MemoryPool>;

    /// Returns cached pool memory. Returns the number of bytes released.
    fn empty_cache(&self) -> u64 {
        self.memory_pool().empty_cache()
    }

    fn memory_stats(&self) -> MemoryStats {
        self.memory_pool().stats()
    }
}

impl<A: Accelerator> Accelerator for Arc<A> {
    fn current_device(&self) -> Placement {
        (**self).current_device()
    }

    fn to_device<T: TensorElem, D: Device>(
        &self,
        tensor: &Tensor<T, 2, D>,
        placement: Placement,
    ) -> Result<Tensor<T, 2, D>> {
        (**self).to_device(tensor, placement)
    }

    fn get_rng_state(&self) -> RngState {
        (**self).get_rng_state()
    }

    fn set_rng_state(&self, state: &RngState) -> Result<()> {
        (**self).set_rng_state(state)
    }

    fn manual_seed(&self, seed: u64) {
        (**self).manual_seed(seed)
    }

    fn memory_pool(&self) -> &Arc<MemoryPool> {
        (**self).memory_pool()
    }

    fn empty_cache(&self) -> u64 {
        (**self).empty_cache()
    }

    fn memory_stats(&self) -> MemoryStats {
        (**self).memory_stats()
    }
}

// seed (32) + stream (8) + word position (16)
const RNG_STATE_LEN: usize = 56;

/// Host-backed reference accelerator.
///
/// The RNG register is a ChaCha20 generator. Its snapshot records the seed, stream and
/// word position, so a restored register continues the exact same sequence.
#[derive(Debug)]
pub struct HostAccelerator {
    ordinal: usize,
    rng: Mutex<ChaCha20Rng>,
    pool: Arc<MemoryPool>,
}

impl HostAccelerator {
    pub fn new(ordinal: usize, seed: u64) -> Self {
        Self::with_pool(ordinal, seed, Arc::new(MemoryPool::new()))
    }

    pub fn with_pool(ordinal: usize, seed: u64, pool: Arc<MemoryPool>) -> Self {
        Self {
            ordinal,
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
            pool,
        }
    }

    /// Runs `f` against the live RNG register, e.g. to sample.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut ChaCha20Rng) -> R) -> R {
        f(&mut self.rng.lock())
    }

    fn encode(rng: &ChaCha20Rng) -> RngState {
        let mut bytes = Vec::with_capacity(RNG_STATE_LEN);
        bytes.extend_from_slice(&rng.get_seed());
        bytes.extend_from_slice(&rng.get_stream().to_le_bytes());
        bytes.extend_from_slice(&rng.get_word_pos().to_le_bytes());
        RngState(bytes)
    }

    fn decode(state: &RngState) -> Result<ChaCha20Rng> {
        let bytes = state.as_bytes();
        if bytes.len() != RNG_STATE_LEN {
            return Err(Error::InvalidRngState(format!(
                "expected {} bytes, got {}",
                RNG_STATE_LEN,
                bytes.len()
            )));
        }

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let mut stream = [0u8; 8];
        stream.copy_from_slice(&bytes[32..40]);
        let mut word_pos = [0u8; 16];
        word_pos.copy_from_slice(&bytes[40..]);

        let mut rng = ChaCha20Rng::from_seed(seed);
        rng.set_stream(u64::from_le_bytes(stream));
        rng.set_word_pos(u128::from_le_bytes(word_pos));
        Ok(rng)
    }
}

impl Accelerator for HostAccelerator {
    fn current_device(&self) -> Placement {
        Placement::Accelerator(self.ordinal)
    }

    fn to_device<T: TensorElem, D: Device>(
        &self,
        tensor: &Tensor<T, 2, D>,
        placement: Placement,
    ) -> Result<Tensor<T, 2, D>> {
        // Host-backed: both placements share system memory.
        trace!(%placement, bytes = tensor.nbytes(), "copying tensor");
        Ok(tensor.clone())
    }

    fn get_rng_state(&self) -> RngState {
        Self::encode(&self.rng.lock())
    }

    fn set_rng_state(&self, state: &RngState) -> Result<()> {
        let restored = Self::decode(state)?;
        *self.rng.lock() = restored;
        Ok(())
    }

    fn manual_seed(&self, seed: u64) {
        *self.rng.lock() = ChaCha20Rng::seed_from_u64(seed);
    }

    fn memory_pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }
}
