use crate::accelerator::{Accelerator, RngState};
use crate::error::Result;

/// Seed of the generation RNG state for a data-parallel unit.
///
/// Identical for every rank in the unit, distinct across units.
pub fn generation_seed(unit_rank: usize, offset: u64) -> u64 {
    unit_rank as u64 + offset
}

/// The two RNG slots of the handoff: one live in the accelerator, one parked here.
///
/// The training state is rank-unique. The generation state is shared by every rank of a
/// data-parallel unit so that tensor-parallel peers sample identically. Without a unit
/// there is no generation state and the swaps do nothing.
#[derive(Debug, Clone)]
pub struct RngIsolation {
    training: RngState,
    generation: Option<RngState>,
}

impl RngIsolation {
    /// Snapshots the live state as the training state and, for a unit, derives the
    /// generation state from its seed. The live register ends up back on the training
    /// state.
    pub fn new<A: Accelerator>(accelerator: &A, unit_rank: Option<usize>, offset: u64) -> Result<Self> {
        let training = accelerator.get_rng_state();
        let generation = match unit_rank {
            Some(unit) => {
                accelerator.manual_seed(generation_seed(unit, offset));
                let generation = accelerator.get_rng_state();
                accelerator.set_rng_state(&training)?;
                Some(generation)
            }
            None => None,
        };
        Ok(Self {
            training,
            generation,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.generation.is_some()
    }

    /// Parks the live training state and activates the generation state.
    pub fn enter_generation<A: Accelerator>(&mut self, accelerator: &A) -> Result<()> {
        if let Some(generation) = &self.generation {
            let training = accelerator.get_rng_state();
            accelerator.set_rng_state(generation)?;
            self.training = training;
        }
        Ok(())
    }

    /// Parks the live generation state and reactivates the training state.
    pub fn exit_generation<A: Accelerator>(&mut self, accelerator: &A) -> Result<()> {
        if let Some(generation) = self.generation.as_mut() {
            *generation = accelerator.get_rng_state();
            accelerator.set_rng_state(&self.training)?;
        }
        Ok(())
    }

    pub fn training_state(&self) -> &RngState {
        &self.training
    }

    pub fn generation_state(&self) -> Option<&RngState> {
        self.generation.as_ref()
    }
}
