//! The inference-engine seam.
//!
//! Generation itself lives outside this crate. An engine only has to accept a full weight
//! mapping, toggle between its sleeping and working footprint, and say which
//! tensor-parallel group it is sharded over.

use crate::distributed::ProcessGroup;
use crate::error::{Error, Result};
use crate::state_dict::StateDict;
use crate::tensor::{Cpu, Device, TensorElem};
use serde::{Deserialize, Serialize};

/// How much an engine releases when put to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum SleepLevel {
    /// Offload weights to host memory and drop the KV cache. Waking is cheap.
    #[default]
    Offload = 1,
    /// Discard weights as well. The next wake-up must be followed by a full load.
    Discard = 2,
}

impl TryFrom<u8> for SleepLevel {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            1 => Ok(SleepLevel::Offload),
            2 => Ok(SleepLevel::Discard),
            other => Err(Error::Config(format!("unknown sleep level {}", other))),
        }
    }
}

impl From<SleepLevel> for u8 {
    fn from(level: SleepLevel) -> u8 {
        level as u8
    }
}

/// An inference replica partitioned over its own tensor-parallel group.
pub trait InferenceEngine<T: TensorElem, D: Device = Cpu> {
    /// Leaves sleep and reallocates working memory.
    fn wake_up(&mut self) -> Result<()>;

    /// Releases working memory according to `level`.
    fn sleep(&mut self, level: SleepLevel) -> Result<()>;

    /// Ingests a full name -> tensor mapping and reshards it internally.
    ///
    /// Renaming between training-side and engine-side parameter names is the engine's job.
    /// The mapping must be fully consumed before this returns.
    fn load_weights(&mut self, weights: &StateDict<T, D>) -> Result<()>;

    fn tensor_parallel_group(&self) -> &ProcessGroup;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_level_codes() {
        assert_eq!(u8::from(SleepLevel::Offload), 1);
        assert_eq!(SleepLevel::try_from(2).unwrap(), SleepLevel::Discard);
        assert!(SleepLevel::try_from(0).is_err());
    }

    #[test]
    fn test_sleep_level_serde() {
        assert_eq!(serde_json::to_string(&SleepLevel::Discard).unwrap(), "2");
        let level: SleepLevel = serde_json::from_str("1").unwrap();
        assert_eq!(level, SleepLevel::Offload);
        assert!(serde_json::from_str::<SleepLevel>("3").is_err());
    }
}
