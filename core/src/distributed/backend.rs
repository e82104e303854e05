use crate::error::{Error, Result};
use crate::tensor::{Device, Tensor, TensorElem};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// An opaque handle to a communication group: the global ranks taking part, in order.
///
/// Groups are created by whoever builds the parallel topology. This crate only passes
/// them to collectives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessGroup {
    ranks: Arc<[usize]>,
}

impl ProcessGroup {
    /// Creates a group over `ranks`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Collective` if `ranks` is empty or lists a rank twice.
    pub fn new(ranks: Vec<usize>) -> Result<Self> {
        if ranks.is_empty() {
            return Err(Error::Collective("process group must not be empty".into()));
        }
        for (i, r) in ranks.iter().enumerate() {
            if ranks[..i].contains(r) {
                return Err(Error::Collective(format!(
                    "rank {} listed twice in process group",
                    r
                )));
            }
        }
        Ok(Self {
            ranks: ranks.into(),
        })
    }

    /// The group of every rank in a world of `world_size`.
    pub fn world(world_size: usize) -> Self {
        Self {
            ranks: (0..world_size).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.ranks.len()
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn contains(&self, rank: usize) -> bool {
        self.ranks.contains(&rank)
    }

    /// Position of a global rank within this group.
    pub fn group_rank(&self, rank: usize) -> Option<usize> {
        self.ranks.iter().position(|&r| r == rank)
    }
}

/// Abstraction for a distributed communication backend.
///
/// Every method is a collective: each member of `group` must issue the matching call, in
/// the same order, or the call blocks forever. There is no timeout.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the global rank of the current process/thread.
    fn rank(&self) -> usize;

    /// Returns the total number of processes/threads.
    fn world_size(&self) -> usize;

    fn world_group(&self) -> ProcessGroup {
        ProcessGroup::world(self.world_size())
    }

    /// Number of ranks in `group`.
    fn group_size(&self, group: &ProcessGroup) -> usize {
        group.size()
    }

    /// All-gathers a tensor along `dim` across `group`.
    ///
    /// Contributions are concatenated in group order. If each member holds `[H, W]` and
    /// `dim = 0`, the result is `[H * group_size, W]` on every member.
    fn all_gather<T: TensorElem, D: Device>(
        &self,
        tensor: &Tensor<T, 2, D>,
        group: &ProcessGroup,
        dim: usize,
    ) -> Result<Tensor<T, 2, D>>;

    /// All-gathers an arbitrary serializable object across `group`, in group order.
    fn all_gather_object<O: Serialize + DeserializeOwned>(
        &self,
        object: &O,
        group: &ProcessGroup,
    ) -> Result<Vec<O>>;
}

impl<B: CollectiveBackend> CollectiveBackend for Arc<B> {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn world_size(&self) -> usize {
        (**self).world_size()
    }

    fn world_group(&self) -> ProcessGroup {
        (**self).world_group()
    }

    fn group_size(&self, group: &ProcessGroup) -> usize {
        (**self).group_size(group)
    }

    fn all_gather<T: TensorElem, D: Device>(
        &self,
        tensor: &Tensor<T, 2, D>,
        group: &ProcessGroup,
        dim: usize,
    ) -> Result<Tensor<T, 2, D>> {
        (**self).all_gather(tensor, group, dim)
    }

    fn all_gather_object<O: Serialize + DeserializeOwned>(
        &self,
        object: &O,
        group: &ProcessGroup,
    ) -> Result<Vec<O>> {
        (**self).all_gather_object(object, group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_group() {
        let group = ProcessGroup::new(vec![2, 3]).unwrap();
        assert_eq!(group.size(), 2);
        assert!(group.contains(3));
        assert!(!group.contains(0));
        assert_eq!(group.group_rank(3), Some(1));
        assert_eq!(group.group_rank(0), None);
    }

    #[test]
    fn test_invalid_process_group() {
        assert!(ProcessGroup::new(vec![]).is_err());
        assert!(ProcessGroup::new(vec![1, 1]).is_err());
    }

    #[test]
    fn test_world_group() {
        assert_eq!(ProcessGroup::world(3).ranks(), &[0, 1, 2]);
    }
}
