use super::backend::{CollectiveBackend, ProcessGroup};
use crate::error::{Error, Result};
use crate::tensor::{Device, Tensor, TensorElem};
use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use tracing::trace;

type Payload = Box<dyn Any + Send>;

/// An in-process collective backend: one instance per rank, each driven from its own
/// thread.
///
/// Ranks are wired as a full mesh of `crossbeam` channels, one per ordered pair, so a
/// collective over any subgroup can run its ring without seeing traffic from other
/// groups. All-gather uses the **ring** algorithm: in each of `n - 1` steps a member
/// forwards the block it received in the previous step to its right neighbour and
/// receives a new block from its left neighbour.
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    /// `to_peer[r]` delivers to rank `r`.
    to_peer: Vec<Sender<Payload>>,
    /// `from_peer[r]` receives what rank `r` sent to us.
    from_peer: Vec<Receiver<Payload>>,
}

impl CpuBackend {
    /// Builds a fully connected cluster of `world_size` backends, indexed by rank.
    pub fn cluster(world_size: usize) -> Vec<CpuBackend> {
        // links[dst][src] carries messages from `src` to `dst`.
        let links: Vec<Vec<(Sender<Payload>, Receiver<Payload>)>> = (0..world_size)
            .map(|_| (0..world_size).map(|_| unbounded()).collect())
            .collect();

        (0..world_size)
            .map(|rank| CpuBackend {
                rank,
                world_size,
                to_peer: (0..world_size).map(|dst| links[dst][rank].0.clone()).collect(),
                from_peer: links[rank].iter().map(|(_, rx)| rx.clone()).collect(),
            })
            .collect()
    }

    /// Ring all-gather of opaque payloads, returned in group order.
    fn ring_all_gather<P>(&self, mine: P, group: &ProcessGroup, what: &str) -> Result<Vec<P>>
    where
        P: Clone + Send + 'static,
    {
        let n = group.size();
        let idx = group.group_rank(self.rank).ok_or_else(|| {
            Error::Collective(format!(
                "rank {} is not a member of group {:?}",
                self.rank,
                group.ranks()
            ))
        })?;
        let members = group.ranks();
        if let Some(&bad) = members.iter().find(|&&r| r >= self.world_size) {
            return Err(Error::Collective(format!(
                "group member {} outside world of size {}",
                bad, self.world_size
            )));
        }
        let right = members[(idx + 1) % n];
        let left = members[(idx + n - 1) % n];

        let mut blocks: Vec<Option<P>> = vec![None; n];
        blocks[idx] = Some(mine);

        for step in 0..n - 1 {
            let send_idx = (idx + n - step) % n;
            let recv_idx = (idx + n - step - 1) % n;

            let block = blocks[send_idx]
                .clone()
                .ok_or_else(|| Error::Collective(format!("ring step {} has no block to forward", step)))?;
            self.to_peer[right]
                .send(Box::new(block))
                .map_err(|_| Error::Collective(format!("rank {} hung up", right)))?;

            let received = self.from_peer[left]
                .recv()
                .map_err(|_| Error::Collective(format!("rank {} hung up", left)))?;
            let block = received.downcast::<P>().map_err(|_| {
                Error::Collective(format!(
                    "rank {} received a mismatched payload from rank {} during {}",
                    self.rank, left, what
                ))
            })?;
            blocks[recv_idx] = Some(*block);
        }

        trace!(rank = self.rank, group = ?members, "{} complete", what);
        blocks
            .into_iter()
            .map(|b| b.ok_or_else(|| Error::Collective(format!("{} left a gap", what))))
            .collect()
    }
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_gather<T: TensorElem, D: Device>(
        &self,
        tensor: &Tensor<T, 2, D>,
        group: &ProcessGroup,
        dim: usize,
    ) -> Result<Tensor<T, 2, D>> {
        let block = (tensor.data().to_vec(), *tensor.shape());
        let blocks = self.ring_all_gather(block, group, "all_gather")?;

        let parts = blocks
            .into_iter()
            .map(|(data, shape)| Tensor::from_vec_on(data, shape, tensor.device().clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let refs: Vec<&Tensor<T, 2, D>> = parts.iter().collect();
        Ok(Tensor::cat(&refs, dim)?)
    }

    fn all_gather_object<O: Serialize + DeserializeOwned>(
        &self,
        object: &O,
        group: &ProcessGroup,
    ) -> Result<Vec<O>> {
        let bytes = serde_json::to_vec(object)?;
        self.ring_all_gather(bytes, group, "all_gather_object")?
            .iter()
            .map(|b| serde_json::from_slice(b).map_err(Error::from))
            .collect()
    }
}

impl std::fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuBackend")
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_single_rank_gather_is_copy() {
        let backend = CpuBackend::cluster(1).pop().unwrap();
        let group = backend.world_group();
        let t = Tensor::<f32, 2>::new(vec![1.0, 2.0], [1, 2]).unwrap();

        let gathered = backend.all_gather(&t, &group, 0).unwrap();
        assert_eq!(gathered, t);

        let objects = backend.all_gather_object(&"hello".to_string(), &group).unwrap();
        assert_eq!(objects, vec!["hello".to_string()]);
    }

    #[test]
    fn test_non_member_is_rejected() {
        let mut cluster = CpuBackend::cluster(2);
        let backend = cluster.remove(0);
        let group = ProcessGroup::new(vec![1]).unwrap();
        let t = Tensor::<f32, 2>::zeros([1, 1]);
        assert!(matches!(
            backend.all_gather(&t, &group, 0),
            Err(Error::Collective(_))
        ));
    }

    #[test]
    fn test_backend_properties() {
        let cluster = CpuBackend::cluster(4);
        assert_eq!(cluster[2].rank(), 2);
        assert_eq!(cluster[2].world_size(), 4);
        assert_eq!(format!("{:?}", cluster[1]), "CpuBackend { rank: 1, world_size: 4 }");
    }
}
