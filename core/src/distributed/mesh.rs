use super::backend::ProcessGroup;
use crate::error::{Error, Result};

/// A named, row-major arrangement of global ranks, e.g. `[("dp", 2), ("tp", 2)]`.
///
/// The last dimension varies fastest: with the mesh above, ranks 0 and 1 share a `dp`
/// coordinate and form one `tp` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMesh {
    dims: Vec<(String, usize)>,
    rank: usize,
}

impl DeviceMesh {
    /// Creates the view of `rank` into a mesh with the given dimensions.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty mesh, a zero-sized or duplicated dimension,
    /// or a rank outside the mesh.
    pub fn new(dims: &[(&str, usize)], rank: usize) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::Config("device mesh needs at least one dimension".into()));
        }
        for (i, (name, size)) in dims.iter().enumerate() {
            if *size == 0 {
                return Err(Error::Config(format!("mesh dimension '{}' has size 0", name)));
            }
            if dims[..i].iter().any(|(n, _)| n == name) {
                return Err(Error::Config(format!("mesh dimension '{}' listed twice", name)));
            }
        }
        let world: usize = dims.iter().map(|(_, s)| s).product();
        if rank >= world {
            return Err(Error::Config(format!(
                "rank {} outside mesh of {} ranks",
                rank, world
            )));
        }
        Ok(Self {
            dims: dims.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
            rank,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.dims.iter().map(|(_, s)| s).product()
    }

    pub fn size(&self, name: &str) -> Option<usize> {
        self.position(name).map(|i| self.dims[i].1)
    }

    /// This rank's coordinate along `name`.
    pub fn local_rank(&self, name: &str) -> Option<usize> {
        let i = self.position(name)?;
        Some((self.rank / self.stride(i)) % self.dims[i].1)
    }

    /// The ranks that share every coordinate with this rank except along `name`.
    pub fn group(&self, name: &str) -> Option<ProcessGroup> {
        let i = self.position(name)?;
        let stride = self.stride(i);
        let coord = (self.rank / stride) % self.dims[i].1;
        let base = self.rank - coord * stride;
        let ranks = (0..self.dims[i].1).map(|c| base + c * stride).collect();
        ProcessGroup::new(ranks).ok()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|(n, _)| n == name)
    }

    fn stride(&self, i: usize) -> usize {
        self.dims[i + 1..].iter().map(|(_, s)| s).product()
    }
}
