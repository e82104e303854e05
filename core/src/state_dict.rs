//! Ordered parameter-name to tensor mappings.

use crate::memory::Allocation;
use crate::tensor::{Cpu, Device, Tensor, TensorElem};

/// The full, unsharded value of every parameter of a model, keyed by name.
///
/// Entries keep insertion order. A mapping produced by a training replica owns the pool
/// [`Allocation`] accounting for its tensors, so dropping it is what releases that memory
/// (into the pool cache).
#[derive(Debug)]
pub struct StateDict<T: TensorElem, D: Device = Cpu> {
    entries: Vec<(String, Tensor<T, 2, D>)>,
    allocation: Option<Allocation>,
}

impl<T: TensorElem, D: Device> Default for StateDict<T, D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            allocation: None,
        }
    }
}

impl<T: TensorElem, D: Device> StateDict<T, D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter, replacing (in place) any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor<T, 2, D>) -> Option<Tensor<T, 2, D>> {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, tensor)),
            None => {
                self.entries.push((name, tensor));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor<T, 2, D>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor<T, 2, D>)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Total bytes of every tensor in the mapping.
    pub fn nbytes(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.nbytes()).sum()
    }

    /// Ties the lifetime of a pool allocation to this mapping.
    pub fn with_allocation(mut self, allocation: Allocation) -> Self {
        self.allocation = Some(allocation);
        self
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }
}

impl<'a, T: TensorElem, D: Device> IntoIterator for &'a StateDict<T, D> {
    type Item = &'a (String, Tensor<T, 2, D>);
    type IntoIter = std::slice::Iter<'a, (String, Tensor<T, 2, D>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
