//! The unit of generation input and output.
//!
//! A [`Batch`] carries tensor fields and non-tensor fields that are aligned by row: row
//! `i` of every tensor and element `i` of every non-tensor sequence describe the same
//! sample. Operations either transform every field or leave the batch as it was.

use crate::accelerator::{Accelerator, Placement};
use crate::error::{Error, Result};
use crate::tensor::{Cpu, Device, Tensor, TensorElem};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type TensorFields<T, D = Cpu> = BTreeMap<String, Tensor<T, 2, D>>;
pub type NonTensorFields = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T: TensorElem, D: Device = Cpu> {
    /// Row-major `[rows, features]` fields.
    pub tensors: TensorFields<T, D>,
    /// Per-row values that are not tensors (prompts, ids, reward metadata).
    pub non_tensors: NonTensorFields,
    /// Batch-level values. Never split or gathered.
    pub meta_info: Map<String, Value>,
    placement: Placement,
}

impl<T: TensorElem, D: Device> Default for Batch<T, D> {
    fn default() -> Self {
        Self {
            tensors: BTreeMap::new(),
            non_tensors: BTreeMap::new(),
            meta_info: Map::new(),
            placement: Placement::Host,
        }
    }
}

impl<T: TensorElem, D: Device> Batch<T, D> {
    /// Creates a host-resident batch.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidBatch` if the fields disagree on the row count.
    pub fn new(tensors: TensorFields<T, D>, non_tensors: NonTensorFields) -> Result<Self> {
        let batch = Self {
            tensors,
            non_tensors,
            ..Self::default()
        };
        batch.check_consistency()?;
        Ok(batch)
    }

    pub fn with_meta_info(mut self, meta_info: Map<String, Value>) -> Self {
        self.meta_info = meta_info;
        self
    }

    /// Declares where the tensor fields currently live, without moving them.
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Number of rows, taken from the first tensor field, else the first non-tensor field.
    pub fn len(&self) -> usize {
        if let Some(t) = self.tensors.values().next() {
            return t.rows();
        }
        self.non_tensors.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that every field has the same number of rows.
    pub fn check_consistency(&self) -> Result<()> {
        let rows = self.len();
        for (name, t) in &self.tensors {
            if t.rows() != rows {
                return Err(Error::InvalidBatch(format!(
                    "tensor field '{}' has {} rows, expected {}",
                    name,
                    t.rows(),
                    rows
                )));
            }
        }
        for (name, values) in &self.non_tensors {
            if values.len() != rows {
                return Err(Error::InvalidBatch(format!(
                    "non-tensor field '{}' has {} rows, expected {}",
                    name,
                    values.len(),
                    rows
                )));
            }
        }
        Ok(())
    }

    /// Moves every tensor field to `placement`.
    pub fn to<A: Accelerator>(&mut self, accelerator: &A, placement: Placement) -> Result<()> {
        if placement == self.placement {
            return Ok(());
        }
        let moved = self
            .tensors
            .iter()
            .map(|(name, t)| Ok((name.clone(), accelerator.to_device(t, placement)?)))
            .collect::<Result<TensorFields<T, D>>>()?;
        self.tensors = moved;
        self.placement = placement;
        Ok(())
    }

    /// Copies rows `[start, start + len)` of every field.
    pub fn narrow(&self, start: usize, len: usize) -> Result<Self> {
        let end = start + len;
        if end > self.len() {
            return Err(Error::InvalidBatch(format!(
                "rows {}..{} out of range for batch of {}",
                start,
                end,
                self.len()
            )));
        }
        let tensors = self
            .tensors
            .iter()
            .map(|(name, t)| Ok((name.clone(), t.narrow_rows(start, len)?)))
            .collect::<Result<TensorFields<T, D>>>()?;
        let non_tensors = self
            .non_tensors
            .iter()
            .map(|(name, v)| (name.clone(), v[start..end].to_vec()))
            .collect();
        Ok(Self {
            tensors,
            non_tensors,
            meta_info: self.meta_info.clone(),
            placement: self.placement,
        })
    }

    /// Splits into `chunks` contiguous batches of equal size.
    ///
    /// Chunk `i` holds rows `[i * N / chunks, (i + 1) * N / chunks)`.
    pub fn chunk(&self, chunks: usize) -> Result<Vec<Self>> {
        let rows = self.len();
        if chunks == 0 || rows % chunks != 0 {
            return Err(Error::InvalidBatch(format!(
                "cannot split {} rows into {} equal chunks",
                rows, chunks
            )));
        }
        let step = rows / chunks;
        (0..chunks).map(|i| self.narrow(i * step, step)).collect()
    }

    /// Concatenates batches along rows, in order.
    ///
    /// Field sets must match. Meta info and placement come from the first batch.
    pub fn concat(batches: &[Self]) -> Result<Self> {
        let first = batches
            .first()
            .ok_or_else(|| Error::InvalidBatch("concat of zero batches".into()))?;
        for b in &batches[1..] {
            if !b.tensors.keys().eq(first.tensors.keys())
                || !b.non_tensors.keys().eq(first.non_tensors.keys())
            {
                return Err(Error::InvalidBatch("concat of batches with different fields".into()));
            }
        }

        let tensors = first
            .tensors
            .keys()
            .map(|name| {
                let parts: Vec<&Tensor<T, 2, D>> = batches.iter().map(|b| &b.tensors[name]).collect();
                Ok((name.clone(), Tensor::cat(&parts, 0)?))
            })
            .collect::<Result<TensorFields<T, D>>>()?;
        let non_tensors = first
            .non_tensors
            .keys()
            .map(|name| {
                let values = batches
                    .iter()
                    .flat_map(|b| b.non_tensors[name].iter().cloned())
                    .collect();
                (name.clone(), values)
            })
            .collect();

        Ok(Self {
            tensors,
            non_tensors,
            meta_info: first.meta_info.clone(),
            placement: first.placement,
        })
    }
}
