//! Row operations on rank-2 tensors.
//!
//! Gathering a batch across a parallel group concatenates along the leading dimension;
//! handing results back splits along it again. Both are delegated to the rayon kernels in
//! `rollout_sync_kernels`.
//!
//! ```rust
//! use rollout_sync::tensor::Tensor;
//!
//! let a = Tensor::<f32, 2>::new(vec![1.0, 2.0], [1, 2]).unwrap();
//! let b = Tensor::<f32, 2>::new(vec![3.0, 4.0], [1, 2]).unwrap();
//!
//! let c = Tensor::cat(&[&a, &b], 0).unwrap();
//! assert_eq!(c.shape(), &[2, 2]);
//!
//! let halves = c.chunk(2).unwrap();
//! assert_eq!(halves[1].data(), &[3.0, 4.0]);
//! ```

use super::{Device, Result, Tensor, TensorElem, TensorError};
use rollout_sync_kernels::{
    KernelError, cpu_concat_cols, cpu_concat_rows, cpu_narrow_rows, cpu_split_rows,
};

impl From<KernelError> for TensorError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::ShapeMismatch { expected, got } => {
                TensorError::ShapeMismatch { expected, got }
            }
            KernelError::UnevenSplit { rows, chunks } => TensorError::Unsupported(format!(
                "cannot chunk {} rows into {} equal parts",
                rows, chunks
            )),
            KernelError::RowsOutOfBounds { start, end, rows } => TensorError::IndexOutOfBounds {
                index: vec![start, end],
                shape: vec![rows],
            },
        }
    }
}

impl<T, D> Tensor<T, 2, D>
where
    T: TensorElem,
    D: Device,
{
    /// Number of rows (the leading, batch dimension).
    pub const fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Number of columns.
    pub const fn cols(&self) -> usize {
        self.shape[1]
    }

    /// Concatenates tensors along `dim` (0 or 1).
    ///
    /// The output lives on the device of the first part.
    ///
    /// # Errors
    ///
    /// - `TensorError::Unsupported` if `parts` is empty or `dim > 1`.
    /// - `TensorError::ShapeMismatch` if the non-concatenated dimension differs.
    pub fn cat(parts: &[&Self], dim: usize) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| TensorError::Unsupported("cat of zero tensors".into()))?;
        let slices: Vec<&[T]> = parts.iter().map(|p| p.data()).collect();

        let (data, shape) = match dim {
            0 => {
                let cols = first.cols();
                if let Some(bad) = parts.iter().find(|p| p.cols() != cols) {
                    return Err(TensorError::ShapeMismatch {
                        expected: vec![bad.rows(), cols],
                        got: bad.shape.to_vec(),
                    });
                }
                let rows = parts.iter().map(|p| p.rows()).sum();
                if cols == 0 {
                    (Vec::new(), [rows, 0])
                } else {
                    (cpu_concat_rows(&slices, cols)?, [rows, cols])
                }
            }
            1 => {
                let rows = first.rows();
                if let Some(bad) = parts.iter().find(|p| p.rows() != rows) {
                    return Err(TensorError::ShapeMismatch {
                        expected: vec![rows, bad.cols()],
                        got: bad.shape.to_vec(),
                    });
                }
                let cols: Vec<usize> = parts.iter().map(|p| p.cols()).collect();
                let total = cols.iter().sum();
                (cpu_concat_cols(&slices, rows, &cols)?, [rows, total])
            }
            _ => {
                return Err(TensorError::Unsupported(format!(
                    "cat along dim {} of a rank-2 tensor",
                    dim
                )));
            }
        };

        Tensor::from_vec_on(data, shape, first.device.clone())
    }

    /// Splits the tensor into `chunks` contiguous row blocks of equal size.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::Unsupported` if the row count is not divisible by `chunks`.
    pub fn chunk(&self, chunks: usize) -> Result<Vec<Self>> {
        let (rows, cols) = (self.rows(), self.cols());
        if chunks == 0 || rows % chunks != 0 {
            return Err(KernelError::UnevenSplit { rows, chunks }.into());
        }
        let chunk_rows = rows / chunks;

        if cols == 0 {
            return (0..chunks)
                .map(|_| Tensor::from_vec_on(Vec::new(), [chunk_rows, 0], self.device.clone()))
                .collect();
        }

        cpu_split_rows(self.data(), cols, chunks)?
            .into_iter()
            .map(|data| Tensor::from_vec_on(data, [chunk_rows, cols], self.device.clone()))
            .collect()
    }

    /// Copies rows `[start, start + len)` into a new tensor.
    pub fn narrow_rows(&self, start: usize, len: usize) -> Result<Self> {
        let cols = self.cols();
        if cols == 0 {
            if start + len > self.rows() {
                return Err(TensorError::IndexOutOfBounds {
                    index: vec![start, start + len],
                    shape: vec![self.rows()],
                });
            }
            return Tensor::from_vec_on(Vec::new(), [len, 0], self.device.clone());
        }
        let data = cpu_narrow_rows(self.data(), cols, start, len)?;
        Tensor::from_vec_on(data, [len, cols], self.device.clone())
    }
}
