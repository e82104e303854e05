use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_concat;
pub mod cpu_split;

pub use cpu_concat::{cpu_concat_cols, cpu_concat_rows};
pub use cpu_split::{cpu_narrow_rows, cpu_split_rows};

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Cannot split {rows} rows into {chunks} equal chunks")]
    UnevenSplit { rows: usize, chunks: usize },
    #[error("Row range {start}..{end} out of bounds for {rows} rows")]
    RowsOutOfBounds {
        start: usize,
        end: usize,
        rows: usize,
    },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// This mirrors `TensorElem` in the main crate to avoid circular dependencies.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}
