use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Splits a row-major matrix into `chunks` contiguous row blocks of equal size.
///
/// Chunk `i` holds rows `[i * rows / chunks, (i + 1) * rows / chunks)`.
pub fn cpu_split_rows<T>(data: &[T], cols: usize, chunks: usize) -> Result<Vec<Vec<T>>>
where
    T: KernelElem,
{
    if cols == 0 || data.len() % cols != 0 {
        return Err(KernelError::ShapeMismatch {
            expected: vec![cols],
            got: vec![data.len()],
        });
    }
    let rows = data.len() / cols;
    if chunks == 0 || rows % chunks != 0 {
        return Err(KernelError::UnevenSplit { rows, chunks });
    }

    let chunk_len = (rows / chunks) * cols;
    if chunk_len == 0 {
        return Ok(vec![Vec::new(); chunks]);
    }
    Ok(data.par_chunks(chunk_len).map(|c| c.to_vec()).collect())
}

/// Copies rows `[start, start + len)` out of a row-major matrix.
pub fn cpu_narrow_rows<T>(data: &[T], cols: usize, start: usize, len: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    if cols == 0 || data.len() % cols != 0 {
        return Err(KernelError::ShapeMismatch {
            expected: vec![cols],
            got: vec![data.len()],
        });
    }
    let rows = data.len() / cols;
    let end = start + len;
    if end > rows {
        return Err(KernelError::RowsOutOfBounds { start, end, rows });
    }
    Ok(data[start * cols..end * cols].to_vec())
}
