use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Concatenates row-major matrices along the leading (row) dimension.
///
/// Every part must have `cols` columns. The output holds the rows of `parts[0]`
/// followed by the rows of `parts[1]`, and so on.
pub fn cpu_concat_rows<T>(parts: &[&[T]], cols: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    for part in parts {
        if cols == 0 || part.len() % cols != 0 {
            return Err(KernelError::ShapeMismatch {
                expected: vec![cols],
                got: vec![part.len()],
            });
        }
    }

    let total: usize = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(part);
    }
    Ok(out)
}

/// Concatenates row-major matrices along the second (column) dimension.
///
/// All parts must share `rows`; `cols[i]` is the width of `parts[i]`. Output row `r`
/// is the concatenation of row `r` of every part.
pub fn cpu_concat_cols<T>(parts: &[&[T]], rows: usize, cols: &[usize]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    if parts.len() != cols.len() {
        return Err(KernelError::ShapeMismatch {
            expected: vec![parts.len()],
            got: vec![cols.len()],
        });
    }
    for (part, &c) in parts.iter().zip(cols) {
        if part.len() != rows * c {
            return Err(KernelError::ShapeMismatch {
                expected: vec![rows, c],
                got: vec![part.len()],
            });
        }
    }

    let out_cols: usize = cols.iter().sum();
    let mut out = vec![T::zero(); rows * out_cols];
    if out_cols == 0 {
        return Ok(out);
    }

    // Each output row is assembled independently.
    out.par_chunks_mut(out_cols)
        .enumerate()
        .for_each(|(r, out_row)| {
            let mut offset = 0;
            for (part, &c) in parts.iter().zip(cols) {
                out_row[offset..offset + c].copy_from_slice(&part[r * c..(r + 1) * c]);
                offset += c;
            }
        });

    Ok(out)
}
