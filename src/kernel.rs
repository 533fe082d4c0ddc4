//! Strided traversal helpers.
//!
//! The strided (non-trivial) evaluation path walks logical indices in
//! row-major order with one per-axis counter set, carrying a running flat
//! offset for every participating array so no multi-index is ever
//! rematerialized. Offset arithmetic is overflow-checked once up front over
//! the worst-case span; the hot loop then runs unchecked.

use crate::extent::Extent;
use crate::{ArrayError, Result};
use smallvec::SmallVec;

pub(crate) fn dims_of(extent: &Extent) -> SmallVec<[usize; 8]> {
    extent.as_slice().iter().map(|&d| d as usize).collect()
}

/// Validate that every reachable offset of `dims`/`strides` fits an `isize`.
fn check_span(dims: &[usize], strides: &[i64]) -> Result<()> {
    let mut span = 0i64;
    for (&d, &s) in dims.iter().zip(strides.iter()) {
        if d == 0 {
            continue;
        }
        let reach = (d as i64 - 1)
            .checked_mul(s.abs())
            .ok_or(ArrayError::OffsetOverflow)?;
        span = span.checked_add(reach).ok_or(ArrayError::OffsetOverflow)?;
    }
    isize::try_from(span).map_err(|_| ArrayError::OffsetOverflow)?;
    Ok(())
}

/// Call `f` once per logical element in row-major order.
///
/// `strides_list` holds one stride vector per participating array (each of
/// rank `dims.len()`); `f` receives the matching flat element offsets.
pub(crate) fn for_each_offset<F>(dims: &[usize], strides_list: &[&[i64]], mut f: F) -> Result<()>
where
    F: FnMut(&[isize]),
{
    let rank = dims.len();
    for strides in strides_list {
        debug_assert_eq!(strides.len(), rank);
        check_span(dims, strides)?;
    }

    let total: usize = dims.iter().product();
    let narrays = strides_list.len();
    let mut offsets: SmallVec<[isize; 4]> = SmallVec::from_elem(0, narrays);

    if rank == 0 {
        f(&offsets);
        return Ok(());
    }
    if total == 0 {
        return Ok(());
    }

    let mut counters: SmallVec<[usize; 8]> = SmallVec::from_elem(0, rank);
    for _ in 0..total {
        f(&offsets);

        // Odometer increment, innermost axis first.
        for axis in (0..rank).rev() {
            counters[axis] += 1;
            for (k, strides) in strides_list.iter().enumerate() {
                offsets[k] += strides[axis] as isize;
            }
            if counters[axis] < dims[axis] {
                break;
            }
            counters[axis] = 0;
            for (k, strides) in strides_list.iter().enumerate() {
                offsets[k] -= dims[axis] as isize * strides[axis] as isize;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_order() {
        let dims = [2usize, 3];
        let strides: [i64; 2] = [3, 1];
        let mut seen = Vec::new();
        for_each_offset(&dims, &[&strides], |offs| seen.push(offs[0])).unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_transposed_walk() {
        // Walking a [3, 2] view with strides [1, 3] visits the storage of a
        // row-major [2, 3] block column-first.
        let dims = [3usize, 2];
        let strides: [i64; 2] = [1, 3];
        let mut seen = Vec::new();
        for_each_offset(&dims, &[&strides], |offs| seen.push(offs[0])).unwrap();
        assert_eq!(seen, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_multiple_arrays_in_lockstep() {
        let dims = [2usize, 2];
        let a: [i64; 2] = [2, 1];
        let b: [i64; 2] = [1, 2];
        let mut seen = Vec::new();
        for_each_offset(&dims, &[&a, &b], |offs| seen.push((offs[0], offs[1]))).unwrap();
        assert_eq!(seen, vec![(0, 0), (1, 2), (2, 1), (3, 3)]);
    }

    #[test]
    fn test_rank_zero_runs_once() {
        let mut count = 0;
        for_each_offset(&[], &[&[]], |offs| {
            assert_eq!(offs[0], 0);
            count += 1;
        })
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_span_overflow_detected() {
        let dims = [usize::MAX / 2];
        let strides: [i64; 1] = [i64::MAX / 2];
        assert!(matches!(
            for_each_offset(&dims, &[&strides], |_| {}),
            Err(ArrayError::OffsetOverflow)
        ));
    }
}
