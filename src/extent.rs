//! Shape descriptors: dimension vectors and element strides.
//!
//! An [`Extent`] is the per-axis length vector of an array; a [`Stride`] is
//! the per-axis element step used to turn a multi-index into a flat offset
//! (`offset = Σ iₖ·strideₖ`). Strides cache two derived booleans:
//!
//! - *trivial* — the strides equal the natural row-major strides of the
//!   extent, so a flat element index is directly a storage offset;
//! - *contiguous* — the covered elements form one gap-free block with
//!   innermost step 1.
//!
//! Operations that permute axes or offset into a sub-array recompute or
//! conservatively clear these flags; the evaluator's fast path requires both.

use crate::{ArrayError, Result};
use smallvec::SmallVec;
use std::fmt;

/// Maximum number of dimensions an array may have.
pub const MAX_DIMS: usize = 32;

/// Sentinel dimension for [`Extent::reshaped`] targets: resolves to the
/// unique size that preserves the element count.
pub const AUTO: i64 = -1;

type Dims = SmallVec<[i64; 8]>;

/// Per-axis length vector. `ndim() == 0` denotes a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extent {
    dims: Dims,
}

impl Extent {
    /// Create an extent from per-axis lengths. Every length must be ≥ 1 and
    /// the rank must not exceed [`MAX_DIMS`].
    pub fn new(dims: &[i64]) -> Result<Self> {
        if dims.len() > MAX_DIMS {
            return Err(ArrayError::ShapeMismatch {
                what: format!("rank {} exceeds the {MAX_DIMS}-dimension limit", dims.len()),
            });
        }
        for &d in dims {
            if d < 1 {
                return Err(ArrayError::ShapeMismatch {
                    what: format!("invalid dimension {d} in {dims:?}"),
                });
            }
        }
        Ok(Self {
            dims: Dims::from_slice(dims),
        })
    }

    /// The rank-0 extent of a scalar.
    pub fn scalar() -> Self {
        Self { dims: Dims::new() }
    }

    /// Number of dimensions.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements: the product of all dimensions, or 1 for a
    /// scalar extent.
    #[inline]
    pub fn size(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Length of axis `axis`.
    #[inline]
    pub fn dim(&self, axis: usize) -> i64 {
        self.dims[axis]
    }

    #[inline]
    pub fn as_slice(&self) -> &[i64] {
        &self.dims
    }

    /// Resolve a reshape target against this extent's element count.
    ///
    /// At most one entry may be [`AUTO`]; it becomes the unique missing
    /// factor. Fails with `InvalidReshape` when the product disagrees, the
    /// auto slot does not divide evenly, or two `AUTO`s appear.
    pub fn reshaped(&self, target: &[i64]) -> Result<Extent> {
        if target.len() > MAX_DIMS {
            return Err(ArrayError::InvalidReshape {
                what: format!("rank {} exceeds the {MAX_DIMS}-dimension limit", target.len()),
            });
        }

        let size = self.size() as i64;
        let mut auto_axis = None;
        let mut known = 1i64;
        for (axis, &d) in target.iter().enumerate() {
            if d == AUTO {
                if auto_axis.is_some() {
                    return Err(ArrayError::InvalidReshape {
                        what: format!("more than one AUTO dimension in {target:?}"),
                    });
                }
                auto_axis = Some(axis);
            } else if d < 1 {
                return Err(ArrayError::InvalidReshape {
                    what: format!("invalid dimension {d} in {target:?}"),
                });
            } else {
                known *= d;
            }
        }

        let mut dims = Dims::from_slice(target);
        if let Some(axis) = auto_axis {
            if known == 0 || size % known != 0 {
                return Err(ArrayError::InvalidReshape {
                    what: format!("cannot infer AUTO in {target:?} for {size} elements"),
                });
            }
            dims[axis] = size / known;
        } else if known != size {
            return Err(ArrayError::InvalidReshape {
                what: format!("cannot reshape {size} elements into {target:?}"),
            });
        }

        Ok(Extent { dims })
    }

    /// Permute axes. An empty `order` reverses them; otherwise `order` must
    /// be a permutation of `0..ndim`.
    pub fn permuted(&self, order: &[usize]) -> Result<Extent> {
        let order = resolve_order(self.ndim(), order)?;
        let dims = order.iter().map(|&ax| self.dims[ax]).collect();
        Ok(Extent { dims })
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_slice())
    }
}

/// Validate a transpose order, defaulting empty to the full reversal.
pub(crate) fn resolve_order(ndim: usize, order: &[usize]) -> Result<SmallVec<[usize; 8]>> {
    if order.is_empty() {
        return Ok((0..ndim).rev().collect());
    }
    if order.len() != ndim {
        return Err(ArrayError::ShapeMismatch {
            what: format!("transpose order {order:?} for rank {ndim}"),
        });
    }
    let mut seen = [false; MAX_DIMS];
    for &ax in order {
        if ax >= ndim || seen[ax] {
            return Err(ArrayError::ShapeMismatch {
                what: format!("transpose order {order:?} is not a permutation of 0..{ndim}"),
            });
        }
        seen[ax] = true;
    }
    Ok(SmallVec::from_slice(order))
}

/// Per-axis element steps plus the cached trivial/contiguous flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stride {
    steps: Dims,
    trivial: bool,
    contiguous: bool,
}

impl Stride {
    /// Natural row-major strides for `extent`: innermost axis steps by 1.
    pub fn from_extent(extent: &Extent) -> Self {
        let n = extent.ndim();
        let mut steps = Dims::from_elem(0, n);
        let mut acc = 1i64;
        for axis in (0..n).rev() {
            steps[axis] = acc;
            acc *= extent.dim(axis);
        }
        Self {
            steps,
            trivial: true,
            contiguous: true,
        }
    }

    /// Build from raw steps, computing both flags against `extent`.
    pub fn from_steps(extent: &Extent, steps: &[i64]) -> Self {
        let mut s = Self {
            steps: Dims::from_slice(steps),
            trivial: false,
            contiguous: false,
        };
        s.recompute_flags(extent);
        s
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn step(&self, axis: usize) -> i64 {
        self.steps[axis]
    }

    #[inline]
    pub fn as_slice(&self) -> &[i64] {
        &self.steps
    }

    /// True when the steps equal the natural row-major strides.
    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.trivial
    }

    /// True when the covered elements form one gap-free block.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    /// Conservatively drop both flags (used after pointer-offsetting
    /// operations whose resulting layout is not re-examined).
    pub fn clear_flags(&mut self) {
        self.trivial = false;
        self.contiguous = false;
    }

    /// Re-derive both flags against `extent`.
    pub fn recompute_flags(&mut self, extent: &Extent) {
        self.trivial = self.steps == Stride::from_extent(extent).steps;
        self.contiguous = compute_contiguous(extent.as_slice(), &self.steps);
    }

    /// Permute axes in lockstep with [`Extent::permuted`]. The flags survive
    /// only for the identity permutation.
    pub fn permuted(&self, order: &[usize]) -> Result<Stride> {
        let order = resolve_order(self.ndim(), order)?;
        let identity = order.iter().copied().eq(0..self.ndim());
        let steps: Dims = order.iter().map(|&ax| self.steps[ax]).collect();
        Ok(Stride {
            steps,
            trivial: self.trivial && identity,
            contiguous: self.contiguous && identity,
        })
    }

    /// Flat element offset of a multi-index.
    #[inline]
    pub fn offset_of(&self, index: &[i64]) -> i64 {
        index
            .iter()
            .zip(self.steps.iter())
            .map(|(&i, &s)| i * s)
            .sum()
    }
}

/// Gap-free check: sort axes by step magnitude and require each step to equal
/// the product of the faster dimensions, with the innermost step 1.
fn compute_contiguous(dims: &[i64], steps: &[i64]) -> bool {
    if dims.is_empty() {
        return true;
    }
    let mut axes: SmallVec<[usize; 8]> = (0..dims.len()).collect();
    axes.sort_by_key(|&ax| steps[ax].abs());
    let mut expected = 1i64;
    for &ax in &axes {
        if dims[ax] <= 1 {
            continue;
        }
        if steps[ax].abs() != expected {
            return false;
        }
        expected *= dims[ax];
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_size() {
        let e = Extent::new(&[2, 3, 4]).unwrap();
        assert_eq!(e.ndim(), 3);
        assert_eq!(e.size(), 24);
        assert_eq!(Extent::scalar().size(), 1);
    }

    #[test]
    fn test_extent_rejects_bad_dims() {
        assert!(Extent::new(&[2, 0]).is_err());
        assert!(Extent::new(&[-3]).is_err());
        assert!(Extent::new(&vec![1i64; MAX_DIMS + 1]).is_err());
    }

    #[test]
    fn test_reshape_auto() {
        let e = Extent::new(&[2, 3, 4]).unwrap();
        let r = e.reshaped(&[6, AUTO]).unwrap();
        assert_eq!(r.as_slice(), &[6, 4]);

        let r = e.reshaped(&[AUTO]).unwrap();
        assert_eq!(r.as_slice(), &[24]);

        assert!(e.reshaped(&[AUTO, AUTO, 6]).is_err());
        assert!(e.reshaped(&[5, AUTO]).is_err());
        assert!(e.reshaped(&[2, 3]).is_err());
    }

    #[test]
    fn test_natural_strides() {
        let e = Extent::new(&[2, 3, 4]).unwrap();
        let s = Stride::from_extent(&e);
        assert_eq!(s.as_slice(), &[12, 4, 1]);
        assert!(s.is_trivial());
        assert!(s.is_contiguous());
    }

    #[test]
    fn test_transpose_clears_flags() {
        let e = Extent::new(&[2, 3]).unwrap();
        let s = Stride::from_extent(&e);

        let t = s.permuted(&[]).unwrap();
        assert_eq!(t.as_slice(), &[1, 3]);
        assert!(!t.is_trivial());
        assert!(!t.is_contiguous());

        let id = s.permuted(&[0, 1]).unwrap();
        assert!(id.is_trivial());
        assert!(id.is_contiguous());
    }

    #[test]
    fn test_transposed_layout_is_contiguous_by_recompute() {
        // A transposed square block still covers a gap-free region; only
        // triviality is lost.
        let e = Extent::new(&[3, 2]).unwrap();
        let s = Stride::from_steps(&e, &[1, 3]);
        assert!(!s.is_trivial());
        assert!(s.is_contiguous());
    }

    #[test]
    fn test_offset_of() {
        let e = Extent::new(&[2, 3, 4]).unwrap();
        let s = Stride::from_extent(&e);
        assert_eq!(s.offset_of(&[1, 2, 3]), 12 + 8 + 3);
    }

    #[test]
    fn test_bad_transpose_order() {
        let e = Extent::new(&[2, 3]).unwrap();
        assert!(e.permuted(&[0, 0]).is_err());
        assert!(e.permuted(&[0, 2]).is_err());
        assert!(e.permuted(&[0]).is_err());
    }
}
