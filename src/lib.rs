//! High-performance dense N-dimensional arrays with lazy element-wise
//! expressions.
//!
//! `densor` represents multi-dimensional numeric arrays over a fixed set of
//! element types and evaluates element-wise and linear-algebra expressions
//! on a vectorized, thread-parallel CPU backend — and, with the `gpu`
//! feature, on CUDA devices through a JIT-compiled fused-kernel path.
//!
//! # Core Types
//!
//! - [`Array`]: the dense array value — shared-ownership storage plus
//!   extent, stride and view offset. `Clone` aliases; copies are explicit.
//! - [`Expr`]: a lazy element-wise expression tree built by the arithmetic
//!   operators; nothing is allocated until [`Expr::eval`].
//! - [`Dtype`] / [`Device`]: runtime element-type and placement tags with
//!   larger-ordinal promotion.
//! - [`Extent`] / [`Stride`]: shape descriptors with cached
//!   trivial/contiguous layout flags.
//!
//! # Example
//!
//! ```
//! use densor::{Array, Extent, Dtype, Device};
//!
//! let mut a = Array::new(Extent::new(&[2, 3])?, Dtype::Int64, Device::Cpu)?;
//! a.fill(5i64)?;
//! let b = (&a + &a).eval()?;
//! assert_eq!(b.to_vec::<i64>()?, vec![10; 6]);
//! assert_eq!(b.extent().as_slice(), &[2, 3]);
//! # Ok::<(), densor::ArrayError>(())
//! ```
//!
//! # Evaluation model
//!
//! Operators build expression trees; evaluation picks one of two
//! traversals. The *trivial* path (everything trivially laid out, or all
//! leaves sharing one stride) runs a flat SIMD-dispatched loop and fans out
//! over a worker pool above [`threading::parallel_threshold`] elements. The
//! *strided* path walks per-axis counters and per-leaf offsets. On the GPU
//! the whole tree fuses into one JIT-compiled kernel, cached process-wide
//! by source text.

#[macro_use]
mod scalar;

mod array;
mod dtype;
mod eval;
mod expr;
mod extent;
mod factories;
mod kernel;
mod linalg;
mod ops;
mod random;
mod simd;
mod storage;

pub mod threading;

#[cfg(feature = "gpu")]
mod gpu;

// ============================================================================
// Core types
// ============================================================================
pub use array::Array;
pub use dtype::{flags, Device, Dtype};
pub use extent::{Extent, Stride, AUTO, MAX_DIMS};
pub use scalar::{Scalar, ScalarValue};

// ============================================================================
// Expressions and operators
// ============================================================================
pub use expr::Expr;
pub use ops::{BinaryOp, DeviceFragment, MapKernel, UnaryOp};

// ============================================================================
// Operations and factories
// ============================================================================
pub use factories::{concatenate, linear, ones_like, random_like, range, stack, zeros_like};
pub use linalg::{dot, sum};
pub use random::RANDOM_SEED;
pub use threading::{optimise_threads, parallel_threshold, set_parallel_threshold};

// ============================================================================
// Error types
// ============================================================================

/// Errors surfaced by array operations.
///
/// Every error is reported at the boundary of the failing operation.
/// Operations that fail before any side effect leave all operands untouched;
/// a GPU launch failure may leave the destination partially written, with
/// lifetime invariants intact.
#[derive(Debug, thiserror::Error)]
pub enum ArrayError {
    /// Binary operands with incompatible non-scalar extents, or an
    /// assignment/combination with the wrong shape.
    #[error("shape mismatch: {what}")]
    ShapeMismatch { what: String },

    /// Subscript index outside the leading dimension.
    #[error("index {index} out of bounds for dimension of length {len}")]
    OutOfBounds { index: i64, len: i64 },

    /// Reshape with a mismatched element count, more than one `AUTO`, or a
    /// non-reshapeable layout.
    #[error("invalid reshape: {what}")]
    InvalidReshape { what: String },

    /// Operation on the `None` family, an unknown dtype name, or an
    /// operator the element type does not support.
    #[error("invalid dtype: {what}")]
    InvalidDtype { what: String },

    /// Unknown device name or an impossible device combination.
    #[error("invalid device: {what}")]
    InvalidDevice { what: String },

    /// GPU requested without GPU support compiled in or available.
    #[error("device unavailable: GPU support is not enabled")]
    DeviceUnavailable,

    /// Host or device allocation failure.
    #[error("out of memory")]
    OutOfMemory,

    /// Map-kernel precondition violation (same dtype, same extent,
    /// trivial-contiguous operands).
    #[error("invalid map operand: {what}")]
    InvalidMapOperand { what: String },

    /// GPU kernel compilation failure. Fatal for the operation; there is no
    /// CPU fallback.
    #[error("kernel compile error: {what}")]
    KernelCompile { what: String },

    /// GPU launch or transfer failure.
    #[error("launch error: {what}")]
    Launch { what: String },

    /// Operation on a default-constructed array.
    #[error("operation on an uninitialized array")]
    Uninitialized,

    /// Integer overflow while computing a strided offset.
    #[error("offset overflow while computing strided offsets")]
    OffsetOverflow,
}

/// Result type for array operations.
pub type Result<T> = std::result::Result<T, ArrayError>;
