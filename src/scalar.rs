//! Static element-type dispatch.
//!
//! The public [`Array`](crate::Array) is tagged with a runtime [`Dtype`];
//! everything below it is monomorphic. [`Scalar`] is the bridge: one cold
//! `match` over the dtype (see [`with_dtype!`](crate::with_dtype)) selects a
//! concrete `T: Scalar`, and all kernels run fully typed from there.

use crate::dtype::Dtype;
use crate::ops::{BinaryOp, UnaryOp};
use num_complex::{Complex32, Complex64};
use num_traits::{One, Zero};

/// An element type the evaluator can compute with.
///
/// `apply_unary` / `apply_binary` implement the full operator set for the
/// type. Operator/type combinations the type's capability flags exclude
/// (bitwise on floats, ordering on complex) are rejected by the dispatcher
/// before a kernel is entered, so the corresponding arms are unreachable.
pub trait Scalar: Copy + PartialEq + Send + Sync + Zero + One + 'static {
    const DTYPE: Dtype;

    /// Natural SIMD lane count, mirrored from [`Dtype::lanes`].
    const LANES: usize;

    /// Widen to the canonical carrier type (every supported element value is
    /// representable as a `Complex64`, possibly with precision loss).
    fn to_canonical(self) -> Complex64;

    /// Narrow from the canonical carrier. Real parts convert to integers by
    /// truncation toward zero, the way a C cast behaves; imaginary parts are
    /// dropped for real targets.
    fn from_canonical(v: Complex64) -> Self;

    fn apply_unary(op: UnaryOp, x: Self) -> Self;

    fn apply_binary(op: BinaryOp, x: Self, y: Self) -> Self;
}

#[inline]
fn bool_val<T: Scalar>(b: bool) -> T {
    if b {
        T::one()
    } else {
        T::zero()
    }
}

macro_rules! impl_scalar_int {
    ($t:ty, $dtype:expr, $lanes:expr) => {
        impl Scalar for $t {
            const DTYPE: Dtype = $dtype;
            const LANES: usize = $lanes;

            #[inline]
            fn to_canonical(self) -> Complex64 {
                Complex64::new(self as f64, 0.0)
            }

            #[inline]
            fn from_canonical(v: Complex64) -> Self {
                v.re as $t
            }

            #[inline]
            fn apply_unary(op: UnaryOp, x: Self) -> Self {
                match op {
                    UnaryOp::Neg => x.wrapping_neg(),
                    UnaryOp::BitNot => !x,
                    UnaryOp::Not => bool_val(x == 0),
                    UnaryOp::Abs => x.wrapping_abs(),
                    // Elementary functions run through f64 and truncate back,
                    // matching a C implicit conversion chain.
                    UnaryOp::Sqrt => (x as f64).sqrt() as $t,
                    UnaryOp::Exp => (x as f64).exp() as $t,
                    UnaryOp::Log => (x as f64).ln() as $t,
                    UnaryOp::Sin => (x as f64).sin() as $t,
                    UnaryOp::Cos => (x as f64).cos() as $t,
                    UnaryOp::Tan => (x as f64).tan() as $t,
                }
            }

            #[inline]
            fn apply_binary(op: BinaryOp, x: Self, y: Self) -> Self {
                match op {
                    BinaryOp::Add => x.wrapping_add(y),
                    BinaryOp::Sub => x.wrapping_sub(y),
                    BinaryOp::Mul => x.wrapping_mul(y),
                    // Integer division by zero yields zero rather than
                    // trapping.
                    BinaryOp::Div => {
                        if y == 0 {
                            0
                        } else {
                            x.wrapping_div(y)
                        }
                    }
                    BinaryOp::BitOr => x | y,
                    BinaryOp::BitAnd => x & y,
                    BinaryOp::BitXor => x ^ y,
                    BinaryOp::Eq => bool_val(x == y),
                    BinaryOp::Ne => bool_val(x != y),
                    BinaryOp::Lt => bool_val(x < y),
                    BinaryOp::Le => bool_val(x <= y),
                    BinaryOp::Gt => bool_val(x > y),
                    BinaryOp::Ge => bool_val(x >= y),
                }
            }
        }
    };
}

impl_scalar_int!(i32, Dtype::Int32, 8);
impl_scalar_int!(i64, Dtype::Int64, 8);

macro_rules! impl_scalar_float {
    ($t:ty, $dtype:expr, $lanes:expr) => {
        impl Scalar for $t {
            const DTYPE: Dtype = $dtype;
            const LANES: usize = $lanes;

            #[inline]
            fn to_canonical(self) -> Complex64 {
                Complex64::new(self as f64, 0.0)
            }

            #[inline]
            fn from_canonical(v: Complex64) -> Self {
                v.re as $t
            }

            #[inline]
            fn apply_unary(op: UnaryOp, x: Self) -> Self {
                match op {
                    UnaryOp::Neg => -x,
                    UnaryOp::BitNot => unreachable!("bitwise op on float dtype"),
                    UnaryOp::Not => bool_val(x == 0.0),
                    UnaryOp::Abs => x.abs(),
                    UnaryOp::Sqrt => x.sqrt(),
                    UnaryOp::Exp => x.exp(),
                    UnaryOp::Log => x.ln(),
                    UnaryOp::Sin => x.sin(),
                    UnaryOp::Cos => x.cos(),
                    UnaryOp::Tan => x.tan(),
                }
            }

            #[inline]
            fn apply_binary(op: BinaryOp, x: Self, y: Self) -> Self {
                match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::BitOr | BinaryOp::BitAnd | BinaryOp::BitXor => {
                        unreachable!("bitwise op on float dtype")
                    }
                    BinaryOp::Eq => bool_val(x == y),
                    BinaryOp::Ne => bool_val(x != y),
                    BinaryOp::Lt => bool_val(x < y),
                    BinaryOp::Le => bool_val(x <= y),
                    BinaryOp::Gt => bool_val(x > y),
                    BinaryOp::Ge => bool_val(x >= y),
                }
            }
        }
    };
}

impl_scalar_float!(f32, Dtype::Float32, 16);
impl_scalar_float!(f64, Dtype::Float64, 8);

macro_rules! impl_scalar_complex {
    ($t:ty, $re:ty, $dtype:expr) => {
        impl Scalar for $t {
            const DTYPE: Dtype = $dtype;
            const LANES: usize = 1;

            #[inline]
            fn to_canonical(self) -> Complex64 {
                Complex64::new(self.re as f64, self.im as f64)
            }

            #[inline]
            fn from_canonical(v: Complex64) -> Self {
                <$t>::new(v.re as $re, v.im as $re)
            }

            #[inline]
            fn apply_unary(op: UnaryOp, x: Self) -> Self {
                match op {
                    UnaryOp::Neg => -x,
                    UnaryOp::Abs => <$t>::new(x.norm(), 0.0),
                    UnaryOp::Sqrt => x.sqrt(),
                    UnaryOp::Exp => x.exp(),
                    UnaryOp::Log => x.ln(),
                    UnaryOp::Sin => x.sin(),
                    UnaryOp::Cos => x.cos(),
                    UnaryOp::Tan => x.tan(),
                    UnaryOp::BitNot | UnaryOp::Not => {
                        unreachable!("bitwise/logical op on complex dtype")
                    }
                }
            }

            #[inline]
            fn apply_binary(op: BinaryOp, x: Self, y: Self) -> Self {
                match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    _ => unreachable!("bitwise/logical op on complex dtype"),
                }
            }
        }
    };
}

impl_scalar_complex!(Complex32, f32, Dtype::CFloat32);
impl_scalar_complex!(Complex64, f64, Dtype::CFloat64);

/// Monomorphize on a runtime [`Dtype`].
///
/// Expands to a `match` whose computable arms bind `$T` to the concrete
/// element type and evaluate `$body`; the `None` family produces an
/// `InvalidDtype` error. Usable only inside functions returning
/// [`crate::Result`].
#[macro_export]
macro_rules! with_dtype {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            $crate::Dtype::Int32 => {
                type $T = i32;
                $body
            }
            $crate::Dtype::Int64 => {
                type $T = i64;
                $body
            }
            $crate::Dtype::Float32 => {
                type $T = f32;
                $body
            }
            $crate::Dtype::Float64 => {
                type $T = f64;
                $body
            }
            $crate::Dtype::CFloat32 => {
                type $T = ::num_complex::Complex32;
                $body
            }
            $crate::Dtype::CFloat64 => {
                type $T = ::num_complex::Complex64;
                $body
            }
            dt @ ($crate::Dtype::None | $crate::Dtype::ValidNone) => {
                return Err($crate::ArrayError::InvalidDtype {
                    what: format!("operation on {dt}"),
                })
            }
        }
    };
}

/// A single dynamically-typed element value.
///
/// This is the boundary representation used by scalar expression leaves,
/// `fill`, and the scalar constructors; kernels never see it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    CFloat32(Complex32),
    CFloat64(Complex64),
}

impl ScalarValue {
    pub fn dtype(self) -> Dtype {
        match self {
            ScalarValue::Int32(_) => Dtype::Int32,
            ScalarValue::Int64(_) => Dtype::Int64,
            ScalarValue::Float32(_) => Dtype::Float32,
            ScalarValue::Float64(_) => Dtype::Float64,
            ScalarValue::CFloat32(_) => Dtype::CFloat32,
            ScalarValue::CFloat64(_) => Dtype::CFloat64,
        }
    }

    pub fn to_canonical(self) -> Complex64 {
        match self {
            ScalarValue::Int32(v) => v.to_canonical(),
            ScalarValue::Int64(v) => v.to_canonical(),
            ScalarValue::Float32(v) => v.to_canonical(),
            ScalarValue::Float64(v) => v.to_canonical(),
            ScalarValue::CFloat32(v) => v.to_canonical(),
            ScalarValue::CFloat64(v) => v.to_canonical(),
        }
    }

    /// The value as a concrete `T`, converting through the canonical carrier.
    #[inline]
    pub fn get<T: Scalar>(self) -> T {
        T::from_canonical(self.to_canonical())
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int32(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f32> for ScalarValue {
    fn from(v: f32) -> Self {
        ScalarValue::Float32(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(v)
    }
}

impl From<Complex32> for ScalarValue {
    fn from(v: Complex32) -> Self {
        ScalarValue::CFloat32(v)
    }
}

impl From<Complex64> for ScalarValue {
    fn from(v: Complex64) -> Self {
        ScalarValue::CFloat64(v)
    }
}
