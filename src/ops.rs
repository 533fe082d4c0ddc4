//! The element-wise operator set and the lazy operator surface.
//!
//! Operators are small tagged values. Each one knows the capability flags it
//! requires from an element type (the dispatcher checks these before any
//! kernel runs), and its device source fragment for the CUDA JIT assembler.
//! Host semantics live on [`Scalar::apply_unary`] / [`Scalar::apply_binary`]
//! so kernels stay monomorphic.
//!
//! The `std::ops` overloads at the bottom build [`Expr`] trees lazily: no
//! data is touched until [`Expr::eval`].

use crate::dtype::{flags, Dtype};
use crate::expr::Expr;
use crate::Array;
use num_complex::{Complex32, Complex64};
use std::sync::Arc;

/// A one-operand element-wise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    BitNot,
    Not,
    Abs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
}

impl UnaryOp {
    /// Capability bits an element type must provide for this operator.
    pub fn required_flags(self) -> u32 {
        match self {
            UnaryOp::BitNot => flags::SCALAR_BITWISE,
            UnaryOp::Not => flags::SCALAR_LOGICAL,
            _ => flags::SCALAR_ARITHMETIC,
        }
    }

    /// Device source fragment: how to spell `op(x)` in CUDA C.
    ///
    /// Elementary functions pick the width-suffixed math intrinsic; complex
    /// operands resolve against the complex header shipped in the kernel
    /// preamble.
    pub fn device_fragment(self, dtype: Dtype) -> DeviceFragment {
        use DeviceFragment::*;
        let f32_math = dtype == Dtype::Float32;
        match self {
            UnaryOp::Neg => Prefix("-"),
            UnaryOp::BitNot => Prefix("~"),
            UnaryOp::Not => Prefix("!"),
            UnaryOp::Abs => Call(if f32_math { "fabsf" } else { "fabs" }),
            UnaryOp::Sqrt => Call(if f32_math { "sqrtf" } else { "sqrt" }),
            UnaryOp::Exp => Call(if f32_math { "expf" } else { "exp" }),
            UnaryOp::Log => Call(if f32_math { "logf" } else { "log" }),
            UnaryOp::Sin => Call(if f32_math { "sinf" } else { "sin" }),
            UnaryOp::Cos => Call(if f32_math { "cosf" } else { "cos" }),
            UnaryOp::Tan => Call(if f32_math { "tanf" } else { "tan" }),
        }
    }
}

/// A two-operand element-wise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    BitOr,
    BitAnd,
    BitXor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn required_flags(self) -> u32 {
        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                flags::SCALAR_ARITHMETIC
            }
            BinaryOp::BitOr | BinaryOp::BitAnd | BinaryOp::BitXor => flags::SCALAR_BITWISE,
            _ => flags::SCALAR_LOGICAL,
        }
    }

    pub fn device_fragment(self, _dtype: Dtype) -> DeviceFragment {
        use DeviceFragment::*;
        match self {
            BinaryOp::Add => Infix("+"),
            BinaryOp::Sub => Infix("-"),
            BinaryOp::Mul => Infix("*"),
            BinaryOp::Div => Infix("/"),
            BinaryOp::BitOr => Infix("|"),
            BinaryOp::BitAnd => Infix("&"),
            BinaryOp::BitXor => Infix("^"),
            BinaryOp::Eq => Infix("=="),
            BinaryOp::Ne => Infix("!="),
            BinaryOp::Lt => Infix("<"),
            BinaryOp::Le => Infix("<="),
            BinaryOp::Gt => Infix(">"),
            BinaryOp::Ge => Infix(">="),
        }
    }
}

/// How an operator renders into kernel source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFragment {
    /// `a OP b`
    Infix(&'static str),
    /// `OP a`
    Prefix(&'static str),
    /// `name(a, ...)`
    Call(&'static str),
}

/// An N-ary user-supplied element-wise operator.
///
/// The host function receives one canonical-typed value per operand and the
/// optional `device_body` is the CUDA function body used when operands live
/// on the GPU (it may read `val0..valN` and must `return` the result).
///
/// Map operands must share one extent and one dtype and be
/// trivial-contiguous; the dispatcher rejects anything else with
/// `InvalidMapOperand`.
#[derive(Clone)]
pub struct MapKernel {
    name: String,
    host: Arc<dyn Fn(&[Complex64]) -> Complex64 + Send + Sync>,
    device_body: Option<String>,
}

impl MapKernel {
    pub fn new<F>(name: impl Into<String>, host: F) -> Self
    where
        F: Fn(&[Complex64]) -> Complex64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            host: Arc::new(host),
            device_body: None,
        }
    }

    /// Attach a CUDA function body for GPU operands.
    pub fn with_device_body(mut self, body: impl Into<String>) -> Self {
        self.device_body = Some(body.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_body(&self) -> Option<&str> {
        self.device_body.as_deref()
    }

    #[inline]
    pub(crate) fn call(&self, args: &[Complex64]) -> Complex64 {
        (self.host)(args)
    }
}

impl std::fmt::Debug for MapKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapKernel")
            .field("name", &self.name)
            .field("device_body", &self.device_body)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Lazy operator overloads
// ---------------------------------------------------------------------------

macro_rules! impl_binary_std_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait<&Array> for &Array {
            type Output = Expr;
            fn $method(self, rhs: &Array) -> Expr {
                Expr::binary($op, Expr::leaf(self), Expr::leaf(rhs))
            }
        }

        impl std::ops::$trait<Array> for Array {
            type Output = Expr;
            fn $method(self, rhs: Array) -> Expr {
                Expr::binary($op, Expr::Leaf(self), Expr::Leaf(rhs))
            }
        }

        impl std::ops::$trait<&Array> for Array {
            type Output = Expr;
            fn $method(self, rhs: &Array) -> Expr {
                Expr::binary($op, Expr::Leaf(self), Expr::leaf(rhs))
            }
        }

        impl std::ops::$trait<Array> for &Array {
            type Output = Expr;
            fn $method(self, rhs: Array) -> Expr {
                Expr::binary($op, Expr::leaf(self), Expr::Leaf(rhs))
            }
        }

        impl std::ops::$trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }

        impl std::ops::$trait<Expr> for &Array {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::leaf(self), rhs)
            }
        }

        impl std::ops::$trait<&Array> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Array) -> Expr {
                Expr::binary($op, self, Expr::leaf(rhs))
            }
        }

        impl std::ops::$trait<Array> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Array) -> Expr {
                Expr::binary($op, self, Expr::Leaf(rhs))
            }
        }

        impl std::ops::$trait<Expr> for Array {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::Leaf(self), rhs)
            }
        }
    };
}

impl_binary_std_op!(Add, add, BinaryOp::Add);
impl_binary_std_op!(Sub, sub, BinaryOp::Sub);
impl_binary_std_op!(Mul, mul, BinaryOp::Mul);
impl_binary_std_op!(Div, div, BinaryOp::Div);
impl_binary_std_op!(BitOr, bitor, BinaryOp::BitOr);
impl_binary_std_op!(BitAnd, bitand, BinaryOp::BitAnd);
impl_binary_std_op!(BitXor, bitxor, BinaryOp::BitXor);

// Scalar operands on either side, for each supported primitive.
macro_rules! impl_scalar_operand {
    ($($t:ty),*) => {
        $(
            impl std::ops::Add<$t> for &Array {
                type Output = Expr;
                fn add(self, rhs: $t) -> Expr {
                    Expr::binary(BinaryOp::Add, Expr::leaf(self), Expr::scalar(rhs))
                }
            }
            impl std::ops::Add<&Array> for $t {
                type Output = Expr;
                fn add(self, rhs: &Array) -> Expr {
                    Expr::binary(BinaryOp::Add, Expr::scalar(self), Expr::leaf(rhs))
                }
            }
            impl std::ops::Sub<$t> for &Array {
                type Output = Expr;
                fn sub(self, rhs: $t) -> Expr {
                    Expr::binary(BinaryOp::Sub, Expr::leaf(self), Expr::scalar(rhs))
                }
            }
            impl std::ops::Sub<&Array> for $t {
                type Output = Expr;
                fn sub(self, rhs: &Array) -> Expr {
                    Expr::binary(BinaryOp::Sub, Expr::scalar(self), Expr::leaf(rhs))
                }
            }
            impl std::ops::Mul<$t> for &Array {
                type Output = Expr;
                fn mul(self, rhs: $t) -> Expr {
                    Expr::binary(BinaryOp::Mul, Expr::leaf(self), Expr::scalar(rhs))
                }
            }
            impl std::ops::Mul<&Array> for $t {
                type Output = Expr;
                fn mul(self, rhs: &Array) -> Expr {
                    Expr::binary(BinaryOp::Mul, Expr::scalar(self), Expr::leaf(rhs))
                }
            }
            impl std::ops::Div<$t> for &Array {
                type Output = Expr;
                fn div(self, rhs: $t) -> Expr {
                    Expr::binary(BinaryOp::Div, Expr::leaf(self), Expr::scalar(rhs))
                }
            }
            impl std::ops::Div<&Array> for $t {
                type Output = Expr;
                fn div(self, rhs: &Array) -> Expr {
                    Expr::binary(BinaryOp::Div, Expr::scalar(self), Expr::leaf(rhs))
                }
            }
            impl std::ops::Mul<$t> for Expr {
                type Output = Expr;
                fn mul(self, rhs: $t) -> Expr {
                    Expr::binary(BinaryOp::Mul, self, Expr::scalar(rhs))
                }
            }
            impl std::ops::Add<$t> for Expr {
                type Output = Expr;
                fn add(self, rhs: $t) -> Expr {
                    Expr::binary(BinaryOp::Add, self, Expr::scalar(rhs))
                }
            }
            impl std::ops::Sub<$t> for Expr {
                type Output = Expr;
                fn sub(self, rhs: $t) -> Expr {
                    Expr::binary(BinaryOp::Sub, self, Expr::scalar(rhs))
                }
            }
            impl std::ops::Div<$t> for Expr {
                type Output = Expr;
                fn div(self, rhs: $t) -> Expr {
                    Expr::binary(BinaryOp::Div, self, Expr::scalar(rhs))
                }
            }
        )*
    };
}

impl_scalar_operand!(i32, i64, f32, f64, Complex32, Complex64);

impl std::ops::Neg for &Array {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, Expr::leaf(self))
    }
}

impl std::ops::Neg for Array {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, Expr::Leaf(self))
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl std::ops::Not for &Array {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::unary(UnaryOp::Not, Expr::leaf(self))
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::unary(UnaryOp::Not, self)
    }
}

/// Named builders for the operators without a `std::ops` spelling.
macro_rules! impl_named_builders {
    ($target:ty, $to_expr:expr) => {
        impl $target {
            pub fn abs(&self) -> Expr {
                Expr::unary(UnaryOp::Abs, $to_expr(self))
            }
            pub fn sqrt(&self) -> Expr {
                Expr::unary(UnaryOp::Sqrt, $to_expr(self))
            }
            pub fn exp(&self) -> Expr {
                Expr::unary(UnaryOp::Exp, $to_expr(self))
            }
            pub fn log(&self) -> Expr {
                Expr::unary(UnaryOp::Log, $to_expr(self))
            }
            pub fn sin(&self) -> Expr {
                Expr::unary(UnaryOp::Sin, $to_expr(self))
            }
            pub fn cos(&self) -> Expr {
                Expr::unary(UnaryOp::Cos, $to_expr(self))
            }
            pub fn tan(&self) -> Expr {
                Expr::unary(UnaryOp::Tan, $to_expr(self))
            }
            pub fn bit_not(&self) -> Expr {
                Expr::unary(UnaryOp::BitNot, $to_expr(self))
            }
            pub fn eq_elem(&self, rhs: &Array) -> Expr {
                Expr::binary(BinaryOp::Eq, $to_expr(self), Expr::leaf(rhs))
            }
            pub fn ne_elem(&self, rhs: &Array) -> Expr {
                Expr::binary(BinaryOp::Ne, $to_expr(self), Expr::leaf(rhs))
            }
            pub fn lt(&self, rhs: &Array) -> Expr {
                Expr::binary(BinaryOp::Lt, $to_expr(self), Expr::leaf(rhs))
            }
            pub fn le(&self, rhs: &Array) -> Expr {
                Expr::binary(BinaryOp::Le, $to_expr(self), Expr::leaf(rhs))
            }
            pub fn gt(&self, rhs: &Array) -> Expr {
                Expr::binary(BinaryOp::Gt, $to_expr(self), Expr::leaf(rhs))
            }
            pub fn ge(&self, rhs: &Array) -> Expr {
                Expr::binary(BinaryOp::Ge, $to_expr(self), Expr::leaf(rhs))
            }
        }
    };
}

impl_named_builders!(Array, Expr::leaf);
impl_named_builders!(Expr, |e: &Expr| e.clone());

impl Array {
    /// Apply an N-ary map kernel to `operands` (this array first).
    pub fn map(&self, kernel: MapKernel, others: &[&Array]) -> Expr {
        let mut operands = Vec::with_capacity(1 + others.len());
        operands.push(self.clone());
        operands.extend(others.iter().map(|a| (*a).clone()));
        Expr::Map(kernel, operands)
    }

    /// In-place element-wise update: `self = self op rhs`.
    ///
    /// Writing into an evaluation source is safe here because the update is
    /// pointwise and the destination is exactly one operand.
    pub fn update(&mut self, op: BinaryOp, rhs: &Array) -> Result<(), crate::ArrayError> {
        let expr = Expr::binary(op, Expr::leaf(self), Expr::leaf(rhs));
        expr.eval_into(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overloads_build_trees() {
        let a = Array::from_slice(&[1.0f64, 2.0]).unwrap();
        let b = Array::from_slice(&[3.0f64, 4.0]).unwrap();
        let e = &a + &b;
        assert!(matches!(e, Expr::Binary(BinaryOp::Add, _, _)));
        let e = (&a - &b) * 2.0f64;
        assert!(matches!(e, Expr::Binary(BinaryOp::Mul, _, _)));
        let e = -&a;
        assert!(matches!(e, Expr::Unary(UnaryOp::Neg, _)));
    }

    #[test]
    fn test_required_flags() {
        assert_eq!(BinaryOp::Add.required_flags(), flags::SCALAR_ARITHMETIC);
        assert_eq!(BinaryOp::BitXor.required_flags(), flags::SCALAR_BITWISE);
        assert_eq!(BinaryOp::Lt.required_flags(), flags::SCALAR_LOGICAL);
        assert_eq!(UnaryOp::Not.required_flags(), flags::SCALAR_LOGICAL);
    }

    #[test]
    fn test_device_fragments() {
        assert_eq!(
            BinaryOp::Add.device_fragment(Dtype::Float64),
            DeviceFragment::Infix("+")
        );
        assert_eq!(
            UnaryOp::Exp.device_fragment(Dtype::Float32),
            DeviceFragment::Call("expf")
        );
        assert_eq!(
            UnaryOp::Exp.device_fragment(Dtype::Float64),
            DeviceFragment::Call("exp")
        );
    }
}
