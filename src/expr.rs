//! Lazy element-wise expression trees.
//!
//! Building `&a + &b * 2.0` allocates nothing: it produces an [`Expr`] that
//! records the operation tree and holds its array operands by reference copy
//! (shared storage). Work happens once, at [`Expr::eval`], which sizes the
//! result from the tree and hands the whole expression to the dispatcher —
//! no intermediate arrays are ever materialized.
//!
//! A node's result shape is the common extent of its non-scalar leaves
//! (scalars broadcast everywhere); its dtype and device are the promotions
//! over all leaves.

use crate::dtype::{Device, Dtype};
use crate::extent::Extent;
use crate::ops::{BinaryOp, MapKernel, UnaryOp};
use crate::scalar::ScalarValue;
use crate::{Array, ArrayError, Result};

/// An unevaluated element-wise composition.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Broadcasts one value everywhere.
    Scalar(ScalarValue),
    /// Reads from an array (held by reference copy).
    Leaf(Array),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// N-ary user operator over same-typed, trivial-contiguous operands.
    Map(MapKernel, Vec<Array>),
}

impl Expr {
    pub fn leaf(array: &Array) -> Expr {
        Expr::Leaf(array.clone())
    }

    pub fn scalar<V: Into<ScalarValue>>(value: V) -> Expr {
        Expr::Scalar(value.into())
    }

    pub fn unary(op: UnaryOp, x: Expr) -> Expr {
        Expr::Unary(op, Box::new(x))
    }

    pub fn binary(op: BinaryOp, x: Expr, y: Expr) -> Expr {
        Expr::Binary(op, Box::new(x), Box::new(y))
    }

    /// Array leaves in evaluation order (depth-first, left to right).
    pub(crate) fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Array>) {
        match self {
            Expr::Scalar(_) => {}
            Expr::Leaf(a) => out.push(a),
            Expr::Unary(_, x) => x.collect_leaves(out),
            Expr::Binary(_, x, y) => {
                x.collect_leaves(out);
                y.collect_leaves(out);
            }
            Expr::Map(_, operands) => out.extend(operands.iter()),
        }
    }

    /// Total number of leaf slots (array leaves plus scalar leaves).
    pub(crate) fn leaf_slots(&self) -> usize {
        match self {
            Expr::Scalar(_) | Expr::Leaf(_) => 1,
            Expr::Unary(_, x) => x.leaf_slots(),
            Expr::Binary(_, x, y) => x.leaf_slots() + y.leaf_slots(),
            Expr::Map(_, operands) => operands.len(),
        }
    }

    /// Result extent: the shared extent of the non-scalar leaves, or `[1]`
    /// when every leaf is scalar.
    pub fn shape(&self) -> Result<Extent> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);

        let mut result: Option<&Extent> = None;
        for leaf in &leaves {
            leaf.storage()?;
            if leaf.is_scalar() {
                continue;
            }
            match result {
                None => result = Some(leaf.extent()),
                Some(e) if e == leaf.extent() => {}
                Some(e) => {
                    return Err(ArrayError::ShapeMismatch {
                        what: format!("operands {} and {}", e, leaf.extent()),
                    })
                }
            }
        }
        match result {
            Some(e) => Ok(e.clone()),
            None => Extent::new(&[1]),
        }
    }

    /// Result dtype: promotion over all leaves.
    pub fn dtype(&self) -> Result<Dtype> {
        fn fold(expr: &Expr, acc: &mut Option<Dtype>) -> Result<()> {
            let mut merge = |dt: Dtype| -> Result<()> {
                if dt.is_none() {
                    return Err(ArrayError::InvalidDtype {
                        what: format!("operand of type {dt}"),
                    });
                }
                *acc = Some(acc.map_or(dt, |a| a.common(dt)));
                Ok(())
            };
            match expr {
                Expr::Scalar(v) => merge(v.dtype()),
                Expr::Leaf(a) => {
                    a.storage()?;
                    merge(a.dtype())
                }
                Expr::Unary(_, x) => fold(x, acc),
                Expr::Binary(_, x, y) => {
                    fold(x, acc)?;
                    fold(y, acc)
                }
                Expr::Map(_, operands) => {
                    for a in operands {
                        a.storage()?;
                        merge(a.dtype())?;
                    }
                    Ok(())
                }
            }
        }
        let mut acc = None;
        fold(self, &mut acc)?;
        acc.ok_or_else(|| ArrayError::InvalidDtype {
            what: "expression with no operands".to_string(),
        })
    }

    /// Result device: `Gpu` as soon as any leaf lives there.
    pub fn device(&self) -> Result<Device> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        let mut device = Device::Cpu;
        for leaf in &leaves {
            device = device.common(leaf.device());
        }
        Ok(device)
    }

    /// Union of the capability bits every operator in the tree requires.
    pub fn required_flags(&self) -> u32 {
        match self {
            Expr::Scalar(_) | Expr::Leaf(_) => 0,
            Expr::Unary(op, x) => op.required_flags() | x.required_flags(),
            Expr::Binary(op, x, y) => {
                op.required_flags() | x.required_flags() | y.required_flags()
            }
            Expr::Map(_, _) => 0,
        }
    }

    /// True when every leaf is scalar (the result will be scalar-tagged).
    pub fn all_scalar(&self) -> bool {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves.iter().all(|a| a.is_scalar())
    }

    /// Materialize into a freshly allocated array.
    pub fn eval(&self) -> Result<Array> {
        crate::eval::materialize_new(self)
    }

    /// Materialize into an existing destination of matching shape, dtype and
    /// device.
    ///
    /// The destination may itself appear as an operand (in-place update):
    /// the operators here are pointwise, so element `i` of the destination
    /// is written only from element `i` of each source.
    pub fn eval_into(&self, dst: &mut Array) -> Result<()> {
        crate::eval::materialize_into(self, dst)
    }
}
