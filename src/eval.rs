//! The dispatcher: materializes expression trees into arrays.
//!
//! For each evaluation the dispatcher (1) validates shapes, dtypes and
//! capability flags, (2) collapses any leaf whose dtype differs from the
//! promoted result type with a one-shot converting copy — after which every
//! kernel is monomorphic — and (3) picks a traversal:
//!
//! - **trivial**: destination and every array leaf are trivial-contiguous,
//!   or all leaves share one contiguous stride (in which case the
//!   destination adopts it). One flat loop over `0..n`, vectorized via the
//!   runtime SIMD dispatch and split across the worker pool above the
//!   parallel threshold.
//! - **strided**: the general odometer walk; scalar, serial. This is the
//!   correctness fallback, not the throughput path.
//!
//! Expression trees are evaluated per element by a small recursive visitor
//! over pre-gathered leaf values; leaves broadcast (scalars) or stream
//! (arrays).

use crate::dtype::Device;
use crate::expr::Expr;
use crate::extent::Stride;
use crate::kernel;
use crate::ops::MapKernel;
use crate::scalar::Scalar;
use crate::simd;
use crate::threading;
use crate::{Array, ArrayError, Result};
use num_complex::Complex64;
use smallvec::SmallVec;

/// Raw pointer wrappers that may cross worker threads. Every parallel caller
/// hands disjoint index ranges to each worker, so aliasing writes cannot
/// occur within one evaluation.
#[derive(Clone, Copy)]
pub(crate) struct SendPtr<T>(pub *const T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

#[derive(Clone, Copy)]
pub(crate) struct SendPtrMut<T>(pub *mut T);
unsafe impl<T> Send for SendPtrMut<T> {}
unsafe impl<T> Sync for SendPtrMut<T> {}

/// Evaluate `expr` into a freshly allocated array.
pub(crate) fn materialize_new(expr: &Expr) -> Result<Array> {
    let extent = expr.shape()?;
    let dtype = expr.dtype()?;
    let device = expr.device()?;
    let mut dst = Array::new(extent, dtype, device)?;
    materialize(expr, &mut dst, true)?;
    Ok(dst)
}

/// Evaluate `expr` into an existing destination of matching shape, dtype and
/// device. The destination may alias an operand (pointwise in-place update).
pub(crate) fn materialize_into(expr: &Expr, dst: &mut Array) -> Result<()> {
    dst.storage()?;
    let extent = expr.shape()?;
    let dtype = expr.dtype()?;
    let device = expr.device()?;
    let scalar_into_scalar = expr.all_scalar() && dst.size() == 1;
    if dst.extent() != &extent && !scalar_into_scalar {
        return Err(ArrayError::ShapeMismatch {
            what: format!("evaluating {} into destination {}", extent, dst.extent()),
        });
    }
    if dst.dtype() != dtype {
        return Err(ArrayError::InvalidDtype {
            what: format!("evaluating {dtype} into {} destination", dst.dtype()),
        });
    }
    if dst.device() != device {
        return Err(ArrayError::InvalidDevice {
            what: format!("evaluating on {device} into {} destination", dst.device()),
        });
    }
    materialize(expr, dst, false)
}

fn materialize(expr: &Expr, dst: &mut Array, dst_fresh: bool) -> Result<()> {
    if let Expr::Map(kernel, operands) = expr {
        return eval_map(kernel, operands, dst);
    }

    let required = expr.required_flags();
    let provided = dst.dtype().flags();
    if required & !provided != 0 {
        return Err(ArrayError::InvalidDtype {
            what: format!("operator set unsupported by {}", dst.dtype()),
        });
    }

    match dst.device() {
        Device::Cpu => {
            with_dtype!(dst.dtype(), T => eval_cpu::<T>(expr, dst, dst_fresh)?)
        }
        #[cfg(feature = "gpu")]
        Device::Gpu => crate::gpu::eval_expr(expr, dst)?,
        #[cfg(not(feature = "gpu"))]
        Device::Gpu => return Err(ArrayError::DeviceUnavailable),
    }

    dst.set_scalar_tag(expr.all_scalar());
    Ok(())
}

/// One leaf slot of the per-element visitor: either a broadcast constant or
/// a streaming pointer into a (dtype-normalized) array leaf.
enum Slot<T> {
    Const(T),
    Ptr {
        base: SendPtr<T>,
        strides: Vec<i64>,
        trivial: bool,
        contiguous: bool,
    },
}

/// DFS leaf collection in visitor order. Converted leaves are parked in
/// `holder` so their storage outlives the raw base pointers.
fn build_slots<T: Scalar>(
    expr: &Expr,
    holder: &mut Vec<Array>,
    slots: &mut Vec<Slot<T>>,
) -> Result<()> {
    match expr {
        Expr::Scalar(v) => slots.push(Slot::Const(v.get::<T>())),
        Expr::Leaf(a) => {
            let arr = if a.dtype() == T::DTYPE {
                a.clone()
            } else {
                a.copy_as(Some(T::DTYPE), None)?
            };
            if arr.is_scalar() {
                let v = unsafe { *arr.ptr::<T>()? };
                slots.push(Slot::Const(v));
            } else {
                slots.push(Slot::Ptr {
                    base: SendPtr(arr.ptr::<T>()?),
                    strides: arr.stride().as_slice().to_vec(),
                    trivial: arr.stride().is_trivial(),
                    contiguous: arr.stride().is_contiguous(),
                });
            }
            holder.push(arr);
        }
        Expr::Unary(_, x) => build_slots(x, holder, slots)?,
        Expr::Binary(_, x, y) => {
            build_slots(x, holder, slots)?;
            build_slots(y, holder, slots)?;
        }
        Expr::Map(_, _) => unreachable!("map expressions take the dedicated path"),
    }
    Ok(())
}

/// Per-element tree fold. `vals` holds one entry per leaf slot in DFS order.
#[inline]
fn eval_node<T: Scalar>(expr: &Expr, vals: &[T], cursor: &mut usize) -> T {
    match expr {
        Expr::Scalar(_) | Expr::Leaf(_) => {
            let v = vals[*cursor];
            *cursor += 1;
            v
        }
        Expr::Unary(op, x) => T::apply_unary(*op, eval_node(x, vals, cursor)),
        Expr::Binary(op, x, y) => {
            let a = eval_node(x, vals, cursor);
            let b = eval_node(y, vals, cursor);
            T::apply_binary(*op, a, b)
        }
        Expr::Map(_, _) => unreachable!("map expressions take the dedicated path"),
    }
}

fn eval_cpu<T: Scalar>(expr: &Expr, dst: &mut Array, dst_fresh: bool) -> Result<()> {
    let mut holder = Vec::new();
    let mut slots = Vec::new();
    build_slots::<T>(expr, &mut holder, &mut slots)?;

    let n = dst.size();
    let dst_trivial = dst.stride().is_trivial() && dst.stride().is_contiguous();

    // Trivial case 1: everything trivial-contiguous.
    let all_trivial = dst_trivial
        && slots.iter().all(|s| match s {
            Slot::Const(_) => true,
            Slot::Ptr {
                trivial,
                contiguous,
                ..
            } => *trivial && *contiguous,
        });

    // Trivial case 2: every streaming leaf shares one stride vector. The
    // flat loop then visits elements in the leaves' common physical order
    // and the destination adopts their stride afterwards. Reads stay inside
    // each leaf's reachable window: strides are non-negative, so the window
    // spans at least `n` elements from the view base.
    let mut shared_stride: Option<&[i64]> = None;
    let same_stride = !all_trivial && {
        let mut ok = slots.iter().any(|s| matches!(s, Slot::Ptr { .. }));
        for slot in &slots {
            if let Slot::Ptr { strides, .. } = slot {
                match shared_stride {
                    None => shared_stride = Some(strides),
                    Some(prev) if prev == strides.as_slice() => {}
                    Some(_) => {
                        ok = false;
                        break;
                    }
                }
            }
        }
        ok && match shared_stride {
            Some(s) => dst_fresh || dst.stride().as_slice() == s,
            None => false,
        }
    };

    if all_trivial || same_stride {
        log::trace!("eval: trivial path over {n} elements");
        let dst_ptr = SendPtrMut(dst.ptr::<T>()?);
        let slots = &slots;
        let run_range = |range: std::ops::Range<usize>| {
            let dst_ptr = dst_ptr;
            simd::dispatch_if_large(range.end - range.start, || {
                let mut vals: SmallVec<[T; 4]> = SmallVec::from_elem(T::zero(), slots.len());
                for i in range {
                    for (k, slot) in slots.iter().enumerate() {
                        vals[k] = match slot {
                            Slot::Const(c) => *c,
                            Slot::Ptr { base, .. } => unsafe { *base.0.add(i) },
                        };
                    }
                    let mut cursor = 0;
                    let out = eval_node(expr, &vals, &mut cursor);
                    unsafe { *dst_ptr.0.add(i) = out };
                }
            })
        };

        if n >= threading::parallel_threshold() {
            log::trace!("eval: parallel split");
            threading::run_split(n, threading::parallel_threshold(), |r| run_range(r));
        } else {
            run_range(0..n);
        }

        if same_stride {
            if let Some(s) = shared_stride {
                let stride = Stride::from_steps(dst.extent(), s);
                dst.set_stride(stride);
            }
        }
        return Ok(());
    }

    // Strided path: odometer over logical indices, per-leaf running offsets.
    log::trace!("eval: strided path over {n} elements");
    let dims = kernel::dims_of(dst.extent());
    let dst_steps = dst.stride().as_slice().to_vec();
    let mut strides_list: Vec<&[i64]> = Vec::with_capacity(1 + slots.len());
    strides_list.push(&dst_steps);
    let mut offset_index: Vec<Option<usize>> = Vec::with_capacity(slots.len());
    for slot in &slots {
        match slot {
            Slot::Const(_) => offset_index.push(None),
            Slot::Ptr { strides, .. } => {
                offset_index.push(Some(strides_list.len()));
                strides_list.push(strides);
            }
        }
    }

    let dst_ptr = dst.ptr::<T>()?;
    let mut vals: SmallVec<[T; 4]> = SmallVec::from_elem(T::zero(), slots.len());
    kernel::for_each_offset(&dims, &strides_list, |offs| {
        for (k, slot) in slots.iter().enumerate() {
            vals[k] = match slot {
                Slot::Const(c) => *c,
                Slot::Ptr { base, .. } => {
                    let idx = offset_index[k].unwrap_or(0);
                    unsafe { *base.0.offset(offs[idx]) }
                }
            };
        }
        let mut cursor = 0;
        let out = eval_node(expr, &vals, &mut cursor);
        unsafe { *dst_ptr.offset(offs[0]) = out };
    })?;
    Ok(())
}

/// N-ary map kernels: same dtype everywhere, streaming operands
/// trivial-contiguous, destination likewise.
fn eval_map(kernel: &MapKernel, operands: &[Array], dst: &mut Array) -> Result<()> {
    if operands.is_empty() {
        return Err(ArrayError::InvalidMapOperand {
            what: format!("map kernel `{}` with no operands", kernel.name()),
        });
    }
    for a in operands {
        a.storage()?;
        if a.dtype() != dst.dtype() {
            return Err(ArrayError::InvalidMapOperand {
                what: format!(
                    "map kernel `{}`: operand dtype {} != {}",
                    kernel.name(),
                    a.dtype(),
                    dst.dtype()
                ),
            });
        }
        if !a.is_scalar() {
            if a.extent() != dst.extent() {
                return Err(ArrayError::InvalidMapOperand {
                    what: format!(
                        "map kernel `{}`: operand extent {} != {}",
                        kernel.name(),
                        a.extent(),
                        dst.extent()
                    ),
                });
            }
            if !(a.stride().is_trivial() && a.stride().is_contiguous()) {
                return Err(ArrayError::InvalidMapOperand {
                    what: format!(
                        "map kernel `{}`: operand layout is not trivial-contiguous",
                        kernel.name()
                    ),
                });
            }
        }
    }
    if !(dst.stride().is_trivial() && dst.stride().is_contiguous()) {
        return Err(ArrayError::InvalidMapOperand {
            what: format!(
                "map kernel `{}`: destination layout is not trivial-contiguous",
                kernel.name()
            ),
        });
    }

    match dst.device() {
        Device::Cpu => {}
        #[cfg(feature = "gpu")]
        Device::Gpu => return crate::gpu::eval_map(kernel, operands, dst),
        #[cfg(not(feature = "gpu"))]
        Device::Gpu => return Err(ArrayError::DeviceUnavailable),
    }

    let n = dst.size();
    with_dtype!(dst.dtype(), T => {
        enum Arg<U> {
            Const(Complex64),
            Ptr(SendPtr<U>),
        }
        let args: Vec<Arg<T>> = operands
            .iter()
            .map(|a| -> Result<Arg<T>> {
                if a.is_scalar() {
                    let v = unsafe { *a.ptr::<T>()? };
                    Ok(Arg::Const(v.to_canonical()))
                } else {
                    Ok(Arg::Ptr(SendPtr(a.ptr::<T>()?)))
                }
            })
            .collect::<Result<_>>()?;
        let dst_ptr = SendPtrMut(dst.ptr::<T>()?);

        let args = &args;
        let run_range = |range: std::ops::Range<usize>| {
            let dst_ptr = dst_ptr;
            let mut vals: SmallVec<[Complex64; 4]> =
                SmallVec::from_elem(Complex64::new(0.0, 0.0), args.len());
            for i in range {
                for (k, arg) in args.iter().enumerate() {
                    vals[k] = match arg {
                        Arg::Const(c) => *c,
                        Arg::Ptr(p) => unsafe { (*p.0.add(i)).to_canonical() },
                    };
                }
                let out = kernel.call(&vals);
                unsafe { *dst_ptr.0.add(i) = T::from_canonical(out) };
            }
        };

        if n >= threading::parallel_threshold() {
            threading::run_split(n, threading::parallel_threshold(), |r| run_range(r));
        } else {
            run_range(0..n);
        }
        Ok(())
    })
}
