//! Reductions and the `dot` contraction.
//!
//! `dot` dispatches on operand shapes:
//!
//! - scalar × anything: element-wise multiply (a lazy expression,
//!   materialized here).
//! - vector · vector: single-pass inner product. 32-bit inputs accumulate
//!   in 64 bits; `f32`/`f64` use the packet kernels from [`crate::simd`].
//! - matrix × {vector, matrix}: operands are made contiguous (copying when
//!   necessary) and handed to the row-major GEMM primitive. The engine
//!   treats that primitive as opaque; the naive blocked kernel here is its
//!   reference implementation.

use crate::scalar::{Scalar, ScalarValue};
use crate::simd::SimdReduce;
use crate::{Array, ArrayError, Device, Dtype, Extent, Result};
use num_complex::Complex64;
use std::ops::{Add, Mul};

/// Full sum reduction, with widened accumulators for 32-bit inputs.
pub fn sum(a: &Array) -> Result<ScalarValue> {
    let flat = contiguous_host(a, a.dtype())?;
    let n = flat.size();
    match flat.dtype() {
        Dtype::Int32 | Dtype::Int64 => {
            // Route through i64 regardless of input width.
            let wide = flat.copy_as(Some(Dtype::Int64), None)?;
            let p = wide.ptr::<i64>()?;
            let mut acc = 0i64;
            for i in 0..n {
                acc = acc.wrapping_add(unsafe { *p.add(i) });
            }
            Ok(scalar_in_dtype(flat.dtype(), Complex64::new(acc as f64, 0.0)))
        }
        Dtype::Float32 | Dtype::Float64 => {
            let wide = flat.copy_as(Some(Dtype::Float64), None)?;
            let p = wide.ptr::<f64>()?;
            let slice = unsafe { std::slice::from_raw_parts(p, n) };
            let acc = f64::try_simd_sum(slice)
                .unwrap_or_else(|| slice.iter().copied().fold(0.0, f64::add));
            Ok(scalar_in_dtype(flat.dtype(), Complex64::new(acc, 0.0)))
        }
        Dtype::CFloat32 | Dtype::CFloat64 => {
            let wide = flat.copy_as(Some(Dtype::CFloat64), None)?;
            let p = wide.ptr::<Complex64>()?;
            let mut acc = Complex64::new(0.0, 0.0);
            for i in 0..n {
                acc += unsafe { *p.add(i) };
            }
            Ok(scalar_in_dtype(flat.dtype(), acc))
        }
        dt => Err(ArrayError::InvalidDtype {
            what: format!("sum on {dt}"),
        }),
    }
}

/// Contraction of two arrays; see the module docs for the shape dispatch.
pub fn dot(a: &Array, b: &Array) -> Result<Array> {
    a.storage()?;
    b.storage()?;

    if a.is_scalar() || b.is_scalar() {
        return (a * b).eval();
    }

    let dtype = a.dtype().common(b.dtype());
    if dtype.is_none() {
        return Err(ArrayError::InvalidDtype {
            what: format!("dot on {} and {}", a.dtype(), b.dtype()),
        });
    }
    let device = a.device().common(b.device());

    match (a.ndim(), b.ndim()) {
        (1, 1) => inner_product(a, b, dtype, device),
        (2, 1) => matmul_dispatch(a, b, dtype, device, MatShape::MatVec),
        (1, 2) => matmul_dispatch(a, b, dtype, device, MatShape::VecMat),
        (2, 2) => matmul_dispatch(a, b, dtype, device, MatShape::MatMat),
        (ra, rb) => Err(ArrayError::ShapeMismatch {
            what: format!("dot between rank-{ra} and rank-{rb} arrays"),
        }),
    }
}

impl Array {
    /// `dot(self, other)`.
    pub fn dot(&self, other: &Array) -> Result<Array> {
        dot(self, other)
    }
}

/// Vector inner product with widened accumulation.
fn inner_product(a: &Array, b: &Array, dtype: Dtype, device: Device) -> Result<Array> {
    if a.size() != b.size() {
        return Err(ArrayError::ShapeMismatch {
            what: format!("dot between lengths {} and {}", a.size(), b.size()),
        });
    }
    let n = a.size();

    let acc = match dtype {
        Dtype::Int32 | Dtype::Int64 => {
            let av = a.to_vec::<i64>()?;
            let bv = b.to_vec::<i64>()?;
            let mut acc = 0i64;
            for i in 0..n {
                acc = acc.wrapping_add(av[i].wrapping_mul(bv[i]));
            }
            Complex64::new(acc as f64, 0.0)
        }
        Dtype::Float32 | Dtype::Float64 => {
            // 32-bit inputs accumulate in f64 (the widened copy is also what
            // the packet kernel runs on).
            let av = a.to_vec::<f64>()?;
            let bv = b.to_vec::<f64>()?;
            let acc = f64::try_simd_dot(&av, &bv).unwrap_or_else(|| {
                av.iter().zip(&bv).map(|(x, y)| x * y).fold(0.0, f64::add)
            });
            Complex64::new(acc, 0.0)
        }
        Dtype::CFloat32 | Dtype::CFloat64 => {
            let av = a.to_vec::<Complex64>()?;
            let bv = b.to_vec::<Complex64>()?;
            let mut acc = Complex64::new(0.0, 0.0);
            for i in 0..n {
                acc += av[i] * bv[i];
            }
            acc
        }
        dt => {
            return Err(ArrayError::InvalidDtype {
                what: format!("dot on {dt}"),
            })
        }
    };

    let mut out = Array::from_scalar(scalar_in_dtype(dtype, acc), Some(dtype), None)?;
    if device == Device::Gpu {
        out = out.copy_as(None, Some(Device::Gpu))?;
    }
    Ok(out)
}

enum MatShape {
    MatVec,
    VecMat,
    MatMat,
}

fn matmul_dispatch(
    a: &Array,
    b: &Array,
    dtype: Dtype,
    device: Device,
    shape: MatShape,
) -> Result<Array> {
    let (m, k, n, out_extent) = match shape {
        MatShape::MatVec => {
            let (m, ka) = (a.extent().dim(0), a.extent().dim(1));
            let kb = b.extent().dim(0);
            if ka != kb {
                return Err(shape_err(a, b));
            }
            (m, ka, 1, Extent::new(&[m])?)
        }
        MatShape::VecMat => {
            let ka = a.extent().dim(0);
            let (kb, n) = (b.extent().dim(0), b.extent().dim(1));
            if ka != kb {
                return Err(shape_err(a, b));
            }
            (1, ka, n, Extent::new(&[n])?)
        }
        MatShape::MatMat => {
            let (m, ka) = (a.extent().dim(0), a.extent().dim(1));
            let (kb, n) = (b.extent().dim(0), b.extent().dim(1));
            if ka != kb {
                return Err(shape_err(a, b));
            }
            (m, ka, n, Extent::new(&[m, n])?)
        }
    };
    let (m, k, n) = (m as usize, k as usize, n as usize);

    // The GEMM primitive wants contiguous row-major host operands in the
    // result dtype; clone whatever does not comply.
    let lhs = contiguous_host(a, dtype)?;
    let rhs = contiguous_host(b, dtype)?;
    let mut out = Array::new(out_extent, dtype, Device::Cpu)?;

    with_dtype!(dtype, T => {
        matmul::<T>(lhs.ptr::<T>()?, rhs.ptr::<T>()?, out.ptr::<T>()?, m, k, n);
        Ok::<(), ArrayError>(())
    })?;

    if device == Device::Gpu {
        out = out.copy_as(None, Some(Device::Gpu))?;
    }
    Ok(out)
}

/// The opaque row-major GEMM primitive: `c[m×n] = a[m×k] · b[k×n]`.
///
/// i-k-j loop order keeps the inner traversal contiguous on both `b` and
/// `c`, which is what lets the autovectorizer work on the inner loop.
fn matmul<T>(a: *const T, b: *const T, c: *mut T, m: usize, k: usize, n: usize)
where
    T: Scalar + Mul<Output = T> + Add<Output = T>,
{
    for i in 0..m {
        for l in 0..k {
            let aval = unsafe { *a.add(i * k + l) };
            if aval == T::zero() {
                continue;
            }
            for j in 0..n {
                unsafe {
                    let cij = c.add(i * n + j);
                    *cij = *cij + aval * *b.add(l * n + j);
                }
            }
        }
    }
}

fn shape_err(a: &Array, b: &Array) -> ArrayError {
    ArrayError::ShapeMismatch {
        what: format!("dot between {} and {}", a.extent(), b.extent()),
    }
}

fn scalar_in_dtype(dtype: Dtype, c: Complex64) -> ScalarValue {
    match dtype {
        Dtype::Int32 => ScalarValue::Int32(c.re as i32),
        Dtype::Int64 => ScalarValue::Int64(c.re as i64),
        Dtype::Float32 => ScalarValue::Float32(c.re as f32),
        Dtype::Float64 => ScalarValue::Float64(c.re),
        Dtype::CFloat32 => ScalarValue::CFloat32(num_complex::Complex32::new(c.re as f32, c.im as f32)),
        _ => ScalarValue::CFloat64(c),
    }
}

/// Host-resident, trivially laid out copy (or alias, when already so) in the
/// requested dtype.
fn contiguous_host(a: &Array, dtype: Dtype) -> Result<Array> {
    if a.device() == Device::Cpu
        && a.dtype() == dtype
        && a.stride().is_trivial()
        && a.stride().is_contiguous()
    {
        Ok(a.clone())
    } else {
        a.copy_as(Some(dtype), Some(Device::Cpu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn arr(data: &[f64]) -> Array {
        Array::from_slice(data).unwrap()
    }

    #[test]
    fn test_vector_dot() {
        let a = arr(&[1.0, 2.0, 3.0]);
        let b = arr(&[4.0, 5.0, 6.0]);
        let out = dot(&a, &b).unwrap();
        assert!(out.is_scalar());
        assert_eq!(out.item().unwrap(), ScalarValue::Float64(32.0));
    }

    #[test]
    fn test_vector_dot_int() {
        let a = Array::from_slice(&[1i64, 2, 3]).unwrap();
        let b = Array::from_slice(&[4i64, 5, 6]).unwrap();
        let out = dot(&a, &b).unwrap();
        assert_eq!(out.dtype(), Dtype::Int64);
        assert_eq!(out.item().unwrap(), ScalarValue::Int64(32));
    }

    #[test]
    fn test_dot_length_mismatch() {
        let a = arr(&[1.0, 2.0]);
        let b = arr(&[1.0, 2.0, 3.0]);
        assert!(dot(&a, &b).is_err());
    }

    #[test]
    fn test_scalar_dot_is_elementwise() {
        let a = arr(&[1.0, 2.0, 3.0]);
        let s = Array::from_scalar(2.0f64, None, None).unwrap();
        let out = dot(&a, &s).unwrap();
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_row_times_column() {
        let mut a = arr(&[1.0, 2.0, 3.0]);
        a.reshape(&[1, 3]).unwrap();
        let mut b = arr(&[4.0, 5.0, 6.0]);
        b.reshape(&[3, 1]).unwrap();
        let c = dot(&a, &b).unwrap();
        assert_eq!(c.extent().as_slice(), &[1, 1]);
        assert_eq!(c.item().unwrap(), ScalarValue::Float64(32.0));
    }

    #[test]
    fn test_matmul_2x2() {
        let mut a = arr(&[1.0, 2.0, 3.0, 4.0]);
        a.reshape(&[2, 2]).unwrap();
        let mut b = arr(&[5.0, 6.0, 7.0, 8.0]);
        b.reshape(&[2, 2]).unwrap();
        let c = dot(&a, &b).unwrap();
        assert_eq!(c.extent().as_slice(), &[2, 2]);
        assert_eq!(c.to_vec::<f64>().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_mat_vec() {
        let mut a = arr(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        a.reshape(&[2, 3]).unwrap();
        let v = arr(&[1.0, 0.0, -1.0]);
        let out = dot(&a, &v).unwrap();
        assert_eq!(out.extent().as_slice(), &[2]);
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![-2.0, -2.0]);
    }

    #[test]
    fn test_vec_mat() {
        let v = arr(&[1.0, 1.0]);
        let mut a = arr(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        a.reshape(&[2, 3]).unwrap();
        let out = dot(&v, &a).unwrap();
        assert_eq!(out.extent().as_slice(), &[3]);
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_matmul_transposed_operand_is_contiguized() {
        let mut a = arr(&[1.0, 2.0, 3.0, 4.0]);
        a.reshape(&[2, 2]).unwrap();
        let at = a.transposed(&[]).unwrap();
        let mut b = arr(&[1.0, 0.0, 0.0, 1.0]);
        b.reshape(&[2, 2]).unwrap();
        let c = dot(&at, &b).unwrap();
        // atᵀ · I = aᵀ
        assert_eq!(c.to_vec::<f64>().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_dot_promotes_dtype() {
        let a = Array::from_slice(&[1i64, 2]).unwrap();
        let b = arr(&[0.5, 0.5]);
        let out = dot(&a, &b).unwrap();
        assert_eq!(out.dtype(), Dtype::Float64);
        assert_eq!(out.item().unwrap(), ScalarValue::Float64(1.5));
    }

    #[test]
    fn test_sum_widened() {
        let a = Array::from_slice(&[1.5f32; 1000]).unwrap();
        let s = sum(&a).unwrap();
        match s {
            ScalarValue::Float32(v) => assert_relative_eq!(v, 1500.0, epsilon = 1e-3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_complex_dot() {
        use num_complex::Complex64 as C;
        let a = Array::from_slice(&[C::new(1.0, 1.0), C::new(2.0, 0.0)]).unwrap();
        let b = Array::from_slice(&[C::new(1.0, -1.0), C::new(0.0, 2.0)]).unwrap();
        let out = dot(&a, &b).unwrap();
        // (1+i)(1-i) + 2·2i = 2 + 4i
        assert_eq!(
            out.item().unwrap(),
            ScalarValue::CFloat64(C::new(2.0, 4.0))
        );
    }
}
