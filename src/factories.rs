//! Derived constructors: ranges, like-shaped fills, concatenation.

use crate::storage::Storage;
use crate::{Array, ArrayError, Device, Dtype, Extent, Result};

/// Same shape/dtype/device as `a`, every element zero.
pub fn zeros_like(a: &Array) -> Result<Array> {
    let mut out = Array::new(a.extent().clone(), a.dtype(), a.device())?;
    out.fill(0i64)?;
    Ok(out)
}

/// Same shape/dtype/device as `a`, every element one.
pub fn ones_like(a: &Array) -> Result<Array> {
    let mut out = Array::new(a.extent().clone(), a.dtype(), a.device())?;
    out.fill(1i64)?;
    Ok(out)
}

/// Same shape/dtype/device as `a`, uniformly filled (see
/// [`Array::fill_random`] for interval and seed semantics).
pub fn random_like(a: &Array, min: f64, max: f64, seed: i64) -> Result<Array> {
    let mut out = Array::new(a.extent().clone(), a.dtype(), a.device())?;
    out.fill_random(min, max, seed)?;
    Ok(out)
}

/// `num` equally spaced points with *inclusive* endpoints; the last element
/// is exactly `end`.
pub fn linear(start: f64, end: f64, num: i64, dtype: Dtype, device: Device) -> Result<Array> {
    if num < 1 {
        return Err(ArrayError::ShapeMismatch {
            what: format!("linear() with {num} points"),
        });
    }
    let n = num as usize;
    let mut out = Array::new(Extent::new(&[num])?, dtype, Device::Cpu)?;
    let step = if n > 1 {
        (end - start) / (n as f64 - 1.0)
    } else {
        0.0
    };
    for i in 0..n {
        // Write the endpoint exactly rather than through the increment.
        let v = if i + 1 == n { end } else { start + step * i as f64 };
        out.set(&[i as i64], v)?;
    }
    if device == Device::Gpu {
        out = out.copy_as(None, Some(Device::Gpu))?;
    }
    Ok(out)
}

/// Half-open `[start, end)` with step `inc`; `len = ceil((end-start)/inc)`.
/// A negative step walks downward.
pub fn range(start: f64, end: f64, inc: f64, dtype: Dtype, device: Device) -> Result<Array> {
    if inc == 0.0 {
        return Err(ArrayError::ShapeMismatch {
            what: "range() with zero increment".to_string(),
        });
    }
    let len = ((end - start) / inc).ceil();
    if len < 1.0 {
        return Err(ArrayError::ShapeMismatch {
            what: format!("empty range({start}, {end}, {inc})"),
        });
    }
    let n = len as usize;
    let mut out = Array::new(Extent::new(&[n as i64])?, dtype, Device::Cpu)?;
    for i in 0..n {
        out.set(&[i as i64], start + inc * i as f64)?;
    }
    if device == Device::Gpu {
        out = out.copy_as(None, Some(Device::Gpu))?;
    }
    Ok(out)
}

/// Join arrays along an existing axis. Shapes must agree on every other
/// axis; dtypes and devices promote. The result is contiguous; inputs that
/// are not are copied first.
pub fn concatenate(arrays: &[Array], axis: usize) -> Result<Array> {
    let (dtype, device, rank) = combined_tags(arrays)?;
    if axis >= rank {
        return Err(ArrayError::ShapeMismatch {
            what: format!("concatenate along axis {axis} of rank-{rank} arrays"),
        });
    }
    let first = arrays[0].extent();
    let mut axis_total = 0i64;
    for a in arrays {
        if a.ndim() != rank {
            return Err(ArrayError::ShapeMismatch {
                what: format!("concatenate of rank {} with rank {rank}", a.ndim()),
            });
        }
        for ax in 0..rank {
            if ax != axis && a.extent().dim(ax) != first.dim(ax) {
                return Err(ArrayError::ShapeMismatch {
                    what: format!("concatenate of {} with {}", a.extent(), first),
                });
            }
        }
        axis_total += a.extent().dim(axis);
    }

    let mut dims = first.as_slice().to_vec();
    dims[axis] = axis_total;
    let dst = Array::new(Extent::new(&dims)?, dtype, device)?;

    // Row-major slab layout: `outer` blocks, each holding every input's
    // `axis_len × inner` elements back to back.
    let outer: usize = dims[..axis].iter().map(|&d| d as usize).product();
    let inner: usize = dims[axis + 1..].iter().map(|&d| d as usize).product();
    let dst_block = axis_total as usize * inner;

    let mut axis_offset = 0usize;
    for a in arrays {
        let src = staged_input(a, dtype)?;
        let len = a.extent().dim(axis) as usize * inner;
        for o in 0..outer {
            unsafe {
                Storage::copy_elements(
                    dst.storage()?,
                    o * dst_block + axis_offset,
                    src.storage()?,
                    o * len,
                    len,
                )?;
            }
        }
        axis_offset += len;
    }
    Ok(dst)
}

/// Stack arrays along a *new* axis at `axis`. Shapes must match exactly; the
/// result has rank one higher with a new dimension of length `arrays.len()`.
pub fn stack(arrays: &[Array], axis: usize) -> Result<Array> {
    let (dtype, device, rank) = combined_tags(arrays)?;
    if axis > rank {
        return Err(ArrayError::ShapeMismatch {
            what: format!("stack at axis {axis} of rank-{rank} arrays"),
        });
    }
    let first = arrays[0].extent();
    for a in arrays {
        if a.extent() != first {
            return Err(ArrayError::ShapeMismatch {
                what: format!("stack of {} with {}", a.extent(), first),
            });
        }
    }

    let mut dims = first.as_slice().to_vec();
    dims.insert(axis, arrays.len() as i64);
    let dst = Array::new(Extent::new(&dims)?, dtype, device)?;

    let outer: usize = first.as_slice()[..axis].iter().map(|&d| d as usize).product();
    let inner: usize = first.as_slice()[axis..].iter().map(|&d| d as usize).product();
    let layers = arrays.len();

    for (k, a) in arrays.iter().enumerate() {
        let src = staged_input(a, dtype)?;
        for o in 0..outer {
            unsafe {
                Storage::copy_elements(
                    dst.storage()?,
                    (o * layers + k) * inner,
                    src.storage()?,
                    o * inner,
                    inner,
                )?;
            }
        }
    }
    Ok(dst)
}

/// Common dtype/device/rank of a non-empty input list.
fn combined_tags(arrays: &[Array]) -> Result<(Dtype, Device, usize)> {
    let first = arrays.first().ok_or_else(|| ArrayError::ShapeMismatch {
        what: "empty input list".to_string(),
    })?;
    first.storage()?;
    let mut dtype = first.dtype();
    let mut device = first.device();
    for a in &arrays[1..] {
        a.storage()?;
        dtype = dtype.common(a.dtype());
        device = device.common(a.device());
    }
    if dtype.is_none() {
        return Err(ArrayError::InvalidDtype {
            what: format!("combining arrays of {dtype}"),
        });
    }
    Ok((dtype, device, first.ndim()))
}

/// A host-resident, trivially laid out image of `a` in the combined dtype,
/// ready for slab blitting.
fn staged_input(a: &Array, dtype: Dtype) -> Result<Array> {
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
    use crate::scalar::ScalarValue;

    #[test]
    fn test_range_values() {
        let x = range(0.0, 10.0, 1.0, Dtype::Int64, Device::Cpu).unwrap();
        assert_eq!(x.extent().as_slice(), &[10]);
        assert_eq!(
            x.to_vec::<i64>().unwrap(),
            vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]
        );
    }

    #[test]
    fn test_range_negative_step() {
        let x = range(5.0, 0.0, -1.0, Dtype::Int64, Device::Cpu).unwrap();
        assert_eq!(x.to_vec::<i64>().unwrap(), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_range_ceil_length() {
        let x = range(0.0, 1.0, 0.3, Dtype::Float64, Device::Cpu).unwrap();
        // ceil(1/0.3) = 4
        assert_eq!(x.extent().as_slice(), &[4]);
    }

    #[test]
    fn test_range_rejects_empty() {
        assert!(range(0.0, 10.0, -1.0, Dtype::Int64, Device::Cpu).is_err());
        assert!(range(0.0, 10.0, 0.0, Dtype::Int64, Device::Cpu).is_err());
    }

    #[test]
    fn test_linear_endpoints() {
        let x = linear(0.0, 1.0, 5, Dtype::Float64, Device::Cpu).unwrap();
        assert_eq!(
            x.to_vec::<f64>().unwrap(),
            vec![0.0, 0.25, 0.5, 0.75, 1.0]
        );
        // The endpoint is exact even when the step is not representable.
        let y = linear(0.0, 1.0, 3, Dtype::Float64, Device::Cpu).unwrap();
        assert_eq!(y.get(&[2]).unwrap(), ScalarValue::Float64(1.0));
    }

    #[test]
    fn test_zeros_ones_like() {
        let mut a = Array::from_slice(&[1.0f64, 2.0, 3.0, 4.0]).unwrap();
        a.reshape(&[2, 2]).unwrap();
        let z = zeros_like(&a).unwrap();
        assert_eq!(z.extent().as_slice(), &[2, 2]);
        assert_eq!(z.to_vec::<f64>().unwrap(), vec![0.0; 4]);
        let o = ones_like(&a).unwrap();
        assert_eq!(o.to_vec::<f64>().unwrap(), vec![1.0; 4]);
    }

    #[test]
    fn test_random_like() {
        let a = Array::from_slice(&[0i64; 100]).unwrap();
        let r = random_like(&a, 1.0, 6.0, 42).unwrap();
        assert_eq!(r.dtype(), Dtype::Int64);
        assert!(r.to_vec::<i64>().unwrap().iter().all(|v| (1..=6).contains(v)));
    }

    #[test]
    fn test_stack_rows() {
        let a = Array::from_slice(&[1i64, 2, 3]).unwrap();
        let b = Array::from_slice(&[4i64, 5, 6]).unwrap();
        let s = stack(&[a, b], 0).unwrap();
        assert_eq!(s.extent().as_slice(), &[2, 3]);
        assert_eq!(s.to_vec::<i64>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_stack_axis_one() {
        let a = Array::from_slice(&[1i64, 2, 3]).unwrap();
        let b = Array::from_slice(&[4i64, 5, 6]).unwrap();
        let s = stack(&[a, b], 1).unwrap();
        assert_eq!(s.extent().as_slice(), &[3, 2]);
        assert_eq!(s.to_vec::<i64>().unwrap(), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_concatenate_rows() {
        let mut a = Array::from_slice(&[1i64, 2, 3]).unwrap();
        a.reshape(&[1, 3]).unwrap();
        let mut b = Array::from_slice(&[4i64, 5, 6]).unwrap();
        b.reshape(&[1, 3]).unwrap();
        let c = concatenate(&[a, b], 0).unwrap();
        assert_eq!(c.extent().as_slice(), &[2, 3]);
        assert_eq!(c.to_vec::<i64>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_concatenate_columns() {
        let mut a = Array::from_slice(&[1i64, 2, 3, 4]).unwrap();
        a.reshape(&[2, 2]).unwrap();
        let mut b = Array::from_slice(&[5i64, 6]).unwrap();
        b.reshape(&[2, 1]).unwrap();
        let c = concatenate(&[a, b], 1).unwrap();
        assert_eq!(c.extent().as_slice(), &[2, 3]);
        assert_eq!(c.to_vec::<i64>().unwrap(), vec![1, 2, 5, 3, 4, 6]);
    }

    #[test]
    fn test_concatenate_shape_mismatch() {
        let a = Array::from_slice(&[1i64, 2, 3]).unwrap();
        let b = Array::from_slice(&[4i64, 5]).unwrap();
        assert!(concatenate(&[a, b], 0).is_err());
    }

    #[test]
    fn test_concatenate_promotes_dtype() {
        let a = Array::from_slice(&[1i32, 2]).unwrap();
        let b = Array::from_slice(&[0.5f64, 1.5]).unwrap();
        let c = concatenate(&[a, b], 0).unwrap();
        assert_eq!(c.dtype(), Dtype::Float64);
        assert_eq!(c.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 0.5, 1.5]);
    }

    #[test]
    fn test_stack_transposed_input_staged() {
        let mut a = Array::from_slice(&[1i64, 2, 3, 4]).unwrap();
        a.reshape(&[2, 2]).unwrap();
        let at = a.transposed(&[]).unwrap();
        let b = at.copy().unwrap();
        let s = stack(&[at, b], 0).unwrap();
        assert_eq!(s.extent().as_slice(), &[2, 2, 2]);
        assert_eq!(s.to_vec::<i64>().unwrap(), vec![1, 3, 2, 4, 1, 3, 2, 4]);
    }
}
