//! Uniform random fills.
//!
//! `fill_random` samples uniformly: the open interval `[min, max)` for
//! floating-point arrays, the closed interval `[min, max]` for integers, and
//! independently sampled real/imaginary components for complex arrays.
//!
//! The seed is *process-sticky*: passing a non-default seed reseeds the
//! shared generator and is remembered; subsequent calls with the default
//! seed (−1) continue the same stream. The first-ever default-seeded call
//! derives its seed from the wall clock.

use crate::kernel;
use crate::scalar::Scalar;
use crate::{Array, Device, Dtype, Result};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Uniform};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seed sentinel: derive from the wall clock (first call), then continue the
/// running stream.
pub const RANDOM_SEED: i64 = -1;

static RNG_STATE: Mutex<Option<StdRng>> = Mutex::new(None);

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
}

/// Run `f` with the shared generator, applying the sticky-seed rule.
fn with_rng<R>(seed: i64, f: impl FnOnce(&mut StdRng) -> R) -> R {
    let mut guard = RNG_STATE.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_mut() {
        // Default seed: continue the running stream.
        Some(rng) if seed == RANDOM_SEED => f(rng),
        // Explicit seed (or first-ever call): reseed the stream.
        _ => {
            let seed = if seed == RANDOM_SEED {
                clock_seed()
            } else {
                seed as u64
            };
            f(guard.insert(StdRng::seed_from_u64(seed)))
        }
    }
}

impl Array {
    /// Fill with uniformly distributed values (see the module docs for the
    /// interval and seed rules). Respects the current stride.
    pub fn fill_random(&mut self, min: f64, max: f64, seed: i64) -> Result<()> {
        match self.device() {
            Device::Cpu => fill_host(self, min, max, seed),
            Device::Gpu => {
                // Sample into a host staging buffer, upload in one transfer.
                let mut staged = Array::new(self.extent().clone(), self.dtype(), Device::Cpu)?;
                fill_host(&mut staged, min, max, seed)?;
                crate::array::copy_region(&staged, self)
            }
        }
    }

    /// Pure variant of [`Array::fill_random`].
    pub fn filled_random(&self, min: f64, max: f64, seed: i64) -> Result<Array> {
        let mut out = self.copy()?;
        out.fill_random(min, max, seed)?;
        Ok(out)
    }
}

fn fill_host(arr: &mut Array, min: f64, max: f64, seed: i64) -> Result<()> {
    debug_assert_eq!(arr.device(), Device::Cpu);
    if max <= min {
        // Degenerate interval: constant fill, no samples drawn.
        return arr.fill(min);
    }
    let dims = kernel::dims_of(arr.extent());
    let steps = arr.stride().as_slice().to_vec();

    match arr.dtype() {
        Dtype::Int32 | Dtype::Int64 => {
            let dist = Uniform::new_inclusive(min as i64, max as i64);
            with_rng(seed, |rng| {
                with_dtype!(arr.dtype(), T => {
                    let base = arr.ptr::<T>()?;
                    kernel::for_each_offset(&dims, &[&steps], |offs| {
                        let v = dist.sample(rng);
                        unsafe {
                            *base.offset(offs[0]) =
                                T::from_canonical(Complex64::new(v as f64, 0.0))
                        };
                    })
                })
            })
        }
        Dtype::Float32 | Dtype::Float64 => {
            let dist = Uniform::new(min, max);
            with_rng(seed, |rng| {
                with_dtype!(arr.dtype(), T => {
                    let base = arr.ptr::<T>()?;
                    kernel::for_each_offset(&dims, &[&steps], |offs| {
                        let v = dist.sample(rng);
                        unsafe { *base.offset(offs[0]) = T::from_canonical(Complex64::new(v, 0.0)) };
                    })
                })
            })
        }
        Dtype::CFloat32 | Dtype::CFloat64 => {
            let dist = Uniform::new(min, max);
            with_rng(seed, |rng| {
                with_dtype!(arr.dtype(), T => {
                    let base = arr.ptr::<T>()?;
                    kernel::for_each_offset(&dims, &[&steps], |offs| {
                        let re = dist.sample(rng);
                        let im = dist.sample(rng);
                        unsafe { *base.offset(offs[0]) = T::from_canonical(Complex64::new(re, im)) };
                    })
                })
            })
        }
        dt => Err(crate::ArrayError::InvalidDtype {
            what: format!("fill_random on {dt}"),
        }),
    }
}

/// Sample one value on the shared stream (used by tests and calibration).
#[allow(dead_code)]
pub(crate) fn sample_unit(seed: i64) -> f64 {
    with_rng(seed, |rng| rng.gen::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_range_is_half_open() {
        let mut a = Array::new(
            crate::Extent::new(&[1000]).unwrap(),
            Dtype::Float64,
            Device::Cpu,
        )
        .unwrap();
        a.fill_random(2.0, 3.0, 7).unwrap();
        for v in a.to_vec::<f64>().unwrap() {
            assert!((2.0..3.0).contains(&v));
        }
    }

    #[test]
    fn test_integer_range_is_closed() {
        let mut a = Array::new(
            crate::Extent::new(&[2000]).unwrap(),
            Dtype::Int64,
            Device::Cpu,
        )
        .unwrap();
        a.fill_random(0.0, 3.0, 11).unwrap();
        let vals = a.to_vec::<i64>().unwrap();
        assert!(vals.iter().all(|&v| (0..=3).contains(&v)));
        // Closed interval: the upper endpoint is reachable.
        assert!(vals.contains(&3));
    }

    #[test]
    fn test_seed_reproducibility() {
        let extent = crate::Extent::new(&[64]).unwrap();
        let mut a = Array::new(extent.clone(), Dtype::Float64, Device::Cpu).unwrap();
        let mut b = Array::new(extent, Dtype::Float64, Device::Cpu).unwrap();
        a.fill_random(0.0, 1.0, 12345).unwrap();
        b.fill_random(0.0, 1.0, 12345).unwrap();
        assert_eq!(a.to_vec::<f64>().unwrap(), b.to_vec::<f64>().unwrap());
    }

    #[test]
    fn test_sticky_seed_continues_stream() {
        let extent = crate::Extent::new(&[32]).unwrap();
        let mut a = Array::new(extent.clone(), Dtype::Float64, Device::Cpu).unwrap();
        let mut b = Array::new(extent, Dtype::Float64, Device::Cpu).unwrap();
        a.fill_random(0.0, 1.0, 777).unwrap();
        // Default seed continues the stream started by 777 rather than
        // replaying it.
        b.fill_random(0.0, 1.0, RANDOM_SEED).unwrap();
        assert_ne!(a.to_vec::<f64>().unwrap(), b.to_vec::<f64>().unwrap());
    }

    #[test]
    fn test_complex_fill() {
        let mut a = Array::new(
            crate::Extent::new(&[16]).unwrap(),
            Dtype::CFloat64,
            Device::Cpu,
        )
        .unwrap();
        a.fill_random(-1.0, 1.0, 3).unwrap();
        for z in a.to_vec::<num_complex::Complex64>().unwrap() {
            assert!((-1.0..1.0).contains(&z.re));
            assert!((-1.0..1.0).contains(&z.im));
        }
    }
}
