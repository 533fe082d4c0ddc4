//! Element-wise expression evaluation across paths and dtypes.

use approx::assert_relative_eq;
use densor::{Array, Device, Dtype, MapKernel, ScalarValue};
use num_complex::Complex64;

fn arr(data: &[f64]) -> Array {
    Array::from_slice(data).unwrap()
}

#[test]
fn pointwise_matches_scalar_op() {
    let xs: Vec<f64> = (0..100).map(|i| i as f64 * 0.25 - 10.0).collect();
    let ys: Vec<f64> = (0..100).map(|i| (i as f64).sin() + 2.0).collect();
    let a = arr(&xs);
    let b = arr(&ys);

    let sum = (&a + &b).eval().unwrap().to_vec::<f64>().unwrap();
    let prod = (&a * &b).eval().unwrap().to_vec::<f64>().unwrap();
    let quot = (&a / &b).eval().unwrap().to_vec::<f64>().unwrap();
    for i in 0..100 {
        assert_relative_eq!(sum[i], xs[i] + ys[i]);
        assert_relative_eq!(prod[i], xs[i] * ys[i]);
        assert_relative_eq!(quot[i], xs[i] / ys[i], epsilon = 1e-12);
    }
}

#[test]
fn commutativity_where_scalar_op_commutes() {
    let a = arr(&[1.5, -2.0, 3.25]);
    let b = arr(&[0.5, 4.0, -1.0]);
    assert_eq!(
        (&a + &b).eval().unwrap().to_vec::<f64>().unwrap(),
        (&b + &a).eval().unwrap().to_vec::<f64>().unwrap()
    );
    assert_eq!(
        (&a * &b).eval().unwrap().to_vec::<f64>().unwrap(),
        (&b * &a).eval().unwrap().to_vec::<f64>().unwrap()
    );
}

#[test]
fn deep_tree_single_materialization() {
    let a = arr(&[1.0, 2.0, 3.0]);
    let b = arr(&[4.0, 5.0, 6.0]);
    // |(a+b)(a-b)| = |a² - b²|, fused into one pass.
    let out = ((&a + &b) * (&a - &b)).abs().eval().unwrap();
    assert_eq!(out.to_vec::<f64>().unwrap(), vec![15.0, 21.0, 27.0]);
}

#[test]
fn strided_and_trivial_paths_agree() {
    let n = 64i64;
    let mut a = Array::from_slice(&(0..n * n).map(|i| i as f64).collect::<Vec<_>>()).unwrap();
    a.reshape(&[n, n]).unwrap();
    let at = a.transposed(&[]).unwrap();

    // Strided: transposed operand against a trivial one.
    let strided = (&at + &a).eval().unwrap().to_vec::<f64>().unwrap();
    // Trivial: both collapsed first.
    let collapsed = at.copy().unwrap();
    let trivial = (&collapsed + &a).eval().unwrap().to_vec::<f64>().unwrap();
    assert_eq!(strided, trivial);
}

#[test]
fn parallel_threshold_crossing_consistent() {
    // Straddle the 2500-element default cutoff.
    for n in [2400usize, 2600, 10_000] {
        let xs: Vec<f64> = (0..n).map(|i| (i % 97) as f64).collect();
        let a = arr(&xs);
        let out = ((&a * 3.0f64) + 1.0f64).eval().unwrap().to_vec::<f64>().unwrap();
        for i in 0..n {
            assert_eq!(out[i], xs[i] * 3.0 + 1.0);
        }
    }
}

#[test]
fn integer_arithmetic_and_bitwise() {
    let a = Array::from_slice(&[0b1100i64, 0b1010, -8]).unwrap();
    let b = Array::from_slice(&[0b1010i64, 0b0110, 3]).unwrap();
    assert_eq!(
        (&a & &b).eval().unwrap().to_vec::<i64>().unwrap(),
        vec![0b1000, 0b0010, -8i64 & 3]
    );
    assert_eq!(
        (&a | &b).eval().unwrap().to_vec::<i64>().unwrap(),
        vec![0b1110, 0b1110, -8i64 | 3]
    );
    assert_eq!(
        (&a / &b).eval().unwrap().to_vec::<i64>().unwrap(),
        vec![1, 1, -2]
    );
}

#[test]
fn comparisons_produce_indicator_values() {
    let a = arr(&[1.0, 2.0, 3.0]);
    let b = arr(&[2.0, 2.0, 2.0]);
    assert_eq!(
        a.lt(&b).eval().unwrap().to_vec::<f64>().unwrap(),
        vec![1.0, 0.0, 0.0]
    );
    assert_eq!(
        a.ge(&b).eval().unwrap().to_vec::<f64>().unwrap(),
        vec![0.0, 1.0, 1.0]
    );
    assert_eq!(
        a.eq_elem(&b).eval().unwrap().to_vec::<f64>().unwrap(),
        vec![0.0, 1.0, 0.0]
    );
}

#[test]
fn unary_functions() {
    let a = arr(&[0.0, 1.0, 4.0]);
    assert_eq!(
        a.sqrt().eval().unwrap().to_vec::<f64>().unwrap(),
        vec![0.0, 1.0, 2.0]
    );
    let e = a.exp().eval().unwrap().to_vec::<f64>().unwrap();
    assert_relative_eq!(e[1], std::f64::consts::E);
    let neg = (-&a).eval().unwrap().to_vec::<f64>().unwrap();
    assert_eq!(neg, vec![0.0, -1.0, -4.0]);
}

#[test]
fn complex_arithmetic() {
    let a = Array::from_slice(&[Complex64::new(1.0, 1.0), Complex64::new(0.0, 2.0)]).unwrap();
    let b = Array::from_slice(&[Complex64::new(1.0, -1.0), Complex64::new(3.0, 0.0)]).unwrap();
    let prod = (&a * &b).eval().unwrap().to_vec::<Complex64>().unwrap();
    assert_eq!(prod, vec![Complex64::new(2.0, 0.0), Complex64::new(0.0, 6.0)]);
    assert_eq!(
        (&a + &b).eval().unwrap().dtype(),
        Dtype::CFloat64
    );
}

#[test]
fn promotion_int_to_complex() {
    let i = Array::from_slice(&[1i32, 2]).unwrap();
    let z = Array::from_slice(&[Complex64::new(0.0, 1.0), Complex64::new(1.0, 0.0)]).unwrap();
    let out = (&i * &z).eval().unwrap();
    assert_eq!(out.dtype(), Dtype::CFloat64);
    assert_eq!(
        out.to_vec::<Complex64>().unwrap(),
        vec![Complex64::new(0.0, 1.0), Complex64::new(2.0, 0.0)]
    );
}

#[test]
fn scalar_array_broadcast() {
    let a = arr(&[1.0, 2.0, 3.0]);
    let s = Array::from_scalar(10.0f64, None, None).unwrap();
    let out = (&a * &s).eval().unwrap();
    assert!(!out.is_scalar());
    assert_eq!(out.to_vec::<f64>().unwrap(), vec![10.0, 20.0, 30.0]);

    let ss = (&s + &s).eval().unwrap();
    assert!(ss.is_scalar());
    assert_eq!(ss.item().unwrap(), ScalarValue::Float64(20.0));
}

#[test]
fn in_place_update_through_alias() {
    let mut a = arr(&[1.0, 2.0, 3.0]);
    let view = a.clone();
    let b = arr(&[10.0, 20.0, 30.0]);
    a.update(densor::BinaryOp::Add, &b).unwrap();
    // The alias sees the in-place result.
    assert_eq!(view.to_vec::<f64>().unwrap(), vec![11.0, 22.0, 33.0]);
}

#[test]
fn map_kernel_three_operands() {
    let a = arr(&[1.0, 2.0]);
    let b = arr(&[3.0, 4.0]);
    let c = arr(&[5.0, 6.0]);
    let fma = MapKernel::new("fused_mul_add", |v| v[0] * v[1] + v[2]);
    let out = a.map(fma, &[&b, &c]).eval().unwrap();
    assert_eq!(out.to_vec::<f64>().unwrap(), vec![8.0, 14.0]);
}

#[test]
fn filled_random_bounds_hold_through_expressions() {
    let base = Array::new(
        densor::Extent::new(&[512]).unwrap(),
        Dtype::Float64,
        Device::Cpu,
    )
    .unwrap();
    let r = base.filled_random(0.0, 1.0, 99).unwrap();
    let shifted = (&r + 1.0f64).eval().unwrap().to_vec::<f64>().unwrap();
    assert!(shifted.iter().all(|v| (1.0..2.0).contains(v)));
}
