//! Lifecycle, aliasing and shape behavior of the array value.

use densor::{Array, ArrayError, Device, Dtype, Extent, ScalarValue, AUTO};

fn iota(n: i64) -> Array {
    let data: Vec<i64> = (0..n).collect();
    Array::from_slice(&data).unwrap()
}

#[test]
fn fill_then_lazy_add() {
    let mut a = Array::new(Extent::new(&[2, 3]).unwrap(), Dtype::Int64, Device::Cpu).unwrap();
    a.fill(5i64).unwrap();
    let b = (&a + &a).eval().unwrap();
    let c = b.copy().unwrap();
    assert_eq!(c.to_vec::<i64>().unwrap(), vec![10; 6]);
    assert_eq!(b.extent().as_slice(), &[2, 3]);
    assert_eq!(b.dtype(), Dtype::Int64);
}

#[test]
fn alias_chain_sees_mutations() {
    // c = b, b = a: writes through a are visible through c.
    let mut a = Array::from_slice(&[1.0f64, 2.0, 3.0]).unwrap();
    let mut b = Array::default();
    b.assign(&a).unwrap();
    let mut c = Array::default();
    c.assign(&b).unwrap();

    a.set(&[0], 9.0f64).unwrap();
    assert_eq!(c.get(&[0]).unwrap(), ScalarValue::Float64(9.0));

    // A deep copy breaks the chain.
    let mut w = a.copy().unwrap();
    w.set(&[0], 0.0f64).unwrap();
    assert_eq!(a.get(&[0]).unwrap(), ScalarValue::Float64(9.0));
}

#[test]
fn refcount_drops_to_one_free() {
    let a = iota(16);
    let aliases: Vec<Array> = (0..7).map(|_| a.clone()).collect();
    assert_eq!(a.reference_count(), 8);
    // Drop in scrambled order; the storage must survive until the last one.
    for (i, al) in aliases.into_iter().enumerate() {
        assert_eq!(al.get(&[0]).unwrap(), ScalarValue::Int64(0));
        drop(al);
        assert_eq!(a.reference_count(), 7 - i);
    }
    assert_eq!(a.to_vec::<i64>().unwrap()[15], 15);
}

#[test]
fn len_size_identity() {
    let mut a = iota(24);
    a.reshape(&[2, 3, 4]).unwrap();
    let tail: usize = a.extent().as_slice()[1..]
        .iter()
        .map(|&d| d as usize)
        .product();
    assert_eq!(a.extent().size(), a.len() * tail);
}

#[test]
fn reshape_preserves_size_and_sets_extent() {
    let mut a = iota(12);
    a.reshape(&[3, AUTO]).unwrap();
    assert_eq!(a.extent().as_slice(), &[3, 4]);
    assert_eq!(a.size(), 12);
    assert!(matches!(
        a.reshape(&[5, 3]),
        Err(ArrayError::InvalidReshape { .. })
    ));
}

#[test]
fn transpose_involution() {
    for dims in [vec![4i64], vec![2, 3], vec![2, 3, 4]] {
        let n: i64 = dims.iter().product();
        let mut a = iota(n);
        a.reshape(&dims).unwrap();
        let original = a.to_vec::<i64>().unwrap();
        let tt = a.transposed(&[]).unwrap().transposed(&[]).unwrap();
        assert_eq!(tt.extent().as_slice(), a.extent().as_slice());
        assert_eq!(tt.to_vec::<i64>().unwrap(), original);
    }
}

#[test]
fn reshape_then_transpose_scenario() {
    let m = densor::range(1.0, 7.0, 1.0, Dtype::Int64, Device::Cpu)
        .unwrap()
        .reshaped(&[2, 3])
        .unwrap();
    let mt = m.transposed(&[]).unwrap();
    assert_eq!(mt.extent().as_slice(), &[3, 2]);
    assert_eq!(
        mt.subscript(0).unwrap().get(&[0]).unwrap(),
        ScalarValue::Int64(1)
    );
    assert_eq!(
        mt.subscript(0).unwrap().get(&[1]).unwrap(),
        ScalarValue::Int64(4)
    );
    assert_eq!(
        mt.subscript(2).unwrap().get(&[1]).unwrap(),
        ScalarValue::Int64(6)
    );
}

#[test]
fn subscript_bounds_and_chaining() {
    let mut a = iota(6);
    a.reshape(&[2, 3]).unwrap();
    assert!(matches!(
        a.subscript(2),
        Err(ArrayError::OutOfBounds { .. })
    ));
    let elem = a.subscript(1).unwrap().subscript(2).unwrap();
    assert!(elem.is_scalar());
    assert_eq!(elem.item().unwrap(), ScalarValue::Int64(5));
}

#[test]
fn child_cannot_rebind() {
    let mut a = iota(6);
    a.reshape(&[2, 3]).unwrap();
    let other = Array::from_slice(&[9i64, 8, 7]).unwrap();
    let mut row = a.subscript(0).unwrap();
    row.assign(&other).unwrap();
    // The parent saw the copy; the child still borrows the parent.
    assert_eq!(a.to_vec::<i64>().unwrap(), vec![9, 8, 7, 3, 4, 5]);
    assert!(row.shares_storage(&a));
    assert!(!row.shares_storage(&other));
}

#[test]
fn dtype_parse_round_trip() {
    assert_eq!("int".parse::<Dtype>().unwrap(), Dtype::Int32);
    assert_eq!("long long".parse::<Dtype>().unwrap(), Dtype::Int64);
    assert_eq!("complex double".parse::<Dtype>().unwrap(), Dtype::CFloat64);
    assert!(matches!(
        "quaternion".parse::<Dtype>(),
        Err(ArrayError::InvalidDtype { .. })
    ));
    assert_eq!("GPU".parse::<Device>().unwrap(), Device::Gpu);
}

#[test]
fn uninitialized_operations_fail() {
    let a = Array::default();
    assert!(matches!(a.copy(), Err(ArrayError::Uninitialized)));
    assert!(matches!(a.subscript(0), Err(ArrayError::Uninitialized)));
    let b = Array::from_slice(&[1.0f64]).unwrap();
    assert!(matches!((&a + &b).eval(), Err(ArrayError::Uninitialized)));
}

#[cfg(not(feature = "gpu"))]
#[test]
fn gpu_without_feature_is_unavailable() {
    assert!(matches!(
        Array::new(Extent::new(&[4]).unwrap(), Dtype::Float64, Device::Gpu),
        Err(ArrayError::DeviceUnavailable)
    ));
}
