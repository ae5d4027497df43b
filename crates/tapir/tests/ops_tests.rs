// Ops Tests: Forward results of the public ops on the CPU backend
//
// Expected values are written out by hand; float results are compared with a
// tolerance.

use rstest::rstest;
use tapir::prelude::*;

fn engine() -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    cpu_engine().unwrap()
}

fn approx(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}

fn assert_approx_vec(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        actual.len(),
        expected.len()
    );
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(approx(*a, *e, tol), "index {i}: {a} != {e} (tol={tol})");
    }
}

fn f32s(e: &Engine, t: &Tensor) -> Vec<f32> {
    e.read_sync(t).unwrap().to_f32_vec().unwrap()
}

fn i32s(e: &Engine, t: &Tensor) -> Vec<i32> {
    e.read_sync(t).unwrap().to_i32_vec().unwrap()
}

fn bools(e: &Engine, t: &Tensor) -> Vec<bool> {
    e.read_sync(t).unwrap().to_bool_vec().unwrap()
}

// ─────────────────────────────────────────────────────────────────────
// Creation and conversion
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_tensor_infers_dtype_and_shape() {
    let mut e = engine();
    let t = ops::tensor(&mut e, vec![vec![1i32, 2, 3], vec![4, 5, 6]], None).unwrap();
    assert_eq!(t.dims(), &[2, 3]);
    assert_eq!(t.dtype(), DType::Int32);

    let t = ops::tensor(&mut e, vec![1i32, 0, 2], Some(DType::Bool)).unwrap();
    assert_eq!(t.dtype(), DType::Bool);
    assert_eq!(bools(&e, &t), vec![true, false, true]);
}

#[test]
fn test_rank_checked_constructors() {
    let mut e = engine();
    let s = ops::scalar(&mut e, 2.5f32).unwrap();
    assert!(s.shape().is_scalar());
    let err = ops::scalar(&mut e, vec![1.0f32, 2.0]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
    assert!(ops::tensor1d(&mut e, vec![vec![1.0f32]]).is_err());
    assert!(ops::tensor2d(&mut e, vec![1.0f32]).is_err());
}

#[test]
fn test_string_tensor() {
    let mut e = engine();
    let t = ops::tensor1d(&mut e, vec!["a".to_string(), "b".to_string()]).unwrap();
    assert_eq!(t.dtype(), DType::String);
    let err = ops::neg(&mut e, &t).unwrap_err();
    assert!(matches!(err, Error::DTypeMismatch { .. }));
}

#[test]
fn test_dtype_mismatch_names_argument_and_op() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1.0f32, 0.0]).unwrap();
    let err = ops::logical_and(&mut e, &x, vec![true, false]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "argument 'a' passed to 'logicalAnd' must be bool tensor, but got float32 tensor"
    );
}

#[test]
fn test_fill_zeros_ones() {
    let mut e = engine();
    let t = ops::fill(&mut e, vec![2, 2], 7.0, DType::Int32).unwrap();
    assert_eq!(i32s(&e, &t), vec![7; 4]);
    let z = ops::zeros_like(&mut e, &t).unwrap();
    assert_eq!(z.dtype(), DType::Int32);
    assert_eq!(i32s(&e, &z), vec![0; 4]);
    let o = ops::ones(&mut e, vec![3], DType::Float32).unwrap();
    assert_eq!(f32s(&e, &o), vec![1.0; 3]);
}

#[test]
fn test_random_uniform_seeded() {
    let mut e = engine();
    let a = ops::random_uniform(&mut e, vec![64], -2.0, 3.0, DType::Float32, Some(7)).unwrap();
    let b = ops::random_uniform(&mut e, vec![64], -2.0, 3.0, DType::Float32, Some(7)).unwrap();
    let (va, vb) = (f32s(&e, &a), f32s(&e, &b));
    assert_eq!(va, vb);
    assert!(va.iter().all(|&v| (-2.0..3.0).contains(&v)));

    let i = ops::random_uniform(&mut e, vec![32], 0.0, 4.0, DType::Int32, Some(1)).unwrap();
    assert!(i32s(&e, &i).iter().all(|&v| (0..4).contains(&v)));

    let err = ops::random_uniform(&mut e, vec![2], 1.0, 1.0, DType::Float32, None).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[test]
fn test_cast() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1.7f32, -0.2, 0.0]).unwrap();
    let i = ops::cast(&mut e, &x, DType::Int32).unwrap();
    assert_eq!(i32s(&e, &i), vec![1, 0, 0]);
    let b = ops::cast(&mut e, &x, DType::Bool).unwrap();
    assert_eq!(bools(&e, &b), vec![true, true, false]);
    let same = ops::cast(&mut e, &x, DType::Float32).unwrap();
    assert_eq!(same.id(), x.id());
}

// ─────────────────────────────────────────────────────────────────────
// Arithmetic
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_add_broadcasts() {
    let mut e = engine();
    let a = ops::tensor2d(&mut e, vec![vec![1.0f32], vec![2.0]]).unwrap();
    let b = ops::tensor1d(&mut e, vec![10.0f32, 20.0, 30.0]).unwrap();
    let c = ops::add(&mut e, &a, &b).unwrap();
    assert_eq!(c.dims(), &[2, 3]);
    assert_eq!(f32s(&e, &c), vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);
}

#[test]
fn test_mixed_dtypes_upcast() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![1i32, 2]).unwrap();
    let c = ops::mul(&mut e, &a, 0.5f32).unwrap();
    assert_eq!(c.dtype(), DType::Float32);
    assert_eq!(f32s(&e, &c), vec![0.5, 1.0]);
}

#[test]
fn test_incompatible_shapes_fail_before_dispatch() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![1.0f32, 2.0, 3.0]).unwrap();
    let b = ops::tensor1d(&mut e, vec![1.0f32, 2.0]).unwrap();
    assert!(matches!(ops::sub(&mut e, &a, &b).unwrap_err(), Error::ShapeMismatch(_)));
}

#[test]
fn test_div_int_floors() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![7i32, -7, 6]).unwrap();
    let b = ops::tensor1d(&mut e, vec![2i32, 2, 3]).unwrap();
    let q = ops::div(&mut e, &a, &b).unwrap();
    assert_eq!(q.dtype(), DType::Int32);
    assert_eq!(i32s(&e, &q), vec![3, -4, 2]);

    let x = ops::tensor1d(&mut e, vec![7.0f32, -7.0]).unwrap();
    let r = ops::div(&mut e, &x, 2.0f32).unwrap();
    assert_eq!(f32s(&e, &r), vec![3.5, -3.5]);
    let f = ops::floor_div(&mut e, &x, 2.0f32).unwrap();
    assert_eq!(f32s(&e, &f), vec![3.0, -4.0]);
}

#[test]
fn test_maximum_minimum() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![1.0f32, 5.0, f32::NAN]).unwrap();
    let b = ops::tensor1d(&mut e, vec![3.0f32, 2.0, 0.0]).unwrap();
    let mx = ops::maximum(&mut e, &a, &b).unwrap();
    let mx = f32s(&e, &mx);
    assert_eq!(&mx[..2], &[3.0, 5.0]);
    assert!(mx[2].is_nan());
    let mn = ops::minimum(&mut e, &a, &b).unwrap();
    let mn = f32s(&e, &mn);
    assert_eq!(&mn[..2], &[1.0, 2.0]);
}

#[test]
fn test_elementwise_math() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![0.0f32, 1.0, 4.0]).unwrap();
    let sq = ops::sqrt(&mut e, &x).unwrap();
    assert_approx_vec(&f32s(&e, &sq), &[0.0, 1.0, 2.0], 1e-6);
    let ex = ops::exp(&mut e, &x).unwrap();
    assert_approx_vec(&f32s(&e, &ex), &[1.0, std::f32::consts::E, 54.59815], 1e-3);
    let n = ops::neg(&mut e, &x).unwrap();
    let ab = ops::abs(&mut e, &n).unwrap();
    assert_eq!(f32s(&e, &ab), vec![0.0, 1.0, 4.0]);
    let s = ops::sin(&mut e, &x).unwrap();
    assert_approx_vec(&f32s(&e, &s), &[0.0, 0.841_471, -0.756_802], 1e-5);
}

#[test]
fn test_int_unary_keeps_dtype() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![-3i32, 2]).unwrap();
    let sq = ops::square(&mut e, &x).unwrap();
    assert_eq!(sq.dtype(), DType::Int32);
    assert_eq!(i32s(&e, &sq), vec![9, 4]);
    let r = ops::relu(&mut e, &x).unwrap();
    assert_eq!(i32s(&e, &r), vec![0, 2]);
}

// ─────────────────────────────────────────────────────────────────────
// Activations
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_relu6_and_clip() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![-1.0f32, 3.0, 8.0]).unwrap();
    let r = ops::relu6(&mut e, &x).unwrap();
    assert_eq!(f32s(&e, &r), vec![0.0, 3.0, 6.0]);
    let c = ops::clip_by_value(&mut e, &x, 0.5, 4.0).unwrap();
    assert_eq!(f32s(&e, &c), vec![0.5, 3.0, 4.0]);
    let err = ops::clip_by_value(&mut e, &x, 4.0, 0.5).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[test]
fn test_step_alpha() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![-2.0f32, 0.0, 3.0]).unwrap();
    let s = ops::step(&mut e, &x, 0.25).unwrap();
    assert_eq!(f32s(&e, &s), vec![0.25, 0.25, 1.0]);
}

#[rstest]
#[case(0.5, 0.0)]
#[case(1.5, 2.0)]
#[case(2.5, 2.0)]
#[case(-0.5, 0.0)]
#[case(-1.7, -2.0)]
fn test_round_half_even(#[case] x: f32, #[case] expected: f32) {
    let mut e = engine();
    let r = ops::round(&mut e, x).unwrap();
    assert_eq!(f32s(&e, &r), vec![expected]);
}

#[test]
fn test_is_inf() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![f32::INFINITY, 1.0, f32::NEG_INFINITY, f32::NAN]).unwrap();
    let r = ops::is_inf(&mut e, &x).unwrap();
    assert_eq!(r.dtype(), DType::Bool);
    assert_eq!(bools(&e, &r), vec![true, false, true, false]);
}

// ─────────────────────────────────────────────────────────────────────
// Logical and comparison
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_logical_or() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![true, false, false]).unwrap();
    let b = ops::tensor1d(&mut e, vec![false, true, false]).unwrap();
    let r = ops::logical_or(&mut e, &a, &b).unwrap();
    assert_eq!(bools(&e, &r), vec![true, true, false]);
}

#[test]
fn test_logical_or_broadcasts() {
    let mut e = engine();
    let a = ops::tensor2d(&mut e, vec![vec![true], vec![false]]).unwrap();
    let b = ops::tensor2d(
        &mut e,
        vec![vec![false, false, false], vec![false, true, false]],
    )
    .unwrap();
    let r = ops::logical_or(&mut e, &a, &b).unwrap();
    assert_eq!(r.dims(), &[2, 3]);
    assert_eq!(bools(&e, &r), vec![true, true, true, false, true, false]);
}

#[test]
fn test_logical_not_and() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![true, false]).unwrap();
    let n = ops::logical_not(&mut e, &a).unwrap();
    assert_eq!(bools(&e, &n), vec![false, true]);
    let both = ops::logical_and(&mut e, &a, true).unwrap();
    assert_eq!(bools(&e, &both), vec![true, false]);
}

#[test]
fn test_comparisons() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![1.0f32, 2.0, 3.0]).unwrap();
    let gt = ops::greater(&mut e, &a, 2.0f32).unwrap();
    assert_eq!(bools(&e, &gt), vec![false, false, true]);
    let ge = ops::greater_equal(&mut e, &a, 2.0f32).unwrap();
    assert_eq!(bools(&e, &ge), vec![false, true, true]);
    let lt = ops::less(&mut e, &a, 2i32).unwrap();
    assert_eq!(bools(&e, &lt), vec![true, false, false]);
    let le = ops::less_equal(&mut e, &a, 2.0f32).unwrap();
    assert_eq!(bools(&e, &le), vec![true, true, false]);
    let eq = ops::equal(&mut e, &a, 2.0f32).unwrap();
    assert_eq!(bools(&e, &eq), vec![false, true, false]);
}

#[test]
fn test_where_broadcasts_all_inputs() {
    let mut e = engine();
    let cond = ops::tensor2d(&mut e, vec![vec![true], vec![false]]).unwrap();
    let a = ops::tensor1d(&mut e, vec![1.0f32, 2.0, 3.0]).unwrap();
    let r = ops::where_(&mut e, &cond, &a, 0.0f32).unwrap();
    assert_eq!(r.dims(), &[2, 3]);
    assert_eq!(f32s(&e, &r), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_where_requires_same_dtype() {
    let mut e = engine();
    let err = ops::where_(&mut e, vec![true], vec![1.0f32], vec![2i32]).unwrap_err();
    assert!(matches!(err, Error::DTypeMismatch { .. }));
}

// ─────────────────────────────────────────────────────────────────────
// Reductions
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_sum_axes() {
    let mut e = engine();
    let x = ops::tensor2d(&mut e, vec![vec![1.0f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
    let all = ops::sum(&mut e, &x, None, false).unwrap();
    assert!(all.shape().is_scalar());
    assert_eq!(f32s(&e, &all), vec![21.0]);
    let rows = ops::sum(&mut e, &x, Some(&[-1]), false).unwrap();
    assert_eq!(rows.dims(), &[2]);
    assert_eq!(f32s(&e, &rows), vec![6.0, 15.0]);
    let cols = ops::sum(&mut e, &x, Some(&[0]), true).unwrap();
    assert_eq!(cols.dims(), &[1, 3]);
    assert_eq!(f32s(&e, &cols), vec![5.0, 7.0, 9.0]);
    assert!(matches!(
        ops::sum(&mut e, &x, Some(&[2]), false).unwrap_err(),
        Error::AxisOutOfRange { .. }
    ));
}

#[test]
fn test_sum_bool_counts() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![true, true, false]).unwrap();
    let s = ops::sum(&mut e, &x, None, false).unwrap();
    assert_eq!(s.dtype(), DType::Int32);
    assert_eq!(i32s(&e, &s), vec![2]);
}

#[test]
fn test_dense_bincount_counts() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1i32, 1, 1, 2]).unwrap();
    let r = ops::dense_bincount(&mut e, &x, Vec::<f32>::new(), 3, false).unwrap();
    assert_eq!(r.dims(), &[3]);
    assert_eq!(f32s(&e, &r), vec![0.0, 3.0, 1.0]);
}

#[test]
fn test_dense_bincount_weights() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1i32, 1, 1, 2]).unwrap();
    let w = ops::tensor1d(&mut e, vec![0.5f32, 0.3, 0.3, 0.1]).unwrap();
    let r = ops::dense_bincount(&mut e, &x, &w, 3, false).unwrap();
    assert_eq!(r.dims(), &[3]);
    assert_approx_vec(&f32s(&e, &r), &[0.0, 1.1, 0.1], 1e-6);
}

#[test]
fn test_dense_bincount_rows_and_binary() {
    let mut e = engine();
    let x = ops::tensor2d(&mut e, vec![vec![0i32, 0, 3], vec![1, 5, 1]]).unwrap();
    let r = ops::dense_bincount(&mut e, &x, Vec::<f32>::new(), 4, true).unwrap();
    assert_eq!(r.dims(), &[2, 4]);
    assert_eq!(f32s(&e, &r), vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);

    let err = ops::dense_bincount(&mut e, &x, vec![1.0f32], 4, false).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

// ─────────────────────────────────────────────────────────────────────
// Shape ops
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_reshape_infers_dim() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1.0f32; 6]).unwrap();
    let y = ops::reshape(&mut e, &x, &[3, -1]).unwrap();
    assert_eq!(y.dims(), &[3, 2]);
    assert!(ops::reshape(&mut e, &x, &[4, -1]).is_err());
    let s = ops::as_1d(&mut e, &y).unwrap();
    assert_eq!(s.dims(), &[6]);
    assert!(ops::as_scalar(&mut e, &y).is_err());
}

#[test]
fn test_expand_dims() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1.0f32, 2.0]).unwrap();
    assert_eq!(ops::expand_dims(&mut e, &x, 0).unwrap().dims(), &[1, 2]);
    assert_eq!(ops::expand_dims(&mut e, &x, -1).unwrap().dims(), &[2, 1]);
}

#[test]
fn test_broadcast_to() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1i32, 2]).unwrap();
    let y = ops::broadcast_to(&mut e, &x, vec![2, 2]).unwrap();
    assert_eq!(i32s(&e, &y), vec![1, 2, 1, 2]);
    let same = ops::broadcast_to(&mut e, &x, vec![2]).unwrap();
    assert_eq!(same.id(), x.id());
    assert!(ops::broadcast_to(&mut e, &x, vec![3]).is_err());
}

#[test]
fn test_slice() {
    let mut e = engine();
    let x = ops::tensor2d(
        &mut e,
        vec![vec![1.0f32, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0, 9.0]],
    )
    .unwrap();
    let s = ops::slice(&mut e, &x, &[1, 1], Some(&[2, -1])).unwrap();
    assert_eq!(s.dims(), &[2, 2]);
    assert_eq!(f32s(&e, &s), vec![5.0, 6.0, 8.0, 9.0]);
    let rest = ops::slice(&mut e, &x, &[2], None).unwrap();
    assert_eq!(rest.dims(), &[1, 3]);
    assert!(ops::slice(&mut e, &x, &[2, 0], Some(&[2, 1])).is_err());
}

#[test]
fn test_strided_slice_full_range_is_identity() {
    let mut e = engine();
    let x = ops::tensor2d(&mut e, vec![vec![1.0f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
    let params = StridedSliceParams::new(vec![0, 0], vec![2, 3], Some(vec![1, 1]));
    let y = ops::strided_slice(&mut e, &x, &params).unwrap();
    assert_eq!(y.shape(), x.shape());
    assert_eq!(f32s(&e, &y), f32s(&e, &x));
}

#[test]
fn test_strided_slice_negative_stride_and_shrink() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let rev = StridedSliceParams::new(vec![4], vec![0], Some(vec![-2]));
    let y = ops::strided_slice(&mut e, &x, &rev).unwrap();
    assert_eq!(f32s(&e, &y), vec![5.0, 3.0]);

    let m = ops::reshape(&mut e, &x, &[2, 3]).unwrap();
    let mut row = StridedSliceParams::new(vec![1, 0], vec![2, 3], None);
    row.shrink_axis_mask = 0b01;
    let r = ops::strided_slice(&mut e, &m, &row).unwrap();
    assert_eq!(r.dims(), &[3]);
    assert_eq!(f32s(&e, &r), vec![4.0, 5.0, 6.0]);
}

#[test]
fn test_strided_slice_masks() {
    let mut e = engine();
    let x = ops::tensor2d(&mut e, vec![vec![1i32, 2, 3], vec![4, 5, 6]]).unwrap();
    let mut p = StridedSliceParams::new(vec![0, 1], vec![0, 3], None);
    p.begin_mask = 0b01;
    p.end_mask = 0b01;
    let y = ops::strided_slice(&mut e, &x, &p).unwrap();
    assert_eq!(y.dims(), &[2, 2]);
    assert_eq!(i32s(&e, &y), vec![2, 3, 5, 6]);

    let mut na = StridedSliceParams::new(vec![0], vec![1], None);
    na.new_axis_mask = 0b01;
    let z = ops::strided_slice(&mut e, &x, &na).unwrap();
    assert_eq!(z.dims(), &[1, 2, 3]);

    let mut bad = StridedSliceParams::new(vec![0, 0], vec![1, 1], None);
    bad.ellipsis_mask = 0b11;
    assert!(matches!(
        ops::strided_slice(&mut e, &x, &bad).unwrap_err(),
        Error::InvalidSliceMask(_)
    ));
}

#[test]
fn test_pad() {
    let mut e = engine();
    let x = ops::tensor2d(&mut e, vec![vec![1.0f32, 2.0], vec![3.0, 4.0]]).unwrap();
    let y = ops::pad(&mut e, &x, &[(1, 0), (0, 1)], 9.0).unwrap();
    assert_eq!(y.dims(), &[3, 3]);
    assert_eq!(
        f32s(&e, &y),
        vec![9.0, 9.0, 9.0, 1.0, 2.0, 9.0, 3.0, 4.0, 9.0]
    );
    assert!(ops::pad(&mut e, &x, &[(1, 1)], 0.0).is_err());
}

// ─────────────────────────────────────────────────────────────────────
// Pooling
// ─────────────────────────────────────────────────────────────────────

fn grid(e: &mut Engine, h: usize, w: usize) -> Tensor {
    let values: Vec<f32> = (1..=h * w).map(|v| v as f32).collect();
    ops::tensor(e, (values, vec![1, h, w, 1]), None).unwrap()
}

#[test]
fn test_max_pool_valid() {
    let mut e = engine();
    let x = grid(&mut e, 4, 4);
    let y = ops::max_pool(&mut e, &x, (2, 2), (2, 2), Padding::Valid).unwrap();
    assert_eq!(y.dims(), &[1, 2, 2, 1]);
    assert_eq!(f32s(&e, &y), vec![6.0, 8.0, 14.0, 16.0]);
}

#[test]
fn test_max_pool_same_rank3() {
    let mut e = engine();
    let values: Vec<f32> = (1..=9).map(|v| v as f32).collect();
    let x = ops::tensor(&mut e, (values, vec![3, 3, 1]), None).unwrap();
    let y = ops::max_pool(&mut e, &x, (2, 2), (2, 2), Padding::Same).unwrap();
    assert_eq!(y.dims(), &[2, 2, 1]);
    assert_eq!(f32s(&e, &y), vec![5.0, 6.0, 8.0, 9.0]);
}

#[test]
fn test_max_pool_rejects_rank2() {
    let mut e = engine();
    let x = ops::zeros(&mut e, vec![4, 4], DType::Float32).unwrap();
    assert!(ops::max_pool(&mut e, &x, (2, 2), (2, 2), Padding::Valid).is_err());
}

#[test]
fn test_max_pool_grad_routes_to_argmax() {
    let mut e = engine();
    let x = grid(&mut e, 4, 4);
    let y = ops::max_pool(&mut e, &x, (2, 2), (2, 2), Padding::Valid).unwrap();
    let dy = ops::ones_like(&mut e, &y).unwrap();
    let dx = ops::max_pool_grad(&mut e, &dy, &x, &y, (2, 2), (2, 2), Padding::Valid).unwrap();
    assert_eq!(dx.dims(), x.dims());
    let mut expected = vec![0.0; 16];
    for i in [5, 7, 13, 15] {
        expected[i] = 1.0;
    }
    assert_eq!(f32s(&e, &dx), expected);
}

#[test]
fn test_max_pool3d_valid() {
    let mut e = engine();
    let values: Vec<f32> = (1..=16).map(|v| v as f32).collect();
    let x = ops::tensor(&mut e, (values, vec![1, 2, 2, 4, 1]), None).unwrap();
    let y = ops::max_pool3d(&mut e, &x, (2, 2, 2), (2, 2, 2), Padding::Valid).unwrap();
    assert_eq!(y.dims(), &[1, 1, 1, 2, 1]);
    assert_eq!(f32s(&e, &y), vec![14.0, 16.0]);
}

#[test]
fn test_max_pool3d_rank4_and_grad() {
    let mut e = engine();
    let values: Vec<f32> = (1..=8).map(|v| v as f32).collect();
    let x = ops::tensor(&mut e, (values, vec![2, 2, 2, 1]), None).unwrap();
    let y = ops::max_pool3d(&mut e, &x, (2, 2, 2), (1, 1, 1), Padding::Valid).unwrap();
    assert_eq!(y.dims(), &[1, 1, 1, 1]);
    assert_eq!(f32s(&e, &y), vec![8.0]);

    let dy = ops::fill(&mut e, vec![1, 1, 1, 1], 3.0, DType::Float32).unwrap();
    let dx = ops::max_pool3d_grad(&mut e, &dy, &x, &y, (2, 2, 2), (1, 1, 1), Padding::Valid).unwrap();
    assert_eq!(dx.dims(), x.dims());
    let mut expected = vec![0.0; 8];
    expected[7] = 3.0;
    assert_eq!(f32s(&e, &dx), expected);
}

#[test]
fn test_max_pool3d_grad_checks_ranks() {
    let mut e = engine();
    let x = ops::zeros(&mut e, vec![1, 2, 2, 2, 1], DType::Float32).unwrap();
    let y = ops::max_pool3d(&mut e, &x, (2, 2, 2), (1, 1, 1), Padding::Valid).unwrap();
    let flat_dy = ops::zeros(&mut e, vec![1], DType::Float32).unwrap();
    let err = ops::max_pool3d_grad(&mut e, &flat_dy, &x, &y, (2, 2, 2), (1, 1, 1), Padding::Valid)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        Error::invalid_argument("maxPool3dGrad", "dy must be rank 5 but got rank 1").to_string()
    );
    let x2 = ops::zeros(&mut e, vec![4, 4], DType::Float32).unwrap();
    assert!(ops::max_pool3d(&mut e, &x2, (2, 2, 2), (1, 1, 1), Padding::Valid).is_err());
}

#[test]
fn test_dilation2d() {
    let mut e = engine();
    let values: Vec<f32> = (1..=9).map(|v| v as f32).collect();
    let x = ops::tensor(&mut e, (values, vec![1, 3, 3, 1]), None).unwrap();
    let flat = ops::zeros(&mut e, vec![2, 2, 1], DType::Float32).unwrap();
    let y = ops::dilation2d(&mut e, &x, &flat, (1, 1), Padding::Valid, (1, 1)).unwrap();
    assert_eq!(y.dims(), &[1, 2, 2, 1]);
    assert_eq!(f32s(&e, &y), vec![5.0, 6.0, 8.0, 9.0]);

    let filter = ops::tensor(&mut e, (vec![0.0f32, 0.0, 0.0, 10.0], vec![2, 2, 1]), None).unwrap();
    let y = ops::dilation2d(&mut e, &x, &filter, (1, 1), Padding::Valid, (1, 1)).unwrap();
    assert_eq!(f32s(&e, &y), vec![15.0, 16.0, 18.0, 19.0]);

    // At rate 2 a 2x2 filter reaches the corners of the 3x3 input.
    let y = ops::dilation2d(&mut e, &x, &flat, (1, 1), Padding::Valid, (2, 2)).unwrap();
    assert_eq!(y.dims(), &[1, 1, 1, 1]);
    assert_eq!(f32s(&e, &y), vec![9.0]);
}

#[test]
fn test_dilation2d_rejects_depth_mismatch() {
    let mut e = engine();
    let x = ops::zeros(&mut e, vec![1, 3, 3, 2], DType::Float32).unwrap();
    let filter = ops::zeros(&mut e, vec![2, 2, 1], DType::Float32).unwrap();
    let err = ops::dilation2d(&mut e, &x, &filter, (1, 1), Padding::Same, (1, 1)).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

// ─────────────────────────────────────────────────────────────────────
// Stacking
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_stack_axes() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![1.0f32, 2.0]).unwrap();
    let b = ops::tensor1d(&mut e, vec![3.0f32, 4.0]).unwrap();
    let rows = ops::stack(&mut e, &[&a, &b], 0).unwrap();
    assert_eq!(rows.dims(), &[2, 2]);
    assert_eq!(f32s(&e, &rows), vec![1.0, 2.0, 3.0, 4.0]);
    let cols = ops::stack(&mut e, &[&a, &b], -1).unwrap();
    assert_eq!(cols.dims(), &[2, 2]);
    assert_eq!(f32s(&e, &cols), vec![1.0, 3.0, 2.0, 4.0]);
    let one = ops::stack(&mut e, &[&a], 1).unwrap();
    assert_eq!(one.dims(), &[2, 1]);
}

#[test]
fn test_stack_rejects_mismatch() {
    let mut e = engine();
    let a = ops::tensor1d(&mut e, vec![1.0f32, 2.0]).unwrap();
    let b = ops::tensor1d(&mut e, vec![3.0f32]).unwrap();
    let i = ops::tensor1d(&mut e, vec![1i32, 2]).unwrap();
    assert!(matches!(ops::stack(&mut e, &[&a, &b], 0), Err(Error::ShapeMismatch(_))));
    assert!(matches!(ops::stack(&mut e, &[&a, &i], 0), Err(Error::InvalidArgument { .. })));
    assert!(ops::stack(&mut e, &[], 0).is_err());
    assert!(ops::stack(&mut e, &[&a, &a], 2).is_err());
}

#[test]
fn test_unstack() {
    let mut e = engine();
    let x = ops::tensor2d(&mut e, vec![vec![1i32, 2, 3], vec![4, 5, 6]]).unwrap();
    let cols = ops::unstack(&mut e, &x, 1).unwrap();
    assert_eq!(cols.len(), 3);
    let got: Vec<Vec<i32>> = cols
        .iter()
        .map(|c| e.read_sync(c).unwrap().to_i32_vec().unwrap())
        .collect();
    assert_eq!(got, vec![vec![1, 4], vec![2, 5], vec![3, 6]]);
    assert!(cols.iter().all(|c| c.dtype() == DType::Int32 && c.dims() == [2]));
    let rows = ops::unstack(&mut e, &x, -2).unwrap();
    assert_eq!(e.read_sync(&rows[1]).unwrap().to_i32_vec().unwrap(), vec![4, 5, 6]);
    assert!(ops::unstack(&mut e, &x, 2).is_err());
}
