// Engine Tests: Tensor lifecycle, scopes, backends and dispatch errors
//
// Every test builds its own engine with `tapir::cpu_engine()`; engines share
// nothing, so the tests can run in parallel.

use tapir::prelude::*;
use tapir::{KernelName, NamedAttrMap, NamedTensorMap};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine() -> Engine {
    init_logging();
    cpu_engine().unwrap()
}

fn values(engine: &Engine, t: &Tensor) -> Vec<f32> {
    engine.read_sync(t).unwrap().to_f32_vec().unwrap()
}

// ─────────────────────────────────────────────────────────────────────
// Disposal
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_dispose_twice_fails() {
    let mut e = engine();
    let t = ops::tensor1d(&mut e, vec![1.0f32, 2.0]).unwrap();
    e.dispose(&t).unwrap();
    assert!(t.is_disposed());
    let err = e.dispose(&t).unwrap_err();
    assert!(matches!(err, Error::DisposedTensorUse { id } if id == t.id()));
}

#[test]
fn test_use_after_dispose_fails() {
    let mut e = engine();
    let t = ops::tensor1d(&mut e, vec![1.0f32, 2.0]).unwrap();
    e.dispose(&t).unwrap();
    assert!(matches!(
        ops::neg(&mut e, &t).unwrap_err(),
        Error::DisposedTensorUse { .. }
    ));
    assert!(matches!(
        e.read_sync(&t).unwrap_err(),
        Error::DisposedTensorUse { .. }
    ));
}

#[test]
fn test_dispose_frees_buffer() {
    let mut e = engine();
    let before = e.memory();
    let t = ops::tensor1d(&mut e, vec![1.0f32, 2.0, 3.0]).unwrap();
    assert_eq!(e.memory().num_tensors, before.num_tensors + 1);
    assert_eq!(e.memory().num_data_buffers, before.num_data_buffers + 1);
    e.dispose(&t).unwrap();
    assert_eq!(e.memory(), before);
}

#[test]
fn test_reshape_shares_buffer() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let buffers = e.memory().num_data_buffers;
    let y = ops::reshape(&mut e, &x, &[2, -1]).unwrap();
    assert_eq!(y.dims(), &[2, 2]);
    assert_eq!(y.data_id(), x.data_id());
    assert_eq!(e.memory().num_data_buffers, buffers);

    // The buffer lives until both handles are gone.
    e.dispose(&x).unwrap();
    assert_eq!(values(&e, &y), vec![1.0, 2.0, 3.0, 4.0]);
    e.dispose(&y).unwrap();
    assert_eq!(e.memory().num_data_buffers, buffers - 1);
}

#[test]
fn test_clone_tensor_is_new_handle() {
    let mut e = engine();
    let x = ops::scalar(&mut e, 3.0f32).unwrap();
    let c = e.clone_tensor(&x).unwrap();
    assert_ne!(c.id(), x.id());
    assert_eq!(c.data_id(), x.data_id());
    e.dispose(&x).unwrap();
    assert_eq!(values(&e, &c), vec![3.0]);
}

// ─────────────────────────────────────────────────────────────────────
// Scopes
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_tidy_disposes_intermediates() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1.0f32, 2.0]).unwrap();
    let before = e.memory().num_tensors;
    let mut inner = None;
    let y = e
        .tidy("square-plus-one", |e| {
            let sq = ops::square(e, &x)?;
            inner = Some(sq.clone());
            ops::add(e, &sq, 1.0f32)
        })
        .unwrap();
    assert!(inner.unwrap().is_disposed());
    assert!(!y.is_disposed());
    assert!(!x.is_disposed());
    assert_eq!(e.memory().num_tensors, before + 1);
    assert_eq!(values(&e, &y), vec![2.0, 5.0]);
}

#[test]
fn test_tidy_cleans_up_on_error() {
    let mut e = engine();
    let before = e.memory();
    let res: Result<Tensor> = e.tidy("failing", |e| {
        let a = ops::tensor1d(e, vec![1.0f32, 2.0, 3.0])?;
        let b = ops::tensor1d(e, vec![1.0f32, 2.0])?;
        ops::add(e, &a, &b)
    });
    assert!(matches!(res.unwrap_err(), Error::ShapeMismatch(_)));
    assert_eq!(e.memory(), before);
}

#[test]
fn test_tidy_result_moves_to_parent_scope() {
    let mut e = engine();
    let before = e.memory().num_tensors;
    let mut kept_inner = None;
    e.tidy("outer", |e| {
        let t = e.tidy("inner", |e| ops::fill(e, vec![2], 1.0, DType::Float32))?;
        kept_inner = Some(t.clone());
        Ok(())
    })
    .unwrap();
    // Returned from the inner scope, dropped by the outer one.
    assert!(kept_inner.unwrap().is_disposed());
    assert_eq!(e.memory().num_tensors, before);
}

#[test]
fn test_keep_survives_scopes() {
    let mut e = engine();
    let mut kept = None;
    e.tidy("outer", |e| {
        e.tidy("inner", |e| {
            let t = ops::ones(e, vec![2, 2], DType::Float32)?;
            kept = Some(e.keep(&t));
            Ok(())
        })
    })
    .unwrap();
    let kept = kept.unwrap();
    assert!(kept.is_kept());
    assert!(!kept.is_disposed());
    assert_eq!(values(&e, &kept), vec![1.0; 4]);
}

#[test]
fn test_manual_scopes() {
    let mut e = engine();
    let before = e.memory().num_tensors;
    e.start_scope("manual");
    let a = ops::zeros(&mut e, vec![3], DType::Int32).unwrap();
    let b = ops::ones_like(&mut e, &a).unwrap();
    e.end_scope(&b);
    assert!(a.is_disposed());
    assert!(!b.is_disposed());
    assert_eq!(e.memory().num_tensors, before + 1);
    assert_eq!(e.read_sync(&b).unwrap().to_i32_vec().unwrap(), vec![1, 1, 1]);
}

// ─────────────────────────────────────────────────────────────────────
// Backends and dispatch
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_first_backend_is_active() {
    let mut e = engine();
    assert_eq!(e.backend_name().unwrap(), CPU_BACKEND);
    e.register_backend(Box::new(CpuBackend::with_name("bare"))).unwrap();
    assert_eq!(e.backend_name().unwrap(), CPU_BACKEND);
    let mut names = e.backend_names();
    names.sort();
    assert_eq!(names, vec!["bare", "cpu"]);
}

const CPU_BACKEND: &str = tapir::CPU_BACKEND_NAME;

#[test]
fn test_duplicate_backend_rejected() {
    let mut e = engine();
    let err = e.register_backend(Box::new(CpuBackend::new())).unwrap_err();
    assert!(matches!(err, Error::DuplicateRegistration { what: "backend", .. }));
}

#[test]
fn test_unknown_backend() {
    let mut e = engine();
    assert!(matches!(
        e.set_backend("webgl").unwrap_err(),
        Error::BackendNotFound(name) if name == "webgl"
    ));
}

#[test]
fn test_kernel_not_found_on_unregistered_backend() {
    let mut e = engine();
    e.register_backend(Box::new(CpuBackend::with_name("bare"))).unwrap();
    e.set_backend("bare").unwrap();
    let x = e
        .make_tensor(TensorValues::Float32(vec![1.0, -2.0]), vec![2])
        .unwrap();
    let inputs = NamedTensorMap::new().with("x", x);
    let err = e
        .run_kernel(KernelName::Neg, &inputs, &NamedAttrMap::new())
        .unwrap_err();
    match err {
        Error::KernelNotFound { kernel, backend } => {
            assert_eq!(kernel, KernelName::Neg);
            assert_eq!(backend, "bare");
        }
        other => panic!("expected KernelNotFound, got {other:?}"),
    }
}

#[test]
fn test_cpu_fallback_runs_missing_kernel() {
    init_logging();
    let mut e = engine_with_config(EngineConfig::default().with_cpu_fallback(CPU_BACKEND)).unwrap();
    e.register_backend(Box::new(CpuBackend::with_name("bare"))).unwrap();
    e.set_backend("bare").unwrap();
    let x = e
        .make_tensor(TensorValues::Float32(vec![1.0, -2.0]), vec![2])
        .unwrap();
    assert_eq!(e.backend_of(x.data_id()), Some("bare"));
    let y = ops::neg(&mut e, &x).unwrap();
    assert_eq!(values(&e, &y), vec![-1.0, 2.0]);
    assert_eq!(e.backend_of(y.data_id()), Some(CPU_BACKEND));
    // The input was moved to the fallback backend.
    assert_eq!(e.backend_of(x.data_id()), Some(CPU_BACKEND));
}

#[test]
fn test_tensors_move_between_backends() {
    let mut e = engine();
    let x = ops::tensor1d(&mut e, vec![1.0f32, 2.0]).unwrap();
    e.register_backend(Box::new(CpuBackend::with_name("second"))).unwrap();
    tapir_cpu::register_kernels(e.kernels_mut(), "second").unwrap();
    e.set_backend("second").unwrap();
    let y = ops::mul(&mut e, &x, 3.0f32).unwrap();
    assert_eq!(e.backend_of(y.data_id()), Some("second"));
    assert_eq!(e.backend_of(x.data_id()), Some("second"));
    assert_eq!(values(&e, &y), vec![3.0, 6.0]);
}

#[test]
fn test_missing_input_reported() {
    let mut e = engine();
    let err = e
        .run_kernel(KernelName::Add, &NamedTensorMap::new(), &NamedAttrMap::new())
        .unwrap_err();
    assert!(matches!(err, Error::MissingInput { kernel: KernelName::Add, .. }));
}

#[test]
fn test_debug_mode_detects_nan() {
    init_logging();
    let mut e = engine_with_config(EngineConfig::default().with_debug(true)).unwrap();
    let x = ops::tensor1d(&mut e, vec![-1.0f32, 4.0]).unwrap();
    let err = ops::sqrt(&mut e, &x).unwrap_err();
    assert!(matches!(err, Error::NanDetected { kernel: KernelName::Sqrt }));
}

#[test]
fn test_ragged_rows_rejected_unless_disabled() {
    init_logging();
    let ragged = || vec![vec![1.0f32, 2.0], vec![3.0]];
    let mut e = cpu_engine().unwrap();
    assert!(ops::tensor(&mut e, ragged(), None).is_err());

    let cfg = EngineConfig::default().with_check_shape_consistency(false);
    let mut e = engine_with_config(cfg).unwrap();
    // Unchecked ragged input no longer matches its inferred shape.
    assert!(matches!(
        ops::tensor(&mut e, ragged(), None).unwrap_err(),
        Error::ElementCountMismatch { .. }
    ));
}

// ─────────────────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_deferred_read() {
    let mut e = engine();
    let x = ops::tensor2d(&mut e, vec![vec![1i32, 2], vec![3, 4]]).unwrap();
    let fut = e.read(&x);
    let values = pollster::block_on(fut).unwrap();
    assert_eq!(values.to_i32_vec().unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn test_deferred_read_of_disposed_tensor_fails() {
    let mut e = engine();
    let x = ops::scalar(&mut e, 1.0f32).unwrap();
    e.dispose(&x).unwrap();
    let err = pollster::block_on(e.read(&x)).unwrap_err();
    assert!(matches!(err, Error::DisposedTensorUse { .. }));
}
