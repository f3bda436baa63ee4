use rand::{seq::SliceRandom, Rng};
use strided_tensor::{ops, CpuAllocator, ErrorKind, Tensor, TensorError, TrackingAllocator};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn arange_reads_back_indices() -> Result<(), TensorError> {
    init_logger();
    for n in 0..32usize {
        let t = Tensor::arange(n, CpuAllocator)?;
        for i in 0..n {
            assert_eq!(t.get_item(&[i as isize])?, i as f32);
        }
        match n {
            0 => assert_eq!(t.get_item(&[-1]).unwrap_err().kind(), ErrorKind::Index),
            _ => assert_eq!(t.get_item(&[-1])?, (n - 1) as f32),
        }
    }
    Ok(())
}

#[test]
fn reshape_preserves_flattened_order() -> Result<(), TensorError> {
    init_logger();
    let mut rng = rand::rng();
    for _ in 0..50 {
        let rank = rng.random_range(1..=4);
        let mut shape: Vec<usize> = (0..rank).map(|_| rng.random_range(0..=5)).collect();
        let numel: usize = shape.iter().product();

        let t = Tensor::arange_multi_dim(&shape, CpuAllocator)?;
        let before = t.to_vec();

        shape.shuffle(&mut rng);
        let r = t.reshape(&shape)?;
        assert_eq!(r.to_vec(), before);

        let flat = r.reshape(&[numel])?;
        for (k, value) in before.iter().enumerate() {
            assert_eq!(flat.get_item(&[k as isize])?, *value);
        }
    }
    Ok(())
}

#[test]
fn reshape_of_strided_view_preserves_flattened_order() -> Result<(), TensorError> {
    init_logger();
    let t = Tensor::arange_multi_dim(&[4, 6], CpuAllocator)?;
    let s = t.slice(&[0, 1], &[4, 6], &[1, 2])?;
    let before = s.to_vec();
    assert_eq!(
        before,
        vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0, 17.0, 19.0, 21.0, 23.0]
    );

    let r = s.reshape(&[3, 4])?;
    assert_eq!(r.to_vec(), before);
    Ok(())
}

#[test]
fn refcount_tracks_live_views() -> Result<(), TensorError> {
    init_logger();
    let alloc = TrackingAllocator::new();

    let base = Tensor::arange(12, alloc.clone())?;
    assert_eq!(base.storage().ref_count(), 1);

    let matrix = base.reshape(&[3, 4])?;
    assert_eq!(base.storage().ref_count(), 2);

    let column = matrix.slice(&[0, 1], &[3, 2], &[1, 1])?;
    assert_eq!(base.storage().ref_count(), 3);

    let copy = column.clone();
    assert_eq!(base.storage().ref_count(), 4);

    // a fresh result does not touch the shared storage
    let sum = ops::add(&column, &copy)?;
    assert_eq!(base.storage().ref_count(), 4);
    assert_eq!(sum.storage().ref_count(), 1);
    assert_eq!(alloc.stats().allocs(), 2);

    base.free();
    matrix.free();
    assert_eq!(column.storage().ref_count(), 2);
    assert_eq!(column.to_vec(), vec![1.0, 5.0, 9.0]);

    column.free();
    assert_eq!(alloc.stats().deallocs(), 0);
    copy.free();
    assert_eq!(alloc.stats().deallocs(), 1);

    sum.free();
    assert_eq!(alloc.stats().allocs(), 2);
    assert_eq!(alloc.stats().deallocs(), 2);
    assert_eq!(alloc.stats().live_bytes(), 0);
    Ok(())
}

#[test]
fn oversized_shapes_are_shape_errors() -> Result<(), TensorError> {
    init_logger();
    let empty = Tensor::arange(0, CpuAllocator)?;
    let err = empty.reshape(&[1 << 32, 1 << 32]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);

    let err = Tensor::from_shape_vec(&[usize::MAX, 3], vec![], CpuAllocator).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);

    let alloc = TrackingAllocator::new();
    let err = Tensor::try_empty(&[1 << 32, 1 << 32], alloc.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert_eq!(alloc.stats().allocs(), 0);
    Ok(())
}

#[test]
fn slice_with_any_positive_step() -> Result<(), TensorError> {
    init_logger();
    let mut rng = rand::rng();
    let t = Tensor::arange_multi_dim(&[5, 7], CpuAllocator)?;
    for _ in 0..100 {
        let starts = [rng.random_range(0..5i64) as isize, rng.random_range(0..7i64) as isize];
        let steps = [
            rng.random_range(7..=isize::MAX as i64) as isize,
            rng.random_range(7..=isize::MAX as i64) as isize,
        ];
        let s = t.slice(&starts, &[5, 7], &steps)?;
        assert_eq!(s.shape(), &[1, 1]);
        assert_eq!(s.get_item(&[0, 0])?, (starts[0] * 7 + starts[1]) as f32);
    }

    let rows = t.slice(&[0, 0], &[5, 7], &[isize::MAX, 1])?;
    assert_eq!(rows.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    Ok(())
}

#[test]
fn slice_every_other_element() -> Result<(), TensorError> {
    init_logger();
    let t = Tensor::arange(10, CpuAllocator)?;
    let s = t.slice(&[2], &[8], &[2])?;
    assert_eq!(s.shape(), &[3]);
    assert_eq!(s.to_vec(), vec![2.0, 4.0, 6.0]);
    Ok(())
}

#[test]
fn out_of_bounds_is_an_error() -> Result<(), TensorError> {
    init_logger();
    let t = Tensor::arange_multi_dim(&[3, 3], CpuAllocator)?;
    for index in [[3, 0], [0, 3], [-4, 0], [0, -4]] {
        let err = t.get_item(&index).unwrap_err();
        assert!(matches!(err, TensorError::IndexOutOfBounds { .. }));
    }
    assert!(t.set_item(&[0, 3], 1.0).is_err());
    Ok(())
}

#[test]
fn add_requires_matching_shapes() -> Result<(), TensorError> {
    init_logger();
    let a = Tensor::arange_multi_dim(&[2, 2], CpuAllocator)?;
    let b = Tensor::arange(4, CpuAllocator)?;
    assert_eq!(ops::add(&a, &b).unwrap_err().kind(), ErrorKind::Shape);

    let doubled = ops::add(&a, &a)?;
    for i in 0..2 {
        for j in 0..2 {
            assert_eq!(doubled.get_item(&[i, j])?, 2.0 * a.get_item(&[i, j])?);
        }
    }
    Ok(())
}

#[test]
fn arange_multi_dim_scenario() -> Result<(), TensorError> {
    init_logger();
    let t = Tensor::arange_multi_dim(&[3, 3], CpuAllocator)?;
    assert_eq!(t.strides(), &[3, 1]);
    assert_eq!(t.offset(), 0);
    assert_eq!(t.get_item(&[1, 2])?, 5.0);
    Ok(())
}

#[test]
fn reshape_arange_scenario() -> Result<(), TensorError> {
    init_logger();
    let t = Tensor::arange(9, CpuAllocator)?.reshape(&[3, 3])?;
    assert_eq!(t.get_item(&[2, 2])?, 8.0);
    Ok(())
}

#[test]
fn mutation_is_visible_through_every_view() -> Result<(), TensorError> {
    init_logger();
    let t = Tensor::arange(6, CpuAllocator)?;
    let m = t.reshape(&[2, 3])?;
    let tail = t.slice(&[3], &[6], &[1])?;

    m.set_item(&[1, 0], 100.0)?;
    assert_eq!(t.get_item(&[3])?, 100.0);
    assert_eq!(tail.get_item(&[0])?, 100.0);
    Ok(())
}

#[test]
fn error_messages_name_the_operation() -> Result<(), TensorError> {
    init_logger();
    let t = Tensor::arange(4, CpuAllocator)?;

    let msg = t.get_item(&[9]).unwrap_err().to_string();
    assert_eq!(msg, "get_item: index 9 out of bounds for dimension 0 of size 4");

    let msg = t.slice(&[0], &[4], &[0]).unwrap_err().to_string();
    assert_eq!(msg, "slice: step 0 for dimension 0 must be positive");

    let msg = t.reshape(&[3]).unwrap_err().to_string();
    assert!(msg.starts_with("reshape:"));
    Ok(())
}
