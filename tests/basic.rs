//! Tests for basic functionality provided by the crate.

use ndarray::{arr2, Array2};

use std::{
    fmt,
    sync::{Arc, Mutex},
    thread,
};

use sparse_coords::{
    CoordinateBuffer, CoordinateMapKey, CoordinateMapManager, Device, KernelOffsets,
    KernelParams, ManagerConfig, RegionType,
};

/// Simple wrapper for both error types used in tests.
#[derive(Debug)]
enum Error {
    Shape(ndarray::ShapeError),
    Coords(sparse_coords::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(e) => fmt::Display::fmt(e, formatter),
            Self::Coords(e) => fmt::Display::fmt(e, formatter),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shape(e) => Some(e),
            Self::Coords(e) => Some(e),
        }
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(error: ndarray::ShapeError) -> Self {
        Self::Shape(error)
    }
}

impl From<sparse_coords::Error> for Error {
    fn from(error: sparse_coords::Error) -> Self {
        Self::Coords(error)
    }
}

/// Creates a dense `size x size` patch of coordinates in the specified batch element.
#[allow(clippy::cast_possible_wrap)] // `size` is small
fn create_patch(batch: i32, size: usize) -> Result<Array2<i32>, Error> {
    let coordinates = (0..size * size)
        .flat_map(|i| vec![batch, (i / size) as i32, (i % size) as i32])
        .collect();
    Ok(Array2::from_shape_vec([size * size, 3], coordinates)?)
}

fn seeded_manager() -> CoordinateMapManager {
    CoordinateMapManager::with_config(ManagerConfig {
        identifier_seed: Some(123),
        ..ManagerConfig::default()
    })
}

#[test]
fn strided_convolution_map() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let coordinates = arr2(&[[0, 0, 0], [0, 1, 1], [0, 2, 2]]);
    let (fine, maps) = manager.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "")?;
    assert_eq!(fine, CoordinateMapKey::new(vec![1, 1], ""));
    assert_eq!(maps.mapping, [0, 1, 2]);

    let (coarse, created) = manager.stride(&fine, &[2, 2])?;
    assert!(created);
    assert_eq!(
        manager.get_coordinates(&coarse)?,
        arr2(&[[0, 0, 0], [0, 2, 2]])
    );

    let params = KernelParams::uniform(2, 3, 2, 1).pooling(true);
    let map = manager.kernel_map(&fine, &coarse, &params)?;
    assert_eq!(map.len(), 9);
    assert_eq!(map.bucket(4), Some((&[0, 2][..], &[0, 1][..])));
    assert_eq!(map.pair_count(), 4);
    for (in_rows, out_rows) in map.iter() {
        assert_eq!(in_rows.len(), out_rows.len());
    }
    Ok(())
}

#[test]
fn convolution_on_dense_patch() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let patch = create_patch(0, 4)?;
    let (key, _) = manager.insert(CoordinateBuffer::cpu(&patch), [1, 1], "patch")?;

    let map = manager.kernel_map(&key, &key, &KernelParams::uniform(2, 3, 1, 1))?;
    // Inner 2x2 sites have 9 neighbors, 8 border non-corner sites have 6, 4 corners have 4.
    assert_eq!(map.pair_count(), 4 * 9 + 8 * 6 + 4 * 4);
    // Center tap is the identity.
    let identity: Vec<u32> = (0..16).collect();
    assert_eq!(map.bucket(4), Some((&identity[..], &identity[..])));

    let cross = KernelParams::uniform(2, 3, 1, 1).with_region_type(RegionType::Hypercross);
    let map = manager.kernel_map(&key, &key, &cross)?;
    assert_eq!(map.len(), 5);
    // Each site has itself plus 2..=4 axis-aligned neighbors: 16 + 2 * (2 * 4 * 3).
    assert_eq!(map.pair_count(), 16 + 48);
    Ok(())
}

#[test]
fn insertion_is_deterministic() -> Result<(), Error> {
    let coordinates = arr2(&[[1, 3, 3], [0, 1, 1], [1, 3, 3], [0, -2, 5]]);
    let mut first = seeded_manager();
    let mut second = seeded_manager();
    let (first_key, first_maps) = first.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "")?;
    let (second_key, second_maps) =
        second.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "")?;

    assert_eq!(first_key, second_key);
    assert_eq!(first_maps, second_maps);
    assert_eq!(
        first.get_coordinates(&first_key)?,
        second.get_coordinates(&second_key)?
    );
    assert_eq!(first.size(&first_key)?, 3);
    Ok(())
}

#[test]
fn transposed_map_matches_forward_map() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let patch = create_patch(0, 5)?;
    let (fine, _) = manager.insert(CoordinateBuffer::cpu(&patch), [1, 1], "")?;
    let (coarse, _) = manager.stride(&fine, &[2, 2])?;
    let params = KernelParams::uniform(2, 3, 2, 1);

    let transposed = manager
        .kernel_map(&coarse, &fine, &params.clone().transposed(true))?
        .clone();
    let forward = manager.kernel_map(&fine, &coarse, &params)?.clone();
    assert_eq!(transposed.in_maps(), forward.out_maps());
    assert_eq!(transposed.out_maps(), forward.in_maps());
    assert_eq!(manager.kernel_map_count(), 2);
    Ok(())
}

#[test]
fn multi_level_striding() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let patch = create_patch(0, 8)?;
    let (key, _) = manager.insert(CoordinateBuffer::cpu(&patch), [1, 1], "")?;

    let mut current = key;
    for &expected_size in &[16, 4, 1] {
        let (next, _) = manager.stride(&current, &[2, 2])?;
        assert_eq!(manager.size(&next)?, expected_size);

        let params = KernelParams::uniform(2, 2, 2, 1).pooling(true);
        let input_size = manager.size(&current)?;
        let map = manager.kernel_map(&current, &next, &params)?;
        assert_eq!(map.len(), 4);
        assert_eq!(map.pair_count(), input_size);
        current = next;
    }
    assert_eq!(current.tensor_stride(), [8, 8]);
    assert_eq!(manager.len(), 4);
    Ok(())
}

#[test]
fn pruning_and_union_of_batches() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let first = create_patch(0, 2)?;
    let second = create_patch(1, 2)?;
    let (first_key, _) = manager.insert(CoordinateBuffer::cpu(&first), [1, 1], "a")?;
    let (second_key, _) = manager.insert(CoordinateBuffer::cpu(&second), [1, 1], "b")?;

    let in_keys = [first_key, second_key];
    let union_key = manager.union(&in_keys)?;
    assert_eq!(manager.size(&union_key)?, 8);
    let map = manager.union_kernel_map(&in_keys, &union_key)?;
    assert_eq!(map.pair_count(), 8);
    assert_eq!(map.bucket(1), Some((&[0, 1, 2, 3][..], &[4, 5, 6, 7][..])));
    assert_eq!(
        manager.row_indices_per_batch(&union_key)?,
        [vec![0, 1, 2, 3], vec![4, 5, 6, 7]]
    );

    let keep = [false, true, true, false, true, false, false, true];
    let pruned_key = manager.prune(&union_key, &keep)?;
    assert_ne!(pruned_key, union_key);
    let map = manager.pruning_kernel_map(&union_key, &pruned_key)?;
    assert_eq!(map.bucket(0), Some((&[1, 2, 4, 7][..], &[0, 1, 2, 3][..])));
    assert_eq!(manager.row_indices_at_batch(&pruned_key, 1)?, [2, 3]);
    Ok(())
}

#[test]
fn batch_rows_after_pruning_and_striding() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let coordinates = arr2(&[[0, 0, 0], [1, 1, 1]]);
    let (key, _) = manager.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "")?;
    assert_eq!(manager.row_indices_per_batch(&key)?, [vec![0], vec![1]]);

    let pruned_key = manager.prune(&key, &[true, false])?;
    let (strided_key, created) = manager.stride(&pruned_key, &[2, 2])?;
    assert!(created);
    assert_eq!(manager.row_indices_per_batch(&strided_key)?, [vec![0]]);
    // Rows of the original set are still grouped correctly.
    assert_eq!(manager.row_indices_per_batch(&key)?, [vec![0], vec![1]]);
    Ok(())
}

#[test]
fn extreme_coordinates() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let coordinates = arr2(&[[0, i32::MAX, 0], [0, i32::MIN, 0]]);
    let (key, _) = manager.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "")?;

    let map = manager.kernel_map(&key, &key, &KernelParams::uniform(2, 3, 1, 1))?;
    assert_eq!(map.pair_count(), 2);

    let err = manager.stride(&key, &[3, 1]).unwrap_err();
    assert!(matches!(err, sparse_coords::Error::ShapeMismatch(_)));
    assert_eq!(manager.len(), 1);
    let (strided_key, _) = manager.stride(&key, &[2, 1])?;
    assert_eq!(manager.size(&strided_key)?, 2);
    Ok(())
}

#[test]
fn global_reduction_requires_matching_origin() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let coordinates = arr2(&[[0, 0, 0], [2, 1, 1]]);
    let (key, _) = manager.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "")?;
    let single = arr2(&[[0, 0, 0]]);
    let (single_key, _) = manager.insert(CoordinateBuffer::cpu(&single), [1, 1], "single")?;

    let err = manager.origin_kernel_map(&key, &single_key).unwrap_err();
    assert!(matches!(err, sparse_coords::Error::InvariantViolation(_)));
    assert_eq!(manager.kernel_map_count(), 0);

    let (origin_key, _) = manager.origin(&key)?;
    let map = manager.origin_kernel_map(&key, &origin_key)?;
    assert_eq!(map.in_maps(), [vec![0], vec![1]]);
    Ok(())
}

#[test]
fn device_checks() -> Result<(), Error> {
    let mut manager = seeded_manager();
    assert_eq!(manager.device(), Device::Cpu);

    let coordinates = arr2(&[[0, 0, 0], [0, 1, 1]]);
    let err = manager
        .insert(CoordinateBuffer::on(Device::Gpu(1), &coordinates), [1, 1], "")
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "device mismatch: backend is on cpu, buffer is on gpu:1"
    );
    assert!(manager.is_empty());

    let (key, _) = manager.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "")?;
    let offsets = KernelOffsets::on(Device::Gpu(1), arr2(&[[0, 0]]));
    let params = KernelParams::uniform(2, 3, 1, 1).with_custom_offsets(offsets);
    let err = manager.kernel_map(&key, &key, &params).unwrap_err();
    assert!(matches!(err, sparse_coords::Error::NotImplemented(_)));
    Ok(())
}

#[test]
fn colliding_keys_do_not_overwrite_sets() -> Result<(), Error> {
    let mut manager = seeded_manager();
    let first = create_patch(0, 2)?;
    let second = create_patch(0, 3)?;
    let (first_key, _) = manager.insert(CoordinateBuffer::cpu(&first), [1, 1], "features")?;
    let (second_key, _) = manager.insert(CoordinateBuffer::cpu(&second), [1, 1], "features")?;

    assert_ne!(first_key, second_key);
    assert_eq!(manager.get_coordinates(&first_key)?, first);
    assert_eq!(manager.get_coordinates(&second_key)?, second);
    Ok(())
}

#[test]
fn missing_keys() {
    let mut manager = seeded_manager();
    let missing = CoordinateMapKey::new(vec![1, 1], "missing");
    let err = manager.stride(&missing, &[2, 2]).unwrap_err();
    assert_eq!(err, sparse_coords::Error::NotFound(missing.clone()));
    assert_eq!(err.to_string(), "coordinate map not found: [1, 1]/missing");
    assert!(manager.get_coordinates(&missing).is_err());
    assert!(manager.row_indices_per_batch(&missing).is_err());
}

#[test]
fn manager_can_be_shared_across_threads() -> Result<(), Error> {
    let manager = Arc::new(Mutex::new(seeded_manager()));
    let patch = create_patch(0, 4)?;
    let (key, _) = manager
        .lock()
        .unwrap()
        .insert(CoordinateBuffer::cpu(&patch), [1, 1], "")?;

    let handles: Vec<_> = (1..=4)
        .map(|size| {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            thread::spawn(move || {
                let params = KernelParams::uniform(2, size, 1, 1);
                let mut manager = manager.lock().unwrap();
                let bucket_count = manager.kernel_map(&key, &key, &params).map(|map| map.len());
                bucket_count
            })
        })
        .collect();
    for (size, handle) in (1..=4).zip(handles) {
        let bucket_count = handle.join().unwrap()?;
        assert_eq!(bucket_count, size * size);
    }
    assert_eq!(manager.lock().unwrap().kernel_map_count(), 4);
    Ok(())
}
