//! Registry of coordinate sets and memoized kernel maps.

use ndarray::{Array1, Array2};
use tracing::{debug, warn};

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use crate::{
    backend::{CoordinateMapBackend, CpuBackend},
    buffers::{CoordinateBuffer, Device},
    coordinates::{CoordinateSet, InsertionMaps},
    error::{Error, Result},
    kernel_map::KernelMap,
    key::{CoordinateMapKey, IdentifierGenerator, KernelMapKey},
    params::{KernelParams, ManagerConfig, RegionType},
    region::KernelRegion,
};

/// Manager of coordinate sets and kernel maps between them.
///
/// The manager owns all coordinate sets (keyed by [`CoordinateMapKey`]) and all
/// computed kernel maps. Sets are never removed or replaced, and each kernel map
/// is computed at most once per manager; repeated requests return the cached map.
///
/// The manager is not internally synchronized. To use it from multiple threads,
/// wrap the whole manager into a lock, e.g. `Mutex<CoordinateMapManager>`.
#[derive(Debug)]
pub struct CoordinateMapManager<B = CpuBackend> {
    backend: B,
    coordinate_maps: HashMap<CoordinateMapKey, CoordinateSet>,
    kernel_maps: HashMap<KernelMapKey, KernelMap>,
    /// Origin set key for each input set key.
    origins: HashMap<CoordinateMapKey, CoordinateMapKey>,
    batch_indices: BTreeSet<i32>,
    identifiers: IdentifierGenerator,
}

impl CoordinateMapManager {
    /// Creates a CPU manager with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Creates a CPU manager with the specified configuration.
    pub fn with_config(config: ManagerConfig) -> Self {
        Self::with_backend(CpuBackend, config)
    }
}

impl Default for CoordinateMapManager {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: CoordinateMapBackend> CoordinateMapManager<B> {
    /// Creates a manager computing kernel maps with the specified backend.
    pub fn with_backend(backend: B, config: ManagerConfig) -> Self {
        Self {
            backend,
            coordinate_maps: HashMap::new(),
            kernel_maps: HashMap::new(),
            origins: HashMap::new(),
            batch_indices: BTreeSet::new(),
            identifiers: IdentifierGenerator::new(
                config.identifier_seed,
                config.identifier_suffix_len,
            ),
        }
    }

    /// Gets the backend of this manager.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Device of the backend.
    pub fn device(&self) -> Device {
        self.backend.device()
    }

    /// Number of coordinate sets.
    pub fn len(&self) -> usize {
        self.coordinate_maps.len()
    }

    /// Checks whether the manager has no coordinate sets.
    pub fn is_empty(&self) -> bool {
        self.coordinate_maps.is_empty()
    }

    /// Number of cached kernel maps.
    pub fn kernel_map_count(&self) -> usize {
        self.kernel_maps.len()
    }

    /// Checks whether a coordinate set with the specified key exists.
    pub fn exists(&self, key: &CoordinateMapKey) -> bool {
        self.coordinate_maps.contains_key(key)
    }

    /// Gets the coordinate set with the specified key.
    pub fn coordinate_set(&self, key: &CoordinateMapKey) -> Result<&CoordinateSet> {
        self.coordinate_maps
            .get(key)
            .ok_or_else(|| Error::NotFound(key.clone()))
    }

    fn coordinate_sets(&self, keys: &[CoordinateMapKey]) -> Result<Vec<&CoordinateSet>> {
        keys.iter().map(|key| self.coordinate_set(key)).collect()
    }

    /// Number of coordinates in the set with the specified key.
    pub fn size(&self, key: &CoordinateMapKey) -> Result<usize> {
        self.coordinate_set(key).map(CoordinateSet::len)
    }

    /// Batch indices of all coordinates inserted into the manager.
    pub fn batch_indices(&self) -> &BTreeSet<i32> {
        &self.batch_indices
    }

    /// Copies coordinates of the specified set into an `(N, D + 1)` array in row order.
    pub fn get_coordinates(&self, key: &CoordinateMapKey) -> Result<Array2<i32>> {
        self.coordinate_set(key).map(CoordinateSet::to_array)
    }

    fn fresh_key(&mut self, tensor_stride: &[u32], base: &str) -> CoordinateMapKey {
        loop {
            let identifier = self.identifiers.generate(base);
            let key = CoordinateMapKey::new(tensor_stride.to_vec(), identifier);
            if !self.exists(&key) {
                return key;
            }
        }
    }

    /// Inserts a batch of coordinates lying on the grid with the specified `tensor_stride`.
    /// Duplicate coordinates are collapsed.
    ///
    /// If a set with the key `(tensor_stride, identifier)` already exists, the existing set
    /// is left intact and the new set is registered under a freshly generated identifier;
    /// the returned key always points to the inserted set.
    ///
    /// # Return value
    ///
    /// Returns the key of the inserted set and the row mappings between the buffer
    /// and the set.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceMismatch`] if the buffer does not reside on the backend device.
    /// - [`Error::ShapeMismatch`] if the coordinate size is not `tensor_stride.len() + 1`,
    ///   or if the tensor stride is not positive.
    pub fn insert(
        &mut self,
        coordinates: CoordinateBuffer<'_>,
        tensor_stride: impl Into<Vec<u32>>,
        identifier: &str,
    ) -> Result<(CoordinateMapKey, InsertionMaps)> {
        self.device().check(coordinates.device())?;
        let tensor_stride = tensor_stride.into();
        if coordinates.coordinate_size() != tensor_stride.len() + 1 {
            return Err(Error::ShapeMismatch(format!(
                "coordinate size {} must equal tensor stride length {} + 1",
                coordinates.coordinate_size(),
                tensor_stride.len()
            )));
        }
        if tensor_stride.contains(&0) {
            return Err(Error::ShapeMismatch(format!(
                "tensor stride {:?} must be positive",
                tensor_stride
            )));
        }

        let (set, maps) = CoordinateSet::from_array(coordinates.view(), tensor_stride, true)?;

        let mut key = CoordinateMapKey::new(set.tensor_stride().to_vec(), identifier);
        if self.exists(&key) {
            let fresh_key = self.fresh_key(key.tensor_stride(), identifier);
            warn!(
                key = %key,
                fresh_key = %fresh_key,
                "coordinate map key collision, generated a new identifier"
            );
            key = fresh_key;
        }

        debug!(
            key = %key,
            input_rows = coordinates.len(),
            size = set.len(),
            "inserted coordinate map"
        );
        self.batch_indices.extend(set.batch_indices());
        self.coordinate_maps.insert(key.clone(), set);
        Ok((key, maps))
    }

    fn strided_key(
        &self,
        in_key: &CoordinateMapKey,
        kernel_stride: &[u32],
    ) -> Result<CoordinateMapKey> {
        let in_set = self.coordinate_set(in_key)?;
        if kernel_stride.len() != in_set.dimension() {
            return Err(Error::ShapeMismatch(format!(
                "kernel stride {:?} does not match coordinate dimension {}",
                kernel_stride,
                in_set.dimension()
            )));
        }

        let tensor_stride = in_set
            .tensor_stride()
            .iter()
            .zip(kernel_stride)
            .map(|(&stride, &kernel_stride)| stride.checked_mul(kernel_stride))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                Error::ShapeMismatch(format!(
                    "tensor stride {:?} overflows when multiplied by {:?}",
                    in_set.tensor_stride(),
                    kernel_stride
                ))
            })?;
        Ok(CoordinateMapKey::new(tensor_stride, ""))
    }

    /// Gets or creates the coordinate set obtained by striding the `in_key` set.
    /// The output tensor stride is the elementwise product of the input tensor stride
    /// and `kernel_stride`.
    ///
    /// # Return value
    ///
    /// Returns the key of the strided set and a flag whether the set was created
    /// by this call.
    pub fn stride(
        &mut self,
        in_key: &CoordinateMapKey,
        kernel_stride: &[u32],
    ) -> Result<(CoordinateMapKey, bool)> {
        let out_key = self.strided_key(in_key, kernel_stride)?;
        if self.exists(&out_key) {
            return Ok((out_key, false));
        }

        let strided = self
            .coordinate_set(in_key)?
            .stride(out_key.tensor_stride())?;
        debug!(
            input = %in_key,
            output = %out_key,
            size = strided.len(),
            "created strided coordinate map"
        );
        self.coordinate_maps.insert(out_key.clone(), strided);
        Ok((out_key, true))
    }

    /// Gets the coordinate set obtained by striding the `in_key` set with the kernel
    /// region taken into account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotImplemented`] unless the output set already exists.
    pub fn stride_region(
        &mut self,
        in_key: &CoordinateMapKey,
        params: &KernelParams,
    ) -> Result<(CoordinateMapKey, bool)> {
        params.validate(self.coordinate_set(in_key)?.dimension())?;
        let out_key = self.strided_key(in_key, &params.kernel_stride)?;
        if self.exists(&out_key) {
            Ok((out_key, false))
        } else {
            Err(Error::NotImplemented("region-aware coordinate striding"))
        }
    }

    /// Gets or creates the origin set for `in_key`: a single coordinate with zero
    /// spatial components for each batch index of the input set.
    ///
    /// The origin set is registered under the key `(zeros, identifier of in_key)`.
    /// If this key is taken by an origin set with other batch indices (e.g., one derived
    /// from a set with the same identifier but another tensor stride), a fresh
    /// identifier is generated instead.
    pub fn origin(&mut self, in_key: &CoordinateMapKey) -> Result<(CoordinateMapKey, bool)> {
        if let Some(out_key) = self.origins.get(in_key) {
            return Ok((out_key.clone(), false));
        }

        let in_set = self.coordinate_set(in_key)?;
        let dimension = in_set.dimension();
        let origin = CoordinateSet::origin(in_set.batch_indices(), dimension)?;
        let mut out_key = CoordinateMapKey::new(vec![0; dimension], in_key.identifier());
        let matches_existing = self
            .coordinate_maps
            .get(&out_key)
            .map(|existing| *existing == origin);
        match matches_existing {
            Some(true) => {
                self.origins.insert(in_key.clone(), out_key.clone());
                return Ok((out_key, false));
            }
            Some(false) => {
                out_key = self.fresh_key(out_key.tensor_stride(), "origin");
            }
            None => {}
        }

        debug!(
            input = %in_key,
            output = %out_key,
            size = origin.len(),
            "created origin coordinate map"
        );
        self.coordinate_maps.insert(out_key.clone(), origin);
        self.origins.insert(in_key.clone(), out_key.clone());
        Ok((out_key, true))
    }

    /// Creates a set containing the rows of the `in_key` set for which `keep` is set.
    /// The pruned set has the same tensor stride and a freshly generated identifier.
    pub fn prune(&mut self, in_key: &CoordinateMapKey, keep: &[bool]) -> Result<CoordinateMapKey> {
        let (pruned, _) = self.coordinate_set(in_key)?.prune(keep)?;
        let out_key = self.fresh_key(in_key.tensor_stride(), "pruned");
        debug!(
            input = %in_key,
            output = %out_key,
            size = pruned.len(),
            "created pruned coordinate map"
        );
        self.coordinate_maps.insert(out_key.clone(), pruned);
        Ok(out_key)
    }

    /// Creates the union of the sets with `in_keys` under a freshly generated identifier.
    pub fn union(&mut self, in_keys: &[CoordinateMapKey]) -> Result<CoordinateMapKey> {
        let union = CoordinateSet::union(&self.coordinate_sets(in_keys)?)?;
        let out_key = self.fresh_key(union.tensor_stride(), "union");
        debug!(
            inputs = in_keys.len(),
            output = %out_key,
            size = union.len(),
            "created union coordinate map"
        );
        self.coordinate_maps.insert(out_key.clone(), union);
        Ok(out_key)
    }

    fn get_or_compute<F>(&mut self, key: KernelMapKey, compute: F) -> Result<&KernelMap>
    where
        F: FnOnce(&Self, &KernelMapKey) -> Result<KernelMap>,
    {
        if !self.kernel_maps.contains_key(&key) {
            let map = compute(&*self, &key)?;
            debug!(
                key = %key,
                buckets = map.len(),
                pairs = map.pair_count(),
                "cached kernel map"
            );
            self.kernel_maps.insert(key.clone(), map);
        }
        Ok(&self.kernel_maps[&key])
    }

    /// Gets or computes the kernel map from the `in_key` set to the `out_key` set
    /// for a kernel with the specified geometry.
    ///
    /// - If `params` describe pooling with the kernel stride equal to the kernel size,
    ///   the map is computed as a stride map.
    /// - Transposed maps are derived from the forward map between the same sets
    ///   if it is cached, and are computed with the roles of sets reversed otherwise.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if either key is not registered.
    /// - [`Error::ShapeMismatch`] if the kernel geometry does not match coordinate dimensions.
    /// - [`Error::NotImplemented`] if custom kernel offsets reside on a device other
    ///   than the backend device.
    pub fn kernel_map(
        &mut self,
        in_key: &CoordinateMapKey,
        out_key: &CoordinateMapKey,
        params: &KernelParams,
    ) -> Result<&KernelMap> {
        let key = KernelMapKey::convolution(in_key, out_key, params);
        self.get_or_compute(key, |manager, key| {
            manager.compute_kernel_map(key, in_key, out_key, params)
        })
    }

    fn compute_kernel_map(
        &self,
        key: &KernelMapKey,
        in_key: &CoordinateMapKey,
        out_key: &CoordinateMapKey,
        params: &KernelParams,
    ) -> Result<KernelMap> {
        let in_set = self.coordinate_set(in_key)?;
        let out_set = self.coordinate_set(out_key)?;
        if in_set.dimension() != out_set.dimension() {
            return Err(Error::ShapeMismatch(format!(
                "input and output coordinate maps have dimensions {} and {}",
                in_set.dimension(),
                out_set.dimension()
            )));
        }
        params.validate(in_set.dimension())?;
        if params.region_type == RegionType::Custom {
            if let Some(offsets) = &params.offsets {
                if offsets.device() != self.device() {
                    return Err(Error::NotImplemented(
                        "custom kernel offsets residing on another device",
                    ));
                }
            }
        }

        if !params.is_transpose {
            return if params.is_stride_pooling() {
                debug!(input = %in_key, output = %out_key, "generating stride map");
                self.backend
                    .stride_map(in_set, out_set, out_set.tensor_stride())
            } else {
                debug!(input = %in_key, output = %out_key, "generating kernel map");
                let region = KernelRegion::new(params, in_set.tensor_stride())?;
                self.backend.kernel_map(in_set, out_set, &region)
            };
        }

        let forward = key
            .forward()
            .and_then(|forward_key| self.kernel_maps.get(&forward_key));
        if let Some(forward) = forward {
            debug!(input = %in_key, output = %out_key, "swapping cached forward map");
            return Ok(forward.swap());
        }

        // The output set lies on the finer grid, so the forward map goes from it
        // to the input set.
        let forward = if params.is_stride_pooling() {
            debug!(input = %in_key, output = %out_key, "generating transposed stride map");
            self.backend
                .stride_map(out_set, in_set, in_set.tensor_stride())?
        } else {
            debug!(input = %in_key, output = %out_key, "generating transposed kernel map");
            let region = KernelRegion::new(params, out_set.tensor_stride())?;
            self.backend.kernel_map(out_set, in_set, &region)?
        };
        Ok(forward.into_swapped())
    }

    /// Gets or computes the map from the `in_key` set to the origin set `out_key`
    /// (see [`origin()`](Self::origin)). Bucket `j` lists the input rows with the batch
    /// index of the `j`th origin row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the origin set does not contain
    /// exactly one row per batch index of the input set.
    pub fn origin_kernel_map(
        &mut self,
        in_key: &CoordinateMapKey,
        out_key: &CoordinateMapKey,
    ) -> Result<&KernelMap> {
        let key = KernelMapKey::GlobalReduction {
            input: in_key.clone(),
            output: out_key.clone(),
        };
        self.get_or_compute(key, |manager, _| {
            let in_set = manager.coordinate_set(in_key)?;
            let out_set = manager.coordinate_set(out_key)?;
            manager.backend.global_reduction_map(in_set, out_set)
        })
    }

    /// Gets or computes the map from the `in_key` set to its pruned version `out_key`.
    pub fn pruning_kernel_map(
        &mut self,
        in_key: &CoordinateMapKey,
        out_key: &CoordinateMapKey,
    ) -> Result<&KernelMap> {
        let key = KernelMapKey::Pruning {
            input: in_key.clone(),
            output: out_key.clone(),
        };
        self.get_or_compute(key, |manager, _| {
            let in_set = manager.coordinate_set(in_key)?;
            let out_set = manager.coordinate_set(out_key)?;
            manager.backend.pruned_kernel_map(in_set, out_set)
        })
    }

    /// Gets or computes the map from the `in_keys` sets to their union `out_key`.
    /// Bucket `i` corresponds to `in_keys[i]`.
    pub fn union_kernel_map(
        &mut self,
        in_keys: &[CoordinateMapKey],
        out_key: &CoordinateMapKey,
    ) -> Result<&KernelMap> {
        let key = KernelMapKey::Union {
            inputs: in_keys.to_vec(),
            output: out_key.clone(),
        };
        self.get_or_compute(key, |manager, _| {
            let in_sets = manager.coordinate_sets(in_keys)?;
            let out_set = manager.coordinate_set(out_key)?;
            manager.backend.union_map(&in_sets, out_set)
        })
    }

    /// Computes the stride map from the `in_key` set to the coarser `out_key` set
    /// and returns it as flat (input rows, output rows) index arrays. The result
    /// is not cached.
    pub fn stride_pairs(
        &self,
        in_key: &CoordinateMapKey,
        out_key: &CoordinateMapKey,
    ) -> Result<(Array1<i64>, Array1<i64>)> {
        let in_set = self.coordinate_set(in_key)?;
        let out_set = self.coordinate_set(out_key)?;
        let map = self
            .backend
            .stride_map(in_set, out_set, out_set.tensor_stride())?;
        Ok(map.to_index_arrays())
    }

    /// Returns the rows of the `in_key` set grouped by batch index (in ascending
    /// batch index order).
    pub fn row_indices_per_batch(&mut self, in_key: &CoordinateMapKey) -> Result<Vec<Vec<u32>>> {
        let (origin_key, _) = self.origin(in_key)?;
        let map = self.origin_kernel_map(in_key, &origin_key)?;
        Ok(map.in_maps().to_vec())
    }

    /// Returns the rows of the `in_key` set with the specified batch index. If there are
    /// no such rows, returns an empty vector.
    pub fn row_indices_at_batch(
        &mut self,
        in_key: &CoordinateMapKey,
        batch_index: i32,
    ) -> Result<Vec<u32>> {
        let (origin_key, _) = self.origin(in_key)?;
        let mut origin = vec![0; origin_key.dimension() + 1];
        origin[0] = batch_index;
        let origin_row = match self.coordinate_set(&origin_key)?.find(&origin) {
            Some(row) => row as usize,
            None => return Ok(vec![]),
        };

        let map = self.origin_kernel_map(in_key, &origin_key)?;
        Ok(map
            .bucket(origin_row)
            .map(|(in_rows, _)| in_rows.to_vec())
            .unwrap_or_default())
    }
}

impl<B: CoordinateMapBackend> fmt::Display for CoordinateMapManager<B> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(formatter, "CoordinateMapManager ({})", self.device())?;

        let mut coordinate_maps: Vec<_> = self.coordinate_maps.iter().collect();
        coordinate_maps.sort_by(|(x, _), (y, _)| x.cmp(y));
        writeln!(formatter, "  coordinate maps: {}", coordinate_maps.len())?;
        for (key, set) in coordinate_maps {
            writeln!(formatter, "    {}: {} coordinates", key, set.len())?;
        }

        let mut kernel_maps: Vec<_> = self
            .kernel_maps
            .iter()
            .map(|(key, map)| (key.to_string(), map))
            .collect();
        kernel_maps.sort_by(|(x, _), (y, _)| x.cmp(y));
        writeln!(formatter, "  kernel maps: {}", kernel_maps.len())?;
        for (key, map) in kernel_maps {
            writeln!(
                formatter,
                "    {}: {} buckets, {} pairs",
                key,
                map.len(),
                map.pair_count()
            )?;
        }
        Ok(())
    }
}
