//! Coordinate sets: unique coordinates with dense row indices.

use ahash::AHashMap;
use ndarray::{Array2, ArrayView2};

use std::{collections::BTreeSet, convert::TryFrom};

use crate::error::{Error, Result};

/// Row mappings produced when a batch of coordinates is turned into a [`CoordinateSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsertionMaps {
    /// For each input row, the set row it was collapsed into.
    pub mapping: Vec<u32>,
    /// For each set row, the first input row holding the same coordinate.
    pub inverse_mapping: Vec<u32>,
}

/// Immutable collection of unique coordinates.
///
/// Each coordinate has `coordinate_size() = D + 1` components: the batch index followed
/// by `D` spatial components. Coordinates are assigned dense row indices `0..len()`
/// which align with the rows of the feature tensors maintained by the caller.
/// Row indices are `u32`, so a set holds at most `u32::MAX + 1` coordinates;
/// operations that would exceed this limit fail with [`Error::InvariantViolation`].
#[derive(Debug, Clone)]
pub struct CoordinateSet {
    coordinate_size: usize,
    tensor_stride: Vec<u32>,
    /// Row-major coordinate storage, `len() * coordinate_size` items.
    coordinates: Vec<i32>,
    index: AHashMap<Box<[i32]>, u32>,
}

impl PartialEq for CoordinateSet {
    fn eq(&self, other: &Self) -> bool {
        self.coordinate_size == other.coordinate_size
            && self.tensor_stride == other.tensor_stride
            && self.coordinates == other.coordinates
    }
}

impl Eq for CoordinateSet {}

impl CoordinateSet {
    fn empty(coordinate_size: usize, tensor_stride: Vec<u32>, capacity: usize) -> Self {
        Self {
            coordinate_size,
            tensor_stride,
            coordinates: Vec::with_capacity(capacity * coordinate_size),
            index: AHashMap::with_capacity(capacity),
        }
    }

    /// Inserts a coordinate unless it is already present. Returns the row of
    /// the coordinate and whether it was inserted.
    fn insert(&mut self, coordinate: &[i32]) -> Result<(u32, bool)> {
        debug_assert_eq!(coordinate.len(), self.coordinate_size);
        if let Some(&row) = self.index.get(coordinate) {
            return Ok((row, false));
        }
        let row = next_row(self.index.len())?;
        self.index.insert(coordinate.into(), row);
        self.coordinates.extend_from_slice(coordinate);
        Ok((row, true))
    }

    /// Builds a set from coordinate rows.
    ///
    /// If `deduplicate` is set, repeated coordinates collapse into a single row. Otherwise,
    /// a repeated coordinate is an error.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidShape`] if rows have different lengths.
    /// - [`Error::ShapeMismatch`] if the row length does not match `tensor_stride`.
    /// - [`Error::InvariantViolation`] if `deduplicate` is not set and there are duplicates.
    pub fn create<'a, I>(
        rows: I,
        tensor_stride: impl Into<Vec<u32>>,
        deduplicate: bool,
    ) -> Result<(Self, InsertionMaps)>
    where
        I: IntoIterator<Item = &'a [i32]>,
    {
        let tensor_stride = tensor_stride.into();
        let coordinate_size = tensor_stride.len() + 1;
        let rows = rows.into_iter();
        let mut set = Self::empty(coordinate_size, tensor_stride, rows.size_hint().0);
        let mut maps = InsertionMaps::default();

        for (input_row, coordinate) in rows.enumerate() {
            if coordinate.len() != coordinate_size {
                return Err(if input_row == 0 {
                    Error::ShapeMismatch(format!(
                        "coordinate size {} does not match tensor stride {:?}",
                        coordinate.len(),
                        set.tensor_stride
                    ))
                } else {
                    Error::InvalidShape {
                        expected: coordinate_size,
                        actual: coordinate.len(),
                    }
                });
            }

            let (row, inserted) = set.insert(coordinate)?;
            if inserted {
                maps.inverse_mapping.push(next_row(input_row)?);
            } else if !deduplicate {
                return Err(Error::InvariantViolation(format!(
                    "duplicate coordinate {:?} at row {}",
                    coordinate, input_row
                )));
            }
            maps.mapping.push(row);
        }
        Ok((set, maps))
    }

    /// Builds a set from an `(N, D + 1)` array.
    pub fn from_array(
        array: ArrayView2<'_, i32>,
        tensor_stride: impl Into<Vec<u32>>,
        deduplicate: bool,
    ) -> Result<(Self, InsertionMaps)> {
        let tensor_stride = tensor_stride.into();
        if array.ncols() != tensor_stride.len() + 1 {
            return Err(Error::ShapeMismatch(format!(
                "coordinate size {} does not match tensor stride {:?}",
                array.ncols(),
                tensor_stride
            )));
        }

        let array = array.as_standard_layout();
        let flat = array
            .as_slice()
            .ok_or_else(|| Error::InvariantViolation("non-contiguous coordinates".to_owned()))?;
        Self::create(
            flat.chunks_exact(tensor_stride.len() + 1),
            tensor_stride,
            deduplicate,
        )
    }

    /// Creates the origin set: one coordinate `[b, 0, .., 0]` per batch index `b`,
    /// with the tensor stride set to zeros.
    pub fn origin(batch_indices: impl IntoIterator<Item = i32>, dimension: usize) -> Result<Self> {
        let batch_indices: BTreeSet<_> = batch_indices.into_iter().collect();
        let mut set = Self::empty(dimension + 1, vec![0; dimension], batch_indices.len());
        let mut coordinate = vec![0; dimension + 1];
        for batch in batch_indices {
            coordinate[0] = batch;
            set.insert(&coordinate)?;
        }
        Ok(set)
    }

    /// Number of coordinates.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Checks whether the set contains no coordinates.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of components in each coordinate, `D + 1`.
    pub fn coordinate_size(&self) -> usize {
        self.coordinate_size
    }

    /// Spatial dimension `D`.
    pub fn dimension(&self) -> usize {
        self.coordinate_size - 1
    }

    /// Tensor stride of the set.
    pub fn tensor_stride(&self) -> &[u32] {
        &self.tensor_stride
    }

    /// Finds the row of the specified coordinate.
    pub fn find(&self, coordinate: &[i32]) -> Option<u32> {
        self.index.get(coordinate).copied()
    }

    /// Gets the coordinate at the specified row.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn coordinate(&self, row: usize) -> &[i32] {
        let start = row * self.coordinate_size;
        &self.coordinates[start..start + self.coordinate_size]
    }

    /// Iterates over coordinates in row order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[i32]> + '_ {
        self.coordinates.chunks_exact(self.coordinate_size)
    }

    /// Distinct batch indices in ascending order.
    pub fn batch_indices(&self) -> BTreeSet<i32> {
        self.iter().map(|coordinate| coordinate[0]).collect()
    }

    /// Copies coordinates into an `(N, D + 1)` array in row order.
    pub fn to_array(&self) -> Array2<i32> {
        Array2::from_shape_vec([self.len(), self.coordinate_size], self.coordinates.clone())
            .expect("coordinate storage is always rectangular")
    }

    /// Derives a set on a coarser grid: each spatial component is snapped to
    /// `floor(c / s) * s`, where `s` is the corresponding `new_tensor_stride` component.
    /// Rows follow the order of first occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the stride is invalid, or if a snapped
    /// component does not fit into `i32`.
    pub fn stride(&self, new_tensor_stride: &[u32]) -> Result<Self> {
        check_stride(self, new_tensor_stride)?;
        let mut set = Self::empty(self.coordinate_size, new_tensor_stride.to_vec(), self.len());
        let mut strided = vec![0; self.coordinate_size];
        for coordinate in self.iter() {
            snap(coordinate, new_tensor_stride, &mut strided)?;
            set.insert(&strided)?;
        }
        Ok(set)
    }

    /// Keeps rows for which `keep` is set. Returns the pruned set and, for each row
    /// of this set, its row in the pruned set.
    pub fn prune(&self, keep: &[bool]) -> Result<(Self, Vec<Option<u32>>)> {
        if keep.len() != self.len() {
            return Err(Error::ShapeMismatch(format!(
                "pruning mask has {} entries, coordinate set has {} rows",
                keep.len(),
                self.len()
            )));
        }

        let kept = keep.iter().filter(|&&flag| flag).count();
        let mut set = Self::empty(self.coordinate_size, self.tensor_stride.clone(), kept);
        let mut forward = Vec::with_capacity(self.len());
        for (coordinate, &flag) in self.iter().zip(keep) {
            forward.push(if flag {
                Some(set.insert(coordinate)?.0)
            } else {
                None
            });
        }
        Ok((set, forward))
    }

    /// Unites `sets`. Rows follow the order of first occurrence across the sets;
    /// the tensor stride is the elementwise minimum of the sets' strides.
    pub fn union(sets: &[&CoordinateSet]) -> Result<Self> {
        let (first, rest) = sets.split_first().ok_or_else(|| {
            Error::InvariantViolation("union requires at least one coordinate set".to_owned())
        })?;

        let mut tensor_stride = first.tensor_stride.clone();
        for set in rest {
            if set.coordinate_size != first.coordinate_size {
                return Err(Error::ShapeMismatch(format!(
                    "cannot unite coordinates of sizes {} and {}",
                    first.coordinate_size, set.coordinate_size
                )));
            }
            for (min, &stride) in tensor_stride.iter_mut().zip(&set.tensor_stride) {
                *min = (*min).min(stride);
            }
        }

        let capacity = sets.iter().map(|set| set.len()).sum();
        let mut union = Self::empty(first.coordinate_size, tensor_stride, capacity);
        for set in sets {
            for coordinate in set.iter() {
                union.insert(coordinate)?;
            }
        }
        Ok(union)
    }
}

/// Converts a row count into the index of the next row.
fn next_row(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::InvariantViolation(format!(
            "coordinate set cannot hold more than {} rows",
            u64::from(u32::MAX) + 1
        ))
    })
}

/// Snaps the spatial part of `coordinate` to the grid defined by `tensor_stride`.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if a snapped component does not fit into `i32`
/// (this can happen for components close to `i32::MIN`).
pub(crate) fn snap(coordinate: &[i32], tensor_stride: &[u32], output: &mut [i32]) -> Result<()> {
    output[0] = coordinate[0];
    for ((out, &value), &stride) in output[1..]
        .iter_mut()
        .zip(&coordinate[1..])
        .zip(tensor_stride)
    {
        let stride = i64::from(stride);
        let snapped = i64::from(value).div_euclid(stride) * stride;
        *out = i32::try_from(snapped).map_err(|_| {
            Error::ShapeMismatch(format!(
                "coordinate component {} snapped to stride {} leaves the i32 range",
                value, stride
            ))
        })?;
    }
    Ok(())
}

fn check_stride(set: &CoordinateSet, tensor_stride: &[u32]) -> Result<()> {
    if tensor_stride.len() != set.dimension() {
        return Err(Error::ShapeMismatch(format!(
            "tensor stride {:?} does not match coordinate dimension {}",
            tensor_stride,
            set.dimension()
        )));
    }
    if tensor_stride
        .iter()
        .any(|&stride| stride == 0 || i32::try_from(stride).is_err())
    {
        return Err(Error::ShapeMismatch(format!(
            "invalid tensor stride {:?}",
            tensor_stride
        )));
    }
    Ok(())
}
