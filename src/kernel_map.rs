//! Kernel maps and their construction.

use ahash::AHashMap;
use ndarray::Array1;

use crate::{
    coordinates::{snap, CoordinateSet},
    error::{Error, Result},
    region::KernelRegion,
};

/// Index correspondence between input and output coordinate sets.
///
/// A kernel map consists of buckets; for convolution maps, bucket `k` corresponds
/// to the `k`th kernel offset. Each bucket holds two sequences of equal length:
/// input row `in_maps()[k][i]` contributes to output row `out_maps()[k][i]`.
/// Empty buckets are retained, so the bucket index always identifies the offset.
///
/// Rows are stored as `u32`; this is lossless since a [`CoordinateSet`] never holds
/// more rows than `u32` can index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelMap {
    in_maps: Vec<Vec<u32>>,
    out_maps: Vec<Vec<u32>>,
}

impl KernelMap {
    /// Creates a map with `bucket_count` empty buckets.
    pub fn with_buckets(bucket_count: usize) -> Self {
        Self {
            in_maps: vec![vec![]; bucket_count],
            out_maps: vec![vec![]; bucket_count],
        }
    }

    fn push(&mut self, bucket: usize, in_row: u32, out_row: u32) {
        self.in_maps[bucket].push(in_row);
        self.out_maps[bucket].push(out_row);
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.in_maps.len()
    }

    /// Checks whether the map has no buckets.
    pub fn is_empty(&self) -> bool {
        self.in_maps.is_empty()
    }

    /// Total number of (input, output) pairs across all buckets.
    pub fn pair_count(&self) -> usize {
        self.in_maps.iter().map(Vec::len).sum()
    }

    /// Gets input and output rows of the specified bucket.
    pub fn bucket(&self, index: usize) -> Option<(&[u32], &[u32])> {
        let in_rows = self.in_maps.get(index)?;
        let out_rows = self.out_maps.get(index)?;
        Some((in_rows, out_rows))
    }

    /// Iterates over buckets.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&[u32], &[u32])> + '_ {
        self.in_maps
            .iter()
            .zip(&self.out_maps)
            .map(|(in_rows, out_rows)| (in_rows.as_slice(), out_rows.as_slice()))
    }

    /// Input rows per bucket.
    pub fn in_maps(&self) -> &[Vec<u32>] {
        &self.in_maps
    }

    /// Output rows per bucket.
    pub fn out_maps(&self) -> &[Vec<u32>] {
        &self.out_maps
    }

    /// Returns a map with input and output rows exchanged in every bucket.
    pub fn swap(&self) -> Self {
        self.clone().into_swapped()
    }

    /// Same as [`swap()`](Self::swap), but reuses the storage of this map.
    pub fn into_swapped(self) -> Self {
        Self {
            in_maps: self.out_maps,
            out_maps: self.in_maps,
        }
    }

    /// Concatenates all buckets into a pair of index arrays (input rows, output rows).
    pub fn to_index_arrays(&self) -> (Array1<i64>, Array1<i64>) {
        (flatten(&self.in_maps), flatten(&self.out_maps))
    }
}

fn flatten(maps: &[Vec<u32>]) -> Array1<i64> {
    maps.iter().flatten().map(|&row| i64::from(row)).collect()
}

/// Computes the general kernel map: for each tap of `region` and each row of `out_set`,
/// finds the `in_set` row located at the tap offset from the output coordinate.
/// Taps leading outside of the `i32` coordinate range are skipped.
pub fn kernel_map(
    in_set: &CoordinateSet,
    out_set: &CoordinateSet,
    region: &KernelRegion,
) -> Result<KernelMap> {
    check_sizes(in_set, out_set)?;
    if region.dimension() != in_set.dimension() {
        return Err(Error::ShapeMismatch(format!(
            "kernel region has {} dimensions, coordinates have {}",
            region.dimension(),
            in_set.dimension()
        )));
    }

    let mut map = KernelMap::with_buckets(region.volume());
    let mut offset = vec![0; region.dimension()];
    let mut candidate = vec![0; in_set.coordinate_size()];
    for bucket in 0..region.volume() {
        region.offset_into(bucket, &mut offset);
        'outputs: for (out_row, coordinate) in out_set.iter().enumerate() {
            candidate[0] = coordinate[0];
            for ((value, &center), &delta) in candidate[1..]
                .iter_mut()
                .zip(&coordinate[1..])
                .zip(&offset)
            {
                *value = match center.checked_add(delta) {
                    Some(shifted) => shifted,
                    None => continue 'outputs,
                };
            }
            if let Some(in_row) = in_set.find(&candidate) {
                map.push(bucket, in_row, out_row as u32);
            }
        }
    }
    Ok(map)
}

/// Computes the stride map from `in_set` to `out_set` lying on the coarser grid
/// `out_tensor_stride`. Each input row is snapped to the coarser grid and matched
/// with the output row of the snapped coordinate.
///
/// There is one bucket per position within a stride cell (the product of per-dimension
/// stride ratios, dimension 0 varying slowest). This coincides with the bucket layout
/// of the general kernel map for an even-sized kernel with stride equal to its size.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the tensor strides do not divide each other,
/// or if a snapped coordinate does not fit into `i32`.
pub fn stride_map(
    in_set: &CoordinateSet,
    out_set: &CoordinateSet,
    out_tensor_stride: &[u32],
) -> Result<KernelMap> {
    check_sizes(in_set, out_set)?;
    let ratios = stride_ratios(in_set.tensor_stride(), out_tensor_stride)?;
    let bucket_count = ratios.iter().map(|&ratio| ratio as usize).product();

    let mut map = KernelMap::with_buckets(bucket_count);
    let mut strided = vec![0; in_set.coordinate_size()];
    for (in_row, coordinate) in in_set.iter().enumerate() {
        snap(coordinate, out_tensor_stride, &mut strided)?;
        let out_row = match out_set.find(&strided) {
            Some(row) => row,
            None => continue,
        };

        let mut bucket = 0;
        for dim in 0..ratios.len() {
            let cell_offset = (coordinate[dim + 1] - strided[dim + 1]) as u32;
            let position = cell_offset / in_set.tensor_stride()[dim];
            bucket = bucket * ratios[dim] as usize + position as usize;
        }
        map.push(bucket, in_row as u32, out_row);
    }
    Ok(map)
}

fn stride_ratios(in_tensor_stride: &[u32], out_tensor_stride: &[u32]) -> Result<Vec<u32>> {
    if in_tensor_stride.len() != out_tensor_stride.len() {
        return Err(Error::ShapeMismatch(format!(
            "tensor strides {:?} and {:?} have different dimensions",
            in_tensor_stride, out_tensor_stride
        )));
    }
    in_tensor_stride
        .iter()
        .zip(out_tensor_stride)
        .map(|(&input, &output)| {
            if input > 0 && output % input == 0 && output >= input {
                Ok(output / input)
            } else {
                Err(Error::ShapeMismatch(format!(
                    "tensor stride {:?} is not a multiple of {:?}",
                    out_tensor_stride, in_tensor_stride
                )))
            }
        })
        .collect()
}

/// Maps each row of `in_set` that survived pruning to its row in the pruned `out_set`.
/// The map has a single bucket.
pub fn pruned_kernel_map(in_set: &CoordinateSet, out_set: &CoordinateSet) -> Result<KernelMap> {
    check_sizes(in_set, out_set)?;
    let mut map = KernelMap::with_buckets(1);
    for (in_row, coordinate) in in_set.iter().enumerate() {
        if let Some(out_row) = out_set.find(coordinate) {
            map.push(0, in_row as u32, out_row);
        }
    }
    Ok(map)
}

/// Maps rows of each of `in_sets` to the rows of the same coordinates in `out_set`.
/// Bucket `i` corresponds to `in_sets[i]`.
pub fn union_map(in_sets: &[&CoordinateSet], out_set: &CoordinateSet) -> Result<KernelMap> {
    let mut map = KernelMap::with_buckets(in_sets.len());
    for (bucket, in_set) in in_sets.iter().enumerate() {
        check_sizes(in_set, out_set)?;
        for (in_row, coordinate) in in_set.iter().enumerate() {
            let out_row = out_set.find(coordinate).ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "coordinate {:?} is missing from the union",
                    coordinate
                ))
            })?;
            map.push(bucket, in_row as u32, out_row);
        }
    }
    Ok(map)
}

/// Maps every row of `in_set` to the row of `out_set` with the same batch index.
/// Bucket `j` holds the input rows reduced into output row `j`.
///
/// # Errors
///
/// Returns [`Error::InvariantViolation`] if `out_set` does not contain exactly
/// one row per distinct batch index of `in_set`.
pub fn global_reduction_map(in_set: &CoordinateSet, out_set: &CoordinateSet) -> Result<KernelMap> {
    let batch_count = in_set.batch_indices().len();
    if out_set.len() != batch_count {
        return Err(Error::InvariantViolation(format!(
            "global reduction output has {} rows, input has {} batch indices",
            out_set.len(),
            batch_count
        )));
    }

    let out_rows: AHashMap<i32, u32> = out_set
        .iter()
        .enumerate()
        .map(|(row, coordinate)| (coordinate[0], row as u32))
        .collect();
    let mut map = KernelMap::with_buckets(out_set.len());
    for (in_row, coordinate) in in_set.iter().enumerate() {
        let out_row = *out_rows.get(&coordinate[0]).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "batch index {} is missing from the global reduction output",
                coordinate[0]
            ))
        })?;
        map.push(out_row as usize, in_row as u32, out_row);
    }
    Ok(map)
}

fn check_sizes(in_set: &CoordinateSet, out_set: &CoordinateSet) -> Result<()> {
    if in_set.coordinate_size() == out_set.coordinate_size() {
        Ok(())
    } else {
        Err(Error::ShapeMismatch(format!(
            "input coordinate size {} differs from output coordinate size {}",
            in_set.coordinate_size(),
            out_set.coordinate_size()
        )))
    }
}
