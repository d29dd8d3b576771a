//! Enumeration of kernel offsets.

use std::iter::FusedIterator;

use crate::{
    error::{Error, Result},
    params::{KernelParams, RegionType},
};

/// Offsets of the kernel taps around a center coordinate.
///
/// Offsets are expressed in coordinate units of the grid the region is applied on,
/// i.e., hypercube and hypercross taps are already scaled by the kernel dilation and
/// the tensor stride of that grid. Custom offsets are used verbatim.
///
/// The region is restartable: each call to [`iter()`](Self::iter) yields the same
/// offsets in the same order. This order defines the bucket order of kernel maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelRegion {
    region_type: RegionType,
    kernel_size: Vec<u32>,
    /// Per-dimension multiplier of tap indices: `dilation * tensor_stride`.
    steps: Vec<i32>,
    custom_offsets: Vec<i32>,
    volume: usize,
}

impl KernelRegion {
    /// Creates a region for `params` applied on a grid with the specified `tensor_stride`.
    pub fn new(params: &KernelParams, tensor_stride: &[u32]) -> Result<Self> {
        let dimension = tensor_stride.len();
        params.validate(dimension)?;

        let steps = params
            .kernel_dilation
            .iter()
            .zip(tensor_stride)
            .map(|(&dilation, &stride)| to_coordinate(u64::from(dilation) * u64::from(stride)))
            .collect::<Result<Vec<_>>>()?;

        let (custom_offsets, volume) = match params.region_type {
            RegionType::Hypercube => {
                let volume = params.kernel_size.iter().map(|&k| k as usize).product();
                (vec![], volume)
            }
            RegionType::Hypercross => {
                let arms: usize = params.kernel_size.iter().map(|&k| (k / 2) as usize).sum();
                (vec![], 2 * arms + 1)
            }
            RegionType::Custom => {
                // `validate()` guarantees that offsets are present.
                let offsets = params.offsets.as_ref().map(|offsets| offsets.to_flat_vec());
                let offsets = offsets.unwrap_or_default();
                let volume = offsets.len() / dimension.max(1);
                (offsets, volume)
            }
        };

        Ok(Self {
            region_type: params.region_type,
            kernel_size: params.kernel_size.clone(),
            steps,
            custom_offsets,
            volume,
        })
    }

    /// Gets the region type.
    pub fn region_type(&self) -> RegionType {
        self.region_type
    }

    /// Spatial dimension of the offsets.
    pub fn dimension(&self) -> usize {
        self.kernel_size.len()
    }

    /// Number of kernel taps.
    pub fn volume(&self) -> usize {
        self.volume
    }

    /// Iterates over the kernel offsets.
    pub fn iter(&self) -> Offsets<'_> {
        Offsets {
            region: self,
            index: 0,
        }
    }

    /// Writes the offset of the tap with the specified `index` into `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.volume()` or `offset` length differs from the dimension.
    pub fn offset_into(&self, index: usize, offset: &mut [i32]) {
        assert!(index < self.volume, "kernel tap index is out of bounds");
        assert_eq!(offset.len(), self.dimension());

        match self.region_type {
            RegionType::Hypercube => {
                let mut rest = index;
                for dim in (0..self.dimension()).rev() {
                    let size = self.kernel_size[dim] as usize;
                    let tap = (rest % size) as i32;
                    rest /= size;
                    offset[dim] = centered(tap, self.kernel_size[dim]) * self.steps[dim];
                }
            }

            RegionType::Hypercross => {
                offset.iter_mut().for_each(|value| *value = 0);
                if index == 0 {
                    return;
                }
                let mut rest = index - 1;
                for (dim, &size) in self.kernel_size.iter().enumerate() {
                    let arm = (size / 2) as usize;
                    if rest < 2 * arm {
                        let tap = if rest < arm {
                            -((arm - rest) as i32)
                        } else {
                            (rest - arm + 1) as i32
                        };
                        offset[dim] = tap * self.steps[dim];
                        return;
                    }
                    rest -= 2 * arm;
                }
            }

            RegionType::Custom => {
                let dimension = self.dimension();
                offset.copy_from_slice(
                    &self.custom_offsets[index * dimension..(index + 1) * dimension],
                );
            }
        }
    }
}

/// Maps a tap index along a dimension to its offset in tap units. Odd kernels are
/// centered around zero; even kernels extend in the positive direction.
fn centered(tap: i32, size: u32) -> i32 {
    if size % 2 == 1 {
        tap - (size as i32 - 1) / 2
    } else {
        tap
    }
}

pub(crate) fn to_coordinate(value: u64) -> Result<i32> {
    use std::convert::TryFrom;

    i32::try_from(value).map_err(|_| {
        Error::ShapeMismatch(format!("{} does not fit into a coordinate component", value))
    })
}

impl<'a> IntoIterator for &'a KernelRegion {
    type Item = Vec<i32>;
    type IntoIter = Offsets<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over kernel offsets returned by [`KernelRegion::iter()`].
#[derive(Debug, Clone)]
pub struct Offsets<'a> {
    region: &'a KernelRegion,
    index: usize,
}

impl Iterator for Offsets<'_> {
    type Item = Vec<i32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.region.volume {
            return None;
        }
        let mut offset = vec![0; self.region.dimension()];
        self.region.offset_into(self.index, &mut offset);
        self.index += 1;
        Some(offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.region.volume - self.index;
        (len, Some(len))
    }
}

impl ExactSizeIterator for Offsets<'_> {}

impl FusedIterator for Offsets<'_> {}
