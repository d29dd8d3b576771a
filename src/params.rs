//! Kernel geometry and manager parameters.

use crate::{
    buffers::KernelOffsets,
    error::{Error, Result},
};

/// Configuration of a [`CoordinateMapManager`](crate::CoordinateMapManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerConfig {
    /// Seed for generating identifiers of derived coordinate maps and resolving key
    /// collisions. If `None`, a random seed is used.
    pub identifier_seed: Option<u64>,
    /// Number of random alphanumeric chars appended to generated identifiers.
    pub identifier_suffix_len: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            identifier_seed: None,
            identifier_suffix_len: 8,
        }
    }
}

/// Shape of the kernel neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionType {
    /// Full Cartesian product of per-dimension kernel taps.
    Hypercube,
    /// Axis-aligned taps only: the center plus the taps along each axis.
    Hypercross,
    /// Explicit offset list supplied with [`KernelParams::with_custom_offsets()`].
    Custom,
}

impl Default for RegionType {
    fn default() -> Self {
        RegionType::Hypercube
    }
}

/// Geometry of a convolution or pooling kernel.
///
/// All vector fields have one entry per spatial dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParams {
    /// Number of kernel taps along spatial dimensions.
    pub kernel_size: Vec<u32>,
    /// Kernel strides along spatial dimensions.
    pub kernel_stride: Vec<u32>,
    /// Kernel dilation along spatial dimensions.
    pub kernel_dilation: Vec<u32>,
    /// Shape of the kernel neighborhood.
    pub region_type: RegionType,
    /// Offsets for [`RegionType::Custom`]. Ignored for other region types.
    pub offsets: Option<KernelOffsets>,
    /// Whether the map is requested for a transposed convolution.
    pub is_transpose: bool,
    /// Whether the map is requested for pooling.
    pub is_pool: bool,
}

impl KernelParams {
    /// Creates hypercube kernel params with the specified size, stride and dilation.
    pub fn new(
        kernel_size: impl Into<Vec<u32>>,
        kernel_stride: impl Into<Vec<u32>>,
        kernel_dilation: impl Into<Vec<u32>>,
    ) -> Self {
        Self {
            kernel_size: kernel_size.into(),
            kernel_stride: kernel_stride.into(),
            kernel_dilation: kernel_dilation.into(),
            region_type: RegionType::Hypercube,
            offsets: None,
            is_transpose: false,
            is_pool: false,
        }
    }

    /// Creates params with the same size, stride and dilation along all `dimension`s.
    pub fn uniform(dimension: usize, size: u32, stride: u32, dilation: u32) -> Self {
        Self::new(
            vec![size; dimension],
            vec![stride; dimension],
            vec![dilation; dimension],
        )
    }

    /// Sets the region type.
    pub fn with_region_type(mut self, region_type: RegionType) -> Self {
        self.region_type = region_type;
        self
    }

    /// Switches to [`RegionType::Custom`] with the provided offsets.
    pub fn with_custom_offsets(mut self, offsets: KernelOffsets) -> Self {
        self.region_type = RegionType::Custom;
        self.offsets = Some(offsets);
        self
    }

    /// Sets the transpose flag.
    pub fn transposed(mut self, is_transpose: bool) -> Self {
        self.is_transpose = is_transpose;
        self
    }

    /// Sets the pooling flag.
    pub fn pooling(mut self, is_pool: bool) -> Self {
        self.is_pool = is_pool;
        self
    }

    /// Spatial dimension of the kernel.
    pub fn dimension(&self) -> usize {
        self.kernel_size.len()
    }

    /// Checks whether the pooling fast path applies.
    pub fn is_stride_pooling(&self) -> bool {
        self.is_pool && self.kernel_stride == self.kernel_size
    }

    /// Checks that the geometry is consistent and matches the spatial `dimension`.
    pub(crate) fn validate(&self, dimension: usize) -> Result<()> {
        let lengths = [
            ("kernel_size", self.kernel_size.len()),
            ("kernel_stride", self.kernel_stride.len()),
            ("kernel_dilation", self.kernel_dilation.len()),
        ];
        for &(name, len) in &lengths {
            if len != dimension {
                return Err(Error::ShapeMismatch(format!(
                    "{} has {} entries, coordinates have {} spatial dimensions",
                    name, len, dimension
                )));
            }
        }

        let all_positive = self
            .kernel_size
            .iter()
            .chain(&self.kernel_stride)
            .chain(&self.kernel_dilation)
            .all(|&value| value > 0);
        if !all_positive {
            return Err(Error::ShapeMismatch(format!(
                "kernel geometry must be positive: size {:?}, stride {:?}, dilation {:?}",
                self.kernel_size, self.kernel_stride, self.kernel_dilation
            )));
        }

        if self.region_type == RegionType::Custom {
            match &self.offsets {
                None => {
                    return Err(Error::ShapeMismatch(
                        "custom region requires kernel offsets".to_owned(),
                    ));
                }
                Some(offsets) if offsets.dimension() != dimension => {
                    return Err(Error::ShapeMismatch(format!(
                        "kernel offsets have {} spatial dimensions, expected {}",
                        offsets.dimension(),
                        dimension
                    )));
                }
                Some(_) => { /* ok */ }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;

    #[test]
    fn builder_methods() {
        let params = KernelParams::uniform(3, 2, 2, 1).pooling(true);
        assert_eq!(params.kernel_size, [2, 2, 2]);
        assert_eq!(params.dimension(), 3);
        assert!(params.is_stride_pooling());
        assert!(!params.transposed(true).pooling(false).is_stride_pooling());

        let params = KernelParams::new([3, 3], [1, 1], [1, 1])
            .with_custom_offsets(KernelOffsets::cpu(arr2(&[[0, 0], [1, 0]])));
        assert_eq!(params.region_type, RegionType::Custom);
        assert!(params.validate(2).is_ok());
    }

    #[test]
    fn validation_errors() {
        let params = KernelParams::new([3, 3], [1], [1, 1]);
        assert!(matches!(
            params.validate(2),
            Err(Error::ShapeMismatch(msg)) if msg.starts_with("kernel_stride")
        ));
        assert!(matches!(
            KernelParams::uniform(2, 3, 1, 1).validate(3),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(
            KernelParams::uniform(2, 0, 1, 1).validate(2),
            Err(Error::ShapeMismatch(_))
        ));

        let params = KernelParams::uniform(2, 3, 1, 1).with_region_type(RegionType::Custom);
        assert!(matches!(params.validate(2), Err(Error::ShapeMismatch(_))));

        let params = KernelParams::uniform(2, 3, 1, 1)
            .with_custom_offsets(KernelOffsets::cpu(arr2(&[[0, 0, 0]])));
        assert!(matches!(params.validate(2), Err(Error::ShapeMismatch(_))));
    }
}
