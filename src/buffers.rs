//! Device-tagged coordinate buffers.

use ndarray::{Array2, ArrayView2};

use std::fmt;

use crate::error::{Error, Result};

/// Device holding a buffer or executing a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Host memory.
    Cpu,
    /// GPU memory on the device with the specified ordinal.
    Gpu(u32),
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => formatter.write_str("cpu"),
            Device::Gpu(ordinal) => write!(formatter, "gpu:{}", ordinal),
        }
    }
}

impl Device {
    /// Checks that a buffer on `actual` device may be consumed on this device.
    pub(crate) fn check(self, actual: Device) -> Result<()> {
        if self == actual {
            Ok(())
        } else {
            Err(Error::DeviceMismatch {
                expected: self,
                actual,
            })
        }
    }
}

/// Batch of coordinates, i.e., the input of [`insert()`].
///
/// Internally, a `CoordinateBuffer` is a thin wrapper around [`ArrayView2`]
/// that additionally indicates the device the coordinates reside on. The array
/// has shape `(N, D + 1)`: each row is a batch index followed by `D` spatial
/// components.
///
/// [`insert()`]: crate::CoordinateMapManager::insert()
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateBuffer<'a> {
    inner: ArrayView2<'a, i32>,
    device: Device,
}

impl<'a> CoordinateBuffer<'a> {
    /// Wraps coordinates residing in host memory.
    pub fn cpu(array: impl Into<ArrayView2<'a, i32>>) -> Self {
        Self::on(Device::Cpu, array)
    }

    /// Wraps coordinates residing on the specified device.
    pub fn on(device: Device, array: impl Into<ArrayView2<'a, i32>>) -> Self {
        Self {
            inner: array.into(),
            device,
        }
    }

    /// Gets the device of this buffer.
    pub fn device(self) -> Device {
        self.device
    }

    /// Number of coordinates in the buffer.
    pub fn len(self) -> usize {
        self.inner.nrows()
    }

    /// Checks whether the buffer contains no coordinates.
    pub fn is_empty(self) -> bool {
        self.inner.nrows() == 0
    }

    /// Number of components in each coordinate, `D + 1`.
    pub fn coordinate_size(self) -> usize {
        self.inner.ncols()
    }

    /// Gets the underlying array view.
    pub fn view(self) -> ArrayView2<'a, i32> {
        self.inner
    }
}

/// Custom kernel offsets, a `(K, D)` array of spatial offsets tagged with a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelOffsets {
    inner: Array2<i32>,
    device: Device,
}

impl KernelOffsets {
    /// Creates offsets residing in host memory.
    pub fn cpu(offsets: Array2<i32>) -> Self {
        Self::on(Device::Cpu, offsets)
    }

    /// Creates offsets residing on the specified device.
    pub fn on(device: Device, offsets: Array2<i32>) -> Self {
        Self {
            inner: offsets,
            device,
        }
    }

    /// Gets the device of the offsets.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Number of offsets.
    pub fn len(&self) -> usize {
        self.inner.nrows()
    }

    /// Checks whether there are no offsets.
    pub fn is_empty(&self) -> bool {
        self.inner.nrows() == 0
    }

    /// Spatial dimension of the offsets.
    pub fn dimension(&self) -> usize {
        self.inner.ncols()
    }

    /// Gets the offsets array.
    pub fn view(&self) -> ArrayView2<'_, i32> {
        self.inner.view()
    }

    pub(crate) fn to_flat_vec(&self) -> Vec<i32> {
        self.inner.iter().copied().collect()
    }
}
