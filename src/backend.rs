//! Backends computing kernel maps.

use std::fmt;

use crate::{
    buffers::Device,
    coordinates::CoordinateSet,
    error::Result,
    kernel_map::{self, KernelMap},
    region::KernelRegion,
};

/// Backend performing kernel map construction for a [`CoordinateMapManager`].
///
/// The manager owns the coordinate sets and the kernel map cache; the backend decides
/// where and how maps are computed. A backend only accepts buffers residing on
/// its [`device()`](Self::device).
///
/// [`CoordinateMapManager`]: crate::CoordinateMapManager
pub trait CoordinateMapBackend: fmt::Debug {
    /// Device the backend operates on.
    fn device(&self) -> Device;

    /// Computes the general kernel map from `in_set` to `out_set`.
    fn kernel_map(
        &self,
        in_set: &CoordinateSet,
        out_set: &CoordinateSet,
        region: &KernelRegion,
    ) -> Result<KernelMap>;

    /// Computes the stride map from `in_set` to `out_set` on the `out_tensor_stride` grid.
    fn stride_map(
        &self,
        in_set: &CoordinateSet,
        out_set: &CoordinateSet,
        out_tensor_stride: &[u32],
    ) -> Result<KernelMap>;

    /// Computes the map from `in_set` to its pruned version `out_set`.
    fn pruned_kernel_map(&self, in_set: &CoordinateSet, out_set: &CoordinateSet)
        -> Result<KernelMap>;

    /// Computes the map from `in_sets` to their union `out_set`.
    fn union_map(&self, in_sets: &[&CoordinateSet], out_set: &CoordinateSet) -> Result<KernelMap>;

    /// Computes the map from `in_set` to the origin set `out_set`.
    fn global_reduction_map(
        &self,
        in_set: &CoordinateSet,
        out_set: &CoordinateSet,
    ) -> Result<KernelMap>;
}

/// Reference backend computing kernel maps on the CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuBackend;

impl CoordinateMapBackend for CpuBackend {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn kernel_map(
        &self,
        in_set: &CoordinateSet,
        out_set: &CoordinateSet,
        region: &KernelRegion,
    ) -> Result<KernelMap> {
        kernel_map::kernel_map(in_set, out_set, region)
    }

    fn stride_map(
        &self,
        in_set: &CoordinateSet,
        out_set: &CoordinateSet,
        out_tensor_stride: &[u32],
    ) -> Result<KernelMap> {
        kernel_map::stride_map(in_set, out_set, out_tensor_stride)
    }

    fn pruned_kernel_map(
        &self,
        in_set: &CoordinateSet,
        out_set: &CoordinateSet,
    ) -> Result<KernelMap> {
        kernel_map::pruned_kernel_map(in_set, out_set)
    }

    fn union_map(&self, in_sets: &[&CoordinateSet], out_set: &CoordinateSet) -> Result<KernelMap> {
        kernel_map::union_map(in_sets, out_set)
    }

    fn global_reduction_map(
        &self,
        in_set: &CoordinateSet,
        out_set: &CoordinateSet,
    ) -> Result<KernelMap> {
        kernel_map::global_reduction_map(in_set, out_set)
    }
}
