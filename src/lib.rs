//! Coordinate maps and kernel maps for sparse convolutions.
//!
//! Sparse tensors store features only at the occupied sites of a multi-dimensional
//! integer lattice. A convolution on such a tensor needs to know, for each kernel
//! offset, which input sites contribute to which output sites. This crate maintains
//! the coordinate bookkeeping required for that:
//!
//! - A [`CoordinateSet`] holds unique coordinates `[batch, x_1, .., x_D]` and assigns
//!   them dense row indices, which align with the rows of the feature matrix.
//! - A [`KernelRegion`] enumerates neighbor offsets of a kernel with the specified size,
//!   dilation and [shape](RegionType).
//! - A [`KernelMap`] lists, per kernel offset, the (input row, output row) pairs.
//! - A [`CoordinateMapManager`] owns coordinate sets keyed by [`CoordinateMapKey`]s,
//!   derives strided, pruned, union and origin sets, and caches kernel maps between sets.
//!
//! Feature tensors themselves are out of scope: kernel maps are consumed by
//! the caller's convolution or pooling routines.
//!
//! # Implementation details
//!
//! Kernel maps are computed by a [`CoordinateMapBackend`]. The crate provides
//! the [`CpuBackend`], which performs hash-based neighbor lookups; the manager
//! is generic over the backend and rejects buffers residing on a different [`Device`].
//!
//! The crate uses [`tracing`] to report creation of coordinate sets and kernel maps
//! (on the `DEBUG` level) and coordinate map key collisions (on the `WARN` level).
//!
//! [`tracing`]: https://docs.rs/tracing/
//!
//! # Examples
//!
//! ```
//! use ndarray::arr2;
//! use sparse_coords::{CoordinateBuffer, CoordinateMapManager, KernelParams};
//!
//! # fn main() -> Result<(), sparse_coords::Error> {
//! let mut manager = CoordinateMapManager::new();
//! // Three occupied sites of a 2D lattice, all in the batch element 0.
//! let coordinates = arr2(&[[0, 0, 0], [0, 1, 1], [0, 2, 2]]);
//! let (fine, _) = manager.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "points")?;
//! // Derive the coarser set for a convolution with stride 2.
//! let (coarse, created) = manager.stride(&fine, &[2, 2])?;
//! assert!(created);
//! assert_eq!(manager.size(&coarse)?, 2);
//!
//! // Compute the kernel map for a 3x3 kernel.
//! let params = KernelParams::uniform(2, 3, 2, 1);
//! let map = manager.kernel_map(&fine, &coarse, &params)?;
//! assert_eq!(map.len(), 9);
//! // The center tap maps fine sites (0, 0) and (2, 2) to their coarse counterparts.
//! assert_eq!(map.bucket(4), Some((&[0, 2][..], &[0, 1][..])));
//!
//! // The transposed map is derived from the cached forward map.
//! let transposed = manager.kernel_map(&coarse, &fine, &params.transposed(true))?;
//! assert_eq!(transposed.bucket(4), Some((&[0, 1][..], &[0, 2][..])));
//! # Ok(())
//! # }
//! ```
//!
//! ## Global pooling
//!
//! ```
//! # use ndarray::arr2;
//! # use sparse_coords::{CoordinateBuffer, CoordinateMapManager};
//! # fn main() -> Result<(), sparse_coords::Error> {
//! let mut manager = CoordinateMapManager::new();
//! let coordinates = arr2(&[[1, 5, 5], [0, 1, 1], [1, 2, 2]]);
//! let (key, _) = manager.insert(CoordinateBuffer::cpu(&coordinates), [1, 1], "")?;
//! // Rows of the set grouped by batch index.
//! assert_eq!(manager.row_indices_per_batch(&key)?, [vec![1], vec![0, 2]]);
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/sparse-coords/0.1.0")]
#![deny(missing_docs, missing_debug_implementations)]

mod backend;
mod buffers;
mod coordinates;
mod error;
mod kernel_map;
mod key;
mod manager;
mod params;
mod region;

pub use crate::{
    backend::{CoordinateMapBackend, CpuBackend},
    buffers::{CoordinateBuffer, Device, KernelOffsets},
    coordinates::{CoordinateSet, InsertionMaps},
    error::{Error, Result},
    kernel_map::{
        global_reduction_map, kernel_map, pruned_kernel_map, stride_map, union_map, KernelMap,
    },
    key::CoordinateMapKey,
    manager::CoordinateMapManager,
    params::{KernelParams, ManagerConfig, RegionType},
    region::{KernelRegion, Offsets},
};
