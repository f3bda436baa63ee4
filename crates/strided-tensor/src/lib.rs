#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Overview
//!
//! `strided-tensor` models tensors as lightweight descriptors over a shared,
//! reference-counted buffer. A descriptor carries its own shape, strides and
//! offset, so reshaping and slicing produce new views without copying data.
//!
//! # Architecture
//!
//! - **TensorStorage**: reference-counted contiguous `f32` buffer
//! - **Stride/Index engine**: row-major strides and logical-to-physical translation
//! - **Tensor**: shape/stride/offset view over a storage; the unit of the public API
//! - **Views**: [`Tensor::reshape`] and [`Tensor::slice`] share storage with their source
//! - **Ops**: shape-checked elementwise operations producing freshly allocated tensors
//! - **Autograd hook**: inert [`Node`] records attached to operation results
//!
//! # Quick Start
//!
//! ```rust
//! use strided_tensor::{ops, CpuAllocator, Tensor};
//!
//! let t = Tensor::arange(9, CpuAllocator).unwrap();
//! let m = t.reshape(&[3, 3]).unwrap();
//! assert_eq!(m.get_item(&[2, 2]).unwrap(), 8.0);
//!
//! // every other element of the first row
//! let row = m.slice(&[0, 0], &[1, 3], &[1, 2]).unwrap();
//! assert_eq!(row.to_vec(), vec![0.0, 2.0]);
//!
//! // views share the storage of `t`
//! assert_eq!(t.storage().ref_count(), 3);
//!
//! let doubled = ops::add(&m, &m).unwrap();
//! assert_eq!(doubled.get_item(&[1, 1]).unwrap(), 8.0);
//! ```
//!
//! # Threading
//!
//! Reference counts are plain `Rc` counters and elements are `Cell`s, so none
//! of the types are `Send` or `Sync`. Views over the same storage may write to
//! overlapping elements; ordering those writes is left to the caller.

/// Allocator module containing memory management utilities.
///
/// This module provides the [`TensorAllocator`] trait, the default
/// [`CpuAllocator`], the [`TrackingAllocator`] used to observe allocations, and
/// the fatal out-of-memory handler.
pub mod allocator;

/// Differentiation hook recorded by operations.
pub mod autograd;

/// Elementwise tensor operations.
pub mod ops;

/// Storage module containing the reference-counted buffer.
pub mod storage;

/// Stride computation and logical-to-physical index translation.
pub mod strides;

/// Tensor module containing the tensor descriptor and error types.
///
/// This module provides the core [`tensor::Tensor`] struct and related functionality.
pub mod tensor;

/// View constructors sharing storage with their source.
pub mod view;

pub use crate::allocator::{CpuAllocator, TensorAllocator, TensorAllocatorError, TrackingAllocator};
pub use crate::autograd::{Node, OpKind};
pub use crate::storage::TensorStorage;
pub use crate::tensor::{ErrorKind, Tensor, TensorError};
