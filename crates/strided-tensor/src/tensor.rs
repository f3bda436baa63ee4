use std::{borrow::Cow, rc::Rc};

use thiserror::Error;

use super::{
    allocator::{handle_alloc_failure, CpuAllocator, TensorAllocator, TensorAllocatorError},
    autograd::Node,
    storage::TensorStorage,
    strides::{
        checked_numel, get_strides_from_shape, is_standard_layout, logical_to_physical, numel,
        physical_unchecked, IndexIter,
    },
};

/// Broad classification of a [`TensorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A logical index is out of range.
    Index,
    /// Dimensionality or element counts disagree.
    Shape,
    /// An argument has an invalid value.
    Value,
    /// Storage could not be allocated.
    Allocation,
}

/// Error type for tensor operations.
///
/// Every variant names the operation that failed and the offending
/// dimension, index or value.
#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
    /// Index exceeds tensor bounds.
    ///
    /// Raised when an index is still outside `[0, size)` after negative indices
    /// have been resolved against the dimension size.
    #[error("{op}: index {index} out of bounds for dimension {dim} of size {size}")]
    IndexOutOfBounds {
        /// The operation that failed.
        op: &'static str,
        /// The dimension being indexed.
        dim: usize,
        /// The index as given by the caller.
        index: isize,
        /// The size of the dimension.
        size: usize,
    },

    /// The number of per-dimension arguments does not match the tensor rank.
    ///
    /// # Examples
    /// - Indexing a 2-d tensor with one index
    /// - Slicing with a `starts` array shorter than the rank
    #[error("{op}: expected {expected} per-dimension arguments, got {actual}")]
    RankMismatch {
        /// The operation that failed.
        op: &'static str,
        /// The rank of the tensor.
        expected: usize,
        /// The number of arguments received.
        actual: usize,
    },

    /// Tensor shapes incompatible for the requested operation.
    ///
    /// Elementwise operations require identical shapes; no broadcasting is done.
    #[error("{op}: shape mismatch, expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// The operation that failed.
        op: &'static str,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A shape does not hold the required number of elements.
    ///
    /// # Recommended Actions
    /// - Verify the product of shape dimensions equals the data length
    /// - Reshape only between shapes with the same element count
    #[error("{op}: element count mismatch for shape {shape:?}, expected {expected} elements, got {actual}")]
    InvalidShape {
        /// The operation that failed.
        op: &'static str,
        /// The offending shape.
        shape: Vec<usize>,
        /// Required number of elements.
        expected: usize,
        /// Number of elements found.
        actual: usize,
    },

    /// The element count of a shape does not fit in `usize`.
    #[error("{op}: element count of shape {shape:?} overflows usize")]
    ShapeOverflow {
        /// The operation that failed.
        op: &'static str,
        /// The offending shape.
        shape: Vec<usize>,
    },

    /// A shape with no dimensions was given.
    #[error("{op}: a tensor needs at least one dimension")]
    EmptyShape {
        /// The operation that failed.
        op: &'static str,
    },

    /// A slice step is zero or negative.
    #[error("{op}: step {step} for dimension {dim} must be positive")]
    InvalidStep {
        /// The operation that failed.
        op: &'static str,
        /// The dimension being sliced.
        dim: usize,
        /// The step given by the caller.
        step: isize,
    },

    /// Underlying storage allocation failed.
    ///
    /// Only returned by the `try_*` constructors; the others abort the process.
    #[error("Storage error: {0}")]
    StorageError(#[from] TensorAllocatorError),
}

impl TensorError {
    /// Returns the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexOutOfBounds { .. } => ErrorKind::Index,
            Self::RankMismatch { .. }
            | Self::DimensionMismatch { .. }
            | Self::InvalidShape { .. }
            | Self::ShapeOverflow { .. }
            | Self::EmptyShape { .. } => ErrorKind::Shape,
            Self::InvalidStep { .. } => ErrorKind::Value,
            Self::StorageError(_) => ErrorKind::Allocation,
        }
    }

    /// Returns true if this error is recoverable by freeing memory.
    pub fn is_out_of_memory(&self) -> bool {
        match self {
            Self::StorageError(e) => e.is_out_of_memory(),
            _ => false,
        }
    }

    /// Returns a user-friendly suggestion for resolving the error.
    pub fn suggestion(&self) -> &str {
        match self {
            Self::IndexOutOfBounds { .. } => {
                "Verify indices are within bounds (-size <= index < size)"
            }
            Self::RankMismatch { .. } => "Pass exactly one argument per tensor dimension",
            Self::DimensionMismatch { .. } => {
                "Check tensor shapes are identical; broadcasting is not supported"
            }
            Self::InvalidShape { .. } => {
                "Ensure the product of shape dimensions equals the number of elements"
            }
            Self::ShapeOverflow { .. } => "Use smaller dimensions",
            Self::EmptyShape { .. } => "Give the tensor at least one dimension",
            Self::InvalidStep { .. } => "Use a step of 1 or greater",
            Self::StorageError(e) => e.suggestion(),
        }
    }
}

/// A strided view over a reference-counted `f32` storage.
///
/// A tensor is a descriptor: a shared [`TensorStorage`] plus an offset, a shape
/// and one stride per dimension. Several tensors may view the same storage
/// (see [`Tensor::reshape`] and [`Tensor::slice`]); each one holds a storage
/// handle, so the buffer is freed when the last of them is dropped. Shape and
/// stride vectors are always owned by the tensor that carries them.
///
/// # Type Parameters
///
/// * `A` - The allocator backing the storage.
///
/// # Examples
///
/// ```rust
/// use strided_tensor::{CpuAllocator, Tensor};
///
/// let t = Tensor::arange_multi_dim(&[3, 3], CpuAllocator).unwrap();
/// assert_eq!(t.strides(), &[3, 1]);
/// assert_eq!(t.get_item(&[1, 2]).unwrap(), 5.0);
/// ```
pub struct Tensor<A: TensorAllocator = CpuAllocator> {
    pub(crate) storage: TensorStorage<A>,
    pub(crate) offset: usize,
    pub(crate) shape: Vec<usize>,
    pub(crate) strides: Vec<usize>,
    pub(crate) requires_grad: bool,
    pub(crate) is_leaf: bool,
    pub(crate) grad_fn: Option<Rc<Node<A>>>,
    pub(crate) grad: Option<Box<Tensor<A>>>,
    pub(crate) label: Option<Cow<'static, str>>,
}

impl<A: TensorAllocator> Tensor<A> {
    /// Wraps a whole storage as a row-major leaf tensor.
    pub(crate) fn from_storage(storage: TensorStorage<A>, shape: &[usize]) -> Self {
        debug_assert_eq!(storage.len(), numel(shape));
        Self {
            storage,
            offset: 0,
            shape: shape.to_vec(),
            strides: get_strides_from_shape(shape),
            requires_grad: false,
            is_leaf: true,
            grad_fn: None,
            grad: None,
            label: None,
        }
    }

    /// Number of storage elements needed for `shape`.
    fn storage_len(shape: &[usize]) -> Result<usize, TensorAllocatorError> {
        checked_numel(shape).ok_or_else(|| TensorAllocatorError::CapacityOverflow(shape.to_vec()))
    }

    /// Creates a zero-filled tensor of the given shape.
    ///
    /// Zero-sized dimensions are allowed and produce a tensor without elements.
    /// A shape whose element count overflows `usize` is an allocation failure
    /// and terminates the process like any other.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::EmptyShape`] if `shape` has no dimensions.
    pub fn empty(shape: &[usize], alloc: A) -> Result<Self, TensorError> {
        if shape.is_empty() {
            return Err(TensorError::EmptyShape { op: "empty" });
        }
        let len = Self::storage_len(shape).unwrap_or_else(|e| handle_alloc_failure(e));
        let storage = TensorStorage::allocate(len, alloc);
        Ok(Self::from_storage(storage, shape))
    }

    /// Like [`Tensor::empty`], but reports allocation failure instead of aborting.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::EmptyShape`] for an empty shape and
    /// [`TensorError::StorageError`] if the storage cannot be allocated.
    pub fn try_empty(shape: &[usize], alloc: A) -> Result<Self, TensorError> {
        if shape.is_empty() {
            return Err(TensorError::EmptyShape { op: "try_empty" });
        }
        let len = Self::storage_len(shape)?;
        let storage = TensorStorage::try_allocate(len, alloc)?;
        Ok(Self::from_storage(storage, shape))
    }

    /// Creates the 1-d tensor `[0, 1, ..., n - 1]`.
    ///
    /// # Example
    ///
    /// ```
    /// use strided_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::arange(5, CpuAllocator).unwrap();
    /// assert_eq!(t.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    /// assert_eq!(t.get_item(&[-1]).unwrap(), 4.0);
    /// ```
    pub fn arange(n: usize, alloc: A) -> Result<Self, TensorError> {
        let t = Self::empty(&[n], alloc)?;
        for i in 0..n {
            t.storage.write(i, i as f32);
        }
        Ok(t)
    }

    /// Creates a tensor of the given shape whose storage holds `0, 1, ...` in
    /// physical order.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::EmptyShape`] if `shape` has no dimensions.
    pub fn arange_multi_dim(shape: &[usize], alloc: A) -> Result<Self, TensorError> {
        let t = Self::empty(shape, alloc)?;
        for i in 0..t.storage.len() {
            t.storage.write(i, i as f32);
        }
        Ok(t)
    }

    /// Creates a new `Tensor` with the given shape and data.
    ///
    /// # Errors
    ///
    /// If the number of elements in the data does not match the shape of the
    /// tensor, an error is returned. A shape whose element count overflows
    /// `usize` gives [`TensorError::ShapeOverflow`].
    ///
    /// # Example
    ///
    /// ```
    /// use strided_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0], CpuAllocator).unwrap();
    /// assert_eq!(t.shape(), &[2, 2]);
    /// ```
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>, alloc: A) -> Result<Self, TensorError> {
        if shape.is_empty() {
            return Err(TensorError::EmptyShape {
                op: "from_shape_vec",
            });
        }
        let expected = checked_numel(shape).ok_or_else(|| TensorError::ShapeOverflow {
            op: "from_shape_vec",
            shape: shape.to_vec(),
        })?;
        if expected != data.len() {
            return Err(TensorError::InvalidShape {
                op: "from_shape_vec",
                shape: shape.to_vec(),
                expected,
                actual: data.len(),
            });
        }
        let storage = TensorStorage::from_vec(data, alloc);
        Ok(Self::from_storage(storage, shape))
    }

    /// Creates a new `Tensor` with every element set to `value`.
    pub fn from_shape_val(shape: &[usize], value: f32, alloc: A) -> Result<Self, TensorError> {
        let t = Self::empty(shape, alloc)?;
        t.storage.as_cells().iter().for_each(|c| c.set(value));
        Ok(t)
    }

    /// Creates a new `Tensor` with all elements set to zero.
    pub fn zeros(shape: &[usize], alloc: A) -> Result<Self, TensorError> {
        Self::empty(shape, alloc)
    }

    /// The shared storage this tensor views.
    #[inline]
    pub fn storage(&self) -> &TensorStorage<A> {
        &self.storage
    }

    /// Physical position of the first element in storage.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The size of each dimension.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The storage step for each dimension.
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// The number of dimensions.
    #[inline]
    pub fn ndims(&self) -> usize {
        self.shape.len()
    }

    /// Returns the number of elements in the tensor.
    #[inline]
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    /// Whether gradients should be tracked through this tensor.
    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Enables or disables gradient tracking.
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
    }

    /// True when the tensor was not produced by a recorded operation.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// The operation that produced this tensor, if one was recorded.
    #[inline]
    pub fn grad_fn(&self) -> Option<&Rc<Node<A>>> {
        self.grad_fn.as_ref()
    }

    /// The gradient buffer, if one was set.
    #[inline]
    pub fn grad(&self) -> Option<&Tensor<A>> {
        self.grad.as_deref()
    }

    /// Stores a gradient for this tensor.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::DimensionMismatch`] if the gradient shape differs
    /// from the tensor shape.
    pub fn set_grad(&mut self, grad: Tensor<A>) -> Result<(), TensorError> {
        if grad.shape != self.shape {
            return Err(TensorError::DimensionMismatch {
                op: "set_grad",
                expected: self.shape.clone(),
                actual: grad.shape,
            });
        }
        self.grad = Some(Box::new(grad));
        Ok(())
    }

    /// Removes and returns the gradient buffer.
    pub fn take_grad(&mut self) -> Option<Tensor<A>> {
        self.grad.take().map(|g| *g)
    }

    /// The display label, if any.
    #[inline]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Attaches a display label.
    ///
    /// Static strings are borrowed; owned strings are freed with the tensor.
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Reads the element at a logical index.
    ///
    /// Negative indices count from the end of their dimension.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::RankMismatch`] if `index.len() != self.ndims()` and
    /// [`TensorError::IndexOutOfBounds`] if any index is out of range.
    ///
    /// # Example
    ///
    /// ```
    /// use strided_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::arange(9, CpuAllocator).unwrap().reshape(&[3, 3]).unwrap();
    /// assert_eq!(t.get_item(&[2, 2]).unwrap(), 8.0);
    /// assert!(t.get_item(&[3, 0]).is_err());
    /// ```
    pub fn get_item(&self, index: &[isize]) -> Result<f32, TensorError> {
        let position =
            logical_to_physical("get_item", self.offset, &self.shape, &self.strides, index)?;
        Ok(self.storage.read(position))
    }

    /// Writes the element at a logical index.
    ///
    /// The write lands in the shared storage and is visible through every view
    /// that covers the same position.
    ///
    /// # Errors
    ///
    /// Same as [`Tensor::get_item`].
    pub fn set_item(&self, index: &[isize], value: f32) -> Result<(), TensorError> {
        let position =
            logical_to_physical("set_item", self.offset, &self.shape, &self.strides, index)?;
        self.storage.write(position, value);
        Ok(())
    }

    /// Checks if the tensor has a row-major memory layout.
    ///
    /// The offset is not considered; see [`Tensor::is_contiguous`].
    pub fn is_standard_layout(&self) -> bool {
        is_standard_layout(&self.shape, &self.strides)
    }

    /// True when the tensor is row-major, starts at offset 0 and spans its whole
    /// storage, so that logical order and physical order coincide.
    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.numel() == self.storage.len() && self.is_standard_layout()
    }

    /// Returns an iterator over the elements in logical (row-major) order.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        IndexIter::new(&self.shape).map(move |index| {
            self.storage
                .read(physical_unchecked(self.offset, &self.strides, &index))
        })
    }

    /// Copies the elements, in logical order, into a vector.
    pub fn to_vec(&self) -> Vec<f32> {
        self.iter().collect()
    }

    /// Apply a function to each element of the tensor.
    ///
    /// The result is a fresh row-major tensor allocated with this tensor's allocator.
    ///
    /// # Example
    ///
    /// ```
    /// use strided_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::arange(4, CpuAllocator).unwrap();
    /// let t2 = t.map(|x| x + 1.0);
    /// assert_eq!(t2.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    /// ```
    pub fn map<F>(&self, f: F) -> Tensor<A>
    where
        F: Fn(f32) -> f32,
    {
        let out = Self::from_storage(
            TensorStorage::allocate(self.numel(), self.storage.alloc().clone()),
            &self.shape,
        );
        for (cell, value) in out.storage.as_cells().iter().zip(self.iter()) {
            cell.set(f(value));
        }
        out
    }

    /// Perform an element-wise operation on two tensors.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::DimensionMismatch`] if the shapes differ.
    ///
    /// # Example
    ///
    /// ```
    /// use strided_tensor::{CpuAllocator, Tensor};
    ///
    /// let t1 = Tensor::arange(4, CpuAllocator).unwrap();
    /// let t2 = Tensor::from_shape_val(&[4], 2.0, CpuAllocator).unwrap();
    ///
    /// let t3 = t1.element_wise_op(&t2, |a, b| a * b).unwrap();
    /// assert_eq!(t3.to_vec(), vec![0.0, 2.0, 4.0, 6.0]);
    /// ```
    pub fn element_wise_op<F>(&self, other: &Tensor<A>, op: F) -> Result<Tensor<A>, TensorError>
    where
        F: Fn(f32, f32) -> f32,
    {
        self.zip_with("element_wise_op", other, op)
    }

    pub(crate) fn zip_with<F>(
        &self,
        op_name: &'static str,
        other: &Tensor<A>,
        op: F,
    ) -> Result<Tensor<A>, TensorError>
    where
        F: Fn(f32, f32) -> f32,
    {
        if self.shape != other.shape {
            return Err(TensorError::DimensionMismatch {
                op: op_name,
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }

        let out = Self::from_storage(
            TensorStorage::allocate(self.numel(), self.storage.alloc().clone()),
            &self.shape,
        );
        let cells = out.storage.as_cells();

        if self.is_contiguous() && other.is_contiguous() {
            let lhs = self.storage.as_cells();
            let rhs = other.storage.as_cells();
            for ((o, a), b) in cells.iter().zip(lhs).zip(rhs) {
                o.set(op(a.get(), b.get()));
            }
        } else {
            log::debug!("{op_name}: strided operand, iterating by logical index");
            for (o, (a, b)) in cells.iter().zip(self.iter().zip(other.iter())) {
                o.set(op(a, b));
            }
        }

        Ok(out)
    }

    /// Drops the tensor, releasing its storage handle.
    ///
    /// Equivalent to `drop(tensor)`; the storage buffer is freed if this was the
    /// last tensor viewing it. Shape, strides, gradient, `grad_fn` and an owned
    /// label go with it.
    pub fn free(self) {
        log::trace!(
            "freeing tensor {:?} (storage ref_count {})",
            self.shape,
            self.storage.ref_count()
        );
        drop(self)
    }
}

impl<A: TensorAllocator> Clone for Tensor<A> {
    /// Creates another view with the same metadata over the same storage.
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.acquire(),
            offset: self.offset,
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            requires_grad: self.requires_grad,
            is_leaf: self.is_leaf,
            grad_fn: self.grad_fn.clone(),
            grad: self.grad.clone(),
            label: self.label.clone(),
        }
    }
}

impl<A: TensorAllocator> std::fmt::Debug for Tensor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("label", &self.label)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .field("storage", &self.storage)
            .field("requires_grad", &self.requires_grad)
            .field("is_leaf", &self.is_leaf)
            .field("grad_fn", &self.grad_fn)
            .finish()
    }
}

impl<A: TensorAllocator> Tensor<A> {
    fn fmt_dim(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        dim: usize,
        index: &mut [usize],
    ) -> std::fmt::Result {
        let last = dim + 1 == self.ndims();
        write!(f, "[")?;
        for i in 0..self.shape[dim] {
            if i > 0 {
                if last {
                    write!(f, ", ")?;
                } else {
                    let newlines = "\n".repeat(self.ndims() - dim - 1);
                    write!(f, ",{newlines}{}", " ".repeat(dim + 1))?;
                }
            }
            index[dim] = i;
            if last {
                let position = physical_unchecked(self.offset, &self.strides, index);
                write!(f, "{}", self.storage.read(position))?;
            } else {
                self.fmt_dim(f, dim + 1, index)?;
            }
        }
        write!(f, "]")
    }
}

impl<A: TensorAllocator> std::fmt::Display for Tensor<A> {
    /// Prints the elements as nested brackets in logical order.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{label}: ")?;
        }
        let mut index = vec![0; self.ndims()];
        self.fmt_dim(f, 0, &mut index)
    }
}
