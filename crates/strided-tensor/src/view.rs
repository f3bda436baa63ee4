use crate::{
    storage::TensorStorage,
    strides::{checked_numel, get_strides_from_shape, physical_unchecked},
    Tensor, TensorAllocator, TensorError,
};

/// Resolves a slice bound against a dimension, then clamps it into `[0, size]`.
fn clamp_bound(bound: isize, size: usize) -> usize {
    let size = size as isize;
    let resolved = if bound < 0 { bound + size } else { bound };
    resolved.clamp(0, size) as usize
}

impl<A: TensorAllocator> Tensor<A> {
    /// Builds a view sharing this tensor's storage.
    fn share(&self, offset: usize, shape: Vec<usize>, strides: Vec<usize>) -> Tensor<A> {
        let view = Tensor {
            storage: self.storage.acquire(),
            offset,
            shape,
            strides,
            requires_grad: self.requires_grad,
            is_leaf: true,
            grad_fn: None,
            grad: None,
            label: None,
        };
        view.debug_assert_in_bounds();
        view
    }

    fn debug_assert_in_bounds(&self) {
        if self.numel() == 0 {
            return;
        }
        let last = self
            .shape
            .iter()
            .zip(&self.strides)
            .try_fold(self.offset, |acc, (&d, &s)| acc.checked_add((d - 1).checked_mul(s)?));
        debug_assert!(
            last.is_some_and(|last| last < self.storage.len()),
            "view {:?}/{:?}@{} escapes storage of {} elements",
            self.shape,
            self.strides,
            self.offset,
            self.storage.len()
        );
    }

    /// Reshape the tensor to a new shape.
    ///
    /// The result views the same storage with freshly computed row-major strides
    /// and the same offset. A tensor whose layout is not row-major (for example a
    /// stepped slice) is first copied into new contiguous storage, so the
    /// row-major sequence of elements is always preserved.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if the new shape holds a different
    /// number of elements, [`TensorError::ShapeOverflow`] if its element count
    /// does not fit in `usize`, and [`TensorError::EmptyShape`] if it has no
    /// dimensions.
    ///
    /// # Example
    ///
    /// ```
    /// use strided_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::arange(4, CpuAllocator).unwrap();
    /// let t2 = t.reshape(&[2, 2]).unwrap();
    /// assert_eq!(t2.shape(), &[2, 2]);
    /// assert_eq!(t2.strides(), &[2, 1]);
    /// assert!(t2.storage().ptr_eq(t.storage()));
    /// ```
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor<A>, TensorError> {
        if shape.is_empty() {
            return Err(TensorError::EmptyShape { op: "reshape" });
        }
        let actual = checked_numel(shape).ok_or_else(|| TensorError::ShapeOverflow {
            op: "reshape",
            shape: shape.to_vec(),
        })?;
        if actual != self.numel() {
            return Err(TensorError::InvalidShape {
                op: "reshape",
                shape: shape.to_vec(),
                expected: self.numel(),
                actual,
            });
        }

        let contiguous;
        let source = if self.is_standard_layout() {
            self
        } else {
            log::debug!(
                "reshape: copying non-contiguous view {:?}/{:?} before reshaping",
                self.shape,
                self.strides
            );
            contiguous = self.to_standard_layout();
            &contiguous
        };

        Ok(source.share(source.offset, shape.to_vec(), get_strides_from_shape(shape)))
    }

    /// Takes a strided sub-view of the tensor.
    ///
    /// For every dimension `i`, elements `starts[i], starts[i] + steps[i], ...`
    /// up to (excluding) `ends[i]` are kept. Negative bounds count from the end of
    /// the dimension and bounds are clamped into `[0, shape[i]]`. A step larger
    /// than the dimension keeps only the element at `starts[i]`. The result shares
    /// storage with `self`.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::RankMismatch`] if any argument does not have one
    /// entry per dimension and [`TensorError::InvalidStep`] if a step is not
    /// positive.
    ///
    /// # Example
    ///
    /// ```
    /// use strided_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::arange(10, CpuAllocator).unwrap();
    /// let s = t.slice(&[2], &[8], &[2]).unwrap();
    /// assert_eq!(s.shape(), &[3]);
    /// assert_eq!(s.to_vec(), vec![2.0, 4.0, 6.0]);
    /// ```
    pub fn slice(
        &self,
        starts: &[isize],
        ends: &[isize],
        steps: &[isize],
    ) -> Result<Tensor<A>, TensorError> {
        let ndims = self.ndims();
        for args in [starts, ends, steps] {
            if args.len() != ndims {
                return Err(TensorError::RankMismatch {
                    op: "slice",
                    expected: ndims,
                    actual: args.len(),
                });
            }
        }

        let mut shape = Vec::with_capacity(ndims);
        let mut strides = Vec::with_capacity(ndims);
        let mut first = Vec::with_capacity(ndims);

        for dim in 0..ndims {
            let step = steps[dim];
            if step <= 0 {
                return Err(TensorError::InvalidStep {
                    op: "slice",
                    dim,
                    step,
                });
            }
            let step = step as usize;

            let size = self.shape[dim];
            let start = clamp_bound(starts[dim], size);
            let end = clamp_bound(ends[dim], size);

            let len = if end > start {
                (end - start).div_ceil(step)
            } else {
                0
            };
            // a dimension of length 0 or 1 is never stepped over
            let stride = if len > 1 {
                self.strides[dim]
                    .checked_mul(step)
                    .ok_or(TensorError::InvalidStep {
                        op: "slice",
                        dim,
                        step: steps[dim],
                    })?
            } else {
                self.strides[dim]
            };

            shape.push(len);
            strides.push(stride);
            first.push(start);
        }

        // an empty view never reads its offset
        let offset = if shape.contains(&0) {
            self.offset
        } else {
            physical_unchecked(self.offset, &self.strides, &first)
        };

        Ok(self.share(offset, shape, strides))
    }

    /// Copies the elements, in logical order, into a new row-major tensor.
    ///
    /// The copy has its own storage, allocated with this tensor's allocator.
    ///
    /// # Example
    ///
    /// ```
    /// use strided_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::arange_multi_dim(&[3, 4], CpuAllocator).unwrap();
    /// let s = t.slice(&[0, 1], &[3, 4], &[2, 2]).unwrap();
    /// assert!(!s.is_standard_layout());
    ///
    /// let c = s.to_standard_layout();
    /// assert!(c.is_contiguous());
    /// assert_eq!(c.to_vec(), vec![1.0, 3.0, 9.0, 11.0]);
    /// ```
    pub fn to_standard_layout(&self) -> Tensor<A> {
        let storage = TensorStorage::allocate(self.numel(), self.storage.alloc().clone());
        for (cell, value) in storage.as_cells().iter().zip(self.iter()) {
            cell.set(value);
        }
        let mut out = Tensor::from_storage(storage, &self.shape);
        out.requires_grad = self.requires_grad;
        out
    }
}
