//! Reference-counted storage shared by tensor views.
//!
//! A [`TensorStorage`] is a handle to one contiguous `f32` buffer. Cloning the
//! handle (see [`TensorStorage::acquire`]) increments the reference count and
//! dropping it decrements the count; the buffer goes back to its allocator
//! exactly once, when the last handle is dropped.
//!
//! Elements live in [`Cell`]s, so every view holding a handle may read and
//! write the buffer through a shared reference. Nothing arbitrates between
//! views whose windows overlap: a write through one view is immediately
//! visible through all others, and ordering such writes is the caller's job.

use std::{alloc::Layout, cell::Cell, ptr::NonNull, rc::Rc};

use crate::allocator::{handle_alloc_failure, CpuAllocator, TensorAllocator, TensorAllocatorError};

/// Inner storage record that owns the buffer.
///
/// This is wrapped in an `Rc`; its `Drop` is the single release path.
struct StorageImpl<A: TensorAllocator> {
    /// The pointer to the buffer, dangling when `len == 0`.
    ptr: NonNull<Cell<f32>>,
    /// The number of elements in the buffer.
    len: usize,
    /// The memory layout used for allocation.
    layout: Layout,
    /// The allocator that produced the buffer and will release it.
    alloc: A,
}

impl<A: TensorAllocator> Drop for StorageImpl<A> {
    fn drop(&mut self) {
        log::trace!("releasing storage of {} elements", self.len);
        if self.layout.size() != 0 {
            self.alloc
                .dealloc(self.ptr.as_ptr() as *mut u8, self.layout);
        }
    }
}

/// Reference-counted `f32` buffer backing one or more tensor views.
///
/// The count is a plain (non-atomic) `Rc` counter, so the type is neither
/// `Send` nor `Sync`.
pub struct TensorStorage<A: TensorAllocator = CpuAllocator> {
    inner: Rc<StorageImpl<A>>,
}

impl<A: TensorAllocator> TensorStorage<A> {
    /// Allocates a zero-filled buffer of `len` elements with a reference count of one.
    ///
    /// Allocation failure is not recoverable here: the process is terminated through
    /// [`handle_alloc_failure`]. Use [`TensorStorage::try_allocate`] to observe the error.
    pub fn allocate(len: usize, alloc: A) -> Self {
        Self::try_allocate(len, alloc).unwrap_or_else(|e| handle_alloc_failure(e))
    }

    /// Allocates a zero-filled buffer of `len` elements, returning allocation errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout overflows or the allocator is out of memory.
    pub fn try_allocate(len: usize, alloc: A) -> Result<Self, TensorAllocatorError> {
        let layout = Layout::array::<f32>(len).map_err(TensorAllocatorError::LayoutError)?;

        let ptr = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            let raw = alloc.alloc(layout)? as *mut Cell<f32>;
            NonNull::new(raw).ok_or(TensorAllocatorError::OutOfMemory(layout))?
        };

        // SAFETY: ptr is valid for `len` writes of `Cell<f32>` (same layout as f32).
        unsafe {
            for i in 0..len {
                ptr.as_ptr().add(i).write(Cell::new(0.0));
            }
        }

        log::trace!("allocated storage of {len} elements");

        Ok(Self {
            inner: Rc::new(StorageImpl {
                ptr,
                len,
                layout,
                alloc,
            }),
        })
    }

    /// Creates a storage holding a copy of `data`.
    pub fn from_vec(data: Vec<f32>, alloc: A) -> Self {
        let storage = Self::allocate(data.len(), alloc);
        for (cell, value) in storage.as_cells().iter().zip(data) {
            cell.set(value);
        }
        storage
    }

    /// Returns the buffer as a slice of cells.
    #[inline]
    pub fn as_cells(&self) -> &[Cell<f32>] {
        // SAFETY: ptr is valid and initialized for `len` elements for as long as
        // the inner record is alive, which `&self` guarantees.
        unsafe { std::slice::from_raw_parts(self.inner.ptr.as_ptr(), self.inner.len) }
    }

    /// Reads the element at physical position `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`. Callers reach this only after logical
    /// bounds have been validated, so a failure here is a bug.
    #[inline]
    pub fn read(&self, index: usize) -> f32 {
        assert!(
            index < self.inner.len,
            "storage read at {index} out of range for storage of {} elements",
            self.inner.len
        );
        self.as_cells()[index].get()
    }

    /// Writes `value` at physical position `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[inline]
    pub fn write(&self, index: usize, value: f32) {
        assert!(
            index < self.inner.len,
            "storage write at {index} out of range for storage of {} elements",
            self.inner.len
        );
        self.as_cells()[index].set(value);
    }

    /// Returns a new handle to the same buffer, incrementing the reference count.
    #[inline]
    pub fn acquire(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Gives up this handle. The buffer is freed if it was the last one.
    #[inline]
    pub fn release(self) {
        drop(self)
    }

    /// Returns the number of live handles to the buffer.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Returns true if this is the only handle to the buffer.
    #[inline]
    pub fn is_unique(&self) -> bool {
        Rc::strong_count(&self.inner) == 1
    }

    /// Returns true if both handles point to the same buffer.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the number of elements in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Returns true if the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Returns the allocator that owns the buffer.
    #[inline]
    pub fn alloc(&self) -> &A {
        &self.inner.alloc
    }

    /// Copies the buffer, in physical order, into a vector.
    pub fn to_vec(&self) -> Vec<f32> {
        self.as_cells().iter().map(Cell::get).collect()
    }
}

impl<A: TensorAllocator> Clone for TensorStorage<A> {
    /// Same as [`TensorStorage::acquire`].
    fn clone(&self) -> Self {
        self.acquire()
    }
}

impl<A: TensorAllocator> std::fmt::Debug for TensorStorage<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorStorage")
            .field("ptr", &self.inner.ptr)
            .field("len", &self.inner.len)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
