use std::alloc;
use std::alloc::Layout;
use std::cell::Cell;
use std::rc::Rc;

use thiserror::Error;

/// An error type for tensor allocator operations.
#[derive(Debug, Error, PartialEq)]
pub enum TensorAllocatorError {
    /// The requested number of elements does not fit in a valid memory layout.
    #[error("Invalid tensor layout {0}")]
    LayoutError(core::alloc::LayoutError),

    /// The element count of the requested shape does not fit in `usize`.
    #[error("Element count of shape {0:?} overflows usize")]
    CapacityOverflow(Vec<usize>),

    /// The allocator could not provide memory for the given layout.
    #[error("Out of memory: failed to allocate {} bytes", .0.size())]
    OutOfMemory(Layout),
}

impl TensorAllocatorError {
    /// Returns true if the allocator ran out of memory.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }

    /// Returns true if this error was caused by an impossible request rather than
    /// by memory pressure.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::LayoutError(_) | Self::CapacityOverflow(_))
    }

    /// Returns a user-friendly suggestion for resolving the error.
    pub fn suggestion(&self) -> &str {
        match self {
            Self::LayoutError(_) | Self::CapacityOverflow(_) => {
                "Reduce the number of elements requested for the tensor"
            }
            Self::OutOfMemory(_) => "Drop unused tensors to release their storage",
        }
    }
}

/// A trait for allocating and deallocating memory for tensors.
///
/// Every storage buffer in the crate is obtained through an implementation of this
/// trait, which makes it the single place to swap the memory backend.
///
/// # Methods
///
/// * `alloc` - Allocates memory for a tensor with the given layout.
/// * `dealloc` - Deallocates memory for a tensor with the given layout.
pub trait TensorAllocator: Clone {
    /// Allocates memory for a tensor with the given layout.
    ///
    /// The layout always has a non-zero size.
    fn alloc(&self, layout: Layout) -> Result<*mut u8, TensorAllocatorError>;

    /// Deallocates memory for a tensor with the given layout.
    fn dealloc(&self, ptr: *mut u8, layout: Layout);
}

#[derive(Clone, Debug, Default)]
/// A tensor allocator that uses the system allocator.
pub struct CpuAllocator;

impl TensorAllocator for CpuAllocator {
    /// Allocates memory for a tensor with the given layout.
    ///
    /// # Arguments
    ///
    /// * `layout` - The layout of the tensor.
    ///
    /// # Returns
    ///
    /// A non-null pointer to the allocated memory if successful, otherwise an error.
    fn alloc(&self, layout: Layout) -> Result<*mut u8, TensorAllocatorError> {
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            Err(TensorAllocatorError::OutOfMemory(layout))?
        }
        Ok(ptr)
    }

    /// Deallocates memory for a tensor with the given layout.
    ///
    /// # Arguments
    ///
    /// * `ptr` - A non-null pointer to the allocated memory.
    /// * `layout` - The layout of the tensor.
    #[allow(clippy::not_unsafe_ptr_arg_deref)]
    fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if !ptr.is_null() {
            unsafe { alloc::dealloc(ptr, layout) }
        }
    }
}

/// Counters shared by every clone of a [`TrackingAllocator`].
#[derive(Debug, Default)]
pub struct AllocationStats {
    allocs: Cell<usize>,
    deallocs: Cell<usize>,
    live_bytes: Cell<usize>,
}

impl AllocationStats {
    /// Number of successful allocations.
    pub fn allocs(&self) -> usize {
        self.allocs.get()
    }

    /// Number of deallocations.
    pub fn deallocs(&self) -> usize {
        self.deallocs.get()
    }

    /// Number of buffers allocated and not yet released.
    pub fn live(&self) -> usize {
        self.allocs.get() - self.deallocs.get()
    }

    /// Bytes currently held by live buffers.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }
}

/// An allocator that forwards to [`CpuAllocator`] and records every call.
///
/// Clones share the same [`AllocationStats`], so a test can keep one handle and
/// hand clones to the tensors under observation. A failing tracker refuses every
/// allocation, which exercises the out-of-memory paths.
#[derive(Clone, Debug, Default)]
pub struct TrackingAllocator {
    stats: Rc<AllocationStats>,
    fail: bool,
}

impl TrackingAllocator {
    /// Creates a tracker with fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker whose allocations always fail.
    pub fn failing() -> Self {
        Self {
            stats: Rc::default(),
            fail: true,
        }
    }

    /// Returns the shared counters.
    pub fn stats(&self) -> &AllocationStats {
        &self.stats
    }
}

impl TensorAllocator for TrackingAllocator {
    fn alloc(&self, layout: Layout) -> Result<*mut u8, TensorAllocatorError> {
        if self.fail {
            return Err(TensorAllocatorError::OutOfMemory(layout));
        }
        let ptr = CpuAllocator.alloc(layout)?;
        self.stats.allocs.set(self.stats.allocs.get() + 1);
        self.stats
            .live_bytes
            .set(self.stats.live_bytes.get() + layout.size());
        Ok(ptr)
    }

    fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        CpuAllocator.dealloc(ptr, layout);
        self.stats.deallocs.set(self.stats.deallocs.get() + 1);
        self.stats
            .live_bytes
            .set(self.stats.live_bytes.get() - layout.size());
    }
}

/// Terminates the process after a failed storage allocation.
///
/// All infallible constructors route their allocation errors here. Callers that
/// need to recover use the `try_*` constructors instead.
#[cold]
pub fn handle_alloc_failure(err: TensorAllocatorError) -> ! {
    log::error!("tensor storage allocation failed: {err}");
    match err {
        TensorAllocatorError::OutOfMemory(layout) => alloc::handle_alloc_error(layout),
        TensorAllocatorError::LayoutError(_) | TensorAllocatorError::CapacityOverflow(_) => {
            std::process::abort()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_allocator() -> Result<(), TensorAllocatorError> {
        let allocator = CpuAllocator;
        let layout = Layout::from_size_align(1024, 64).unwrap();
        let ptr = allocator.alloc(layout)?;
        allocator.dealloc(ptr, layout);
        Ok(())
    }

    #[test]
    fn test_tracking_allocator_counts() -> Result<(), TensorAllocatorError> {
        let allocator = TrackingAllocator::new();
        let observer = allocator.clone();
        let layout = Layout::array::<f32>(16).unwrap();

        let ptr = allocator.alloc(layout)?;
        assert_eq!(observer.stats().allocs(), 1);
        assert_eq!(observer.stats().live(), 1);
        assert_eq!(observer.stats().live_bytes(), 64);

        allocator.dealloc(ptr, layout);
        assert_eq!(observer.stats().deallocs(), 1);
        assert_eq!(observer.stats().live(), 0);
        assert_eq!(observer.stats().live_bytes(), 0);
        Ok(())
    }

    #[test]
    fn test_failing_allocator() {
        let allocator = TrackingAllocator::failing();
        let layout = Layout::array::<f32>(4).unwrap();
        let err = allocator.alloc(layout).unwrap_err();
        assert!(err.is_out_of_memory());
        assert!(!err.is_programming_error());
        assert_eq!(allocator.stats().allocs(), 0);
    }

    #[test]
    fn test_capacity_overflow_is_programming_error() {
        let err = TensorAllocatorError::CapacityOverflow(vec![1 << 32, 1 << 32]);
        assert!(err.is_programming_error());
        assert!(!err.is_out_of_memory());
        assert_eq!(
            err.to_string(),
            "Element count of shape [4294967296, 4294967296] overflows usize"
        );
    }
}
