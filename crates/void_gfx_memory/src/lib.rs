//! # void_gfx_memory - Graphics Memory Management
//!
//! Allocators behind the software rasterizer:
//! - Block: fixed arena with first-fit, coalescing free list
//! - SIMD: block allocator locked to one vector alignment, plus a
//!   capability-selected buffer service with a heap fallback
//! - Surface pools: recycled render targets of one fixed size
//! - Registry: pools looked up by surface dimensions
//!
//! Everything here is single-threaded. Operations take `&mut self`; the
//! [`GraphicsMemory`] context is owned by the render thread and passed to
//! call sites. Enable the `shared` feature for a mutex-wrapped context if a
//! renderer really does need to cross threads.

pub mod error;
pub mod config;
pub mod block;
pub mod surface;
pub mod pool;
pub mod simd;
pub mod registry;
pub mod context;

pub use error::{ErrorKind, MemoryError, Result};
pub use config::MemoryConfig;
pub use block::{AllocatorStats, BlockAllocator, Region};
pub use surface::{Color, DedicatedSurface, PixelFormat, Surface};
pub use pool::{PoolStats, Recycle, SurfacePool};
pub use simd::{CapabilityProbe, HostProbe, SimdAllocator, SimdBuffer, SimdBuffers, SimdCapability};
pub use registry::PoolRegistry;
pub use context::{GraphicsMemory, ScratchSurface};

#[cfg(feature = "shared")]
pub use context::SharedGraphicsMemory;

/// Alignment floor for every allocation
pub const MIN_ALIGNMENT: usize = 16;

/// Smallest arena a block allocator accepts
pub const MIN_POOL_SIZE: usize = 1024;

/// Common trait for arena-backed allocators
pub trait Allocator {
    /// Allocate `size` bytes aligned to at least `align`
    fn allocate(&mut self, size: usize, align: usize) -> Result<Region>;

    /// Return a region to the allocator
    fn release(&mut self, region: Region) -> Result<()>;

    /// Mutable view of a live region
    fn bytes_mut(&mut self, region: &Region) -> Result<&mut [u8]>;

    /// Get the total capacity
    fn capacity(&self) -> usize;

    /// Get the currently used memory, block overhead included
    fn used(&self) -> usize;

    /// Get the available memory
    fn available(&self) -> usize {
        self.capacity() - self.used()
    }
}

/// Align a value up to the given alignment
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if an address is aligned
#[inline]
pub fn is_aligned(address: usize, align: usize) -> bool {
    address & (align - 1) == 0
}

pub mod prelude {
    pub use crate::{Allocator, BlockAllocator, GraphicsMemory, MemoryConfig, Region};
    pub use crate::{Color, PixelFormat, Surface, SurfacePool};
    pub use crate::{SimdBuffer, SimdBuffers, SimdCapability};
    pub use crate::{align_down, align_up, is_aligned};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(align_up(100, 16), 112);
        assert_eq!(align_up(112, 16), 112);
        assert_eq!(align_down(100, 32), 96);
        assert!(is_aligned(64, 32));
        assert!(!is_aligned(48, 32));
    }

    fn churn(allocator: &mut dyn Allocator) -> usize {
        let before = allocator.available();
        let region = allocator.allocate(200, 32).unwrap();
        assert!(region.is_aligned_to(32));
        assert!(allocator.available() < before);
        allocator.bytes_mut(&region).unwrap().fill(7);
        allocator.release(region).unwrap();
        assert_eq!(allocator.used(), 0);
        allocator.available()
    }

    #[test]
    fn test_allocator_trait_objects() {
        let mut block = BlockAllocator::with_capacity_kb(4).unwrap();
        assert_eq!(churn(&mut block), 4096);

        let mut simd = SimdAllocator::new(1024 * 1024, 64).unwrap();
        assert_eq!(churn(&mut simd), 1024 * 1024);
        assert_eq!(BlockAllocator::with_capacity_mb(1).unwrap().capacity(), 1024 * 1024);
    }
}
