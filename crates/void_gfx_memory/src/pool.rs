//! Surface pool - recycled render targets of one fixed size
//!
//! Per-frame rendering keeps asking for same-size scratch surfaces. The pool
//! hands back cleared surfaces from its free list and only touches its
//! allocator on a miss, so after a short warm-up the hot path performs no
//! block allocation at all.

use crate::block::{AllocatorStats, BlockAllocator, BLOCK_HEADER_SIZE};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::surface::{Color, PixelFormat, Surface};
use crate::{align_up, MIN_ALIGNMENT, MIN_POOL_SIZE};

/// What happened to a surface handed back to its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recycle {
    /// Cleared and stored for the next `get`
    Pooled,
    /// Free list was full; the surface memory was released
    Destroyed,
}

/// Pool statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// `get` served from the free list
    pub hits: u64,
    /// `get` served by a fresh allocation
    pub misses: u64,
    /// Surfaces cleared and stored for reuse
    pub recycled: u64,
    /// Surfaces released because the free list was full
    pub destroyed: u64,
    /// Surfaces refused because they did not belong here
    pub rejected: u64,
}

impl PoolStats {
    /// Fraction of `get` calls served from the free list
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fixed-size surface cache on a dedicated block allocator
pub struct SurfacePool {
    allocator: BlockAllocator,
    /// Cleared surfaces ready for reuse, bounded by `capacity`
    free: Vec<Surface>,
    capacity: usize,
    width: u32,
    height: u32,
    format: PixelFormat,
    alignment: usize,
    /// Surfaces handed out and not yet returned
    outstanding: usize,
    stats: PoolStats,
}

impl SurfacePool {
    /// Create a pool holding up to `capacity` surfaces of `width`x`height`
    pub fn new(width: u32, height: u32, capacity: usize) -> Result<Self> {
        Self::with_config(width, height, capacity, &MemoryConfig::default())
    }

    /// Create a pool using the format, alignment and overhead from `config`
    pub fn with_config(width: u32, height: u32, capacity: usize, config: &MemoryConfig) -> Result<Self> {
        config.validate()?;
        if capacity == 0 {
            return Err(MemoryError::InvalidCapacity);
        }
        let format = config.pixel_format;
        let alignment = config.effective_surface_alignment();
        let surface_size = Surface::byte_size(width, height, format)?;

        // Each surface block carries a header, leading padding and a rounded tail
        let arena = surface_size
            .checked_add(BLOCK_HEADER_SIZE + 2 * alignment)
            .and_then(|per_surface| per_surface.checked_mul(capacity))
            .and_then(|bytes| bytes.checked_add(config.pool_overhead_bytes))
            .and_then(|bytes| bytes.checked_add(MIN_ALIGNMENT))
            .ok_or(MemoryError::InvalidDimensions { width, height })?;
        let arena = align_up(arena, MIN_ALIGNMENT).max(MIN_POOL_SIZE);

        let allocator = BlockAllocator::new(arena)?;
        log::debug!(
            "Created {}x{} surface pool: capacity {}, {} byte arena",
            width,
            height,
            capacity,
            arena
        );

        Ok(Self {
            allocator,
            free: Vec::with_capacity(capacity),
            capacity,
            width,
            height,
            format,
            alignment,
            outstanding: 0,
            stats: PoolStats::default(),
        })
    }

    /// Take a surface, recycled if one is available
    pub fn get(&mut self) -> Result<Surface> {
        if let Some(surface) = self.free.pop() {
            self.stats.hits += 1;
            self.outstanding += 1;
            return Ok(surface);
        }

        let surface = Surface::allocate(
            &mut self.allocator,
            self.width,
            self.height,
            self.format,
            self.alignment,
        )?;
        self.stats.misses += 1;
        self.outstanding += 1;
        log::trace!("Surface pool {}x{} miss", self.width, self.height);
        Ok(surface)
    }

    /// Hand a surface back
    ///
    /// A matching surface is cleared and queued while the free list has room,
    /// and released otherwise. A surface of other dimensions never reaches
    /// the free list and is reported as `SurfaceMismatch`; one of matching
    /// size from another arena is refused as `ForeignSurface`. When the
    /// refused surface belongs to another allocator it rides back inside the
    /// error (see [`MemoryError::into_surface`]) so the caller can return it
    /// to its owner.
    pub fn return_surface(&mut self, surface: Surface) -> Result<Recycle> {
        let owned = self.allocator.contains(surface.region());

        if surface.dimensions() != (self.width, self.height) {
            self.stats.rejected += 1;
            let (width, height) = surface.dimensions();
            let surface = if owned {
                self.outstanding -= 1;
                surface.release(&mut self.allocator)?;
                log::warn!(
                    "Destroyed {}x{} surface returned to {}x{} pool",
                    width,
                    height,
                    self.width,
                    self.height
                );
                None
            } else {
                log::warn!(
                    "Refused {}x{} surface from another allocator in {}x{} pool",
                    width,
                    height,
                    self.width,
                    self.height
                );
                Some(Box::new(surface))
            };
            return Err(MemoryError::SurfaceMismatch {
                width,
                height,
                expected_width: self.width,
                expected_height: self.height,
                surface,
            });
        }

        if !owned {
            self.stats.rejected += 1;
            log::warn!(
                "Refused foreign surface returned to {}x{} pool",
                self.width,
                self.height
            );
            return Err(MemoryError::ForeignSurface {
                address: surface.address(),
                surface: Some(Box::new(surface)),
            });
        }

        self.outstanding -= 1;
        if self.free.len() < self.capacity {
            surface.clear(&mut self.allocator, Color::TRANSPARENT)?;
            self.free.push(surface);
            self.stats.recycled += 1;
            Ok(Recycle::Pooled)
        } else {
            surface.release(&mut self.allocator)?;
            self.stats.destroyed += 1;
            Ok(Recycle::Destroyed)
        }
    }

    /// Fill the free list ahead of the first frame; returns surfaces added
    pub fn prewarm(&mut self, count: usize) -> Result<usize> {
        let wanted = count.min(self.capacity - self.free.len());
        for _ in 0..wanted {
            let surface = Surface::allocate(
                &mut self.allocator,
                self.width,
                self.height,
                self.format,
                self.alignment,
            )?;
            self.free.push(surface);
        }
        Ok(wanted)
    }

    /// Read pixels of a surface taken from this pool
    pub fn pixels(&self, surface: &Surface) -> Result<&[u32]> {
        surface.pixels(&self.allocator)
    }

    /// Write pixels of a surface taken from this pool
    pub fn pixels_mut(&mut self, surface: &Surface) -> Result<&mut [u32]> {
        surface.pixels_mut(&mut self.allocator)
    }

    /// Fill a surface taken from this pool
    pub fn clear(&mut self, surface: &Surface, color: Color) -> Result<()> {
        surface.clear(&mut self.allocator, color)
    }

    /// Tear down the pool and its arena
    ///
    /// Surfaces still checked out are invalidated along with the arena and
    /// reported as `SurfacesOutstanding`.
    pub fn destroy(self) -> Result<()> {
        let outstanding = self.outstanding;
        log::debug!(
            "Destroying {}x{} surface pool ({} pooled, {} outstanding)",
            self.width,
            self.height,
            self.free.len(),
            outstanding
        );
        self.allocator.destroy();

        if outstanding > 0 {
            log::warn!("Surface pool destroyed with {} surfaces checked out", outstanding);
            return Err(MemoryError::SurfacesOutstanding { count: outstanding });
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Maximum surfaces kept on the free list
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Surfaces ready for reuse
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Surfaces handed out and not yet returned
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Statistics of the underlying arena
    pub fn allocator_stats(&self) -> AllocatorStats {
        self.allocator.stats()
    }
}

impl std::fmt::Debug for SurfacePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfacePool")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("capacity", &self.capacity)
            .field("free", &self.free.len())
            .field("outstanding", &self.outstanding)
            .finish()
    }
}
