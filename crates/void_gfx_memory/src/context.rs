//! Graphics memory context
//!
//! Owns the pool registry and the SIMD buffer service. Built once when the
//! renderer starts, passed by `&mut` to whatever draws, and torn down with
//! [`GraphicsMemory::shutdown`].

use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::pool::{Recycle, SurfacePool};
use crate::registry::PoolRegistry;
use crate::simd::{CapabilityProbe, SimdBuffer, SimdBuffers, SimdCapability};
use crate::surface::{Color, DedicatedSurface, Surface};

/// Scratch surface from [`GraphicsMemory::acquire_surface`]
#[derive(Debug)]
pub enum ScratchSurface {
    /// Taken from the registry pool for its size
    Pooled(Surface),
    /// Registry was full; backed by its own arena
    Dedicated(DedicatedSurface),
}

impl ScratchSurface {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Pooled(surface) => surface.dimensions(),
            Self::Dedicated(dedicated) => dedicated.surface().dimensions(),
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, Self::Pooled(_))
    }
}

/// Single-threaded graphics memory context
#[derive(Debug)]
pub struct GraphicsMemory {
    config: MemoryConfig,
    registry: PoolRegistry,
    simd: SimdBuffers,
}

impl GraphicsMemory {
    /// Create a context probing the host CPU for SIMD support
    pub fn new(config: MemoryConfig) -> Result<Self> {
        let simd = SimdBuffers::new(&config)?;
        Ok(Self::assemble(config, simd))
    }

    /// Create a context with a custom capability probe
    pub fn with_probe(config: MemoryConfig, probe: Box<dyn CapabilityProbe + Send>) -> Result<Self> {
        let simd = SimdBuffers::with_probe(&config, probe)?;
        Ok(Self::assemble(config, simd))
    }

    fn assemble(config: MemoryConfig, simd: SimdBuffers) -> Self {
        log::info!(
            "Graphics memory ready: {} pool slots, {} surfaces per pool",
            config.registry_capacity,
            config.default_pool_capacity
        );
        Self {
            registry: PoolRegistry::new(config.clone()),
            config,
            simd,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// Pool for `width`x`height`, created on first use
    pub fn surface_pool(&mut self, width: u32, height: u32) -> Result<&mut SurfacePool> {
        self.registry.get_or_create(width, height)
    }

    /// Scratch surface of `width`x`height`
    ///
    /// Served from the registry pool for that size; when the registry is
    /// full the surface gets a dedicated arena instead.
    pub fn acquire_surface(&mut self, width: u32, height: u32) -> Result<ScratchSurface> {
        match self.registry.get_or_create(width, height) {
            Ok(pool) => pool.get().map(ScratchSurface::Pooled),
            Err(MemoryError::RegistryFull { .. }) => {
                log::debug!("Unpooled {}x{} scratch surface", width, height);
                self.front_buffer(width, height).map(ScratchSurface::Dedicated)
            }
            Err(e) => Err(e),
        }
    }

    /// Hand a scratch surface back
    pub fn release_surface(&mut self, scratch: ScratchSurface) -> Result<Recycle> {
        match scratch {
            ScratchSurface::Pooled(surface) => {
                let (width, height) = surface.dimensions();
                match self.registry.get(width, height) {
                    Some(pool) => pool.return_surface(surface),
                    None => Err(MemoryError::ForeignSurface {
                        address: surface.address(),
                        surface: Some(Box::new(surface)),
                    }),
                }
            }
            ScratchSurface::Dedicated(dedicated) => {
                dedicated.destroy();
                Ok(Recycle::Destroyed)
            }
        }
    }

    /// Pixels of a scratch surface
    pub fn pixels_mut<'a>(&'a mut self, scratch: &'a mut ScratchSurface) -> Result<&'a mut [u32]> {
        match scratch {
            ScratchSurface::Pooled(surface) => {
                let (width, height) = surface.dimensions();
                let pool = self
                    .registry
                    .get(width, height)
                    .ok_or(MemoryError::ForeignSurface {
                        address: surface.address(),
                        surface: None,
                    })?;
                pool.pixels_mut(surface)
            }
            ScratchSurface::Dedicated(dedicated) => dedicated.pixels_mut(),
        }
    }

    /// Fill a scratch surface
    pub fn clear(&mut self, scratch: &mut ScratchSurface, color: Color) -> Result<()> {
        match scratch {
            ScratchSurface::Pooled(surface) => {
                let (width, height) = surface.dimensions();
                match self.registry.get(width, height) {
                    Some(pool) => pool.clear(surface, color),
                    None => Err(MemoryError::ForeignSurface {
                        address: surface.address(),
                        surface: None,
                    }),
                }
            }
            ScratchSurface::Dedicated(dedicated) => dedicated.clear(color),
        }
    }

    /// Long-lived surface outside every pool, e.g. the presenter front buffer
    pub fn front_buffer(&self, width: u32, height: u32) -> Result<DedicatedSurface> {
        DedicatedSurface::new(
            width,
            height,
            self.config.pixel_format,
            self.config.effective_surface_alignment(),
        )
    }

    /// SIMD capability, probed on first use
    pub fn simd_capability(&mut self) -> SimdCapability {
        self.simd.capability()
    }

    /// Vector-aligned scratch buffer
    pub fn simd_alloc(&mut self, size: usize) -> Result<SimdBuffer> {
        self.simd.alloc(size)
    }

    pub fn simd_release(&mut self, buffer: SimdBuffer) -> Result<()> {
        self.simd.release(buffer)
    }

    pub fn simd_bytes_mut(&mut self, buffer: &SimdBuffer) -> Result<&mut [u8]> {
        self.simd.bytes_mut(buffer)
    }

    pub fn simd_f32_mut(&mut self, buffer: &SimdBuffer) -> Result<&mut [f32]> {
        self.simd.as_f32_mut(buffer)
    }

    pub fn simd(&self) -> &SimdBuffers {
        &self.simd
    }

    /// Tear down every pool and SIMD allocator
    pub fn shutdown(mut self) {
        let dirty = self.registry.cleanup();
        if dirty > 0 {
            log::warn!("{} surface pools had surfaces outstanding at shutdown", dirty);
        }
        self.simd.shutdown();
        log::info!("Graphics memory shut down");
    }
}

/// Mutex-wrapped context for renderers that draw from several threads
///
/// The plain [`GraphicsMemory`] is single-threaded; this wrapper serializes
/// every call through one lock.
#[cfg(feature = "shared")]
#[derive(Debug, Clone)]
pub struct SharedGraphicsMemory(std::sync::Arc<parking_lot::Mutex<GraphicsMemory>>);

#[cfg(feature = "shared")]
impl SharedGraphicsMemory {
    pub fn new(memory: GraphicsMemory) -> Self {
        Self(std::sync::Arc::new(parking_lot::Mutex::new(memory)))
    }

    /// Lock the context for the duration of the guard
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, GraphicsMemory> {
        self.0.lock()
    }
}
