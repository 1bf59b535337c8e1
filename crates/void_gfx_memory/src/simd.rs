//! SIMD-aligned allocation
//!
//! [`SimdAllocator`] is a block allocator locked to one vector alignment.
//! [`SimdBuffers`] picks the allocator matching the host's vector ISA the
//! first time a buffer is requested; hosts without AVX2 or NEON get buffers
//! from the general heap, rounded up to the fallback alignment by hand.

use std::collections::HashMap;

use crate::block::{AllocatorStats, BlockAllocator, Region};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::{align_up, Allocator, MIN_ALIGNMENT};

/// Vector instruction set available to pixel routines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimdCapability {
    /// 256-bit AVX2, needs 32-byte alignment
    Avx2,
    /// 128-bit NEON, needs 16-byte alignment
    Neon,
    /// No vector unit in use
    Scalar,
}

impl SimdCapability {
    /// Alignment vector loads and stores need, if any
    pub const fn required_alignment(self) -> Option<usize> {
        match self {
            Self::Avx2 => Some(32),
            Self::Neon => Some(16),
            Self::Scalar => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Avx2 => "avx2",
            Self::Neon => "neon",
            Self::Scalar => "scalar",
        }
    }
}

impl std::fmt::Display for SimdCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only query for the host's vector instruction set
pub trait CapabilityProbe {
    fn detect(&self) -> SimdCapability;
}

/// A fixed capability reports itself; handy for tools and tests
impl CapabilityProbe for SimdCapability {
    fn detect(&self) -> SimdCapability {
        *self
    }
}

/// Probe for the CPU this process runs on
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl CapabilityProbe for HostProbe {
    fn detect(&self) -> SimdCapability {
        detect_host()
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_host() -> SimdCapability {
    if std::arch::is_x86_feature_detected!("avx2") {
        SimdCapability::Avx2
    } else {
        SimdCapability::Scalar
    }
}

#[cfg(target_arch = "aarch64")]
fn detect_host() -> SimdCapability {
    // NEON is mandatory on AArch64
    SimdCapability::Neon
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_host() -> SimdCapability {
    SimdCapability::Scalar
}

/// Block allocator with one fixed alignment for vector data
#[derive(Debug)]
pub struct SimdAllocator {
    inner: BlockAllocator,
    alignment: usize,
}

impl SimdAllocator {
    /// Create an allocator whose every region is aligned to `alignment`
    ///
    /// Alignments below the allocator floor are raised to it.
    pub fn new(pool_size: usize, alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment(alignment));
        }
        let alignment = alignment.max(MIN_ALIGNMENT);
        let inner = BlockAllocator::new(pool_size)?;
        log::debug!(
            "Created SIMD allocator: {} byte arena, {} byte alignment",
            pool_size,
            alignment
        );
        Ok(Self { inner, alignment })
    }

    /// Allocate `size` bytes at the fixed alignment
    pub fn allocate(&mut self, size: usize) -> Result<Region> {
        self.inner.allocate(size, self.alignment)
    }

    pub fn release(&mut self, region: Region) -> Result<()> {
        self.inner.release(region)
    }

    pub fn bytes_mut(&mut self, region: &Region) -> Result<&mut [u8]> {
        self.inner.bytes_mut(region)
    }

    /// View a region as `f32` lanes
    pub fn as_f32_mut(&mut self, region: &Region) -> Result<&mut [f32]> {
        let alignment = self.alignment;
        bytemuck::try_cast_slice_mut(self.inner.bytes_mut(region)?)
            .map_err(|_| MemoryError::InvalidAlignment(alignment))
    }

    /// Raw pointer for intrinsics; see [`BlockAllocator::as_mut_ptr`]
    pub fn as_mut_ptr(&mut self, region: &Region) -> Result<*mut u8> {
        self.inner.as_mut_ptr(region)
    }

    pub fn contains(&self, region: &Region) -> bool {
        self.inner.contains(region)
    }

    /// The alignment fixed at creation
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn stats(&self) -> AllocatorStats {
        self.inner.stats()
    }

    pub fn destroy(self) {
        self.inner.destroy();
    }
}

impl Allocator for SimdAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Result<Region> {
        if !align.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment(align));
        }
        self.inner.allocate(size, align.max(self.alignment))
    }

    fn release(&mut self, region: Region) -> Result<()> {
        self.inner.release(region)
    }

    fn bytes_mut(&mut self, region: &Region) -> Result<&mut [u8]> {
        self.inner.bytes_mut(region)
    }

    fn capacity(&self) -> usize {
        self.inner.pool_size()
    }

    fn used(&self) -> usize {
        self.inner.stats().bytes_allocated
    }
}

/// Buffer handed out by [`SimdBuffers`]
#[derive(Debug, PartialEq, Eq)]
pub enum SimdBuffer {
    /// Carved from the capability-matched SIMD allocator
    Pooled(Region),
    /// Heap allocation rounded up to the fallback alignment
    Heap { address: usize, len: usize },
}

impl SimdBuffer {
    pub fn address(&self) -> usize {
        match self {
            Self::Pooled(region) => region.address(),
            Self::Heap { address, .. } => *address,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Pooled(region) => region.len(),
            Self::Heap { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_heap(&self) -> bool {
        matches!(self, Self::Heap { .. })
    }
}

/// Raw heap allocation behind an aligned fallback buffer
struct HeapBlock {
    /// The true allocation; dropping it frees everything, padding included
    raw: Box<[u8]>,
    /// Aligned start inside `raw`
    offset: usize,
    len: usize,
}

/// Fallback allocations keyed by their aligned address
struct HeapFallback {
    alignment: usize,
    live: HashMap<usize, HeapBlock>,
}

impl HeapFallback {
    fn new(alignment: usize) -> Self {
        Self {
            alignment,
            live: HashMap::new(),
        }
    }

    fn allocate(&mut self, size: usize) -> Result<SimdBuffer> {
        let total = size
            .checked_add(self.alignment)
            .ok_or(MemoryError::ArenaUnavailable(size))?;
        let mut raw = Vec::new();
        raw.try_reserve_exact(total)
            .map_err(|_| MemoryError::ArenaUnavailable(total))?;
        raw.resize(total, 0u8);
        let raw = raw.into_boxed_slice();

        let start = raw.as_ptr() as usize;
        let address = align_up(start, self.alignment);
        self.live.insert(
            address,
            HeapBlock {
                raw,
                offset: address - start,
                len: size,
            },
        );
        Ok(SimdBuffer::Heap { address, len: size })
    }

    fn release(&mut self, address: usize) -> Result<()> {
        self.live
            .remove(&address)
            .map(drop)
            .ok_or(MemoryError::UntrackedRegion { address })
    }

    fn bytes_mut(&mut self, address: usize) -> Result<&mut [u8]> {
        let block = self
            .live
            .get_mut(&address)
            .ok_or(MemoryError::UntrackedRegion { address })?;
        Ok(&mut block.raw[block.offset..block.offset + block.len])
    }
}

/// SIMD buffer service selected by detected vector ISA
///
/// The probe runs once, on the first request. AVX2 hosts get a 32-byte
/// aligned allocator, NEON hosts a 16-byte one; anything else falls back to
/// the heap.
pub struct SimdBuffers {
    probe: Box<dyn CapabilityProbe + Send>,
    capability: Option<SimdCapability>,
    allocator: Option<SimdAllocator>,
    fallback: HeapFallback,
    wide_pool_bytes: usize,
    narrow_pool_bytes: usize,
}

impl SimdBuffers {
    /// Create the service probing the host CPU
    pub fn new(config: &MemoryConfig) -> Result<Self> {
        Self::with_probe(config, Box::new(HostProbe))
    }

    /// Create the service with a custom capability probe
    pub fn with_probe(config: &MemoryConfig, probe: Box<dyn CapabilityProbe + Send>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            probe,
            capability: None,
            allocator: None,
            fallback: HeapFallback::new(config.fallback_alignment),
            wide_pool_bytes: config.wide_simd_pool_bytes,
            narrow_pool_bytes: config.narrow_simd_pool_bytes,
        })
    }

    /// Detected capability, probing on first call
    pub fn capability(&mut self) -> SimdCapability {
        if let Some(capability) = self.capability {
            return capability;
        }

        let capability = self.probe.detect();
        self.capability = Some(capability);

        let pool_bytes = match capability {
            SimdCapability::Avx2 => self.wide_pool_bytes,
            _ => self.narrow_pool_bytes,
        };
        if let Some(alignment) = capability.required_alignment() {
            match SimdAllocator::new(pool_bytes, alignment) {
                Ok(allocator) => self.allocator = Some(allocator),
                Err(e) => log::warn!(
                    "Failed to create {} allocator, using heap fallback: {}",
                    capability,
                    e
                ),
            }
        }
        log::info!("SIMD buffers: {} ({})", capability, self.backend_name());
        capability
    }

    /// Capability if the probe already ran
    pub fn detected(&self) -> Option<SimdCapability> {
        self.capability
    }

    fn backend_name(&self) -> &'static str {
        if self.allocator.is_some() {
            "pooled"
        } else {
            "heap fallback"
        }
    }

    /// Allocate an aligned buffer of `size` bytes
    pub fn alloc(&mut self, size: usize) -> Result<SimdBuffer> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        self.capability();
        match self.allocator.as_mut() {
            Some(allocator) => allocator.allocate(size).map(SimdBuffer::Pooled),
            None => self.fallback.allocate(size),
        }
    }

    /// Release a buffer to wherever it came from
    pub fn release(&mut self, buffer: SimdBuffer) -> Result<()> {
        match buffer {
            SimdBuffer::Pooled(region) => match self.allocator.as_mut() {
                Some(allocator) => allocator.release(region),
                None => Err(MemoryError::UntrackedRegion {
                    address: region.address(),
                }),
            },
            SimdBuffer::Heap { address, .. } => self.fallback.release(address),
        }
    }

    pub fn bytes_mut(&mut self, buffer: &SimdBuffer) -> Result<&mut [u8]> {
        match buffer {
            SimdBuffer::Pooled(region) => match self.allocator.as_mut() {
                Some(allocator) => allocator.bytes_mut(region),
                None => Err(MemoryError::UntrackedRegion {
                    address: region.address(),
                }),
            },
            SimdBuffer::Heap { address, .. } => self.fallback.bytes_mut(*address),
        }
    }

    /// View a buffer as `f32` lanes
    pub fn as_f32_mut(&mut self, buffer: &SimdBuffer) -> Result<&mut [f32]> {
        bytemuck::try_cast_slice_mut(self.bytes_mut(buffer)?)
            .map_err(|_| MemoryError::InvalidAlignment(core::mem::align_of::<f32>()))
    }

    /// Alignment every buffer from this service satisfies
    pub fn alignment(&mut self) -> usize {
        self.capability();
        match &self.allocator {
            Some(allocator) => allocator.alignment(),
            None => self.fallback.alignment,
        }
    }

    /// Heap fallback buffers not yet released
    pub fn live_fallback_buffers(&self) -> usize {
        self.fallback.live.len()
    }

    /// Statistics of the pooled allocator, once created
    pub fn stats(&self) -> Option<AllocatorStats> {
        self.allocator.as_ref().map(SimdAllocator::stats)
    }

    /// Drop the allocator and every fallback buffer
    pub fn shutdown(self) {
        let leaked = self.fallback.live.len();
        if leaked > 0 {
            log::warn!("Releasing {} SIMD fallback buffers at shutdown", leaked);
        }
        if let Some(allocator) = self.allocator {
            allocator.destroy();
        }
    }
}

impl std::fmt::Debug for SimdBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimdBuffers")
            .field("capability", &self.capability)
            .field("allocator", &self.allocator)
            .field("fallback_buffers", &self.fallback.live.len())
            .finish()
    }
}
