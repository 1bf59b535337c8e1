//! Rendering surfaces backed by allocator regions

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::block::{BlockAllocator, Region, BLOCK_HEADER_SIZE};
use crate::error::{MemoryError, Result};
use crate::{align_up, Allocator, MIN_ALIGNMENT, MIN_POOL_SIZE};

/// Pixel layout of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32-bit with alpha in the high byte
    #[default]
    Argb8888,
    /// 32-bit with the high byte forced opaque
    Xrgb8888,
}

impl PixelFormat {
    /// Bytes per pixel
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Pack a color into one pixel
    #[inline]
    pub fn pack(self, color: Color) -> u32 {
        let alpha = match self {
            Self::Argb8888 => color.a,
            Self::Xrgb8888 => 0xFF,
        };
        (alpha as u32) << 24 | (color.r as u32) << 16 | (color.g as u32) << 8 | color.b as u32
    }
}

/// 8-bit RGBA color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);
    pub const BLACK: Self = Self::rgba(0, 0, 0, 255);
    pub const WHITE: Self = Self::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// A render target whose pixel buffer lives in an allocator region
///
/// A surface does not own its memory: pixels are read and written through
/// the allocator (or pool) that produced it, and the surface goes back to
/// that same owner when the caller is done with it.
#[derive(Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    /// Pixels per row
    stride: u32,
    format: PixelFormat,
    region: Region,
}

impl Surface {
    /// Pixel buffer size for the given dimensions
    pub fn byte_size(width: u32, height: u32, format: PixelFormat) -> Result<usize> {
        let invalid = MemoryError::InvalidDimensions { width, height };
        if width == 0 || height == 0 {
            return Err(invalid);
        }
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .ok_or(invalid)
    }

    /// Allocate a surface from any arena-backed allocator
    pub fn allocate<A: Allocator + ?Sized>(
        allocator: &mut A,
        width: u32,
        height: u32,
        format: PixelFormat,
        alignment: usize,
    ) -> Result<Self> {
        let size = Self::byte_size(width, height, format)?;
        let region = allocator.allocate(size, alignment)?;
        let surface = Self {
            width,
            height,
            stride: width,
            format,
            region,
        };
        surface.clear(allocator, Color::TRANSPARENT)?;
        Ok(surface)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixels per row
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel buffer size in bytes
    pub fn byte_len(&self) -> usize {
        self.region.len()
    }

    /// Start address of the pixel buffer
    pub fn address(&self) -> usize {
        self.region.address()
    }

    /// The region holding the pixels
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Pixel buffer as packed 32-bit pixels
    pub fn pixels_mut<'a, A: Allocator + ?Sized>(&self, allocator: &'a mut A) -> Result<&'a mut [u32]> {
        let bytes = allocator.bytes_mut(&self.region)?;
        bytemuck::try_cast_slice_mut(bytes)
            .map_err(|_| MemoryError::InvalidAlignment(core::mem::align_of::<u32>()))
    }

    /// Read-only pixel view; only block allocators hand out shared views
    pub fn pixels<'a>(&self, allocator: &'a BlockAllocator) -> Result<&'a [u32]> {
        let bytes = allocator.bytes(&self.region)?;
        bytemuck::try_cast_slice(bytes)
            .map_err(|_| MemoryError::InvalidAlignment(core::mem::align_of::<u32>()))
    }

    /// Fill every pixel with `color`
    pub fn clear<A: Allocator + ?Sized>(&self, allocator: &mut A, color: Color) -> Result<()> {
        let pixel = self.format.pack(color);
        self.pixels_mut(allocator)?.fill(pixel);
        Ok(())
    }

    /// Destroy the surface, releasing its pixels back to `allocator`
    pub fn release<A: Allocator + ?Sized>(self, allocator: &mut A) -> Result<()> {
        allocator.release(self.region)
    }
}

/// A long-lived surface with an allocator of its own
///
/// Used for the presenter's front buffer and as the unpooled fallback when
/// the pool registry is full. The arena is sized for exactly this surface.
#[derive(Debug)]
pub struct DedicatedSurface {
    allocator: BlockAllocator,
    surface: Surface,
}

impl DedicatedSurface {
    /// Allocate a surface in a freshly reserved arena
    pub fn new(width: u32, height: u32, format: PixelFormat, alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment(alignment));
        }
        let size = Surface::byte_size(width, height, format)?;
        let alignment = alignment.max(MIN_ALIGNMENT);
        // Header, leading padding and the rounded-up tail
        let arena = size
            .checked_add(BLOCK_HEADER_SIZE + 2 * alignment)
            .ok_or(MemoryError::InvalidDimensions { width, height })?;
        let arena = align_up(arena, MIN_ALIGNMENT).max(MIN_POOL_SIZE);

        let mut allocator = BlockAllocator::new(arena)?;
        let surface = Surface::allocate(&mut allocator, width, height, format, alignment)?;
        log::debug!("Created dedicated {}x{} surface", width, height);

        Ok(Self { allocator, surface })
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn pixels(&self) -> Result<&[u32]> {
        self.surface.pixels(&self.allocator)
    }

    pub fn pixels_mut(&mut self) -> Result<&mut [u32]> {
        self.surface.pixels_mut(&mut self.allocator)
    }

    pub fn clear(&mut self, color: Color) -> Result<()> {
        self.surface.clear(&mut self.allocator, color)
    }

    /// Release the surface and its arena
    pub fn destroy(self) {
        log::debug!(
            "Destroying dedicated {}x{} surface",
            self.surface.width,
            self.surface.height
        );
        self.allocator.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_formats() {
        let color = Color::rgba(0x11, 0x22, 0x33, 0x44);
        assert_eq!(PixelFormat::Argb8888.pack(color), 0x4411_2233);
        assert_eq!(PixelFormat::Xrgb8888.pack(color), 0xFF11_2233);
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(Surface::byte_size(64, 64, PixelFormat::Argb8888).unwrap(), 16384);
        assert!(matches!(
            Surface::byte_size(0, 64, PixelFormat::Argb8888),
            Err(MemoryError::InvalidDimensions { width: 0, height: 64 })
        ));
    }

    #[test]
    fn test_surface_in_block_allocator() {
        let mut alloc = BlockAllocator::new(64 * 1024).unwrap();
        let surface = Surface::allocate(&mut alloc, 16, 8, PixelFormat::Argb8888, 32).unwrap();

        assert_eq!(surface.dimensions(), (16, 8));
        assert_eq!(surface.stride(), 16);
        assert_eq!(surface.byte_len(), 16 * 8 * 4);
        assert!(surface.region().is_aligned_to(32));
        assert!(surface.pixels(&alloc).unwrap().iter().all(|&p| p == 0));

        surface.clear(&mut alloc, Color::WHITE).unwrap();
        assert!(surface.pixels(&alloc).unwrap().iter().all(|&p| p == 0xFFFF_FFFF));

        surface.pixels_mut(&mut alloc).unwrap()[3] = 0x8000_00FF;
        assert_eq!(surface.pixels(&alloc).unwrap()[3], 0x8000_00FF);

        surface.release(&mut alloc).unwrap();
        assert_eq!(alloc.live_regions(), 0);
    }

    #[test]
    fn test_dedicated_front_buffer() {
        let mut front = DedicatedSurface::new(320, 240, PixelFormat::Xrgb8888, 32).unwrap();
        front.clear(Color::BLACK).unwrap();

        let pixels = front.pixels_mut().unwrap();
        assert_eq!(pixels.len(), 320 * 240);
        pixels[0] = 0xFFFF_0000;

        assert_eq!(front.pixels().unwrap()[0], 0xFFFF_0000);
        assert_eq!(front.pixels().unwrap()[1], 0xFF00_0000);
        front.destroy();
    }
}
