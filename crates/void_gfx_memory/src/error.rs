//! Error types for graphics memory management

use std::path::PathBuf;
use thiserror::Error;

use crate::surface::Surface;

/// Result type for allocator, pool and registry operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Broad class of a [`MemoryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid construction or request parameters
    Configuration,
    /// No free block large enough, or no registry slot left
    Exhaustion,
    /// Integrity tag mismatch; the allocator refuses further work
    Corruption,
    /// Caller handed back something this component does not own
    Misuse,
}

/// Errors that can occur while allocating graphics memory
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Requested arena is below the minimum pool size
    #[error("Pool size {requested} is below the minimum of {minimum} bytes")]
    PoolTooSmall { requested: usize, minimum: usize },

    /// The backing arena could not be reserved
    #[error("Failed to reserve a {0} byte arena")]
    ArenaUnavailable(usize),

    /// Alignment is zero or not a power of two
    #[error("Alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    /// Zero-byte allocation request
    #[error("Zero-sized allocation requested")]
    ZeroSize,

    /// Surface width or height is zero or overflows the address space
    #[error("Invalid surface dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Pool capacity of zero
    #[error("Surface pool capacity must be non-zero")]
    InvalidCapacity,

    /// Configuration value out of range
    #[error("Invalid memory configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("Failed to read config '{path}': {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("Failed to parse memory config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// No free block fits the request
    #[error("Out of memory: no free block fits {size} bytes at alignment {alignment}")]
    Exhausted { size: usize, alignment: usize },

    /// Every registry slot is taken
    #[error("Pool registry is full ({capacity} pools)")]
    RegistryFull { capacity: usize },

    /// A block header no longer carries the integrity tag
    #[error("Allocator corrupted: integrity tag mismatch at arena offset {offset}")]
    Corrupted { offset: usize },

    /// Region was not handed out by this allocator, or was already released
    #[error("Region at address {address:#x} is not allocated by this allocator")]
    UntrackedRegion { address: usize },

    /// Surface returned to a pool configured for another size
    #[error("Surface is {width}x{height} but the pool holds {expected_width}x{expected_height}")]
    SurfaceMismatch {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
        /// The refused surface when its memory lives in another allocator
        surface: Option<Box<Surface>>,
    },

    /// Surface memory lives in another allocator
    #[error("Surface at address {address:#x} belongs to another allocator")]
    ForeignSurface {
        address: usize,
        /// The refused surface, if the caller handed over ownership
        surface: Option<Box<Surface>>,
    },

    /// Pool destroyed while surfaces were still checked out
    #[error("Surface pool destroyed with {count} surfaces still checked out")]
    SurfacesOutstanding { count: usize },
}

impl MemoryError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PoolTooSmall { .. }
            | Self::ArenaUnavailable(_)
            | Self::InvalidAlignment(_)
            | Self::ZeroSize
            | Self::InvalidDimensions { .. }
            | Self::InvalidCapacity
            | Self::InvalidConfig(_)
            | Self::ConfigIo { .. }
            | Self::ConfigParse(_) => ErrorKind::Configuration,
            Self::Exhausted { .. } | Self::RegistryFull { .. } => ErrorKind::Exhaustion,
            Self::Corrupted { .. } => ErrorKind::Corruption,
            Self::UntrackedRegion { .. }
            | Self::SurfaceMismatch { .. }
            | Self::ForeignSurface { .. }
            | Self::SurfacesOutstanding { .. } => ErrorKind::Misuse,
        }
    }

    /// True for errors a caller can recover from by falling back to another path
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Exhaustion
    }

    /// Take back a surface a pool refused, so it can go to its own allocator
    pub fn into_surface(self) -> Option<Surface> {
        match self {
            Self::SurfaceMismatch { surface, .. } | Self::ForeignSurface { surface, .. } => {
                surface.map(|surface| *surface)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(MemoryError::ZeroSize.kind(), ErrorKind::Configuration);
        assert_eq!(
            MemoryError::Exhausted { size: 64, alignment: 16 }.kind(),
            ErrorKind::Exhaustion
        );
        assert_eq!(MemoryError::Corrupted { offset: 0 }.kind(), ErrorKind::Corruption);
        assert_eq!(
            MemoryError::UntrackedRegion { address: 0x1000 }.kind(),
            ErrorKind::Misuse
        );
        assert!(MemoryError::RegistryFull { capacity: 8 }.is_recoverable());
        assert!(!MemoryError::Corrupted { offset: 0 }.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = MemoryError::PoolTooSmall { requested: 512, minimum: 1024 };
        assert_eq!(err.to_string(), "Pool size 512 is below the minimum of 1024 bytes");
    }
}
