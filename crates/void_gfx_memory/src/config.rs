//! Memory configuration
//!
//! Tunables for pools, the registry and the SIMD buffer service. Loaded once
//! at startup, typically from a JSON file shipped next to the renderer:
//!
//! ```json
//! {
//!     "registry_capacity": 8,
//!     "default_pool_capacity": 16,
//!     "pool_overhead_bytes": 1048576,
//!     "surface_alignment": 32
//! }
//! ```
//!
//! Missing fields fall back to [`MemoryConfig::default`].

use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::surface::PixelFormat;
use crate::{MIN_ALIGNMENT, MIN_POOL_SIZE};

/// Memory subsystem configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of surface pools the registry holds
    pub registry_capacity: usize,

    /// Surfaces kept per pool created by the registry
    pub default_pool_capacity: usize,

    /// Extra arena bytes reserved per pool beyond its surfaces
    pub pool_overhead_bytes: usize,

    /// Alignment of surface pixel buffers
    pub surface_alignment: usize,

    /// Pixel format for pooled surfaces
    pub pixel_format: PixelFormat,

    /// Arena size for the 32-byte (AVX2) SIMD allocator
    pub wide_simd_pool_bytes: usize,

    /// Arena size for the 16-byte (NEON) SIMD allocator
    pub narrow_simd_pool_bytes: usize,

    /// Alignment used by the heap fallback when no vector ISA is detected
    pub fallback_alignment: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            registry_capacity: 8,
            default_pool_capacity: 16,
            pool_overhead_bytes: 1024 * 1024,
            surface_alignment: 32,
            pixel_format: PixelFormat::Argb8888,
            wide_simd_pool_bytes: 4 * 1024 * 1024,
            narrow_simd_pool_bytes: 2 * 1024 * 1024,
            fallback_alignment: 32,
        }
    }
}

impl MemoryConfig {
    /// Small arenas for tests and tools that never render a full frame
    pub fn compact() -> Self {
        Self {
            default_pool_capacity: 4,
            pool_overhead_bytes: 64 * 1024,
            wide_simd_pool_bytes: 256 * 1024,
            narrow_simd_pool_bytes: 128 * 1024,
            ..Default::default()
        }
    }

    /// Parse a JSON configuration and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| MemoryError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&contents)?;
        log::info!("Loaded memory config from {}", path.display());
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.registry_capacity == 0 {
            return Err(MemoryError::InvalidConfig("registry_capacity must be non-zero".into()));
        }
        if self.default_pool_capacity == 0 {
            return Err(MemoryError::InvalidConfig("default_pool_capacity must be non-zero".into()));
        }
        for (name, align) in [
            ("surface_alignment", self.surface_alignment),
            ("fallback_alignment", self.fallback_alignment),
        ] {
            if !align.is_power_of_two() {
                return Err(MemoryError::InvalidConfig(format!(
                    "{name} must be a power of two, got {align}"
                )));
            }
        }
        for (name, size) in [
            ("wide_simd_pool_bytes", self.wide_simd_pool_bytes),
            ("narrow_simd_pool_bytes", self.narrow_simd_pool_bytes),
        ] {
            if size < MIN_POOL_SIZE {
                return Err(MemoryError::InvalidConfig(format!(
                    "{name} must be at least {MIN_POOL_SIZE} bytes, got {size}"
                )));
            }
        }
        Ok(())
    }

    /// Effective surface alignment, raised to the allocator floor
    pub fn effective_surface_alignment(&self) -> usize {
        self.surface_alignment.max(MIN_ALIGNMENT)
    }

    /// Set the registry capacity
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    /// Set the per-pool surface capacity used by the registry
    pub fn with_default_pool_capacity(mut self, capacity: usize) -> Self {
        self.default_pool_capacity = capacity;
        self
    }

    /// Set the per-pool arena overhead
    pub fn with_pool_overhead(mut self, bytes: usize) -> Self {
        self.pool_overhead_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MemoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry_capacity, 8);
        assert_eq!(config.default_pool_capacity, 16);
        assert!(MemoryConfig::compact().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MemoryConfig::from_json_str(r#"{ "registry_capacity": 2 }"#).unwrap();
        assert_eq!(config.registry_capacity, 2);
        assert_eq!(config.default_pool_capacity, 16);
        assert_eq!(config.pixel_format, PixelFormat::Argb8888);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = MemoryConfig::from_json_str(r#"{ "surface_alignment": 24 }"#).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));

        let err = MemoryConfig::from_json_str(r#"{ "narrow_simd_pool_bytes": 100 }"#).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));

        let err = MemoryConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, MemoryError::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let config = MemoryConfig::default().with_registry_capacity(3);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

        let loaded = MemoryConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);

        let missing = MemoryConfig::load("/nonexistent/void_gfx_memory.json").unwrap_err();
        assert!(matches!(missing, MemoryError::ConfigIo { .. }));
    }
}
