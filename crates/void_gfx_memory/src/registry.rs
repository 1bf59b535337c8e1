//! Pool registry - surface pools looked up by dimensions

use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::pool::SurfacePool;

/// Bounded set of surface pools keyed by `(width, height)`
///
/// Lookup is a linear scan; the registry holds a handful of pools at most.
/// When every slot is taken `get_or_create` fails with `RegistryFull` and the
/// caller renders through an unpooled surface instead.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: Vec<SurfacePool>,
    config: MemoryConfig,
}

impl PoolRegistry {
    /// Create an empty registry
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            pools: Vec::with_capacity(config.registry_capacity),
            config,
        }
    }

    /// Find the pool for `width`x`height`, creating it if a slot is free
    pub fn get_or_create(&mut self, width: u32, height: u32) -> Result<&mut SurfacePool> {
        if let Some(index) = self.position(width, height) {
            return Ok(&mut self.pools[index]);
        }

        if self.pools.len() >= self.config.registry_capacity {
            log::debug!(
                "Pool registry full, no pool for {}x{}",
                width,
                height
            );
            return Err(MemoryError::RegistryFull {
                capacity: self.config.registry_capacity,
            });
        }

        let pool = SurfacePool::with_config(
            width,
            height,
            self.config.default_pool_capacity,
            &self.config,
        )?;
        self.pools.push(pool);
        log::debug!(
            "Registered {}x{} pool ({}/{})",
            width,
            height,
            self.pools.len(),
            self.config.registry_capacity
        );

        let last = self.pools.len() - 1;
        Ok(&mut self.pools[last])
    }

    /// Existing pool for `width`x`height`
    pub fn get(&mut self, width: u32, height: u32) -> Option<&mut SurfacePool> {
        let index = self.position(width, height)?;
        Some(&mut self.pools[index])
    }

    fn position(&self, width: u32, height: u32) -> Option<usize> {
        self.pools
            .iter()
            .position(|pool| pool.dimensions() == (width, height))
    }

    /// Destroy every pool and empty the registry
    ///
    /// Returns how many pools still had surfaces checked out.
    pub fn cleanup(&mut self) -> usize {
        let mut dirty = 0;
        for pool in self.pools.drain(..) {
            let (width, height) = pool.dimensions();
            if let Err(e) = pool.destroy() {
                log::warn!("Pool {}x{}: {}", width, height, e);
                dirty += 1;
            }
        }
        dirty
    }

    pub fn iter(&self) -> impl Iterator<Item = &SurfacePool> {
        self.pools.iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Maximum number of pools
    pub fn capacity(&self) -> usize {
        self.config.registry_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_reuses_pool() {
        let mut registry = PoolRegistry::new(MemoryConfig::compact());

        let surface = registry.get_or_create(64, 64).unwrap().get().unwrap();
        registry.get_or_create(32, 32).unwrap();
        assert_eq!(registry.len(), 2);

        let pool = registry.get_or_create(64, 64).unwrap();
        assert_eq!(pool.outstanding(), 1);
        pool.return_surface(surface).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(64, 64).unwrap().free_count(), 1);
        assert!(registry.get(128, 128).is_none());
    }

    #[test]
    fn test_registry_full() {
        let config = MemoryConfig::compact().with_registry_capacity(8);
        let mut registry = PoolRegistry::new(config);

        for size in 1..=8 {
            registry.get_or_create(size * 4, size * 4).unwrap();
        }
        assert_eq!(registry.len(), registry.capacity());

        let err = registry.get_or_create(100, 100).unwrap_err();
        assert!(matches!(err, MemoryError::RegistryFull { capacity: 8 }));
        assert!(err.is_recoverable());

        // Existing sizes still resolve
        assert!(registry.get_or_create(8, 8).is_ok());
    }

    #[test]
    fn test_pools_follow_config() {
        let config = MemoryConfig::compact()
            .with_default_pool_capacity(2)
            .with_pool_overhead(0);
        let mut registry = PoolRegistry::new(config);

        let pool = registry.get_or_create(16, 16).unwrap();
        assert_eq!(pool.capacity(), 2);
        // Arena holds exactly the two slots
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert!(matches!(pool.get(), Err(MemoryError::Exhausted { .. })));
        assert_eq!(pool.outstanding(), 2);
        pool.return_surface(a).unwrap();
        pool.return_surface(b).unwrap();
    }

    #[test]
    fn test_cleanup() {
        let mut registry = PoolRegistry::new(MemoryConfig::compact());
        registry.get_or_create(16, 16).unwrap();
        let held = registry.get_or_create(8, 8).unwrap().get().unwrap();

        assert_eq!(registry.cleanup(), 1);
        assert!(registry.is_empty());
        drop(held);

        // Usable again after cleanup
        assert!(registry.get_or_create(16, 16).is_ok());
    }
}
