/*!
 * Allocator Configuration
 *
 * Chunk sizing, dedicated-allocation routing and placement policy
 */

use super::errors::{MemoryError, MemoryResult};
use super::limits;
use super::types::DeviceSize;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// When dedicated allocations are rounded up to the placement granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementRounding {
    /// Round unless the allocation is tied to an owner resource
    Unowned,
    /// Always round
    Always,
    /// Never round
    Never,
}

impl PlacementRounding {
    #[inline]
    pub fn applies(&self, owner_tied: bool) -> bool {
        match self {
            PlacementRounding::Unowned => !owner_tied,
            PlacementRounding::Always => true,
            PlacementRounding::Never => false,
        }
    }
}

impl Default for PlacementRounding {
    fn default() -> Self {
        PlacementRounding::Unowned
    }
}

/// Device memory allocator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub persistent_mapped_chunk_size: DeviceSize,
    pub unmapped_chunk_size: DeviceSize,
    pub persistent_mapped_dedicated_threshold: DeviceSize,
    pub unmapped_dedicated_threshold: DeviceSize,
    pub chunk_granularity: DeviceSize,
    pub placement_rounding: PlacementRounding,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            persistent_mapped_chunk_size: limits::PERSISTENT_MAPPED_CHUNK_SIZE,
            unmapped_chunk_size: limits::UNMAPPED_CHUNK_SIZE,
            persistent_mapped_dedicated_threshold: limits::PERSISTENT_MAPPED_DEDICATED_THRESHOLD,
            unmapped_dedicated_threshold: limits::UNMAPPED_DEDICATED_THRESHOLD,
            chunk_granularity: limits::DEFAULT_CHUNK_GRANULARITY,
            placement_rounding: PlacementRounding::Unowned,
        }
    }
}

impl AllocatorConfig {
    /// Small chunks for tests and memory-constrained devices
    pub const fn compact() -> Self {
        Self {
            persistent_mapped_chunk_size: 64 * 1024,
            unmapped_chunk_size: 256 * 1024,
            persistent_mapped_dedicated_threshold: 64 * 1024,
            unmapped_dedicated_threshold: 256 * 1024,
            chunk_granularity: limits::DEFAULT_CHUNK_GRANULARITY,
            placement_rounding: PlacementRounding::Unowned,
        }
    }

    /// Chunk size for the given mapped-ness
    #[inline]
    pub fn chunk_size(&self, persistent_mapped: bool) -> DeviceSize {
        if persistent_mapped {
            self.persistent_mapped_chunk_size
        } else {
            self.unmapped_chunk_size
        }
    }

    /// Dedicated-allocation threshold for the given mapped-ness
    #[inline]
    pub fn dedicated_threshold(&self, persistent_mapped: bool) -> DeviceSize {
        if persistent_mapped {
            self.persistent_mapped_dedicated_threshold
        } else {
            self.unmapped_dedicated_threshold
        }
    }

    /// Check internal consistency
    ///
    /// A threshold above its chunk size would route requests that cannot fit
    /// a fresh chunk to the chunk path.
    pub fn validate(&self) -> MemoryResult<()> {
        for mapped in [true, false] {
            let chunk = self.chunk_size(mapped);
            let threshold = self.dedicated_threshold(mapped);
            if chunk == 0 {
                return Err(MemoryError::InvalidConfig(format!(
                    "chunk size for persistent_mapped={} must be non-zero",
                    mapped
                )));
            }
            if threshold == 0 || threshold > chunk {
                return Err(MemoryError::InvalidConfig(format!(
                    "dedicated threshold {} for persistent_mapped={} must be in 1..={}",
                    threshold, mapped, chunk
                )));
            }
        }
        if self.chunk_granularity == 0 {
            return Err(MemoryError::InvalidConfig(
                "chunk granularity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> MemoryResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MemoryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    ///
    /// Environment variables:
    /// - DEVMEM_MAPPED_CHUNK_SIZE
    /// - DEVMEM_UNMAPPED_CHUNK_SIZE
    /// - DEVMEM_MAPPED_DEDICATED_THRESHOLD
    /// - DEVMEM_UNMAPPED_DEDICATED_THRESHOLD
    /// - DEVMEM_CHUNK_GRANULARITY
    /// - DEVMEM_PLACEMENT_ROUNDING (unowned | always | never)
    pub fn from_env() -> MemoryResult<Self> {
        let mut config = Self::default();
        read_env_size("DEVMEM_MAPPED_CHUNK_SIZE", &mut config.persistent_mapped_chunk_size);
        read_env_size("DEVMEM_UNMAPPED_CHUNK_SIZE", &mut config.unmapped_chunk_size);
        read_env_size(
            "DEVMEM_MAPPED_DEDICATED_THRESHOLD",
            &mut config.persistent_mapped_dedicated_threshold,
        );
        read_env_size(
            "DEVMEM_UNMAPPED_DEDICATED_THRESHOLD",
            &mut config.unmapped_dedicated_threshold,
        );
        read_env_size("DEVMEM_CHUNK_GRANULARITY", &mut config.chunk_granularity);

        if let Ok(value) = std::env::var("DEVMEM_PLACEMENT_ROUNDING") {
            match value.to_ascii_lowercase().as_str() {
                "unowned" => config.placement_rounding = PlacementRounding::Unowned,
                "always" => config.placement_rounding = PlacementRounding::Always,
                "never" => config.placement_rounding = PlacementRounding::Never,
                other => warn!(value = other, "Ignoring unknown DEVMEM_PLACEMENT_ROUNDING"),
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn read_env_size(key: &str, target: &mut DeviceSize) {
    if let Ok(value) = std::env::var(key) {
        match value.trim().parse::<DeviceSize>() {
            Ok(parsed) => *target = parsed,
            Err(e) => warn!(key, value = %value, error = %e, "Ignoring malformed size override"),
        }
    }
}
