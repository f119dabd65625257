//! Reflection Probe Configuration
//!
//! Pool size, capture resolution and detail level, with serde support for
//! hot-reload and settings files.

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, Result};

/// Hard upper bound on the slot pool size
pub const MAX_PROBE_COUNT: u32 = 256;

/// Default cube face resolution
pub const DEFAULT_PROBE_RESOLUTION: u32 = 256;

/// Default irradiance map face resolution
pub const DEFAULT_IRRADIANCE_RESOLUTION: u32 = 64;

/// Default capacity of the shared neighbor index arena
pub const DEFAULT_MAX_NEIGHBOR_INDICES: u32 = 4096;

/// Reflection probe detail level
///
/// Ordered: each level includes everything the previous one does.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DetailLevel {
    /// Only probes placed from static spatial groups are refreshed
    StaticOnly,
    /// Static and dynamic probes share the time-sliced scheduler
    #[default]
    StaticAndDynamic,
    /// Additionally re-capture the nearest dynamic probe every frame
    Realtime,
}

impl DetailLevel {
    /// Whether the realtime dynamic-probe fast path runs at this level
    pub fn is_realtime(self) -> bool {
        self >= DetailLevel::Realtime
    }
}

/// Global reflection probe configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Enable reflection probes globally
    pub enabled: bool,

    /// Number of cube map slots in the pool (N)
    pub probe_count: u32,

    /// Cube face resolution of a captured probe (power of 2)
    pub resolution: u32,

    /// Irradiance map face resolution (power of 2, <= resolution)
    pub irradiance_resolution: u32,

    /// Scratch render target super-sampling factor
    pub supersample: u32,

    /// Detail level
    pub detail: DetailLevel,

    /// Smallest spatial-group edge length that receives a probe
    pub volume_size_min: f32,

    /// Largest spatial-group edge length that receives a probe
    pub volume_size_max: f32,

    /// Influence radius of probes placed on spatial groups
    pub default_radius: f32,

    /// Capacity of the shared neighbor index arena (multiple of 4)
    pub max_neighbor_indices: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_count: 16,
            resolution: DEFAULT_PROBE_RESOLUTION,
            irradiance_resolution: DEFAULT_IRRADIANCE_RESOLUTION,
            supersample: 2,
            detail: DetailLevel::StaticAndDynamic,
            volume_size_min: 15.0,
            volume_size_max: 17.0,
            default_radius: 16.0,
            max_neighbor_indices: DEFAULT_MAX_NEIGHBOR_INDICES,
        }
    }
}

impl ProbeConfig {
    /// Create a configuration with a specific pool size
    pub fn with_probe_count(mut self, count: u32) -> Self {
        self.probe_count = count;
        self
    }

    /// Set detail level
    pub fn with_detail(mut self, detail: DetailLevel) -> Self {
        self.detail = detail;
        self
    }

    /// Create a low-cost configuration
    pub fn low_quality() -> Self {
        Self {
            probe_count: 8,
            resolution: 128,
            irradiance_resolution: 32,
            detail: DetailLevel::StaticOnly,
            ..Default::default()
        }
    }

    /// Create a high-quality configuration with the realtime fast path
    pub fn high_quality() -> Self {
        Self {
            probe_count: 64,
            resolution: 512,
            detail: DetailLevel::Realtime,
            ..Default::default()
        }
    }

    /// Create a configuration with probes disabled
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Validate configuration and clamp values to valid ranges
    pub fn validate(&mut self) {
        self.probe_count = self.probe_count.clamp(1, MAX_PROBE_COUNT);
        self.resolution = self.resolution.clamp(16, 2048).next_power_of_two();
        self.irradiance_resolution = self
            .irradiance_resolution
            .clamp(2, self.resolution)
            .next_power_of_two()
            .min(self.resolution);
        self.supersample = self.supersample.clamp(1, 4);
        if self.volume_size_min > self.volume_size_max {
            std::mem::swap(&mut self.volume_size_min, &mut self.volume_size_max);
        }
        self.default_radius = self.default_radius.max(0.0);
        self.max_neighbor_indices = (self.max_neighbor_indices.max(4) + 3) & !3;
    }

    /// Number of levels in the downsample mip chain
    pub fn mip_count(&self) -> u32 {
        self.resolution.max(2).ilog2()
    }

    /// Whether a spatial-group edge length falls in the qualifying band
    pub fn accepts_volume_size(&self, size: f32) -> bool {
        size >= self.volume_size_min && size <= self.volume_size_max
    }

    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        if !config.volume_size_min.is_finite() || !config.volume_size_max.is_finite() {
            return Err(ProbeError::InvalidConfig(
                "volume size band must be finite".into(),
            ));
        }
        config.validate();
        Ok(config)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_config_default() {
        let config = ProbeConfig::default();
        assert!(config.enabled);
        assert_eq!(config.resolution, 256);
        assert_eq!(config.mip_count(), 8);
        assert_eq!(config.detail, DetailLevel::StaticAndDynamic);
    }

    #[test]
    fn test_probe_config_validate() {
        let mut config = ProbeConfig {
            probe_count: 1000,
            resolution: 300,
            irradiance_resolution: 4096,
            supersample: 0,
            volume_size_min: 20.0,
            volume_size_max: 10.0,
            max_neighbor_indices: 4097,
            ..Default::default()
        };

        config.validate();

        assert_eq!(config.probe_count, MAX_PROBE_COUNT);
        assert_eq!(config.resolution, 512);
        assert_eq!(config.irradiance_resolution, 512);
        assert_eq!(config.supersample, 1);
        assert_eq!(config.volume_size_min, 10.0);
        assert_eq!(config.volume_size_max, 20.0);
        assert_eq!(config.max_neighbor_indices % 4, 0);

        let mut empty = ProbeConfig::default().with_probe_count(0);
        empty.validate();
        assert_eq!(empty.probe_count, 1);
    }

    #[test]
    fn test_detail_level_ordering() {
        assert!(!DetailLevel::StaticOnly.is_realtime());
        assert!(!DetailLevel::StaticAndDynamic.is_realtime());
        assert!(DetailLevel::Realtime.is_realtime());
        assert!(DetailLevel::StaticOnly < DetailLevel::Realtime);
    }

    #[test]
    fn test_volume_size_band() {
        let config = ProbeConfig::default();
        assert!(config.accepts_volume_size(16.0));
        assert!(config.accepts_volume_size(15.0));
        assert!(!config.accepts_volume_size(8.0));
        assert!(!config.accepts_volume_size(32.0));
    }

    #[test]
    fn test_probe_config_json() {
        let config = ProbeConfig::high_quality();
        let json = config.to_json().unwrap();
        let restored = ProbeConfig::from_json(&json).unwrap();
        assert_eq!(restored, config);
        assert!(restored.detail.is_realtime());

        assert!(matches!(
            ProbeConfig::from_json("{ not json"),
            Err(ProbeError::Serialization(_))
        ));
    }
}
