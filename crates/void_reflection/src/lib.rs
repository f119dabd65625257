//! # void_reflection - Reflection Probe Manager
//!
//! Backend-agnostic environment probe management with:
//! - Probe placement from spatial groups and dynamic scene objects
//! - A fixed pool of cube map array slots with distance-based reclamation
//! - Time-sliced capture (one cube face per frame) plus a realtime path
//! - A symmetric neighbor graph over overlapping influence volumes
//! - Cached, bounded uniform export for the shading stage
//!
//! ## Architecture
//!
//! 1. **Probes**: shared [`ProbeHandle`]s, collected once no one else holds them
//! 2. **Scheduling**: [`ReflectionProbeManager::update`] runs once per frame
//! 3. **Capture**: [`CaptureCommand`] lists executed by a [`CaptureBackend`]
//!
//! ## Example
//!
//! ```ignore
//! use void_reflection::prelude::*;
//!
//! let mut manager = ReflectionProbeManager::new(ProbeConfig::default(), MyBackend::new());
//!
//! let probe = manager.register_volume(&CandidateVolume {
//!     center: Vec3::new(8.0, 0.0, 8.0),
//!     size: 16.0,
//!     partition: PartitionKind::Volume,
//! });
//!
//! // Every frame
//! manager.update(&FrameContext::new(camera_position).with_view(view));
//! if let Some(buffer) = manager.bind_for_shading() {
//!     queue.write_buffer(&probe_buffer, 0, buffer.probe_bytes());
//!     queue.write_buffer(&neighbor_buffer, 0, buffer.neighbor_bytes());
//! }
//! ```

pub mod capture;
pub mod config;
pub mod debug;
pub mod error;
pub mod manager;
pub mod neighbors;
pub mod probe;
pub mod queue;
pub mod scheduler;
pub mod slots;
pub mod uniforms;

pub use capture::{CaptureBackend, CaptureCommand, CapturePipeline, CaptureResources, CubeFace};
pub use config::{DetailLevel, ProbeConfig};
pub use error::{ProbeError, Result};
pub use manager::{
    CandidateVolume, DynamicEntity, FrameContext, PartitionKind, ProbeStats,
    ReflectionManagerState, ReflectionProbeManager,
};
pub use probe::{InfluenceVolume, ProbeHandle, ProbeId, ReflectionProbe, NOT_EXPORTED, NO_SLOT};
pub use uniforms::{GpuReflectionProbe, ProbeUniformBuffer};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::capture::{CaptureBackend, CaptureCommand, CubeFace};
    pub use crate::config::{DetailLevel, ProbeConfig};
    pub use crate::debug::{DebugLine, ProbeDebugConfig};
    pub use crate::error::{ProbeError, Result};
    pub use crate::manager::{
        CandidateVolume, DynamicEntity, FrameContext, PartitionKind, ReflectionProbeManager,
    };
    pub use crate::neighbors::{InfluenceTest, VolumeOverlap};
    pub use crate::probe::{InfluenceVolume, ProbeHandle, ProbeId, ReflectionProbe};
    pub use crate::scheduler::CaptureState;
    pub use crate::uniforms::{GpuReflectionProbe, ProbeUniformBuffer};
    pub use glam::{Mat4, Vec3};
}
