//! Reflection Probe Data
//!
//! A probe is one environment-capture point plus the bookkeeping for its
//! cached GPU result. Probes are shared between the manager and whoever
//! registered them (a spatial group or a scene object) through
//! [`ProbeHandle`]. The manager holds exactly one strong reference per live
//! probe, so a probe with no other holder is garbage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

/// Slot value meaning "no cube map slot assigned"
pub const NO_SLOT: i32 = -1;

/// Export index value meaning "not part of the current export snapshot"
pub const NOT_EXPORTED: i32 = -1;

/// Stable probe identifier, unique for the lifetime of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProbeId(u64);

impl ProbeId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Shape of the region a probe influences
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum InfluenceVolume {
    /// Sphere of the probe's radius around its origin
    Sphere,
    /// Oriented box; the transform maps the unit cube `[-1, 1]^3` into world space
    Box(Mat4),
}

/// Where a probe came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeSource {
    /// Placed on a spatial-partition group
    SpatialGroup,
    /// Attached to a (possibly moving) scene object
    SceneObject,
}

/// One environment-capture point
#[derive(Clone, Debug)]
pub struct ReflectionProbe {
    id: ProbeId,

    /// Capture origin (world space)
    pub origin: Vec3,

    /// Influence radius
    pub radius: f32,

    /// Influence shape
    pub influence: InfluenceVolume,

    /// Blend priority; exported negated for box-shaped influence
    pub priority: i32,

    /// Ambiance contribution, floored at the sky's minimum on export
    pub ambiance: f32,

    /// Probe follows a dynamic object
    pub is_dynamic: bool,

    /// Registration source
    pub source: ProbeSource,

    pub(crate) slot: i32,
    pub(crate) probe_index: i32,
    pub(crate) last_update_frame: u64,
    pub(crate) last_bind_frame: u64,
    pub(crate) distance: f32,
    pub(crate) neighbors: Vec<ProbeId>,
    pub(crate) completed_cycles: u64,
}

impl ReflectionProbe {
    /// Create a spherical probe at `origin`
    pub fn new(origin: Vec3, radius: f32) -> Self {
        Self {
            id: ProbeId::next(),
            origin,
            radius,
            influence: InfluenceVolume::Sphere,
            priority: 1,
            ambiance: 0.0,
            is_dynamic: false,
            source: ProbeSource::SpatialGroup,
            slot: NO_SLOT,
            probe_index: NOT_EXPORTED,
            last_update_frame: 0,
            last_bind_frame: 0,
            distance: 0.0,
            neighbors: Vec::new(),
            completed_cycles: 0,
        }
    }

    /// Use an oriented box as influence volume
    pub fn with_box(mut self, transform: Mat4) -> Self {
        self.influence = InfluenceVolume::Box(transform);
        self
    }

    /// Mark as dynamic
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.is_dynamic = dynamic;
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set ambiance
    pub fn with_ambiance(mut self, ambiance: f32) -> Self {
        self.ambiance = ambiance;
        self
    }

    /// Stable identifier
    pub fn id(&self) -> ProbeId {
        self.id
    }

    /// Cube map slot, or [`NO_SLOT`]
    pub fn slot(&self) -> i32 {
        self.slot
    }

    /// Whether a slot is assigned
    pub fn has_slot(&self) -> bool {
        self.slot != NO_SLOT
    }

    /// Index in the last export snapshot, or [`NOT_EXPORTED`]
    pub fn probe_index(&self) -> i32 {
        self.probe_index
    }

    /// Frame of the last completed capture cycle (0 = never)
    pub fn last_update_frame(&self) -> u64 {
        self.last_update_frame
    }

    /// Frame of the last export that visited this probe
    pub fn last_bind_frame(&self) -> u64 {
        self.last_bind_frame
    }

    /// Distance from the viewer to the influence surface, as of the last update
    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Neighboring probes (symmetric relation)
    pub fn neighbors(&self) -> &[ProbeId] {
        &self.neighbors
    }

    /// Number of completed capture cycles
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    /// Whether the influence volume is a box
    pub fn is_box(&self) -> bool {
        matches!(self.influence, InfluenceVolume::Box(_))
    }

    /// Box transform if the influence volume is a box
    pub fn box_transform(&self) -> Option<Mat4> {
        match self.influence {
            InfluenceVolume::Box(transform) => Some(transform),
            InfluenceVolume::Sphere => None,
        }
    }

    /// Distance from `viewer` to the influence sphere's surface
    pub fn distance_to(&self, viewer: Vec3) -> f32 {
        viewer.distance(self.origin) - self.radius
    }

    pub(crate) fn clear_slot(&mut self) {
        self.slot = NO_SLOT;
    }
}

/// Shared handle to a probe
///
/// Cloning the handle registers another holder. When only the manager's own
/// handle remains, the probe is deleted on the next update.
#[derive(Clone, Debug)]
pub struct ProbeHandle(Arc<RwLock<ReflectionProbe>>);

impl ProbeHandle {
    /// Wrap a probe
    pub fn new(probe: ReflectionProbe) -> Self {
        Self(Arc::new(RwLock::new(probe)))
    }

    /// Probe identifier
    pub fn id(&self) -> ProbeId {
        self.0.read().id
    }

    /// Read access
    pub fn read(&self) -> RwLockReadGuard<'_, ReflectionProbe> {
        self.0.read()
    }

    /// Write access
    pub fn write(&self) -> RwLockWriteGuard<'_, ReflectionProbe> {
        self.0.write()
    }

    /// Move the capture origin (dynamic objects call this as they move)
    pub fn set_origin(&self, origin: Vec3) {
        self.0.write().origin = origin;
    }

    /// Number of live handles, including the manager's
    pub fn holder_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether two handles refer to the same probe
    pub fn ptr_eq(&self, other: &ProbeHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Serializable probe descriptor for hot-reload
///
/// Runtime state (slot, neighbors, timestamps) is rebuilt after restore.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeDescriptor {
    /// Capture origin
    pub origin: Vec3,
    /// Influence radius
    pub radius: f32,
    /// Influence shape
    pub influence: InfluenceVolume,
    /// Priority
    pub priority: i32,
    /// Ambiance
    pub ambiance: f32,
    /// Dynamic flag
    pub is_dynamic: bool,
    /// Registration source
    pub source: ProbeSource,
}

impl From<&ReflectionProbe> for ProbeDescriptor {
    fn from(probe: &ReflectionProbe) -> Self {
        Self {
            origin: probe.origin,
            radius: probe.radius,
            influence: probe.influence,
            priority: probe.priority,
            ambiance: probe.ambiance,
            is_dynamic: probe.is_dynamic,
            source: probe.source,
        }
    }
}

impl From<&ProbeDescriptor> for ReflectionProbe {
    fn from(desc: &ProbeDescriptor) -> Self {
        let mut probe = ReflectionProbe::new(desc.origin, desc.radius)
            .with_dynamic(desc.is_dynamic)
            .with_priority(desc.priority)
            .with_ambiance(desc.ambiance);
        probe.influence = desc.influence;
        probe.source = desc.source;
        probe
    }
}
