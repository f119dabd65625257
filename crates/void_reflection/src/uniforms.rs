//! Probe Uniform Packing
//!
//! Serializes the exported probe set into the shader-facing layout:
//! - One [`GpuReflectionProbe`] per exported probe, nearest-first
//! - A shared, bounded neighbor index arena
//! - A sentinel entry (cube index `-1`) when fewer probes than the consumer
//!   array holds are exported
//!
//! # Neighbor Arena
//!
//! Each probe's neighbor list is written contiguously and padded with `-1`
//! up to the next multiple of four, so a sublist can be addressed as a run of
//! `ivec4`s starting at `offset / 4`. Indices beyond the arena capacity are
//! dropped.
//!
//! The packed data is cached; [`ProbeUniformBuffer::pack`] is only needed
//! after [`ProbeUniformBuffer::invalidate`].

use std::collections::BTreeMap;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::probe::{ProbeHandle, ProbeId, NOT_EXPORTED};

/// GPU-ready reflection probe data
///
/// Matches the shader struct layout (std140/std430 compatible).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuReflectionProbe {
    /// Inverse of the view-space box transform (identity for spheres)
    pub box_matrix: [[f32; 4]; 4],
    /// View-space origin (xyz) and influence radius (w)
    pub sphere: [f32; 4],
    /// Ambiance (x), unused (yzw)
    pub params: [f32; 4],
    /// Cube slot, neighbor offset / 4 (-1 = none), neighbor count, signed priority
    pub index: [i32; 4],
}

impl GpuReflectionProbe {
    /// Size in bytes
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Terminator entry for fixed-size consumer arrays
    pub fn sentinel() -> Self {
        Self {
            box_matrix: Mat4::IDENTITY.to_cols_array_2d(),
            index: [-1, -1, 0, 0],
            ..Default::default()
        }
    }

    /// Whether this is the terminator entry
    pub fn is_sentinel(&self) -> bool {
        self.index[0] < 0
    }

    /// Cube map slot
    pub fn cube_index(&self) -> i32 {
        self.index[0]
    }

    /// Neighbor run start in `ivec4` units, or -1
    pub fn neighbor_offset(&self) -> i32 {
        self.index[1]
    }

    /// Number of neighbor indices in the run
    pub fn neighbor_count(&self) -> i32 {
        self.index[2]
    }

    /// Signed priority (negative for box influence)
    pub fn priority(&self) -> i32 {
        self.index[3]
    }
}

/// Probe counts for shader uniform
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ProbeCounts {
    /// Number of exported probes (sentinel excluded)
    pub probe_count: u32,
    /// Number of used neighbor arena entries (padding included)
    pub neighbor_indices: u32,
    /// Padding
    pub _pad: [u32; 2],
}

/// Uniform packing statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UniformStats {
    /// Probes written by the last pack
    pub probes_packed: u32,
    /// Neighbor indices written by the last pack
    pub neighbors_written: u32,
    /// Neighbor indices dropped by the last pack (arena full)
    pub neighbors_dropped: u32,
    /// Number of packs performed
    pub total_packs: u64,
}

/// CPU-side probe uniform data
///
/// Backend-agnostic; the rendering backend uploads the byte views.
#[derive(Clone, Debug)]
pub struct ProbeUniformBuffer {
    probes: Vec<GpuReflectionProbe>,
    neighbors: Vec<i32>,
    counts: ProbeCounts,
    max_probes: usize,
    max_neighbor_indices: usize,
    dirty: bool,
    stats: UniformStats,
}

impl ProbeUniformBuffer {
    /// Create an empty (dirty) buffer
    pub fn new(max_probes: usize, max_neighbor_indices: usize) -> Self {
        Self {
            probes: Vec::with_capacity(max_probes),
            neighbors: Vec::with_capacity(max_neighbor_indices),
            counts: ProbeCounts::default(),
            max_probes,
            max_neighbor_indices,
            dirty: true,
            stats: UniformStats::default(),
        }
    }

    /// Mark the packed data stale
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Whether a pack is needed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Pack every probe with an export index
    ///
    /// `probes` is the nearest-first live list with export indices already
    /// assigned; probes with index [`NOT_EXPORTED`] are skipped.
    pub fn pack(&mut self, probes: &[ProbeHandle], view: &Mat4, minimum_ambiance: f32) {
        self.probes.clear();
        self.neighbors.clear();
        self.stats.neighbors_written = 0;
        self.stats.neighbors_dropped = 0;

        let exported: Vec<&ProbeHandle> = probes
            .iter()
            .filter(|handle| handle.read().probe_index != NOT_EXPORTED)
            .take(self.max_probes)
            .collect();

        let export_index: BTreeMap<ProbeId, i32> = exported
            .iter()
            .map(|handle| {
                let probe = handle.read();
                (probe.id(), probe.probe_index)
            })
            .collect();

        for handle in &exported {
            let probe = handle.read();

            let (offset, count) = self.write_neighbors(
                probe
                    .neighbors
                    .iter()
                    .filter_map(|id| export_index.get(id).copied()),
            );

            let box_matrix = match probe.box_transform() {
                Some(transform) => (*view * transform).inverse(),
                None => Mat4::IDENTITY,
            };
            let center: Vec3 = view.transform_point3(probe.origin);
            let priority = if probe.is_box() {
                -probe.priority
            } else {
                probe.priority
            };

            self.probes.push(GpuReflectionProbe {
                box_matrix: box_matrix.to_cols_array_2d(),
                sphere: [center.x, center.y, center.z, probe.radius],
                params: [minimum_ambiance.max(probe.ambiance), 0.0, 0.0, 0.0],
                index: [probe.slot, offset, count, priority],
            });
        }

        let count = self.probes.len();
        if count < self.max_probes {
            self.probes.push(GpuReflectionProbe::sentinel());
        }

        if self.stats.neighbors_dropped > 0 {
            log::warn!(
                "Reflection probe neighbor arena full ({} entries), dropped {} indices",
                self.max_neighbor_indices,
                self.stats.neighbors_dropped
            );
        }

        self.counts = ProbeCounts {
            probe_count: count as u32,
            neighbor_indices: self.neighbors.len() as u32,
            _pad: [0; 2],
        };
        self.stats.probes_packed = count as u32;
        self.stats.total_packs += 1;
        self.dirty = false;
    }

    /// Append one neighbor run, returning `(offset / 4, count)`
    fn write_neighbors(&mut self, indices: impl Iterator<Item = i32>) -> (i32, i32) {
        let start = self.neighbors.len();
        let mut count = 0;
        for index in indices {
            if self.neighbors.len() >= self.max_neighbor_indices {
                self.stats.neighbors_dropped += 1;
                continue;
            }
            self.neighbors.push(index);
            count += 1;
        }
        self.stats.neighbors_written += count as u32;

        if count == 0 {
            return (-1, 0);
        }

        while self.neighbors.len() % 4 != 0 && self.neighbors.len() < self.max_neighbor_indices {
            self.neighbors.push(-1);
        }
        ((start / 4) as i32, count)
    }

    /// Packed probe entries (sentinel included when present)
    pub fn probes(&self) -> &[GpuReflectionProbe] {
        &self.probes
    }

    /// Used part of the neighbor arena
    pub fn neighbors(&self) -> &[i32] {
        &self.neighbors
    }

    /// Neighbor run of one packed probe
    pub fn neighbors_of(&self, entry: &GpuReflectionProbe) -> &[i32] {
        if entry.neighbor_offset() < 0 {
            return &[];
        }
        let start = entry.neighbor_offset() as usize * 4;
        let end = (start + entry.neighbor_count() as usize).min(self.neighbors.len());
        &self.neighbors[start.min(end)..end]
    }

    /// Probe counts
    pub fn counts(&self) -> ProbeCounts {
        self.counts
    }

    /// Probe entries as bytes for GPU upload
    pub fn probe_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.probes)
    }

    /// Neighbor arena as bytes for GPU upload
    pub fn neighbor_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.neighbors)
    }

    /// Get packing statistics
    pub fn stats(&self) -> &UniformStats {
        &self.stats
    }
}
