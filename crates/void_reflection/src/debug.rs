//! Probe Debug Visualization
//!
//! Generates world-space line segments for the neighbor graph. Rendering the
//! lines is left to the backend's debug draw path.
//!
//! # Example
//!
//! ```ignore
//! use void_reflection::debug::ProbeDebugConfig;
//!
//! let config = ProbeDebugConfig::default();
//! for line in manager.debug_lines(&config) {
//!     debug_draw.line(line.start, line.end, line.color);
//! }
//! ```

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::probe::{ProbeHandle, ProbeId};

/// Debug visualization configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeDebugConfig {
    /// Draw an edge from every probe to each of its neighbors
    pub show_neighbors: bool,
    /// Neighbor edge color (RGBA)
    pub neighbor_color: [f32; 4],
}

impl Default for ProbeDebugConfig {
    fn default() -> Self {
        Self {
            show_neighbors: true,
            neighbor_color: [1.0, 0.5, 0.0, 1.0],
        }
    }
}

/// A colored world-space line segment
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugLine {
    /// Start point
    pub start: Vec3,
    /// End point
    pub end: Vec3,
    /// Color (RGBA)
    pub color: [f32; 4],
}

/// Lines from each probe origin to each neighbor origin
///
/// Every edge appears twice, once from each endpoint.
pub fn neighbor_lines(probes: &[ProbeHandle], config: &ProbeDebugConfig) -> Vec<DebugLine> {
    if !config.show_neighbors {
        return Vec::new();
    }

    let origins: Vec<(ProbeId, Vec3)> = probes
        .iter()
        .map(|handle| {
            let probe = handle.read();
            (probe.id(), probe.origin)
        })
        .collect();

    let mut lines = Vec::new();
    for handle in probes {
        let probe = handle.read();
        for neighbor in probe.neighbors() {
            if let Some((_, end)) = origins.iter().find(|(id, _)| id == neighbor) {
                lines.push(DebugLine {
                    start: probe.origin,
                    end: *end,
                    color: config.neighbor_color,
                });
            }
        }
    }
    lines
}
