//! Capture Scheduling
//!
//! One mainline capture advances by a single cube face per frame. When no
//! capture is running, the stalest probe within the guaranteed top-N window
//! is picked next. The realtime path bypasses this budget entirely and is
//! only selected here, not tracked.

use serde::{Deserialize, Serialize};

use crate::capture::CubeFace;
use crate::probe::{ProbeHandle, ProbeId};

/// Mainline capture state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    /// No capture in progress
    #[default]
    Idle,
    /// Capturing `probe`; `face` is the next face to render
    Capturing {
        /// Probe being captured
        probe: ProbeId,
        /// Next face index (0-5)
        face: u8,
    },
}

/// The face a scheduler step asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceStep {
    /// Probe being captured
    pub probe: ProbeId,
    /// Face to render this frame
    pub face: CubeFace,
}

impl FaceStep {
    /// Whether this step completes the capture cycle
    pub fn completes_cycle(&self) -> bool {
        self.face.is_last()
    }
}

/// Mainline capture scheduler
#[derive(Clone, Debug, Default)]
pub struct UpdateScheduler {
    state: CaptureState,
}

impl UpdateScheduler {
    /// Create an idle scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether a capture is in progress
    pub fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::Capturing { .. })
    }

    /// Probe currently being captured
    pub fn capturing_probe(&self) -> Option<ProbeId> {
        match self.state {
            CaptureState::Capturing { probe, .. } => Some(probe),
            CaptureState::Idle => None,
        }
    }

    /// Start a capture cycle at face 0
    pub fn begin(&mut self, probe: ProbeId) {
        self.state = CaptureState::Capturing { probe, face: 0 };
    }

    /// Take the next face of the running capture
    ///
    /// Moves to the following face, or back to `Idle` after the last one.
    pub fn advance(&mut self) -> Option<FaceStep> {
        let CaptureState::Capturing { probe, face } = self.state else {
            return None;
        };
        let Some(cube_face) = CubeFace::from_index(face as usize) else {
            self.state = CaptureState::Idle;
            return None;
        };

        self.state = if cube_face.is_last() {
            CaptureState::Idle
        } else {
            CaptureState::Capturing {
                probe,
                face: face + 1,
            }
        };

        Some(FaceStep {
            probe,
            face: cube_face,
        })
    }

    /// Abort the running capture if it belongs to `probe`
    ///
    /// Returns true if a capture was aborted.
    pub fn abort_if(&mut self, probe: ProbeId) -> bool {
        if self.capturing_probe() == Some(probe) {
            log::debug!("Aborting capture of reflection probe {:?}", probe);
            self.state = CaptureState::Idle;
            return true;
        }
        false
    }

    /// Drop any running capture
    pub fn reset(&mut self) {
        self.state = CaptureState::Idle;
    }
}

/// Pick the probe with the oldest capture among the first `window` probes
///
/// Ties go to the nearer probe. Dynamic probes are skipped unless
/// `include_dynamic` is set. `probes` must be sorted nearest-first.
pub fn select_oldest(
    probes: &[ProbeHandle],
    window: usize,
    include_dynamic: bool,
) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (index, handle) in probes.iter().take(window).enumerate() {
        let probe = handle.read();
        if probe.is_dynamic && !include_dynamic {
            continue;
        }
        let frame = probe.last_update_frame;
        if best.map_or(true, |(_, oldest)| frame < oldest) {
            best = Some((index, frame));
        }
    }
    best.map(|(index, _)| index)
}

/// Pick the nearest dynamic probe that owns a slot, skipping `exclude`
///
/// `probes` must be sorted nearest-first.
pub fn select_realtime(probes: &[ProbeHandle], exclude: Option<ProbeId>) -> Option<usize> {
    probes.iter().position(|handle| {
        let probe = handle.read();
        probe.is_dynamic && probe.has_slot() && Some(probe.id()) != exclude
    })
}
