//! Probe Capture Pipeline
//!
//! Turns "capture face F of probe P" into a backend-agnostic command list:
//! render the scene from the probe origin into a super-sampled scratch
//! target, halve it down a mip chain, and copy each level into a scratch
//! channel of the cube map array.
//!
//! Once all six faces are in the scratch channel, [`CapturePipeline::convolve`]
//! commits the base level into the probe's slot and writes the roughness mip
//! chain (radiance) and the diffuse irradiance map from that channel. The
//! probe's slot layer is only ever written by `convolve`, so a half-captured
//! probe keeps exposing its previous cycle.
//!
//! # Channels
//!
//! ```text
//! layer 0 .. N-1   probe slots
//! layer N          mainline scratch channel (one face per frame)
//! layer N+1        realtime scratch channel (six faces in one frame)
//! ```

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::ProbeConfig;

/// One face of a cube map
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CubeFace {
    /// +X
    PositiveX = 0,
    /// -X
    NegativeX = 1,
    /// +Y
    PositiveY = 2,
    /// -Y
    NegativeY = 3,
    /// +Z
    PositiveZ = 4,
    /// -Z
    NegativeZ = 5,
}

impl CubeFace {
    /// Number of faces
    pub const COUNT: usize = 6;

    /// All faces in layer order
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Face for a layer-order index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Layer-order index
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this is the last face of a capture cycle
    pub fn is_last(self) -> bool {
        self == CubeFace::NegativeZ
    }

    /// Look direction
    pub fn look(self) -> Vec3 {
        match self {
            CubeFace::PositiveX => Vec3::X,
            CubeFace::NegativeX => Vec3::NEG_X,
            CubeFace::PositiveY => Vec3::Y,
            CubeFace::NegativeY => Vec3::NEG_Y,
            CubeFace::PositiveZ => Vec3::Z,
            CubeFace::NegativeZ => Vec3::NEG_Z,
        }
    }

    /// Up direction (cube map convention)
    pub fn up(self) -> Vec3 {
        match self {
            CubeFace::PositiveY => Vec3::Z,
            CubeFace::NegativeY => Vec3::NEG_Z,
            _ => Vec3::NEG_Y,
        }
    }

    /// View matrix looking out of this face from `origin`
    pub fn view_matrix(self, origin: Vec3) -> Mat4 {
        Mat4::look_at_rh(origin, origin + self.look(), self.up())
    }
}

/// GPU resources the backend must create before the first capture
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptureResources {
    /// Cube face resolution of the probe array
    pub cube_resolution: u32,
    /// Layers in the probe cube map array (slots + 2 scratch channels)
    pub cube_layers: u32,
    /// Mip levels per probe cube map
    pub cube_mips: u32,
    /// Irradiance cube face resolution
    pub irradiance_resolution: u32,
    /// Layers in the irradiance cube map array (one per slot)
    pub irradiance_layers: u32,
    /// Super-sampled scratch render target size
    pub scratch_resolution: u32,
    /// Downsample chain level sizes, largest first
    pub mip_chain: Vec<u32>,
}

/// A capture command ready for the backend
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureCommand {
    /// Allocate every capture resource
    CreateResources(CaptureResources),

    /// Render the scene into the scratch target
    RenderFace {
        /// Capture origin
        origin: Vec3,
        /// Face being captured
        face: CubeFace,
        /// View matrix for the face
        view: Mat4,
        /// Scratch target resolution
        resolution: u32,
    },

    /// Halve the previous level (level 0 reads the scratch target)
    Downsample {
        /// Destination chain level
        level: u32,
        /// Destination resolution
        resolution: u32,
    },

    /// Copy a chain level into a cube map array layer
    CopyMip {
        /// Source chain level
        level: u32,
        /// Destination layer
        layer: u32,
        /// Destination face
        face: CubeFace,
        /// Destination mip
        mip: u32,
    },

    /// Copy mip 0 of all six faces between layers
    CommitBase {
        /// Scratch channel holding the finished capture
        source_layer: u32,
        /// Probe slot
        target_layer: u32,
    },

    /// Prefiltered radiance for one roughness level of one face
    Radiance {
        /// Scratch channel holding the finished capture
        source_layer: u32,
        /// Mip sampled from the source
        source_mip: u32,
        /// Probe slot
        target_layer: u32,
        /// Mip written in the slot
        target_mip: u32,
        /// Face written
        face: CubeFace,
        /// Roughness for this level (0-1)
        roughness: f32,
    },

    /// Diffuse irradiance for one face
    Irradiance {
        /// Scratch channel holding the finished capture
        source_layer: u32,
        /// Mip sampled from the source
        source_mip: u32,
        /// Irradiance array layer (the probe slot)
        target_layer: u32,
        /// Face written
        face: CubeFace,
    },
}

impl CaptureCommand {
    /// Layer of the probe cube map array this command writes, if any
    pub fn written_layer(&self) -> Option<u32> {
        match self {
            Self::CopyMip { layer, .. } => Some(*layer),
            Self::CommitBase { target_layer, .. } => Some(*target_layer),
            Self::Radiance { target_layer, .. } => Some(*target_layer),
            _ => None,
        }
    }
}

/// GPU side of probe capture
///
/// Implemented by the rendering backend. Commands of one call must be
/// executed in order.
pub trait CaptureBackend {
    /// Execute a batch of capture commands
    fn submit(&mut self, commands: &[CaptureCommand]);

    /// Nudge a capture origin off occluding geometry
    ///
    /// Called once before the first face of every capture cycle.
    fn adjust_origin(&mut self, origin: Vec3, _radius: f32) -> Vec3 {
        origin
    }
}

/// Capture statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Faces rendered this frame
    pub faces_this_frame: u32,
    /// Convolutions committed this frame
    pub convolutions_this_frame: u32,
    /// Total faces rendered
    pub total_faces: u64,
    /// Total convolutions committed
    pub total_convolutions: u64,
}

/// Command generator for probe capture
#[derive(Clone, Debug)]
pub struct CapturePipeline {
    resources: CaptureResources,
    irradiance_level: u32,
    initialized: bool,
    commands: Vec<CaptureCommand>,
    stats: CaptureStats,
}

impl CapturePipeline {
    /// Plan resources for `config`
    pub fn new(config: &ProbeConfig) -> Self {
        let levels = config.mip_count();
        let mip_chain: Vec<u32> = (0..levels).map(|i| config.resolution >> i).collect();
        let irradiance_level = mip_chain
            .iter()
            .position(|res| *res == config.irradiance_resolution)
            .unwrap_or(0) as u32;

        Self {
            resources: CaptureResources {
                cube_resolution: config.resolution,
                cube_layers: config.probe_count + 2,
                cube_mips: levels,
                irradiance_resolution: config.irradiance_resolution,
                irradiance_layers: config.probe_count,
                scratch_resolution: config.resolution * config.supersample,
                mip_chain,
            },
            irradiance_level,
            initialized: false,
            commands: Vec::new(),
            stats: CaptureStats::default(),
        }
    }

    /// Planned resources
    pub fn resources(&self) -> &CaptureResources {
        &self.resources
    }

    /// Whether resources were created
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of mip chain levels
    pub fn levels(&self) -> u32 {
        self.resources.mip_chain.len() as u32
    }

    /// Get capture statistics
    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Begin a new frame
    pub fn begin_frame(&mut self) {
        self.stats.faces_this_frame = 0;
        self.stats.convolutions_this_frame = 0;
    }

    /// Create GPU resources once
    ///
    /// Returns true if resources were created by this call.
    pub fn initialize(&mut self, backend: &mut dyn CaptureBackend) -> bool {
        if self.initialized {
            return false;
        }
        log::info!(
            "Creating reflection probe resources: {} layers at {}px, {} mips, irradiance {}px",
            self.resources.cube_layers,
            self.resources.cube_resolution,
            self.resources.cube_mips,
            self.resources.irradiance_resolution,
        );
        self.commands.clear();
        self.commands
            .push(CaptureCommand::CreateResources(self.resources.clone()));
        self.flush(backend);
        self.initialized = true;
        true
    }

    /// Render one face into a scratch channel
    pub fn capture_face(
        &mut self,
        backend: &mut dyn CaptureBackend,
        origin: Vec3,
        face: CubeFace,
        channel: u32,
    ) {
        self.commands.clear();
        self.commands.push(CaptureCommand::RenderFace {
            origin,
            face,
            view: face.view_matrix(origin),
            resolution: self.resources.scratch_resolution,
        });

        for (level, resolution) in self.resources.mip_chain.iter().enumerate() {
            let level = level as u32;
            self.commands.push(CaptureCommand::Downsample {
                level,
                resolution: *resolution,
            });
            self.commands.push(CaptureCommand::CopyMip {
                level,
                layer: channel,
                face,
                mip: level,
            });
        }

        self.flush(backend);
        self.stats.faces_this_frame += 1;
        self.stats.total_faces += 1;
        log::trace!("Captured face {:?} at {:?} into layer {}", face, origin, channel);
    }

    /// Commit a finished six-face capture from `channel` into `slot`
    pub fn convolve(&mut self, backend: &mut dyn CaptureBackend, channel: u32, slot: u32) {
        let levels = self.levels();
        self.commands.clear();
        self.commands.push(CaptureCommand::CommitBase {
            source_layer: channel,
            target_layer: slot,
        });

        for mip in 1..levels {
            let roughness = mip as f32 / (levels - 1) as f32;
            for face in CubeFace::ALL {
                self.commands.push(CaptureCommand::Radiance {
                    source_layer: channel,
                    source_mip: mip - 1,
                    target_layer: slot,
                    target_mip: mip,
                    face,
                    roughness,
                });
            }
        }

        for face in CubeFace::ALL {
            self.commands.push(CaptureCommand::Irradiance {
                source_layer: channel,
                source_mip: self.irradiance_level,
                target_layer: slot,
                face,
            });
        }

        self.flush(backend);
        self.stats.convolutions_this_frame += 1;
        self.stats.total_convolutions += 1;
    }

    /// Render all six faces into `channel` in one go
    ///
    /// Nothing reaches a slot until [`CapturePipeline::convolve`] runs.
    pub fn capture_all(&mut self, backend: &mut dyn CaptureBackend, origin: Vec3, channel: u32) {
        for face in CubeFace::ALL {
            self.capture_face(backend, origin, face, channel);
        }
    }

    fn flush(&mut self, backend: &mut dyn CaptureBackend) {
        backend.submit(&self.commands);
        self.commands.clear();
    }
}
