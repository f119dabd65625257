//! Reflection Probe Manager
//!
//! Owns the live probe set and drives everything once per frame:
//!
//! 1. Skip the frame entirely during snapshots, teleports and logout
//! 2. Create capture resources on first use
//! 3. Replay deferred kills, then deferred creates
//! 4. Advance a running capture by one face
//! 5. Drop orphaned probes, refresh distances and sort nearest-first
//! 6. Give every probe in the top-N window a slot
//! 7. Re-capture the nearest dynamic probe in full (realtime detail only)
//! 8. If nothing was captured in step 4, start on the stalest top-N probe
//!
//! Structural changes requested while a snapshot pass iterates the probe set
//! go through [`ProbeUpdateQueue`] and are applied at step 3.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::capture::{CaptureBackend, CapturePipeline, CaptureResources};
use crate::config::{DetailLevel, ProbeConfig};
use crate::debug::{self, DebugLine, ProbeDebugConfig};
use crate::neighbors::{self, InfluenceTest, VolumeOverlap};
use crate::probe::{
    InfluenceVolume, ProbeDescriptor, ProbeHandle, ProbeId, ProbeSource, ReflectionProbe,
    NOT_EXPORTED, NO_SLOT,
};
use crate::queue::{ProbeUpdate, ProbeUpdateQueue};
use crate::scheduler::{self, CaptureState, FaceStep, UpdateScheduler};
use crate::slots::SlotPool;
use crate::uniforms::ProbeUniformBuffer;

/// Per-frame scene context
#[derive(Clone, Debug, PartialEq)]
pub struct FrameContext {
    /// Viewer position (world space)
    pub viewer_position: Vec3,
    /// World to view transform used for exported data
    pub view_matrix: Mat4,
    /// A scene-wide teleport or reload is underway
    pub teleport_in_progress: bool,
    /// The session is shutting down
    pub logout_requested: bool,
    /// Ambiance floor of the current lighting environment
    pub minimum_ambiance: f32,
}

impl Default for FrameContext {
    fn default() -> Self {
        Self {
            viewer_position: Vec3::ZERO,
            view_matrix: Mat4::IDENTITY,
            teleport_in_progress: false,
            logout_requested: false,
            minimum_ambiance: 0.0,
        }
    }
}

impl FrameContext {
    /// Context for a viewer at `position`
    pub fn new(viewer_position: Vec3) -> Self {
        Self {
            viewer_position,
            ..Default::default()
        }
    }

    /// Set view matrix
    pub fn with_view(mut self, view: Mat4) -> Self {
        self.view_matrix = view;
        self
    }

    /// Set ambiance floor
    pub fn with_minimum_ambiance(mut self, ambiance: f32) -> Self {
        self.minimum_ambiance = ambiance;
        self
    }
}

/// Spatial partition a candidate volume belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionKind {
    /// Generic volume partition
    Volume,
    /// Terrain partition
    Terrain,
    /// Any other partition; never receives probes
    Other,
}

/// A spatial group offered for probe placement
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateVolume {
    /// Group center (world space)
    pub center: Vec3,
    /// Group edge length
    pub size: f32,
    /// Partition the group belongs to
    pub partition: PartitionKind,
}

/// A scene object that carries its own probe
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicEntity {
    /// Object position (world space)
    pub position: Vec3,
    /// Influence radius
    pub radius: f32,
    /// Oriented box influence, if the object has one
    pub box_transform: Option<Mat4>,
}

/// Manager statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProbeStats {
    /// Frames processed (skipped frames excluded)
    pub frame: u64,
    /// Live probes
    pub live_probes: u32,
    /// Mutations waiting for the next update
    pub pending_updates: u32,
    /// Faces rendered during the last update (realtime included)
    pub faces_this_frame: u32,
    /// Capture cycles committed to a slot
    pub completed_cycles: u64,
    /// Realtime full captures
    pub realtime_captures: u64,
    /// Mainline captures dropped before completion
    pub aborted_captures: u64,
    /// Probes that went live
    pub probes_created: u64,
    /// Probes torn down
    pub probes_deleted: u64,
    /// Slots reclaimed from far probes
    pub slots_stolen: u64,
    /// Updates skipped by a frame guard
    pub skipped_frames: u64,
    /// Neighbor indices dropped by the last uniform pack
    pub neighbors_dropped: u32,
}

/// Serialized manager state for hot-reload
///
/// Slots, neighbors and timestamps are rebuilt by the following updates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReflectionManagerState {
    /// Configuration
    pub config: ProbeConfig,
    /// Live and pending probes, nearest-first
    pub probes: Vec<ProbeDescriptor>,
}

/// Reflection probe registry and per-frame driver
pub struct ReflectionProbeManager<B: CaptureBackend> {
    config: ProbeConfig,
    backend: B,
    probes: Vec<ProbeHandle>,
    queue: ProbeUpdateQueue,
    slots: SlotPool,
    scheduler: UpdateScheduler,
    capture_origin: Vec3,
    pipeline: CapturePipeline,
    uniforms: ProbeUniformBuffer,
    neighbor_test: Box<dyn InfluenceTest>,
    snapshot_in_progress: bool,
    frame: u64,
    view: Mat4,
    minimum_ambiance: f32,
    stats: ProbeStats,
}

impl<B: CaptureBackend> ReflectionProbeManager<B> {
    /// Create a manager; `config` is validated first
    pub fn new(mut config: ProbeConfig, backend: B) -> Self {
        config.validate();
        Self {
            slots: SlotPool::new(config.probe_count),
            pipeline: CapturePipeline::new(&config),
            uniforms: ProbeUniformBuffer::new(
                config.probe_count as usize,
                config.max_neighbor_indices as usize,
            ),
            config,
            backend,
            probes: Vec::new(),
            queue: ProbeUpdateQueue::new(),
            scheduler: UpdateScheduler::new(),
            capture_origin: Vec3::ZERO,
            neighbor_test: Box::new(VolumeOverlap),
            snapshot_in_progress: false,
            frame: 0,
            view: Mat4::IDENTITY,
            minimum_ambiance: 0.0,
            stats: ProbeStats::default(),
        }
    }

    /// Replace the influence intersection predicate
    pub fn with_neighbor_test(mut self, test: impl InfluenceTest + 'static) -> Self {
        self.neighbor_test = Box::new(test);
        self
    }

    /// Get configuration
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Capture backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Capture backend (mutable)
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Live probes, nearest-first as of the last update
    pub fn probes(&self) -> &[ProbeHandle] {
        &self.probes
    }

    /// Number of live probes
    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Pending deferred mutations
    pub fn pending_updates(&self) -> usize {
        self.queue.len()
    }

    /// Slot pool
    pub fn slots(&self) -> &SlotPool {
        &self.slots
    }

    /// Mainline capture state
    pub fn capture_state(&self) -> CaptureState {
        self.scheduler.state()
    }

    /// Resources the backend was (or will be) asked to create
    pub fn resources(&self) -> &CaptureResources {
        self.pipeline.resources()
    }

    /// Frames processed so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Flag a snapshot pass that iterates the probe set
    ///
    /// While set, updates are skipped and registrations are deferred.
    pub fn set_snapshot_in_progress(&mut self, active: bool) {
        self.snapshot_in_progress = active;
    }

    /// Whether a snapshot pass is running
    pub fn is_snapshot_in_progress(&self) -> bool {
        self.snapshot_in_progress
    }

    /// Offer a spatial group for probe placement
    ///
    /// Only volume and terrain groups whose size falls in the configured band
    /// receive a probe.
    pub fn register_volume(&mut self, volume: &CandidateVolume) -> Option<ProbeHandle> {
        if !matches!(volume.partition, PartitionKind::Volume | PartitionKind::Terrain) {
            return None;
        }
        if !self.config.accepts_volume_size(volume.size) {
            return None;
        }

        let mut probe = ReflectionProbe::new(volume.center, self.config.default_radius);
        probe.source = ProbeSource::SpatialGroup;
        Some(self.insert(probe))
    }

    /// Attach a dynamic probe to a scene object
    pub fn register_object(&mut self, entity: &DynamicEntity) -> ProbeHandle {
        let mut probe = ReflectionProbe::new(entity.position, entity.radius).with_dynamic(true);
        if let Some(transform) = entity.box_transform {
            probe = probe.with_box(transform);
        }
        probe.source = ProbeSource::SceneObject;
        self.insert(probe)
    }

    fn insert(&mut self, probe: ReflectionProbe) -> ProbeHandle {
        let handle = ProbeHandle::new(probe);
        if self.snapshot_in_progress {
            self.queue.push(ProbeUpdate::Create(handle.clone()));
        } else {
            self.add_probe(handle.clone());
        }
        handle
    }

    /// Remove a probe explicitly, without waiting for its holders to drop it
    ///
    /// A probe still waiting in the deferred create list never goes live.
    pub fn unregister(&mut self, handle: &ProbeHandle) {
        if self.snapshot_in_progress {
            self.queue.push(ProbeUpdate::Kill(handle.clone()));
        } else if self.queue.cancel_create(handle) {
            log::debug!("Reflection probe {:?} dropped before going live", handle.id());
        } else if let Some(index) = self.probes.iter().position(|h| h.ptr_eq(handle)) {
            self.delete_probe(index);
        }
    }

    fn add_probe(&mut self, handle: ProbeHandle) {
        log::debug!(
            "Reflection probe {:?} created at {:?}",
            handle.id(),
            handle.read().origin
        );
        self.probes.push(handle);
        self.stats.probes_created += 1;
        self.uniforms.invalidate();
    }

    fn delete_probe(&mut self, index: usize) {
        let handle = self.probes.remove(index);
        neighbors::detach(&handle, &self.probes);

        let (id, slot) = {
            let mut probe = handle.write();
            let slot = probe.slot;
            probe.clear_slot();
            probe.probe_index = NOT_EXPORTED;
            (probe.id(), slot)
        };
        if slot != NO_SLOT {
            if let Err(err) = self.slots.free(slot as u32) {
                log::warn!("Reflection probe {:?} held a bad slot: {}", id, err);
            }
        }
        if self.scheduler.abort_if(id) {
            self.stats.aborted_captures += 1;
        }

        self.stats.probes_deleted += 1;
        self.uniforms.invalidate();
        log::debug!("Reflection probe {:?} deleted", id);
    }

    fn apply_pending_updates(&mut self) {
        while let Some(update) = self.queue.pop() {
            match update {
                ProbeUpdate::Kill(handle) => {
                    if let Some(index) = self.probes.iter().position(|h| h.ptr_eq(&handle)) {
                        self.delete_probe(index);
                    }
                }
                ProbeUpdate::Create(handle) => self.add_probe(handle),
            }
        }
    }

    /// Per-frame driver
    ///
    /// Returns false if the frame was skipped.
    pub fn update(&mut self, ctx: &FrameContext) -> bool {
        if !self.config.enabled
            || self.snapshot_in_progress
            || ctx.teleport_in_progress
            || ctx.logout_requested
        {
            self.stats.skipped_frames += 1;
            return false;
        }

        self.frame += 1;
        self.slots.begin_frame();
        self.pipeline.begin_frame();
        if self.view != ctx.view_matrix || self.minimum_ambiance != ctx.minimum_ambiance {
            self.view = ctx.view_matrix;
            self.minimum_ambiance = ctx.minimum_ambiance;
            self.uniforms.invalidate();
        }

        if self.pipeline.initialize(&mut self.backend) {
            self.uniforms.invalidate();
        }

        self.apply_pending_updates();

        if self.probes.is_empty() {
            self.scheduler.reset();
            return true;
        }

        // One face of the running capture
        let mut did_update = false;
        if let Some(step) = self.scheduler.advance() {
            match self.probes.iter().position(|h| h.id() == step.probe) {
                Some(index) => {
                    self.capture_step(index, step);
                    did_update = true;
                }
                None => self.scheduler.reset(),
            }
        }

        self.collect_and_sort(ctx.viewer_position);
        self.assign_window_slots();

        if self.config.detail.is_realtime() {
            self.capture_realtime();
        }

        if !did_update {
            self.begin_capture();
        }

        true
    }

    fn collect_and_sort(&mut self, viewer: Vec3) {
        let mut index = 0;
        while index < self.probes.len() {
            if self.probes[index].holder_count() == 1 {
                self.delete_probe(index);
                continue;
            }
            let mut probe = self.probes[index].write();
            probe.distance = probe.distance_to(viewer);
            index += 1;
        }

        let before: Vec<ProbeId> = self.probes.iter().map(ProbeHandle::id).collect();
        self.probes.sort_by(|a, b| a.read().distance.total_cmp(&b.read().distance));
        if self.probes.iter().map(ProbeHandle::id).ne(before) {
            self.uniforms.invalidate();
        }
    }

    fn include_dynamic(&self) -> bool {
        self.config.detail >= DetailLevel::StaticAndDynamic
    }

    fn assign_window_slots(&mut self) {
        let window = (self.slots.capacity() as usize).min(self.probes.len());
        let include_dynamic = self.include_dynamic();
        for index in 0..window {
            {
                let probe = self.probes[index].read();
                // Dynamic probes are never captured at static-only detail
                if probe.has_slot() || (probe.is_dynamic && !include_dynamic) {
                    continue;
                }
            }

            let id = self.probes[index].id();
            let grant = self
                .slots
                .allocate(id, &self.probes, self.scheduler.capturing_probe())
                .unwrap_or_else(|err| panic!("Reflection probe slot allocation failed: {}", err));

            if let Some(robbed) = grant.robbed {
                self.stats.slots_stolen += 1;
                if self.scheduler.abort_if(robbed) {
                    self.stats.aborted_captures += 1;
                }
            }
            self.probes[index].write().slot = grant.slot as i32;
            self.uniforms.invalidate();
        }
    }

    fn capture_step(&mut self, index: usize, step: FaceStep) {
        let handle = self.probes[index].clone();
        let channel = self.slots.scratch_layer();
        self.pipeline.capture_face(&mut self.backend, self.capture_origin, step.face, channel);
        if step.completes_cycle() {
            self.finish_cycle(&handle, channel);
        }
    }

    fn capture_realtime(&mut self) {
        let exclude = self.scheduler.capturing_probe();
        let Some(index) = scheduler::select_realtime(&self.probes, exclude) else {
            return;
        };

        let handle = self.probes[index].clone();
        let origin = self.adjust_origin(&handle);
        let channel = self.slots.realtime_layer();
        self.pipeline.capture_all(&mut self.backend, origin, channel);
        self.finish_cycle(&handle, channel);
        self.stats.realtime_captures += 1;
    }

    fn begin_capture(&mut self) {
        let window = (self.slots.capacity() as usize).min(self.probes.len());
        let include_dynamic = self.include_dynamic();
        let Some(index) = scheduler::select_oldest(&self.probes, window, include_dynamic) else {
            return;
        };

        let handle = self.probes[index].clone();
        self.capture_origin = self.adjust_origin(&handle);

        self.scheduler.begin(handle.id());
        if let Some(step) = self.scheduler.advance() {
            self.capture_step(index, step);
        }
    }

    /// Let the backend nudge the probe's origin before a new cycle
    fn adjust_origin(&mut self, handle: &ProbeHandle) -> Vec3 {
        let mut probe = handle.write();
        probe.origin = self.backend.adjust_origin(probe.origin, probe.radius);
        probe.origin
    }

    /// Commit the capture in `channel` to the probe's slot and refresh its edges
    fn finish_cycle(&mut self, handle: &ProbeHandle, channel: u32) {
        let slot = handle.read().slot;
        if slot == NO_SLOT {
            log::debug!(
                "Reflection probe {:?} lost its slot, discarding capture",
                handle.id()
            );
            return;
        }

        self.pipeline.convolve(&mut self.backend, channel, slot as u32);
        {
            let mut probe = handle.write();
            probe.last_update_frame = self.frame;
            probe.completed_cycles += 1;
        }
        let count = neighbors::rebuild(handle, &self.probes, self.neighbor_test.as_ref());

        self.stats.completed_cycles += 1;
        self.uniforms.invalidate();
        log::debug!(
            "Reflection probe {:?} refreshed into slot {} with {} neighbors",
            handle.id(),
            slot,
            count
        );
    }

    fn assign_export_indices(&mut self, max_count: usize) -> usize {
        let mut count = 0;
        for handle in &self.probes {
            let mut probe = handle.write();
            if count < max_count && probe.has_slot() {
                probe.probe_index = count as i32;
                probe.last_bind_frame = self.frame;
                count += 1;
            } else {
                probe.probe_index = NOT_EXPORTED;
            }
        }
        count
    }

    /// Nearest-first probes that own a slot, at most `max_count`, `None`-padded
    ///
    /// Assigns each probe its export index (`-1` for everything left out).
    /// The returned handles count as holders until dropped.
    pub fn export_snapshot(&mut self, max_count: usize) -> Vec<Option<ProbeHandle>> {
        self.assign_export_indices(max_count);
        self.uniforms.invalidate();

        let mut snapshot: Vec<Option<ProbeHandle>> = self
            .probes
            .iter()
            .filter(|handle| handle.read().probe_index != NOT_EXPORTED)
            .cloned()
            .map(Some)
            .collect();
        snapshot.resize(max_count, None);
        snapshot
    }

    /// Packed probe data for the shading stage
    ///
    /// Repacks only after an invalidation. Returns `None` before capture
    /// resources exist.
    pub fn bind_for_shading(&mut self) -> Option<&ProbeUniformBuffer> {
        if !self.pipeline.is_initialized() {
            return None;
        }
        if self.uniforms.is_dirty() && !self.snapshot_in_progress {
            self.assign_export_indices(self.slots.capacity() as usize);
            self.uniforms
                .pack(&self.probes, &self.view, self.minimum_ambiance);
        }
        Some(&self.uniforms)
    }

    /// Translate every probe by `offset` after the scene origin moved
    pub fn notify_origin_shift(&mut self, offset: Vec3) {
        let shift = Mat4::from_translation(offset);
        for handle in self.probes.iter().chain(self.queue.creates()) {
            let mut probe = handle.write();
            probe.origin += offset;
            if let Some(transform) = probe.box_transform() {
                probe.influence = InfluenceVolume::Box(shift * transform);
            }
        }
        self.capture_origin += offset;
        self.uniforms.invalidate();
    }

    /// Mark every probe stale so the scheduler revisits all of them
    pub fn force_full_recapture(&mut self) {
        for handle in &self.probes {
            handle.write().last_update_frame = 0;
        }
        log::debug!("Full reflection probe recapture requested");
    }

    /// Neighbor-graph debug lines
    pub fn debug_lines(&self, config: &ProbeDebugConfig) -> Vec<DebugLine> {
        debug::neighbor_lines(&self.probes, config)
    }

    /// Get statistics
    pub fn stats(&self) -> ProbeStats {
        ProbeStats {
            frame: self.frame,
            live_probes: self.probes.len() as u32,
            pending_updates: self.queue.len() as u32,
            faces_this_frame: self.pipeline.stats().faces_this_frame,
            slots_stolen: self.slots.stats().total_steals,
            neighbors_dropped: self.uniforms.stats().neighbors_dropped,
            ..self.stats.clone()
        }
    }

    /// Serialize state for hot-reload
    pub fn save_state(&self) -> ReflectionManagerState {
        ReflectionManagerState {
            config: self.config.clone(),
            probes: self
                .probes
                .iter()
                .chain(self.queue.creates())
                .map(|handle| ProbeDescriptor::from(&*handle.read()))
                .collect(),
        }
    }

    /// Restore state from hot-reload
    ///
    /// Returns the handles of the recreated probes; callers must keep them
    /// or the probes are collected on the next update. Returns `None` and
    /// leaves the live set alone while a snapshot pass is running.
    pub fn restore_state(&mut self, state: ReflectionManagerState) -> Option<Vec<ProbeHandle>> {
        if self.snapshot_in_progress {
            log::warn!("Reflection probe state restore ignored during a snapshot pass");
            return None;
        }

        let mut config = state.config;
        config.validate();

        self.queue.clear();
        self.probes.clear();
        self.scheduler.reset();
        if config != self.config {
            self.pipeline = CapturePipeline::new(&config);
            self.uniforms = ProbeUniformBuffer::new(
                config.probe_count as usize,
                config.max_neighbor_indices as usize,
            );
            self.slots = SlotPool::new(config.probe_count);
            self.config = config;
        } else {
            self.slots.reset();
            self.uniforms.invalidate();
        }

        let handles: Vec<ProbeHandle> = state
            .probes
            .iter()
            .map(|desc| self.insert(ReflectionProbe::from(desc)))
            .collect();
        log::info!("Restored {} reflection probes", handles.len());
        Some(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureCommand;

    #[derive(Default)]
    struct CountingBackend {
        submits: usize,
        renders: usize,
    }

    impl CaptureBackend for CountingBackend {
        fn submit(&mut self, commands: &[CaptureCommand]) {
            self.submits += 1;
            self.renders += commands
                .iter()
                .filter(|c| matches!(c, CaptureCommand::RenderFace { .. }))
                .count();
        }
    }

    fn manager(count: u32) -> ReflectionProbeManager<CountingBackend> {
        ReflectionProbeManager::new(
            ProbeConfig::default().with_probe_count(count),
            CountingBackend::default(),
        )
    }

    fn volume(x: f32) -> CandidateVolume {
        CandidateVolume {
            center: Vec3::new(x, 0.0, 0.0),
            size: 16.0,
            partition: PartitionKind::Volume,
        }
    }

    #[test]
    fn test_register_volume_filters() {
        let mut mgr = manager(4);
        assert!(mgr.register_volume(&volume(0.0)).is_some());
        assert!(mgr
            .register_volume(&CandidateVolume { size: 4.0, ..volume(0.0) })
            .is_none());
        assert!(mgr
            .register_volume(&CandidateVolume {
                partition: PartitionKind::Other,
                ..volume(0.0)
            })
            .is_none());
        let terrain = mgr.register_volume(&CandidateVolume {
            partition: PartitionKind::Terrain,
            ..volume(0.0)
        });
        assert!(terrain.is_some());
        assert_eq!(mgr.probe_count(), 2);
    }

    #[test]
    fn test_register_object_is_dynamic() {
        let mut mgr = manager(4);
        let handle = mgr.register_object(&DynamicEntity {
            position: Vec3::ONE,
            radius: 3.0,
            box_transform: Some(Mat4::IDENTITY),
        });
        let probe = handle.read();
        assert!(probe.is_dynamic);
        assert!(probe.is_box());
        assert_eq!(probe.source, ProbeSource::SceneObject);
    }

    #[test]
    fn test_initializes_once() {
        let mut mgr = manager(4);
        assert!(mgr.bind_for_shading().is_none());
        assert!(mgr.update(&FrameContext::default()));
        assert!(mgr.update(&FrameContext::default()));
        // One submit for resource creation, nothing else without probes
        assert_eq!(mgr.backend().submits, 1);
        assert!(mgr.bind_for_shading().is_some());
    }

    #[test]
    fn test_skipped_frames() {
        let mut mgr = manager(4);
        let _probe = mgr.register_volume(&volume(0.0));

        let teleport = FrameContext {
            teleport_in_progress: true,
            ..Default::default()
        };
        let logout = FrameContext {
            logout_requested: true,
            ..Default::default()
        };
        assert!(!mgr.update(&teleport));
        assert!(!mgr.update(&logout));
        mgr.set_snapshot_in_progress(true);
        assert!(!mgr.update(&FrameContext::default()));

        assert_eq!(mgr.frame(), 0);
        assert_eq!(mgr.backend().submits, 0);
        assert_eq!(mgr.stats().skipped_frames, 3);
    }

    #[test]
    fn test_disabled_config_skips() {
        let mut mgr =
            ReflectionProbeManager::new(ProbeConfig::disabled(), CountingBackend::default());
        assert!(!mgr.update(&FrameContext::default()));
    }

    #[test]
    fn test_one_face_per_update() {
        let mut mgr = manager(4);
        let _a = mgr.register_volume(&volume(0.0));
        let _b = mgr.register_volume(&volume(40.0));

        for _ in 0..12 {
            mgr.update(&FrameContext::default());
            assert_eq!(mgr.stats().faces_this_frame, 1);
        }
        assert_eq!(mgr.backend().renders, 12);
        assert_eq!(mgr.stats().completed_cycles, 2);
    }

    #[test]
    fn test_orphan_collected() {
        let mut mgr = manager(4);
        let kept = mgr.register_volume(&volume(0.0));
        let dropped = mgr.register_volume(&volume(40.0));
        drop(dropped);

        mgr.update(&FrameContext::default());
        assert_eq!(mgr.probe_count(), 1);
        assert!(mgr.probes()[0].ptr_eq(kept.as_ref().unwrap()));
        assert_eq!(mgr.slots().allocated_count(), 1);
        assert_eq!(mgr.stats().probes_deleted, 1);
    }

    #[test]
    fn test_force_full_recapture() {
        let mut mgr = manager(4);
        let probe = mgr.register_volume(&volume(0.0)).unwrap();
        for _ in 0..6 {
            mgr.update(&FrameContext::default());
        }
        assert_eq!(probe.read().last_update_frame(), 6);

        mgr.force_full_recapture();
        assert_eq!(probe.read().last_update_frame(), 0);
    }

    #[test]
    fn test_state_save_restore() {
        let mut mgr = manager(4);
        let _a = mgr.register_volume(&volume(0.0));
        let _b = mgr.register_object(&DynamicEntity {
            position: Vec3::Y,
            radius: 2.0,
            box_transform: None,
        });

        let json = serde_json::to_string(&mgr.save_state()).unwrap();
        let state: ReflectionManagerState = serde_json::from_str(&json).unwrap();

        let mut restored = manager(8);
        let handles = restored.restore_state(state).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(restored.config().probe_count, 4);
        assert_eq!(restored.probe_count(), 2);
        assert!(handles.iter().any(|h| h.read().is_dynamic));
    }

    #[test]
    fn test_restore_waits_for_snapshot_pass() {
        let mut mgr = manager(4);
        let live = mgr.register_volume(&volume(0.0)).unwrap();
        mgr.update(&FrameContext::default());
        let state = ReflectionManagerState {
            config: mgr.config().clone(),
            probes: Vec::new(),
        };

        mgr.set_snapshot_in_progress(true);
        assert!(mgr.restore_state(state.clone()).is_none());
        assert_eq!(mgr.probe_count(), 1);
        assert!(mgr.probes()[0].ptr_eq(&live));
        assert!(live.read().has_slot());

        mgr.set_snapshot_in_progress(false);
        assert_eq!(mgr.restore_state(state).map(|h| h.len()), Some(0));
        assert_eq!(mgr.probe_count(), 0);
    }
}
