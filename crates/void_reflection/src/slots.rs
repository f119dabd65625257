//! Cube Map Slot Allocation
//!
//! Backend-agnostic tracking of which cube-map-array layers belong to which
//! probe. The GPU array has `capacity + 2` layers; the trailing two are
//! capture scratch channels and are never handed out.
//!
//! # Reclamation
//!
//! When the pool is empty a slot is stolen from the probe farthest down the
//! nearest-first ordering, outside the top-`capacity` window. That window is
//! guaranteed slots, so a steal can only fail if the free list was corrupted.

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, Result};
use crate::probe::{ProbeHandle, ProbeId};

/// Slot pool manager
#[derive(Clone, Debug)]
pub struct SlotPool {
    capacity: u32,

    /// `owners[slot]` is the probe holding that slot
    owners: Vec<Option<ProbeId>>,

    /// Free slot indices (stack, pop from end)
    free_slots: Vec<u32>,

    stats: SlotStats,
}

impl SlotPool {
    /// Create a pool of `capacity` slots
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            owners: (0..capacity).map(|_| None).collect(),
            // Stack: push N-1 .. 0 -> pop returns 0, 1, 2, ...
            free_slots: (0..capacity).rev().collect(),
            stats: SlotStats::default(),
        }
    }

    /// Number of slots handed out to probes
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Layer of the mainline capture scratch channel
    pub fn scratch_layer(&self) -> u32 {
        self.capacity
    }

    /// Layer of the realtime capture scratch channel
    pub fn realtime_layer(&self) -> u32 {
        self.capacity + 1
    }

    /// Total layers the GPU cube map array must hold
    pub fn layer_count(&self) -> u32 {
        self.capacity + 2
    }

    /// Begin a new frame
    pub fn begin_frame(&mut self) {
        self.stats.allocations_this_frame = 0;
        self.stats.steals_this_frame = 0;
    }

    /// Take a free slot for `probe`, if any is left
    pub fn allocate_free(&mut self, probe: ProbeId) -> Option<u32> {
        let slot = self.free_slots.pop()?;
        self.owners[slot as usize] = Some(probe);
        self.stats.allocations_this_frame += 1;
        self.stats.total_allocations += 1;
        Some(slot)
    }

    /// Allocate a slot for `probe`
    ///
    /// `ordered` is the live probe list sorted nearest-first. If no slot is
    /// free, the slot of the last probe at index `>= capacity` that owns one
    /// is detached and reassigned. `protected` (the probe mid-capture) is only
    /// robbed when it is the sole candidate; the returned [`SlotGrant`] says so
    /// the caller can abort that capture.
    pub fn allocate(
        &mut self,
        probe: ProbeId,
        ordered: &[ProbeHandle],
        protected: Option<ProbeId>,
    ) -> Result<SlotGrant> {
        if let Some(slot) = self.allocate_free(probe) {
            return Ok(SlotGrant { slot, robbed: None });
        }

        let tail = ordered.get(self.capacity as usize..).unwrap_or(&[]);
        let victim = tail
            .iter()
            .rev()
            .filter(|handle| handle.read().has_slot())
            .find(|handle| Some(handle.id()) != protected)
            .or_else(|| tail.iter().rev().find(|handle| handle.read().has_slot()));

        let victim = victim.ok_or(ProbeError::SlotPoolExhausted {
            capacity: self.capacity,
        })?;

        let mut robbed = victim.write();
        let slot = robbed.slot as u32;
        robbed.clear_slot();
        self.owners[slot as usize] = Some(probe);
        self.stats.steals_this_frame += 1;
        self.stats.total_steals += 1;
        self.stats.total_allocations += 1;

        log::debug!(
            "Reflection probe {:?} stole slot {} from {:?}",
            probe,
            slot,
            robbed.id()
        );

        Ok(SlotGrant {
            slot,
            robbed: Some(robbed.id()),
        })
    }

    /// Return a slot to the pool
    pub fn free(&mut self, slot: u32) -> Result<()> {
        let owner = self
            .owners
            .get_mut(slot as usize)
            .ok_or(ProbeError::InvalidSlot {
                slot,
                capacity: self.capacity,
            })?;
        if owner.take().is_none() {
            return Err(ProbeError::SlotNotOwned(slot));
        }
        self.free_slots.push(slot);
        Ok(())
    }

    /// Owner of a slot
    pub fn owner(&self, slot: u32) -> Option<ProbeId> {
        self.owners.get(slot as usize).copied().flatten()
    }

    /// Number of owned slots
    pub fn allocated_count(&self) -> usize {
        self.capacity as usize - self.free_slots.len()
    }

    /// Number of free slots
    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Check if the pool is full
    pub fn is_full(&self) -> bool {
        self.free_slots.is_empty()
    }

    /// Get utilization ratio (0-1)
    pub fn utilization(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        1.0 - (self.free_slots.len() as f32 / self.capacity as f32)
    }

    /// Get pool statistics
    pub fn stats(&self) -> &SlotStats {
        &self.stats
    }

    /// Reset pool (clears all ownership)
    pub fn reset(&mut self) {
        *self = Self::new(self.capacity);
    }
}

impl Default for SlotPool {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Result of a successful allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotGrant {
    /// Assigned slot
    pub slot: u32,
    /// Probe whose slot was reclaimed, if the pool was exhausted
    pub robbed: Option<ProbeId>,
}

/// Pool statistics
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SlotStats {
    /// Allocations made this frame
    pub allocations_this_frame: u32,

    /// Slots reclaimed from far probes this frame
    pub steals_this_frame: u32,

    /// Total allocations ever made
    pub total_allocations: u64,

    /// Total slots ever reclaimed
    pub total_steals: u64,
}

/// Slot pool state for hot-reload
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlotPoolState {
    /// Pool capacity
    pub capacity: u32,

    /// Slot owners, indexed by slot
    pub owners: Vec<Option<ProbeId>>,
}

impl SlotPool {
    /// Serialize state for hot-reload
    pub fn save_state(&self) -> SlotPoolState {
        SlotPoolState {
            capacity: self.capacity,
            owners: self.owners.clone(),
        }
    }

    /// Restore state from hot-reload
    pub fn restore_state(&mut self, state: SlotPoolState) {
        self.capacity = state.capacity;
        self.owners = state.owners;
        self.owners.resize(self.capacity as usize, None);

        // Rebuild free list
        self.free_slots = (0..self.capacity)
            .rev()
            .filter(|slot| self.owners[*slot as usize].is_none())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ReflectionProbe;
    use glam::Vec3;

    fn probes(count: usize) -> Vec<ProbeHandle> {
        (0..count)
            .map(|i| ProbeHandle::new(ReflectionProbe::new(Vec3::X * i as f32, 1.0)))
            .collect()
    }

    #[test]
    fn test_pool_allocation() {
        let mut pool = SlotPool::new(4);
        let list = probes(2);

        let grant = pool.allocate(list[0].id(), &list, None).unwrap();
        assert_eq!(grant.slot, 0); // Stack pops lowest first
        assert_eq!(grant.robbed, None);

        let grant = pool.allocate(list[1].id(), &list, None).unwrap();
        assert_eq!(grant.slot, 1);

        assert_eq!(pool.allocated_count(), 2);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.owner(1), Some(list[1].id()));
    }

    #[test]
    fn test_scratch_layers() {
        let pool = SlotPool::new(4);
        assert_eq!(pool.scratch_layer(), 4);
        assert_eq!(pool.realtime_layer(), 5);
        assert_eq!(pool.layer_count(), 6);
    }

    #[test]
    fn test_pool_free() {
        let mut pool = SlotPool::new(2);
        let list = probes(2);
        pool.allocate(list[0].id(), &list, None).unwrap();
        pool.allocate(list[1].id(), &list, None).unwrap();
        assert!(pool.is_full());

        pool.free(0).unwrap();
        assert!(!pool.is_full());
        assert_eq!(pool.owner(0), None);

        assert!(matches!(pool.free(0), Err(ProbeError::SlotNotOwned(0))));
        assert!(matches!(pool.free(9), Err(ProbeError::InvalidSlot { slot: 9, .. })));
    }

    #[test]
    fn test_steal_from_farthest() {
        let mut pool = SlotPool::new(2);
        let list = probes(4);

        // The two far probes own the slots
        for i in [2, 3] {
            let grant = pool.allocate(list[i].id(), &list, None).unwrap();
            list[i].write().slot = grant.slot as i32;
        }

        let grant = pool.allocate(list[0].id(), &list, None).unwrap();
        assert_eq!(grant.robbed, Some(list[3].id()));
        assert!(!list[3].read().has_slot());
        assert!(list[2].read().has_slot());
        assert_eq!(pool.owner(grant.slot), Some(list[0].id()));
        assert_eq!(pool.stats().steals_this_frame, 1);
    }

    #[test]
    fn test_steal_skips_protected() {
        let mut pool = SlotPool::new(2);
        let list = probes(4);
        for i in [2, 3] {
            let grant = pool.allocate(list[i].id(), &list, None).unwrap();
            list[i].write().slot = grant.slot as i32;
        }

        let grant = pool
            .allocate(list[0].id(), &list, Some(list[3].id()))
            .unwrap();
        assert_eq!(grant.robbed, Some(list[2].id()));
        assert!(list[3].read().has_slot());
    }

    #[test]
    fn test_steal_protected_as_last_resort() {
        let mut pool = SlotPool::new(1);
        let list = probes(2);
        let grant = pool.allocate(list[1].id(), &list, None).unwrap();
        list[1].write().slot = grant.slot as i32;

        let grant = pool
            .allocate(list[0].id(), &list, Some(list[1].id()))
            .unwrap();
        assert_eq!(grant.robbed, Some(list[1].id()));
    }

    #[test]
    fn test_exhausted() {
        let mut pool = SlotPool::new(2);
        let list = probes(2);
        for probe in &list {
            let grant = pool.allocate(probe.id(), &list, None).unwrap();
            probe.write().slot = grant.slot as i32;
        }

        // Every owner is inside the guaranteed window
        let extra = ProbeHandle::new(ReflectionProbe::new(Vec3::ZERO, 1.0));
        assert!(matches!(
            pool.allocate(extra.id(), &list, None),
            Err(ProbeError::SlotPoolExhausted { capacity: 2 })
        ));
    }

    #[test]
    fn test_utilization() {
        let mut pool = SlotPool::new(4);
        let list = probes(2);
        assert_eq!(pool.utilization(), 0.0);

        pool.allocate(list[0].id(), &list, None).unwrap();
        assert!((pool.utilization() - 0.25).abs() < 0.01);

        pool.allocate(list[1].id(), &list, None).unwrap();
        assert!((pool.utilization() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_state_save_restore() {
        let mut pool = SlotPool::new(4);
        let list = probes(2);
        pool.allocate(list[0].id(), &list, None).unwrap();
        pool.allocate(list[1].id(), &list, None).unwrap();

        let json = serde_json::to_string(&pool.save_state()).unwrap();
        let state: SlotPoolState = serde_json::from_str(&json).unwrap();

        let mut restored = SlotPool::new(1);
        restored.restore_state(state);

        assert_eq!(restored.capacity(), 4);
        assert_eq!(restored.allocated_count(), 2);
        assert_eq!(restored.owner(0), Some(list[0].id()));
        assert_eq!(restored.allocate_free(list[0].id()), Some(2));
    }
}
