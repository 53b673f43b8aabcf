//! Slot table and counters guarded by the pool lock
//!
//! Everything in here is synchronous. Callers hold the pool mutex for the
//! duration of each method and perform driver I/O only after releasing it.

use skiff_core::{
    ActionIdentity, ContainerId, PoolConfig, Result, SandboxHandle, SkiffError, SlotState,
    SlotSummary,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// One tracked container
#[derive(Debug)]
pub(crate) struct Slot {
    pub id: ContainerId,
    pub handle: SandboxHandle,
    pub key: Option<ActionIdentity>,
    pub state: SlotState,
    pub created_at: Instant,
    pub last_returned_at: Instant,
    /// Monotonic park counter, orders releases that share an instant
    pub returned_seq: u64,
    pub healthy: bool,
}

impl Slot {
    fn summary(&self) -> SlotSummary {
        SlotSummary {
            id: self.id.clone(),
            state: self.state,
            key: self.key.clone(),
            healthy: self.healthy,
        }
    }
}

/// A slot promoted from idle to active for reuse
#[derive(Debug)]
pub(crate) struct Checkout {
    pub id: ContainerId,
    pub handle: SandboxHandle,
    pub key: ActionIdentity,
}

#[derive(Debug)]
pub(crate) struct PoolState {
    slots: HashMap<u64, Slot>,
    /// Idle keyed slots by action; a lookup aid, never an owner
    idle_by_key: HashMap<ActionIdentity, Vec<u64>>,
    idle: usize,
    active: usize,

    /// Admissions granted but not yet backed by a slot
    pub reserved: usize,
    /// Callers queued for capacity
    pub waiting: usize,

    next_seq: u64,
    next_returned_seq: u64,

    pub max_active: usize,
    pub max_idle: usize,
    pub gc_enabled: bool,
    pub gc_threshold: Duration,
    pub gc_frequency: Duration,
    pub init_timeout: Duration,
    defaults: PoolConfig,
}

impl PoolState {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            slots: HashMap::new(),
            idle_by_key: HashMap::new(),
            idle: 0,
            active: 0,
            reserved: 0,
            waiting: 0,
            next_seq: 0,
            next_returned_seq: 0,
            max_active: config.max_active,
            max_idle: config.max_idle,
            gc_enabled: config.gc_enabled,
            gc_threshold: config.gc_threshold,
            gc_frequency: config.gc_frequency,
            init_timeout: config.init_timeout,
            defaults: config,
        }
    }

    pub const fn idle_count(&self) -> usize {
        self.idle
    }

    pub const fn active_count(&self) -> usize {
        self.active
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub const fn defaults(&self) -> &PoolConfig {
        &self.defaults
    }

    /// Whether one more container may be checked out
    pub const fn has_capacity(&self) -> bool {
        self.active + self.reserved < self.max_active
    }

    pub fn next_id(&mut self, key: Option<&ActionIdentity>) -> ContainerId {
        self.next_seq += 1;
        ContainerId::new(&self.defaults.name_prefix, self.next_seq, key)
    }

    /// Track a freshly created container as active.
    pub fn insert_active(
        &mut self,
        id: ContainerId,
        handle: SandboxHandle,
        key: Option<ActionIdentity>,
        now: Instant,
    ) {
        let slot = Slot {
            id: id.clone(),
            handle,
            key,
            state: SlotState::Active,
            created_at: now,
            last_returned_at: now,
            returned_seq: 0,
            healthy: true,
        };
        self.slots.insert(id.seq(), slot);
        self.active += 1;
    }

    /// Promote the most recently parked idle slot bound to `key`.
    pub fn take_idle_for(&mut self, key: &ActionIdentity) -> Option<Checkout> {
        let seqs = self.idle_by_key.get_mut(key)?;
        let seq = seqs.pop()?;
        if seqs.is_empty() {
            self.idle_by_key.remove(key);
        }

        let slot = self.slots.get_mut(&seq)?;
        debug_assert_eq!(slot.state, SlotState::Idle);
        slot.state = SlotState::Active;
        self.idle -= 1;
        self.active += 1;

        Some(Checkout {
            id: slot.id.clone(),
            handle: slot.handle.clone(),
            key: key.clone(),
        })
    }

    /// Return an active slot to the idle set.
    pub fn park(&mut self, seq: u64, now: Instant) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&seq)
            .ok_or_else(|| SkiffError::UnknownContainer(format!("seq {seq}")))?;
        if slot.state != SlotState::Active {
            return Err(SkiffError::UnknownContainer(format!(
                "{} is not checked out",
                slot.id
            )));
        }

        self.next_returned_seq += 1;
        slot.state = SlotState::Idle;
        slot.last_returned_at = now;
        slot.returned_seq = self.next_returned_seq;
        if let Some(key) = &slot.key {
            self.idle_by_key.entry(key.clone()).or_default().push(seq);
        }
        self.active -= 1;
        self.idle += 1;
        Ok(())
    }

    pub fn mark_unhealthy(&mut self, seq: u64) {
        if let Some(slot) = self.slots.get_mut(&seq) {
            slot.healthy = false;
        }
    }

    /// Untrack a checked-out slot if it has been marked unhealthy.
    pub fn remove_if_unhealthy(&mut self, seq: u64) -> Option<Slot> {
        let slot = self.slots.get(&seq)?;
        if slot.healthy || slot.state != SlotState::Active {
            return None;
        }
        self.remove(seq)
    }

    /// Stop tracking a slot, whatever its state.
    pub fn remove(&mut self, seq: u64) -> Option<Slot> {
        let slot = self.slots.remove(&seq)?;
        match slot.state {
            SlotState::Active => self.active -= 1,
            SlotState::Idle => {
                self.idle -= 1;
                if let Some(key) = &slot.key {
                    self.unindex(key, seq);
                }
            }
        }
        Some(slot)
    }

    fn unindex(&mut self, key: &ActionIdentity, seq: u64) {
        if let Some(seqs) = self.idle_by_key.get_mut(key) {
            seqs.retain(|s| *s != seq);
            if seqs.is_empty() {
                self.idle_by_key.remove(key);
            }
        }
    }

    /// Remove the longest-idle slots until `idle <= max_idle`.
    pub fn evict_overflow(&mut self) -> Vec<Slot> {
        let mut evicted = Vec::new();
        while self.idle > self.max_idle {
            let Some(seq) = self
                .slots
                .values()
                .filter(|s| s.state == SlotState::Idle)
                .min_by_key(|s| (s.last_returned_at, s.returned_seq))
                .map(|s| s.id.seq())
            else {
                break;
            };
            evicted.extend(self.remove(seq));
        }
        evicted
    }

    /// Remove idle slots that have been parked for at least `gc_threshold`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<Slot> {
        let threshold = self.gc_threshold;
        let expired: Vec<u64> = self
            .slots
            .values()
            .filter(|s| {
                s.state == SlotState::Idle
                    && now.saturating_duration_since(s.last_returned_at) >= threshold
            })
            .map(|s| s.id.seq())
            .collect();
        expired.into_iter().filter_map(|seq| self.remove(seq)).collect()
    }

    pub fn take_all_idle(&mut self) -> Vec<Slot> {
        let idle: Vec<u64> = self
            .slots
            .values()
            .filter(|s| s.state == SlotState::Idle)
            .map(|s| s.id.seq())
            .collect();
        idle.into_iter().filter_map(|seq| self.remove(seq)).collect()
    }

    pub fn summaries(&self) -> Vec<SlotSummary> {
        let mut all: Vec<SlotSummary> = self.slots.values().map(Slot::summary).collect();
        all.sort_by_key(|s| s.id.seq());
        all
    }

    pub fn find(&self, name: &str) -> Option<SlotSummary> {
        self.slots
            .values()
            .find(|s| s.id.name() == name)
            .map(Slot::summary)
    }
}
