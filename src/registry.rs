// src/registry.rs
//! Target registry: one atomically published cache slot per tracked target.
//!
//! Targets are registered up front, then the registry is shared behind an
//! `Arc`. Readers clone the current `Arc<CacheEntry>`; the scheduler swaps in
//! a new one. Nothing is ever mutated in place, so a reader sees either the
//! previous entry or the next one, never a mix.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::target::{Target, TargetId};

/// Last-known-good value and failure state of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub last_value: Option<i64>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// Registered, never refreshed successfully.
    Pending,
    /// Holds a value. Failures keep it here.
    Fresh,
}

impl CacheEntry {
    pub fn state(&self) -> CacheState {
        if self.last_value.is_some() {
            CacheState::Fresh
        } else {
            CacheState::Pending
        }
    }
}

/// What a completed refresh did to the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Applied,
    /// A run that started later already published a success.
    Superseded,
    UnknownTarget,
}

struct Published {
    entry: Arc<CacheEntry>,
    /// Sequence number of the run behind `entry.last_value`.
    success_seq: Option<u64>,
}

struct Slot {
    target: Arc<Target>,
    published: RwLock<Published>,
    next_seq: AtomicU64,
    in_flight: AtomicBool,
}

impl Slot {
    fn read(&self) -> RwLockReadGuard<'_, Published> {
        match self.published.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Published> {
        match self.published.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn is_superseded(p: &Published, seq: u64) -> bool {
        p.success_seq.is_some_and(|s| s > seq)
    }
}

/// Held while a single-flight refresh runs; clears the flag on drop.
pub struct InFlight {
    registry: Arc<TargetRegistry>,
    id: TargetId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(slot) = self.registry.slots.get(&self.id) {
            slot.in_flight.store(false, Ordering::Release);
        }
    }
}

#[derive(Default)]
pub struct TargetRegistry {
    slots: BTreeMap<TargetId, Slot>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target with an empty cache entry. Only possible before the registry is shared.
    pub fn register_target(&mut self, target: Target) -> Result<()> {
        if self.slots.contains_key(&target.id) {
            bail!("target {} registered twice", target.id);
        }
        self.slots.insert(
            target.id,
            Slot {
                target: Arc::new(target),
                published: RwLock::new(Published {
                    entry: Arc::new(CacheEntry::default()),
                    success_seq: None,
                }),
                next_seq: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
            },
        );
        Ok(())
    }

    pub fn ids(&self) -> Vec<TargetId> {
        self.slots.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn target(&self, id: TargetId) -> Option<Arc<Target>> {
        self.slots.get(&id).map(|s| Arc::clone(&s.target))
    }

    /// Latest published entry; `None` only if `id` was never registered.
    pub fn get_cached(&self, id: TargetId) -> Option<Arc<CacheEntry>> {
        self.slots.get(&id).map(|s| Arc::clone(&s.read().entry))
    }

    /// Shorthand for the served value.
    pub fn last_value(&self, id: TargetId) -> Option<i64> {
        self.get_cached(id).and_then(|e| e.last_value)
    }

    /// Every target with its current entry, in id order.
    pub fn snapshot(&self) -> Vec<(Arc<Target>, Arc<CacheEntry>)> {
        self.slots
            .values()
            .map(|s| (Arc::clone(&s.target), Arc::clone(&s.read().entry)))
            .collect()
    }

    pub(crate) fn begin_run(&self, id: TargetId) -> Option<u64> {
        self.slots
            .get(&id)
            .map(|s| s.next_seq.fetch_add(1, Ordering::AcqRel))
    }

    /// Claim the single-flight flag for `id`; `None` if a run is already in flight
    /// or the id is unknown.
    pub(crate) fn try_claim(self: &Arc<Self>, id: TargetId) -> Option<InFlight> {
        let slot = self.slots.get(&id)?;
        slot.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(InFlight {
            registry: Arc::clone(self),
            id,
        })
    }

    pub fn is_in_flight(&self, id: TargetId) -> bool {
        self.slots
            .get(&id)
            .is_some_and(|s| s.in_flight.load(Ordering::Acquire))
    }

    pub(crate) fn publish_success(&self, id: TargetId, seq: u64, value: i64, at: DateTime<Utc>) -> Publish {
        let Some(slot) = self.slots.get(&id) else {
            return Publish::UnknownTarget;
        };
        let mut p = slot.write();
        if Slot::is_superseded(&p, seq) {
            return Publish::Superseded;
        }
        let mut next = CacheEntry::clone(&p.entry);
        next.last_value = Some(value);
        next.last_updated_at = Some(at);
        next.success_count += 1;
        p.entry = Arc::new(next);
        p.success_seq = Some(seq);
        Publish::Applied
    }

    pub(crate) fn publish_failure(&self, id: TargetId, seq: u64, error: String, at: DateTime<Utc>) -> Publish {
        let Some(slot) = self.slots.get(&id) else {
            return Publish::UnknownTarget;
        };
        let mut p = slot.write();
        if Slot::is_superseded(&p, seq) {
            return Publish::Superseded;
        }
        let mut next = CacheEntry::clone(&p.entry);
        next.last_error = Some(error);
        next.last_error_at = Some(at);
        next.failure_count += 1;
        p.entry = Arc::new(next);
        Publish::Applied
    }
}
