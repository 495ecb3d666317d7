use std::collections::BTreeMap;

use crate::host::{FormId, RefHandle, WORLD_CONTAINER};
use crate::token::InstanceKey;

pub const GUARD_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GuardEntry {
    ref_handle: RefHandle,
    instance_key: InstanceKey,
}

/// Remembers world references the player dropped so that picking one back
/// up does not count as fresh loot. Fixed ring; the oldest entry is
/// overwritten once it is full. Not persisted.
#[derive(Debug, Clone)]
pub struct RerollGuard {
    player: FormId,
    entries: [GuardEntry; GUARD_CAPACITY],
    cursor: usize,
}

impl RerollGuard {
    pub fn new(player: FormId) -> Self {
        Self {
            player,
            entries: [GuardEntry::default(); GUARD_CAPACITY],
            cursor: 0,
        }
    }

    pub fn player(&self) -> FormId {
        self.player
    }

    pub fn reset(&mut self) {
        self.entries = [GuardEntry::default(); GUARD_CAPACITY];
        self.cursor = 0;
    }

    /// Number of live entries.
    pub fn tracked(&self) -> usize {
        self.entries.iter().filter(|e| e.ref_handle != 0).count()
    }

    pub fn note_drop(
        &mut self,
        from: FormId,
        to: FormId,
        item_count: i32,
        ref_handle: RefHandle,
        instance_key: InstanceKey,
    ) -> bool {
        if ref_handle == 0 || item_count == 0 || from != self.player || to != WORLD_CONTAINER {
            return false;
        }
        self.entries[self.cursor] = GuardEntry {
            ref_handle,
            instance_key,
        };
        self.cursor = (self.cursor + 1) % GUARD_CAPACITY;
        true
    }

    /// True exactly once per recorded drop when the player picks the reference back up.
    pub fn consume_pickup(&mut self, to: FormId, item_count: i32, ref_handle: RefHandle) -> bool {
        if ref_handle == 0 || item_count == 0 || to != self.player {
            return false;
        }
        match self.entries.iter_mut().find(|e| e.ref_handle == ref_handle) {
            Some(entry) => {
                *entry = GuardEntry::default();
                true
            }
            None => false,
        }
    }

    /// Instance key of a dropped reference that was destroyed before pickup.
    pub fn consume_deletion(&mut self, ref_handle: RefHandle) -> Option<InstanceKey> {
        if ref_handle == 0 {
            return None;
        }
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.ref_handle == ref_handle)?;
        let key = entry.instance_key;
        *entry = GuardEntry::default();
        (key != 0).then_some(key)
    }
}

/// Counts items the player moved into containers, by `(container, base form)`.
/// Instance ids are not stable across container transfers, so retrieval is
/// matched on base form and count instead.
#[derive(Debug, Clone, Default)]
pub struct ContainerStash {
    player: FormId,
    counts: BTreeMap<(FormId, FormId), i64>,
}

impl ContainerStash {
    pub fn new(player: FormId) -> Self {
        Self {
            player,
            counts: BTreeMap::new(),
        }
    }

    pub fn note_stash(&mut self, from: FormId, to: FormId, base: FormId, item_count: i32) -> bool {
        if from != self.player || to == WORLD_CONTAINER || to == self.player || base == 0 {
            return false;
        }
        *self.counts.entry((to, base)).or_insert(0) += item_count as i64;
        true
    }

    /// True if the transfer returns previously stashed items to the player.
    pub fn consume_retrieval(&mut self, from: FormId, base: FormId, item_count: i32) -> bool {
        if base == 0 || from == WORLD_CONTAINER {
            return false;
        }
        let Some(remaining) = self.counts.get_mut(&(from, base)) else {
            return false;
        };
        *remaining -= item_count as i64;
        if *remaining <= 0 {
            self.counts.remove(&(from, base));
        }
        true
    }

    pub fn stashed(&self, container: FormId, base: FormId) -> i64 {
        self.counts.get(&(container, base)).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
