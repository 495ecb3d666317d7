use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::core_api::AffixCatalog;
use crate::host::PlayerHoldings;
use crate::roll::{RollEngine, reforge_target_count};
use crate::slot::ItemType;
use crate::slots::InstanceAffixSlots;
use crate::token::{AffixToken, InstanceKey, InstanceStateKey, format_instance_key};

/// Recent evaluations kept through a prune regardless of holdings.
pub const RECENT_KEEP: usize = 2048;
pub const PRUNE_EVERY_INSERTS: usize = 128;
pub const REFORGE_MAX_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstanceRuntimeState {
    pub evolution_xp: u32,
    pub mode_cycle_counter: u32,
    pub mode_index: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunewordInstanceState {
    pub recipe_token: u64,
    pub inserted_runes: u32,
}

/// Crafting overlay owned by the runeword subsystem. The store only persists it
/// and keeps it consistent with reforge, prune and remap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CraftingState {
    pub selected_base: Option<InstanceKey>,
    pub recipe_cursor: u32,
    pub base_cursor: u32,
    pub fragments: BTreeMap<AffixToken, u32>,
    pub instances: BTreeMap<InstanceKey, RunewordInstanceState>,
}

impl CraftingState {
    pub fn add_fragments(&mut self, rune: AffixToken, amount: u32) {
        if rune == 0 || amount == 0 {
            return;
        }
        let entry = self.fragments.entry(rune).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Remove `amount` fragments. Fails without change when fewer are held.
    pub fn take_fragments(&mut self, rune: AffixToken, amount: u32) -> bool {
        let Some(held) = self.fragments.get_mut(&rune) else {
            return amount == 0;
        };
        if *held < amount {
            return false;
        }
        *held -= amount;
        if *held == 0 {
            self.fragments.remove(&rune);
        }
        true
    }

    fn tracks(&self, key: InstanceKey) -> bool {
        self.instances.contains_key(&key) || self.selected_base == Some(key)
    }

    fn forget(&mut self, key: InstanceKey) {
        self.instances.remove(&key);
        if self.selected_base == Some(key) {
            self.selected_base = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReforgeOutcome {
    pub success: bool,
    pub message: String,
}

impl ReforgeOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Durable per-instance state: assigned slots, runtime counters, crafting
/// overlay and the evaluated-once set.
#[derive(Debug, Clone, Default)]
pub struct InstanceStateStore {
    slots: BTreeMap<InstanceKey, InstanceAffixSlots>,
    runtime: HashMap<InstanceStateKey, InstanceRuntimeState>,
    crafting: CraftingState,
    evaluated: BTreeSet<InstanceKey>,
    recent: VecDeque<InstanceKey>,
    insertions_since_prune: usize,
}

impl InstanceStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // --- Slots ---

    /// Record the first roll for `key`. No-op for key 0 or an already evaluated key.
    pub fn assign(&mut self, key: InstanceKey, slots: InstanceAffixSlots) -> bool {
        if key == 0 || self.evaluated.contains(&key) {
            return false;
        }
        self.mark_evaluated(key);
        if slots.is_empty() {
            return true;
        }
        self.slots.insert(key, slots);
        for token in slots.iter() {
            self.ensure_runtime_state(key, token);
        }
        true
    }

    pub fn query(&self, key: InstanceKey) -> Option<&InstanceAffixSlots> {
        self.slots.get(&key)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> impl ExactSizeIterator<Item = (InstanceKey, &InstanceAffixSlots)> {
        self.slots.iter().map(|(key, slots)| (*key, slots))
    }

    /// Insert slots read from a record stream. Existing entries win.
    pub fn insert_loaded_slots(&mut self, key: InstanceKey, slots: InstanceAffixSlots) -> bool {
        if key == 0 || self.slots.contains_key(&key) {
            return false;
        }
        self.slots.insert(key, slots);
        true
    }

    /// Overwrite the slots of an assigned instance; an empty value removes them.
    pub fn replace_slots(&mut self, key: InstanceKey, slots: InstanceAffixSlots) -> bool {
        if !self.slots.contains_key(&key) {
            return false;
        }
        if slots.is_empty() {
            self.slots.remove(&key);
        } else {
            self.slots.insert(key, slots);
        }
        true
    }

    /// Reroll an assigned instance at the cost of one reforge resource.
    pub fn reforge<H: PlayerHoldings + ?Sized>(
        &mut self,
        key: InstanceKey,
        engine: &mut RollEngine,
        catalog: &AffixCatalog,
        item_type: ItemType,
        resource_name: &str,
        holdings: &mut H,
    ) -> ReforgeOutcome {
        if key == 0 || !holdings.holds_instance(key) {
            return ReforgeOutcome::failed("Reforge failed: selected base is no longer available.");
        }

        let previous = self.slots.get(&key).copied().unwrap_or_default();
        if previous.iter().any(|t| catalog.is_runeword_result(t)) {
            return ReforgeOutcome::failed("Reforge failed: completed runeword base.");
        }
        if holdings.reforge_resource_count() == 0 {
            return ReforgeOutcome::failed(format!("Reforge failed: no {resource_name}."));
        }

        let target = reforge_target_count(previous.count());
        let mut rolled = InstanceAffixSlots::new();
        for attempt in 0..REFORGE_MAX_ATTEMPTS {
            let candidate = engine.roll_targeted(catalog, item_type, target);
            if candidate.is_empty() {
                continue;
            }
            let unchanged = !previous.is_empty() && candidate.tokens() == previous.tokens();
            if unchanged && attempt + 1 < REFORGE_MAX_ATTEMPTS {
                continue;
            }
            rolled = candidate;
            break;
        }

        if rolled.is_empty() {
            return ReforgeOutcome::failed("Reforge failed: no eligible affix in current pool.");
        }
        if !holdings.consume_reforge_resource() {
            return ReforgeOutcome::failed(format!("Reforge failed: no {resource_name}."));
        }

        self.erase_runtime_states(key);
        self.crafting.instances.remove(&key);
        self.slots.insert(key, rolled);
        self.mark_evaluated(key);
        for token in rolled.iter() {
            self.ensure_runtime_state(key, token);
        }

        debug!(key = %format_instance_key(key), count = rolled.len(), "reforged instance");
        ReforgeOutcome {
            success: true,
            message: format!(
                "Reforged: {} ({resource_name}: {})",
                format_instance_key(key),
                holdings.reforge_resource_count()
            ),
        }
    }

    pub fn is_tracked(&self, key: InstanceKey) -> bool {
        self.slots.contains_key(&key) || self.evaluated.contains(&key) || self.crafting.tracks(key)
    }

    /// Drop every record of `key` unless the player holds it again.
    pub fn prune<H: PlayerHoldings + ?Sized>(&mut self, key: InstanceKey, holdings: &H) -> bool {
        if key == 0 || !self.is_tracked(key) {
            return false;
        }
        if holdings.holds_instance(key) {
            debug!(key = %format_instance_key(key), "prune skipped; instance is held again");
            return false;
        }
        self.slots.remove(&key);
        self.evaluated.remove(&key);
        self.erase_runtime_states(key);
        self.crafting.forget(key);
        debug!(key = %format_instance_key(key), "pruned instance state");
        true
    }

    /// Move every record of `old` to `new` after the host reassigns a unique id.
    pub fn remap_instance_key(&mut self, old: InstanceKey, new: InstanceKey) -> bool {
        if old == 0 || new == 0 || old == new {
            return false;
        }

        if self.evaluated.contains(&old) {
            self.evaluated.remove(&old);
            self.mark_evaluated(new);
        }

        if let Some(moved) = self.slots.remove(&old) {
            match self.slots.get_mut(&new) {
                Some(existing) => {
                    for token in moved.iter() {
                        existing.add_token(token);
                    }
                }
                None => {
                    self.slots.insert(new, moved);
                }
            }
        }

        let moved_states: Vec<_> = self
            .runtime
            .iter()
            .filter(|(state_key, _)| state_key.instance_key == old)
            .map(|(state_key, state)| (*state_key, *state))
            .collect();
        for (state_key, state) in moved_states {
            self.runtime.remove(&state_key);
            self.runtime
                .entry(InstanceStateKey::new(new, state_key.affix_token))
                .or_insert(state);
        }

        if let Some(state) = self.crafting.instances.remove(&old) {
            self.crafting.instances.entry(new).or_insert(state);
        }
        if self.crafting.selected_base == Some(old) {
            self.crafting.selected_base = Some(new);
        }

        debug!(
            old = %format_instance_key(old),
            new = %format_instance_key(new),
            "remapped instance key"
        );
        true
    }

    // --- Runtime counters ---

    pub fn runtime_state(&self, key: InstanceKey, token: AffixToken) -> Option<&InstanceRuntimeState> {
        self.runtime.get(&InstanceStateKey::new(key, token))
    }

    pub fn ensure_runtime_state(&mut self, key: InstanceKey, token: AffixToken) -> &mut InstanceRuntimeState {
        self.runtime
            .entry(InstanceStateKey::new(key, token))
            .or_default()
    }

    pub fn set_runtime_state(&mut self, state_key: InstanceStateKey, state: InstanceRuntimeState) {
        self.runtime.insert(state_key, state);
    }

    pub fn erase_runtime_state(&mut self, key: InstanceKey, token: AffixToken) -> bool {
        self.runtime.remove(&InstanceStateKey::new(key, token)).is_some()
    }

    pub fn erase_runtime_states(&mut self, key: InstanceKey) {
        self.runtime.retain(|state_key, _| state_key.instance_key != key);
    }

    /// Runtime states sorted by `(instance, token)`.
    pub fn runtime_states(&self) -> Vec<(InstanceStateKey, InstanceRuntimeState)> {
        let mut out: Vec<_> = self.runtime.iter().map(|(k, v)| (*k, *v)).collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }

    pub fn runtime_state_count(&self) -> usize {
        self.runtime.len()
    }

    /// Credit one proc: add experience and step the mode cycle, advancing the
    /// mode every `switch_every` procs.
    pub fn advance_runtime_state(
        &mut self,
        key: InstanceKey,
        token: AffixToken,
        xp_per_proc: u32,
        switch_every: u32,
        mode_count: u32,
    ) -> Option<InstanceRuntimeState> {
        if key == 0 || !self.slots.get(&key).is_some_and(|s| s.has_token(token)) {
            return None;
        }
        let state = self.ensure_runtime_state(key, token);
        state.evolution_xp = state.evolution_xp.saturating_add(xp_per_proc);
        if mode_count > 1 {
            state.mode_cycle_counter = state.mode_cycle_counter.saturating_add(1);
            if state.mode_cycle_counter >= switch_every.max(1) {
                state.mode_cycle_counter = 0;
                state.mode_index = (state.mode_index + 1) % mode_count;
            }
        }
        Some(*state)
    }

    /// Manually step the selected mode forwards or backwards with wrap-around.
    pub fn cycle_mode(
        &mut self,
        key: InstanceKey,
        token: AffixToken,
        direction: i32,
        mode_count: u32,
    ) -> Option<u32> {
        if mode_count == 0 || !self.slots.get(&key).is_some_and(|s| s.has_token(token)) {
            return None;
        }
        let state = self.ensure_runtime_state(key, token);
        let current = (state.mode_index % mode_count) as i64;
        let next = (current + direction as i64).rem_euclid(mode_count as i64) as u32;
        state.mode_index = next;
        state.mode_cycle_counter = 0;
        Some(next)
    }

    // --- Crafting ---

    pub fn crafting(&self) -> &CraftingState {
        &self.crafting
    }

    pub fn crafting_mut(&mut self) -> &mut CraftingState {
        &mut self.crafting
    }

    // --- Evaluated set ---

    pub fn is_evaluated(&self, key: InstanceKey) -> bool {
        key != 0 && self.evaluated.contains(&key)
    }

    pub fn evaluated(&self) -> impl ExactSizeIterator<Item = InstanceKey> + '_ {
        self.evaluated.iter().copied()
    }

    pub fn evaluated_count(&self) -> usize {
        self.evaluated.len()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    pub fn mark_evaluated(&mut self, key: InstanceKey) {
        if key == 0 {
            return;
        }
        self.recent.push_back(key);
        if self.evaluated.insert(key) {
            self.insertions_since_prune += 1;
        }
    }

    /// Insert a key read from a record stream without touching the recent window.
    pub fn insert_loaded_evaluated(&mut self, key: InstanceKey) {
        if key != 0 {
            self.evaluated.insert(key);
        }
    }

    pub fn needs_evaluated_prune(&self) -> bool {
        self.recent.len() > RECENT_KEEP * 4 || self.insertions_since_prune >= PRUNE_EVERY_INSERTS
    }

    /// Bound the evaluated set. Keys with slots or crafting state, keys the
    /// player holds, and the newest [`RECENT_KEEP`] evaluations survive.
    /// Returns the number of keys dropped.
    pub fn prune_evaluated(&mut self, held: &[InstanceKey]) -> usize {
        if self.evaluated.is_empty() {
            self.recent.clear();
            self.insertions_since_prune = 0;
            return 0;
        }

        let mut keep: BTreeSet<InstanceKey> = self.slots.keys().copied().collect();
        keep.extend(self.crafting.instances.keys().copied());
        keep.extend(self.crafting.selected_base);
        keep.extend(held.iter().copied());
        keep.extend(
            self.recent
                .iter()
                .rev()
                .filter(|&&k| k != 0)
                .take(RECENT_KEEP)
                .copied(),
        );

        let before = self.evaluated.len();
        self.evaluated.retain(|key| keep.contains(key));
        let evaluated = &self.evaluated;
        self.recent.retain(|key| *key != 0 && evaluated.contains(key));
        while self.recent.len() > RECENT_KEEP * 2 {
            self.recent.pop_front();
        }
        self.insertions_since_prune = 0;
        before - self.evaluated.len()
    }

    /// Post-load repair: every slotted key counts as evaluated, and the recent
    /// window is rebuilt from the evaluated set. Returns how many keys were added.
    pub fn reconcile_evaluated(&mut self) -> usize {
        let before = self.evaluated.len();
        self.evaluated.extend(self.slots.keys().copied().filter(|&k| k != 0));
        let added = self.evaluated.len() - before;

        self.recent = self.evaluated.iter().copied().filter(|&k| k != 0).collect();
        while self.recent.len() > RECENT_KEEP * 2 {
            self.recent.pop_front();
        }
        self.insertions_since_prune = 0;
        added
    }
}
