use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::codec::{self, LoadReport};
use crate::guard::{ContainerStash, RerollGuard};
use crate::host::{
    FormId, FormLookup, FormResolver, PlayerHoldings, RefHandle, WORLD_CONTAINER,
    resolve_item_type,
};
use crate::roll::{RollEngine, RollPolicy};
use crate::shuffle_bag::{PoolId, ShuffleBags};
use crate::slot::ItemType;
use crate::slots::InstanceAffixSlots;
use crate::store::{InstanceRuntimeState, InstanceStateStore, ReforgeOutcome};
use crate::token::{
    AffixToken, InstanceKey, format_instance_key, make_instance_key, split_instance_key,
};

use super::affix_catalog::AffixCatalog;
use super::config::{LootConfig, RuntimeConfig};
use super::error::{CoreError, CoreErrorCode};
use super::types::{
    AcquireOutcome, AffixView, BagEntry, ContainerChange, InstanceEntry, RuntimeEntry,
    SessionSnapshot, SessionSummary, SuppressReason,
};

/// Holds configuration and the affix catalog; opens sessions against them.
#[derive(Debug, Default, Clone)]
pub struct Engine {
    config: LootConfig,
    catalog: Option<AffixCatalog>,
}

/// Live affix state for one play session. Created by [`Engine::open_session`]
/// and finished with [`Session::teardown`]; every host event is a method call.
#[derive(Debug)]
pub struct Session {
    config: LootConfig,
    catalog: Option<AffixCatalog>,
    store: InstanceStateStore,
    roller: RollEngine,
    guard: RerollGuard,
    stash: ContainerStash,
    deferred_deletions: VecDeque<RefHandle>,
    loaded: bool,
    last_load: Option<LoadReport>,
}

impl Engine {
    pub fn new(config: LootConfig) -> Self {
        Self {
            config: config.sanitized(),
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: AffixCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn from_runtime_config(runtime: RuntimeConfig) -> Self {
        let (config, catalog) = runtime.into_parts();
        Self::new(config).with_catalog(catalog)
    }

    pub fn config(&self) -> &LootConfig {
        &self.config
    }

    pub fn catalog(&self) -> Option<&AffixCatalog> {
        self.catalog.as_ref()
    }

    pub fn open_session(&self, player: FormId) -> Session {
        let policy = RollPolicy::from(&self.config);
        info!(
            player = %format!("{player:08X}"),
            affixes = self.catalog.as_ref().map_or(0, AffixCatalog::len),
            "affix session opened"
        );
        Session {
            config: self.config.clone(),
            catalog: self.catalog.clone(),
            store: InstanceStateStore::new(),
            roller: RollEngine::new(policy, self.config.seed),
            guard: RerollGuard::new(player),
            stash: ContainerStash::new(player),
            deferred_deletions: VecDeque::new(),
            loaded: false,
            last_load: None,
        }
    }

    /// Open a session and load a record stream into it.
    pub fn open_bytes<B, F>(&self, bytes: B, resolver: &F, player: FormId) -> Result<Session, CoreError>
    where
        B: AsRef<[u8]>,
        F: FormResolver + ?Sized,
    {
        let mut session = self.open_session(player);
        session.on_load(bytes.as_ref(), resolver)?;
        Ok(session)
    }

    pub fn open_path<P, F>(&self, path: P, resolver: &F, player: FormId) -> Result<Session, CoreError>
    where
        P: AsRef<Path>,
        F: FormResolver + ?Sized,
    {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            CoreError::new(CoreErrorCode::Io, format!("{}: {e}", path.display()))
        })?;
        self.open_bytes(bytes, resolver, player)
    }
}

impl Session {
    pub fn config(&self) -> &LootConfig {
        &self.config
    }

    pub fn catalog(&self) -> Option<&AffixCatalog> {
        self.catalog.as_ref()
    }

    pub fn store(&self) -> &InstanceStateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut InstanceStateStore {
        &mut self.store
    }

    pub fn bags(&self) -> &ShuffleBags {
        self.roller.bags()
    }

    pub fn guard(&self) -> &RerollGuard {
        &self.guard
    }

    pub fn stash(&self) -> &ContainerStash {
        &self.stash
    }

    pub fn last_load_report(&self) -> Option<&LoadReport> {
        self.last_load.as_ref()
    }

    pub fn pending_deletions(&self) -> usize {
        self.deferred_deletions.len()
    }

    pub fn query(&self, key: InstanceKey) -> Option<InstanceAffixSlots> {
        self.store.query(key).copied()
    }

    fn log_decision(&self, key: InstanceKey, what: &str) {
        if self.config.debug_log {
            debug!(key = %format_instance_key(key), "{what}");
        }
    }

    fn prune_evaluated_if_due<H: PlayerHoldings + ?Sized>(&mut self, holdings: &H) {
        if self.store.needs_evaluated_prune() {
            let dropped = self.store.prune_evaluated(&holdings.held_instance_keys());
            debug!(dropped, "pruned evaluated set");
        }
    }

    // --- Acquisition ---

    /// Roll a freshly acquired instance. Already evaluated instances keep their slots.
    pub fn on_acquire<L, H>(
        &mut self,
        base: FormId,
        count: i32,
        unique_id: u16,
        forms: &L,
        holdings: &H,
    ) -> AcquireOutcome
    where
        L: FormLookup + ?Sized,
        H: PlayerHoldings + ?Sized,
    {
        let Some(catalog) = self.catalog.as_ref() else {
            debug!("affix catalog unavailable; acquisition ignored");
            return AcquireOutcome::Unavailable;
        };
        if count <= 0 || self.roller.policy().chance_percent <= 0.0 {
            return AcquireOutcome::Ignored;
        }
        let Some(item_type) = resolve_item_type(forms, base) else {
            return AcquireOutcome::Ineligible;
        };
        if unique_id == 0 {
            return AcquireOutcome::Ineligible;
        }

        let key = make_instance_key(base, unique_id);
        if self.store.is_evaluated(key) {
            if let Some(slots) = self.store.query(key).copied() {
                for token in slots.iter() {
                    self.store.ensure_runtime_state(key, token);
                }
            }
            self.log_decision(key, "instance already evaluated");
            return AcquireOutcome::AlreadyEvaluated { key };
        }

        let slots = self.roller.roll(catalog, key, item_type);
        self.store.assign(key, slots);

        let outcome = if slots.is_empty() {
            self.log_decision(key, "roll produced no affixes");
            AcquireOutcome::RolledEmpty { key }
        } else {
            if self.config.debug_log {
                for (i, token) in slots.iter().enumerate() {
                    let id = catalog.by_token(token).map_or("?", |a| a.id.as_str());
                    debug!(
                        key = %format_instance_key(key),
                        affix = id,
                        slot = i + 1,
                        of = slots.len(),
                        "loot affix applied"
                    );
                }
            }
            AcquireOutcome::Assigned { key, slots }
        };
        self.prune_evaluated_if_due(holdings);
        outcome
    }

    /// Route one inventory transfer: drops and stashes are recorded, and
    /// transfers into the player are rolled unless they undo an earlier drop
    /// or stash.
    pub fn on_container_changed<L, H>(
        &mut self,
        change: &ContainerChange,
        forms: &L,
        holdings: &H,
    ) -> AcquireOutcome
    where
        L: FormLookup + ?Sized,
        H: PlayerHoldings + ?Sized,
    {
        let player = self.guard.player();
        if change.from == player {
            if change.to == WORLD_CONTAINER {
                let key = if change.base != 0 && change.unique_id != 0 {
                    make_instance_key(change.base, change.unique_id)
                } else {
                    0
                };
                self.on_drop(change.from, change.to, change.count, change.ref_handle, key);
            } else if change.to != player {
                self.on_stash(change.from, change.to, change.base, change.count);
            }
            return AcquireOutcome::Ignored;
        }

        if change.count <= 0 || change.to != player {
            return AcquireOutcome::Ignored;
        }
        if self.on_pickup(change.to, change.count, change.ref_handle) {
            return AcquireOutcome::Suppressed {
                reason: SuppressReason::Redropped,
            };
        }
        if self.on_retrieve(change.from, change.base, change.count) {
            return AcquireOutcome::Suppressed {
                reason: SuppressReason::Stashed,
            };
        }
        self.on_acquire(change.base, change.count, change.unique_id, forms, holdings)
    }

    // --- Reroll guard ---

    pub fn on_drop(
        &mut self,
        from: FormId,
        to: FormId,
        count: i32,
        ref_handle: RefHandle,
        instance_key: InstanceKey,
    ) -> bool {
        self.guard
            .note_drop(from, to, count, ref_handle, instance_key)
    }

    /// True when this pickup returns a dropped reference; no roll should follow.
    pub fn on_pickup(&mut self, to: FormId, count: i32, ref_handle: RefHandle) -> bool {
        let suppressed = self.guard.consume_pickup(to, count, ref_handle);
        if suppressed && self.config.debug_log {
            debug!(ref_handle, "skipping loot roll; player dropped and re-picked");
        }
        suppressed
    }

    pub fn on_stash(&mut self, from: FormId, to: FormId, base: FormId, count: i32) -> bool {
        self.stash.note_stash(from, to, base, count)
    }

    pub fn on_retrieve(&mut self, from: FormId, base: FormId, count: i32) -> bool {
        let retrieved = self.stash.consume_retrieval(from, base, count);
        if retrieved && self.config.debug_log {
            debug!(
                base = %format!("{base:08X}"),
                container = %format!("{from:08X}"),
                "skipping loot roll; player stashed and retrieved"
            );
        }
        retrieved
    }

    /// Queue a destroyed world reference. Handled by [`Session::process_deferred`]
    /// after the tick's pickups.
    pub fn on_delete(&mut self, ref_handle: RefHandle) {
        if ref_handle != 0 {
            self.deferred_deletions.push_back(ref_handle);
        }
    }

    /// Drain queued deletions, pruning instances the player no longer holds.
    /// Returns the pruned keys.
    pub fn process_deferred<H: PlayerHoldings + ?Sized>(&mut self, holdings: &H) -> Vec<InstanceKey> {
        let mut pruned = Vec::new();
        while let Some(ref_handle) = self.deferred_deletions.pop_front() {
            let Some(key) = self.guard.consume_deletion(ref_handle) else {
                continue;
            };
            if self.store.prune(key, holdings) {
                pruned.push(key);
            }
        }
        pruned
    }

    /// Follow an instance whose unique id was reassigned by the host.
    pub fn on_unique_id_changed<H: PlayerHoldings + ?Sized>(
        &mut self,
        old_base: FormId,
        old_unique: u16,
        new_base: FormId,
        new_unique: u16,
        holdings: &H,
    ) -> bool {
        if old_base == 0 || new_base == 0 || old_unique == 0 || new_unique == 0 {
            return false;
        }
        let old = make_instance_key(old_base, old_unique);
        let new = make_instance_key(new_base, new_unique);
        if old == new || !self.store.is_tracked(old) {
            return false;
        }
        if !holdings.holds_instance(old) && !holdings.holds_instance(new) {
            self.log_decision(old, "unique id change ignored; not held by player");
            return false;
        }
        self.store.remap_instance_key(old, new)
    }

    // --- Commands ---

    pub fn reforge<L, H>(&mut self, key: InstanceKey, forms: &L, holdings: &mut H) -> ReforgeOutcome
    where
        L: FormLookup + ?Sized,
        H: PlayerHoldings + ?Sized,
    {
        let Some(catalog) = self.catalog.as_ref() else {
            return ReforgeOutcome::failed("Reforge unavailable: runtime config not loaded.");
        };
        let (base, _) = split_instance_key(key);
        let Some(item_type) = resolve_item_type(forms, base) else {
            return ReforgeOutcome::failed("Reforge failed: this item type is not eligible.");
        };
        let outcome = self.store.reforge(
            key,
            &mut self.roller,
            catalog,
            item_type,
            &self.config.reforge_resource,
            holdings,
        );
        self.prune_evaluated_if_due(&*holdings);
        outcome
    }

    /// Deterministic preview under `salt`, defaulting to the item type's salt.
    pub fn preview(
        &self,
        key: InstanceKey,
        item_type: ItemType,
        salt: Option<u64>,
    ) -> Result<InstanceAffixSlots, CoreError> {
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            CoreError::new(CoreErrorCode::ConfigUnavailable, "affix catalog is not loaded")
        })?;
        if key == 0 {
            return Err(CoreError::new(
                CoreErrorCode::IneligibleItem,
                "instance key 0 cannot be previewed",
            ));
        }
        let salt = salt.unwrap_or_else(|| item_type.preview_salt());
        Ok(self.roller.preview(catalog, key, item_type, salt))
    }

    pub fn advance_runtime_state(
        &mut self,
        key: InstanceKey,
        token: AffixToken,
        xp_per_proc: u32,
        switch_every: u32,
        mode_count: u32,
    ) -> Option<InstanceRuntimeState> {
        self.store
            .advance_runtime_state(key, token, xp_per_proc, switch_every, mode_count)
    }

    pub fn cycle_mode(
        &mut self,
        key: InstanceKey,
        token: AffixToken,
        direction: i32,
        mode_count: u32,
    ) -> Option<u32> {
        self.store.cycle_mode(key, token, direction, mode_count)
    }

    /// Remove tokens the catalog no longer defines, along with their counters.
    /// Instances left empty keep their evaluated flag. Returns the removed count.
    pub fn strip_unknown_affixes(&mut self) -> Result<usize, CoreError> {
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            CoreError::new(CoreErrorCode::ConfigUnavailable, "affix catalog is not loaded")
        })?;

        let mut changes = Vec::new();
        for (key, slots) in self.store.slots() {
            let (kept, removed) = slots.sanitized(|token| catalog.contains_token(token));
            if !removed.is_empty() {
                changes.push((key, kept, removed));
            }
        }

        let mut total = 0;
        for (key, kept, removed) in changes {
            total += removed.len();
            self.store.replace_slots(key, kept);
            for token in removed {
                self.store.erase_runtime_state(key, token);
            }
            debug!(key = %format_instance_key(key), "removed unknown affix tokens");
        }
        Ok(total)
    }

    // --- Persistence ---

    pub fn on_save<H: PlayerHoldings + ?Sized>(&mut self, holdings: &H) -> Vec<u8> {
        self.store.prune_evaluated(&holdings.held_instance_keys());
        codec::save_stream(&self.store, self.roller.bags())
    }

    /// Replace all persisted state with the contents of `bytes`. Allowed once
    /// until [`Session::on_revert`].
    pub fn on_load<F: FormResolver + ?Sized>(
        &mut self,
        bytes: &[u8],
        resolver: &F,
    ) -> Result<&LoadReport, CoreError> {
        if self.loaded {
            return Err(CoreError::new(
                CoreErrorCode::UnsupportedOperation,
                "record stream already loaded in this session; revert first",
            ));
        }

        self.store.clear();
        self.roller.bags_mut().clear();
        let catalog = self.catalog.as_ref();
        let report = codec::load_stream(
            bytes,
            resolver,
            &mut self.store,
            self.roller.bags_mut(),
            |pool: PoolId| catalog.map_or(usize::MAX, |c| c.pool_len(pool)),
        );
        report.layout.validate().map_err(|e| {
            CoreError::new(CoreErrorCode::Parse, format!("invalid stream layout: {e}"))
        })?;
        self.loaded = true;
        let report = &*self.last_load.insert(report);
        Ok(report)
    }

    pub fn on_revert(&mut self) {
        self.store.clear();
        self.roller.bags_mut().clear();
        self.guard.reset();
        self.stash.clear();
        self.deferred_deletions.clear();
        self.loaded = false;
        self.last_load = None;
    }

    /// Close the session, dropping all volatile state.
    pub fn teardown(self) -> SessionSummary {
        let summary = self.summary();
        info!(
            instances = summary.instances,
            evaluated = summary.evaluated,
            pending_deletions = summary.pending_deletions,
            "affix session closed"
        );
        summary
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            instances: self.store.slot_count(),
            evaluated: self.store.evaluated_count(),
            runtime_states: self.store.runtime_state_count(),
            guard_entries: self.guard.tracked(),
            pending_deletions: self.deferred_deletions.len(),
        }
    }

    // --- Snapshot ---

    fn affix_view(&self, token: AffixToken) -> AffixView {
        let definition = self.catalog.as_ref().and_then(|c| c.by_token(token));
        AffixView {
            token,
            id: definition.map(|d| d.id.clone()),
            slot: definition.map(|d| d.slot),
            label: definition
                .map(|d| d.label.clone())
                .filter(|label| !label.is_empty()),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let instances = self
            .store
            .slots()
            .map(|(key, slots)| {
                let (base_form_id, unique_id) = split_instance_key(key);
                InstanceEntry {
                    key,
                    base_form_id,
                    unique_id,
                    affixes: slots.iter().map(|t| self.affix_view(t)).collect(),
                }
            })
            .collect();

        let runtime = self
            .store
            .runtime_states()
            .into_iter()
            .map(|(state_key, state)| RuntimeEntry {
                key: state_key.instance_key,
                affix: self.affix_view(state_key.affix_token),
                state,
            })
            .collect();

        let bags = self
            .roller
            .bags()
            .iter()
            .map(|(pool, bag)| BagEntry {
                pool,
                cursor: bag.cursor(),
                order: bag.order().to_vec(),
            })
            .collect();

        SessionSnapshot {
            instances,
            runtime,
            evaluated: self.store.evaluated().collect(),
            crafting: self.store.crafting().clone(),
            bags,
        }
    }
}
