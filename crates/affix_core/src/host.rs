//! Boundary between the affix core and the host simulation.
//!
//! The core never holds host object pointers. Base forms are looked up through
//! [`FormLookup`] and come back as tagged [`HostObject`] values; world references
//! cross the event boundary as [`RefHandle`]s minted by a generation-checked
//! [`HandleTable`], so a stale handle simply fails to resolve.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::slot::ItemType;
use crate::token::{InstanceKey, make_instance_key, split_instance_key};

pub type FormId = u32;

/// Opaque world-reference handle: `(generation << 32) | (index + 1)`. Zero is never issued.
pub type RefHandle = u64;

/// Container id that stands for "the world" (dropped on the ground).
pub const WORLD_CONTAINER: FormId = 0;

// --- Base forms ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeaponForm {
    pub form_id: FormId,
    pub name: String,
    pub playable: bool,
    /// Weapons generated from a template inherit their template's eligibility.
    pub template: Option<FormId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArmorForm {
    pub form_id: FormId,
    pub name: String,
    pub playable: bool,
    pub slot_mask: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiscForm {
    pub form_id: FormId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostObject {
    Weapon(WeaponForm),
    Armor(ArmorForm),
    Misc(MiscForm),
}

impl HostObject {
    pub fn form_id(&self) -> FormId {
        match self {
            HostObject::Weapon(w) => w.form_id,
            HostObject::Armor(a) => a.form_id,
            HostObject::Misc(m) => m.form_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            HostObject::Weapon(w) => &w.name,
            HostObject::Armor(a) => &a.name,
            HostObject::Misc(m) => &m.name,
        }
    }

    pub fn as_weapon(&self) -> Option<&WeaponForm> {
        match self {
            HostObject::Weapon(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_armor(&self) -> Option<&ArmorForm> {
        match self {
            HostObject::Armor(a) => Some(a),
            _ => None,
        }
    }

    /// Item type for affix rolling, or `None` when the form is not eligible.
    pub fn loot_item_type(&self) -> Option<ItemType> {
        if let Some(weapon) = self.as_weapon() {
            return weapon.playable.then_some(ItemType::Weapon);
        }
        if let Some(armor) = self.as_armor() {
            return (armor.playable && armor.slot_mask != 0).then_some(ItemType::Armor);
        }
        None
    }
}

// --- Host traits ---

/// Maps a form id recorded in an older save to the id it has in the current session.
pub trait FormResolver {
    fn resolve_form_id(&self, saved: FormId) -> Option<FormId>;
}

/// Resolves every id to itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityResolver;

impl FormResolver for IdentityResolver {
    fn resolve_form_id(&self, saved: FormId) -> Option<FormId> {
        Some(saved)
    }
}

/// Explicit remap table. Ids without an entry resolve to themselves unless
/// they were marked missing.
#[derive(Debug, Default, Clone)]
pub struct TableResolver {
    entries: BTreeMap<FormId, Option<FormId>>,
}

impl TableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remap(mut self, saved: FormId, current: FormId) -> Self {
        self.entries.insert(saved, Some(current));
        self
    }

    pub fn missing(mut self, saved: FormId) -> Self {
        self.entries.insert(saved, None);
        self
    }
}

impl FormResolver for TableResolver {
    fn resolve_form_id(&self, saved: FormId) -> Option<FormId> {
        match self.entries.get(&saved) {
            Some(entry) => *entry,
            None => Some(saved),
        }
    }
}

pub trait FormLookup {
    fn lookup_form(&self, form_id: FormId) -> Option<&HostObject>;
}

/// What the player currently carries, plus the reforge cost resource.
pub trait PlayerHoldings {
    fn holds_instance(&self, key: InstanceKey) -> bool;
    fn held_instance_keys(&self) -> Vec<InstanceKey>;
    fn reforge_resource_count(&self) -> u32;
    /// Remove one unit of the reforge resource. Returns false if none was held.
    fn consume_reforge_resource(&mut self) -> bool;
}

const TEMPLATE_DEPTH_LIMIT: usize = 4;

/// Eligible item type for `form_id`, following weapon templates.
pub fn resolve_item_type<L: FormLookup + ?Sized>(lookup: &L, form_id: FormId) -> Option<ItemType> {
    let mut current = lookup.lookup_form(form_id)?;
    for _ in 0..TEMPLATE_DEPTH_LIMIT {
        match current.as_weapon().and_then(|w| w.template) {
            Some(template) if template != current.form_id() => {
                current = lookup.lookup_form(template)?;
            }
            _ => return current.loot_item_type(),
        }
    }
    None
}

// --- Handle table ---

#[derive(Debug, Clone)]
struct HandleSlot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map with generation counters. Removing an entry bumps its slot's
/// generation, invalidating every handle issued for the old occupant.
#[derive(Debug, Clone)]
pub struct HandleTable<T> {
    slots: Vec<HandleSlot<T>>,
    free: Vec<u32>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode(index: u32, generation: u32) -> RefHandle {
        ((generation as u64) << 32) | (index as u64 + 1)
    }

    fn decode(handle: RefHandle) -> Option<(usize, u32)> {
        let low = (handle & 0xFFFF_FFFF) as u32;
        if low == 0 {
            return None;
        }
        Some(((low - 1) as usize, (handle >> 32) as u32))
    }

    pub fn insert(&mut self, value: T) -> RefHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Self::encode(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(HandleSlot {
            generation: 0,
            value: Some(value),
        });
        Self::encode(index, 0)
    }

    pub fn get(&self, handle: RefHandle) -> Option<&T> {
        let (index, generation) = Self::decode(handle)?;
        let slot = self.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn contains(&self, handle: RefHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: RefHandle) -> Option<T> {
        let (index, generation) = Self::decode(handle)?;
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index as u32);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// --- In-memory host ---

/// A dropped item lying in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldRef {
    pub base: FormId,
    pub unique_id: u16,
}

impl WorldRef {
    pub fn instance_key(&self) -> InstanceKey {
        make_instance_key(self.base, self.unique_id)
    }
}

/// Self-contained host used by the command-line tool and the test suites.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    player: FormId,
    forms: BTreeMap<FormId, HostObject>,
    inventory: BTreeSet<InstanceKey>,
    containers: BTreeMap<FormId, Vec<InstanceKey>>,
    world: HandleTable<WorldRef>,
    reforge_resource: u32,
    next_unique_id: u16,
}

impl MemoryHost {
    pub fn new(player: FormId) -> Self {
        Self {
            player,
            forms: BTreeMap::new(),
            inventory: BTreeSet::new(),
            containers: BTreeMap::new(),
            world: HandleTable::new(),
            reforge_resource: 0,
            next_unique_id: 1,
        }
    }

    pub fn player(&self) -> FormId {
        self.player
    }

    pub fn register(&mut self, object: HostObject) {
        self.forms.insert(object.form_id(), object);
    }

    pub fn grant_reforge_resource(&mut self, amount: u32) {
        self.reforge_resource = self.reforge_resource.saturating_add(amount);
    }

    /// Mint a new instance of `base` directly into the player's inventory.
    pub fn give(&mut self, base: FormId) -> InstanceKey {
        let unique = self.next_unique_id;
        self.next_unique_id = self.next_unique_id.wrapping_add(1).max(1);
        let key = make_instance_key(base, unique);
        self.inventory.insert(key);
        key
    }

    pub fn insert_held(&mut self, key: InstanceKey) {
        self.inventory.insert(key);
    }

    pub fn remove_held(&mut self, key: InstanceKey) -> bool {
        self.inventory.remove(&key)
    }

    /// Move a held instance into the world and return the new reference's handle.
    pub fn drop_to_world(&mut self, key: InstanceKey) -> Option<RefHandle> {
        if !self.inventory.remove(&key) {
            return None;
        }
        let (base, unique_id) = split_instance_key(key);
        Some(self.world.insert(WorldRef { base, unique_id }))
    }

    /// Pick a world reference back up. Stale handles resolve to `None`.
    pub fn pick_up(&mut self, handle: RefHandle) -> Option<WorldRef> {
        let item = self.world.remove(handle)?;
        self.inventory.insert(item.instance_key());
        Some(item)
    }

    /// Destroy a world reference without the player touching it (cell reset).
    pub fn destroy(&mut self, handle: RefHandle) -> Option<WorldRef> {
        self.world.remove(handle)
    }

    pub fn world_ref(&self, handle: RefHandle) -> Option<&WorldRef> {
        self.world.get(handle)
    }

    /// Relation query: which container currently owns this reference.
    pub fn owner_of(&self, handle: RefHandle) -> Option<FormId> {
        self.world.contains(handle).then_some(WORLD_CONTAINER)
    }

    pub fn stash(&mut self, container: FormId, key: InstanceKey) -> bool {
        if !self.inventory.remove(&key) {
            return false;
        }
        self.containers.entry(container).or_default().push(key);
        true
    }

    pub fn retrieve(&mut self, container: FormId, base: FormId) -> Option<InstanceKey> {
        let items = self.containers.get_mut(&container)?;
        let pos = items
            .iter()
            .position(|&key| split_instance_key(key).0 == base)?;
        let key = items.remove(pos);
        self.inventory.insert(key);
        Some(key)
    }
}

impl FormLookup for MemoryHost {
    fn lookup_form(&self, form_id: FormId) -> Option<&HostObject> {
        self.forms.get(&form_id)
    }
}

impl PlayerHoldings for MemoryHost {
    fn holds_instance(&self, key: InstanceKey) -> bool {
        self.inventory.contains(&key)
    }

    fn held_instance_keys(&self) -> Vec<InstanceKey> {
        self.inventory.iter().copied().collect()
    }

    fn reforge_resource_count(&self) -> u32 {
        self.reforge_resource
    }

    fn consume_reforge_resource(&mut self) -> bool {
        if self.reforge_resource == 0 {
            return false;
        }
        self.reforge_resource -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_does_not_resolve_after_slot_reuse() {
        let mut table = HandleTable::new();
        let first = table.insert("first");
        assert_eq!(table.remove(first), Some("first"));
        let second = table.insert("second");
        assert_ne!(first, second);
        assert_eq!(table.get(first), None);
        assert_eq!(table.get(second), Some(&"second"));
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn world_reference_owner_follows_drop_and_pickup() {
        let mut host = MemoryHost::new(0x14);
        let key = host.give(0x12EB7);
        let handle = host.drop_to_world(key).expect("held item drops");
        assert_eq!(host.owner_of(handle), Some(WORLD_CONTAINER));
        assert_eq!(host.world_ref(handle).map(WorldRef::instance_key), Some(key));

        assert_eq!(host.pick_up(handle).map(|r| r.instance_key()), Some(key));
        assert_eq!(host.owner_of(handle), None);
        assert!(host.drop_to_world(make_instance_key(0x12EB7, 99)).is_none());
    }

    #[test]
    fn capability_queries_follow_variant() {
        let weapon = HostObject::Weapon(WeaponForm {
            form_id: 0x12EB7,
            name: "Iron Sword".to_string(),
            playable: true,
            template: None,
        });
        assert!(weapon.as_weapon().is_some());
        assert!(weapon.as_armor().is_none());
        assert_eq!(weapon.loot_item_type(), Some(ItemType::Weapon));

        let shield = HostObject::Armor(ArmorForm {
            form_id: 0x12EB6,
            name: "Unplayable".to_string(),
            playable: true,
            slot_mask: 0,
        });
        assert_eq!(shield.loot_item_type(), None);
    }
}
