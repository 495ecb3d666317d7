use std::io::{self, Read, Seek};

use crate::host::FormId;
use crate::reader::{LittleEndianReader, RecordWriter};
use crate::shuffle_bag::{PoolId, ShuffleBag};
use crate::slots::{InstanceAffixSlots, MAX_AFFIXES_PER_ITEM};
use crate::store::{CraftingState, InstanceRuntimeState, RunewordInstanceState};
use crate::token::{AffixToken, InstanceKey, InstanceStateKey, make_affix_token, split_instance_key};

use super::types::{
    SLOTS_VERSION_CURRENT, SLOTS_VERSION_V1, SLOTS_VERSION_V3, SLOTS_VERSION_V4, SLOTS_VERSION_V5,
};

fn read_runtime_counters<R: Read + Seek>(
    r: &mut LittleEndianReader<R>,
) -> io::Result<InstanceRuntimeState> {
    Ok(InstanceRuntimeState {
        evolution_xp: r.read_u32()?,
        mode_cycle_counter: r.read_u32()?,
        mode_index: r.read_u32()?,
    })
}

fn write_runtime_counters(w: &mut RecordWriter, state: &InstanceRuntimeState) {
    w.write_u32(state.evolution_xp)
        .write_u32(state.mode_cycle_counter)
        .write_u32(state.mode_index);
}

fn write_instance_key(w: &mut RecordWriter, key: InstanceKey) {
    let (base, unique) = split_instance_key(key);
    w.write_u32(base).write_u16(unique);
}

// --- Record IAXF: instance affix slots ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecordEntry {
    pub base: FormId,
    pub unique_id: u16,
    pub slots: InstanceAffixSlots,
    /// Counters embedded in v3-v5 entries, keyed by the token they belong to.
    pub legacy_state: Option<(AffixToken, InstanceRuntimeState)>,
}

/// Read every entry of an IAXF payload, handing each to `apply` as soon as it
/// is complete. Returns the declared entry count.
pub fn read_slot_entries<R, F>(
    r: &mut LittleEndianReader<R>,
    version: u32,
    mut apply: F,
) -> io::Result<u32>
where
    R: Read + Seek,
    F: FnMut(SlotRecordEntry),
{
    let count = r.read_u32()?;
    for _ in 0..count {
        let entry = if version == SLOTS_VERSION_CURRENT {
            read_current_slot_entry(r)?
        } else {
            read_legacy_slot_entry(r, version)?
        };
        apply(entry);
    }
    Ok(count)
}

fn read_current_slot_entry<R: Read + Seek>(
    r: &mut LittleEndianReader<R>,
) -> io::Result<SlotRecordEntry> {
    let base = r.read_u32()?;
    let unique_id = r.read_u16()?;
    let count = r.read_u8()?;
    let tokens = r.read_u64_array::<MAX_AFFIXES_PER_ITEM>()?;
    Ok(SlotRecordEntry {
        base,
        unique_id,
        slots: InstanceAffixSlots::from_raw(tokens, count),
        legacy_state: None,
    })
}

/// v1: free-text id. v2: one token. v3: token + counters.
/// v4/v5: token + supplemental token + counters.
fn read_legacy_slot_entry<R: Read + Seek>(
    r: &mut LittleEndianReader<R>,
    version: u32,
) -> io::Result<SlotRecordEntry> {
    let base = r.read_u32()?;
    let unique_id = r.read_u16()?;

    let mut supplemental = 0u64;
    let mut counters = None;
    let token = if version == SLOTS_VERSION_V1 {
        let id = r.read_sized_string()?;
        if id.is_empty() { 0 } else { make_affix_token(&id) }
    } else {
        let token = r.read_u64()?;
        if version == SLOTS_VERSION_V4 || version == SLOTS_VERSION_V5 {
            supplemental = r.read_u64()?;
        }
        if (SLOTS_VERSION_V3..=SLOTS_VERSION_V5).contains(&version) {
            counters = Some(read_runtime_counters(r)?);
        }
        token
    };

    let slots = InstanceAffixSlots::from_tokens([token, supplemental]);
    let state_token = if token != 0 { token } else { supplemental };
    let legacy_state = counters
        .filter(|_| state_token != 0)
        .map(|state| (state_token, state));

    Ok(SlotRecordEntry {
        base,
        unique_id,
        slots,
        legacy_state,
    })
}

pub fn write_slot_entries<'a, I>(w: &mut RecordWriter, entries: I)
where
    I: ExactSizeIterator<Item = (InstanceKey, &'a InstanceAffixSlots)>,
{
    w.write_u32(entries.len() as u32);
    for (key, slots) in entries {
        write_instance_key(w, key);
        w.write_u8(slots.count());
        for &token in slots.raw_tokens() {
            w.write_u64(token);
        }
    }
}

// --- Record IRST: runtime counters ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeRecordEntry {
    pub base: FormId,
    pub unique_id: u16,
    pub token: AffixToken,
    pub state: InstanceRuntimeState,
}

pub fn read_runtime_entries<R, F>(r: &mut LittleEndianReader<R>, mut apply: F) -> io::Result<u32>
where
    R: Read + Seek,
    F: FnMut(RuntimeRecordEntry),
{
    let count = r.read_u32()?;
    for _ in 0..count {
        let base = r.read_u32()?;
        let unique_id = r.read_u16()?;
        let token = r.read_u64()?;
        let state = read_runtime_counters(r)?;
        apply(RuntimeRecordEntry {
            base,
            unique_id,
            token,
            state,
        });
    }
    Ok(count)
}

pub fn write_runtime_entries(w: &mut RecordWriter, states: &[(InstanceStateKey, InstanceRuntimeState)]) {
    w.write_u32(states.len() as u32);
    for (state_key, state) in states {
        write_instance_key(w, state_key.instance_key);
        w.write_u64(state_key.affix_token);
        write_runtime_counters(w, state);
    }
}

// --- Record RWRD: crafting state ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunewordRecordItem {
    Cursors { recipe: u32, base: u32 },
    Fragment { rune: AffixToken, amount: u32 },
    Instance { base: FormId, unique_id: u16, state: RunewordInstanceState },
    SelectedBase { base: FormId, unique_id: u16 },
}

/// The selected base is reported last so it can be resolved after the
/// per-instance states.
pub fn read_runeword_record<R, F>(r: &mut LittleEndianReader<R>, mut apply: F) -> io::Result<()>
where
    R: Read + Seek,
    F: FnMut(RunewordRecordItem),
{
    let selected_base = r.read_u32()?;
    let selected_unique = r.read_u16()?;
    let recipe = r.read_u32()?;
    let base = r.read_u32()?;
    apply(RunewordRecordItem::Cursors { recipe, base });

    let fragment_count = r.read_u32()?;
    for _ in 0..fragment_count {
        let rune = r.read_u64()?;
        let amount = r.read_u32()?;
        apply(RunewordRecordItem::Fragment { rune, amount });
    }

    let state_count = r.read_u32()?;
    for _ in 0..state_count {
        let base = r.read_u32()?;
        let unique_id = r.read_u16()?;
        let recipe_token = r.read_u64()?;
        let inserted_runes = r.read_u32()?;
        apply(RunewordRecordItem::Instance {
            base,
            unique_id,
            state: RunewordInstanceState {
                recipe_token,
                inserted_runes,
            },
        });
    }

    if selected_base != 0 && selected_unique != 0 {
        apply(RunewordRecordItem::SelectedBase {
            base: selected_base,
            unique_id: selected_unique,
        });
    }
    Ok(())
}

pub fn write_runeword_record(w: &mut RecordWriter, crafting: &CraftingState) {
    write_instance_key(w, crafting.selected_base.unwrap_or(0));
    w.write_u32(crafting.recipe_cursor)
        .write_u32(crafting.base_cursor);

    w.write_u32(crafting.fragments.len() as u32);
    for (&rune, &amount) in &crafting.fragments {
        w.write_u64(rune).write_u32(amount);
    }

    w.write_u32(crafting.instances.len() as u32);
    for (&key, state) in &crafting.instances {
        write_instance_key(w, key);
        w.write_u64(state.recipe_token)
            .write_u32(state.inserted_runes);
    }
}

// --- Record LRLD: evaluated instances ---

pub fn read_evaluated_entries<R, F>(r: &mut LittleEndianReader<R>, mut apply: F) -> io::Result<u32>
where
    R: Read + Seek,
    F: FnMut(FormId, u16),
{
    let count = r.read_u32()?;
    for _ in 0..count {
        let base = r.read_u32()?;
        let unique_id = r.read_u16()?;
        apply(base, unique_id);
    }
    Ok(count)
}

pub fn write_evaluated_entries<I>(w: &mut RecordWriter, keys: I)
where
    I: ExactSizeIterator<Item = InstanceKey>,
{
    w.write_u32(keys.len() as u32);
    for key in keys {
        write_instance_key(w, key);
    }
}

// --- Record LSBG: shuffle bags ---

/// Bags are handed over with their raw pool id; ids this build does not know
/// come through as `None`.
pub fn read_bag_entries<R, F>(r: &mut LittleEndianReader<R>, mut apply: F) -> io::Result<u32>
where
    R: Read + Seek,
    F: FnMut(Option<PoolId>, ShuffleBag),
{
    let count = r.read_u32()?;
    for _ in 0..count {
        let pool = r.read_u8()?;
        let cursor = r.read_u32()?;
        let len = r.read_u32()? as usize;
        let mut order = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            order.push(r.read_u32()?);
        }
        apply(PoolId::from_raw(pool), ShuffleBag::from_raw(order, cursor));
    }
    Ok(count)
}

pub fn write_bag_entries<'a, I>(w: &mut RecordWriter, bags: I)
where
    I: ExactSizeIterator<Item = (PoolId, &'a ShuffleBag)>,
{
    w.write_u32(bags.len() as u32);
    for (pool, bag) in bags {
        w.write_u8(pool.raw())
            .write_u32(bag.cursor())
            .write_u32(bag.order().len() as u32);
        for &index in bag.order() {
            w.write_u32(index);
        }
    }
}
