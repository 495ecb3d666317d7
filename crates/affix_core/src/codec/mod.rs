//! Tagged record stream holding the instance store and shuffle bags.
//!
//! Every record opens with `(type, version, length)` as little-endian u32s.
//! Unknown types and versions are skipped by length. A record whose payload
//! ends inside a fixed-size field stops the load pass; whatever was applied
//! before that point stays applied.

pub mod sections;
pub mod types;

use std::collections::BTreeSet;
use std::io::{self, Cursor};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::host::{FormId, FormResolver};
use crate::layout::{SectionId, StreamLayout};
use crate::reader::{LittleEndianReader, RecordWriter};
use crate::shuffle_bag::{PoolId, ShuffleBags};
use crate::store::InstanceStateStore;
use crate::token::{InstanceKey, InstanceStateKey, make_instance_key};

use sections::{RunewordRecordItem, SlotRecordEntry};
use types::{
    LOOT_EVALUATED_VERSION, RECORD_HEADER_LEN, RECORD_INSTANCE_AFFIXES, RECORD_LOOT_EVALUATED,
    RECORD_ORDER, RECORD_RUNEWORD_STATE, RECORD_RUNTIME_STATES, RECORD_SHUFFLE_BAGS,
    RUNEWORD_STATE_VERSION, RUNTIME_STATES_VERSION, SHUFFLE_BAGS_VERSION, SLOTS_VERSION_CURRENT,
    is_supported, record_tag_name,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Applied,
    /// A legacy layout converted to the current one.
    Migrated,
    Skipped,
    Corrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub tag: String,
    pub version: u32,
    pub length: usize,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub records: Vec<RecordSummary>,
    pub slots_loaded: usize,
    pub runtime_states_loaded: usize,
    pub runeword_states_loaded: usize,
    pub evaluated_loaded: usize,
    pub bags_loaded: usize,
    pub migrated_versions: BTreeSet<u32>,
    pub unresolved_references: usize,
    pub corruption: Option<String>,
    pub evaluated_repaired: usize,
    pub bag_indices_dropped: usize,
    pub layout: StreamLayout,
}

impl LoadReport {
    pub fn is_corrupted(&self) -> bool {
        self.corruption.is_some()
    }

    pub fn records_skipped(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Skipped)
            .count()
    }
}

struct Loader<'a, F: ?Sized> {
    resolver: &'a F,
    store: &'a mut InstanceStateStore,
    bags: &'a mut ShuffleBags,
    report: LoadReport,
}

impl<F: FormResolver + ?Sized> Loader<'_, F> {
    fn resolve(&mut self, base: FormId, unique_id: u16) -> Option<InstanceKey> {
        match self.resolver.resolve_form_id(base) {
            Some(resolved) => Some(make_instance_key(resolved, unique_id)),
            None => {
                self.report.unresolved_references += 1;
                debug!(base = %format!("{base:08X}"), unique_id, "dropping unresolvable reference");
                None
            }
        }
    }

    /// Entries with no tokens are kept so reconciliation marks them evaluated.
    fn apply_slot_entry(&mut self, entry: SlotRecordEntry) {
        let Some(key) = self.resolve(entry.base, entry.unique_id) else {
            return;
        };
        if self.store.insert_loaded_slots(key, entry.slots) {
            self.report.slots_loaded += 1;
        }
        if let Some((token, state)) = entry.legacy_state {
            self.store
                .set_runtime_state(InstanceStateKey::new(key, token), state);
            self.report.runtime_states_loaded += 1;
        }
    }

    fn apply_runeword_item(&mut self, item: RunewordRecordItem) {
        match item {
            RunewordRecordItem::Cursors { recipe, base } => {
                let crafting = self.store.crafting_mut();
                crafting.recipe_cursor = recipe;
                crafting.base_cursor = base;
            }
            RunewordRecordItem::Fragment { rune, amount } => {
                if rune != 0 && amount > 0 {
                    self.store.crafting_mut().fragments.insert(rune, amount);
                }
            }
            RunewordRecordItem::Instance {
                base,
                unique_id,
                state,
            } => {
                if let Some(key) = self.resolve(base, unique_id) {
                    self.store.crafting_mut().instances.insert(key, state);
                    self.report.runeword_states_loaded += 1;
                }
            }
            RunewordRecordItem::SelectedBase { base, unique_id } => {
                if let Some(key) = self.resolve(base, unique_id) {
                    self.store.crafting_mut().selected_base = Some(key);
                }
            }
        }
    }

    fn apply_record(&mut self, tag: u32, version: u32, payload: &[u8]) -> io::Result<RecordStatus> {
        if !is_supported(tag, version) {
            warn!(
                record = %record_tag_name(tag),
                version,
                length = payload.len(),
                "skipping unrecognized record"
            );
            return Ok(RecordStatus::Skipped);
        }

        let mut r = LittleEndianReader::new(Cursor::new(payload));
        let mut status = RecordStatus::Applied;
        match tag {
            RECORD_INSTANCE_AFFIXES => {
                sections::read_slot_entries(&mut r, version, |entry| self.apply_slot_entry(entry))?;
                if version != SLOTS_VERSION_CURRENT {
                    self.report.migrated_versions.insert(version);
                    status = RecordStatus::Migrated;
                }
            }
            RECORD_RUNTIME_STATES => {
                sections::read_runtime_entries(&mut r, |entry| {
                    if entry.token == 0 {
                        return;
                    }
                    if let Some(key) = self.resolve(entry.base, entry.unique_id) {
                        self.store
                            .set_runtime_state(InstanceStateKey::new(key, entry.token), entry.state);
                        self.report.runtime_states_loaded += 1;
                    }
                })?;
            }
            RECORD_RUNEWORD_STATE => {
                sections::read_runeword_record(&mut r, |item| self.apply_runeword_item(item))?;
            }
            RECORD_LOOT_EVALUATED => {
                sections::read_evaluated_entries(&mut r, |base, unique_id| {
                    if let Some(key) = self.resolve(base, unique_id)
                        && key != 0
                    {
                        self.store.insert_loaded_evaluated(key);
                        self.report.evaluated_loaded += 1;
                    }
                })?;
            }
            RECORD_SHUFFLE_BAGS => {
                sections::read_bag_entries(&mut r, |pool, bag| match pool {
                    Some(pool) => {
                        self.bags.insert(pool, bag);
                        self.report.bags_loaded += 1;
                    }
                    None => debug!("dropping shuffle bag for unknown pool"),
                })?;
            }
            _ => return Ok(RecordStatus::Skipped),
        }

        let trailing = r.remaining()?;
        if trailing > 0 {
            debug!(record = %record_tag_name(tag), trailing, "record payload has trailing bytes");
        }
        Ok(status)
    }
}

fn read_record_header(bytes: &[u8], pos: usize) -> io::Result<(u32, u32, usize)> {
    let mut r = LittleEndianReader::new(Cursor::new(bytes));
    r.seek_to(pos as u64)?;
    let tag = r.read_u32()?;
    let version = r.read_u32()?;
    let length = r.read_u32()? as usize;
    Ok((tag, version, length))
}

/// Apply a record stream to `store` and `bags`, then reconcile: slotted keys
/// join the evaluated set, the recent window is rebuilt, and every bag is
/// trimmed to `pool_len` of its pool.
pub fn load_stream<F, P>(
    bytes: &[u8],
    resolver: &F,
    store: &mut InstanceStateStore,
    bags: &mut ShuffleBags,
    pool_len: P,
) -> LoadReport
where
    F: FormResolver + ?Sized,
    P: Fn(PoolId) -> usize,
{
    let total = bytes.len();
    let mut loader = Loader {
        resolver,
        store: &mut *store,
        bags: &mut *bags,
        report: LoadReport::default(),
    };
    let mut layout = StreamLayout {
        stream_len: total,
        sections: Vec::new(),
    };

    let mut pos = 0usize;
    while pos < total {
        let (tag, version, length) = match read_record_header(bytes, pos) {
            Ok(header) => header,
            Err(e) => {
                loader.report.corruption = Some(format!("truncated record header at byte {pos}: {e}"));
                break;
            }
        };
        let payload_start = pos + RECORD_HEADER_LEN;
        let payload_end = payload_start.saturating_add(length);
        if payload_end > total {
            loader.report.corruption = Some(format!(
                "record {} v{version} declares {length} bytes but only {} remain",
                record_tag_name(tag),
                total - payload_start
            ));
            break;
        }

        layout.push(SectionId::RecordHeader(tag), pos, payload_start);
        layout.push(SectionId::RecordPayload(tag), payload_start, payload_end);
        pos = payload_end;

        let result = loader.apply_record(tag, version, &bytes[payload_start..payload_end]);
        let status = match &result {
            Ok(status) => *status,
            Err(_) => RecordStatus::Corrupted,
        };
        loader.report.records.push(RecordSummary {
            tag: record_tag_name(tag),
            version,
            length,
            status,
        });
        if let Err(e) = result {
            loader.report.corruption =
                Some(format!("record {} v{version}: {e}", record_tag_name(tag)));
            break;
        }
    }
    if pos < total {
        layout.push(SectionId::Tail, pos, total);
    }

    let mut report = loader.report;
    if let Some(reason) = &report.corruption {
        warn!(reason = %reason, "record stream corrupted; remaining records ignored");
    }

    report.evaluated_repaired = store.reconcile_evaluated();
    report.bag_indices_dropped = bags.sanitize_all(pool_len);
    report.layout = layout;

    info!(
        records = report.records.len(),
        slots = report.slots_loaded,
        runtime_states = report.runtime_states_loaded,
        evaluated = store.evaluated_count(),
        unresolved = report.unresolved_references,
        "record stream loaded"
    );
    report
}

/// Emit the current layout of every record type, in a fixed order with
/// sorted entries.
pub fn save_stream(store: &InstanceStateStore, bags: &ShuffleBags) -> Vec<u8> {
    let mut out = RecordWriter::new();
    for tag in RECORD_ORDER {
        let mut payload = RecordWriter::new();
        let version = match tag {
            RECORD_INSTANCE_AFFIXES => {
                sections::write_slot_entries(&mut payload, store.slots());
                SLOTS_VERSION_CURRENT
            }
            RECORD_RUNTIME_STATES => {
                sections::write_runtime_entries(&mut payload, &store.runtime_states());
                RUNTIME_STATES_VERSION
            }
            RECORD_RUNEWORD_STATE => {
                sections::write_runeword_record(&mut payload, store.crafting());
                RUNEWORD_STATE_VERSION
            }
            RECORD_LOOT_EVALUATED => {
                sections::write_evaluated_entries(&mut payload, store.evaluated());
                LOOT_EVALUATED_VERSION
            }
            RECORD_SHUFFLE_BAGS => {
                sections::write_bag_entries(&mut payload, bags.iter());
                SHUFFLE_BAGS_VERSION
            }
            _ => continue,
        };
        out.write_record(tag, version, payload.as_bytes());
    }

    info!(
        bytes = out.len(),
        slots = store.slot_count(),
        evaluated = store.evaluated_count(),
        "record stream saved"
    );
    out.into_bytes()
}
