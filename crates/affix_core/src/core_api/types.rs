use serde::{Deserialize, Serialize};

use crate::host::{FormId, RefHandle};
use crate::shuffle_bag::PoolId;
use crate::slot::AffixSlot;
use crate::slots::InstanceAffixSlots;
use crate::store::{CraftingState, InstanceRuntimeState};
use crate::token::{AffixToken, InstanceKey};

/// One inventory transfer as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerChange {
    pub from: FormId,
    pub to: FormId,
    pub base: FormId,
    pub count: i32,
    pub unique_id: u16,
    pub ref_handle: RefHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// The player picked up a reference they dropped.
    Redropped,
    /// The player took back items they had put in a container.
    Stashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquireOutcome {
    Assigned {
        key: InstanceKey,
        slots: InstanceAffixSlots,
    },
    /// Evaluated, but the roll produced no affixes.
    RolledEmpty {
        key: InstanceKey,
    },
    AlreadyEvaluated {
        key: InstanceKey,
    },
    Suppressed {
        reason: SuppressReason,
    },
    Ineligible,
    /// No affix catalog is loaded.
    Unavailable,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffixView {
    pub token: AffixToken,
    pub id: Option<String>,
    pub slot: Option<AffixSlot>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceEntry {
    pub key: InstanceKey,
    pub base_form_id: FormId,
    pub unique_id: u16,
    pub affixes: Vec<AffixView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeEntry {
    pub key: InstanceKey,
    pub affix: AffixView,
    pub state: InstanceRuntimeState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BagEntry {
    pub pool: PoolId,
    pub cursor: u32,
    pub order: Vec<u32>,
}

/// Everything a session would persist, with tokens resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub instances: Vec<InstanceEntry>,
    pub runtime: Vec<RuntimeEntry>,
    pub evaluated: Vec<InstanceKey>,
    pub crafting: CraftingState,
    pub bags: Vec<BagEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub instances: usize,
    pub evaluated: usize,
    pub runtime_states: usize,
    pub guard_entries: usize,
    pub pending_deletions: usize,
}
