use serde::{Deserialize, Serialize};

use super::affix_catalog::{AffixCatalog, AffixSpec, RunewordRecipeSpec};

pub const DEFAULT_COUNT_WEIGHTS: [f32; 3] = [70.0, 25.0, 5.0];
pub const DEFAULT_REFORGE_RESOURCE: &str = "Reforge Orb";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Cumulative-weight sampling over the eligible pool.
    #[default]
    Weighted,
    /// Draw through the persisted per-pool shuffle bags.
    ShuffleBag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LootConfig {
    pub chance_percent: f32,
    pub count_weights: [f32; 3],
    pub shared_pool: bool,
    pub strip_tracked_suffix_slots: bool,
    pub skip_suffix_for_single_target: bool,
    pub deterministic_rolls: bool,
    pub selection: SelectionMode,
    pub debug_log: bool,
    pub seed: Option<u64>,
    pub reforge_resource: String,
}

impl Default for LootConfig {
    fn default() -> Self {
        Self {
            chance_percent: 0.0,
            count_weights: DEFAULT_COUNT_WEIGHTS,
            shared_pool: false,
            strip_tracked_suffix_slots: false,
            skip_suffix_for_single_target: true,
            deterministic_rolls: false,
            selection: SelectionMode::Weighted,
            debug_log: false,
            seed: None,
            reforge_resource: DEFAULT_REFORGE_RESOURCE.to_string(),
        }
    }
}

impl LootConfig {
    /// Copy with the chance clamped to `[0, 100]`, non-finite or negative
    /// count weights zeroed, and a blank reforge resource name reset.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        out.chance_percent = if out.chance_percent.is_finite() {
            out.chance_percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        for weight in &mut out.count_weights {
            if !weight.is_finite() || *weight < 0.0 {
                *weight = 0.0;
            }
        }
        if out.reforge_resource.trim().is_empty() {
            out.reforge_resource = DEFAULT_REFORGE_RESOURCE.to_string();
        }
        out
    }
}

/// Document shape read by front-ends: loot settings plus the affix catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub loot: LootConfig,
    pub affixes: Vec<AffixSpec>,
    pub runewords: Vec<RunewordRecipeSpec>,
}

impl RuntimeConfig {
    pub fn into_parts(self) -> (LootConfig, AffixCatalog) {
        let catalog = AffixCatalog::from_specs(self.affixes, self.runewords);
        (self.loot.sanitized(), catalog)
    }
}
