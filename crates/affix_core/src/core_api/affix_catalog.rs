use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::shuffle_bag::PoolId;
use crate::slot::{AffixSlot, ItemType};
use crate::token::{AffixToken, make_affix_token};

fn default_loot_weight() -> f32 {
    -1.0
}

fn default_item_types() -> Vec<ItemType> {
    vec![ItemType::Weapon, ItemType::Armor]
}

/// `weight` when it is set (>= 0), otherwise the proc chance. An explicit
/// zero weight excludes the affix from loot.
pub fn effective_weight(proc_chance_pct: f32, loot_weight: f32) -> f32 {
    if loot_weight >= 0.0 {
        loot_weight
    } else {
        proc_chance_pct
    }
}

/// One catalog entry as written in a runtime config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffixSpec {
    pub id: String,
    pub slot: AffixSlot,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub proc_chance_pct: f32,
    #[serde(default = "default_loot_weight")]
    pub loot_weight: f32,
    #[serde(default = "default_item_types")]
    pub item_types: Vec<ItemType>,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunewordRecipeSpec {
    pub id: String,
    pub result_affix_id: String,
    #[serde(default)]
    pub rune_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffixDefinition {
    pub id: String,
    pub token: AffixToken,
    pub slot: AffixSlot,
    pub family: String,
    pub effective_weight: f32,
    pub label: String,
    pub item_types: Vec<ItemType>,
}

impl AffixDefinition {
    pub fn allows(&self, item_type: ItemType) -> bool {
        self.item_types.contains(&item_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunewordRecipe {
    pub id: String,
    pub token: AffixToken,
    pub result_affix_token: AffixToken,
    pub rune_count: u32,
}

/// Read-only snapshot of the affix definitions and the candidate pools built from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AffixCatalog {
    affixes: Vec<AffixDefinition>,
    index_by_token: HashMap<AffixToken, usize>,
    pools: BTreeMap<PoolId, Vec<usize>>,
    recipes: Vec<RunewordRecipe>,
}

impl AffixCatalog {
    pub fn from_specs(specs: Vec<AffixSpec>, recipes: Vec<RunewordRecipeSpec>) -> Self {
        let mut catalog = Self::default();
        for entry in specs {
            let id = entry.id.trim().to_string();
            if id.is_empty() {
                warn!("skipping affix with empty id");
                continue;
            }
            let token = make_affix_token(&id);
            if catalog.index_by_token.contains_key(&token) {
                warn!(affix = %id, "duplicate affix id; keeping first definition");
                continue;
            }
            catalog.index_by_token.insert(token, catalog.affixes.len());
            catalog.affixes.push(AffixDefinition {
                id,
                token,
                slot: entry.slot,
                family: entry.family.trim().to_string(),
                effective_weight: effective_weight(entry.proc_chance_pct, entry.loot_weight),
                label: entry.label,
                item_types: entry.item_types,
            });
        }

        for recipe in recipes {
            let result_affix_token = make_affix_token(recipe.result_affix_id.trim());
            if !catalog.index_by_token.contains_key(&result_affix_token) {
                warn!(
                    recipe = %recipe.id,
                    result = %recipe.result_affix_id,
                    "runeword recipe references an unknown affix; dropped"
                );
                continue;
            }
            catalog.recipes.push(RunewordRecipe {
                token: make_affix_token(recipe.id.trim()),
                id: recipe.id,
                result_affix_token,
                rune_count: recipe.rune_count,
            });
        }

        catalog.rebuild_pools();
        catalog
    }

    fn rebuild_pools(&mut self) {
        self.pools.clear();
        for pool in PoolId::ALL {
            self.pools.insert(pool, Vec::new());
        }
        for (index, affix) in self.affixes.iter().enumerate() {
            for item_type in [ItemType::Weapon, ItemType::Armor] {
                if affix.allows(item_type) {
                    self.pools
                        .entry(PoolId::select(affix.slot, item_type, false))
                        .or_default()
                        .push(index);
                }
            }
            if !affix.item_types.is_empty() {
                self.pools
                    .entry(PoolId::select(affix.slot, ItemType::Weapon, true))
                    .or_default()
                    .push(index);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.affixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.affixes.is_empty()
    }

    pub fn affixes(&self) -> &[AffixDefinition] {
        &self.affixes
    }

    pub fn affix(&self, index: usize) -> Option<&AffixDefinition> {
        self.affixes.get(index)
    }

    pub fn index_of(&self, token: AffixToken) -> Option<usize> {
        self.index_by_token.get(&token).copied()
    }

    pub fn by_token(&self, token: AffixToken) -> Option<&AffixDefinition> {
        self.index_of(token).and_then(|i| self.affixes.get(i))
    }

    pub fn contains_token(&self, token: AffixToken) -> bool {
        self.index_by_token.contains_key(&token)
    }

    pub fn pool(&self, pool: PoolId) -> &[usize] {
        self.pools.get(&pool).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pool_len(&self, pool: PoolId) -> usize {
        self.pool(pool).len()
    }

    pub fn recipes(&self) -> &[RunewordRecipe] {
        &self.recipes
    }

    pub fn recipe_by_token(&self, token: AffixToken) -> Option<&RunewordRecipe> {
        self.recipes.iter().find(|r| r.token == token)
    }

    /// True if `token` is the finished effect of some runeword recipe.
    pub fn is_runeword_result(&self, token: AffixToken) -> bool {
        token != 0 && self.recipes.iter().any(|r| r.result_affix_token == token)
    }
}
