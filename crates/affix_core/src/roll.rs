//! Affix selection.
//!
//! One selection routine runs against any [`RngCore`]: the engine-wide
//! [`StdRng`] for live rolls, or a [`PreviewStream`] derived from the instance
//! key for previews and deterministic rolls. Every draw goes through
//! [`unit_draw`], so a deterministic roll and a preview with the same key,
//! salt, catalog and bag state consume identical values.

use rand::rngs::StdRng;
use rand::{Error as RandError, RngCore, SeedableRng};
use tracing::debug;

use crate::core_api::{AffixCatalog, LootConfig, SelectionMode};
use crate::shuffle_bag::{PoolId, ShuffleBags};
use crate::slot::{AffixSlot, ItemType};
use crate::slots::{InstanceAffixSlots, MAX_AFFIXES_PER_ITEM};
use crate::token::{InstanceKey, avalanche64, format_instance_key};

pub const MAX_SLOT_RETRIES: usize = 3;

const SPLITMIX_INCREMENT: u64 = 0x9E37_79B9_7F4A_7C15;
const UNIT_SCALE: f64 = 1.0 / 9_007_199_254_740_992.0;

/// Uniform draw in `[0, 1)` from the top 53 bits of the next word.
pub fn unit_draw<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    (rng.next_u64() >> 11) as f64 * UNIT_SCALE
}

/// Private SplitMix64 stream seeded from `avalanche(instanceKey ^ salt)`.
#[derive(Debug, Clone)]
pub struct PreviewStream {
    state: u64,
}

impl PreviewStream {
    pub fn new(instance_key: InstanceKey, salt: u64) -> Self {
        Self {
            state: avalanche64(instance_key ^ salt),
        }
    }

    pub fn state(&self) -> u64 {
        self.state
    }
}

impl RngCore for PreviewStream {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(SPLITMIX_INCREMENT);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), RandError> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// The subset of [`LootConfig`] that shapes a roll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollPolicy {
    pub chance_percent: f32,
    pub count_weights: [f32; 3],
    pub shared_pool: bool,
    pub strip_tracked_suffix_slots: bool,
    pub skip_suffix_for_single_target: bool,
    pub deterministic_rolls: bool,
    pub selection: SelectionMode,
}

impl From<&LootConfig> for RollPolicy {
    fn from(config: &LootConfig) -> Self {
        let config = config.sanitized();
        Self {
            chance_percent: config.chance_percent,
            count_weights: config.count_weights,
            shared_pool: config.shared_pool,
            strip_tracked_suffix_slots: config.strip_tracked_suffix_slots,
            skip_suffix_for_single_target: config.skip_suffix_for_single_target,
            deterministic_rolls: config.deterministic_rolls,
            selection: config.selection,
        }
    }
}

impl Default for RollPolicy {
    fn default() -> Self {
        Self::from(&LootConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Composition {
    pub prefixes: u8,
    pub suffixes: u8,
}

/// Target count for a reforge: an empty item gets one affix, otherwise the
/// previous count is kept up to the slot maximum.
pub fn reforge_target_count(previous: u8) -> u8 {
    match previous {
        0 => 1,
        n => n.min(MAX_AFFIXES_PER_ITEM as u8),
    }
}

fn passes_chance_gate<R: RngCore + ?Sized>(chance_percent: f32, rng: &mut R) -> bool {
    if chance_percent <= 0.0 {
        return false;
    }
    if chance_percent < 100.0 {
        return unit_draw(rng) * 100.0 < chance_percent as f64;
    }
    true
}

/// Weighted choice over the count buckets for 1, 2 and 3 affixes.
pub fn draw_affix_count<R: RngCore + ?Sized>(weights: &[f32; 3], rng: &mut R) -> u8 {
    let total: f64 = weights.iter().map(|&w| (w as f64).max(0.0)).sum();
    if total <= 0.0 {
        return 1;
    }
    let mut roll = unit_draw(rng) * total;
    let mut last_positive = 1u8;
    for (i, &weight) in weights.iter().enumerate() {
        let weight = (weight as f64).max(0.0);
        if weight <= 0.0 {
            continue;
        }
        last_positive = i as u8 + 1;
        if roll < weight {
            return last_positive;
        }
        roll -= weight;
    }
    last_positive
}

pub fn draw_composition<R: RngCore + ?Sized>(
    target: u8,
    strip_suffix_slots: bool,
    rng: &mut R,
) -> Composition {
    let target = target.min(MAX_AFFIXES_PER_ITEM as u8);
    if strip_suffix_slots {
        return Composition {
            prefixes: target,
            suffixes: 0,
        };
    }
    let (prefixes, suffixes) = match target {
        0 => (0, 0),
        1 => {
            if unit_draw(rng) < 0.5 {
                (1, 0)
            } else {
                (0, 1)
            }
        }
        2 => (1, 1),
        _ => {
            if unit_draw(rng) < 0.5 {
                (2, 1)
            } else {
                (1, 2)
            }
        }
    };
    Composition { prefixes, suffixes }
}

/// Cumulative-weight pick over the eligible, positively weighted members of
/// `pool`. Rounding past the end falls back to the last eligible entry.
pub fn pick_weighted<R, F>(
    catalog: &AffixCatalog,
    pool: &[usize],
    rng: &mut R,
    mut is_eligible: F,
) -> Option<usize>
where
    R: RngCore + ?Sized,
    F: FnMut(usize) -> bool,
{
    let weight_of = |index: usize| {
        catalog
            .affix(index)
            .map(|a| (a.effective_weight as f64).max(0.0))
            .unwrap_or(0.0)
    };

    let mut total = 0.0f64;
    for &index in pool {
        if catalog.affix(index).is_some() && is_eligible(index) {
            total += weight_of(index);
        }
    }
    if total <= 0.0 {
        return None;
    }

    let mut roll = unit_draw(rng) * total;
    let mut last_eligible = None;
    for &index in pool {
        if catalog.affix(index).is_none() || !is_eligible(index) {
            continue;
        }
        let weight = weight_of(index);
        if weight <= 0.0 {
            continue;
        }
        last_eligible = Some(index);
        if roll < weight {
            return Some(index);
        }
        roll -= weight;
    }
    last_eligible
}

#[derive(Debug, Clone, Copy)]
enum Gate {
    Chance,
    Target(u8),
}

struct Selection<'a> {
    catalog: &'a AffixCatalog,
    policy: &'a RollPolicy,
    item_type: ItemType,
}

impl Selection<'_> {
    fn pick<R: RngCore + ?Sized, F: FnMut(usize) -> bool>(
        &self,
        slot: AffixSlot,
        bags: &mut ShuffleBags,
        rng: &mut R,
        mut is_eligible: F,
    ) -> Option<usize> {
        let pool_id = PoolId::select(slot, self.item_type, self.policy.shared_pool);
        let pool = self.catalog.pool(pool_id);
        match self.policy.selection {
            SelectionMode::Weighted => pick_weighted(self.catalog, pool, rng, is_eligible),
            SelectionMode::ShuffleBag => {
                let catalog = self.catalog;
                bags.bag_mut(pool_id)
                    .next_eligible(pool.len(), rng, |pos| {
                        let index = pool[pos];
                        catalog
                            .affix(index)
                            .is_some_and(|a| a.effective_weight > 0.0)
                            && is_eligible(index)
                    })
                    .map(|pos| pool[pos])
            }
        }
    }

    fn run<R: RngCore + ?Sized>(
        &self,
        gate: Gate,
        bags: &mut ShuffleBags,
        rng: &mut R,
    ) -> InstanceAffixSlots {
        let mut slots = InstanceAffixSlots::new();

        let target = match gate {
            Gate::Chance => {
                if !passes_chance_gate(self.policy.chance_percent, rng) {
                    return slots;
                }
                draw_affix_count(&self.policy.count_weights, rng)
            }
            Gate::Target(target) => target.min(MAX_AFFIXES_PER_ITEM as u8),
        };
        let composition = draw_composition(target, self.policy.strip_tracked_suffix_slots, rng);

        let mut chosen: Vec<usize> = Vec::with_capacity(MAX_AFFIXES_PER_ITEM);
        let mut families: Vec<&str> = Vec::with_capacity(MAX_AFFIXES_PER_ITEM);

        for _ in 0..composition.prefixes {
            for _ in 0..MAX_SLOT_RETRIES {
                let Some(index) = self.pick(AffixSlot::Prefix, bags, rng, |i| {
                    !chosen.contains(&i)
                        && self
                            .catalog
                            .affix(i)
                            .is_some_and(|a| a.slot == AffixSlot::Prefix)
                }) else {
                    break;
                };
                if chosen.contains(&index) {
                    continue;
                }
                let Some(affix) = self.catalog.affix(index) else {
                    continue;
                };
                if slots.add_token(affix.token) {
                    chosen.push(index);
                    break;
                }
            }
        }

        for _ in 0..composition.suffixes {
            if self.policy.skip_suffix_for_single_target && target == 1 && !slots.is_empty() {
                break;
            }
            for _ in 0..MAX_SLOT_RETRIES {
                let Some(index) = self.pick(AffixSlot::Suffix, bags, rng, |i| {
                    if chosen.contains(&i) {
                        return false;
                    }
                    let Some(affix) = self.catalog.affix(i) else {
                        return false;
                    };
                    affix.slot == AffixSlot::Suffix
                        && (affix.family.is_empty() || !families.contains(&affix.family.as_str()))
                }) else {
                    break;
                };
                if chosen.contains(&index) {
                    continue;
                }
                let Some(affix) = self.catalog.affix(index) else {
                    continue;
                };
                if slots.add_token(affix.token) {
                    chosen.push(index);
                    if !affix.family.is_empty() {
                        families.push(affix.family.as_str());
                    }
                    break;
                }
            }
        }

        if slots.len() < target as usize {
            debug!(
                target = target,
                filled = slots.len(),
                item_type = %self.item_type,
                "affix pool exhausted before target count"
            );
        }
        slots
    }
}

/// Stochastic affix selection with an engine-wide random stream.
#[derive(Debug, Clone)]
pub struct RollEngine {
    rng: StdRng,
    policy: RollPolicy,
    bags: ShuffleBags,
}

impl RollEngine {
    pub fn new(policy: RollPolicy, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            policy,
            bags: ShuffleBags::new(),
        }
    }

    pub fn policy(&self) -> &RollPolicy {
        &self.policy
    }

    pub fn bags(&self) -> &ShuffleBags {
        &self.bags
    }

    pub fn bags_mut(&mut self) -> &mut ShuffleBags {
        &mut self.bags
    }

    /// Full roll for a newly acquired instance: chance gate, count, composition, slots.
    pub fn roll(
        &mut self,
        catalog: &AffixCatalog,
        instance_key: InstanceKey,
        item_type: ItemType,
    ) -> InstanceAffixSlots {
        let selection = Selection {
            catalog,
            policy: &self.policy,
            item_type,
        };
        let slots = if self.policy.deterministic_rolls {
            let mut stream = PreviewStream::new(instance_key, item_type.preview_salt());
            selection.run(Gate::Chance, &mut self.bags, &mut stream)
        } else {
            selection.run(Gate::Chance, &mut self.bags, &mut self.rng)
        };
        debug!(
            key = %format_instance_key(instance_key),
            count = slots.len(),
            "rolled instance affixes"
        );
        slots
    }

    /// Roll exactly `target` slots, skipping the chance gate. Used by reforge.
    pub fn roll_targeted(
        &mut self,
        catalog: &AffixCatalog,
        item_type: ItemType,
        target: u8,
    ) -> InstanceAffixSlots {
        let selection = Selection {
            catalog,
            policy: &self.policy,
            item_type,
        };
        selection.run(Gate::Target(target), &mut self.bags, &mut self.rng)
    }

    /// What [`RollEngine::roll`] would produce for `instance_key` if rolls were
    /// deterministic under `salt`. Never touches the engine stream or the live bags.
    pub fn preview(
        &self,
        catalog: &AffixCatalog,
        instance_key: InstanceKey,
        item_type: ItemType,
        salt: u64,
    ) -> InstanceAffixSlots {
        let selection = Selection {
            catalog,
            policy: &self.policy,
            item_type,
        };
        let mut bags = self.bags.clone();
        let mut stream = PreviewStream::new(instance_key, salt);
        selection.run(Gate::Chance, &mut bags, &mut stream)
    }
}
