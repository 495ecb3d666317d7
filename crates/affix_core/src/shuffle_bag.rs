use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::slot::{AffixSlot, ItemType};

/// Identifies one of the six candidate pools a bag can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolId {
    WeaponPrefix,
    ArmorPrefix,
    SharedPrefix,
    WeaponSuffix,
    ArmorSuffix,
    SharedSuffix,
}

impl PoolId {
    pub const ALL: [PoolId; 6] = [
        PoolId::WeaponPrefix,
        PoolId::ArmorPrefix,
        PoolId::SharedPrefix,
        PoolId::WeaponSuffix,
        PoolId::ArmorSuffix,
        PoolId::SharedSuffix,
    ];

    pub fn select(slot: AffixSlot, item_type: ItemType, shared: bool) -> Self {
        match (slot, shared, item_type) {
            (AffixSlot::Prefix, true, _) => PoolId::SharedPrefix,
            (AffixSlot::Prefix, false, ItemType::Weapon) => PoolId::WeaponPrefix,
            (AffixSlot::Prefix, false, ItemType::Armor) => PoolId::ArmorPrefix,
            (AffixSlot::Suffix, true, _) => PoolId::SharedSuffix,
            (AffixSlot::Suffix, false, ItemType::Weapon) => PoolId::WeaponSuffix,
            (AffixSlot::Suffix, false, ItemType::Armor) => PoolId::ArmorSuffix,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn raw(&self) -> u8 {
        match *self {
            PoolId::WeaponPrefix => 0,
            PoolId::ArmorPrefix => 1,
            PoolId::SharedPrefix => 2,
            PoolId::WeaponSuffix => 3,
            PoolId::ArmorSuffix => 4,
            PoolId::SharedSuffix => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            PoolId::WeaponPrefix => "weapon_prefix",
            PoolId::ArmorPrefix => "armor_prefix",
            PoolId::SharedPrefix => "shared_prefix",
            PoolId::WeaponSuffix => "weapon_suffix",
            PoolId::ArmorSuffix => "armor_suffix",
            PoolId::SharedSuffix => "shared_suffix",
        }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted permutation over pool positions `0..pool_len` plus a read cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShuffleBag {
    order: Vec<u32>,
    cursor: u32,
}

impl ShuffleBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore persisted state as-is. Call [`ShuffleBag::sanitize`] before drawing.
    pub fn from_raw(order: Vec<u32>, cursor: u32) -> Self {
        Self { order, cursor }
    }

    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.order.len().saturating_sub(self.cursor as usize)
    }

    fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.cursor = 0;
        if self.order.len() > 1 {
            self.order.shuffle(rng);
        }
    }

    /// Rebuild the permutation when it no longer matches the pool size.
    pub fn sync<R: Rng + ?Sized>(&mut self, pool_len: usize, rng: &mut R) {
        if self.order.len() != pool_len {
            self.order = (0..pool_len as u32).collect();
            self.reshuffle(rng);
            return;
        }
        self.clamp_cursor();
    }

    /// Next pool position, reshuffling once the permutation is exhausted.
    pub fn next<R: Rng + ?Sized>(&mut self, pool_len: usize, rng: &mut R) -> Option<usize> {
        self.next_eligible(pool_len, rng, |_| true)
    }

    /// Next pool position accepted by `is_eligible`. Ineligible entries ahead of
    /// the cursor stay in the bag for later draws.
    pub fn next_eligible<R, F>(
        &mut self,
        pool_len: usize,
        rng: &mut R,
        mut is_eligible: F,
    ) -> Option<usize>
    where
        R: Rng + ?Sized,
        F: FnMut(usize) -> bool,
    {
        if pool_len == 0 {
            return None;
        }
        self.sync(pool_len, rng);

        if let Some(found) = self.draw_remaining(&mut is_eligible) {
            return Some(found);
        }
        self.reshuffle(rng);
        self.draw_remaining(&mut is_eligible)
    }

    fn draw_remaining<F: FnMut(usize) -> bool>(&mut self, is_eligible: &mut F) -> Option<usize> {
        let start = self.cursor as usize;
        for pos in start..self.order.len() {
            if !is_eligible(self.order[pos] as usize) {
                continue;
            }
            self.order.swap(pos, start);
            self.cursor += 1;
            return Some(self.order[start] as usize);
        }
        None
    }

    /// Drop every position `>= pool_len` and clamp the cursor into `[0, len]`.
    /// Returns the number of removed positions.
    pub fn sanitize(&mut self, pool_len: usize) -> usize {
        let before = self.order.len();
        self.order.retain(|&index| (index as usize) < pool_len);
        self.clamp_cursor();
        before - self.order.len()
    }

    fn clamp_cursor(&mut self) {
        let len = self.order.len() as u32;
        if self.cursor > len {
            self.cursor = len;
        }
    }
}

/// All bags of a session, keyed by pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShuffleBags {
    bags: BTreeMap<PoolId, ShuffleBag>,
}

impl ShuffleBags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pool: PoolId) -> Option<&ShuffleBag> {
        self.bags.get(&pool)
    }

    pub fn bag_mut(&mut self, pool: PoolId) -> &mut ShuffleBag {
        self.bags.entry(pool).or_default()
    }

    pub fn insert(&mut self, pool: PoolId, bag: ShuffleBag) {
        self.bags.insert(pool, bag);
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (PoolId, &ShuffleBag)> {
        self.bags.iter().map(|(pool, bag)| (*pool, bag))
    }

    pub fn len(&self) -> usize {
        self.bags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }

    pub fn clear(&mut self) {
        self.bags.clear();
    }

    /// Sanitize every bag against its pool's current size.
    /// Returns the total number of removed positions.
    pub fn sanitize_all<F: Fn(PoolId) -> usize>(&mut self, pool_len: F) -> usize {
        self.bags
            .iter_mut()
            .map(|(pool, bag)| bag.sanitize(pool_len(*pool)))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn bag_visits_every_position_before_repeating() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut bag = ShuffleBag::new();
        let mut seen: Vec<usize> = (0..5).filter_map(|_| bag.next(5, &mut rng)).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(bag.remaining(), 0);
        assert!(bag.next(5, &mut rng).is_some());
        assert_eq!(bag.remaining(), 4);
    }

    #[test]
    fn ineligible_positions_stay_in_bag() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut bag = ShuffleBag::new();
        assert_eq!(bag.next_eligible(4, &mut rng, |p| p == 2), Some(2));
        assert_eq!(bag.remaining(), 3);
        assert_eq!(bag.next_eligible(4, &mut rng, |p| p == 9), None);
    }

    #[test]
    fn pool_resize_rebuilds_permutation() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut bag = ShuffleBag::from_raw(vec![1, 0], 2);
        bag.sync(3, &mut rng);
        assert_eq!(bag.len(), 3);
        assert_eq!(bag.cursor(), 0);
    }

    #[test]
    fn pool_ids_round_trip_through_raw() {
        for pool in PoolId::ALL {
            assert_eq!(PoolId::from_raw(pool.raw()), Some(pool));
        }
        assert_eq!(PoolId::from_raw(6), None);
    }
}
