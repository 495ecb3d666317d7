use serde::{Deserialize, Serialize};

use crate::token::AffixToken;

pub const MAX_AFFIXES_PER_ITEM: usize = 3;

/// Ordered, fixed-capacity affix assignment for one instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAffixSlots {
    tokens: [AffixToken; MAX_AFFIXES_PER_ITEM],
    count: u8,
}

impl InstanceAffixSlots {
    pub const fn new() -> Self {
        Self {
            tokens: [0; MAX_AFFIXES_PER_ITEM],
            count: 0,
        }
    }

    /// Rebuild from the persisted layout. Token words past `count` are kept
    /// verbatim so a re-save reproduces the input bytes.
    pub fn from_raw(tokens: [AffixToken; MAX_AFFIXES_PER_ITEM], count: u8) -> Self {
        Self {
            tokens,
            count: count.min(MAX_AFFIXES_PER_ITEM as u8),
        }
    }

    pub fn from_tokens<I: IntoIterator<Item = AffixToken>>(tokens: I) -> Self {
        let mut slots = Self::new();
        for token in tokens {
            slots.add_token(token);
        }
        slots
    }

    pub fn raw_tokens(&self) -> &[AffixToken; MAX_AFFIXES_PER_ITEM] {
        &self.tokens
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn tokens(&self) -> &[AffixToken] {
        &self.tokens[..self.len()]
    }

    pub fn iter(&self) -> impl Iterator<Item = AffixToken> + '_ {
        self.tokens().iter().copied()
    }

    pub fn has_token(&self, token: AffixToken) -> bool {
        self.tokens().contains(&token)
    }

    /// Append a token. Zero, duplicates and overflow are rejected.
    pub fn add_token(&mut self, token: AffixToken) -> bool {
        if token == 0 || self.len() >= MAX_AFFIXES_PER_ITEM || self.has_token(token) {
            return false;
        }
        self.tokens[self.len()] = token;
        self.count += 1;
        true
    }

    pub fn primary(&self) -> AffixToken {
        if self.count > 0 { self.tokens[0] } else { 0 }
    }

    pub fn clear(&mut self) {
        self.tokens = [0; MAX_AFFIXES_PER_ITEM];
        self.count = 0;
    }

    /// Copy of these slots keeping only tokens the predicate accepts,
    /// together with the tokens that were dropped.
    pub fn sanitized<F>(&self, mut is_allowed: F) -> (Self, Vec<AffixToken>)
    where
        F: FnMut(AffixToken) -> bool,
    {
        let mut kept = Self::new();
        let mut removed = Vec::new();
        for token in self.iter() {
            if !(token != 0 && is_allowed(token) && kept.add_token(token)) {
                removed.push(token);
            }
        }
        (kept, removed)
    }
}

impl<'a> IntoIterator for &'a InstanceAffixSlots {
    type Item = &'a AffixToken;
    type IntoIter = std::slice::Iter<'a, AffixToken>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens().iter()
    }
}
