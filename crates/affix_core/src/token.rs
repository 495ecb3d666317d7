use std::fmt;
use std::hash::{Hash, Hasher};

/// Stable 64-bit surrogate for an affix id string.
pub type AffixToken = u64;

/// `(baseFormId << 16) | uniqueId`. Zero never names a live instance.
pub type InstanceKey = u64;

pub const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

const GOLDEN_RATIO_64: u64 = 0x9E37_79B9_7F4A_7C15;

/// FNV-1a over the UTF-8 bytes of `id`. The empty string hashes to the offset basis.
pub const fn make_affix_token(id: &str) -> AffixToken {
    let bytes = id.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

pub fn make_instance_key(base_form_id: u32, unique_id: u16) -> InstanceKey {
    ((base_form_id as u64) << 16) | unique_id as u64
}

pub fn split_instance_key(key: InstanceKey) -> (u32, u16) {
    ((key >> 16) as u32, (key & 0xFFFF) as u16)
}

/// Render an instance key as `BASE:UNIQUE` in hex, the form used in logs and reports.
pub fn format_instance_key(key: InstanceKey) -> String {
    let (base, unique) = split_instance_key(key);
    format!("{base:08X}:{unique:04X}")
}

/// SplitMix64 finaliser.
pub const fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;
    x
}

/// Murmur3 fmix64, used to seed preview streams.
pub const fn avalanche64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    x = x.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    x ^= x >> 33;
    x
}

const fn combine(left: u64, right: u64) -> u64 {
    left ^ right
        .wrapping_add(GOLDEN_RATIO_64)
        .wrapping_add(left << 6)
        .wrapping_add(left >> 2)
}

/// Names the runtime counters of one applied affix on one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstanceStateKey {
    pub instance_key: InstanceKey,
    pub affix_token: AffixToken,
}

impl InstanceStateKey {
    pub const fn new(instance_key: InstanceKey, affix_token: AffixToken) -> Self {
        Self {
            instance_key,
            affix_token,
        }
    }

    /// Order-sensitive combined hash of both halves.
    pub const fn combined_hash(&self) -> u64 {
        combine(mix64(self.instance_key), mix64(self.affix_token))
    }
}

impl Hash for InstanceStateKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.combined_hash());
    }
}

impl fmt::Display for InstanceStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{:016X}",
            format_instance_key(self.instance_key),
            self.affix_token
        )
    }
}
