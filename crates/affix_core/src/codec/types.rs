/// Four-character record tag, packed big-end-first the way multi-character
/// literals are laid out (`'IAXF'`).
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    ((tag[0] as u32) << 24) | ((tag[1] as u32) << 16) | ((tag[2] as u32) << 8) | tag[3] as u32
}

pub const RECORD_INSTANCE_AFFIXES: u32 = fourcc(b"IAXF");
pub const RECORD_RUNTIME_STATES: u32 = fourcc(b"IRST");
pub const RECORD_RUNEWORD_STATE: u32 = fourcc(b"RWRD");
pub const RECORD_LOOT_EVALUATED: u32 = fourcc(b"LRLD");
pub const RECORD_SHUFFLE_BAGS: u32 = fourcc(b"LSBG");

pub const SLOTS_VERSION_V1: u32 = 1;
pub const SLOTS_VERSION_V2: u32 = 2;
pub const SLOTS_VERSION_V3: u32 = 3;
pub const SLOTS_VERSION_V4: u32 = 4;
pub const SLOTS_VERSION_V5: u32 = 5;
pub const SLOTS_VERSION_CURRENT: u32 = 6;

pub const RUNTIME_STATES_VERSION: u32 = 1;
pub const RUNEWORD_STATE_VERSION: u32 = 1;
pub const LOOT_EVALUATED_VERSION: u32 = 1;
pub const SHUFFLE_BAGS_VERSION: u32 = 1;

/// Bytes in a record header: type, version, length.
pub const RECORD_HEADER_LEN: usize = 12;

pub const RECORD_ORDER: [u32; 5] = [
    RECORD_INSTANCE_AFFIXES,
    RECORD_RUNTIME_STATES,
    RECORD_RUNEWORD_STATE,
    RECORD_LOOT_EVALUATED,
    RECORD_SHUFFLE_BAGS,
];

pub fn record_tag_name(tag: u32) -> String {
    let bytes = tag.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic()) {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        format!("0x{tag:08X}")
    }
}

/// Whether this build understands `version` of the record `tag`.
pub fn is_supported(tag: u32, version: u32) -> bool {
    match tag {
        RECORD_INSTANCE_AFFIXES => (SLOTS_VERSION_V1..=SLOTS_VERSION_CURRENT).contains(&version),
        RECORD_RUNTIME_STATES => version == RUNTIME_STATES_VERSION,
        RECORD_RUNEWORD_STATE => version == RUNEWORD_STATE_VERSION,
        RECORD_LOOT_EVALUATED => version == LOOT_EVALUATED_VERSION,
        RECORD_SHUFFLE_BAGS => version == SHUFFLE_BAGS_VERSION,
        _ => false,
    }
}
