use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffixSlot {
    Prefix,
    Suffix,
}

impl AffixSlot {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
        }
    }
}

impl fmt::Display for AffixSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item categories that can carry affixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Weapon,
    Armor,
}

impl ItemType {
    const WEAPON_PREVIEW_SALT: u64 = 0x0A11_CE5F_17E5;
    const ARMOR_PREVIEW_SALT: u64 = 0x0A11_CE5F_17A2;

    pub fn as_str(&self) -> &'static str {
        match *self {
            Self::Weapon => "weapon",
            Self::Armor => "armor",
        }
    }

    /// Default salt mixed into the instance key when previewing or
    /// deterministically rolling an item of this type.
    pub fn preview_salt(&self) -> u64 {
        match *self {
            Self::Weapon => Self::WEAPON_PREVIEW_SALT,
            Self::Armor => Self::ARMOR_PREVIEW_SALT,
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "weapon" | "weapons" => Some(Self::Weapon),
            "armor" | "armour" => Some(Self::Armor),
            _ => None,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
