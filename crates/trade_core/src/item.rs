//! Item descriptors and participant identities.
//!
//! An `ItemStack` is an owned value. Every boundary that accepts or hands out
//! items clones them, so no caller ever shares a live reference with
//! inventory state held here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind used by the game for an empty inventory slot.
pub const AIR_KIND: &str = "air";

/// Identity of a trade participant, as stored in persisted documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One inventory item: its kind, stack size and an opaque metadata blob
/// (enchantments, custom names) that must round-trip bit-for-bit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    pub kind: String,
    pub quantity: u32,
    #[serde(default)]
    pub meta: Vec<u8>,
}

impl ItemStack {
    pub fn new(kind: impl Into<String>, quantity: u32) -> Self {
        Self {
            kind: kind.into(),
            quantity,
            meta: Vec::new(),
        }
    }

    pub fn with_meta(mut self, meta: impl Into<Vec<u8>>) -> Self {
        self.meta = meta.into();
        self
    }

    /// Whether this is the empty-slot sentinel rather than a real item.
    pub fn is_empty(&self) -> bool {
        self.quantity == 0 || self.kind.is_empty() || self.kind == AIR_KIND
    }
}

/// Copy `items`, dropping empty-slot sentinels.
pub fn retain_real_items(items: &[ItemStack]) -> Vec<ItemStack> {
    items.iter().filter(|item| !item.is_empty()).cloned().collect()
}
