//! Device catalog: known locos and switch articles
//!
//! The catalog is display metadata owned by an external source (the CS2
//! `.cs2` files). The core only keys runtime state by the loco uid and maps
//! switch indices to article uids.

pub mod cs2;
pub mod watcher;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub use cs2::{ArticleFile, LocoFile};
pub use watcher::{CatalogWatcher, PollOutcome};

/// One known locomotive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocoEntry {
    /// Device uid used on the bus
    pub uid: u32,
    /// Display name
    pub name: String,
    /// Decoder address, if listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u32>,
    /// Icon name, if listed (or overridden)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl LocoEntry {
    /// Entry with only a uid and name
    pub fn new(uid: u32, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
            address: None,
            icon: None,
        }
    }
}

/// Decoder protocol of a switch article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderType {
    /// Märklin Motorola
    Mm2,
    /// DCC
    Dcc,
    /// Selectrix
    Sx1,
    /// Unknown or missing
    #[default]
    Other,
}

impl DecoderType {
    /// Parse the `dectyp` field (case-insensitive)
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "mm2" => DecoderType::Mm2,
            "dcc" => DecoderType::Dcc,
            "sx1" => DecoderType::Sx1,
            _ => DecoderType::Other,
        }
    }
}

/// Bus uid of a switch article from its 1-based id and decoder type
pub fn article_uid(id: u32, dectyp: DecoderType) -> u32 {
    let base = id.wrapping_sub(1) & 0x3FF;
    match dectyp {
        DecoderType::Mm2 => 0x3000 | base,
        DecoderType::Dcc => 0x3800 | base,
        DecoderType::Sx1 => 0x2800 | base,
        DecoderType::Other => base,
    }
}

/// One switch article, in file order (its position is the switch index)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchArticle {
    /// 1-based article id from the file
    pub id: u32,
    /// Decoder type
    pub dectyp: DecoderType,
    /// Display name
    pub name: String,
    /// Derived bus uid; `None` when the file gives no usable `.id`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
}

/// External provider of the loco catalog
///
/// `marker` is a cheap change indicator (typically a modification time);
/// `load` does the expensive parse.
pub trait CatalogSource: Send + 'static {
    /// Current modification marker; `None` when the source is absent
    fn marker(&self) -> Option<SystemTime>;

    /// Read and parse the full catalog
    fn load(&self) -> anyhow::Result<Vec<LocoEntry>>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}
