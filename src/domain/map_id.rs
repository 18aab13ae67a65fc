//! Map id ranges, `.mcm` file naming and the lower-to-higher map tree.

use crate::utils::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const OVERVIEW_BASE: u32 = 0x8000_0000;
const SUPER_OVERVIEW_BASE: u32 = 0x9000_0000;

/// 檢查既有地圖時最多嘗試的 id 數
const MAX_EXISTING_TRIES: u32 = 400;

const COMPRESSED_SUFFIXES: [&str; 2] = [".gz", ".bz2"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapLevel {
    Underview,
    Overview,
    CountryOverview,
    SuperOverview,
}

impl MapLevel {
    pub fn of(map_id: u32) -> Self {
        if map_id < OVERVIEW_BASE {
            MapLevel::Underview
        } else if map_id >= SUPER_OVERVIEW_BASE {
            MapLevel::SuperOverview
        } else if map_id & 1 == 1 {
            MapLevel::CountryOverview
        } else {
            MapLevel::Overview
        }
    }

    pub fn first_map_id(self) -> u32 {
        match self {
            MapLevel::Underview => 0,
            MapLevel::Overview => OVERVIEW_BASE,
            MapLevel::CountryOverview => OVERVIEW_BASE + 1,
            MapLevel::SuperOverview => SUPER_OVERVIEW_BASE,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "underview" => Some(MapLevel::Underview),
            "overview" => Some(MapLevel::Overview),
            "country" | "country_overview" => Some(MapLevel::CountryOverview),
            "super" | "super_overview" => Some(MapLevel::SuperOverview),
            _ => None,
        }
    }
}

/// 同一層級的下一個 id；overview 與 country overview 交錯使用奇偶數
pub fn next_map_id(map_id: u32) -> u32 {
    match MapLevel::of(map_id) {
        MapLevel::Overview | MapLevel::CountryOverview => map_id.wrapping_add(2),
        MapLevel::Underview | MapLevel::SuperOverview => map_id.wrapping_add(1),
    }
}

pub fn map_file_name(map_id: u32) -> String {
    format!("{:09x}.mcm", map_id)
}

pub fn map_file_path(dir: impl AsRef<Path>, map_id: u32) -> PathBuf {
    dir.as_ref().join(map_file_name(map_id))
}

/// 接受 `<hex>.mcm`、`<hex>.mcm.gz`、`<hex>.mcm.bz2`
pub fn parse_map_file_name(name: &str) -> Option<u32> {
    let name = COMPRESSED_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name);
    let stem = name.strip_suffix(".mcm")?;
    if stem.is_empty() || stem.len() > 9 {
        return None;
    }
    u32::from_str_radix(stem, 16).ok()
}

fn map_file_exists(dir: &Path, map_id: u32) -> bool {
    let plain = map_file_path(dir, map_id);
    if plain.exists() {
        return true;
    }
    COMPRESSED_SUFFIXES.iter().any(|suffix| {
        let mut compressed = plain.clone().into_os_string();
        compressed.push(suffix);
        PathBuf::from(compressed).exists()
    })
}

fn check_map_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(IngestError::MissingConfigError {
            field: "maps.directory".to_string(),
        });
    }
    Ok(())
}

/// 第一個尚未有檔案（含壓縮檔）的 id
pub fn next_free_map_id(dir: impl AsRef<Path>, level: MapLevel) -> Result<u32> {
    let dir = dir.as_ref();
    check_map_dir(dir)?;

    let mut map_id = level.first_map_id();
    while map_file_exists(dir, map_id) {
        tracing::trace!("Map file exists for 0x{:09x}", map_id);
        map_id = next_map_id(map_id);
    }
    Ok(map_id)
}

pub fn first_existing_map_id(dir: impl AsRef<Path>, level: MapLevel) -> Result<Option<u32>> {
    let dir = dir.as_ref();
    check_map_dir(dir)?;

    let mut map_id = level.first_map_id();
    for _ in 0..MAX_EXISTING_TRIES {
        if map_file_exists(dir, map_id) {
            return Ok(Some(map_id));
        }
        map_id = next_map_id(map_id);
    }
    Ok(None)
}

pub fn map_ids_in_dir(dir: impl AsRef<Path>) -> Result<BTreeSet<u32>> {
    let mut ids = BTreeSet::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        if let Some(map_id) = entry.file_name().to_str().and_then(parse_map_file_name) {
            ids.insert(map_id);
        }
    }
    Ok(ids)
}

/// 低層地圖到上一層地圖的對應
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemIdTree {
    higher: BTreeMap<u32, u32>,
}

impl ItemIdTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 形成循環的關係會被拒絕
    pub fn add_map(&mut self, lower: u32, higher: u32) -> Result<()> {
        if lower == higher || self.maps_upwards(higher).any(|id| id == lower) {
            return Err(IngestError::processing(format!(
                "map 0x{:x} above 0x{:x} would form a cycle",
                higher, lower
            )));
        }
        self.higher.insert(lower, higher);
        Ok(())
    }

    pub fn higher_level_map(&self, map_id: u32) -> Option<u32> {
        self.higher.get(&map_id).copied()
    }

    pub fn maps_upwards(&self, map_id: u32) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors(Some(map_id), move |id| self.higher_level_map(*id))
    }

    pub fn relations(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.higher.iter().map(|(lower, higher)| (*lower, *higher))
    }

    pub fn len(&self) -> usize {
        self.higher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.higher.is_empty()
    }
}
