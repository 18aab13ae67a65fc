use crate::domain::model::{Coord, CostFactor, Direction, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

pub type DisturbanceId = u32;

pub const INVALID_DISTURBANCE_ID: DisturbanceId = u32::MAX;

/// 單一路線點（依 route index 排序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub route_index: u32,
    pub node_id: u32,
    pub coord: Coord,
    pub angle: u32,
}

/// 一筆交通事件在單一地圖上的紀錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisturbanceElement {
    pub disturbance_id: DisturbanceId,
    pub situation_reference: String,
    pub disturbance_type: u32,
    pub phrase: u32,
    pub event_code: u32,
    pub start_time: u32,
    pub end_time: u32,
    pub creation_time: u32,
    pub severity: Severity,
    pub direction: Direction,
    pub first_location: String,
    pub second_location: String,
    pub extent: u32,
    pub cost_factor: CostFactor,
    pub text: String,
    pub queue_length: u32,
    pub map_id: u32,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    points: BTreeMap<u32, RoutePoint>,
}

impl DisturbanceElement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        disturbance_id: DisturbanceId,
        situation_reference: impl Into<String>,
        disturbance_type: u32,
        phrase: u32,
        event_code: u32,
        start_time: u32,
        end_time: u32,
        creation_time: u32,
        severity: Severity,
        direction: Direction,
        first_location: impl Into<String>,
        second_location: impl Into<String>,
        extent: u32,
        cost_factor: CostFactor,
        text: impl Into<String>,
        queue_length: u32,
    ) -> Self {
        Self {
            disturbance_id,
            situation_reference: situation_reference.into(),
            disturbance_type,
            phrase,
            event_code,
            start_time,
            end_time,
            creation_time,
            severity,
            direction,
            first_location: first_location.into(),
            second_location: second_location.into(),
            extent,
            cost_factor,
            text: text.into(),
            queue_length,
            map_id: u32::MAX,
            deleted: false,
            points: BTreeMap::new(),
        }
    }

    pub fn has_valid_id(&self) -> bool {
        self.disturbance_id != INVALID_DISTURBANCE_ID
    }

    /// 同一 route index 重複加入時以後者為準
    pub fn add_coordinate(&mut self, node_id: u32, lat: i32, lon: i32, angle: u32, route_index: u32) {
        self.points.insert(
            route_index,
            RoutePoint {
                route_index,
                node_id,
                coord: Coord::new(lat, lon),
                angle,
            },
        );
    }

    pub fn coordinates(&self) -> impl Iterator<Item = &RoutePoint> + '_ {
        self.points.values()
    }

    pub fn nbr_coordinates(&self) -> usize {
        self.points.len()
    }

    pub fn first_coord(&self) -> Option<Coord> {
        self.points.values().next().map(|p| p.coord)
    }

    pub fn last_coord(&self) -> Option<Coord> {
        self.points.values().next_back().map(|p| p.coord)
    }

    /// 只保留第一與最後一個點，儲存於記憶體時只需要端點
    pub fn strip_data(&mut self) {
        if self.points.len() <= 2 {
            return;
        }
        let first = self.points.keys().next().copied();
        let last = self.points.keys().next_back().copied();
        self.points
            .retain(|index, _| Some(*index) == first || Some(*index) == last);
    }

    /// 情境參照中第一個 ':' 之前的供應商代碼
    pub fn provider(&self) -> &str {
        self.situation_reference
            .split_once(':')
            .map(|(provider, _)| provider)
            .unwrap_or(&self.situation_reference)
    }
}

/// 一組更新與刪除；只能移動，不能複製
#[derive(Debug, Default, PartialEq)]
pub struct DisturbanceChangeset {
    update_set: Vec<DisturbanceElement>,
    remove_set: Vec<DisturbanceElement>,
}

impl DisturbanceChangeset {
    pub fn new(update_set: Vec<DisturbanceElement>, remove_set: Vec<DisturbanceElement>) -> Self {
        Self {
            update_set,
            remove_set,
        }
    }

    pub fn update_set(&self) -> &[DisturbanceElement] {
        &self.update_set
    }

    pub fn remove_set(&self) -> &[DisturbanceElement] {
        &self.remove_set
    }

    pub fn update_set_mut(&mut self) -> &mut Vec<DisturbanceElement> {
        &mut self.update_set
    }

    pub fn is_empty(&self) -> bool {
        self.update_set.is_empty() && self.remove_set.is_empty()
    }

    pub fn swap(&mut self, other: &mut DisturbanceChangeset) {
        std::mem::swap(self, other);
    }

    pub fn into_parts(self) -> (Vec<DisturbanceElement>, Vec<DisturbanceElement>) {
        (self.update_set, self.remove_set)
    }
}

/// 變更集寫入結果的位元旗標
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChangesetStatus(u32);

impl ChangesetStatus {
    pub const OK: ChangesetStatus = ChangesetStatus(0);
    pub const UPDATE_FAILED: ChangesetStatus = ChangesetStatus(1);
    pub const REMOVE_FAILED: ChangesetStatus = ChangesetStatus(2);

    const KNOWN: u32 = 0b11;

    /// 未定義的位元保留下來，整體狀態因此不為 OK
    pub fn from_bits(bits: u32) -> Self {
        let unknown = bits & !Self::KNOWN;
        if unknown != 0 {
            tracing::warn!("changeset status carries unknown bits 0x{:x}", unknown);
        }
        ChangesetStatus(bits)
    }

    pub const fn unknown_bits(self) -> u32 {
        self.0 & !Self::KNOWN
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ChangesetStatus) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ChangesetStatus {
    type Output = ChangesetStatus;

    fn bitor(self, rhs: ChangesetStatus) -> ChangesetStatus {
        ChangesetStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangesetStatus {
    fn bitor_assign(&mut self, rhs: ChangesetStatus) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ChangesetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("OK");
        }
        let mut flags = Vec::new();
        if self.contains(ChangesetStatus::UPDATE_FAILED) {
            flags.push("UPDATE_FAILED".to_string());
        }
        if self.contains(ChangesetStatus::REMOVE_FAILED) {
            flags.push("REMOVE_FAILED".to_string());
        }
        if self.unknown_bits() != 0 {
            flags.push(format!("UNKNOWN(0x{:x})", self.unknown_bits()));
        }
        f.write_str(&flags.join("|"))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn element(situation_reference: &str, map_id: u32) -> DisturbanceElement {
        let mut element = DisturbanceElement::new(
            INVALID_DISTURBANCE_ID,
            situation_reference,
            0,
            8,
            101,
            1_000,
            2_000,
            900,
            Severity::QueuingTraffic,
            Direction::Positive,
            "",
            "",
            0,
            5000,
            "Queue",
            2,
        );
        element.map_id = map_id;
        element
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_are_ordered_by_route_index() {
        let mut element = fixtures::element("TMC:1", 3);
        element.add_coordinate(30, 300, 301, 90, 2);
        element.add_coordinate(10, 100, 101, 0, 0);
        element.add_coordinate(20, 200, 201, 45, 1);

        let nodes: Vec<u32> = element.coordinates().map(|p| p.node_id).collect();
        assert_eq!(nodes, vec![10, 20, 30]);
        assert_eq!(element.first_coord(), Some(Coord::new(100, 101)));
        assert_eq!(element.last_coord(), Some(Coord::new(300, 301)));
    }

    #[test]
    fn test_strip_data_keeps_endpoints() {
        let mut element = fixtures::element("TMC:1", 3);
        for i in 0..5 {
            element.add_coordinate(i, i as i32, i as i32, 0, i);
        }
        element.strip_data();

        let indexes: Vec<u32> = element.coordinates().map(|p| p.route_index).collect();
        assert_eq!(indexes, vec![0, 4]);
    }

    #[test]
    fn test_provider_prefix() {
        assert_eq!(fixtures::element("TMC:1234", 1).provider(), "TMC");
        assert_eq!(fixtures::element("plain", 1).provider(), "plain");
    }

    #[test]
    fn test_changeset_status_flags_combine() {
        let mut status = ChangesetStatus::OK;
        assert!(status.is_ok());
        status |= ChangesetStatus::REMOVE_FAILED;
        assert!(status.contains(ChangesetStatus::REMOVE_FAILED));
        assert!(!status.contains(ChangesetStatus::UPDATE_FAILED));

        let both = status | ChangesetStatus::UPDATE_FAILED;
        assert_eq!(both.bits(), 3);
        assert_eq!(both.to_string(), "UPDATE_FAILED|REMOVE_FAILED");
        assert_eq!(ChangesetStatus::from_bits(3), both);
    }

    #[test]
    fn test_changeset_status_keeps_unknown_bits() {
        let status = ChangesetStatus::from_bits(0b100);
        assert!(!status.is_ok());
        assert_eq!(status.bits(), 0b100);
        assert_eq!(status.unknown_bits(), 0b100);
        assert!(!status.contains(ChangesetStatus::UPDATE_FAILED));
        assert_eq!(status.to_string(), "UNKNOWN(0x4)");

        let mixed = ChangesetStatus::from_bits(0xff);
        assert!(mixed.contains(ChangesetStatus::UPDATE_FAILED | ChangesetStatus::REMOVE_FAILED));
        assert_eq!(mixed.to_string(), "UPDATE_FAILED|REMOVE_FAILED|UNKNOWN(0xfc)");
    }

    #[test]
    fn test_changeset_swap_moves_contents() {
        let mut full = DisturbanceChangeset::new(vec![fixtures::element("TMC:1", 1)], vec![]);
        let mut empty = DisturbanceChangeset::default();

        full.swap(&mut empty);

        assert!(full.is_empty());
        assert_eq!(empty.update_set().len(), 1);
        let (update, remove) = empty.into_parts();
        assert_eq!(update[0].situation_reference, "TMC:1");
        assert!(remove.is_empty());
    }
}
