use serde::{Deserialize, Serialize};
use std::fmt;

/// MC2 整數座標（緯度、經度）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub lat: i32,
    pub lon: i32,
}

impl Coord {
    pub const fn new(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.lat, self.lon)
    }
}

/// 跨地圖節點參照 (map id, item id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdPair {
    pub map_id: u32,
    pub item_id: u32,
}

impl IdPair {
    pub const INVALID: IdPair = IdPair {
        map_id: u32::MAX,
        item_id: u32::MAX,
    };

    pub const fn new(map_id: u32, item_id: u32) -> Self {
        Self { map_id, item_id }
    }

    pub fn is_valid(&self) -> bool {
        self.map_id != u32::MAX && self.item_id != u32::MAX
    }
}

impl Default for IdPair {
    fn default() -> Self {
        IdPair::INVALID
    }
}

impl fmt::Display for IdPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}:0x{:x}", self.map_id, self.item_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Positive = 0,
    Negative = 1,
    BothDirections = 2,
    NoDirection = 3,
}

impl Direction {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Direction::Positive),
            1 => Some(Direction::Negative),
            2 => Some(Direction::BothDirections),
            3 => Some(Direction::NoDirection),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Direction::Positive => "Positive Direction",
            Direction::Negative => "Negative Direction",
            Direction::BothDirections => "BothDirections",
            Direction::NoDirection => "NoDirection",
        };
        f.write_str(text)
    }
}

/// 成本係數，`IMPASSABLE` 代表道路不可通行
pub type CostFactor = u32;

pub const IMPASSABLE: CostFactor = u32::MAX;

/// TMC 定位失敗時使用的預設成本係數
pub const TMC_FAILED_COST_FACTOR: CostFactor = 1010;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Blocked = 0,
    Closed = 1,
    StationaryTraffic = 2,
    QueuingTraffic = 3,
    SlowTraffic = 4,
    HeavyTraffic = 5,
    TrafficFlowingFreely = 6,
    LongQueues = 7,
    TrafficCongestion = 8,
    TrafficBuildingUp = 9,
    TrafficHeavierThanNormal = 10,
    TrafficVeryMuchHeavierThanNormal = 11,
    TrafficEasing = 12,
    TrafficLighterThanNormal = 13,
    Reroute = 14,
    NotProvided = 15,
    NoSeverity = 16,
    AlmostBlocked = 17,
    AlternatingContraflow = 19,
    MiscRoadworks = 20,
}

impl Severity {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use Severity::*;
        let severity = match code {
            0 => Blocked,
            1 => Closed,
            2 => StationaryTraffic,
            3 => QueuingTraffic,
            4 => SlowTraffic,
            5 => HeavyTraffic,
            6 => TrafficFlowingFreely,
            7 => LongQueues,
            8 => TrafficCongestion,
            9 => TrafficBuildingUp,
            10 => TrafficHeavierThanNormal,
            11 => TrafficVeryMuchHeavierThanNormal,
            12 => TrafficEasing,
            13 => TrafficLighterThanNormal,
            14 => Reroute,
            15 => NotProvided,
            16 => NoSeverity,
            17 => AlmostBlocked,
            19 => AlternatingContraflow,
            20 => MiscRoadworks,
            _ => return None,
        };
        Some(severity)
    }

    /// `None` 表示不可通行
    pub fn cost_factor(self) -> Option<CostFactor> {
        use Severity::*;
        match self {
            Blocked | Closed | Reroute => None,
            StationaryTraffic => Some(20000),
            QueuingTraffic => Some(5000),
            SlowTraffic => Some(3000),
            HeavyTraffic => Some(1333),
            TrafficFlowingFreely => Some(1150),
            LongQueues => Some(10000),
            TrafficCongestion => Some(2005),
            TrafficBuildingUp => Some(1300),
            TrafficHeavierThanNormal => Some(1334),
            TrafficVeryMuchHeavierThanNormal => Some(2000),
            TrafficEasing => Some(1115),
            TrafficLighterThanNormal => Some(1015),
            NotProvided => Some(1010),
            NoSeverity => Some(1001),
            AlmostBlocked => Some(100000),
            AlternatingContraflow => Some(4000),
            MiscRoadworks => Some(1025),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SeverityFactor {
    #[default]
    Unknown = 0,
    VerySlight = 1,
    Slight = 2,
    Medium = 3,
    Severe = 4,
    VerySevere = 5,
    Unspecified = 6,
}

impl SeverityFactor {
    pub fn multiplier(self) -> f32 {
        match self {
            SeverityFactor::Slight => 1.1,
            SeverityFactor::Medium => 1.2,
            SeverityFactor::Severe => 1.3,
            SeverityFactor::VerySevere => 1.4,
            SeverityFactor::Unknown | SeverityFactor::VerySlight | SeverityFactor::Unspecified => 1.0,
        }
    }
}

/// 嚴重程度乘上嚴重係數；不可通行者維持不可通行
pub fn cost_factor(severity: Severity, factor: SeverityFactor) -> CostFactor {
    match severity.cost_factor() {
        Some(base) => (base as f32 * factor.multiplier()) as CostFactor,
        None => IMPASSABLE,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSituationElement {
    #[serde(default)]
    pub element_reference: String,
    pub start_time: u32,
    pub expiry_time: u32,
    pub creation_time: u32,
    pub disturbance_type: u32,
    pub phrase: u32,
    #[serde(default)]
    pub event_code: u32,
    pub severity: Severity,
    #[serde(default)]
    pub severity_factor: SeverityFactor,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub queue_length: u32,
    #[serde(default)]
    pub first_location: String,
    #[serde(default)]
    pub second_location: String,
    #[serde(default)]
    pub extent: u32,
    pub direction: Direction,
    #[serde(default)]
    pub coordinates: Vec<Coord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSituation {
    pub situation_reference: String,
    #[serde(default)]
    pub location_table: String,
    pub elements: Vec<TrafficSituationElement>,
}

impl TrafficSituation {
    pub fn first_element(&self) -> Option<&TrafficSituationElement> {
        self.elements.first()
    }

    /// 沒有元素的情境視為有效，否則以第一個元素的到期時間判斷
    pub fn is_valid_at(&self, now: u32) -> bool {
        match self.first_element() {
            Some(element) => now < element.expiry_time,
            None => true,
        }
    }
}
