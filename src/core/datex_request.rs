//! DATEX situation resolution as a sans-IO state machine.
//!
//! A [`DatexRequest`] never talks to a module itself. Every transition
//! returns the [`Outgoing`] requests to send, and the caller feeds the
//! replies back through [`DatexRequest::process_reply`] (or
//! [`DatexRequest::process_missing_reply`] on timeout). At most one request
//! is outstanding at a time.

use crate::core::codec::ReplyStatus;
use crate::core::geometry::{angle_degrees, distance_m, reverse_degrees, segment_angle};
use crate::core::packets::{
    ModuleReply, ModuleRequest, ModuleType, ReplyBody, RouteEndpoint, StreetSegmentMatch,
};
use crate::domain::disturbance::{DisturbanceElement, INVALID_DISTURBANCE_ID};
use crate::domain::map_id::ItemIdTree;
use crate::domain::model::{
    cost_factor, Coord, Direction, IdPair, Severity, TrafficSituation, TMC_FAILED_COST_FACTOR,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// 每個涵蓋 id 請求最多回傳的節點數
const COVERED_IDS_MAX_NBR: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatexState {
    Tmc,
    StreetSegmentItem,
    CoveredIds,
    RouteRequest,
    TopRegionRequest,
    IdTranslationRequest,
    AddDisturbance,
    Done,
    Error,
}

impl fmt::Display for DatexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DatexState::Tmc => "TMC",
            DatexState::StreetSegmentItem => "STREET_SEGMENT_ITEM",
            DatexState::CoveredIds => "COVERED_IDS",
            DatexState::RouteRequest => "ROUTE_REQUEST",
            DatexState::TopRegionRequest => "TOP_REGION_REQUEST",
            DatexState::IdTranslationRequest => "ID_TRANSLATION_REQUEST",
            DatexState::AddDisturbance => "ADD_DISTURBANCE",
            DatexState::Done => "DONE",
            DatexState::Error => "ERROR",
        };
        f.write_str(text)
    }
}

/// `Publish` 將結果送到交通模組；`Collect` 只回傳每張地圖的紀錄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatexMode {
    Publish,
    Collect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub module: ModuleType,
    pub request: ModuleRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSituation {
    pub situation_reference: String,
    pub elements: Vec<DisturbanceElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedDisturbance {
    pub situation_reference: String,
    pub map_id: u32,
    pub disturbance_id: u32,
}

/// 已定位的底層節點
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeRecord {
    map_id: u32,
    node_id: u32,
    coord: Coord,
    angle: u32,
}

fn blank_template() -> DisturbanceElement {
    DisturbanceElement::new(
        INVALID_DISTURBANCE_ID,
        "",
        0,
        0,
        0,
        0,
        0,
        0,
        Severity::NoSeverity,
        Direction::NoDirection,
        "",
        "",
        0,
        0,
        "",
        0,
    )
}

pub struct DatexRequest {
    id: u16,
    mode: DatexMode,
    situations: Vec<TrafficSituation>,
    state: DatexState,
    outbox: Vec<Outgoing>,
    last_error: Option<String>,
    published: Vec<PublishedDisturbance>,
    resolved: Vec<ResolvedSituation>,

    // 單一情境的狀態，每次 process_situation 重設
    template: DisturbanceElement,
    tmc_coords: Vec<Coord>,
    tmc_first: Vec<Coord>,
    tmc_second: Vec<Coord>,
    tmc_failed: bool,
    nodes: Vec<NodeRecord>,

    street_pending: VecDeque<ModuleRequest>,
    street_expected: usize,
    street_received: usize,
    street_replies: BTreeMap<u32, Vec<StreetSegmentMatch>>,

    origins_covered: bool,
    origin_ids: BTreeSet<IdPair>,
    destination_ids: BTreeSet<IdPair>,

    route_pending: Vec<ModuleRequest>,

    map_tree: ItemIdTree,
    translation_pending: VecDeque<ModuleRequest>,
    low_level_nodes: Vec<IdPair>,
    translation_to_map: u32,
    low_to_high: BTreeMap<IdPair, IdPair>,

    add_pending: VecDeque<DisturbanceElement>,
    add_in_flight: u32,
}

impl DatexRequest {
    /// 情境由後往前處理
    pub fn new(id: u16, situations: Vec<TrafficSituation>, mode: DatexMode) -> Self {
        let mut request = Self {
            id,
            mode,
            situations,
            state: DatexState::Done,
            outbox: Vec::new(),
            last_error: None,
            published: Vec::new(),
            resolved: Vec::new(),
            template: blank_template(),
            tmc_coords: Vec::new(),
            tmc_first: Vec::new(),
            tmc_second: Vec::new(),
            tmc_failed: false,
            nodes: Vec::new(),
            street_pending: VecDeque::new(),
            street_expected: 0,
            street_received: 0,
            street_replies: BTreeMap::new(),
            origins_covered: false,
            origin_ids: BTreeSet::new(),
            destination_ids: BTreeSet::new(),
            route_pending: Vec::new(),
            map_tree: ItemIdTree::new(),
            translation_pending: VecDeque::new(),
            low_level_nodes: Vec::new(),
            translation_to_map: u32::MAX,
            low_to_high: BTreeMap::new(),
            add_pending: VecDeque::new(),
            add_in_flight: u32::MAX,
        };
        let state = request.process_situation();
        request.enter(state);
        request
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn state(&self) -> DatexState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, DatexState::Done | DatexState::Error)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// 取出尚未送出的請求
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_published(&mut self) -> Vec<PublishedDisturbance> {
        std::mem::take(&mut self.published)
    }

    pub fn take_resolved(&mut self) -> Vec<ResolvedSituation> {
        std::mem::take(&mut self.resolved)
    }

    pub fn process_reply(&mut self, reply: ModuleReply) -> Vec<Outgoing> {
        tracing::debug!(
            "[DATEX {}] {} reply ({}) in state {}",
            self.id,
            reply.body.kind(),
            reply.status,
            self.state
        );
        let state = match self.state {
            DatexState::Tmc => self.process_tmc_reply(Some(reply)),
            DatexState::StreetSegmentItem => self.process_street_segment_reply(reply),
            DatexState::CoveredIds => self.process_covered_ids_reply(reply),
            DatexState::RouteRequest => self.process_route_reply(reply),
            DatexState::TopRegionRequest => self.process_top_region_reply(reply),
            DatexState::IdTranslationRequest => self.process_id_translation_reply(reply),
            DatexState::AddDisturbance => self.process_add_disturbance_reply(reply),
            DatexState::Done | DatexState::Error => self.fail("reply received in invalid state"),
        };
        self.enter(state);
        self.take_outgoing()
    }

    /// 模組沒有回覆（逾時或傳輸失敗）
    pub fn process_missing_reply(&mut self) -> Vec<Outgoing> {
        let state = match self.state {
            DatexState::Tmc => self.process_tmc_reply(None),
            state => self.fail(format!("no reply in state {}", state)),
        };
        self.enter(state);
        self.take_outgoing()
    }

    fn enter(&mut self, state: DatexState) {
        if state == DatexState::Error {
            self.outbox.clear();
        }
        self.state = state;
    }

    fn fail(&mut self, reason: impl Into<String>) -> DatexState {
        let reason = reason.into();
        tracing::error!(
            "[DATEX {}] {} (situation {})",
            self.id,
            reason,
            self.template.situation_reference
        );
        self.last_error = Some(reason);
        DatexState::Error
    }

    fn send(&mut self, request: ModuleRequest) {
        self.outbox.push(Outgoing {
            module: request.module(),
            request,
        });
    }

    fn reset(&mut self) {
        self.template = blank_template();
        self.tmc_coords.clear();
        self.tmc_first.clear();
        self.tmc_second.clear();
        self.tmc_failed = false;
        self.nodes.clear();
        self.street_pending.clear();
        self.street_expected = 0;
        self.street_received = 0;
        self.street_replies.clear();
        self.origins_covered = false;
        self.origin_ids.clear();
        self.destination_ids.clear();
        self.route_pending.clear();
        self.map_tree = ItemIdTree::new();
        self.translation_pending.clear();
        self.low_level_nodes.clear();
        self.translation_to_map = u32::MAX;
        self.low_to_high.clear();
        self.add_pending.clear();
        self.add_in_flight = u32::MAX;
    }

    fn process_situation(&mut self) -> DatexState {
        self.reset();

        let Some(situation) = self.situations.pop() else {
            tracing::info!("[DATEX {}] all situations processed", self.id);
            return DatexState::Done;
        };
        tracing::info!(
            "[DATEX {}] processSituation {}, {} situations left",
            self.id,
            situation.situation_reference,
            self.situations.len()
        );

        let Some(element) = situation.first_element() else {
            self.template.situation_reference = situation.situation_reference;
            return self.fail("situation has no elements");
        };

        let cost = cost_factor(element.severity, element.severity_factor);
        tracing::debug!(
            "[DATEX {}] severity {:?}, cost factor {}",
            self.id,
            element.severity,
            cost
        );
        self.template = DisturbanceElement::new(
            INVALID_DISTURBANCE_ID,
            situation.situation_reference.as_str(),
            element.disturbance_type,
            element.phrase,
            element.event_code,
            element.start_time,
            element.expiry_time,
            element.creation_time,
            element.severity,
            element.direction,
            element.first_location.as_str(),
            element.second_location.as_str(),
            element.extent,
            cost,
            element.text.as_str(),
            element.queue_length,
        );
        self.tmc_coords = element.coordinates.clone();
        match self.tmc_coords.as_slice() {
            [] => {}
            [only] => self.tmc_first.push(*only),
            [first, .., last] => {
                self.tmc_first.push(*first);
                self.tmc_second.push(*last);
            }
        }

        if !self.template.first_location.is_empty() {
            return self.create_tmc_request();
        }
        match self.tmc_coords.len() {
            0 => self.fail("situation has neither a location code nor coordinates"),
            1 => self.create_street_segment_requests(),
            _ => self.create_covered_ids_request(),
        }
    }

    fn create_tmc_request(&mut self) -> DatexState {
        tracing::debug!(
            "[DATEX {}] requesting TMC {}, {}, {}, {}",
            self.id,
            self.template.first_location,
            self.template.second_location,
            self.template.extent,
            self.template.direction
        );
        self.send(ModuleRequest::GetTmcCoordinates {
            first: self.template.first_location.clone(),
            second: self.template.second_location.clone(),
            extent: self.template.extent,
            direction: self.template.direction,
        });
        DatexState::Tmc
    }

    fn process_tmc_reply(&mut self, reply: Option<ModuleReply>) -> DatexState {
        let received = reply.is_some();
        if let Some(ModuleReply {
            status: ReplyStatus::Ok,
            body: ReplyBody::TmcCoordinates { first, second },
        }) = reply
        {
            self.tmc_first = first;
            self.tmc_second = second;
            let single_point = self.template.extent == 0
                && !self.template.first_location.is_empty()
                && self.template.second_location.is_empty();
            return if single_point {
                self.create_street_segment_requests()
            } else {
                self.create_route_request()
            };
        }

        tracing::warn!(
            "[DATEX {}] TMC lookup failed for {} ({}), location {} / {}",
            self.id,
            self.template.situation_reference,
            if received { "NOT OK" } else { "no reply" },
            self.template.first_location,
            self.template.second_location
        );

        match self.tmc_coords.as_slice() {
            [first, .., last] => {
                let (first, last) = (*first, *last);
                self.tmc_failed = true;
                self.tmc_first = vec![first];
                self.tmc_second = vec![last];
                if received {
                    self.create_route_request()
                } else {
                    self.create_covered_ids_request()
                }
            }
            [only] => {
                let only = *only;
                self.tmc_failed = true;
                self.tmc_first = vec![only];
                self.tmc_second.clear();
                self.create_street_segment_requests()
            }
            [] if received => self.process_situation(),
            [] => self.fail("TMC module did not answer and there are no coordinates"),
        }
    }

    fn create_street_segment_requests(&mut self) -> DatexState {
        self.street_pending = self
            .tmc_first
            .iter()
            .enumerate()
            .map(|(index, coord)| ModuleRequest::StreetSegmentItem {
                index: index as u32,
                coord: *coord,
                map_id: None,
            })
            .collect();
        self.street_expected = self.street_pending.len();
        self.street_received = 0;
        self.street_replies.clear();

        match self.street_pending.pop_front() {
            Some(request) => {
                self.send(request);
                DatexState::StreetSegmentItem
            }
            None => self.fail("no coordinates to look up street segments for"),
        }
    }

    fn process_street_segment_reply(&mut self, reply: ModuleReply) -> DatexState {
        self.street_received += 1;
        match (reply.status, reply.body) {
            (ReplyStatus::Ok, ReplyBody::StreetSegmentItem(item)) => {
                self.street_replies.entry(item.index).or_default().push(item);
            }
            (ReplyStatus::NotUnique, ReplyBody::NotUnique { index, map_ids }) if map_ids.is_empty() => {
                return self.fail(format!("street segment for index {} not unique on no maps", index));
            }
            (ReplyStatus::NotUnique, ReplyBody::NotUnique { index, map_ids }) => {
                let Some(coord) = self.tmc_first.get(index as usize).copied() else {
                    return self.fail(format!("not unique reply for unknown index {}", index));
                };
                tracing::debug!(
                    "[DATEX {}] index {} not unique, asking {} maps",
                    self.id,
                    index,
                    map_ids.len()
                );
                for map_id in map_ids {
                    self.street_expected += 1;
                    self.street_pending.push_back(ModuleRequest::StreetSegmentItem {
                        index,
                        coord,
                        map_id: Some(map_id),
                    });
                }
            }
            (status, body) => {
                return self.fail(format!(
                    "street segment lookup answered {} with {}",
                    status,
                    body.kind()
                ))
            }
        }

        if self.street_received >= self.street_expected {
            tracing::debug!("[DATEX {}] all street segment replies received", self.id);
            self.collect_street_nodes();
            return self.create_top_region_request();
        }
        match self.street_pending.pop_front() {
            Some(request) => {
                self.send(request);
                DatexState::StreetSegmentItem
            }
            None => self.fail("street segment replies missing"),
        }
    }

    /// 每個索引取距離最近的回覆
    fn collect_street_nodes(&mut self) {
        let replies = std::mem::take(&mut self.street_replies);
        for matches in replies.values() {
            let Some(best) = matches
                .iter()
                .copied()
                .reduce(|best, m| if m.distance < best.distance { m } else { best })
            else {
                continue;
            };

            let known = self
                .nodes
                .iter()
                .any(|n| n.map_id == best.map_id && n.coord == best.coord);
            if known {
                continue;
            }
            for (node_id, angle) in [
                (best.first_node, best.first_angle),
                (best.second_node, best.second_angle),
            ] {
                if node_id != u32::MAX {
                    self.nodes.push(NodeRecord {
                        map_id: best.map_id,
                        node_id,
                        coord: best.coord,
                        angle: u32::from(angle),
                    });
                }
            }
        }
    }

    fn create_covered_ids_request(&mut self) -> DatexState {
        let (Some(origin), Some(destination)) =
            (self.tmc_coords.last().copied(), self.tmc_coords.first().copied())
        else {
            return self.fail("no coordinates for covered ids");
        };

        let distance = distance_m(origin, destination);
        let angle = angle_degrees(origin, destination);
        let max_road_class = if distance > 10_000.0 {
            1
        } else if distance > 3_000.0 {
            2
        } else if distance > 1_000.0 {
            3
        } else {
            4
        };
        let radius_m = if distance > 2_000.0 {
            200
        } else if distance < 500.0 {
            50
        } else {
            (distance / 10.0) as u32
        };

        let (center, angle) = if self.origins_covered {
            (destination, reverse_degrees(angle))
        } else {
            (origin, angle)
        };
        let direction = match (self.template.direction, self.origins_covered) {
            (Direction::BothDirections, _) => Direction::BothDirections,
            (_, false) => Direction::Positive,
            (_, true) => Direction::Negative,
        };

        tracing::debug!(
            "[DATEX {}] {} traffic point {} radius {} m angle {} {}",
            self.id,
            if self.origins_covered { "destination" } else { "origin" },
            center,
            radius_m,
            angle,
            direction
        );
        self.send(ModuleRequest::TrafficPoint {
            center,
            radius_m,
            max_nbr: COVERED_IDS_MAX_NBR,
            angle,
            direction,
            max_road_class,
        });
        DatexState::CoveredIds
    }

    fn process_covered_ids_reply(&mut self, reply: ModuleReply) -> DatexState {
        let ids = match (reply.status, reply.body) {
            (ReplyStatus::Ok, ReplyBody::CoveredIds(ids)) => ids,
            (status, body) => {
                return self.fail(format!(
                    "covered ids answered {} with {}",
                    status,
                    body.kind()
                ))
            }
        };

        if !self.origins_covered {
            self.origin_ids.extend(ids);
            tracing::debug!("[DATEX {}] found {} origin ids", self.id, self.origin_ids.len());
            self.origins_covered = true;
            return self.create_covered_ids_request();
        }
        self.destination_ids.extend(ids);
        tracing::debug!(
            "[DATEX {}] found {} destination ids",
            self.id,
            self.destination_ids.len()
        );

        let origins: Vec<RouteEndpoint> = self.origin_ids.iter().map(|id| RouteEndpoint::Id(*id)).collect();
        let destinations: Vec<RouteEndpoint> = self
            .destination_ids
            .iter()
            .map(|id| RouteEndpoint::Id(*id))
            .collect();
        if self.template.direction == Direction::BothDirections {
            self.route_pending.push(ModuleRequest::Route {
                origins: origins.clone(),
                destinations: destinations.clone(),
            });
            self.route_pending.push(ModuleRequest::Route {
                origins: destinations,
                destinations: origins,
            });
        } else {
            self.route_pending.push(ModuleRequest::Route {
                origins,
                destinations,
            });
        }
        self.send_next_route()
    }

    fn create_route_request(&mut self) -> DatexState {
        let direction = self.template.direction;
        let mut origins = Vec::new();
        let mut destinations = Vec::new();

        for coord in &self.tmc_second {
            let mut angle = 0;
            if self.template.second_location.is_empty() && self.tmc_coords.len() > 1 {
                let previous = self.tmc_coords[self.tmc_coords.len() - 2];
                angle = angle_degrees(previous, *coord);
                tracing::debug!("[DATEX {}] origin angle {} at {}", self.id, angle, coord);
            }
            let endpoint = RouteEndpoint::Coord {
                coord: *coord,
                angle,
            };
            match direction {
                Direction::Positive | Direction::BothDirections => origins.push(endpoint),
                Direction::Negative => destinations.push(endpoint),
                Direction::NoDirection => {}
            }
        }

        for coord in &self.tmc_first {
            let mut angle = 0;
            if !self.template.first_location.is_empty() && self.tmc_coords.len() > 1 {
                angle = angle_degrees(*coord, self.tmc_coords[1]);
                tracing::debug!("[DATEX {}] destination angle {} at {}", self.id, angle, coord);
            }
            let endpoint = RouteEndpoint::Coord {
                coord: *coord,
                angle,
            };
            match direction {
                Direction::Positive | Direction::BothDirections => destinations.push(endpoint),
                Direction::Negative => origins.push(endpoint),
                Direction::NoDirection => {}
            }
        }

        self.route_pending.push(ModuleRequest::Route {
            origins,
            destinations,
        });
        if direction == Direction::BothDirections {
            let plain = |coords: &[Coord]| {
                coords
                    .iter()
                    .map(|coord| RouteEndpoint::Coord {
                        coord: *coord,
                        angle: 0,
                    })
                    .collect::<Vec<_>>()
            };
            self.route_pending.push(ModuleRequest::Route {
                origins: plain(&self.tmc_first),
                destinations: plain(&self.tmc_second),
            });
        }
        self.send_next_route()
    }

    /// 最後排入的路徑請求先送
    fn send_next_route(&mut self) -> DatexState {
        match self.route_pending.pop() {
            Some(request) => {
                self.send(request);
                DatexState::RouteRequest
            }
            None => self.create_top_region_request(),
        }
    }

    fn process_route_reply(&mut self, reply: ModuleReply) -> DatexState {
        let items = match (reply.status, reply.body) {
            (ReplyStatus::Ok, ReplyBody::Route(items)) => items,
            (status, body) => {
                return self.fail(format!("route answered {} with {}", status, body.kind()))
            }
        };

        for (i, item) in items.iter().enumerate() {
            let Some(first) = item.coords.first().copied() else {
                continue;
            };
            let next = item
                .coords
                .get(1)
                .or_else(|| items.get(i + 1).and_then(|n| n.coords.first()));
            let angle = next.map(|next| segment_angle(first, *next)).unwrap_or(0);
            self.nodes.push(NodeRecord {
                map_id: item.map_id,
                node_id: item.node_id,
                coord: first,
                angle,
            });
        }
        tracing::debug!(
            "[DATEX {}] route gave {} items, {} nodes in total",
            self.id,
            items.len(),
            self.nodes.len()
        );
        self.send_next_route()
    }

    fn create_top_region_request(&mut self) -> DatexState {
        self.send(ModuleRequest::TopRegion);
        DatexState::TopRegionRequest
    }

    fn process_top_region_reply(&mut self, reply: ModuleReply) -> DatexState {
        match (reply.status, reply.body) {
            (ReplyStatus::Ok, ReplyBody::TopRegion(tree)) => {
                self.map_tree = tree;
                self.create_id_translation_requests()
            }
            (status, body) => self.fail(format!("top region answered {} with {}", status, body.kind())),
        }
    }

    fn create_id_translation_requests(&mut self) -> DatexState {
        let map_ids: BTreeSet<u32> = self.nodes.iter().map(|n| n.map_id).collect();
        for map_id in map_ids {
            let Some(higher) = self.map_tree.higher_level_map(map_id) else {
                continue;
            };
            let nodes = self
                .nodes
                .iter()
                .filter(|n| n.map_id == map_id)
                .map(|n| IdPair::new(n.map_id, n.node_id))
                .collect();
            self.translation_pending.push_back(ModuleRequest::IdTranslation {
                to_map: higher,
                nodes,
            });
        }

        if self.translation_pending.is_empty() {
            return self.fail("no id translation requests");
        }
        self.send_next_translation()
    }

    fn send_next_translation(&mut self) -> DatexState {
        match self.translation_pending.pop_front() {
            Some(request) => {
                if let ModuleRequest::IdTranslation { to_map, nodes } = &request {
                    self.low_level_nodes = nodes.clone();
                    self.translation_to_map = *to_map;
                }
                self.send(request);
                DatexState::IdTranslationRequest
            }
            None => self.finish_situation(),
        }
    }

    fn process_id_translation_reply(&mut self, reply: ModuleReply) -> DatexState {
        let high = match (reply.status, reply.body) {
            (ReplyStatus::Ok, ReplyBody::IdTranslation(high)) => high,
            (status, body) => {
                return self.fail(format!(
                    "id translation answered {} with {}",
                    status,
                    body.kind()
                ))
            }
        };
        if high.len() != self.low_level_nodes.len() {
            return self.fail(format!(
                "id translation returned {} nodes for {} requested",
                high.len(),
                self.low_level_nodes.len()
            ));
        }

        let to_map = self.translation_to_map;
        if let Some(wrong) = high.iter().find(|pair| pair.is_valid() && pair.map_id != to_map) {
            return self.fail(format!(
                "id translation to 0x{:09x} answered a node on map 0x{:09x}",
                to_map, wrong.map_id
            ));
        }

        let low_level_nodes = std::mem::take(&mut self.low_level_nodes);
        let mut translated = Vec::with_capacity(high.len());
        for (low, high) in low_level_nodes.into_iter().zip(high) {
            if high.is_valid() {
                self.low_to_high.insert(low, high);
                translated.push(high);
            }
        }

        let even_higher = self.map_tree.higher_level_map(to_map);
        if let Some(even_higher) = even_higher.filter(|_| !translated.is_empty()) {
            tracing::debug!(
                "[DATEX {}] translating {} nodes further up to 0x{:09x}",
                self.id,
                translated.len(),
                even_higher
            );
            self.translation_pending.push_back(ModuleRequest::IdTranslation {
                to_map: even_higher,
                nodes: translated,
            });
        }
        self.send_next_translation()
    }

    /// 每張底層地圖及其上層地圖各一筆紀錄
    fn build_records(&mut self) -> BTreeMap<u32, DisturbanceElement> {
        if self.tmc_failed {
            tracing::info!(
                "[DATEX {}] TMC location failed for {}, using no severity",
                self.id,
                self.template.situation_reference
            );
            self.template.severity = Severity::NotProvided;
            self.template.cost_factor = TMC_FAILED_COST_FACTOR;
        }

        let mut records = BTreeMap::new();
        let low_level_maps: BTreeSet<u32> = self.nodes.iter().map(|n| n.map_id).collect();
        for low in low_level_maps {
            for map_id in self.map_tree.maps_upwards(low) {
                records.entry(map_id).or_insert_with(|| {
                    let mut record = self.template.clone();
                    record.map_id = map_id;
                    record
                });
            }
        }

        // 每層地圖最多走一步
        let max_hops = self.map_tree.len() + 1;
        for (route_index, node) in self.nodes.iter().enumerate() {
            let mut pair = IdPair::new(node.map_id, node.node_id);
            let mut hops = 0;
            while pair.is_valid() {
                hops += 1;
                if hops > max_hops {
                    tracing::warn!(
                        "[DATEX {}] translation chain of node {} exceeds {} maps",
                        self.id,
                        node.node_id,
                        max_hops
                    );
                    break;
                }
                match records.get_mut(&pair.map_id) {
                    Some(record) => record.add_coordinate(
                        pair.item_id,
                        node.coord.lat,
                        node.coord.lon,
                        node.angle,
                        route_index as u32,
                    ),
                    None => tracing::debug!("[DATEX {}] no record for map 0x{:x}", self.id, pair.map_id),
                }
                pair = self.low_to_high.get(&pair).copied().unwrap_or(IdPair::INVALID);
            }
        }
        records
    }

    fn finish_situation(&mut self) -> DatexState {
        let records = self.build_records();
        if records.is_empty() {
            return self.fail("situation resolved to no maps");
        }
        let situation_reference = self.template.situation_reference.clone();

        match self.mode {
            DatexMode::Collect => {
                tracing::debug!(
                    "[DATEX {}] resolved {} on {} maps",
                    self.id,
                    situation_reference,
                    records.len()
                );
                self.resolved.push(ResolvedSituation {
                    situation_reference,
                    elements: records.into_values().collect(),
                });
                self.process_situation()
            }
            DatexMode::Publish => {
                tracing::info!(
                    "[DATEX {}] adding disturbance {} on {} maps",
                    self.id,
                    situation_reference,
                    records.len()
                );
                self.add_pending = records.into_values().collect();
                self.send_next_add(INVALID_DISTURBANCE_ID)
            }
        }
    }

    fn send_next_add(&mut self, disturbance_id: u32) -> DatexState {
        match self.add_pending.pop_front() {
            Some(mut element) => {
                if disturbance_id != INVALID_DISTURBANCE_ID {
                    element.disturbance_id = disturbance_id;
                }
                self.add_in_flight = element.map_id;
                self.send(ModuleRequest::AddDisturbance { element });
                DatexState::AddDisturbance
            }
            None => self.process_situation(),
        }
    }

    fn process_add_disturbance_reply(&mut self, reply: ModuleReply) -> DatexState {
        match (reply.status, reply.body) {
            (ReplyStatus::Ok, ReplyBody::AddDisturbance { disturbance_id }) => {
                tracing::debug!(
                    "[DATEX {}] disturbance {} added on map 0x{:09x}",
                    self.id,
                    disturbance_id,
                    self.add_in_flight
                );
                self.published.push(PublishedDisturbance {
                    situation_reference: self.template.situation_reference.clone(),
                    map_id: self.add_in_flight,
                    disturbance_id,
                });
                self.send_next_add(disturbance_id)
            }
            (status, body) => self.fail(format!(
                "add disturbance answered {} with {}",
                status,
                body.kind()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packets::RouteItem;
    use crate::domain::model::fixtures;

    fn one_request(outgoing: Vec<Outgoing>) -> ModuleRequest {
        assert_eq!(outgoing.len(), 1, "expected exactly one request: {:?}", outgoing);
        outgoing.into_iter().next().map(|o| o.request).unwrap()
    }

    fn street_match(index: u32, map_id: u32, distance: u32) -> ModuleReply {
        ModuleReply::ok(ReplyBody::StreetSegmentItem(StreetSegmentMatch {
            index,
            map_id,
            coord: Coord::new(500, 600),
            distance,
            first_angle: 90,
            second_angle: 270,
            first_node: 10,
            second_node: 11,
        }))
    }

    fn tree(pairs: &[(u32, u32)]) -> ModuleReply {
        let mut tree = ItemIdTree::new();
        for (lower, higher) in pairs {
            tree.add_map(*lower, *higher).unwrap();
        }
        ModuleReply::ok(ReplyBody::TopRegion(tree))
    }

    fn point_situation(reference: &str) -> TrafficSituation {
        fixtures::situation(
            reference,
            fixtures::element(Direction::Positive, vec![Coord::new(500, 600)]),
        )
    }

    #[test]
    fn test_no_situations_is_done_immediately() {
        let mut request = DatexRequest::new(1, vec![], DatexMode::Publish);
        assert_eq!(request.state(), DatexState::Done);
        assert!(request.take_outgoing().is_empty());
    }

    #[test]
    fn test_single_point_is_published_on_every_map_level() {
        let mut request = DatexRequest::new(1, vec![point_situation("TMC:1")], DatexMode::Publish);
        assert_eq!(request.state(), DatexState::StreetSegmentItem);
        assert_eq!(
            one_request(request.take_outgoing()),
            ModuleRequest::StreetSegmentItem {
                index: 0,
                coord: Coord::new(500, 600),
                map_id: None
            }
        );

        let next = request.process_reply(street_match(0, 1, 5));
        assert_eq!(one_request(next), ModuleRequest::TopRegion);

        let next = request.process_reply(tree(&[(1, 0x8000_0000)]));
        assert_eq!(
            one_request(next),
            ModuleRequest::IdTranslation {
                to_map: 0x8000_0000,
                nodes: vec![IdPair::new(1, 10), IdPair::new(1, 11)],
            }
        );

        let next = request.process_reply(ModuleReply::ok(ReplyBody::IdTranslation(vec![
            IdPair::new(0x8000_0000, 100),
            IdPair::INVALID,
        ])));
        let ModuleRequest::AddDisturbance { element: low } = one_request(next) else {
            panic!("expected add disturbance");
        };
        assert_eq!(low.map_id, 1);
        assert_eq!(low.disturbance_id, INVALID_DISTURBANCE_ID);
        assert_eq!(low.cost_factor, 6000);
        let nodes: Vec<(u32, u32)> = low.coordinates().map(|p| (p.route_index, p.node_id)).collect();
        assert_eq!(nodes, vec![(0, 10), (1, 11)]);

        let next = request.process_reply(ModuleReply::ok(ReplyBody::AddDisturbance { disturbance_id: 5 }));
        let ModuleRequest::AddDisturbance { element: high } = one_request(next) else {
            panic!("expected add disturbance");
        };
        assert_eq!(high.map_id, 0x8000_0000);
        assert_eq!(high.disturbance_id, 5);
        assert_eq!(high.nbr_coordinates(), 1);

        let next = request.process_reply(ModuleReply::ok(ReplyBody::AddDisturbance { disturbance_id: 5 }));
        assert!(next.is_empty());
        assert_eq!(request.state(), DatexState::Done);
        let published = request.take_published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].map_id, 0x8000_0000);
    }

    #[test]
    fn test_not_unique_street_segment_picks_nearest_map() {
        let mut request = DatexRequest::new(1, vec![point_situation("TMC:1")], DatexMode::Collect);
        request.take_outgoing();

        let next = request.process_reply(ModuleReply {
            status: ReplyStatus::NotUnique,
            body: ReplyBody::NotUnique {
                index: 0,
                map_ids: vec![1, 2],
            },
        });
        assert!(matches!(
            one_request(next),
            ModuleRequest::StreetSegmentItem { map_id: Some(1), .. }
        ));
        let next = request.process_reply(street_match(0, 1, 50));
        assert!(matches!(
            one_request(next),
            ModuleRequest::StreetSegmentItem { map_id: Some(2), .. }
        ));
        request.process_reply(street_match(0, 2, 10));
        assert_eq!(request.state(), DatexState::TopRegionRequest);

        let next = request.process_reply(tree(&[(2, 0x8000_0000)]));
        let ModuleRequest::IdTranslation { nodes, .. } = one_request(next) else {
            panic!("expected id translation");
        };
        assert!(nodes.iter().all(|n| n.map_id == 2));
    }

    #[test]
    fn test_failed_tmc_lookup_routes_between_coordinates() {
        let mut element = fixtures::element(
            Direction::Positive,
            vec![Coord::new(0, 0), Coord::new(50, 50), Coord::new(100, 100)],
        );
        element.first_location = "12345".to_string();
        let situation = fixtures::situation("TMC:9", element);

        let mut request = DatexRequest::new(3, vec![situation], DatexMode::Collect);
        assert!(matches!(
            one_request(request.take_outgoing()),
            ModuleRequest::GetTmcCoordinates { .. }
        ));

        let next = request.process_reply(ModuleReply::status(ReplyStatus::NotFound));
        let ModuleRequest::Route {
            origins,
            destinations,
        } = one_request(next)
        else {
            panic!("expected route");
        };
        assert!(matches!(
            origins[..],
            [RouteEndpoint::Coord {
                coord: Coord { lat: 100, lon: 100 },
                ..
            }]
        ));
        assert!(matches!(
            destinations[..],
            [RouteEndpoint::Coord {
                coord: Coord { lat: 0, lon: 0 },
                ..
            }]
        ));

        request.process_reply(ModuleReply::ok(ReplyBody::Route(vec![RouteItem {
            map_id: 4,
            node_id: 40,
            coords: vec![Coord::new(100, 100), Coord::new(0, 0)],
        }])));
        request.process_reply(tree(&[(4, 0x9000_0000)]));
        request.process_reply(ModuleReply::ok(ReplyBody::IdTranslation(vec![IdPair::new(
            0x9000_0000,
            400,
        )])));

        assert_eq!(request.state(), DatexState::Done);
        let resolved = request.take_resolved();
        assert_eq!(resolved.len(), 1);
        let elements = &resolved[0].elements;
        assert_eq!(elements.len(), 2);
        assert!(elements
            .iter()
            .all(|e| e.severity == Severity::NotProvided && e.cost_factor == TMC_FAILED_COST_FACTOR));
        assert_eq!(elements[0].coordinates().next().map(|p| p.angle), Some(225));
    }

    #[test]
    fn test_missing_tmc_reply_uses_covered_ids() {
        let mut element = fixtures::element(
            Direction::BothDirections,
            vec![Coord::new(0, 0), Coord::new(1000, 0)],
        );
        element.first_location = "777".to_string();
        let mut request = DatexRequest::new(
            4,
            vec![fixtures::situation("TMC:7", element)],
            DatexMode::Collect,
        );
        request.take_outgoing();

        let next = request.process_missing_reply();
        let ModuleRequest::TrafficPoint {
            center,
            radius_m,
            direction,
            max_road_class,
            angle,
            ..
        } = one_request(next)
        else {
            panic!("expected traffic point");
        };
        assert_eq!(center, Coord::new(1000, 0));
        assert_eq!(radius_m, 50);
        assert_eq!(max_road_class, 4);
        assert_eq!(direction, Direction::BothDirections);
        assert_eq!(angle, 180);

        let next = request.process_reply(ModuleReply::ok(ReplyBody::CoveredIds(vec![IdPair::new(1, 1)])));
        let ModuleRequest::TrafficPoint { center, angle, .. } = one_request(next) else {
            panic!("expected destination traffic point");
        };
        assert_eq!(center, Coord::new(0, 0));
        assert_eq!(angle, 0);

        let next = request.process_reply(ModuleReply::ok(ReplyBody::CoveredIds(vec![IdPair::new(1, 2)])));
        // 兩個方向時反向路徑先送
        assert_eq!(
            one_request(next),
            ModuleRequest::Route {
                origins: vec![RouteEndpoint::Id(IdPair::new(1, 2))],
                destinations: vec![RouteEndpoint::Id(IdPair::new(1, 1))],
            }
        );
        let next = request.process_reply(ModuleReply::ok(ReplyBody::Route(vec![])));
        assert_eq!(
            one_request(next),
            ModuleRequest::Route {
                origins: vec![RouteEndpoint::Id(IdPair::new(1, 1))],
                destinations: vec![RouteEndpoint::Id(IdPair::new(1, 2))],
            }
        );
    }

    #[test]
    fn test_missing_reply_outside_tmc_is_an_error() {
        let mut request = DatexRequest::new(1, vec![point_situation("TMC:1")], DatexMode::Publish);
        request.take_outgoing();
        assert!(request.process_missing_reply().is_empty());
        assert_eq!(request.state(), DatexState::Error);
        assert!(request.last_error().is_some());
    }

    #[test]
    fn test_unexpected_reply_kind_is_an_error() {
        let mut request = DatexRequest::new(1, vec![point_situation("TMC:1")], DatexMode::Publish);
        request.take_outgoing();
        request.process_reply(tree(&[]));
        assert_eq!(request.state(), DatexState::Error);

        // 結束後的回覆不改變狀態
        request.process_reply(street_match(0, 1, 1));
        assert_eq!(request.state(), DatexState::Error);
    }

    #[test]
    fn test_translation_length_mismatch_is_an_error() {
        let mut request = DatexRequest::new(1, vec![point_situation("TMC:1")], DatexMode::Publish);
        request.take_outgoing();
        request.process_reply(street_match(0, 1, 5));
        request.process_reply(tree(&[(1, 0x8000_0000)]));
        request.process_reply(ModuleReply::ok(ReplyBody::IdTranslation(vec![IdPair::new(
            0x8000_0000,
            1,
        )])));
        assert_eq!(request.state(), DatexState::Error);
    }

    #[test]
    fn test_translation_on_wrong_map_is_an_error() {
        let mut request = DatexRequest::new(1, vec![point_situation("TMC:1")], DatexMode::Publish);
        request.take_outgoing();
        request.process_reply(street_match(0, 1, 5));
        let next = request.process_reply(tree(&[(1, 0x8000_0000)]));
        let ModuleRequest::IdTranslation { nodes, .. } = one_request(next) else {
            panic!("expected id translation");
        };

        // 回覆原本的底層節點會形成循環
        let next = request.process_reply(ModuleReply::ok(ReplyBody::IdTranslation(nodes)));
        assert!(next.is_empty());
        assert_eq!(request.state(), DatexState::Error);
        assert!(request.last_error().unwrap().contains("0x080000000"));
    }

    #[test]
    fn test_translation_to_unrelated_map_is_an_error() {
        let mut request = DatexRequest::new(1, vec![point_situation("TMC:1")], DatexMode::Collect);
        request.take_outgoing();
        request.process_reply(street_match(0, 1, 5));
        let next = request.process_reply(tree(&[(1, 0x8000_0000), (0x8000_0000, 0x9000_0000)]));
        let ModuleRequest::IdTranslation { nodes, .. } = one_request(next) else {
            panic!("expected id translation");
        };

        let skipped: Vec<IdPair> = nodes.iter().map(|n| IdPair::new(0x9000_0000, n.item_id)).collect();
        request.process_reply(ModuleReply::ok(ReplyBody::IdTranslation(skipped)));
        assert_eq!(request.state(), DatexState::Error);
        assert!(request.take_resolved().is_empty());
    }

    #[test]
    fn test_not_unique_without_maps_is_an_error() {
        let mut request = DatexRequest::new(1, vec![point_situation("TMC:1")], DatexMode::Collect);
        request.take_outgoing();

        let next = request.process_reply(ModuleReply {
            status: ReplyStatus::NotUnique,
            body: ReplyBody::NotUnique {
                index: 0,
                map_ids: vec![],
            },
        });
        assert!(next.is_empty());
        assert_eq!(request.state(), DatexState::Error);
    }

    #[test]
    fn test_situations_are_processed_from_the_back() {
        let mut request = DatexRequest::new(
            1,
            vec![point_situation("TMC:first"), point_situation("TMC:last")],
            DatexMode::Collect,
        );
        request.take_outgoing();
        request.process_reply(street_match(0, 1, 5));
        request.process_reply(tree(&[(1, 0x8000_0000)]));
        let next = request.process_reply(ModuleReply::ok(ReplyBody::IdTranslation(vec![
            IdPair::new(0x8000_0000, 100),
            IdPair::new(0x8000_0000, 101),
        ])));

        // 第二個情境重新開始
        assert!(matches!(
            one_request(next),
            ModuleRequest::StreetSegmentItem { index: 0, .. }
        ));
        let resolved = request.take_resolved();
        assert_eq!(resolved[0].situation_reference, "TMC:last");
    }
}
