//! Module request and reply packets.

use crate::core::codec::{
    frame, unframe, CodecError, CodecResult, PacketHeader, PacketReader, PacketWriter, ReplyStatus,
};
use crate::domain::disturbance::DisturbanceElement;
use crate::domain::map_id::ItemIdTree;
use crate::domain::model::{Coord, Direction, IdPair, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 封包類型代碼；回覆為請求代碼加上 0x80
pub mod packet_type {
    pub const GET_TMC_COORDINATES: u16 = 0x01;
    pub const STREET_SEGMENT_ITEM: u16 = 0x02;
    pub const TRAFFIC_POINT: u16 = 0x03;
    pub const ROUTE: u16 = 0x04;
    pub const TOP_REGION: u16 = 0x05;
    pub const ID_TRANSLATION: u16 = 0x06;
    pub const ADD_DISTURBANCE: u16 = 0x07;
    pub const FETCH_ALL_DISTURBANCES: u16 = 0x08;
    pub const DISTURBANCE_CHANGESET: u16 = 0x09;

    pub const REPLY: u16 = 0x80;
    pub const EMPTY_REPLY: u16 = REPLY;
    pub const NOT_UNIQUE_REPLY: u16 = REPLY | 0x10 | STREET_SEGMENT_ITEM;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Map,
    Traffic,
    Route,
    Info,
}

impl ModuleType {
    pub const ALL: [ModuleType; 4] = [
        ModuleType::Map,
        ModuleType::Traffic,
        ModuleType::Route,
        ModuleType::Info,
    ];
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ModuleType::Map => "map",
            ModuleType::Traffic => "traffic",
            ModuleType::Route => "route",
            ModuleType::Info => "info",
        };
        f.write_str(text)
    }
}

/// 路徑請求的起點或終點
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEndpoint {
    Coord { coord: Coord, angle: u16 },
    Id(IdPair),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleRequest {
    GetTmcCoordinates {
        first: String,
        second: String,
        extent: u32,
        direction: Direction,
    },
    StreetSegmentItem {
        index: u32,
        coord: Coord,
        map_id: Option<u32>,
    },
    TrafficPoint {
        center: Coord,
        radius_m: u32,
        max_nbr: u32,
        angle: u16,
        direction: Direction,
        max_road_class: u8,
    },
    Route {
        origins: Vec<RouteEndpoint>,
        destinations: Vec<RouteEndpoint>,
    },
    TopRegion,
    IdTranslation {
        to_map: u32,
        nodes: Vec<IdPair>,
    },
    /// 地圖 id 與事件 id 取自 element
    AddDisturbance {
        element: DisturbanceElement,
    },
    FetchAllDisturbances {
        provider: String,
    },
    DisturbanceChangeset {
        update: Vec<DisturbanceElement>,
        remove: Vec<DisturbanceElement>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreetSegmentMatch {
    pub index: u32,
    pub map_id: u32,
    pub coord: Coord,
    pub distance: u32,
    pub first_angle: u16,
    pub second_angle: u16,
    pub first_node: u32,
    pub second_node: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteItem {
    pub map_id: u32,
    pub node_id: u32,
    pub coords: Vec<Coord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Empty,
    TmcCoordinates { first: Vec<Coord>, second: Vec<Coord> },
    StreetSegmentItem(StreetSegmentMatch),
    NotUnique { index: u32, map_ids: Vec<u32> },
    CoveredIds(Vec<IdPair>),
    Route(Vec<RouteItem>),
    TopRegion(ItemIdTree),
    IdTranslation(Vec<IdPair>),
    AddDisturbance { disturbance_id: u32 },
    Disturbances(Vec<DisturbanceElement>),
    ChangesetStatus(u32),
}

impl ReplyBody {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyBody::Empty => "empty",
            ReplyBody::TmcCoordinates { .. } => "tmc coordinates",
            ReplyBody::StreetSegmentItem(_) => "street segment item",
            ReplyBody::NotUnique { .. } => "not unique",
            ReplyBody::CoveredIds(_) => "covered ids",
            ReplyBody::Route(_) => "route",
            ReplyBody::TopRegion(_) => "top region",
            ReplyBody::IdTranslation(_) => "id translation",
            ReplyBody::AddDisturbance { .. } => "add disturbance",
            ReplyBody::Disturbances(_) => "disturbances",
            ReplyBody::ChangesetStatus(_) => "changeset status",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleReply {
    pub status: ReplyStatus,
    pub body: ReplyBody,
}

impl ModuleReply {
    pub fn ok(body: ReplyBody) -> Self {
        Self {
            status: ReplyStatus::Ok,
            body,
        }
    }

    /// 沒有內容的失敗回覆
    pub fn status(status: ReplyStatus) -> Self {
        Self {
            status,
            body: ReplyBody::Empty,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

fn write_coord(w: &mut PacketWriter, coord: Coord) {
    w.write_i32(coord.lat);
    w.write_i32(coord.lon);
}

fn read_coord(r: &mut PacketReader<'_>) -> CodecResult<Coord> {
    Ok(Coord::new(r.read_i32()?, r.read_i32()?))
}

fn write_coords(w: &mut PacketWriter, coords: &[Coord]) {
    w.write_u32(coords.len() as u32);
    coords.iter().for_each(|c| write_coord(w, *c));
}

fn read_coords(r: &mut PacketReader<'_>) -> CodecResult<Vec<Coord>> {
    let count = r.read_count(8)?;
    (0..count).map(|_| read_coord(r)).collect()
}

fn write_id_pairs(w: &mut PacketWriter, pairs: &[IdPair]) {
    w.write_u32(pairs.len() as u32);
    for pair in pairs {
        w.write_u32(pair.map_id);
        w.write_u32(pair.item_id);
    }
}

fn read_id_pairs(r: &mut PacketReader<'_>) -> CodecResult<Vec<IdPair>> {
    let count = r.read_count(8)?;
    (0..count)
        .map(|_| Ok(IdPair::new(r.read_u32()?, r.read_u32()?)))
        .collect()
}

fn read_direction(r: &mut PacketReader<'_>) -> CodecResult<Direction> {
    let code = r.read_u8()?;
    Direction::from_code(code).ok_or(CodecError::InvalidValue {
        field: "direction",
        value: u32::from(code),
    })
}

fn write_endpoints(w: &mut PacketWriter, endpoints: &[RouteEndpoint]) {
    w.write_u32(endpoints.len() as u32);
    for endpoint in endpoints {
        match endpoint {
            RouteEndpoint::Coord { coord, angle } => {
                w.write_u8(0);
                w.write_u16(*angle);
                write_coord(w, *coord);
            }
            RouteEndpoint::Id(pair) => {
                w.write_u8(1);
                w.write_u32(pair.map_id);
                w.write_u32(pair.item_id);
            }
        }
    }
}

fn read_endpoints(r: &mut PacketReader<'_>) -> CodecResult<Vec<RouteEndpoint>> {
    let count = r.read_count(9)?;
    (0..count)
        .map(|_| match r.read_u8()? {
            0 => {
                let angle = r.read_u16()?;
                Ok(RouteEndpoint::Coord {
                    coord: read_coord(r)?,
                    angle,
                })
            }
            1 => Ok(RouteEndpoint::Id(IdPair::new(r.read_u32()?, r.read_u32()?))),
            tag => Err(CodecError::InvalidValue {
                field: "route endpoint",
                value: u32::from(tag),
            }),
        })
        .collect()
}

/// 事件紀錄的二進位格式
pub fn encode_disturbance(w: &mut PacketWriter, element: &DisturbanceElement) {
    w.write_u32(element.disturbance_id);
    w.write_u32(element.map_id);
    w.write_u32(element.disturbance_type);
    w.write_u32(element.phrase);
    w.write_u32(element.event_code);
    w.write_u32(element.start_time);
    w.write_u32(element.end_time);
    w.write_u32(element.creation_time);
    w.write_u32(element.cost_factor);
    w.write_u32(element.extent);
    w.write_u32(element.queue_length);
    w.write_u8(element.severity.code());
    w.write_u8(element.direction.code());
    w.write_bool(element.deleted);
    w.write_string(&element.situation_reference);
    w.write_string(&element.first_location);
    w.write_string(&element.second_location);
    w.write_string(&element.text);

    w.write_u32(element.nbr_coordinates() as u32);
    for point in element.coordinates() {
        w.write_u32(point.route_index);
        w.write_u32(point.node_id);
        write_coord(w, point.coord);
        w.write_u32(point.angle);
    }
}

pub fn decode_disturbance(r: &mut PacketReader<'_>) -> CodecResult<DisturbanceElement> {
    let disturbance_id = r.read_u32()?;
    let map_id = r.read_u32()?;
    let disturbance_type = r.read_u32()?;
    let phrase = r.read_u32()?;
    let event_code = r.read_u32()?;
    let start_time = r.read_u32()?;
    let end_time = r.read_u32()?;
    let creation_time = r.read_u32()?;
    let cost_factor = r.read_u32()?;
    let extent = r.read_u32()?;
    let queue_length = r.read_u32()?;
    let severity_code = r.read_u8()?;
    let severity = Severity::from_code(severity_code).ok_or(CodecError::InvalidValue {
        field: "severity",
        value: u32::from(severity_code),
    })?;
    let direction = read_direction(r)?;
    let deleted = r.read_bool()?;
    let situation_reference = r.read_string()?;
    let first_location = r.read_string()?;
    let second_location = r.read_string()?;
    let text = r.read_string()?;

    let mut element = DisturbanceElement::new(
        disturbance_id,
        situation_reference,
        disturbance_type,
        phrase,
        event_code,
        start_time,
        end_time,
        creation_time,
        severity,
        direction,
        first_location,
        second_location,
        extent,
        cost_factor,
        text,
        queue_length,
    );
    element.map_id = map_id;
    element.deleted = deleted;

    let points = r.read_count(20)?;
    for _ in 0..points {
        let route_index = r.read_u32()?;
        let node_id = r.read_u32()?;
        let coord = read_coord(r)?;
        let angle = r.read_u32()?;
        element.add_coordinate(node_id, coord.lat, coord.lon, angle, route_index);
    }
    Ok(element)
}

fn write_disturbances(w: &mut PacketWriter, elements: &[DisturbanceElement]) {
    w.write_u32(elements.len() as u32);
    elements.iter().for_each(|e| encode_disturbance(w, e));
}

fn read_disturbances(r: &mut PacketReader<'_>) -> CodecResult<Vec<DisturbanceElement>> {
    let count = r.read_count(48)?;
    (0..count).map(|_| decode_disturbance(r)).collect()
}

impl ModuleRequest {
    pub fn module(&self) -> ModuleType {
        match self {
            ModuleRequest::GetTmcCoordinates { .. } | ModuleRequest::AddDisturbance { .. } => {
                ModuleType::Traffic
            }
            ModuleRequest::StreetSegmentItem { .. }
            | ModuleRequest::TopRegion
            | ModuleRequest::IdTranslation { .. } => ModuleType::Map,
            ModuleRequest::TrafficPoint { .. } | ModuleRequest::Route { .. } => ModuleType::Route,
            ModuleRequest::FetchAllDisturbances { .. }
            | ModuleRequest::DisturbanceChangeset { .. } => ModuleType::Info,
        }
    }

    pub fn packet_type(&self) -> u16 {
        use packet_type::*;
        match self {
            ModuleRequest::GetTmcCoordinates { .. } => GET_TMC_COORDINATES,
            ModuleRequest::StreetSegmentItem { .. } => STREET_SEGMENT_ITEM,
            ModuleRequest::TrafficPoint { .. } => TRAFFIC_POINT,
            ModuleRequest::Route { .. } => ROUTE,
            ModuleRequest::TopRegion => TOP_REGION,
            ModuleRequest::IdTranslation { .. } => ID_TRANSLATION,
            ModuleRequest::AddDisturbance { .. } => ADD_DISTURBANCE,
            ModuleRequest::FetchAllDisturbances { .. } => FETCH_ALL_DISTURBANCES,
            ModuleRequest::DisturbanceChangeset { .. } => DISTURBANCE_CHANGESET,
        }
    }

    /// 標頭中的地圖 id；不指定地圖時為 `u32::MAX`
    pub fn map_id(&self) -> u32 {
        match self {
            ModuleRequest::StreetSegmentItem { map_id, .. } => map_id.unwrap_or(u32::MAX),
            ModuleRequest::IdTranslation { to_map, .. } => *to_map,
            ModuleRequest::AddDisturbance { element } => element.map_id,
            _ => u32::MAX,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModuleRequest::GetTmcCoordinates { .. } => "GetTMCCoordinate",
            ModuleRequest::StreetSegmentItem { .. } => "StreetSegmentItem",
            ModuleRequest::TrafficPoint { .. } => "TrafficPoint",
            ModuleRequest::Route { .. } => "Route",
            ModuleRequest::TopRegion => "TopRegion",
            ModuleRequest::IdTranslation { .. } => "IDTranslation",
            ModuleRequest::AddDisturbance { .. } => "AddDisturbance",
            ModuleRequest::FetchAllDisturbances { .. } => "FetchAllDisturbances",
            ModuleRequest::DisturbanceChangeset { .. } => "DisturbanceChangeset",
        }
    }

    fn write_payload(&self, w: &mut PacketWriter) {
        match self {
            ModuleRequest::GetTmcCoordinates {
                first,
                second,
                extent,
                direction,
            } => {
                w.write_u32(*extent);
                w.write_u8(direction.code());
                w.write_string(first);
                w.write_string(second);
            }
            ModuleRequest::StreetSegmentItem { index, coord, .. } => {
                w.write_u32(*index);
                write_coord(w, *coord);
            }
            ModuleRequest::TrafficPoint {
                center,
                radius_m,
                max_nbr,
                angle,
                direction,
                max_road_class,
            } => {
                write_coord(w, *center);
                w.write_u32(*radius_m);
                w.write_u32(*max_nbr);
                w.write_u16(*angle);
                w.write_u8(direction.code());
                w.write_u8(*max_road_class);
            }
            ModuleRequest::Route {
                origins,
                destinations,
            } => {
                write_endpoints(w, origins);
                write_endpoints(w, destinations);
            }
            ModuleRequest::TopRegion => {}
            ModuleRequest::IdTranslation { nodes, .. } => write_id_pairs(w, nodes),
            ModuleRequest::AddDisturbance { element } => encode_disturbance(w, element),
            ModuleRequest::FetchAllDisturbances { provider } => w.write_string(provider),
            ModuleRequest::DisturbanceChangeset { update, remove } => {
                write_disturbances(w, update);
                write_disturbances(w, remove);
            }
        }
    }

    fn read_payload(kind: u16, map_id: u32, r: &mut PacketReader<'_>) -> CodecResult<Self> {
        use packet_type::*;
        let request = match kind {
            GET_TMC_COORDINATES => {
                let extent = r.read_u32()?;
                let direction = read_direction(r)?;
                ModuleRequest::GetTmcCoordinates {
                    first: r.read_string()?,
                    second: r.read_string()?,
                    extent,
                    direction,
                }
            }
            STREET_SEGMENT_ITEM => ModuleRequest::StreetSegmentItem {
                index: r.read_u32()?,
                coord: read_coord(r)?,
                map_id: (map_id != u32::MAX).then_some(map_id),
            },
            TRAFFIC_POINT => ModuleRequest::TrafficPoint {
                center: read_coord(r)?,
                radius_m: r.read_u32()?,
                max_nbr: r.read_u32()?,
                angle: r.read_u16()?,
                direction: read_direction(r)?,
                max_road_class: r.read_u8()?,
            },
            ROUTE => ModuleRequest::Route {
                origins: read_endpoints(r)?,
                destinations: read_endpoints(r)?,
            },
            TOP_REGION => ModuleRequest::TopRegion,
            ID_TRANSLATION => ModuleRequest::IdTranslation {
                to_map: map_id,
                nodes: read_id_pairs(r)?,
            },
            ADD_DISTURBANCE => ModuleRequest::AddDisturbance {
                element: decode_disturbance(r)?,
            },
            FETCH_ALL_DISTURBANCES => ModuleRequest::FetchAllDisturbances {
                provider: r.read_string()?,
            },
            DISTURBANCE_CHANGESET => ModuleRequest::DisturbanceChangeset {
                update: read_disturbances(r)?,
                remove: read_disturbances(r)?,
            },
            other => return Err(CodecError::UnknownPacketType(other)),
        };
        Ok(request)
    }
}

impl ReplyBody {
    fn packet_type(&self) -> u16 {
        use packet_type::*;
        match self {
            ReplyBody::Empty => EMPTY_REPLY,
            ReplyBody::TmcCoordinates { .. } => REPLY | GET_TMC_COORDINATES,
            ReplyBody::StreetSegmentItem(_) => REPLY | STREET_SEGMENT_ITEM,
            ReplyBody::NotUnique { .. } => NOT_UNIQUE_REPLY,
            ReplyBody::CoveredIds(_) => REPLY | TRAFFIC_POINT,
            ReplyBody::Route(_) => REPLY | ROUTE,
            ReplyBody::TopRegion(_) => REPLY | TOP_REGION,
            ReplyBody::IdTranslation(_) => REPLY | ID_TRANSLATION,
            ReplyBody::AddDisturbance { .. } => REPLY | ADD_DISTURBANCE,
            ReplyBody::Disturbances(_) => REPLY | FETCH_ALL_DISTURBANCES,
            ReplyBody::ChangesetStatus(_) => REPLY | DISTURBANCE_CHANGESET,
        }
    }

    fn write_payload(&self, w: &mut PacketWriter) {
        match self {
            ReplyBody::Empty => {}
            ReplyBody::TmcCoordinates { first, second } => {
                write_coords(w, first);
                write_coords(w, second);
            }
            ReplyBody::StreetSegmentItem(item) => {
                w.write_u32(item.index);
                w.write_u32(item.map_id);
                write_coord(w, item.coord);
                w.write_u32(item.distance);
                w.write_u16(item.first_angle);
                w.write_u16(item.second_angle);
                w.write_u32(item.first_node);
                w.write_u32(item.second_node);
            }
            ReplyBody::NotUnique { index, map_ids } => {
                w.write_u32(*index);
                w.write_u32(map_ids.len() as u32);
                map_ids.iter().for_each(|id| w.write_u32(*id));
            }
            ReplyBody::CoveredIds(pairs) | ReplyBody::IdTranslation(pairs) => {
                write_id_pairs(w, pairs)
            }
            ReplyBody::Route(items) => {
                w.write_u32(items.len() as u32);
                for item in items {
                    w.write_u32(item.map_id);
                    w.write_u32(item.node_id);
                    write_coords(w, &item.coords);
                }
            }
            ReplyBody::TopRegion(tree) => {
                w.write_u32(tree.len() as u32);
                for (lower, higher) in tree.relations() {
                    w.write_u32(lower);
                    w.write_u32(higher);
                }
            }
            ReplyBody::AddDisturbance { disturbance_id } => w.write_u32(*disturbance_id),
            ReplyBody::Disturbances(elements) => write_disturbances(w, elements),
            ReplyBody::ChangesetStatus(status) => w.write_u32(*status),
        }
    }

    fn read_payload(kind: u16, r: &mut PacketReader<'_>) -> CodecResult<Self> {
        use packet_type::*;
        let body = match kind {
            EMPTY_REPLY => ReplyBody::Empty,
            NOT_UNIQUE_REPLY => {
                let index = r.read_u32()?;
                let count = r.read_count(4)?;
                let map_ids = (0..count).map(|_| r.read_u32()).collect::<CodecResult<_>>()?;
                ReplyBody::NotUnique { index, map_ids }
            }
            t if t == REPLY | GET_TMC_COORDINATES => ReplyBody::TmcCoordinates {
                first: read_coords(r)?,
                second: read_coords(r)?,
            },
            t if t == REPLY | STREET_SEGMENT_ITEM => {
                ReplyBody::StreetSegmentItem(StreetSegmentMatch {
                    index: r.read_u32()?,
                    map_id: r.read_u32()?,
                    coord: read_coord(r)?,
                    distance: r.read_u32()?,
                    first_angle: r.read_u16()?,
                    second_angle: r.read_u16()?,
                    first_node: r.read_u32()?,
                    second_node: r.read_u32()?,
                })
            }
            t if t == REPLY | TRAFFIC_POINT => ReplyBody::CoveredIds(read_id_pairs(r)?),
            t if t == REPLY | ROUTE => {
                let count = r.read_count(12)?;
                let items = (0..count)
                    .map(|_| {
                        Ok(RouteItem {
                            map_id: r.read_u32()?,
                            node_id: r.read_u32()?,
                            coords: read_coords(r)?,
                        })
                    })
                    .collect::<CodecResult<_>>()?;
                ReplyBody::Route(items)
            }
            t if t == REPLY | TOP_REGION => {
                let count = r.read_count(8)?;
                let mut tree = ItemIdTree::new();
                for _ in 0..count {
                    let lower = r.read_u32()?;
                    let higher = r.read_u32()?;
                    tree.add_map(lower, higher)
                        .map_err(|_| CodecError::InvalidValue {
                            field: "map tree relation",
                            value: lower,
                        })?;
                }
                ReplyBody::TopRegion(tree)
            }
            t if t == REPLY | ID_TRANSLATION => ReplyBody::IdTranslation(read_id_pairs(r)?),
            t if t == REPLY | ADD_DISTURBANCE => ReplyBody::AddDisturbance {
                disturbance_id: r.read_u32()?,
            },
            t if t == REPLY | FETCH_ALL_DISTURBANCES => ReplyBody::Disturbances(read_disturbances(r)?),
            t if t == REPLY | DISTURBANCE_CHANGESET => ReplyBody::ChangesetStatus(r.read_u32()?),
            other => return Err(CodecError::UnknownPacketType(other)),
        };
        Ok(body)
    }
}

/// 請求與回覆共用的識別資訊
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketIds {
    pub request_id: u16,
    pub packet_id: u16,
}

pub fn encode_request(ids: PacketIds, request: &ModuleRequest) -> Vec<u8> {
    let mut payload = PacketWriter::new();
    request.write_payload(&mut payload);
    let header = PacketHeader {
        packet_type: request.packet_type(),
        request_id: ids.request_id,
        packet_id: ids.packet_id,
        flags: 0,
        payload_len: 0,
        map_id_or_status: request.map_id(),
    };
    frame(header, &payload.into_inner())
}

pub fn decode_request(packet: &[u8]) -> CodecResult<(PacketIds, ModuleRequest)> {
    let (header, payload) = unframe(packet)?;
    let mut r = PacketReader::new(payload);
    let request = ModuleRequest::read_payload(header.packet_type, header.map_id_or_status, &mut r)?;
    Ok((
        PacketIds {
            request_id: header.request_id,
            packet_id: header.packet_id,
        },
        request,
    ))
}

pub fn encode_reply(ids: PacketIds, reply: &ModuleReply) -> Vec<u8> {
    let mut payload = PacketWriter::new();
    reply.body.write_payload(&mut payload);
    let header = PacketHeader {
        packet_type: reply.body.packet_type(),
        request_id: ids.request_id,
        packet_id: ids.packet_id,
        flags: 0,
        payload_len: 0,
        map_id_or_status: reply.status.code(),
    };
    frame(header, &payload.into_inner())
}

pub fn decode_reply(packet: &[u8]) -> CodecResult<(PacketIds, ModuleReply)> {
    let (header, payload) = unframe(packet)?;
    let status = ReplyStatus::from_code(header.map_id_or_status)?;
    let mut r = PacketReader::new(payload);
    let body = ReplyBody::read_payload(header.packet_type, &mut r)?;
    Ok((
        PacketIds {
            request_id: header.request_id,
            packet_id: header.packet_id,
        },
        ModuleReply { status, body },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::disturbance::fixtures;

    const IDS: PacketIds = PacketIds {
        request_id: 7,
        packet_id: 42,
    };

    #[test]
    fn test_requests_route_to_their_module() {
        let tmc = ModuleRequest::GetTmcCoordinates {
            first: "E4".to_string(),
            second: String::new(),
            extent: 0,
            direction: Direction::Positive,
        };
        assert_eq!(tmc.module(), ModuleType::Traffic);
        assert_eq!(ModuleRequest::TopRegion.module(), ModuleType::Map);
        assert_eq!(
            ModuleRequest::FetchAllDisturbances {
                provider: "TMC".to_string()
            }
            .module(),
            ModuleType::Info
        );
    }

    #[test]
    fn test_street_segment_map_id_travels_in_header() {
        let request = ModuleRequest::StreetSegmentItem {
            index: 2,
            coord: Coord::new(-10, 20),
            map_id: Some(0x8000_0002),
        };
        let packet = encode_request(IDS, &request);
        assert_eq!(&packet[12..16], &[0x80, 0, 0, 2]);

        let (ids, decoded) = decode_request(&packet).unwrap();
        assert_eq!(ids, IDS);
        assert_eq!(decoded, request);

        let unbound = ModuleRequest::StreetSegmentItem {
            index: 0,
            coord: Coord::new(1, 1),
            map_id: None,
        };
        assert_eq!(decode_request(&encode_request(IDS, &unbound)).unwrap().1, unbound);
    }

    #[test]
    fn test_route_request_keeps_endpoint_kinds() {
        let request = ModuleRequest::Route {
            origins: vec![RouteEndpoint::Coord {
                coord: Coord::new(100, 200),
                angle: 270,
            }],
            destinations: vec![RouteEndpoint::Id(IdPair::new(3, 17))],
        };
        let (_, decoded) = decode_request(&encode_request(IDS, &request)).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_add_disturbance_carries_points() {
        let mut element = fixtures::element("TMC:55", 9);
        element.disturbance_id = 12;
        element.add_coordinate(4, 10, 11, 90, 0);
        element.add_coordinate(5, 20, 21, 180, 1);

        let request = ModuleRequest::AddDisturbance {
            element: element.clone(),
        };
        let packet = encode_request(IDS, &request);
        let (_, decoded) = decode_request(&packet).unwrap();
        match decoded {
            ModuleRequest::AddDisturbance { element: decoded } => {
                assert_eq!(decoded, element);
                assert_eq!(decoded.nbr_coordinates(), 2);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_reply_status_and_not_unique_body() {
        let reply = ModuleReply {
            status: ReplyStatus::NotUnique,
            body: ReplyBody::NotUnique {
                index: 1,
                map_ids: vec![3, 4],
            },
        };
        let (ids, decoded) = decode_reply(&encode_reply(IDS, &reply)).unwrap();
        assert_eq!(ids.packet_id, 42);
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_top_region_reply_rebuilds_tree() {
        let mut tree = ItemIdTree::new();
        tree.add_map(1, 0x8000_0000).unwrap();
        tree.add_map(2, 0x8000_0000).unwrap();
        let reply = ModuleReply::ok(ReplyBody::TopRegion(tree.clone()));

        let (_, decoded) = decode_reply(&encode_reply(IDS, &reply)).unwrap();
        assert_eq!(decoded.body, ReplyBody::TopRegion(tree));
    }

    #[test]
    fn test_unknown_packet_type_is_rejected() {
        let mut packet = encode_reply(IDS, &ModuleReply::status(ReplyStatus::NotFound));
        packet[1] = 0xee;
        assert_eq!(
            decode_reply(&packet).unwrap_err(),
            CodecError::UnknownPacketType(0xee)
        );
    }
}
