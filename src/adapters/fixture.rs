//! Simulated map, route, traffic and info modules backed by a JSON
//! network description.

use crate::core::codec::ReplyStatus;
use crate::core::geometry::{angle_degrees, distance_m, reverse_degrees};
use crate::core::packets::{
    ModuleReply, ModuleRequest, ReplyBody, RouteEndpoint, RouteItem, StreetSegmentMatch,
};
use crate::domain::disturbance::{DisturbanceChangeset, DisturbanceElement};
use crate::domain::map_id::ItemIdTree;
use crate::domain::model::{Coord, Direction, IdPair};
use crate::domain::ports::{ModuleHandler, TrafficElementDatabase};
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// 街道比對的最大距離（公尺）
const MAX_SNAP_DISTANCE_M: f64 = 250.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub map_id: u32,
    pub node_id: u32,
    pub lat: i32,
    pub lon: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub map_id: u32,
    pub first_node: u32,
    pub second_node: u32,
    #[serde(default = "default_road_class")]
    pub road_class: u8,
}

fn default_road_class() -> u8 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmcLocation {
    pub lat: i32,
    pub lon: i32,
    /// 正方向的下一個位置碼
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapRelation {
    pub lower: u32,
    pub higher: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub from: IdPair,
    pub to: IdPair,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDocument {
    #[serde(default)]
    pub tmc_locations: BTreeMap<String, TmcLocation>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub segments: Vec<SegmentSpec>,
    #[serde(default)]
    pub maps: Vec<MapRelation>,
    #[serde(default)]
    pub translations: Vec<Translation>,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    to: IdPair,
    length: f64,
    road_class: u8,
}

/// 索引後的路網
#[derive(Debug, Clone)]
pub struct FixtureNetwork {
    tmc_locations: BTreeMap<String, TmcLocation>,
    nodes: BTreeMap<IdPair, Coord>,
    segments: Vec<SegmentSpec>,
    adjacency: HashMap<IdPair, Vec<Edge>>,
    map_tree: ItemIdTree,
    translations: HashMap<IdPair, Vec<IdPair>>,
}

impl FixtureNetwork {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::info!("Loading fixture network from {}", path.display());
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let document: NetworkDocument = serde_json::from_str(content)?;
        Self::from_document(document)
    }

    pub fn from_document(document: NetworkDocument) -> Result<Self> {
        let nodes: BTreeMap<IdPair, Coord> = document
            .nodes
            .iter()
            .map(|n| (IdPair::new(n.map_id, n.node_id), Coord::new(n.lat, n.lon)))
            .collect();

        let mut adjacency: HashMap<IdPair, Vec<Edge>> = HashMap::new();
        for segment in &document.segments {
            let a = IdPair::new(segment.map_id, segment.first_node);
            let b = IdPair::new(segment.map_id, segment.second_node);
            let (Some(ca), Some(cb)) = (nodes.get(&a), nodes.get(&b)) else {
                return Err(IngestError::ConfigValidationError {
                    field: "segments".to_string(),
                    message: format!("segment {} - {} references an unknown node", a, b),
                });
            };
            let length = distance_m(*ca, *cb);
            adjacency.entry(a).or_default().push(Edge {
                to: b,
                length,
                road_class: segment.road_class,
            });
            adjacency.entry(b).or_default().push(Edge {
                to: a,
                length,
                road_class: segment.road_class,
            });
        }

        let mut map_tree = ItemIdTree::new();
        for relation in &document.maps {
            map_tree.add_map(relation.lower, relation.higher)?;
        }

        let mut translations: HashMap<IdPair, Vec<IdPair>> = HashMap::new();
        for translation in &document.translations {
            translations.entry(translation.from).or_default().push(translation.to);
        }

        tracing::debug!(
            "Fixture network: {} nodes, {} segments, {} maps, {} TMC locations",
            nodes.len(),
            document.segments.len(),
            map_tree.len(),
            document.tmc_locations.len()
        );
        Ok(Self {
            tmc_locations: document.tmc_locations,
            nodes,
            segments: document.segments,
            adjacency,
            map_tree,
            translations,
        })
    }

    pub fn map_tree(&self) -> &ItemIdTree {
        &self.map_tree
    }

    fn tmc_coord(&self, code: &str) -> Option<Coord> {
        self.tmc_locations.get(code).map(|l| Coord::new(l.lat, l.lon))
    }

    /// 沿著位置碼鏈走 `extent` 步
    fn walk_tmc(&self, code: &str, extent: u32, direction: Direction) -> Option<Coord> {
        let mut current = code.to_string();
        for _ in 0..extent {
            let location = self.tmc_locations.get(&current)?;
            let next = match direction {
                Direction::Negative => location.previous.as_ref(),
                _ => location.next.as_ref(),
            };
            current = next?.clone();
        }
        self.tmc_coord(&current)
    }

    pub fn tmc_coordinates(&self, first: &str, second: &str, extent: u32, direction: Direction) -> ModuleReply {
        let Some(first_coord) = self.tmc_coord(first) else {
            return ModuleReply::status(ReplyStatus::NotFound);
        };
        let second_coord = if !second.is_empty() {
            match self.tmc_coord(second) {
                Some(coord) => Some(coord),
                None => return ModuleReply::status(ReplyStatus::NotFound),
            }
        } else if extent > 0 {
            self.walk_tmc(first, extent, direction)
        } else {
            None
        };
        ModuleReply::ok(ReplyBody::TmcCoordinates {
            first: vec![first_coord],
            second: second_coord.into_iter().collect(),
        })
    }

    fn segment_distance(&self, point: Coord, segment: &SegmentSpec) -> Option<(f64, Coord, Coord)> {
        let a = *self.nodes.get(&IdPair::new(segment.map_id, segment.first_node))?;
        let b = *self.nodes.get(&IdPair::new(segment.map_id, segment.second_node))?;
        let coslat = (f64::from(point.lat) / 11_930_464.711_1).to_radians().cos();

        let (ax, ay) = (f64::from(a.lon) * coslat, f64::from(a.lat));
        let (bx, by) = (f64::from(b.lon) * coslat, f64::from(b.lat));
        let (px, py) = (f64::from(point.lon) * coslat, f64::from(point.lat));
        let (dx, dy) = (bx - ax, by - ay);
        let length2 = dx * dx + dy * dy;
        let t = if length2 > 0.0 {
            (((px - ax) * dx + (py - ay) * dy) / length2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let projected = Coord::new(
            (f64::from(a.lat) + t * f64::from(b.lat - a.lat)).round() as i32,
            (f64::from(a.lon) + t * f64::from(b.lon - a.lon)).round() as i32,
        );
        Some((distance_m(point, projected), a, b))
    }

    pub fn street_segment(&self, index: u32, coord: Coord, map_id: Option<u32>) -> ModuleReply {
        let candidates: Vec<(f64, &SegmentSpec, Coord, Coord)> = self
            .segments
            .iter()
            .filter(|s| map_id.map_or(true, |m| s.map_id == m))
            .filter_map(|s| {
                self.segment_distance(coord, s)
                    .map(|(distance, a, b)| (distance, s, a, b))
            })
            .filter(|(distance, ..)| *distance <= MAX_SNAP_DISTANCE_M)
            .collect();

        let map_ids: BTreeSet<u32> = candidates.iter().map(|(_, s, ..)| s.map_id).collect();
        if map_id.is_none() && map_ids.len() > 1 {
            return ModuleReply {
                status: ReplyStatus::NotUnique,
                body: ReplyBody::NotUnique {
                    index,
                    map_ids: map_ids.into_iter().collect(),
                },
            };
        }

        let Some((distance, segment, a, b)) = candidates
            .into_iter()
            .min_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(Ordering::Equal))
        else {
            return ModuleReply::status(ReplyStatus::NotFound);
        };
        let first_angle = angle_degrees(a, b);
        ModuleReply::ok(ReplyBody::StreetSegmentItem(StreetSegmentMatch {
            index,
            map_id: segment.map_id,
            coord,
            distance: distance.round() as u32,
            first_angle,
            second_angle: reverse_degrees(first_angle),
            first_node: segment.first_node,
            second_node: segment.second_node,
        }))
    }

    /// 半徑內、道路等級足夠的節點，依距離排序
    pub fn covered_ids(&self, center: Coord, radius_m: u32, max_nbr: u32, max_road_class: u8) -> Vec<IdPair> {
        let mut found: Vec<(f64, IdPair)> = self
            .nodes
            .iter()
            .filter(|(id, _)| {
                self.adjacency
                    .get(id)
                    .is_some_and(|edges| edges.iter().any(|e| e.road_class <= max_road_class))
            })
            .map(|(id, coord)| (distance_m(center, *coord), *id))
            .filter(|(distance, _)| *distance <= f64::from(radius_m))
            .collect();
        found.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(Ordering::Equal).then(x.1.cmp(&y.1)));
        found
            .into_iter()
            .take(max_nbr as usize)
            .map(|(_, id)| id)
            .collect()
    }

    fn nearest_node(&self, coord: Coord) -> Option<IdPair> {
        self.nodes
            .iter()
            .filter(|(id, _)| self.adjacency.contains_key(id))
            .map(|(id, c)| (distance_m(coord, *c), *id))
            .min_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(Ordering::Equal))
            .map(|(_, id)| id)
    }

    fn endpoint_node(&self, endpoint: &RouteEndpoint) -> Option<IdPair> {
        match endpoint {
            RouteEndpoint::Coord { coord, .. } => self.nearest_node(*coord),
            RouteEndpoint::Id(id) => self.nodes.contains_key(id).then_some(*id),
        }
    }

    /// 多起點最短路徑，抵達任一終點即停止
    pub fn route(&self, origins: &[RouteEndpoint], destinations: &[RouteEndpoint]) -> Option<Vec<RouteItem>> {
        let starts: BTreeSet<IdPair> = origins.iter().filter_map(|e| self.endpoint_node(e)).collect();
        let goals: BTreeSet<IdPair> = destinations.iter().filter_map(|e| self.endpoint_node(e)).collect();
        if starts.is_empty() || goals.is_empty() {
            return None;
        }

        let mut best: HashMap<IdPair, f64> = HashMap::new();
        let mut previous: HashMap<IdPair, IdPair> = HashMap::new();
        let mut heap = BinaryHeap::new();
        for start in &starts {
            best.insert(*start, 0.0);
            heap.push(Visit {
                cost: 0.0,
                node: *start,
            });
        }

        let mut reached = None;
        while let Some(Visit { cost, node }) = heap.pop() {
            if goals.contains(&node) {
                reached = Some(node);
                break;
            }
            if cost > best.get(&node).copied().unwrap_or(f64::INFINITY) {
                continue;
            }
            for edge in self.adjacency.get(&node).into_iter().flatten() {
                let next_cost = cost + edge.length;
                if next_cost < best.get(&edge.to).copied().unwrap_or(f64::INFINITY) {
                    best.insert(edge.to, next_cost);
                    previous.insert(edge.to, node);
                    heap.push(Visit {
                        cost: next_cost,
                        node: edge.to,
                    });
                }
            }
        }

        let mut path = vec![reached?];
        while let Some(prev) = path.last().and_then(|n| previous.get(n)) {
            path.push(*prev);
        }
        path.reverse();

        let coords: Vec<Coord> = path.iter().filter_map(|id| self.nodes.get(id).copied()).collect();
        Some(
            path.iter()
                .enumerate()
                .map(|(i, id)| RouteItem {
                    map_id: id.map_id,
                    node_id: id.item_id,
                    coords: coords[i..coords.len().min(i + 2)].to_vec(),
                })
                .collect(),
        )
    }

    pub fn translate(&self, to_map: u32, nodes: &[IdPair]) -> Vec<IdPair> {
        nodes
            .iter()
            .map(|node| {
                self.translations
                    .get(node)
                    .and_then(|targets| targets.iter().find(|t| t.map_id == to_map))
                    .copied()
                    .unwrap_or(IdPair::INVALID)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Visit {
    cost: f64,
    node: IdPair,
}

impl Eq for Visit {}

impl Ord for Visit {
    // 成本小者優先
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Visit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 以路網與事件資料庫回答所有模組請求
pub struct FixtureModules<D: TrafficElementDatabase> {
    network: FixtureNetwork,
    database: Arc<D>,
}

impl<D: TrafficElementDatabase> FixtureModules<D> {
    pub fn new(network: FixtureNetwork, database: Arc<D>) -> Self {
        Self { network, database }
    }

    pub fn network(&self) -> &FixtureNetwork {
        &self.network
    }

    async fn add_disturbance(&self, element: DisturbanceElement) -> ModuleReply {
        let mut changeset = DisturbanceChangeset::new(vec![element], vec![]);
        let status = self.database.update_changeset(&mut changeset).await;
        match changeset.update_set().first() {
            Some(stored) if status.is_ok() => ModuleReply::ok(ReplyBody::AddDisturbance {
                disturbance_id: stored.disturbance_id,
            }),
            _ => {
                tracing::warn!("AddDisturbance failed: {}", status);
                ModuleReply::status(ReplyStatus::NotOk)
            }
        }
    }
}

#[async_trait]
impl<D: TrafficElementDatabase + 'static> ModuleHandler for FixtureModules<D> {
    async fn handle(&self, request: ModuleRequest) -> ModuleReply {
        match request {
            ModuleRequest::GetTmcCoordinates {
                first,
                second,
                extent,
                direction,
            } => self.network.tmc_coordinates(&first, &second, extent, direction),
            ModuleRequest::StreetSegmentItem { index, coord, map_id } => {
                self.network.street_segment(index, coord, map_id)
            }
            ModuleRequest::TrafficPoint {
                center,
                radius_m,
                max_nbr,
                max_road_class,
                ..
            } => ModuleReply::ok(ReplyBody::CoveredIds(self.network.covered_ids(
                center,
                radius_m,
                max_nbr,
                max_road_class,
            ))),
            ModuleRequest::Route {
                origins,
                destinations,
            } => match self.network.route(&origins, &destinations) {
                Some(items) => ModuleReply::ok(ReplyBody::Route(items)),
                None => ModuleReply::status(ReplyStatus::NotFound),
            },
            ModuleRequest::TopRegion => ModuleReply::ok(ReplyBody::TopRegion(self.network.map_tree().clone())),
            ModuleRequest::IdTranslation { to_map, nodes } => {
                ModuleReply::ok(ReplyBody::IdTranslation(self.network.translate(to_map, &nodes)))
            }
            ModuleRequest::AddDisturbance { element } => self.add_disturbance(element).await,
            ModuleRequest::FetchAllDisturbances { provider } => {
                match self.database.fetch_all_disturbances(&provider).await {
                    Ok(disturbances) => ModuleReply::ok(ReplyBody::Disturbances(disturbances)),
                    Err(e) => {
                        tracing::warn!("FetchAllDisturbances for {} failed: {}", provider, e);
                        ModuleReply::status(ReplyStatus::NotOk)
                    }
                }
            }
            ModuleRequest::DisturbanceChangeset { update, remove } => {
                let mut changeset = DisturbanceChangeset::new(update, remove);
                let status = self.database.update_changeset(&mut changeset).await;
                ModuleReply {
                    status: if status.is_ok() {
                        ReplyStatus::Ok
                    } else {
                        ReplyStatus::NotOk
                    },
                    body: ReplyBody::ChangesetStatus(status.bits()),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// 兩層地圖上的一條三節點道路，另有一條重疊的道路在地圖 2
    pub const NETWORK: &str = r#"{
        "tmc_locations": {
            "100": { "lat": 0, "lon": 0, "next": "101" },
            "101": { "lat": 0, "lon": 20000, "previous": "100" }
        },
        "nodes": [
            { "map_id": 1, "node_id": 1, "lat": 0, "lon": 0 },
            { "map_id": 1, "node_id": 2, "lat": 0, "lon": 10000 },
            { "map_id": 1, "node_id": 3, "lat": 0, "lon": 20000 },
            { "map_id": 2, "node_id": 1, "lat": 50000, "lon": 0 },
            { "map_id": 2, "node_id": 2, "lat": 50000, "lon": 10000 },
            { "map_id": 2147483648, "node_id": 1, "lat": 0, "lon": 0 },
            { "map_id": 2147483648, "node_id": 3, "lat": 0, "lon": 20000 }
        ],
        "segments": [
            { "map_id": 1, "first_node": 1, "second_node": 2, "road_class": 1 },
            { "map_id": 1, "first_node": 2, "second_node": 3, "road_class": 1 },
            { "map_id": 2, "first_node": 1, "second_node": 2 }
        ],
        "maps": [
            { "lower": 1, "higher": 2147483648 },
            { "lower": 2, "higher": 2147483648 }
        ],
        "translations": [
            { "from": { "map_id": 1, "item_id": 1 }, "to": { "map_id": 2147483648, "item_id": 1 } },
            { "from": { "map_id": 1, "item_id": 3 }, "to": { "map_id": 2147483648, "item_id": 3 } }
        ]
    }"#;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> FixtureNetwork {
        FixtureNetwork::from_json_str(fixtures::NETWORK).unwrap()
    }

    #[test]
    fn test_tmc_walks_successors_for_extent() {
        let reply = network().tmc_coordinates("100", "", 1, Direction::Positive);
        assert_eq!(
            reply.body,
            ReplyBody::TmcCoordinates {
                first: vec![Coord::new(0, 0)],
                second: vec![Coord::new(0, 20000)],
            }
        );
        assert_eq!(
            network().tmc_coordinates("999", "", 0, Direction::Positive).status,
            ReplyStatus::NotFound
        );
    }

    #[test]
    fn test_street_segment_snaps_to_nearest_segment() {
        let reply = network().street_segment(0, Coord::new(10, 12000), None);
        let ReplyBody::StreetSegmentItem(item) = reply.body else {
            panic!("expected a match, got {:?}", reply);
        };
        assert_eq!((item.map_id, item.first_node, item.second_node), (1, 2, 3));
        assert_eq!(item.first_angle, 90);
        assert_eq!(item.second_angle, 270);
    }

    #[test]
    fn test_street_segment_far_away_is_not_found() {
        let reply = network().street_segment(0, Coord::new(10_000_000, 0), None);
        assert_eq!(reply.status, ReplyStatus::NotFound);
    }

    #[test]
    fn test_route_follows_segments() {
        let items = network()
            .route(
                &[RouteEndpoint::Id(IdPair::new(1, 1))],
                &[RouteEndpoint::Coord {
                    coord: Coord::new(5, 19990),
                    angle: 0,
                }],
            )
            .unwrap();
        let nodes: Vec<u32> = items.iter().map(|i| i.node_id).collect();
        assert_eq!(nodes, vec![1, 2, 3]);
        assert_eq!(items[0].coords, vec![Coord::new(0, 0), Coord::new(0, 10000)]);
        assert_eq!(items[2].coords, vec![Coord::new(0, 20000)]);
    }

    #[test]
    fn test_covered_ids_respect_road_class_and_radius() {
        let net = network();
        let ids = net.covered_ids(Coord::new(0, 0), 50, 2, 1);
        assert_eq!(ids, vec![IdPair::new(1, 1)]);
        // 地圖 2 的道路等級 4
        assert!(net.covered_ids(Coord::new(50000, 0), 50, 2, 3).is_empty());
    }

    #[test]
    fn test_translate_marks_unknown_nodes_invalid() {
        let translated = network().translate(0x8000_0000, &[IdPair::new(1, 1), IdPair::new(1, 2)]);
        assert_eq!(translated, vec![IdPair::new(0x8000_0000, 1), IdPair::INVALID]);
    }

    #[test]
    fn test_unknown_segment_node_is_rejected() {
        let err = FixtureNetwork::from_json_str(
            r#"{ "segments": [ { "map_id": 1, "first_node": 1, "second_node": 2 } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::ConfigValidationError { .. }));
    }
}
