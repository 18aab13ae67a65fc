use crate::core::datex_request::{
    DatexMode, DatexRequest, DatexState, Outgoing, PublishedDisturbance, ResolvedSituation,
};
use crate::domain::model::TrafficSituation;
use crate::domain::ports::ModuleGateway;
use crate::utils::error::{IngestError, Result};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// 一次請求結束時的結果
#[derive(Debug, Clone, PartialEq)]
pub struct DatexOutcome {
    pub state: DatexState,
    pub published: Vec<PublishedDisturbance>,
    pub resolved: Vec<ResolvedSituation>,
    pub error: Option<String>,
}

impl DatexOutcome {
    pub fn is_ok(&self) -> bool {
        self.state == DatexState::Done
    }
}

pub struct DatexEngine<G: ModuleGateway> {
    gateway: G,
    request_timeout: Duration,
    next_request_id: AtomicU16,
}

impl<G: ModuleGateway> DatexEngine<G> {
    pub fn new(gateway: G, request_timeout: Duration) -> Self {
        Self {
            gateway,
            request_timeout,
            next_request_id: AtomicU16::new(1),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// 只有傳輸層中斷會回傳錯誤，其餘失敗反映在 `DatexOutcome::state`
    pub async fn run(&self, situations: Vec<TrafficSituation>, mode: DatexMode) -> Result<DatexOutcome> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "[DATEX {}] starting with {} situations ({:?})",
            id,
            situations.len(),
            mode
        );

        let mut request = DatexRequest::new(id, situations, mode);
        let mut outgoing = request.take_outgoing();

        while !request.is_done() {
            let Some(next) = outgoing.pop() else {
                return Err(IngestError::processing(format!(
                    "DATEX request {} stalled in state {}",
                    id,
                    request.state()
                )));
            };
            outgoing = self.exchange(&mut request, next).await?;
        }

        let outcome = DatexOutcome {
            state: request.state(),
            published: request.take_published(),
            resolved: request.take_resolved(),
            error: request.last_error().map(str::to_string),
        };
        match &outcome.error {
            Some(error) => tracing::warn!("[DATEX {}] finished in {}: {}", id, outcome.state, error),
            None => tracing::info!(
                "[DATEX {}] finished, {} published, {} resolved",
                id,
                outcome.published.len(),
                outcome.resolved.len()
            ),
        }
        Ok(outcome)
    }

    /// 每個情境各自執行，一個失敗不影響其他情境
    pub async fn publish_each(&self, situations: Vec<TrafficSituation>) -> Result<Vec<DatexOutcome>> {
        let mut outcomes = Vec::with_capacity(situations.len());
        for situation in situations {
            outcomes.push(self.run(vec![situation], DatexMode::Publish).await?);
        }
        Ok(outcomes)
    }

    async fn exchange(&self, request: &mut DatexRequest, outgoing: Outgoing) -> Result<Vec<Outgoing>> {
        let name = outgoing.request.name();
        tracing::debug!(
            "[DATEX {}] -> {} module: {}",
            request.id(),
            outgoing.module,
            name
        );

        match tokio::time::timeout(self.request_timeout, self.gateway.send(outgoing.request)).await {
            Ok(Ok(reply)) => Ok(request.process_reply(reply)),
            Ok(Err(err @ IngestError::TransportError { .. })) => Err(err),
            Ok(Err(err)) => {
                tracing::warn!("[DATEX {}] {} failed: {}", request.id(), name, err);
                Ok(request.process_missing_reply())
            }
            Err(_) => {
                let err = IngestError::ModuleTimeoutError {
                    module: outgoing.module.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                };
                tracing::warn!("[DATEX {}] {}: {}", request.id(), name, err);
                Ok(request.process_missing_reply())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::ReplyStatus;
    use crate::core::packets::{ModuleReply, ModuleRequest, ReplyBody, StreetSegmentMatch};
    use crate::domain::map_id::ItemIdTree;
    use crate::domain::model::{fixtures, Coord, Direction, IdPair};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 依請求種類回覆固定內容，並記錄收到的請求名稱
    struct ScriptedGateway {
        seen: Mutex<Vec<&'static str>>,
        answer_tmc: bool,
    }

    impl ScriptedGateway {
        fn new(answer_tmc: bool) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                answer_tmc,
            }
        }
    }

    #[async_trait]
    impl ModuleGateway for ScriptedGateway {
        async fn send(&self, request: ModuleRequest) -> Result<ModuleReply> {
            self.seen.lock().unwrap().push(request.name());
            let reply = match request {
                ModuleRequest::GetTmcCoordinates { .. } if !self.answer_tmc => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    ModuleReply::status(ReplyStatus::Timeout)
                }
                ModuleRequest::StreetSegmentItem { index, coord, .. } => {
                    ModuleReply::ok(ReplyBody::StreetSegmentItem(StreetSegmentMatch {
                        index,
                        map_id: 1,
                        coord,
                        distance: 3,
                        first_angle: 0,
                        second_angle: 180,
                        first_node: 7,
                        second_node: u32::MAX,
                    }))
                }
                ModuleRequest::TopRegion => {
                    let mut tree = ItemIdTree::new();
                    tree.add_map(1, 0x8000_0000).unwrap();
                    ModuleReply::ok(ReplyBody::TopRegion(tree))
                }
                ModuleRequest::IdTranslation { nodes, .. } => ModuleReply::ok(ReplyBody::IdTranslation(
                    nodes.iter().map(|n| IdPair::new(0x8000_0000, n.item_id + 100)).collect(),
                )),
                ModuleRequest::AddDisturbance { .. } => {
                    ModuleReply::ok(ReplyBody::AddDisturbance { disturbance_id: 42 })
                }
                _ => ModuleReply::status(ReplyStatus::NotOk),
            };
            Ok(reply)
        }
    }

    struct ClosedGateway;

    #[async_trait]
    impl ModuleGateway for ClosedGateway {
        async fn send(&self, request: ModuleRequest) -> Result<ModuleReply> {
            Err(IngestError::TransportError {
                module: request.module().to_string(),
            })
        }
    }

    fn point(reference: &str) -> TrafficSituation {
        fixtures::situation(
            reference,
            fixtures::element(Direction::Positive, vec![Coord::new(10, 20)]),
        )
    }

    #[tokio::test]
    async fn test_run_publishes_on_both_map_levels() {
        let engine = DatexEngine::new(ScriptedGateway::new(true), Duration::from_secs(1));

        let outcome = engine.run(vec![point("TMC:1")], DatexMode::Publish).await.unwrap();

        assert!(outcome.is_ok());
        assert_eq!(outcome.published.len(), 2);
        assert!(outcome.published.iter().all(|p| p.disturbance_id == 42));
        let seen = engine.gateway().seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "StreetSegmentItem",
                "TopRegion",
                "IDTranslation",
                "AddDisturbance",
                "AddDisturbance"
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_as_missing_reply() {
        let engine = DatexEngine::new(ScriptedGateway::new(false), Duration::from_millis(50));
        let mut element = fixtures::element(Direction::Positive, vec![]);
        element.first_location = "1234".to_string();

        let outcome = engine
            .run(vec![fixtures::situation("TMC:2", element)], DatexMode::Collect)
            .await
            .unwrap();

        assert_eq!(outcome.state, DatexState::Error);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let engine = DatexEngine::new(ClosedGateway, Duration::from_secs(1));
        let result = engine.run(vec![point("TMC:3")], DatexMode::Publish).await;
        assert!(matches!(result, Err(IngestError::TransportError { .. })));
    }

    #[tokio::test]
    async fn test_publish_each_isolates_failures() {
        let engine = DatexEngine::new(ScriptedGateway::new(true), Duration::from_secs(1));
        let empty = fixtures::situation("TMC:empty", fixtures::element(Direction::Positive, vec![]));

        let outcomes = engine.publish_each(vec![empty, point("TMC:4")]).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].state, DatexState::Error);
        assert!(outcomes[1].is_ok());
    }
}
