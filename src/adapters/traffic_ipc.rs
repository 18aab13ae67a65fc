use crate::core::datex_engine::DatexEngine;
use crate::core::datex_request::DatexMode;
use crate::core::packets::{ModuleRequest, ModuleType, ReplyBody};
use crate::domain::disturbance::{ChangesetStatus, DisturbanceChangeset, DisturbanceElement};
use crate::domain::model::TrafficSituation;
use crate::domain::ports::{ModuleGateway, TrafficIpc};
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;

/// 透過模組請求實作的交通處理器通訊
pub struct ModuleTrafficIpc<G: ModuleGateway> {
    engine: DatexEngine<G>,
}

impl<G: ModuleGateway> ModuleTrafficIpc<G> {
    pub fn new(engine: DatexEngine<G>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DatexEngine<G> {
        &self.engine
    }
}

#[async_trait]
impl<G: ModuleGateway> TrafficIpc for ModuleTrafficIpc<G> {
    async fn get_all_disturbances(&self, provider: &str) -> Result<Vec<DisturbanceElement>> {
        let reply = self
            .engine
            .gateway()
            .send(ModuleRequest::FetchAllDisturbances {
                provider: provider.to_string(),
            })
            .await?;
        match (reply.is_ok(), reply.body) {
            (true, ReplyBody::Disturbances(disturbances)) => Ok(disturbances),
            (_, body) => Err(IngestError::ModuleReplyError {
                module: ModuleType::Info.to_string(),
                status: reply.status.to_string(),
                message: format!("unexpected {} reply to FetchAllDisturbances", body.kind()),
            }),
        }
    }

    async fn resolve_situation(&self, situation: &TrafficSituation) -> Result<Vec<DisturbanceElement>> {
        let mut outcome = self
            .engine
            .run(vec![situation.clone()], DatexMode::Collect)
            .await?;
        if let Some(error) = outcome.error {
            return Err(IngestError::processing(format!(
                "{}: {}",
                situation.situation_reference, error
            )));
        }
        outcome
            .resolved
            .pop()
            .map(|resolved| resolved.elements)
            .ok_or_else(|| {
                IngestError::processing(format!(
                    "{} resolved to nothing",
                    situation.situation_reference
                ))
            })
    }

    async fn send_changeset(&self, changeset: DisturbanceChangeset) -> Result<()> {
        let (update, remove) = changeset.into_parts();
        let reply = self
            .engine
            .gateway()
            .send(ModuleRequest::DisturbanceChangeset { update, remove })
            .await?;
        match reply.body {
            ReplyBody::ChangesetStatus(bits) if ChangesetStatus::from_bits(bits).is_ok() => Ok(()),
            ReplyBody::ChangesetStatus(bits) => Err(IngestError::database(format!(
                "changeset failed: {}",
                ChangesetStatus::from_bits(bits)
            ))),
            body => Err(IngestError::ModuleReplyError {
                module: ModuleType::Info.to_string(),
                status: reply.status.to_string(),
                message: format!("unexpected {} reply to DisturbanceChangeset", body.kind()),
            }),
        }
    }
}
