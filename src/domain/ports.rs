use crate::core::packets::{ModuleReply, ModuleRequest};
use crate::domain::disturbance::{ChangesetStatus, DisturbanceChangeset, DisturbanceElement};
use crate::domain::model::TrafficSituation;
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

/// 將請求送到對應的模組並等待回覆
#[async_trait]
pub trait ModuleGateway: Send + Sync {
    async fn send(&self, request: ModuleRequest) -> Result<ModuleReply>;
}

/// 模組端處理單一請求
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    async fn handle(&self, request: ModuleRequest) -> ModuleReply;
}

#[async_trait]
pub trait TrafficElementDatabase: Send + Sync {
    async fn fetch_all_disturbances(&self, provider: &str) -> Result<Vec<DisturbanceElement>>;

    /// 沒有有效 id 的更新元素會在此被指派 id
    async fn update_changeset(&self, changeset: &mut DisturbanceChangeset) -> ChangesetStatus;
}

/// 交通處理器與模組之間的通訊
#[async_trait]
pub trait TrafficIpc: Send + Sync {
    async fn get_all_disturbances(&self, provider: &str) -> Result<Vec<DisturbanceElement>>;

    /// 將一個情境解析為每張地圖一筆的事件紀錄
    async fn resolve_situation(&self, situation: &TrafficSituation) -> Result<Vec<DisturbanceElement>>;

    async fn send_changeset(&self, changeset: DisturbanceChangeset) -> Result<()>;
}
