use crate::domain::disturbance::{
    ChangesetStatus, DisturbanceChangeset, DisturbanceElement, DisturbanceId, INVALID_DISTURBANCE_ID,
};
use crate::domain::ports::{Storage, TrafficElementDatabase};
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

/// 連線檢查時最多嘗試載入文件的次數
const LOAD_ATTEMPTS: u32 = 3;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrafficDocument {
    #[serde(default)]
    disturbances: Vec<DisturbanceElement>,
}

/// 以 JSON 文件保存事件紀錄
pub struct JsonTrafficElementDatabase<S: Storage> {
    storage: S,
    document: String,
    lock: Mutex<()>,
}

impl<S: Storage> JsonTrafficElementDatabase<S> {
    pub fn new(storage: S, document: impl Into<String>) -> Self {
        Self {
            storage,
            document: document.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    async fn load(&self) -> Result<TrafficDocument> {
        if !self.storage.exists(&self.document).await {
            return Ok(TrafficDocument::default());
        }
        let data = self.storage.read_file(&self.document).await?;
        let document = serde_json::from_slice(&data)?;
        Ok(document)
    }

    async fn load_with_retry(&self) -> Result<TrafficDocument> {
        let mut last_error = None;
        for attempt in 1..=LOAD_ATTEMPTS {
            match self.load().await {
                Ok(document) => return Ok(document),
                Err(e) => {
                    tracing::warn!(
                        "[TrafficDB] loading {} failed (attempt {}/{}): {}",
                        self.document,
                        attempt,
                        LOAD_ATTEMPTS,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| IngestError::database("document could not be loaded")))
    }

    async fn store(&self, document: &TrafficDocument) -> Result<()> {
        let data = serde_json::to_vec_pretty(document)?;
        self.storage.write_file(&self.document, &data).await
    }

    /// 所有儲存的事件，不分供應商
    pub async fn all_disturbances(&self) -> Result<Vec<DisturbanceElement>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_with_retry().await?.disturbances)
    }
}

/// 為沒有有效 id 的元素指派 id；同一情境參照共用一個 id
fn assign_ids(stored: &[DisturbanceElement], elements: &mut [DisturbanceElement]) {
    let stored_ids: HashMap<&str, DisturbanceId> = stored
        .iter()
        .filter(|e| e.has_valid_id())
        .map(|e| (e.situation_reference.as_str(), e.disturbance_id))
        .collect();
    let mut used: BTreeSet<DisturbanceId> = stored
        .iter()
        .chain(elements.iter())
        .map(|e| e.disturbance_id)
        .filter(|id| *id != INVALID_DISTURBANCE_ID)
        .collect();
    let mut chosen: HashMap<String, DisturbanceId> = HashMap::new();

    for element in elements.iter_mut().filter(|e| !e.has_valid_id()) {
        if let Some(id) = chosen.get(&element.situation_reference) {
            element.disturbance_id = *id;
            continue;
        }
        let id = match stored_ids.get(element.situation_reference.as_str()) {
            Some(id) => *id,
            None => match next_free_id(&used) {
                Some(id) => {
                    used.insert(id);
                    id
                }
                None => {
                    tracing::error!(
                        "[TrafficDB] no free disturbance id left for {}",
                        element.situation_reference
                    );
                    continue;
                }
            },
        };
        tracing::debug!(
            "[TrafficDB] disturbance id {} for {}",
            id,
            element.situation_reference
        );
        element.disturbance_id = id;
        chosen.insert(element.situation_reference.clone(), id);
    }
}

/// 最大已用 id 加一；溢位或碰到無效 id 時改用最小的空號
fn next_free_id(used: &BTreeSet<DisturbanceId>) -> Option<DisturbanceId> {
    let after_max = match used.last() {
        Some(max) => max.checked_add(1),
        None => Some(1),
    };
    after_max
        .filter(|id| *id != INVALID_DISTURBANCE_ID)
        .or_else(|| (1..INVALID_DISTURBANCE_ID).find(|id| !used.contains(id)))
}

#[async_trait]
impl<S: Storage> TrafficElementDatabase for JsonTrafficElementDatabase<S> {
    async fn fetch_all_disturbances(&self, provider: &str) -> Result<Vec<DisturbanceElement>> {
        let prefix = format!("{}:", provider);
        let disturbances = self
            .all_disturbances()
            .await?
            .into_iter()
            .filter(|e| e.situation_reference.starts_with(&prefix))
            .collect::<Vec<_>>();
        tracing::debug!(
            "[TrafficDB] fetched {} disturbances for {}",
            disturbances.len(),
            provider
        );
        Ok(disturbances)
    }

    async fn update_changeset(&self, changeset: &mut DisturbanceChangeset) -> ChangesetStatus {
        let _guard = self.lock.lock().await;

        let mut document = match self.load_with_retry().await {
            Ok(document) => document,
            Err(e) => {
                tracing::error!("[TrafficDB] No connection to database! {}", e);
                return ChangesetStatus::UPDATE_FAILED | ChangesetStatus::REMOVE_FAILED;
            }
        };
        let mut status = ChangesetStatus::OK;

        if !changeset.remove_set().is_empty() {
            let removed: BTreeSet<&str> = changeset
                .remove_set()
                .iter()
                .map(|e| e.situation_reference.as_str())
                .collect();
            let before = document.disturbances.len();
            document
                .disturbances
                .retain(|e| !removed.contains(e.situation_reference.as_str()));
            tracing::debug!(
                "[TrafficDB] removing {} elements",
                before - document.disturbances.len()
            );
            if let Err(e) = self.store(&document).await {
                tracing::error!("[TrafficDB] Failed to erase disturbances. {}", e);
                status |= ChangesetStatus::REMOVE_FAILED;
                // 刪除失敗時以磁碟上的內容為準
                match self.load().await {
                    Ok(reloaded) => document = reloaded,
                    Err(_) => return status | ChangesetStatus::UPDATE_FAILED,
                }
            }
        }

        if !changeset.update_set().is_empty() {
            assign_ids(&document.disturbances, changeset.update_set_mut());
            for element in changeset.update_set() {
                let key = (element.disturbance_id, element.map_id);
                match document
                    .disturbances
                    .iter_mut()
                    .find(|e| (e.disturbance_id, e.map_id) == key)
                {
                    Some(existing) => *existing = element.clone(),
                    None => document.disturbances.push(element.clone()),
                }
            }
            if let Err(e) = self.store(&document).await {
                tracing::error!("[TrafficDB] Failed to insert/update disturbances. {}", e);
                status |= ChangesetStatus::UPDATE_FAILED;
            }
        }

        status
    }
}
