//! 比對每次匯入的情境與已儲存的事件，只送出差異。

use crate::domain::disturbance::{DisturbanceChangeset, DisturbanceElement};
use crate::domain::model::TrafficSituation;
use crate::domain::ports::TrafficIpc;
use crate::utils::error::Result;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// 單次處理的摘要
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub kept: usize,
    pub new_situations: usize,
    pub expired: usize,
    pub new_elements: usize,
    pub removed_elements: usize,
    pub failed_maps: Vec<u32>,
}

impl SyncSummary {
    pub fn is_ok(&self) -> bool {
        self.failed_maps.is_empty()
    }
}

pub struct TrafficHandler<I: TrafficIpc> {
    provider: String,
    ipc: I,
    stored: Vec<DisturbanceElement>,
}

impl<I: TrafficIpc> TrafficHandler<I> {
    pub fn new(provider: impl Into<String>, ipc: I) -> Self {
        Self {
            provider: provider.into(),
            ipc,
            stored: Vec::new(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn ipc(&self) -> &I {
        &self.ipc
    }

    /// 依情境參照排序
    pub fn stored_elements(&self) -> &[DisturbanceElement] {
        &self.stored
    }

    /// 從資料庫重新載入此供應商的事件；失敗時保留空集合
    pub async fn setup(&mut self) {
        match self.ipc.get_all_disturbances(&self.provider).await {
            Ok(mut elements) => {
                for element in &mut elements {
                    element.strip_data();
                }
                self.stored = elements;
                tracing::info!(
                    "[TrafficHandler] {} stored elements for {}",
                    self.stored.len(),
                    self.provider
                );
            }
            Err(e) => {
                tracing::warn!(
                    "[TrafficHandler] failed to fetch situations from module: {}",
                    e
                );
                self.stored.clear();
            }
        }
        self.sort_stored();
    }

    fn sort_stored(&mut self) {
        self.stored
            .sort_by(|a, b| a.situation_reference.cmp(&b.situation_reference));
    }

    /// 回傳 `false` 表示有變更集失敗，已重新同步
    pub async fn process_situations(&mut self, situations: &[TrafficSituation], now: u32) -> bool {
        self.process_situations_with_summary(situations, now)
            .await
            .is_ok()
    }

    pub async fn process_situations_with_summary(
        &mut self,
        situations: &[TrafficSituation],
        now: u32,
    ) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let (removed, new_situations) = self.create_unique_set(situations, now, &mut summary);
        tracing::debug!(
            "[TrafficHandler] {} situations, {} new, {} removed elements",
            situations.len(),
            new_situations.len(),
            removed.len()
        );

        let new_elements = self.compose_new_elements(&new_situations).await;
        summary.new_elements = new_elements.len();
        summary.removed_elements = removed.len();

        summary.failed_maps = self.send_changesets(&new_elements, &removed).await;
        if summary.failed_maps.is_empty() {
            self.update_stored_elements(new_elements, &removed);
        } else {
            tracing::warn!("[TrafficHandler] Changeset failed, resyncing with database...");
            self.setup().await;
        }
        summary
    }

    fn create_unique_set<'a>(
        &self,
        situations: &'a [TrafficSituation],
        now: u32,
        summary: &mut SyncSummary,
    ) -> (Vec<DisturbanceElement>, Vec<&'a TrafficSituation>) {
        let stored_refs: HashSet<&str> = self
            .stored
            .iter()
            .map(|e| e.situation_reference.as_str())
            .collect();
        let incoming_refs: HashSet<&str> = situations
            .iter()
            .map(|s| s.situation_reference.as_str())
            .collect();

        let mut new_situations = Vec::new();
        for situation in situations {
            if stored_refs.contains(situation.situation_reference.as_str()) {
                summary.kept += 1;
            } else if situation.is_valid_at(now) {
                new_situations.push(situation);
            } else {
                summary.expired += 1;
                tracing::debug!(
                    "[TrafficHandler] skipping expired situation {}",
                    situation.situation_reference
                );
            }
        }
        summary.new_situations = new_situations.len();

        let removed = self
            .stored
            .iter()
            .filter(|e| !incoming_refs.contains(e.situation_reference.as_str()))
            .cloned()
            .collect();
        (removed, new_situations)
    }

    async fn compose_new_elements(&self, situations: &[&TrafficSituation]) -> Vec<DisturbanceElement> {
        let mut elements = Vec::new();
        for situation in situations {
            match self.ipc.resolve_situation(situation).await {
                Ok(resolved) => elements.extend(resolved),
                Err(e) => tracing::warn!(
                    "[TrafficHandler] could not resolve {}: {}",
                    situation.situation_reference,
                    e
                ),
            }
        }
        elements
    }

    /// 每個地圖 id 一個變更集；回傳失敗的地圖
    async fn send_changesets(
        &self,
        new_elements: &[DisturbanceElement],
        removed: &[DisturbanceElement],
    ) -> Vec<u32> {
        let mut new_by_map: BTreeMap<u32, Vec<DisturbanceElement>> = BTreeMap::new();
        let mut removed_by_map: BTreeMap<u32, Vec<DisturbanceElement>> = BTreeMap::new();
        for element in new_elements {
            new_by_map.entry(element.map_id).or_default().push(element.clone());
        }
        for element in removed {
            removed_by_map.entry(element.map_id).or_default().push(element.clone());
        }
        let map_ids: BTreeSet<u32> = new_by_map.keys().chain(removed_by_map.keys()).copied().collect();

        let mut failed = Vec::new();
        for map_id in map_ids {
            let changeset = DisturbanceChangeset::new(
                new_by_map.remove(&map_id).unwrap_or_default(),
                removed_by_map.remove(&map_id).unwrap_or_default(),
            );
            if let Err(e) = self.ipc.send_changeset(changeset).await {
                tracing::warn!(
                    "[TrafficHandler] MapID 0x{:x} failed to send changeset: {}",
                    map_id,
                    e
                );
                failed.push(map_id);
            }
        }
        failed
    }

    fn update_stored_elements(&mut self, new_elements: Vec<DisturbanceElement>, removed: &[DisturbanceElement]) {
        // 每個被刪除的元素對應一筆已儲存的紀錄
        for element in removed {
            if let Some(pos) = self
                .stored
                .iter()
                .position(|s| s.situation_reference == element.situation_reference)
            {
                self.stored.remove(pos);
            }
        }

        let added = new_elements.len();
        self.stored.extend(new_elements.into_iter().map(|mut e| {
            e.strip_data();
            e
        }));
        self.sort_stored();

        tracing::debug!(
            "[TrafficHandler] stored elements {}, new elements {}, removed elements {}",
            self.stored.len(),
            added,
            removed.len()
        );
    }
}
