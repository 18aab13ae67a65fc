use crate::adapters::feed::SituationSource;
use crate::adapters::fixture::{FixtureModules, FixtureNetwork};
use crate::adapters::report::export_disturbances;
use crate::adapters::storage::LocalStorage;
use crate::adapters::traffic_db::JsonTrafficElementDatabase;
use crate::adapters::traffic_ipc::ModuleTrafficIpc;
use crate::adapters::transport::ChannelGateway;
use crate::config::{IngestMode, TomlConfig};
use crate::core::datex_engine::DatexEngine;
use crate::core::traffic_handler::{SyncSummary, TrafficHandler};
use crate::domain::model::TrafficSituation;
use crate::domain::ports::TrafficElementDatabase;
use crate::utils::error::{IngestError, Result};
use crate::utils::monitor::StageMonitor;
use std::sync::Arc;

type Database = JsonTrafficElementDatabase<LocalStorage>;

/// 一次匯入的結果
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub mode: IngestMode,
    pub situations: usize,
    /// publish 模式下成功新增的事件紀錄數
    pub published: usize,
    pub failed_situations: Vec<String>,
    pub sync: Option<SyncSummary>,
}

impl IngestReport {
    pub fn is_ok(&self) -> bool {
        self.failed_situations.is_empty() && self.sync.as_ref().map_or(true, SyncSummary::is_ok)
    }

    /// 有情境或變更集失敗時視為處理錯誤（結束碼 1）
    pub fn exit_code(&self) -> i32 {
        if self.is_ok() {
            0
        } else {
            PARTIAL_FAILURE_EXIT_CODE
        }
    }
}

const PARTIAL_FAILURE_EXIT_CODE: i32 = 1;

/// 不送出模組請求時的情境分類
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRunSummary {
    pub situations: usize,
    pub valid: usize,
    pub expired: usize,
    pub without_location: usize,
}

pub struct IngestService {
    config: TomlConfig,
    monitor: StageMonitor,
}

impl IngestService {
    pub fn new(config: TomlConfig, monitor_enabled: bool) -> Self {
        Self {
            config,
            monitor: StageMonitor::new(monitor_enabled),
        }
    }

    pub fn config(&self) -> &TomlConfig {
        &self.config
    }

    fn now(&self) -> u32 {
        self.config
            .datex
            .now
            .unwrap_or_else(|| chrono::Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32)
    }

    fn source(&self) -> SituationSource {
        let source = &self.config.source;
        SituationSource::from_location(&source.location, source.timeout_seconds)
            .with_headers(source.headers.clone().unwrap_or_default())
    }

    fn database(&self) -> Database {
        JsonTrafficElementDatabase::new(
            LocalStorage::new(&self.config.database.path),
            self.config.database_document(),
        )
    }

    fn gateway(&self, database: Arc<Database>) -> Result<ChannelGateway> {
        let network = FixtureNetwork::load(&self.config.modules.fixture)?;
        let modules = Arc::new(FixtureModules::new(network, database));
        let (gateway, _tasks) = ChannelGateway::spawn_all(1, modules, self.config.channel_capacity());
        Ok(gateway)
    }

    pub async fn load_situations(&self) -> Result<Vec<TrafficSituation>> {
        let situations = self.source().load().await?;
        self.monitor.log_stage("Feed loaded");
        Ok(situations)
    }

    pub async fn dry_run(&self) -> Result<DryRunSummary> {
        let situations = self.load_situations().await?;
        let now = self.now();

        let mut summary = DryRunSummary {
            situations: situations.len(),
            ..Default::default()
        };
        for situation in &situations {
            if situation.is_valid_at(now) {
                summary.valid += 1;
            } else {
                summary.expired += 1;
            }
            let locatable = situation.first_element().is_some_and(|element| {
                !element.first_location.is_empty() || !element.coordinates.is_empty()
            });
            if !locatable {
                summary.without_location += 1;
            }
        }
        tracing::info!(
            "Dry run: {} situations, {} valid, {} expired, {} without location",
            summary.situations,
            summary.valid,
            summary.expired,
            summary.without_location
        );
        Ok(summary)
    }

    pub async fn run(&self) -> Result<IngestReport> {
        self.run_with_mode(self.config.datex.mode).await
    }

    pub async fn run_with_mode(&self, mode: IngestMode) -> Result<IngestReport> {
        tracing::info!(
            "Starting {} ingestion for provider {} ({:?})",
            self.config.service.name,
            self.config.provider(),
            mode
        );
        if self.monitor.is_enabled() {
            tracing::debug!("Stage monitoring active");
        }
        let situations = self.load_situations().await?;
        let database = Arc::new(self.database());
        let gateway = self.gateway(Arc::clone(&database))?;
        let engine = DatexEngine::new(gateway, self.config.request_timeout());
        self.monitor.log_stage("Modules started");

        let report = match mode {
            IngestMode::Publish => self.publish(engine, situations).await?,
            IngestMode::Sync => self.sync(engine, situations).await,
        };
        self.monitor.log_stage("Ingestion finished");

        tracing::info!(
            "Ingestion finished: {} situations, {} published, {} failed",
            report.situations,
            report.published,
            report.failed_situations.len()
        );
        Ok(report)
    }

    async fn publish(
        &self,
        engine: DatexEngine<ChannelGateway>,
        situations: Vec<TrafficSituation>,
    ) -> Result<IngestReport> {
        let now = self.now();
        let total = situations.len();
        let (valid, expired): (Vec<_>, Vec<_>) =
            situations.into_iter().partition(|s| s.is_valid_at(now));
        if !expired.is_empty() {
            tracing::info!("Skipping {} expired situations", expired.len());
        }

        let references: Vec<String> = valid.iter().map(|s| s.situation_reference.clone()).collect();
        let outcomes = engine.publish_each(valid).await?;

        let mut report = IngestReport {
            mode: IngestMode::Publish,
            situations: total,
            published: 0,
            failed_situations: Vec::new(),
            sync: None,
        };
        for (reference, outcome) in references.into_iter().zip(outcomes) {
            if outcome.is_ok() {
                report.published += outcome.published.len();
            } else {
                tracing::warn!(
                    "Situation {} failed: {}",
                    reference,
                    outcome.error.as_deref().unwrap_or("unknown")
                );
                report.failed_situations.push(reference);
            }
        }
        Ok(report)
    }

    async fn sync(&self, engine: DatexEngine<ChannelGateway>, situations: Vec<TrafficSituation>) -> IngestReport {
        let mut handler = TrafficHandler::new(self.config.provider(), ModuleTrafficIpc::new(engine));
        handler.setup().await;
        self.monitor.log_stage("Stored disturbances fetched");

        let summary = handler
            .process_situations_with_summary(&situations, self.now())
            .await;
        IngestReport {
            mode: IngestMode::Sync,
            situations: situations.len(),
            published: summary.new_elements,
            failed_situations: Vec::new(),
            sync: Some(summary),
        }
    }

    /// 匯出供應商的事件紀錄，回傳列數
    pub async fn export(&self, output: &str) -> Result<usize> {
        let elements = self
            .database()
            .fetch_all_disturbances(self.config.provider())
            .await?;
        if elements.is_empty() {
            tracing::warn!("No stored disturbances for {}", self.config.provider());
        }
        let rows = export_disturbances(&LocalStorage::new("."), output, &elements).await?;
        tracing::info!("Exported {} rows to {}", rows, output);
        Ok(rows)
    }
}

/// 解析 `--mode` 覆蓋值
pub fn parse_mode(value: &str) -> Result<IngestMode> {
    match value.to_ascii_lowercase().as_str() {
        "publish" => Ok(IngestMode::Publish),
        "sync" => Ok(IngestMode::Sync),
        _ => Err(IngestError::InvalidConfigValueError {
            field: "datex.mode".to_string(),
            value: value.to_string(),
            reason: "Valid values: publish, sync".to_string(),
        }),
    }
}
