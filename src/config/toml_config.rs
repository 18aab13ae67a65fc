use crate::utils::error::{IngestError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub service: ServiceConfig,
    pub source: SourceConfig,
    pub modules: ModulesConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub datex: DatexConfig,
    pub categories: Option<CategoriesConfig>,
    pub maps: Option<MapsConfig>,
    pub monitoring: Option<MonitoringConfig>,
    pub environment: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// 情境參照的供應商前綴，例如 `TMC`
    pub provider: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// 本機檔案路徑或 http(s) URL
    pub location: String,
    pub timeout_seconds: Option<u64>,
    pub headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    pub fixture: String,
    pub request_timeout_ms: Option<u64>,
    pub channel_capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub document: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// 每個情境直接新增到交通模組
    Publish,
    /// 與已儲存的事件比對後只送出差異
    #[default]
    Sync,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatexConfig {
    #[serde(default)]
    pub mode: IngestMode,
    /// 固定的「現在」時間（測試用），未設定時使用系統時間
    pub now: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoriesConfig {
    pub tree: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapsConfig {
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub system_stats: Option<bool>,
}

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_DOCUMENT: &str = "traffic_elements.json";

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed_content)?)
    }

    /// 替換 ${VAR_NAME}；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| {
            IngestError::ConfigValidationError {
                field: "environment".to_string(),
                message: e.to_string(),
            }
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });
        Ok(result.into_owned())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("service.name", &self.service.name)?;
        validation::validate_non_empty_string("service.provider", &self.service.provider)?;
        if self.service.provider.contains(':') {
            return Err(IngestError::InvalidConfigValueError {
                field: "service.provider".to_string(),
                value: self.service.provider.clone(),
                reason: "Provider must not contain ':'".to_string(),
            });
        }

        validation::validate_feed_location("source.location", &self.source.location)?;
        if let Some(timeout) = self.source.timeout_seconds {
            validation::validate_positive_number("source.timeout_seconds", timeout, 1)?;
        }

        validation::validate_file_extension("modules.fixture", &self.modules.fixture, &["json"])?;
        if let Some(timeout) = self.modules.request_timeout_ms {
            validation::validate_positive_number("modules.request_timeout_ms", timeout, 1)?;
        }
        if let Some(capacity) = self.modules.channel_capacity {
            validation::validate_positive_number("modules.channel_capacity", capacity as u64, 1)?;
        }

        validation::validate_path("database.path", &self.database.path)?;
        if let Some(document) = &self.database.document {
            validation::validate_file_extension("database.document", document, &["json"])?;
        }

        if let Some(categories) = &self.categories {
            validation::validate_file_extension("categories.tree", &categories.tree, &["toml"])?;
        }
        if let Some(maps) = &self.maps {
            validation::validate_path("maps.directory", &maps.directory)?;
        }
        if let Some(format) = self.monitoring.as_ref().and_then(|m| m.log_format.as_deref()) {
            validation::validate_one_of("monitoring.log_format", format, &["compact", "json"])?;
        }

        Ok(())
    }

    pub fn provider(&self) -> &str {
        &self.service.provider
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.modules
                .request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }

    pub fn channel_capacity(&self) -> usize {
        self.modules.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn database_document(&self) -> &str {
        self.database.document.as_deref().unwrap_or(DEFAULT_DOCUMENT)
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring
            .as_ref()
            .map(|m| m.enabled && m.system_stats.unwrap_or(true))
            .unwrap_or(false)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.monitoring.as_ref().and_then(|m| m.log_level.as_deref())
    }

    pub fn log_format(&self) -> Option<&str> {
        self.monitoring.as_ref().and_then(|m| m.log_format.as_deref())
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[service]
name = "datex-test"
provider = "TMC"

[source]
location = "https://feeds.example.com/situations"
timeout_seconds = 10

[modules]
fixture = "network.json"

[database]
path = "./data"

[datex]
mode = "publish"
"#;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = TomlConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.service.name, "datex-test");
        assert_eq!(config.provider(), "TMC");
        assert_eq!(config.datex.mode, IngestMode::Publish);
        assert_eq!(config.request_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.database_document(), "traffic_elements.json");
        assert!(!config.monitoring_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_defaults_to_sync() {
        let without_datex = BASIC.replace("[datex]\nmode = \"publish\"\n", "");
        let config = TomlConfig::from_toml_str(&without_datex).unwrap();
        assert_eq!(config.datex.mode, IngestMode::Sync);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("DATEX_TEST_FEED_URL", "https://test.feeds.com/datex");

        let content = BASIC.replace(
            "https://feeds.example.com/situations",
            "${DATEX_TEST_FEED_URL}",
        );
        let config = TomlConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.source.location, "https://test.feeds.com/datex");

        std::env::remove_var("DATEX_TEST_FEED_URL");
    }

    #[test]
    fn test_config_validation() {
        let bad_provider = BASIC.replace("provider = \"TMC\"", "provider = \"TMC:x\"");
        let config = TomlConfig::from_toml_str(&bad_provider).unwrap();
        assert!(config.validate().is_err());

        let bad_fixture = BASIC.replace("network.json", "network.xml");
        let config = TomlConfig::from_toml_str(&bad_fixture).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_a_toml_error() {
        let err = TomlConfig::from_toml_str("[service\nname = 1").unwrap_err();
        assert!(matches!(err, IngestError::TomlError(_)));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.service.name, "datex-test");
    }
}
