use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Feed request failed: {0}")]
    FeedError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Packet codec error: {0}")]
    CodecError(#[from] crate::core::codec::CodecError),

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Module {module} replied {status}: {message}")]
    ModuleReplyError {
        module: String,
        status: String,
        message: String,
    },

    #[error("Module {module} did not answer within {timeout_ms} ms")]
    ModuleTimeoutError { module: String, timeout_ms: u64 },

    #[error("Module transport closed: {module}")]
    TransportError { module: String },

    #[error("Traffic database error: {message}")]
    DatabaseError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

/// 錯誤分類，用於日誌與結束碼
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Module,
    Storage,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IngestError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            IngestError::MissingConfigError { .. }
            | IngestError::InvalidConfigValueError { .. }
            | IngestError::ConfigValidationError { .. }
            | IngestError::TomlError(_) => ErrorCategory::Configuration,
            IngestError::FeedError(_) => ErrorCategory::Network,
            IngestError::ModuleReplyError { .. }
            | IngestError::ModuleTimeoutError { .. }
            | IngestError::TransportError { .. } => ErrorCategory::Module,
            IngestError::IoError(_) | IngestError::DatabaseError { .. } => ErrorCategory::Storage,
            IngestError::SerializationError(_)
            | IngestError::CsvError(_)
            | IngestError::CodecError(_)
            | IngestError::ProcessingError { .. } => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 逾時與網路錯誤通常重試即可
            IngestError::ModuleTimeoutError { .. } | IngestError::FeedError(_) => {
                ErrorSeverity::Medium
            }
            IngestError::ModuleReplyError { .. }
            | IngestError::ProcessingError { .. }
            | IngestError::SerializationError(_)
            | IngestError::CsvError(_)
            | IngestError::CodecError(_) => ErrorSeverity::High,
            IngestError::MissingConfigError { .. }
            | IngestError::InvalidConfigValueError { .. }
            | IngestError::ConfigValidationError { .. }
            | IngestError::TomlError(_) => ErrorSeverity::High,
            IngestError::IoError(_)
            | IngestError::DatabaseError { .. }
            | IngestError::TransportError { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the TOML configuration file and CLI overrides",
            ErrorCategory::Network => "Verify the feed URL is reachable and retry",
            ErrorCategory::Module => "Check that the module network description covers the situation",
            ErrorCategory::Storage => "Check the database path permissions and free disk space",
            ErrorCategory::Data => "Inspect the feed or packet contents for malformed data",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            IngestError::MissingConfigError { field } => {
                format!("Configuration is missing required field '{}'", field)
            }
            IngestError::InvalidConfigValueError { field, reason, .. } => {
                format!("Configuration field '{}' is invalid: {}", field, reason)
            }
            IngestError::ModuleTimeoutError { module, .. } => {
                format!("The {} module did not answer in time", module)
            }
            other => other.to_string(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        IngestError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        IngestError::DatabaseError {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_maps_to_category() {
        let timeout = IngestError::ModuleTimeoutError {
            module: "map".to_string(),
            timeout_ms: 100,
        };
        assert_eq!(timeout.category(), ErrorCategory::Module);
        assert_eq!(timeout.severity(), ErrorSeverity::Medium);

        let missing = IngestError::MissingConfigError {
            field: "service.provider".to_string(),
        };
        assert_eq!(missing.category(), ErrorCategory::Configuration);
        assert!(missing.user_friendly_message().contains("service.provider"));
    }

    #[test]
    fn test_database_errors_are_critical() {
        let err = IngestError::database("document unreadable");
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.to_string(), "Traffic database error: document unreadable");
    }
}
