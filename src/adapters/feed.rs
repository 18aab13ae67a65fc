use crate::domain::model::TrafficSituation;
use crate::utils::error::Result;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// 情境來源：本機檔案或 HTTP(S) URL
#[derive(Debug, Clone)]
pub enum SituationSource {
    File(PathBuf),
    Http {
        url: String,
        timeout: Option<Duration>,
        headers: HashMap<String, String>,
    },
}

/// 接受陣列或 `{ "situations": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum FeedDocument {
    List(Vec<TrafficSituation>),
    Wrapped { situations: Vec<TrafficSituation> },
}

impl FeedDocument {
    fn into_situations(self) -> Vec<TrafficSituation> {
        match self {
            FeedDocument::List(situations) | FeedDocument::Wrapped { situations } => situations,
        }
    }
}

impl SituationSource {
    pub fn from_location(location: &str, timeout_seconds: Option<u64>) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            SituationSource::Http {
                url: location.to_string(),
                timeout: timeout_seconds.map(Duration::from_secs),
                headers: HashMap::new(),
            }
        } else {
            SituationSource::File(PathBuf::from(location))
        }
    }

    pub fn with_headers(mut self, extra: HashMap<String, String>) -> Self {
        if let SituationSource::Http { headers, .. } = &mut self {
            headers.extend(extra);
        }
        self
    }

    pub fn describe(&self) -> String {
        match self {
            SituationSource::File(path) => path.display().to_string(),
            SituationSource::Http { url, .. } => url.clone(),
        }
    }

    pub async fn load(&self) -> Result<Vec<TrafficSituation>> {
        let situations = match self {
            SituationSource::File(path) => {
                let data = tokio::fs::read(path).await?;
                serde_json::from_slice::<FeedDocument>(&data)?.into_situations()
            }
            SituationSource::Http {
                url,
                timeout,
                headers,
            } => {
                let mut request = Client::new().get(url);
                for (key, value) in headers {
                    request = request.header(key, value);
                }
                if let Some(timeout) = timeout {
                    request = request.timeout(*timeout);
                }

                tracing::debug!("Fetching situations from {}", url);
                let response = request.send().await?.error_for_status()?;
                tracing::debug!("Feed response status: {}", response.status());
                let data = response.bytes().await?;
                serde_json::from_slice::<FeedDocument>(&data)?.into_situations()
            }
        };
        tracing::info!(
            "Loaded {} situations from {}",
            situations.len(),
            self.describe()
        );
        Ok(situations)
    }
}
