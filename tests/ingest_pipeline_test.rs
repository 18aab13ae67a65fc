use anyhow::Result;
use datex_ingest::{IngestMode, IngestService, TomlConfig};
use httpmock::prelude::*;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn network_fixture() -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos/network.json")
        .display()
        .to_string()
}

fn situation(reference: &str, expiry_time: u32, coordinates: serde_json::Value) -> serde_json::Value {
    json!({
        "situation_reference": reference,
        "location_table": "SE1",
        "elements": [{
            "start_time": 1000,
            "expiry_time": expiry_time,
            "creation_time": 900,
            "disturbance_type": 0,
            "phrase": 8,
            "severity": "QueuingTraffic",
            "severity_factor": "Medium",
            "direction": "Positive",
            "coordinates": coordinates
        }]
    })
}

fn write_feed(dir: &TempDir, situations: &[serde_json::Value]) -> Result<String> {
    let path = dir.path().join("situations.json");
    std::fs::write(&path, serde_json::to_vec(&json!({ "situations": situations }))?)?;
    Ok(path.display().to_string())
}

fn config(dir: &TempDir, location: &str, mode: &str) -> Result<TomlConfig> {
    let content = format!(
        r#"
[service]
name = "ingest-test"
provider = "TMC"

[source]
location = "{location}"
timeout_seconds = 5

[modules]
fixture = "{fixture}"
request_timeout_ms = 2000
channel_capacity = 8

[database]
path = "{db}"

[datex]
mode = "{mode}"
now = 1500
"#,
        location = location,
        fixture = network_fixture(),
        db = dir.path().join("db").display(),
        mode = mode
    );
    Ok(TomlConfig::from_toml_str(&content)?)
}

fn route_situation(reference: &str) -> serde_json::Value {
    situation(
        reference,
        2000,
        json!([{ "lat": 0, "lon": 20000 }, { "lat": 0, "lon": 0 }]),
    )
}

#[tokio::test]
async fn test_sync_adds_then_removes_situations() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let expired = situation("TMC:old", 10, json!([{ "lat": 0, "lon": 10000 }]));
    let feed = write_feed(&temp_dir, &[route_situation("TMC:route"), expired])?;
    let config = config(&temp_dir, &feed, "sync")?;
    assert!(datex_ingest::utils::validation::Validate::validate(&config).is_ok());

    let service = IngestService::new(config.clone(), false);
    let report = service.run().await?;
    let sync = report.sync.clone().expect("sync summary");
    assert!(report.is_ok());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.mode, IngestMode::Sync);
    assert_eq!(sync.new_situations, 1);
    assert_eq!(sync.expired, 1);
    assert_eq!(sync.new_elements, 2);
    assert!(temp_dir.path().join("db/traffic_elements.json").exists());

    // 同一份資料再跑一次：情境保留，不再新增
    let report = IngestService::new(config.clone(), false).run().await?;
    let sync = report.sync.expect("sync summary");
    assert_eq!(sync.kept, 1);
    assert_eq!(sync.expired, 1);
    assert_eq!(sync.new_elements, 0);
    assert_eq!(sync.removed_elements, 0);

    // 情境從資料來源消失後，已儲存的事件被刪除
    write_feed(&temp_dir, &[])?;
    let report = IngestService::new(config.clone(), false).run().await?;
    let sync = report.sync.expect("sync summary");
    assert_eq!(sync.removed_elements, 2);

    let output = temp_dir.path().join("export.csv").display().to_string();
    let rows = IngestService::new(config, false).export(&output).await?;
    assert_eq!(rows, 0);
    Ok(())
}

#[tokio::test]
async fn test_publish_from_http_feed_and_export() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start();
    let feed_mock = server.mock(|when, then| {
        when.method(GET).path("/datex/situations");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!([
                route_situation("TMC:route"),
                situation("TMC:nowhere", 2000, json!([{ "lat": 9000000, "lon": 9000000 }]))
            ]));
    });

    let config = config(&temp_dir, &server.url("/datex/situations"), "publish")?;
    let service = IngestService::new(config, false);
    let report = service.run().await?;

    feed_mock.assert();
    assert_eq!(report.mode, IngestMode::Publish);
    assert_eq!(report.situations, 2);
    assert!(report.published >= 1);
    assert_eq!(report.failed_situations, vec!["TMC:nowhere".to_string()]);
    assert!(!report.is_ok());
    assert_eq!(report.exit_code(), 1);

    let output = temp_dir.path().join("out/disturbances.csv");
    let rows = service.export(&output.display().to_string()).await?;
    assert!(rows >= 2);

    let csv = std::fs::read_to_string(&output)?;
    assert!(csv.starts_with("situation_reference,disturbance_id,map_id"));
    assert!(csv.lines().skip(1).all(|line| line.starts_with("TMC:route,")));
    Ok(())
}

#[tokio::test]
async fn test_dry_run_classifies_feed() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let unlocated = json!({
        "situation_reference": "TMC:empty",
        "elements": [{
            "start_time": 0, "expiry_time": 5000, "creation_time": 0,
            "disturbance_type": 0, "phrase": 0, "severity": "NoSeverity",
            "direction": "NoDirection"
        }]
    });
    let feed = write_feed(
        &temp_dir,
        &[
            route_situation("TMC:route"),
            situation("TMC:old", 10, json!([{ "lat": 0, "lon": 0 }])),
            unlocated,
        ],
    )?;

    let summary = IngestService::new(config(&temp_dir, &feed, "sync")?, false)
        .dry_run()
        .await?;
    assert_eq!(summary.situations, 3);
    assert_eq!(summary.valid, 2);
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.without_location, 1);
    assert!(!temp_dir.path().join("db").exists());
    Ok(())
}

#[tokio::test]
async fn test_missing_network_fixture_fails_before_any_request() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let feed = write_feed(&temp_dir, &[route_situation("TMC:route")])?;
    let mut config = config(&temp_dir, &feed, "sync")?;
    config.modules.fixture = temp_dir.path().join("missing.json").display().to_string();

    let err = IngestService::new(config, false).run().await.unwrap_err();
    assert!(matches!(err, datex_ingest::IngestError::IoError(_)));
    Ok(())
}
