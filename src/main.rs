use clap::Parser;
use datex_ingest::app::{self, parse_mode, IngestService};
use datex_ingest::utils::error::{ErrorSeverity, IngestError};
use datex_ingest::utils::logger::{self, LogFormat};
use datex_ingest::utils::validation::Validate;
use datex_ingest::{Cli, Command, TomlConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 讀取配置；日誌設定也來自配置檔，所以先載入再初始化日誌
    let config = match TomlConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logger::init_cli_logger(cli.verbose, None, LogFormat::Compact);
            tracing::error!("❌ Failed to load configuration {}: {}", cli.config, e);
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(exit_code(&e).max(1));
        }
    };

    logger::init_cli_logger(
        cli.verbose,
        config.log_level(),
        config.log_format().map(LogFormat::from_name).unwrap_or(LogFormat::Compact),
    );
    tracing::info!("Starting datex-ingest ({})", config.service.name);
    if cli.verbose {
        tracing::debug!("CLI arguments: {:?}", cli);
    }

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let monitor_enabled = cli.monitor.unwrap_or_else(|| config.monitoring_enabled());
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    match run(cli.command, config, monitor_enabled).await {
        Ok(0) => {}
        // 部分情境或變更集失敗
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(
                "❌ datex-ingest failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            let code = exit_code(&e);
            if code > 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}

async fn run(
    command: Command,
    config: TomlConfig,
    monitor_enabled: bool,
) -> datex_ingest::Result<i32> {
    match command {
        Command::Ingest { dry_run, mode } => {
            let mode = mode.as_deref().map(parse_mode).transpose()?;
            let service = IngestService::new(config, monitor_enabled);

            if dry_run {
                let summary = service.dry_run().await?;
                println!(
                    "🔎 {} situations: {} valid, {} expired, {} without location",
                    summary.situations, summary.valid, summary.expired, summary.without_location
                );
                return Ok(0);
            }

            let report = match mode {
                Some(mode) => service.run_with_mode(mode).await?,
                None => service.run().await?,
            };
            if report.is_ok() {
                println!("✅ Ingestion completed successfully!");
            } else {
                println!("⚠️  Ingestion completed with failures");
            }
            println!(
                "📊 {} situations, {} disturbances published",
                report.situations, report.published
            );
            if let Some(sync) = &report.sync {
                println!(
                    "🔄 kept {}, new situations {}, expired {}, removed elements {}",
                    sync.kept, sync.new_situations, sync.expired, sync.removed_elements
                );
                if !sync.failed_maps.is_empty() {
                    println!("❗ Changesets failed for maps: {:?}", sync.failed_maps);
                }
            }
            for reference in &report.failed_situations {
                println!("❗ {}", reference);
            }
            return Ok(report.exit_code());
        }
        Command::Categories { find, lang, exact } => {
            let listing = app::list_categories(&config, find.as_deref(), lang.as_deref(), exact)?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Command::Maps { level } => {
            let status = app::map_status(&config, &level)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Export { output } => {
            let service = IngestService::new(config, monitor_enabled);
            let rows = service.export(&output).await?;
            println!("✅ Exported {} rows", rows);
            println!("📁 Output saved to: {}", output);
        }
    }
    Ok(0)
}

/// 根據錯誤嚴重程度決定退出碼
fn exit_code(e: &IngestError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,      // 警告，但成功
        ErrorSeverity::Medium => 2,   // 重試錯誤
        ErrorSeverity::High => 1,     // 處理錯誤
        ErrorSeverity::Critical => 3, // 系統錯誤
    }
}
