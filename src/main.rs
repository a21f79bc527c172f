use anyhow::Context;
use clap::Parser;
use collabtract::domain::model::{PlanReport, PlanResponse};
use collabtract::utils::error::{ErrorSeverity, TractError};
use collabtract::utils::monitor::StageMonitor;
use collabtract::utils::{logger, validation::Validate};
use collabtract::{BanAddressRepository, CliConfig, LocalStorage, MunicipalityIndex, Planner};
use std::sync::Arc;

fn exit_code_for(e: &TractError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,      // 查無結果，報告照常輸出
        ErrorSeverity::Medium => 2,   // 資料暫時取不到，可重試
        ErrorSeverity::High => 1,     // 參數或配置錯誤
        ErrorSeverity::Critical => 3, // 資料格式或系統錯誤
    }
}

fn fail(e: &TractError) -> ! {
    tracing::error!(
        "❌ {} (Kind: {:?}, Severity: {:?})",
        e,
        e.kind(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    std::process::exit(exit_code_for(e).max(1));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting collabtract");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    // 驗證配置
    if let Err(e) = cli.validate() {
        fail(&e);
    }
    let settings = match cli.load_settings() {
        Ok(settings) => settings,
        Err(e) => fail(&e),
    };

    let monitor = StageMonitor::new(cli.monitor);
    if monitor.is_enabled() {
        tracing::info!("🔍 System monitoring enabled");
    }

    // 沒有市鎮參考資料就無法解析任何城市
    let index_path = settings.data.municipalities_path.clone();
    let index = match tokio::task::spawn_blocking(move || MunicipalityIndex::load(&index_path))
        .await
    {
        Ok(Ok(index)) => Arc::new(index),
        Ok(Err(e)) => fail(&e),
        Err(e) => fail(&TractError::WorkerError {
            message: e.to_string(),
        }),
    };
    monitor.log_stage("Municipality index loaded");

    let storage = LocalStorage::new(settings.data.cache_dir.clone());
    let repository = match BanAddressRepository::new(
        storage,
        settings.data.ban_base_url.clone(),
        settings.request_timeout(),
    ) {
        Ok(repository) => Arc::new(repository),
        Err(e) => fail(&e),
    };

    let request = cli.to_request(&settings);
    let planner = Planner::new(index, repository, settings);

    let result = planner.plan(&request).await;
    monitor.log_stage("Routes planned");

    let exit_code = match &result {
        Ok(_) => 0,
        Err(e) => {
            tracing::error!("❌ Planning failed: {} (Kind: {:?})", e, e.kind());
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            exit_code_for(e)
        }
    };

    let report = PlanReport {
        generated_at: chrono::Utc::now(),
        request,
        response: PlanResponse::from(result),
    };
    let json = serde_json::to_string_pretty(&report).context("serializing plan report")?;

    match &cli.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("writing report to {}", path))?;
            tracing::info!("📁 Report saved to: {}", path);
        }
        None => println!("{}", json),
    }

    if exit_code > 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
