use anyhow::Result;
use bottleneck_rs::logging::init_logging;
use bottleneck_rs::{BottleneckEngine, ConfigLoader, EngineEvent, SimulatedMetricSource};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// ボトルネック検知・緩和エンジンをシミュレーションソースで実行する
#[derive(Debug, Parser)]
#[command(name = "bottleneck-rs", version, about)]
struct Cli {
    /// 設定ファイル（TOML）
    #[arg(short, long, env = "BOTTLENECK_CONFIG")]
    config: Option<PathBuf>,

    /// 実行時間（秒）。省略時は Ctrl+C まで実行
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// ログレベルを上書き
    #[arg(short, long)]
    log_level: Option<String>,

    /// シミュレーションの乱数シード
    #[arg(long)]
    seed: Option<u64>,

    /// 最終的な設定を TOML で出力して終了
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new()
        .load_from_file(cli.config.clone())
        .load_from_env()
        .build()?;
    if let Some(level) = &cli.log_level {
        config.logging = config.logging.with_level(level.clone());
    }

    if cli.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.logging)?;

    let source = match cli.seed {
        Some(seed) => SimulatedMetricSource::with_seed(seed),
        None => SimulatedMetricSource::new(),
    };
    let engine = Arc::new(BottleneckEngine::new(config, Arc::new(source)));

    let mut subscription = engine.subscribe();
    let reporter = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            report(&event);
        }
    });

    engine.start().await?;

    match cli.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    let status = engine.status().await;
    info!(
        bottlenecks = status.bottlenecks.len(),
        health = status
            .snapshot
            .as_ref()
            .map(|s| s.health.as_str())
            .unwrap_or("unknown"),
        "Final engine status"
    );

    engine.shutdown().await?;
    let _ = reporter.await;

    Ok(())
}

fn report(event: &EngineEvent) {
    match event {
        EngineEvent::MetricsUpdated(snapshot) => info!(
            cpu = snapshot.cpu_usage,
            memory = snapshot.memory_usage,
            health = %snapshot.health,
            "📊 Metrics updated"
        ),
        EngineEvent::BottleneckDetected(b) => warn!(
            id = %b.id,
            kind = %b.bottleneck_type,
            severity = ?b.severity,
            impact = b.impact,
            "⚠️ {}",
            b.description
        ),
        EngineEvent::BottleneckResolved(b) | EngineEvent::BottleneckPurged(b) => {
            info!(id = %b.id, event = event.name(), "Bottleneck lifecycle")
        }
        EngineEvent::MitigationTriggered {
            strategy_id,
            priority,
        } => info!(strategy = %strategy_id, priority, "🔧 Mitigation triggered"),
        EngineEvent::MitigationCompleted { strategy_id } => {
            info!(strategy = %strategy_id, "✅ Mitigation completed")
        }
        EngineEvent::MitigationFailed { strategy_id, error } => {
            warn!(strategy = %strategy_id, error = %error, "❌ Mitigation failed")
        }
        EngineEvent::Redistribution(signal) => info!(signal = ?signal, "Redistribution requested"),
    }
}
