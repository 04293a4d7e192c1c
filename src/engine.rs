//! エンジンファサード
//!
//! サンプラー・検知器・戦略レジストリ・スケジューラーを束ね、
//! ライフサイクル制御と状態の読み書きを提供する唯一の窓口。

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus, EventSubscription, SubscriptionId};
use crate::mitigation::{
    builtin_strategies, MitigationLaunch, MitigationScheduler, MitigationStrategy, StrategyInfo,
    StrategyRegistry,
};
use crate::monitoring::{
    Bottleneck, BottleneckDetector, MetricSource, MetricsSampler, SystemSnapshot, ThresholdTable,
    ThresholdUpdate,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// ホスト向けの状態スナップショット
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub snapshot: Option<Arc<SystemSnapshot>>,
    pub bottlenecks: Vec<Bottleneck>,
    pub strategies: Vec<StrategyInfo>,
    pub thresholds: ThresholdTable,
}

/// 起動中の周期タスク
struct RunningLoops {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// ボトルネック検知・緩和エンジン
pub struct BottleneckEngine {
    config: EngineConfig,
    sampler: Arc<MetricsSampler>,
    detector: Arc<BottleneckDetector>,
    registry: Arc<StrategyRegistry>,
    scheduler: Arc<MitigationScheduler>,
    events: EventBus,
    // エンジンが破棄されると停止シグナルの送信側も破棄され、周期タスクは終了する
    loops: Mutex<Option<RunningLoops>>,
    terminated: AtomicBool,
}

impl BottleneckEngine {
    /// 組み込み戦略を登録したエンジンを作成
    ///
    /// 設定の検証は `start()` で行う。
    pub fn new(config: EngineConfig, source: Arc<dyn MetricSource>) -> Self {
        Self::with_strategies(config, source, builtin_strategies())
    }

    /// 初期戦略を指定してエンジンを作成
    pub fn with_strategies(
        config: EngineConfig,
        source: Arc<dyn MetricSource>,
        strategies: impl IntoIterator<Item = MitigationStrategy>,
    ) -> Self {
        let events = EventBus::new(config.events.capacity);

        let sampler = MetricsSampler::new(source, events.clone()).with_timeout(config.sampler.timeout());
        let detector = BottleneckDetector::new(config.thresholds.clone())
            .with_dedup_window(config.lifecycle.dedup_window())
            .with_purge_grace(config.lifecycle.purge_grace());
        let registry = Arc::new(StrategyRegistry::with_strategies(strategies));
        let scheduler = MitigationScheduler::new(Arc::clone(&registry), events.clone());

        Self {
            config,
            sampler: Arc::new(sampler),
            detector: Arc::new(detector),
            registry,
            scheduler: Arc::new(scheduler),
            events,
            loops: Mutex::new(None),
            terminated: AtomicBool::new(false),
        }
    }

    /// 設定を取得
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 周期タスクを開始（起動済みなら何もしない）
    pub async fn start(&self) -> Result<()> {
        self.ensure_alive()?;
        self.config.validate_config()?;

        let mut loops = self.loops.lock().await;
        // 待機中に shutdown された場合はここで止める
        self.ensure_alive()?;
        if loops.is_some() {
            debug!("Engine already running");
            return Ok(());
        }

        let (stop, stop_rx) = watch::channel(false);
        let handles = vec![
            self.spawn_detection_loop(stop_rx.clone()),
            self.spawn_mitigation_loop(stop_rx),
        ];
        *loops = Some(RunningLoops { stop, handles });

        info!(
            sample_interval_ms = self.config.sampler.interval_ms,
            schedule_interval_ms = self.config.scheduler.interval_ms,
            "🚀 Bottleneck engine started"
        );
        Ok(())
    }

    /// 周期タスクを停止（停止済みなら何もしない）
    ///
    /// 実行中のティックの完了を待ってから戻る。起動済みの緩和アクションは中断しない。
    pub async fn stop(&self) -> Result<()> {
        let running = self.loops.lock().await.take();
        let Some(RunningLoops { stop, handles }) = running else {
            return Ok(());
        };

        let _ = stop.send(true);
        for handle in handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "Engine loop ended abnormally");
            }
        }

        info!("🛑 Bottleneck engine stopped");
        Ok(())
    }

    /// 停止して全ての状態を破棄する
    ///
    /// 以降の開始や変更操作は `Terminated` を返す。
    pub async fn shutdown(&self) -> Result<()> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.stop().await?;
        self.detector.clear().await;
        self.registry.clear().await;
        self.sampler.clear().await;
        self.events.detach_all();

        info!("Bottleneck engine shut down");
        Ok(())
    }

    /// 周期タスクが動作中かどうか
    pub async fn is_running(&self) -> bool {
        self.loops.lock().await.is_some()
    }

    /// 最新のスナップショット
    pub async fn snapshot(&self) -> Option<Arc<SystemSnapshot>> {
        self.sampler.latest().await
    }

    /// 保持期間中の解決済みを含むボトルネック一覧
    pub async fn active_bottlenecks(&self) -> Vec<Bottleneck> {
        self.detector.list().await
    }

    /// 登録済み戦略の一覧
    pub async fn strategies(&self) -> Vec<StrategyInfo> {
        self.registry.list().await
    }

    /// 現在の閾値テーブル
    pub async fn thresholds(&self) -> ThresholdTable {
        self.detector.thresholds().await
    }

    /// ホスト向けの状態をまとめて取得
    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running().await,
            snapshot: self.snapshot().await,
            bottlenecks: self.active_bottlenecks().await,
            strategies: self.strategies().await,
            thresholds: self.thresholds().await,
        }
    }

    /// ボトルネックを解決済みにする
    pub async fn resolve_bottleneck(
        &self,
        id: &str,
        resolution: impl Into<String>,
    ) -> Result<Bottleneck> {
        self.ensure_alive()?;

        let resolved = self.detector.resolve(id, resolution).await?;
        self.events
            .publish(EngineEvent::BottleneckResolved(resolved.clone()));
        Ok(resolved)
    }

    /// 戦略を追加（次のスケジューリングティックから有効）
    pub async fn add_strategy(&self, strategy: MitigationStrategy) -> Result<()> {
        self.ensure_alive()?;
        self.registry.add(strategy).await
    }

    /// 戦略を削除
    pub async fn remove_strategy(&self, id: &str) -> Result<StrategyInfo> {
        self.ensure_alive()?;
        self.registry.remove(id).await
    }

    /// 戦略の有効/無効を切り替え
    pub async fn set_strategy_enabled(&self, id: &str, enabled: bool) -> Result<StrategyInfo> {
        self.ensure_alive()?;
        self.registry.set_enabled(id, enabled).await
    }

    /// 閾値を部分更新（次の検知ティックから有効）
    pub async fn update_thresholds(&self, update: ThresholdUpdate) -> Result<ThresholdTable> {
        self.ensure_alive()?;
        self.detector.update_thresholds(&update).await
    }

    /// イベントを購読
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// 購読を解除
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// サンプリングと検知を1回実行
    pub async fn sample_now(&self) -> Result<Arc<SystemSnapshot>> {
        self.ensure_alive()?;
        run_detection_cycle(&self.sampler, &self.detector, &self.events).await
    }

    /// スケジューリングを1回実行
    pub async fn mitigate_now(&self) -> Result<Option<MitigationLaunch>> {
        self.ensure_alive()?;
        match self.sampler.latest().await {
            Some(snapshot) => Ok(self.scheduler.tick(&snapshot).await),
            None => Ok(None),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            Err(Error::Terminated)
        } else {
            Ok(())
        }
    }

    fn spawn_detection_loop(&self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let sampler = Arc::clone(&self.sampler);
        let detector = Arc::clone(&self.detector);
        let events = self.events.clone();

        spawn_periodic(self.config.sampler.interval(), stop, move || {
            let sampler = Arc::clone(&sampler);
            let detector = Arc::clone(&detector);
            let events = events.clone();
            async move {
                if let Err(e) = run_detection_cycle(&sampler, &detector, &events).await {
                    debug!(error = %e, "Detection tick skipped");
                }
            }
        })
    }

    fn spawn_mitigation_loop(&self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let sampler = Arc::clone(&self.sampler);
        let scheduler = Arc::clone(&self.scheduler);

        spawn_periodic(self.config.scheduler.interval(), stop, move || {
            let sampler = Arc::clone(&sampler);
            let scheduler = Arc::clone(&scheduler);
            async move {
                if let Some(snapshot) = sampler.latest().await {
                    // 起動したアクションは待たずに切り離す
                    let _ = scheduler.tick(&snapshot).await;
                }
            }
        })
    }
}

/// サンプリング → 期限切れの掃除 → 検知
///
/// ソースが失敗した場合はボトルネックの状態に触れない。
async fn run_detection_cycle(
    sampler: &MetricsSampler,
    detector: &BottleneckDetector,
    events: &EventBus,
) -> Result<Arc<SystemSnapshot>> {
    let count = detector.unresolved_count().await;
    let snapshot = sampler.sample(count).await?;

    for purged in detector.purge_expired().await {
        events.publish(EngineEvent::BottleneckPurged(purged));
    }
    for detected in detector.detect(&snapshot).await {
        events.publish(EngineEvent::BottleneckDetected(detected));
    }

    Ok(snapshot)
}

/// 停止シグナルを受けるまで一定間隔で `tick` を実行する
///
/// 処理が間隔を超えた場合、遅れたティックは重ねずに読み飛ばす。
fn spawn_periodic<F, Fut>(period: Duration, mut stop: watch::Receiver<bool>, tick: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => tick().await,
            }
        }
    })
}
