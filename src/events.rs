//! エンジンイベント通知
//!
//! 明示的な subscribe / unsubscribe を持つブロードキャスト型の通知チャンネル。
//! 購読者がいなくても送信側はブロックしない。

use crate::monitoring::{Bottleneck, SystemSnapshot};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// 下流コンポーネント向けの再分配シグナル
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RedistributionSignal {
    /// 全体の安定化要求
    EmergencyStabilizeRequested { health: String },
    /// CPU負荷の再分配要求
    CpuRebalanceRequested { cpu_usage: f64 },
    /// メモリ解放要求
    MemoryCleanupRequested { memory_usage: f64 },
    /// ワーカープール拡張要求
    WorkerPoolExpansionRequested { worker_utilization: f64 },
    /// ワーカー効率改善要求
    WorkerEfficiencyBoostRequested { worker_efficiency: f64 },
    /// パイプライン流量最適化要求
    PipelineFlowOptimizationRequested { pipeline_throughput: f64 },
}

/// エンジンが発行するイベント
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    MetricsUpdated(Arc<SystemSnapshot>),
    BottleneckDetected(Bottleneck),
    BottleneckResolved(Bottleneck),
    BottleneckPurged(Bottleneck),
    MitigationTriggered { strategy_id: String, priority: i32 },
    MitigationCompleted { strategy_id: String },
    MitigationFailed { strategy_id: String, error: String },
    Redistribution(RedistributionSignal),
}

impl EngineEvent {
    /// イベント名を取得
    pub fn name(&self) -> &'static str {
        match self {
            Self::MetricsUpdated(_) => "metrics_updated",
            Self::BottleneckDetected(_) => "bottleneck_detected",
            Self::BottleneckResolved(_) => "bottleneck_resolved",
            Self::BottleneckPurged(_) => "bottleneck_purged",
            Self::MitigationTriggered { .. } => "mitigation_triggered",
            Self::MitigationCompleted { .. } => "mitigation_completed",
            Self::MitigationFailed { .. } => "mitigation_failed",
            Self::Redistribution(_) => "redistribution",
        }
    }
}

/// 購読ID
pub type SubscriptionId = u64;

/// イベントバス
///
/// クローンは同じチャンネルを共有する。
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

#[derive(Debug)]
struct EventBusInner {
    sender: RwLock<Option<broadcast::Sender<EngineEvent>>>,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<AtomicBool>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// 新しいイベントバスを作成
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            inner: Arc::new(EventBusInner {
                sender: RwLock::new(Some(sender)),
                subscriptions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// イベントを送信（受信者がいなければ破棄）
    pub fn publish(&self, event: EngineEvent) {
        let sender = match self.inner.sender.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let Some(sender) = sender else {
            return;
        };

        let name = event.name();
        if sender.send(event).is_err() {
            debug!(event = name, "No subscribers attached, event dropped");
        }
    }

    /// 購読を開始
    ///
    /// 切り離し済みのバスに対しては、即座に終了する購読を返す。
    pub fn subscribe(&self) -> EventSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        let receiver = match self.inner.sender.read() {
            Ok(guard) => guard.as_ref().map(broadcast::Sender::subscribe),
            Err(poisoned) => poisoned.into_inner().as_ref().map(broadcast::Sender::subscribe),
        };

        match receiver {
            Some(_) => {
                let mut subscriptions = match self.inner.subscriptions.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                subscriptions.insert(id, Arc::clone(&active));
            }
            None => active.store(false, Ordering::SeqCst),
        }

        EventSubscription {
            id,
            receiver,
            active,
        }
    }

    /// 購読を解除
    ///
    /// 戻り値は該当する購読が存在したかどうか。
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = match self.inner.subscriptions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match subscriptions.remove(&id) {
            Some(active) => {
                active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// 現在の購読数
    pub fn subscriber_count(&self) -> usize {
        match self.inner.subscriptions.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// 全ての購読者を切り離し、以降の送信を無効化する
    pub fn detach_all(&self) {
        {
            let mut subscriptions = match self.inner.subscriptions.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (_, active) in subscriptions.drain() {
                active.store(false, Ordering::SeqCst);
            }
        }

        let mut sender = match self.inner.sender.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sender.take();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// イベント購読
#[derive(Debug)]
pub struct EventSubscription {
    id: SubscriptionId,
    receiver: Option<broadcast::Receiver<EngineEvent>>,
    active: Arc<AtomicBool>,
}

impl EventSubscription {
    /// 購読ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// 購読が有効かどうか
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 次のイベントを待機
    ///
    /// 購読解除またはバスの切り離し後は `None` を返す。
    /// 受信が追いつかず取りこぼした分は読み飛ばす。
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            if !self.is_active() {
                return None;
            }

            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => {
                    if !self.is_active() {
                        return None;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subscription = self.id, skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 待機せずにイベントを取得
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            if !self.is_active() {
                return None;
            }

            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
