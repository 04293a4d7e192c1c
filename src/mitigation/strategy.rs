//! Mitigation Strategy Types

use crate::events::{EngineEvent, EventBus, RedistributionSignal};
use crate::monitoring::SystemSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 起動条件（スナップショットに対する純粋関数）
pub type TriggerFn = dyn Fn(&SystemSnapshot) -> bool + Send + Sync;

/// アクション実行時に渡されるコンテキスト
#[derive(Debug, Clone)]
pub struct MitigationContext {
    /// 実行中の戦略ID
    pub strategy_id: String,
    /// 選択時点のスナップショット
    pub snapshot: Arc<SystemSnapshot>,
    events: EventBus,
}

impl MitigationContext {
    pub(crate) fn new(strategy_id: impl Into<String>, snapshot: Arc<SystemSnapshot>, events: EventBus) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            snapshot,
            events,
        }
    }

    /// 再分配シグナルを送信
    pub fn signal(&self, signal: RedistributionSignal) {
        self.events.publish(EngineEvent::Redistribution(signal));
    }
}

/// 緩和アクション
///
/// スケジューラーはアクションの完了を待たない。エラーやパニックは
/// 実行タスク内で捕捉され、通知チャンネルに報告される。
#[async_trait]
pub trait MitigationAction: Send + Sync {
    async fn execute(&self, ctx: MitigationContext) -> anyhow::Result<()>;
}

/// クロージャをアクションとして扱うアダプタ
pub struct FnAction<F>(F);

/// 非同期クロージャからアクションを作成
pub fn action_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(MitigationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnAction(f)
}

#[async_trait]
impl<F, Fut> MitigationAction for FnAction<F>
where
    F: Fn(MitigationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn execute(&self, ctx: MitigationContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// 緩和戦略
pub struct MitigationStrategy {
    /// 戦略ID
    pub id: String,
    /// 名前
    pub name: String,
    /// 説明
    pub description: String,
    /// 優先度（大きいほど先に実行）
    pub priority: i32,
    trigger: Arc<TriggerFn>,
    action: Arc<dyn MitigationAction>,
    enabled: AtomicBool,
}

impl MitigationStrategy {
    /// 新しい緩和戦略を作成
    pub fn new<T, A>(
        id: impl Into<String>,
        name: impl Into<String>,
        priority: i32,
        trigger: T,
        action: A,
    ) -> Self
    where
        T: Fn(&SystemSnapshot) -> bool + Send + Sync + 'static,
        A: MitigationAction + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            priority,
            trigger: Arc::new(trigger),
            action: Arc::new(action),
            enabled: AtomicBool::new(true),
        }
    }

    /// 説明を設定
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 有効フラグを設定
    pub fn with_enabled(self, enabled: bool) -> Self {
        self.enabled.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// このスナップショットで選択対象になるか
    ///
    /// 無効化された戦略は常に対象外。
    pub fn is_eligible(&self, snapshot: &SystemSnapshot) -> bool {
        self.is_enabled() && (self.trigger)(snapshot)
    }

    pub(crate) fn action(&self) -> Arc<dyn MitigationAction> {
        Arc::clone(&self.action)
    }

    /// 表示用の情報
    pub fn info(&self) -> StrategyInfo {
        StrategyInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            enabled: self.is_enabled(),
        }
    }
}

impl std::fmt::Debug for MitigationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MitigationStrategy")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// 緩和戦略の情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub priority: i32,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::MetricReading;

    fn strategy() -> MitigationStrategy {
        MitigationStrategy::new(
            "cpu-test",
            "CPU Test",
            9,
            |s: &SystemSnapshot| s.cpu_usage > 85.0,
            action_fn(|_ctx: MitigationContext| async { anyhow::Ok(()) }),
        )
        .with_description("test strategy")
    }

    #[test]
    fn test_eligibility_respects_enabled_flag() {
        let hot = SystemSnapshot::from_reading(MetricReading::new(90.0, 10.0, 10.0, 90.0, 90.0), 0);
        let strategy = strategy();

        assert!(strategy.is_eligible(&hot));

        strategy.set_enabled(false);
        assert!(!strategy.is_eligible(&hot));
        assert!(!strategy.info().enabled);
    }

    #[test]
    fn test_info() {
        let info = strategy().with_enabled(false).info();

        assert_eq!(info.id, "cpu-test");
        assert_eq!(info.priority, 9);
        assert_eq!(info.description, "test strategy");
        assert!(!info.enabled);
    }

    #[tokio::test]
    async fn test_context_signal_is_published() {
        let events = EventBus::new(4);
        let mut subscription = events.subscribe();
        let snapshot = Arc::new(SystemSnapshot::from_reading(MetricReading::default(), 0));

        let ctx = MitigationContext::new("cpu-test", snapshot, events);
        ctx.signal(RedistributionSignal::CpuRebalanceRequested { cpu_usage: 90.0 });

        assert!(matches!(
            subscription.recv().await,
            Some(EngineEvent::Redistribution(RedistributionSignal::CpuRebalanceRequested { .. }))
        ));
    }
}
