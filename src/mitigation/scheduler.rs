//! 緩和スケジューラー
//!
//! 1ティックにつき最大1つの戦略を選び、そのアクションを別タスクで起動する。

use crate::error::Error;
use crate::events::{EngineEvent, EventBus};
use crate::mitigation::registry::StrategyRegistry;
use crate::mitigation::strategy::{MitigationContext, MitigationStrategy};
use crate::monitoring::SystemSnapshot;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 起動されたアクション
#[derive(Debug)]
pub struct MitigationLaunch {
    /// 選択された戦略ID
    pub strategy_id: String,
    /// 実行タスク（待機は任意）
    pub handle: JoinHandle<()>,
}

/// 緩和スケジューラー
pub struct MitigationScheduler {
    registry: Arc<StrategyRegistry>,
    events: EventBus,
}

impl MitigationScheduler {
    pub fn new(registry: Arc<StrategyRegistry>, events: EventBus) -> Self {
        Self { registry, events }
    }

    /// 1ティック分の選択と起動
    ///
    /// 対象が複数あっても起動するのは最も優先度の高い1つだけ。
    /// アクションの完了は待たない。
    pub async fn tick(&self, snapshot: &Arc<SystemSnapshot>) -> Option<MitigationLaunch> {
        let strategy = self.registry.select(snapshot).await?;
        Some(self.launch(&strategy, Arc::clone(snapshot)))
    }

    fn launch(&self, strategy: &MitigationStrategy, snapshot: Arc<SystemSnapshot>) -> MitigationLaunch {
        let strategy_id = strategy.id.clone();
        let action = strategy.action();
        let events = self.events.clone();
        let ctx = MitigationContext::new(strategy_id.clone(), snapshot, events.clone());

        info!(
            strategy = %strategy_id,
            priority = strategy.priority,
            "🛠️ Launching mitigation: {}",
            strategy.name
        );
        events.publish(EngineEvent::MitigationTriggered {
            strategy_id: strategy_id.clone(),
            priority: strategy.priority,
        });

        let task_id = strategy_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(action.execute(ctx)).catch_unwind().await;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(panic) => Some(format!("action panicked: {}", panic_message(&*panic))),
            };

            match failure {
                None => {
                    debug!(strategy = %task_id, "Mitigation completed");
                    events.publish(EngineEvent::MitigationCompleted {
                        strategy_id: task_id,
                    });
                }
                Some(message) => {
                    let error = Error::ActionFailure {
                        strategy: task_id.clone(),
                        message,
                    };
                    warn!(strategy = %task_id, "{}", error);
                    events.publish(EngineEvent::MitigationFailed {
                        strategy_id: task_id,
                        error: error.to_string(),
                    });
                }
            }
        });

        MitigationLaunch {
            strategy_id,
            handle,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
