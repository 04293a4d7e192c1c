//! 緩和戦略レジストリ

use crate::error::{Error, Result};
use crate::mitigation::strategy::{MitigationStrategy, StrategyInfo};
use crate::monitoring::SystemSnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// 緩和戦略のカタログ
///
/// 登録順を保持する。同じ優先度の戦略は先に登録された方が選ばれる。
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: RwLock<Vec<Arc<MitigationStrategy>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 初期戦略を指定して作成（IDが重複する場合は先のものを残す）
    pub fn with_strategies(initial: impl IntoIterator<Item = MitigationStrategy>) -> Self {
        let mut strategies: Vec<Arc<MitigationStrategy>> = Vec::new();
        for strategy in initial {
            if strategies.iter().all(|s| s.id != strategy.id) {
                strategies.push(Arc::new(strategy));
            }
        }

        Self {
            strategies: RwLock::new(strategies),
        }
    }

    /// 戦略を登録
    pub async fn add(&self, strategy: MitigationStrategy) -> Result<()> {
        let mut strategies = self.strategies.write().await;
        if strategies.iter().any(|s| s.id == strategy.id) {
            return Err(Error::AlreadyExists(format!("strategy {}", strategy.id)));
        }

        info!(id = %strategy.id, priority = strategy.priority, "Mitigation strategy registered");
        strategies.push(Arc::new(strategy));
        Ok(())
    }

    /// 戦略を削除
    ///
    /// 実行中のアクションは中断されず、以降の選択対象から外れるのみ。
    pub async fn remove(&self, id: &str) -> Result<StrategyInfo> {
        let mut strategies = self.strategies.write().await;
        let index = strategies
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("strategy {}", id)))?;

        let removed = strategies.remove(index);
        info!(id = %removed.id, "Mitigation strategy removed");
        Ok(removed.info())
    }

    /// 有効フラグを切り替え
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<StrategyInfo> {
        let strategies = self.strategies.read().await;
        let strategy = strategies
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("strategy {}", id)))?;

        strategy.set_enabled(enabled);
        info!(id = %strategy.id, enabled, "Mitigation strategy toggled");
        Ok(strategy.info())
    }

    /// 登録済み戦略の一覧（登録順）
    pub async fn list(&self) -> Vec<StrategyInfo> {
        let strategies = self.strategies.read().await;
        strategies.iter().map(|s| s.info()).collect()
    }

    pub async fn len(&self) -> usize {
        self.strategies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.strategies.read().await.is_empty()
    }

    /// 対象となる戦略を優先度の高い順に返す
    pub async fn candidates(&self, snapshot: &SystemSnapshot) -> Vec<Arc<MitigationStrategy>> {
        let strategies = self.strategies.read().await;
        let mut candidates: Vec<_> = strategies
            .iter()
            .filter(|s| s.is_eligible(snapshot))
            .cloned()
            .collect();

        // 安定ソートなので同じ優先度は登録順のまま
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        candidates
    }

    /// このスナップショットで実行すべき戦略を1つ選ぶ
    pub async fn select(&self, snapshot: &SystemSnapshot) -> Option<Arc<MitigationStrategy>> {
        self.candidates(snapshot).await.into_iter().next()
    }

    /// 全ての戦略を削除
    pub async fn clear(&self) {
        self.strategies.write().await.clear();
    }
}
