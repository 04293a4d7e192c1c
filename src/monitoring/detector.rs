//! ボトルネック検知システム
//!
//! 最新のスナップショットを5つの固定ルールで評価し、アクティブな
//! ボトルネックの集合を `(type, location)` 単位で管理する。

use crate::error::{Error, Result};
use crate::monitoring::bottleneck::{Bottleneck, BottleneckKey, BottleneckType, Severity};
use crate::monitoring::metrics::SystemSnapshot;
use crate::monitoring::thresholds::{ThresholdTable, ThresholdUpdate};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use validator::Validate;

/// 再検出を抑制する期間
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// 解決済みボトルネックの保持期間
pub const DEFAULT_PURGE_GRACE: Duration = Duration::from_secs(30);

/// 検出ルールが監視するシグナル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    CpuUsage,
    MemoryUsage,
    WorkerUtilization,
    WorkerEfficiency,
    PipelineThroughput,
}

impl Signal {
    /// 評価順
    pub const ALL: [Signal; 5] = [
        Signal::CpuUsage,
        Signal::MemoryUsage,
        Signal::WorkerUtilization,
        Signal::WorkerEfficiency,
        Signal::PipelineThroughput,
    ];

    fn value(self, snapshot: &SystemSnapshot) -> f64 {
        match self {
            Self::CpuUsage => snapshot.cpu_usage,
            Self::MemoryUsage => snapshot.memory_usage,
            Self::WorkerUtilization => snapshot.worker_utilization,
            Self::WorkerEfficiency => snapshot.worker_efficiency,
            Self::PipelineThroughput => snapshot.pipeline_throughput,
        }
    }

    /// 値が閾値を下回ったときに発火するシグナル
    fn inverted(self) -> bool {
        matches!(self, Self::WorkerEfficiency | Self::PipelineThroughput)
    }

    /// (発火閾値, Critical閾値)
    fn limits(self, thresholds: &ThresholdTable) -> (f64, f64) {
        match self {
            Self::CpuUsage => (thresholds.cpu_usage, thresholds.cpu_usage_critical),
            Self::MemoryUsage => (thresholds.memory_usage, thresholds.memory_usage_critical),
            Self::WorkerUtilization => (
                thresholds.worker_utilization,
                thresholds.worker_utilization_critical,
            ),
            Self::WorkerEfficiency => (
                thresholds.worker_efficiency,
                thresholds.worker_efficiency_critical,
            ),
            Self::PipelineThroughput => (
                thresholds.pipeline_throughput,
                thresholds.pipeline_throughput_critical,
            ),
        }
    }

    pub fn bottleneck_type(self) -> BottleneckType {
        match self {
            Self::CpuUsage => BottleneckType::Cpu,
            Self::MemoryUsage => BottleneckType::Memory,
            Self::WorkerUtilization => BottleneckType::Thread,
            Self::WorkerEfficiency => BottleneckType::Worker,
            Self::PipelineThroughput => BottleneckType::Pipeline,
        }
    }

    pub fn location(self) -> &'static str {
        match self {
            Self::CpuUsage => "System CPU",
            Self::MemoryUsage => "System Memory",
            Self::WorkerUtilization => "Worker Threads",
            Self::WorkerEfficiency => "Worker Pool",
            Self::PipelineThroughput => "Processing Pipeline",
        }
    }

    /// Critical 未満で発火したときの深刻度
    fn elevated_severity(self) -> Severity {
        match self {
            Self::CpuUsage | Self::WorkerUtilization => Severity::High,
            Self::MemoryUsage | Self::WorkerEfficiency | Self::PipelineThroughput => {
                Severity::Medium
            }
        }
    }

    /// ルール毎の影響度（基準値からの線形オフセット、0-100）
    fn impact(self, value: f64) -> f64 {
        let raw = match self {
            Self::CpuUsage => value - 50.0,
            Self::MemoryUsage => value - 60.0,
            Self::WorkerUtilization => value - 50.0,
            Self::WorkerEfficiency | Self::PipelineThroughput => 100.0 - value,
        };
        raw.clamp(0.0, 100.0)
    }

    fn describe(self, value: f64) -> String {
        match self {
            Self::CpuUsage => format!("CPU usage is high: {:.1}%", value),
            Self::MemoryUsage => format!("Memory usage is high: {:.1}%", value),
            Self::WorkerUtilization => format!("Worker thread utilization is high: {:.1}%", value),
            Self::WorkerEfficiency => format!("Worker efficiency is low: {:.1}%", value),
            Self::PipelineThroughput => format!("Pipeline throughput is low: {:.1}%", value),
        }
    }

    /// ルールを評価し、発火した場合は新しいボトルネックを返す
    pub fn evaluate(
        self,
        snapshot: &SystemSnapshot,
        thresholds: &ThresholdTable,
        now: DateTime<Utc>,
    ) -> Option<Bottleneck> {
        let value = self.value(snapshot);
        let (trigger, critical) = self.limits(thresholds);

        let (fired, is_critical) = if self.inverted() {
            (value < trigger, value < critical)
        } else {
            (value > trigger, value > critical)
        };

        if !fired {
            return None;
        }

        let severity = if is_critical {
            Severity::Critical
        } else {
            self.elevated_severity()
        };

        Some(Bottleneck::new(
            self.bottleneck_type(),
            severity,
            self.location(),
            self.describe(value),
            self.impact(value),
            now,
        ))
    }
}

/// ボトルネック検知器
pub struct BottleneckDetector {
    thresholds: Arc<RwLock<ThresholdTable>>,
    active: Arc<RwLock<HashMap<BottleneckKey, Bottleneck>>>,
    dedup_window: Duration,
    purge_grace: Duration,
}

impl BottleneckDetector {
    /// 新しい検知器を作成
    pub fn new(thresholds: ThresholdTable) -> Self {
        Self {
            thresholds: Arc::new(RwLock::new(thresholds)),
            active: Arc::new(RwLock::new(HashMap::new())),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            purge_grace: DEFAULT_PURGE_GRACE,
        }
    }

    /// 再検出抑制期間を設定
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// 解決後の保持期間を設定
    pub fn with_purge_grace(mut self, grace: Duration) -> Self {
        self.purge_grace = grace;
        self
    }

    /// 現在の閾値テーブル
    pub async fn thresholds(&self) -> ThresholdTable {
        self.thresholds.read().await.clone()
    }

    /// 閾値テーブルに部分更新をマージする
    ///
    /// マージ結果が不正な場合は現行テーブルを変更せずにエラーを返す。
    pub async fn update_thresholds(&self, update: &ThresholdUpdate) -> Result<ThresholdTable> {
        let mut thresholds = self.thresholds.write().await;
        let merged = thresholds.merged(update);
        merged.validate()?;

        *thresholds = merged.clone();
        info!(?update, "Detection thresholds updated");

        Ok(merged)
    }

    /// スナップショットを評価（現在時刻）
    pub async fn detect(&self, snapshot: &SystemSnapshot) -> Vec<Bottleneck> {
        self.detect_at(snapshot, Utc::now()).await
    }

    /// スナップショットを評価し、新たに受理された検出を返す
    ///
    /// 同じキーの未解決レコードが抑制期間内に検出済みであれば、
    /// 新しい検出は破棄され既存レコードのタイムスタンプも更新しない。
    /// 保持期間中の解決済みレコードは古いものとして上書きする。
    pub async fn detect_at(&self, snapshot: &SystemSnapshot, now: DateTime<Utc>) -> Vec<Bottleneck> {
        let thresholds = self.thresholds.read().await.clone();
        let candidates: Vec<Bottleneck> = Signal::ALL
            .iter()
            .filter_map(|signal| signal.evaluate(snapshot, &thresholds, now))
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let mut detected = Vec::new();
        let mut active = self.active.write().await;

        for candidate in candidates {
            let key = candidate.key();

            if let Some(existing) = active.get(&key) {
                if !existing.is_resolved() && elapsed(existing.detected_at, now) < self.dedup_window
                {
                    debug!(
                        bottleneck_type = %key.bottleneck_type,
                        location = %key.location,
                        "Duplicate detection suppressed"
                    );
                    continue;
                }
            }

            info!(
                id = %candidate.id,
                bottleneck_type = %candidate.bottleneck_type,
                severity = ?candidate.severity,
                impact = candidate.impact,
                "🚨 Bottleneck detected: {}",
                candidate.description
            );

            active.insert(key, candidate.clone());
            detected.push(candidate);
        }

        detected
    }

    /// ボトルネックを解決（現在時刻）
    pub async fn resolve(&self, id: &str, resolution: impl Into<String>) -> Result<Bottleneck> {
        self.resolve_at(id, resolution, Utc::now()).await
    }

    /// 未解決のボトルネックを解決済みにする
    pub async fn resolve_at(
        &self,
        id: &str,
        resolution: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Bottleneck> {
        let mut active = self.active.write().await;

        let record = active
            .values_mut()
            .find(|b| b.id == id && !b.is_resolved())
            .ok_or_else(|| Error::NotFound(format!("active bottleneck {}", id)))?;

        record.resolve(resolution, now);
        info!(id = %record.id, location = %record.location, "✅ Bottleneck resolved");

        Ok(record.clone())
    }

    /// アクティブセットを取得（現在時刻）
    pub async fn list(&self) -> Vec<Bottleneck> {
        self.list_at(Utc::now()).await
    }

    /// 保持期間内の解決済みレコードを含むアクティブセットを検出順に返す
    pub async fn list_at(&self, now: DateTime<Utc>) -> Vec<Bottleneck> {
        let active = self.active.read().await;
        let mut records: Vec<Bottleneck> = active
            .values()
            .filter(|b| !self.is_expired(b, now))
            .cloned()
            .collect();

        records.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        records
    }

    /// 未解決のボトルネック数
    pub async fn unresolved_count(&self) -> usize {
        let active = self.active.read().await;
        active.values().filter(|b| !b.is_resolved()).count()
    }

    /// 保持期間を過ぎた解決済みレコードを削除（現在時刻）
    pub async fn purge_expired(&self) -> Vec<Bottleneck> {
        self.purge_expired_at(Utc::now()).await
    }

    /// 保持期間を過ぎた解決済みレコードを削除し、削除したものを返す
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Vec<Bottleneck> {
        let mut active = self.active.write().await;
        let expired: Vec<BottleneckKey> = active
            .iter()
            .filter(|(_, b)| self.is_expired(b, now))
            .map(|(key, _)| key.clone())
            .collect();

        let purged: Vec<Bottleneck> = expired
            .iter()
            .filter_map(|key| active.remove(key))
            .collect();

        if !purged.is_empty() {
            debug!(count = purged.len(), "Purged resolved bottlenecks");
        }

        purged
    }

    /// 全てのレコードを削除
    pub async fn clear(&self) {
        self.active.write().await.clear();
    }

    fn is_expired(&self, bottleneck: &Bottleneck, now: DateTime<Utc>) -> bool {
        match bottleneck.resolved_at {
            Some(resolved_at) => elapsed(resolved_at, now) >= self.purge_grace,
            None => false,
        }
    }
}

impl Default for BottleneckDetector {
    fn default() -> Self {
        Self::new(ThresholdTable::default())
    }
}

/// 経過時間（時計が巻き戻った場合は 0）
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
