//! Bottleneck Detection Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ボトルネックタイプ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BottleneckType {
    /// パイプライン
    Pipeline,
    /// スレッド
    Thread,
    /// ワーカー
    Worker,
    /// メモリ
    Memory,
    /// CPU
    Cpu,
}

impl std::fmt::Display for BottleneckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Thread => write!(f, "thread"),
            Self::Worker => write!(f, "worker"),
            Self::Memory => write!(f, "memory"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// 深刻度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// アクティブセット内の識別キー
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BottleneckKey {
    pub bottleneck_type: BottleneckType,
    pub location: String,
}

/// ボトルネック
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    /// 検出イベント毎に一意なID
    pub id: String,
    /// ボトルネックタイプ
    #[serde(rename = "type")]
    pub bottleneck_type: BottleneckType,
    /// 深刻度
    pub severity: Severity,
    /// 発生箇所
    pub location: String,
    /// 説明
    pub description: String,
    /// 影響度（0-100）
    pub impact: f64,
    /// 検出時刻
    pub detected_at: DateTime<Utc>,
    /// 解決時刻
    pub resolved_at: Option<DateTime<Utc>>,
    /// 解決内容
    pub resolution: Option<String>,
}

impl Bottleneck {
    /// 新しいボトルネックを作成
    pub fn new(
        bottleneck_type: BottleneckType,
        severity: Severity,
        location: impl Into<String>,
        description: impl Into<String>,
        impact: f64,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bottleneck_type,
            severity,
            location: location.into(),
            description: description.into(),
            impact: impact.clamp(0.0, 100.0),
            detected_at,
            resolved_at: None,
            resolution: None,
        }
    }

    /// 識別キー
    pub fn key(&self) -> BottleneckKey {
        BottleneckKey {
            bottleneck_type: self.bottleneck_type,
            location: self.location.clone(),
        }
    }

    /// 解決済みかどうか
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// ボトルネックを解決
    pub fn resolve(&mut self, resolution: impl Into<String>, at: DateTime<Utc>) {
        self.resolved_at = Some(at);
        self.resolution = Some(resolution.into());
    }
}
