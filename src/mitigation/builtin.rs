//! 組み込みの緩和戦略
//!
//! 起動条件は検知器の閾値テーブルを参照せず、固定値で判定する。
//! ボトルネックのレコードが作られる前でも緩和を開始できるようにするため。

use crate::events::RedistributionSignal;
use crate::mitigation::strategy::{action_fn, MitigationContext, MitigationStrategy};
use crate::monitoring::{HealthStatus, SystemSnapshot};
use tracing::{info, warn};

pub const EMERGENCY_STABILIZE: &str = "emergency-stabilize";
pub const CPU_LOAD_BALANCE: &str = "cpu-load-balance";
pub const MEMORY_OPTIMIZE: &str = "memory-optimize";
pub const WORKER_POOL_EXPAND: &str = "worker-pool-expand";
pub const WORKER_EFFICIENCY_BOOST: &str = "worker-efficiency-boost";
pub const PIPELINE_FLOW_OPTIMIZE: &str = "pipeline-flow-optimize";

/// 組み込み戦略を優先度の高い順に返す
pub fn builtin_strategies() -> Vec<MitigationStrategy> {
    vec![
        MitigationStrategy::new(
            EMERGENCY_STABILIZE,
            "Emergency Stabilize",
            10,
            |s: &SystemSnapshot| s.health == HealthStatus::Critical,
            action_fn(|ctx: MitigationContext| async move {
                warn!(
                    cpu = ctx.snapshot.cpu_usage,
                    memory = ctx.snapshot.memory_usage,
                    efficiency = ctx.snapshot.worker_efficiency,
                    "🚑 System health critical, requesting emergency stabilization"
                );
                ctx.signal(RedistributionSignal::EmergencyStabilizeRequested {
                    health: ctx.snapshot.health.to_string(),
                });
                anyhow::Ok(())
            }),
        )
        .with_description("Throttle intake and shed load while system health is critical"),
        MitigationStrategy::new(
            CPU_LOAD_BALANCE,
            "CPU Load Balance",
            9,
            |s: &SystemSnapshot| s.cpu_usage > 85.0,
            action_fn(|ctx: MitigationContext| async move {
                info!(cpu = ctx.snapshot.cpu_usage, "Requesting CPU rebalance");
                ctx.signal(RedistributionSignal::CpuRebalanceRequested {
                    cpu_usage: ctx.snapshot.cpu_usage,
                });
                anyhow::Ok(())
            }),
        )
        .with_description("Redistribute CPU-bound work across components"),
        MitigationStrategy::new(
            MEMORY_OPTIMIZE,
            "Memory Optimize",
            8,
            |s: &SystemSnapshot| s.memory_usage > 80.0,
            action_fn(|ctx: MitigationContext| async move {
                info!(memory = ctx.snapshot.memory_usage, "Requesting memory cleanup");
                ctx.signal(RedistributionSignal::MemoryCleanupRequested {
                    memory_usage: ctx.snapshot.memory_usage,
                });
                anyhow::Ok(())
            }),
        )
        .with_description("Release caches and compact buffers under memory pressure"),
        MitigationStrategy::new(
            WORKER_POOL_EXPAND,
            "Worker Pool Expand",
            7,
            |s: &SystemSnapshot| s.worker_utilization > 90.0,
            action_fn(|ctx: MitigationContext| async move {
                info!(
                    utilization = ctx.snapshot.worker_utilization,
                    "Requesting worker pool expansion"
                );
                ctx.signal(RedistributionSignal::WorkerPoolExpansionRequested {
                    worker_utilization: ctx.snapshot.worker_utilization,
                });
                anyhow::Ok(())
            }),
        )
        .with_description("Add workers when the pool is saturated"),
        MitigationStrategy::new(
            WORKER_EFFICIENCY_BOOST,
            "Worker Efficiency Boost",
            6,
            |s: &SystemSnapshot| s.worker_efficiency < 70.0,
            action_fn(|ctx: MitigationContext| async move {
                info!(
                    efficiency = ctx.snapshot.worker_efficiency,
                    "Requesting worker efficiency boost"
                );
                ctx.signal(RedistributionSignal::WorkerEfficiencyBoostRequested {
                    worker_efficiency: ctx.snapshot.worker_efficiency,
                });
                anyhow::Ok(())
            }),
        )
        .with_description("Rebalance task assignment to recover worker efficiency"),
        MitigationStrategy::new(
            PIPELINE_FLOW_OPTIMIZE,
            "Pipeline Flow Optimize",
            5,
            |s: &SystemSnapshot| s.pipeline_throughput < 50.0,
            action_fn(|ctx: MitigationContext| async move {
                info!(
                    throughput = ctx.snapshot.pipeline_throughput,
                    "Requesting pipeline flow optimization"
                );
                ctx.signal(RedistributionSignal::PipelineFlowOptimizationRequested {
                    pipeline_throughput: ctx.snapshot.pipeline_throughput,
                });
                anyhow::Ok(())
            }),
        )
        .with_description("Adjust batching and stage concurrency to restore throughput"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mitigation::StrategyRegistry;
    use crate::monitoring::MetricReading;

    async fn registry() -> StrategyRegistry {
        let registry = StrategyRegistry::new();
        for strategy in builtin_strategies() {
            registry.add(strategy).await.unwrap();
        }
        registry
    }

    fn snapshot(cpu: f64, memory: f64, utilization: f64, efficiency: f64, throughput: f64) -> SystemSnapshot {
        SystemSnapshot::from_reading(
            MetricReading::new(cpu, memory, utilization, efficiency, throughput),
            0,
        )
    }

    #[test]
    fn test_builtin_priorities_descending() {
        let priorities: Vec<i32> = builtin_strategies().iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![10, 9, 8, 7, 6, 5]);
    }

    #[tokio::test]
    async fn test_emergency_outranks_cpu_balance() {
        let registry = registry().await;
        let selected = registry
            .select(&snapshot(96.0, 50.0, 40.0, 90.0, 90.0))
            .await
            .unwrap();

        assert_eq!(selected.id, EMERGENCY_STABILIZE);
    }

    #[tokio::test]
    async fn test_cpu_balance_when_not_critical() {
        let registry = registry().await;
        let selected = registry
            .select(&snapshot(90.0, 85.0, 40.0, 90.0, 90.0))
            .await
            .unwrap();

        assert_eq!(selected.id, CPU_LOAD_BALANCE);
    }

    #[tokio::test]
    async fn test_each_builtin_trigger() {
        let registry = registry().await;
        let cases = [
            (snapshot(30.0, 85.0, 30.0, 90.0, 90.0), MEMORY_OPTIMIZE),
            (snapshot(30.0, 30.0, 92.0, 90.0, 90.0), WORKER_POOL_EXPAND),
            (snapshot(30.0, 30.0, 30.0, 65.0, 90.0), WORKER_EFFICIENCY_BOOST),
            (snapshot(30.0, 30.0, 30.0, 90.0, 40.0), PIPELINE_FLOW_OPTIMIZE),
        ];

        for (snapshot, expected) in cases {
            assert_eq!(registry.select(&snapshot).await.unwrap().id, expected);
        }

        assert!(registry
            .select(&snapshot(30.0, 30.0, 30.0, 90.0, 90.0))
            .await
            .is_none());
    }
}
