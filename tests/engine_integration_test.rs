//! エンジン統合テスト
//!
//! 固定ソースと短い間隔でエンジンを動かし、イベント経由で振る舞いを確認する。

use bottleneck_rs::config::EngineConfig;
use bottleneck_rs::{
    action_fn, BottleneckEngine, BottleneckType, EngineEvent, Error, EventSubscription,
    FixedMetricSource, HealthStatus, MetricReading, MitigationContext, MitigationStrategy,
    RedistributionSignal, Severity, SystemSnapshot, ThresholdUpdate,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(3);

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.sampler.interval_ms = 20;
    config.sampler.timeout_ms = 15;
    config.scheduler.interval_ms = 10;
    config
}

fn healthy() -> MetricReading {
    MetricReading::new(30.0, 40.0, 50.0, 90.0, 90.0)
}

fn setup(reading: MetricReading) -> (BottleneckEngine, FixedMetricSource) {
    let source = FixedMetricSource::new(reading);
    let engine = BottleneckEngine::new(fast_config(), Arc::new(source.clone()));
    (engine, source)
}

/// 条件を満たすイベントが届くまで待機
async fn wait_for<F>(subscription: &mut EventSubscription, mut predicate: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    let result = timeout(WAIT, async {
        while let Some(event) = subscription.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;

    match result {
        Ok(Some(event)) => event,
        Ok(None) => panic!("subscription closed before expected event"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

fn always_strategy(id: &str, priority: i32) -> MitigationStrategy {
    MitigationStrategy::new(
        id,
        id,
        priority,
        |_: &SystemSnapshot| true,
        action_fn(|_ctx: MitigationContext| async move { anyhow::Ok(()) }),
    )
}

#[tokio::test]
async fn test_critical_cpu_detected_and_mitigated() {
    let (engine, _) = setup(MetricReading::new(96.0, 50.0, 40.0, 90.0, 90.0));
    let mut events = engine.subscribe();

    assert_ok!(engine.start().await);

    let detected = wait_for(&mut events, |e| matches!(e, EngineEvent::BottleneckDetected(_))).await;
    match detected {
        EngineEvent::BottleneckDetected(b) => {
            assert_eq!(b.bottleneck_type, BottleneckType::Cpu);
            assert_eq!(b.severity, Severity::Critical);
            assert_eq!(b.location, "System CPU");
            assert!((b.impact - 46.0).abs() < f64::EPSILON);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let triggered = wait_for(&mut events, |e| {
        matches!(e, EngineEvent::MitigationTriggered { .. })
    })
    .await;
    match triggered {
        EngineEvent::MitigationTriggered {
            strategy_id,
            priority,
        } => {
            assert_eq!(strategy_id, "emergency-stabilize");
            assert_eq!(priority, 10);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    wait_for(&mut events, |e| {
        matches!(
            e,
            EngineEvent::Redistribution(RedistributionSignal::EmergencyStabilizeRequested { .. })
        )
    })
    .await;

    let snapshot = engine.snapshot().await.expect("snapshot after sampling");
    assert_eq!(snapshot.health, HealthStatus::Critical);

    assert_ok!(engine.shutdown().await);
}

#[tokio::test]
async fn test_dedup_within_window() {
    let (engine, _) = setup(MetricReading::new(90.0, 40.0, 40.0, 90.0, 90.0));

    for _ in 0..5 {
        assert_ok!(engine.sample_now().await);
    }

    let bottlenecks = engine.active_bottlenecks().await;
    assert_eq!(bottlenecks.len(), 1);
    assert_eq!(bottlenecks[0].severity, Severity::High);

    let snapshot = engine.sample_now().await.unwrap();
    assert_eq!(snapshot.bottleneck_count, 1);
}

#[tokio::test]
async fn test_resolve_bottleneck() {
    let (engine, _) = setup(MetricReading::new(90.0, 40.0, 40.0, 90.0, 90.0));
    let mut events = engine.subscribe();
    engine.sample_now().await.unwrap();

    let id = engine.active_bottlenecks().await[0].id.clone();
    let resolved = engine
        .resolve_bottleneck(&id, "scaled out")
        .await
        .unwrap();
    assert!(resolved.is_resolved());
    assert_eq!(resolved.resolution.as_deref(), Some("scaled out"));

    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BottleneckResolved(b) if b.id == id)
    })
    .await;

    // 保持期間中は一覧に残る
    let listed = engine.active_bottlenecks().await;
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_resolved());

    // 二重解決は見つからない扱い
    assert!(matches!(
        engine.resolve_bottleneck(&id, "again").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_resolve_unknown_id_is_not_found() {
    let (engine, _) = setup(healthy());
    let result = engine.resolve_bottleneck("missing-id", "n/a").await;

    assert_err!(&result);
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(engine.active_bottlenecks().await.is_empty());
}

#[tokio::test]
async fn test_start_stop_restart() {
    let (engine, _) = setup(healthy());

    assert_ok!(engine.start().await);
    assert_ok!(engine.start().await);
    assert!(engine.is_running().await);

    assert_ok!(engine.stop().await);
    assert_ok!(engine.stop().await);
    assert!(!engine.is_running().await);

    let mut events = engine.subscribe();
    assert_ok!(engine.start().await);
    wait_for(&mut events, |e| matches!(e, EngineEvent::MetricsUpdated(_))).await;

    assert_ok!(engine.stop().await);
}

#[tokio::test]
async fn test_shutdown_is_terminal() {
    let (engine, _) = setup(MetricReading::new(90.0, 40.0, 40.0, 90.0, 90.0));
    let mut events = engine.subscribe();

    assert_ok!(engine.start().await);
    wait_for(&mut events, |e| matches!(e, EngineEvent::BottleneckDetected(_))).await;

    assert_ok!(engine.shutdown().await);

    assert!(engine.snapshot().await.is_none());
    assert!(engine.active_bottlenecks().await.is_empty());
    assert!(engine.strategies().await.is_empty());
    assert!(!events.is_active());

    assert!(matches!(engine.start().await, Err(Error::Terminated)));
    assert!(matches!(
        engine.add_strategy(always_strategy("late", 1)).await,
        Err(Error::Terminated)
    ));
    assert_ok!(engine.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_and_shutdown_stays_terminated() {
    for _ in 0..200 {
        let source = FixedMetricSource::new(healthy());
        let engine = Arc::new(BottleneckEngine::new(fast_config(), Arc::new(source)));

        let starter = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start().await })
        };
        let stopper = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.shutdown().await })
        };

        // 先に走った側によって start は成功も Terminated もあり得る
        let started = starter.await.unwrap();
        assert!(matches!(started, Ok(()) | Err(Error::Terminated)));
        assert_ok!(stopper.await.unwrap());

        assert!(!engine.is_running().await);
        assert!(matches!(engine.start().await, Err(Error::Terminated)));
    }
}

#[tokio::test]
async fn test_resolved_bottleneck_purged_after_grace() {
    let mut config = fast_config();
    config.lifecycle.purge_grace_ms = 10;
    let source = FixedMetricSource::new(MetricReading::new(90.0, 40.0, 40.0, 90.0, 90.0));
    let engine = BottleneckEngine::new(config, Arc::new(source.clone()));
    let mut events = engine.subscribe();

    engine.sample_now().await.unwrap();
    let id = engine.active_bottlenecks().await[0].id.clone();
    assert_ok!(engine.resolve_bottleneck(&id, "throttled intake").await);

    tokio::time::sleep(Duration::from_millis(30)).await;
    source.set(healthy());
    assert_ok!(engine.sample_now().await);

    let purged = wait_for(&mut events, |e| matches!(e, EngineEvent::BottleneckPurged(_))).await;
    match purged {
        EngineEvent::BottleneckPurged(b) => {
            assert_eq!(b.id, id);
            assert!(b.is_resolved());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(engine.active_bottlenecks().await.is_empty());
}

#[tokio::test]
async fn test_source_failure_keeps_previous_snapshot() {
    let (engine, source) = setup(MetricReading::new(90.0, 40.0, 40.0, 90.0, 90.0));
    let first = engine.sample_now().await.unwrap();

    source.set_failure(Some("collector offline".to_string()));
    let result = engine.sample_now().await;
    assert!(matches!(result, Err(Error::SourceUnavailable(_))));

    let current = engine.snapshot().await.unwrap();
    assert!(Arc::ptr_eq(&first, &current));
    assert_eq!(engine.active_bottlenecks().await.len(), 1);

    source.set_failure(None);
    source.set(healthy());
    let recovered = engine.sample_now().await.unwrap();
    assert_eq!(recovered.health, HealthStatus::Excellent);
}

#[tokio::test]
async fn test_highest_priority_strategy_wins() {
    let source = FixedMetricSource::new(healthy());
    let engine = BottleneckEngine::with_strategies(
        fast_config(),
        Arc::new(source),
        vec![always_strategy("low", 1), always_strategy("high", 100)],
    );
    engine.sample_now().await.unwrap();

    let launch = engine.mitigate_now().await.unwrap().unwrap();
    assert_eq!(launch.strategy_id, "high");
    assert_ok!(launch.handle.await);

    engine
        .set_strategy_enabled("high", false)
        .await
        .unwrap();
    let launch = engine.mitigate_now().await.unwrap().unwrap();
    assert_eq!(launch.strategy_id, "low");
}

#[tokio::test]
async fn test_equal_priority_prefers_earlier_registration() {
    let source = FixedMetricSource::new(healthy());
    let engine = BottleneckEngine::with_strategies(fast_config(), Arc::new(source), Vec::new());

    assert_ok!(engine.add_strategy(always_strategy("first", 5)).await);
    assert_ok!(engine.add_strategy(always_strategy("second", 5)).await);
    engine.sample_now().await.unwrap();

    let launch = engine.mitigate_now().await.unwrap().unwrap();
    assert_eq!(launch.strategy_id, "first");
}

#[tokio::test]
async fn test_add_and_remove_strategy() {
    let (engine, _) = setup(healthy());

    assert_ok!(engine.add_strategy(always_strategy("custom", 50)).await);
    assert!(matches!(
        engine.add_strategy(always_strategy("custom", 1)).await,
        Err(Error::AlreadyExists(_))
    ));
    assert_eq!(engine.strategies().await.len(), 7);

    engine.sample_now().await.unwrap();
    let launch = engine.mitigate_now().await.unwrap().unwrap();
    assert_eq!(launch.strategy_id, "custom");

    let removed = engine.remove_strategy("custom").await.unwrap();
    assert_eq!(removed.priority, 50);
    assert!(matches!(
        engine.remove_strategy("custom").await,
        Err(Error::NotFound(_))
    ));

    // 健全な状態では組み込み戦略はどれも起動しない
    assert!(engine.mitigate_now().await.unwrap().is_none());
}

#[tokio::test]
async fn test_failing_action_reports_failure() {
    let source = FixedMetricSource::new(healthy());
    let failing = MitigationStrategy::new(
        "flaky",
        "Flaky",
        1,
        |_: &SystemSnapshot| true,
        action_fn(|_ctx: MitigationContext| async move {
            Err::<(), _>(anyhow::anyhow!("downstream refused"))
        }),
    );
    let engine = BottleneckEngine::with_strategies(fast_config(), Arc::new(source), vec![failing]);
    let mut events = engine.subscribe();
    engine.sample_now().await.unwrap();

    let launch = engine.mitigate_now().await.unwrap().unwrap();
    assert_ok!(launch.handle.await);

    let failed = wait_for(&mut events, |e| {
        matches!(e, EngineEvent::MitigationFailed { .. })
    })
    .await;
    match failed {
        EngineEvent::MitigationFailed { strategy_id, error } => {
            assert_eq!(strategy_id, "flaky");
            assert!(error.contains("downstream refused"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // 次のティックでも再び選ばれる
    assert!(engine.mitigate_now().await.unwrap().is_some());
}

#[tokio::test]
async fn test_update_thresholds() {
    let (engine, _) = setup(MetricReading::new(90.0, 40.0, 40.0, 90.0, 90.0));

    let updated = engine
        .update_thresholds(ThresholdUpdate {
            cpu_usage: Some(92.0),
            cpu_usage_critical: Some(97.0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.cpu_usage, 92.0);
    assert_eq!(updated.memory_usage, 80.0);

    engine.sample_now().await.unwrap();
    assert!(engine.active_bottlenecks().await.is_empty());

    let rejected = engine
        .update_thresholds(ThresholdUpdate {
            memory_usage: Some(150.0),
            ..Default::default()
        })
        .await;
    assert!(matches!(rejected, Err(Error::InvalidConfiguration(_))));
    assert_eq!(engine.thresholds().await, updated);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (engine, _) = setup(healthy());
    let mut kept = engine.subscribe();
    let mut dropped = engine.subscribe();

    assert!(engine.unsubscribe(dropped.id()));
    assert!(!engine.unsubscribe(dropped.id()));

    engine.sample_now().await.unwrap();

    wait_for(&mut kept, |e| matches!(e, EngineEvent::MetricsUpdated(_))).await;
    assert!(dropped.try_recv().is_none());
    assert!(dropped.recv().await.is_none());
}

#[tokio::test]
async fn test_status_serializes() {
    let (engine, _) = setup(MetricReading::new(90.0, 40.0, 40.0, 90.0, 90.0));
    engine.sample_now().await.unwrap();

    let status = engine.status().await;
    let json = serde_json::to_value(&status).unwrap();

    assert_eq!(json["running"], false);
    assert_eq!(json["bottlenecks"][0]["type"], "cpu");
    assert_eq!(json["snapshot"]["health"], "warning");
    assert_eq!(json["strategies"].as_array().map(Vec::len), Some(6));
}
