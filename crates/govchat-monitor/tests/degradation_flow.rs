//! 저하 수준 전이 통합 테스트 (공개 API만 사용).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use govchat_core::config::BreakerConfig;
use govchat_core::error::CoreError;
use govchat_core::models::degradation::ServiceLevel;
use govchat_core::models::health::{PERSISTENCE_STORE, REAL_TIME_TRANSPORT, UPSTREAM_AGENT};
use govchat_core::ports::health::HealthProbe;
use govchat_core::ports::metrics::Metrics;
use govchat_monitor::degradation::{DegradationEngine, FallbackSet};
use govchat_monitor::fallback::{CachedMessagesFallback, QueueMessageFallback};
use govchat_monitor::health::{FnProbe, HealthAggregator};
use govchat_monitor::offline_queue::OfflineQueue;
use govchat_network::circuit_breaker::CircuitBreaker;

fn toggle(flag: &Arc<AtomicBool>) -> Arc<dyn HealthProbe> {
    let flag = flag.clone();
    Arc::new(FnProbe::new(move || {
        let healthy = flag.load(Ordering::SeqCst);
        async move { Ok::<_, CoreError>(healthy) }
    }))
}

#[tokio::test]
async fn recovers_through_limited_to_full() {
    let persistence = Arc::new(AtomicBool::new(false));
    let transport = Arc::new(AtomicBool::new(false));
    let agent = Arc::new(AtomicBool::new(false));

    let mut aggregator = HealthAggregator::new(Duration::from_secs(1));
    aggregator.register_check(PERSISTENCE_STORE, toggle(&persistence));
    aggregator.register_check(REAL_TIME_TRANSPORT, toggle(&transport));
    aggregator.register_check(UPSTREAM_AGENT, toggle(&agent));
    let aggregator = Arc::new(aggregator);

    let engine = DegradationEngine::new(
        aggregator.clone(),
        Arc::new(CircuitBreaker::new(BreakerConfig::default())),
        FallbackSet::new(
            Arc::new(QueueMessageFallback::new(Arc::new(OfflineQueue::new(10)), 4_000)),
            Arc::new(CachedMessagesFallback::new(None, 10)),
        ),
        Metrics::noop(),
    );
    let mut levels = engine.subscribe();

    assert_eq!(engine.assess_system_health().await.level(), ServiceLevel::Offline);

    persistence.store(true, Ordering::SeqCst);
    agent.store(true, Ordering::SeqCst);
    let limited = engine.assess_system_health().await;
    assert_eq!(limited.level(), ServiceLevel::Limited);
    assert_eq!(limited.report().unhealthy(), vec![REAL_TIME_TRANSPORT]);

    transport.store(true, Ordering::SeqCst);
    assert_eq!(engine.assess_system_health().await.level(), ServiceLevel::Full);

    // 판정에 쓰인 보고서가 집계기의 마지막 보고서와 같다
    assert_eq!(engine.current_level().report(), &*aggregator.latest());

    levels.changed().await.unwrap();
    assert_eq!(*levels.borrow(), ServiceLevel::Full);
}
