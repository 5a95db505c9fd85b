//! 서비스 저하 수준 결정 엔진.
//!
//! 헬스 집계 결과와 업스트림 브레이커 상태를 읽어 Full / Limited / Offline 중
//! 하나를 고르고, 수준별 기능 집합과 폴백 액션을 묶은 [`DegradationLevel`]을
//! 통째로 교체한다. 요청 계층은 [`DegradationEngine::can_use_feature`]를 먼저
//! 확인하고, 불가하면 [`DegradationEngine::get_fallback_action`]을 실행한다.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use govchat_core::models::breaker::BreakerState;
use govchat_core::models::degradation::{FallbackActionName, Feature, ServiceLevel};
use govchat_core::models::health::{
    HealthReport, PERSISTENCE_STORE, REAL_TIME_TRANSPORT, UPSTREAM_AGENT,
};
use govchat_core::ports::fallback::FallbackAction;
use govchat_core::ports::metrics::Metrics;
use govchat_network::circuit_breaker::CircuitBreaker;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::fallback::OfflineNoticeFallback;
use crate::health::HealthAggregator;

/// 수준별로 등록할 폴백 구현 묶음
#[derive(Clone)]
pub struct FallbackSet {
    /// Limited sendMessage: 대기열 등록
    pub queue_message: Arc<dyn FallbackAction>,
    /// Limited getMessages: 캐시된 기록
    pub cached_messages: Arc<dyn FallbackAction>,
    /// Offline sendMessage / getMessages: 고정 안내
    pub offline_notice: Arc<dyn FallbackAction>,
}

impl FallbackSet {
    pub fn new(
        queue_message: Arc<dyn FallbackAction>,
        cached_messages: Arc<dyn FallbackAction>,
    ) -> Self {
        Self {
            queue_message,
            cached_messages,
            offline_notice: Arc::new(OfflineNoticeFallback),
        }
    }
}

/// 한 번의 평가로 만들어진 저하 수준 (불변)
#[derive(Clone)]
pub struct DegradationLevel {
    level: ServiceLevel,
    features: Vec<Feature>,
    fallbacks: BTreeMap<FallbackActionName, Arc<dyn FallbackAction>>,
    report: Arc<HealthReport>,
    assessed_at: DateTime<Utc>,
}

impl std::fmt::Debug for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationLevel")
            .field("level", &self.level)
            .field("features", &self.features)
            .field("fallbacks", &self.fallbacks.keys().collect::<Vec<_>>())
            .field("assessed_at", &self.assessed_at)
            .finish()
    }
}

impl DegradationLevel {
    fn build(level: ServiceLevel, fallbacks: &FallbackSet, report: Arc<HealthReport>) -> Self {
        let (features, actions): (Vec<Feature>, Vec<(FallbackActionName, Arc<dyn FallbackAction>)>) =
            match level {
                ServiceLevel::Full => (
                    vec![
                        Feature::Transport,
                        Feature::Agent,
                        Feature::Persistence,
                        Feature::RealTime,
                    ],
                    Vec::new(),
                ),
                ServiceLevel::Limited => (
                    vec![Feature::Persistence, Feature::MessageQueue],
                    vec![
                        (FallbackActionName::SendMessage, fallbacks.queue_message.clone()),
                        (FallbackActionName::GetMessages, fallbacks.cached_messages.clone()),
                    ],
                ),
                ServiceLevel::Offline => (
                    vec![Feature::StaticContent],
                    vec![
                        (FallbackActionName::SendMessage, fallbacks.offline_notice.clone()),
                        (FallbackActionName::GetMessages, fallbacks.offline_notice.clone()),
                    ],
                ),
            };

        Self {
            level,
            features,
            fallbacks: actions.into_iter().collect(),
            report,
            assessed_at: Utc::now(),
        }
    }

    pub fn level(&self) -> ServiceLevel {
        self.level
    }

    /// 허용 기능 (정해진 순서)
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn allows(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn fallback(&self, action: FallbackActionName) -> Option<Arc<dyn FallbackAction>> {
        self.fallbacks.get(&action).cloned()
    }

    /// 등록된 폴백 액션 이름
    pub fn fallback_names(&self) -> Vec<FallbackActionName> {
        self.fallbacks.keys().copied().collect()
    }

    /// 판정 근거가 된 헬스 보고서
    pub fn report(&self) -> &HealthReport {
        &self.report
    }

    pub fn assessed_at(&self) -> DateTime<Utc> {
        self.assessed_at
    }
}

/// 헬스 보고서와 브레이커 상태로 수준 결정
///
/// 에이전트는 프로브가 정상이고 브레이커가 Open이 아닐 때만 정상으로 본다.
pub fn decide_level(report: &HealthReport, agent_breaker: BreakerState) -> ServiceLevel {
    let persistence = report.is_healthy(PERSISTENCE_STORE);
    let transport = report.is_healthy(REAL_TIME_TRANSPORT);
    let agent = report.is_healthy(UPSTREAM_AGENT) && agent_breaker != BreakerState::Open;

    if persistence && transport && agent {
        ServiceLevel::Full
    } else if persistence && (transport || agent) {
        ServiceLevel::Limited
    } else {
        ServiceLevel::Offline
    }
}

/// 서비스 저하 엔진
pub struct DegradationEngine {
    aggregator: Arc<HealthAggregator>,
    breaker: Arc<CircuitBreaker>,
    fallbacks: FallbackSet,
    current: RwLock<Arc<DegradationLevel>>,
    level_tx: watch::Sender<ServiceLevel>,
    /// 평가 직렬화 (마지막으로 끝난 평가가 마지막으로 반영됨)
    assessing: tokio::sync::Mutex<()>,
    metrics: Metrics,
}

impl DegradationEngine {
    /// 첫 평가 전까지는 Offline
    pub fn new(
        aggregator: Arc<HealthAggregator>,
        breaker: Arc<CircuitBreaker>,
        fallbacks: FallbackSet,
        metrics: Metrics,
    ) -> Self {
        let report = Arc::new(HealthReport::empty());
        let level = decide_level(&report, breaker.state());
        let initial = DegradationLevel::build(level, &fallbacks, report);
        let (level_tx, _) = watch::channel(initial.level);
        metrics.service_level(initial.level);

        Self {
            aggregator,
            breaker,
            fallbacks,
            current: RwLock::new(Arc::new(initial)),
            level_tx,
            assessing: tokio::sync::Mutex::new(()),
            metrics,
        }
    }

    /// 모든 프로브가 끝난 뒤 수준을 다시 계산하고 교체한다
    pub async fn assess_system_health(&self) -> Arc<DegradationLevel> {
        let _guard = self.assessing.lock().await;

        let report = Arc::new(self.aggregator.assess().await);
        let breaker_state = self.breaker.state();
        let level = decide_level(&report, breaker_state);
        let next = Arc::new(DegradationLevel::build(level, &self.fallbacks, report));

        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, next.clone())
        };

        if previous.level != level {
            match level {
                ServiceLevel::Full => info!(from = %previous.level, to = %level, "서비스 수준 회복"),
                _ => warn!(
                    from = %previous.level,
                    to = %level,
                    unhealthy = ?next.report.unhealthy(),
                    breaker = %breaker_state,
                    "서비스 수준 변경"
                ),
            }
        } else {
            debug!(level = %level, "서비스 수준 유지");
        }

        self.metrics.service_level(level);
        self.level_tx.send_replace(level);
        next
    }

    /// 현재 저하 수준
    pub fn current_level(&self) -> Arc<DegradationLevel> {
        self.current.read().clone()
    }

    pub fn level(&self) -> ServiceLevel {
        self.current.read().level
    }

    /// 기능 사용 가능 여부 (알 수 없는 기능 이름은 불가)
    pub fn can_use_feature(&self, name: &str) -> bool {
        match name.parse::<Feature>() {
            Ok(feature) => self.current.read().allows(feature),
            Err(_) => {
                debug!(feature = name, "알 수 없는 기능 이름");
                false
            }
        }
    }

    /// 현재 수준의 폴백 액션 (Full이거나 알 수 없는 이름이면 None)
    pub fn get_fallback_action(&self, name: &str) -> Option<Arc<dyn FallbackAction>> {
        let action = name.parse::<FallbackActionName>().ok()?;
        self.current.read().fallback(action)
    }

    /// 수준 변경 구독
    pub fn subscribe(&self) -> watch::Receiver<ServiceLevel> {
        self.level_tx.subscribe()
    }

    /// 주기적 재평가 루프. 종료 신호를 받으면 반환한다.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "저하 수준 평가 루프 시작");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.assess_system_health().await;
                }
                _ = shutdown.changed() => {
                    info!("저하 수준 평가 루프 종료");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FnProbe;
    use govchat_core::config::BreakerConfig;
    use govchat_core::error::CoreError;
    use govchat_core::models::degradation::{FallbackRequest, FallbackResponse};
    use govchat_core::ports::health::HealthProbe;
    use govchat_core::ports::metrics::{InMemoryMetricsSink, SERVICE_LEVEL};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn report(persistence: bool, transport: bool, agent: bool) -> HealthReport {
        [
            (PERSISTENCE_STORE.to_string(), persistence),
            (REAL_TIME_TRANSPORT.to_string(), transport),
            (UPSTREAM_AGENT.to_string(), agent),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn decision_table() {
        assert_eq!(decide_level(&report(true, true, true), BreakerState::Closed), ServiceLevel::Full);
        assert_eq!(
            decide_level(&report(true, false, true), BreakerState::Closed),
            ServiceLevel::Limited
        );
        assert_eq!(
            decide_level(&report(true, true, false), BreakerState::Closed),
            ServiceLevel::Limited
        );
        assert_eq!(
            decide_level(&report(false, false, false), BreakerState::Closed),
            ServiceLevel::Offline
        );
        assert_eq!(
            decide_level(&report(false, true, true), BreakerState::Closed),
            ServiceLevel::Offline
        );
        assert_eq!(
            decide_level(&report(true, false, false), BreakerState::Closed),
            ServiceLevel::Offline
        );
    }

    #[test]
    fn open_breaker_marks_agent_unhealthy() {
        assert_eq!(
            decide_level(&report(true, true, true), BreakerState::Open),
            ServiceLevel::Limited
        );
        assert_eq!(
            decide_level(&report(true, false, true), BreakerState::Open),
            ServiceLevel::Offline
        );
        assert_eq!(
            decide_level(&report(true, true, true), BreakerState::HalfOpen),
            ServiceLevel::Full
        );
    }

    #[test]
    fn empty_report_is_offline() {
        assert_eq!(decide_level(&HealthReport::empty(), BreakerState::Closed), ServiceLevel::Offline);
    }

    fn switch(initial: bool) -> (Arc<AtomicBool>, Arc<dyn HealthProbe>) {
        let flag = Arc::new(AtomicBool::new(initial));
        let observed = flag.clone();
        let probe = FnProbe::new(move || {
            let healthy = observed.load(Ordering::SeqCst);
            async move { Ok::<_, CoreError>(healthy) }
        });
        (flag, Arc::new(probe))
    }

    struct Harness {
        engine: DegradationEngine,
        persistence: Arc<AtomicBool>,
        transport: Arc<AtomicBool>,
        agent: Arc<AtomicBool>,
        breaker: Arc<CircuitBreaker>,
        sink: Arc<InMemoryMetricsSink>,
    }

    fn harness() -> Harness {
        let (persistence, p) = switch(true);
        let (transport, t) = switch(true);
        let (agent, a) = switch(true);

        let mut aggregator = HealthAggregator::new(Duration::from_secs(1));
        aggregator.register_check(PERSISTENCE_STORE, p);
        aggregator.register_check(REAL_TIME_TRANSPORT, t);
        aggregator.register_check(UPSTREAM_AGENT, a);

        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
            volume_threshold: 1,
            ..BreakerConfig::default()
        }));
        let queue = Arc::new(crate::offline_queue::OfflineQueue::new(10));
        let fallbacks = FallbackSet::new(
            Arc::new(crate::fallback::QueueMessageFallback::new(queue, 4_000)),
            Arc::new(crate::fallback::CachedMessagesFallback::new(None, 10)),
        );
        let sink = Arc::new(InMemoryMetricsSink::new());

        Harness {
            engine: DegradationEngine::new(
                Arc::new(aggregator),
                breaker.clone(),
                fallbacks,
                Metrics::new(sink.clone()),
            ),
            persistence,
            transport,
            agent,
            breaker,
            sink,
        }
    }

    #[tokio::test]
    async fn starts_offline_until_first_assessment() {
        let h = harness();
        assert_eq!(h.engine.level(), ServiceLevel::Offline);
        assert!(h.engine.can_use_feature("static-content"));
        assert!(!h.engine.can_use_feature("transport"));

        let level = h.engine.assess_system_health().await;
        assert_eq!(level.level(), ServiceLevel::Full);
        assert_eq!(
            level.features(),
            &[Feature::Transport, Feature::Agent, Feature::Persistence, Feature::RealTime]
        );
        assert!(level.fallback_names().is_empty());
        assert!(h.engine.get_fallback_action("sendMessage").is_none());
        assert_eq!(h.sink.gauge(SERVICE_LEVEL, &[]), Some(0.0));
    }

    #[tokio::test]
    async fn limited_level_queues_messages() {
        let h = harness();
        h.transport.store(false, Ordering::SeqCst);

        let level = h.engine.assess_system_health().await;
        assert_eq!(level.level(), ServiceLevel::Limited);
        assert!(h.engine.can_use_feature("message-queue"));
        assert!(!h.engine.can_use_feature("real-time"));
        assert_eq!(h.sink.gauge(SERVICE_LEVEL, &[]), Some(1.0));

        let send = h.engine.get_fallback_action("sendMessage").unwrap();
        let response = send
            .execute(&FallbackRequest {
                session_id: "sess_1".into(),
                content: Some("주민등록등본 발급".into()),
            })
            .await
            .unwrap();
        assert_eq!(response, FallbackResponse::Queued { position: 1 });

        let get = h.engine.get_fallback_action("getMessages").unwrap();
        let response = get
            .execute(&FallbackRequest {
                session_id: "sess_1".into(),
                content: None,
            })
            .await
            .unwrap();
        assert_eq!(response, FallbackResponse::Messages { messages: vec![] });
    }

    #[tokio::test]
    async fn offline_level_returns_fixed_notice() {
        let h = harness();
        h.persistence.store(false, Ordering::SeqCst);
        h.transport.store(false, Ordering::SeqCst);
        h.agent.store(false, Ordering::SeqCst);

        let level = h.engine.assess_system_health().await;
        assert_eq!(level.level(), ServiceLevel::Offline);
        assert_eq!(level.features(), &[Feature::StaticContent]);

        for name in ["sendMessage", "getMessages"] {
            let action = h.engine.get_fallback_action(name).unwrap();
            let response = action
                .execute(&FallbackRequest {
                    session_id: "sess_1".into(),
                    content: Some("hi".into()),
                })
                .await
                .unwrap();
            assert_eq!(response, FallbackResponse::offline());
        }
    }

    #[tokio::test]
    async fn open_breaker_degrades_to_limited() {
        let h = harness();
        assert_eq!(h.engine.assess_system_health().await.level(), ServiceLevel::Full);

        h.breaker.record_failure();
        assert_eq!(h.breaker.state(), BreakerState::Open);
        assert_eq!(h.engine.assess_system_health().await.level(), ServiceLevel::Limited);
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let h = harness();
        h.engine.assess_system_health().await;
        assert!(!h.engine.can_use_feature("websocket"));
        assert!(h.engine.get_fallback_action("deleteMessages").is_none());
    }

    #[tokio::test]
    async fn subscribers_observe_level_changes() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        assert_eq!(*rx.borrow(), ServiceLevel::Offline);

        h.engine.assess_system_health().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ServiceLevel::Full);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_reassesses_until_shutdown() {
        let h = Arc::new(harness());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = h.clone();
        let task = tokio::spawn(async move {
            engine.engine.run(Duration::from_secs(30), shutdown_rx).await;
        });

        // 첫 tick은 즉시
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.engine.level(), ServiceLevel::Full);

        h.agent.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.engine.level(), ServiceLevel::Limited);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
