//! 서킷 브레이커.
//!
//! Closed → Open → Half-Open → Closed/Open 3상태 머신.
//! 롤링 윈도우의 실패율로 열리고, Open 동안에는 대상 호출을 전혀 시도하지 않는다.
//! 상태 전이와 호출 결과는 `broadcast` 채널의 [`BreakerEvent`]로 통지된다.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use govchat_core::config::BreakerConfig;
use govchat_core::error::CoreError;
use govchat_core::models::breaker::{BreakerEvent, BreakerState, BreakerStats};
use govchat_core::ports::metrics::Metrics;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 이벤트 채널 버퍼 크기
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct Inner {
    state: BreakerState,
    /// (완료 시각, 성공 여부)
    window: VecDeque<(Instant, bool)>,
    stats: BreakerStats,
    opened_at: Option<Instant>,
    /// Half-Open 시험 호출 진행 중
    probe_in_flight: bool,
    /// Open 전이마다 증가 (이전 리셋 타이머 무효화)
    generation: u64,
}

struct Shared {
    config: BreakerConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<BreakerEvent>,
}

/// 서킷 브레이커 (복제 시 같은 상태 공유)
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.config.name)
            .field("state", &self.shared.inner.lock().state)
            .finish()
    }
}

/// 진행 중인 호출 허가. 결과 보고 없이 drop되면 시험 호출 슬롯을 반납한다.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// 허가 시점의 세대
    generation: u64,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        let origin = Origin::Call {
            generation: self.generation,
            probe: self.probe,
        };
        if success {
            self.breaker.on_success(origin);
        } else {
            self.breaker.on_failure(origin);
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            let mut inner = self.breaker.shared.inner.lock();
            if inner.generation == self.generation {
                inner.probe_in_flight = false;
            }
        }
    }
}

/// 결과의 출처
#[derive(Debug, Clone, Copy)]
enum Origin {
    /// `fire`로 허가된 호출
    Call { generation: u64, probe: bool },
    /// `record_success`/`record_failure` 보고
    Recorded,
}

impl Origin {
    /// 현재 상태를 바꿀 수 있는 결과인지.
    /// Half-Open은 같은 세대의 시험 호출만, Closed는 같은 세대의 일반 호출/보고만 반영한다.
    fn applies_to(self, state: BreakerState, generation: u64) -> bool {
        match (self, state) {
            (Origin::Call { generation: g, probe }, BreakerState::HalfOpen) => {
                probe && g == generation
            }
            (Origin::Call { generation: g, probe }, BreakerState::Closed) => {
                !probe && g == generation
            }
            (Origin::Recorded, BreakerState::Closed) => true,
            (_, _) => false,
        }
    }
}

impl CircuitBreaker {
    /// 새 브레이커 생성 (Closed)
    pub fn new(config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(Inner {
                    state: BreakerState::Closed,
                    window: VecDeque::new(),
                    stats: BreakerStats::default(),
                    opened_at: None,
                    probe_in_flight: false,
                    generation: 0,
                }),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.shared.config
    }

    /// 현재 상태 (리셋 타이머 경과 시 Half-Open으로 전이 후 반환)
    pub fn state(&self) -> BreakerState {
        let mut inner = self.shared.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// 누적 통계
    pub fn stats(&self) -> BreakerStats {
        self.shared.inner.lock().stats
    }

    /// 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.shared.events.subscribe()
    }

    /// 보호된 호출 실행.
    ///
    /// - Open: 대상 호출 없이 `CircuitOpen` 반환
    /// - Half-Open: 시험 호출 1건만 통과, 나머지는 `CircuitOpen`
    /// - `timeout_ms` 초과 시 호출을 버리고 `Timeout` 실패로 집계
    pub async fn fire<F, Fut, T>(&self, operation: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let permit = self.acquire()?;
        let timeout_ms = self.shared.config.timeout_ms;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), operation()).await {
            Ok(Ok(value)) => {
                permit.settle(true);
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.settle(false);
                Err(e)
            }
            Err(_) => {
                self.shared.inner.lock().stats.timeouts += 1;
                self.emit(BreakerEvent::Timeout {
                    name: self.name().to_string(),
                });
                permit.settle(false);
                Err(CoreError::Timeout { timeout_ms })
            }
        }
    }

    /// 외부에서 관찰한 성공 보고 (예: 전송 연결 수립)
    ///
    /// Closed 윈도우에만 반영되며 Half-Open 상태를 확정하지 않는다.
    pub fn record_success(&self) {
        self.on_success(Origin::Recorded);
    }

    /// 외부에서 관찰한 실패 보고 (예: 전송 연결 끊김)
    pub fn record_failure(&self) {
        self.on_failure(Origin::Recorded);
    }

    fn acquire(&self) -> Result<CallPermit<'_>, CoreError> {
        let mut inner = self.shared.inner.lock();
        self.refresh(&mut inner);
        inner.stats.fires += 1;

        let state = inner.state;
        let probe = match state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                true
            }
            BreakerState::HalfOpen | BreakerState::Open => {
                inner.stats.rejects += 1;
                drop(inner);
                debug!(breaker = %self.name(), "브레이커 열림, 호출 거부");
                self.emit(BreakerEvent::Rejected {
                    name: self.name().to_string(),
                });
                return Err(CoreError::CircuitOpen {
                    name: self.name().to_string(),
                });
            }
        };

        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            probe,
            settled: false,
        })
    }

    fn on_success(&self, origin: Origin) {
        let name = self.name().to_string();
        let mut inner = self.shared.inner.lock();
        self.refresh(&mut inner);
        inner.stats.successes += 1;

        let state = inner.state;
        if !origin.applies_to(state, inner.generation) {
            drop(inner);
            debug!(breaker = %name, ?origin, %state, "이전 단계의 호출 결과, 통계만 반영");
            self.emit(BreakerEvent::Success { name });
            return;
        }
        match state {
            BreakerState::Closed => {
                let now = Instant::now();
                inner.window.push_back((now, true));
                self.prune(&mut inner, now);
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.window.clear();
                inner.opened_at = None;
                inner.probe_in_flight = false;
                drop(inner);
                info!(breaker = %name, event = "closed", "서킷 브레이커 복구 (Closed)");
                self.emit(BreakerEvent::Closed { name: name.clone() });
            }
            BreakerState::Open => {}
        }

        self.emit(BreakerEvent::Success { name });
    }

    fn on_failure(&self, origin: Origin) {
        let name = self.name().to_string();
        let mut inner = self.shared.inner.lock();
        self.refresh(&mut inner);
        inner.stats.failures += 1;

        let state = inner.state;
        if !origin.applies_to(state, inner.generation) {
            drop(inner);
            debug!(breaker = %name, ?origin, %state, "이전 단계의 호출 결과, 통계만 반영");
            self.emit(BreakerEvent::Failure { name });
            return;
        }
        let trip = match state {
            BreakerState::Closed => {
                let now = Instant::now();
                inner.window.push_back((now, false));
                self.prune(&mut inner, now);

                let total = inner.window.len() as u64;
                let failures = inner.window.iter().filter(|(_, ok)| !ok).count() as u64;
                total >= u64::from(self.shared.config.volume_threshold)
                    && failures * 100
                        >= u64::from(self.shared.config.error_threshold_percent) * total
            }
            BreakerState::HalfOpen => true,
            BreakerState::Open => false,
        };

        if trip {
            let generation = self.open(&mut inner);
            drop(inner);
            self.arm_reset_timer(generation);
        } else {
            drop(inner);
        }

        self.emit(BreakerEvent::Failure { name });
    }

    /// Open 전이. 새 세대 번호를 반환한다.
    fn open(&self, inner: &mut Inner) -> u64 {
        let previous = inner.state;
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        inner.window.clear();
        inner.generation += 1;

        warn!(
            breaker = %self.name(),
            event = "opened",
            from = %previous,
            reset_timeout_ms = self.shared.config.reset_timeout_ms,
            "서킷 브레이커 열림"
        );
        self.emit(BreakerEvent::Opened {
            name: self.name().to_string(),
        });
        inner.generation
    }

    /// 리셋 타이머 경과 시 Open → Half-Open
    fn refresh(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let reset = Duration::from_millis(self.shared.config.reset_timeout_ms);
        if inner.opened_at.is_some_and(|at| at.elapsed() >= reset) {
            self.half_open(inner);
        }
    }

    fn half_open(&self, inner: &mut Inner) {
        inner.state = BreakerState::HalfOpen;
        inner.probe_in_flight = false;
        info!(breaker = %self.name(), event = "half_opened", "서킷 브레이커 시험 단계 (Half-Open)");
        self.emit(BreakerEvent::HalfOpened {
            name: self.name().to_string(),
        });
    }

    /// 롤링 윈도우 밖의 기록 제거
    fn prune(&self, inner: &mut Inner, now: Instant) {
        let window = Duration::from_millis(self.shared.config.rolling_window_ms);
        while inner
            .window
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > window)
        {
            inner.window.pop_front();
        }
    }

    /// 소유자 없이 동작하는 리셋 타이머. 런타임 밖에서는 다음 조회 시 전이한다.
    fn arm_reset_timer(&self, generation: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let reset = Duration::from_millis(self.shared.config.reset_timeout_ms);

        handle.spawn(async move {
            tokio::time::sleep(reset).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let breaker = CircuitBreaker { shared };
            let mut inner = breaker.shared.inner.lock();
            if inner.generation == generation && inner.state == BreakerState::Open {
                breaker.half_open(&mut inner);
            }
        });
    }

    fn emit(&self, event: BreakerEvent) {
        // 구독자가 없으면 무시
        let _ = self.shared.events.send(event);
    }
}

/// 레지스트리 스냅샷 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub stats: BreakerStats,
}

/// 이름별 브레이커 레지스트리 (의존성당 하나, 호출 지점 간 공유)
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이름으로 조회, 없으면 생성. 이미 있으면 `config`는 무시된다.
    pub fn get_or_create(&self, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(&config.name) {
            return existing.clone();
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(config.name.clone())
            .or_insert_with(|| {
                debug!(breaker = %config.name, "서킷 브레이커 등록");
                Arc::new(CircuitBreaker::new(config))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// 이름 → 상태/통계
    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| {
                (
                    name.clone(),
                    BreakerSnapshot {
                        state: breaker.state(),
                        stats: breaker.stats(),
                    },
                )
            })
            .collect()
    }

    /// 브레이커별 상태 게이지 기록
    pub fn publish_states(&self, metrics: &Metrics) {
        for (name, snapshot) in self.snapshot() {
            metrics.breaker_state(&name, snapshot.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use govchat_core::ports::metrics::{InMemoryMetricsSink, CIRCUIT_BREAKER_STATE};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(volume: u32, threshold: u8, reset_ms: u64) -> BreakerConfig {
        BreakerConfig {
            name: "upstream-agent".to_string(),
            timeout_ms: 500,
            error_threshold_percent: threshold,
            reset_timeout_ms: reset_ms,
            volume_threshold: volume,
            rolling_window_ms: 10_000,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CoreError> {
        breaker
            .fire(|| async { Err::<(), _>(CoreError::send_failed("boom")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, CoreError> {
        breaker.fire(|| async { Ok(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_then_recovers_after_reset_timeout() {
        let breaker = CircuitBreaker::new(config(3, 50, 1000));

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(1000)).await;

        let successes_before = breaker.stats().successes;
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.stats().successes, successes_before + 1);
    }

    #[tokio::test]
    async fn stays_closed_below_volume_threshold() {
        let breaker = CircuitBreaker::new(config(5, 50, 1000));

        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn stays_closed_below_error_threshold() {
        let breaker = CircuitBreaker::new(config(4, 75, 1000));

        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);

        // 3/5 = 60% < 75%
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);

        // 4/6 ≈ 67%, 5/7 ≈ 71%, 6/8 = 75%
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn open_breaker_never_invokes_operation() {
        let breaker = CircuitBreaker::new(config(1, 100, 60_000));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        let calls = &AtomicU32::new(0);
        for _ in 0..10 {
            let result = breaker
                .fire(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            assert_matches!(result, Err(CoreError::CircuitOpen { name }) if name == "upstream-agent");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.stats().rejects, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new(config(1, 100, 1000));
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        // 타이머 재무장
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_allows_single_probe() {
        let breaker = CircuitBreaker::new(config(1, 100, 100));
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_breaker = breaker.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .fire(|| async move {
                    let _ = release_rx.await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;

        assert_matches!(succeed(&breaker).await, Err(CoreError::CircuitOpen { .. }));

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn call_admitted_while_closed_does_not_settle_half_open() {
        let breaker = CircuitBreaker::new(config(1, 100, 100));

        let slow_breaker = breaker.clone();
        let slow = tokio::spawn(async move {
            slow_breaker
                .fire(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        slow.await.unwrap().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.stats().successes, 1);

        // 시험 호출만 상태를 확정한다
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_failure_does_not_reopen_half_open() {
        let breaker = CircuitBreaker::new(config(1, 100, 100));

        let slow_breaker = breaker.clone();
        let slow = tokio::spawn(async move {
            slow_breaker
                .fire(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Err::<(), _>(CoreError::send_failed("late"))
                })
                .await
        });
        tokio::task::yield_now().await;

        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        assert!(slow.await.unwrap().is_err());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_outcome_does_not_settle_half_open() {
        let breaker = CircuitBreaker::new(config(1, 100, 100));
        breaker.record_failure();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_counts_as_timeout() {
        let breaker = CircuitBreaker::new(config(1, 100, 1000));

        let result = breaker
            .fire(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_matches!(result, Err(CoreError::Timeout { timeout_ms: 500 }));
        let stats = breaker.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn emits_transition_events() {
        let breaker = CircuitBreaker::new(config(1, 100, 60_000));
        let mut events = breaker.subscribe();

        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;

        assert_eq!(
            events.recv().await.unwrap(),
            BreakerEvent::Opened {
                name: "upstream-agent".into()
            }
        );
        assert_matches!(events.recv().await.unwrap(), BreakerEvent::Failure { .. });
        assert_matches!(events.recv().await.unwrap(), BreakerEvent::Rejected { .. });
    }

    #[tokio::test]
    async fn recorded_outcomes_feed_the_window() {
        let breaker = CircuitBreaker::new(config(2, 50, 60_000));
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.stats().fires, 0);
    }

    #[tokio::test]
    async fn registry_shares_instances_by_name() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create(config(1, 100, 60_000));
        let b = registry.get_or_create(config(50, 10, 1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().volume_threshold, 1);
        assert!(registry.get("missing").is_none());

        let _ = fail(&a).await;
        let snapshot = registry.snapshot();
        assert_eq!(snapshot["upstream-agent"].state, BreakerState::Open);

        let sink = Arc::new(InMemoryMetricsSink::new());
        registry.publish_states(&Metrics::new(sink.clone()));
        assert_eq!(
            sink.gauge(CIRCUIT_BREAKER_STATE, &[("name", "upstream-agent")]),
            Some(2.0)
        );
    }
}
