//! 헬스 체크 집계.
//!
//! 등록된 프로브를 모두 동시에 실행하고, 전부 끝난 뒤 하나의 맵으로 합친다.
//! 프로브의 에러/패닉/타임아웃은 `false`로 기록되며 절대 전파되지 않는다.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use govchat_core::error::CoreError;
use govchat_core::models::health::HealthReport;
use govchat_core::ports::health::HealthProbe;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// 헬스 체크 집계기
///
/// 프로브 등록은 `&mut self`로 초기화 단계에서만 가능하고,
/// 공유(`Arc`) 이후에는 실행 결과만 바뀐다.
pub struct HealthAggregator {
    probes: Vec<(String, Arc<dyn HealthProbe>)>,
    probe_timeout: Duration,
    latest: RwLock<Arc<HealthReport>>,
}

impl HealthAggregator {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            probe_timeout,
            latest: RwLock::new(Arc::new(HealthReport::empty())),
        }
    }

    /// 프로브 등록. 같은 이름이 있으면 교체한다.
    pub fn register_check(&mut self, name: impl Into<String>, probe: Arc<dyn HealthProbe>) {
        let name = name.into();
        if let Some(slot) = self.probes.iter_mut().find(|(n, _)| *n == name) {
            warn!(probe = %name, "헬스 프로브 중복 등록, 교체");
            slot.1 = probe;
        } else {
            debug!(probe = %name, "헬스 프로브 등록");
            self.probes.push((name, probe));
        }
    }

    /// 등록된 프로브 이름 (등록 순)
    pub fn names(&self) -> Vec<&str> {
        self.probes.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// 모든 프로브를 동시에 실행하고 결과를 합친다
    pub async fn assess(&self) -> HealthReport {
        let checks = self.probes.iter().map(|(name, probe)| {
            let name = name.clone();
            let probe = probe.clone();
            let timeout = self.probe_timeout;
            // 패닉 격리를 위해 프로브마다 별도 태스크
            let handle =
                tokio::spawn(async move { tokio::time::timeout(timeout, probe.check()).await });
            async move {
                let healthy = match handle.await {
                    Ok(Ok(Ok(healthy))) => healthy,
                    Ok(Ok(Err(e))) => {
                        warn!(probe = %name, error = %e, "헬스 프로브 실패");
                        false
                    }
                    Ok(Err(_)) => {
                        warn!(probe = %name, timeout_ms = timeout.as_millis() as u64, "헬스 프로브 타임아웃");
                        false
                    }
                    Err(e) => {
                        warn!(probe = %name, error = %e, "헬스 프로브 패닉");
                        false
                    }
                };
                (name, healthy)
            }
        });

        let results: BTreeMap<String, bool> = join_all(checks).await.into_iter().collect();
        let report = HealthReport::new(results);

        if !report.all_healthy() {
            debug!(unhealthy = ?report.unhealthy(), "비정상 의존성 감지");
        }
        *self.latest.write() = Arc::new(report.clone());
        report
    }

    /// 마지막 평가 결과 (평가 전에는 빈 보고서)
    pub fn latest(&self) -> Arc<HealthReport> {
        self.latest.read().clone()
    }
}

/// 클로저 기반 프로브
pub struct FnProbe<F> {
    check: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, CoreError>> + Send,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, CoreError>> + Send,
{
    async fn check(&self) -> Result<bool, CoreError> {
        (self.check)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use govchat_core::models::health::{PERSISTENCE_STORE, REAL_TIME_TRANSPORT, UPSTREAM_AGENT};

    fn fixed(healthy: bool) -> Arc<dyn HealthProbe> {
        Arc::new(FnProbe::new(move || async move { Ok::<_, CoreError>(healthy) }))
    }

    fn delayed(delay: Duration) -> Arc<dyn HealthProbe> {
        Arc::new(FnProbe::new(move || async move {
            tokio::time::sleep(delay).await;
            Ok::<_, CoreError>(true)
        }))
    }

    struct PanickingProbe;

    #[async_trait]
    impl HealthProbe for PanickingProbe {
        async fn check(&self) -> Result<bool, CoreError> {
            panic!("probe bug");
        }
    }

    #[tokio::test]
    async fn merges_all_results() {
        let mut aggregator = HealthAggregator::new(Duration::from_secs(1));
        aggregator.register_check(PERSISTENCE_STORE, fixed(true));
        aggregator.register_check(REAL_TIME_TRANSPORT, fixed(false));
        aggregator.register_check(UPSTREAM_AGENT, fixed(true));

        let report = aggregator.assess().await;
        assert_eq!(report.results.len(), 3);
        assert!(report.is_healthy(PERSISTENCE_STORE));
        assert!(!report.is_healthy(REAL_TIME_TRANSPORT));
        assert_eq!(aggregator.latest().results, report.results);
    }

    #[tokio::test]
    async fn failures_are_recorded_as_false() {
        let mut aggregator = HealthAggregator::new(Duration::from_secs(1));
        aggregator.register_check(
            "errors",
            Arc::new(FnProbe::new(|| async {
                Err::<bool, _>(CoreError::HealthProbe {
                    probe: "errors".into(),
                    message: "unreachable".into(),
                })
            })),
        );
        aggregator.register_check("panics", Arc::new(PanickingProbe));
        aggregator.register_check("ok", fixed(true));

        let report = aggregator.assess().await;
        assert!(!report.is_healthy("errors"));
        assert!(!report.is_healthy("panics"));
        assert!(report.is_healthy("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out_as_false() {
        let mut aggregator = HealthAggregator::new(Duration::from_millis(100));
        aggregator.register_check("slow", delayed(Duration::from_secs(10)));
        aggregator.register_check("fast", fixed(true));

        let started = tokio::time::Instant::now();
        let report = aggregator.assess().await;
        assert!(!report.is_healthy("slow"));
        assert!(report.is_healthy("fast"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn probes_run_concurrently() {
        let mut aggregator = HealthAggregator::new(Duration::from_secs(5));
        for i in 0..5 {
            aggregator.register_check(format!("probe-{i}"), delayed(Duration::from_millis(100)));
        }

        let started = tokio::time::Instant::now();
        let report = aggregator.assess().await;
        let elapsed = started.elapsed();

        assert!(report.all_healthy());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut aggregator = HealthAggregator::new(Duration::from_secs(1));
        aggregator.register_check("a", fixed(true));
        aggregator.register_check("a", fixed(false));
        assert_eq!(aggregator.names(), vec!["a"]);
    }
}
