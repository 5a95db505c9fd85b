//! 메트릭 포트.
//!
//! 구현: [`NoopMetricsSink`], [`InMemoryMetricsSink`] (테스트/진단용),
//! `govchat-app::metrics::TracingMetricsSink` (tracing 이벤트 출력).
//!
//! 구성 요소는 [`Metrics`]의 타입 지정 헬퍼만 사용하며 메트릭 이름을 직접 쓰지 않는다.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ErrorKind;
use crate::models::breaker::BreakerState;
use crate::models::degradation::ServiceLevel;

/// 메시지 카운터 (`type`, `status`)
pub const MESSAGES_TOTAL: &str = "govchat_messages_total";
/// 메시지 왕복 시간 히스토그램 (초)
pub const MESSAGE_ROUND_TRIP_SECONDS: &str = "govchat_message_round_trip_seconds";
/// 활성 연결 게이지
pub const ACTIVE_CONNECTIONS: &str = "govchat_active_connections";
/// 에러 카운터 (`type`, `service`)
pub const ERRORS_TOTAL: &str = "govchat_errors_total";
/// 브레이커 상태 게이지 (`name`)
pub const CIRCUIT_BREAKER_STATE: &str = "govchat_circuit_breaker_state";
/// 서비스 수준 게이지
pub const SERVICE_LEVEL: &str = "govchat_service_level";

/// 메트릭 라벨 쌍
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// 메트릭 출력 대상
pub trait MetricsSink: Send + Sync {
    /// 카운터 증가
    fn incr_counter(&self, name: &str, labels: Labels<'_>, value: u64);

    /// 히스토그램 관측
    fn observe_histogram(&self, name: &str, labels: Labels<'_>, value: f64);

    /// 게이지 설정
    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64);
}

/// 아무것도 기록하지 않는 싱크
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn incr_counter(&self, _name: &str, _labels: Labels<'_>, _value: u64) {}
    fn observe_histogram(&self, _name: &str, _labels: Labels<'_>, _value: f64) {}
    fn set_gauge(&self, _name: &str, _labels: Labels<'_>, _value: f64) {}
}

/// 메모리 내 집계 싱크
///
/// 시리즈 키는 `name{k=v,...}` 형식 (라벨은 입력 순서 유지).
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    counters: Mutex<BTreeMap<String, u64>>,
    gauges: Mutex<BTreeMap<String, f64>>,
    histograms: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 카운터 값 (없으면 0)
    pub fn counter(&self, name: &str, labels: Labels<'_>) -> u64 {
        self.counters
            .lock()
            .get(&series_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    /// 게이지 값
    pub fn gauge(&self, name: &str, labels: Labels<'_>) -> Option<f64> {
        self.gauges.lock().get(&series_key(name, labels)).copied()
    }

    /// 히스토그램 관측값 목록
    pub fn histogram(&self, name: &str, labels: Labels<'_>) -> Vec<f64> {
        self.histograms
            .lock()
            .get(&series_key(name, labels))
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn incr_counter(&self, name: &str, labels: Labels<'_>, value: u64) {
        *self
            .counters
            .lock()
            .entry(series_key(name, labels))
            .or_insert(0) += value;
    }

    fn observe_histogram(&self, name: &str, labels: Labels<'_>, value: f64) {
        self.histograms
            .lock()
            .entry(series_key(name, labels))
            .or_default()
            .push(value);
    }

    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64) {
        self.gauges.lock().insert(series_key(name, labels), value);
    }
}

/// 시리즈 키 생성
pub fn series_key(name: &str, labels: Labels<'_>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let joined = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}{{{joined}}}")
}

/// 타입 지정 메트릭 헬퍼
#[derive(Clone)]
pub struct Metrics {
    sink: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::noop()
    }
}

impl Metrics {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    /// 기록하지 않는 헬퍼
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopMetricsSink))
    }

    /// 메시지 처리 결과 (`status`: success / error / fallback)
    pub fn message(&self, message_type: &str, status: &str) {
        self.sink.incr_counter(
            MESSAGES_TOTAL,
            &[("type", message_type), ("status", status)],
            1,
        );
    }

    /// 메시지 왕복 시간
    pub fn round_trip(&self, elapsed: std::time::Duration) {
        self.sink
            .observe_histogram(MESSAGE_ROUND_TRIP_SECONDS, &[], elapsed.as_secs_f64());
    }

    /// 활성 연결 수
    pub fn active_connections(&self, count: usize) {
        self.sink.set_gauge(ACTIVE_CONNECTIONS, &[], count as f64);
    }

    /// 에러 발생
    pub fn error(&self, kind: ErrorKind, service: &str) {
        self.sink
            .incr_counter(ERRORS_TOTAL, &[("type", kind.as_str()), ("service", service)], 1);
    }

    /// 브레이커 상태
    pub fn breaker_state(&self, name: &str, state: BreakerState) {
        self.sink
            .set_gauge(CIRCUIT_BREAKER_STATE, &[("name", name)], state.gauge_value());
    }

    /// 서비스 수준
    pub fn service_level(&self, level: ServiceLevel) {
        self.sink.set_gauge(SERVICE_LEVEL, &[], level.gauge_value());
    }
}
