//! tracing 기반 메트릭 싱크.
//!
//! 샘플마다 `govchat::metrics` 타깃으로 debug 이벤트를 하나 남긴다.
//! 수집기는 이 타깃만 골라 JSON 로그에서 읽으면 된다.

use govchat_core::ports::metrics::{series_key, Labels, MetricsSink};
use tracing::debug;

/// 메트릭 로그 타깃
pub const METRICS_TARGET: &str = "govchat::metrics";

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn incr_counter(&self, name: &str, labels: Labels<'_>, value: u64) {
        debug!(
            target: METRICS_TARGET,
            kind = "counter",
            series = %series_key(name, labels),
            value
        );
    }

    fn observe_histogram(&self, name: &str, labels: Labels<'_>, value: f64) {
        debug!(
            target: METRICS_TARGET,
            kind = "histogram",
            series = %series_key(name, labels),
            value
        );
    }

    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64) {
        debug!(
            target: METRICS_TARGET,
            kind = "gauge",
            series = %series_key(name, labels),
            value
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use govchat_core::models::degradation::ServiceLevel;
    use govchat_core::ports::metrics::Metrics;
    use std::sync::Arc;

    #[test]
    fn sink_accepts_all_primitives() {
        let metrics = Metrics::new(Arc::new(TracingMetricsSink));
        metrics.message("query", "success");
        metrics.round_trip(std::time::Duration::from_millis(120));
        metrics.service_level(ServiceLevel::Limited);
    }
}
