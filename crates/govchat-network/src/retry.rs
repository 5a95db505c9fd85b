//! 재시도 엔진.
//!
//! 실패한 비동기 작업을 에러 종류로 분류하여 백오프 후 재시도하거나,
//! `RetryExhausted` / `NonRetryable` 태그를 붙여 종결한다.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use govchat_core::config::RetryPolicyConfig;
use govchat_core::error::CoreError;
use rand::Rng;
use tracing::warn;

/// 지터 배수 하한 (상한은 1.0)
const JITTER_FLOOR: f64 = 0.5;

/// 재시도 분류 함수
pub type RetryClassifier = Arc<dyn Fn(&CoreError) -> bool + Send + Sync>;

/// 재시도 정책 (호출 지점별, 불변)
#[derive(Clone)]
pub struct RetryPolicy {
    /// 로그용 정책 이름
    name: &'static str,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    is_retryable: RetryClassifier,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// 정책 생성. 기본 분류는 [`CoreError::is_retryable`].
    ///
    /// `max_attempts`는 최소 1, `max_delay`는 최소 `base_delay`로 보정된다.
    pub fn new(
        name: &'static str,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter: bool,
    ) -> Self {
        Self {
            name,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_factor: if backoff_factor.is_nan() || backoff_factor < 1.0 {
                1.0
            } else {
                backoff_factor
            },
            jitter,
            is_retryable: Arc::new(CoreError::is_retryable),
        }
    }

    /// 실시간 전송 연결 정책 (지수 ×2, 지터 사용)
    pub fn transport() -> Self {
        Self::from_config("transport", &RetryPolicyConfig::transport_defaults())
    }

    /// 요청/응답 정책 (고정 지연, 지터 없음)
    pub fn request() -> Self {
        Self::from_config("request", &RetryPolicyConfig::request_defaults())
    }

    /// 설정 섹션에서 생성
    pub fn from_config(name: &'static str, config: &RetryPolicyConfig) -> Self {
        Self::new(
            name,
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_factor,
            config.jitter,
        )
    }

    /// 재시도 분류 함수 교체
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&CoreError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(classifier);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// 분류 함수 적용
    pub fn is_retryable(&self, error: &CoreError) -> bool {
        (self.is_retryable)(error)
    }

    /// `attempt`번째 실패 후 대기 시간 (1부터)
    ///
    /// `min(max, base × factor^(attempt-1))`, 지터 사용 시 [0.5, 1.0] 배수 적용.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let capped = (base_ms * self.backoff_factor.powi(exp)).min(max_ms);

        let delay_ms = if self.jitter {
            capped * rand::rng().random_range(JITTER_FLOOR..=1.0)
        } else {
            capped
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// 재시도 실행.
///
/// 이미 태그된 에러(`RetryExhausted`, `NonRetryable`, `CircuitOpen`)는 분류 없이 그대로 반환한다.
/// 그 외 최종 실패는 반드시 두 태그 중 하나로 감싸진다.
pub async fn run_with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt: u32 = 1;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if error.is_tagged() {
            return Err(error);
        }

        let retryable = policy.is_retryable(&error);
        let remaining = policy.max_attempts.saturating_sub(attempt);
        let delay = if retryable && remaining > 0 {
            policy.delay_for_attempt(attempt)
        } else {
            Duration::ZERO
        };

        warn!(
            event = "attempt_failed",
            policy = policy.name,
            attempt,
            remaining,
            delay_ms = delay.as_millis() as u64,
            retryable,
            error = %error,
            "작업 시도 실패"
        );

        if !retryable {
            return Err(CoreError::NonRetryable(Box::new(error)));
        }
        if remaining == 0 {
            return Err(CoreError::RetryExhausted {
                attempts: attempt,
                last: Box::new(error),
            });
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            "test",
            max_attempts,
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2.0,
            false,
        )
    }

    #[test]
    fn delay_is_exponential_and_capped() {
        let policy = fixed(10);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(1000));
    }

    #[test]
    fn jittered_delay_stays_in_band() {
        let policy = RetryPolicy::transport();
        for attempt in 1..=20 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= policy.max_delay(), "attempt {attempt}: {delay:?}");
        }
        let first = policy.delay_for_attempt(1);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(1000));
    }

    #[test]
    fn request_policy_uses_fixed_delay() {
        let policy = RetryPolicy::request();
        assert_eq!(policy.delay_for_attempt(1), policy.delay_for_attempt(3));
    }

    #[test]
    fn constructor_clamps_invalid_values() {
        let policy = RetryPolicy::new(
            "clamped",
            0,
            Duration::from_millis(500),
            Duration::from_millis(10),
            0.5,
            false,
        );
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.max_delay(), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = run_with_retry(&fixed(3), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CoreError::TransportConnection("reset".into()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = run_with_retry(&fixed(4), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Timeout { timeout_ms: 10 })
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_matches!(
            result,
            Err(CoreError::RetryExhausted { attempts: 4, last }) if matches!(*last, CoreError::Timeout { .. })
        );
    }

    #[test]
    fn terminal_error_is_not_retried() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = tokio_test::block_on(run_with_retry(&fixed(5), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::validation("content", "empty"))
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_matches!(result, Err(CoreError::NonRetryable(inner)) if matches!(*inner, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn tagged_errors_pass_through_unchanged() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = run_with_retry(&fixed(5), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::CircuitOpen {
                name: "upstream-agent".into(),
            })
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_matches!(result, Err(CoreError::CircuitOpen { name }) if name == "upstream-agent");

        let nested: Result<(), _> = run_with_retry(&fixed(5), || async move {
            Err(CoreError::NonRetryable(Box::new(CoreError::Internal("x".into()))))
        })
        .await;
        assert_matches!(nested, Err(CoreError::NonRetryable(inner)) if matches!(*inner, CoreError::Internal(_)));
    }

    #[tokio::test]
    async fn custom_classifier_overrides_kind() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(
            "custom",
            2,
            Duration::from_millis(1),
            Duration::from_millis(1),
            1.0,
            false,
        )
        .with_classifier(|_| false);

        let result: Result<(), _> = run_with_retry(&policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::TransportConnection("refused".into()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_matches!(result, Err(CoreError::NonRetryable(_)));
    }
}
