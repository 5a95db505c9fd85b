//! 애플리케이션 설정 구조체.
//!
//! 업스트림 에이전트 주소, 재시도 정책, 서킷 브레이커 임계값, 헬스 체크 주기 등
//! 런타임 설정을 정의한다. 프로세스 시작 시 한 번만 읽으며, 실행 중 다시 읽지 않는다.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 서비스 식별 설정
    #[serde(default)]
    pub service: ServiceConfig,
    /// 실시간 연결 설정
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// 재시도 정책 설정
    #[serde(default)]
    pub retry: RetryConfig,
    /// 서킷 브레이커 설정
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// 헬스 체크 / 저하 판정 설정
    #[serde(default)]
    pub health: HealthConfig,
    /// 대화 저장소 설정
    #[serde(default)]
    pub storage: StorageConfig,
}

// ============================================================
// 서비스 설정
// ============================================================

/// 서비스 식별 및 업스트림 주소
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// 로그/메트릭에 쓰이는 서비스 이름
    #[serde(default = "default_service_name")]
    pub name: String,
    /// 업스트림 대화 에이전트 WebSocket URL
    #[serde(default = "default_agent_url")]
    pub agent_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            agent_url: default_agent_url(),
        }
    }
}

// ============================================================
// 연결 설정
// ============================================================

/// 실시간 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// 연결 단위 재연결 최대 횟수
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// 재연결 기본 지연 (밀리초): 실제 지연은 `지연 × 재시도 횟수`
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// 하트비트 주기 (밀리초)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// 연결 1회 시도 타임아웃 (밀리초)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// 사용자 메시지 최대 길이 (문자 수)
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

impl ConnectionConfig {
    /// 재연결 기본 지연
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// 하트비트 주기
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// 연결 시도 타임아웃
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ============================================================
// 재시도 설정
// ============================================================

/// 호출 지점별 재시도 정책 모음
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 실시간 전송 연결용 (exponential + jitter)
    #[serde(default = "RetryPolicyConfig::transport_defaults")]
    pub transport: RetryPolicyConfig,
    /// 요청/응답 호출용 (고정 지연)
    #[serde(default = "RetryPolicyConfig::request_defaults")]
    pub request: RetryPolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transport: RetryPolicyConfig::transport_defaults(),
            request: RetryPolicyConfig::request_defaults(),
        }
    }
}

/// 단일 재시도 정책 설정값
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// 최대 시도 횟수 (첫 시도 포함, 1 이상)
    pub max_attempts: u32,
    /// 기본 지연 (밀리초, 0 초과)
    pub base_delay_ms: u64,
    /// 최대 지연 (밀리초, 기본 지연 이상)
    pub max_delay_ms: u64,
    /// 지연 배수 (1.0이면 고정 지연)
    pub backoff_factor: f64,
    /// jitter 적용 여부
    pub jitter: bool,
}

impl RetryPolicyConfig {
    /// 전송 연결 기본값: 3회, 1초 → 최대 10초, ×2, jitter
    pub fn transport_defaults() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }

    /// 요청/응답 기본값: 3회, 500ms 고정
    pub fn request_defaults() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 500,
            backoff_factor: 1.0,
            jitter: false,
        }
    }

    fn validate(&self, section: &str) -> Result<(), CoreError> {
        if self.max_attempts < 1 {
            return Err(CoreError::Config(format!(
                "{section}.max_attempts는 1 이상이어야 합니다"
            )));
        }
        if self.base_delay_ms == 0 {
            return Err(CoreError::Config(format!(
                "{section}.base_delay_ms는 0보다 커야 합니다"
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(CoreError::Config(format!(
                "{section}.max_delay_ms({})가 base_delay_ms({})보다 작습니다",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(CoreError::Config(format!(
                "{section}.backoff_factor는 1.0 이상이어야 합니다"
            )));
        }
        Ok(())
    }
}

// ============================================================
// 서킷 브레이커 설정
// ============================================================

/// 서킷 브레이커 설정 (업스트림 의존성 하나당 하나)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// 브레이커 이름 (레지스트리 키)
    #[serde(default = "default_breaker_name")]
    pub name: String,
    /// 호출 타임아웃 (밀리초): 초과 시 실패로 집계
    #[serde(default = "default_breaker_timeout_ms")]
    pub timeout_ms: u64,
    /// 실패율 임계값 (1-100 %)
    #[serde(default = "default_error_threshold_percent")]
    pub error_threshold_percent: u8,
    /// Open → Half-Open 대기 (밀리초)
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// 판정에 필요한 최소 호출 수
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: u32,
    /// 롤링 윈도 길이 (밀리초)
    #[serde(default = "default_rolling_window_ms")]
    pub rolling_window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: default_breaker_name(),
            timeout_ms: default_breaker_timeout_ms(),
            error_threshold_percent: default_error_threshold_percent(),
            reset_timeout_ms: default_reset_timeout_ms(),
            volume_threshold: default_volume_threshold(),
            rolling_window_ms: default_rolling_window_ms(),
        }
    }
}

impl BreakerConfig {
    /// 설정값 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Config("breaker.name이 비어 있습니다".to_string()));
        }
        if !(1..=100).contains(&self.error_threshold_percent) {
            return Err(CoreError::Config(format!(
                "breaker.error_threshold_percent는 1-100 범위여야 합니다: {}",
                self.error_threshold_percent
            )));
        }
        if self.volume_threshold < 1 {
            return Err(CoreError::Config(
                "breaker.volume_threshold는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.timeout_ms == 0 || self.reset_timeout_ms == 0 || self.rolling_window_ms == 0 {
            return Err(CoreError::Config(
                "breaker 타임아웃/윈도 값은 0보다 커야 합니다".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// 헬스 체크 설정
// ============================================================

/// 헬스 체크 및 저하 판정 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// 저하 수준 재평가 주기 (밀리초)
    #[serde(default = "default_assessment_interval_ms")]
    pub assessment_interval_ms: u64,
    /// 개별 프로브 타임아웃 (밀리초)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// 오프라인 큐 최대 크기
    #[serde(default = "default_offline_queue_capacity")]
    pub offline_queue_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            assessment_interval_ms: default_assessment_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            offline_queue_capacity: default_offline_queue_capacity(),
        }
    }
}

impl HealthConfig {
    /// 재평가 주기
    pub fn assessment_interval(&self) -> Duration {
        Duration::from_millis(self.assessment_interval_ms)
    }

    /// 프로브 타임아웃
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

// ============================================================
// 저장소 설정
// ============================================================

/// 대화 저장소 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite DB 파일 경로 (None이면 플랫폼 기본 경로)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

// ============================================================
// AppConfig impl
// ============================================================

impl AppConfig {
    /// 기본 설정값 반환
    pub fn default_config() -> Self {
        Self {
            service: ServiceConfig::default(),
            connection: ConnectionConfig::default(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            health: HealthConfig::default(),
            storage: StorageConfig::default(),
        }
    }

    /// 설정값 제약 조건 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.service.agent_url.trim().is_empty() {
            return Err(CoreError::Config("service.agent_url이 비어 있습니다".to_string()));
        }
        if self.connection.heartbeat_interval_ms == 0 || self.connection.connect_timeout_ms == 0 {
            return Err(CoreError::Config(
                "connection 주기/타임아웃 값은 0보다 커야 합니다".to_string(),
            ));
        }
        if self.connection.max_message_chars == 0 {
            return Err(CoreError::Config(
                "connection.max_message_chars는 0보다 커야 합니다".to_string(),
            ));
        }
        self.retry.transport.validate("retry.transport")?;
        self.retry.request.validate("retry.request")?;
        self.breaker.validate()?;
        if self.health.assessment_interval_ms == 0 || self.health.probe_timeout_ms == 0 {
            return Err(CoreError::Config(
                "health 주기/타임아웃 값은 0보다 커야 합니다".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

// ============================================================
// 기본값 함수
// ============================================================

fn default_service_name() -> String {
    "govchat".to_string()
}
fn default_agent_url() -> String {
    "ws://localhost:8080/agent".to_string()
}
fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay_ms() -> u64 {
    1_000
}
fn default_heartbeat_interval_ms() -> u64 {
    15_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_max_message_chars() -> usize {
    4_000
}
fn default_breaker_name() -> String {
    "upstream-agent".to_string()
}
fn default_breaker_timeout_ms() -> u64 {
    30_000
}
fn default_error_threshold_percent() -> u8 {
    50
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_volume_threshold() -> u32 {
    5
}
fn default_rolling_window_ms() -> u64 {
    10_000
}
fn default_assessment_interval_ms() -> u64 {
    30_000
}
fn default_probe_timeout_ms() -> u64 {
    5_000
}
fn default_offline_queue_capacity() -> usize {
    1_000
}
