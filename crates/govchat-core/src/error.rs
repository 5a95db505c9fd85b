//! GovChat 핵심 에러 타입.
//!
//! 에러는 발생 지점에서 [`ErrorKind`]가 결정되며, 재시도 여부는
//! 메시지 문자열이 아니라 종류로만 판별한다.
//! 모든 어댑터 crate는 외부 에러를 경계에서 `CoreError`로 변환한다.

use thiserror::Error;

/// 에러 종류 태그.
///
/// 재시도 엔진과 메트릭 라벨(`type`)이 이 값을 사용한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 실시간 전송 연결 실패
    TransportConnection,
    /// 연결되지 않은 상태에서의 호출
    TransportNotConnected,
    /// 메시지 전송 실패
    MessageSend,
    /// 서킷 브레이커 열림으로 인한 즉시 거부
    CircuitOpen,
    /// 헬스 프로브 실패
    HealthProbe,
    /// 입력 유효성 검증 실패
    Validation,
    /// 타임아웃
    Timeout,
    /// 재시도 소진 (재시도 가능 에러였음)
    RetryExhausted,
    /// 재시도 불가로 분류됨
    NonRetryable,
    /// 설정 오류
    Config,
    /// 저장소 오류
    Storage,
    /// 직렬화 오류
    Serialization,
    /// 내부 오류
    Internal,
}

impl ErrorKind {
    /// 메트릭/로그 라벨용 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransportConnection => "transport_connection",
            ErrorKind::TransportNotConnected => "transport_not_connected",
            ErrorKind::MessageSend => "message_send",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::HealthProbe => "health_probe",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::NonRetryable => "non_retryable",
            ErrorKind::Config => "config",
            ErrorKind::Storage => "storage",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 코어 레이어 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 전송 연결 실패 (재시도 가능)
    #[error("전송 연결 실패: {0}")]
    TransportConnection(String),

    /// 연결되지 않음 (재시도 금지: 호출자가 상태를 먼저 확인해야 함)
    #[error("연결되지 않음: 현재 상태 {state}")]
    NotConnected {
        /// 호출 시점의 연결 상태
        state: String,
    },

    /// 메시지 전송 실패 (기본 재시도 가능, `retryable = false`로 종결 처리 가능)
    #[error("메시지 전송 실패: {message}")]
    MessageSend {
        /// 실패 사유
        message: String,
        /// 재시도 가능 여부
        retryable: bool,
    },

    /// 서킷 브레이커 열림: 상위 계층에서 폴백을 사용해야 함
    #[error("서킷 브레이커 열림: {name}")]
    CircuitOpen {
        /// 브레이커 이름
        name: String,
    },

    /// 헬스 프로브 실패 (항상 `false`로 기록되며 전파되지 않음)
    #[error("헬스 프로브 실패: {probe}: {message}")]
    HealthProbe {
        /// 프로브 이름
        probe: String,
        /// 실패 사유
        message: String,
    },

    /// 필드 유효성 검증 실패 (항상 종결)
    #[error("유효성 검증 실패: {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 실행 타임아웃
    #[error("실행 타임아웃: {timeout_ms}ms 초과")]
    Timeout {
        /// 초과된 타임아웃 시간 (밀리초)
        timeout_ms: u64,
    },

    /// 재시도 가능 에러였으나 시도 횟수 소진
    #[error("재시도 소진 ({attempts}회 시도): {last}")]
    RetryExhausted {
        /// 총 시도 횟수
        attempts: u32,
        /// 마지막 에러
        last: Box<CoreError>,
    },

    /// 재시도 불가로 분류된 에러
    #[error("재시도 불가: {0}")]
    NonRetryable(Box<CoreError>),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 저장소 오류
    #[error("저장소 에러: {0}")]
    Storage(String),

    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),
}

impl CoreError {
    /// 에러 종류
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::TransportConnection(_) => ErrorKind::TransportConnection,
            CoreError::NotConnected { .. } => ErrorKind::TransportNotConnected,
            CoreError::MessageSend { .. } => ErrorKind::MessageSend,
            CoreError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            CoreError::HealthProbe { .. } => ErrorKind::HealthProbe,
            CoreError::Validation { .. } => ErrorKind::Validation,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            CoreError::NonRetryable(_) => ErrorKind::NonRetryable,
            CoreError::Config(_) => ErrorKind::Config,
            CoreError::Storage(_) => ErrorKind::Storage,
            CoreError::Serialization(_) => ErrorKind::Serialization,
            CoreError::Io(_) => ErrorKind::Internal,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 기본 재시도 분류.
    ///
    /// 전송 연결 실패, 재시도 가능 전송 실패, 타임아웃만 재시도 대상.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::TransportConnection(_) | CoreError::Timeout { .. } => true,
            CoreError::MessageSend { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// 하위 계층에서 이미 재시도 태그가 붙은 에러인지 여부.
    ///
    /// 태그된 에러는 재시도 엔진을 그대로 통과한다.
    pub fn is_tagged(&self) -> bool {
        matches!(
            self,
            CoreError::RetryExhausted { .. }
                | CoreError::NonRetryable(_)
                | CoreError::CircuitOpen { .. }
        )
    }

    /// 태그를 벗긴 근본 에러
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::RetryExhausted { last, .. } => last.root(),
            CoreError::NonRetryable(inner) => inner.root(),
            other => other,
        }
    }

    /// 필드 유효성 에러 생성 헬퍼
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 재시도 가능한 전송 실패 생성 헬퍼
    pub fn send_failed(message: impl Into<String>) -> Self {
        CoreError::MessageSend {
            message: message.into(),
            retryable: true,
        }
    }
}
