//! 서킷 브레이커 상태 모델.

use serde::{Deserialize, Serialize};

/// 서킷 브레이커 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// 정상: 호출 통과, 성공/실패 집계
    Closed,
    /// 복구 확인 중: 시험 호출 1건만 허용
    HalfOpen,
    /// 차단: 모든 호출 즉시 거부
    Open,
}

impl BreakerState {
    /// 상태 게이지 값 (0=closed, 1=half-open, 2=open)
    pub fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::HalfOpen => write!(f, "half-open"),
            BreakerState::Open => write!(f, "open"),
        }
    }
}

/// 누적 호출 통계 (브레이커 수명 전체)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStats {
    /// `fire` 호출 수
    pub fires: u64,
    /// 성공 수
    pub successes: u64,
    /// 실패 수 (타임아웃 포함)
    pub failures: u64,
    /// 타임아웃 수
    pub timeouts: u64,
    /// Open 상태에서 거부된 호출 수
    pub rejects: u64,
}

/// 상태 전이 및 호출 결과 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEvent {
    /// Closed/Half-Open → Open
    Opened { name: String },
    /// Open → Half-Open
    HalfOpened { name: String },
    /// Half-Open → Closed
    Closed { name: String },
    /// 호출 성공
    Success { name: String },
    /// 호출 실패
    Failure { name: String },
    /// 호출 타임아웃
    Timeout { name: String },
    /// Open 상태 거부
    Rejected { name: String },
}

impl BreakerEvent {
    /// 이벤트 이름 (로그 필드용)
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerEvent::Opened { .. } => "opened",
            BreakerEvent::HalfOpened { .. } => "half_opened",
            BreakerEvent::Closed { .. } => "closed",
            BreakerEvent::Success { .. } => "success",
            BreakerEvent::Failure { .. } => "failure",
            BreakerEvent::Timeout { .. } => "timeout",
            BreakerEvent::Rejected { .. } => "rejected",
        }
    }
}
