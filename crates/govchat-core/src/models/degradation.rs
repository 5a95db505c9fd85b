//! 서비스 저하 수준 모델.
//!
//! 수준별 기능 집합과 폴백 액션 이름, 폴백 요청/응답 형식을 정의한다.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CoreError;
use crate::models::conversation::ConversationTurn;

/// 오프라인 폴백 고정 안내 문구
pub const OFFLINE_NOTICE: &str =
    "상담 서비스가 일시적으로 중단되었습니다. 잠시 후 다시 이용해 주십시오.";

/// 시스템 전체 서비스 수준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLevel {
    /// 모든 의존성 정상
    Full,
    /// 저장소 정상 + 전송/에이전트 중 하나 이상 정상
    Limited,
    /// 그 외
    Offline,
}

impl ServiceLevel {
    /// 서비스 수준 게이지 값 (0=full, 1=limited, 2=offline)
    pub fn gauge_value(&self) -> f64 {
        match self {
            ServiceLevel::Full => 0.0,
            ServiceLevel::Limited => 1.0,
            ServiceLevel::Offline => 2.0,
        }
    }
}

impl std::fmt::Display for ServiceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceLevel::Full => write!(f, "full"),
            ServiceLevel::Limited => write!(f, "limited"),
            ServiceLevel::Offline => write!(f, "offline"),
        }
    }
}

/// 수준별로 허용되는 기능
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    /// 실시간 전송
    Transport,
    /// 대화 에이전트
    Agent,
    /// 대화 기록 저장
    Persistence,
    /// 실시간 응답
    RealTime,
    /// 메시지 대기열
    MessageQueue,
    /// 정적 콘텐츠
    StaticContent,
}

impl Feature {
    /// 기능 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Transport => "transport",
            Feature::Agent => "agent",
            Feature::Persistence => "persistence",
            Feature::RealTime => "real-time",
            Feature::MessageQueue => "message-queue",
            Feature::StaticContent => "static-content",
        }
    }
}

impl FromStr for Feature {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport" => Ok(Feature::Transport),
            "agent" => Ok(Feature::Agent),
            "persistence" => Ok(Feature::Persistence),
            "real-time" => Ok(Feature::RealTime),
            "message-queue" => Ok(Feature::MessageQueue),
            "static-content" => Ok(Feature::StaticContent),
            other => Err(CoreError::validation("feature", format!("알 수 없는 기능: {other}"))),
        }
    }
}

/// 폴백이 정의된 액션
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FallbackActionName {
    /// 메시지 전송
    SendMessage,
    /// 메시지 목록 조회
    GetMessages,
}

impl FallbackActionName {
    /// 액션 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackActionName::SendMessage => "sendMessage",
            FallbackActionName::GetMessages => "getMessages",
        }
    }
}

impl FromStr for FallbackActionName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sendMessage" => Ok(FallbackActionName::SendMessage),
            "getMessages" => Ok(FallbackActionName::GetMessages),
            other => Err(CoreError::validation("action", format!("알 수 없는 액션: {other}"))),
        }
    }
}

/// 폴백 액션 입력
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRequest {
    /// 채팅 세션 ID
    pub session_id: String,
    /// 메시지 본문 (sendMessage에만 사용)
    pub content: Option<String>,
}

/// 폴백 액션 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FallbackResponse {
    /// 메시지가 대기열에 들어감
    Queued {
        /// 대기열 내 위치 (1부터)
        position: usize,
    },
    /// 캐시된 메시지 목록 (비어 있을 수 있음)
    Messages {
        /// 대화 기록
        messages: Vec<ConversationTurn>,
    },
    /// 서비스 중단 고정 안내
    Offline {
        /// 안내 문구
        message: String,
    },
}

impl FallbackResponse {
    /// 오프라인 고정 응답
    pub fn offline() -> Self {
        FallbackResponse::Offline {
            message: OFFLINE_NOTICE.to_string(),
        }
    }
}
