//! 대화 기록 모델.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 발화 주체
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// 사용자
    User,
    /// 대화 에이전트
    Agent,
    /// 시스템 안내 (폴백 응답 등)
    System,
}

impl Role {
    /// 저장용 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        }
    }

    /// 저장 문자열 파싱 (알 수 없는 값은 System)
    pub fn parse(value: &str) -> Self {
        match value {
            "user" => Role::User,
            "agent" => Role::Agent,
            _ => Role::System,
        }
    }
}

/// 대화 한 턴
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// 채팅 세션 ID
    pub session_id: String,
    /// 발화 주체
    pub role: Role,
    /// 본문
    pub content: String,
    /// 요청-응답 상관 ID
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// 기록 시각
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// 현재 시각으로 새 턴 생성
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            content: content.into(),
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    /// 상관 ID 설정
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
