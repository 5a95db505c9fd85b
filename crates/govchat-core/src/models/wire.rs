//! 업스트림 에이전트 와이어 메시지.
//!
//! JSON 텍스트 프레임, `type` 필드로 구분.
//! 질의와 응답은 같은 상관 ID(`id`)를 공유하고, ping/pong이 하트비트다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 에이전트와 주고받는 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// 사용자 질의 (자유 텍스트)
    Query {
        id: String,
        session_id: String,
        content: String,
    },
    /// 질의에 대한 응답
    Reply { id: String, content: String },
    /// 하트비트 요청
    Ping { ts: DateTime<Utc> },
    /// 하트비트 응답
    Pong { ts: DateTime<Utc> },
    /// 에러 (사람이 읽을 수 있는 설명)
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        message: String,
    },
}

impl AgentMessage {
    /// 현재 시각의 ping
    pub fn ping() -> Self {
        AgentMessage::Ping { ts: Utc::now() }
    }

    /// 메트릭 라벨용 메시지 종류
    pub fn kind(&self) -> &'static str {
        match self {
            AgentMessage::Query { .. } => "query",
            AgentMessage::Reply { .. } => "reply",
            AgentMessage::Ping { .. } => "ping",
            AgentMessage::Pong { .. } => "pong",
            AgentMessage::Error { .. } => "error",
        }
    }
}

/// 에이전트 응답 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// 에이전트 실제 응답
    Agent,
    /// 브레이커 열림으로 대체된 안내
    Fallback,
}

/// `send_message` 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    /// 상관 ID
    pub correlation_id: String,
    /// 응답 본문
    pub content: String,
    /// 출처
    pub source: ReplySource,
}
