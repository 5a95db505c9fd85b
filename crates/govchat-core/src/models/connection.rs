//! 연결 모델.
//!
//! 채팅 세션 하나에 대응하는 실시간 연결과 그 상태를 표현.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 연결 상태
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// 연결 중
    Connecting,
    /// 연결됨
    Connected,
    /// 연결 끊김
    Disconnected,
    /// 재연결 대기 중
    Reconnecting,
    /// 전송 에러
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Error => write!(f, "Error"),
        }
    }
}

/// 활성 채팅 세션의 실시간 연결
///
/// 세션당 하나만 존재하며 `ConnectionManager`가 소유한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// 연결 고유 ID
    pub id: Uuid,
    /// 채팅 세션 ID
    pub session_id: String,
    /// 사용자 ID
    pub user_id: String,
    /// 현재 상태
    pub state: ConnectionState,
    /// 마지막 전송 활동 시각
    pub last_activity: DateTime<Utc>,
    /// 연속 재연결 시도 횟수: Connected 진입 시 0으로 리셋
    pub retry_count: u32,
}

impl Connection {
    /// Connecting 상태의 새 연결
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            state: ConnectionState::Connecting,
            last_activity: Utc::now(),
            retry_count: 0,
        }
    }

    /// 상태 전이. 이전 상태를 반환한다.
    pub fn transition(&mut self, next: ConnectionState) -> ConnectionState {
        let previous = self.state;
        self.state = next;
        if next == ConnectionState::Connected {
            self.retry_count = 0;
        }
        self.touch();
        previous
    }

    /// 활동 시각 갱신
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// 연결 상태 스냅샷
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connection_id: Some(self.id),
            session_id: Some(self.session_id.clone()),
            user_id: Some(self.user_id.clone()),
            state: self.state,
            retry_count: self.retry_count,
            last_activity: Some(self.last_activity),
        }
    }
}

/// 요청 계층에 노출되는 연결 상태 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// 연결 ID (연결이 없으면 None)
    pub connection_id: Option<Uuid>,
    /// 세션 ID
    pub session_id: Option<String>,
    /// 사용자 ID
    pub user_id: Option<String>,
    /// 상태
    pub state: ConnectionState,
    /// 재연결 시도 횟수
    pub retry_count: u32,
    /// 마지막 활동 시각
    pub last_activity: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    /// 연결이 없는 상태
    pub fn detached() -> Self {
        Self {
            connection_id: None,
            session_id: None,
            user_id: None,
            state: ConnectionState::Disconnected,
            retry_count: 0,
            last_activity: None,
        }
    }

    /// 메시지 송신 가능 여부
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
