//! 실시간 전송 포트.
//!
//! 구현: `govchat-network` crate (tokio-tungstenite)

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::models::wire::AgentMessage;

/// 연결 요청 파라미터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// 에이전트 엔드포인트
    pub url: String,
    /// 채팅 세션 ID
    pub session_id: String,
    /// 사용자 ID
    pub user_id: String,
}

/// 전송 계층에서 올라오는 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// 수신 메시지
    Message(AgentMessage),
    /// 원격 종료 또는 스트림 끝
    Closed {
        /// 종료 사유
        reason: String,
    },
    /// 읽기/파싱 에러 (연결은 유지될 수 있음)
    Error(String),
}

/// 송신 측 핸들
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// 메시지 송신
    async fn send(&self, message: &AgentMessage) -> Result<(), CoreError>;

    /// 연결 종료 요청
    async fn close(&self) -> Result<(), CoreError>;
}

/// 열린 연결: 송신 핸들 + 수신 이벤트 스트림
pub struct TransportLink {
    /// 송신 핸들
    pub sender: std::sync::Arc<dyn TransportSender>,
    /// 수신 이벤트 (스트림이 닫히면 `None`)
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// 양방향 실시간 전송
#[async_trait]
pub trait Transport: Send + Sync {
    /// 연결 수립. 실패는 `CoreError::TransportConnection`.
    async fn open(&self, request: &ConnectRequest) -> Result<TransportLink, CoreError>;
}
