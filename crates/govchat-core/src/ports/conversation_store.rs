//! 대화 기록 저장소 포트.
//!
//! 구현: `govchat-storage` crate (rusqlite)

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::conversation::ConversationTurn;

/// 세션별 대화 기록 저장소
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 대화 턴 추가
    async fn append(&self, turn: &ConversationTurn) -> Result<(), CoreError>;

    /// 세션의 최근 대화 조회 (오래된 순)
    async fn load(&self, session_id: &str, limit: usize)
        -> Result<Vec<ConversationTurn>, CoreError>;

    /// 저장소 응답 여부 확인
    async fn ping(&self) -> Result<(), CoreError>;
}
