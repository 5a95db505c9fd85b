//! 대화 턴 저장소 (ConversationStore 포트 구현).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use govchat_core::error::CoreError;
use govchat_core::models::conversation::{ConversationTurn, Role};
use govchat_core::ports::conversation_store::ConversationStore;
use tracing::debug;

use super::SqliteConversationStore;

/// DB 행 (변환 전)
struct TurnRow {
    session_id: String,
    role: String,
    content: String,
    correlation_id: Option<String>,
    created_at: String,
}

impl TurnRow {
    fn into_turn(self) -> Result<ConversationTurn, CoreError> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| CoreError::Storage(format!("시각 파싱 실패: {}: {e}", self.created_at)))?
            .with_timezone(&Utc);

        Ok(ConversationTurn {
            session_id: self.session_id,
            role: Role::parse(&self.role),
            content: self.content,
            correlation_id: self.correlation_id,
            created_at,
        })
    }
}

impl SqliteConversationStore {
    /// 세션의 저장된 턴 수
    pub fn turn_count(&self, session_id: &str) -> Result<u64, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM conversation_turns WHERE session_id = ?1",
            rusqlite::params![session_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count as u64)
        .map_err(|e| CoreError::Storage(format!("턴 수 조회 실패: {e}")))
    }

}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append(&self, turn: &ConversationTurn) -> Result<(), CoreError> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO conversation_turns (session_id, role, content, correlation_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                turn.session_id,
                turn.role.as_str(),
                turn.content,
                turn.correlation_id,
                turn.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::Storage(format!("대화 턴 저장 실패: {e}")))?;

        debug!(session_id = %turn.session_id, role = turn.role.as_str(), "대화 턴 저장");
        Ok(())
    }

    async fn load(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, CoreError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT session_id, role, content, correlation_id, created_at
                 FROM conversation_turns WHERE session_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| CoreError::Storage(format!("쿼리 준비 실패: {e}")))?;

        let rows = stmt
            .query_map(rusqlite::params![session_id, limit as i64], |row| {
                Ok(TurnRow {
                    session_id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    correlation_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .map_err(|e| CoreError::Storage(format!("쿼리 실행 실패: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::Storage(format!("행 읽기 실패: {e}")))?;

        // 최근 N개를 오래된 순으로
        let mut turns = rows
            .into_iter()
            .map(TurnRow::into_turn)
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn ping(&self) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| CoreError::Storage(format!("저장소 ping 실패: {e}")))?;
        Ok(())
    }
}
