//! 저하 수준별 폴백 액션 구현.

use std::sync::Arc;

use async_trait::async_trait;
use govchat_core::error::CoreError;
use govchat_core::models::degradation::{FallbackRequest, FallbackResponse};
use govchat_core::ports::conversation_store::ConversationStore;
use govchat_core::ports::fallback::FallbackAction;
use tracing::{debug, warn};

use crate::offline_queue::{OfflineQueue, QueuedMessage};

/// 캐시 조회 기본 건수
pub const DEFAULT_CACHED_MESSAGES: usize = 50;

/// sendMessage (Limited): 나중에 보내도록 대기열에 넣는다
///
/// 재전송 때 거부될 메시지는 등록 시점에 `Validation`으로 돌려준다.
pub struct QueueMessageFallback {
    queue: Arc<OfflineQueue>,
    max_chars: usize,
}

impl QueueMessageFallback {
    pub fn new(queue: Arc<OfflineQueue>, max_chars: usize) -> Self {
        Self { queue, max_chars }
    }
}

#[async_trait]
impl FallbackAction for QueueMessageFallback {
    async fn execute(&self, request: &FallbackRequest) -> Result<FallbackResponse, CoreError> {
        let content = match request.content.as_deref() {
            Some(content) if !content.trim().is_empty() => content,
            _ => return Err(CoreError::validation("content", "대기열에 넣을 메시지가 비어 있습니다")),
        };
        let chars = content.chars().count();
        if chars > self.max_chars {
            return Err(CoreError::validation(
                "content",
                format!("메시지 길이 초과: {chars}자 (최대 {}자)", self.max_chars),
            ));
        }

        let position = self
            .queue
            .push(QueuedMessage::new(request.session_id.clone(), content));
        debug!(session_id = %request.session_id, position, "메시지 대기열 등록");
        Ok(FallbackResponse::Queued { position })
    }
}

/// getMessages (Limited): 저장된 대화 기록을 돌려준다
///
/// 저장소가 없거나 조회에 실패하면 빈 목록.
pub struct CachedMessagesFallback {
    store: Option<Arc<dyn ConversationStore>>,
    limit: usize,
}

impl CachedMessagesFallback {
    pub fn new(store: Option<Arc<dyn ConversationStore>>, limit: usize) -> Self {
        Self { store, limit }
    }
}

#[async_trait]
impl FallbackAction for CachedMessagesFallback {
    async fn execute(&self, request: &FallbackRequest) -> Result<FallbackResponse, CoreError> {
        let Some(store) = &self.store else {
            return Ok(FallbackResponse::Messages { messages: Vec::new() });
        };

        let messages = match store.load(&request.session_id, self.limit).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(session_id = %request.session_id, error = %e, "캐시 대화 조회 실패, 빈 목록 반환");
                Vec::new()
            }
        };
        Ok(FallbackResponse::Messages { messages })
    }
}

/// sendMessage / getMessages (Offline): 고정 안내
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineNoticeFallback;

#[async_trait]
impl FallbackAction for OfflineNoticeFallback {
    async fn execute(&self, _request: &FallbackRequest) -> Result<FallbackResponse, CoreError> {
        Ok(FallbackResponse::offline())
    }
}
