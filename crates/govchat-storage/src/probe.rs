//! 영속 저장소 헬스 프로브.

use async_trait::async_trait;
use govchat_core::error::CoreError;
use govchat_core::ports::conversation_store::ConversationStore;
use govchat_core::ports::health::HealthProbe;
use std::sync::Arc;
use tracing::debug;

/// `ConversationStore::ping` 성공 여부로 판단
pub struct PersistenceProbe {
    store: Arc<dyn ConversationStore>,
}

impl PersistenceProbe {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthProbe for PersistenceProbe {
    async fn check(&self) -> Result<bool, CoreError> {
        match self.store.ping().await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("저장소 ping 실패: {e}");
                Ok(false)
            }
        }
    }
}
