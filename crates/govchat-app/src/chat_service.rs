//! 요청 계층 파사드.
//!
//! 사용자 메시지를 받으면 현재 서비스 수준에서 실시간 기능을 쓸 수 있는지 먼저
//! 확인하고, 쓸 수 있으면 연결 관리자로, 아니면 수준별 폴백 액션으로 보낸다.
//! 전송 계층을 직접 호출하지 않는다.

use std::sync::Arc;

use govchat_core::error::CoreError;
use govchat_core::models::connection::ConnectionStatus;
use govchat_core::models::conversation::{ConversationTurn, Role};
use govchat_core::models::degradation::{
    FallbackActionName, FallbackRequest, FallbackResponse, Feature, ServiceLevel,
};
use govchat_core::models::wire::{AgentReply, ReplySource};
use govchat_core::ports::conversation_store::ConversationStore;
use govchat_core::ports::fallback::FallbackAction;
use govchat_monitor::degradation::DegradationEngine;
use govchat_monitor::fallback::QueueMessageFallback;
use govchat_monitor::offline_queue::OfflineQueue;
use govchat_network::connection::ConnectionManager;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// `send_message` 결과
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// 에이전트(또는 브레이커 대체) 응답
    Reply(AgentReply),
    /// 수준별 폴백 결과 (대기열 등록, 오프라인 안내)
    Fallback(FallbackResponse),
}

/// 수준 재평가 전에 연결이 끊긴 경우처럼, 나중에 보내면 될 실패
fn is_deferrable(error: &CoreError) -> bool {
    matches!(error, CoreError::RetryExhausted { .. })
        || matches!(error.root(), CoreError::NotConnected { .. })
}

/// 요청 계층 파사드
pub struct ChatService {
    connection: ConnectionManager,
    engine: Arc<DegradationEngine>,
    store: Arc<dyn ConversationStore>,
    queue: Arc<OfflineQueue>,
    /// Limited 수준의 sendMessage 폴백과 같은 인스턴스
    queue_fallback: Arc<QueueMessageFallback>,
    history_limit: usize,
    /// 재전송은 한 번에 하나
    flush_lock: Mutex<()>,
}

impl ChatService {
    pub fn new(
        connection: ConnectionManager,
        engine: Arc<DegradationEngine>,
        store: Arc<dyn ConversationStore>,
        queue: Arc<OfflineQueue>,
        queue_fallback: Arc<QueueMessageFallback>,
        history_limit: usize,
    ) -> Self {
        Self {
            connection,
            engine,
            store,
            queue,
            queue_fallback,
            history_limit,
            flush_lock: Mutex::new(()),
        }
    }

    fn session_id(&self) -> String {
        self.connection.status().session_id.unwrap_or_default()
    }

    /// 사용자 메시지 처리
    pub async fn send_message(&self, content: &str) -> Result<ChatOutcome, CoreError> {
        let session_id = self.session_id();

        if self.engine.can_use_feature(Feature::RealTime.as_str()) {
            match self.connection.send_message(content).await {
                Ok(reply) => {
                    self.record(ConversationTurn::new(&session_id, Role::User, content))
                        .await;
                    self.record(
                        ConversationTurn::new(&session_id, reply_role(&reply), &reply.content)
                            .with_correlation_id(&reply.correlation_id),
                    )
                    .await;
                    return Ok(ChatOutcome::Reply(reply));
                }
                Err(e) if is_deferrable(&e) => {
                    warn!(session_id = %session_id, error = %e, "실시간 전송 실패, 대기열로 전환");
                    let response = self
                        .queue_fallback
                        .execute(&FallbackRequest {
                            session_id: session_id.clone(),
                            content: Some(content.to_string()),
                        })
                        .await?;
                    self.record(ConversationTurn::new(&session_id, Role::User, content))
                        .await;
                    return Ok(ChatOutcome::Fallback(response));
                }
                Err(e) => return Err(e),
            }
        }

        let action = self
            .engine
            .get_fallback_action(FallbackActionName::SendMessage.as_str())
            .ok_or_else(|| CoreError::Internal("sendMessage 폴백이 없습니다".to_string()))?;
        let response = action
            .execute(&FallbackRequest {
                session_id: session_id.clone(),
                content: Some(content.to_string()),
            })
            .await?;

        if matches!(response, FallbackResponse::Queued { .. }) {
            self.record(ConversationTurn::new(&session_id, Role::User, content))
                .await;
        }
        debug!(session_id = %session_id, level = %self.engine.level(), "폴백 응답");
        Ok(ChatOutcome::Fallback(response))
    }

    /// 대화 기록 조회
    pub async fn get_messages(&self) -> Result<FallbackResponse, CoreError> {
        let session_id = self.session_id();

        if self.engine.level() == ServiceLevel::Full {
            let messages = self.store.load(&session_id, self.history_limit).await?;
            return Ok(FallbackResponse::Messages { messages });
        }

        let action = self
            .engine
            .get_fallback_action(FallbackActionName::GetMessages.as_str())
            .ok_or_else(|| CoreError::Internal("getMessages 폴백이 없습니다".to_string()))?;
        action
            .execute(&FallbackRequest {
                session_id,
                content: None,
            })
            .await
    }

    /// 대기열에 쌓인 메시지를 재전송한다.
    ///
    /// Full이 아니면 아무것도 하지 않는다. 전송 실패나 브레이커 대체 응답을 만나면
    /// 남은 메시지를 순서대로 다시 넣고 멈춘다.
    pub async fn flush_offline_queue(&self) -> usize {
        let _flushing = self.flush_lock.lock().await;
        if self.queue.is_empty() || !self.engine.can_use_feature(Feature::RealTime.as_str()) {
            return 0;
        }

        let pending = self.queue.drain();
        let total = pending.len();
        let mut sent = 0;
        let mut remaining = pending.into_iter();

        for message in remaining.by_ref() {
            match self.connection.send_message(&message.content).await {
                Ok(reply) if reply.source == ReplySource::Agent => {
                    sent += 1;
                    self.record(
                        ConversationTurn::new(&message.session_id, Role::Agent, &reply.content)
                            .with_correlation_id(&reply.correlation_id),
                    )
                    .await;
                }
                Ok(_) => {
                    debug!(session_id = %message.session_id, "브레이커 열림, 재전송 보류");
                    self.queue.push(message);
                    break;
                }
                Err(CoreError::Validation { .. }) => {
                    warn!(session_id = %message.session_id, "대기 메시지 검증 실패, 폐기");
                }
                Err(e) => {
                    warn!(session_id = %message.session_id, error = %e, "대기 메시지 재전송 실패");
                    self.queue.push(message);
                    break;
                }
            }
        }
        for message in remaining {
            self.queue.push(message);
        }

        if sent > 0 {
            info!(sent, total, "오프라인 대기열 재전송");
        }
        sent
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn current_level(&self) -> ServiceLevel {
        self.engine.level()
    }

    /// 기록 실패는 응답을 막지 않는다
    async fn record(&self, turn: ConversationTurn) {
        if !self.engine.can_use_feature(Feature::Persistence.as_str()) {
            return;
        }
        if let Err(e) = self.store.append(&turn).await {
            warn!(session_id = %turn.session_id, error = %e, "대화 기록 저장 실패");
        }
    }
}

fn reply_role(reply: &AgentReply) -> Role {
    match reply.source {
        ReplySource::Agent => Role::Agent,
        ReplySource::Fallback => Role::System,
    }
}
