//! 실시간 연결 관리자.
//!
//! 채팅 세션 하나의 전송 수명주기를 소유한다:
//! 연결(재시도 엔진 + 전송 정책), 하트비트, 메시지 송수신, 종료, 재연결 스케줄링.
//!
//! 상태 머신:
//! ```text
//! Connecting → Connected → {Disconnected, Error}
//! Disconnected/Error → Reconnecting (재시도 남음) → Connecting
//! Reconnecting → 포기 (retry_count ≥ reconnect_attempts, MaxRetriesReached)
//! ```
//!
//! 재연결 지연은 `reconnect_delay × retry_count` 선형 증가이며,
//! 재시도 엔진의 지수 백오프(연결 시도 내부)와 별개로 합성된다.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use govchat_core::config::AppConfig;
use govchat_core::error::{CoreError, ErrorKind};
use govchat_core::models::connection::{Connection, ConnectionState, ConnectionStatus};
use govchat_core::models::wire::{AgentMessage, AgentReply, ReplySource};
use govchat_core::ports::metrics::Metrics;
use govchat_core::ports::transport::{
    ConnectRequest, Transport, TransportEvent, TransportLink, TransportSender,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::{run_with_retry, RetryPolicy};

/// 브레이커 열림 시 사용자에게 전달되는 대체 응답
pub const FALLBACK_APOLOGY: &str =
    "죄송합니다. 상담 에이전트가 일시적으로 응답할 수 없습니다. 잠시 후 다시 시도해 주십시오.";

/// 이벤트 채널 버퍼 크기
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 무수신 상태가 하트비트 주기의 이 배수를 넘으면 연결을 죽은 것으로 본다
const DEAD_LINK_HEARTBEATS: u32 = 2;

/// 연결 관리자 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// 상태 전이
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// 재연결 예약
    Reconnecting { attempt: u32, delay: Duration },
    /// 재연결 포기
    MaxRetriesReached { attempts: u32 },
    /// 에이전트가 보낸 에러 메시지
    AgentError {
        id: Option<String>,
        message: String,
    },
}

/// 연결 관련 설정 (생성 시점에 고정)
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub service: String,
    pub agent_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub max_message_chars: usize,
}

impl ConnectionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            service: config.service.name.clone(),
            agent_url: config.service.agent_url.clone(),
            reconnect_attempts: config.connection.reconnect_attempts,
            reconnect_delay: config.connection.reconnect_delay(),
            heartbeat_interval: config.connection.heartbeat_interval(),
            connect_timeout: config.connection.connect_timeout(),
            max_message_chars: config.connection.max_message_chars,
        }
    }
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_link(&mut self) {
        for handle in [self.reader.take(), self.heartbeat.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        self.abort_link();
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct Slot {
    connection: Option<Connection>,
    sender: Option<Arc<dyn TransportSender>>,
    tasks: Tasks,
    /// 링크 교체/명시적 종료마다 증가 (이전 태스크의 늦은 이벤트 무시)
    epoch: u64,
}

type PendingReply = oneshot::Sender<Result<String, CoreError>>;

struct Inner {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    settings: ConnectionSettings,
    transport_policy: RetryPolicy,
    request_policy: RetryPolicy,
    metrics: Metrics,
    slot: Mutex<Slot>,
    pending: Mutex<HashMap<String, PendingReply>>,
    last_inbound: Mutex<Instant>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

/// 연결 관리자 (복제 시 같은 연결 공유)
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// 응답 대기 항목 정리 (취소/타임아웃 포함)
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
    }
}

impl ConnectionManager {
    /// 새 연결 관리자 생성 (Disconnected)
    pub fn new(
        transport: Arc<dyn Transport>,
        breaker: Arc<CircuitBreaker>,
        config: &AppConfig,
        metrics: Metrics,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                transport,
                breaker,
                settings: ConnectionSettings::from_config(config),
                transport_policy: RetryPolicy::from_config("transport", &config.retry.transport),
                request_policy: RetryPolicy::from_config("request", &config.retry.request),
                metrics,
                slot: Mutex::new(Slot::default()),
                pending: Mutex::new(HashMap::new()),
                last_inbound: Mutex::new(Instant::now()),
                state_tx,
                events_tx,
            }),
        }
    }

    /// 현재 연결 상태
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// 요청 계층에 노출되는 상태 스냅샷
    pub fn status(&self) -> ConnectionStatus {
        let slot = self.inner.slot.lock();
        match &slot.connection {
            Some(connection) => connection.status(),
            None => ConnectionStatus::detached(),
        }
    }

    /// 상태 변경 구독 (watch)
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// 이벤트 구독 (broadcast)
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// 연결 수립.
    ///
    /// 전송 정책으로 재시도하며, 기존 연결과 예약된 재연결은 먼저 정리한다.
    /// 실패하면 `Error`를 거쳐 재연결 루프가 이어받는다.
    pub async fn connect(&self, session_id: &str, user_id: &str) -> Result<(), CoreError> {
        if session_id.trim().is_empty() {
            return Err(CoreError::validation("session_id", "세션 ID가 비어 있습니다"));
        }

        let (epoch, stale) = {
            let mut slot = self.inner.slot.lock();
            slot.epoch += 1;
            slot.tasks.abort_all();
            let stale = slot.sender.take();
            slot.connection = Some(Connection::new(session_id, user_id));
            (slot.epoch, stale)
        };
        if let Some(sender) = stale {
            let _ = sender.close().await;
        }
        self.inner.fail_pending("연결 재수립");
        self.inner.set_state(ConnectionState::Connecting);

        info!(
            service = %self.inner.settings.service,
            session_id,
            "에이전트 연결 시작"
        );

        match self.inner.open_link(session_id, user_id).await {
            Ok(link) => {
                if !Inner::attach(&self.inner, epoch, link) {
                    return Err(CoreError::NotConnected {
                        state: self.state().to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => {
                self.inner.breaker.record_failure();
                self.inner.metrics.error(e.root().kind(), &self.inner.settings.service);
                warn!(session_id, error = %e, "에이전트 연결 실패, 재연결 예약");
                let mut slot = self.inner.slot.lock();
                if slot.epoch == epoch {
                    self.inner.transition(&mut slot, ConnectionState::Error);
                    slot.tasks.reconnect = Some(tokio::spawn(Inner::reconnect_loop(
                        Arc::downgrade(&self.inner),
                        epoch,
                    )));
                }
                Err(e)
            }
        }
    }

    /// 명시적 종료. 하트비트/재연결 타이머를 모두 취소하고 연결을 폐기한다.
    pub async fn disconnect(&self) {
        let sender = {
            let mut slot = self.inner.slot.lock();
            slot.epoch += 1;
            slot.tasks.abort_all();
            if let Some(connection) = slot.connection.as_mut() {
                connection.transition(ConnectionState::Disconnected);
            }
            let session_id = slot.connection.take().map(|c| c.session_id);
            debug!(session_id = ?session_id, "연결 폐기");
            slot.sender.take()
        };

        if let Some(sender) = sender {
            if let Err(e) = sender.close().await {
                debug!("전송 종료 실패 (무시): {e}");
            }
        }

        self.inner.fail_pending("연결 종료");
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.metrics.active_connections(0);
        info!(service = %self.inner.settings.service, "에이전트 연결 종료");
    }

    /// 사용자 메시지 전송 후 에이전트 응답 대기.
    ///
    /// Connected가 아니면 즉시 `NotConnected`. 요청 정책(고정 지연)으로 재시도하며,
    /// 브레이커가 열려 있으면 [`FALLBACK_APOLOGY`] 대체 응답을 반환한다.
    pub async fn send_message(&self, content: &str) -> Result<AgentReply, CoreError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(CoreError::NotConnected {
                state: state.to_string(),
            });
        }
        self.validate(content)?;

        let session_id = {
            let slot = self.inner.slot.lock();
            slot.connection
                .as_ref()
                .map(|c| c.session_id.clone())
                .unwrap_or_default()
        };

        let inner: &Inner = &self.inner;
        let breaker: &CircuitBreaker = &self.inner.breaker;
        let sid: &str = &session_id;
        let started = Instant::now();

        let result = run_with_retry(&inner.request_policy, move || {
            breaker.fire(move || inner.round_trip(sid, content))
        })
        .await;

        let service = &inner.settings.service;
        match result {
            Ok((correlation_id, reply)) => {
                inner.metrics.message("query", "success");
                inner.metrics.round_trip(started.elapsed());
                Ok(AgentReply {
                    correlation_id,
                    content: reply,
                    source: ReplySource::Agent,
                })
            }
            Err(CoreError::CircuitOpen { name }) => {
                inner.metrics.message("query", "fallback");
                inner.metrics.error(ErrorKind::CircuitOpen, &name);
                info!(session_id = sid, breaker = %name, "브레이커 열림, 대체 응답 반환");
                Ok(AgentReply {
                    correlation_id: Uuid::new_v4().to_string(),
                    content: FALLBACK_APOLOGY.to_string(),
                    source: ReplySource::Fallback,
                })
            }
            Err(e) => {
                inner.metrics.message("query", "error");
                inner.metrics.error(e.root().kind(), service);
                warn!(session_id = sid, error = %e, "메시지 전송 실패");
                Err(e)
            }
        }
    }

    fn validate(&self, content: &str) -> Result<(), CoreError> {
        if content.trim().is_empty() {
            return Err(CoreError::validation("content", "메시지가 비어 있습니다"));
        }
        let max = self.inner.settings.max_message_chars;
        let chars = content.chars().count();
        if chars > max {
            return Err(CoreError::validation(
                "content",
                format!("메시지 길이 초과: {chars}자 (최대 {max}자)"),
            ));
        }
        Ok(())
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "연결 상태 전이");
            let _ = self.events_tx.send(ConnectionEvent::StateChanged {
                from: previous,
                to: next,
            });
        }
    }

    /// 연결 모델과 공개 상태를 함께 전이
    fn transition(&self, slot: &mut Slot, next: ConnectionState) {
        if let Some(connection) = slot.connection.as_mut() {
            connection.transition(next);
        }
        self.set_state(next);
    }

    fn fail_pending(&self, reason: &str) {
        let drained: Vec<PendingReply> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            let _ = tx.send(Err(CoreError::send_failed(reason.to_string())));
        }
    }

    /// 전송 정책으로 감싼 링크 열기 (시도마다 연결 타임아웃)
    async fn open_link(&self, session_id: &str, user_id: &str) -> Result<TransportLink, CoreError> {
        let request = ConnectRequest {
            url: self.settings.agent_url.clone(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        };
        let timeout = self.settings.connect_timeout;
        let transport = &self.transport;
        let request = &request;

        run_with_retry(&self.transport_policy, move || async move {
            match tokio::time::timeout(timeout, transport.open(request)).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        })
        .await
    }

    /// 열린 링크 부착 → Connected. 세대가 바뀌었으면 링크를 버리고 `false`.
    fn attach(this: &Arc<Inner>, epoch: u64, link: TransportLink) -> bool {
        let TransportLink { sender, events } = link;
        let mut slot = this.slot.lock();
        if slot.epoch != epoch || slot.connection.is_none() {
            drop(slot);
            tokio::spawn(async move {
                let _ = sender.close().await;
            });
            return false;
        }

        *this.last_inbound.lock() = Instant::now();
        slot.sender = Some(sender.clone());
        slot.tasks.reader = Some(tokio::spawn(Inner::read_loop(
            Arc::downgrade(this),
            epoch,
            events,
            sender.clone(),
        )));
        slot.tasks.heartbeat = Some(tokio::spawn(Inner::heartbeat_loop(
            Arc::downgrade(this),
            epoch,
            sender,
            this.settings.heartbeat_interval,
        )));
        this.transition(&mut slot, ConnectionState::Connected);
        let session_id = slot.connection.as_ref().map(|c| c.session_id.clone());
        drop(slot);

        this.breaker.record_success();
        this.metrics.active_connections(1);
        info!(
            service = %this.settings.service,
            session_id = ?session_id,
            event = "connected",
            "에이전트 연결 완료"
        );
        true
    }

    /// 수신 루프: 응답 매칭, ping 응답, 종료 감지
    async fn read_loop(
        weak: Weak<Inner>,
        epoch: u64,
        mut events: tokio::sync::mpsc::Receiver<TransportEvent>,
        sender: Arc<dyn TransportSender>,
    ) {
        let reason = loop {
            let Some(event) = events.recv().await else {
                break "수신 스트림 종료".to_string();
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };

            match event {
                TransportEvent::Message(message) => {
                    *inner.last_inbound.lock() = Instant::now();
                    if let Some(connection) = inner.slot.lock().connection.as_mut() {
                        connection.touch();
                    }
                    inner.dispatch(message, sender.as_ref()).await;
                }
                TransportEvent::Error(e) => {
                    warn!(error = %e, "전송 수신 에러");
                }
                TransportEvent::Closed { reason } => break reason,
            }
        };

        if let Some(inner) = weak.upgrade() {
            Inner::handle_close(&inner, epoch, &reason);
        }
    }

    async fn dispatch(&self, message: AgentMessage, sender: &dyn TransportSender) {
        match message {
            AgentMessage::Reply { id, content } => match self.pending.lock().remove(&id) {
                Some(tx) => {
                    let _ = tx.send(Ok(content));
                }
                None => debug!(correlation_id = %id, "대기 중이 아닌 응답 무시"),
            },
            AgentMessage::Error { id, message } => {
                warn!(correlation_id = ?id, error = %message, "에이전트 에러 수신");
                if let Some(tx) = id.as_ref().and_then(|id| self.pending.lock().remove(id)) {
                    let _ = tx.send(Err(CoreError::MessageSend {
                        message: message.clone(),
                        retryable: false,
                    }));
                }
                let _ = self
                    .events_tx
                    .send(ConnectionEvent::AgentError { id, message });
            }
            AgentMessage::Ping { ts } => {
                if let Err(e) = sender.send(&AgentMessage::Pong { ts }).await {
                    debug!("pong 전송 실패: {e}");
                }
            }
            AgentMessage::Pong { .. } => {}
            AgentMessage::Query { id, .. } => {
                debug!(correlation_id = %id, "예상치 못한 질의 메시지 무시");
            }
        }
    }

    /// 하트비트: 주기마다 ping, 2주기 무수신 시 연결 종료
    async fn heartbeat_loop(
        weak: Weak<Inner>,
        epoch: u64,
        sender: Arc<dyn TransportSender>,
        period: Duration,
    ) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let dead_after = period * DEAD_LINK_HEARTBEATS;

        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };

            let silent = inner.last_inbound.lock().elapsed();
            if silent >= dead_after {
                warn!(
                    silent_ms = silent.as_millis() as u64,
                    "하트비트 응답 없음, 연결 종료"
                );
                let _ = sender.close().await;
                Inner::handle_close(&inner, epoch, "하트비트 타임아웃");
                return;
            }

            if let Err(e) = sender.send(&AgentMessage::ping()).await {
                debug!("ping 전송 실패: {e}");
            }
        }
    }

    /// 비자발적 종료 처리 → Disconnected, 재연결 예약
    fn handle_close(this: &Arc<Inner>, epoch: u64, reason: &str) {
        let mut slot = this.slot.lock();
        if slot.epoch != epoch {
            return;
        }
        slot.epoch += 1;
        slot.sender = None;
        slot.tasks.abort_link();
        this.transition(&mut slot, ConnectionState::Disconnected);
        let next_epoch = slot.epoch;

        warn!(
            service = %this.settings.service,
            reason,
            event = "disconnected",
            "에이전트 연결 끊김"
        );

        slot.tasks.reconnect = Some(tokio::spawn(Inner::reconnect_loop(
            Arc::downgrade(this),
            next_epoch,
        )));
        drop(slot);

        this.fail_pending(reason);
        this.breaker.record_failure();
        this.metrics.active_connections(0);
    }

    /// 재연결 루프: 시도마다 retry_count +1, 지연은 `reconnect_delay × retry_count`
    async fn reconnect_loop(weak: Weak<Inner>, epoch: u64) {
        loop {
            let Some(inner) = weak.upgrade() else {
                return;
            };

            let (attempt, identity) = {
                let mut slot = inner.slot.lock();
                if slot.epoch != epoch {
                    return;
                }
                let attempts = inner.settings.reconnect_attempts;
                let Some(connection) = slot.connection.as_mut() else {
                    return;
                };
                if connection.retry_count >= attempts {
                    let retries = connection.retry_count;
                    inner.transition(&mut slot, ConnectionState::Error);
                    warn!(attempts = retries, event = "max_retries_reached", "재연결 포기");
                    let _ = inner
                        .events_tx
                        .send(ConnectionEvent::MaxRetriesReached { attempts: retries });
                    return;
                }
                connection.retry_count += 1;
                let attempt = connection.retry_count;
                let identity = (connection.session_id.clone(), connection.user_id.clone());
                inner.transition(&mut slot, ConnectionState::Reconnecting);
                (attempt, identity)
            };

            let delay = inner.settings.reconnect_delay * attempt;
            info!(attempt, delay_ms = delay.as_millis() as u64, "재연결 예약");
            let _ = inner
                .events_tx
                .send(ConnectionEvent::Reconnecting { attempt, delay });
            drop(inner);

            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut slot = inner.slot.lock();
                if slot.epoch != epoch {
                    return;
                }
                inner.transition(&mut slot, ConnectionState::Connecting);
            }

            let (session_id, user_id) = identity;
            match inner.open_link(&session_id, &user_id).await {
                Ok(link) => {
                    Inner::attach(&inner, epoch, link);
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "재연결 실패");
                    inner.breaker.record_failure();
                    inner.metrics.error(e.root().kind(), &inner.settings.service);
                    let mut slot = inner.slot.lock();
                    if slot.epoch != epoch {
                        return;
                    }
                    inner.transition(&mut slot, ConnectionState::Disconnected);
                }
            }
        }
    }

    /// 질의 1회 왕복. 응답 타임아웃은 브레이커가 강제한다.
    async fn round_trip(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<(String, String), CoreError> {
        let sender = {
            let slot = self.slot.lock();
            slot.sender.clone().ok_or_else(|| CoreError::NotConnected {
                state: self.state_tx.borrow().to_string(),
            })?
        };

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        let _guard = PendingGuard {
            inner: self,
            id: id.clone(),
        };

        sender
            .send(&AgentMessage::Query {
                id: id.clone(),
                session_id: session_id.to_string(),
                content: content.to_string(),
            })
            .await?;

        match rx.await {
            Ok(Ok(reply)) => Ok((id, reply)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CoreError::send_failed("응답 대기 채널 닫힘")),
        }
    }
}
