//! 4-루프 스케줄러.
//!
//! 저하 수준 재평가(기본 30초 + 연결이 붙거나 끊길 때), 오프라인 대기열 재전송
//! (수준 변경 시 + 재평가 주기), 브레이커 상태 게이지 발행(재평가 주기) 오케스트레이션.
//! 연결별 하트비트는 `ConnectionManager`가 따로 돌리며 여기서 합치지 않는다.

use std::sync::Arc;
use std::time::Duration;

use govchat_core::config::AppConfig;
use govchat_core::models::connection::ConnectionState;
use govchat_core::models::degradation::ServiceLevel;
use govchat_core::ports::metrics::Metrics;
use govchat_monitor::degradation::DegradationEngine;
use govchat_network::circuit_breaker::BreakerRegistry;
use govchat_network::connection::ConnectionManager;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::chat_service::ChatService;

/// 스케줄러 설정
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 저하 수준 재평가 간격
    pub assessment_interval: Duration,
    /// 대기열 재전송 / 게이지 발행 간격
    pub maintenance_interval: Duration,
}

impl SchedulerConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            assessment_interval: config.health.assessment_interval(),
            maintenance_interval: config.health.assessment_interval(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            assessment_interval: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

/// 연결이 붙거나 끊기면 주기를 기다리지 않고 재평가한다
async fn reassess_on_connection_change(
    engine: Arc<DegradationEngine>,
    mut state_rx: watch::Receiver<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                if matches!(
                    state,
                    ConnectionState::Connected | ConnectionState::Disconnected | ConnectionState::Error
                ) {
                    let level = engine.assess_system_health().await;
                    debug!(%state, level = %level.level(), "연결 상태 변경, 수준 재평가");
                }
            }
            _ = shutdown_rx.changed() => {
                info!("연결 감시 루프 종료");
                break;
            }
        }
    }
}

/// 4-루프 스케줄러
pub struct Scheduler {
    config: SchedulerConfig,
    engine: Arc<DegradationEngine>,
    chat: Arc<ChatService>,
    connection: ConnectionManager,
    breakers: Arc<BreakerRegistry>,
    metrics: Metrics,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        engine: Arc<DegradationEngine>,
        chat: Arc<ChatService>,
        connection: ConnectionManager,
        breakers: Arc<BreakerRegistry>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            engine,
            chat,
            connection,
            breakers,
            metrics,
        }
    }

    /// 종료 신호까지 모든 루프 실행. 반환 시 연결도 정리된다.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            "스케줄러 시작: 재평가={}ms, 유지보수={}ms",
            self.config.assessment_interval.as_millis(),
            self.config.maintenance_interval.as_millis()
        );

        // ============================================================
        // 1. 저하 수준 재평가 루프
        // ============================================================
        let engine1 = self.engine.clone();
        let shutdown1 = shutdown_rx.clone();
        let interval1 = self.config.assessment_interval;

        let assessment_task = tokio::spawn(async move {
            engine1.run(interval1, shutdown1).await;
        });

        // ============================================================
        // 2. 수준 변경 감시 → Full 복귀 시 대기열 재전송
        // ============================================================
        let chat2 = self.chat.clone();
        let mut level_rx = self.engine.subscribe();
        let mut shutdown2 = shutdown_rx.clone();

        let recovery_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = level_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let level = *level_rx.borrow_and_update();
                        if level == ServiceLevel::Full {
                            let sent = chat2.flush_offline_queue().await;
                            debug!(sent, "Full 복귀, 대기열 재전송");
                        }
                    }
                    _ = shutdown2.changed() => {
                        info!("수준 감시 루프 종료");
                        break;
                    }
                }
            }
        });

        // ============================================================
        // 3. 유지보수 루프 (재전송 재시도 + 브레이커 게이지)
        // ============================================================
        let chat3 = self.chat.clone();
        let breakers3 = self.breakers.clone();
        let metrics3 = self.metrics.clone();
        let mut shutdown3 = shutdown_rx.clone();
        let interval3 = self.config.maintenance_interval;

        let maintenance_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval3);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        breakers3.publish_states(&metrics3);
                        chat3.flush_offline_queue().await;
                    }
                    _ = shutdown3.changed() => {
                        info!("유지보수 루프 종료");
                        break;
                    }
                }
            }
        });

        // ============================================================
        // 4. 연결 상태 감시 → 즉시 재평가
        // ============================================================
        let connection_task = tokio::spawn(reassess_on_connection_change(
            self.engine.clone(),
            self.connection.watch_state(),
            shutdown_rx.clone(),
        ));

        // ============================================================
        // 종료 대기
        // ============================================================
        if !*shutdown_rx.borrow_and_update() {
            let _ = shutdown_rx.changed().await;
        }
        info!("스케줄러 종료 신호 수신");

        // 하트비트/재연결 타이머까지 취소
        self.connection.disconnect().await;

        let _ = assessment_task.await;
        recovery_task.abort();
        maintenance_task.abort();
        connection_task.abort();
    }
}
