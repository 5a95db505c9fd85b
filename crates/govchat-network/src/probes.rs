//! 전송/에이전트 헬스 프로브.

use std::sync::Arc;

use async_trait::async_trait;
use govchat_core::error::CoreError;
use govchat_core::models::breaker::BreakerState;
use govchat_core::models::connection::ConnectionState;
use govchat_core::ports::health::HealthProbe;

use crate::circuit_breaker::CircuitBreaker;
use crate::connection::ConnectionManager;

/// 실시간 전송 프로브: 연결 관리자가 Connected 상태인지
pub struct TransportProbe {
    manager: ConnectionManager,
}

impl TransportProbe {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl HealthProbe for TransportProbe {
    async fn check(&self) -> Result<bool, CoreError> {
        Ok(self.manager.state() == ConnectionState::Connected)
    }
}

/// 에이전트 프로브: 에이전트 브레이커가 열려 있지 않은지
pub struct AgentProbe {
    breaker: Arc<CircuitBreaker>,
}

impl AgentProbe {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl HealthProbe for AgentProbe {
    async fn check(&self) -> Result<bool, CoreError> {
        Ok(self.breaker.state() != BreakerState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use govchat_core::config::BreakerConfig;

    #[tokio::test]
    async fn agent_probe_follows_breaker() {
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
            volume_threshold: 1,
            error_threshold_percent: 100,
            ..BreakerConfig::default()
        }));
        let probe = AgentProbe::new(breaker.clone());
        assert!(probe.check().await.unwrap());

        breaker.record_failure();
        assert!(!probe.check().await.unwrap());
    }
}
