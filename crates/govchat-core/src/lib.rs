//! # govchat-core
//!
//! GovChat 도메인 모델, 포트(trait) 정의, 에러 타입.
//! 모든 크레이트가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`]: 연결/브레이커/헬스/저하 수준/와이어 메시지
//! - [`ports`]: 전송, 헬스 프로브, 대화 저장소, 폴백, 메트릭 포트 (async_trait)
//! - [`error`]: 종류 태그가 붙은 핵심 에러 타입 (thiserror)
//! - [`config`]: 애플리케이션 설정 구조체
//! - [`config_manager`]: 설정 파일 관리 (로드)

pub mod config;
pub mod config_manager;
pub mod error;
pub mod models;
pub mod ports;

#[cfg(test)]
mod tests {
    use crate::models::degradation::ServiceLevel;
    use crate::models::wire::AgentMessage;

    #[test]
    fn agent_message_serde_roundtrip() {
        let msg = AgentMessage::Reply {
            id: "corr-1".to_string(),
            content: "주민등록등본은 정부24에서 발급받을 수 있습니다.".to_string(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: AgentMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, msg);
    }

    #[test]
    fn service_level_gauge_values() {
        assert_eq!(ServiceLevel::Full.gauge_value(), 0.0);
        assert_eq!(ServiceLevel::Limited.gauge_value(), 1.0);
        assert_eq!(ServiceLevel::Offline.gauge_value(), 2.0);
    }

    #[test]
    fn config_defaults() {
        let config = crate::config::AppConfig::default_config();
        assert_eq!(config.connection.reconnect_attempts, 5);
        assert_eq!(config.connection.heartbeat_interval_ms, 15_000);
        assert_eq!(config.breaker.error_threshold_percent, 50);
        assert_eq!(config.breaker.reset_timeout_ms, 30_000);
        assert_eq!(config.health.assessment_interval_ms, 30_000);
        assert_eq!(config.retry.transport.max_attempts, 3);
    }
}
