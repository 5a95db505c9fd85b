//! # govchat-network
//!
//! 업스트림 대화 에이전트와의 실시간 연결 계층.
//!
//! - [`retry`]: 에러 종류 기반 재시도 엔진 (지수/고정 백오프 + 지터)
//! - [`circuit_breaker`]: 3상태 서킷 브레이커와 이름별 레지스트리
//! - [`ws_transport`]: `tokio-tungstenite` WebSocket 전송 어댑터
//! - [`connection`]: 연결 상태 머신, 하트비트, 재연결 스케줄링
//! - [`probes`]: 전송/에이전트 헬스 프로브
//!
//! ```rust,ignore
//! use govchat_network::circuit_breaker::BreakerRegistry;
//! use govchat_network::connection::ConnectionManager;
//! use govchat_network::ws_transport::WsTransport;
//!
//! let registry = BreakerRegistry::new();
//! let breaker = registry.get_or_create(config.breaker.clone());
//! let manager = ConnectionManager::new(Arc::new(WsTransport::new()), breaker, &config, metrics);
//! manager.connect("sess_1", "user_1").await?;
//! ```

pub mod circuit_breaker;
pub mod connection;
pub mod probes;
pub mod retry;
pub mod ws_transport;
