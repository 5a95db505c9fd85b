//! GovChat 도메인 모델.
//!
//! 연결, 서킷 브레이커, 헬스, 서비스 저하 수준, 와이어 메시지, 대화 기록.
//! 외부로 노출되는 모델은 `serde` Serialize/Deserialize를 구현한다.

pub mod breaker;
pub mod connection;
pub mod conversation;
pub mod degradation;
pub mod health;
pub mod wire;
