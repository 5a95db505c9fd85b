//! WebSocket 전송 어댑터.
//!
//! `tokio-tungstenite` 기반 [`Transport`] 구현.
//! 텍스트 프레임 하나에 [`AgentMessage`] JSON 하나를 싣는다.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use govchat_core::error::CoreError;
use govchat_core::models::wire::AgentMessage;
use govchat_core::ports::transport::{
    ConnectRequest, Transport, TransportEvent, TransportLink, TransportSender,
};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 수신 이벤트 채널 버퍼 크기
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// WebSocket 전송
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }

    /// 세션/사용자 ID를 쿼리 파라미터로 붙인 엔드포인트
    fn endpoint(request: &ConnectRequest) -> Result<Url, CoreError> {
        let mut url = Url::parse(&request.url).map_err(|e| {
            CoreError::Config(format!("에이전트 URL 파싱 실패: {}: {e}", request.url))
        })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(CoreError::Config(format!(
                    "지원하지 않는 에이전트 URL 스킴: {other}"
                )))
            }
        }
        url.query_pairs_mut()
            .append_pair("session_id", &request.session_id)
            .append_pair("user_id", &request.user_id);
        Ok(url)
    }

    /// 수신 루프. 링크 수신 측이 버려지면 프레임을 기다리지 않고 끝낸다.
    async fn read_loop(mut read: SplitStream<WsStream>, tx: mpsc::Sender<TransportEvent>) {
        let reason = loop {
            let frame = tokio::select! {
                frame = read.next() => frame,
                _ = tx.closed() => {
                    debug!("링크 폐기, 수신 루프 종료");
                    return;
                }
            };
            let event = match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<AgentMessage>(text.as_str()) {
                        Ok(message) => TransportEvent::Message(message),
                        Err(e) => TransportEvent::Error(format!("메시지 파싱 실패: {e}")),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "원격 종료".to_string());
                }
                Some(Ok(_)) => continue, // Ping/Pong 프레임은 자동 처리
                Some(Err(e)) => {
                    warn!("WebSocket 수신 에러: {e}");
                    break e.to_string();
                }
                None => break "스트림 종료".to_string(),
            };

            if tx.send(event).await.is_err() {
                debug!("수신 채널 닫힘");
                return;
            }
        };

        let _ = tx.send(TransportEvent::Closed { reason }).await;
        debug!("WebSocket 수신 루프 종료");
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, request: &ConnectRequest) -> Result<TransportLink, CoreError> {
        let url = Self::endpoint(request)?;
        info!(
            session_id = %request.session_id,
            "WebSocket 연결: {}://{}{}",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.path()
        );

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| CoreError::TransportConnection(format!("WebSocket 연결 실패: {e}")))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let reader = tokio::spawn(Self::read_loop(read, tx));

        Ok(TransportLink {
            sender: Arc::new(WsSender {
                write: tokio::sync::Mutex::new(write),
                reader,
            }),
            events: rx,
        })
    }
}

/// WebSocket 송신기. drop 시 수신 태스크도 정리한다.
pub struct WsSender {
    write: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    reader: JoinHandle<()>,
}

impl Drop for WsSender {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl TransportSender for WsSender {
    async fn send(&self, message: &AgentMessage) -> Result<(), CoreError> {
        let json = serde_json::to_string(message)?;
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| CoreError::send_failed(format!("WebSocket 전송 실패: {e}")))
    }

    async fn close(&self) -> Result<(), CoreError> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Close(None))
            .await
            .map_err(|e| CoreError::send_failed(format!("WebSocket 종료 실패: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(url: &str) -> ConnectRequest {
        ConnectRequest {
            url: url.to_string(),
            session_id: "sess 1".to_string(),
            user_id: "user_1".to_string(),
        }
    }

    #[test]
    fn endpoint_appends_identity() {
        let url = WsTransport::endpoint(&request("ws://localhost:8080/agent")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/agent?session_id=sess+1&user_id=user_1"
        );
    }

    #[test]
    fn endpoint_rejects_http_scheme() {
        assert_matches!(
            WsTransport::endpoint(&request("http://localhost:8080/agent")),
            Err(CoreError::Config(_))
        );
        assert_matches!(
            WsTransport::endpoint(&request("not a url")),
            Err(CoreError::Config(_))
        );
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsTransport::new()
            .open(&request(&format!("ws://{addr}/agent")))
            .await;
        assert_matches!(result, Err(CoreError::TransportConnection(_)));
    }
}
