//! 오프라인 메시지 대기열.
//!
//! Limited 수준에서 보낸 사용자 메시지를 보관했다가 Full 복귀 시 재전송한다.
//! crossbeam `SegQueue` 기반이라 여러 요청 태스크가 락 없이 동시에 넣을 수 있다.

use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// 대기 중인 사용자 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub session_id: String,
    pub content: String,
    pub queued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            content: content.into(),
            queued_at: Utc::now(),
        }
    }
}

/// 용량 제한이 있는 lock-free 대기열
///
/// 가득 차면 가장 오래된 메시지를 버린다.
pub struct OfflineQueue {
    queue: SegQueue<QueuedMessage>,
    size: AtomicUsize,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: SegQueue::new(),
            size: AtomicUsize::new(0),
            capacity: capacity.max(1),
        }
    }

    /// 메시지 추가. 추가 후 대기열 내 위치(1부터)를 반환한다.
    pub fn push(&self, message: QueuedMessage) -> usize {
        while self.size.load(Ordering::Acquire) >= self.capacity {
            match self.queue.pop() {
                Some(dropped) => {
                    self.size.fetch_sub(1, Ordering::AcqRel);
                    warn!(
                        session_id = %dropped.session_id,
                        capacity = self.capacity,
                        "오프라인 큐 가득 참, 가장 오래된 메시지 폐기"
                    );
                }
                None => break,
            }
        }

        self.queue.push(message);
        let position = self.size.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("오프라인 큐 추가, 현재 크기: {position}");
        position
    }

    /// 대기 중인 메시지를 모두 꺼낸다 (들어온 순)
    pub fn drain(&self) -> Vec<QueuedMessage> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(message) = self.queue.pop() {
            self.size.fetch_sub(1, Ordering::AcqRel);
            drained.push(message);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_reports_position() {
        let queue = OfflineQueue::new(10);
        assert_eq!(queue.push(QueuedMessage::new("s1", "첫 번째")), 1);
        assert_eq!(queue.push(QueuedMessage::new("s1", "두 번째")), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_preserves_order_and_empties() {
        let queue = OfflineQueue::new(10);
        queue.push(QueuedMessage::new("s1", "a"));
        queue.push(QueuedMessage::new("s2", "b"));

        let drained = queue.drain();
        let contents: Vec<&str> = drained.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = OfflineQueue::new(2);
        queue.push(QueuedMessage::new("s1", "a"));
        queue.push(QueuedMessage::new("s1", "b"));
        assert_eq!(queue.push(QueuedMessage::new("s1", "c")), 2);

        let contents: Vec<String> = queue.drain().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let queue = OfflineQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(QueuedMessage::new("s1", "a"));
        queue.push(QueuedMessage::new("s1", "b"));
        assert_eq!(queue.len(), 1);
    }
}
