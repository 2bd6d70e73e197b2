//! ACK 상관관계 레지스트리
//!
//! 프래그먼트 송신자는 `(peer, message_id)`로 대기자를 등록하고, 수신 루프는
//! ACK 패킷을 받으면 같은 키의 대기자에게 바로 넘긴다. 일치하는 대기자가
//! 없는 ACK는 버린다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::message::Datagram;

type Key = (SocketAddr, u16);

struct Slot {
    token: u64,
    tx: oneshot::Sender<Datagram>,
}

/// ACK 대기자 레지스트리
#[derive(Clone, Default)]
pub struct AckRegistry {
    waiters: Arc<DashMap<Key, Slot>>,
    next_token: Arc<AtomicU64>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 대기자 등록
    ///
    /// 같은 키로 이미 등록된 대기자가 있으면 교체된다.
    pub fn register(&self, peer: SocketAddr, message_id: u16) -> AckWaiter {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.waiters.insert((peer, message_id), Slot { token, tx });

        AckWaiter {
            waiters: Arc::clone(&self.waiters),
            key: (peer, message_id),
            token,
            rx,
        }
    }

    /// 대기 중인 키인지 확인
    pub fn is_awaited(&self, peer: SocketAddr, message_id: u16) -> bool {
        self.waiters.contains_key(&(peer, message_id))
    }

    /// ACK 전달, 대기자가 있었으면 true
    pub fn resolve(&self, ack: Datagram) -> bool {
        match self.waiters.remove(&(ack.peer, ack.header.message_id)) {
            Some((_, slot)) => slot.tx.send(ack).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// 등록된 ACK 대기 핸들
///
/// drop 시 자기 등록을 해제한다.
pub struct AckWaiter {
    waiters: Arc<DashMap<Key, Slot>>,
    key: Key,
    token: u64,
    rx: oneshot::Receiver<Datagram>,
}

impl AckWaiter {
    pub fn message_id(&self) -> u16 {
        self.key.1
    }

    /// 타임아웃까지 ACK 대기
    ///
    /// 타임아웃이면 None, 등록은 유지되어 재전송 후 다시 기다릴 수 있다.
    pub async fn wait(&mut self, timeout: Duration) -> Option<Datagram> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(datagram)) => Some(datagram),
            // 교체되었거나 레지스트리가 정리됨
            Ok(Err(_)) => None,
            Err(_) => None,
        }
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        let token = self.token;
        self.waiters.remove_if(&self.key, |_, slot| slot.token == token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Packet;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn ack(port: u16, message_id: u16) -> Datagram {
        Datagram::from_packet(peer(port), &Packet::empty_ack(message_id))
    }

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let registry = AckRegistry::new();
        let mut waiter = registry.register(peer(9000), 42);

        assert!(registry.is_awaited(peer(9000), 42));
        assert!(registry.resolve(ack(9000, 42)));

        let ack = waiter.wait(Duration::from_millis(100)).await.unwrap();
        assert_eq!(ack.header.message_id, 42);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_ack_dropped() {
        let registry = AckRegistry::new();
        let _waiter = registry.register(peer(9000), 42);

        // 다른 peer, 다른 id
        assert!(!registry.resolve(ack(9001, 42)));
        assert!(!registry.resolve(ack(9000, 43)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_keeps_registration() {
        let registry = AckRegistry::new();
        let mut waiter = registry.register(peer(9000), 7);

        assert!(waiter.wait(Duration::from_millis(10)).await.is_none());
        assert!(registry.is_awaited(peer(9000), 7));

        assert!(registry.resolve(ack(9000, 7)));
        assert!(waiter.wait(Duration::from_millis(100)).await.is_some());
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let registry = AckRegistry::new();
        {
            let _waiter = registry.register(peer(9000), 1);
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
        assert!(!registry.resolve(ack(9000, 1)));
    }

    #[tokio::test]
    async fn test_stale_drop_keeps_newer_registration() {
        let registry = AckRegistry::new();
        let old = registry.register(peer(9000), 5);
        let _new = registry.register(peer(9000), 5);

        drop(old);
        assert!(registry.is_awaited(peer(9000), 5));
    }
}
