//! 송신 파이프라인
//!
//! - 송신 큐: 모든 소켓 쓰기는 이 큐를 거친다
//! - 송신 워커: 큐에서 꺼내 `send_to` 한 번씩 수행
//! - 재전송: 패킷마다 ACK 대기, 타임아웃이면 같은 패킷 재전송
//! - 프래그먼트 전송: 인덱스 순서로 하나씩, 앞 조각 ACK 후 다음 조각

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlation::AckRegistry;
use crate::fragment::Fragmenter;
use crate::message::{Code, Datagram, MessageType, Packet};
use crate::stats::ServerStats;
use crate::{Config, Error, Result};

/// 송신 대기 패킷
#[derive(Debug, Clone)]
pub struct Outbound {
    pub destination: SocketAddr,
    pub bytes: Bytes,
}

/// 송신 큐 핸들
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Outbound>,
}

impl OutboundQueue {
    /// 큐 생성
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// 패킷 인코딩 후 큐에 추가
    pub async fn enqueue(&self, destination: SocketAddr, packet: &Packet) -> Result<()> {
        self.enqueue_bytes(destination, Bytes::from(packet.encode()))
            .await
    }

    pub async fn enqueue_bytes(&self, destination: SocketAddr, bytes: Bytes) -> Result<()> {
        self.tx
            .send(Outbound { destination, bytes })
            .await
            .map_err(|_| Error::ChannelError)
    }
}

/// 송신 워커 풀 시작
///
/// 워커들은 하나의 수신기를 공유하며 FIFO 순서로 꺼낸다.
pub fn spawn_writers(
    socket: Arc<UdpSocket>,
    rx: mpsc::Receiver<Outbound>,
    workers: usize,
    stats: Arc<ServerStats>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));

    (0..workers.max(1))
        .map(|worker_id| {
            let socket = Arc::clone(&socket);
            let rx = Arc::clone(&rx);
            let stats = Arc::clone(&stats);

            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(outbound) = next else {
                        debug!("송신 워커 {} 종료", worker_id);
                        break;
                    };

                    match socket.send_to(&outbound.bytes, outbound.destination).await {
                        Ok(_) => ServerStats::incr(&stats.packets_sent),
                        Err(e) => warn!("송신 실패 ({}): {}", outbound.destination, e),
                    }
                }
            })
        })
        .collect()
}

/// ACK 기반 재전송 송신자
#[derive(Clone)]
pub struct Transmitter {
    outbound: OutboundQueue,
    acks: AckRegistry,
    stats: Arc<ServerStats>,
    fragmenter: Fragmenter,
    fragment_code: Code,
    ack_timeout: Duration,
    max_attempts: u32,
    fragment_interval: Duration,
}

impl Transmitter {
    pub fn new(
        config: &Config,
        outbound: OutboundQueue,
        acks: AckRegistry,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            outbound,
            acks,
            stats,
            fragmenter: Fragmenter::new(config.max_chunk_size(), config.max_content_size),
            fragment_code: Code::CONTENT,
            ack_timeout: config.ack_timeout(),
            max_attempts: config.max_attempts.max(1),
            fragment_interval: config.fragment_interval(),
        }
    }

    /// 프래그먼트 패킷 코드 지정 (기본 Content)
    pub fn with_fragment_code(mut self, code: Code) -> Self {
        self.fragment_code = code;
        self
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn fragmenter(&self) -> &Fragmenter {
        &self.fragmenter
    }

    /// 패킷 전송 후 ACK 대기, 없으면 같은 패킷 재전송
    ///
    /// 최대 시도 횟수를 넘기면 `RetransmitExhausted`.
    pub async fn send_reliable(&self, destination: SocketAddr, packet: &Packet) -> Result<Datagram> {
        let message_id = packet.header.message_id;
        let bytes = Bytes::from(packet.encode());

        // 송신 전에 등록해야 빠른 ACK를 놓치지 않음
        let mut waiter = self.acks.register(destination, message_id);

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                ServerStats::incr(&self.stats.retransmissions);
                debug!(
                    "재전송: message_id={}, attempt {}/{}",
                    message_id, attempt, self.max_attempts
                );
            }

            self.outbound
                .enqueue_bytes(destination, bytes.clone())
                .await?;

            if let Some(ack) = waiter.wait(self.ack_timeout).await {
                return Ok(ack);
            }
        }

        Err(Error::RetransmitExhausted {
            message_id,
            attempts: self.max_attempts,
        })
    }

    /// 프래그먼트 전송
    ///
    /// 조각 `i`의 message_id는 `base_message_id + i + 1`. 앞 조각이 ACK되어야
    /// 다음 조각을 보낸다. 한 조각이라도 재전송 한도를 넘기면 전체 실패.
    /// 에러 코드 ACK를 받으면 남은 조각은 보내지 않고 그 ACK를 돌려준다.
    pub async fn send_fragmented(
        &self,
        path: &str,
        content: &str,
        destination: SocketAddr,
        base_message_id: u16,
    ) -> Result<Datagram> {
        let fragments = self.fragmenter.split(content, path)?;
        let total = fragments.len();

        info!(
            "프래그먼트 전송 시작: path={}, {} fragments -> {}",
            path, total, destination
        );

        let mut last_ack = None;
        for (i, fragment) in fragments.iter().enumerate() {
            let message_id = base_message_id.wrapping_add(i as u16).wrapping_add(1);
            let packet = fragment.to_packet(MessageType::Confirmable, self.fragment_code, message_id)?;

            ServerStats::incr(&self.stats.fragments_sent);
            let ack = match self.send_reliable(destination, &packet).await {
                Ok(ack) => ack,
                Err(e) => {
                    ServerStats::incr(&self.stats.transfers_failed);
                    warn!(
                        "프래그먼트 전송 실패: path={}, fragment {}/{}: {}",
                        path,
                        i + 1,
                        total,
                        e
                    );
                    return Err(e);
                }
            };

            if ack.header.code.is_error() {
                ServerStats::incr(&self.stats.transfers_failed);
                warn!(
                    "프래그먼트 거부: path={}, fragment {}/{}, code={}",
                    path,
                    i + 1,
                    total,
                    ack.header.code
                );
                return Ok(ack);
            }

            debug!("Fragment {}/{} acked by {}", i + 1, total, destination);
            last_ack = Some(ack);

            if !self.fragment_interval.is_zero() && i + 1 < total {
                tokio::time::sleep(self.fragment_interval).await;
            }
        }

        ServerStats::incr(&self.stats.transfers_completed);
        info!("프래그먼트 전송 완료: path={}, {} fragments", path, total);

        // split은 항상 최소 하나의 조각을 만든다
        last_ack.ok_or(Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentDescriptor;
    use crate::message::Header;

    fn test_config() -> Config {
        Config {
            // "storage/f"(JSON 11자)를 빼면 조각당 8문자
            max_datagram_size: 4 + 1 + 200 + 11 + 8,
            ack_timeout_ms: 30,
            max_attempts: 3,
            ..Config::default()
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn test_exhausted_retransmits_same_packet() {
        let config = test_config();
        let (queue, mut rx) = OutboundQueue::channel(64);
        let acks = AckRegistry::new();
        let stats = Arc::new(ServerStats::new());
        let transmitter = Transmitter::new(&config, queue, acks.clone(), Arc::clone(&stats));

        let result = transmitter
            .send_fragmented("storage/f", "QUJDREVGR0hJSktMTU5PUA==", peer(), 100)
            .await;

        match result {
            Err(Error::RetransmitExhausted { message_id, attempts }) => {
                assert_eq!(message_id, 101);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // 첫 조각만 3번, 같은 바이트
        let mut sent = Vec::new();
        while let Ok(out) = rx.try_recv() {
            sent.push(out.bytes);
        }
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|b| b == &sent[0]));

        let packet = Packet::decode(&sent[0]).unwrap().packet;
        assert_eq!(packet.header.message_id, 101);
        let body: FragmentDescriptor = packet.body().unwrap();
        assert_eq!(body.fragment.index, 0);

        let snap = stats.snapshot();
        assert_eq!(snap.retransmissions, 2);
        assert_eq!(snap.transfers_failed, 1);
        assert!(acks.is_empty());
    }

    #[tokio::test]
    async fn test_fragments_sent_in_order_when_acked() {
        let config = test_config();
        let (queue, mut rx) = OutboundQueue::channel(64);
        let acks = AckRegistry::new();
        let stats = Arc::new(ServerStats::new());
        let transmitter = Transmitter::new(&config, queue, acks.clone(), Arc::clone(&stats));

        // 수신측 흉내: 받은 조각마다 즉시 ACK
        let acker = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(out) = rx.recv().await {
                let packet = Packet::decode(&out.bytes).unwrap().packet;
                let body: FragmentDescriptor = packet.body().unwrap();
                seen.push((packet.header.message_id, body.fragment.index, body.content));
                let ack = Packet::new(Header::ack(Code::EMPTY, packet.header.message_id), None);
                acks.resolve(Datagram::from_packet(out.destination, &ack));
                if body.fragment.is_last() {
                    break;
                }
            }
            seen
        });

        let content = "QUJDREVGR0hJSktMTU5PUA==";
        transmitter
            .send_fragmented("storage/f", content, peer(), u16::MAX - 1)
            .await
            .unwrap();

        let seen = acker.await.unwrap();
        assert_eq!(seen.len(), 3);
        let ids: Vec<u16> = seen.iter().map(|s| s.0).collect();
        assert_eq!(ids, vec![u16::MAX, 0, 1]);
        let indices: Vec<u32> = seen.iter().map(|s| s.1).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let joined: String = seen.iter().map(|s| s.2.as_str()).collect();
        assert_eq!(joined, content);

        let snap = stats.snapshot();
        assert_eq!(snap.fragments_sent, 3);
        assert_eq!(snap.retransmissions, 0);
        assert_eq!(snap.transfers_completed, 1);
    }
}
