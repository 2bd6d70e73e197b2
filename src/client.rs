//! 라이브러리 클라이언트
//!
//! 소켓 하나로 서버와 통신한다. 모든 요청은 CON으로 보내고 같은 message_id의
//! ACK를 받을 때까지 재전송한다. 큰 업로드는 프래그먼트로 나누어 보내고,
//! 프래그먼트 다운로드는 조각마다 ACK를 돌려주며 재조립한다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlation::AckRegistry;
use crate::fragment::{FragmentDescriptor, MAX_FRAGMENTS};
use crate::message::{Code, Datagram, ErrorBody, Header, MessageType, Packet};
use crate::reassembly::{Assembly, ReassemblyStore};
use crate::sender::{spawn_writers, OutboundQueue, Transmitter};
use crate::stats::{ServerStats, StatsSnapshot};
use crate::{Config, Error, Result};

/// 서버가 요청 외에 먼저 보내는 패킷(프래그먼트) 버퍼 크기
const INBOX_CAPACITY: usize = 1024;

/// 다운로드 응답 본문
#[derive(Debug, Deserialize)]
struct DownloadBody {
    #[serde(default)]
    size: usize,
    content: Option<String>,
    #[serde(default)]
    fragmented: bool,
    total_fragments: Option<usize>,
}

/// 목록 응답 본문
#[derive(Debug, Deserialize)]
struct ListingBody {
    items: Vec<String>,
}

/// coapfs 클라이언트
pub struct Client {
    server_addr: SocketAddr,
    local_addr: SocketAddr,
    config: Config,
    transmitter: Transmitter,
    inbox: Mutex<mpsc::Receiver<Datagram>>,
    next_message_id: AtomicU16,
    stats: Arc<ServerStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// 임의 로컬 포트에 바인딩 후 연결
    pub async fn connect(server_addr: SocketAddr, config: Config) -> Result<Self> {
        let bind: SocketAddr = if server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        Self::with_socket(socket, server_addr, config).await
    }

    /// 이미 바인딩된 소켓 사용
    pub async fn with_socket(socket: UdpSocket, server_addr: SocketAddr, config: Config) -> Result<Self> {
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;

        let stats = Arc::new(ServerStats::new());
        let acks = AckRegistry::new();
        let (outbound, outbound_rx) = OutboundQueue::channel(config.response_queue_capacity);
        let transmitter = Transmitter::new(&config, outbound, acks.clone(), Arc::clone(&stats))
            .with_fragment_code(Code::POST);

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);

        // 응답 순서 보존을 위해 송신 워커는 하나
        let mut tasks = spawn_writers(Arc::clone(&socket), outbound_rx, 1, Arc::clone(&stats));
        tasks.push(tokio::spawn(reader_loop(
            socket,
            server_addr,
            acks,
            inbox_tx,
            Arc::clone(&stats),
            config.recv_buffer_size,
        )));

        debug!("client {} -> {}", local_addr, server_addr);

        Ok(Self {
            server_addr,
            local_addr,
            config,
            transmitter,
            inbox: Mutex::new(inbox_rx),
            next_message_id: AtomicU16::new(rand::random()),
            stats,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 연속된 message_id `count`개 예약, 첫 번째 반환
    ///
    /// 한 번에 u16 공간 전체를 넘게 예약하면 id가 겹치므로 거부한다.
    fn reserve_ids(&self, count: usize) -> Result<u16> {
        if count > MAX_FRAGMENTS + 1 {
            return Err(Error::TooManyFragments {
                total: count.saturating_sub(1),
                max: MAX_FRAGMENTS,
            });
        }
        Ok(self
            .next_message_id
            .fetch_add(count.max(1) as u16, Ordering::Relaxed))
    }

    /// 요청 전송 후 응답 반환 (에러 코드도 그대로 반환)
    pub async fn send_raw(&self, code: Code, body: &Value) -> Result<Packet> {
        let message_id = self.reserve_ids(1)?;
        let packet = Packet::with_body(Header::new(MessageType::Confirmable, code, message_id), body)?;
        let ack = self.transmitter.send_reliable(self.server_addr, &packet).await?;
        decode_response(&ack)
    }

    /// 요청 전송, 에러 코드는 `Error::Remote`로 변환
    async fn request(&self, code: Code, body: Value) -> Result<Packet> {
        into_success(self.send_raw(code, &body).await?)
    }

    /// 업로드, 서버가 기록한 크기 반환
    pub async fn upload(&self, path: &str, bytes: &[u8]) -> Result<u64> {
        if bytes.len() > self.config.max_content_size {
            return Err(Error::PayloadTooLarge {
                size: bytes.len(),
                max: self.config.max_content_size,
            });
        }

        let content = STANDARD.encode(bytes);
        let fragmenter = self.transmitter.fragmenter();

        let total = fragmenter.fragment_count(&content, path)?;
        let packet = if total > 1 {
            // 요청 id 하나 + 조각마다 하나
            let base = self.reserve_ids(total + 1)?;
            info!("업로드 (fragmented): {} ({} bytes, {} fragments)", path, bytes.len(), total);

            let ack = self
                .transmitter
                .send_fragmented(path, &content, self.server_addr, base)
                .await?;
            into_success(decode_response(&ack)?)?
        } else {
            self.request(Code::POST, json!({ "path": path, "content": content }))
                .await?
        };

        if packet.header.code != Code::CREATED {
            return Err(unexpected(&packet));
        }

        let size = packet
            .json()
            .and_then(|v| v.get("size"))
            .and_then(Value::as_u64)
            .unwrap_or(bytes.len() as u64);
        Ok(size)
    }

    /// 다운로드 (프래그먼트 응답 지원)
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        // 프래그먼트 수신함은 다운로드 하나가 독점
        let mut inbox = self.inbox.lock().await;

        let message_id = self.reserve_ids(1)?;
        let request = Packet::with_body(
            Header::new(MessageType::Confirmable, Code::GET, message_id),
            &json!({ "path": path }),
        )?;
        let ack = self.transmitter.send_reliable(self.server_addr, &request).await?;
        let response = into_success(decode_response(&ack)?)?;

        let body: DownloadBody = response.body().ok_or_else(|| unexpected(&response))?;

        if !body.fragmented {
            let content = body.content.ok_or_else(|| unexpected(&response))?;
            return Ok(STANDARD.decode(content.as_bytes())?);
        }

        let total = body.total_fragments.unwrap_or(0);
        if total == 0 {
            return Err(unexpected(&response));
        }

        info!("다운로드 (fragmented): {} ({} bytes, {} fragments)", path, body.size, total);
        let content = self
            .receive_fragments(&mut inbox, path, message_id, total as u32)
            .await?;
        Ok(STANDARD.decode(content.as_bytes())?)
    }

    /// 프래그먼트 수신: 조각마다 ACK, 모두 모이면 조립된 base64 반환
    ///
    /// 조각 사이 대기 시간은 `ack_timeout * max_attempts`. 넘기면 `Timeout`.
    async fn receive_fragments(
        &self,
        inbox: &mut mpsc::Receiver<Datagram>,
        path: &str,
        base_message_id: u16,
        total: u32,
    ) -> Result<String> {
        let store = ReassemblyStore::new(self.config.reassembly_timeout());
        let idle = self.config.ack_timeout() * self.config.max_attempts.max(1);

        loop {
            let datagram = match tokio::time::timeout(idle, inbox.recv()).await {
                Ok(Some(datagram)) => datagram,
                Ok(None) => return Err(Error::ConnectionClosed),
                Err(_) => {
                    warn!(
                        "프래그먼트 대기 타임아웃: {} ({:?})",
                        path,
                        store.progress(path)
                    );
                    return Err(Error::Timeout);
                }
            };

            let header = datagram.header;
            let offset = header.message_id.wrapping_sub(base_message_id) as u32;
            if !header.is_confirmable() || header.code != Code::CONTENT || offset == 0 || offset > total {
                debug!("관련 없는 패킷 무시: message_id={}", header.message_id);
                continue;
            }

            let fragment = match datagram.decode()?.packet.body::<FragmentDescriptor>() {
                Some(fragment) if fragment.path == path => fragment,
                _ => {
                    debug!("프래그먼트 아님: message_id={}", header.message_id);
                    continue;
                }
            };

            // 중복 조각도 ACK해야 송신측이 다음으로 넘어간다
            self.transmitter
                .outbound()
                .enqueue(self.server_addr, &Packet::empty_ack(header.message_id))
                .await?;

            let info = fragment.fragment;
            match store.add_fragment(path, info.index, info.total, fragment.content) {
                Ok(Assembly::Complete(content)) => return Ok(content),
                Ok(Assembly::Incomplete { received, total }) => {
                    debug!("Fragment {}/{} received ({} stored)", info.index + 1, total, received);
                }
                Err(e) => warn!("잘못된 프래그먼트 무시: {}", e),
            }
        }
    }

    /// 디렉터리 목록
    pub async fn list(&self, path: &str) -> Result<Vec<String>> {
        let response = self.request(Code::GET, json!({ "path": path })).await?;
        let body: ListingBody = response.body().ok_or_else(|| unexpected(&response))?;
        Ok(body.items)
    }

    /// 파일/디렉터리 삭제
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.request(Code::DELETE, json!({ "path": path })).await?;
        if response.header.code != Code::DELETED {
            return Err(unexpected(&response));
        }
        Ok(())
    }

    /// 이동
    pub async fn relocate(&self, source: &str, destination: &str) -> Result<()> {
        let response = self
            .request(
                Code::MOVE,
                json!({ "source": source, "destination": destination }),
            )
            .await?;
        if response.header.code != Code::CHANGED {
            return Err(unexpected(&response));
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// 수신 루프: ACK는 대기자에게, 나머지는 수신함으로
async fn reader_loop(
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    acks: AckRegistry,
    inbox: mpsc::Sender<Datagram>,
    stats: Arc<ServerStats>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size.max(crate::HEADER_SIZE)];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("수신 에러: {}", e);
                continue;
            }
        };

        if peer != server_addr {
            debug!("서버가 아닌 주소에서 온 패킷 버림: {}", peer);
            continue;
        }

        let datagram = match Datagram::parse(peer, Bytes::copy_from_slice(&buf[..len])) {
            Ok(datagram) => datagram,
            Err(e) => {
                ServerStats::incr(&stats.malformed_packets);
                warn!("패킷 버림: {}", e);
                continue;
            }
        };

        if datagram.header.is_acknowledgement() {
            if acks.resolve(datagram) {
                ServerStats::incr(&stats.acks_routed);
            } else {
                ServerStats::incr(&stats.acks_dropped);
            }
            continue;
        }

        if inbox.try_send(datagram).is_err() {
            ServerStats::incr(&stats.requests_dropped);
            debug!("수신함 가득 참, 패킷 버림");
        }
    }
}

fn decode_response(ack: &Datagram) -> Result<Packet> {
    let decoded = ack.decode()?;
    if let Some(warning) = decoded.warning {
        warn!("응답 {}", warning);
    }
    Ok(decoded.packet)
}

/// 에러 코드 응답을 `Error::Remote`로 변환
fn into_success(packet: Packet) -> Result<Packet> {
    if !packet.header.code.is_error() {
        return Ok(packet);
    }

    let message = packet
        .body::<ErrorBody>()
        .map(|body| body.message)
        .unwrap_or_default();
    Err(Error::Remote {
        code: packet.header.code.0,
        message,
    })
}

fn unexpected(packet: &Packet) -> Error {
    Error::Unknown(format!("예상치 못한 응답: {}", packet.header.code))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn client() -> Client {
        let server = SocketAddr::from(([127, 0, 0, 1], 9));
        Client::connect(server, Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_reserve_ids_is_contiguous() {
        let client = client().await;
        let base = client.reserve_ids(5).unwrap();
        assert_eq!(client.reserve_ids(1).unwrap(), base.wrapping_add(5));
    }

    #[tokio::test]
    async fn test_reserve_ids_rejects_wraparound() {
        let client = client().await;
        let before = client.reserve_ids(1).unwrap();

        // 요청 id + 조각 id가 u16 공간을 넘으면 겹친다
        match client.reserve_ids(MAX_FRAGMENTS + 2) {
            Err(Error::TooManyFragments { total, max }) => {
                assert_eq!(total, MAX_FRAGMENTS + 1);
                assert_eq!(max, MAX_FRAGMENTS);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(client.reserve_ids(MAX_FRAGMENTS + 1).is_ok());

        // 거부된 예약은 카운터를 움직이지 않음
        let after = client.reserve_ids(1).unwrap();
        assert_eq!(after, before.wrapping_add(1).wrapping_add((MAX_FRAGMENTS + 1) as u16));
    }

    #[tokio::test]
    async fn test_upload_with_too_many_fragments_rejected_locally() {
        let config = Config {
            max_datagram_size: 4 + 1 + 200 + 12, // "storage/x"(11자)를 빼면 조각당 1문자
            ..Config::default()
        };
        let client = Client::connect(SocketAddr::from(([127, 0, 0, 1], 9)), config)
            .await
            .unwrap();

        let data = vec![0u8; 50_000]; // base64 66668자
        match client.upload("storage/x", &data).await {
            Err(Error::TooManyFragments { total, .. }) => assert_eq!(total, 66_668),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(client.stats().fragments_sent, 0);
    }
}
