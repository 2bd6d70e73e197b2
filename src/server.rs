//! 서버 파이프라인
//!
//! ```text
//! [Reader] ──ACK──▶ AckRegistry ──▶ 대기 중인 프래그먼트 송신자
//!    │
//!    └─요청─▶ 요청 큐 ──▶ [Request Worker × N] ──▶ Router ──▶ 송신 큐
//!                                                          │
//!                              [Response Worker × M] ◀─────┘ ──▶ socket.send_to
//! ```
//!
//! 수신 루프는 헤더만 파싱하고 파일 I/O나 JSON 디코딩은 하지 않는다.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::correlation::AckRegistry;
use crate::fragment::encoded_len;
use crate::message::{Code, Datagram, ErrorBody, Header, MessageType, Packet};
use crate::reassembly::ReassemblyStore;
use crate::router::{self, CompletedUploads, Outcome, Response};
use crate::sender::{spawn_writers, OutboundQueue, Transmitter};
use crate::stats::{ServerStats, StatsSnapshot};
use crate::storage::Storage;
use crate::{Config, Result};

/// 서버 전역 컨텍스트 (시작 시 한 번 생성, 모든 태스크에 공유)
pub struct ServerContext {
    pub config: Config,
    pub storage: Storage,
    pub reassembly: Arc<ReassemblyStore>,
    pub completed: CompletedUploads,
    pub acks: AckRegistry,
    pub transmitter: Transmitter,
    pub stats: Arc<ServerStats>,
}

impl ServerContext {
    /// 설정과 송신 큐로 컨텍스트 생성
    pub fn new(config: Config, outbound: OutboundQueue) -> Self {
        let stats = Arc::new(ServerStats::new());
        let acks = AckRegistry::new();
        let transmitter = Transmitter::new(&config, outbound, acks.clone(), Arc::clone(&stats));

        // 조각은 base64로 오므로 인코딩 후 크기로 제한
        let reassembly = ReassemblyStore::new(config.reassembly_timeout())
            .with_max_bytes(encoded_len(config.max_content_size));

        Self {
            storage: Storage::from_config(&config),
            reassembly: Arc::new(reassembly),
            completed: CompletedUploads::new(config.reassembly_timeout()),
            acks,
            transmitter,
            stats,
            config,
        }
    }

    /// 응답 패킷 큐에 추가
    async fn reply(&self, peer: SocketAddr, message_id: u16, response: &Response) -> Result<()> {
        let packet = Packet::with_body(Header::ack(response.code, message_id), &response.body)?;
        self.transmitter.outbound().enqueue(peer, &packet).await
    }
}

/// 서버
pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// 주소에 바인딩 후 시작
    pub async fn run(self, addr: SocketAddr) -> Result<ServerHandle> {
        let socket = UdpSocket::bind(addr).await?;
        self.start(socket).await
    }

    /// 이미 바인딩된 소켓으로 시작
    pub async fn start(self, socket: UdpSocket) -> Result<ServerHandle> {
        let config = self.config;
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;

        let (outbound, outbound_rx) = OutboundQueue::channel(config.response_queue_capacity);
        let (request_tx, request_rx) = mpsc::channel::<Datagram>(config.request_queue_capacity.max(1));

        let ctx = Arc::new(ServerContext::new(config, outbound));
        ctx.storage.ensure_namespace().await?;

        let mut tasks = spawn_writers(
            Arc::clone(&socket),
            outbound_rx,
            ctx.config.response_workers,
            Arc::clone(&ctx.stats),
        );
        tasks.extend(spawn_request_workers(Arc::clone(&ctx), request_rx));
        tasks.push(ctx.reassembly.spawn_sweeper(ctx.config.sweep_interval()));
        tasks.push(tokio::spawn(reader_loop(
            Arc::clone(&socket),
            Arc::clone(&ctx),
            request_tx,
        )));

        info!(
            "coapfs server listening on {} (storage: {:?}, {} request workers, {} response workers)",
            local_addr,
            ctx.storage.namespace_dir(),
            ctx.config.request_workers.max(1),
            ctx.config.response_workers.max(1),
        );

        Ok(ServerHandle {
            local_addr,
            ctx,
            tasks,
        })
    }
}

/// 실행 중인 서버 핸들
pub struct ServerHandle {
    local_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn reassembly(&self) -> &Arc<ReassemblyStore> {
        &self.ctx.reassembly
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            reassembly_evicted: self.ctx.reassembly.evicted_count(),
            ..self.ctx.stats.snapshot()
        }
    }

    /// 모든 태스크 정지
    pub async fn shutdown(mut self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("Server stopped: {}", self.stats().summary());
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// 수신 루프: 헤더로 분류만 하고 바로 다음 패킷을 읽는다
async fn reader_loop(socket: Arc<UdpSocket>, ctx: Arc<ServerContext>, request_tx: mpsc::Sender<Datagram>) {
    let mut buf = vec![0u8; ctx.config.recv_buffer_size.max(crate::HEADER_SIZE)];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("수신 에러: {}", e);
                continue;
            }
        };

        let datagram = match Datagram::parse(peer, Bytes::copy_from_slice(&buf[..len])) {
            Ok(datagram) => datagram,
            Err(e) => {
                ServerStats::incr(&ctx.stats.malformed_packets);
                warn!("패킷 버림 ({}): {}", peer, e);
                continue;
            }
        };

        if datagram.header.is_acknowledgement() {
            let message_id = datagram.header.message_id;
            if ctx.acks.resolve(datagram) {
                ServerStats::incr(&ctx.stats.acks_routed);
                debug!("ACK 전달: {} message_id={}", peer, message_id);
            } else {
                ServerStats::incr(&ctx.stats.acks_dropped);
                debug!("대기자 없는 ACK 버림: {} message_id={}", peer, message_id);
            }
            continue;
        }

        match request_tx.try_send(datagram) {
            Ok(()) => ServerStats::incr(&ctx.stats.requests_dispatched),
            Err(mpsc::error::TrySendError::Full(_)) => {
                ServerStats::incr(&ctx.stats.requests_dropped);
                warn!("요청 큐 가득 참, 버림: {}", peer);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("요청 큐 닫힘, 수신 루프 종료");
                break;
            }
        }
    }
}

/// 요청 워커 풀 시작
fn spawn_request_workers(ctx: Arc<ServerContext>, rx: mpsc::Receiver<Datagram>) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));

    (0..ctx.config.request_workers.max(1))
        .map(|worker_id| {
            let ctx = Arc::clone(&ctx);
            let rx = Arc::clone(&rx);

            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(datagram) = next else {
                        debug!("요청 워커 {} 종료", worker_id);
                        break;
                    };
                    run_request(Arc::clone(&ctx), datagram).await;
                }
            })
        })
        .collect()
}

/// 요청 하나 처리
async fn run_request(ctx: Arc<ServerContext>, datagram: Datagram) {
    let peer = datagram.peer;
    let header = datagram.header;

    let task = tokio::spawn(handle_request(Arc::clone(&ctx), datagram));
    contain_failure(&ctx, peer, header, task).await;
}

/// 핸들러 패닉/에러를 워커 경계에서 잡는다
///
/// CON 요청이면 `SERVER_ERROR`로 응답, NON이면 아무것도 보내지 않는다.
async fn contain_failure(
    ctx: &ServerContext,
    peer: SocketAddr,
    header: Header,
    task: JoinHandle<Result<()>>,
) {
    let failure = match task.await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => "handler panicked".to_string(),
        Err(e) => e.to_string(),
    };

    ServerStats::incr(&ctx.stats.handler_failures);
    error!(
        "요청 처리 실패: {} code={} message_id={}: {}",
        peer, header.code, header.message_id, failure
    );

    if header.is_confirmable() {
        let response = Response::error(Code::SERVER_ERROR, failure);
        if let Err(e) = ctx.reply(peer, header.message_id, &response).await {
            warn!("에러 응답 큐잉 실패: {}", e);
        }
    }
}

/// 디코딩 → 라우팅 → 응답 큐잉
async fn handle_request(ctx: Arc<ServerContext>, datagram: Datagram) -> Result<()> {
    let decoded = datagram.decode()?;
    if let Some(warning) = &decoded.warning {
        warn!("{} ({}), 빈 페이로드로 처리", warning, datagram.peer);
    }

    let packet = decoded.packet;
    let header = packet.header;
    let peer = datagram.peer;

    match header.msg_type {
        MessageType::Confirmable | MessageType::NonConfirmable => {}
        other => {
            debug!("요청이 아닌 패킷 무시: {:?} from {}", other, peer);
            return Ok(());
        }
    }

    debug!(
        "Request from {}: code={}, type={:?}, message_id={}",
        peer, header.code, header.msg_type, header.message_id
    );

    let outcome = router::route(&ctx, &packet).await?;

    // NON 요청에는 아무 응답도 보내지 않음
    if !header.is_confirmable() {
        return Ok(());
    }

    match outcome {
        Outcome::Reply(response) => {
            if response.code.is_error() {
                let message = serde_json::from_value::<ErrorBody>(response.body.clone())
                    .map(|b| b.message)
                    .unwrap_or_default();
                debug!("에러 응답: {} {} ({})", peer, response.code, message);
            }
            ctx.reply(peer, header.message_id, &response).await?;
        }
        Outcome::Fragmented {
            announce,
            path,
            content,
        } => {
            ctx.reply(peer, header.message_id, &announce).await?;

            // 이 워커가 전송 수명 동안 재전송 상태를 소유
            if let Err(e) = ctx
                .transmitter
                .send_fragmented(&path, &content, peer, header.message_id)
                .await
            {
                warn!("다운로드 중단: path={}, peer={}: {}", path, peer, e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::Outbound;
    use crate::Error;

    fn context() -> (ServerContext, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = OutboundQueue::channel(16);
        (ServerContext::new(Config::default(), outbound), rx)
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn test_panicking_handler_answers_server_error() {
        let (ctx, mut rx) = context();
        let header = Header::new(MessageType::Confirmable, Code::GET, 77);

        let task = tokio::spawn(async move {
            if header.message_id == 77 {
                panic!("handler blew up");
            }
            Ok::<(), Error>(())
        });
        contain_failure(&ctx, peer(), header, task).await;

        let out = rx.try_recv().unwrap();
        assert_eq!(out.destination, peer());
        let packet = Packet::decode(&out.bytes).unwrap().packet;
        assert_eq!(packet.header.msg_type, MessageType::Acknowledgement);
        assert_eq!(packet.header.message_id, 77);
        assert_eq!(packet.header.code, Code::SERVER_ERROR);
        let body: ErrorBody = packet.body().unwrap();
        assert_eq!(body.message, "handler panicked");

        assert_eq!(ctx.stats.snapshot().handler_failures, 1);
    }

    #[tokio::test]
    async fn test_handler_error_message_returned() {
        let (ctx, mut rx) = context();
        let header = Header::new(MessageType::Confirmable, Code::POST, 5);

        let task = tokio::spawn(async { Err::<(), Error>(Error::Unknown("disk gone".into())) });
        contain_failure(&ctx, peer(), header, task).await;

        let packet = Packet::decode(&rx.try_recv().unwrap().bytes).unwrap().packet;
        assert_eq!(packet.header.code, Code::SERVER_ERROR);
        let body: ErrorBody = packet.body().unwrap();
        assert!(body.message.contains("disk gone"));
    }

    #[tokio::test]
    async fn test_failed_non_request_stays_silent() {
        let (ctx, mut rx) = context();
        let header = Header::new(MessageType::NonConfirmable, Code::POST, 6);

        let task = tokio::spawn(async { Err::<(), Error>(Error::Unknown("disk gone".into())) });
        contain_failure(&ctx, peer(), header, task).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.stats.snapshot().handler_failures, 1);
    }

    #[tokio::test]
    async fn test_successful_handler_sends_nothing_extra() {
        let (ctx, mut rx) = context();
        let header = Header::new(MessageType::Confirmable, Code::GET, 8);

        let task = tokio::spawn(async { Ok::<(), Error>(()) });
        contain_failure(&ctx, peer(), header, task).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.stats.snapshot().handler_failures, 0);
    }
}
