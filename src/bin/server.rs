//! coapfs 서버
//!
//! UDP 위의 CoAP 스타일 파일 서비스
//! - 4바이트 헤더 + JSON 페이로드
//! - 큰 응답은 프래그먼트 + ACK 재전송
//!
//! 사용법:
//!   cargo run --release --bin coapfs-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 실행 (./storage)
//!   cargo run --release --bin coapfs-server -- --bind 0.0.0.0:5683
//!
//!   # 저장소 루트 지정 + 디버그 로그
//!   RUST_LOG=coapfs=debug cargo run --release --bin coapfs-server -- -s /srv/files

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use coapfs::{Config, Server, DEFAULT_PORT};

/// 서버 실행 옵션
struct ServerOptions {
    bind_addr: SocketAddr,
    config: Config,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            config: Config::default(),
        }
    }
}

fn invalid_value(flag: &str, value: &str) -> ! {
    eprintln!("{}: 유효하지 않은 값 '{}'", flag, value);
    std::process::exit(2);
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize) -> Option<T> {
    let value = args.get(i + 1)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => invalid_value(&args[i], value),
    }
}

fn parse_args() -> ServerOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ServerOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if let Some(addr) = parse_value(&args, i) {
                    options.bind_addr = addr;
                    i += 1;
                }
            }
            "--storage" | "-s" => {
                if let Some(root) = args.get(i + 1) {
                    options.config.storage_root = PathBuf::from(root);
                    i += 1;
                }
            }
            "--workers" | "-w" => {
                if let Some(workers) = parse_value(&args, i) {
                    options.config.request_workers = workers;
                    i += 1;
                }
            }
            "--ack-timeout" => {
                if let Some(ms) = parse_value(&args, i) {
                    options.config.ack_timeout_ms = ms;
                    i += 1;
                }
            }
            "--max-attempts" => {
                if let Some(attempts) = parse_value(&args, i) {
                    options.config.max_attempts = attempts;
                    i += 1;
                }
            }
            "--lossy" => {
                let root = options.config.storage_root.clone();
                options.config = Config::lossy_network().with_storage_root(root);
            }
            "--help" | "-h" => {
                println!(
                    r#"coapfs Server - CoAP 스타일 UDP 파일 서비스

사용법:
  cargo run --release --bin coapfs-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:5683)
  -s, --storage <DIR>      storage/ 디렉터리를 둘 루트 (기본: .)
  -w, --workers <N>        요청 처리 워커 수 (기본: 4)
  --ack-timeout <MS>       프래그먼트 ACK 대기 (기본: 1000)
  --max-attempts <N>       프래그먼트당 최대 전송 횟수 (기본: 5)
  --lossy                  불안정 네트워크 프리셋
  -h, --help               이 도움말 출력

로그 레벨은 RUST_LOG로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    options
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args();

    info!("coapfs Server starting...");
    info!("Bind address: {}", options.bind_addr);
    info!(
        "Chunk size: {} chars, ACK timeout: {}ms x {}",
        options.config.max_chunk_size(),
        options.config.ack_timeout_ms,
        options.config.max_attempts
    );

    let handle = Server::new(options.config).run(options.bind_addr).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let stats = handle.stats();
    handle.shutdown().await;

    println!("\n=== Server Statistics ===");
    println!("{}", stats.summary());

    Ok(())
}
