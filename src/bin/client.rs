//! coapfs 클라이언트
//!
//! 사용법:
//!   cargo run --release --bin coapfs-client -- [OPTIONS] <COMMAND> <ARGS>
//!
//! 예시:
//!   cargo run --release --bin coapfs-client -- upload ./a.txt storage/a.txt
//!   cargo run --release --bin coapfs-client -- -s 192.168.1.10:5683 list storage/

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use coapfs::{Client, Config, DEFAULT_PORT};

/// 실행할 명령
enum Command {
    Upload { local: PathBuf, remote: String },
    Download { remote: String, local: PathBuf },
    List { remote: String },
    Delete { remote: String },
    Move { source: String, destination: String },
}

/// 클라이언트 실행 옵션
struct ClientOptions {
    server_addr: SocketAddr,
    config: Config,
    command: Option<Command>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            config: Config::default(),
            command: None,
        }
    }
}

const USAGE: &str = r#"coapfs Client - CoAP 스타일 UDP 파일 서비스 클라이언트

사용법:
  cargo run --release --bin coapfs-client -- [OPTIONS] <COMMAND>

명령:
  upload <LOCAL> <REMOTE>      파일 업로드
  download <REMOTE> <LOCAL>    파일 다운로드
  list <REMOTE>                디렉터리 목록 (예: storage/)
  delete <REMOTE>              파일/디렉터리 삭제
  move <SRC> <DST>             이동

옵션:
  -s, --server <ADDR>      서버 주소 (기본: 127.0.0.1:5683)
  --ack-timeout <MS>       ACK 대기 (기본: 1000)
  --max-attempts <N>       최대 전송 횟수 (기본: 5)
  -h, --help               이 도움말 출력
"#;

fn usage_error(message: &str) -> ! {
    eprintln!("{}\n\n{}", message, USAGE);
    std::process::exit(2);
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize) -> T {
    match args.get(i + 1).map(|v| v.parse()) {
        Some(Ok(parsed)) => parsed,
        _ => usage_error(&format!("{}: 유효한 값 필요", args[i])),
    }
}

fn parse_args() -> ClientOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ClientOptions::default();
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                options.server_addr = parse_value(&args, i);
                i += 1;
            }
            "--ack-timeout" => {
                options.config.ack_timeout_ms = parse_value(&args, i);
                i += 1;
            }
            "--max-attempts" => {
                options.config.max_attempts = parse_value(&args, i);
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let name = positional.next();
    let mut arg = |what: &str| {
        positional
            .next()
            .unwrap_or_else(|| usage_error(&format!("{} 필요", what)))
    };

    options.command = match name.as_deref() {
        Some("upload") => Some(Command::Upload {
            local: PathBuf::from(arg("LOCAL")),
            remote: arg("REMOTE"),
        }),
        Some("download") => Some(Command::Download {
            remote: arg("REMOTE"),
            local: PathBuf::from(arg("LOCAL")),
        }),
        Some("list") => Some(Command::List {
            remote: arg("REMOTE"),
        }),
        Some("delete") => Some(Command::Delete {
            remote: arg("REMOTE"),
        }),
        Some("move") => Some(Command::Move {
            source: arg("SRC"),
            destination: arg("DST"),
        }),
        Some(other) => usage_error(&format!("알 수 없는 명령: {}", other)),
        None => None,
    };

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
    let Some(command) = options.command else {
        usage_error("명령 필요");
    };

    let client = Client::connect(options.server_addr, options.config).await?;
    info!("Bound to {}, server {}", client.local_addr(), client.server_addr());

    let start = Instant::now();
    match command {
        Command::Upload { local, remote } => {
            let data = tokio::fs::read(&local).await?;
            let size = client.upload(&remote, &data).await?;
            println!("Uploaded {:?} -> {} ({} bytes)", local, remote, size);
        }
        Command::Download { remote, local } => {
            let data = client.download(&remote).await?;
            tokio::fs::write(&local, &data).await?;
            println!("Downloaded {} -> {:?} ({} bytes)", remote, local, data.len());
        }
        Command::List { remote } => {
            for item in client.list(&remote).await? {
                println!("{}", item);
            }
        }
        Command::Delete { remote } => {
            client.delete(&remote).await?;
            println!("Deleted {}", remote);
        }
        Command::Move {
            source,
            destination,
        } => {
            client.relocate(&source, &destination).await?;
            println!("Moved {} -> {}", source, destination);
        }
    }

    info!("Done in {:.2}s ({})", start.elapsed().as_secs_f64(), client.stats().summary());
    Ok(())
}
