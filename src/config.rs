//! 프로토콜 설정

use std::path::PathBuf;
use std::time::Duration;

use crate::{
    DEFAULT_FRAGMENT_OVERHEAD, DEFAULT_MAX_CONTENT_SIZE, DEFAULT_MAX_DATAGRAM_SIZE, HEADER_SIZE,
};

/// coapfs 서버/클라이언트 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 저장소 네임스페이스 (경로 첫 컴포넌트)
    pub storage_namespace: String,

    /// 네임스페이스 디렉터리가 위치한 루트
    pub storage_root: PathBuf,

    /// 최대 데이터그램 크기 (바이트)
    pub max_datagram_size: usize,

    /// 프래그먼트 JSON 메타데이터 예약 공간 (바이트)
    pub fragment_overhead: usize,

    /// 최대 콘텐츠 크기 (디코딩 후 바이트)
    pub max_content_size: usize,

    /// 프래그먼트당 ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 프래그먼트당 최대 전송 시도 횟수
    pub max_attempts: u32,

    /// 프래그먼트 전송 간격 (밀리초)
    /// 0이면 간격 없음
    pub fragment_interval_ms: u64,

    /// 재조립 항목 만료 시간 (초)
    pub reassembly_timeout_secs: u64,

    /// 만료 항목 정리 주기 (초)
    pub sweep_interval_secs: u64,

    /// 요청 처리 워커 수
    pub request_workers: usize,

    /// 응답 송신 워커 수
    pub response_workers: usize,

    /// 요청 큐 크기
    pub request_queue_capacity: usize,

    /// 응답 큐 크기
    pub response_queue_capacity: usize,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_namespace: "storage".to_string(),
            storage_root: PathBuf::from("."),
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            fragment_overhead: DEFAULT_FRAGMENT_OVERHEAD,
            max_content_size: DEFAULT_MAX_CONTENT_SIZE,
            ack_timeout_ms: 1000,          // 1초
            max_attempts: 5,
            fragment_interval_ms: 0,       // 간격 없음
            reassembly_timeout_secs: 300,  // 5분
            sweep_interval_secs: 60,       // 1분마다 정리
            request_workers: 4,
            response_workers: 2,
            request_queue_capacity: 1024,
            response_queue_capacity: 4096,
            recv_buffer_size: 65535,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 프래그먼트 하나에 담을 수 있는 최대 base64 문자 수
    pub fn max_chunk_size(&self) -> usize {
        self.max_datagram_size
            .saturating_sub(HEADER_SIZE + 1 + self.fragment_overhead)
            .max(1)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn fragment_interval(&self) -> Duration {
        Duration::from_millis(self.fragment_interval_ms)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_secs(self.reassembly_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// 저장소 루트 지정
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// 로컬 네트워크용 설정 (짧은 타임아웃)
    pub fn low_latency() -> Self {
        Self {
            ack_timeout_ms: 200,
            max_attempts: 5,
            sweep_interval_secs: 30,
            request_workers: 8,
            response_workers: 2,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            max_datagram_size: 1400,       // 경로 MTU 안쪽
            ack_timeout_ms: 2000,
            max_attempts: 10,
            fragment_interval_ms: 2,       // 버스트 손실 완화
            reassembly_timeout_secs: 600,
            ..Self::default()
        }
    }
}
