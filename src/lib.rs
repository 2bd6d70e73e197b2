//! # coapfs
//!
//! UDP 기반 CoAP 스타일 요청/응답 파일 서비스
//!
//! ## 핵심 특징
//! - **컴팩트 헤더**: 4바이트 바이너리 헤더 + 0xFF 마커 + JSON 페이로드
//! - **프래그먼트 전송**: 데이터그램보다 큰 콘텐츠를 순서대로 분할
//! - **ACK 재전송**: 프래그먼트마다 ACK 대기, 제한 횟수까지 재전송
//! - **재조립 저장소**: 경로별 부분 수신 추적 + 오래된 항목 정리
//! - **파이프라인**: 수신 루프 / 요청 워커 풀 / 응답 워커 풀 분리

pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod fragment;
pub mod message;
pub mod reassembly;
pub mod router;
pub mod sender;
pub mod server;
pub mod stats;
pub mod storage;

pub use client::Client;
pub use config::Config;
pub use correlation::AckRegistry;
pub use error::{Error, Result};
pub use fragment::{FragmentDescriptor, FragmentInfo};
pub use message::{Code, Header, MessageType, Packet};
pub use reassembly::ReassemblyStore;
pub use server::{Server, ServerHandle};
pub use stats::ServerStats;
pub use storage::Storage;

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 4;

/// 페이로드 시작 마커
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// 기본 서버 포트
pub const DEFAULT_PORT: u16 = 5683;

/// 기본 최대 데이터그램 크기 (바이트)
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 14_000;

/// 프래그먼트 JSON 메타데이터용 예약 공간 (바이트)
pub const DEFAULT_FRAGMENT_OVERHEAD: usize = 200;

/// 기본 최대 콘텐츠 크기 (디코딩 후 바이트)
pub const DEFAULT_MAX_CONTENT_SIZE: usize = 100 * 1024 * 1024; // 100MiB
