//! 에러 타입 정의

use thiserror::Error;

/// coapfs 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 디코딩 에러: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("헤더 손상: {len} bytes (최소 4 bytes 필요)")]
    MalformedHeader { len: usize },

    #[error("페이로드 크기 초과: {size} bytes (최대 {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("재전송 한도 초과: message_id={message_id}, attempts={attempts}")]
    RetransmitExhausted { message_id: u16, attempts: u32 },

    #[error("유효하지 않은 프래그먼트: index={index}, total={total}")]
    InvalidFragment { index: u32, total: u32 },

    #[error("프래그먼트 수 초과: {total} (최대 {max})")]
    TooManyFragments { total: usize, max: usize },

    #[error("원격 에러 응답: code={code}, {message}")]
    Remote { code: u8, message: String },

    #[error("채널 에러")]
    ChannelError,

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("응답 대기 타임아웃")]
    Timeout,

    #[error("알 수 없는 에러: {0}")]
    Unknown(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
