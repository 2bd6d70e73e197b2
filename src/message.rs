//! 패킷 코덱
//!
//! 와이어 포맷:
//! ```text
//! byte0    : version(2b) | type(2b) | token_length(4b)
//! byte1    : code
//! byte2..4 : message_id (big-endian u16)
//! byte4    : 0xFF 마커 (페이로드가 있을 때만)
//! byte5..  : UTF-8 JSON 페이로드
//! ```

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, HEADER_SIZE, PAYLOAD_MARKER, PROTOCOL_VERSION};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// 확인 필요 요청 (CON)
    Confirmable = 0,

    /// 확인 불필요 요청 (NON)
    NonConfirmable = 1,

    /// 확인 응답 (ACK)
    Acknowledgement = 2,

    /// 리셋 (RST)
    Reset = 3,
}

impl MessageType {
    /// 2비트 값에서 변환 (상위 비트는 무시)
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

/// 요청/응답 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0);

    // 요청
    pub const GET: Code = Code(1);
    pub const POST: Code = Code(2);
    pub const DELETE: Code = Code(4);
    pub const MOVE: Code = Code(5);

    // 성공 응답
    pub const CREATED: Code = Code(65); // 2.01
    pub const DELETED: Code = Code(66); // 2.02
    pub const CHANGED: Code = Code(68); // 2.04
    pub const CONTENT: Code = Code(69); // 2.05

    // 에러 응답
    pub const BAD_REQUEST: Code = Code(128); // 4.00
    pub const NOT_FOUND: Code = Code(132); // 4.04
    pub const UNPROCESSABLE: Code = Code(150); // 4.22
    pub const SERVER_ERROR: Code = Code(160); // 5.00

    pub fn is_request(self) -> bool {
        (1..32).contains(&self.0)
    }

    pub fn is_success(self) -> bool {
        (64..128).contains(&self.0)
    }

    pub fn is_error(self) -> bool {
        self.0 >= 128
    }

    pub fn name(self) -> &'static str {
        match self {
            Code::EMPTY => "Empty",
            Code::GET => "GET",
            Code::POST => "POST",
            Code::DELETE => "DELETE",
            Code::MOVE => "MOVE",
            Code::CREATED => "Created",
            Code::DELETED => "Deleted",
            Code::CHANGED => "Changed",
            Code::CONTENT => "Content",
            Code::BAD_REQUEST => "Bad Request",
            Code::NOT_FOUND => "Not Found",
            Code::UNPROCESSABLE => "Unprocessable",
            Code::SERVER_ERROR => "Server Error",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl From<u8> for Code {
    fn from(value: u8) -> Self {
        Code(value)
    }
}

/// 4바이트 고정 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// 프로토콜 버전 (2비트)
    pub version: u8,

    /// 메시지 타입
    pub msg_type: MessageType,

    /// 토큰 길이 (4비트, 파싱만 함)
    pub token_length: u8,

    /// 요청/응답 코드
    pub code: Code,

    /// 메시지 ID (요청-응답/프래그먼트-ACK 상관관계)
    pub message_id: u16,
}

impl Header {
    pub fn new(msg_type: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type,
            token_length: 0,
            code,
            message_id,
        }
    }

    /// ACK 헤더 생성
    pub fn ack(code: Code, message_id: u16) -> Self {
        Self::new(MessageType::Acknowledgement, code, message_id)
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let first = ((self.version & 0x03) << 6)
            | ((self.msg_type as u8) << 4)
            | (self.token_length & 0x0F);
        let id = self.message_id.to_be_bytes();
        [first, self.code.0, id[0], id[1]]
    }

    /// 바이트에서 역직렬화 (앞 4바이트만 사용)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MalformedHeader { len: bytes.len() });
        }

        let first = bytes[0];
        Ok(Self {
            version: (first >> 6) & 0x03,
            msg_type: MessageType::from_bits(first >> 4),
            token_length: first & 0x0F,
            code: Code(bytes[1]),
            message_id: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }

    pub fn is_acknowledgement(&self) -> bool {
        self.msg_type == MessageType::Acknowledgement
    }

    pub fn is_confirmable(&self) -> bool {
        self.msg_type == MessageType::Confirmable
    }
}

/// JSON 페이로드 (원본 바이트 + 파싱된 값)
///
/// 원본 바이트를 보존하므로 재인코딩 시 바이트 단위로 동일하다.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    raw: Bytes,
    value: Value,
}

impl Payload {
    /// 직렬화 가능한 값에서 생성
    pub fn from_serialize<T: Serialize>(body: &T) -> Result<Self> {
        let raw = serde_json::to_vec(body)?;
        let value = serde_json::from_slice(&raw)?;
        Ok(Self {
            raw: Bytes::from(raw),
            value,
        })
    }

    /// JSON 값에서 생성
    pub fn from_value(value: Value) -> Self {
        // Value 직렬화는 실패하지 않음
        let raw = serde_json::to_vec(&value).unwrap_or_default();
        Self {
            raw: Bytes::from(raw),
            value,
        }
    }

    /// 원본 바이트 파싱
    pub fn parse(raw: Bytes) -> Result<Self> {
        let value = serde_json::from_slice(&raw)?;
        Ok(Self { raw, value })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// 타입 지정 본문으로 변환
    pub fn body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// 페이로드 디코딩 경고 (치명적이지 않음)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecodeWarning {
    pub reason: String,
}

impl fmt::Display for PayloadDecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "페이로드 디코딩 실패: {}", self.reason)
    }
}

/// 디코딩 결과
#[derive(Debug, Clone)]
pub struct Decoded {
    pub packet: Packet,
    pub warning: Option<PayloadDecodeWarning>,
}

/// 헤더 + 선택적 페이로드
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub payload: Option<Payload>,
}

impl Packet {
    pub fn new(header: Header, payload: Option<Payload>) -> Self {
        Self { header, payload }
    }

    /// 본문 포함 패킷 생성
    pub fn with_body<T: Serialize>(header: Header, body: &T) -> Result<Self> {
        Ok(Self::new(header, Some(Payload::from_serialize(body)?)))
    }

    /// 빈 ACK 패킷 생성
    pub fn empty_ack(message_id: u16) -> Self {
        Self::new(Header::ack(Code::EMPTY, message_id), None)
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.as_ref().map_or(0, |p| p.raw.len() + 1);
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);
        buf.extend_from_slice(&self.header.to_bytes());
        if let Some(payload) = &self.payload {
            buf.push(PAYLOAD_MARKER);
            buf.extend_from_slice(&payload.raw);
        }
        buf
    }

    /// 바이트에서 역직렬화
    ///
    /// 헤더가 4바이트 미만이면 `MalformedHeader`. 페이로드 JSON이 깨졌으면
    /// 빈 페이로드와 경고를 돌려준다.
    pub fn decode(bytes: &[u8]) -> Result<Decoded> {
        let header = Header::from_bytes(bytes)?;
        let rest = &bytes[HEADER_SIZE..];

        // 헤더 뒤 첫 마커 이후가 페이로드, 마커가 없으면 페이로드 없음
        let segment = match rest.iter().position(|&b| b == PAYLOAD_MARKER) {
            Some(pos) => &rest[pos + 1..],
            None => &[][..],
        };

        if segment.is_empty() {
            return Ok(Decoded {
                packet: Packet::new(header, None),
                warning: None,
            });
        }

        let (payload, warning) = match std::str::from_utf8(segment) {
            Err(e) => (
                None,
                Some(PayloadDecodeWarning {
                    reason: format!("UTF-8 아님: {}", e),
                }),
            ),
            Ok(_) => match Payload::parse(Bytes::copy_from_slice(segment)) {
                Ok(payload) => (Some(payload), None),
                Err(e) => (
                    None,
                    Some(PayloadDecodeWarning {
                        reason: e.to_string(),
                    }),
                ),
            },
        };

        Ok(Decoded {
            packet: Packet::new(header, payload),
            warning,
        })
    }

    /// 페이로드를 타입 지정 본문으로 변환
    pub fn body<T: DeserializeOwned>(&self) -> Option<T> {
        self.payload.as_ref().and_then(|p| p.body().ok())
    }

    /// JSON 값 참조
    pub fn json(&self) -> Option<&Value> {
        self.payload.as_ref().map(Payload::value)
    }
}

/// 수신 데이터그램 (헤더만 파싱된 상태)
///
/// 수신 루프는 헤더까지만 보고, 페이로드 디코딩은 받는 쪽에서 한다.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub peer: SocketAddr,
    pub header: Header,
    pub bytes: Bytes,
}

impl Datagram {
    /// 원본 바이트에서 생성 (헤더 손상 시 에러)
    pub fn parse(peer: SocketAddr, bytes: Bytes) -> Result<Self> {
        let header = Header::from_bytes(&bytes)?;
        Ok(Self {
            peer,
            header,
            bytes,
        })
    }

    /// 패킷에서 생성
    pub fn from_packet(peer: SocketAddr, packet: &Packet) -> Self {
        Self {
            peer,
            header: packet.header,
            bytes: Bytes::from(packet.encode()),
        }
    }

    /// 전체 디코딩
    pub fn decode(&self) -> Result<Decoded> {
        Packet::decode(&self.bytes)
    }
}

/// 에러 응답 본문
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}
