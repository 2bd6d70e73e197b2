//! 프래그먼트 정의
//!
//! - Content: base64로 인코딩된 전체 파일 내용
//! - Fragment: 데이터그램 하나에 들어가는 순서 있는 조각

use serde::{Deserialize, Serialize};

use crate::message::{Code, Header, MessageType, Packet};
use crate::{Error, Result};

/// 프래그먼트 메타데이터
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    /// 프래그먼트 인덱스 (0부터)
    pub index: u32,

    /// 전체 프래그먼트 수
    pub total: u32,

    /// 이 조각의 문자 수
    pub size: usize,
}

impl FragmentInfo {
    /// `0 <= index < total` 검증
    pub fn validate(&self) -> Result<()> {
        if self.total == 0 || self.index >= self.total {
            return Err(Error::InvalidFragment {
                index: self.index,
                total: self.total,
            });
        }
        Ok(())
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

/// 프래그먼트 본문 (패킷 페이로드)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentDescriptor {
    /// 대상 경로
    pub path: String,

    /// base64 조각
    pub content: String,

    /// 프래그먼트 정보
    pub fragment: FragmentInfo,
}

impl FragmentDescriptor {
    /// 프래그먼트 패킷 생성
    pub fn to_packet(&self, msg_type: MessageType, code: Code, message_id: u16) -> Result<Packet> {
        Packet::with_body(Header::new(msg_type, code, message_id), self)
    }
}

/// 필요한 프래그먼트 수
pub fn fragments_needed(content_len: usize, max_chunk: usize) -> usize {
    let max_chunk = max_chunk.max(1);
    if content_len <= max_chunk {
        return 1;
    }
    (content_len + max_chunk - 1) / max_chunk
}

/// 한 전송의 최대 프래그먼트 수
///
/// 요청 id 하나와 조각 id들이 u16 공간 안에서 한 바퀴를 넘지 않아야 한다.
pub const MAX_FRAGMENTS: usize = u16::MAX as usize - 1;

/// `len` 바이트를 base64로 인코딩한 문자 수 (패딩 포함)
pub fn encoded_len(len: usize) -> usize {
    (len + 2) / 3 * 4
}

/// base64 문자열의 디코딩 후 바이트 수
pub fn decoded_len(content: &str) -> usize {
    let len = content.len();
    let padding = content.bytes().rev().take(2).filter(|&b| b == b'=').count();
    let tail = match len % 4 {
        2 => 1,
        3 => 2,
        _ => 0,
    };
    (len / 4 * 3 + tail).saturating_sub(padding)
}

/// 프래그먼트 분할기 (송신측)
#[derive(Debug, Clone)]
pub struct Fragmenter {
    max_chunk: usize,
    max_content_size: usize,
}

impl Fragmenter {
    pub fn new(max_chunk: usize, max_content_size: usize) -> Self {
        Self {
            max_chunk: max_chunk.max(1),
            max_content_size,
        }
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// 분할이 필요한지 여부
    pub fn needs_split(&self, content: &str) -> bool {
        content.len() > self.max_chunk
    }

    /// `path`를 싣는 프래그먼트 하나에 들어가는 base64 문자 수
    ///
    /// 경로는 모든 조각의 JSON에 반복되므로 JSON 이스케이프된 길이만큼 뺀다.
    pub fn chunk_size_for(&self, path: &str) -> usize {
        let escaped = serde_json::to_string(path).map_or(path.len() + 2, |s| s.len());
        self.max_chunk.saturating_sub(escaped).max(1)
    }

    /// 분할 시 프래그먼트 수
    ///
    /// 조각 id `base+1..=base+total`이 요청 id와 겹치지 않도록
    /// `MAX_FRAGMENTS`를 넘으면 `TooManyFragments`.
    pub fn fragment_count(&self, content: &str, path: &str) -> Result<usize> {
        let total = fragments_needed(content.len(), self.chunk_size_for(path));
        if total > MAX_FRAGMENTS {
            return Err(Error::TooManyFragments {
                total,
                max: MAX_FRAGMENTS,
            });
        }
        Ok(total)
    }

    /// 받을 수 있는 최대 프래그먼트 수 (`max_content_size` 기준)
    pub fn max_fragments_for(&self, path: &str) -> usize {
        let encoded = encoded_len(self.max_content_size);
        (fragments_needed(encoded, self.chunk_size_for(path)) + 1).min(MAX_FRAGMENTS)
    }

    /// base64 콘텐츠를 프래그먼트들로 분할
    ///
    /// 콘텐츠가 조각 크기 이하이면 `total=1`인 프래그먼트 하나.
    /// 마지막 조각을 제외하면 모두 같은 크기.
    pub fn split(&self, content: &str, path: &str) -> Result<Vec<FragmentDescriptor>> {
        let size = decoded_len(content);
        if size > self.max_content_size {
            return Err(Error::PayloadTooLarge {
                size,
                max: self.max_content_size,
            });
        }

        // base64는 ASCII이므로 바이트 경계 = 문자 경계
        if let Some(pos) = content.bytes().position(|b| !b.is_ascii()) {
            return Err(Error::Base64(base64::DecodeError::InvalidByte(
                pos,
                content.as_bytes()[pos],
            )));
        }

        let total = self.fragment_count(content, path)? as u32;
        let chunk = self.chunk_size_for(path);
        if total == 1 {
            return Ok(vec![FragmentDescriptor {
                path: path.to_string(),
                content: content.to_string(),
                fragment: FragmentInfo {
                    index: 0,
                    total: 1,
                    size: content.len(),
                },
            }]);
        }

        let fragments = content
            .as_bytes()
            .chunks(chunk)
            .enumerate()
            .map(|(idx, piece)| {
                // ASCII 검증을 통과했으므로 항상 유효한 UTF-8
                let piece = String::from_utf8_lossy(piece).into_owned();
                FragmentDescriptor {
                    path: path.to_string(),
                    fragment: FragmentInfo {
                        index: idx as u32,
                        total,
                        size: piece.len(),
                    },
                    content: piece,
                }
            })
            .collect();

        Ok(fragments)
    }
}
