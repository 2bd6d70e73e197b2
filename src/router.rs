//! 요청 라우터
//!
//! 요청 코드별로 핸들러를 고르고, 핸들러는 파일시스템 작업 하나를 수행한 뒤
//! 응답 값을 돌려준다. 소켓은 직접 건드리지 않는다.
//!
//! 프로토콜 수준 실패(필드 누락, 잘못된 경로, 없는 파일)와 파일시스템 실패는
//! 모두 에러 코드를 가진 `Response`로 표현된다.

use std::path::Path;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::fragment::{decoded_len, FragmentInfo};
use crate::message::{Code, ErrorBody, Packet};
use crate::reassembly::Assembly;
use crate::server::ServerContext;
use crate::storage::EntryKind;
use crate::{Error, Result};

/// 핸들러 응답
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: Code,
    pub body: Value,
}

impl Response {
    pub fn new(code: Code, body: Value) -> Self {
        Self { code, body }
    }

    pub fn error(code: Code, message: impl Into<String>) -> Self {
        let body = serde_json::to_value(ErrorBody::new(message)).unwrap_or(Value::Null);
        Self { code, body }
    }
}

/// 라우팅 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 단일 응답
    Reply(Response),

    /// 안내 응답 후 프래그먼트 전송
    Fragmented {
        announce: Response,
        path: String,
        content: String,
    },
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Outcome::Reply(response)
    }
}

/// 최근 완료된 프래그먼트 업로드
///
/// 마지막 조각의 ACK가 유실되면 클라이언트는 같은 message_id로 그 조각을
/// 다시 보낸다. 이미 조립이 끝난 경로이므로 원래 응답을 그대로 돌려준다.
#[derive(Debug)]
pub struct CompletedUploads {
    entries: DashMap<(String, u16), (Response, Instant)>,
    ttl: Duration,
}

impl CompletedUploads {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, path: &str, message_id: u16) -> Option<Response> {
        self.get_at(path, message_id, Instant::now())
    }

    pub fn get_at(&self, path: &str, message_id: u16, now: Instant) -> Option<Response> {
        let entry = self.entries.get(&(path.to_string(), message_id))?;
        let (response, completed_at) = entry.value();
        if now.saturating_duration_since(*completed_at) > self.ttl {
            return None;
        }
        Some(response.clone())
    }

    pub fn record(&self, path: &str, message_id: u16, response: Response) {
        self.record_at(path, message_id, response, Instant::now());
    }

    /// 기록 추가, 만료된 기록은 이때 정리
    pub fn record_at(&self, path: &str, message_id: u16, response: Response, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (_, completed_at)| now.saturating_duration_since(*completed_at) <= ttl);
        self.entries
            .insert((path.to_string(), message_id), (response, now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 업로드 요청 본문
#[derive(Debug, Deserialize)]
struct UploadBody {
    path: Option<String>,
    content: Option<String>,
    fragment: Option<FragmentInfo>,
}

/// 경로 하나짜리 요청 본문 (다운로드/목록/삭제)
#[derive(Debug, Deserialize)]
struct PathBody {
    path: Option<String>,
}

/// 이동 요청 본문
#[derive(Debug, Deserialize)]
struct MoveBody {
    source: Option<String>,
    destination: Option<String>,
}

fn payload_required() -> Outcome {
    Response::error(Code::BAD_REQUEST, "Payload required").into()
}

fn missing_fields() -> Outcome {
    Response::error(Code::UNPROCESSABLE, "Missing fields").into()
}

fn invalid_path() -> Outcome {
    Response::error(Code::NOT_FOUND, "Invalid path").into()
}

fn server_error(e: Error) -> Outcome {
    Response::error(Code::SERVER_ERROR, e.to_string()).into()
}

/// 본문 파싱: 페이로드 없음 → Bad Request, 형식 불일치 → Unprocessable
fn parse_body<T: serde::de::DeserializeOwned>(packet: &Packet) -> std::result::Result<T, Outcome> {
    let payload = packet.payload.as_ref().ok_or_else(payload_required)?;
    payload.body().map_err(|_| missing_fields())
}

/// 코드별 핸들러 호출
pub async fn route(ctx: &ServerContext, packet: &Packet) -> Result<Outcome> {
    let outcome = match packet.header.code {
        Code::GET => {
            let body: PathBody = match parse_body(packet) {
                Ok(body) => body,
                Err(outcome) => return Ok(outcome),
            };
            match body.path {
                Some(path) if is_directory_request(ctx, &path) => list_directory(ctx, &path).await,
                Some(path) if !path.is_empty() => download(ctx, &path).await,
                _ => missing_fields(),
            }
        }
        Code::POST => match parse_body::<UploadBody>(packet) {
            Ok(body) => upload(ctx, packet.header.message_id, body).await,
            Err(outcome) => outcome,
        },
        Code::DELETE => match parse_body::<PathBody>(packet) {
            Ok(PathBody { path: Some(path) }) if !path.is_empty() => delete(ctx, &path).await,
            Ok(_) => missing_fields(),
            Err(outcome) => outcome,
        },
        Code::MOVE => match parse_body::<MoveBody>(packet) {
            Ok(MoveBody {
                source: Some(source),
                destination: Some(destination),
            }) if !source.is_empty() && !destination.is_empty() => {
                relocate(ctx, &source, &destination).await
            }
            Ok(_) => missing_fields(),
            Err(outcome) => outcome,
        },
        other => {
            warn!("알 수 없는 요청 코드: {}", other);
            Response::error(Code::BAD_REQUEST, format!("Unknown code: {}", other.0)).into()
        }
    };

    Ok(outcome)
}

fn is_directory_request(ctx: &ServerContext, path: &str) -> bool {
    path.ends_with('/') || path == ctx.storage.namespace()
}

fn file_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// 업로드 (프래그먼트 지원)
async fn upload(ctx: &ServerContext, message_id: u16, body: UploadBody) -> Outcome {
    let (Some(path), Some(content)) = (body.path, body.content) else {
        return missing_fields();
    };
    if path.is_empty() {
        return missing_fields();
    }

    let Some(resolved) = ctx.storage.resolve(&path) else {
        return invalid_path();
    };

    let fragmented = body.fragment.is_some();
    let content = match body.fragment {
        None => content,
        Some(fragment) => {
            if fragment.validate().is_err() {
                return Response::error(Code::UNPROCESSABLE, "Invalid fragment").into();
            }

            if let Some(response) = ctx.completed.get(&path, message_id) {
                debug!(
                    "완료된 업로드 조각 재수신: path={}, message_id={}",
                    path, message_id
                );
                return response.into();
            }

            let max_total = ctx.transmitter.fragmenter().max_fragments_for(&path);
            if fragment.total as usize > max_total {
                let e = Error::TooManyFragments {
                    total: fragment.total as usize,
                    max: max_total,
                };
                warn!("업로드 거부: {}: {}", path, e);
                return Response::error(Code::UNPROCESSABLE, e.to_string()).into();
            }

            match ctx
                .reassembly
                .add_fragment(&path, fragment.index, fragment.total, content)
            {
                Ok(Assembly::Complete(content)) => {
                    info!("조립 완료: path={}, {} fragments", path, fragment.total);
                    content
                }
                Ok(Assembly::Incomplete { received, total }) => {
                    debug!(
                        "Fragment {}/{} received for {} ({} stored)",
                        fragment.index + 1,
                        total,
                        path,
                        received
                    );
                    return Response::new(
                        Code::CHANGED,
                        json!({
                            "status": "fragment_received",
                            "path": path,
                            "index": fragment.index,
                            "total": total,
                            "received": received,
                        }),
                    )
                    .into();
                }
                Err(e) => return Response::error(Code::UNPROCESSABLE, e.to_string()).into(),
            }
        }
    };

    let size = decoded_len(&content);
    if size > ctx.config.max_content_size {
        let e = Error::PayloadTooLarge {
            size,
            max: ctx.config.max_content_size,
        };
        return Response::error(Code::UNPROCESSABLE, e.to_string()).into();
    }

    let bytes = match STANDARD.decode(content.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Response::error(Code::UNPROCESSABLE, format!("Invalid content: {}", e)).into()
        }
    };

    match ctx.storage.write_file(&resolved, &bytes).await {
        Ok(size) => {
            info!("파일 생성: {} ({} bytes)", path, size);
            let response = Response::new(
                Code::CREATED,
                json!({ "status": "created", "path": path, "size": size }),
            );
            if fragmented {
                ctx.completed.record(&path, message_id, response.clone());
            }
            response.into()
        }
        Err(e) => {
            warn!("업로드 실패: {}: {}", path, e);
            server_error(e)
        }
    }
}

/// 파일 다운로드 (크면 프래그먼트)
async fn download(ctx: &ServerContext, path: &str) -> Outcome {
    let Some(resolved) = ctx.storage.resolve(path) else {
        return invalid_path();
    };

    match ctx.storage.kind(&resolved).await {
        None => return Response::error(Code::NOT_FOUND, "File not found").into(),
        Some(EntryKind::Directory) => {
            return Response::error(Code::NOT_FOUND, "Path not found").into()
        }
        Some(EntryKind::File) => {}
    }

    // 읽기 전에 크기부터 확인
    let size = match ctx.storage.file_size(&resolved).await {
        Ok(size) => size,
        Err(e) => return server_error(e),
    };
    if size > ctx.config.max_content_size as u64 {
        let e = Error::PayloadTooLarge {
            size: size as usize,
            max: ctx.config.max_content_size,
        };
        return Response::error(Code::UNPROCESSABLE, e.to_string()).into();
    }

    let bytes = match ctx.storage.read_file(&resolved).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("다운로드 실패: {}: {}", path, e);
            return server_error(e);
        }
    };

    let size = bytes.len();
    let name = file_name(path);
    let content = STANDARD.encode(&bytes);
    let fragmenter = ctx.transmitter.fragmenter();

    if !fragmenter.needs_split(&content) {
        info!("파일 전송: {} ({} bytes)", path, size);
        return Response::new(
            Code::CONTENT,
            json!({ "name": name, "size": size, "content": content }),
        )
        .into();
    }

    let total = match fragmenter.fragment_count(&content, path) {
        Ok(total) => total,
        Err(e) => return Response::error(Code::UNPROCESSABLE, e.to_string()).into(),
    };
    info!("파일 전송 (fragmented): {} ({} bytes, {} fragments)", path, size, total);

    Outcome::Fragmented {
        announce: Response::new(
            Code::CONTENT,
            json!({
                "name": name,
                "size": size,
                "fragmented": true,
                "total_fragments": total,
            }),
        ),
        path: path.to_string(),
        content,
    }
}

/// 디렉터리 목록
async fn list_directory(ctx: &ServerContext, path: &str) -> Outcome {
    let Some(resolved) = ctx.storage.resolve(path) else {
        return invalid_path();
    };

    match ctx.storage.kind(&resolved).await {
        None => return Response::error(Code::NOT_FOUND, "Directory not found").into(),
        Some(EntryKind::File) => {
            return Response::error(Code::NOT_FOUND, "Path is not a directory").into()
        }
        Some(EntryKind::Directory) => {}
    }

    match ctx.storage.list_dir(&resolved).await {
        Ok(items) => {
            debug!("디렉터리 목록: {} ({} items)", path, items.len());
            Response::new(
                Code::CONTENT,
                json!({ "name": file_name(path), "type": "directory", "items": items }),
            )
            .into()
        }
        Err(e) => server_error(e),
    }
}

/// 파일/디렉터리 삭제
async fn delete(ctx: &ServerContext, path: &str) -> Outcome {
    let Some(resolved) = ctx.storage.resolve(path) else {
        return invalid_path();
    };

    if resolved == ctx.storage.namespace_dir() {
        return Response::error(Code::BAD_REQUEST, "Cannot delete storage root").into();
    }

    if ctx.storage.kind(&resolved).await.is_none() {
        return Response::error(Code::NOT_FOUND, "Path not found").into();
    }

    match ctx.storage.remove(&resolved).await {
        Ok(()) => {
            info!("삭제: {}", path);
            Response::new(Code::DELETED, json!({ "status": "deleted", "path": path })).into()
        }
        Err(e) => server_error(e),
    }
}

/// 파일 이동
async fn relocate(ctx: &ServerContext, source: &str, destination: &str) -> Outcome {
    let (Some(from), Some(to)) = (ctx.storage.resolve(source), ctx.storage.resolve(destination))
    else {
        return invalid_path();
    };

    if ctx.storage.kind(&from).await.is_none() {
        return Response::error(Code::NOT_FOUND, "Source not found").into();
    }

    if is_same_or_nested(&from, &to) {
        return Response::error(Code::BAD_REQUEST, "Destination inside source").into();
    }

    match ctx.storage.relocate(&from, &to).await {
        Ok(()) => {
            info!("이동: {} -> {}", source, destination);
            Response::new(
                Code::CHANGED,
                json!({ "status": "moved", "from": source, "to": destination }),
            )
            .into()
        }
        Err(e) => server_error(e),
    }
}

fn is_same_or_nested(from: &Path, to: &Path) -> bool {
    to.starts_with(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Header, MessageType};
    use crate::sender::OutboundQueue;
    use crate::Config;

    fn context(root: &Path, config: Config) -> ServerContext {
        let (outbound, _rx) = OutboundQueue::channel(16);
        ServerContext::new(config.with_storage_root(root), outbound)
    }

    fn request(code: Code, body: Value) -> Packet {
        request_with_id(code, 1, body)
    }

    fn request_with_id(code: Code, message_id: u16, body: Value) -> Packet {
        Packet::with_body(Header::new(MessageType::Confirmable, code, message_id), &body).unwrap()
    }

    fn fragment(path: &str, content: &str, index: u32, total: u32) -> Value {
        json!({
            "path": path,
            "content": content,
            "fragment": { "index": index, "total": total, "size": content.len() },
        })
    }

    fn reply(outcome: Outcome) -> Response {
        match outcome {
            Outcome::Reply(response) => response,
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Config::default());
        ctx.storage.ensure_namespace().await.unwrap();

        let packet = request(
            Code::POST,
            json!({ "path": "storage/a.txt", "content": STANDARD.encode("hi") }),
        );
        let response = reply(route(&ctx, &packet).await.unwrap());

        assert_eq!(response.code, Code::CREATED);
        assert_eq!(
            response.body,
            json!({ "status": "created", "path": "storage/a.txt", "size": 2 })
        );
        assert_eq!(std::fs::read(dir.path().join("storage/a.txt")).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_path_outside_namespace_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Config::default());

        let packet = request(Code::GET, json!({ "path": "/etc/passwd" }));
        let response = reply(route(&ctx, &packet).await.unwrap());
        assert_eq!(response.code, Code::NOT_FOUND);
        assert_eq!(response.body["status"], "error");

        let packet = request(
            Code::POST,
            json!({ "path": "../outside.txt", "content": "aGk=" }),
        );
        let response = reply(route(&ctx, &packet).await.unwrap());
        assert_eq!(response.code, Code::NOT_FOUND);
        assert!(!dir.path().join("../outside.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_payload_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Config::default());

        let bare = Packet::new(Header::new(MessageType::Confirmable, Code::POST, 1), None);
        assert_eq!(reply(route(&ctx, &bare).await.unwrap()).code, Code::BAD_REQUEST);

        let packet = request(Code::POST, json!({ "path": "storage/a.txt" }));
        assert_eq!(reply(route(&ctx, &packet).await.unwrap()).code, Code::UNPROCESSABLE);

        let packet = request(Code::MOVE, json!({ "source": "storage/a.txt" }));
        assert_eq!(reply(route(&ctx, &packet).await.unwrap()).code, Code::UNPROCESSABLE);

        let packet = request(Code(9), json!({}));
        assert_eq!(reply(route(&ctx, &packet).await.unwrap()).code, Code::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_fragmented_upload_acks_each_piece() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Config::default());
        let content = STANDARD.encode("hello fragmented world");
        let pieces: Vec<&str> = vec![&content[..10], &content[10..20], &content[20..]];

        for (i, piece) in pieces.iter().enumerate().rev() {
            let packet = request(
                Code::POST,
                json!({
                    "path": "storage/f.txt",
                    "content": piece,
                    "fragment": { "index": i, "total": 3, "size": piece.len() },
                }),
            );
            let response = reply(route(&ctx, &packet).await.unwrap());
            if i > 0 {
                assert_eq!(response.code, Code::CHANGED);
                assert_eq!(response.body["status"], "fragment_received");
                assert_eq!(response.body["received"], 3 - i as u64);
            } else {
                assert_eq!(response.code, Code::CREATED);
                assert_eq!(response.body["size"], 22);
            }
        }

        assert!(ctx.reassembly.is_empty());
        assert_eq!(
            std::fs::read(dir.path().join("storage/f.txt")).unwrap(),
            b"hello fragmented world"
        );
    }

    #[tokio::test]
    async fn test_invalid_fragment_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Config::default());

        let packet = request(
            Code::POST,
            json!({
                "path": "storage/f.txt",
                "content": "QQ==",
                "fragment": { "index": 3, "total": 3, "size": 4 },
            }),
        );
        assert_eq!(reply(route(&ctx, &packet).await.unwrap()).code, Code::UNPROCESSABLE);
        assert!(ctx.reassembly.is_empty());
    }

    #[tokio::test]
    async fn test_fragment_total_beyond_cap_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            max_content_size: 16,
            ..Config::default()
        };
        let ctx = context(dir.path(), config);
        let chunk = "A".repeat(4000);

        for index in 0..5 {
            let packet = request_with_id(
                Code::POST,
                index as u16 + 1,
                fragment("storage/f.bin", &chunk, index, 4_000_000_000),
            );
            let response = reply(route(&ctx, &packet).await.unwrap());
            assert_eq!(response.code, Code::UNPROCESSABLE);
        }
        assert!(ctx.reassembly.is_empty());
    }

    #[tokio::test]
    async fn test_reassembly_stops_at_content_cap() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            max_content_size: 16,
            ..Config::default()
        };
        let ctx = context(dir.path(), config);

        // total은 허용 범위지만 조각 하나가 이미 상한(base64 24자)을 넘음
        let packet = request_with_id(
            Code::POST,
            1,
            fragment("storage/f.bin", &"A".repeat(4000), 0, 2),
        );
        let response = reply(route(&ctx, &packet).await.unwrap());
        assert_eq!(response.code, Code::UNPROCESSABLE);
        assert!(ctx.reassembly.is_empty());
        assert!(!dir.path().join("storage/f.bin").exists());
    }

    #[tokio::test]
    async fn test_retransmitted_final_fragment_answers_created() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Config::default());

        let first = request_with_id(Code::POST, 10, fragment("storage/r.txt", "aGVs", 0, 2));
        assert_eq!(reply(route(&ctx, &first).await.unwrap()).code, Code::CHANGED);

        let last = request_with_id(Code::POST, 11, fragment("storage/r.txt", "bG8=", 1, 2));
        let created = reply(route(&ctx, &last).await.unwrap());
        assert_eq!(created.code, Code::CREATED);
        assert_eq!(created.body["size"], 5);

        // ACK 유실로 같은 조각이 같은 id로 다시 옴
        let again = reply(route(&ctx, &last).await.unwrap());
        assert_eq!(again, created);
        assert!(ctx.reassembly.is_empty());
        assert_eq!(std::fs::read(dir.path().join("storage/r.txt")).unwrap(), b"hello");

        // 같은 경로의 새 업로드는 새 id로 정상 진행
        let next = request_with_id(Code::POST, 20, fragment("storage/r.txt", "aGVs", 0, 2));
        assert_eq!(reply(route(&ctx, &next).await.unwrap()).code, Code::CHANGED);
        assert_eq!(ctx.reassembly.len(), 1);
    }

    #[test]
    fn test_completed_uploads_expire() {
        let completed = CompletedUploads::new(Duration::from_secs(60));
        let start = Instant::now();
        let response = Response::new(Code::CREATED, json!({ "status": "created" }));

        completed.record_at("storage/a", 1, response.clone(), start);
        assert_eq!(completed.get_at("storage/a", 1, start), Some(response.clone()));
        assert!(completed.get_at("storage/a", 2, start).is_none());
        assert!(completed
            .get_at("storage/a", 1, start + Duration::from_secs(61))
            .is_none());

        // 새 기록 시 만료된 기록 정리
        completed.record_at("storage/b", 1, response, start + Duration::from_secs(61));
        assert_eq!(completed.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_file_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            max_content_size: 10,
            ..Config::default()
        };
        let ctx = context(dir.path(), config);
        ctx.storage.ensure_namespace().await.unwrap();
        std::fs::write(dir.path().join("storage/big.bin"), vec![0u8; 11]).unwrap();

        let packet = request(Code::GET, json!({ "path": "storage/big.bin" }));
        let response = reply(route(&ctx, &packet).await.unwrap());
        assert_eq!(response.code, Code::UNPROCESSABLE);
    }

    #[tokio::test]
    async fn test_large_download_is_fragmented() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            max_datagram_size: 4 + 1 + 200 + 100,
            ..Config::default()
        };
        let ctx = context(dir.path(), config);
        ctx.storage.ensure_namespace().await.unwrap();
        std::fs::write(dir.path().join("storage/big.bin"), vec![7u8; 300]).unwrap();

        let packet = request(Code::GET, json!({ "path": "storage/big.bin" }));
        match route(&ctx, &packet).await.unwrap() {
            Outcome::Fragmented {
                announce,
                path,
                content,
            } => {
                assert_eq!(announce.code, Code::CONTENT);
                assert_eq!(announce.body["fragmented"], true);
                // 조각당 100 - 17("storage/big.bin" JSON) = 83자, 400자 / 83
                assert_eq!(announce.body["total_fragments"], 5);
                assert_eq!(announce.body["size"], 300);
                assert_eq!(path, "storage/big.bin");
                assert_eq!(STANDARD.decode(content).unwrap(), vec![7u8; 300]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listing_delete_and_move() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Config::default());
        ctx.storage.ensure_namespace().await.unwrap();
        std::fs::create_dir_all(dir.path().join("storage/docs")).unwrap();
        std::fs::write(dir.path().join("storage/a.txt"), b"a").unwrap();

        let listing = reply(route(&ctx, &request(Code::GET, json!({ "path": "storage/" }))).await.unwrap());
        assert_eq!(listing.code, Code::CONTENT);
        assert_eq!(
            listing.body,
            json!({ "name": "storage", "type": "directory", "items": ["a.txt", "docs/"] })
        );

        let moved = reply(
            route(
                &ctx,
                &request(
                    Code::MOVE,
                    json!({ "source": "storage/a.txt", "destination": "storage/docs/b.txt" }),
                ),
            )
            .await
            .unwrap(),
        );
        assert_eq!(moved.code, Code::CHANGED);
        assert!(dir.path().join("storage/docs/b.txt").exists());

        let deleted = reply(route(&ctx, &request(Code::DELETE, json!({ "path": "storage/docs" }))).await.unwrap());
        assert_eq!(deleted.code, Code::DELETED);
        assert!(!dir.path().join("storage/docs").exists());

        let missing = reply(route(&ctx, &request(Code::DELETE, json!({ "path": "storage/docs" }))).await.unwrap());
        assert_eq!(missing.code, Code::NOT_FOUND);

        let root = reply(route(&ctx, &request(Code::DELETE, json!({ "path": "storage/" }))).await.unwrap());
        assert_eq!(root.code, Code::BAD_REQUEST);
    }
}
