//! 프래그먼트 재조립 저장소
//!
//! - 경로별로 수신된 조각을 모아 전체 콘텐츠로 조립
//! - 상태: EMPTY → ACCUMULATING → COMPLETE (항목 삭제)
//!                              └→ EXPIRED (정리 태스크가 삭제)
//! - 모든 변경은 저장소 전체 락 하나로 직렬화

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Error, Result};

/// 재조립 중인 항목
#[derive(Debug)]
struct Entry {
    /// 인덱스 → 조각
    chunks: HashMap<u32, String>,

    /// 예상 총 프래그먼트 수
    total: u32,

    /// 보관 중인 조각 문자 수 합계
    bytes: usize,

    /// 마지막 활동 시간
    last_activity: Instant,
}

impl Entry {
    fn new(total: u32, now: Instant) -> Self {
        Self {
            chunks: HashMap::new(),
            total,
            bytes: 0,
            last_activity: now,
        }
    }

    /// 인덱스 순서로 이어 붙이기, 누락이 있으면 None
    fn assemble(&self) -> Option<String> {
        let capacity = self.chunks.values().map(String::len).sum();
        let mut content = String::with_capacity(capacity);
        for index in 0..self.total {
            content.push_str(self.chunks.get(&index)?);
        }
        Some(content)
    }
}

/// `add_fragment` 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// 아직 조각이 더 필요함
    Incomplete { received: u32, total: u32 },

    /// 모든 조각 수신, 조립된 콘텐츠
    Complete(String),
}

impl Assembly {
    pub fn is_complete(&self) -> bool {
        matches!(self, Assembly::Complete(_))
    }
}

/// 경로별 진행률
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub received: u32,
    pub total: u32,
    pub percentage: f64,
}

/// 재조립 저장소
#[derive(Debug)]
pub struct ReassemblyStore {
    entries: Mutex<HashMap<String, Entry>>,
    timeout: Duration,
    max_bytes: usize,
    evicted: AtomicU64,
}

impl ReassemblyStore {
    /// 새 저장소 생성
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            max_bytes: usize::MAX,
            evicted: AtomicU64::new(0),
        }
    }

    /// 항목 하나가 보관할 수 있는 최대 조각 문자 수
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// 현재 시간으로 조각 추가
    pub fn add_fragment(&self, path: &str, index: u32, total: u32, chunk: String) -> Result<Assembly> {
        self.add_fragment_at(path, index, total, chunk, Instant::now())
    }

    /// 지정한 시간으로 조각 추가
    ///
    /// 같은 인덱스가 다시 오면 덮어쓴다. 기존 항목과 `total`이 다르면 새 전송으로
    /// 보고 항목을 새로 시작한다. 보관 문자 수가 `max_bytes`를 넘으면 항목을
    /// 버리고 `PayloadTooLarge`.
    pub fn add_fragment_at(
        &self,
        path: &str,
        index: u32,
        total: u32,
        chunk: String,
        now: Instant,
    ) -> Result<Assembly> {
        if total == 0 || index >= total {
            return Err(Error::InvalidFragment { index, total });
        }

        let mut entries = self.entries.lock();

        let entry = entries
            .entry(path.to_string())
            .or_insert_with(|| Entry::new(total, now));

        if entry.total != total {
            debug!(
                "재조립 재시작: path={}, total {} -> {}",
                path, entry.total, total
            );
            *entry = Entry::new(total, now);
        }

        let replaced = entry.chunks.get(&index).map_or(0, String::len);
        let bytes = entry.bytes - replaced + chunk.len();
        if bytes > self.max_bytes {
            entries.remove(path);
            warn!(
                "재조립 크기 초과: path={}, {} > {} chars",
                path, bytes, self.max_bytes
            );
            return Err(Error::PayloadTooLarge {
                size: bytes,
                max: self.max_bytes,
            });
        }

        entry.bytes = bytes;
        entry.last_activity = now;
        entry.chunks.insert(index, chunk);

        let received = entry.chunks.len() as u32;
        let total = entry.total;
        if received < total {
            return Ok(Assembly::Incomplete { received, total });
        }

        let assembled = entry.assemble();
        match assembled {
            Some(content) => {
                entries.remove(path);
                Ok(Assembly::Complete(content))
            }
            None => Ok(Assembly::Incomplete { received, total }),
        }
    }

    /// 경로별 진행률
    pub fn progress(&self, path: &str) -> Option<Progress> {
        let entries = self.entries.lock();
        entries.get(path).map(|entry| {
            let received = entry.chunks.len() as u32;
            let percentage = if entry.total > 0 {
                (received as f64 / entry.total as f64 * 10_000.0).round() / 100.0
            } else {
                0.0
            };
            Progress {
                received,
                total: entry.total,
                percentage,
            }
        })
    }

    /// 진행 중인 경로 목록
    pub fn active_paths(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// 경로 항목 제거
    pub fn clear_path(&self, path: &str) -> bool {
        self.entries.lock().remove(path).is_some()
    }

    /// 전체 제거
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// 지금까지 만료로 제거된 항목 수
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// 만료 항목 제거
    pub fn purge_expired(&self) -> Vec<String> {
        self.purge_expired_at(Instant::now())
    }

    /// 지정한 시간 기준으로 만료 항목 제거, 제거된 경로 반환
    pub fn purge_expired_at(&self, now: Instant) -> Vec<String> {
        let mut evicted = Vec::new();
        self.entries.lock().retain(|path, entry| {
            if now.saturating_duration_since(entry.last_activity) > self.timeout {
                warn!(
                    "재조립 타임아웃: path={}, {}/{} 수신",
                    path,
                    entry.chunks.len(),
                    entry.total
                );
                evicted.push(path.clone());
                false
            } else {
                true
            }
        });

        self.evicted.fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted
    }

    /// 주기적 정리 태스크 시작
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 첫 tick은 즉시 완료됨
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = store.purge_expired();
                if !evicted.is_empty() {
                    debug!("만료 항목 {}개 정리", evicted.len());
                }
            }
        })
    }
}
