//! 서버 통계

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 파이프라인 카운터 (모든 태스크에서 공유)
#[derive(Debug)]
pub struct ServerStats {
    start_time: Instant,

    /// 워커로 넘긴 요청 수
    pub requests_dispatched: AtomicU64,

    /// 큐가 가득 차서 버린 요청 수
    pub requests_dropped: AtomicU64,

    /// 헤더 손상으로 버린 패킷 수
    pub malformed_packets: AtomicU64,

    /// 대기자에게 전달된 ACK 수
    pub acks_routed: AtomicU64,

    /// 대기자가 없어 버린 ACK 수
    pub acks_dropped: AtomicU64,

    /// 소켓으로 송신한 패킷 수
    pub packets_sent: AtomicU64,

    /// 송신한 프래그먼트 수 (재전송 제외)
    pub fragments_sent: AtomicU64,

    /// 프래그먼트 재전송 수
    pub retransmissions: AtomicU64,

    /// 재전송 한도 초과로 실패한 전송 수
    pub transfers_failed: AtomicU64,

    /// 완료된 프래그먼트 전송 수
    pub transfers_completed: AtomicU64,

    /// 핸들러 실패 수
    pub handler_failures: AtomicU64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests_dispatched: AtomicU64::new(0),
            requests_dropped: AtomicU64::new(0),
            malformed_packets: AtomicU64::new(0),
            acks_routed: AtomicU64::new(0),
            acks_dropped: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            fragments_sent: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            transfers_completed: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// 카운터 1 증가
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 현재 값 스냅샷
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            elapsed: self.elapsed(),
            requests_dispatched: load(&self.requests_dispatched),
            requests_dropped: load(&self.requests_dropped),
            malformed_packets: load(&self.malformed_packets),
            acks_routed: load(&self.acks_routed),
            acks_dropped: load(&self.acks_dropped),
            packets_sent: load(&self.packets_sent),
            fragments_sent: load(&self.fragments_sent),
            retransmissions: load(&self.retransmissions),
            transfers_failed: load(&self.transfers_failed),
            transfers_completed: load(&self.transfers_completed),
            handler_failures: load(&self.handler_failures),
            reassembly_evicted: 0,
        }
    }
}

/// 통계 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub requests_dispatched: u64,
    pub requests_dropped: u64,
    pub malformed_packets: u64,
    pub acks_routed: u64,
    pub acks_dropped: u64,
    pub packets_sent: u64,
    pub fragments_sent: u64,
    pub retransmissions: u64,
    pub transfers_failed: u64,
    pub transfers_completed: u64,
    pub handler_failures: u64,

    /// 만료로 정리된 재조립 항목 수 (재조립 저장소에서 채움)
    pub reassembly_evicted: u64,
}

impl StatsSnapshot {
    /// 재전송 비율 (재전송 / 프래그먼트)
    pub fn retransmit_ratio(&self) -> f64 {
        if self.fragments_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.fragments_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Requests: {} (dropped {}) | Malformed: {} | ACKs: {} routed / {} dropped | Sent: {} | Fragments: {} (retx {:.1}%) | Transfers: {} ok / {} failed | Evicted: {}",
            self.elapsed.as_secs_f64(),
            self.requests_dispatched,
            self.requests_dropped,
            self.malformed_packets,
            self.acks_routed,
            self.acks_dropped,
            self.packets_sent,
            self.fragments_sent,
            self.retransmit_ratio() * 100.0,
            self.transfers_completed,
            self.transfers_failed,
            self.reassembly_evicted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = ServerStats::new();
        ServerStats::incr(&stats.fragments_sent);
        ServerStats::incr(&stats.fragments_sent);
        ServerStats::incr(&stats.retransmissions);

        let snap = stats.snapshot();
        assert_eq!(snap.fragments_sent, 2);
        assert_eq!(snap.retransmissions, 1);
        assert_eq!(snap.retransmit_ratio(), 0.5);
        assert!(snap.summary().contains("Fragments: 2"));
    }
}
