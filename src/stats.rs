//! 전송 통계

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 다운로드 하나의 통계 (클라이언트)
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 서버가 알려준 파일 크기
    pub file_size: u64,

    /// 받은 바이트
    pub bytes_received: u64,

    /// 받은 청크 수
    pub chunks_received: u64,

    /// 재전송 횟수 (핸드쉐이크, GET, CLOSE 모두 포함)
    pub retransmits: u64,
}

impl TransferStats {
    pub fn new(file_size: u64) -> Self {
        Self {
            start_time: Instant::now(),
            file_size,
            bytes_received: 0,
            chunks_received: 0,
            retransmits: 0,
        }
    }

    /// 청크 수신 기록
    pub fn record_chunk(&mut self, len: usize) {
        self.chunks_received += 1;
        self.bytes_received += len as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / elapsed
    }

    /// 진행률 (0.0 ~ 1.0), 빈 파일은 1.0
    pub fn progress(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        self.bytes_received as f64 / self.file_size as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {}/{} | Chunks: {} | Retransmits: {} | Throughput: {:.2} MB/s",
            self.elapsed().as_secs_f64(),
            self.bytes_received,
            self.file_size,
            self.chunks_received,
            self.retransmits,
            self.throughput() / 1_000_000.0,
        )
    }
}

/// 서버 카운터
///
/// 리스너와 세션 태스크가 `Arc`로 공유. 카운터만 있고 프로토콜 판단에는 쓰지 않음
#[derive(Debug, Default)]
pub struct ServerStats {
    pub control_requests: AtomicU64,
    pub malformed_dropped: AtomicU64,
    pub not_found: AtomicU64,
    pub no_port: AtomicU64,
    pub sessions_started: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub sessions_expired: AtomicU64,
    pub chunks_served: AtomicU64,
    pub bytes_served: AtomicU64,
}

/// `ServerStats` 시점 복사본
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub control_requests: u64,
    pub malformed_dropped: u64,
    pub not_found: u64,
    pub no_port: u64,
    pub sessions_started: u64,
    pub sessions_closed: u64,
    pub sessions_expired: u64,
    pub chunks_served: u64,
    pub bytes_served: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk(&self, len: usize) {
        self.chunks_served.fetch_add(1, Ordering::Relaxed);
        self.bytes_served.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// 현재 실행 중인 세션 수
    pub fn active_sessions(&self) -> u64 {
        let snapshot = self.snapshot();
        snapshot
            .sessions_started
            .saturating_sub(snapshot.sessions_closed + snapshot.sessions_expired)
    }

    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            control_requests: self.control_requests.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            no_port: self.no_port.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            chunks_served: self.chunks_served.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Requests: {} | Dropped: {} | NotFound: {} | NoPort: {} | Sessions: {} started, {} closed, {} expired | Served: {} chunks, {} bytes",
            s.control_requests,
            s.malformed_dropped,
            s.not_found,
            s.no_port,
            s.sessions_started,
            s.sessions_closed,
            s.sessions_expired,
            s.chunks_served,
            s.bytes_served,
        )
    }
}
