//! 다운로드 진행 보고
//!
//! 세션 클라이언트가 구조화된 이벤트를 내보내고 CLI는 출력, 테스트는 버림

use std::fmt;
use std::time::Duration;

/// 파일 하나의 진행 이벤트
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// 컨트롤 핸드쉐이크 성공
    Started { size: u64, port: u16 },
    /// 청크를 로컬 파일에 이어 씀
    Chunk { received: u64, size: u64 },
    /// 전체 수신 + CLOSE_OK 확인
    Completed {
        bytes: u64,
        elapsed: Duration,
        retransmits: u64,
    },
    /// 다운로드 중단
    Failed { message: String },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { size, port } => {
                write!(f, "started size={} port={}", size, port)
            }
            Self::Chunk { received, size } => {
                write!(f, "chunk received={}/{}", received, size)
            }
            Self::Completed { bytes, elapsed, retransmits } => {
                write!(
                    f,
                    "completed bytes={} elapsed_ms={} retransmits={}",
                    bytes,
                    elapsed.as_millis(),
                    retransmits
                )
            }
            Self::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// 진행 보고 대상
pub trait ProgressReporter: Send + Sync {
    fn report(&self, filename: &str, event: ProgressEvent);
}

/// `tracing`으로 출력
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, filename: &str, event: ProgressEvent) {
        // 수명 이벤트는 info, 청크 단위는 debug
        match &event {
            ProgressEvent::Chunk { .. } => {
                tracing::debug!(file = filename, "{}", event);
            }
            ProgressEvent::Failed { .. } => {
                tracing::warn!(file = filename, "{}", event);
            }
            _ => {
                tracing::info!(file = filename, "{}", event);
            }
        }
    }
}

/// 아무것도 하지 않음
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report(&self, _filename: &str, _event: ProgressEvent) {}
}
