//! # PFT (Pull File Transfer)
//!
//! UDP 기반 청크 풀(pull) 방식 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **2단계 핸드쉐이크**: 컨트롤 채널에서 DOWNLOAD, 전용 데이터 채널로 리다이렉트
//! - **풀 방식 전송**: 클라이언트가 바이트 범위를 하나씩 GET으로 요청
//! - **재시도 + 지수 백오프**: 요청/응답 한 쌍 단위로 재전송
//! - **세션당 태스크**: 다운로드 하나당 독립 tokio 태스크와 전용 포트
//! - **텍스트 와이어 포맷**: 공백 구분 ASCII, 바이너리는 base64

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod port;
pub mod progress;
pub mod retry;
pub mod server;
pub mod session;
pub mod stats;
pub mod storage;
pub mod transport;

pub use client::{next_range, read_file_list, BatchReport, Client, DownloadReport};
pub use config::Config;
pub use error::{Error, Result};
pub use message::{ChunkOp, ChunkRequest, ChunkResponse, ControlRequest, ControlResponse, ErrorReason};
pub use port::{PortAllocator, PortLease};
pub use progress::{NullProgress, ProgressEvent, ProgressReporter, TracingProgress};
pub use retry::{RetryPolicy, RetryingClient};
pub use server::{ActiveSession, Server};
pub use session::{SessionOutcome, TransferSession};
pub use stats::{ServerStats, ServerStatsSnapshot, TransferStats};
pub use storage::{FileStore, OutputFile};
pub use transport::{Datagram, LossyTransport, RecordingTransport, Transport};

/// 데이터 채널 포트 범위 시작 (포함)
pub const PORT_RANGE_START: u16 = 50000;

/// 데이터 채널 포트 범위 끝 (미포함, 1000개 포트)
pub const PORT_RANGE_END: u16 = 51000;

/// 기본 최대 재시도 횟수
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// 기본 첫 시도 타임아웃 (밀리초)
pub const DEFAULT_BASE_TIMEOUT_MS: u64 = 500;

/// 기본 GET 블록 크기 (바이트)
pub const DEFAULT_BLOCK_SIZE: u64 = 1000;

/// 포트 할당 바인드 시도 횟수
pub const DEFAULT_BIND_ATTEMPTS: usize = 10;

/// 서버가 GET 하나에 읽어 주는 최대 바이트
/// base64로 부풀어도 UDP 데이터그램 하나에 들어가는 크기
pub const MAX_SERVED_BLOCK: u64 = 16 * 1024;

/// 최대 UDP 데이터그램 크기
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// 소켓 수신 에러 후 다시 수신하기 전 대기 시간 (밀리초)
pub const RECV_ERROR_BACKOFF_MS: u64 = 50;
