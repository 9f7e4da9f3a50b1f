//! 프로토콜 설정

use std::path::PathBuf;
use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_BASE_TIMEOUT_MS, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_BIND_ATTEMPTS, MAX_SERVED_BLOCK, PORT_RANGE_END, PORT_RANGE_START,
};

/// PFT 프로토콜 설정
///
/// 서버와 클라이언트가 같은 구조체를 공유함. 포트 범위, 재시도, 블록 크기는
/// 같은 배포 안에서 양쪽이 일치해야 함.
#[derive(Debug, Clone)]
pub struct Config {
    /// 데이터 채널 포트 범위 시작 (포함)
    pub port_min: u16,

    /// 데이터 채널 포트 범위 끝 (미포함)
    pub port_max: u16,

    /// 포트 할당 시 바인드 시도 횟수
    pub bind_attempts: usize,

    /// 최대 재시도 횟수 (총 시도 = max_retries + 1)
    pub max_retries: u32,

    /// 첫 시도 대기 시간 (밀리초), 재시도마다 2배
    pub base_timeout_ms: u64,

    /// 대기 시간에 더할 지터 비율 (0.0 ~ 1.0)
    /// 0이면 지터 없음
    pub retry_jitter: f64,

    /// 클라이언트가 GET 한 번에 요청하는 바이트 수
    pub block_size: u64,

    /// 서버가 GET 한 번에 읽어 주는 최대 바이트 수
    pub max_served_block: u64,

    /// 동시 세션 상한 (0이면 무제한)
    pub max_sessions: usize,

    /// 세션 유휴 타임아웃 (밀리초)
    /// None이면 CLOSE를 받을 때까지 세션 유지
    pub session_idle_timeout_ms: Option<u64>,

    /// DOWNLOAD를 보낸 주소의 청크 요청만 처리
    pub pin_peer: bool,

    /// 서버가 파일을 찾는 루트 디렉터리
    pub root_dir: PathBuf,

    /// 클라이언트가 받은 파일을 저장할 디렉터리
    pub output_dir: PathBuf,

    /// `<name>.part`에 쓰고 완료 시 rename
    pub atomic_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port_min: PORT_RANGE_START,
            port_max: PORT_RANGE_END,
            bind_attempts: DEFAULT_BIND_ATTEMPTS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_timeout_ms: DEFAULT_BASE_TIMEOUT_MS,
            retry_jitter: 0.0,
            block_size: DEFAULT_BLOCK_SIZE,
            max_served_block: MAX_SERVED_BLOCK,
            max_sessions: 0,
            session_idle_timeout_ms: None,
            pin_peer: false,
            root_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            atomic_writes: false,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 첫 시도 대기 시간
    pub fn base_timeout(&self) -> Duration {
        Duration::from_millis(self.base_timeout_ms)
    }

    /// 세션 유휴 타임아웃
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        self.session_idle_timeout_ms.map(Duration::from_millis)
    }

    /// 데이터 채널로 쓸 수 있는 포트 수
    pub fn port_count(&self) -> usize {
        self.port_max.saturating_sub(self.port_min) as usize
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size는 1 이상이어야 함".into()));
        }
        if self.max_served_block < self.block_size {
            return Err(Error::Config(format!(
                "max_served_block({})이 block_size({})보다 작음",
                self.max_served_block, self.block_size
            )));
        }
        if self.port_count() == 0 {
            return Err(Error::Config(format!(
                "빈 포트 범위: {}..{}",
                self.port_min, self.port_max
            )));
        }
        if self.bind_attempts == 0 {
            return Err(Error::Config("bind_attempts는 1 이상이어야 함".into()));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(Error::Config(format!(
                "retry_jitter 범위 초과: {}",
                self.retry_jitter
            )));
        }
        Ok(())
    }

    /// 손실이 많은 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            max_retries: 8,
            base_timeout_ms: 300,
            retry_jitter: 0.2,
            ..Self::default()
        }
    }

    /// 루프백 테스트용 설정 (짧은 타임아웃)
    pub fn local_test() -> Self {
        Self {
            base_timeout_ms: 50,
            ..Self::default()
        }
    }
}
