//! 재시도 요청 클라이언트
//!
//! 요청/응답 한 쌍을 신뢰성 있게 주고받음
//! - 시도 k의 대기 시간 = base * 2^k (지수 백오프)
//! - 조건에 맞지 않는 응답은 버리고 남은 시간 동안 계속 대기
//! - 총 시도 횟수 = max_retries + 1, 소진 시 `Error::RequestTimeout`

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::Transport;
use crate::{Config, Error, Result};

/// 재시도 정책
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 첫 시도 대기 시간
    pub base_timeout: Duration,

    /// 최대 재시도 횟수
    pub max_retries: u32,

    /// 지터 비율 (0이면 없음)
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(base_timeout: Duration, max_retries: u32) -> Self {
        Self {
            base_timeout,
            max_retries,
            jitter: 0.0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            base_timeout: config.base_timeout(),
            max_retries: config.max_retries,
            jitter: config.retry_jitter,
        }
    }

    /// 총 시도 횟수
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// 시도 `attempt`(0부터)의 대기 시간, 지터 제외
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// 전체 대기 시간 순서
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts()).map(move |attempt| self.timeout_for(attempt))
    }

    fn wait_for(&self, attempt: u32) -> Duration {
        let timeout = self.timeout_for(attempt);
        if self.jitter <= 0.0 {
            return timeout;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        timeout.mul_f64(1.0 + extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 재시도 요청 클라이언트
///
/// 동시에 하나의 요청만 처리하는 용도 (클라이언트의 단일 미결 요청 규칙)
pub struct RetryingClient<T> {
    transport: T,
    policy: RetryPolicy,
    retransmits: AtomicU64,
}

impl<T: Transport> RetryingClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            retransmits: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 지금까지의 재전송 횟수
    pub fn retransmits(&self) -> u64 {
        self.retransmits.load(Ordering::Relaxed)
    }

    /// `payload`를 보내고 `accept`가 `Some`을 돌려주는 응답을 기다림
    ///
    /// `accept`는 응답 판별과 파싱을 함께 함. `None`이면 이전 재시도의
    /// 늦은 중복 등으로 보고 버림.
    pub async fn request<R, F>(&self, target: SocketAddr, payload: &[u8], mut accept: F) -> Result<R>
    where
        F: FnMut(&[u8]) -> Option<R>,
    {
        for attempt in 0..self.policy.max_attempts() {
            if attempt > 0 {
                self.retransmits.fetch_add(1, Ordering::Relaxed);
                debug!("Retry #{} -> {}", attempt, target);
            }
            self.transport.send_to(payload, target).await?;

            let timeout = self.policy.wait_for(attempt);
            let deadline = Instant::now() + timeout;
            let mut wait = timeout;

            loop {
                let Some(datagram) = self.transport.recv_timeout(wait).await? else {
                    break;
                };
                if let Some(response) = accept(&datagram.payload) {
                    return Ok(response);
                }
                debug!(
                    "응답 버림 ({} bytes from {})",
                    datagram.payload.len(),
                    datagram.from
                );
                wait = deadline.saturating_duration_since(Instant::now());
                if wait.is_zero() {
                    break;
                }
            }
        }

        let payload = String::from_utf8_lossy(payload).into_owned();
        warn!(
            "재시도 소진 ({}회): {}",
            self.policy.max_attempts(),
            payload
        );
        Err(Error::RequestTimeout { payload })
    }
}
