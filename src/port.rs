//! 데이터 채널 포트 할당
//!
//! 범위 안에서 무작위 포트를 골라 실제로 바인드해 봄. 바인드 성공이
//! 유일한 판단 기준이라 프로세스 안에 별도 레지스트리를 두지 않음.
//! 바인드된 소켓 자체를 임대(lease)로 돌려주므로 탐색과 세션 바인드
//! 사이의 경쟁 구간이 없음.

use std::net::{IpAddr, SocketAddr};

use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::Config;

/// 세션 하나가 쓰는 포트 임대
///
/// 소켓이 drop되면 포트도 반납됨
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    socket: UdpSocket,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub fn into_socket(self) -> UdpSocket {
        self.socket
    }
}

/// 포트 할당기
#[derive(Debug, Clone)]
pub struct PortAllocator {
    port_min: u16,
    port_max: u16,
    attempts: usize,
}

impl PortAllocator {
    /// `[port_min, port_max)` 범위에서 최대 `attempts`번 시도
    pub fn new(port_min: u16, port_max: u16, attempts: usize) -> Self {
        Self {
            port_min,
            port_max,
            attempts,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.port_min, config.port_max, config.bind_attempts)
    }

    /// 포트 하나를 바인드해서 돌려줌. 시도 횟수 소진 시 `None`
    pub async fn allocate(&self, ip: IpAddr) -> Option<PortLease> {
        if self.port_min >= self.port_max {
            warn!("빈 포트 범위: {}..{}", self.port_min, self.port_max);
            return None;
        }

        for attempt in 0..self.attempts {
            let port = rand::thread_rng().gen_range(self.port_min..self.port_max);
            match UdpSocket::bind(SocketAddr::new(ip, port)).await {
                Ok(socket) => {
                    debug!("포트 {} 할당 (시도 {})", port, attempt + 1);
                    return Some(PortLease { port, socket });
                }
                Err(e) => {
                    debug!("포트 {} 바인드 실패: {}", port, e);
                }
            }
        }

        warn!(
            "포트 할당 실패: {}회 시도, 범위 {}..{}",
            self.attempts, self.port_min, self.port_max
        );
        None
    }
}
