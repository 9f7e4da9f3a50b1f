//! 전송 세션 (서버측)
//!
//! 다운로드 하나당 전용 소켓과 파일 핸들을 소유하고 CLOSE까지 GET에 응답함
//! - 읽은 바이트가 0이면 응답하지 않음 (클라이언트 재시도에 맡김)
//! - 잘못된 데이터그램은 조용히 버림
//! - 유휴 타임아웃이 없으면 CLOSE를 받을 때까지 살아 있음

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::File;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::message::{ChunkOp, ChunkRequest, ChunkResponse};
use crate::stats::ServerStats;
use crate::storage::read_range;
use crate::transport::{recv_error_backoff, Datagram, Transport};
use crate::Config;

/// 세션 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// CLOSE 수신
    Closed,
    /// 유휴 타임아웃
    Expired,
}

/// 전송 세션
pub struct TransferSession<T> {
    filename: String,
    file: File,
    transport: T,
    /// DOWNLOAD를 보낸 주소
    initiator: SocketAddr,
    pin_peer: bool,
    idle_timeout: Option<Duration>,
    max_block: u64,
    stats: Arc<ServerStats>,
}

impl<T: Transport> TransferSession<T> {
    pub fn new(
        filename: impl Into<String>,
        file: File,
        transport: T,
        initiator: SocketAddr,
        config: &Config,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            filename: filename.into(),
            file,
            transport,
            initiator,
            pin_peer: config.pin_peer,
            idle_timeout: config.session_idle_timeout(),
            max_block: config.max_served_block.max(1),
            stats,
        }
    }

    /// CLOSE(또는 유휴 타임아웃)까지 요청 처리. 반환 시 소켓과 파일 반납
    pub async fn run(mut self) -> SessionOutcome {
        let port = self
            .transport
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_default();
        info!("File transfer started: {} on port {}", self.filename, port);

        loop {
            let Some(datagram) = self.next_datagram().await else {
                info!(
                    "세션 유휴 타임아웃: {} (port {})",
                    self.filename, port
                );
                ServerStats::incr(&self.stats.sessions_expired);
                return SessionOutcome::Expired;
            };

            if self.pin_peer && datagram.from != self.initiator {
                debug!(
                    "다른 주소의 요청 무시: {} (expected {})",
                    datagram.from, self.initiator
                );
                continue;
            }

            let request = match ChunkRequest::from_bytes(&datagram.payload) {
                Ok(request) => request,
                Err(e) => {
                    debug!("청크 요청 버림 from {}: {}", datagram.from, e);
                    continue;
                }
            };

            if request.filename != self.filename {
                debug!(
                    "다른 파일 요청 무시: {} (session {})",
                    request.filename, self.filename
                );
                continue;
            }

            match request.op {
                ChunkOp::Close => {
                    let response = ChunkResponse::close_ok(self.filename.as_str());
                    if let Err(e) = self
                        .transport
                        .send_to(&response.to_bytes(), datagram.from)
                        .await
                    {
                        warn!("CLOSE_OK 전송 실패: {}", e);
                    }
                    info!("File transfer closed: {} (port {})", self.filename, port);
                    ServerStats::incr(&self.stats.sessions_closed);
                    return SessionOutcome::Closed;
                }
                ChunkOp::Get { start, end } => {
                    self.serve_block(start, end, datagram.from).await;
                }
            }
        }
    }

    /// 다음 데이터그램. 유휴 타임아웃이면 `None`
    ///
    /// 수신 에러가 이어져도 유휴 기한은 그대로 적용됨
    async fn next_datagram(&self) -> Option<Datagram> {
        let deadline = self.idle_timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let result = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    self.transport.recv_timeout(remaining).await
                }
                None => self.transport.recv().await.map(Some),
            };
            match result {
                Ok(datagram) => return datagram,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    recv_error_backoff().await;
                }
            }
        }
    }

    async fn serve_block(&mut self, start: u64, end: u64, peer: SocketAddr) {
        let requested = (end - start).saturating_add(1);
        let len = requested.min(self.max_block) as usize;

        let data = match read_range(&mut self.file, start, len).await {
            Ok(data) => data,
            Err(e) => {
                warn!("읽기 실패 {} @{}: {}", self.filename, start, e);
                return;
            }
        };

        let Some(response) = ChunkResponse::data(self.filename.as_str(), start, Bytes::from(data))
        else {
            debug!(
                "읽은 바이트 없음 {} START {} END {}, 응답 안 함",
                self.filename, start, end
            );
            return;
        };

        if let ChunkResponse::Data { end: served_end, data, .. } = &response {
            debug!(
                "GET {} {}-{} -> {}-{}",
                self.filename, start, end, start, served_end
            );
            self.stats.record_chunk(data.len());
        }

        if let Err(e) = self.transport.send_to(&response.to_bytes(), peer).await {
            warn!("청크 전송 실패 -> {}: {}", peer, e);
        }
    }
}
