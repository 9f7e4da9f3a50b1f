//! 디스패처 / 리스너 (서버측)
//!
//! 컨트롤 채널 소켓 하나에서 DOWNLOAD를 받아 세션을 띄움
//! - 수신 → 파싱 → 응답 → 세션 spawn 후 바로 다음 수신으로 복귀
//! - 이해할 수 없는 요청에는 응답하지 않음
//! - 세션 수명 동안 리스너가 기다리는 일은 없음

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::message::{ControlRequest, ControlResponse, ErrorReason};
use crate::port::PortAllocator;
use crate::session::TransferSession;
use crate::stats::ServerStats;
use crate::storage::FileStore;
use crate::transport::{recv_error_backoff, Datagram, Transport};
use crate::{Config, Result};

/// 실행 중인 세션 정보
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub port: u16,
    pub filename: String,
    pub peer: SocketAddr,
    pub started: Instant,
}

/// PFT 서버
pub struct Server {
    config: Config,
    store: FileStore,
    allocator: PortAllocator,
    socket: UdpSocket,
    /// 동시 세션 상한 (None이면 무제한)
    session_limit: Option<Arc<Semaphore>>,
    /// 데이터 포트 → 세션
    sessions: Arc<DashMap<u16, ActiveSession>>,
    stats: Arc<ServerStats>,
}

impl Server {
    /// 컨트롤 채널 바인드
    pub async fn bind(addr: SocketAddr, config: Config) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(addr).await?;
        info!("PFT Server started on {}", socket.local_addr()?);

        let session_limit =
            (config.max_sessions > 0).then(|| Arc::new(Semaphore::new(config.max_sessions)));

        Ok(Self {
            store: FileStore::new(config.root_dir.clone()),
            allocator: PortAllocator::from_config(&config),
            config,
            socket,
            session_limit,
            sessions: Arc::new(DashMap::new()),
            stats: Arc::new(ServerStats::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Transport::local_addr(&self.socket)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 서버 통계
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// 현재 실행 중인 세션 목록 (포트 순)
    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        let mut sessions: Vec<ActiveSession> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        sessions.sort_by_key(|session| session.port);
        sessions
    }

    /// 무기한 실행
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// `shutdown`이 완료될 때까지 실행
    ///
    /// 이미 띄운 세션은 각자 끝날 때까지 계속 돎
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("PFT Server stopping: {}", self.stats.summary());
                    return Ok(());
                }
                result = Transport::recv(&self.socket) => {
                    match result {
                        Ok(datagram) => self.dispatch(datagram).await,
                        Err(e) => {
                            warn!("수신 에러: {}", e);
                            recv_error_backoff().await;
                        }
                    }
                }
            }
        }
    }

    /// 컨트롤 데이터그램 하나 처리
    async fn dispatch(&self, datagram: Datagram) {
        ServerStats::incr(&self.stats.control_requests);
        let peer = datagram.from;

        let request = match ControlRequest::from_bytes(&datagram.payload) {
            Ok(request) => request,
            Err(e) => {
                ServerStats::incr(&self.stats.malformed_dropped);
                debug!("컨트롤 요청 버림 from {}: {}", peer, e);
                return;
            }
        };
        let filename = request.filename().to_string();
        info!("DOWNLOAD {} from {}", filename, peer);

        let Some(served) = self.store.resolve(&filename).await else {
            ServerStats::incr(&self.stats.not_found);
            self.reject(&filename, ErrorReason::NotFound, peer).await;
            return;
        };

        let permit = match self.acquire_session_slot() {
            Ok(permit) => permit,
            Err(()) => {
                warn!("동시 세션 상한 도달: {}", self.config.max_sessions);
                ServerStats::incr(&self.stats.no_port);
                self.reject(&filename, ErrorReason::NoPortAvailable, peer).await;
                return;
            }
        };

        let bind_ip = match self.local_addr() {
            Ok(addr) => addr.ip(),
            Err(e) => {
                warn!("로컬 주소 확인 실패: {}", e);
                return;
            }
        };
        let Some(lease) = self.allocator.allocate(bind_ip).await else {
            ServerStats::incr(&self.stats.no_port);
            self.reject(&filename, ErrorReason::NoPortAvailable, peer).await;
            return;
        };

        // 확인과 열기 사이에 파일이 사라질 수 있음
        let file = match self.store.open(&served).await {
            Ok(file) => file,
            Err(e) => {
                warn!("파일 열기 실패 {:?}: {}", served.path, e);
                ServerStats::incr(&self.stats.not_found);
                self.reject(&filename, ErrorReason::NotFound, peer).await;
                return;
            }
        };

        let port = lease.port();
        let response = ControlResponse::Ok {
            filename: filename.clone(),
            size: served.size,
            port,
        };
        self.reply(&response, peer).await;

        self.sessions.insert(
            port,
            ActiveSession {
                port,
                filename: filename.clone(),
                peer,
                started: Instant::now(),
            },
        );
        let sessions = self.sessions.clone();

        let session = TransferSession::new(
            filename,
            file,
            lease.into_socket(),
            peer,
            &self.config,
            self.stats.clone(),
        );
        ServerStats::incr(&self.stats.sessions_started);
        tokio::spawn(async move {
            let outcome = session.run().await;
            if let Some((_, finished)) = sessions.remove(&port) {
                debug!(
                    "세션 종료 port {} ({}): {:?} after {:?}",
                    port,
                    finished.filename,
                    outcome,
                    finished.started.elapsed()
                );
            }
            drop(permit);
        });
    }

    fn acquire_session_slot(&self) -> std::result::Result<Option<OwnedSemaphorePermit>, ()> {
        match &self.session_limit {
            Some(limit) => limit.clone().try_acquire_owned().map(Some).map_err(|_| ()),
            None => Ok(None),
        }
    }

    async fn reject(&self, filename: &str, reason: ErrorReason, peer: SocketAddr) {
        info!("ERR {} {} -> {}", filename, reason.as_str(), peer);
        let response = ControlResponse::Err {
            filename: filename.to_string(),
            reason,
        };
        self.reply(&response, peer).await;
    }

    async fn reply(&self, response: &ControlResponse, peer: SocketAddr) {
        if let Err(e) = Transport::send_to(&self.socket, &response.to_bytes(), peer).await {
            warn!("응답 전송 실패 -> {}: {}", peer, e);
        }
    }
}
