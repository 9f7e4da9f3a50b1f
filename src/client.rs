//! 세션 클라이언트
//!
//! 파일 하나를 받는 순서
//! 1. 컨트롤 채널로 DOWNLOAD → OK(크기, 포트) 또는 ERR
//! 2. 데이터 채널로 블록 단위 GET을 순서대로 요청, 받은 바이트를 이어 씀
//! 3. CLOSE → CLOSE_OK 확인 후 로컬 파일 마무리
//!
//! 모든 요청은 `RetryingClient`를 거치므로 한 번에 하나만 미결 상태

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::message::{validate_filename, ChunkRequest, ChunkResponse, ControlRequest, ControlResponse};
use crate::progress::{ProgressEvent, ProgressReporter, TracingProgress};
use crate::retry::{RetryPolicy, RetryingClient};
use crate::stats::TransferStats;
use crate::storage::OutputFile;
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// `offset`부터 요청할 다음 범위 (양 끝 포함). 다 받았으면 `None`
pub fn next_range(offset: u64, size: u64, block_size: u64) -> Option<(u64, u64)> {
    if offset >= size || block_size == 0 {
        return None;
    }
    let end = offset.saturating_add(block_size - 1).min(size - 1);
    Some((offset, end))
}

/// 파일 목록 읽기. 한 줄에 파일명 하나, 앞뒤 공백 제거, 빈 줄 무시
pub async fn read_file_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// 다운로드 하나의 결과
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub filename: String,
    pub size: u64,
    pub path: PathBuf,
    pub stats: TransferStats,
}

/// 파일 목록 전체 결과. 파일 순서 유지
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, Result<DownloadReport>)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &DownloadReport> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| outcome.as_ref().err().map(|e| (name.as_str(), e)))
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn summary(&self) -> String {
        let ok = self.succeeded().count();
        let bytes: u64 = self.succeeded().map(|r| r.size).sum();
        format!(
            "Files: {} ok, {} failed | Bytes: {}",
            ok,
            self.outcomes.len() - ok,
            bytes
        )
    }
}

/// PFT 클라이언트
///
/// 소켓 하나로 컨트롤 채널과 데이터 채널을 모두 사용
pub struct Client<T> {
    retry: RetryingClient<T>,
    server_addr: SocketAddr,
    config: Config,
    progress: Arc<dyn ProgressReporter>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, server_addr: SocketAddr, config: Config) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            retry: RetryingClient::new(transport, policy),
            server_addr,
            config,
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn transport(&self) -> &T {
        self.retry.transport()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 지금까지 보낸 재전송 총수
    pub fn retransmits(&self) -> u64 {
        self.retry.retransmits()
    }

    /// 목록 순서대로 하나씩 받음. 파일 하나의 실패가 나머지를 막지 않음
    pub async fn download_all<I, S>(&self, filenames: I) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = BatchReport::default();
        for filename in filenames {
            let filename = filename.as_ref();
            let outcome = self.download(filename).await;
            report.outcomes.push((filename.to_string(), outcome));
        }
        report
    }

    /// 파일 하나 다운로드
    pub async fn download(&self, filename: &str) -> Result<DownloadReport> {
        let result = self.try_download(filename).await;
        if let Err(e) = &result {
            self.progress.report(
                filename,
                ProgressEvent::Failed {
                    message: e.to_string(),
                },
            );
        }
        result
    }

    async fn try_download(&self, filename: &str) -> Result<DownloadReport> {
        validate_filename(filename)?;
        let retransmits_before = self.retry.retransmits();

        let (size, port) = self.handshake(filename).await?;
        self.progress
            .report(filename, ProgressEvent::Started { size, port });
        let data_addr = SocketAddr::new(self.server_addr.ip(), port);

        let mut output =
            OutputFile::create(&self.config.output_dir, filename, self.config.atomic_writes)
                .await?;
        let mut stats = TransferStats::new(size);

        let mut offset = 0;
        while let Some((start, end)) = next_range(offset, size, self.config.block_size) {
            let data = self.fetch_block(data_addr, filename, start, end).await?;
            output.append(&data).await?;
            stats.record_chunk(data.len());
            offset += data.len() as u64;
            self.progress.report(
                filename,
                ProgressEvent::Chunk {
                    received: offset,
                    size,
                },
            );
        }

        self.close(data_addr, filename).await?;
        let path = output.finish().await?;

        stats.retransmits = self.retry.retransmits() - retransmits_before;
        self.progress.report(
            filename,
            ProgressEvent::Completed {
                bytes: stats.bytes_received,
                elapsed: stats.elapsed(),
                retransmits: stats.retransmits,
            },
        );
        info!("{} 수신 완료: {}", filename, stats.summary());

        Ok(DownloadReport {
            filename: filename.to_string(),
            size,
            path,
            stats,
        })
    }

    /// DOWNLOAD → (크기, 데이터 포트)
    async fn handshake(&self, filename: &str) -> Result<(u64, u16)> {
        let request = ControlRequest::download(filename).to_bytes();
        let response = self
            .retry
            .request(self.server_addr, &request, |bytes| {
                ControlResponse::from_bytes(bytes)
                    .ok()
                    .filter(|response| response.filename() == filename)
            })
            .await?;

        match response {
            ControlResponse::Ok { size, port, .. } => {
                debug!("{}: SIZE {} PORT {}", filename, size, port);
                Ok((size, port))
            }
            ControlResponse::Err { reason, .. } => {
                warn!("{}: 서버 거부 {}", filename, reason.as_str());
                Err(reason.into_error(filename.to_string()))
            }
        }
    }

    /// GET 하나. 요청한 시작 위치에서 시작하고 요청 범위 안에 있는 응답만 받음
    async fn fetch_block(
        &self,
        data_addr: SocketAddr,
        filename: &str,
        start: u64,
        end: u64,
    ) -> Result<Bytes> {
        let request = ChunkRequest::get(filename, start, end).to_bytes();
        self.retry
            .request(data_addr, &request, |bytes| match ChunkResponse::from_bytes(bytes) {
                Ok(ChunkResponse::Data {
                    filename: name,
                    start: got_start,
                    end: got_end,
                    data,
                }) if name == filename && got_start == start && got_end <= end => Some(data),
                _ => None,
            })
            .await
    }

    async fn close(&self, data_addr: SocketAddr, filename: &str) -> Result<()> {
        let request = ChunkRequest::close(filename).to_bytes();
        self.retry
            .request(data_addr, &request, |bytes| match ChunkResponse::from_bytes(bytes) {
                Ok(ChunkResponse::CloseOk { filename: name }) if name == filename => Some(()),
                _ => None,
            })
            .await
    }
}
