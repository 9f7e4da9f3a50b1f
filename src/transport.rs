//! 데이터그램 전송 추상화
//!
//! 전달도 순서도 보장하지 않음. 나머지 계층이 재시도로 이를 보정함.
//! - `UdpSocket`: 실제 전송
//! - `LossyTransport`: 지정한 데이터그램을 버리는 래퍼 (손실 재현용)
//! - `RecordingTransport`: 송신 페이로드와 대기 시간을 기록하는 래퍼

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

use crate::{Result, MAX_DATAGRAM_SIZE};

/// 수신 에러가 반복될 때 루프가 바쁘게 돌지 않도록 잠시 쉼
pub(crate) async fn recv_error_backoff() {
    tokio::time::sleep(Duration::from_millis(crate::RECV_ERROR_BACKOFF_MS)).await;
}

/// 수신한 데이터그램
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Bytes,
    pub from: SocketAddr,
}

/// 데이터그램 송수신 계약
#[async_trait]
pub trait Transport: Send + Sync {
    /// 데이터그램 하나 전송 (전달 보장 없음)
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<()>;

    /// 최대 `timeout` 동안 대기. 타임아웃이면 `None`
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Datagram>>;

    /// 다음 데이터그램까지 무기한 대기
    async fn recv(&self) -> Result<Datagram>;

    fn local_addr(&self) -> Result<SocketAddr>;
}

#[async_trait]
impl Transport for UdpSocket {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<()> {
        UdpSocket::send_to(self, payload, target).await?;
        Ok(())
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Datagram>> {
        match tokio::time::timeout(timeout, Transport::recv(self)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn recv(&self) -> Result<Datagram> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok(Datagram {
            payload: Bytes::from(buf),
            from,
        })
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(UdpSocket::local_addr(self)?)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<()> {
        (**self).send_to(payload, target).await
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Datagram>> {
        (**self).recv_timeout(timeout).await
    }

    async fn recv(&self) -> Result<Datagram> {
        (**self).recv().await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// 어떤 데이터그램을 버릴지
#[derive(Debug, Clone, Default)]
pub enum DropPlan {
    #[default]
    Never,
    /// N번째마다 하나씩 (1부터 셈)
    EveryNth(u64),
    /// 지정한 순번만 (0부터 셈)
    Indices(HashSet<u64>),
}

impl DropPlan {
    fn should_drop(&self, index: u64) -> bool {
        match self {
            DropPlan::Never => false,
            DropPlan::EveryNth(n) => *n > 0 && (index + 1) % n == 0,
            DropPlan::Indices(indices) => indices.contains(&index),
        }
    }
}

/// 손실 재현 래퍼
pub struct LossyTransport<T> {
    inner: T,
    send_plan: DropPlan,
    recv_plan: DropPlan,
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            send_plan: DropPlan::Never,
            recv_plan: DropPlan::Never,
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// 송신 N번째마다 버림
    pub fn drop_every_nth_send(mut self, n: u64) -> Self {
        self.send_plan = DropPlan::EveryNth(n);
        self
    }

    /// 지정한 순번의 송신을 버림
    pub fn drop_sends(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.send_plan = DropPlan::Indices(indices.into_iter().collect());
        self
    }

    /// 지정한 순번의 수신을 버림
    pub fn drop_receives(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.recv_plan = DropPlan::Indices(indices.into_iter().collect());
        self
    }

    /// 지금까지 버린 데이터그램 수
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn drop_incoming(&self) -> bool {
        let index = self.received.fetch_add(1, Ordering::Relaxed);
        let drop = self.recv_plan.should_drop(index);
        if drop {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("수신 데이터그램 #{} 버림", index);
        }
        drop
    }
}

#[async_trait]
impl<T: Transport> Transport for LossyTransport<T> {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<()> {
        let index = self.sent.fetch_add(1, Ordering::Relaxed);
        if self.send_plan.should_drop(index) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("송신 데이터그램 #{} 버림 -> {}", index, target);
            return Ok(());
        }
        self.inner.send_to(payload, target).await
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Datagram>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inner.recv_timeout(remaining).await? {
                Some(_) if self.drop_incoming() => continue,
                other => return Ok(other),
            }
        }
    }

    async fn recv(&self) -> Result<Datagram> {
        loop {
            let datagram = self.inner.recv().await?;
            if !self.drop_incoming() {
                return Ok(datagram);
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// 송신 내역과 수신 대기 시간 기록 래퍼
pub struct RecordingTransport<T> {
    inner: T,
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
    timeouts: Mutex<Vec<Duration>>,
}

impl<T: Transport> RecordingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            sent: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    /// 보낸 (대상, 페이로드) 목록
    pub fn sent(&self) -> Vec<(SocketAddr, Bytes)> {
        self.sent.lock().clone()
    }

    /// `recv_timeout`에 넘어온 대기 시간 목록
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().clone()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RecordingTransport<T> {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<()> {
        self.sent
            .lock()
            .push((target, Bytes::copy_from_slice(payload)));
        self.inner.send_to(payload, target).await
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Datagram>> {
        self.timeouts.lock().push(timeout);
        self.inner.recv_timeout(timeout).await
    }

    async fn recv(&self) -> Result<Datagram> {
        self.inner.recv().await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr()
    }
}
