//! 루프백 전송 테스트
//!
//! 실제 서버 태스크와 클라이언트를 127.0.0.1에서 돌리고 파일 단위 결과를 확인

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use pft::message::encode_payload;
use pft::{
    ChunkRequest, ChunkResponse, Client, Config, ControlRequest, Datagram, Error, LossyTransport,
    NullProgress, ProgressEvent, ProgressReporter, RecordingTransport, Server, ServerStats,
    Transport,
};

struct TestServer {
    addr: SocketAddr,
    stats: Arc<ServerStats>,
    handle: JoinHandle<pft::Result<()>>,
    _root: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

async fn start_server(mut config: Config, files: &[(&str, &[u8])]) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    for (name, data) in files {
        std::fs::write(root.path().join(name), data).unwrap();
    }
    config.root_dir = root.path().to_path_buf();

    let server = Server::bind("127.0.0.1:0".parse().unwrap(), config)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let stats = server.stats();
    let handle = tokio::spawn(async move { server.run().await });
    TestServer {
        addr,
        stats,
        handle,
        _root: root,
    }
}

async fn client_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

fn client_config(output: &TempDir, base_timeout_ms: u64) -> Config {
    Config {
        base_timeout_ms,
        output_dir: output.path().to_path_buf(),
        ..Config::default()
    }
}

/// 연속 중복을 뺀 송신 페이로드 목록
fn distinct_sent<T: Transport>(transport: &RecordingTransport<T>) -> Vec<String> {
    let mut sent: Vec<String> = transport
        .sent()
        .iter()
        .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
        .collect();
    sent.dedup();
    sent
}

#[tokio::test]
async fn test_download_splits_file_into_blocks() {
    let data = pattern(2500);
    let server = start_server(Config::default(), &[("a.bin", &data[..])]).await;
    let output = tempfile::tempdir().unwrap();

    let client = Client::new(
        RecordingTransport::new(client_socket().await),
        server.addr,
        client_config(&output, 500),
    )
    .with_progress(Arc::new(NullProgress));

    let report = client.download("a.bin").await.unwrap();
    assert_eq!(report.size, 2500);
    assert_eq!(report.stats.chunks_received, 3);
    assert_eq!(std::fs::read(output.path().join("a.bin")).unwrap(), data);

    assert_eq!(
        distinct_sent(client.transport()),
        vec![
            "DOWNLOAD a.bin",
            "FILE a.bin GET START 0 END 999",
            "FILE a.bin GET START 1000 END 1999",
            "FILE a.bin GET START 2000 END 2499",
            "FILE a.bin CLOSE",
        ]
    );

    // 핸드쉐이크는 컨트롤 포트, 나머지는 데이터 포트로
    let sent = client.transport().sent();
    assert_eq!(sent[0].0, server.addr);
    let data_addr = sent.last().unwrap().0;
    assert_ne!(data_addr, server.addr);
    assert!((50000..51000).contains(&data_addr.port()));
}

#[tokio::test]
async fn test_missing_file_reports_not_found() {
    let server = start_server(Config::default(), &[]).await;
    let output = tempfile::tempdir().unwrap();
    let client = Client::new(client_socket().await, server.addr, client_config(&output, 200))
        .with_progress(Arc::new(NullProgress));

    let result = client.download("missing.bin").await;
    assert!(matches!(result, Err(Error::NotFound { ref filename }) if filename == "missing.bin"));
    assert!(!output.path().join("missing.bin").exists());
    assert_eq!(server.stats.snapshot().not_found, 1);
}

#[tokio::test]
async fn test_lost_response_is_retried_with_doubled_timeout() {
    let data = pattern(2500);
    let server = start_server(Config::default(), &[("a.bin", &data[..])]).await;
    let output = tempfile::tempdir().unwrap();

    // 수신 #0 = OK, #1 = 첫 GET 응답
    let transport = RecordingTransport::new(
        LossyTransport::new(client_socket().await).drop_receives([1]),
    );
    let client = Client::new(transport, server.addr, client_config(&output, 200))
        .with_progress(Arc::new(NullProgress));

    let report = client.download("a.bin").await.unwrap();
    assert_eq!(std::fs::read(&report.path).unwrap(), data);
    assert!(report.stats.retransmits >= 1);
    assert_eq!(client.transport().inner().dropped(), 1);

    let timeouts = client.transport().timeouts();
    assert_eq!(timeouts[1], Duration::from_millis(200));
    assert_eq!(timeouts[2], Duration::from_millis(400));

    let first_get = "FILE a.bin GET START 0 END 999";
    let sends = client
        .transport()
        .sent()
        .iter()
        .filter(|(_, payload)| &payload[..] == first_get.as_bytes())
        .count();
    assert_eq!(sends, 2);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    // 응답하지 않는 서버
    let silent = client_socket().await;
    let output = tempfile::tempdir().unwrap();
    let client = Client::new(
        RecordingTransport::new(client_socket().await),
        silent.local_addr().unwrap(),
        client_config(&output, 10),
    )
    .with_progress(Arc::new(NullProgress));

    let result = client.download("a.bin").await;
    match result {
        Err(Error::RequestTimeout { payload }) => assert_eq!(payload, "DOWNLOAD a.bin"),
        other => panic!("unexpected: {:?}", other),
    }

    assert_eq!(client.transport().sent().len(), 6);
    assert_eq!(
        client.transport().timeouts(),
        [10, 20, 40, 80, 160, 320].map(Duration::from_millis).to_vec()
    );
    assert!(!output.path().join("a.bin").exists());
}

#[tokio::test]
async fn test_periodic_send_loss_still_completes() {
    let data = pattern(5000);
    let server = start_server(Config::default(), &[("big.bin", &data[..])]).await;
    let output = tempfile::tempdir().unwrap();

    let transport = LossyTransport::new(client_socket().await).drop_every_nth_send(3);
    let client = Client::new(transport, server.addr, client_config(&output, 50))
        .with_progress(Arc::new(NullProgress));

    let report = client.download("big.bin").await.unwrap();
    assert_eq!(std::fs::read(&report.path).unwrap(), data);
    assert!(client.transport().dropped() >= 2);
    assert!(client.retransmits() >= 2);
}

#[tokio::test]
async fn test_batch_continues_after_failure() {
    let a = pattern(1500);
    let b = pattern(10);
    let server = start_server(Config::default(), &[("a.bin", &a[..]), ("b.bin", &b[..])]).await;
    let output = tempfile::tempdir().unwrap();
    let client = Client::new(client_socket().await, server.addr, client_config(&output, 200))
        .with_progress(Arc::new(NullProgress));

    let report = client
        .download_all(["a.bin", "missing.bin", "bad name", "b.bin"])
        .await;

    let names: Vec<&str> = report.outcomes.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["a.bin", "missing.bin", "bad name", "b.bin"]);
    assert_eq!(report.succeeded().count(), 2);

    let failures: Vec<_> = report.failed().collect();
    assert!(matches!(failures[0], ("missing.bin", Error::NotFound { .. })));
    assert!(matches!(failures[1], ("bad name", Error::InvalidFilename(_))));

    assert_eq!(std::fs::read(output.path().join("a.bin")).unwrap(), a);
    assert_eq!(std::fs::read(output.path().join("b.bin")).unwrap(), b);
}

#[tokio::test]
async fn test_empty_file_downloads_without_gets() {
    let server = start_server(Config::default(), &[("empty.bin", &b""[..])]).await;
    let output = tempfile::tempdir().unwrap();
    let client = Client::new(
        RecordingTransport::new(client_socket().await),
        server.addr,
        client_config(&output, 500),
    )
    .with_progress(Arc::new(NullProgress));

    let report = client.download("empty.bin").await.unwrap();
    assert_eq!(report.size, 0);
    assert!(std::fs::read(output.path().join("empty.bin")).unwrap().is_empty());
    assert_eq!(
        distinct_sent(client.transport()),
        vec!["DOWNLOAD empty.bin", "FILE empty.bin CLOSE"]
    );
}

#[tokio::test]
async fn test_atomic_writes_leave_no_part_file() {
    let data = pattern(3000);
    let server = start_server(Config::default(), &[("a.bin", &data[..])]).await;
    let output = tempfile::tempdir().unwrap();
    let config = Config {
        atomic_writes: true,
        ..client_config(&output, 200)
    };
    let client = Client::new(client_socket().await, server.addr, config)
        .with_progress(Arc::new(NullProgress));

    let report = client.download("a.bin").await.unwrap();
    assert_eq!(report.path, output.path().join("a.bin"));
    assert_eq!(std::fs::read(&report.path).unwrap(), data);
    assert!(!output.path().join("a.bin.part").exists());
}

#[tokio::test]
async fn test_session_cap_reports_no_port_available() {
    let data = pattern(100);
    let config = Config {
        max_sessions: 1,
        ..Config::default()
    };
    let server = start_server(config, &[("a.bin", &data[..])]).await;

    // 세션 하나를 열어 둔 채로 유지
    let holder = client_socket().await;
    Transport::send_to(&holder, &ControlRequest::download("a.bin").to_bytes(), server.addr)
        .await
        .unwrap();
    assert!(holder
        .recv_timeout(Duration::from_secs(1))
        .await
        .unwrap()
        .is_some());

    let output = tempfile::tempdir().unwrap();
    let client = Client::new(client_socket().await, server.addr, client_config(&output, 200))
        .with_progress(Arc::new(NullProgress));
    let result = client.download("a.bin").await;
    assert!(matches!(result, Err(Error::NoPortAvailable { .. })));
    assert!(!output.path().join("a.bin").exists());
}

#[tokio::test]
async fn test_malformed_control_datagram_is_ignored() {
    let data = pattern(1200);
    let server = start_server(Config::default(), &[("a.bin", &data[..])]).await;

    let junk = client_socket().await;
    for payload in [&b"GARBAGE"[..], b"", b"\xff\xfe", b"DOWNLOAD a.bin extra"] {
        Transport::send_to(&junk, payload, server.addr).await.unwrap();
    }
    assert!(junk
        .recv_timeout(Duration::from_millis(200))
        .await
        .unwrap()
        .is_none());

    let output = tempfile::tempdir().unwrap();
    let client = Client::new(client_socket().await, server.addr, client_config(&output, 200))
        .with_progress(Arc::new(NullProgress));
    let report = client.download("a.bin").await.unwrap();
    assert_eq!(std::fs::read(&report.path).unwrap(), data);
    assert_eq!(server.stats.snapshot().malformed_dropped, 4);
}

#[tokio::test]
async fn test_pinned_server_still_serves_initiator() {
    let data = pattern(2100);
    let config = Config {
        pin_peer: true,
        session_idle_timeout_ms: Some(5_000),
        ..Config::default()
    };
    let server = start_server(config, &[("a.bin", &data[..])]).await;
    let output = tempfile::tempdir().unwrap();
    let client = Client::new(client_socket().await, server.addr, client_config(&output, 200))
        .with_progress(Arc::new(NullProgress));

    let report = client.download("a.bin").await.unwrap();
    assert_eq!(std::fs::read(&report.path).unwrap(), data);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = server.stats.snapshot();
    assert_eq!(stats.sessions_closed, 1);
    assert!(stats.bytes_served >= 2100);
}

#[tokio::test]
async fn test_stray_chunk_request_on_control_port_is_dropped() {
    let server = start_server(Config::default(), &[("a.bin", &b"abc"[..])]).await;
    let socket = client_socket().await;
    Transport::send_to(&socket, &ChunkRequest::close("a.bin").to_bytes(), server.addr)
        .await
        .unwrap();
    assert!(socket
        .recv_timeout(Duration::from_millis(200))
        .await
        .unwrap()
        .is_none());
    assert_eq!(server.stats.snapshot().malformed_dropped, 1);
}

#[derive(Default)]
struct CollectingProgress {
    events: Mutex<Vec<String>>,
}

impl ProgressReporter for CollectingProgress {
    fn report(&self, filename: &str, event: ProgressEvent) {
        let kind = match event {
            ProgressEvent::Started { .. } => "started",
            ProgressEvent::Chunk { .. } => "chunk",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Failed { .. } => "failed",
        };
        self.events.lock().push(format!("{} {}", filename, kind));
    }
}

#[tokio::test]
async fn test_progress_events_follow_download() {
    let server = start_server(Config::default(), &[("a.bin", &pattern(1500)[..])]).await;
    let output = tempfile::tempdir().unwrap();
    let progress = Arc::new(CollectingProgress::default());
    let client = Client::new(client_socket().await, server.addr, client_config(&output, 200))
        .with_progress(progress.clone());

    client.download_all(["a.bin", "nope.bin"]).await;

    assert_eq!(
        *progress.events.lock(),
        vec![
            "a.bin started",
            "a.bin chunk",
            "a.bin chunk",
            "a.bin completed",
            "nope.bin failed",
        ]
    );
}

/// 첫 블록 응답을 받은 직후, 늦게 도착한 중복과 범위를 넘는 위조 응답을 끼워 넣는 전송
struct ReplayingTransport<T> {
    inner: T,
    injected: Mutex<VecDeque<Datagram>>,
    armed: Mutex<bool>,
    replayed: Mutex<usize>,
}

impl<T: Transport> ReplayingTransport<T> {
    fn new(inner: T) -> Self {
        Self {
            inner,
            injected: Mutex::new(VecDeque::new()),
            armed: Mutex::new(true),
            replayed: Mutex::new(0),
        }
    }

    fn arm(&self, datagram: &Datagram) {
        let Ok(ChunkResponse::Data { filename, start: 0, end, .. }) =
            ChunkResponse::from_bytes(&datagram.payload)
        else {
            return;
        };
        let mut armed = self.armed.lock();
        if !*armed {
            return;
        }
        *armed = false;

        // 다음 블록 시작에서 시작하지만 요청 범위보다 긴 0 바이트 블록
        let next = end + 1;
        let zeros = vec![0u8; 1500];
        let forged = format!(
            "FILE {} OK START {} END {} DATA {}",
            filename,
            next,
            next + zeros.len() as u64 - 1,
            encode_payload(&zeros)
        );

        let mut injected = self.injected.lock();
        injected.push_back(datagram.clone());
        injected.push_back(Datagram {
            payload: Bytes::from(forged),
            from: datagram.from,
        });
    }
}

#[async_trait]
impl<T: Transport> Transport for ReplayingTransport<T> {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> pft::Result<()> {
        self.inner.send_to(payload, target).await
    }

    async fn recv_timeout(&self, timeout: Duration) -> pft::Result<Option<Datagram>> {
        if let Some(datagram) = self.injected.lock().pop_front() {
            *self.replayed.lock() += 1;
            return Ok(Some(datagram));
        }
        let received = self.inner.recv_timeout(timeout).await?;
        if let Some(datagram) = &received {
            self.arm(datagram);
        }
        Ok(received)
    }

    async fn recv(&self) -> pft::Result<Datagram> {
        let datagram = self.inner.recv().await?;
        self.arm(&datagram);
        Ok(datagram)
    }

    fn local_addr(&self) -> pft::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[tokio::test]
async fn test_stale_and_oversized_responses_are_not_written() {
    let data = pattern(2500);
    let server = start_server(Config::default(), &[("a.bin", &data[..])]).await;
    let output = tempfile::tempdir().unwrap();

    let client = Client::new(
        ReplayingTransport::new(client_socket().await),
        server.addr,
        client_config(&output, 500),
    )
    .with_progress(Arc::new(NullProgress));

    let report = client.download("a.bin").await.unwrap();
    assert_eq!(*client.transport().replayed.lock(), 2);
    assert_eq!(report.stats.chunks_received, 3);
    assert_eq!(report.stats.bytes_received, 2500);
    assert_eq!(std::fs::read(&report.path).unwrap(), data);
}

#[tokio::test]
async fn test_unknown_err_reason_ends_download_without_retry() {
    let fake_server = client_socket().await;
    let fake_addr = fake_server.local_addr().unwrap();
    let responder = tokio::spawn(async move {
        let request = fake_server
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&request.payload[..], b"DOWNLOAD a.bin");
        Transport::send_to(&fake_server, b"ERR a.bin PERMISSION_DENIED", request.from)
            .await
            .unwrap();
    });

    let output = tempfile::tempdir().unwrap();
    let client = Client::new(
        RecordingTransport::new(client_socket().await),
        fake_addr,
        client_config(&output, 500),
    )
    .with_progress(Arc::new(NullProgress));

    let result = client.download("a.bin").await;
    assert!(matches!(
        result,
        Err(Error::Rejected { ref filename, ref reason })
            if filename == "a.bin" && reason == "PERMISSION_DENIED"
    ));
    assert_eq!(client.transport().sent().len(), 1);
    assert_eq!(client.retransmits(), 0);
    assert!(!output.path().join("a.bin").exists());
    responder.await.unwrap();
}
