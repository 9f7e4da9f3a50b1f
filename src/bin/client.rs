//! PFT 클라이언트
//!
//! 파일 목록을 읽어 한 개씩 순서대로 다운로드
//!
//! 사용법:
//!   cargo run --release --bin pft-client -- <HOST> <PORT> <FILELIST> [OPTIONS]
//!
//! 예시:
//!   # 목록의 파일을 현재 디렉터리로 수신
//!   cargo run --release --bin pft-client -- 127.0.0.1 9000 files.txt
//!
//!   # 손실 시뮬레이션 (보내는 데이터그램 5개 중 하나 버림)
//!   cargo run --release --bin pft-client -- localhost 9000 files.txt -o out --drop-every 5

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pft::{read_file_list, Client, Config, Error, LossyTransport, Transport};

const USAGE: &str = r#"PFT Client - Pull File Transfer 클라이언트

사용법:
  pft-client <HOST> <PORT> <FILELIST> [OPTIONS]

옵션:
  -o, --output <DIR>      저장 디렉터리 (기본: .)
  --atomic                <name>.part에 받고 완료 시 rename
  --block-size <BYTES>    GET 한 번의 요청 크기 (기본: 1000)
  --lossy                 손실 네트워크 프리셋 (재시도 8회, 300ms, 지터)
  --drop-every <N>        보내는 데이터그램 N개마다 하나 버림 (테스트용)
  -v, --verbose           debug 로그 출력
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG로도 지정 가능
"#;

/// 클라이언트 실행 설정
struct ClientArgs {
    host: String,
    port: u16,
    file_list: PathBuf,
    drop_every: Option<u64>,
    verbose: bool,
    config: Config,
}

fn parse_args() -> Result<ClientArgs, Error> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut positional: Vec<&str> = Vec::new();
    let mut drop_every = None;
    let mut verbose = false;
    let mut config = Config::default();
    let mut output_dir = None;
    let mut atomic = false;
    let mut block_size = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--output" | "-o" => {
                output_dir = Some(PathBuf::from(value(&args, i)?));
                i += 1;
            }
            "--atomic" => atomic = true,
            "--block-size" => {
                block_size = Some(parse(value(&args, i)?, "숫자")?);
                i += 1;
            }
            "--lossy" => config = Config::lossy_network(),
            "--drop-every" => {
                drop_every = Some(parse(value(&args, i)?, "숫자")?);
                i += 1;
            }
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other if !other.starts_with('-') => positional.push(other),
            other => return Err(Error::Config(format!("알 수 없는 인자: {}", other))),
        }
        i += 1;
    }

    // --lossy가 뒤에 와도 다른 옵션을 덮어쓰지 않게 마지막에 적용
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }
    config.atomic_writes = atomic;
    if let Some(block_size) = block_size {
        config.block_size = block_size;
    }
    config.validate()?;

    let [host, port, file_list] = positional[..] else {
        return Err(Error::Config("<HOST> <PORT> <FILELIST> 필요".into()));
    };

    Ok(ClientArgs {
        host: host.to_string(),
        port: parse(port, "포트")?,
        file_list: PathBuf::from(file_list),
        drop_every,
        verbose,
        config,
    })
}

fn value(args: &[String], i: usize) -> Result<&str, Error> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| Error::Config(format!("{} 값 필요", args[i])))
}

fn parse<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, Error> {
    raw.parse()
        .map_err(|_| Error::Config(format!("유효한 {} 필요: {}", what, raw)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    // 로깅 설정
    let default_level = if client_args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server_addr: SocketAddr = tokio::net::lookup_host((client_args.host.as_str(), client_args.port))
        .await?
        .next()
        .ok_or_else(|| Error::Config(format!("주소 해석 실패: {}", client_args.host)))?;

    let filenames = read_file_list(&client_args.file_list).await?;
    info!("Server address: {}", server_addr);
    info!(
        "{} files from {:?} -> {:?}",
        filenames.len(),
        client_args.file_list,
        client_args.config.output_dir
    );

    // 서버 주소와 같은 주소 체계로 바인딩
    let bind_addr: SocketAddr = if server_addr.is_ipv6() {
        "[::]:0".parse()?
    } else {
        "0.0.0.0:0".parse()?
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    info!("Bound to local address: {}", socket.local_addr()?);

    let transport: Arc<dyn Transport> = match client_args.drop_every {
        Some(n) => {
            warn!("손실 시뮬레이션: 보내는 데이터그램 {}개마다 1개 버림", n);
            Arc::new(LossyTransport::new(socket).drop_every_nth_send(n))
        }
        None => Arc::new(socket),
    };

    let client = Client::new(transport, server_addr, client_args.config);
    let report = client.download_all(&filenames).await;

    for (filename, outcome) in &report.outcomes {
        match outcome {
            Ok(download) => println!(
                "OK   {} ({} bytes) -> {}",
                filename,
                download.size,
                download.path.display()
            ),
            Err(e) => {
                error!("{} 실패: {}", filename, e);
                println!("FAIL {} ({})", filename, e);
            }
        }
    }
    info!("{} | Retransmits: {}", report.summary(), client.retransmits());

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
