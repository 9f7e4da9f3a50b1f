//! PFT 서버
//!
//! 루트 디렉터리의 파일을 UDP 컨트롤 채널로 서빙
//!
//! 사용법:
//!   cargo run --release --bin pft-server -- <PORT> [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉터리 서빙
//!   cargo run --release --bin pft-server -- 9000
//!
//!   # 디렉터리 지정 + 세션 10분 유휴 타임아웃
//!   cargo run --release --bin pft-server -- 9000 --root ./files --idle-timeout 600000

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pft::{Config, Error, Server};

const USAGE: &str = r#"PFT Server - Pull File Transfer 서버

사용법:
  pft-server <PORT> [OPTIONS]

옵션:
  --root <DIR>            서빙할 디렉터리 (기본: .)
  --bind-ip <IP>          바인드 IP (기본: 0.0.0.0)
  --max-sessions <N>      동시 세션 상한 (기본: 0 = 무제한)
  --idle-timeout <MS>     세션 유휴 타임아웃 (기본: 없음)
  --pin-peer              DOWNLOAD를 보낸 주소의 청크 요청만 처리
  -v, --verbose           debug 로그 출력
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG로도 지정 가능
"#;

/// 서버 실행 설정
struct ServerArgs {
    bind_addr: SocketAddr,
    verbose: bool,
    config: Config,
}

fn parse_args() -> Result<ServerArgs, Error> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port: Option<u16> = None;
    let mut bind_ip = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let mut verbose = false;
    let mut config = Config::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--root" => {
                config.root_dir = PathBuf::from(value(&args, i)?);
                i += 1;
            }
            "--bind-ip" => {
                bind_ip = parse(value(&args, i)?, "IP 주소")?;
                i += 1;
            }
            "--max-sessions" => {
                config.max_sessions = parse(value(&args, i)?, "숫자")?;
                i += 1;
            }
            "--idle-timeout" => {
                config.session_idle_timeout_ms = Some(parse(value(&args, i)?, "밀리초")?);
                i += 1;
            }
            "--pin-peer" => config.pin_peer = true,
            "--verbose" | "-v" => verbose = true,
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other if port.is_none() && !other.starts_with('-') => {
                port = Some(parse(other, "포트")?);
            }
            other => return Err(Error::Config(format!("알 수 없는 인자: {}", other))),
        }
        i += 1;
    }

    let port = port.ok_or_else(|| Error::Config("포트 번호 필요".into()))?;
    Ok(ServerArgs {
        bind_addr: SocketAddr::new(bind_ip, port),
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
    let server_args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    // 로깅 설정
    let default_level = if server_args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = server_args.config;
    info!("Root directory: {:?}", config.root_dir);
    info!(
        "Data ports: {}..{} | Max sessions: {} | Idle timeout: {:?} | Pin peer: {}",
        config.port_min,
        config.port_max,
        config.max_sessions,
        config.session_idle_timeout(),
        config.pin_peer
    );

    let server = Server::bind(server_args.bind_addr, config).await?;
    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C 수신, 종료");
            }
        })
        .await?;

    Ok(())
}
