//! 에러 타입 정의

use thiserror::Error;

/// PFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("base64 디코딩 에러: {0}")]
    Decode(#[from] base64::DecodeError),

    /// 서버에 요청한 파일이 없음 (`ERR <name> NOT_FOUND`)
    #[error("파일 없음: {filename}")]
    NotFound { filename: String },

    /// 서버가 데이터 채널 포트를 할당하지 못함 (`ERR <name> NO_PORT_AVAILABLE`)
    #[error("사용 가능한 포트 없음: {filename}")]
    NoPortAvailable { filename: String },

    /// 재시도 한도 소진
    #[error("요청 타임아웃 (재시도 소진): {payload}")]
    RequestTimeout { payload: String },

    #[error("잘못된 메시지: {0}")]
    MalformedMessage(String),

    /// 와이어 포맷이 공백 구분이므로 공백이 들어간 파일명은 보낼 수 없음
    #[error("유효하지 않은 파일명: {0:?}")]
    InvalidFilename(String),

    /// 서버가 모르는 사유로 거부 (`ERR <name> <reason>`)
    #[error("서버 거부: {filename} ({reason})")]
    Rejected { filename: String, reason: String },

    #[error("설정 에러: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedMessage(message.into())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
