//! 프로토콜 메시지 정의
//!
//! 모든 메시지는 공백으로 구분된 ASCII 텍스트 데이터그램 하나.
//! 데이터그램 경계가 곧 메시지 경계이므로 길이 프리픽스 없음.
//!
//! ```text
//! DOWNLOAD <filename>
//! OK <filename> SIZE <bytes> PORT <port>
//! ERR <filename> <NOT_FOUND|NO_PORT_AVAILABLE>
//! FILE <filename> GET START <u64> END <u64>
//! FILE <filename> OK START <u64> END <u64> DATA <base64>
//! FILE <filename> CLOSE
//! FILE <filename> CLOSE_OK
//! ```

use std::fmt;
use std::str::{FromStr, SplitAsciiWhitespace};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::{Error, Result};

/// 바이트 블록을 텍스트 안전 형태로 인코딩
pub fn encode_payload(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// `DATA` 뒤의 페이로드 디코딩
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded)?)
}

/// 와이어에 실을 수 있는 파일명인지 확인
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() || filename.chars().any(char::is_whitespace) {
        return Err(Error::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

/// 공백 구분 토큰 파서
struct Tokens<'a> {
    inner: SplitAsciiWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::malformed("UTF-8이 아닌 데이터그램"))?;
        Ok(Self {
            inner: text.split_ascii_whitespace(),
        })
    }

    fn word(&mut self, what: &str) -> Result<&'a str> {
        self.inner
            .next()
            .ok_or_else(|| Error::malformed(format!("{} 누락", what)))
    }

    fn keyword(&mut self, expected: &str) -> Result<()> {
        let got = self.word(expected)?;
        if got != expected {
            return Err(Error::malformed(format!(
                "expected {}, got {}",
                expected, got
            )));
        }
        Ok(())
    }

    fn number<T: FromStr>(&mut self, what: &str) -> Result<T> {
        let word = self.word(what)?;
        word.parse()
            .map_err(|_| Error::malformed(format!("{} 숫자 아님: {}", what, word)))
    }

    fn finish(mut self) -> Result<()> {
        match self.inner.next() {
            Some(extra) => Err(Error::malformed(format!("남는 토큰: {}", extra))),
            None => Ok(()),
        }
    }
}

/// 컨트롤 채널 에러 사유
///
/// 모르는 사유도 `Other`로 받음. `ERR` 응답은 사유와 관계없이 최종 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    NotFound,
    NoPortAvailable,
    Other(String),
}

impl ErrorReason {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorReason::NotFound => "NOT_FOUND",
            ErrorReason::NoPortAvailable => "NO_PORT_AVAILABLE",
            ErrorReason::Other(reason) => reason,
        }
    }

    /// 클라이언트 측 에러로 변환
    pub fn into_error(self, filename: String) -> Error {
        match self {
            ErrorReason::NotFound => Error::NotFound { filename },
            ErrorReason::NoPortAvailable => Error::NoPortAvailable { filename },
            ErrorReason::Other(reason) => Error::Rejected { filename, reason },
        }
    }
}

impl From<&str> for ErrorReason {
    fn from(s: &str) -> Self {
        match s {
            "NOT_FOUND" => ErrorReason::NotFound,
            "NO_PORT_AVAILABLE" => ErrorReason::NoPortAvailable,
            other => ErrorReason::Other(other.to_string()),
        }
    }
}

/// 컨트롤 채널 요청 (클라이언트 → 서버)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Download { filename: String },
}

impl ControlRequest {
    pub fn download(filename: impl Into<String>) -> Self {
        ControlRequest::Download {
            filename: filename.into(),
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            ControlRequest::Download { filename } => filename,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut tokens = Tokens::new(bytes)?;
        tokens.keyword("DOWNLOAD")?;
        let filename = tokens.word("filename")?.to_string();
        tokens.finish()?;
        Ok(ControlRequest::Download { filename })
    }
}

impl fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlRequest::Download { filename } => write!(f, "DOWNLOAD {}", filename),
        }
    }
}

/// 컨트롤 채널 응답 (서버 → 클라이언트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Ok {
        filename: String,
        size: u64,
        port: u16,
    },
    Err {
        filename: String,
        reason: ErrorReason,
    },
}

impl ControlResponse {
    pub fn filename(&self) -> &str {
        match self {
            ControlResponse::Ok { filename, .. } | ControlResponse::Err { filename, .. } => {
                filename
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut tokens = Tokens::new(bytes)?;
        let response = match tokens.word("응답 종류")? {
            "OK" => {
                let filename = tokens.word("filename")?.to_string();
                tokens.keyword("SIZE")?;
                let size = tokens.number("SIZE")?;
                tokens.keyword("PORT")?;
                let port = tokens.number("PORT")?;
                ControlResponse::Ok {
                    filename,
                    size,
                    port,
                }
            }
            "ERR" => {
                let filename = tokens.word("filename")?.to_string();
                let reason = ErrorReason::from(tokens.word("reason")?);
                ControlResponse::Err { filename, reason }
            }
            other => {
                return Err(Error::malformed(format!("알 수 없는 컨트롤 응답: {}", other)))
            }
        };
        tokens.finish()?;
        Ok(response)
    }
}

impl fmt::Display for ControlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlResponse::Ok {
                filename,
                size,
                port,
            } => write!(f, "OK {} SIZE {} PORT {}", filename, size, port),
            ControlResponse::Err { filename, reason } => {
                write!(f, "ERR {} {}", filename, reason.as_str())
            }
        }
    }
}

/// 데이터 채널 요청 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOp {
    /// `[start, end]` 범위 요청 (양 끝 포함)
    Get { start: u64, end: u64 },
    Close,
}

/// 데이터 채널 요청 (클라이언트 → 세션)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub filename: String,
    pub op: ChunkOp,
}

impl ChunkRequest {
    pub fn get(filename: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            filename: filename.into(),
            op: ChunkOp::Get { start, end },
        }
    }

    pub fn close(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            op: ChunkOp::Close,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut tokens = Tokens::new(bytes)?;
        tokens.keyword("FILE")?;
        let filename = tokens.word("filename")?.to_string();
        let op = match tokens.word("동작")? {
            "GET" => {
                tokens.keyword("START")?;
                let start = tokens.number("START")?;
                tokens.keyword("END")?;
                let end = tokens.number("END")?;
                if start > end {
                    return Err(Error::malformed(format!(
                        "역전된 범위: START {} END {}",
                        start, end
                    )));
                }
                ChunkOp::Get { start, end }
            }
            "CLOSE" => ChunkOp::Close,
            other => return Err(Error::malformed(format!("알 수 없는 청크 동작: {}", other))),
        };
        tokens.finish()?;
        Ok(Self { filename, op })
    }
}

impl fmt::Display for ChunkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            ChunkOp::Get { start, end } => write!(
                f,
                "FILE {} GET START {} END {}",
                self.filename, start, end
            ),
            ChunkOp::Close => write!(f, "FILE {} CLOSE", self.filename),
        }
    }
}

/// 데이터 채널 응답 (세션 → 클라이언트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResponse {
    /// `end - start + 1 == data.len()` 항상 성립
    Data {
        filename: String,
        start: u64,
        end: u64,
        data: Bytes,
    },
    CloseOk { filename: String },
}

impl ChunkResponse {
    /// 실제로 읽은 바이트로 응답 생성 (범위는 데이터 길이에 맞춰 줄어듦)
    ///
    /// 빈 데이터로는 응답을 만들지 않음
    pub fn data(filename: impl Into<String>, start: u64, data: Bytes) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        let end = start.checked_add(data.len() as u64 - 1)?;
        Some(ChunkResponse::Data {
            filename: filename.into(),
            start,
            end,
            data,
        })
    }

    pub fn close_ok(filename: impl Into<String>) -> Self {
        ChunkResponse::CloseOk {
            filename: filename.into(),
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            ChunkResponse::Data { filename, .. } | ChunkResponse::CloseOk { filename } => filename,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut tokens = Tokens::new(bytes)?;
        tokens.keyword("FILE")?;
        let filename = tokens.word("filename")?.to_string();
        let response = match tokens.word("응답 종류")? {
            "OK" => {
                tokens.keyword("START")?;
                let start: u64 = tokens.number("START")?;
                tokens.keyword("END")?;
                let end: u64 = tokens.number("END")?;
                tokens.keyword("DATA")?;
                let data = decode_payload(tokens.word("DATA")?)?;
                if end < start || (end - start).checked_add(1) != Some(data.len() as u64) {
                    return Err(Error::malformed(format!(
                        "범위 START {} END {}와 데이터 길이 {} 불일치",
                        start,
                        end,
                        data.len()
                    )));
                }
                ChunkResponse::Data {
                    filename,
                    start,
                    end,
                    data: Bytes::from(data),
                }
            }
            "CLOSE_OK" => ChunkResponse::CloseOk { filename },
            other => return Err(Error::malformed(format!("알 수 없는 청크 응답: {}", other))),
        };
        tokens.finish()?;
        Ok(response)
    }
}

impl fmt::Display for ChunkResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkResponse::Data {
                filename,
                start,
                end,
                data,
            } => write!(
                f,
                "FILE {} OK START {} END {} DATA {}",
                filename,
                start,
                end,
                encode_payload(data)
            ),
            ChunkResponse::CloseOk { filename } => write!(f, "FILE {} CLOSE_OK", filename),
        }
    }
}
