//! 파일 입출력
//!
//! - 서버: 루트 디렉터리 기준 파일 확인, 크기 조회, 범위 읽기
//! - 클라이언트: 받은 블록을 이어 쓰는 출력 파일

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::{Error, Result};

/// 루트 아래의 상대 경로로만 해석. `..`나 절대 경로는 거부
pub fn safe_relative_path(filename: &str) -> Option<PathBuf> {
    let path = Path::new(filename);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(clean)
}

/// 서빙할 파일
#[derive(Debug, Clone)]
pub struct ServedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// 서버의 파일 루트
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 요청 시점에 존재하는 일반 파일이면 경로와 크기를 돌려줌
    pub async fn resolve(&self, filename: &str) -> Option<ServedFile> {
        let relative = safe_relative_path(filename)?;
        let path = self.root.join(relative);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(ServedFile {
                path,
                size: meta.len(),
            }),
            Ok(_) => None,
            Err(e) => {
                debug!("파일 확인 실패 {:?}: {}", path, e);
                None
            }
        }
    }

    pub async fn open(&self, served: &ServedFile) -> Result<File> {
        Ok(File::open(&served.path).await?)
    }
}

/// `start`부터 최대 `len`바이트 읽기. 파일 끝이면 더 짧게 돌려줌
pub async fn read_range(file: &mut File, start: u64, len: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// 클라이언트 출력 파일
///
/// `atomic`이면 `<name>.part`에 쓰고 `finish`에서 최종 이름으로 rename
pub struct OutputFile {
    file: File,
    write_path: PathBuf,
    final_path: PathBuf,
    written: u64,
}

impl OutputFile {
    pub async fn create(dir: &Path, filename: &str, atomic: bool) -> Result<Self> {
        let relative =
            safe_relative_path(filename).ok_or_else(|| Error::InvalidFilename(filename.into()))?;
        let final_path = dir.join(relative);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let write_path = if atomic {
            let mut name = final_path.as_os_str().to_owned();
            name.push(".part");
            PathBuf::from(name)
        } else {
            final_path.clone()
        };

        let file = File::create(&write_path).await?;
        Ok(Self {
            file,
            write_path,
            final_path,
            written: 0,
        })
    }

    pub async fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.final_path
    }

    /// flush 후 닫음. 임시 이름이면 최종 이름으로 바꿈
    pub async fn finish(mut self) -> Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        if self.write_path != self.final_path {
            fs::rename(&self.write_path, &self.final_path).await?;
        }
        Ok(self.final_path)
    }
}
