//! 백업 싱크 -- 설치된 descriptor의 append-only 기록
//!
//! 목 서버 재시작 후 규칙 집합을 재구성하는 데 사용됩니다.
//! 형식은 큐 와이어 형식과 같은 descriptor JSON을 한 줄에 하나씩
//! 기록한 것입니다. 쓰기 실패는 호출자가 로그만 남기고 넘어갑니다
//! (설치 성공을 되돌리지 않음).

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use mockbridge_core::types::MockRuleDescriptor;

use crate::error::LoaderError;

/// append-only 백업 싱크
pub struct BackupSink {
    path: PathBuf,
}

impl BackupSink {
    /// 주어진 경로에 백업 싱크를 만듭니다.
    ///
    /// 부모 디렉토리가 없으면 생성합니다.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| LoaderError::Backup {
                        path: path.display().to_string(),
                        reason: format!("failed to create parent directory: {e}"),
                    })?;
            }
        }
        Ok(Self { path })
    }

    /// descriptor 하나를 파일 끝에 덧붙입니다.
    pub async fn append(&self, descriptor: &MockRuleDescriptor) -> Result<(), LoaderError> {
        let mut line = serde_json::to_string(descriptor).map_err(|e| LoaderError::Backup {
            path: self.path.display().to_string(),
            reason: format!("encode failed: {e}"),
        })?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| LoaderError::Backup {
                path: self.path.display().to_string(),
                reason: format!("open failed: {e}"),
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| LoaderError::Backup {
                path: self.path.display().to_string(),
                reason: format!("write failed: {e}"),
            })?;
        Ok(())
    }

    /// 백업 파일 경로를 반환합니다.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
