//! 저장소 (파일시스템 협력자)
//!
//! 프로토콜 경로(`storage/a/b.txt`)를 루트 아래 실제 경로로 변환하고,
//! 핸들러당 파일시스템 작업 하나씩을 수행한다. 소켓은 건드리지 않는다.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{Config, Result};

/// 경로 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// 네임스페이스 기반 저장소
#[derive(Debug, Clone)]
pub struct Storage {
    namespace: String,
    root: PathBuf,
}

impl Storage {
    pub fn new(namespace: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            namespace: namespace.into(),
            root: root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.storage_namespace.clone(), config.storage_root.clone())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 네임스페이스 디렉터리 실제 경로
    pub fn namespace_dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    /// 네임스페이스 디렉터리 생성
    pub async fn ensure_namespace(&self) -> Result<()> {
        fs::create_dir_all(self.namespace_dir()).await?;
        Ok(())
    }

    /// 프로토콜 경로 검증 및 변환
    ///
    /// 첫 컴포넌트가 네임스페이스여야 하고 `..`나 절대 경로는 허용하지 않는다.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        if path.is_empty() || path.starts_with('/') || path.contains('\\') {
            return None;
        }

        let mut components = path.split('/');
        if components.next()? != self.namespace {
            return None;
        }

        let mut resolved = self.namespace_dir();
        for component in components {
            match component {
                "" | "." => continue,
                ".." => return None,
                c => resolved.push(c),
            }
        }
        Some(resolved)
    }

    /// 경로 종류 조회 (없으면 None)
    pub async fn kind(&self, resolved: &Path) -> Option<EntryKind> {
        let meta = fs::metadata(resolved).await.ok()?;
        if meta.is_dir() {
            Some(EntryKind::Directory)
        } else {
            Some(EntryKind::File)
        }
    }

    /// 파일 크기 (내용은 읽지 않음)
    pub async fn file_size(&self, resolved: &Path) -> Result<u64> {
        Ok(fs::metadata(resolved).await?.len())
    }

    /// 파일 쓰기 (부모 디렉터리 생성), 쓰인 크기 반환
    pub async fn write_file(&self, resolved: &Path, bytes: &[u8]) -> Result<u64> {
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(resolved, bytes).await?;
        Ok(fs::metadata(resolved).await?.len())
    }

    /// 파일 읽기
    pub async fn read_file(&self, resolved: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(resolved).await?)
    }

    /// 디렉터리 목록 (정렬, 하위 디렉터리는 `/`로 끝남)
    pub async fn list_dir(&self, resolved: &Path) -> Result<Vec<String>> {
        let mut items = Vec::new();
        let mut dir = fs::read_dir(resolved).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                items.push(format!("{}/", name));
            } else {
                items.push(name);
            }
        }
        items.sort();
        Ok(items)
    }

    /// 파일 또는 디렉터리 트리 삭제
    pub async fn remove(&self, resolved: &Path) -> Result<()> {
        match self.kind(resolved).await {
            Some(EntryKind::Directory) => fs::remove_dir_all(resolved).await?,
            _ => fs::remove_file(resolved).await?,
        }
        Ok(())
    }

    /// 이동 (대상 부모 디렉터리 생성)
    pub async fn relocate(&self, source: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(source, destination).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_outside_namespace() {
        let storage = Storage::new("storage", "/srv");

        assert_eq!(
            storage.resolve("storage/a.txt"),
            Some(PathBuf::from("/srv/storage/a.txt"))
        );
        assert_eq!(storage.resolve("storage/"), Some(PathBuf::from("/srv/storage")));
        assert_eq!(storage.resolve("storage"), Some(PathBuf::from("/srv/storage")));

        assert!(storage.resolve("").is_none());
        assert!(storage.resolve("/etc/passwd").is_none());
        assert!(storage.resolve("etc/passwd").is_none());
        assert!(storage.resolve("storagex/a").is_none());
        assert!(storage.resolve("storage/../etc/passwd").is_none());
        assert!(storage.resolve("storage\\..\\x").is_none());
    }

    #[tokio::test]
    async fn test_file_operations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new("storage", dir.path());
        storage.ensure_namespace().await.unwrap();

        let file = storage.resolve("storage/sub/a.txt").unwrap();
        assert_eq!(storage.write_file(&file, b"hi").await.unwrap(), 2);
        assert_eq!(storage.kind(&file).await, Some(EntryKind::File));
        assert_eq!(storage.read_file(&file).await.unwrap(), b"hi");
        assert_eq!(storage.file_size(&file).await.unwrap(), 2);

        let root = storage.resolve("storage/").unwrap();
        assert_eq!(storage.list_dir(&root).await.unwrap(), vec!["sub/".to_string()]);

        let moved = storage.resolve("storage/other/b.txt").unwrap();
        storage.relocate(&file, &moved).await.unwrap();
        assert!(storage.kind(&file).await.is_none());

        let sub = storage.resolve("storage/other").unwrap();
        storage.remove(&sub).await.unwrap();
        assert!(storage.kind(&moved).await.is_none());
    }
}
