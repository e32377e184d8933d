//! Log agents: a directory on the local filesystem, and an in-memory set of
//! files for tests and manifest-described clusters.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use scry_sources::{LogAgent, SourceError, SourceResult};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

fn check_name(filename: &str) -> SourceResult<()> {
    if filename.is_empty() || filename.contains('/') || filename.contains('\\') || filename == "." || filename == ".." {
        return Err(SourceError::Failed(format!("invalid log file name {:?}", filename)));
    }
    Ok(())
}

/// A reader positioned past the end means the file shrank under it
/// (truncated or rotated); there is no offset left to resume from.
fn check_offset(filename: &str, offset: u64, len: u64) -> SourceResult<()> {
    if offset > len {
        return Err(SourceError::Failed(format!("{} was truncated to {} bytes, reader was at {}", filename, len, offset)));
    }
    Ok(())
}

/// Serves plain files directly under `root` (no recursion).
#[derive(Debug, Clone)]
pub struct DirLogAgent {
    root: PathBuf,
}

impl DirLogAgent {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl LogAgent for DirLogAgent {
    async fn list_files(&self) -> SourceResult<Vec<String>> {
        let mut rd = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", self.root.display(), e)))?;
        let mut out = Vec::new();
        loop {
            let entry = match rd.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => return Err(SourceError::Failed(e.to_string())),
            };
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                out.push(name.to_string());
            }
        }
        Ok(out)
    }

    async fn read_chunk(&self, filename: &str, offset: u64, max: usize) -> SourceResult<Bytes> {
        check_name(filename)?;
        let path = self.root.join(filename);
        let mut f = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::Failed(format!("no such file: {}", filename)),
            _ => SourceError::Unavailable(format!("{}: {}", path.display(), e)),
        })?;
        let len = f.metadata().await.map_err(|e| SourceError::Failed(e.to_string()))?.len();
        check_offset(filename, offset, len)?;
        f.seek(SeekFrom::Start(offset)).await.map_err(|e| SourceError::Failed(e.to_string()))?;
        let mut buf = vec![0u8; max];
        let n = f.read(&mut buf).await.map_err(|e| SourceError::Failed(e.to_string()))?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }
}

/// In-memory files with an on/off reachability switch.
#[derive(Debug, Default)]
pub struct MemoryLogAgent {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    unreachable: AtomicBool,
}

impl MemoryLogAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, name: impl Into<String>, content: impl AsRef<[u8]>) -> Self {
        self.append(name, content);
        self
    }

    pub fn append(&self, name: impl Into<String>, content: impl AsRef<[u8]>) {
        if let Ok(mut files) = self.files.write() {
            files.entry(name.into()).or_default().extend_from_slice(content.as_ref());
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        self.files.write().map(|mut f| f.remove(name).is_some()).unwrap_or(false)
    }

    pub fn set_reachable(&self, on: bool) {
        self.unreachable.store(!on, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> SourceResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("log agent unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogAgent for MemoryLogAgent {
    async fn list_files(&self) -> SourceResult<Vec<String>> {
        self.check_reachable()?;
        let files = self.files.read().map_err(|_| SourceError::Failed("log agent state poisoned".into()))?;
        Ok(files.keys().cloned().collect())
    }

    async fn read_chunk(&self, filename: &str, offset: u64, max: usize) -> SourceResult<Bytes> {
        self.check_reachable()?;
        let files = self.files.read().map_err(|_| SourceError::Failed("log agent state poisoned".into()))?;
        let data = files.get(filename).ok_or_else(|| SourceError::Failed(format!("no such file: {}", filename)))?;
        check_offset(filename, offset, data.len() as u64)?;
        let start = offset as usize;
        let end = start.saturating_add(max).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("scry-logs-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dir_agent_lists_and_reads_chunks() {
        let root = temp_root();
        tokio::fs::create_dir_all(root.join("nested")).await.unwrap();
        tokio::fs::write(root.join("raylet.out"), b"one\ntwo\nthree\n").await.unwrap();
        tokio::fs::write(root.join("worker-aa-01-7.err"), b"").await.unwrap();

        let agent = DirLogAgent::new(&root);
        let mut files = agent.list_files().await.unwrap();
        files.sort();
        assert_eq!(files, vec!["raylet.out", "worker-aa-01-7.err"]);

        let c = agent.read_chunk("raylet.out", 4, 4).await.unwrap();
        assert_eq!(&c[..], b"two\n");
        let c = agent.read_chunk("raylet.out", 14, 4).await.unwrap();
        assert!(c.is_empty());
        assert!(agent.read_chunk("missing.log", 0, 4).await.is_err());
        assert!(agent.read_chunk("../etc/passwd", 0, 4).await.is_err());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dir_agent_rejects_offset_past_truncated_file() {
        let root = temp_root();
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(root.join("worker.out"), b"one\ntwo\n").await.unwrap();
        let agent = DirLogAgent::new(&root);
        assert_eq!(agent.read_chunk("worker.out", 0, 64).await.unwrap().len(), 8);

        tokio::fs::write(root.join("worker.out"), b"x\n").await.unwrap();
        match agent.read_chunk("worker.out", 8, 64).await {
            Err(SourceError::Failed(msg)) => assert!(msg.contains("truncated"), "{}", msg),
            other => panic!("expected truncation error, got {:?}", other),
        }
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dir_agent_missing_root_is_unavailable() {
        let agent = DirLogAgent::new(temp_root());
        assert!(matches!(agent.list_files().await, Err(SourceError::Unavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn memory_agent_appends_and_goes_dark() {
        let agent = MemoryLogAgent::new().with_file("a.out", "x\n");
        agent.append("a.out", "y\n");
        assert_eq!(&agent.read_chunk("a.out", 0, 64).await.unwrap()[..], b"x\ny\n");
        assert_eq!(&agent.read_chunk("a.out", 2, 1).await.unwrap()[..], b"y");
        agent.set_reachable(false);
        assert!(matches!(agent.list_files().await, Err(SourceError::Unavailable(_))));
        agent.set_reachable(true);
        assert!(agent.remove("a.out"));
        assert!(agent.list_files().await.unwrap().is_empty());
    }
}
