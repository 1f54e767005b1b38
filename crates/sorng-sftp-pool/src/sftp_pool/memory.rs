//! In-memory transport: a scripted remote hierarchy with fault injection.
//! Used by the test-suite and for dry runs of traversal filters.

use crate::sftp_pool::error::{SftpPoolError, SftpPoolResult};
use crate::sftp_pool::transport::{ConnectParams, Connector, DirHandle, SftpSession, Transport};
use crate::sftp_pool::types::DirEntry;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Counters observed across every connection made by one connector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: usize,
    pub sessions_opened: usize,
    /// Every path passed to `open_dir`, in call order.
    pub dirs_opened: Vec<String>,
    pub handles_closed: usize,
    pub transports_closed: usize,
    pub sessions_dropped: usize,
}

/// Remote hierarchy description: directory path → entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    dirs: HashMap<String, Vec<DirEntry>>,
    /// Entries per readdir batch; 0 returns the whole directory at once.
    batch_size: usize,
    fail_open: HashSet<String>,
    fail_read: HashSet<String>,
    fail_close: HashSet<String>,
    fail_connect: bool,
    /// `open_session` fails once this many channels exist on a connection.
    session_limit: Option<usize>,
    read_delay: Option<Duration>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir<I>(mut self, path: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = DirEntry>,
    {
        self.dirs.insert(path.to_string(), entries.into_iter().collect());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn fail_open_at(mut self, path: &str) -> Self {
        self.fail_open.insert(path.to_string());
        self
    }

    pub fn fail_read_at(mut self, path: &str) -> Self {
        self.fail_read.insert(path.to_string());
        self
    }

    pub fn fail_close_at(mut self, path: &str) -> Self {
        self.fail_close.insert(path.to_string());
        self
    }

    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn fail_sessions_after(mut self, limit: usize) -> Self {
        self.session_limit = Some(limit);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Connector ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MemoryConnector {
    fs: Arc<MemoryFs>,
    stats: Arc<Mutex<MemoryStats>>,
}

impl MemoryConnector {
    pub fn new(fs: MemoryFs) -> Self {
        Self {
            fs: Arc::new(fs),
            stats: Arc::new(Mutex::new(MemoryStats::default())),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        lock(&self.stats).clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, params: &ConnectParams) -> SftpPoolResult<Arc<dyn Transport>> {
        lock(&self.stats).connects += 1;
        if self.fs.fail_connect {
            return Err(SftpPoolError::connection_failed(format!(
                "TCP connection to {} failed: connection refused",
                params.address()
            )));
        }
        Ok(Arc::new(MemoryTransport {
            fs: self.fs.clone(),
            stats: self.stats.clone(),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

struct MemoryTransport {
    fs: Arc<MemoryFs>,
    stats: Arc<Mutex<MemoryStats>>,
    opened: AtomicUsize,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_session(&self) -> SftpPoolResult<Box<dyn SftpSession>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SftpPoolError::disconnected("Connection closed"));
        }
        if let Some(limit) = self.fs.session_limit {
            if self.opened.load(Ordering::SeqCst) >= limit {
                return Err(SftpPoolError::session_open_failed(
                    "Channel open failure: administratively prohibited",
                ));
            }
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        lock(&self.stats).sessions_opened += 1;
        Ok(Box::new(MemorySession {
            fs: self.fs.clone(),
            stats: self.stats.clone(),
            transport_closed: self.closed.clone(),
            cursors: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            lock(&self.stats).transports_closed += 1;
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

struct MemorySession {
    fs: Arc<MemoryFs>,
    stats: Arc<Mutex<MemoryStats>>,
    transport_closed: Arc<AtomicBool>,
    /// handle id → next entry index
    cursors: Mutex<HashMap<u64, usize>>,
    next_id: AtomicU64,
}

impl MemorySession {
    fn ensure_connected(&self) -> SftpPoolResult<()> {
        if self.transport_closed.load(Ordering::SeqCst) {
            Err(SftpPoolError::disconnected("Connection closed"))
        } else {
            Ok(())
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        lock(&self.stats).sessions_dropped += 1;
    }
}

#[async_trait]
impl SftpSession for MemorySession {
    async fn open_dir(&self, path: &str) -> SftpPoolResult<DirHandle> {
        self.ensure_connected()?;
        lock(&self.stats).dirs_opened.push(path.to_string());
        if self.fs.fail_open.contains(path) || !self.fs.dirs.contains_key(path) {
            return Err(SftpPoolError::no_such_file("No such file").with_path(path));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.cursors).insert(id, 0);
        Ok(DirHandle::new(id, path))
    }

    async fn read_dir(&self, handle: &DirHandle) -> SftpPoolResult<Vec<DirEntry>> {
        if let Some(delay) = self.fs.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_connected()?;
        if self.fs.fail_read.contains(handle.path()) {
            return Err(SftpPoolError::failure("Failure").with_path(handle.path()));
        }
        let entries = self
            .fs
            .dirs
            .get(handle.path())
            .ok_or_else(|| SftpPoolError::no_such_file("No such file").with_path(handle.path()))?;

        let mut cursors = lock(&self.cursors);
        let cursor = cursors
            .get_mut(&handle.id())
            .ok_or_else(|| SftpPoolError::failure("Invalid handle").with_path(handle.path()))?;
        if *cursor >= entries.len() {
            return Err(SftpPoolError::end_of_directory());
        }
        let batch = if self.fs.batch_size == 0 {
            entries.len()
        } else {
            self.fs.batch_size
        };
        let end = (*cursor + batch).min(entries.len());
        let out = entries[*cursor..end].to_vec();
        *cursor = end;
        Ok(out)
    }

    async fn close(&self, handle: DirHandle) -> SftpPoolResult<()> {
        lock(&self.cursors).remove(&handle.id());
        lock(&self.stats).handles_closed += 1;
        if self.fs.fail_close.contains(handle.path()) {
            return Err(SftpPoolError::failure("Failure").with_path(handle.path()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp_pool::types::SftpPoolConfig;

    fn params() -> ConnectParams {
        SftpPoolConfig::default().connect_params()
    }

    #[tokio::test]
    async fn test_reads_in_batches_until_eof() {
        let fs = MemoryFs::new()
            .with_dir(
                "/data",
                vec![
                    DirEntry::file("a", 1),
                    DirEntry::file("b", 2),
                    DirEntry::file("c", 3),
                ],
            )
            .with_batch_size(2);
        let connector = MemoryConnector::new(fs);
        let transport = connector.connect(&params()).await.unwrap();
        let session = transport.open_session().await.unwrap();

        let handle = session.open_dir("/data").await.unwrap();
        assert_eq!(session.read_dir(&handle).await.unwrap().len(), 2);
        assert_eq!(session.read_dir(&handle).await.unwrap().len(), 1);
        assert!(session.read_dir(&handle).await.unwrap_err().is_end_of_directory());
        session.close(handle).await.unwrap();

        let stats = connector.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.sessions_opened, 1);
        assert_eq!(stats.dirs_opened, vec!["/data".to_string()]);
        assert_eq!(stats.handles_closed, 1);
    }

    #[tokio::test]
    async fn test_session_limit_and_close() {
        let connector = MemoryConnector::new(MemoryFs::new().fail_sessions_after(1));
        let transport = connector.connect(&params()).await.unwrap();
        assert!(transport.open_session().await.is_ok());
        assert!(transport.open_session().await.is_err());

        transport.close().await;
        transport.close().await;
        assert_eq!(connector.stats().transports_closed, 1);
        assert!(transport.open_session().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_directory_fails_open() {
        let connector = MemoryConnector::new(MemoryFs::new());
        let transport = connector.connect(&params()).await.unwrap();
        let session = transport.open_session().await.unwrap();
        let err = session.open_dir("/nope").await.unwrap_err();
        assert_eq!(err.path.as_deref(), Some("/nope"));
    }
}
