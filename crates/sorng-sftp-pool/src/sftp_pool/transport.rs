// ── Transport seam ───────────────────────────────────────────────────────────
//
// The pool never speaks SSH itself. A `Connector` yields an authenticated
// `Transport`, which opens `SftpSession` channels on demand.

use crate::sftp_pool::error::SftpPoolResult;
use crate::sftp_pool::types::{AlgorithmPreferences, DirEntry};
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a connector needs to reach and authenticate against the host.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub algorithms: Option<AlgorithmPreferences>,
    pub private_key_path: Option<String>,
    pub private_key_passphrase: Option<String>,
    pub use_agent: bool,
    pub timeout_secs: u64,
    pub compress: bool,
    pub read_batch_size: usize,
}

impl ConnectParams {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opaque open-directory handle issued by a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirHandle {
    id: u64,
    path: String,
}

impl DirHandle {
    pub fn new(id: u64, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate. Resolving is the transport's "ready" signal.
    async fn connect(&self, params: &ConnectParams) -> SftpPoolResult<Arc<dyn Transport>>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one more SFTP channel over this connection.
    async fn open_session(&self) -> SftpPoolResult<Box<dyn SftpSession>>;

    /// Close the connection. Every session opened from it becomes unusable.
    async fn close(&self);
}

/// One SFTP channel. Implementations must not yield `.` or `..` entries.
#[async_trait]
pub trait SftpSession: Send + Sync {
    async fn open_dir(&self, path: &str) -> SftpPoolResult<DirHandle>;

    /// Next batch of entries. Exhaustion is reported as an
    /// `EndOfDirectory` error; a batch may be empty.
    async fn read_dir(&self, handle: &DirHandle) -> SftpPoolResult<Vec<DirEntry>>;

    async fn close(&self, handle: DirHandle) -> SftpPoolResult<()>;
}
