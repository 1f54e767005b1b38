//! SFTP pool error type.

use serde::{Deserialize, Serialize};

/// SFTP status code reported when a readdir has no more entries.
pub const SSH_FX_EOF: u32 = 1;
pub const SSH_FX_NO_SUCH_FILE: u32 = 2;
pub const SSH_FX_PERMISSION_DENIED: u32 = 3;
pub const SSH_FX_FAILURE: u32 = 4;
pub const SSH_FX_NO_CONNECTION: u32 = 6;
pub const SSH_FX_CONNECTION_LOST: u32 = 7;

/// Categorised SFTP pool error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[SFTP {kind:?}] {message}")]
pub struct SftpPoolError {
    pub kind: SftpErrorKind,
    pub message: String,
    /// SFTP status code that triggered the error, if any.
    pub code: Option<u32>,
    /// Remote path the failing operation was working on.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SftpErrorKind {
    /// TCP / DNS / handshake failure.
    ConnectionFailed,
    /// No authentication method succeeded.
    AuthFailed,
    /// The transport refused to open another SFTP channel.
    SessionOpenFailed,
    /// readdir exhausted the directory. Not a failure.
    EndOfDirectory,
    NoSuchFile,
    PermissionDenied,
    /// Generic server-side failure.
    Failure,
    /// Connection dropped or already closed.
    Disconnected,
    InvalidConfig,
    /// The client has no async runtime to run on.
    NotRunning,
    Unknown,
}

pub type SftpPoolResult<T> = Result<T, SftpPoolError>;

// ── Construction helpers ─────────────────────────────────────────────

impl SftpPoolError {
    pub fn new(kind: SftpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            path: None,
        }
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::ConnectionFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::AuthFailed, msg)
    }

    pub fn session_open_failed(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::SessionOpenFailed, msg)
    }

    pub fn end_of_directory() -> Self {
        Self::new(SftpErrorKind::EndOfDirectory, "End of directory").with_code(SSH_FX_EOF)
    }

    pub fn no_such_file(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::NoSuchFile, msg).with_code(SSH_FX_NO_SUCH_FILE)
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Failure, msg).with_code(SSH_FX_FAILURE)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::Disconnected, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::InvalidConfig, msg)
    }

    pub fn not_running(msg: impl Into<String>) -> Self {
        Self::new(SftpErrorKind::NotRunning, msg)
    }

    /// Classify an SFTP status code into the most appropriate error kind.
    pub fn from_status(code: u32, text: &str) -> Self {
        let kind = match code {
            SSH_FX_EOF => SftpErrorKind::EndOfDirectory,
            SSH_FX_NO_SUCH_FILE => SftpErrorKind::NoSuchFile,
            SSH_FX_PERMISSION_DENIED => SftpErrorKind::PermissionDenied,
            SSH_FX_FAILURE => SftpErrorKind::Failure,
            SSH_FX_NO_CONNECTION | SSH_FX_CONNECTION_LOST => SftpErrorKind::Disconnected,
            _ => SftpErrorKind::Unknown,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
            path: None,
        }
    }

    pub fn is_end_of_directory(&self) -> bool {
        self.kind == SftpErrorKind::EndOfDirectory
    }
}
