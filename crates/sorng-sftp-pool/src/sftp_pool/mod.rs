// ── sorng-sftp-pool / sftp_pool module ───────────────────────────────────────
//
// Session-pooled SFTP client providing:
//   • Pluggable transport (libssh2 via `ssh2`, or the in-memory adapter)
//   • Session pool with sequential warm-up up to the configured cap
//   • Operation queue + scheduler binding queued work to released sessions
//   • Directory lister (open → batched readdir → close → release)
//   • Recursive traversal engine driven through the lister's collector
//   • Shared error policy (`continueOnError`) and a broadcast event channel

pub mod types;
pub mod error;
pub mod transport;
pub mod ssh;
pub mod memory;
mod pool;
mod queue;
pub mod scheduler;
mod lister;
pub mod traverse;
pub mod filters;
pub mod client;

pub use types::*;
pub use error::{SftpErrorKind, SftpPoolError, SftpPoolResult};
pub use transport::{ConnectParams, Connector, DirHandle, SftpSession, Transport};
pub use ssh::Ssh2Connector;
pub use memory::{MemoryConnector, MemoryFs, MemoryStats};
pub use scheduler::{Operation, SessionLease};
pub use traverse::child_path;
pub use client::SftpPoolClient;
