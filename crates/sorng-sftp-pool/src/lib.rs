//! # SortOfRemote NG – SFTP session pool
//!
//! Bounded-concurrency SFTP directory access over one SSH connection:
//!   • Lazily warmed pool of SFTP channels capped at `maxSessionCount`
//!   • Operation queue drained as channels are released (LIFO by default)
//!   • Batched directory listing with per-entry filter / collector hooks
//!   • Recursive traversal with independent traverse / collect filters
//!   • Structured client events (ready, error, transport failure, stop)

pub mod sftp_pool;
