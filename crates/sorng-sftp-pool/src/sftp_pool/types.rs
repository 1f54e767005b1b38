// ── Types ─────────────────────────────────────────────────────────────────────

use crate::sftp_pool::error::{SftpPoolError, SftpPoolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_host() -> String {
    "localhost".to_string()
}
fn default_sftp_port() -> u16 {
    22
}
fn default_user() -> String {
    "root".to_string()
}
fn default_max_session_count() -> usize {
    10
}
fn default_false() -> bool {
    false
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_read_batch_size() -> usize {
    128
}

// ── Connection configuration ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpPoolConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub algorithms: Option<AlgorithmPreferences>,
    /// Upper bound on SFTP channels opened over one SSH connection.
    #[serde(default = "default_max_session_count")]
    pub max_session_count: usize,
    /// Keep processing queued operations after a protocol error instead of
    /// stopping the client.
    #[serde(default = "default_false")]
    pub continue_on_error: bool,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    #[serde(default = "default_false")]
    pub use_agent: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub compress: bool,
    /// Entries requested per readdir round-trip.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,
    #[serde(default)]
    pub dispatch_order: DispatchOrder,
    #[serde(default)]
    pub open_failure_policy: OpenFailurePolicy,
}

impl Default for SftpPoolConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_sftp_port(),
            user: default_user(),
            password: None,
            algorithms: None,
            max_session_count: default_max_session_count(),
            continue_on_error: false,
            private_key_path: None,
            private_key_passphrase: None,
            use_agent: false,
            timeout_secs: default_timeout_secs(),
            compress: false,
            read_batch_size: default_read_batch_size(),
            dispatch_order: DispatchOrder::default(),
            open_failure_policy: OpenFailurePolicy::default(),
        }
    }
}

impl SftpPoolConfig {
    /// Parse a camelCase JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> SftpPoolResult<Self> {
        let config: SftpPoolConfig = serde_json::from_str(json)
            .map_err(|e| SftpPoolError::invalid_config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SftpPoolResult<()> {
        if self.host.trim().is_empty() {
            return Err(SftpPoolError::invalid_config("host must not be empty"));
        }
        if self.user.trim().is_empty() {
            return Err(SftpPoolError::invalid_config("user must not be empty"));
        }
        if self.max_session_count == 0 {
            return Err(SftpPoolError::invalid_config(
                "maxSessionCount must be at least 1",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(SftpPoolError::invalid_config("timeoutSecs must be at least 1"));
        }
        if self.read_batch_size == 0 {
            return Err(SftpPoolError::invalid_config(
                "readBatchSize must be at least 1",
            ));
        }
        Ok(())
    }

    /// Parameters handed to the transport when the client starts.
    pub fn connect_params(&self) -> crate::sftp_pool::transport::ConnectParams {
        crate::sftp_pool::transport::ConnectParams {
            host: self.host.clone(),
            port: self.port,
            username: self.user.clone(),
            password: self.password.clone(),
            algorithms: self.algorithms.clone(),
            private_key_path: self.private_key_path.clone(),
            private_key_passphrase: self.private_key_passphrase.clone(),
            use_agent: self.use_agent,
            timeout_secs: self.timeout_secs,
            compress: self.compress,
            read_batch_size: self.read_batch_size,
        }
    }
}

/// Transport algorithm overrides, most preferred first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmPreferences {
    #[serde(default)]
    pub kex: Vec<String>,
    #[serde(default)]
    pub server_host_key: Vec<String>,
    #[serde(default)]
    pub cipher: Vec<String>,
    #[serde(default)]
    pub hmac: Vec<String>,
    #[serde(default)]
    pub compress: Vec<String>,
}

/// Order in which queued operations receive released sessions.
///
/// `Lifo` favours the most recently issued request (a traversal's newest
/// subdirectory runs next); `Fifo` serves requests in submission order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DispatchOrder {
    #[default]
    Lifo,
    Fifo,
}

/// What a listing does with its session when the directory cannot be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpenFailurePolicy {
    /// Hand the session back to the scheduler.
    #[default]
    Release,
    /// Drop the session; its slot stays consumed until the next connection.
    Retire,
}

// ── Client lifecycle ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientState {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Stopped => write!(f, "stopped"),
            ClientState::Starting => write!(f, "starting"),
            ClientState::Running => write!(f, "running"),
        }
    }
}

// ── Directory entries ────────────────────────────────────────────────────────

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFSOCK: u32 = 0o140000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    Unknown,
}

impl EntryKind {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => EntryKind::Directory,
            S_IFREG => EntryKind::File,
            S_IFLNK => EntryKind::Symlink,
            S_IFBLK => EntryKind::BlockDevice,
            S_IFCHR => EntryKind::CharDevice,
            S_IFIFO => EntryKind::Fifo,
            S_IFSOCK => EntryKind::Socket,
            _ => EntryKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttrs {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
}

/// One readdir result. `kind` is decoded from `attrs.mode` at construction,
/// including when deserialised; a `kind` field in the input is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "DirEntryFields")]
pub struct DirEntry {
    pub filename: String,
    pub longname: String,
    pub attrs: FileAttrs,
    kind: EntryKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirEntryFields {
    filename: String,
    longname: String,
    attrs: FileAttrs,
}

impl From<DirEntryFields> for DirEntry {
    fn from(fields: DirEntryFields) -> Self {
        Self::new(fields.filename, fields.longname, fields.attrs)
    }
}

impl DirEntry {
    pub fn new(filename: impl Into<String>, longname: impl Into<String>, attrs: FileAttrs) -> Self {
        let kind = EntryKind::from_mode(attrs.mode);
        Self {
            filename: filename.into(),
            longname: longname.into(),
            attrs,
            kind,
        }
    }

    /// Build an entry whose long name is synthesised `ls -l` style.
    pub fn from_attrs(filename: impl Into<String>, attrs: FileAttrs) -> Self {
        let filename = filename.into();
        let longname = format_longname(&filename, &attrs);
        Self::new(filename, longname, attrs)
    }

    pub fn file(filename: impl Into<String>, size: u64) -> Self {
        Self::from_attrs(
            filename,
            FileAttrs {
                mode: S_IFREG | 0o644,
                size,
                ..FileAttrs::default()
            },
        )
    }

    pub fn directory(filename: impl Into<String>) -> Self {
        Self::from_attrs(
            filename,
            FileAttrs {
                mode: S_IFDIR | 0o755,
                size: 4096,
                ..FileAttrs::default()
            },
        )
    }

    pub fn symlink(filename: impl Into<String>) -> Self {
        Self::from_attrs(
            filename,
            FileAttrs {
                mode: S_IFLNK | 0o777,
                ..FileAttrs::default()
            },
        )
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    pub fn is_hidden(&self) -> bool {
        self.filename.starts_with('.')
    }
}

/// rwx bits per class, with the special bit that replaces execute and the
/// letter shown for it.
const PERMISSION_CLASSES: [(u32, u32, u32, u32, char); 3] = [
    (0o400, 0o200, 0o100, 0o4000, 's'),
    (0o040, 0o020, 0o010, 0o2000, 's'),
    (0o004, 0o002, 0o001, 0o1000, 't'),
];

fn type_char(mode: u32) -> char {
    match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        S_IFBLK => 'b',
        S_IFCHR => 'c',
        _ => '-',
    }
}

pub(crate) fn format_permissions(mode: u32) -> String {
    let bit = |mask: u32, c: char| if mode & mask != 0 { c } else { '-' };
    let mut out = String::with_capacity(10);
    out.push(type_char(mode));
    for (read, write, exec, special, letter) in PERMISSION_CLASSES {
        out.push(bit(read, 'r'));
        out.push(bit(write, 'w'));
        out.push(match (mode & special != 0, mode & exec != 0) {
            (true, true) => letter,
            (true, false) => letter.to_ascii_uppercase(),
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    out
}

/// `drwxr-xr-x    1 0        0            4096 Mar  2 21:28 name`
pub(crate) fn format_longname(filename: &str, attrs: &FileAttrs) -> String {
    let modified = DateTime::<Utc>::from_timestamp(attrs.mtime as i64, 0)
        .map(|t| t.format("%b %e %H:%M").to_string())
        .unwrap_or_else(|| "Jan  1 00:00".to_string());
    format!(
        "{} {:>4} {:<8} {:<8} {:>8} {} {}",
        format_permissions(attrs.mode),
        1,
        attrs.uid,
        attrs.gid,
        attrs.size,
        modified,
        filename
    )
}

// ── Listing / traversal options ──────────────────────────────────────────────

/// Per-entry predicate for a flat listing.
pub type EntryFilter = Arc<dyn Fn(&DirEntry) -> bool + Send + Sync>;
/// Per-entry sink for a flat listing.
pub type EntryCollector = Arc<dyn Fn(&DirEntry) + Send + Sync>;
/// Predicate receiving the parent directory path and the entry.
pub type PathFilter = Arc<dyn Fn(&str, &DirEntry) -> bool + Send + Sync>;
/// Sink receiving the parent directory path and the entry.
pub type PathCollector = Arc<dyn Fn(&str, &DirEntry) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ListOptions {
    /// Entries for which this returns `false` never reach the collector.
    pub filter: Option<EntryFilter>,
    /// Defaults to printing the entry's long name on stdout.
    pub collector: Option<EntryCollector>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&DirEntry) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_collector<F>(mut self, collector: F) -> Self
    where
        F: Fn(&DirEntry) + Send + Sync + 'static,
    {
        self.collector = Some(Arc::new(collector));
        self
    }
}

impl fmt::Debug for ListOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListOptions")
            .field("filter", &self.filter.is_some())
            .field("collector", &self.collector.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct TraverseOptions {
    /// Directories for which this returns `true` are descended into.
    pub traverse_filter: Option<PathFilter>,
    /// Files (and directories, with `collect_directory`) for which this
    /// returns `true` are passed to the collector.
    pub collect_filter: Option<PathFilter>,
    /// Defaults to logging the entry's full path.
    pub collector: Option<PathCollector>,
    pub collect_directory: bool,
}

impl TraverseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_traverse_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, &DirEntry) -> bool + Send + Sync + 'static,
    {
        self.traverse_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_collect_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, &DirEntry) -> bool + Send + Sync + 'static,
    {
        self.collect_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_collector<F>(mut self, collector: F) -> Self
    where
        F: Fn(&str, &DirEntry) + Send + Sync + 'static,
    {
        self.collector = Some(Arc::new(collector));
        self
    }

    pub fn collect_directories(mut self, collect: bool) -> Self {
        self.collect_directory = collect;
        self
    }
}

impl fmt::Debug for TraverseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraverseOptions")
            .field("traverse_filter", &self.traverse_filter.is_some())
            .field("collect_filter", &self.collect_filter.is_some())
            .field("collector", &self.collector.is_some())
            .field("collect_directory", &self.collect_directory)
            .finish()
    }
}

// ── Stats & events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub state: ClientState,
    pub idle_sessions: usize,
    pub pending_operations: usize,
    pub leased_sessions: usize,
    pub sessions_created: usize,
    pub max_sessions: usize,
    /// Bumped on every start / stop; leases from older generations are
    /// discarded on release.
    pub generation: u64,
    pub connected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ClientEvent {
    /// Warm-up finished and queued work is being dispatched.
    Ready { sessions: usize },
    /// A protocol error reached the shared error handler.
    Error { error: SftpPoolError },
    /// Connecting or warming up failed; the client is stopped again.
    TransportFailed { error: SftpPoolError },
    /// A listing could not open its directory and was abandoned.
    ListingAbandoned { path: String, error: SftpPoolError },
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SftpPoolConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 22);
        assert_eq!(config.user, "root");
        assert_eq!(config.max_session_count, 10);
        assert!(!config.continue_on_error);
        assert_eq!(config.dispatch_order, DispatchOrder::Lifo);
        assert_eq!(config.open_failure_policy, OpenFailurePolicy::Release);
    }

    #[test]
    fn test_from_json_camel_case() {
        let config = SftpPoolConfig::from_json(
            r#"{
                "host": "files.example.com",
                "maxSessionCount": 3,
                "continueOnError": true,
                "dispatchOrder": "fifo",
                "algorithms": { "cipher": ["aes128-ctr"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.host, "files.example.com");
        assert_eq!(config.port, 22);
        assert_eq!(config.user, "root");
        assert_eq!(config.max_session_count, 3);
        assert!(config.continue_on_error);
        assert_eq!(config.dispatch_order, DispatchOrder::Fifo);
        let algorithms = config.algorithms.unwrap();
        assert_eq!(algorithms.cipher, vec!["aes128-ctr".to_string()]);
        assert!(algorithms.kex.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_sessions() {
        let err = SftpPoolConfig::from_json(r#"{ "maxSessionCount": 0 }"#).unwrap_err();
        assert_eq!(err.kind, crate::sftp_pool::SftpErrorKind::InvalidConfig);
    }

    #[test]
    fn test_entry_kind_from_mode() {
        assert_eq!(EntryKind::from_mode(0o040755), EntryKind::Directory);
        assert_eq!(EntryKind::from_mode(0o100644), EntryKind::File);
        assert_eq!(EntryKind::from_mode(0o120777), EntryKind::Symlink);
        assert_eq!(EntryKind::from_mode(0o060660), EntryKind::BlockDevice);
        assert_eq!(EntryKind::from_mode(0o020620), EntryKind::CharDevice);
        assert_eq!(EntryKind::from_mode(0o010644), EntryKind::Fifo);
        assert_eq!(EntryKind::from_mode(0o140755), EntryKind::Socket);
        assert_eq!(EntryKind::from_mode(0o000644), EntryKind::Unknown);
    }

    #[test]
    fn test_entry_constructors_decode_kind() {
        assert!(DirEntry::directory("x").is_directory());
        assert!(DirEntry::file("y.txt", 3).is_file());
        assert!(DirEntry::symlink("l").is_symlink());
        assert!(DirEntry::file(".profile", 1).is_hidden());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(ClientEvent::Ready { sessions: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "ready", "sessions": 2 }));

        let json = serde_json::to_value(ClientEvent::ListingAbandoned {
            path: "/gone".to_string(),
            error: SftpPoolError::no_such_file("No such file"),
        })
        .unwrap();
        assert_eq!(json["type"], "listingAbandoned");
        assert_eq!(json["error"]["kind"], "NoSuchFile");
    }

    #[test]
    fn test_longname_format() {
        let entry = DirEntry::directory("abc");
        assert!(entry.longname.starts_with("drwxr-xr-x"));
        assert!(entry.longname.ends_with(" abc"));
        assert_eq!(format_permissions(0o104755), "-rwsr-xr-x");
        assert_eq!(format_permissions(0o041777), "drwxrwxrwt");
        assert_eq!(format_permissions(0o041776), "drwxrwxrwT");
        assert_eq!(format_permissions(0o102640), "-rw-r-S---");
        assert_eq!(format_permissions(0o010600), "prw-------");
    }

    #[test]
    fn test_deserialized_entry_kind_follows_mode() {
        let json = serde_json::json!({
            "filename": "etc",
            "longname": "drwxr-xr-x    1 0        0            4096 Jan  1 00:00 etc",
            "attrs": { "mode": 0o040755, "uid": 0, "gid": 0, "size": 4096, "atime": 0, "mtime": 0 },
            "kind": "file"
        });
        let entry: DirEntry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.kind(), EntryKind::Directory);
        assert!(entry.is_directory());

        let encoded = serde_json::to_value(DirEntry::symlink("l")).unwrap();
        let decoded: DirEntry = serde_json::from_value(encoded).unwrap();
        assert!(decoded.is_symlink());
    }
}
