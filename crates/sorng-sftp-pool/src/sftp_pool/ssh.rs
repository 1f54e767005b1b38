// ── libssh2 transport (via the `ssh2` crate) ─────────────────────────────────
//
// libssh2 is blocking; every call is pushed onto tokio's blocking pool so the
// scheduler's tasks never stall the runtime.

use crate::sftp_pool::error::{SftpErrorKind, SftpPoolError, SftpPoolResult};
use crate::sftp_pool::transport::{ConnectParams, Connector, DirHandle, SftpSession, Transport};
use crate::sftp_pool::types::{AlgorithmPreferences, DirEntry, FileAttrs};
use async_trait::async_trait;
use log::{debug, info, warn};
use ssh2::{ErrorCode, MethodType, Session};
use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
/// Raised by `libssh2_sftp_readdir` once the directory is exhausted.
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// ── Connector ────────────────────────────────────────────────────────────────

/// Connects with libssh2 over a plain TCP stream.
#[derive(Debug, Clone, Default)]
pub struct Ssh2Connector;

impl Ssh2Connector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for Ssh2Connector {
    async fn connect(&self, params: &ConnectParams) -> SftpPoolResult<Arc<dyn Transport>> {
        let params = params.clone();
        let transport = tokio::task::spawn_blocking(move || Ssh2Transport::establish(&params))
            .await
            .map_err(|e| SftpPoolError::connection_failed(format!("SSH connect task failed: {}", e)))??;
        Ok(Arc::new(transport))
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

pub struct Ssh2Transport {
    session: Session,
    #[allow(dead_code)] // held to keep the TCP connection alive
    tcp: TcpStream,
    address: String,
    read_batch_size: usize,
}

impl Ssh2Transport {
    fn establish(params: &ConnectParams) -> SftpPoolResult<Self> {
        let addr = params.address();
        info!("SFTP pool connecting to {}", addr);

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SftpPoolError::connection_failed(format!("Invalid address '{}': {}", addr, e)))?
            .next()
            .ok_or_else(|| SftpPoolError::connection_failed(format!("'{}' did not resolve", addr)))?;

        let timeout = Duration::from_secs(params.timeout_secs);
        let tcp = TcpStream::connect_timeout(&socket_addr, timeout).map_err(|e| {
            SftpPoolError::connection_failed(format!("TCP connection to {} failed: {}", addr, e))
        })?;
        tcp.set_nonblocking(false)
            .map_err(|e| SftpPoolError::connection_failed(format!("Failed to set blocking mode: {}", e)))?;

        let mut session = Session::new()
            .map_err(|e| SftpPoolError::connection_failed(format!("Failed to create SSH session: {}", e)))?;

        if params.compress {
            session.set_compress(true);
        }
        if let Some(ref algorithms) = params.algorithms {
            apply_algorithms(&session, algorithms)?;
        }

        // Bound only the handshake and authentication; directory I/O is
        // left without a deadline.
        session.set_timeout(params.timeout_secs.saturating_mul(1000).min(u32::MAX as u64) as u32);
        session.set_tcp_stream(
            tcp.try_clone()
                .map_err(|e| SftpPoolError::connection_failed(e.to_string()))?,
        );
        session
            .handshake()
            .map_err(|e| SftpPoolError::connection_failed(format!("SSH handshake failed: {}", e)))?;

        let method = authenticate(&session, params)?;
        if !session.authenticated() {
            return Err(SftpPoolError::auth_failed(
                "Authentication failed – not authenticated after auth attempt",
            ));
        }
        session.set_timeout(0);

        info!("SFTP pool authenticated to {} via {}", addr, method);

        Ok(Self {
            session,
            tcp,
            address: addr,
            read_batch_size: params.read_batch_size.max(1),
        })
    }
}

#[async_trait]
impl Transport for Ssh2Transport {
    async fn open_session(&self) -> SftpPoolResult<Box<dyn SftpSession>> {
        let session = self.session.clone();
        let sftp = tokio::task::spawn_blocking(move || session.sftp())
            .await
            .map_err(|e| SftpPoolError::session_open_failed(format!("SFTP open task failed: {}", e)))?
            .map_err(|e| SftpPoolError::session_open_failed(format!("SFTP channel error: {}", e)))?;
        debug!("SFTP pool opened channel on {}", self.address);
        Ok(Box::new(Ssh2SftpSession::new(sftp, self.read_batch_size)))
    }

    async fn close(&self) {
        let session = self.session.clone();
        let address = self.address.clone();
        let result = tokio::task::spawn_blocking(move || {
            session.disconnect(None, "Client disconnecting", None)
        })
        .await;
        match result {
            Ok(Ok(())) => info!("SFTP pool disconnected from {}", address),
            Ok(Err(e)) => warn!("SFTP pool disconnect from {} failed: {}", address, e),
            Err(e) => warn!("SFTP pool disconnect task failed: {}", e),
        }
    }
}

fn apply_algorithms(session: &Session, algorithms: &AlgorithmPreferences) -> SftpPoolResult<()> {
    let groups: Vec<(&[String], Vec<MethodType>)> = vec![
        (algorithms.kex.as_slice(), vec![MethodType::Kex]),
        (algorithms.server_host_key.as_slice(), vec![MethodType::HostKey]),
        (algorithms.cipher.as_slice(), vec![MethodType::CryptCs, MethodType::CryptSc]),
        (algorithms.hmac.as_slice(), vec![MethodType::MacCs, MethodType::MacSc]),
        (algorithms.compress.as_slice(), vec![MethodType::CompCs, MethodType::CompSc]),
    ];
    for (prefs, method_types) in groups {
        let Some(joined) = join_preferences(prefs) else {
            continue;
        };
        for method_type in method_types {
            session.method_pref(method_type, &joined).map_err(|e| {
                SftpPoolError::invalid_config(format!(
                    "Unsupported algorithm preference '{}': {}",
                    joined, e
                ))
            })?;
        }
    }
    Ok(())
}

/// libssh2 takes preferences as one comma-separated list.
fn join_preferences(prefs: &[String]) -> Option<String> {
    let cleaned: Vec<&str> = prefs
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join(","))
    }
}

// ── Authentication ───────────────────────────────────────────────────────────

const DEFAULT_KEY_NAMES: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;

/// One way of proving identity to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthMethod {
    Agent,
    /// `explicit` keys were configured; their failure ends the attempt.
    KeyFile { path: PathBuf, explicit: bool },
    Password,
    KeyboardInteractive,
}

impl AuthMethod {
    fn label(&self) -> String {
        match self {
            AuthMethod::Agent => "agent".to_string(),
            AuthMethod::KeyFile { explicit: true, .. } => "publickey".to_string(),
            AuthMethod::KeyFile { path, .. } => format!("publickey-default({})", path.display()),
            AuthMethod::Password => "password".to_string(),
            AuthMethod::KeyboardInteractive => "keyboard-interactive".to_string(),
        }
    }
}

/// Methods to try, in order. Default `~/.ssh` keys are only considered when
/// no password is configured.
fn auth_plan(params: &ConnectParams, home: Option<&Path>) -> Vec<AuthMethod> {
    let mut plan = Vec::new();
    if params.use_agent {
        plan.push(AuthMethod::Agent);
    }
    if let Some(path) = &params.private_key_path {
        plan.push(AuthMethod::KeyFile {
            path: PathBuf::from(path),
            explicit: true,
        });
    }
    match (&params.password, home) {
        (Some(_), _) => {
            plan.push(AuthMethod::Password);
            plan.push(AuthMethod::KeyboardInteractive);
        }
        (None, Some(home)) => plan.extend(
            DEFAULT_KEY_NAMES
                .iter()
                .map(|name| home.join(".ssh").join(name))
                .filter(|path| path.exists())
                .map(|path| AuthMethod::KeyFile {
                    path,
                    explicit: false,
                }),
        ),
        (None, None) => {}
    }
    plan
}

/// Answers every keyboard-interactive prompt with the password.
struct PasswordResponder<'a>(&'a str);

impl ssh2::KeyboardInteractivePrompt for PasswordResponder<'_> {
    fn prompt(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt],
    ) -> Vec<String> {
        vec![self.0.to_string(); prompts.len()]
    }
}

fn try_auth(session: &Session, params: &ConnectParams, method: &AuthMethod) -> Result<(), ssh2::Error> {
    let user = params.username.as_str();
    let password = params.password.as_deref().unwrap_or_default();
    match method {
        AuthMethod::Agent => {
            let mut agent = session.agent()?;
            agent.connect()?;
            agent.list_identities()?;
            let accepted = agent
                .identities()?
                .iter()
                .any(|identity| agent.userauth(user, identity).is_ok());
            if accepted {
                Ok(())
            } else {
                Err(ssh2::Error::new(
                    ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED),
                    "no agent identity accepted",
                ))
            }
        }
        AuthMethod::KeyFile { path, .. } => session.userauth_pubkey_file(
            user,
            None,
            path,
            params.private_key_passphrase.as_deref(),
        ),
        AuthMethod::Password => session.userauth_password(user, password),
        AuthMethod::KeyboardInteractive => {
            session.userauth_keyboard_interactive(user, &mut PasswordResponder(password))
        }
    }
}

/// Walk the auth plan until the session is authenticated. Returns the label
/// of the method that worked.
fn authenticate(session: &Session, params: &ConnectParams) -> SftpPoolResult<String> {
    let home = dirs::home_dir();
    for method in auth_plan(params, home.as_deref()) {
        match try_auth(session, params, &method) {
            Ok(()) if session.authenticated() => return Ok(method.label()),
            Ok(()) => debug!("SFTP pool auth via {} left the session unauthenticated", method.label()),
            Err(e) => {
                if let AuthMethod::KeyFile { explicit: true, .. } = method {
                    return Err(SftpPoolError::auth_failed(format!(
                        "Public-key (file) auth failed: {}",
                        e
                    )));
                }
                debug!("SFTP pool auth via {} failed: {}", method.label(), e);
            }
        }
    }
    Err(SftpPoolError::auth_failed("No authentication method succeeded"))
}

// ── SFTP channel ─────────────────────────────────────────────────────────────

struct OpenDir {
    file: ssh2::File,
    exhausted: bool,
}

pub struct Ssh2SftpSession {
    sftp: Arc<Mutex<ssh2::Sftp>>,
    handles: Mutex<HashMap<u64, OpenDir>>,
    next_id: AtomicU64,
    read_batch_size: usize,
}

impl Ssh2SftpSession {
    fn new(sftp: ssh2::Sftp, read_batch_size: usize) -> Self {
        Self {
            sftp: Arc::new(Mutex::new(sftp)),
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            read_batch_size,
        }
    }

    fn take_handle(&self, handle: &DirHandle) -> SftpPoolResult<OpenDir> {
        self.handles
            .lock()
            .map_err(|_| SftpPoolError::failure("SFTP handle table poisoned"))?
            .remove(&handle.id())
            .ok_or_else(|| {
                SftpPoolError::failure(format!("Unknown directory handle for '{}'", handle.path()))
                    .with_path(handle.path())
            })
    }

    fn put_handle(&self, id: u64, dir: OpenDir) -> SftpPoolResult<()> {
        self.handles
            .lock()
            .map_err(|_| SftpPoolError::failure("SFTP handle table poisoned"))?
            .insert(id, dir);
        Ok(())
    }
}

#[async_trait]
impl SftpSession for Ssh2SftpSession {
    async fn open_dir(&self, path: &str) -> SftpPoolResult<DirHandle> {
        let sftp = self.sftp.clone();
        let owned = path.to_string();
        let file = tokio::task::spawn_blocking(move || -> SftpPoolResult<ssh2::File> {
            let sftp = sftp
                .lock()
                .map_err(|_| SftpPoolError::failure("SFTP channel lock poisoned"))?;
            sftp.opendir(Path::new(&owned)).map_err(map_ssh_error)
        })
        .await
        .map_err(|e| SftpPoolError::failure(format!("opendir task failed: {}", e)))?
        .map_err(|e| e.with_path(path))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.put_handle(
            id,
            OpenDir {
                file,
                exhausted: false,
            },
        )?;
        Ok(DirHandle::new(id, path))
    }

    async fn read_dir(&self, handle: &DirHandle) -> SftpPoolResult<Vec<DirEntry>> {
        let mut dir = self.take_handle(handle)?;
        let batch_size = self.read_batch_size;
        let (dir, result) = tokio::task::spawn_blocking(move || {
            let result = read_batch(&mut dir, batch_size);
            (dir, result)
        })
        .await
        .map_err(|e| SftpPoolError::failure(format!("readdir task failed: {}", e)))?;
        self.put_handle(handle.id(), dir)?;
        result.map_err(|e| e.with_path(handle.path()))
    }

    async fn close(&self, handle: DirHandle) -> SftpPoolResult<()> {
        let mut dir = self.take_handle(&handle)?;
        tokio::task::spawn_blocking(move || dir.file.close().map_err(map_ssh_error))
            .await
            .map_err(|e| SftpPoolError::failure(format!("close task failed: {}", e)))?
            .map_err(|e| e.with_path(handle.path()))
    }
}

fn read_batch(dir: &mut OpenDir, batch_size: usize) -> SftpPoolResult<Vec<DirEntry>> {
    if dir.exhausted {
        return Err(SftpPoolError::end_of_directory());
    }
    let mut entries = Vec::new();
    while entries.len() < batch_size {
        match dir.file.readdir() {
            Ok((name, stat)) => {
                let filename = name.to_string_lossy().to_string();
                if filename == "." || filename == ".." {
                    continue;
                }
                entries.push(DirEntry::from_attrs(filename, attrs_from_stat(&stat)));
            }
            Err(ref e) if is_end_of_directory(e) => {
                dir.exhausted = true;
                if entries.is_empty() {
                    return Err(SftpPoolError::end_of_directory());
                }
                break;
            }
            Err(e) => return Err(map_ssh_error(e)),
        }
    }
    Ok(entries)
}

fn attrs_from_stat(stat: &ssh2::FileStat) -> FileAttrs {
    FileAttrs {
        mode: stat.perm.unwrap_or(0),
        uid: stat.uid.unwrap_or(0),
        gid: stat.gid.unwrap_or(0),
        size: stat.size.unwrap_or(0),
        atime: stat.atime.unwrap_or(0),
        mtime: stat.mtime.unwrap_or(0),
    }
}

fn is_end_of_directory(e: &ssh2::Error) -> bool {
    matches!(
        e.code(),
        ErrorCode::Session(LIBSSH2_ERROR_FILE) | ErrorCode::SFTP(1)
    )
}

fn map_ssh_error(e: ssh2::Error) -> SftpPoolError {
    match e.code() {
        ErrorCode::SFTP(code) if code >= 0 => SftpPoolError::from_status(code as u32, e.message()),
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND | LIBSSH2_ERROR_SOCKET_DISCONNECT | LIBSSH2_ERROR_SOCKET_RECV,
        ) => SftpPoolError::disconnected(e.message().to_string()),
        _ => SftpPoolError::new(SftpErrorKind::Failure, e.message().to_string()),
    }
}
