// ── Scheduler: the single choke point between sessions and operations ─────
//
// Every mutation of the idle pool and the pending queue happens inside one
// short critical section below, never across an await and never while user
// callbacks run. That keeps the core invariant: while running, the idle pool
// and the pending queue are never both non-empty.

use crate::sftp_pool::error::{SftpPoolError, SftpPoolResult};
use crate::sftp_pool::pool::SessionPool;
use crate::sftp_pool::queue::OperationQueue;
use crate::sftp_pool::transport::{DirHandle, SftpSession, Transport};
use crate::sftp_pool::types::{ClientState, DirEntry, DispatchOrder, PoolStats};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::Notify;

/// A unit of work needing exactly one session. It receives the lease and
/// runs to completion as its own task.
pub type Operation = Box<dyn FnOnce(SessionLease) -> BoxFuture<'static, ()> + Send>;

/// Drop sessions on the blocking pool. Dropping an ssh2 channel shuts it
/// down through the session lock and may wait on the socket.
pub(crate) async fn drop_sessions(sessions: Vec<Box<dyn SftpSession>>) {
    if sessions.is_empty() {
        return;
    }
    let count = sessions.len();
    match tokio::task::spawn_blocking(move || drop(sessions)).await {
        Ok(()) => debug!("SFTP pool dropped {} session(s)", count),
        Err(e) => debug!("SFTP pool session drop task failed: {}", e),
    }
}

/// What `halt` took out of the scheduler. Nothing in it has been dropped yet.
pub(crate) struct Halted {
    pub transport: Option<Arc<dyn Transport>>,
    pub runtime: Option<Handle>,
    pub sessions: Vec<Box<dyn SftpSession>>,
}

pub(crate) struct SchedulerState {
    lifecycle: ClientState,
    /// Bumped by every start and stop. Sessions leased under an older
    /// generation are discarded instead of re-pooled.
    generation: u64,
    pool: SessionPool,
    queue: OperationQueue<Operation>,
    leased: usize,
    transport: Option<Arc<dyn Transport>>,
    runtime: Option<Handle>,
    connected_at: Option<DateTime<Utc>>,
}

pub(crate) struct Scheduler {
    state: Mutex<SchedulerState>,
    idle: Notify,
}

impl Scheduler {
    pub fn new(max_sessions: usize, order: DispatchOrder) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                lifecycle: ClientState::Stopped,
                generation: 0,
                pool: SessionPool::new(max_sessions),
                queue: OperationQueue::new(order),
                leased: 0,
                transport: None,
                runtime: None,
                connected_at: None,
            }),
            idle: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop sessions outside the lock, on `runtime`'s blocking pool when
    /// there is one.
    fn discard(runtime: Option<Handle>, sessions: Vec<Box<dyn SftpSession>>) {
        if sessions.is_empty() {
            return;
        }
        match runtime.or_else(|| Handle::try_current().ok()) {
            Some(runtime) => {
                runtime.spawn(drop_sessions(sessions));
            }
            None => drop(sessions),
        }
    }

    // ── Submission / release ─────────────────────────────────────────────────

    /// Run `operation` now if a session is idle, otherwise queue it.
    pub fn submit(self: &Arc<Self>, operation: Operation) {
        let (session, generation, runtime) = {
            let mut st = self.lock();
            let runtime = match (st.lifecycle, st.runtime.clone()) {
                (ClientState::Running, Some(runtime)) => Some(runtime),
                _ => None,
            };
            let acquired = runtime.and_then(|rt| st.pool.acquire().map(|s| (s, rt)));
            match acquired {
                Some((session, runtime)) => {
                    st.leased += 1;
                    (session, st.generation, runtime)
                }
                None => {
                    st.queue.push(operation);
                    debug!(
                        "SFTP pool queued operation ({} pending, {})",
                        st.queue.len(),
                        st.lifecycle
                    );
                    return;
                }
            }
        };
        self.dispatch(operation, session, generation, &runtime);
    }

    fn dispatch(
        self: &Arc<Self>,
        operation: Operation,
        session: Box<dyn SftpSession>,
        generation: u64,
        runtime: &Handle,
    ) {
        let lease = SessionLease {
            session: Some(session),
            generation,
            scheduler: self.clone(),
        };
        runtime.spawn(operation(lease));
    }

    /// Hand `session` to the next queued operation, or park it as idle.
    fn release(self: &Arc<Self>, session: Box<dyn SftpSession>, generation: u64) {
        let (operation, runtime) = {
            let mut st = self.lock();
            if st.generation != generation {
                let runtime = st.runtime.clone();
                drop(st);
                debug!("SFTP pool discarding session from a closed connection");
                Self::discard(runtime, vec![session]);
                return;
            }
            st.leased = st.leased.saturating_sub(1);
            let next = match (st.lifecycle, st.runtime.clone()) {
                (ClientState::Running, Some(runtime)) => st.queue.pop().map(|op| (op, runtime)),
                _ => None,
            };
            match next {
                Some(next) => {
                    st.leased += 1;
                    next
                }
                None => {
                    st.pool.release(session);
                    drop(st);
                    self.notify_if_idle();
                    return;
                }
            }
        };
        self.dispatch(operation, session, generation, &runtime);
    }

    /// A leased session was dropped for good; its slot stays consumed.
    fn retire(&self, generation: u64) {
        {
            let mut st = self.lock();
            if st.generation != generation {
                return;
            }
            st.leased = st.leased.saturating_sub(1);
        }
        self.notify_if_idle();
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Stopped → Starting. Returns the new generation, or `None` if the
    /// client is already starting or running.
    pub fn begin_start(&self, runtime: Handle) -> Option<u64> {
        let (generation, leftover) = {
            let mut st = self.lock();
            if st.lifecycle != ClientState::Stopped {
                return None;
            }
            st.lifecycle = ClientState::Starting;
            st.generation += 1;
            st.runtime = Some(runtime.clone());
            st.leased = 0;
            st.connected_at = None;
            (st.generation, st.pool.reset())
        };
        Self::discard(Some(runtime), leftover);
        Some(generation)
    }

    /// Keep the freshly connected transport. `false` if superseded.
    pub fn attach_transport(&self, generation: u64, transport: Arc<dyn Transport>) -> bool {
        let mut st = self.lock();
        if st.generation != generation || st.lifecycle != ClientState::Starting {
            return false;
        }
        st.transport = Some(transport);
        st.connected_at = Some(Utc::now());
        true
    }

    /// `Some(true)` while warm-up should open another session, `Some(false)`
    /// once the cap is reached, `None` if this warm-up was superseded.
    pub fn needs_session(&self, generation: u64) -> Option<bool> {
        let st = self.lock();
        if st.generation != generation || st.lifecycle != ClientState::Starting {
            return None;
        }
        Some(st.pool.has_capacity())
    }

    /// Park a session opened during warm-up. Hands the session back if the
    /// warm-up was superseded.
    pub fn admit_session(
        &self,
        session: Box<dyn SftpSession>,
        generation: u64,
    ) -> Result<(), Box<dyn SftpSession>> {
        let mut st = self.lock();
        if st.generation != generation || st.lifecycle != ClientState::Starting {
            return Err(session);
        }
        st.pool.admit(session);
        Ok(())
    }

    /// Starting → Running, then pair idle sessions with queued operations.
    /// Returns the pool size, or `None` if superseded.
    pub fn mark_running(self: &Arc<Self>, generation: u64) -> Option<usize> {
        let (ready, runtime, sessions) = {
            let mut st = self.lock();
            if st.generation != generation || st.lifecycle != ClientState::Starting {
                return None;
            }
            let runtime = st.runtime.clone()?;
            st.lifecycle = ClientState::Running;
            let mut ready = Vec::new();
            while !st.pool.is_empty() && !st.queue.is_empty() {
                if let (Some(session), Some(operation)) = (st.pool.acquire(), st.queue.pop()) {
                    ready.push((operation, session));
                }
            }
            st.leased += ready.len();
            (ready, runtime, st.pool.created())
        };
        for (operation, session) in ready {
            self.dispatch(operation, session, generation, &runtime);
        }
        self.notify_if_idle();
        Some(sessions)
    }

    /// Starting → Stopped after a failed connect or warm-up. Returns the
    /// sessions opened so far, or `None` if the start was already superseded
    /// by `stop()`.
    pub fn abort_start(&self, generation: u64) -> Option<Vec<Box<dyn SftpSession>>> {
        let mut st = self.lock();
        if st.generation != generation || st.lifecycle != ClientState::Starting {
            return None;
        }
        st.lifecycle = ClientState::Stopped;
        st.generation += 1;
        st.leased = 0;
        st.transport = None;
        Some(st.pool.drain())
    }

    /// Any state → Stopped. Queued operations are kept. Returns `None` when
    /// already stopped, otherwise the transport to close, the runtime to
    /// close it on and the idle sessions to drop first.
    pub fn halt(&self) -> Option<Halted> {
        let mut st = self.lock();
        if st.lifecycle == ClientState::Stopped && st.transport.is_none() {
            return None;
        }
        st.lifecycle = ClientState::Stopped;
        st.generation += 1;
        st.leased = 0;
        Some(Halted {
            transport: st.transport.take(),
            runtime: st.runtime.clone(),
            sessions: st.pool.drain(),
        })
    }

    // ── Introspection ────────────────────────────────────────────────────────

    pub fn state(&self) -> ClientState {
        self.lock().lifecycle
    }

    pub fn sessions_created(&self) -> usize {
        self.lock().pool.created()
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.lock();
        PoolStats {
            state: st.lifecycle,
            idle_sessions: st.pool.idle_len(),
            pending_operations: st.queue.len(),
            leased_sessions: st.leased,
            sessions_created: st.pool.created(),
            max_sessions: st.pool.max_sessions(),
            generation: st.generation,
            connected_at: st.connected_at,
        }
    }

    fn is_idle(&self) -> bool {
        let st = self.lock();
        st.lifecycle == ClientState::Running && st.queue.is_empty() && st.leased == 0
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    /// Resolve once running with nothing queued and nothing leased.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

// ── Session lease ────────────────────────────────────────────────────────────

/// Exclusive, single-use hold on one pooled session.
///
/// Consuming the lease (`release`, `retire`, or simply dropping it) hands the
/// session back to the scheduler exactly once.
pub struct SessionLease {
    session: Option<Box<dyn SftpSession>>,
    generation: u64,
    scheduler: Arc<Scheduler>,
}

impl SessionLease {
    fn channel(&self) -> SftpPoolResult<&dyn SftpSession> {
        self.session
            .as_deref()
            .ok_or_else(|| SftpPoolError::disconnected("Session lease already released"))
    }

    pub async fn open_dir(&self, path: &str) -> SftpPoolResult<DirHandle> {
        self.channel()?.open_dir(path).await
    }

    pub async fn read_dir(&self, handle: &DirHandle) -> SftpPoolResult<Vec<DirEntry>> {
        self.channel()?.read_dir(handle).await
    }

    pub async fn close(&self, handle: DirHandle) -> SftpPoolResult<()> {
        self.channel()?.close(handle).await
    }

    /// Return the session: the next queued operation gets it, or it goes
    /// back to the idle pool.
    pub fn release(self) {}

    /// Drop the session without returning it. The pool does not reopen the
    /// slot until the next connection.
    pub fn retire(mut self) {
        if self.session.take().is_some() {
            debug!("SFTP pool retiring a session");
            self.scheduler.retire(self.generation);
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.scheduler.release(session, self.generation);
        }
    }
}
