//! Session pool: idle SFTP channels for the current connection, plus the
//! sequential warm-up that fills it.

use crate::sftp_pool::error::SftpPoolResult;
use crate::sftp_pool::scheduler::{drop_sessions, Scheduler};
use crate::sftp_pool::transport::{SftpSession, Transport};
use log::debug;

/// Idle sessions of one transport connection.
pub(crate) struct SessionPool {
    idle: Vec<Box<dyn SftpSession>>,
    /// Sessions opened on the current connection. Only grows until `reset`.
    created: usize,
    max_sessions: usize,
}

impl SessionPool {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            idle: Vec::new(),
            created: 0,
            max_sessions,
        }
    }

    /// Take an idle session, if any.
    pub fn acquire(&mut self) -> Option<Box<dyn SftpSession>> {
        self.idle.pop()
    }

    /// Return a session to the idle set.
    pub fn release(&mut self, session: Box<dyn SftpSession>) {
        self.idle.push(session);
    }

    /// Record a freshly opened session and park it as idle.
    pub fn admit(&mut self, session: Box<dyn SftpSession>) {
        self.created += 1;
        self.idle.push(session);
    }

    pub fn has_capacity(&self) -> bool {
        self.created < self.max_sessions
    }

    /// Take every idle session out; the creation counter is kept for stats.
    /// Callers drop the result outside the scheduler lock.
    pub fn drain(&mut self) -> Vec<Box<dyn SftpSession>> {
        std::mem::take(&mut self.idle)
    }

    /// Forget everything about the previous connection.
    pub fn reset(&mut self) -> Vec<Box<dyn SftpSession>> {
        self.created = 0;
        self.drain()
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idle.is_empty()
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

/// How a warm-up run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WarmUp {
    /// The pool holds `max_sessions` sessions.
    Ready(usize),
    /// The client was stopped or restarted while warming up.
    Superseded,
}

/// Open sessions one at a time until the pool reaches its cap.
///
/// Never opens channels in parallel. The first failure aborts the run; the
/// caller closes the transport.
pub(crate) async fn warm_up(
    scheduler: &Scheduler,
    transport: &dyn Transport,
    generation: u64,
) -> SftpPoolResult<WarmUp> {
    loop {
        match scheduler.needs_session(generation) {
            None => return Ok(WarmUp::Superseded),
            Some(false) => return Ok(WarmUp::Ready(scheduler.sessions_created())),
            Some(true) => {}
        }
        let session = transport.open_session().await?;
        if let Err(session) = scheduler.admit_session(session, generation) {
            drop_sessions(vec![session]).await;
            return Ok(WarmUp::Superseded);
        }
        debug!(
            "SFTP pool warm-up: {} session(s) open",
            scheduler.sessions_created()
        );
    }
}
