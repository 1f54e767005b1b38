// ── SftpPoolClient: public facade ───────────────────────────────────────────
//
// Owns the configuration, the connector, the scheduler and the event channel.
// Cloning is cheap; every clone drives the same pool.

use crate::sftp_pool::error::{SftpPoolError, SftpPoolResult};
use crate::sftp_pool::lister::list_operation;
use crate::sftp_pool::pool::{warm_up, WarmUp};
use crate::sftp_pool::scheduler::{drop_sessions, Halted, Operation, Scheduler, SessionLease};
use crate::sftp_pool::ssh::Ssh2Connector;
use crate::sftp_pool::transport::Connector;
use crate::sftp_pool::traverse::traverse;
use crate::sftp_pool::types::{
    ClientEvent, ClientState, ListOptions, PoolStats, SftpPoolConfig, TraverseOptions,
};
use futures::FutureExt;
use log::{debug, error, info};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

pub(crate) struct ClientInner {
    config: SftpPoolConfig,
    connector: Arc<dyn Connector>,
    scheduler: Arc<Scheduler>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientInner {
    pub(crate) fn config(&self) -> &SftpPoolConfig {
        &self.config
    }

    pub(crate) fn submit(&self, operation: Operation) {
        self.scheduler.submit(operation);
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Shared policy for protocol errors other than end-of-directory.
    pub(crate) fn handle_error(&self, error: SftpPoolError) {
        error!("SFTP pool error: {}", error);
        self.emit(ClientEvent::Error { error });
        if !self.config.continue_on_error {
            self.stop();
        }
    }

    fn stop(&self) {
        let Some(Halted {
            transport,
            runtime,
            sessions,
        }) = self.scheduler.halt()
        else {
            debug!("SFTP pool already stopped");
            return;
        };
        info!("SFTP pool stopping ({}:{})", self.config.host, self.config.port);
        match runtime.or_else(|| Handle::try_current().ok()) {
            Some(runtime) => {
                runtime.spawn(async move {
                    drop_sessions(sessions).await;
                    if let Some(transport) = transport {
                        transport.close().await;
                    }
                });
            }
            None => debug!("SFTP pool has no runtime to close the transport on"),
        }
        self.emit(ClientEvent::Stopped);
    }

    /// Connect, warm the pool up, then start draining the queue.
    async fn establish(self: Arc<Self>, generation: u64) {
        let params = self.config.connect_params();
        let transport = match self.connector.connect(&params).await {
            Ok(transport) => transport,
            Err(error) => {
                if let Some(sessions) = self.scheduler.abort_start(generation) {
                    drop_sessions(sessions).await;
                    self.report_start_failure(error);
                }
                return;
            }
        };

        if !self.scheduler.attach_transport(generation, transport.clone()) {
            debug!("SFTP pool start superseded; dropping new connection");
            transport.close().await;
            return;
        }

        match warm_up(&self.scheduler, transport.as_ref(), generation).await {
            Ok(WarmUp::Ready(_)) => {
                if let Some(sessions) = self.scheduler.mark_running(generation) {
                    info!(
                        "SFTP pool ready: {} session(s) to {}",
                        sessions,
                        params.address()
                    );
                    self.emit(ClientEvent::Ready { sessions });
                }
            }
            Ok(WarmUp::Superseded) => debug!("SFTP pool warm-up superseded"),
            Err(error) => {
                if let Some(sessions) = self.scheduler.abort_start(generation) {
                    drop_sessions(sessions).await;
                    transport.close().await;
                    self.report_start_failure(error);
                }
            }
        }
    }

    fn report_start_failure(&self, error: SftpPoolError) {
        error!(
            "SFTP pool could not start against {}:{}: {}",
            self.config.host, self.config.port, error
        );
        self.emit(ClientEvent::TransportFailed { error });
        self.emit(ClientEvent::Stopped);
    }
}

#[derive(Clone)]
pub struct SftpPoolClient {
    inner: Arc<ClientInner>,
}

impl SftpPoolClient {
    pub fn new(config: SftpPoolConfig, connector: Arc<dyn Connector>) -> SftpPoolResult<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(config.max_session_count, config.dispatch_order);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                scheduler,
                events,
            }),
        })
    }

    /// Client backed by libssh2.
    pub fn with_ssh(config: SftpPoolConfig) -> SftpPoolResult<Self> {
        Self::new(config, Arc::new(Ssh2Connector::new()))
    }

    pub fn config(&self) -> &SftpPoolConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ClientState {
        self.inner.scheduler.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ClientState::Running
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.scheduler.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Connect and warm the pool up in the background. No-op while starting
    /// or running. Must be called from within a Tokio runtime.
    pub fn start(&self) -> SftpPoolResult<()> {
        let runtime = Handle::try_current().map_err(|e| {
            SftpPoolError::not_running(format!("start() requires a Tokio runtime: {}", e))
        })?;
        let Some(generation) = self.inner.scheduler.begin_start(runtime.clone()) else {
            debug!("SFTP pool start ignored: already {}", self.state());
            return Ok(());
        };
        info!(
            "SFTP pool connecting to {}@{}:{} (max {} sessions)",
            self.inner.config.user,
            self.inner.config.host,
            self.inner.config.port,
            self.inner.config.max_session_count
        );
        runtime.spawn(self.inner.clone().establish(generation));
        Ok(())
    }

    /// Close the transport and drop idle sessions. Queued operations stay
    /// queued for the next `start()`. No-op when already stopped.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Queue raw work needing one session.
    pub fn submit<F, Fut>(&self, operation: F)
    where
        F: FnOnce(SessionLease) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .submit(Box::new(move |lease: SessionLease| operation(lease).boxed()));
    }

    /// Queue a single listing of `path`. Returns immediately.
    pub fn list_folder(&self, path: impl Into<String>, options: ListOptions) {
        self.inner.submit(list_operation(
            Arc::downgrade(&self.inner),
            path.into(),
            options,
        ));
    }

    /// Queue a recursive walk rooted at `path`. Returns immediately.
    pub fn traverse_folder(&self, path: impl Into<String>, options: TraverseOptions) {
        traverse(&self.inner, path.into(), Arc::new(options));
    }

    /// Resolve once running with nothing queued and nothing in flight.
    pub async fn wait_idle(&self) {
        self.inner.scheduler.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp_pool::memory::{MemoryConnector, MemoryFs};
    use crate::sftp_pool::SftpErrorKind;

    #[test]
    fn test_new_validates_config() {
        let config = SftpPoolConfig {
            max_session_count: 0,
            ..SftpPoolConfig::default()
        };
        let result = SftpPoolClient::new(config, Arc::new(MemoryConnector::new(MemoryFs::new())));
        assert_eq!(result.err().map(|e| e.kind), Some(SftpErrorKind::InvalidConfig));
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let client = SftpPoolClient::new(
            SftpPoolConfig::default(),
            Arc::new(MemoryConnector::new(MemoryFs::new())),
        )
        .unwrap();
        let err = client.start().unwrap_err();
        assert_eq!(err.kind, SftpErrorKind::NotRunning);
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let connector = MemoryConnector::new(MemoryFs::new());
        let client = SftpPoolClient::new(
            SftpPoolConfig {
                max_session_count: 2,
                ..SftpPoolConfig::default()
            },
            Arc::new(connector.clone()),
        )
        .unwrap();
        let mut events = client.subscribe();

        client.start().unwrap();
        client.start().unwrap();
        match events.recv().await.unwrap() {
            ClientEvent::Ready { sessions } => assert_eq!(sessions, 2),
            other => panic!("unexpected event {:?}", other),
        }
        client.start().unwrap();
        assert!(client.is_running());
        assert_eq!(connector.stats().connects, 1);
        assert_eq!(client.stats().idle_sessions, 2);
    }
}
