#![allow(dead_code)]

use sorng_sftp_pool::sftp_pool::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const SETTLE: Duration = Duration::from_secs(5);

pub fn config(max_sessions: usize) -> SftpPoolConfig {
    SftpPoolConfig {
        host: "files.test".to_string(),
        max_session_count: max_sessions,
        ..SftpPoolConfig::default()
    }
}

pub fn client(fs: MemoryFs, config: SftpPoolConfig) -> (SftpPoolClient, MemoryConnector) {
    let connector = MemoryConnector::new(fs);
    let client = SftpPoolClient::new(config, Arc::new(connector.clone())).unwrap();
    (client, connector)
}

pub async fn settle(client: &SftpPoolClient) {
    tokio::time::timeout(SETTLE, client.wait_idle())
        .await
        .expect("client never went idle");
}

/// Next event, failing the test if none arrives in time.
pub async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(SETTLE, events.recv())
        .await
        .expect("no client event")
        .expect("event channel closed")
}

pub async fn wait_ready(events: &mut broadcast::Receiver<ClientEvent>) -> usize {
    match next_event(events).await {
        ClientEvent::Ready { sessions } => sessions,
        other => panic!("expected Ready, got {:?}", other),
    }
}

/// Shared log of collected names / paths.
#[derive(Clone, Default)]
pub struct Seen(Arc<Mutex<Vec<String>>>);

impl Seen {
    pub fn push(&self, value: impl Into<String>) {
        self.0.lock().unwrap().push(value.into());
    }

    pub fn take(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn sorted(&self) -> Vec<String> {
        let mut values = self.take();
        values.sort();
        values
    }

    /// Listing options recording `tag/filename` for each entry.
    pub fn listing(&self, tag: &'static str) -> ListOptions {
        let seen = self.clone();
        ListOptions::new().with_collector(move |entry: &DirEntry| {
            seen.push(format!("{}/{}", tag, entry.filename))
        })
    }

    /// Traversal options recording the full path of each collected entry.
    pub fn traversal(&self) -> TraverseOptions {
        let seen = self.clone();
        TraverseOptions::new().with_collector(move |parent: &str, entry: &DirEntry| {
            seen.push(child_path(parent, &entry.filename))
        })
    }
}
