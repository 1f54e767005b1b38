//! Live-server walk against the openssh test container.
//!
//! Run with `--features docker-e2e` after starting a container that exposes
//! SFTP on `SFTP_E2E_PORT` (default 2222) with password authentication.

#![cfg(feature = "docker-e2e")]

mod common;

use common::*;
use sorng_sftp_pool::sftp_pool::*;
use std::env;

fn e2e_config() -> SftpPoolConfig {
    SftpPoolConfig {
        host: env::var("SFTP_E2E_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("SFTP_E2E_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(2222),
        user: env::var("SFTP_E2E_USER").unwrap_or_else(|_| "testuser".to_string()),
        password: Some(env::var("SFTP_E2E_PASSWORD").unwrap_or_else(|_| "testpass".to_string())),
        max_session_count: 4,
        ..SftpPoolConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_walks_etc_over_real_ssh() {
    let client = SftpPoolClient::with_ssh(e2e_config()).unwrap();
    let mut events = client.subscribe();
    let seen = Seen::default();
    client.traverse_folder(
        "/etc",
        seen.traversal()
            .with_traverse_filter(|_parent: &str, _entry: &DirEntry| false),
    );
    client.start().unwrap();

    assert_eq!(wait_ready(&mut events).await, 4);
    settle(&client).await;
    assert!(seen.take().iter().any(|p| p == "/etc/passwd"));
    assert_eq!(client.stats().sessions_created, 4);

    client.stop();
    assert!(!client.is_running());
}
