//! Directory lister: one queued operation per `list_folder` call.
//!
//! open → read batches until end-of-directory → close → release. Errors never
//! reach the caller of `list_folder`; they are logged and published as
//! client events.

use crate::sftp_pool::client::ClientInner;
use crate::sftp_pool::scheduler::{Operation, SessionLease};
use crate::sftp_pool::types::{ClientEvent, DirEntry, ListOptions, OpenFailurePolicy};
use futures::FutureExt;
use log::{debug, warn};
use std::sync::Weak;

/// Build the operation that lists `path` once a session is free.
pub(crate) fn list_operation(
    client: Weak<ClientInner>,
    path: String,
    options: ListOptions,
) -> Operation {
    Box::new(move |lease: SessionLease| {
        run_listing(client, lease, path, options).boxed()
    })
}

fn collect(options: &ListOptions, entry: &DirEntry) {
    if let Some(filter) = &options.filter {
        if !filter(entry) {
            return;
        }
    }
    match &options.collector {
        Some(collector) => collector(entry),
        None => println!("{}", entry.longname),
    }
}

async fn run_listing(
    client: Weak<ClientInner>,
    lease: SessionLease,
    path: String,
    options: ListOptions,
) {
    let handle = match lease.open_dir(&path).await {
        Ok(handle) => handle,
        Err(error) => {
            warn!("SFTP pool could not open directory {}: {}", path, error);
            let policy = match client.upgrade() {
                Some(client) => {
                    client.emit(ClientEvent::ListingAbandoned {
                        path: path.clone(),
                        error,
                    });
                    client.config().open_failure_policy
                }
                None => OpenFailurePolicy::Release,
            };
            match policy {
                OpenFailurePolicy::Release => lease.release(),
                OpenFailurePolicy::Retire => lease.retire(),
            }
            return;
        }
    };
    debug!("SFTP pool listing {}", path);

    loop {
        match lease.read_dir(&handle).await {
            Ok(batch) => {
                for entry in &batch {
                    collect(&options, entry);
                }
            }
            Err(error) if error.is_end_of_directory() => {
                if let Err(e) = lease.close(handle).await {
                    warn!("SFTP pool failed to close {}: {}", path, e);
                }
                lease.release();
                return;
            }
            Err(error) => {
                if let Err(e) = lease.close(handle).await {
                    debug!("SFTP pool close after read error on {}: {}", path, e);
                }
                if let Some(client) = client.upgrade() {
                    client.handle_error(error.with_path(path.as_str()));
                }
                // Stopping first bumps the generation, so the lease is
                // discarded here rather than handed to the next operation.
                lease.release();
                return;
            }
        }
    }
}
