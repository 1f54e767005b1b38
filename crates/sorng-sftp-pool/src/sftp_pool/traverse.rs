//! Recursive traversal built on the lister.
//!
//! Each directory is one listing whose collector classifies entries:
//! directories may be collected and/or descended into (the two filters are
//! independent), regular files may be collected, everything else (symlinks
//! included) is ignored. Symlinks are never followed, so no cycle detection
//! is needed.

use crate::sftp_pool::client::ClientInner;
use crate::sftp_pool::lister::list_operation;
use crate::sftp_pool::types::{DirEntry, EntryKind, ListOptions, PathFilter, TraverseOptions};
use log::info;
use std::sync::{Arc, Weak};

/// `parent` + `/` (unless `parent` already ends in one) + `name`.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Queue the listing of `path`; subdirectories queue further listings
/// sharing the same options.
pub(crate) fn traverse(client: &Arc<ClientInner>, path: String, options: Arc<TraverseOptions>) {
    let weak = Arc::downgrade(client);
    let parent = path.clone();
    let collector_client = weak.clone();
    let listing = ListOptions::new().with_collector(move |entry: &DirEntry| {
        visit(&collector_client, &options, &parent, entry);
    });
    client.submit(list_operation(weak, path, listing));
}

fn visit(client: &Weak<ClientInner>, options: &Arc<TraverseOptions>, parent: &str, entry: &DirEntry) {
    match entry.kind() {
        EntryKind::Directory => {
            if options.collect_directory && passes(&options.collect_filter, parent, entry) {
                emit(options, parent, entry);
            }
            if passes(&options.traverse_filter, parent, entry) {
                if let Some(client) = client.upgrade() {
                    traverse(&client, child_path(parent, &entry.filename), options.clone());
                }
            }
        }
        EntryKind::File => {
            if passes(&options.collect_filter, parent, entry) {
                emit(options, parent, entry);
            }
        }
        _ => {}
    }
}

fn passes(filter: &Option<PathFilter>, parent: &str, entry: &DirEntry) -> bool {
    filter.as_ref().map_or(true, |f| f(parent, entry))
}

fn emit(options: &TraverseOptions, parent: &str, entry: &DirEntry) {
    match &options.collector {
        Some(collector) => collector(parent, entry),
        None => info!("{}", child_path(parent, &entry.filename)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path_joins_with_single_slash() {
        assert_eq!(child_path("/root", "x"), "/root/x");
        assert_eq!(child_path("/root/", "x"), "/root/x");
        assert_eq!(child_path("/", "etc"), "/etc");
        assert_eq!(child_path("relative", "a.txt"), "relative/a.txt");
    }
}
