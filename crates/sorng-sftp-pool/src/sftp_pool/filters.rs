//! Ready-made traversal filters.
//!
//! Every constructor returns a `PathFilter`, usable as either the traverse
//! or the collect filter of `TraverseOptions`.

use crate::sftp_pool::error::{SftpPoolError, SftpPoolResult};
use crate::sftp_pool::types::{DirEntry, EntryKind, PathFilter};
use glob::Pattern;
use std::sync::Arc;

/// Match entry names against a shell glob (`*.log`, `backup-??`).
pub fn glob(pattern: &str) -> SftpPoolResult<PathFilter> {
    let pattern = Pattern::new(pattern).map_err(|e| {
        SftpPoolError::invalid_config(format!("Invalid glob pattern '{}': {}", pattern, e))
    })?;
    Ok(Arc::new(move |_parent: &str, entry: &DirEntry| {
        pattern.matches(&entry.filename)
    }))
}

/// With `include == false`, reject dot-files and dot-directories.
pub fn hidden(include: bool) -> PathFilter {
    Arc::new(move |_parent: &str, entry: &DirEntry| include || !entry.is_hidden())
}

pub fn kinds(kinds: &[EntryKind]) -> PathFilter {
    let kinds = kinds.to_vec();
    Arc::new(move |_parent: &str, entry: &DirEntry| kinds.contains(&entry.kind()))
}

/// Accept entries at most `depth` levels below `root`; direct children of
/// `root` are level 1. As a traverse filter this bounds recursion.
pub fn max_depth(root: &str, depth: usize) -> PathFilter {
    let root = root.trim_end_matches('/').to_string();
    Arc::new(move |parent: &str, _entry: &DirEntry| {
        let below = parent
            .strip_prefix(root.as_str())
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .map(|rest| rest.split('/').filter(|c| !c.is_empty()).count());
        match below {
            Some(levels) => levels < depth,
            None => false,
        }
    })
}

pub fn all_of(filters: Vec<PathFilter>) -> PathFilter {
    Arc::new(move |parent: &str, entry: &DirEntry| filters.iter().all(|f| f(parent, entry)))
}

pub fn any_of(filters: Vec<PathFilter>) -> PathFilter {
    Arc::new(move |parent: &str, entry: &DirEntry| filters.iter().any(|f| f(parent, entry)))
}
