use std::path::{self, Path, PathBuf};
use std::sync::Arc;

use drivesink_core::DriveClient;

use super::SyncError;
use super::node::RemoteNode;

/// Splits a slash-separated remote path, dropping empty segments.
pub fn segments(remote_path: &str) -> impl Iterator<Item = &str> {
    remote_path.split('/').filter(|segment| !segment.is_empty())
}

/// Walks `remote_path` down from `root`.
///
/// Missing folders are created when `create_missing` is set, otherwise the
/// walk stops with `None`. An empty path resolves to `root` itself.
pub async fn resolve(
    client: &DriveClient,
    root: &Arc<RemoteNode>,
    remote_path: &str,
    create_missing: bool,
) -> Result<Option<Arc<RemoteNode>>, SyncError> {
    let mut current = Arc::clone(root);
    for segment in segments(remote_path) {
        if !current.is_folder() {
            return Err(SyncError::NotAFolder(current.name().to_string()));
        }
        match current.child(client, segment, create_missing).await? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Maps a remote child name into `dir`, rejecting names that would escape it.
pub fn local_child_path(dir: &Path, name: &str) -> Result<PathBuf, SyncError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(path::is_separator) {
        return Err(SyncError::UnsupportedName(name.to_string()));
    }
    Ok(dir.join(name))
}
