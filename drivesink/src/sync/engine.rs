use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drivesink_core::{DriveClient, NodeKind};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::SyncError;
use super::filter::ExtensionFilter;
use super::node::RemoteNode;
use super::paths::{local_child_path, resolve};
use crate::progress::ProgressReporter;

/// Counts collected over one upload or download run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub transferred: usize,
    pub unchanged: usize,
    pub filtered: usize,
    pub folders: usize,
}

pub struct SyncEngine {
    client: DriveClient,
    filter: ExtensionFilter,
    progress: ProgressReporter,
    root: OnceCell<Arc<RemoteNode>>,
}

impl SyncEngine {
    pub fn new(client: DriveClient) -> Self {
        Self {
            client,
            filter: ExtensionFilter::default(),
            progress: ProgressReporter::hidden(),
            root: OnceCell::new(),
        }
    }

    pub fn with_filter(mut self, filter: ExtensionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn client(&self) -> &DriveClient {
        &self.client
    }

    /// The remote root folder, fetched once per engine.
    pub async fn root(&self) -> Result<Arc<RemoteNode>, SyncError> {
        let root = self
            .root
            .get_or_try_init(|| async {
                let record = self.client.get_root().await?;
                debug!(id = %record.id, "resolved remote root");
                Ok::<_, SyncError>(Arc::new(RemoteNode::new(record)))
            })
            .await?;
        Ok(Arc::clone(root))
    }

    /// Mirrors the local tree under `source` into the remote folder `destination`.
    pub async fn upload(&self, source: &Path, destination: &str) -> Result<SyncReport, SyncError> {
        let meta = tokio::fs::metadata(source).await?;
        if !meta.is_dir() {
            return Err(SyncError::NotADirectory(source.to_path_buf()));
        }

        let root = self.root().await?;
        let target = resolve(&self.client, &root, destination, true)
            .await?
            .ok_or_else(|| SyncError::FolderNotCreated(destination.to_string()))?;
        if !target.is_folder() {
            return Err(SyncError::NotAFolder(target.name().to_string()));
        }

        let mut report = SyncReport::default();
        let mut queue = VecDeque::from([(source.to_path_buf(), target)]);
        while let Some((dir, remote)) = queue.pop_front() {
            report.folders += 1;
            let (dirs, files) = list_local_dir(&dir).await?;

            for (name, path) in dirs {
                let Ok(name) = name.into_string() else {
                    warn!(path = %path.display(), "skipping directory with a non UTF-8 name");
                    continue;
                };
                let child = remote
                    .child(&self.client, &name, true)
                    .await?
                    .ok_or_else(|| SyncError::FolderNotCreated(name.clone()))?;
                if !child.is_folder() {
                    return Err(SyncError::NotAFolder(child.name().to_string()));
                }
                queue.push_back((path, child));
            }

            for (name, path) in files {
                if !self.filter.allows_path(&path) {
                    debug!(path = %path.display(), "skipping file outside the extension filter");
                    report.filtered += 1;
                    continue;
                }
                let Ok(name) = name.into_string() else {
                    warn!(path = %path.display(), "skipping file with a non UTF-8 name");
                    continue;
                };
                let existing = remote.child(&self.client, &name, false).await?;
                let stale = match &existing {
                    Some(node) => node.differs(&path).await?,
                    None => true,
                };
                if !stale {
                    debug!(path = %path.display(), "remote copy is up to date");
                    report.unchanged += 1;
                    continue;
                }
                self.upload_one(&remote, &name, &path, existing.as_deref())
                    .await?;
                report.transferred += 1;
            }
        }

        info!(
            transferred = report.transferred,
            unchanged = report.unchanged,
            filtered = report.filtered,
            "upload finished"
        );
        Ok(report)
    }

    /// Copies the remote folder `source` into the local directory `destination`.
    pub async fn download(
        &self,
        source: &str,
        destination: &Path,
    ) -> Result<SyncReport, SyncError> {
        let root = self.root().await?;
        let start = resolve(&self.client, &root, source, false)
            .await?
            .ok_or_else(|| SyncError::RemoteNotFound(source.to_string()))?;
        if !start.is_folder() {
            return Err(SyncError::NotAFolder(start.name().to_string()));
        }
        ensure_local_dir(destination).await?;

        let mut report = SyncReport::default();
        let mut queue = VecDeque::from([(start, destination.to_path_buf())]);
        while let Some((remote, dir)) = queue.pop_front() {
            report.folders += 1;
            for (name, child) in remote.children(&self.client).await? {
                let local = local_child_path(&dir, &name)?;
                match child.kind() {
                    NodeKind::Folder => {
                        ensure_local_dir(&local).await?;
                        queue.push_back((child, local));
                    }
                    NodeKind::File => {
                        if child.differs(&local).await? {
                            child.download_file(&self.client, &local).await?;
                            report.transferred += 1;
                        } else {
                            debug!(path = %local.display(), "local copy is up to date");
                            report.unchanged += 1;
                        }
                    }
                    NodeKind::Other => {
                        debug!(name, "skipping remote node of unsupported kind");
                    }
                }
            }
        }

        info!(
            transferred = report.transferred,
            unchanged = report.unchanged,
            "download finished"
        );
        Ok(report)
    }

    async fn upload_one(
        &self,
        parent: &RemoteNode,
        name: &str,
        path: &Path,
        existing: Option<&RemoteNode>,
    ) -> Result<(), SyncError> {
        let total = tokio::fs::metadata(path).await?.len();
        let bar = self
            .progress
            .transfer_bar(&path.display().to_string(), total);
        let result = parent
            .upload_child_file(
                &self.client,
                name,
                path,
                existing,
                Some(ProgressReporter::callback(&bar)),
            )
            .await;
        match result {
            Ok(_) => {
                bar.finish();
                Ok(())
            }
            Err(err) => {
                bar.abandon();
                Err(err)
            }
        }
    }
}

type LocalEntries = Vec<(OsString, PathBuf)>;

/// Lists a local directory as sorted (subdirectories, files).
///
/// Symlinks are followed for files only; dangling links are skipped.
async fn list_local_dir(dir: &Path) -> Result<(LocalEntries, LocalEntries), SyncError> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            dirs.push((name, path));
        } else if file_type.is_file() {
            files.push((name, path));
        } else if file_type.is_symlink() {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => files.push((name, path)),
                Ok(_) => debug!(path = %path.display(), "skipping symlinked directory"),
                Err(err) => warn!(path = %path.display(), "skipping broken symlink: {err}"),
            }
        }
    }
    dirs.sort();
    files.sort();
    Ok((dirs, files))
}

async fn ensure_local_dir(path: &Path) -> Result<(), SyncError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SyncError::NotADirectory(path.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "creating local directory");
            tokio::fs::create_dir_all(path).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
