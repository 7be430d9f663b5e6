use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drivesink_core::{DriveClient, DriveError, NodeKind, NodeRecord, ProgressFn};
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::{SyncError, diff};

type Children = Mutex<HashMap<String, Arc<RemoteNode>>>;

/// A remote folder or file with a lazily fetched, per-run children cache.
///
/// The listing is fetched at most once per node; afterwards the map is
/// authoritative and is updated in place by folder creation and uploads.
#[derive(Debug)]
pub struct RemoteNode {
    record: NodeRecord,
    children: OnceCell<Children>,
}

impl RemoteNode {
    pub fn new(record: NodeRecord) -> Self {
        Self {
            record,
            children: OnceCell::new(),
        }
    }

    /// A folder this run just created; its children are known to be empty.
    pub fn created_folder(record: NodeRecord) -> Self {
        Self {
            record,
            children: OnceCell::from(Mutex::new(HashMap::new())),
        }
    }

    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.record.kind
    }

    pub fn is_folder(&self) -> bool {
        self.record.kind == NodeKind::Folder
    }

    pub async fn children(
        &self,
        client: &DriveClient,
    ) -> Result<BTreeMap<String, Arc<RemoteNode>>, SyncError> {
        let children = self.children_map(client).await?.lock().await;
        Ok(children
            .iter()
            .map(|(name, node)| (name.clone(), Arc::clone(node)))
            .collect())
    }

    /// Looks up `name`, creating it as a folder when absent and `create` is set.
    pub async fn child(
        &self,
        client: &DriveClient,
        name: &str,
        create: bool,
    ) -> Result<Option<Arc<RemoteNode>>, SyncError> {
        // Held across the create call so one name is never created twice.
        let mut children = self.children_map(client).await?.lock().await;
        if let Some(node) = children.get(name) {
            return Ok(Some(Arc::clone(node)));
        }
        if !create {
            return Ok(None);
        }
        info!(name, parent = self.name(), "creating remote folder");
        let record = client.create_folder(self.id(), name).await?;
        let node = Arc::new(RemoteNode::created_folder(record));
        children.insert(name.to_string(), Arc::clone(&node));
        Ok(Some(node))
    }

    /// Uploads `local_path` as `name`, trashing `existing` first.
    ///
    /// Only a remote file may be replaced; anything else is left untouched.
    pub async fn upload_child_file(
        &self,
        client: &DriveClient,
        name: &str,
        local_path: &Path,
        existing: Option<&RemoteNode>,
        progress: Option<Arc<ProgressFn>>,
    ) -> Result<Arc<RemoteNode>, SyncError> {
        if let Some(existing) = existing.filter(|node| node.kind() != &NodeKind::File) {
            return Err(SyncError::NotAFile(existing.name().to_string()));
        }
        let children = self.children_map(client).await?;
        if let Some(existing) = existing {
            debug!(name, id = existing.id(), "moving stale remote copy to trash");
            client.trash_node(existing.id()).await?;
        }
        info!(path = %local_path.display(), parent = self.name(), "uploading file");
        let record = client
            .upload_file(self.id(), name, local_path, progress)
            .await?;
        let node = Arc::new(RemoteNode::new(record));
        children
            .lock()
            .await
            .insert(name.to_string(), Arc::clone(&node));
        Ok(node)
    }

    /// Streams the file content into `local_path`, replacing any existing file.
    pub async fn download_file(
        &self,
        client: &DriveClient,
        local_path: &Path,
    ) -> Result<(), SyncError> {
        info!(name = self.name(), path = %local_path.display(), "downloading file");
        let response = client.download_content(self.id()).await?;
        if response.status() != StatusCode::OK {
            return Err(SyncError::Download {
                name: self.name().to_string(),
                status: response.status(),
            });
        }

        let partial = partial_path(local_path);
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(DriveError::from)?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, SyncError>(())
        }
        .await;
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        tokio::fs::rename(&partial, local_path).await?;
        Ok(())
    }

    pub async fn differs(&self, local_path: &Path) -> Result<bool, SyncError> {
        Ok(diff::differs(&self.record, local_path).await?)
    }

    async fn children_map(&self, client: &DriveClient) -> Result<&Children, SyncError> {
        self.children
            .get_or_try_init(|| async {
                let records = client.list_children(self.id()).await?;
                debug!(name = self.name(), count = records.len(), "cached remote children");
                let children = records
                    .into_iter()
                    .map(|record| {
                        let name = record.name().to_string();
                        (name, Arc::new(RemoteNode::new(record)))
                    })
                    .collect();
                Ok::<_, SyncError>(Mutex::new(children))
            })
            .await
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
