use std::io;
use std::path::Path;

use drivesink_core::NodeRecord;
use md5::Context;
use tokio::io::AsyncReadExt;

const BLOCK_SIZE: usize = 64 * 1024;

/// Streams `path` through MD5 and returns the lowercase hex digest.
pub async fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut ctx = Context::new();
    let mut block = vec![0u8; BLOCK_SIZE];
    loop {
        let read = file.read(&mut block).await?;
        if read == 0 {
            break;
        }
        ctx.consume(&block[..read]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

/// True unless `local_path` is a regular file whose size and MD5 both match
/// the remote node. Sizes are compared first so mismatches skip hashing.
pub async fn differs(remote: &NodeRecord, local_path: &Path) -> io::Result<bool> {
    let (Some(size), Some(checksum)) = (remote.size(), remote.md5()) else {
        return Ok(true);
    };
    let meta = match tokio::fs::metadata(local_path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err),
    };
    if !meta.is_file() || meta.len() != size {
        return Ok(true);
    }
    let local = md5_file(local_path).await?;
    Ok(!local.eq_ignore_ascii_case(checksum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivesink_core::{ContentProperties, NodeKind};
    use tempfile::tempdir;

    fn file_node(size: u64, md5: &str) -> NodeRecord {
        NodeRecord {
            id: "file-1".into(),
            name: Some("a.png".into()),
            kind: NodeKind::File,
            content_properties: Some(ContentProperties {
                size: Some(size),
                md5: Some(md5.into()),
            }),
        }
    }

    #[tokio::test]
    async fn md5_file_matches_in_memory_digest_across_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..(BLOCK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let digest = md5_file(&path).await.unwrap();

        assert_eq!(digest, format!("{:x}", md5::compute(&data)));
    }

    #[tokio::test]
    async fn same_size_and_checksum_is_not_different() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"0123456789").unwrap();
        let checksum = format!("{:x}", md5::compute(b"0123456789"));

        assert!(!differs(&file_node(10, &checksum), &path).await.unwrap());
        assert!(
            !differs(&file_node(10, &checksum.to_ascii_uppercase()), &path)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn size_or_checksum_change_flips_to_different() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"0123456789").unwrap();
        let checksum = format!("{:x}", md5::compute(b"0123456789"));

        assert!(differs(&file_node(11, &checksum), &path).await.unwrap());
        assert!(
            differs(&file_node(10, "00000000000000000000000000000000"), &path)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn missing_local_file_or_remote_properties_differ() {
        let dir = tempdir().unwrap();
        let checksum = format!("{:x}", md5::compute(b""));
        assert!(
            differs(&file_node(0, &checksum), &dir.path().join("absent"))
                .await
                .unwrap()
        );

        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        let mut folder = file_node(0, &checksum);
        folder.content_properties = None;
        assert!(differs(&folder, &path).await.unwrap());
        assert!(!differs(&file_node(0, &checksum), &path).await.unwrap());
    }

    #[tokio::test]
    async fn directory_at_local_path_differs() {
        let dir = tempdir().unwrap();
        let checksum = format!("{:x}", md5::compute(b""));
        assert!(differs(&file_node(0, &checksum), dir.path()).await.unwrap());
    }
}
