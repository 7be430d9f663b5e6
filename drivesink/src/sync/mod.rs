use std::{io, path::PathBuf};

use drivesink_core::DriveError;
use reqwest::StatusCode;
use thiserror::Error;

pub mod diff;
pub mod engine;
pub mod filter;
pub mod node;
pub mod paths;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote error: {0}")]
    Drive(#[from] DriveError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("remote node {0:?} is not a folder")]
    NotAFolder(String),
    #[error("remote node {0:?} is not a file")]
    NotAFile(String),
    #[error("remote path not found: {0}")]
    RemoteNotFound(String),
    #[error("could not create remote folder {0:?}")]
    FolderNotCreated(String),
    #[error("remote name {0:?} cannot be used as a local file name")]
    UnsupportedName(String),
    #[error("download of {name:?} returned {status}")]
    Download { name: String, status: StatusCode },
}
