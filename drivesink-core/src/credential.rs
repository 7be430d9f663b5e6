use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("cannot read credential store {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse credential store {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot write credential store {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid credential data: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Bearer credential plus the endpoints it is valid for.
///
/// Keys the service hands out beyond the four required ones are kept in
/// `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(rename = "metadataUrl")]
    pub metadata_url: String,
    #[serde(rename = "contentUrl")]
    pub content_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credential {
    /// Applies a refresh response on top of this credential, key by key.
    pub fn merged(&self, update: Map<String, Value>) -> Result<Credential, CredentialError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            fields.extend(update);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// JSON file holding the persisted [`Credential`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Credential, CredentialError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| CredentialError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CredentialError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Rewrites the store with sorted keys and four-space indentation.
    ///
    /// The file is written next to the target and renamed over it, so a
    /// crash never leaves a truncated store behind.
    pub fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let value: BTreeMap<String, Value> =
            serde_json::from_value(serde_json::to_value(credential)?)?;
        let mut payload = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut payload, formatter);
        value.serialize(&mut serializer)?;

        let staging = staging_path(&self.path);
        self.write_file(&staging, &payload)
            .and_then(|()| fs::rename(&staging, &self.path))
            .map_err(|source| {
                let _ = fs::remove_file(&staging);
                CredentialError::Write {
                    path: self.path.clone(),
                    source,
                }
            })
    }

    fn write_file(&self, path: &Path, payload: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)?;
        file.write_all(payload)?;
        file.sync_all()?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials".to_string());
    target.with_file_name(format!(".{name}.tmp"))
}
