use std::path::{Path, PathBuf};

use anyhow::Context;
use drivesink_core::{CredentialStore, DEFAULT_REFRESH_BASE_URL, DriveClient, RefreshClient};

const CONFIG_ENV: &str = "DRIVESINK";
const DEFAULT_CONFIG_NAME: &str = ".drivesink";

/// Where credentials live and which service refreshes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub refresh_base_url: String,
}

impl Settings {
    /// Resolves settings from command-line overrides, then the environment.
    ///
    /// The credential path is `config`, else `$DRIVESINK`, else `~/.drivesink`.
    pub fn resolve(config: Option<PathBuf>, refresh_base_url: Option<String>) -> anyhow::Result<Self> {
        let from_env = std::env::var(CONFIG_ENV).ok().filter(|value| !value.is_empty());
        Self::from_parts(config, from_env, refresh_base_url, dirs::home_dir)
    }

    fn from_parts(
        config: Option<PathBuf>,
        from_env: Option<String>,
        refresh_base_url: Option<String>,
        home_dir: impl Fn() -> Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let home = || home_dir().context("home directory is unavailable");
        let config_path = match (config, from_env) {
            (Some(path), _) => expand_with_home(path, home)?,
            (None, Some(value)) => expand_with_home(PathBuf::from(value), home)?,
            (None, None) => home()?.join(DEFAULT_CONFIG_NAME),
        };
        Ok(Self {
            config_path,
            refresh_base_url: refresh_base_url
                .unwrap_or_else(|| DEFAULT_REFRESH_BASE_URL.to_string()),
        })
    }

    /// Loads the credential store and wires a client that refreshes into it.
    pub fn build_client(&self) -> anyhow::Result<DriveClient> {
        let refresher = RefreshClient::with_base_url(&self.refresh_base_url)
            .with_context(|| format!("invalid refresh service URL {}", self.refresh_base_url))?;
        let store = CredentialStore::new(&self.config_path);
        let credential = match store.load() {
            Ok(credential) => credential,
            Err(err) => {
                let hint = refresher
                    .config_url()
                    .map(|url| url.to_string())
                    .unwrap_or_else(|_| format!("{}/config", self.refresh_base_url));
                return Err(anyhow::Error::new(err)
                    .context(format!("visit {hint} to get your tokens")));
            }
        };
        tracing::debug!(path = %self.config_path.display(), "loaded credentials");
        Ok(DriveClient::new(credential)
            .with_refresher(refresher)
            .with_store(store))
    }
}

/// Expands a leading `~`, asking for the home directory only when needed.
fn expand_with_home(
    value: PathBuf,
    home: impl FnOnce() -> anyhow::Result<PathBuf>,
) -> anyhow::Result<PathBuf> {
    if value == Path::new("~") {
        return home();
    }
    match value.strip_prefix("~") {
        Ok(rest) => Ok(home()?.join(rest)),
        Err(_) => Ok(value),
    }
}
