mod client;
mod credential;
mod refresh;

pub use client::{
    ApiErrorClass, ContentProperties, DriveClient, DriveError, NodeKind, NodeRecord, ProgressFn,
    Service,
};
pub use credential::{Credential, CredentialError, CredentialStore};
pub use refresh::{DEFAULT_REFRESH_BASE_URL, RefreshClient, RefreshError};
