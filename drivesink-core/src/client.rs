use std::{path::Path, sync::Arc};

use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};
use url::Url;

use crate::credential::{Credential, CredentialError, CredentialStore};
use crate::refresh::{RefreshClient, RefreshError};

/// Called with `(bytes_sent, total_bytes)` while a file body streams out.
pub type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        code: Option<String>,
        message: Option<String>,
        body: String,
    },
    #[error("access token rejected after refresh")]
    Unauthorized,
    #[error("credential refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("credential refresh already failed for this token")]
    RefreshFailed,
    #[error("credential store error: {0}")]
    Credential(#[from] CredentialError),
    #[error("expected exactly one root node, found {count}")]
    RootNotFound { count: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Which base URL of the credential a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Metadata,
    Content,
}

struct Session {
    credential: Credential,
    generation: u64,
}

/// Authenticated client for the metadata and content services.
///
/// A 401 triggers one credential refresh shared by every request that saw
/// the same expired token; the original request is then retried once.
pub struct DriveClient {
    http: Client,
    session: RwLock<Session>,
    // Generation whose refresh failed; later 401s on it fail fast.
    refresh_gate: Mutex<Option<u64>>,
    refresher: Option<RefreshClient>,
    store: Option<CredentialStore>,
}

impl DriveClient {
    pub fn new(credential: Credential) -> Self {
        Self {
            http: Client::new(),
            session: RwLock::new(Session {
                credential,
                generation: 0,
            }),
            refresh_gate: Mutex::new(None),
            refresher: None,
            store: None,
        }
    }

    pub fn with_refresher(mut self, refresher: RefreshClient) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn credential(&self) -> Credential {
        self.session.read().await.credential.clone()
    }

    /// Sends one request, recovering once from an expired access token.
    ///
    /// `prepare` runs for every attempt so that bodies are rebuilt for the
    /// retry. Headers in `headers` override the defaults.
    pub async fn execute<F>(
        &self,
        method: Method,
        service: Service,
        path: &str,
        headers: &HeaderMap,
        prepare: F,
    ) -> Result<Response, DriveError>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder, DriveError>,
    {
        self.execute_with(method, service, path, headers, |r| {
            std::future::ready(prepare(r))
        })
        .await
    }

    /// Like [`DriveClient::execute`], for bodies that need async setup such
    /// as opening the file to stream.
    pub async fn execute_with<F, Fut>(
        &self,
        method: Method,
        service: Service,
        path: &str,
        headers: &HeaderMap,
        prepare: F,
    ) -> Result<Response, DriveError>
    where
        F: Fn(RequestBuilder) -> Fut,
        Fut: Future<Output = Result<RequestBuilder, DriveError>>,
    {
        let mut refresh = true;
        loop {
            let (url, auth, generation) = {
                let session = self.session.read().await;
                (
                    endpoint(&session.credential, service, path)?,
                    HeaderValue::from_str(&format!("Bearer {}", session.credential.access_token))?,
                    session.generation,
                )
            };
            let mut merged = HeaderMap::new();
            merged.insert(AUTHORIZATION, auth);
            for (name, value) in headers {
                merged.insert(name.clone(), value.clone());
            }

            let request = prepare(self.http.request(method.clone(), url).headers(merged)).await?;
            let response = request.send().await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Self::check_status(response).await;
            }
            if !refresh {
                error!(%method, path, "access token rejected after refresh");
                return Err(DriveError::Unauthorized);
            }
            warn!(%method, path, "access token rejected, refreshing credential");
            self.refresh_after(generation).await?;
            refresh = false;
        }
    }

    pub async fn get_root(&self) -> Result<NodeRecord, DriveError> {
        let response = self
            .execute(Method::GET, Service::Metadata, "nodes", &HeaderMap::new(), |r| {
                Ok(r.query(&[("filters", "isRoot:true")]))
            })
            .await?;
        let list: NodeList = response.json().await?;
        let count = list.count.unwrap_or(list.data.len() as u64);
        if count != 1 {
            return Err(DriveError::RootNotFound { count });
        }
        list.data
            .into_iter()
            .next()
            .ok_or(DriveError::RootNotFound { count: 0 })
    }

    /// Lists every child of a folder, following continuation tokens.
    pub async fn list_children(&self, id: &str) -> Result<Vec<NodeRecord>, DriveError> {
        let path = format!("nodes/{id}/children");
        let mut items = Vec::new();
        let mut start_token: Option<String> = None;
        loop {
            let response = self
                .execute(Method::GET, Service::Metadata, &path, &HeaderMap::new(), |r| {
                    Ok(match &start_token {
                        Some(token) => r.query(&[("startToken", token.as_str())]),
                        None => r,
                    })
                })
                .await?;
            let page: NodeList = response.json().await?;
            items.extend(page.data);
            match page.next_token.filter(|token| !token.is_empty()) {
                Some(token) => start_token = Some(token),
                None => break,
            }
        }
        debug!(id, count = items.len(), "listed children");
        Ok(items)
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<NodeRecord, DriveError> {
        let body = json!({
            "kind": "FOLDER",
            "name": name,
            "parents": [parent_id],
        });
        let response = self
            .execute(Method::POST, Service::Metadata, "nodes", &HeaderMap::new(), |r| {
                Ok(r.json(&body))
            })
            .await?;
        Ok(response.json().await?)
    }

    pub async fn trash_node(&self, id: &str) -> Result<(), DriveError> {
        self.execute(
            Method::PUT,
            Service::Metadata,
            &format!("trash/{id}"),
            &HeaderMap::new(),
            Ok,
        )
        .await?;
        Ok(())
    }

    /// Creates a file node from `source` with a multipart request.
    pub async fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        source: &Path,
        progress: Option<Arc<ProgressFn>>,
    ) -> Result<NodeRecord, DriveError> {
        let metadata = serde_json::to_string(&json!({
            "kind": "FILE",
            "name": name,
            "parents": [parent_id],
        }))?;
        let total = tokio::fs::metadata(source).await?.len();
        let metadata = &metadata;
        let progress = &progress;
        let response = self
            .execute_with(Method::POST, Service::Content, "nodes", &HeaderMap::new(), move |r| {
                let progress = progress.clone();
                async move {
                    // Reopened per attempt so a retry streams from the start.
                    let file = tokio::fs::File::open(source).await?;
                    let body = progress_body(file, total, progress);
                    let content = Part::stream_with_length(body, total)
                        .file_name(name.to_string())
                        .mime_str("application/octet-stream")?;
                    let form = Form::new()
                        .text("metadata", metadata.clone())
                        .part("content", content);
                    Ok::<_, DriveError>(r.multipart(form))
                }
            })
            .await?;
        Ok(response.json().await?)
    }

    /// Starts a streamed content download; the body is left undecoded.
    pub async fn download_content(&self, id: &str) -> Result<Response, DriveError> {
        self.execute(
            Method::GET,
            Service::Content,
            &format!("nodes/{id}/content"),
            &HeaderMap::new(),
            Ok,
        )
        .await
    }

    async fn refresh_after(&self, seen_generation: u64) -> Result<(), DriveError> {
        let mut failed = self.refresh_gate.lock().await;
        if self.session.read().await.generation != seen_generation {
            debug!("credential already refreshed by a concurrent request");
            return Ok(());
        }
        if *failed == Some(seen_generation) {
            return Err(DriveError::RefreshFailed);
        }
        match self.refresh_credential().await {
            Ok(credential) => {
                let mut session = self.session.write().await;
                session.credential = credential;
                session.generation += 1;
                Ok(())
            }
            Err(err) => {
                *failed = Some(seen_generation);
                Err(err)
            }
        }
    }

    async fn refresh_credential(&self) -> Result<Credential, DriveError> {
        let refresher = self.refresher.as_ref().ok_or(DriveError::Unauthorized)?;
        let current = self.credential().await;
        let update = refresher.refresh(&current.refresh_token).await?;
        let refreshed = current.merged(update)?;
        if let Some(store) = self.store.clone() {
            let path = store.path().to_path_buf();
            let saved = refreshed.clone();
            tokio::task::spawn_blocking(move || store.save(&saved))
                .await
                .map_err(|err| CredentialError::Write {
                    path: path.clone(),
                    source: std::io::Error::other(err),
                })??;
            debug!(path = ?path, "persisted refreshed credential");
        }
        Ok(refreshed)
    }

    async fn check_status(response: Response) -> Result<Response, DriveError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = parse_api_error(&body);
        if let Some((code, message)) = &parsed {
            error!(%status, code = %code, message = %message, "remote request failed");
        } else {
            error!(%status, "remote request failed");
        }
        let (code, message) = parsed.unzip();
        Err(DriveError::Api {
            status,
            code,
            message,
            body,
        })
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            DriveError::Unauthorized | DriveError::Refresh(_) | DriveError::RefreshFailed => {
                Some(ApiErrorClass::Auth)
            }
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Extracts the provider's `{code, message}` pair from an error body.
pub(crate) fn parse_api_error(body: &str) -> Option<(String, String)> {
    let value: Value = serde_json::from_str(body).ok()?;
    let field = |key: &str| {
        value.get(key).map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
    };
    match (field("code"), field("message")) {
        (None, None) => None,
        (code, message) => Some((
            code.unwrap_or_else(|| "unknown".to_string()),
            message.unwrap_or_default(),
        )),
    }
}

fn endpoint(credential: &Credential, service: Service, path: &str) -> Result<Url, DriveError> {
    let base = match service {
        Service::Metadata => &credential.metadata_url,
        Service::Content => &credential.content_url,
    };
    let base = if base.ends_with('/') {
        Url::parse(base)?
    } else {
        Url::parse(&format!("{base}/"))?
    };
    Ok(base.join(path)?)
}

fn progress_body(file: tokio::fs::File, total: u64, progress: Option<Arc<ProgressFn>>) -> Body {
    let mut sent = 0u64;
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let (Ok(bytes), Some(report)) = (&chunk, &progress) {
            sent += bytes.len() as u64;
            report(sent, total);
        }
        chunk
    });
    Body::wrap_stream(stream)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: NodeKind,
    #[serde(default)]
    pub content_properties: Option<ContentProperties>,
}

impl NodeRecord {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn size(&self) -> Option<u64> {
        self.content_properties.as_ref().and_then(|p| p.size)
    }

    pub fn md5(&self) -> Option<&str> {
        self.content_properties
            .as_ref()
            .and_then(|p| p.md5.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Folder,
    File,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ContentProperties {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub md5: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeList {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    data: Vec<NodeRecord>,
    #[serde(default)]
    next_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(metadata_url: &str) -> Credential {
        Credential {
            access_token: "a".into(),
            refresh_token: "r".into(),
            metadata_url: metadata_url.into(),
            content_url: "https://content.example/cdproxy/".into(),
            extra: Default::default(),
        }
    }

    #[test]
    fn endpoint_joins_relative_to_base_with_or_without_slash() {
        let with_slash = credential("https://meta.example/drive/v1/");
        let without = credential("https://meta.example/drive/v1");
        assert_eq!(
            endpoint(&with_slash, Service::Metadata, "nodes/x/children")
                .unwrap()
                .as_str(),
            "https://meta.example/drive/v1/nodes/x/children"
        );
        assert_eq!(
            endpoint(&without, Service::Metadata, "trash/x").unwrap().as_str(),
            "https://meta.example/drive/v1/trash/x"
        );
        assert_eq!(
            endpoint(&with_slash, Service::Content, "nodes").unwrap().as_str(),
            "https://content.example/cdproxy/nodes"
        );
    }

    #[test]
    fn parse_api_error_reads_code_and_message() {
        assert_eq!(
            parse_api_error(r#"{"code":"NAME_ALREADY_EXISTS","message":"dup"}"#),
            Some(("NAME_ALREADY_EXISTS".to_string(), "dup".to_string()))
        );
        assert_eq!(
            parse_api_error(r#"{"message":"boom"}"#),
            Some(("unknown".to_string(), "boom".to_string()))
        );
        assert_eq!(parse_api_error("<html>"), None);
        assert_eq!(parse_api_error("{}"), None);
    }

    #[test]
    fn classifies_statuses_like_the_service_contract() {
        assert_eq!(
            classify_api_status(StatusCode::FORBIDDEN),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::Permanent
        );
        assert_eq!(
            DriveError::Unauthorized.classification(),
            Some(ApiErrorClass::Auth)
        );
    }

    #[test]
    fn node_record_tolerates_unknown_kinds_and_null_names() {
        let record: NodeRecord = serde_json::from_value(json!({
            "id": "root",
            "name": null,
            "kind": "ASSET"
        }))
        .unwrap();
        assert_eq!(record.kind, NodeKind::Other);
        assert_eq!(record.name(), "");
        assert_eq!(record.size(), None);
    }
}
