use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::client::parse_api_error;

pub const DEFAULT_REFRESH_BASE_URL: &str = "https://drivesink.appspot.com";

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("refresh service returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("refresh service returned a body that is not a JSON object")]
    InvalidBody,
}

/// Exchanges a refresh token through the proxy that holds the client secret.
#[derive(Clone)]
pub struct RefreshClient {
    http: Client,
    base_url: Url,
}

impl RefreshClient {
    pub fn new() -> Result<Self, RefreshError> {
        Self::with_base_url(DEFAULT_REFRESH_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, RefreshError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Page where users obtain a fresh credential file.
    pub fn config_url(&self) -> Result<Url, RefreshError> {
        self.endpoint("config")
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Map<String, Value>, RefreshError> {
        let url = self.endpoint("refresh")?;
        let form = [("refresh_token", refresh_token)];
        let response = self.http.post(url).form(&form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if let Some((code, message)) = parse_api_error(&body) {
                error!(%status, code = %code, message = %message, "refresh service rejected request");
            }
            return Err(RefreshError::Api { status, body });
        }
        match response.json::<Value>().await? {
            Value::Object(fields) => Ok(fields),
            _ => Err(RefreshError::InvalidBody),
        }
    }

    fn endpoint(&self, name: &str) -> Result<Url, RefreshError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{name}"))?)
    }
}
