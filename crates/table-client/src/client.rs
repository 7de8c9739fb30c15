//! Row listing client for the remote table service.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use std::time::Duration;

use rolesync_core::sync::{RowPage, RowProjection, RowSource};

use crate::error::{Result, TableClientError};
use crate::types::*;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
/// Largest page size the table service accepts.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Connection settings for [`TableClient`].
#[derive(Debug, Clone)]
pub struct TableClientConfig {
    /// e.g. "https://api.baserow.io"
    pub base_url: String,
    /// Database token, sent as `Authorization: Token <token>`.
    pub token: String,
    pub table_id: u64,
    pub page_size: u32,
    pub projection: RowProjection,
}

/// Client for one table's row listing.
#[derive(Debug, Clone)]
pub struct TableClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    table_id: u64,
    page_size: u32,
    projection: RowProjection,
}

impl TableClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[TableClient] API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[TableClient] API response error ({}): {}", status, preview);
    }

    pub fn new(config: TableClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            table_id: config.table_id,
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
            projection: config.projection,
        })
    }

    pub fn projection(&self) -> &RowProjection {
        &self.projection
    }

    /// URL of the first page of the row listing.
    pub fn rows_url(&self) -> String {
        format!(
            "{}/api/database/rows/table/{}/?user_field_names=true&size={}",
            self.base_url, self.table_id, self.page_size
        )
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Token {}", self.token))
            .map_err(|_| TableClientError::auth("Invalid database token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(TableClientError::api(status.as_u16(), error.describe()));
            }
            return Err(TableClientError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!("[TableClient] Failed to deserialize response: {}", e);
            TableClientError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Fetches one raw page. `next` is a link taken from a previous page.
    pub async fn fetch_raw_page(&self, next: Option<&str>) -> Result<RawRowPage> {
        let url = match next {
            Some(link) => link.to_string(),
            None => self.rows_url(),
        };
        debug!("[TableClient] GET {}", url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Fetches and projects one page.
    pub async fn fetch_rows(&self, next: Option<&str>) -> Result<RowPage> {
        let raw = self.fetch_raw_page(next).await?;
        let results = self.projection.project_all(&raw.results)?;
        Ok(RowPage {
            results,
            next: raw.next,
        })
    }
}

#[async_trait]
impl RowSource for TableClient {
    async fn fetch_page(&self, next: Option<&str>) -> rolesync_core::Result<RowPage> {
        Ok(self.fetch_rows(next).await?)
    }
}
