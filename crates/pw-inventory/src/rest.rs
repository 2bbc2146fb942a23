//! REST implementations of the collaborator traits.
//!
//! `RestAssetsInventory` pages through `GET /v1/{parent}/assets` lazily;
//! `RestResourceManager` reads display names from `GET /v3/{name}`.

use crate::asset::RawAsset;
use crate::client::{AssetIterator, AssetsInventory, ListAssetsRequest, ResourceManager};
use crate::error::InventoryResult;
use crate::http::HttpClient;
use crate::rate_limiter::{GET_ORGANIZATION_METHOD, GET_PROJECT_METHOD, LIST_ASSETS_METHOD};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

const DEFAULT_PAGE_SIZE: u32 = 500;

/// Cloud Asset API listing over REST.
#[derive(Debug, Clone)]
pub struct RestAssetsInventory {
    http: Arc<HttpClient>,
    base_url: String,
    page_size: u32,
}

impl RestAssetsInventory {
    pub fn new(http: Arc<HttpClient>, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl AssetsInventory for RestAssetsInventory {
    fn list_assets(
        &self,
        request: ListAssetsRequest,
        cancel: &CancellationToken,
    ) -> Box<dyn AssetIterator> {
        Box::new(RestAssetIterator {
            http: Arc::clone(&self.http),
            url: assets_url(&self.base_url, &request.parent),
            page_size: self.page_size,
            request,
            buffer: VecDeque::new(),
            page_token: None,
            exhausted: false,
            cancel: cancel.clone(),
        })
    }
}

fn assets_url(base_url: &str, parent: &str) -> String {
    format!("{}/v1/{}/assets", base_url, parent.trim_start_matches('/'))
}

fn list_query(
    request: &ListAssetsRequest,
    page_size: u32,
    page_token: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut query = Vec::with_capacity(request.asset_types.len() + 3);
    for asset_type in &request.asset_types {
        query.push(("assetTypes", asset_type.clone()));
    }
    query.push(("contentType", request.content_type.as_str().to_string()));
    query.push(("pageSize", page_size.to_string()));
    if let Some(token) = page_token {
        query.push(("pageToken", token.to_string()));
    }
    query
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAssetsResponse {
    #[serde(default)]
    assets: Vec<RawAsset>,
    #[serde(default)]
    next_page_token: Option<String>,
}

struct RestAssetIterator {
    http: Arc<HttpClient>,
    url: String,
    page_size: u32,
    request: ListAssetsRequest,
    buffer: VecDeque<RawAsset>,
    page_token: Option<String>,
    exhausted: bool,
    cancel: CancellationToken,
}

impl RestAssetIterator {
    async fn fetch_page(&mut self) -> InventoryResult<()> {
        let query = list_query(&self.request, self.page_size, self.page_token.as_deref());
        let page: ListAssetsResponse = self
            .http
            .get_json(LIST_ASSETS_METHOD, &self.url, &query, &self.cancel)
            .await?;

        debug!(
            parent = %self.request.parent,
            count = page.assets.len(),
            "Fetched asset page"
        );
        self.buffer.extend(page.assets);
        match page.next_page_token.filter(|t| !t.is_empty()) {
            Some(token) => self.page_token = Some(token),
            None => self.exhausted = true,
        }
        Ok(())
    }
}

#[async_trait]
impl AssetIterator for RestAssetIterator {
    async fn next(&mut self) -> InventoryResult<Option<RawAsset>> {
        loop {
            if let Some(asset) = self.buffer.pop_front() {
                return Ok(Some(asset));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }
}

/// Resource Manager display-name lookups over REST.
#[derive(Debug, Clone)]
pub struct RestResourceManager {
    http: Arc<HttpClient>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisplayNameResponse {
    #[serde(default)]
    display_name: String,
}

impl RestResourceManager {
    pub fn new(http: Arc<HttpClient>, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn display_name(
        &self,
        method: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<String> {
        let url = format!("{}/v3/{}", self.base_url, name.trim_start_matches('/'));
        let response: DisplayNameResponse = self.http.get_json(method, &url, &[], cancel).await?;
        Ok(response.display_name)
    }
}

#[async_trait]
impl ResourceManager for RestResourceManager {
    #[instrument(skip(self, cancel))]
    async fn project_display_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<String> {
        self.display_name(GET_PROJECT_METHOD, name, cancel).await
    }

    #[instrument(skip(self, cancel))]
    async fn organization_display_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<String> {
        self.display_name(GET_ORGANIZATION_METHOD, name, cancel).await
    }
}
