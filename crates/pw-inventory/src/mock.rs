//! Scriptable collaborators for testing.
//!
//! [`MockAssetsInventory`] replays canned listings and records every request
//! it receives, so tests can assert how often a scope was queried.
//! [`MockResourceManager`] serves display names from a table and counts
//! lookups.

use crate::asset::{ContentType, RawAsset};
use crate::client::{AssetIterator, AssetsInventory, ListAssetsRequest, ResourceManager};
use crate::error::{InventoryError, InventoryResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    /// `None` matches any parent.
    parent: Option<String>,
    asset_type: String,
    content_type: ContentType,
}

/// Mock asset listing API.
#[derive(Default)]
pub struct MockAssetsInventory {
    routes: HashMap<RouteKey, Vec<InventoryResult<RawAsset>>>,
    item_delay: Option<Duration>,
    requests: Arc<Mutex<Vec<ListAssetsRequest>>>,
}

impl MockAssetsInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        mut self,
        key: RouteKey,
        items: impl IntoIterator<Item = InventoryResult<RawAsset>>,
    ) -> Self {
        self.routes.entry(key).or_default().extend(items);
        self
    }

    /// Serves `assets` for the given type and content type under any parent.
    pub fn with_assets(
        self,
        asset_type: &str,
        content_type: ContentType,
        assets: Vec<RawAsset>,
    ) -> Self {
        let key = RouteKey {
            parent: None,
            asset_type: asset_type.to_string(),
            content_type,
        };
        self.push(key, assets.into_iter().map(Ok))
    }

    /// Serves `assets` only when listing under `parent`.
    pub fn with_parent_assets(
        self,
        parent: &str,
        asset_type: &str,
        content_type: ContentType,
        assets: Vec<RawAsset>,
    ) -> Self {
        let key = RouteKey {
            parent: Some(parent.to_string()),
            asset_type: asset_type.to_string(),
            content_type,
        };
        self.push(key, assets.into_iter().map(Ok))
    }

    /// Fails the listing after any assets already scripted for it.
    pub fn with_error(
        self,
        asset_type: &str,
        content_type: ContentType,
        error: InventoryError,
    ) -> Self {
        let key = RouteKey {
            parent: None,
            asset_type: asset_type.to_string(),
            content_type,
        };
        self.push(key, [Err(error)])
    }

    /// Fails the listing under `parent` after any assets already scripted.
    pub fn with_parent_error(
        self,
        parent: &str,
        asset_type: &str,
        content_type: ContentType,
        error: InventoryError,
    ) -> Self {
        let key = RouteKey {
            parent: Some(parent.to_string()),
            asset_type: asset_type.to_string(),
            content_type,
        };
        self.push(key, [Err(error)])
    }

    /// Delays every item, to widen interleaving windows.
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = Some(delay);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ListAssetsRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests received for `parent`.
    pub fn request_count(&self, parent: &str) -> usize {
        self.requests().iter().filter(|r| r.parent == parent).count()
    }

    fn script_for(&self, request: &ListAssetsRequest) -> VecDeque<InventoryResult<RawAsset>> {
        let mut items = VecDeque::new();
        for asset_type in &request.asset_types {
            let specific = RouteKey {
                parent: Some(request.parent.clone()),
                asset_type: asset_type.clone(),
                content_type: request.content_type,
            };
            let any_parent = RouteKey {
                parent: None,
                ..specific.clone()
            };
            let script = self
                .routes
                .get(&specific)
                .or_else(|| self.routes.get(&any_parent));
            if let Some(script) = script {
                items.extend(script.iter().cloned());
            }
        }
        items
    }
}

impl AssetsInventory for MockAssetsInventory {
    fn list_assets(
        &self,
        request: ListAssetsRequest,
        _cancel: &CancellationToken,
    ) -> Box<dyn AssetIterator> {
        let items = self.script_for(&request);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        Box::new(MockAssetIterator {
            items,
            delay: self.item_delay,
        })
    }
}

struct MockAssetIterator {
    items: VecDeque<InventoryResult<RawAsset>>,
    delay: Option<Duration>,
}

#[async_trait]
impl AssetIterator for MockAssetIterator {
    async fn next(&mut self) -> InventoryResult<Option<RawAsset>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.items.pop_front().transpose()
    }
}

/// Mock resource manager serving display names from a table.
#[derive(Default)]
pub struct MockResourceManager {
    projects: HashMap<String, String>,
    organizations: HashMap<String, String>,
    fail_projects: bool,
    fail_organizations: bool,
    project_lookups: AtomicUsize,
    organization_lookups: AtomicUsize,
}

impl MockResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, name: &str, display_name: &str) -> Self {
        self.projects.insert(name.to_string(), display_name.to_string());
        self
    }

    pub fn with_organization(mut self, name: &str, display_name: &str) -> Self {
        self.organizations
            .insert(name.to_string(), display_name.to_string());
        self
    }

    /// Makes every project lookup fail.
    pub fn failing_projects(mut self) -> Self {
        self.fail_projects = true;
        self
    }

    /// Makes every organization lookup fail.
    pub fn failing_organizations(mut self) -> Self {
        self.fail_organizations = true;
        self
    }

    pub fn project_lookups(&self) -> usize {
        self.project_lookups.load(Ordering::SeqCst)
    }

    pub fn organization_lookups(&self) -> usize {
        self.organization_lookups.load(Ordering::SeqCst)
    }
}

fn lookup(
    table: &HashMap<String, String>,
    fail: bool,
    name: &str,
    cancel: &CancellationToken,
) -> InventoryResult<String> {
    if cancel.is_cancelled() {
        return Err(InventoryError::Cancelled);
    }
    if fail {
        return Err(InventoryError::PermissionDenied(format!(
            "Mock lookup of {} denied",
            name
        )));
    }
    table
        .get(name)
        .cloned()
        .ok_or_else(|| InventoryError::NotFound(name.to_string()))
}

#[async_trait]
impl ResourceManager for MockResourceManager {
    async fn project_display_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<String> {
        self.project_lookups.fetch_add(1, Ordering::SeqCst);
        lookup(&self.projects, self.fail_projects, name, cancel)
    }

    async fn organization_display_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<String> {
        self.organization_lookups.fetch_add(1, Ordering::SeqCst);
        lookup(&self.organizations, self.fail_organizations, name, cancel)
    }
}
