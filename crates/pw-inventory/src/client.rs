//! Collaborator interfaces consumed by the inventory engine.
//!
//! The engine never talks to a cloud API directly; it is handed an
//! [`AssetsInventory`] for listing and a [`ResourceManager`] for display
//! names. [`crate::rest`] provides HTTP implementations and
//! [`crate::mock`] provides scriptable ones for tests.

use crate::asset::{ContentType, RawAsset};
use crate::error::InventoryResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A single listing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListAssetsRequest {
    /// Scope to list under, e.g. `projects/1` or `folders/7`.
    pub parent: String,
    /// Asset types to include.
    pub asset_types: Vec<String>,
    /// Which facet to return.
    pub content_type: ContentType,
}

impl ListAssetsRequest {
    pub fn new(
        parent: impl Into<String>,
        asset_types: Vec<String>,
        content_type: ContentType,
    ) -> Self {
        Self {
            parent: parent.into(),
            asset_types,
            content_type,
        }
    }
}

/// Lazy, possibly failing sequence of assets.
#[async_trait]
pub trait AssetIterator: Send {
    /// Returns the next asset, or `Ok(None)` once the listing is done.
    async fn next(&mut self) -> InventoryResult<Option<RawAsset>>;
}

/// Cloud asset listing capability.
pub trait AssetsInventory: Send + Sync {
    /// Starts a listing. No call is made until the iterator is polled.
    fn list_assets(
        &self,
        request: ListAssetsRequest,
        cancel: &CancellationToken,
    ) -> Box<dyn AssetIterator>;
}

/// Hierarchy display-name lookups.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Display name of `projects/<id>`.
    async fn project_display_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<String>;

    /// Display name of `organizations/<id>`.
    async fn organization_display_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<String>;
}
