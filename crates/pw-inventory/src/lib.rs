//! # pw-inventory
//!
//! Cloud asset inventory aggregation for Posture Warden.
//!
//! This crate lists assets under a project or organization, joins their
//! resource and IAM policy facets, attaches project and organization
//! identity, and streams the results as the bundles posture checks consume.
//!
//! ## Pipelines
//!
//! Every operation on [`Provider`] runs as a set of tasks joined by bounded
//! queues: one producer per listing, a merger per facet pair, and the
//! caller's sender as the last stage. A [`CancellationToken`] stops all of
//! them.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod ancestors;
pub mod asset;
pub mod client;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod http;
pub mod memo;
pub mod merge;
pub mod mock;
pub mod network;
pub mod pipeline;
pub mod provider;
pub mod rate_limiter;
pub mod rest;
pub mod retry;

pub use asset::{
    AssetResource, CloudAccountMetadata, ContentType, ExtendedAsset, LoggingAsset, MergedAsset,
    MonitoringAsset, ProjectAssets, ProjectPoliciesAsset, RawAsset, Scope, ServiceUsageAsset,
};
pub use client::{AssetIterator, AssetsInventory, ListAssetsRequest, ResourceManager};
pub use config::{AccessToken, ConfigError, InventoryConfig, MonitoringTypes};
pub use error::{InventoryError, InventoryResult};
pub use mock::{MockAssetsInventory, MockResourceManager};
pub use provider::{group_by_project, Provider};
pub use rate_limiter::{MethodQuota, MethodRateLimiter};
pub use rest::{RestAssetsInventory, RestResourceManager};
pub use retry::RetryPolicy;
