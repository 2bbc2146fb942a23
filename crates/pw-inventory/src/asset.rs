//! Inventory data model.
//!
//! Raw observations come off the listing streams, get merged by name,
//! enriched with hierarchy metadata into [`ExtendedAsset`]s, and finally
//! grouped into the bundle types at the bottom of this module.

use crate::error::{InventoryError, InventoryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// Asset-type taxonomy keys.

pub const CRM_ORG_ASSET_TYPE: &str = "cloudresourcemanager.googleapis.com/Organization";
pub const CRM_FOLDER_ASSET_TYPE: &str = "cloudresourcemanager.googleapis.com/Folder";
pub const CRM_PROJECT_ASSET_TYPE: &str = "cloudresourcemanager.googleapis.com/Project";
pub const COMPUTE_INSTANCE_ASSET_TYPE: &str = "compute.googleapis.com/Instance";
pub const COMPUTE_FIREWALL_ASSET_TYPE: &str = "compute.googleapis.com/Firewall";
pub const COMPUTE_DISK_ASSET_TYPE: &str = "compute.googleapis.com/Disk";
pub const COMPUTE_NETWORK_ASSET_TYPE: &str = "compute.googleapis.com/Network";
pub const COMPUTE_SUBNETWORK_ASSET_TYPE: &str = "compute.googleapis.com/Subnetwork";
pub const DNS_POLICY_ASSET_TYPE: &str = "dns.googleapis.com/Policy";
pub const STORAGE_BUCKET_ASSET_TYPE: &str = "storage.googleapis.com/Bucket";
pub const IAM_SERVICE_ACCOUNT_ASSET_TYPE: &str = "iam.googleapis.com/ServiceAccount";
pub const IAM_SERVICE_ACCOUNT_KEY_ASSET_TYPE: &str = "iam.googleapis.com/ServiceAccountKey";
pub const GKE_CLUSTER_ASSET_TYPE: &str = "container.googleapis.com/Cluster";
pub const LOG_SINK_ASSET_TYPE: &str = "logging.googleapis.com/LogSink";
pub const MONITORING_LOG_METRIC_ASSET_TYPE: &str = "logging.googleapis.com/LogMetric";
pub const MONITORING_ALERT_POLICY_ASSET_TYPE: &str = "monitoring.googleapis.com/AlertPolicy";
pub const SERVICE_USAGE_ASSET_TYPE: &str = "serviceusage.googleapis.com/Service";

/// Field stamped onto network resources matched by a DNS policy.
pub const ENABLED_DNS_LOGGING_FIELD: &str = "enabledDnsLogging";

/// Which facet of an asset a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    /// The configuration payload.
    Resource,
    /// The access-policy payload.
    IamPolicy,
}

impl ContentType {
    /// Wire name of the content type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Resource => "RESOURCE",
            ContentType::IamPolicy => "IAM_POLICY",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration facet of an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Provider-specific payload, kept opaque.
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// One observation of a cloud resource.
///
/// A single observation carries at most one facet; the merger combines the
/// resource and policy observations that share a `name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAsset {
    pub name: String,
    #[serde(default)]
    pub asset_type: String,
    /// Containing scopes, nearest first.
    #[serde(default)]
    pub ancestors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<AssetResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_policy: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

/// A raw asset after its facets were merged by name.
pub type MergedAsset = RawAsset;

impl RawAsset {
    /// Creates an asset observation with no facet.
    pub fn new(name: impl Into<String>, asset_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            asset_type: asset_type.into(),
            ..Default::default()
        }
    }

    /// Sets the ancestor chain.
    pub fn with_ancestors<I, S>(mut self, ancestors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ancestors = ancestors.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a resource facet with the given payload.
    pub fn with_resource(mut self, data: Map<String, Value>) -> Self {
        self.resource = Some(AssetResource {
            data,
            ..Default::default()
        });
        self
    }

    /// Attaches a policy facet.
    pub fn with_iam_policy(mut self, policy: Value) -> Self {
        self.iam_policy = Some(policy);
        self
    }

    pub fn has_resource(&self) -> bool {
        self.resource.is_some()
    }

    pub fn has_iam_policy(&self) -> bool {
        self.iam_policy.is_some()
    }

    /// Folds another observation of the same asset into this one.
    pub(crate) fn absorb(&mut self, other: RawAsset) {
        if other.resource.is_some() {
            self.resource = other.resource;
        }
        if other.iam_policy.is_some() {
            self.iam_policy = other.iam_policy;
        }
        if self.asset_type.is_empty() {
            self.asset_type = other.asset_type;
        }
        if self.ancestors.is_empty() {
            self.ancestors = other.ancestors;
        }
        if other.update_time > self.update_time {
            self.update_time = other.update_time;
        }
    }
}

/// Account and organization identity derived from an ancestor chain.
///
/// Names are best effort and left empty when the lookup failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudAccountMetadata {
    pub account_id: String,
    pub account_name: String,
    pub organisation_id: String,
    pub organization_name: String,
}

/// A merged asset enriched with its cloud account metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedAsset {
    #[serde(flatten)]
    asset: MergedAsset,
    cloud_account: Arc<CloudAccountMetadata>,
}

impl ExtendedAsset {
    pub fn new(asset: MergedAsset, cloud_account: Arc<CloudAccountMetadata>) -> Self {
        Self {
            asset,
            cloud_account,
        }
    }

    pub fn asset(&self) -> &MergedAsset {
        &self.asset
    }

    pub fn name(&self) -> &str {
        &self.asset.name
    }

    pub fn asset_type(&self) -> &str {
        &self.asset.asset_type
    }

    pub fn cloud_account(&self) -> &Arc<CloudAccountMetadata> {
        &self.cloud_account
    }

    /// Reads a field of the resource payload.
    pub fn resource_field(&self, key: &str) -> Option<&Value> {
        self.asset.resource.as_ref().and_then(|r| r.data.get(key))
    }

    pub fn into_parts(self) -> (MergedAsset, Arc<CloudAccountMetadata>) {
        (self.asset, self.cloud_account)
    }

    /// Returns a copy of this asset with one resource payload field set.
    pub(crate) fn with_resource_field(mut self, key: &str, value: Value) -> Self {
        self.asset
            .resource
            .get_or_insert_with(AssetResource::default)
            .data
            .insert(key.to_string(), value);
        self
    }
}

/// Assets of one project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAssets {
    pub cloud_account: Arc<CloudAccountMetadata>,
    pub assets: Vec<ExtendedAsset>,
}

/// Monitoring configuration of one project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringAsset {
    pub cloud_account: Arc<CloudAccountMetadata>,
    pub log_metrics: Vec<ExtendedAsset>,
    pub alerts: Vec<ExtendedAsset>,
}

/// A project's own policy followed by the policies of all its ancestors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPoliciesAsset {
    pub cloud_account: Arc<CloudAccountMetadata>,
    pub policies: Vec<ExtendedAsset>,
}

/// Log sinks of one project, including folder and organization sinks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingAsset {
    pub cloud_account: Arc<CloudAccountMetadata>,
    pub log_sinks: Vec<ExtendedAsset>,
}

/// Enabled services of one project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUsageAsset {
    pub cloud_account: Arc<CloudAccountMetadata>,
    pub services: Vec<ExtendedAsset>,
}

/// Root scope of an inventory run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Project(String),
    Organization(String),
}

impl Scope {
    pub fn is_organization(&self) -> bool {
        matches!(self, Scope::Organization(_))
    }

    /// Bare identifier without the `projects/` or `organizations/` prefix.
    pub fn id(&self) -> &str {
        match self {
            Scope::Project(id) | Scope::Organization(id) => id,
        }
    }
}

impl FromStr for Scope {
    type Err = InventoryError;

    fn from_str(s: &str) -> InventoryResult<Self> {
        let (kind, id) = s.split_once('/').ok_or_else(|| {
            InventoryError::ConfigError(format!(
                "Invalid scope '{}': expected projects/<id> or organizations/<id>",
                s
            ))
        })?;

        if id.is_empty() || id.contains('/') {
            return Err(InventoryError::ConfigError(format!(
                "Invalid scope '{}': identifier must be a single path segment",
                s
            )));
        }

        match kind {
            "projects" => Ok(Scope::Project(id.to_string())),
            "organizations" => Ok(Scope::Organization(id.to_string())),
            other => Err(InventoryError::ConfigError(format!(
                "Invalid scope kind '{}': expected projects or organizations",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = InventoryError;

    fn try_from(value: String) -> InventoryResult<Self> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Project(id) => write!(f, "projects/{}", id),
            Scope::Organization(id) => write!(f, "organizations/{}", id),
        }
    }
}
