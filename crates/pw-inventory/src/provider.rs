//! Public aggregation operations.
//!
//! Every operation streams its results into the caller's sender and drops
//! it on return, so the closed channel is the completion signal. The
//! returned `Result` tells whether the run was complete: `StreamFailed`
//! names the listing that broke, `Cancelled` means the token fired and
//! nothing was sent after that.

use crate::ancestors::AncestorPolicyWalker;
use crate::asset::{
    CloudAccountMetadata, ContentType, ExtendedAsset, LoggingAsset, MergedAsset, MonitoringAsset,
    ProjectAssets, ProjectPoliciesAsset, Scope, ServiceUsageAsset, COMPUTE_NETWORK_ASSET_TYPE,
    CRM_PROJECT_ASSET_TYPE, DNS_POLICY_ASSET_TYPE, LOG_SINK_ASSET_TYPE, SERVICE_USAGE_ASSET_TYPE,
};
use crate::client::{AssetsInventory, ListAssetsRequest, ResourceManager};
use crate::config::{InventoryConfig, MonitoringTypes};
use crate::error::{InventoryError, InventoryResult};
use crate::hierarchy::HierarchyResolver;
use crate::http::HttpClient;
use crate::network::{decode_dns_policies, enrich_network_assets};
use crate::pipeline::{
    collect_listing, join_stage, recv_or_cancel, send_or_cancel, settle, spawn_producer,
    MergedListing,
};
use crate::rest::{RestAssetsInventory, RestResourceManager};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Cloud asset inventory aggregation engine for one root scope.
pub struct Provider {
    scope: Scope,
    inventory: Arc<dyn AssetsInventory>,
    resolver: Arc<HierarchyResolver>,
    walker: AncestorPolicyWalker,
    asset_types: Vec<String>,
    project_asset_types: Vec<String>,
    monitoring: MonitoringTypes,
    channel_capacity: usize,
}

impl Provider {
    /// Creates a provider with the default configuration for `scope`.
    pub fn new(
        scope: Scope,
        inventory: Arc<dyn AssetsInventory>,
        crm: Arc<dyn ResourceManager>,
    ) -> Self {
        Self::with_config(&InventoryConfig::for_scope(scope), inventory, crm)
    }

    /// Creates a provider over the given collaborators, configured from
    /// `config`.
    pub fn with_config(
        config: &InventoryConfig,
        inventory: Arc<dyn AssetsInventory>,
        crm: Arc<dyn ResourceManager>,
    ) -> Self {
        let channel_capacity = config.channel_capacity.max(1);
        let resolver = Arc::new(HierarchyResolver::new(config.scope.clone(), crm));
        let walker = AncestorPolicyWalker::new(
            Arc::clone(&inventory),
            Arc::clone(&resolver),
            channel_capacity,
        );
        Self {
            scope: config.scope.clone(),
            inventory,
            resolver,
            walker,
            asset_types: config.asset_types.clone(),
            project_asset_types: config.project_asset_types.clone(),
            monitoring: config.monitoring.clone(),
            channel_capacity,
        }
    }

    /// Creates a provider backed by the REST collaborators.
    pub fn from_config(config: &InventoryConfig) -> InventoryResult<Self> {
        config.validate()?;
        let http = Arc::new(HttpClient::from_config(config)?);
        let inventory = Arc::new(RestAssetsInventory::new(
            Arc::clone(&http),
            &config.endpoints.asset_api,
        ));
        let crm = Arc::new(RestResourceManager::new(
            http,
            &config.endpoints.resource_manager_api,
        ));
        Ok(Self::with_config(config, inventory, crm))
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Streams every asset of `asset_types` in the root scope, with both
    /// facets merged and account metadata attached. An empty list means the
    /// configured types.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn list_asset_types(
        &self,
        asset_types: &[String],
        out: mpsc::Sender<ExtendedAsset>,
        cancel: &CancellationToken,
    ) -> InventoryResult<()> {
        let asset_types = or_configured(asset_types, &self.asset_types);
        info!("Listing GCP asset types: {:?} in {}", asset_types, self.scope);

        let mut listing = self.open_merged(asset_types, cancel);
        while let Some(asset) = listing.next(cancel).await {
            let extended = self.enrich(asset, cancel).await;
            if !send_or_cancel(&out, extended, cancel).await {
                break;
            }
        }
        listing.finish(cancel).await
    }

    /// One bundle per project holding its `asset_types` assets. Folder and
    /// organization level assets are added to every project's bundle;
    /// projects without any asset of their own produce no bundle. An empty
    /// list means the configured per-project types.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn list_project_assets(
        &self,
        asset_types: &[String],
        out: mpsc::Sender<ProjectAssets>,
        cancel: &CancellationToken,
    ) -> InventoryResult<()> {
        let asset_types = or_configured(asset_types, &self.project_asset_types);
        info!("Listing GCP assets by project: {:?}", asset_types);

        self.send_grouped(asset_types, &out, cancel, |cloud_account, assets| {
            ProjectAssets {
                cloud_account,
                assets,
            }
        })
        .await
    }

    /// One bundle per project with its log-based metrics and alert
    /// policies. A project with only one of the two gets an empty list for
    /// the other.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn list_monitoring_assets(
        &self,
        out: mpsc::Sender<MonitoringAsset>,
        cancel: &CancellationToken,
    ) -> InventoryResult<()> {
        let log_metric_types = &self.monitoring.log_metrics;
        let mut asset_types = log_metric_types.clone();
        asset_types.extend(
            self.monitoring
                .alerts
                .iter()
                .filter(|t| !log_metric_types.contains(t))
                .cloned(),
        );
        info!("Listing GCP monitoring assets: {:?}", asset_types);

        self.send_grouped(&asset_types, &out, cancel, |cloud_account, assets| {
            let (log_metrics, alerts) = assets
                .into_iter()
                .partition(|asset| log_metric_types.iter().any(|t| t == asset.asset_type()));
            MonitoringAsset {
                cloud_account,
                log_metrics,
                alerts,
            }
        })
        .await
    }

    /// One bundle per project: the project's own policy followed by the
    /// policies of its folders and organization.
    ///
    /// Ancestor policies are memoized across projects and calls until
    /// [`Provider::clear`].
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn list_projects_ancestors_policies(
        &self,
        out: mpsc::Sender<ProjectPoliciesAsset>,
        cancel: &CancellationToken,
    ) -> InventoryResult<()> {
        info!("Listing GCP project policies with their ancestors");

        let request = ListAssetsRequest::new(
            self.scope.to_string(),
            vec![CRM_PROJECT_ASSET_TYPE.to_string()],
            ContentType::IamPolicy,
        );
        let (mut projects, producer) = spawn_producer(
            Arc::clone(&self.inventory),
            request,
            self.channel_capacity,
            cancel.clone(),
        );

        let mut listed = 0usize;
        while let Some(Ok(project)) = recv_or_cancel(&mut projects, cancel).await {
            // The project itself is the first ancestor.
            let ancestors: Vec<String> = project.ancestors.iter().skip(1).cloned().collect();
            let project_policy = self.enrich(project, cancel).await;
            let cloud_account = Arc::clone(project_policy.cloud_account());

            let mut policies = vec![project_policy];
            policies.extend(self.walker.policies_for(&ancestors, cancel).await);

            let bundle = ProjectPoliciesAsset {
                cloud_account,
                policies,
            };
            if !send_or_cancel(&out, bundle, cancel).await {
                break;
            }
            listed += 1;
        }
        drop(projects);

        info!(projects = listed, "Listed GCP project policies");
        settle(cancel, [join_stage(producer).await.map(|_| ())])
    }

    /// Streams network assets, annotated with the DNS logging flag of the
    /// DNS policy attached to them.
    ///
    /// A failed DNS policy listing leaves the networks unannotated; a failed
    /// network listing fails the call.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn list_network_assets(
        &self,
        out: mpsc::Sender<ExtendedAsset>,
        cancel: &CancellationToken,
    ) -> InventoryResult<()> {
        let network_types = vec![COMPUTE_NETWORK_ASSET_TYPE.to_string()];
        let mut listing = self.open_merged(&network_types, cancel);
        let networks = async {
            let mut networks = Vec::new();
            while let Some(asset) = listing.next(cancel).await {
                networks.push(asset);
            }
            listing.finish(cancel).await.map(|_| networks)
        };
        let dns_policies = collect_listing(
            Arc::clone(&self.inventory),
            ListAssetsRequest::new(
                self.scope.to_string(),
                vec![DNS_POLICY_ASSET_TYPE.to_string()],
                ContentType::Resource,
            ),
            self.channel_capacity,
            cancel,
        );

        let (networks, dns_policies) = tokio::join!(networks, dns_policies);
        let networks = networks?;
        let dns_policies = match dns_policies {
            Ok(policies) => policies,
            Err(InventoryError::Cancelled) => return Err(InventoryError::Cancelled),
            Err(e) => {
                warn!(error = %e, "DNS policies unavailable, network assets left unannotated");
                Vec::new()
            }
        };

        if networks.is_empty() {
            info!("No {} assets were listed", COMPUTE_NETWORK_ASSET_TYPE);
            return stopped(cancel);
        }

        let mut extended = Vec::with_capacity(networks.len());
        for network in networks {
            extended.push(self.enrich(network, cancel).await);
        }
        let enriched = enrich_network_assets(extended, &decode_dns_policies(&dns_policies));

        for network in enriched {
            if !send_or_cancel(&out, network, cancel).await {
                break;
            }
        }
        stopped(cancel)
    }

    /// Log sinks grouped by project. Folder and organization sinks are
    /// added to every project's bundle.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn list_logging_assets(
        &self,
        out: mpsc::Sender<LoggingAsset>,
        cancel: &CancellationToken,
    ) -> InventoryResult<()> {
        let sink_types = [LOG_SINK_ASSET_TYPE.to_string()];
        self.send_grouped(&sink_types, &out, cancel, |cloud_account, log_sinks| {
            LoggingAsset {
                cloud_account,
                log_sinks,
            }
        })
        .await
    }

    /// Enabled services grouped by project.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn list_service_usage_assets(
        &self,
        out: mpsc::Sender<ServiceUsageAsset>,
        cancel: &CancellationToken,
    ) -> InventoryResult<()> {
        let service_types = [SERVICE_USAGE_ASSET_TYPE.to_string()];
        self.send_grouped(&service_types, &out, cancel, |cloud_account, services| {
            ServiceUsageAsset {
                cloud_account,
                services,
            }
        })
        .await
    }

    /// Drops memoized account metadata and ancestor policies. Call between
    /// inventory cycles.
    pub async fn clear(&self) {
        self.resolver.clear().await;
        self.walker.clear().await;
        debug!(scope = %self.scope, "Cleared inventory memo caches");
    }

    async fn enrich(&self, asset: MergedAsset, cancel: &CancellationToken) -> ExtendedAsset {
        let cloud_account = self.resolver.resolve(&asset.ancestors, cancel).await;
        ExtendedAsset::new(asset, cloud_account)
    }

    fn open_merged(&self, asset_types: &[String], cancel: &CancellationToken) -> MergedListing {
        MergedListing::open(
            &self.inventory,
            &self.scope.to_string(),
            asset_types,
            self.channel_capacity,
            cancel,
        )
    }

    async fn collect_merged(
        &self,
        asset_types: &[String],
        cancel: &CancellationToken,
    ) -> InventoryResult<Vec<ExtendedAsset>> {
        let mut listing = self.open_merged(asset_types, cancel);
        let mut assets = Vec::new();
        while let Some(asset) = listing.next(cancel).await {
            assets.push(self.enrich(asset, cancel).await);
        }
        listing.finish(cancel).await?;
        Ok(assets)
    }

    /// Lists `asset_types` over the root scope, groups the enriched assets
    /// by project and sends one `bundle` per project.
    async fn send_grouped<T, F>(
        &self,
        asset_types: &[String],
        out: &mpsc::Sender<T>,
        cancel: &CancellationToken,
        bundle: F,
    ) -> InventoryResult<()>
    where
        F: Fn(Arc<CloudAccountMetadata>, Vec<ExtendedAsset>) -> T,
    {
        // An empty type filter would list every type.
        if asset_types.is_empty() {
            return stopped(cancel);
        }

        let assets = self.collect_merged(asset_types, cancel).await?;
        let groups = group_by_project(assets);
        debug!(projects = groups.len(), "Grouped assets by project");

        for (cloud_account, assets) in groups {
            if !send_or_cancel(out, bundle(cloud_account, assets), cancel).await {
                break;
            }
        }
        stopped(cancel)
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("scope", &self.scope)
            .field("asset_types", &self.asset_types)
            .field("monitoring", &self.monitoring)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

fn or_configured<'a>(requested: &'a [String], configured: &'a [String]) -> &'a [String] {
    if requested.is_empty() {
        configured
    } else {
        requested
    }
}

fn stopped(cancel: &CancellationToken) -> InventoryResult<()> {
    if cancel.is_cancelled() {
        Err(InventoryError::Cancelled)
    } else {
        Ok(())
    }
}

/// Groups assets by account id, ordered by id.
///
/// Assets without an account (folder or organization level) are appended
/// to every project's group and never form a group of their own.
pub fn group_by_project(
    assets: Vec<ExtendedAsset>,
) -> Vec<(Arc<CloudAccountMetadata>, Vec<ExtendedAsset>)> {
    let mut by_project: BTreeMap<String, Vec<ExtendedAsset>> = BTreeMap::new();
    let mut shared = Vec::new();

    for asset in assets {
        let account_id = asset.cloud_account().account_id.clone();
        if account_id.is_empty() {
            shared.push(asset);
        } else {
            by_project.entry(account_id).or_default().push(asset);
        }
    }

    by_project
        .into_values()
        .filter_map(|mut assets| {
            let cloud_account = Arc::clone(assets.first()?.cloud_account());
            assets.extend(shared.iter().cloned());
            Some((cloud_account, assets))
        })
        .collect()
}
