//! Access policies of a project's folders and organization.

use crate::asset::{ContentType, ExtendedAsset, CRM_FOLDER_ASSET_TYPE, CRM_ORG_ASSET_TYPE};
use crate::client::{AssetsInventory, ListAssetsRequest};
use crate::error::{InventoryError, InventoryResult};
use crate::hierarchy::HierarchyResolver;
use crate::memo::MemoCache;
use crate::pipeline::collect_listing;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fetches and memoizes the policies attached to ancestor scopes.
///
/// Entries are keyed by ancestor name (`folders/4`, `organizations/1`). The
/// walker belongs to one provider, so all keys come from that provider's
/// root scope.
pub struct AncestorPolicyWalker {
    inventory: Arc<dyn AssetsInventory>,
    resolver: Arc<HierarchyResolver>,
    cache: MemoCache<Arc<Vec<ExtendedAsset>>>,
    channel_capacity: usize,
}

impl AncestorPolicyWalker {
    pub fn new(
        inventory: Arc<dyn AssetsInventory>,
        resolver: Arc<HierarchyResolver>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            inventory,
            resolver,
            cache: MemoCache::new("ancestor_policies"),
            channel_capacity,
        }
    }

    /// Policies of every scope in `ancestors`, looked up concurrently.
    ///
    /// Callers pass the chain without the project itself. Ancestors whose
    /// lookup fails contribute nothing.
    pub async fn policies_for(
        &self,
        ancestors: &[String],
        cancel: &CancellationToken,
    ) -> Vec<ExtendedAsset> {
        let lookups = ancestors
            .iter()
            .map(|ancestor| self.policies_of(ancestor, cancel));

        join_all(lookups)
            .await
            .into_iter()
            .flat_map(|policies| policies.iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    async fn policies_of(
        &self,
        ancestor: &str,
        cancel: &CancellationToken,
    ) -> Arc<Vec<ExtendedAsset>> {
        let asset_type = match ancestor.split_once('/').map(|(kind, _)| kind) {
            Some("folders") => CRM_FOLDER_ASSET_TYPE,
            Some("organizations") => CRM_ORG_ASSET_TYPE,
            _ => {
                warn!(ancestor = %ancestor, "Unsupported ancestor scope, skipping its policies");
                return Arc::default();
            }
        };

        let listed = self
            .cache
            .get_or_try_compute(ancestor.to_string(), || {
                self.list_policies(ancestor, asset_type, cancel)
            })
            .await;
        match listed {
            Ok(policies) => policies,
            Err(InventoryError::Cancelled) => Arc::default(),
            Err(e) => {
                warn!(ancestor = %ancestor, error = %e, "Skipping ancestor policies");
                Arc::default()
            }
        }
    }

    /// Lists and enriches the policies set on `ancestor`. A cancelled run
    /// is an error so its partial result is never memoized.
    async fn list_policies(
        &self,
        ancestor: &str,
        asset_type: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<Arc<Vec<ExtendedAsset>>> {
        let request = ListAssetsRequest::new(
            ancestor,
            vec![asset_type.to_string()],
            ContentType::IamPolicy,
        );
        let assets = collect_listing(
            Arc::clone(&self.inventory),
            request,
            self.channel_capacity,
            cancel,
        )
        .await?;

        let mut policies = Vec::with_capacity(assets.len());
        for asset in assets {
            let account = self.resolver.resolve(&asset.ancestors, cancel).await;
            policies.push(ExtendedAsset::new(asset, account));
        }
        if cancel.is_cancelled() {
            return Err(InventoryError::Cancelled);
        }
        debug!(ancestor = %ancestor, count = policies.len(), "Listed ancestor policies");
        Ok(Arc::new(policies))
    }

    /// Forgets every memoized ancestor.
    pub async fn clear(&self) {
        self.cache.clear().await;
    }
}
