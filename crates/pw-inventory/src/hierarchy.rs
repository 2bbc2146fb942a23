//! Project and organization metadata for assets.
//!
//! Display names are best effort: a failed lookup leaves the name empty and
//! is logged, it never fails the aggregation.

use crate::asset::{CloudAccountMetadata, Scope};
use crate::client::ResourceManager;
use crate::error::InventoryResult;
use crate::memo::MemoCache;
use metrics::counter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Bare project id of the nearest ancestor, or `""` if it is not a project.
pub fn project_id(ancestors: &[String]) -> &str {
    ancestors
        .first()
        .and_then(|a| a.strip_prefix("projects/"))
        .unwrap_or("")
}

/// Bare organization id of the farthest ancestor, or `""` if it is not an
/// organization.
pub fn organization_id(ancestors: &[String]) -> &str {
    ancestors
        .last()
        .and_then(|a| a.strip_prefix("organizations/"))
        .unwrap_or("")
}

/// Resolves [`CloudAccountMetadata`] from ancestor chains, memoized per
/// `(project, organization)` pair.
pub struct HierarchyResolver {
    scope: Scope,
    crm: Arc<dyn ResourceManager>,
    cache: MemoCache<Arc<CloudAccountMetadata>>,
}

impl HierarchyResolver {
    pub fn new(scope: Scope, crm: Arc<dyn ResourceManager>) -> Self {
        Self {
            scope,
            crm,
            cache: MemoCache::new("account_metadata"),
        }
    }

    /// Returns the account metadata for an ancestor chain.
    pub async fn resolve(
        &self,
        ancestors: &[String],
        cancel: &CancellationToken,
    ) -> Arc<CloudAccountMetadata> {
        let project_id = project_id(ancestors);
        let org_id = organization_id(ancestors);
        let key = format!("{}/{}", project_id, org_id);

        // Names missing because of cancellation must not stick for the
        // next cycle.
        self.cache
            .get_or_try_compute(key, || self.lookup(project_id, org_id, cancel))
            .await
            .unwrap_or_else(|partial| partial)
    }

    /// Looks up both display names. `Err` carries the metadata when the
    /// token fired during the lookups.
    async fn lookup(
        &self,
        project_id: &str,
        org_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<CloudAccountMetadata>, Arc<CloudAccountMetadata>> {
        debug!(project_id, org_id, "Resolving cloud account metadata");

        // Organization lookups fail with permission errors when the
        // credentials are scoped to a single project.
        let lookup_org = self.scope.is_organization() && !org_id.is_empty();
        let org_name = async {
            if !lookup_org {
                return String::new();
            }
            let name = format!("organizations/{}", org_id);
            let result = self.crm.organization_display_name(&name, cancel).await;
            best_effort(result, "organization", &name)
        };
        let project_name = async {
            if project_id.is_empty() {
                return String::new();
            }
            let name = format!("projects/{}", project_id);
            let result = self.crm.project_display_name(&name, cancel).await;
            best_effort(result, "project", &name)
        };

        let (organization_name, account_name) = tokio::join!(org_name, project_name);

        let metadata = Arc::new(CloudAccountMetadata {
            account_id: project_id.to_string(),
            account_name,
            organisation_id: org_id.to_string(),
            organization_name,
        });
        if cancel.is_cancelled() {
            Err(metadata)
        } else {
            Ok(metadata)
        }
    }

    /// Forgets every resolved name.
    pub async fn clear(&self) {
        self.cache.clear().await;
    }
}

fn best_effort(result: InventoryResult<String>, kind: &'static str, name: &str) -> String {
    match result {
        Ok(display_name) => display_name,
        Err(e) => {
            error!(lookup = kind, name = %name, error = %e, "Error fetching GCP {}", kind);
            counter!("pw_inventory_lookup_failures_total", "lookup" => kind).increment(1);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockResourceManager;

    fn chain(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_id_extraction() {
        let ancestors = chain(&["projects/5", "folders/4", "organizations/1"]);
        assert_eq!(project_id(&ancestors), "5");
        assert_eq!(organization_id(&ancestors), "1");

        let folder_only = chain(&["folders/4", "organizations/1"]);
        assert_eq!(project_id(&folder_only), "");
        assert_eq!(organization_id(&folder_only), "1");

        let no_org = chain(&["projects/5"]);
        assert_eq!(organization_id(&no_org), "");

        assert_eq!(project_id(&[]), "");
        assert_eq!(organization_id(&[]), "");
    }

    #[tokio::test]
    async fn test_resolve_org_scope() {
        let crm = Arc::new(
            MockResourceManager::new()
                .with_project("projects/5", "Project Five")
                .with_organization("organizations/1", "Org One"),
        );
        let resolver = HierarchyResolver::new(Scope::Organization("1".into()), crm.clone());
        let cancel = CancellationToken::new();

        let metadata = resolver
            .resolve(&chain(&["projects/5", "folders/4", "organizations/1"]), &cancel)
            .await;

        assert_eq!(metadata.account_id, "5");
        assert_eq!(metadata.account_name, "Project Five");
        assert_eq!(metadata.organisation_id, "1");
        assert_eq!(metadata.organization_name, "Org One");
    }

    #[tokio::test]
    async fn test_project_scope_skips_org_lookup() {
        let crm = Arc::new(
            MockResourceManager::new()
                .with_project("projects/5", "Project Five")
                .with_organization("organizations/1", "Org One"),
        );
        let resolver = HierarchyResolver::new(Scope::Project("5".into()), crm.clone());
        let cancel = CancellationToken::new();

        let metadata = resolver
            .resolve(&chain(&["projects/5", "organizations/1"]), &cancel)
            .await;

        assert_eq!(metadata.organisation_id, "1");
        assert_eq!(metadata.organization_name, "");
        assert_eq!(crm.organization_lookups(), 0);
    }

    #[tokio::test]
    async fn test_resolve_is_memoized() {
        let crm = Arc::new(
            MockResourceManager::new()
                .with_project("projects/5", "Project Five")
                .with_organization("organizations/1", "Org One"),
        );
        let resolver = HierarchyResolver::new(Scope::Organization("1".into()), crm.clone());
        let cancel = CancellationToken::new();
        let ancestors = chain(&["projects/5", "folders/4", "organizations/1"]);

        let first = resolver.resolve(&ancestors, &cancel).await;
        let second = resolver.resolve(&ancestors, &cancel).await;

        assert_eq!(first, second);
        assert_eq!(crm.project_lookups(), 1);
        assert_eq!(crm.organization_lookups(), 1);

        resolver.clear().await;
        resolver.resolve(&ancestors, &cancel).await;
        assert_eq!(crm.project_lookups(), 2);
    }

    #[tokio::test]
    async fn test_lookup_failure_yields_empty_name() {
        let crm = Arc::new(
            MockResourceManager::new()
                .with_organization("organizations/1", "Org One")
                .failing_projects(),
        );
        let resolver = HierarchyResolver::new(Scope::Organization("1".into()), crm);
        let cancel = CancellationToken::new();

        let metadata = resolver
            .resolve(&chain(&["projects/5", "organizations/1"]), &cancel)
            .await;

        assert_eq!(metadata.account_id, "5");
        assert_eq!(metadata.account_name, "");
        assert_eq!(metadata.organization_name, "Org One");
    }

    #[tokio::test]
    async fn test_cancelled_resolution_not_memoized() {
        let crm = Arc::new(MockResourceManager::new().with_project("projects/5", "Project Five"));
        let resolver = HierarchyResolver::new(Scope::Project("5".into()), crm.clone());
        let ancestors = chain(&["projects/5"]);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        resolver.resolve(&ancestors, &cancelled).await;

        let cancel = CancellationToken::new();
        let metadata = resolver.resolve(&ancestors, &cancel).await;
        assert_eq!(metadata.account_name, "Project Five");
        assert_eq!(crm.project_lookups(), 2);
    }
}
