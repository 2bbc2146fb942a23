//! DNS logging annotation for network assets.
//!
//! DNS policies are attached to networks by URL. A network whose identifier
//! is a suffix of an attached-network URL of some policy gets that policy's
//! logging flag stamped onto its resource payload.

use crate::asset::{ExtendedAsset, RawAsset, ENABLED_DNS_LOGGING_FIELD};
use serde_json::Value;
use tracing::{debug, info};

const COMPUTE_NAME_PREFIX: &str = "//compute.googleapis.com";

/// The parts of a DNS policy the join needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsPolicyFields {
    /// Attached network URLs.
    pub networks: Vec<String>,
    pub enable_logging: bool,
}

/// Extracts attached networks and the logging flag from DNS policy assets.
///
/// Malformed or missing fields decode as empty / `false`.
pub fn decode_dns_policies(assets: &[RawAsset]) -> Vec<DnsPolicyFields> {
    assets
        .iter()
        .map(|asset| {
            let Some(data) = asset.resource.as_ref().map(|r| &r.data) else {
                return DnsPolicyFields::default();
            };

            let networks = data
                .get("networks")
                .and_then(Value::as_array)
                .map(|networks| {
                    networks
                        .iter()
                        .filter_map(|n| n.get("networkUrl").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let enable_logging = data
                .get("enableLogging")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            DnsPolicyFields {
                networks,
                enable_logging,
            }
        })
        .collect()
}

/// Network identifier used for matching: the asset name without the
/// compute service prefix.
pub fn network_identifier(name: &str) -> &str {
    name.strip_prefix(COMPUTE_NAME_PREFIX).unwrap_or(name)
}

/// First policy with an attached-network URL ending in `network_id`.
pub fn find_dns_policy_by_network<'a>(
    policies: &'a [DnsPolicyFields],
    network_id: &str,
) -> Option<&'a DnsPolicyFields> {
    policies
        .iter()
        .find(|policy| policy.networks.iter().any(|url| url.ends_with(network_id)))
}

/// Annotates every network with a matching DNS policy. Unmatched networks
/// are returned unchanged.
pub fn enrich_network_assets(
    networks: Vec<ExtendedAsset>,
    policies: &[DnsPolicyFields],
) -> Vec<ExtendedAsset> {
    if policies.is_empty() {
        info!("No DNS policies listed, network assets left as is");
        return networks;
    }

    info!(count = networks.len(), "Enriching network assets with DNS policies");
    networks
        .into_iter()
        .map(|network| {
            let id = network_identifier(network.name()).to_string();
            match find_dns_policy_by_network(policies, &id) {
                Some(policy) => {
                    debug!(network = %id, enabled = policy.enable_logging, "Matched DNS policy");
                    network.with_resource_field(
                        ENABLED_DNS_LOGGING_FIELD,
                        Value::Bool(policy.enable_logging),
                    )
                }
                None => network,
            }
        })
        .collect()
}
