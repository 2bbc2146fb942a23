//! Property-based tests for the facet merger.
//!
//! Random interleavings of resource and policy observations, including
//! duplicates and early stream closes, must merge to exactly one entry per
//! name carrying every facet that was observed for it.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use pw_inventory::merge::spawn_merge;
use pw_inventory::{InventoryError, InventoryResult, MergedAsset, RawAsset};
use serde_json::{json, Map};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CAPACITY: usize = 128;

#[derive(Debug, Clone)]
enum Step {
    Resource(u8),
    Policy(u8),
    CloseResources,
    ClosePolicies,
    Yield,
}

/// Generates one feeder step. Observations dominate so most cases carry
/// overlapping names on both streams.
fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0u8..8).prop_map(Step::Resource),
        4 => (0u8..8).prop_map(Step::Policy),
        1 => Just(Step::CloseResources),
        1 => Just(Step::ClosePolicies),
        2 => Just(Step::Yield),
    ]
}

fn name(n: u8) -> String {
    format!("//storage.googleapis.com/b{}", n)
}

fn resource(n: u8) -> InventoryResult<RawAsset> {
    Ok(RawAsset::new(name(n), "storage.googleapis.com/Bucket").with_resource(Map::new()))
}

fn policy(n: u8) -> InventoryResult<RawAsset> {
    Ok(RawAsset::new(name(n), "storage.googleapis.com/Bucket").with_iam_policy(json!({})))
}

#[derive(Default)]
struct Observed {
    resources: HashSet<String>,
    policies: HashSet<String>,
}

/// Feeds `steps` into a fresh merger and returns what it emitted, what was
/// fed, and how the merger finished.
fn run_merge(
    steps: Vec<Step>,
    fail_at: Option<usize>,
) -> (Vec<MergedAsset>, Observed, InventoryResult<()>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let (resource_tx, resource_rx) = mpsc::channel(CAPACITY);
        let (policy_tx, policy_rx) = mpsc::channel(CAPACITY);
        let (mut out, handle) =
            spawn_merge(resource_rx, policy_rx, CAPACITY, CancellationToken::new());

        let mut resource_tx = Some(resource_tx);
        let mut policy_tx = Some(policy_tx);
        let mut observed = Observed::default();

        for (i, step) in steps.into_iter().enumerate() {
            if fail_at == Some(i) {
                if let Some(tx) = &policy_tx {
                    let failure = InventoryError::Unavailable("listing broke".into());
                    let _ = tx.send(Err(failure)).await;
                }
                break;
            }
            match step {
                Step::Resource(n) => {
                    if let Some(tx) = &resource_tx {
                        if tx.send(resource(n)).await.is_ok() {
                            observed.resources.insert(name(n));
                        }
                    }
                }
                Step::Policy(n) => {
                    if let Some(tx) = &policy_tx {
                        if tx.send(policy(n)).await.is_ok() {
                            observed.policies.insert(name(n));
                        }
                    }
                }
                Step::CloseResources => resource_tx = None,
                Step::ClosePolicies => policy_tx = None,
                Step::Yield => tokio::task::yield_now().await,
            }
        }
        drop(resource_tx);
        drop(policy_tx);

        let mut merged = Vec::new();
        while let Some(asset) = out.recv().await {
            merged.push(asset);
        }
        let result = handle.await.unwrap();
        (merged, observed, result)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Every observed name comes out once, with exactly the facets seen for it.
    #[test]
    fn prop_merge_emits_each_name_once_with_observed_facets(
        steps in prop::collection::vec(arb_step(), 0..48),
    ) {
        let (merged, observed, result) = run_merge(steps, None);
        prop_assert!(result.is_ok());

        let mut by_name: HashMap<String, MergedAsset> = HashMap::new();
        for asset in merged {
            let duplicate = by_name.insert(asset.name.clone(), asset);
            prop_assert!(duplicate.is_none());
        }

        let expected: HashSet<String> =
            observed.resources.union(&observed.policies).cloned().collect();
        prop_assert_eq!(by_name.len(), expected.len());

        for (name, asset) in &by_name {
            prop_assert!(expected.contains(name));
            prop_assert_eq!(asset.has_resource(), observed.resources.contains(name));
            prop_assert_eq!(asset.has_iam_policy(), observed.policies.contains(name));
        }
    }

    /// A failed input fails the merge and never emits a name twice or a name
    /// that was not observed.
    #[test]
    fn prop_failed_input_fails_merge(
        steps in prop::collection::vec(arb_step(), 1..48),
        fail_at in any::<prop::sample::Index>(),
    ) {
        let fail_at = fail_at.index(steps.len());
        let closes_policies_first = steps[..fail_at]
            .iter()
            .any(|s| matches!(s, Step::ClosePolicies));
        let (merged, observed, result) = run_merge(steps, Some(fail_at));

        if !closes_policies_first {
            prop_assert!(result.is_err());
        }

        let mut seen = HashSet::new();
        for asset in &merged {
            prop_assert!(seen.insert(asset.name.clone()));
            prop_assert!(
                observed.resources.contains(&asset.name)
                    || observed.policies.contains(&asset.name)
            );
        }
    }
}
