//! Joins the resource and policy listings of one query by asset name.
//!
//! A single task owns the accumulator and is fed by both input queues, so
//! no locking is involved. Emission order is unspecified; each name is
//! emitted at most once, carrying every facet known at that point. A failed
//! input ends the merge and discards whatever is still pending.

use crate::asset::{MergedAsset, RawAsset};
use crate::error::{InventoryError, InventoryResult};
use crate::pipeline::{send_or_cancel, AssetQueue};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
struct Accumulator {
    pending: HashMap<String, MergedAsset>,
    emitted: HashSet<String>,
    resources_closed: bool,
    policies_closed: bool,
}

impl Accumulator {
    fn is_ready(&self, asset: &MergedAsset) -> bool {
        match (asset.has_resource(), asset.has_iam_policy()) {
            (true, true) => true,
            (true, false) => self.policies_closed,
            (false, true) => self.resources_closed,
            (false, false) => self.resources_closed && self.policies_closed,
        }
    }

    /// Folds an observation in and returns the entry if it became complete.
    fn upsert(&mut self, asset: RawAsset) -> Option<MergedAsset> {
        if self.emitted.contains(&asset.name) {
            debug!(name = %asset.name, "Dropping observation of an already merged asset");
            return None;
        }

        let merged = match self.pending.remove(&asset.name) {
            Some(mut existing) => {
                existing.absorb(asset);
                existing
            }
            None => asset,
        };

        if self.is_ready(&merged) {
            self.emitted.insert(merged.name.clone());
            Some(merged)
        } else {
            self.pending.insert(merged.name.clone(), merged);
            None
        }
    }

    /// Removes every entry that is complete under the current stream state.
    fn drain_ready(&mut self) -> Vec<MergedAsset> {
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, asset)| self.is_ready(asset))
            .map(|(name, _)| name.clone())
            .collect();

        let mut drained = Vec::with_capacity(ready.len());
        for name in ready {
            if let Some(asset) = self.pending.remove(&name) {
                self.emitted.insert(name);
                drained.push(asset);
            }
        }
        drained
    }
}

enum Input {
    Resource(Option<InventoryResult<RawAsset>>),
    Policy(Option<InventoryResult<RawAsset>>),
}

/// Merges the two facet queues into `out`, which is closed on return.
///
/// Returns `Cancelled` if the token fires before both inputs are drained,
/// and the input's error if either listing fails. Dropping the input
/// receivers on return lets the upstream producers observe that nobody is
/// listening anymore.
pub async fn merge_streams(
    mut resources: AssetQueue,
    mut policies: AssetQueue,
    out: mpsc::Sender<MergedAsset>,
    cancel: CancellationToken,
) -> InventoryResult<()> {
    let mut acc = Accumulator::default();

    while !(acc.resources_closed && acc.policies_closed) {
        let input = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InventoryError::Cancelled),
            asset = resources.recv(), if !acc.resources_closed => Input::Resource(asset),
            asset = policies.recv(), if !acc.policies_closed => Input::Policy(asset),
        };

        let ready = match input {
            Input::Resource(Some(Ok(asset))) | Input::Policy(Some(Ok(asset))) => {
                acc.upsert(asset).into_iter().collect()
            }
            Input::Resource(Some(Err(e))) | Input::Policy(Some(Err(e))) => {
                debug!(
                    pending = acc.pending.len(),
                    "Asset listing failed, discarding pending assets"
                );
                return Err(e);
            }
            Input::Resource(None) => {
                acc.resources_closed = true;
                acc.drain_ready()
            }
            Input::Policy(None) => {
                acc.policies_closed = true;
                acc.drain_ready()
            }
        };

        for asset in ready {
            if !send_or_cancel(&out, asset, &cancel).await {
                return finish_early(&cancel);
            }
        }
    }

    debug!(merged = acc.emitted.len(), "Merged asset streams");
    Ok(())
}

fn finish_early(cancel: &CancellationToken) -> InventoryResult<()> {
    if cancel.is_cancelled() {
        Err(InventoryError::Cancelled)
    } else {
        debug!("Merged asset consumer gone, stopping merge");
        Ok(())
    }
}

/// Spawns [`merge_streams`] and returns the merged queue.
pub fn spawn_merge(
    resources: AssetQueue,
    policies: AssetQueue,
    capacity: usize,
    cancel: CancellationToken,
) -> (mpsc::Receiver<MergedAsset>, JoinHandle<InventoryResult<()>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(merge_streams(resources, policies, tx, cancel));
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::ContentType;
    use serde_json::{json, Map};

    type Feed = mpsc::Sender<InventoryResult<RawAsset>>;

    fn resource(name: &str) -> InventoryResult<RawAsset> {
        Ok(RawAsset::new(name, "X").with_resource(Map::new()))
    }

    fn policy(name: &str) -> InventoryResult<RawAsset> {
        Ok(RawAsset::new(name, "").with_iam_policy(json!({"bindings": []})))
    }

    fn feeds(capacity: usize) -> ((Feed, AssetQueue), (Feed, AssetQueue)) {
        (mpsc::channel(capacity), mpsc::channel(capacity))
    }

    async fn drain(mut rx: mpsc::Receiver<MergedAsset>) -> Vec<MergedAsset> {
        let mut out = Vec::new();
        while let Some(asset) = rx.recv().await {
            out.push(asset);
        }
        out
    }

    #[tokio::test]
    async fn test_resource_then_policy() {
        let ((res_tx, res_rx), (pol_tx, pol_rx)) = feeds(4);
        let cancel = CancellationToken::new();
        let (out, handle) = spawn_merge(res_rx, pol_rx, 4, cancel);

        res_tx.send(resource("A")).await.unwrap();
        pol_tx.send(policy("A")).await.unwrap();
        drop(pol_tx);
        drop(res_tx);

        let merged = drain(out).await;
        handle.await.unwrap().unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "A");
        assert_eq!(merged[0].asset_type, "X");
        assert!(merged[0].has_resource());
        assert!(merged[0].has_iam_policy());
    }

    #[tokio::test]
    async fn test_single_facet_flushed_on_close() {
        let ((res_tx, res_rx), (pol_tx, pol_rx)) = feeds(4);
        let cancel = CancellationToken::new();
        let (mut out, handle) = spawn_merge(res_rx, pol_rx, 4, cancel);

        res_tx.send(resource("only-resource")).await.unwrap();
        pol_tx.send(policy("only-policy")).await.unwrap();

        // Policy stream closes: the resource-only entry is complete.
        drop(pol_tx);
        let first = out.recv().await.unwrap();
        assert_eq!(first.name, "only-resource");
        assert!(!first.has_iam_policy());

        drop(res_tx);
        let second = out.recv().await.unwrap();
        assert_eq!(second.name, "only-policy");
        assert!(out.recv().await.is_none());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_late_duplicate_dropped() {
        let ((res_tx, res_rx), (pol_tx, pol_rx)) = feeds(8);
        let cancel = CancellationToken::new();
        let (out, handle) = spawn_merge(res_rx, pol_rx, 8, cancel);

        res_tx.send(resource("A")).await.unwrap();
        pol_tx.send(policy("A")).await.unwrap();
        res_tx.send(resource("A")).await.unwrap();
        pol_tx.send(policy("A")).await.unwrap();
        drop(res_tx);
        drop(pol_tx);

        let merged = drain(out).await;
        handle.await.unwrap().unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_input_discards_pending() {
        let ((res_tx, res_rx), (pol_tx, pol_rx)) = feeds(8);
        let cancel = CancellationToken::new();
        let (out, handle) = spawn_merge(res_rx, pol_rx, 8, cancel);

        res_tx.send(resource("A")).await.unwrap();
        res_tx.send(resource("B")).await.unwrap();
        drop(res_tx);
        pol_tx
            .send(Err(InventoryError::StreamFailed {
                parent: "projects/1".to_string(),
                content_type: ContentType::IamPolicy,
                asset_types: vec!["X".to_string()],
                source: Box::new(InventoryError::PermissionDenied("denied".into())),
            }))
            .await
            .unwrap();
        drop(pol_tx);

        assert!(drain(out).await.is_empty());
        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(InventoryError::StreamFailed {
                content_type: ContentType::IamPolicy,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_merge() {
        let ((_res_tx, res_rx), (_pol_tx, pol_rx)) = feeds(1);
        let cancel = CancellationToken::new();
        let (mut out, handle) = spawn_merge(res_rx, pol_rx, 1, cancel.clone());

        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(InventoryError::Cancelled)));
        assert!(out.recv().await.is_none());
    }

    #[test]
    fn test_accumulator_asset_without_facets() {
        let mut acc = Accumulator::default();
        assert!(acc.upsert(RawAsset::new("bare", "X")).is_none());

        acc.resources_closed = true;
        assert!(acc.drain_ready().is_empty());

        acc.policies_closed = true;
        let drained = acc.drain_ready();
        assert_eq!(drained.len(), 1);
        assert!(acc.pending.is_empty());
    }
}
