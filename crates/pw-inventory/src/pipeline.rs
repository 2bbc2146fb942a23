//! Building blocks shared by the aggregation pipelines.
//!
//! A pipeline is a handful of tasks joined by bounded `mpsc` queues. Each
//! producer owns the sending half of its queue and drops it when done. A
//! listing that breaks pushes its error into the queue first, so consumers
//! can tell a failed listing from a finished one. Every blocking hand-off
//! observes the caller's [`CancellationToken`].

use crate::asset::{ContentType, MergedAsset, RawAsset};
use crate::client::{AssetsInventory, ListAssetsRequest};
use crate::error::{InventoryError, InventoryResult};
use crate::merge::spawn_merge;
use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Queue size between pipeline stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Receiving end of a producer: assets, then at most one error.
pub type AssetQueue = mpsc::Receiver<InventoryResult<RawAsset>>;

/// Sends `value` unless the token fires first.
///
/// Returns `false` if the value was not delivered, either because of
/// cancellation or because the receiver is gone.
pub async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    value: T,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        result = tx.send(value) => result.is_ok(),
    }
}

/// Receives the next value, or `None` once the queue is closed or the token
/// fires.
pub async fn recv_or_cancel<T>(
    rx: &mut mpsc::Receiver<T>,
    cancel: &CancellationToken,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        value = rx.recv() => value,
    }
}

/// Streams one listing into `tx`, returning the number of assets sent.
pub async fn produce(
    inventory: Arc<dyn AssetsInventory>,
    request: ListAssetsRequest,
    tx: mpsc::Sender<InventoryResult<RawAsset>>,
    cancel: CancellationToken,
) -> InventoryResult<usize> {
    info!(
        parent = %request.parent,
        asset_types = ?request.asset_types,
        content_type = %request.content_type,
        "Listing GCP assets"
    );

    let mut assets = inventory.list_assets(request.clone(), &cancel);
    let mut count = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InventoryError::Cancelled),
            next = assets.next() => next,
        };

        match next {
            Ok(Some(asset)) => {
                debug!(name = %asset.name, "Fetched GCP asset");
                if !send_or_cancel(&tx, Ok(asset), &cancel).await {
                    if cancel.is_cancelled() {
                        return Err(InventoryError::Cancelled);
                    }
                    debug!(parent = %request.parent, "Consumer gone, stopping listing");
                    break;
                }
                count += 1;
            }
            Ok(None) => break,
            Err(InventoryError::Cancelled) => return Err(InventoryError::Cancelled),
            Err(e) => {
                error!(
                    "Error fetching GCP {} of types {:?} for {}: {}",
                    request.content_type, request.asset_types, request.parent, e
                );
                counter!(
                    "pw_inventory_stream_errors_total",
                    "content_type" => request.content_type.as_str(),
                    "kind" => e.kind()
                )
                .increment(1);
                let failure = InventoryError::StreamFailed {
                    parent: request.parent,
                    content_type: request.content_type,
                    asset_types: request.asset_types,
                    source: Box::new(e),
                };
                send_or_cancel(&tx, Err(failure.clone()), &cancel).await;
                return Err(failure);
            }
        }
    }

    counter!(
        "pw_inventory_assets_listed_total",
        "content_type" => request.content_type.as_str()
    )
    .increment(count as u64);
    info!(
        parent = %request.parent,
        content_type = %request.content_type,
        count,
        "Finished listing GCP assets"
    );
    Ok(count)
}

/// Spawns [`produce`] on its own task.
pub fn spawn_producer(
    inventory: Arc<dyn AssetsInventory>,
    request: ListAssetsRequest,
    capacity: usize,
    cancel: CancellationToken,
) -> (AssetQueue, JoinHandle<InventoryResult<usize>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(produce(inventory, request, tx, cancel));
    (rx, handle)
}

/// Waits for a pipeline task, turning a panic into an error.
pub async fn join_stage<T>(handle: JoinHandle<InventoryResult<T>>) -> InventoryResult<T> {
    handle
        .await
        .map_err(|e| InventoryError::Internal(format!("Pipeline task failed: {}", e)))?
}

/// Outcome of a pipeline once all its tasks finished: `Cancelled` if the
/// token fired, otherwise the first error in task order.
pub fn settle<I>(cancel: &CancellationToken, results: I) -> InventoryResult<()>
where
    I: IntoIterator<Item = InventoryResult<()>>,
{
    if cancel.is_cancelled() {
        return Err(InventoryError::Cancelled);
    }
    results.into_iter().collect()
}

/// Lists one parent completely.
pub async fn collect_listing(
    inventory: Arc<dyn AssetsInventory>,
    request: ListAssetsRequest,
    capacity: usize,
    cancel: &CancellationToken,
) -> InventoryResult<Vec<RawAsset>> {
    let (mut rx, handle) = spawn_producer(inventory, request, capacity, cancel.clone());

    // A failure ends the loop; the producer reports it again on join.
    let mut assets = Vec::new();
    while let Some(Ok(asset)) = recv_or_cancel(&mut rx, cancel).await {
        assets.push(asset);
    }
    drop(rx);

    let result = join_stage(handle).await.map(|_| ());
    settle(cancel, [result])?;
    Ok(assets)
}

/// Resource and policy listings of the same query, merged by name.
pub struct MergedListing {
    rx: mpsc::Receiver<MergedAsset>,
    producers: Vec<JoinHandle<InventoryResult<usize>>>,
    merger: JoinHandle<InventoryResult<()>>,
}

impl MergedListing {
    /// Starts both producers and the merger.
    pub fn open(
        inventory: &Arc<dyn AssetsInventory>,
        parent: &str,
        asset_types: &[String],
        capacity: usize,
        cancel: &CancellationToken,
    ) -> Self {
        let (resources, resources_handle) = spawn_producer(
            Arc::clone(inventory),
            ListAssetsRequest::new(parent, asset_types.to_vec(), ContentType::Resource),
            capacity,
            cancel.clone(),
        );
        let (policies, policies_handle) = spawn_producer(
            Arc::clone(inventory),
            ListAssetsRequest::new(parent, asset_types.to_vec(), ContentType::IamPolicy),
            capacity,
            cancel.clone(),
        );
        let (rx, merger) = spawn_merge(resources, policies, capacity, cancel.clone());

        Self {
            rx,
            producers: vec![resources_handle, policies_handle],
            merger,
        }
    }

    /// Next merged asset, or `None` when the listing is exhausted or
    /// cancelled.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<MergedAsset> {
        recv_or_cancel(&mut self.rx, cancel).await
    }

    /// Stops consuming and waits for every task of the listing.
    pub async fn finish(self, cancel: &CancellationToken) -> InventoryResult<()> {
        let Self {
            rx,
            producers,
            merger,
        } = self;
        // Unblocks the merger if the consumer stopped early.
        drop(rx);

        let mut results = Vec::with_capacity(producers.len() + 1);
        for producer in producers {
            results.push(join_stage(producer).await.map(|_| ()));
        }
        results.push(join_stage(merger).await);
        settle(cancel, results)
    }
}
