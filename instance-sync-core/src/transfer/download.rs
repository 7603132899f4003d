//! Batch download into scratch storage, concurrent when possible.

use std::path::PathBuf;

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::context::SyncContext;
use crate::contract::InstanceApi;
use crate::error::SyncError;
use crate::model::{Id, ProjectKind};
use crate::transfer::ScratchBatch;

/// Downloads `ids` to `paths` pairwise, skipping files already fetched.
///
/// The concurrent path is tried first. If it fails, the context breaker trips
/// and the remaining files are fetched with one sequential batch call; the
/// concurrent path is not tried again during this run.
pub async fn download_batch(
    src: &dyn InstanceApi,
    kind: ProjectKind,
    dataset_id: Id,
    ids: &[Id],
    paths: &[PathBuf],
    ctx: &SyncContext,
) -> Result<(), SyncError> {
    let (pending_ids, pending_paths) = unfetched(ids, paths);
    if pending_ids.is_empty() {
        debug!(count = ids.len(), "All files of batch already fetched");
        return Ok(());
    }

    if ctx.async_downloads_enabled() {
        let downloads = pending_ids
            .iter()
            .zip(pending_paths.iter())
            .map(|(id, path)| src.download_path(kind, *id, path));
        match try_join_all(downloads).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                warn!(error = %e, %kind, "Concurrent download failed, downloading sequentially");
                ctx.trip_async_breaker();
            }
        }
    }

    let (pending_ids, pending_paths) = unfetched(&pending_ids, &pending_paths);
    if pending_ids.is_empty() {
        return Ok(());
    }
    src.download_paths(kind, dataset_id, &pending_ids, &pending_paths)
        .await?;
    Ok(())
}

fn unfetched(ids: &[Id], paths: &[PathBuf]) -> (Vec<Id>, Vec<PathBuf>) {
    ids.iter()
        .zip(paths.iter())
        .filter(|(_, path)| !ScratchBatch::is_fetched(path))
        .map(|(id, path)| (*id, path.clone()))
        .unzip()
}
