//! Entity strategies: one per project kind, all behind [`EntityStrategy`].
//!
//! A strategy receives one source dataset and its destination counterpart and
//! decides, item by item (or batch by batch for images), whether to skip,
//! reuse, or transfer, and which transfer tier to use.
//!
//! # Navigation
//! - Dispatcher: [`strategy_for`]
//! - Per-item reconciliation: [`decide`]
//! - Tier 2 / Tier 3 placement shared by the single-item kinds: [`place_single`]

mod episodes;
mod images;
mod pointclouds;
mod videos;
mod volumes;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::annotation::ProjectSchema;
use crate::context::SyncContext;
use crate::contract::InstanceApi;
use crate::error::{ApiError, SyncError};
use crate::model::{
    DatasetInfo, EntityInfo, HashUpload, Id, PathUpload, ProjectKind, RelatedImage, Scenario,
};
use crate::progress::ProgressSink;
use crate::transcode::transcoded_name;
use crate::transfer::{ensure_hashes_recognized, ScratchBatch};

pub use episodes::EpisodeStrategy;
pub use images::ImageStrategy;
pub use pointclouds::PointCloudStrategy;
pub use videos::VideoStrategy;
pub use volumes::VolumeStrategy;

/// One dataset's worth of work for a strategy.
#[derive(Debug, Clone, Copy)]
pub struct DatasetJob<'a> {
    pub src_dataset: &'a DatasetInfo,
    pub dst_dataset: &'a DatasetInfo,
    pub schema: &'a ProjectSchema,
    pub scenario: Scenario,
}

/// What a strategy produced for one dataset.
#[derive(Debug, Default, Clone)]
pub struct TransferResult {
    /// Destination entities placed or reused, in source order.
    pub entities: Vec<EntityInfo>,
    /// Newly created destination entities.
    pub transferred: usize,
    /// Same-named destination entities reused as they are.
    pub reused: usize,
    /// Items left alone because the destination copy is up to date.
    pub skipped: usize,
}

impl TransferResult {
    pub fn absorb(&mut self, other: TransferResult) {
        self.entities.extend(other.entities);
        self.transferred += other.transferred;
        self.reused += other.reused;
        self.skipped += other.skipped;
    }
}

/// The common sync contract implemented once per project kind.
#[async_trait]
pub trait EntityStrategy: Send + Sync {
    fn kind(&self) -> ProjectKind;

    async fn sync(
        &self,
        dst: &dyn InstanceApi,
        src: &dyn InstanceApi,
        job: &DatasetJob<'_>,
        ctx: &SyncContext,
        progress: &dyn ProgressSink,
    ) -> Result<TransferResult, SyncError>;
}

/// Maps a project's declared kind to its strategy.
pub fn strategy_for(kind: ProjectKind) -> Box<dyn EntityStrategy> {
    match kind {
        ProjectKind::Images => Box::new(ImageStrategy),
        ProjectKind::Videos => Box::new(VideoStrategy),
        ProjectKind::Volumes => Box::new(VolumeStrategy),
        ProjectKind::PointClouds => Box::new(PointCloudStrategy),
        ProjectKind::PointCloudEpisodes => Box::new(EpisodeStrategy),
    }
}

/// Per-item reconciliation outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Destination copy is at least as new as the source.
    Skip,
    /// Destination already holds an item of that name; use it as it is.
    Reuse(EntityInfo),
    /// Destination copy is older; remove it, then transfer.
    Replace(Id),
    Transfer,
}

/// Decides what to do with `item` given the destination items by name.
///
/// Under `check`, a destination item wins when its `updated_at` is not older
/// than the source. Under every other scenario a same-named item is reused.
pub fn decide(
    item: &EntityInfo,
    existing: &HashMap<String, EntityInfo>,
    scenario: Scenario,
) -> Decision {
    match existing.get(&item.name) {
        None => Decision::Transfer,
        Some(current) if scenario == Scenario::Check => {
            if current.updated_at >= item.updated_at {
                Decision::Skip
            } else {
                Decision::Replace(current.id)
            }
        }
        Some(current) => Decision::Reuse(current.clone()),
    }
}

pub(crate) async fn list_existing(
    dst: &dyn InstanceApi,
    kind: ProjectKind,
    dataset_id: Id,
) -> Result<HashMap<String, EntityInfo>, SyncError> {
    Ok(dst
        .list_entities(kind, dataset_id)
        .await?
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect())
}

/// Removes outdated destination copies before they are transferred again.
pub(crate) async fn remove_stale(
    dst: &dyn InstanceApi,
    kind: ProjectKind,
    stale: &[(String, Id)],
    existing: &mut HashMap<String, EntityInfo>,
) -> Result<(), SyncError> {
    if stale.is_empty() {
        return Ok(());
    }
    let ids: Vec<Id> = stale.iter().map(|(_, id)| *id).collect();
    info!(%kind, count = ids.len(), "Removing outdated destination items");
    dst.remove_entities(kind, &ids).await?;
    for (name, _) in stale {
        existing.remove(name);
    }
    Ok(())
}

fn single(mut placed: Vec<EntityInfo>, method: &str) -> Result<EntityInfo, SyncError> {
    match (placed.pop(), placed.is_empty()) {
        (Some(entity), true) => Ok(entity),
        _ => Err(SyncError::Api(ApiError::Decode {
            method: method.to_string(),
            message: "expected exactly one entity in response".to_string(),
        })),
    }
}

/// Downloads the entity bytes unless they are already in scratch storage.
pub(crate) async fn fetch_one(
    src: &dyn InstanceApi,
    kind: ProjectKind,
    id: Id,
    path: &Path,
) -> Result<(), SyncError> {
    if !ScratchBatch::is_fetched(path) {
        src.download_path(kind, id, path).await?;
    }
    Ok(())
}

/// Tier 2: add by content hash, if the destination storage knows it.
pub(crate) async fn place_by_hash(
    dst: &dyn InstanceApi,
    kind: ProjectKind,
    dataset_id: Id,
    item: &EntityInfo,
) -> Result<EntityInfo, SyncError> {
    let hash = item
        .hash
        .clone()
        .ok_or(SyncError::HashRejected { missing: 1 })?;
    ensure_hashes_recognized(dst, std::slice::from_ref(&hash)).await?;
    let placed = dst
        .upload_hashes(
            kind,
            dataset_id,
            &[HashUpload {
                name: item.name.clone(),
                hash,
                meta: item.meta.clone(),
            }],
        )
        .await?;
    single(placed, "upload_hashes")
}

/// Tier 3: download to scratch and upload from there. With `transcode`, a
/// successfully re-encoded copy is uploaded instead of the original.
///
/// The entity keeps its source name even when re-encoded to MP4: reruns find
/// destination items by that name.
pub(crate) async fn place_by_copy(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    kind: ProjectKind,
    dataset_id: Id,
    item: &EntityInfo,
    ctx: &SyncContext,
    transcode: bool,
) -> Result<EntityInfo, SyncError> {
    let mut scratch = ctx.scratch.batch()?;
    let path = scratch.claim(&item.name);

    {
        let path = &path;
        ctx.retry
            .run("download", move || fetch_one(src, kind, item.id, path))
            .await?;
    }

    let mut upload_from = path.clone();
    if transcode {
        // Claimed before encoding so a partial output goes with the batch.
        let out = scratch.claim(&transcoded_name(&item.name));
        match ctx.transcoder.transcode(&path, &out).await {
            Ok(()) => upload_from = out,
            Err(e) => {
                warn!(
                    name = %item.name,
                    error = %e,
                    "Transcoding failed, uploading original bytes"
                );
            }
        }
    }

    let path = &path;
    let upload_from = &upload_from;
    let placed = ctx
        .retry
        .run("upload", move || async move {
            let from: PathBuf = if ScratchBatch::is_fetched(upload_from) {
                upload_from.clone()
            } else {
                fetch_one(src, kind, item.id, path).await?;
                path.clone()
            };
            let placed = dst
                .upload_paths(
                    kind,
                    dataset_id,
                    &[PathUpload {
                        name: item.name.clone(),
                        path: from,
                        meta: item.meta.clone(),
                    }],
                )
                .await?;
            Ok(placed)
        })
        .await?;
    single(placed, "upload_paths")
}

/// Tier 2 then Tier 3 for one item.
pub(crate) async fn place_single(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    kind: ProjectKind,
    dataset_id: Id,
    item: &EntityInfo,
    ctx: &SyncContext,
    transcode: bool,
) -> Result<EntityInfo, SyncError> {
    if item.hash.is_some() {
        match place_by_hash(dst, kind, dataset_id, item).await {
            Ok(placed) => {
                debug!(%kind, name = %item.name, "Placed by hash");
                return Ok(placed);
            }
            Err(e) => {
                info!(%kind, name = %item.name, error = %e, "Hash upload failed, copying bytes");
            }
        }
    }
    place_by_copy(dst, src, kind, dataset_id, item, ctx, transcode).await
}

/// Attaches related images to a placed entity: by hash in one call, or by
/// downloading and uploading each image when that is rejected.
pub(crate) async fn copy_related_images(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    kind: ProjectKind,
    src_entity_id: Id,
    dst_entity_id: Id,
    ctx: &SyncContext,
) -> Result<usize, SyncError> {
    let related: Vec<RelatedImage> = src.list_related_images(kind, src_entity_id).await?;
    if related.is_empty() {
        return Ok(0);
    }

    let by_hash: Option<Vec<crate::model::NewRelatedImage>> = related
        .iter()
        .map(|img| {
            img.hash.as_ref().map(|hash| crate::model::NewRelatedImage {
                entity_id: dst_entity_id,
                name: img.name.clone(),
                hash: hash.clone(),
                meta: img.meta.clone(),
            })
        })
        .collect();

    if let Some(requests) = by_hash {
        match dst.add_related_images(kind, &requests).await {
            Ok(()) => return Ok(related.len()),
            Err(e) => {
                warn!(
                    %kind,
                    entity_id = dst_entity_id,
                    error = %e,
                    "Attaching related images by hash failed, uploading them"
                );
            }
        }
    }

    let mut scratch = ctx.scratch.batch()?;
    for img in &related {
        let path = scratch.claim(&img.name);
        let path = &path;
        ctx.retry
            .run("related image", move || async move {
                if !ScratchBatch::is_fetched(path) {
                    src.download_related_image(kind, img.id, path).await?;
                }
                dst.upload_related_image(kind, dst_entity_id, &img.name, path, img.meta.clone())
                    .await?;
                Ok(())
            })
            .await?;
    }
    Ok(related.len())
}
