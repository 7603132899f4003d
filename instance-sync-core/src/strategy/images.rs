use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    decide, list_existing, remove_stale, DatasetJob, Decision, EntityStrategy, TransferResult,
};
use crate::annotation::validate_image_annotation;
use crate::context::SyncContext;
use crate::contract::InstanceApi;
use crate::error::{ApiError, SyncError};
use crate::model::{EntityInfo, HashUpload, Id, LinkUpload, PathUpload, ProjectKind};
use crate::progress::{ProgressLevel, ProgressSink};
use crate::transfer::{all_hashes, download_batch, ensure_hashes_recognized, resolve_link};

const KIND: ProjectKind = ProjectKind::Images;

/// Images move in batches through the link, hash and copy tiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageStrategy;

#[async_trait]
impl EntityStrategy for ImageStrategy {
    fn kind(&self) -> ProjectKind {
        KIND
    }

    async fn sync(
        &self,
        dst: &dyn InstanceApi,
        src: &dyn InstanceApi,
        job: &DatasetJob<'_>,
        ctx: &SyncContext,
        progress: &dyn ProgressSink,
    ) -> Result<TransferResult, SyncError> {
        let items = src.list_entities(KIND, job.src_dataset.id).await?;
        let mut existing = list_existing(dst, KIND, job.dst_dataset.id).await?;

        progress.start(
            ProgressLevel::Items,
            &format!("Synchronizing images for dataset: {}", job.src_dataset.name),
            items.len(),
        );

        let mut result = TransferResult::default();
        for batch in items.chunks(ctx.batch_size.max(1)) {
            let mut pending: Vec<&EntityInfo> = Vec::with_capacity(batch.len());
            let mut stale: Vec<(String, Id)> = Vec::new();
            for item in batch {
                match decide(item, &existing, job.scenario) {
                    Decision::Skip => result.skipped += 1,
                    Decision::Replace(id) => {
                        stale.push((item.name.clone(), id));
                        pending.push(item);
                    }
                    Decision::Reuse(_) | Decision::Transfer => pending.push(item),
                }
            }
            remove_stale(dst, KIND, &stale, &mut existing).await?;

            if !pending.is_empty() {
                let placed =
                    place_batch(dst, src, job, &pending, &existing, ctx, &mut result).await?;
                copy_annotations(dst, src, job, &pending, &placed).await?;
                result.entities.extend(placed);
            }
            progress.advance(ProgressLevel::Items, batch.len());
        }
        progress.finish(ProgressLevel::Items);

        info!(
            dataset = %job.src_dataset.name,
            transferred = result.transferred,
            reused = result.reused,
            skipped = result.skipped,
            "Images synchronised"
        );
        Ok(result)
    }
}

/// Places `pending` in the destination dataset and returns the destination
/// entities in the same order. Items already present by name are reused and
/// only the rest go through the transfer tiers.
async fn place_batch(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    job: &DatasetJob<'_>,
    pending: &[&EntityInfo],
    existing: &HashMap<String, EntityInfo>,
    ctx: &SyncContext,
    result: &mut TransferResult,
) -> Result<Vec<EntityInfo>, SyncError> {
    let mut slots: Vec<Option<EntityInfo>> = vec![None; pending.len()];
    let mut missing_idx: Vec<usize> = Vec::new();
    for (i, item) in pending.iter().enumerate() {
        match existing.get(&item.name) {
            Some(current) => slots[i] = Some(current.clone()),
            None => missing_idx.push(i),
        }
    }

    let reused = pending.len() - missing_idx.len();
    if reused > 0 {
        info!(
            reused,
            missing = missing_idx.len(),
            "Batch partly present in destination dataset, transferring only missing images"
        );
    }
    result.reused += reused;

    if !missing_idx.is_empty() {
        let missing: Vec<&EntityInfo> = missing_idx.iter().map(|&i| pending[i]).collect();
        let uploaded = transfer_missing(dst, src, job, &missing, ctx).await?;
        if uploaded.len() != missing.len() {
            return Err(SyncError::Api(ApiError::Decode {
                method: "images.upload".to_string(),
                message: format!(
                    "expected {} uploaded images, got {}",
                    missing.len(),
                    uploaded.len()
                ),
            }));
        }
        result.transferred += uploaded.len();
        for (i, entity) in missing_idx.into_iter().zip(uploaded) {
            slots[i] = Some(entity);
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

async fn transfer_missing(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    job: &DatasetJob<'_>,
    items: &[&EntityInfo],
    ctx: &SyncContext,
) -> Result<Vec<EntityInfo>, SyncError> {
    let dataset_id = job.dst_dataset.id;

    if ctx.fast_mode {
        let links: Option<Vec<LinkUpload>> = items
            .iter()
            .map(|item| {
                item.link.as_ref().map(|link| LinkUpload {
                    name: item.name.clone(),
                    link: resolve_link(link, ctx.link_rewrite.as_ref()),
                    meta: item.meta.clone(),
                })
            })
            .collect();
        match links {
            Some(links) => match upload_by_links(dst, dataset_id, &links).await {
                Ok(placed) => return Ok(placed),
                Err(e @ SyncError::Rollback { .. }) => return Err(e),
                Err(e) => warn!(error = %e, "Link upload failed, trying hashes"),
            },
            None => debug!("Not every image has a link, skipping link tier"),
        }
    }

    if let Some(hashes) = all_hashes(items.iter().map(|item| item.hash.as_ref())) {
        match upload_by_hashes(dst, dataset_id, items, &hashes).await {
            Ok(placed) => return Ok(placed),
            Err(e) => info!(error = %e, "Hash upload failed, copying bytes"),
        }
    }

    copy_bytes(dst, src, job, items, ctx).await
}

/// Tier 1. Rejects the batch if the instance could not read the dimensions of
/// any linked image, removing everything this call created. A failed removal
/// is a [`SyncError::Rollback`], which must not fall through to another tier.
async fn upload_by_links(
    dst: &dyn InstanceApi,
    dataset_id: Id,
    links: &[LinkUpload],
) -> Result<Vec<EntityInfo>, SyncError> {
    let placed = dst.upload_links(KIND, dataset_id, links).await?;
    let invalid = placed.iter().filter(|e| !e.has_dimensions()).count()
        + links.len().saturating_sub(placed.len());
    if invalid > 0 {
        let ids: Vec<Id> = placed.iter().map(|e| e.id).collect();
        if !ids.is_empty() {
            dst.remove_entities(KIND, &ids)
                .await
                .map_err(|source| SyncError::Rollback {
                    count: ids.len(),
                    source,
                })?;
        }
        return Err(SyncError::LinkValidation { invalid });
    }
    Ok(placed)
}

/// Tier 2.
async fn upload_by_hashes(
    dst: &dyn InstanceApi,
    dataset_id: Id,
    items: &[&EntityInfo],
    hashes: &[String],
) -> Result<Vec<EntityInfo>, SyncError> {
    ensure_hashes_recognized(dst, hashes).await?;
    let uploads: Vec<HashUpload> = items
        .iter()
        .zip(hashes)
        .map(|(item, hash)| HashUpload {
            name: item.name.clone(),
            hash: hash.clone(),
            meta: item.meta.clone(),
        })
        .collect();
    Ok(dst.upload_hashes(KIND, dataset_id, &uploads).await?)
}

/// Tier 3. Download and upload are retried together; files that made it to
/// scratch storage on an earlier attempt are not fetched again.
async fn copy_bytes(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    job: &DatasetJob<'_>,
    items: &[&EntityInfo],
    ctx: &SyncContext,
) -> Result<Vec<EntityInfo>, SyncError> {
    let mut scratch = ctx.scratch.batch()?;
    let ids: Vec<Id> = items.iter().map(|item| item.id).collect();
    let uploads: Vec<PathUpload> = items
        .iter()
        .map(|item| PathUpload {
            name: item.name.clone(),
            path: scratch.claim(&item.name),
            meta: item.meta.clone(),
        })
        .collect();
    let paths: Vec<_> = uploads.iter().map(|u| u.path.clone()).collect();

    let src_dataset_id = job.src_dataset.id;
    let dst_dataset_id = job.dst_dataset.id;
    let (ids, paths, uploads) = (&ids, &paths, &uploads);
    let placed = ctx
        .retry
        .run("images copy", move || async move {
            download_batch(src, KIND, src_dataset_id, ids, paths, ctx).await?;
            Ok(dst.upload_paths(KIND, dst_dataset_id, uploads).await?)
        })
        .await?;
    drop(scratch);
    Ok(placed)
}

/// Validates every source annotation against the destination schema, then
/// uploads them in one call. Uploading replaces, so reused images end up with
/// the source annotation as well.
async fn copy_annotations(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    job: &DatasetJob<'_>,
    pending: &[&EntityInfo],
    placed: &[EntityInfo],
) -> Result<(), SyncError> {
    let src_ids: Vec<Id> = pending.iter().map(|item| item.id).collect();
    let annotations = src
        .download_annotations(KIND, job.src_dataset.id, &src_ids)
        .await?;
    if annotations.len() != src_ids.len() {
        return Err(SyncError::Annotation(format!(
            "expected {} image annotations, got {}",
            src_ids.len(),
            annotations.len()
        )));
    }
    for ann in &annotations {
        validate_image_annotation(ann, job.schema)?;
    }
    let dst_ids: Vec<Id> = placed.iter().map(|e| e.id).collect();
    dst.upload_annotations(KIND, &dst_ids, &annotations).await?;
    Ok(())
}
