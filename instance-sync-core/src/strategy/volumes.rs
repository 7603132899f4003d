use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    decide, list_existing, place_single, remove_stale, DatasetJob, Decision, EntityStrategy,
    TransferResult,
};
use crate::annotation::{append_to_entity, KeyIdMap, KeyedAnnotation};
use crate::context::SyncContext;
use crate::contract::InstanceApi;
use crate::error::{io_err, SyncError};
use crate::model::ProjectKind;
use crate::progress::{ProgressLevel, ProgressSink};
use crate::transfer::{GeometryCache, ScratchBatch};

const KIND: ProjectKind = ProjectKind::Volumes;

/// Volumes move one at a time. Besides the keyed annotation, each spatial
/// figure's geometry blob is copied from the source figure to the new one.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeStrategy;

#[async_trait]
impl EntityStrategy for VolumeStrategy {
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
        let cache = ctx.scratch.geometry_cache(job.src_dataset.id)?;
        progress.start(
            ProgressLevel::Items,
            &format!("Synchronizing volumes for dataset: {}", job.src_dataset.name),
            items.len(),
        );

        let mut result = TransferResult::default();
        let mut map = KeyIdMap::new();
        for item in &items {
            match decide(item, &existing, job.scenario) {
                Decision::Skip => {
                    result.skipped += 1;
                    progress.advance(ProgressLevel::Items, 1);
                    continue;
                }
                Decision::Reuse(current) => {
                    result.reused += 1;
                    result.entities.push(current);
                    progress.advance(ProgressLevel::Items, 1);
                    continue;
                }
                Decision::Replace(id) => {
                    remove_stale(dst, KIND, &[(item.name.clone(), id)], &mut existing).await?;
                }
                Decision::Transfer => {}
            }

            let placed =
                place_single(dst, src, KIND, job.dst_dataset.id, item, ctx, false).await?;

            let json = src.download_annotation(KIND, item.id).await?;
            let ann = KeyedAnnotation::decode(&json, job.schema)?;
            append_to_entity(dst, KIND, placed.id, &ann, &mut map).await?;
            copy_spatial_geometry(dst, src, &ann, &map, &cache, ctx).await?;

            result.transferred += 1;
            result.entities.push(placed);
            progress.advance(ProgressLevel::Items, 1);
        }
        progress.finish(ProgressLevel::Items);

        info!(
            dataset = %job.src_dataset.name,
            transferred = result.transferred,
            reused = result.reused,
            skipped = result.skipped,
            "Volumes synchronised"
        );
        Ok(result)
    }
}

async fn copy_spatial_geometry(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    ann: &KeyedAnnotation,
    map: &KeyIdMap,
    cache: &GeometryCache,
    ctx: &SyncContext,
) -> Result<(), SyncError> {
    for fig in &ann.spatial_figures {
        let Some(src_figure_id) = fig.source_id else {
            warn!(key = %fig.key, "Spatial figure without source id, geometry not copied");
            continue;
        };
        let Some(dst_figure_id) = map.figure_id(&fig.key) else {
            warn!(key = %fig.key, "Spatial figure was not created, geometry not copied");
            continue;
        };

        let path = cache.path_for(src_figure_id);
        let path = &path;
        ctx.retry
            .run("spatial geometry", move || async move {
                if !ScratchBatch::is_fetched(path) {
                    src.download_spatial_geometry(src_figure_id, path).await?;
                }
                let bytes = tokio::fs::read(path).await.map_err(|e| io_err(path, e))?;
                dst.upload_spatial_geometry(dst_figure_id, bytes).await?;
                Ok(())
            })
            .await?;
        debug!(src_figure_id, dst_figure_id, "Spatial geometry copied");
    }
    Ok(())
}
