use async_trait::async_trait;
use tracing::info;

use super::{
    copy_related_images, decide, list_existing, place_single, remove_stale, DatasetJob, Decision,
    EntityStrategy, TransferResult,
};
use crate::annotation::{append_to_entity, KeyIdMap, KeyedAnnotation};
use crate::context::SyncContext;
use crate::contract::InstanceApi;
use crate::error::SyncError;
use crate::model::ProjectKind;
use crate::progress::{ProgressLevel, ProgressSink};

const KIND: ProjectKind = ProjectKind::PointClouds;

/// Point clouds move one at a time, together with their related images and
/// keyed annotation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PointCloudStrategy;

#[async_trait]
impl EntityStrategy for PointCloudStrategy {
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
            &format!(
                "Synchronizing point clouds for dataset: {}",
                job.src_dataset.name
            ),
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
            copy_related_images(dst, src, KIND, item.id, placed.id, ctx).await?;

            let json = src.download_annotation(KIND, item.id).await?;
            let ann = KeyedAnnotation::decode(&json, job.schema)?;
            append_to_entity(dst, KIND, placed.id, &ann, &mut map).await?;

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
            "Point clouds synchronised"
        );
        Ok(result)
    }
}
