use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    copy_related_images, decide, list_existing, place_single, remove_stale, DatasetJob, Decision,
    EntityStrategy, TransferResult,
};
use crate::annotation::{append_to_episode, KeyIdMap, KeyedAnnotation};
use crate::context::SyncContext;
use crate::contract::InstanceApi;
use crate::error::SyncError;
use crate::model::{Id, ProjectKind};
use crate::progress::{ProgressLevel, ProgressSink};

const KIND: ProjectKind = ProjectKind::PointCloudEpisodes;

/// Episode frames move like point clouds. The annotation belongs to the
/// dataset rather than a frame, so it is decoded up front and written once,
/// after every frame placed in this run is known.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpisodeStrategy;

#[async_trait]
impl EntityStrategy for EpisodeStrategy {
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
        let json = src
            .download_dataset_annotation(KIND, job.src_dataset.id)
            .await?;
        let ann = KeyedAnnotation::decode(&json, job.schema)?;

        let items = src.list_entities(KIND, job.src_dataset.id).await?;
        let mut existing = list_existing(dst, KIND, job.dst_dataset.id).await?;
        progress.start(
            ProgressLevel::Items,
            &format!(
                "Synchronizing point cloud episodes for dataset: {}",
                job.src_dataset.name
            ),
            items.len(),
        );

        let mut frame_to_entity: HashMap<i64, Id> = HashMap::new();
        let mut result = TransferResult::default();
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

            match placed.frame().or_else(|| item.frame()) {
                Some(frame) => {
                    frame_to_entity.insert(frame, placed.id);
                }
                None => warn!(name = %item.name, "Episode frame without frame index"),
            }

            result.transferred += 1;
            result.entities.push(placed);
            progress.advance(ProgressLevel::Items, 1);
        }
        progress.finish(ProgressLevel::Items);

        if frame_to_entity.is_empty() {
            debug!(
                dataset = %job.src_dataset.name,
                "No frames placed, episode annotation untouched"
            );
        } else {
            let mut map = KeyIdMap::new();
            let written = append_to_episode(
                dst,
                KIND,
                job.dst_dataset.id,
                &ann,
                &frame_to_entity,
                &mut map,
            )
            .await?;
            debug!(written, frames = frame_to_entity.len(), "Episode annotation appended");
        }

        info!(
            dataset = %job.src_dataset.name,
            transferred = result.transferred,
            reused = result.reused,
            skipped = result.skipped,
            "Point cloud episodes synchronised"
        );
        Ok(result)
    }
}
