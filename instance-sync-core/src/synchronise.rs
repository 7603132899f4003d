//! High-level pipeline: walks team → workspace → project → dataset and hands
//! every dataset to the strategy of its project kind.
//!
//! Containers are matched across instances by name. A destination container
//! is created the first time it is needed and resolved on every later run, so
//! an interrupted run can simply be started again.
//!
//! # Responsibilities
//! - Resolve or create the destination team, workspaces, projects and datasets
//! - Apply the project-level scenario (`skip`, `check`, `reupload`)
//! - Copy the project schema when it differs
//! - Dispatch each dataset to its [`EntityStrategy`] and aggregate the outcome
//!
//! # Error Handling
//! Failing to resolve or create a container aborts the run with
//! [`SyncError::Container`]. A strategy failure only aborts its dataset; it is
//! logged, recorded in [`SynchroniseReport::failures`] and the run continues.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Output: [`SynchroniseReport`]

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::annotation::ProjectSchema;
use crate::config::SelectionManifest;
use crate::context::SyncContext;
use crate::contract::InstanceApi;
use crate::error::{ApiError, SyncError};
use crate::model::{
    DatasetInfo, Id, NewDataset, NewProject, ProjectInfo, Scenario, TeamInfo, WorkspaceInfo,
};
use crate::progress::{ProgressLevel, ProgressSink};
use crate::strategy::{strategy_for, DatasetJob, EntityStrategy};

/// Outcome of a workspace synchronisation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SynchroniseReport {
    pub workspaces: usize,
    pub projects: usize,
    /// Projects left alone because they exist and the scenario is `skip`.
    pub projects_skipped: usize,
    /// Destination projects removed and recreated under `reupload`.
    pub projects_recreated: usize,
    pub datasets: usize,
    pub transferred: usize,
    pub reused: usize,
    pub skipped: usize,
    pub failures: Vec<DatasetFailure>,
}

impl SynchroniseReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A dataset whose processing was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFailure {
    pub workspace: String,
    pub project: String,
    pub dataset: String,
    pub error: String,
}

/// Synchronises the selected workspaces of `team_id` from `src` into `dst`.
pub async fn synchronise(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    team_id: Id,
    manifest: &SelectionManifest,
    scenario: Scenario,
    ctx: &SyncContext,
    progress: &dyn ProgressSink,
) -> Result<SynchroniseReport, SyncError> {
    info!(
        team_id,
        %scenario,
        fast_mode = ctx.fast_mode,
        "[SYNC] Starting workspace synchronisation"
    );
    ctx.scratch.ensure()?;

    let src_team = source_team(src, team_id).await?;
    let dst_team = resolve_team(dst, &src_team).await?;

    let workspaces: Vec<WorkspaceInfo> = src
        .list_workspaces(src_team.id)
        .await?
        .into_iter()
        .filter(|ws| manifest.includes_workspace(&ws.name))
        .collect();
    for name in manifest.workspaces.keys() {
        if manifest.includes_workspace(name) && !workspaces.iter().any(|ws| &ws.name == name) {
            warn!(workspace = %name, "[SYNC] Selected workspace not found on source");
        }
    }

    let mut report = SynchroniseReport::default();
    progress.start(
        ProgressLevel::Workspaces,
        "Synchronizing workspaces",
        workspaces.len(),
    );
    for ws in &workspaces {
        let dst_ws = resolve_workspace(dst, dst_team.id, ws).await?;
        sync_workspace(dst, src, ws, &dst_ws, manifest, scenario, ctx, progress, &mut report)
            .await?;
        report.workspaces += 1;
        progress.advance(ProgressLevel::Workspaces, 1);
    }
    progress.finish(ProgressLevel::Workspaces);

    if report.is_complete() {
        info!(
            workspaces = report.workspaces,
            projects = report.projects,
            datasets = report.datasets,
            transferred = report.transferred,
            reused = report.reused,
            skipped = report.skipped,
            "[SYNC] Workspace synchronisation finished"
        );
    } else {
        error!(
            failures = report.failures.len(),
            "[SYNC] Workspace synchronisation finished with failed datasets, re-run to complete"
        );
    }
    Ok(report)
}

pub(crate) async fn source_team(src: &dyn InstanceApi, team_id: Id) -> Result<TeamInfo, SyncError> {
    src.get_team(team_id)
        .await?
        .ok_or(SyncError::Api(ApiError::NotFound {
            what: "team",
            id: team_id,
        }))
}

/// Finds the destination team named like `src_team`, creating it if needed.
pub(crate) async fn resolve_team(
    dst: &dyn InstanceApi,
    src_team: &TeamInfo,
) -> Result<TeamInfo, SyncError> {
    let found = dst
        .find_team_by_name(&src_team.name)
        .await
        .map_err(|e| SyncError::container("team", &src_team.name, e))?;
    if let Some(team) = found {
        debug!(team = %team.name, id = team.id, "[SYNC] Destination team exists");
        return Ok(team);
    }
    info!(team = %src_team.name, "[SYNC] Creating destination team");
    dst.create_team(&src_team.name, &src_team.description)
        .await
        .map_err(|e| SyncError::container("team", &src_team.name, e))
}

async fn resolve_workspace(
    dst: &dyn InstanceApi,
    dst_team_id: Id,
    ws: &WorkspaceInfo,
) -> Result<WorkspaceInfo, SyncError> {
    let found = dst
        .find_workspace_by_name(dst_team_id, &ws.name)
        .await
        .map_err(|e| SyncError::container("workspace", &ws.name, e))?;
    if let Some(existing) = found {
        return Ok(existing);
    }
    info!(workspace = %ws.name, "[SYNC] Creating destination workspace");
    dst.create_workspace(dst_team_id, &ws.name, &ws.description)
        .await
        .map_err(|e| SyncError::container("workspace", &ws.name, e))
}

#[allow(clippy::too_many_arguments)]
async fn sync_workspace(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    ws: &WorkspaceInfo,
    dst_ws: &WorkspaceInfo,
    manifest: &SelectionManifest,
    scenario: Scenario,
    ctx: &SyncContext,
    progress: &dyn ProgressSink,
    report: &mut SynchroniseReport,
) -> Result<(), SyncError> {
    let listed = src.list_projects(ws.id).await?;
    let projects: Vec<ProjectInfo> = match manifest.projects_in(&ws.name) {
        None => listed,
        Some(selected) => {
            for id in selected {
                if !listed.iter().any(|p| p.id == *id) {
                    warn!(
                        workspace = %ws.name,
                        project_id = id,
                        "[SYNC] Selected project not found on source"
                    );
                }
            }
            listed
                .into_iter()
                .filter(|p| selected.contains(&p.id))
                .collect()
        }
    };

    progress.start(
        ProgressLevel::Projects,
        &format!("Synchronizing projects in workspace: {}", ws.name),
        projects.len(),
    );
    for project in &projects {
        sync_project(dst, src, ws, dst_ws, project, scenario, ctx, progress, report).await?;
        report.projects += 1;
        progress.advance(ProgressLevel::Projects, 1);
    }
    progress.finish(ProgressLevel::Projects);
    Ok(())
}

/// Applies the project-level scenario. Returns `None` when the project must
/// not be descended into.
async fn resolve_project(
    dst: &dyn InstanceApi,
    dst_ws: &WorkspaceInfo,
    project: &ProjectInfo,
    scenario: Scenario,
    report: &mut SynchroniseReport,
) -> Result<Option<ProjectInfo>, SyncError> {
    let found = dst
        .find_project_by_name(dst_ws.id, &project.name)
        .await
        .map_err(|e| SyncError::container("project", &project.name, e))?;

    let existing = match found {
        None => None,
        Some(existing) => match scenario {
            Scenario::Skip => {
                info!(project = %project.name, "[SYNC] Project exists, skipping");
                report.projects_skipped += 1;
                return Ok(None);
            }
            Scenario::Reupload => {
                // Irreversible: any destination-side edits to this project are lost.
                warn!(
                    project = %existing.name,
                    id = existing.id,
                    "[SYNC] Removing destination project before re-upload"
                );
                dst.remove_project(existing.id)
                    .await
                    .map_err(|e| SyncError::container("project", &project.name, e))?;
                report.projects_recreated += 1;
                None
            }
            Scenario::Check | Scenario::Unset => Some(existing),
        },
    };

    if let Some(existing) = existing {
        if existing.kind != project.kind {
            warn!(
                project = %project.name,
                source_kind = %project.kind,
                destination_kind = %existing.kind,
                "[SYNC] Destination project has a different kind"
            );
        }
        return Ok(Some(existing));
    }

    info!(project = %project.name, kind = %project.kind, "[SYNC] Creating destination project");
    let created = dst
        .create_project(
            dst_ws.id,
            NewProject {
                name: project.name.clone(),
                description: project.description.clone(),
                kind: project.kind,
            },
        )
        .await
        .map_err(|e| SyncError::container("project", &project.name, e))?;
    Ok(Some(created))
}

/// Copies the source schema onto the destination project when they differ and
/// returns it decoded.
async fn copy_schema(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    project: &ProjectInfo,
    dst_project: &ProjectInfo,
) -> Result<ProjectSchema, SyncError> {
    let src_meta = src.get_project_meta(project.id).await?;
    let dst_meta = dst.get_project_meta(dst_project.id).await?;
    if src_meta != dst_meta {
        debug!(project = %project.name, "[SYNC] Updating destination project schema");
        dst.update_project_meta(dst_project.id, src_meta.clone())
            .await?;
    }
    ProjectSchema::from_json(&src_meta)
}

#[allow(clippy::too_many_arguments)]
async fn sync_project(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    ws: &WorkspaceInfo,
    dst_ws: &WorkspaceInfo,
    project: &ProjectInfo,
    scenario: Scenario,
    ctx: &SyncContext,
    progress: &dyn ProgressSink,
    report: &mut SynchroniseReport,
) -> Result<(), SyncError> {
    let Some(dst_project) = resolve_project(dst, dst_ws, project, scenario, report).await? else {
        return Ok(());
    };
    let schema = copy_schema(dst, src, project, &dst_project).await?;

    let datasets = src.list_datasets(project.id).await?;
    let strategy = strategy_for(project.kind);
    let mut id_map: HashMap<Id, Id> = HashMap::new();

    progress.start(
        ProgressLevel::Datasets,
        &format!("Synchronizing datasets of project: {}", project.name),
        datasets.len(),
    );
    for ds in &datasets {
        let dst_ds = resolve_dataset(dst, dst_project.id, ds, &id_map).await?;
        id_map.insert(ds.id, dst_ds.id);

        let job = DatasetJob {
            src_dataset: ds,
            dst_dataset: &dst_ds,
            schema: &schema,
            scenario,
        };
        run_strategy(dst, src, strategy.as_ref(), &job, ctx, progress, ws, project, report).await;
        report.datasets += 1;
        progress.advance(ProgressLevel::Datasets, 1);
    }
    progress.finish(ProgressLevel::Datasets);
    Ok(())
}

/// Resolves the destination dataset by `(parent, name)`. A dataset whose
/// parent has not been mapped is attached at the top level.
async fn resolve_dataset(
    dst: &dyn InstanceApi,
    dst_project_id: Id,
    ds: &DatasetInfo,
    id_map: &HashMap<Id, Id>,
) -> Result<DatasetInfo, SyncError> {
    let parent_id = match ds.parent_id {
        None => None,
        Some(src_parent) => match id_map.get(&src_parent) {
            Some(dst_parent) => Some(*dst_parent),
            None => {
                warn!(
                    dataset = %ds.name,
                    parent_id = src_parent,
                    "[SYNC] Parent dataset not mapped, attaching at top level"
                );
                None
            }
        },
    };

    let found = dst
        .find_dataset_by_name(dst_project_id, &ds.name, parent_id)
        .await
        .map_err(|e| SyncError::container("dataset", &ds.name, e))?;
    if let Some(existing) = found {
        return Ok(existing);
    }
    debug!(dataset = %ds.name, ?parent_id, "[SYNC] Creating destination dataset");
    dst.create_dataset(
        dst_project_id,
        NewDataset {
            name: ds.name.clone(),
            description: ds.description.clone(),
            parent_id,
        },
    )
    .await
    .map_err(|e| SyncError::container("dataset", &ds.name, e))
}

#[allow(clippy::too_many_arguments)]
async fn run_strategy(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    strategy: &dyn EntityStrategy,
    job: &DatasetJob<'_>,
    ctx: &SyncContext,
    progress: &dyn ProgressSink,
    ws: &WorkspaceInfo,
    project: &ProjectInfo,
    report: &mut SynchroniseReport,
) {
    match strategy.sync(dst, src, job, ctx, progress).await {
        Ok(result) => {
            report.transferred += result.transferred;
            report.reused += result.reused;
            report.skipped += result.skipped;
        }
        Err(e) => {
            progress.finish(ProgressLevel::Items);
            error!(
                workspace = %ws.name,
                project = %project.name,
                dataset = %job.src_dataset.name,
                error = %e,
                "[SYNC][ERROR] Dataset synchronisation failed"
            );
            report.failures.push(DatasetFailure {
                workspace: ws.name.clone(),
                project: project.name.clone(),
                dataset: job.src_dataset.name.clone(),
                error: e.to_string(),
            });
        }
    }
}
