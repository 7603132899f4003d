//! Resumable-run record: every input of a run, persisted so an interrupted
//! run can be started again non-interactively with identical inputs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{MemberScenario, SelectionManifest};
use crate::context::SyncContext;
use crate::contract::InstanceApi;
use crate::error::{io_err, SyncError};
use crate::members::{sync_members, MembersReport};
use crate::model::{Id, Scenario};
use crate::progress::ProgressSink;
use crate::synchronise::{synchronise, SynchroniseReport};
use crate::transfer::LinkRewrite;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub src_server: String,
    pub src_token: String,
    pub team_id: Id,
    #[serde(default)]
    pub selection: SelectionManifest,
    #[serde(default)]
    pub scenario: Scenario,
    #[serde(default)]
    pub members_scenario: MemberScenario,
    #[serde(default)]
    pub default_password: Option<String>,
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default)]
    pub link_rewrite: Option<LinkRewrite>,
    #[serde(default)]
    pub transcode_videos: bool,
}

impl RunRecord {
    pub async fn load(path: &Path) -> Result<Self, SyncError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| io_err(path, e))?;
        let record = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Record(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Run record loaded");
        Ok(record)
    }

    pub async fn save(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| io_err(path, e))
    }

    pub fn is_changed(&self, other: &RunRecord) -> bool {
        self != other
    }

    /// Writes the record unless an identical one is already stored. Never
    /// fails: a run must not abort because its record could not be written.
    pub async fn persist(&self, path: &Path) {
        match RunRecord::load(path).await {
            Ok(stored) if !stored.is_changed(self) => {
                debug!(path = %path.display(), "Run record unchanged");
                return;
            }
            Ok(_) => info!(path = %path.display(), "Run record changed, replacing"),
            Err(_) => debug!(path = %path.display(), "No readable run record, writing a new one"),
        }
        if let Err(e) = self.save(path).await {
            warn!(path = %path.display(), error = %e, "Failed to persist run record");
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            src_server = %self.src_server,
            team_id = self.team_id,
            scenario = %self.scenario,
            members_scenario = ?self.members_scenario,
            fast_mode = self.fast_mode,
            transcode_videos = self.transcode_videos,
            link_rewrite = ?self.link_rewrite.as_ref().map(LinkRewrite::bucket_path),
            "Loaded run record"
        );
    }
}

/// Outcome of a full run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub workspaces: SynchroniseReport,
    pub members: MembersReport,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.workspaces.is_complete() && self.members.failed.is_empty()
    }
}

/// Runs workspace synchronisation, then member synchronisation, with the
/// inputs of `record`.
pub async fn run(
    dst: &dyn InstanceApi,
    src: &dyn InstanceApi,
    record: &RunRecord,
    ctx: &SyncContext,
    progress: &dyn ProgressSink,
) -> Result<RunReport, SyncError> {
    let workspaces = synchronise(
        dst,
        src,
        record.team_id,
        &record.selection,
        record.scenario,
        ctx,
        progress,
    )
    .await?;
    let members = sync_members(
        dst,
        src,
        record.team_id,
        &record.selection.members,
        record.default_password.as_deref(),
        record.members_scenario,
        progress,
    )
    .await?;
    Ok(RunReport {
        workspaces,
        members,
    })
}
