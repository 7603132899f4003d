use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::Id;

/// What to synchronise: workspaces by name with their selected project ids,
/// or everything under the team, plus the member logins to copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionManifest {
    #[serde(default)]
    pub all_workspaces: bool,
    #[serde(default)]
    pub workspaces: BTreeMap<String, Vec<Id>>,
    #[serde(default)]
    pub members: Vec<String>,
}

impl SelectionManifest {
    pub fn all() -> Self {
        Self {
            all_workspaces: true,
            ..Self::default()
        }
    }

    /// Project ids selected in `workspace`. `None` means every project.
    pub fn projects_in(&self, workspace: &str) -> Option<&[Id]> {
        if self.all_workspaces {
            return None;
        }
        Some(self.workspaces.get(workspace).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// A named workspace is processed only if it has at least one selected
    /// project.
    pub fn includes_workspace(&self, workspace: &str) -> bool {
        self.all_workspaces
            || self
                .workspaces
                .get(workspace)
                .is_some_and(|projects| !projects.is_empty())
    }

    pub fn trace_loaded(&self) {
        info!(
            all_workspaces = self.all_workspaces,
            workspaces = self.workspaces.len(),
            members = self.members.len(),
            "Loaded selection"
        );
        debug!(?self, "Selection loaded (full debug)");
    }
}

/// How to treat members that already exist at the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberScenario {
    /// Leave existing members untouched.
    #[default]
    Ignore,
    /// Set the destination role to the source role when they differ.
    #[serde(alias = "reupload")]
    Update,
}
