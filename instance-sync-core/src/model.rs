//! Plain data records exchanged with an instance through [`crate::contract::InstanceApi`].
//!
//! Ids are instance-local. Nothing in this crate compares an id from the source
//! instance with an id from the destination; containers are matched by name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Instance-local numeric identifier.
pub type Id = i64;

/// The declared media kind of a project. Every dataset inside a project holds
/// entities of this kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    Images,
    Videos,
    Volumes,
    PointClouds,
    PointCloudEpisodes,
}

impl ProjectKind {
    /// Noun used in log lines and progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            ProjectKind::Images => "images",
            ProjectKind::Videos => "videos",
            ProjectKind::Volumes => "volumes",
            ProjectKind::PointClouds => "point clouds",
            ProjectKind::PointCloudEpisodes => "point cloud episodes",
        }
    }
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reconciliation policy applied when a same-named destination container or
/// item already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Not decided yet. Existing destination items are reused by name.
    #[default]
    #[serde(alias = "not_set")]
    Unset,
    /// Leave existing destination projects untouched.
    #[serde(alias = "ignore")]
    Skip,
    /// Descend and copy only missing or outdated items.
    Check,
    /// Remove the destination project and copy everything again.
    Reupload,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scenario::Unset => "unset",
            Scenario::Skip => "skip",
            Scenario::Check => "check",
            Scenario::Reupload => "reupload",
        };
        f.write_str(s)
    }
}

impl From<&str> for Scenario {
    fn from(s: &str) -> Self {
        match s {
            "skip" | "ignore" => Scenario::Skip,
            "check" => Scenario::Check,
            "reupload" => Scenario::Reupload,
            "unset" | "not_set" | "" => Scenario::Unset,
            other => {
                tracing::warn!(scenario = other, "Unknown scenario, leaving it unset");
                Scenario::Unset
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub id: Id,
    pub team_id: Id,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: Id,
    pub workspace_id: Id,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ProjectKind,
}

/// Request body for creating a project on the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProject {
    pub name: String,
    pub description: String,
    pub kind: ProjectKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: Id,
    pub project_id: Id,
    /// Nested datasets point at their parent; top-level datasets carry `None`.
    #[serde(default)]
    pub parent_id: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDataset {
    pub name: String,
    pub description: String,
    pub parent_id: Option<Id>,
}

/// A leaf media object (image, video, volume, point cloud or episode frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: Id,
    pub dataset_id: Id,
    /// Unique within its dataset.
    pub name: String,
    pub updated_at: DateTime<Utc>,
    /// Content address recognised by the instance storage, if any.
    #[serde(default)]
    pub hash: Option<String>,
    /// URI of externally hosted bytes, if the entity was added by link.
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl EntityInfo {
    /// Frame index of a point-cloud-episode frame.
    pub fn frame(&self) -> Option<i64> {
        self.meta.get("frame").and_then(|f| f.as_i64())
    }

    /// True when dimensional metadata was populated by the instance.
    pub fn has_dimensions(&self) -> bool {
        self.width.is_some() && self.height.is_some()
    }
}

/// Add an entity whose bytes stay where `link` points.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkUpload {
    pub name: String,
    pub link: String,
    pub meta: serde_json::Value,
}

/// Add an entity from content already present in destination storage.
#[derive(Debug, Clone, PartialEq)]
pub struct HashUpload {
    pub name: String,
    pub hash: String,
    pub meta: serde_json::Value,
}

/// Add an entity from a local file.
#[derive(Debug, Clone, PartialEq)]
pub struct PathUpload {
    pub name: String,
    pub path: PathBuf,
    pub meta: serde_json::Value,
}

/// Secondary image attached to a point cloud or an episode frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedImage {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRelatedImage {
    pub entity_id: Id,
    pub name: String,
    pub hash: String,
    pub meta: serde_json::Value,
}

/// Where annotation objects are attached. Episode objects live on the dataset,
/// every other kind attaches objects to the entity itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationScope {
    Entity(Id),
    Dataset(Id),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewObject {
    pub class_title: String,
    pub tags: Vec<TagValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFigure {
    /// Destination id of the owning object.
    pub object_id: Id,
    pub geometry_type: String,
    pub geometry: serde_json::Value,
    pub frame_index: Option<i64>,
    /// Volume plane (`axial`, `sagittal`, `coronal`) for slice figures.
    pub plane: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Id,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Role name within the team the user was listed from.
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub login: String,
    pub password: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub id: Id,
    pub role: String,
}
