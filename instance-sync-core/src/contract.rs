//! # contract: capability interface to a data-management instance
//!
//! The engine never talks HTTP itself. It receives two already-authenticated
//! handles, one for the source instance and one for the destination, and
//! drives both exclusively through [`InstanceApi`].
//!
//! ## Interface & Extensibility
//! - Implement [`InstanceApi`] to connect the engine to a new transport (the CLI
//!   crate ships a `reqwest` client).
//! - All methods are async and return [`ApiError`] so the engine can tell a
//!   truncated stream (retried) from a rejection (falls through to the next tier).
//! - Entity operations are parameterised by [`ProjectKind`] rather than
//!   duplicated per media kind.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`; `MockInstanceApi` is exported under
//!   the `test-export-mocks` feature so downstream crates can count calls.

#![allow(unused)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use mockall::{automock, predicate::*};

use crate::error::ApiError;
use crate::model::{
    AnnotationScope, DatasetInfo, EntityInfo, HashUpload, Id, LinkUpload, NewDataset, NewFigure,
    NewObject, NewProject, NewRelatedImage, NewUser, PathUpload, ProjectInfo, ProjectKind,
    RelatedImage, RoleInfo, TagValue, TeamInfo, UserInfo, WorkspaceInfo,
};

/// Resource-oriented operations the engine needs from an instance.
///
/// Lookup methods return `Ok(None)` when nothing matches; only transport or
/// server failures are errors.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait InstanceApi: Send + Sync {
    // --- teams ---

    async fn get_team(&self, team_id: Id) -> Result<Option<TeamInfo>, ApiError>;

    async fn find_team_by_name(&self, name: &str) -> Result<Option<TeamInfo>, ApiError>;

    async fn create_team(&self, name: &str, description: &str) -> Result<TeamInfo, ApiError>;

    // --- workspaces ---

    async fn list_workspaces(&self, team_id: Id) -> Result<Vec<WorkspaceInfo>, ApiError>;

    async fn find_workspace_by_name(
        &self,
        team_id: Id,
        name: &str,
    ) -> Result<Option<WorkspaceInfo>, ApiError>;

    async fn create_workspace(
        &self,
        team_id: Id,
        name: &str,
        description: &str,
    ) -> Result<WorkspaceInfo, ApiError>;

    // --- projects ---

    async fn list_projects(&self, workspace_id: Id) -> Result<Vec<ProjectInfo>, ApiError>;

    async fn get_project(&self, project_id: Id) -> Result<Option<ProjectInfo>, ApiError>;

    async fn find_project_by_name(
        &self,
        workspace_id: Id,
        name: &str,
    ) -> Result<Option<ProjectInfo>, ApiError>;

    async fn create_project(
        &self,
        workspace_id: Id,
        project: NewProject,
    ) -> Result<ProjectInfo, ApiError>;

    /// Irreversibly removes the project and everything under it.
    async fn remove_project(&self, project_id: Id) -> Result<(), ApiError>;

    /// Label classes and tag definitions, as raw JSON.
    async fn get_project_meta(&self, project_id: Id) -> Result<serde_json::Value, ApiError>;

    async fn update_project_meta(
        &self,
        project_id: Id,
        meta: serde_json::Value,
    ) -> Result<(), ApiError>;

    // --- datasets ---

    /// All datasets of a project, nested ones included, parents listed first.
    async fn list_datasets(&self, project_id: Id) -> Result<Vec<DatasetInfo>, ApiError>;

    async fn find_dataset_by_name(
        &self,
        project_id: Id,
        name: &str,
        parent_id: Option<Id>,
    ) -> Result<Option<DatasetInfo>, ApiError>;

    async fn create_dataset(
        &self,
        project_id: Id,
        dataset: NewDataset,
    ) -> Result<DatasetInfo, ApiError>;

    // --- entities ---

    async fn list_entities(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
    ) -> Result<Vec<EntityInfo>, ApiError>;

    async fn remove_entities(&self, kind: ProjectKind, ids: &[Id]) -> Result<(), ApiError>;

    async fn upload_links(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[LinkUpload],
    ) -> Result<Vec<EntityInfo>, ApiError>;

    /// Returns the subset of `hashes` the instance storage already holds.
    async fn check_existing_hashes(&self, hashes: &[String]) -> Result<Vec<String>, ApiError>;

    async fn upload_hashes(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[HashUpload],
    ) -> Result<Vec<EntityInfo>, ApiError>;

    async fn upload_paths(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[PathUpload],
    ) -> Result<Vec<EntityInfo>, ApiError>;

    /// Writes the entity bytes to `path`. The file only appears once complete.
    async fn download_path(&self, kind: ProjectKind, id: Id, path: &Path)
        -> Result<(), ApiError>;

    /// Batch form of [`InstanceApi::download_path`]; `ids` and `paths` pair up.
    async fn download_paths(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        ids: &[Id],
        paths: &[PathBuf],
    ) -> Result<(), ApiError>;

    // --- annotations ---

    /// Image annotations for `ids`, in the same order.
    async fn download_annotations(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        ids: &[Id],
    ) -> Result<Vec<serde_json::Value>, ApiError>;

    /// Replaces the annotations of `ids` with `annotations`, pairwise.
    async fn upload_annotations(
        &self,
        kind: ProjectKind,
        ids: &[Id],
        annotations: &[serde_json::Value],
    ) -> Result<(), ApiError>;

    /// Keyed annotation of a single video, volume or point cloud.
    async fn download_annotation(
        &self,
        kind: ProjectKind,
        entity_id: Id,
    ) -> Result<serde_json::Value, ApiError>;

    /// Keyed annotation covering every frame of an episode dataset.
    async fn download_dataset_annotation(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
    ) -> Result<serde_json::Value, ApiError>;

    /// Creates annotation objects and returns their ids in input order.
    async fn add_objects(
        &self,
        kind: ProjectKind,
        scope: AnnotationScope,
        objects: &[NewObject],
    ) -> Result<Vec<Id>, ApiError>;

    /// Creates figures on an entity and returns their ids in input order.
    async fn add_figures(
        &self,
        kind: ProjectKind,
        entity_id: Id,
        figures: &[NewFigure],
    ) -> Result<Vec<Id>, ApiError>;

    /// Tags the entity itself and returns the tag ids in input order.
    async fn add_entity_tags(
        &self,
        kind: ProjectKind,
        entity_id: Id,
        tags: &[TagValue],
    ) -> Result<Vec<Id>, ApiError>;

    // --- volumetric geometry ---

    async fn download_spatial_geometry(&self, figure_id: Id, path: &Path)
        -> Result<(), ApiError>;

    async fn upload_spatial_geometry(&self, figure_id: Id, geometry: Vec<u8>)
        -> Result<(), ApiError>;

    // --- related images ---

    async fn list_related_images(
        &self,
        kind: ProjectKind,
        entity_id: Id,
    ) -> Result<Vec<RelatedImage>, ApiError>;

    /// Attaches images already present in storage, by hash, in one call.
    async fn add_related_images(
        &self,
        kind: ProjectKind,
        images: &[NewRelatedImage],
    ) -> Result<(), ApiError>;

    async fn download_related_image(
        &self,
        kind: ProjectKind,
        image_id: Id,
        path: &Path,
    ) -> Result<(), ApiError>;

    async fn upload_related_image(
        &self,
        kind: ProjectKind,
        entity_id: Id,
        name: &str,
        path: &Path,
        meta: serde_json::Value,
    ) -> Result<(), ApiError>;

    // --- team membership ---

    async fn list_team_members(&self, team_id: Id) -> Result<Vec<UserInfo>, ApiError>;

    async fn find_user_by_login(&self, login: &str) -> Result<Option<UserInfo>, ApiError>;

    async fn create_user(&self, user: NewUser) -> Result<UserInfo, ApiError>;

    async fn list_roles(&self) -> Result<Vec<RoleInfo>, ApiError>;

    async fn change_team_role(&self, user_id: Id, team_id: Id, role_id: Id)
        -> Result<(), ApiError>;

    async fn add_to_team_by_login(
        &self,
        login: &str,
        team_id: Id,
        role_id: Id,
    ) -> Result<(), ApiError>;
}
