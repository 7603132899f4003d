//! HTTP client for a data-management instance: implements the engine's
//! capability interface over the instance's public JSON API.
//!
//! # Instance client (CLI <-> Core)
//!
//! Bridges [`instance_sync_core::contract::InstanceApi`] to a live instance.
//! Every operation is a `POST {server}/public/api/v3/{method}` with a JSON
//! body and the API token in the `x-api-key` header.
//!
//! - Lookups answer `Ok(None)` on `404`.
//! - `400`, `409` and `422` are reported as [`ApiError::Rejected`] so the
//!   engine falls through to its next transfer tier.
//! - Byte downloads are written to a hidden `.part` file next to the target
//!   and renamed once complete; a body cut short is [`ApiError::EndOfStream`].
//! - File uploads go to storage by content hash (SHA-256) first and are then
//!   attached by hash, so a file already stored is never sent twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use instance_sync_core::contract::InstanceApi;
use instance_sync_core::error::ApiError;
use instance_sync_core::model::{
    AnnotationScope, DatasetInfo, EntityInfo, HashUpload, Id, LinkUpload, NewDataset, NewFigure,
    NewObject, NewProject, NewRelatedImage, NewUser, PathUpload, ProjectInfo, ProjectKind,
    RelatedImage, RoleInfo, TagValue, TeamInfo, UserInfo, WorkspaceInfo,
};

const API_PREFIX: &str = "public/api/v3/";
const PAGE_SIZE: usize = 500;

/// Authenticated handle to one instance.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    entities: Vec<T>,
    #[serde(default)]
    pages_count: usize,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: Id,
}

#[derive(Debug, Deserialize)]
struct AnnotationRecord {
    entity_id: Id,
    annotation: Value,
}

/// Route prefix of the entity endpoints for a project kind. Episode frames
/// are point clouds and share their routes.
fn entity_route(kind: ProjectKind) -> &'static str {
    match kind {
        ProjectKind::Images => "images",
        ProjectKind::Videos => "videos",
        ProjectKind::Volumes => "volumes",
        ProjectKind::PointClouds | ProjectKind::PointCloudEpisodes => "point-clouds",
    }
}

/// Lowercase hex SHA-256 of `bytes`, the storage content address.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn transport(method: &str, e: reqwest::Error) -> ApiError {
    if e.is_body() || e.is_decode() {
        ApiError::EndOfStream {
            method: method.to_string(),
        }
    } else {
        ApiError::Transport {
            method: method.to_string(),
            message: e.to_string(),
        }
    }
}

/// Hidden download target next to the final path. Removed on drop unless
/// committed, so an aborted or cancelled download leaves nothing behind.
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn next_to(target: &Path) -> Self {
        Self {
            path: target.with_file_name(format!(".{}.part", uuid::Uuid::new_v4())),
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn commit(mut self, target: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, target).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(error = ?e, path = %self.path.display(), "Failed to remove partial download")
            }
        }
    }
}

fn created_ids(method: &str, created: Vec<Created>, expected: usize) -> Result<Vec<Id>, ApiError> {
    if created.len() != expected {
        return Err(ApiError::Decode {
            method: method.to_string(),
            message: format!("expected {expected} ids, got {}", created.len()),
        });
    }
    Ok(created.into_iter().map(|c| c.id).collect())
}

impl ApiClient {
    pub fn new(server: &str, token: &str) -> Result<Self, ApiError> {
        let mut base = Url::parse(server).map_err(|e| ApiError::Transport {
            method: "connect".to_string(),
            message: format!("invalid server address {server}: {e}"),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        info!(server = %base, token_set = !token.is_empty(), "Initialised instance client");
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: token.to_string(),
        })
    }

    pub fn server(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, method: &str) -> Result<Url, ApiError> {
        self.base
            .join(API_PREFIX)
            .and_then(|u| u.join(method))
            .map_err(|e| ApiError::Transport {
                method: method.to_string(),
                message: e.to_string(),
            })
    }

    async fn send(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        debug!(method, "Calling instance");
        let response = request
            .header("x-api-key", &self.token)
            .send()
            .await
            .map_err(|e| transport(method, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ApiError::NotFound {
                what: "resource",
                id: 0,
            },
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                ApiError::Rejected(format!("{method}: {body}"))
            }
            _ => ApiError::Status {
                method: method.to_string(),
                status: status.as_u16(),
                body,
            },
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, ApiError> {
        let url = self.endpoint(method)?;
        let response = self.send(method, self.http.post(url).json(&body)).await?;
        response.json::<T>().await.map_err(|e| ApiError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    async fn call_unit(&self, method: &str, body: Value) -> Result<(), ApiError> {
        let url = self.endpoint(method)?;
        self.send(method, self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
    ) -> Result<Option<T>, ApiError> {
        match self.call(method, body).await {
            Ok(found) => Ok(Some(found)),
            Err(ApiError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetches every page of a list endpoint.
    async fn list_all<T: DeserializeOwned>(
        &self,
        method: &str,
        filter: Value,
    ) -> Result<Vec<T>, ApiError> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let mut body = filter.clone();
            body["page"] = json!(page);
            body["per_page"] = json!(PAGE_SIZE);
            let batch: Page<T> = self.call(method, body).await?;
            let fetched = batch.entities.len();
            all.extend(batch.entities);
            if page >= batch.pages_count || fetched == 0 {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    /// Streams a binary response into `path`.
    async fn download_to(&self, method: &str, body: Value, path: &Path) -> Result<(), ApiError> {
        let url = self.endpoint(method)?;
        let response = self.send(method, self.http.post(url).json(&body)).await?;
        let expected = response.content_length();
        let bytes = response.bytes().await.map_err(|e| transport(method, e))?;
        if expected.is_some_and(|len| (bytes.len() as u64) < len) {
            return Err(ApiError::EndOfStream {
                method: method.to_string(),
            });
        }

        let partial = PartFile::next_to(path);
        tokio::fs::write(partial.path(), &bytes)
            .await
            .map_err(|e| ApiError::local_io(method, partial.path(), e))?;
        partial
            .commit(path)
            .await
            .map_err(|e| ApiError::local_io(method, path, e))?;
        debug!(method, path = %path.display(), size = bytes.len(), "Downloaded file");
        Ok(())
    }

    /// Uploads files to storage by hash, skipping content already stored, and
    /// returns the hashes in input order.
    async fn store_files(
        &self,
        kind: ProjectKind,
        paths: &[&Path],
    ) -> Result<Vec<String>, ApiError> {
        let method = format!("{}.bulk.upload", entity_route(kind));
        let mut contents = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| ApiError::local_io(&method, *path, e))?;
            contents.push((content_hash(&bytes), bytes));
        }

        let hashes: Vec<String> = contents.iter().map(|(h, _)| h.clone()).collect();
        let known = self.check_existing_hashes(&hashes).await?;
        let mut form = Form::new();
        let mut pending = 0;
        for (hash, bytes) in contents {
            if known.contains(&hash) {
                continue;
            }
            form = form.part(hash.clone(), Part::bytes(bytes).file_name(hash));
            pending += 1;
        }
        if pending > 0 {
            let url = self.endpoint(&method)?;
            self.send(&method, self.http.post(url).multipart(form)).await?;
            info!(
                %kind,
                uploaded = pending,
                reused = hashes.len() - pending,
                "Stored files by hash"
            );
        }
        Ok(hashes)
    }
}

#[async_trait]
impl InstanceApi for ApiClient {
    async fn get_team(&self, team_id: Id) -> Result<Option<TeamInfo>, ApiError> {
        self.call_optional("teams.info", json!({ "id": team_id })).await
    }

    async fn find_team_by_name(&self, name: &str) -> Result<Option<TeamInfo>, ApiError> {
        let teams: Vec<TeamInfo> = self.list_all("teams.list", json!({})).await?;
        Ok(teams.into_iter().find(|t| t.name == name))
    }

    async fn create_team(&self, name: &str, description: &str) -> Result<TeamInfo, ApiError> {
        self.call("teams.add", json!({ "name": name, "description": description }))
            .await
    }

    async fn list_workspaces(&self, team_id: Id) -> Result<Vec<WorkspaceInfo>, ApiError> {
        self.list_all("workspaces.list", json!({ "team_id": team_id }))
            .await
    }

    async fn find_workspace_by_name(
        &self,
        team_id: Id,
        name: &str,
    ) -> Result<Option<WorkspaceInfo>, ApiError> {
        let workspaces = self.list_workspaces(team_id).await?;
        Ok(workspaces.into_iter().find(|w| w.name == name))
    }

    async fn create_workspace(
        &self,
        team_id: Id,
        name: &str,
        description: &str,
    ) -> Result<WorkspaceInfo, ApiError> {
        self.call(
            "workspaces.add",
            json!({ "team_id": team_id, "name": name, "description": description }),
        )
        .await
    }

    async fn list_projects(&self, workspace_id: Id) -> Result<Vec<ProjectInfo>, ApiError> {
        self.list_all("projects.list", json!({ "workspace_id": workspace_id }))
            .await
    }

    async fn get_project(&self, project_id: Id) -> Result<Option<ProjectInfo>, ApiError> {
        self.call_optional("projects.info", json!({ "id": project_id }))
            .await
    }

    async fn find_project_by_name(
        &self,
        workspace_id: Id,
        name: &str,
    ) -> Result<Option<ProjectInfo>, ApiError> {
        let projects = self.list_projects(workspace_id).await?;
        Ok(projects.into_iter().find(|p| p.name == name))
    }

    async fn create_project(
        &self,
        workspace_id: Id,
        project: NewProject,
    ) -> Result<ProjectInfo, ApiError> {
        self.call(
            "projects.add",
            json!({
                "workspace_id": workspace_id,
                "name": project.name,
                "description": project.description,
                "kind": project.kind,
            }),
        )
        .await
    }

    async fn remove_project(&self, project_id: Id) -> Result<(), ApiError> {
        info!(project_id, "Removing destination project");
        self.call_unit("projects.remove", json!({ "id": project_id }))
            .await
    }

    async fn get_project_meta(&self, project_id: Id) -> Result<Value, ApiError> {
        self.call("projects.meta", json!({ "id": project_id })).await
    }

    async fn update_project_meta(&self, project_id: Id, meta: Value) -> Result<(), ApiError> {
        self.call_unit("projects.meta.update", json!({ "id": project_id, "meta": meta }))
            .await
    }

    async fn list_datasets(&self, project_id: Id) -> Result<Vec<DatasetInfo>, ApiError> {
        let mut datasets: Vec<DatasetInfo> = self
            .list_all(
                "datasets.list",
                json!({ "project_id": project_id, "recursive": true }),
            )
            .await?;
        order_parents_first(&mut datasets);
        Ok(datasets)
    }

    async fn find_dataset_by_name(
        &self,
        project_id: Id,
        name: &str,
        parent_id: Option<Id>,
    ) -> Result<Option<DatasetInfo>, ApiError> {
        let datasets = self.list_datasets(project_id).await?;
        Ok(datasets
            .into_iter()
            .find(|d| d.name == name && d.parent_id == parent_id))
    }

    async fn create_dataset(
        &self,
        project_id: Id,
        dataset: NewDataset,
    ) -> Result<DatasetInfo, ApiError> {
        self.call(
            "datasets.add",
            json!({
                "project_id": project_id,
                "name": dataset.name,
                "description": dataset.description,
                "parent_id": dataset.parent_id,
            }),
        )
        .await
    }

    async fn list_entities(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
    ) -> Result<Vec<EntityInfo>, ApiError> {
        self.list_all(
            &format!("{}.list", entity_route(kind)),
            json!({ "dataset_id": dataset_id }),
        )
        .await
    }

    async fn remove_entities(&self, kind: ProjectKind, ids: &[Id]) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.call_unit(
            &format!("{}.bulk.remove", entity_route(kind)),
            json!({ "ids": ids }),
        )
        .await
    }

    async fn upload_links(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[LinkUpload],
    ) -> Result<Vec<EntityInfo>, ApiError> {
        let items: Vec<Value> = items
            .iter()
            .map(|i| json!({ "name": i.name, "link": i.link, "meta": i.meta }))
            .collect();
        self.call(
            &format!("{}.bulk.add", entity_route(kind)),
            json!({ "dataset_id": dataset_id, "items": items }),
        )
        .await
    }

    async fn check_existing_hashes(&self, hashes: &[String]) -> Result<Vec<String>, ApiError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        self.call("storage.hashes.check", json!({ "hashes": hashes }))
            .await
    }

    async fn upload_hashes(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[HashUpload],
    ) -> Result<Vec<EntityInfo>, ApiError> {
        let items: Vec<Value> = items
            .iter()
            .map(|i| json!({ "name": i.name, "hash": i.hash, "meta": i.meta }))
            .collect();
        self.call(
            &format!("{}.bulk.add", entity_route(kind)),
            json!({ "dataset_id": dataset_id, "items": items }),
        )
        .await
    }

    async fn upload_paths(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[PathUpload],
    ) -> Result<Vec<EntityInfo>, ApiError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let paths: Vec<&Path> = items.iter().map(|i| i.path.as_path()).collect();
        let hashes = self.store_files(kind, &paths).await?;
        let by_hash: Vec<HashUpload> = items
            .iter()
            .zip(hashes)
            .map(|(item, hash)| HashUpload {
                name: item.name.clone(),
                hash,
                meta: item.meta.clone(),
            })
            .collect();
        self.upload_hashes(kind, dataset_id, &by_hash).await
    }

    async fn download_path(&self, kind: ProjectKind, id: Id, path: &Path) -> Result<(), ApiError> {
        self.download_to(
            &format!("{}.download", entity_route(kind)),
            json!({ "id": id }),
            path,
        )
        .await
    }

    async fn download_paths(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        ids: &[Id],
        paths: &[PathBuf],
    ) -> Result<(), ApiError> {
        debug!(%kind, dataset_id, count = ids.len(), "Downloading batch sequentially");
        for (id, path) in ids.iter().zip(paths) {
            self.download_path(kind, *id, path).await?;
        }
        Ok(())
    }

    async fn download_annotations(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        ids: &[Id],
    ) -> Result<Vec<Value>, ApiError> {
        let method = format!("{}.annotations.bulk.info", entity_route(kind));
        let records: Vec<AnnotationRecord> = self
            .call(&method, json!({ "dataset_id": dataset_id, "ids": ids }))
            .await?;
        let mut by_id: HashMap<Id, Value> = records
            .into_iter()
            .map(|r| (r.entity_id, r.annotation))
            .collect();
        ids.iter()
            .map(|id| {
                by_id.remove(id).ok_or_else(|| ApiError::Decode {
                    method: method.clone(),
                    message: format!("no annotation returned for entity {id}"),
                })
            })
            .collect()
    }

    async fn upload_annotations(
        &self,
        kind: ProjectKind,
        ids: &[Id],
        annotations: &[Value],
    ) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.call_unit(
            &format!("{}.annotations.bulk.add", entity_route(kind)),
            json!({ "ids": ids, "annotations": annotations }),
        )
        .await
    }

    async fn download_annotation(
        &self,
        kind: ProjectKind,
        entity_id: Id,
    ) -> Result<Value, ApiError> {
        self.call(
            &format!("{}.annotations.info", entity_route(kind)),
            json!({ "entity_id": entity_id }),
        )
        .await
    }

    async fn download_dataset_annotation(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
    ) -> Result<Value, ApiError> {
        self.call(
            &format!("{}.episodes.annotations.info", entity_route(kind)),
            json!({ "dataset_id": dataset_id }),
        )
        .await
    }

    async fn add_objects(
        &self,
        kind: ProjectKind,
        scope: AnnotationScope,
        objects: &[NewObject],
    ) -> Result<Vec<Id>, ApiError> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        let method = format!("{}.objects.bulk.add", entity_route(kind));
        let count = objects.len();
        let objects: Vec<Value> = objects
            .iter()
            .map(|o| json!({ "class_title": o.class_title, "tags": o.tags }))
            .collect();
        let mut body = json!({ "objects": objects });
        match scope {
            AnnotationScope::Entity(id) => body["entity_id"] = json!(id),
            AnnotationScope::Dataset(id) => body["dataset_id"] = json!(id),
        }
        let created: Vec<Created> = self.call(&method, body).await?;
        created_ids(&method, created, count)
    }

    async fn add_figures(
        &self,
        kind: ProjectKind,
        entity_id: Id,
        figures: &[NewFigure],
    ) -> Result<Vec<Id>, ApiError> {
        if figures.is_empty() {
            return Ok(Vec::new());
        }
        let method = format!("{}.figures.bulk.add", entity_route(kind));
        let count = figures.len();
        let figures: Vec<Value> = figures
            .iter()
            .map(|f| {
                json!({
                    "object_id": f.object_id,
                    "geometry_type": f.geometry_type,
                    "geometry": f.geometry,
                    "frame_index": f.frame_index,
                    "plane": f.plane,
                })
            })
            .collect();
        let created: Vec<Created> = self
            .call(&method, json!({ "entity_id": entity_id, "figures": figures }))
            .await?;
        created_ids(&method, created, count)
    }

    async fn add_entity_tags(
        &self,
        kind: ProjectKind,
        entity_id: Id,
        tags: &[TagValue],
    ) -> Result<Vec<Id>, ApiError> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let method = format!("{}.tags.bulk.add", entity_route(kind));
        let created: Vec<Created> = self
            .call(&method, json!({ "entity_id": entity_id, "tags": tags }))
            .await?;
        created_ids(&method, created, tags.len())
    }

    async fn download_spatial_geometry(&self, figure_id: Id, path: &Path) -> Result<(), ApiError> {
        self.download_to(
            "volumes.figures.geometry.download",
            json!({ "figure_id": figure_id }),
            path,
        )
        .await
    }

    async fn upload_spatial_geometry(
        &self,
        figure_id: Id,
        geometry: Vec<u8>,
    ) -> Result<(), ApiError> {
        let method = "volumes.figures.geometry.upload";
        let url = self.endpoint(method)?;
        let form = Form::new()
            .text("figure_id", figure_id.to_string())
            .part("geometry", Part::bytes(geometry).file_name(format!("{figure_id}.nrrd")));
        self.send(method, self.http.post(url).multipart(form)).await?;
        Ok(())
    }

    async fn list_related_images(
        &self,
        kind: ProjectKind,
        entity_id: Id,
    ) -> Result<Vec<RelatedImage>, ApiError> {
        self.call(
            &format!("{}.images.list", entity_route(kind)),
            json!({ "entity_id": entity_id }),
        )
        .await
    }

    async fn add_related_images(
        &self,
        kind: ProjectKind,
        images: &[NewRelatedImage],
    ) -> Result<(), ApiError> {
        if images.is_empty() {
            return Ok(());
        }
        let images: Vec<Value> = images
            .iter()
            .map(|i| {
                json!({
                    "entity_id": i.entity_id,
                    "name": i.name,
                    "hash": i.hash,
                    "meta": i.meta,
                })
            })
            .collect();
        self.call_unit(
            &format!("{}.images.add", entity_route(kind)),
            json!({ "images": images }),
        )
        .await
    }

    async fn download_related_image(
        &self,
        kind: ProjectKind,
        image_id: Id,
        path: &Path,
    ) -> Result<(), ApiError> {
        self.download_to(
            &format!("{}.images.download", entity_route(kind)),
            json!({ "id": image_id }),
            path,
        )
        .await
    }

    async fn upload_related_image(
        &self,
        kind: ProjectKind,
        entity_id: Id,
        name: &str,
        path: &Path,
        meta: Value,
    ) -> Result<(), ApiError> {
        let hashes = self.store_files(ProjectKind::Images, &[path]).await?;
        let hash = hashes.into_iter().next().ok_or_else(|| ApiError::Decode {
            method: "images.bulk.upload".to_string(),
            message: "no hash returned for related image".to_string(),
        })?;
        self.add_related_images(
            kind,
            &[NewRelatedImage {
                entity_id,
                name: name.to_string(),
                hash,
                meta,
            }],
        )
        .await
    }

    async fn list_team_members(&self, team_id: Id) -> Result<Vec<UserInfo>, ApiError> {
        self.list_all("members.list", json!({ "team_id": team_id }))
            .await
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<UserInfo>, ApiError> {
        self.call_optional("users.info.by_login", json!({ "login": login }))
            .await
    }

    async fn create_user(&self, user: NewUser) -> Result<UserInfo, ApiError> {
        info!(login = %user.login, "Creating user");
        self.call(
            "users.add",
            json!({
                "login": user.login,
                "password": user.password,
                "name": user.name,
                "email": user.email,
            }),
        )
        .await
    }

    async fn list_roles(&self) -> Result<Vec<RoleInfo>, ApiError> {
        self.list_all("roles.list", json!({})).await
    }

    async fn change_team_role(
        &self,
        user_id: Id,
        team_id: Id,
        role_id: Id,
    ) -> Result<(), ApiError> {
        self.call_unit(
            "members.role.change",
            json!({ "user_id": user_id, "team_id": team_id, "role_id": role_id }),
        )
        .await
    }

    async fn add_to_team_by_login(
        &self,
        login: &str,
        team_id: Id,
        role_id: Id,
    ) -> Result<(), ApiError> {
        self.call_unit(
            "members.add.by_login",
            json!({ "login": login, "team_id": team_id, "role_id": role_id }),
        )
        .await
    }
}

/// Reorders datasets so every parent precedes its children. Datasets whose
/// parent is not in the list keep their relative order at the end.
fn order_parents_first(datasets: &mut Vec<DatasetInfo>) {
    let mut ordered: Vec<DatasetInfo> = Vec::with_capacity(datasets.len());
    let mut pending: Vec<DatasetInfo> = std::mem::take(datasets);
    loop {
        let before = pending.len();
        let (ready, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|d| {
            d.parent_id
                .map_or(true, |p| ordered.iter().any(|o| o.id == p))
        });
        ordered.extend(ready);
        pending = rest;
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }
    ordered.extend(pending);
    *datasets = ordered;
}
