//! In-memory instance used by the integration tests.
//!
//! Every call is logged by method name so tests can count writes, downloads
//! and their relative order.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use instance_sync_core::contract::InstanceApi;
use instance_sync_core::error::ApiError;
use instance_sync_core::model::{
    AnnotationScope, DatasetInfo, EntityInfo, HashUpload, Id, LinkUpload, NewDataset, NewFigure,
    NewObject, NewProject, NewRelatedImage, NewUser, PathUpload, ProjectInfo, ProjectKind,
    RelatedImage, RoleInfo, TagValue, TeamInfo, UserInfo, WorkspaceInfo,
};
use instance_sync_core::progress::{ProgressLevel, ProgressSink};

/// Methods that change destination state.
pub const WRITE_METHODS: &[&str] = &[
    "create_team",
    "create_workspace",
    "create_project",
    "remove_project",
    "update_project_meta",
    "create_dataset",
    "remove_entities",
    "upload_links",
    "upload_hashes",
    "upload_paths",
    "upload_annotations",
    "add_objects",
    "add_figures",
    "add_entity_tags",
    "upload_spatial_geometry",
    "add_related_images",
    "upload_related_image",
    "create_user",
    "change_team_role",
    "add_to_team_by_login",
];

pub const SOURCE_EPOCH: i64 = 1_600_000_000;
pub const DESTINATION_EPOCH: i64 = 1_700_000_000;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn schema_json() -> Value {
    json!({
        "classes": [{"title": "car"}, {"title": "person"}, {"title": "tumor"}],
        "tags": [{"name": "weather"}, {"name": "occluded"}]
    })
}

#[derive(Debug, Clone)]
pub struct StoredEntity {
    pub kind: ProjectKind,
    pub info: EntityInfo,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct StoredRelated {
    pub entity_id: Id,
    pub image: RelatedImage,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct StoredFigure {
    pub id: Id,
    pub entity_id: Id,
    pub figure: NewFigure,
}

#[derive(Debug, Default)]
struct State {
    next_id: Id,
    clock: i64,
    log: Vec<String>,
    uploaded_items: usize,

    teams: Vec<TeamInfo>,
    workspaces: Vec<WorkspaceInfo>,
    projects: Vec<ProjectInfo>,
    project_meta: HashMap<Id, Value>,
    datasets: Vec<DatasetInfo>,
    entities: Vec<StoredEntity>,
    known_hashes: HashSet<String>,
    annotations: HashMap<Id, Value>,
    dataset_annotations: HashMap<Id, Value>,
    objects: Vec<(Id, AnnotationScope, NewObject)>,
    figures: Vec<StoredFigure>,
    entity_tags: Vec<(Id, TagValue)>,
    spatial: HashMap<Id, Vec<u8>>,
    related: Vec<StoredRelated>,
    users: Vec<UserInfo>,
    memberships: Vec<(Id, Id, String)>,
    roles: Vec<RoleInfo>,
}

/// In-memory [`InstanceApi`].
#[derive(Debug)]
pub struct FakeInstance {
    state: Mutex<State>,
    /// Whether link uploads come back with width and height.
    link_dimensions: bool,
    /// Fail every single-item download, as a broken concurrent path would.
    fail_single_downloads: bool,
}

impl FakeInstance {
    pub fn new(epoch: i64) -> Self {
        let state = State {
            next_id: 1,
            clock: epoch,
            roles: ["admin", "developer", "manager", "reviewer", "annotator", "viewer"]
                .iter()
                .enumerate()
                .map(|(i, role)| RoleInfo {
                    id: i as Id + 1,
                    role: role.to_string(),
                })
                .collect(),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
            link_dimensions: true,
            fail_single_downloads: false,
        }
    }

    pub fn source() -> Self {
        Self::new(SOURCE_EPOCH)
    }

    pub fn destination() -> Self {
        Self::new(DESTINATION_EPOCH)
    }

    pub fn without_link_dimensions(mut self) -> Self {
        self.link_dimensions = false;
        self
    }

    pub fn failing_single_downloads(mut self) -> Self {
        self.fail_single_downloads = true;
        self
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn record(&self, method: &str) {
        self.with_state(|s| s.log.push(method.to_string()));
    }

    // --- seeding ---

    pub fn add_team(&self, name: &str) -> TeamInfo {
        self.with_state(|s| {
            let team = TeamInfo {
                id: s.alloc(),
                name: name.to_string(),
                description: String::new(),
            };
            s.teams.push(team.clone());
            team
        })
    }

    pub fn add_workspace(&self, team_id: Id, name: &str) -> WorkspaceInfo {
        self.with_state(|s| s.insert_workspace(team_id, name, ""))
    }

    pub fn add_project(&self, workspace_id: Id, name: &str, kind: ProjectKind) -> ProjectInfo {
        self.with_state(|s| {
            let project = s.insert_project(
                workspace_id,
                NewProject {
                    name: name.to_string(),
                    description: String::new(),
                    kind,
                },
            );
            s.project_meta.insert(project.id, schema_json());
            project
        })
    }

    pub fn add_dataset(&self, project_id: Id, name: &str, parent_id: Option<Id>) -> DatasetInfo {
        self.with_state(|s| {
            s.insert_dataset(
                project_id,
                NewDataset {
                    name: name.to_string(),
                    description: String::new(),
                    parent_id,
                },
            )
        })
    }

    /// Seeds an entity whose bytes are its name.
    pub fn add_entity(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        name: &str,
        updated_at: i64,
    ) -> EntityInfo {
        self.add_entity_with(kind, dataset_id, name, updated_at, None, None, Value::Null)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_entity_with(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        name: &str,
        updated_at: i64,
        hash: Option<&str>,
        link: Option<&str>,
        meta: Value,
    ) -> EntityInfo {
        self.with_state(|s| {
            let info = EntityInfo {
                id: s.alloc(),
                dataset_id,
                name: name.to_string(),
                updated_at: ts(updated_at),
                hash: hash.map(str::to_string),
                link: link.map(str::to_string),
                meta,
                width: Some(640),
                height: Some(480),
            };
            if let Some(hash) = hash {
                s.known_hashes.insert(hash.to_string());
            }
            s.entities.push(StoredEntity {
                kind,
                info: info.clone(),
                bytes: name.as_bytes().to_vec(),
            });
            info
        })
    }

    pub fn set_annotation(&self, entity_id: Id, annotation: Value) {
        self.with_state(|s| {
            s.annotations.insert(entity_id, annotation);
        });
    }

    pub fn set_dataset_annotation(&self, dataset_id: Id, annotation: Value) {
        self.with_state(|s| {
            s.dataset_annotations.insert(dataset_id, annotation);
        });
    }

    pub fn set_spatial_geometry(&self, figure_id: Id, bytes: &[u8]) {
        self.with_state(|s| {
            s.spatial.insert(figure_id, bytes.to_vec());
        });
    }

    pub fn add_known_hash(&self, hash: &str) {
        self.with_state(|s| {
            s.known_hashes.insert(hash.to_string());
        });
    }

    pub fn add_related(&self, entity_id: Id, name: &str, hash: Option<&str>) -> RelatedImage {
        self.with_state(|s| {
            let image = RelatedImage {
                id: s.alloc(),
                name: name.to_string(),
                hash: hash.map(str::to_string),
                meta: json!({"sensor": name}),
            };
            s.related.push(StoredRelated {
                entity_id,
                image: image.clone(),
                bytes: name.as_bytes().to_vec(),
            });
            image
        })
    }

    pub fn add_user(&self, login: &str, disabled: bool) -> UserInfo {
        self.with_state(|s| {
            let user = UserInfo {
                id: s.alloc(),
                login: login.to_string(),
                name: Some(login.to_uppercase()),
                email: Some(format!("{login}@example.com")),
                role: String::new(),
                disabled,
            };
            s.users.push(user.clone());
            user
        })
    }

    pub fn add_member(&self, team_id: Id, login: &str, role: &str, disabled: bool) -> UserInfo {
        let user = self.add_user(login, disabled);
        self.with_state(|s| s.memberships.push((team_id, user.id, role.to_string())));
        user
    }

    // --- inspection ---

    pub fn calls(&self, method: &str) -> usize {
        self.with_state(|s| s.log.iter().filter(|m| *m == method).count())
    }

    pub fn log(&self) -> Vec<String> {
        self.with_state(|s| s.log.clone())
    }

    pub fn writes(&self) -> usize {
        self.with_state(|s| {
            s.log
                .iter()
                .filter(|m| WRITE_METHODS.contains(&m.as_str()))
                .count()
        })
    }

    /// Number of entities created from local files.
    pub fn uploaded_items(&self) -> usize {
        self.with_state(|s| s.uploaded_items)
    }

    pub fn team_named(&self, name: &str) -> Option<TeamInfo> {
        self.with_state(|s| s.teams.iter().find(|t| t.name == name).cloned())
    }

    pub fn workspaces_of(&self, team_id: Id) -> Vec<WorkspaceInfo> {
        self.with_state(|s| {
            s.workspaces
                .iter()
                .filter(|w| w.team_id == team_id)
                .cloned()
                .collect()
        })
    }

    pub fn projects_of(&self, workspace_id: Id) -> Vec<ProjectInfo> {
        self.with_state(|s| {
            s.projects
                .iter()
                .filter(|p| p.workspace_id == workspace_id)
                .cloned()
                .collect()
        })
    }

    pub fn datasets_of(&self, project_id: Id) -> Vec<DatasetInfo> {
        self.with_state(|s| {
            s.datasets
                .iter()
                .filter(|d| d.project_id == project_id)
                .cloned()
                .collect()
        })
    }

    pub fn entities_of(&self, dataset_id: Id) -> Vec<StoredEntity> {
        self.with_state(|s| {
            s.entities
                .iter()
                .filter(|e| e.info.dataset_id == dataset_id)
                .cloned()
                .collect()
        })
    }

    pub fn annotation_of(&self, entity_id: Id) -> Option<Value> {
        self.with_state(|s| s.annotations.get(&entity_id).cloned())
    }

    pub fn figures_on(&self, entity_id: Id) -> Vec<StoredFigure> {
        self.with_state(|s| {
            s.figures
                .iter()
                .filter(|f| f.entity_id == entity_id)
                .cloned()
                .collect()
        })
    }

    pub fn objects(&self) -> Vec<(Id, AnnotationScope, NewObject)> {
        self.with_state(|s| s.objects.clone())
    }

    pub fn spatial_of(&self, figure_id: Id) -> Option<Vec<u8>> {
        self.with_state(|s| s.spatial.get(&figure_id).cloned())
    }

    pub fn related_of(&self, entity_id: Id) -> Vec<StoredRelated> {
        self.with_state(|s| {
            s.related
                .iter()
                .filter(|r| r.entity_id == entity_id)
                .cloned()
                .collect()
        })
    }

    pub fn user(&self, login: &str) -> Option<UserInfo> {
        self.with_state(|s| s.users.iter().find(|u| u.login == login).cloned())
    }

    pub fn role_in(&self, team_id: Id, login: &str) -> Option<String> {
        self.with_state(|s| {
            let user = s.users.iter().find(|u| u.login == login)?;
            s.memberships
                .iter()
                .find(|(t, u, _)| *t == team_id && *u == user.id)
                .map(|(_, _, role)| role.clone())
        })
    }
}

impl State {
    fn alloc(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn now(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        ts(self.clock)
    }

    fn insert_workspace(&mut self, team_id: Id, name: &str, description: &str) -> WorkspaceInfo {
        let ws = WorkspaceInfo {
            id: self.alloc(),
            team_id,
            name: name.to_string(),
            description: description.to_string(),
        };
        self.workspaces.push(ws.clone());
        ws
    }

    fn insert_project(&mut self, workspace_id: Id, project: NewProject) -> ProjectInfo {
        let info = ProjectInfo {
            id: self.alloc(),
            workspace_id,
            name: project.name,
            description: project.description,
            kind: project.kind,
        };
        self.projects.push(info.clone());
        info
    }

    fn insert_dataset(&mut self, project_id: Id, dataset: NewDataset) -> DatasetInfo {
        let info = DatasetInfo {
            id: self.alloc(),
            project_id,
            parent_id: dataset.parent_id,
            name: dataset.name,
            description: dataset.description,
        };
        self.datasets.push(info.clone());
        info
    }

    fn insert_entity(
        &mut self,
        kind: ProjectKind,
        dataset_id: Id,
        name: &str,
        meta: Value,
        bytes: Vec<u8>,
        hash: Option<String>,
        link: Option<String>,
        dimensions: bool,
    ) -> EntityInfo {
        let dims = if dimensions && kind == ProjectKind::Images {
            (Some(640), Some(480))
        } else {
            (None, None)
        };
        let info = EntityInfo {
            id: self.alloc(),
            dataset_id,
            name: name.to_string(),
            updated_at: self.now(),
            hash,
            link,
            meta,
            width: dims.0,
            height: dims.1,
        };
        self.entities.push(StoredEntity {
            kind,
            info: info.clone(),
            bytes,
        });
        info
    }

    fn entity(&self, id: Id) -> Result<&StoredEntity, ApiError> {
        self.entities
            .iter()
            .find(|e| e.info.id == id)
            .ok_or(ApiError::NotFound { what: "entity", id })
    }
}

fn write_file(path: &Path, bytes: &[u8], method: &str) -> Result<(), ApiError> {
    std::fs::write(path, bytes).map_err(|e| ApiError::local_io(method, path, e))
}

fn read_file(path: &Path, method: &str) -> Result<Vec<u8>, ApiError> {
    std::fs::read(path).map_err(|e| ApiError::local_io(method, path, e))
}

#[async_trait]
impl InstanceApi for FakeInstance {
    async fn get_team(&self, team_id: Id) -> Result<Option<TeamInfo>, ApiError> {
        self.record("get_team");
        Ok(self.with_state(|s| s.teams.iter().find(|t| t.id == team_id).cloned()))
    }

    async fn find_team_by_name(&self, name: &str) -> Result<Option<TeamInfo>, ApiError> {
        self.record("find_team_by_name");
        Ok(self.team_named(name))
    }

    async fn create_team(&self, name: &str, description: &str) -> Result<TeamInfo, ApiError> {
        self.record("create_team");
        Ok(self.with_state(|s| {
            let team = TeamInfo {
                id: s.alloc(),
                name: name.to_string(),
                description: description.to_string(),
            };
            s.teams.push(team.clone());
            team
        }))
    }

    async fn list_workspaces(&self, team_id: Id) -> Result<Vec<WorkspaceInfo>, ApiError> {
        self.record("list_workspaces");
        Ok(self.workspaces_of(team_id))
    }

    async fn find_workspace_by_name(
        &self,
        team_id: Id,
        name: &str,
    ) -> Result<Option<WorkspaceInfo>, ApiError> {
        self.record("find_workspace_by_name");
        Ok(self
            .workspaces_of(team_id)
            .into_iter()
            .find(|w| w.name == name))
    }

    async fn create_workspace(
        &self,
        team_id: Id,
        name: &str,
        description: &str,
    ) -> Result<WorkspaceInfo, ApiError> {
        self.record("create_workspace");
        Ok(self.with_state(|s| s.insert_workspace(team_id, name, description)))
    }

    async fn list_projects(&self, workspace_id: Id) -> Result<Vec<ProjectInfo>, ApiError> {
        self.record("list_projects");
        Ok(self.projects_of(workspace_id))
    }

    async fn get_project(&self, project_id: Id) -> Result<Option<ProjectInfo>, ApiError> {
        self.record("get_project");
        Ok(self.with_state(|s| s.projects.iter().find(|p| p.id == project_id).cloned()))
    }

    async fn find_project_by_name(
        &self,
        workspace_id: Id,
        name: &str,
    ) -> Result<Option<ProjectInfo>, ApiError> {
        self.record("find_project_by_name");
        Ok(self
            .projects_of(workspace_id)
            .into_iter()
            .find(|p| p.name == name))
    }

    async fn create_project(
        &self,
        workspace_id: Id,
        project: NewProject,
    ) -> Result<ProjectInfo, ApiError> {
        self.record("create_project");
        Ok(self.with_state(|s| s.insert_project(workspace_id, project)))
    }

    async fn remove_project(&self, project_id: Id) -> Result<(), ApiError> {
        self.record("remove_project");
        self.with_state(|s| {
            let datasets: HashSet<Id> = s
                .datasets
                .iter()
                .filter(|d| d.project_id == project_id)
                .map(|d| d.id)
                .collect();
            s.entities.retain(|e| !datasets.contains(&e.info.dataset_id));
            s.datasets.retain(|d| d.project_id != project_id);
            s.projects.retain(|p| p.id != project_id);
            s.project_meta.remove(&project_id);
        });
        Ok(())
    }

    async fn get_project_meta(&self, project_id: Id) -> Result<Value, ApiError> {
        self.record("get_project_meta");
        Ok(self.with_state(|s| {
            s.project_meta
                .get(&project_id)
                .cloned()
                .unwrap_or_else(|| json!({"classes": [], "tags": []}))
        }))
    }

    async fn update_project_meta(&self, project_id: Id, meta: Value) -> Result<(), ApiError> {
        self.record("update_project_meta");
        self.with_state(|s| {
            s.project_meta.insert(project_id, meta);
        });
        Ok(())
    }

    async fn list_datasets(&self, project_id: Id) -> Result<Vec<DatasetInfo>, ApiError> {
        self.record("list_datasets");
        Ok(self.datasets_of(project_id))
    }

    async fn find_dataset_by_name(
        &self,
        project_id: Id,
        name: &str,
        parent_id: Option<Id>,
    ) -> Result<Option<DatasetInfo>, ApiError> {
        self.record("find_dataset_by_name");
        Ok(self
            .datasets_of(project_id)
            .into_iter()
            .find(|d| d.name == name && d.parent_id == parent_id))
    }

    async fn create_dataset(
        &self,
        project_id: Id,
        dataset: NewDataset,
    ) -> Result<DatasetInfo, ApiError> {
        self.record("create_dataset");
        Ok(self.with_state(|s| s.insert_dataset(project_id, dataset)))
    }

    async fn list_entities(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
    ) -> Result<Vec<EntityInfo>, ApiError> {
        self.record("list_entities");
        Ok(self
            .entities_of(dataset_id)
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.info)
            .collect())
    }

    async fn remove_entities(&self, _kind: ProjectKind, ids: &[Id]) -> Result<(), ApiError> {
        self.record("remove_entities");
        self.with_state(|s| s.entities.retain(|e| !ids.contains(&e.info.id)));
        Ok(())
    }

    async fn upload_links(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[LinkUpload],
    ) -> Result<Vec<EntityInfo>, ApiError> {
        self.record("upload_links");
        let dimensions = self.link_dimensions;
        Ok(self.with_state(|s| {
            items
                .iter()
                .map(|item| {
                    s.insert_entity(
                        kind,
                        dataset_id,
                        &item.name,
                        item.meta.clone(),
                        Vec::new(),
                        None,
                        Some(item.link.clone()),
                        dimensions,
                    )
                })
                .collect()
        }))
    }

    async fn check_existing_hashes(&self, hashes: &[String]) -> Result<Vec<String>, ApiError> {
        self.record("check_existing_hashes");
        Ok(self.with_state(|s| {
            hashes
                .iter()
                .filter(|h| s.known_hashes.contains(*h))
                .cloned()
                .collect()
        }))
    }

    async fn upload_hashes(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[HashUpload],
    ) -> Result<Vec<EntityInfo>, ApiError> {
        self.record("upload_hashes");
        self.with_state(|s| {
            if let Some(unknown) = items.iter().find(|i| !s.known_hashes.contains(&i.hash)) {
                return Err(ApiError::Rejected(format!("unknown hash {}", unknown.hash)));
            }
            Ok(items
                .iter()
                .map(|item| {
                    s.insert_entity(
                        kind,
                        dataset_id,
                        &item.name,
                        item.meta.clone(),
                        item.name.as_bytes().to_vec(),
                        Some(item.hash.clone()),
                        None,
                        true,
                    )
                })
                .collect())
        })
    }

    async fn upload_paths(
        &self,
        kind: ProjectKind,
        dataset_id: Id,
        items: &[PathUpload],
    ) -> Result<Vec<EntityInfo>, ApiError> {
        self.record("upload_paths");
        let mut files = Vec::with_capacity(items.len());
        for item in items {
            files.push(read_file(&item.path, "upload_paths")?);
        }
        Ok(self.with_state(|s| {
            s.uploaded_items += items.len();
            items
                .iter()
                .zip(files)
                .map(|(item, bytes)| {
                    s.insert_entity(
                        kind,
                        dataset_id,
                        &item.name,
                        item.meta.clone(),
                        bytes,
                        None,
                        None,
                        true,
                    )
                })
                .collect()
        }))
    }

    async fn download_path(&self, _kind: ProjectKind, id: Id, path: &Path) -> Result<(), ApiError> {
        self.record("download_path");
        if self.fail_single_downloads {
            return Err(ApiError::Transport {
                method: "download_path".into(),
                message: "concurrent download unavailable".into(),
            });
        }
        let bytes = self.with_state(|s| s.entity(id).map(|e| e.bytes.clone()))?;
        write_file(path, &bytes, "download_path")
    }

    async fn download_paths(
        &self,
        _kind: ProjectKind,
        _dataset_id: Id,
        ids: &[Id],
        paths: &[PathBuf],
    ) -> Result<(), ApiError> {
        self.record("download_paths");
        for (id, path) in ids.iter().zip(paths) {
            let bytes = self.with_state(|s| s.entity(*id).map(|e| e.bytes.clone()))?;
            write_file(path, &bytes, "download_paths")?;
        }
        Ok(())
    }

    async fn download_annotations(
        &self,
        _kind: ProjectKind,
        _dataset_id: Id,
        ids: &[Id],
    ) -> Result<Vec<Value>, ApiError> {
        self.record("download_annotations");
        Ok(self.with_state(|s| {
            ids.iter()
                .map(|id| {
                    s.annotations
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| json!({"objects": [], "tags": []}))
                })
                .collect()
        }))
    }

    async fn upload_annotations(
        &self,
        _kind: ProjectKind,
        ids: &[Id],
        annotations: &[Value],
    ) -> Result<(), ApiError> {
        self.record("upload_annotations");
        self.with_state(|s| {
            for (id, ann) in ids.iter().zip(annotations) {
                s.annotations.insert(*id, ann.clone());
            }
        });
        Ok(())
    }

    async fn download_annotation(
        &self,
        _kind: ProjectKind,
        entity_id: Id,
    ) -> Result<Value, ApiError> {
        self.record("download_annotation");
        Ok(self.with_state(|s| s.annotations.get(&entity_id).cloned().unwrap_or(json!({}))))
    }

    async fn download_dataset_annotation(
        &self,
        _kind: ProjectKind,
        dataset_id: Id,
    ) -> Result<Value, ApiError> {
        self.record("download_dataset_annotation");
        Ok(self.with_state(|s| {
            s.dataset_annotations
                .get(&dataset_id)
                .cloned()
                .unwrap_or(json!({}))
        }))
    }

    async fn add_objects(
        &self,
        _kind: ProjectKind,
        scope: AnnotationScope,
        objects: &[NewObject],
    ) -> Result<Vec<Id>, ApiError> {
        self.record("add_objects");
        Ok(self.with_state(|s| {
            objects
                .iter()
                .map(|obj| {
                    let id = s.alloc();
                    s.objects.push((id, scope, obj.clone()));
                    id
                })
                .collect()
        }))
    }

    async fn add_figures(
        &self,
        _kind: ProjectKind,
        entity_id: Id,
        figures: &[NewFigure],
    ) -> Result<Vec<Id>, ApiError> {
        self.record("add_figures");
        Ok(self.with_state(|s| {
            figures
                .iter()
                .map(|fig| {
                    let id = s.alloc();
                    s.figures.push(StoredFigure {
                        id,
                        entity_id,
                        figure: fig.clone(),
                    });
                    id
                })
                .collect()
        }))
    }

    async fn add_entity_tags(
        &self,
        _kind: ProjectKind,
        entity_id: Id,
        tags: &[TagValue],
    ) -> Result<Vec<Id>, ApiError> {
        self.record("add_entity_tags");
        Ok(self.with_state(|s| {
            tags.iter()
                .map(|tag| {
                    s.entity_tags.push((entity_id, tag.clone()));
                    s.alloc()
                })
                .collect()
        }))
    }

    async fn download_spatial_geometry(&self, figure_id: Id, path: &Path) -> Result<(), ApiError> {
        self.record("download_spatial_geometry");
        let bytes = self
            .spatial_of(figure_id)
            .ok_or(ApiError::NotFound {
                what: "figure",
                id: figure_id,
            })?;
        write_file(path, &bytes, "download_spatial_geometry")
    }

    async fn upload_spatial_geometry(
        &self,
        figure_id: Id,
        geometry: Vec<u8>,
    ) -> Result<(), ApiError> {
        self.record("upload_spatial_geometry");
        self.set_spatial_geometry(figure_id, &geometry);
        Ok(())
    }

    async fn list_related_images(
        &self,
        _kind: ProjectKind,
        entity_id: Id,
    ) -> Result<Vec<RelatedImage>, ApiError> {
        self.record("list_related_images");
        Ok(self
            .related_of(entity_id)
            .into_iter()
            .map(|r| r.image)
            .collect())
    }

    async fn add_related_images(
        &self,
        _kind: ProjectKind,
        images: &[NewRelatedImage],
    ) -> Result<(), ApiError> {
        self.record("add_related_images");
        self.with_state(|s| {
            if let Some(unknown) = images.iter().find(|i| !s.known_hashes.contains(&i.hash)) {
                return Err(ApiError::Rejected(format!("unknown hash {}", unknown.hash)));
            }
            for img in images {
                let image = RelatedImage {
                    id: s.alloc(),
                    name: img.name.clone(),
                    hash: Some(img.hash.clone()),
                    meta: img.meta.clone(),
                };
                s.related.push(StoredRelated {
                    entity_id: img.entity_id,
                    image,
                    bytes: Vec::new(),
                });
            }
            Ok(())
        })
    }

    async fn download_related_image(
        &self,
        _kind: ProjectKind,
        image_id: Id,
        path: &Path,
    ) -> Result<(), ApiError> {
        self.record("download_related_image");
        let bytes = self.with_state(|s| {
            s.related
                .iter()
                .find(|r| r.image.id == image_id)
                .map(|r| r.bytes.clone())
                .ok_or(ApiError::NotFound {
                    what: "related image",
                    id: image_id,
                })
        })?;
        write_file(path, &bytes, "download_related_image")
    }

    async fn upload_related_image(
        &self,
        _kind: ProjectKind,
        entity_id: Id,
        name: &str,
        path: &Path,
        meta: Value,
    ) -> Result<(), ApiError> {
        self.record("upload_related_image");
        let bytes = read_file(path, "upload_related_image")?;
        self.with_state(|s| {
            let image = RelatedImage {
                id: s.alloc(),
                name: name.to_string(),
                hash: None,
                meta,
            };
            s.related.push(StoredRelated {
                entity_id,
                image,
                bytes,
            });
        });
        Ok(())
    }

    async fn list_team_members(&self, team_id: Id) -> Result<Vec<UserInfo>, ApiError> {
        self.record("list_team_members");
        Ok(self.with_state(|s| {
            s.memberships
                .iter()
                .filter(|(t, _, _)| *t == team_id)
                .filter_map(|(_, user_id, role)| {
                    s.users.iter().find(|u| u.id == *user_id).map(|u| UserInfo {
                        role: role.clone(),
                        ..u.clone()
                    })
                })
                .collect()
        }))
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<UserInfo>, ApiError> {
        self.record("find_user_by_login");
        Ok(self.user(login))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserInfo, ApiError> {
        self.record("create_user");
        Ok(self.with_state(|s| {
            let info = UserInfo {
                id: s.alloc(),
                login: user.login,
                name: Some(user.name),
                email: Some(user.email),
                role: String::new(),
                disabled: false,
            };
            s.users.push(info.clone());
            info
        }))
    }

    async fn list_roles(&self) -> Result<Vec<RoleInfo>, ApiError> {
        self.record("list_roles");
        Ok(self.with_state(|s| s.roles.clone()))
    }

    async fn change_team_role(
        &self,
        user_id: Id,
        team_id: Id,
        role_id: Id,
    ) -> Result<(), ApiError> {
        self.record("change_team_role");
        self.with_state(|s| {
            let role = s
                .roles
                .iter()
                .find(|r| r.id == role_id)
                .map(|r| r.role.clone())
                .ok_or(ApiError::NotFound {
                    what: "role",
                    id: role_id,
                })?;
            let membership = s
                .memberships
                .iter_mut()
                .find(|(t, u, _)| *t == team_id && *u == user_id)
                .ok_or(ApiError::NotFound {
                    what: "membership",
                    id: user_id,
                })?;
            membership.2 = role;
            Ok(())
        })
    }

    async fn add_to_team_by_login(
        &self,
        login: &str,
        team_id: Id,
        role_id: Id,
    ) -> Result<(), ApiError> {
        self.record("add_to_team_by_login");
        self.with_state(|s| {
            let role = s
                .roles
                .iter()
                .find(|r| r.id == role_id)
                .map(|r| r.role.clone())
                .ok_or(ApiError::NotFound {
                    what: "role",
                    id: role_id,
                })?;
            let user_id = s
                .users
                .iter()
                .find(|u| u.login == login)
                .map(|u| u.id)
                .ok_or_else(|| ApiError::Rejected(format!("no user {login}")))?;
            s.memberships.push((team_id, user_id, role));
            Ok(())
        })
    }
}

/// Progress sink that sums every advance per level.
#[derive(Debug, Default)]
pub struct CountingProgress {
    advanced: Mutex<HashMap<ProgressLevel, usize>>,
}

impl CountingProgress {
    pub fn advanced(&self, level: ProgressLevel) -> usize {
        self.advanced
            .lock()
            .unwrap()
            .get(&level)
            .copied()
            .unwrap_or(0)
    }
}

impl ProgressSink for CountingProgress {
    fn start(&self, _level: ProgressLevel, _message: &str, _total: usize) {}

    fn advance(&self, level: ProgressLevel, n: usize) {
        *self.advanced.lock().unwrap().entry(level).or_default() += n;
    }

    fn finish(&self, _level: ProgressLevel) {}
}
