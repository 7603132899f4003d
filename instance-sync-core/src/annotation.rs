//! Annotation decoding against a project schema and replication onto
//! destination entities.
//!
//! Keyed annotations (video, volume, point cloud, episode) reference objects
//! by source-side key. Objects are created first, their destination ids are
//! recorded in a [`KeyIdMap`], and figures are rewritten through that map
//! before they are written.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::contract::InstanceApi;
use crate::error::SyncError;
use crate::model::{AnnotationScope, Id, NewFigure, NewObject, ProjectKind, TagValue};

/// Label classes and tag definitions of a project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectSchema {
    classes: HashSet<String>,
    tags: HashSet<String>,
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    classes: Vec<RawClass>,
    #[serde(default)]
    tags: Vec<RawTagMeta>,
}

#[derive(Deserialize)]
struct RawClass {
    title: String,
}

#[derive(Deserialize)]
struct RawTagMeta {
    name: String,
}

impl ProjectSchema {
    pub fn from_json(meta: &Value) -> Result<Self, SyncError> {
        let raw: RawSchema = serde_json::from_value(meta.clone())?;
        Ok(Self {
            classes: raw.classes.into_iter().map(|c| c.title).collect(),
            tags: raw.tags.into_iter().map(|t| t.name).collect(),
        })
    }

    pub fn has_class(&self, title: &str) -> bool {
        self.classes.contains(title)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.contains(name)
    }

    fn check_class(&self, title: &str) -> Result<(), SyncError> {
        if self.has_class(title) {
            Ok(())
        } else {
            Err(SyncError::Annotation(format!(
                "class '{title}' is not defined in the project schema"
            )))
        }
    }

    fn check_tags<'a>(&self, tags: impl IntoIterator<Item = &'a str>) -> Result<(), SyncError> {
        for name in tags {
            if !self.has_tag(name) {
                return Err(SyncError::Annotation(format!(
                    "tag '{name}' is not defined in the project schema"
                )));
            }
        }
        Ok(())
    }
}

/// Identifier Correspondence Map: source keys to destination ids and back.
///
/// Scoped to one dataset's processing; never shared between runs.
#[derive(Debug, Default, Clone)]
pub struct KeyIdMap {
    objects: BiMap,
    figures: BiMap,
    tags: BiMap,
}

#[derive(Debug, Default, Clone)]
struct BiMap {
    by_key: HashMap<String, Id>,
    by_id: HashMap<Id, String>,
}

impl BiMap {
    fn insert(&mut self, key: &str, id: Id) {
        if let Some(old) = self.by_key.insert(key.to_string(), id) {
            self.by_id.remove(&old);
        }
        self.by_id.insert(id, key.to_string());
    }
}

impl KeyIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, key: &str, id: Id) {
        self.objects.insert(key, id);
    }

    pub fn add_figure(&mut self, key: &str, id: Id) {
        self.figures.insert(key, id);
    }

    pub fn add_tag(&mut self, key: &str, id: Id) {
        self.tags.insert(key, id);
    }

    pub fn object_id(&self, key: &str) -> Option<Id> {
        self.objects.by_key.get(key).copied()
    }

    pub fn object_key(&self, id: Id) -> Option<&str> {
        self.objects.by_id.get(&id).map(String::as_str)
    }

    pub fn figure_id(&self, key: &str) -> Option<Id> {
        self.figures.by_key.get(key).copied()
    }

    pub fn figure_key(&self, id: Id) -> Option<&str> {
        self.figures.by_id.get(&id).map(String::as_str)
    }

    pub fn tag_id(&self, key: &str) -> Option<Id> {
        self.tags.by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.objects.by_key.len() + self.figures.by_key.len() + self.tags.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnObject {
    pub key: String,
    pub class_title: String,
    pub tags: Vec<TagValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnFigure {
    pub key: String,
    pub object_key: String,
    pub geometry_type: String,
    pub geometry: Value,
    pub frame_index: Option<i64>,
    pub plane: Option<String>,
    /// Source-side id, needed to fetch volumetric geometry.
    pub source_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnTag {
    pub key: Option<String>,
    pub tag: TagValue,
}

/// A decoded, schema-checked keyed annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedAnnotation {
    pub tags: Vec<AnnTag>,
    pub objects: Vec<AnnObject>,
    pub figures: Vec<AnnFigure>,
    pub spatial_figures: Vec<AnnFigure>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKeyed {
    #[serde(default)]
    tags: Vec<RawTag>,
    #[serde(default)]
    objects: Vec<RawObject>,
    #[serde(default)]
    figures: Vec<RawFigure>,
    #[serde(default)]
    frames: Vec<RawFrame>,
    #[serde(default)]
    planes: Vec<RawPlane>,
    #[serde(default)]
    spatial_figures: Vec<RawFigure>,
}

#[derive(Deserialize)]
struct RawTag {
    #[serde(default)]
    key: Option<String>,
    name: String,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawObject {
    key: String,
    class_title: String,
    #[serde(default)]
    tags: Vec<RawTag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFigure {
    key: String,
    object_key: String,
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    geometry_type: String,
    #[serde(default)]
    geometry: Value,
}

#[derive(Deserialize)]
struct RawFrame {
    index: i64,
    #[serde(default)]
    figures: Vec<RawFigure>,
}

#[derive(Deserialize)]
struct RawPlane {
    name: String,
    #[serde(default)]
    slices: Vec<RawFrame>,
}

impl RawFigure {
    fn into_figure(self, frame_index: Option<i64>, plane: Option<&str>) -> AnnFigure {
        AnnFigure {
            key: self.key,
            object_key: self.object_key,
            geometry_type: self.geometry_type,
            geometry: self.geometry,
            frame_index,
            plane: plane.map(str::to_string),
            source_id: self.id,
        }
    }
}

impl From<RawTag> for AnnTag {
    fn from(raw: RawTag) -> Self {
        AnnTag {
            key: raw.key,
            tag: TagValue {
                name: raw.name,
                value: raw.value,
            },
        }
    }
}

impl KeyedAnnotation {
    /// Decodes annotation JSON and checks every class, tag and object
    /// reference against `schema`.
    pub fn decode(json: &Value, schema: &ProjectSchema) -> Result<Self, SyncError> {
        let raw: RawKeyed = serde_json::from_value(json.clone())?;

        let tags: Vec<AnnTag> = raw.tags.into_iter().map(AnnTag::from).collect();
        schema.check_tags(tags.iter().map(|t| t.tag.name.as_str()))?;

        let mut objects = Vec::with_capacity(raw.objects.len());
        for obj in raw.objects {
            schema.check_class(&obj.class_title)?;
            let obj_tags: Vec<TagValue> =
                obj.tags.into_iter().map(|t| AnnTag::from(t).tag).collect();
            schema.check_tags(obj_tags.iter().map(|t| t.name.as_str()))?;
            objects.push(AnnObject {
                key: obj.key,
                class_title: obj.class_title,
                tags: obj_tags,
            });
        }

        let mut figures: Vec<AnnFigure> = raw
            .figures
            .into_iter()
            .map(|f| f.into_figure(None, None))
            .collect();
        for frame in raw.frames {
            figures.extend(
                frame
                    .figures
                    .into_iter()
                    .map(|f| f.into_figure(Some(frame.index), None)),
            );
        }
        for plane in raw.planes {
            for slice in plane.slices {
                figures.extend(
                    slice
                        .figures
                        .into_iter()
                        .map(|f| f.into_figure(Some(slice.index), Some(&plane.name))),
                );
            }
        }
        let spatial_figures: Vec<AnnFigure> = raw
            .spatial_figures
            .into_iter()
            .map(|f| f.into_figure(None, None))
            .collect();

        let object_keys: HashSet<&str> = objects.iter().map(|o| o.key.as_str()).collect();
        if let Some(orphan) = figures
            .iter()
            .chain(spatial_figures.iter())
            .find(|f| !object_keys.contains(f.object_key.as_str()))
        {
            return Err(SyncError::Annotation(format!(
                "figure '{}' references unknown object '{}'",
                orphan.key, orphan.object_key
            )));
        }

        Ok(Self {
            tags,
            objects,
            figures,
            spatial_figures,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.objects.is_empty()
    }
}

/// Checks an image annotation against the schema. Image annotations carry no
/// cross references and are uploaded verbatim.
pub fn validate_image_annotation(json: &Value, schema: &ProjectSchema) -> Result<(), SyncError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawImageObject {
        class_title: String,
        #[serde(default)]
        tags: Vec<RawTag>,
    }
    #[derive(Deserialize)]
    struct RawImage {
        #[serde(default)]
        objects: Vec<RawImageObject>,
        #[serde(default)]
        tags: Vec<RawTag>,
    }

    let raw: RawImage = serde_json::from_value(json.clone())?;
    schema.check_tags(raw.tags.iter().map(|t| t.name.as_str()))?;
    for obj in &raw.objects {
        schema.check_class(&obj.class_title)?;
        schema.check_tags(obj.tags.iter().map(|t| t.name.as_str()))?;
    }
    Ok(())
}

async fn add_objects_mapped(
    dst: &dyn InstanceApi,
    kind: ProjectKind,
    scope: AnnotationScope,
    objects: &[&AnnObject],
    map: &mut KeyIdMap,
) -> Result<(), SyncError> {
    if objects.is_empty() {
        return Ok(());
    }
    let requests: Vec<NewObject> = objects
        .iter()
        .map(|o| NewObject {
            class_title: o.class_title.clone(),
            tags: o.tags.clone(),
        })
        .collect();
    let ids = dst.add_objects(kind, scope, &requests).await?;
    if ids.len() != objects.len() {
        return Err(SyncError::Annotation(format!(
            "destination returned {} object ids for {} objects",
            ids.len(),
            objects.len()
        )));
    }
    for (obj, id) in objects.iter().zip(ids) {
        map.add_object(&obj.key, id);
    }
    Ok(())
}

async fn add_figures_mapped(
    dst: &dyn InstanceApi,
    kind: ProjectKind,
    entity_id: Id,
    figures: &[&AnnFigure],
    map: &mut KeyIdMap,
) -> Result<(), SyncError> {
    if figures.is_empty() {
        return Ok(());
    }
    let mut requests = Vec::with_capacity(figures.len());
    for fig in figures {
        let object_id = map.object_id(&fig.object_key).ok_or_else(|| {
            SyncError::Annotation(format!(
                "object '{}' of figure '{}' has no destination id",
                fig.object_key, fig.key
            ))
        })?;
        requests.push(NewFigure {
            object_id,
            geometry_type: fig.geometry_type.clone(),
            geometry: fig.geometry.clone(),
            frame_index: fig.frame_index,
            plane: fig.plane.clone(),
        });
    }
    let ids = dst.add_figures(kind, entity_id, &requests).await?;
    if ids.len() != figures.len() {
        return Err(SyncError::Annotation(format!(
            "destination returned {} figure ids for {} figures",
            ids.len(),
            figures.len()
        )));
    }
    for (fig, id) in figures.iter().zip(ids) {
        map.add_figure(&fig.key, id);
    }
    Ok(())
}

/// Writes a keyed annotation onto one destination entity.
pub async fn append_to_entity(
    dst: &dyn InstanceApi,
    kind: ProjectKind,
    entity_id: Id,
    ann: &KeyedAnnotation,
    map: &mut KeyIdMap,
) -> Result<(), SyncError> {
    if !ann.tags.is_empty() {
        let tags: Vec<TagValue> = ann.tags.iter().map(|t| t.tag.clone()).collect();
        let ids = dst.add_entity_tags(kind, entity_id, &tags).await?;
        for (tag, id) in ann.tags.iter().zip(ids) {
            if let Some(key) = &tag.key {
                map.add_tag(key, id);
            }
        }
    }

    let objects: Vec<&AnnObject> = ann.objects.iter().collect();
    add_objects_mapped(dst, kind, AnnotationScope::Entity(entity_id), &objects, map).await?;

    let figures: Vec<&AnnFigure> = ann
        .figures
        .iter()
        .chain(ann.spatial_figures.iter())
        .collect();
    add_figures_mapped(dst, kind, entity_id, &figures, map).await?;

    debug!(
        entity_id,
        objects = ann.objects.len(),
        figures = figures.len(),
        "Annotation appended"
    );
    Ok(())
}

/// Writes an episode annotation onto the frames placed during this run.
///
/// Only figures on frames present in `frame_to_entity` are written, and only
/// the objects those figures reference are created. Returns the number of
/// figures written.
pub async fn append_to_episode(
    dst: &dyn InstanceApi,
    kind: ProjectKind,
    dataset_id: Id,
    ann: &KeyedAnnotation,
    frame_to_entity: &HashMap<i64, Id>,
    map: &mut KeyIdMap,
) -> Result<usize, SyncError> {
    let mut by_entity: BTreeMap<Id, Vec<&AnnFigure>> = BTreeMap::new();
    let mut unmapped = 0usize;
    for fig in &ann.figures {
        match fig.frame_index.and_then(|i| frame_to_entity.get(&i)) {
            Some(entity_id) => by_entity.entry(*entity_id).or_default().push(fig),
            None => unmapped += 1,
        }
    }
    if unmapped > 0 {
        debug!(unmapped, "Episode figures on frames not placed in this run");
    }

    let referenced: HashSet<&str> = by_entity
        .values()
        .flatten()
        .map(|f| f.object_key.as_str())
        .collect();
    let objects: Vec<&AnnObject> = ann
        .objects
        .iter()
        .filter(|o| referenced.contains(o.key.as_str()))
        .collect();
    add_objects_mapped(dst, kind, AnnotationScope::Dataset(dataset_id), &objects, map).await?;

    let mut written = 0;
    for (entity_id, figures) in by_entity {
        add_figures_mapped(dst, kind, entity_id, &figures, map).await?;
        written += figures.len();
    }
    if written == 0 && !ann.objects.is_empty() {
        warn!(dataset_id, "Episode annotation has objects but no placed frames");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ProjectSchema {
        ProjectSchema::from_json(&json!({
            "classes": [
                {"title": "car", "shape": "cuboid_3d"},
                {"title": "lung", "shape": "mask_3d"}
            ],
            "tags": [{"name": "occluded"}, {"name": "weather"}]
        }))
        .unwrap()
    }

    #[test]
    fn decodes_frames_planes_and_spatial_figures() {
        let ann = KeyedAnnotation::decode(
            &json!({
                "tags": [{"key": "t1", "name": "weather", "value": "rain"}],
                "objects": [
                    {"key": "o1", "classTitle": "car", "tags": [{"name": "occluded"}]},
                    {"key": "o2", "classTitle": "lung"}
                ],
                "frames": [{"index": 3, "figures": [
                    {"key": "f1", "objectKey": "o1", "geometryType": "cuboid_3d", "geometry": {}}
                ]}],
                "planes": [{"name": "axial", "slices": [{"index": 10, "figures": [
                    {"key": "f2", "objectKey": "o2", "geometryType": "bitmap", "geometry": {}}
                ]}]}],
                "spatialFigures": [
                    {
                        "id": 77,
                        "key": "s1",
                        "objectKey": "o2",
                        "geometryType": "closed_surface_mesh"
                    }
                ]
            }),
            &schema(),
        )
        .unwrap();

        assert_eq!(ann.objects.len(), 2);
        assert_eq!(ann.figures.len(), 2);
        assert_eq!(ann.figures[0].frame_index, Some(3));
        assert_eq!(ann.figures[1].plane.as_deref(), Some("axial"));
        assert_eq!(ann.spatial_figures[0].source_id, Some(77));
        assert_eq!(ann.tags[0].key.as_deref(), Some("t1"));
    }

    #[test]
    fn unknown_class_is_rejected() {
        let err = KeyedAnnotation::decode(
            &json!({"objects": [{"key": "o1", "classTitle": "tree"}]}),
            &schema(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Annotation(_)));
    }

    #[test]
    fn figure_with_unknown_object_is_rejected() {
        let err = KeyedAnnotation::decode(
            &json!({
                "objects": [{"key": "o1", "classTitle": "car"}],
                "figures": [{"key": "f1", "objectKey": "missing", "geometryType": "cuboid_3d"}]
            }),
            &schema(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Annotation(_)));
    }

    #[test]
    fn image_annotation_tags_are_checked() {
        let ok = json!({"objects": [{"classTitle": "car", "tags": [{"name": "occluded"}]}]});
        assert!(validate_image_annotation(&ok, &schema()).is_ok());
        let bad = json!({"tags": [{"name": "night"}]});
        assert!(validate_image_annotation(&bad, &schema()).is_err());
    }

    #[test]
    fn key_id_map_is_bidirectional() {
        let mut map = KeyIdMap::new();
        map.add_object("o1", 10);
        map.add_figure("f1", 20);
        assert_eq!(map.object_id("o1"), Some(10));
        assert_eq!(map.object_key(10), Some("o1"));
        assert_eq!(map.figure_key(20), Some("f1"));
        map.add_object("o1", 11);
        assert_eq!(map.object_key(10), None);
        assert_eq!(map.object_id("o1"), Some(11));
        assert_eq!(map.len(), 2);
    }
}
