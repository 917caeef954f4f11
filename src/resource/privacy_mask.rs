//! Privacy mask resource: polygons in canonical coordinates
//!
//! Polygons are persisted in the 0°-rotation reference frame. The
//! resource mirrors the frontend's rotation state and frame dimensions,
//! and [`PrivacyMaskResource::masks`] hands out polygons already
//! transformed into the currently active rotation's coordinate space.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::{
    Mutation, Notification, Resource, ResourceKind, Rotation, StreamGeometry, Subscriber,
    Subscribers,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polygon {
    pub id: String,
    pub vertices: Vec<Vertex>,
}

/// Minimal mask delta. Polygons in `polygon_to_update` are already
/// transformed into the active rotation's coordinate space and cover
/// every mask that changed shape or toggled to enabled.
#[derive(Debug, Clone, Default)]
pub struct MaskDelta {
    pub changed_to_enabled: Vec<String>,
    pub changed_to_disabled: Vec<String>,
    pub polygon_to_update: Vec<Polygon>,
    pub polygon_to_delete: Vec<String>,
}

impl MaskDelta {
    pub fn is_empty(&self) -> bool {
        self.changed_to_enabled.is_empty()
            && self.changed_to_disabled.is_empty()
            && self.polygon_to_update.is_empty()
            && self.polygon_to_delete.is_empty()
    }
}

/// Rotate one canonical-space point into another canonical angle's
/// coordinate space. `frame` is the 0° frame size; the rotation is about
/// the frame center, in 90° steps.
pub fn rotate_point(point: Vertex, from: Rotation, to: Rotation, frame: (u32, u32)) -> Vertex {
    let steps = (angle_index(to) + 4 - angle_index(from)) % 4;
    let mut dims = if from.is_transposed() {
        (frame.1, frame.0)
    } else {
        frame
    };
    let mut current = point;
    for _ in 0..steps {
        current = Vertex {
            x: dims.1 - current.y,
            y: current.x,
        };
        dims = (dims.1, dims.0);
    }
    current
}

fn angle_index(rotation: Rotation) -> u32 {
    match rotation {
        Rotation::Deg0 => 0,
        Rotation::Deg90 => 1,
        Rotation::Deg180 => 2,
        Rotation::Deg270 => 3,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MaskEntry {
    enabled: bool,
    polygon: Polygon,
}

struct Inner {
    doc: Value,
    masks: BTreeMap<String, MaskEntry>,
    rotation: Rotation,
    frame: (u32, u32),
}

pub struct PrivacyMaskResource {
    inner: Mutex<Inner>,
    subscribers: Subscribers,
}

impl PrivacyMaskResource {
    /// Starts with no masks; rotation and frame size are seeded from the
    /// current frontend geometry.
    pub fn new(geometry: &StreamGeometry) -> Self {
        let doc = json!({"masks": []});
        Self {
            inner: Mutex::new(Inner {
                doc,
                masks: BTreeMap::new(),
                rotation: active_rotation(geometry),
                frame: canonical_frame(geometry),
            }),
            subscribers: Subscribers::new(),
        }
    }

    /// All known masks, transformed into the active rotation's space.
    pub fn masks(&self) -> BTreeMap<String, Polygon> {
        let inner = self.inner.lock().expect("privacy mask document poisoned");
        inner
            .masks
            .values()
            .map(|entry| {
                let transformed = transform(&entry.polygon, inner.rotation, inner.frame);
                (entry.polygon.id.clone(), transformed)
            })
            .collect()
    }

    /// Mirror rotation state and frame size from the frontend. When the
    /// active rotation changes, every enabled mask is re-announced in the
    /// new coordinate space.
    pub fn handle_stream_geometry(&self, geometry: &StreamGeometry) {
        let delta = {
            let mut inner = self.inner.lock().expect("privacy mask document poisoned");
            let rotation = active_rotation(geometry);
            let changed = rotation != inner.rotation;
            inner.rotation = rotation;
            inner.frame = canonical_frame(geometry);
            if !changed {
                return;
            }
            debug!(rotation = rotation.as_str(), "Privacy masks follow rotation");
            MaskDelta {
                polygon_to_update: enabled_transformed(&inner),
                ..MaskDelta::default()
            }
        };
        if !delta.is_empty() {
            self.subscribers.notify(&Notification::PrivacyMask(delta));
        }
    }

    /// Re-announce every enabled mask, used after a pipeline rebuild has
    /// discarded the live blender state.
    pub fn reenable_masks(&self) {
        let delta = {
            let inner = self.inner.lock().expect("privacy mask document poisoned");
            MaskDelta {
                changed_to_enabled: inner
                    .masks
                    .values()
                    .filter(|entry| entry.enabled)
                    .map(|entry| entry.polygon.id.clone())
                    .collect(),
                polygon_to_update: enabled_transformed(&inner),
                ..MaskDelta::default()
            }
        };
        if !delta.is_empty() {
            self.subscribers.notify(&Notification::PrivacyMask(delta));
        }
    }

    fn mutate(&self, mutation: Mutation) -> Result<Value> {
        let (doc, delta) = {
            let mut inner = self.inner.lock().expect("privacy mask document poisoned");
            let mut next = inner.doc.clone();
            mutation.apply_to(&mut next)?;
            let masks = parse_masks(&next, inner.frame)?;

            let mut delta = MaskDelta::default();
            for (id, entry) in &masks {
                let previous = inner.masks.get(id);
                let enabled_now = entry.enabled && previous.is_none_or(|p| !p.enabled);
                let disabled_now = !entry.enabled && previous.is_some_and(|p| p.enabled);
                let shape_changed = previous.is_none_or(|p| p.polygon != entry.polygon);
                if enabled_now {
                    delta.changed_to_enabled.push(id.clone());
                }
                if disabled_now {
                    delta.changed_to_disabled.push(id.clone());
                }
                if entry.enabled && (shape_changed || enabled_now) {
                    delta
                        .polygon_to_update
                        .push(transform(&entry.polygon, inner.rotation, inner.frame));
                }
            }
            for id in inner.masks.keys() {
                if !masks.contains_key(id) {
                    delta.polygon_to_delete.push(id.clone());
                }
            }

            inner.doc = next.clone();
            inner.masks = masks;
            (next, delta)
        };

        if !delta.is_empty() {
            self.subscribers.notify(&Notification::PrivacyMask(delta));
        }
        Ok(doc)
    }
}

fn active_rotation(geometry: &StreamGeometry) -> Rotation {
    if geometry.rotate_enabled {
        geometry.rotation
    } else {
        Rotation::Deg0
    }
}

fn canonical_frame(geometry: &StreamGeometry) -> (u32, u32) {
    geometry
        .resolutions
        .first()
        .map(|res| (res.width, res.height))
        .unwrap_or((0, 0))
}

fn transform(polygon: &Polygon, to: Rotation, frame: (u32, u32)) -> Polygon {
    Polygon {
        id: polygon.id.clone(),
        vertices: polygon
            .vertices
            .iter()
            .map(|&v| rotate_point(v, Rotation::Deg0, to, frame))
            .collect(),
    }
}

fn enabled_transformed(inner: &Inner) -> Vec<Polygon> {
    inner
        .masks
        .values()
        .filter(|entry| entry.enabled)
        .map(|entry| transform(&entry.polygon, inner.rotation, inner.frame))
        .collect()
}

fn parse_masks(doc: &Value, frame: (u32, u32)) -> Result<BTreeMap<String, MaskEntry>> {
    let entries = doc["masks"]
        .as_array()
        .ok_or_else(|| Error::invalid("masks must be a sequence"))?;
    let mut masks = BTreeMap::new();
    for entry in entries {
        let id = entry["id"]
            .as_str()
            .ok_or_else(|| Error::invalid("mask entry is missing an 'id'"))?
            .to_owned();
        let enabled = entry["enabled"]
            .as_bool()
            .ok_or_else(|| Error::invalid(format!("mask '{id}': 'enabled' must be a boolean")))?;
        let vertices: Vec<Vertex> = serde_json::from_value(entry["vertices"].clone())
            .map_err(|e| Error::invalid(format!("mask '{id}': bad vertices: {e}")))?;
        for vertex in &vertices {
            if vertex.x > frame.0 || vertex.y > frame.1 {
                return Err(Error::invalid(format!(
                    "mask '{id}': vertex ({}, {}) outside the {}x{} frame",
                    vertex.x, vertex.y, frame.0, frame.1
                )));
            }
        }
        let polygon = Polygon {
            id: id.clone(),
            vertices,
        };
        if masks
            .insert(id.clone(), MaskEntry { enabled, polygon })
            .is_some()
        {
            return Err(Error::invalid(format!("duplicate mask id '{id}'")));
        }
    }
    Ok(masks)
}

impl Resource for PrivacyMaskResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PrivacyMask
    }

    fn read(&self) -> Value {
        self.inner
            .lock()
            .expect("privacy mask document poisoned")
            .doc
            .clone()
    }

    fn apply_patch(&self, patch: Value) -> Result<Value> {
        self.mutate(Mutation::Patch(patch))
    }

    fn apply_replace(&self, full: Value) -> Result<Value> {
        self.mutate(Mutation::Replace(full))
    }

    fn subscribe(&self, callback: Subscriber) {
        self.subscribers.subscribe(callback);
    }
}
