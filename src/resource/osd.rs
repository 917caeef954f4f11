//! OSD resource: the overlay descriptor collection
//!
//! Owns an ordered list of overlay entries, partitioned by type into
//! image, text, date-time and auto-focus overlays. Delete detection is
//! identity-based (keyed by overlay id), not positional: an id present
//! before a mutation and absent after it is a deletion regardless of how
//! the surviving entries moved around.
//!
//! Path-bearing params (image file, font file) are accepted relative,
//! stored absolute against the fixed base directories, and presented
//! relative again on read.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::constants::paths;
use crate::error::{Error, Result};
use crate::resource::{
    Defaults, Mutation, Notification, Resource, ResourceKind, Subscriber, Subscribers,
};

fn default_rotation_policy() -> String {
    "CENTER".to_string()
}

fn default_clock_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    pub id: String,
    pub label: String,
    pub font_size: u32,
    #[serde(default)]
    pub text_color: [u8; 3],
    pub font_path: String,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "z-index")]
    pub z_index: i32,
    #[serde(default)]
    pub angle: i32,
    #[serde(default = "default_rotation_policy")]
    pub rotation_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOverlay {
    pub id: String,
    pub image_path: String,
    pub width: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "z-index")]
    pub z_index: i32,
    #[serde(default)]
    pub angle: i32,
    #[serde(default = "default_rotation_policy")]
    pub rotation_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateTimeOverlay {
    pub id: String,
    pub font_size: u32,
    #[serde(default)]
    pub text_color: [u8; 3],
    pub font_path: String,
    #[serde(default = "default_clock_format")]
    pub format: String,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "z-index")]
    pub z_index: i32,
    #[serde(default)]
    pub angle: i32,
    #[serde(default = "default_rotation_policy")]
    pub rotation_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFocusOverlay {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "z-index", default)]
    pub z_index: i32,
}

/// An upserted overlay tagged with its enabled flag. Disabled entries are
/// still known to the pipeline; absence from the live blender means "not
/// yet created", not "disabled".
#[derive(Debug, Clone)]
pub struct OsdUpsert<T> {
    pub enabled: bool,
    pub overlay: T,
}

/// Overlay delta: ids to delete plus the surviving/new entries grouped by
/// category.
#[derive(Debug, Clone, Default)]
pub struct OsdDelta {
    pub overlays_to_delete: Vec<String>,
    pub text: Vec<OsdUpsert<TextOverlay>>,
    pub image: Vec<OsdUpsert<ImageOverlay>>,
    pub datetime: Vec<OsdUpsert<DateTimeOverlay>>,
    pub autofocus: Vec<OsdUpsert<AutoFocusOverlay>>,
}

pub struct OsdResource {
    doc: Mutex<Value>,
    subscribers: Subscribers,
}

impl OsdResource {
    pub fn new(defaults: &Defaults) -> Result<Self> {
        let doc = map_paths(defaults.osd.clone())?;
        // Validate the defaults up front so a broken defaults file fails
        // at startup, not on the first patch.
        classify(&doc, Vec::new())?;
        Ok(Self {
            doc: Mutex::new(doc),
            subscribers: Subscribers::new(),
        })
    }

    /// Encoder-facing composition: enabled overlays only, grouped by
    /// category, params only.
    pub fn encoder_osd_config(&self) -> Value {
        let doc = self.doc.lock().expect("osd document poisoned");
        let mut images = Vec::new();
        let mut texts = Vec::new();
        let mut dates = Vec::new();
        if let Value::Array(entries) = &*doc {
            for entry in entries {
                if !entry["enabled"].as_bool().unwrap_or(false) {
                    continue;
                }
                let params = entry["params"].clone();
                if params.is_null() {
                    continue;
                }
                match entry["type"].as_str() {
                    Some("image") => images.push(params),
                    Some("text") => texts.push(params),
                    Some("datetime") => dates.push(params),
                    _ => {}
                }
            }
        }
        json!({"image": images, "text": texts, "dateTime": dates})
    }

    fn mutate(&self, mutation: Mutation) -> Result<Value> {
        let (doc, delta, changed) = {
            let mut doc = self.doc.lock().expect("osd document poisoned");
            let previous_ids = overlay_ids(&doc);

            let mut next = doc.clone();
            match mutation {
                Mutation::Patch(partial) => {
                    Mutation::Patch(map_paths(partial)?).apply_to(&mut next)?
                }
                Mutation::Replace(full) => {
                    Mutation::Replace(map_paths(full)?).apply_to(&mut next)?
                }
            }

            let current_ids = overlay_ids(&next);
            let deleted: Vec<String> = previous_ids
                .iter()
                .filter(|id| !current_ids.contains(*id))
                .cloned()
                .collect();

            let delta = classify(&next, deleted)?;
            let changed = next != *doc;
            *doc = next.clone();
            (next, delta, changed)
        };

        if changed || !delta.overlays_to_delete.is_empty() {
            debug!(
                deleted = delta.overlays_to_delete.len(),
                "OSD collection changed"
            );
            self.subscribers.notify(&Notification::Osd(delta));
        }
        Ok(doc)
    }
}

fn overlay_ids(doc: &Value) -> HashSet<String> {
    let mut ids = HashSet::new();
    if let Value::Array(entries) = doc {
        for entry in entries {
            if let Some(id) = entry["params"]["id"].as_str() {
                ids.insert(id.to_string());
            }
        }
    }
    ids
}

/// Expand relative image/font paths against the fixed base directories.
fn map_paths(mut config: Value) -> Result<Value> {
    let Value::Array(entries) = &mut config else {
        return Err(Error::invalid("osd document must be a sequence"));
    };
    for entry in entries {
        match entry["type"].as_str() {
            Some("image") => expand(&mut entry["params"]["image_path"], paths::OSD_IMAGE_DIR),
            Some("text") | Some("datetime") => {
                expand(&mut entry["params"]["font_path"], paths::OSD_FONT_DIR)
            }
            _ => {}
        }
    }
    Ok(config)
}

fn expand(slot: &mut Value, base: &str) {
    if let Some(path) = slot.as_str()
        && !path.starts_with(base)
    {
        *slot = Value::from(format!("{base}{path}"));
    }
}

/// Present stored absolute paths relative on read.
fn unmap_paths(mut config: Value) -> Value {
    if let Value::Array(entries) = &mut config {
        for entry in entries {
            match entry["type"].as_str() {
                Some("image") => strip(&mut entry["params"]["image_path"], paths::OSD_IMAGE_DIR),
                Some("text") | Some("datetime") => {
                    strip(&mut entry["params"]["font_path"], paths::OSD_FONT_DIR)
                }
                _ => {}
            }
        }
    }
    config
}

fn strip(slot: &mut Value, base: &str) {
    if let Some(path) = slot.as_str()
        && let Some(relative) = path.strip_prefix(base)
    {
        *slot = Value::from(relative);
    }
}

/// Parse the post-mutation document into typed per-category upsert lists.
/// Unknown types, missing ids and duplicate ids are schema violations.
fn classify(doc: &Value, overlays_to_delete: Vec<String>) -> Result<OsdDelta> {
    let Value::Array(entries) = doc else {
        return Err(Error::invalid("osd document must be a sequence"));
    };

    let mut delta = OsdDelta {
        overlays_to_delete,
        ..OsdDelta::default()
    };
    let mut seen = HashSet::new();
    for entry in entries {
        let enabled = entry["enabled"]
            .as_bool()
            .ok_or_else(|| Error::invalid("overlay 'enabled' must be a boolean"))?;
        let id = entry["params"]["id"]
            .as_str()
            .ok_or_else(|| Error::invalid("overlay params missing 'id'"))?;
        if !seen.insert(id.to_string()) {
            return Err(Error::invalid(format!("duplicate overlay id '{id}'")));
        }
        let params = entry["params"].clone();
        match entry["type"].as_str() {
            Some("text") => delta.text.push(OsdUpsert {
                enabled,
                overlay: parse_overlay(params)?,
            }),
            Some("image") => delta.image.push(OsdUpsert {
                enabled,
                overlay: parse_overlay(params)?,
            }),
            Some("datetime") => delta.datetime.push(OsdUpsert {
                enabled,
                overlay: parse_overlay(params)?,
            }),
            Some("autofocus") => delta.autofocus.push(OsdUpsert {
                enabled,
                overlay: parse_overlay(params)?,
            }),
            other => {
                return Err(Error::invalid(format!("overlay type {other:?}")));
            }
        }
    }
    Ok(delta)
}

fn parse_overlay<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::invalid(format!("overlay params: {e}")))
}

impl Resource for OsdResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Osd
    }

    fn read(&self) -> Value {
        unmap_paths(self.doc.lock().expect("osd document poisoned").clone())
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(id: &str, label: &str) -> Value {
        json!({
            "name": label,
            "type": "text",
            "enabled": true,
            "params": {
                "id": id,
                "label": label,
                "font_size": 80,
                "text_color": [255, 255, 255],
                "font_path": "Mono.ttf",
                "x": 0.1,
                "y": 0.1,
                "z-index": 1
            }
        })
    }

    fn resource_with(ids: &[&str]) -> OsdResource {
        let osd = OsdResource::new(&Defaults::builtin()).unwrap();
        let entries: Vec<Value> = ids.iter().map(|id| entry(id, id)).collect();
        osd.apply_replace(Value::Array(entries)).unwrap();
        osd
    }

    fn collect(resource: &OsdResource) -> Arc<Mutex<Vec<OsdDelta>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        resource.subscribe(Box::new(move |notification| {
            if let Notification::Osd(delta) = notification {
                sink.lock().unwrap().push(delta.clone());
            }
        }));
        seen
    }

    #[test]
    fn delete_detection_is_identity_based() {
        let osd = resource_with(&["A", "B", "C"]);
        let seen = collect(&osd);

        // Remove B; C shifts into its position.
        osd.apply_replace(Value::Array(vec![entry("A", "A"), entry("C", "C")]))
            .unwrap();

        let deltas = seen.lock().unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].overlays_to_delete, vec!["B".to_string()]);
        let surviving: Vec<&str> = deltas[0]
            .text
            .iter()
            .map(|up| up.overlay.id.as_str())
            .collect();
        assert_eq!(surviving, vec!["A", "C"]);
    }

    #[test]
    fn paths_are_absolute_in_storage_and_relative_on_read() {
        let osd = resource_with(&["A"]);
        let delta_seen = collect(&osd);
        osd.apply_replace(Value::Array(vec![entry("A", "A")])).unwrap();
        // No change at all, so no notification either.
        assert!(delta_seen.lock().unwrap().is_empty());

        let stored = osd.encoder_osd_config();
        assert!(
            stored["text"][0]["font_path"]
                .as_str()
                .unwrap()
                .starts_with(paths::OSD_FONT_DIR)
        );
        let read = osd.read();
        assert_eq!(read[0]["params"]["font_path"], json!("Mono.ttf"));
    }

    #[test]
    fn unknown_overlay_type_fails_whole_patch() {
        let osd = resource_with(&["A"]);
        let before = osd.read();
        let mut bad = entry("B", "B");
        bad["type"] = json!("hologram");
        let err = osd
            .apply_replace(Value::Array(vec![entry("A", "A"), bad]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        assert_eq!(osd.read(), before);
    }

    #[test]
    fn duplicate_id_rejected() {
        let osd = resource_with(&["A"]);
        let err = osd
            .apply_replace(Value::Array(vec![entry("A", "one"), entry("A", "two")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }

    #[test]
    fn disabled_overlays_kept_but_excluded_from_encoder_config() {
        let osd = resource_with(&["A"]);
        let mut disabled = entry("B", "B");
        disabled["enabled"] = json!(false);
        osd.apply_replace(Value::Array(vec![entry("A", "A"), disabled]))
            .unwrap();

        let composed = osd.encoder_osd_config();
        assert_eq!(composed["text"].as_array().unwrap().len(), 1);
        // The overlay is still part of the collection and the delta.
        assert_eq!(osd.read().as_array().unwrap().len(), 2);
    }

    #[test]
    fn default_collection_classifies() {
        let osd = OsdResource::new(&Defaults::builtin()).unwrap();
        let composed = osd.encoder_osd_config();
        assert_eq!(composed["image"].as_array().unwrap().len(), 1);
        assert_eq!(composed["text"].as_array().unwrap().len(), 1);
        assert_eq!(composed["dateTime"].as_array().unwrap().len(), 1);
    }
}
