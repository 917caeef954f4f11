//! Frontend resource: capture geometry and rotation
//!
//! Owns the per-output-stream resolutions and the rotation settings. The
//! externally visible document is a composition: the stored geometry plus
//! the AI denoise section and the ISP HDR section, injected at read time
//! rather than stored.
//!
//! A patch is diffed into three signals: R (rotation state changed), F_i
//! (framerate changed for stream i) and S_i (width/height changed for
//! stream i). Any F alone emits an informational StreamGeometry
//! notification; R or any S additionally emits Restart, because encoder
//! and inference stages are bound to fixed input dimensions.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::resource::{
    AiResource, Defaults, IspResource, Mutation, Notification, Resolution, ResolutionChange,
    Resource, ResourceKind, Rotation, StreamGeometry, Subscriber, Subscribers,
};

/// Frontend payload: the recomposed configuration string plus the freeze
/// control state.
#[derive(Debug, Clone)]
pub struct FrontendState {
    pub config: String,
    pub freeze: bool,
    pub freeze_changed: bool,
}

#[derive(Debug, Clone)]
struct Control {
    freeze: bool,
    rotate_enabled: bool,
    rotation: Rotation,
    resolutions: Vec<Resolution>,
}

struct Inner {
    doc: Value,
    control: Control,
}

pub struct FrontendResource {
    inner: Mutex<Inner>,
    subscribers: Subscribers,
    ai: Arc<AiResource>,
    isp: Arc<IspResource>,
}

impl FrontendResource {
    pub fn new(defaults: &Defaults, ai: Arc<AiResource>, isp: Arc<IspResource>) -> Result<Self> {
        let doc = defaults.frontend.clone();
        let resolutions = parse_resolutions(&doc)?;
        let (rotate_enabled, rotation) = parse_rotation(&doc)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                doc,
                control: Control {
                    freeze: false,
                    rotate_enabled,
                    rotation,
                    resolutions,
                },
            }),
            subscribers: Subscribers::new(),
            ai,
            isp,
        })
    }

    /// Current geometry and rotation with all change flags cleared. Used
    /// by dependents to seed their state before any notification.
    pub fn stream_geometry(&self) -> StreamGeometry {
        let inner = self.inner.lock().expect("frontend document poisoned");
        StreamGeometry {
            rotation: inner.control.rotation,
            rotate_enabled: inner.control.rotate_enabled,
            resolutions: inner
                .control
                .resolutions
                .iter()
                .map(|res| ResolutionChange {
                    width: res.width,
                    height: res.height,
                    framerate: res.framerate,
                    framerate_changed: false,
                    stream_size_changed: false,
                })
                .collect(),
        }
    }

    /// Pause or resume live capture without touching the configuration
    /// document. Notifies only when the value actually changes.
    pub fn set_freeze(&self, freeze: bool) {
        let changed = {
            let mut inner = self.inner.lock().expect("frontend document poisoned");
            let changed = inner.control.freeze != freeze;
            inner.control.freeze = freeze;
            changed
        };
        if changed {
            info!(freeze, "Frontend freeze toggled");
            self.subscribers.notify(&Notification::Frontend(FrontendState {
                config: self.composed_string(),
                freeze,
                freeze_changed: true,
            }));
        }
    }

    /// The externally visible document: stored geometry plus injected
    /// denoise and HDR sections.
    fn composed(&self) -> Value {
        let (mut doc, control) = {
            let inner = self.inner.lock().expect("frontend document poisoned");
            (inner.doc.clone(), inner.control.clone())
        };
        doc["denoise"] = self.ai.denoise_config();
        doc["hdr"] = self.isp.hdr_config();
        doc["rotation"]["enabled"] = Value::from(control.rotate_enabled);
        doc["rotation"]["angle"] = Value::from(control.rotation.as_str());
        doc
    }

    fn composed_string(&self) -> String {
        self.composed().to_string()
    }

    fn mutate(&self, mutation: Mutation) -> Result<Value> {
        let (geometry, rotation_changed, framerate, size) = {
            let mut inner = self.inner.lock().expect("frontend document poisoned");
            let mut next = inner.doc.clone();
            mutation.apply_to(&mut next)?;

            let resolutions = parse_resolutions(&next)?;
            let (rotate_enabled, rotation) = parse_rotation(&next)?;

            let old = inner.control.clone();
            let rotation_changed = old.rotate_enabled != rotate_enabled
                || (old.rotate_enabled && old.rotation != rotation);

            let mut framerate = false;
            let mut size = resolutions.len() != old.resolutions.len();
            let mut changes = Vec::with_capacity(resolutions.len());
            for (i, res) in resolutions.iter().enumerate() {
                let (framerate_changed, stream_size_changed) = match old.resolutions.get(i) {
                    Some(prev) => (
                        res.framerate != prev.framerate,
                        res.width != prev.width || res.height != prev.height,
                    ),
                    // A stream that did not exist before counts as a
                    // geometry change.
                    None => (false, true),
                };
                framerate = framerate || framerate_changed;
                size = size || stream_size_changed;
                changes.push(ResolutionChange {
                    width: res.width,
                    height: res.height,
                    framerate: res.framerate,
                    framerate_changed,
                    stream_size_changed,
                });
            }

            inner.doc = next;
            inner.control = Control {
                freeze: old.freeze,
                rotate_enabled,
                rotation,
                resolutions,
            };
            let geometry = StreamGeometry {
                rotation,
                rotate_enabled,
                resolutions: changes,
            };
            (geometry, rotation_changed, framerate, size)
        };

        if framerate {
            self.subscribers
                .notify(&Notification::StreamGeometry(geometry.clone()));
        }
        if rotation_changed || size {
            info!("Frontend geometry or rotation changed, pipeline restart required");
            self.subscribers
                .notify(&Notification::StreamGeometry(geometry.clone()));
            self.subscribers.notify(&Notification::Restart(geometry));
        }

        let frozen = {
            let inner = self.inner.lock().expect("frontend document poisoned");
            inner.control.freeze
        };
        self.subscribers.notify(&Notification::Frontend(FrontendState {
            config: self.composed_string(),
            freeze: frozen,
            freeze_changed: false,
        }));

        Ok(self.composed())
    }
}

fn parse_resolutions(doc: &Value) -> Result<Vec<Resolution>> {
    let entries = doc["output_video"]["resolutions"]
        .as_array()
        .ok_or_else(|| Error::invalid("output_video.resolutions must be a sequence"))?;
    entries
        .iter()
        .map(|entry| {
            let field = |name: &str| {
                entry[name]
                    .as_u64()
                    .map(|v| v as u32)
                    .ok_or_else(|| Error::invalid(format!("resolution '{name}' must be an integer")))
            };
            Ok(Resolution {
                width: field("width")?,
                height: field("height")?,
                framerate: field("framerate")?,
            })
        })
        .collect()
}

fn parse_rotation(doc: &Value) -> Result<(bool, Rotation)> {
    let enabled = doc["rotation"]["enabled"]
        .as_bool()
        .ok_or_else(|| Error::invalid("rotation.enabled must be a boolean"))?;
    let angle = doc["rotation"]["angle"]
        .as_str()
        .ok_or_else(|| Error::invalid("rotation.angle must be a string"))?;
    Ok((enabled, Rotation::parse(angle)?))
}

impl Resource for FrontendResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Frontend
    }

    fn read(&self) -> Value {
        self.composed()
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
