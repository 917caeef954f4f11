//! Config-defaults loader
//!
//! Supplies each resource's initial document at construction. Documents
//! are read from `<defaults-dir>/<section>.json` when present, falling
//! back to the built-in defaults below so the daemon can come up on a
//! fresh system.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::constants::{denoise, paths};
use crate::resource::{Resource, ResourceKind, Subscriber, Subscribers};

/// Initial documents for every resource, one section per consumer.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub frontend: Value,
    pub encoder: Value,
    pub osd: Value,
    pub ai: Value,
    /// Denoise engine document derived state is seeded from.
    pub denoise: Value,
    pub isp: Value,
    /// HDR section injected into the composed frontend config.
    pub hdr: Value,
}

impl Defaults {
    /// Load defaults from a directory, falling back per section to the
    /// built-in documents.
    pub fn load(dir: &Path) -> Result<Self> {
        let builtin = Self::builtin();
        Ok(Self {
            frontend: load_section(dir, "frontend", builtin.frontend)?,
            encoder: load_section(dir, "encoder", builtin.encoder)?,
            osd: load_section(dir, "osd", builtin.osd)?,
            ai: load_section(dir, "ai", builtin.ai)?,
            denoise: load_section(dir, "denoise", builtin.denoise)?,
            isp: load_section(dir, "isp", builtin.isp)?,
            hdr: load_section(dir, "hdr", builtin.hdr)?,
        })
    }

    pub fn builtin() -> Self {
        Self {
            frontend: json!({
                "output_video": {
                    "resolutions": [
                        {"width": 3840, "height": 2160, "framerate": 30},
                        {"width": 1920, "height": 1080, "framerate": 30}
                    ]
                },
                "rotation": {"enabled": false, "angle": "ROTATION_ANGLE_0"}
            }),
            encoder: json!({
                "input_stream": {"width": 3840, "height": 2160, "framerate": 30},
                "rate_control": {"rc_mode": "VBR", "bitrate": 10_000_000}
            }),
            osd: json!([
                {
                    "name": "Logo",
                    "type": "image",
                    "enabled": true,
                    "params": {
                        "id": "default_image",
                        "image_path": "logo.png",
                        "width": 0.2,
                        "height": 0.13,
                        "x": 0.78,
                        "y": 0.0,
                        "z-index": 1,
                        "angle": 0,
                        "rotation_policy": "CENTER"
                    }
                },
                {
                    "name": "Date & Time",
                    "type": "datetime",
                    "enabled": true,
                    "params": {
                        "id": "default_datetime",
                        "font_size": 100,
                        "text_color": [255, 0, 0],
                        "font_path": "LiberationMono-Regular.ttf",
                        "x": 0.0,
                        "y": 0.95,
                        "z-index": 3,
                        "angle": 0,
                        "rotation_policy": "CENTER"
                    }
                },
                {
                    "name": "Camera Label",
                    "type": "text",
                    "enabled": true,
                    "params": {
                        "id": "default_label",
                        "label": "camctl",
                        "font_size": 100,
                        "text_color": [255, 255, 255],
                        "font_path": "LiberationMono-Regular.ttf",
                        "x": 0.78,
                        "y": 0.12,
                        "z-index": 2,
                        "angle": 0,
                        "rotation_policy": "CENTER"
                    }
                }
            ]),
            ai: json!({
                "detection": {"enabled": true},
                "denoise": {"enabled": false, "network": "Large", "loopback-count": 1}
            }),
            denoise: json!({
                "enabled": false,
                "network": {
                    "network_path": format!("{}{}", paths::DENOISE_NETWORK_DIR, denoise::LARGE_NETWORK_FILE)
                },
                "loopback-count": 1
            }),
            isp: json!({
                "auto_exposure": {"enabled": true, "gain": 1.0, "integration_time": 8.0},
                "wdr": {"enabled": false, "contrast": 0},
                "tuning": {"profile": "Default"}
            }),
            hdr: json!({"enabled": false, "dol": 2}),
        }
    }
}

fn load_section(dir: &Path, name: &str, fallback: Value) -> Result<Value> {
    let path = dir.join(format!("{name}.json"));
    if !path.exists() {
        debug!(section = name, "No defaults file, using built-in document");
        return Ok(fallback);
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read defaults from {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse defaults JSON from {}", path.display()))?;
    info!(section = name, path = %path.display(), "Loaded defaults");
    Ok(value)
}

/// The leaf resource exposing the loaded defaults as one read-mostly
/// document. It never emits notifications; consumers pull their sections
/// at construction time.
pub struct ConfigResource {
    doc: Mutex<Value>,
    subscribers: Subscribers,
}

impl ConfigResource {
    pub fn new(defaults: &Defaults) -> Self {
        let doc = json!({
            "frontend": defaults.frontend,
            "encoder": defaults.encoder,
            "osd": defaults.osd,
            "ai": defaults.ai,
            "denoise": defaults.denoise,
            "isp": defaults.isp,
            "hdr": defaults.hdr,
        });
        Self {
            doc: Mutex::new(doc),
            subscribers: Subscribers::new(),
        }
    }
}

impl Resource for ConfigResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Config
    }

    fn read(&self) -> Value {
        self.doc.lock().expect("config document poisoned").clone()
    }

    fn apply_patch(&self, patch: Value) -> crate::error::Result<Value> {
        let mut doc = self.doc.lock().expect("config document poisoned");
        crate::document::merge_patch(&mut doc, &patch);
        Ok(doc.clone())
    }

    fn apply_replace(&self, full: Value) -> crate::error::Result<Value> {
        let mut doc = self.doc.lock().expect("config document poisoned");
        *doc = full;
        Ok(doc.clone())
    }

    fn subscribe(&self, callback: Subscriber) {
        self.subscribers.subscribe(callback);
    }
}
