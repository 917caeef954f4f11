//! AI resource: detection and denoising application flags
//!
//! Owns the enabled/disabled state of the inference applications plus the
//! denoising network selection. The symbolic network size in the document
//! (Small/Medium/Large) maps to a concrete network file consumed by the
//! denoise engine config; both directions of the mapping reject unknown
//! values.

use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;
use tracing::info;

use crate::constants::{denoise, paths};
use crate::error::{Error, Result};
use crate::resource::{
    Defaults, Mutation, Notification, Resource, ResourceKind, Subscriber, Subscribers,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiApplication {
    Detection,
    Denoise,
}

/// Minimal delta: applications newly enabled and newly disabled by the
/// last mutation.
#[derive(Debug, Clone, Default)]
pub struct AiDelta {
    pub enabled: Vec<AiApplication>,
    pub disabled: Vec<AiApplication>,
}

impl AiDelta {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }

    fn between(previous: &[AiApplication], current: &[AiApplication]) -> Self {
        AiDelta {
            enabled: current
                .iter()
                .filter(|app| !previous.contains(app))
                .copied()
                .collect(),
            disabled: previous
                .iter()
                .filter(|app| !current.contains(app))
                .copied()
                .collect(),
        }
    }
}

fn network_path(size: &str) -> Result<String> {
    let file = match size {
        "Small" => denoise::SMALL_NETWORK_FILE,
        "Medium" => denoise::MEDIUM_NETWORK_FILE,
        "Large" => denoise::LARGE_NETWORK_FILE,
        other => return Err(Error::invalid(format!("denoise network size '{other}'"))),
    };
    Ok(format!("{}{}", paths::DENOISE_NETWORK_DIR, file))
}

fn network_size(path: &str) -> Result<&'static str> {
    let file = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::invalid(format!("denoise network path '{path}'")))?;
    match file {
        f if f == denoise::SMALL_NETWORK_FILE => Ok("Small"),
        f if f == denoise::MEDIUM_NETWORK_FILE => Ok("Medium"),
        f if f == denoise::LARGE_NETWORK_FILE => Ok("Large"),
        _ => Err(Error::invalid(format!("denoise network path '{path}'"))),
    }
}

struct Inner {
    doc: Value,
    /// Engine-facing denoise document derived from the resource document.
    denoise_config: Value,
}

pub struct AiResource {
    inner: Mutex<Inner>,
    subscribers: Subscribers,
}

impl AiResource {
    pub fn new(defaults: &Defaults) -> Result<Self> {
        let mut doc = defaults.ai.clone();
        let mut denoise_config = defaults.denoise.clone();

        // Seed the engine config from the document flags and reflect the
        // engine's network file back as a symbolic size.
        denoise_config["enabled"] = doc["denoise"]["enabled"].clone();
        let engine_path = denoise_config["network"]["network_path"]
            .as_str()
            .ok_or_else(|| Error::NotConfigured("denoise network_path missing".into()))?;
        doc["denoise"]["network"] = Value::from(network_size(engine_path)?);

        Ok(Self {
            inner: Mutex::new(Inner {
                doc,
                denoise_config,
            }),
            subscribers: Subscribers::new(),
        })
    }

    /// Engine-facing denoise config, injected into the composed frontend
    /// configuration.
    pub fn denoise_config(&self) -> Value {
        self.inner
            .lock()
            .expect("ai document poisoned")
            .denoise_config
            .clone()
    }

    pub fn enabled_applications(&self) -> Vec<AiApplication> {
        enabled_from(&self.inner.lock().expect("ai document poisoned").doc)
    }

    /// Force the detection flag to a known baseline (used by the pipeline
    /// controller after a full restart). Emits the usual delta
    /// notification when the flag actually changes.
    pub fn set_detection_enabled(&self, enabled: bool) {
        let delta = {
            let mut inner = self.inner.lock().expect("ai document poisoned");
            let previous = enabled_from(&inner.doc);
            inner.doc["detection"]["enabled"] = Value::from(enabled);
            AiDelta::between(&previous, &enabled_from(&inner.doc))
        };
        if !delta.is_empty() {
            self.subscribers.notify(&Notification::Ai(delta));
        }
    }

    fn mutate(&self, mutation: Mutation) -> Result<Value> {
        let (doc, delta) = {
            let mut inner = self.inner.lock().expect("ai document poisoned");
            let previous = enabled_from(&inner.doc);

            let mut doc = inner.doc.clone();
            mutation.apply_to(&mut doc)?;
            let denoise_config = derive_denoise_config(&doc, &inner.denoise_config)?;

            inner.doc = doc.clone();
            inner.denoise_config = denoise_config;
            (doc, AiDelta::between(&previous, &enabled_from(&inner.doc)))
        };

        if !delta.is_empty() {
            info!(?delta, "AI application set changed");
            self.subscribers.notify(&Notification::Ai(delta));
        }
        Ok(doc)
    }
}

fn enabled_from(doc: &Value) -> Vec<AiApplication> {
    let mut enabled = Vec::new();
    if doc["detection"]["enabled"].as_bool().unwrap_or(false) {
        enabled.push(AiApplication::Detection);
    }
    if doc["denoise"]["enabled"].as_bool().unwrap_or(false) {
        enabled.push(AiApplication::Denoise);
    }
    enabled
}

/// Validate the post-mutation document and rebuild the engine config.
/// Fails without side effects when the patch violates the schema.
fn derive_denoise_config(doc: &Value, current: &Value) -> Result<Value> {
    let enabled = doc["denoise"]["enabled"]
        .as_bool()
        .ok_or_else(|| Error::invalid("denoise.enabled must be a boolean"))?;
    doc["detection"]["enabled"]
        .as_bool()
        .ok_or_else(|| Error::invalid("detection.enabled must be a boolean"))?;
    let size = doc["denoise"]["network"]
        .as_str()
        .ok_or_else(|| Error::invalid("denoise.network must be a string"))?;
    let loopback = doc["denoise"]["loopback-count"]
        .as_u64()
        .ok_or_else(|| Error::invalid("denoise.loopback-count must be an integer"))?;

    let mut denoise_config = current.clone();
    denoise_config["enabled"] = Value::from(enabled);
    denoise_config["network"]["network_path"] = Value::from(network_path(size)?);
    denoise_config["loopback-count"] = Value::from(loopback);
    Ok(denoise_config)
}

impl Resource for AiResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Ai
    }

    fn read(&self) -> Value {
        self.inner.lock().expect("ai document poisoned").doc.clone()
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
    use serde_json::json;
    use std::sync::Arc;

    fn resource() -> AiResource {
        AiResource::new(&Defaults::builtin()).unwrap()
    }

    fn collect(resource: &AiResource) -> Arc<Mutex<Vec<AiDelta>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        resource.subscribe(Box::new(move |notification| {
            if let Notification::Ai(delta) = notification {
                sink.lock().unwrap().push(delta.clone());
            }
        }));
        seen
    }

    #[test]
    fn enabling_denoise_reports_only_denoise() {
        let ai = resource();
        let seen = collect(&ai);
        ai.apply_patch(json!({"denoise": {"enabled": true}})).unwrap();

        let deltas = seen.lock().unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].enabled, vec![AiApplication::Denoise]);
        assert!(deltas[0].disabled.is_empty());
    }

    #[test]
    fn idempotent_patch_emits_no_second_notification() {
        let ai = resource();
        let seen = collect(&ai);
        let patch = json!({"denoise": {"enabled": true}});
        let first = ai.apply_patch(patch.clone()).unwrap();
        let second = ai.apply_patch(patch).unwrap();
        assert_eq!(first, second);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unknown_network_size_fails_without_partial_effect() {
        let ai = resource();
        let before = ai.read();
        let err = ai
            .apply_patch(json!({"denoise": {"enabled": true, "network": "Gigantic"}}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        assert_eq!(ai.read(), before);
        assert!(!ai.denoise_config()["enabled"].as_bool().unwrap());
    }

    #[test]
    fn network_size_maps_both_directions() {
        assert_eq!(
            network_size(&network_path("Medium").unwrap()).unwrap(),
            "Medium"
        );
        assert!(network_path("Tiny").is_err());
        assert!(network_size("/nowhere/custom.hef").is_err());
    }

    #[test]
    fn derived_config_follows_network_selection() {
        let ai = resource();
        ai.apply_patch(json!({"denoise": {"enabled": true, "network": "Small", "loopback-count": 3}}))
            .unwrap();
        let config = ai.denoise_config();
        assert!(config["enabled"].as_bool().unwrap());
        assert!(
            config["network"]["network_path"]
                .as_str()
                .unwrap()
                .ends_with(denoise::SMALL_NETWORK_FILE)
        );
        assert_eq!(config["loopback-count"], json!(3));
    }

    #[test]
    fn detection_baseline_reset_notifies_once() {
        let ai = resource();
        let seen = collect(&ai);
        ai.set_detection_enabled(false);
        ai.set_detection_enabled(false);
        let deltas = seen.lock().unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].disabled, vec![AiApplication::Detection]);
    }

    #[test]
    fn replace_prunes_and_reports_disabled() {
        let ai = resource();
        ai.apply_patch(json!({"denoise": {"enabled": true}})).unwrap();
        let seen = collect(&ai);
        ai.apply_replace(json!({
            "detection": {"enabled": true},
            "denoise": {"enabled": false, "network": "Large", "loopback-count": 1}
        }))
        .unwrap();
        let deltas = seen.lock().unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].disabled, vec![AiApplication::Denoise]);
    }
}
