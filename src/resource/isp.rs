//! ISP resource: 3A/tuning configuration and the HDR section
//!
//! Functional (hardware-touching): after a full pipeline restart the
//! controller re-initializes it through [`Resource::init`], pushing the
//! baseline 3A state back to the sensor path. Subscribes to the AI
//! resource so a denoise toggle switches the tuning profile.

use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resource::{
    AiApplication, AiDelta, Behavior, Defaults, Mutation, Notification, Resource, ResourceKind,
    Subscriber, Subscribers,
};

/// ISP delta: `three_a_updated` is set when the auto-exposure or WDR
/// state changed, as opposed to a tuning-only update.
#[derive(Debug, Clone)]
pub struct IspDelta {
    pub three_a_updated: bool,
}

struct Inner {
    doc: Value,
    hdr: Value,
    /// 3A state captured at construction, restored by `init`.
    baseline: Value,
}

pub struct IspResource {
    inner: Mutex<Inner>,
    subscribers: Subscribers,
}

impl IspResource {
    pub fn new(defaults: &Defaults) -> Self {
        let doc = defaults.isp.clone();
        Self {
            inner: Mutex::new(Inner {
                baseline: doc["auto_exposure"].clone(),
                hdr: defaults.hdr.clone(),
                doc,
            }),
            subscribers: Subscribers::new(),
        }
    }

    /// HDR section injected into the composed frontend config.
    pub fn hdr_config(&self) -> Value {
        self.inner.lock().expect("isp document poisoned").hdr.clone()
    }

    /// Tuning profile follows the denoise application state.
    pub fn handle_ai_change(&self, delta: &AiDelta) {
        let profile = if delta.enabled.contains(&AiApplication::Denoise) {
            Some("Denoise")
        } else if delta.disabled.contains(&AiApplication::Denoise) {
            Some("Default")
        } else {
            None
        };
        if let Some(profile) = profile {
            let mut inner = self.inner.lock().expect("isp document poisoned");
            inner.doc["tuning"]["profile"] = Value::from(profile);
            debug!(profile, "ISP tuning profile switched");
        }
    }

    fn mutate(&self, mutation: Mutation) -> Result<Value> {
        let (doc, three_a_updated, updated) = {
            let mut inner = self.inner.lock().expect("isp document poisoned");
            let mut next = inner.doc.clone();
            mutation.apply_to(&mut next)?;
            validate(&next)?;
            let three_a_updated = next["auto_exposure"] != inner.doc["auto_exposure"]
                || next["wdr"] != inner.doc["wdr"];
            let updated = three_a_updated || next["tuning"] != inner.doc["tuning"];
            inner.doc = next.clone();
            (next, three_a_updated, updated)
        };

        if updated {
            self.subscribers
                .notify(&Notification::Isp(IspDelta { three_a_updated }));
        }
        Ok(doc)
    }
}

fn validate(doc: &Value) -> Result<()> {
    doc["auto_exposure"]["enabled"]
        .as_bool()
        .ok_or_else(|| Error::invalid("auto_exposure.enabled must be a boolean"))?;
    doc["auto_exposure"]["gain"]
        .as_f64()
        .ok_or_else(|| Error::invalid("auto_exposure.gain must be a number"))?;
    doc["auto_exposure"]["integration_time"]
        .as_f64()
        .ok_or_else(|| Error::invalid("auto_exposure.integration_time must be a number"))?;
    doc["wdr"]["enabled"]
        .as_bool()
        .ok_or_else(|| Error::invalid("wdr.enabled must be a boolean"))?;
    doc["tuning"]["profile"]
        .as_str()
        .ok_or_else(|| Error::invalid("tuning.profile must be a string"))?;
    Ok(())
}

impl Resource for IspResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Isp
    }

    fn behavior(&self) -> Behavior {
        Behavior::Functional
    }

    /// Restore the baseline 3A state after a pipeline restart. Does not
    /// notify: it runs inside the controller's restart handler.
    fn init(&self) {
        let mut inner = self.inner.lock().expect("isp document poisoned");
        let baseline = inner.baseline.clone();
        inner.doc["auto_exposure"] = baseline;
        info!("ISP re-initialized to baseline 3A state");
    }

    fn read(&self) -> Value {
        self.inner.lock().expect("isp document poisoned").doc.clone()
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

    #[test]
    fn three_a_patch_notifies_once() {
        let isp = IspResource::new(&Defaults::builtin());
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        isp.subscribe(Box::new(move |notification| {
            if matches!(notification, Notification::Isp(_)) {
                *sink.lock().unwrap() += 1;
            }
        }));

        isp.apply_patch(json!({"auto_exposure": {"gain": 2.5}})).unwrap();
        isp.apply_patch(json!({"auto_exposure": {"gain": 2.5}})).unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn tuning_only_patch_notifies_without_three_a_flag() {
        let isp = IspResource::new(&Defaults::builtin());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        isp.subscribe(Box::new(move |notification| {
            if let Notification::Isp(delta) = notification {
                sink.lock().unwrap().push(delta.three_a_updated);
            }
        }));

        isp.apply_patch(json!({"tuning": {"profile": "Sport"}})).unwrap();
        isp.apply_patch(json!({"auto_exposure": {"gain": 3.0}})).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn denoise_toggle_switches_tuning_profile() {
        let isp = IspResource::new(&Defaults::builtin());
        isp.handle_ai_change(&AiDelta {
            enabled: vec![AiApplication::Denoise],
            disabled: vec![],
        });
        assert_eq!(isp.read()["tuning"]["profile"], json!("Denoise"));

        isp.handle_ai_change(&AiDelta {
            enabled: vec![],
            disabled: vec![AiApplication::Denoise],
        });
        assert_eq!(isp.read()["tuning"]["profile"], json!("Default"));
    }

    #[test]
    fn init_restores_baseline() {
        let isp = IspResource::new(&Defaults::builtin());
        let baseline = isp.read()["auto_exposure"].clone();
        isp.apply_patch(json!({"auto_exposure": {"enabled": false, "gain": 9.0}}))
            .unwrap();
        isp.init();
        assert_eq!(isp.read()["auto_exposure"], baseline);
    }

    #[test]
    fn bad_gain_rejected_atomically() {
        let isp = IspResource::new(&Defaults::builtin());
        let before = isp.read();
        let err = isp
            .apply_patch(json!({"auto_exposure": {"gain": "loud"}}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        assert_eq!(isp.read(), before);
    }
}
