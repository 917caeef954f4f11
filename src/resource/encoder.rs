//! Encoder resource: rate control and input geometry
//!
//! Holds the encoder tunables (rate-control mode, bitrate) alongside the
//! input stream geometry. The geometry is not user-editable here; it is
//! kept in sync from frontend stream-geometry notifications, with width
//! and height swapped when rotation is enabled at a transposed angle.

use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::{
    Defaults, Mutation, Notification, Resource, ResourceKind, Subscriber, Subscribers,
};

/// Rate-control mode, wire form uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcMode {
    Vbr,
    Cvbr,
}

impl RcMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "VBR" => Ok(RcMode::Vbr),
            "CVBR" => Ok(RcMode::Cvbr),
            other => Err(Error::invalid(format!("rate-control mode '{other}'"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RcMode::Vbr => "VBR",
            RcMode::Cvbr => "CVBR",
        }
    }
}

/// Snapshot of everything the live encoder element needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderControl {
    pub rc_mode: RcMode,
    pub bitrate: u32,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

struct Inner {
    doc: Value,
    control: EncoderControl,
}

pub struct EncoderResource {
    inner: Mutex<Inner>,
    subscribers: Subscribers,
}

impl EncoderResource {
    pub fn new(defaults: &Defaults) -> Result<Self> {
        let doc = defaults.encoder.clone();
        let control = parse_control(&doc)?;
        Ok(Self {
            inner: Mutex::new(Inner { doc, control }),
            subscribers: Subscribers::new(),
        })
    }

    pub fn control(&self) -> EncoderControl {
        self.inner.lock().expect("encoder document poisoned").control
    }

    /// Track the primary output stream of the frontend. Rotation at 90°
    /// or 270° transposes the encoder input, so width and height swap.
    /// A framerate change alone is applied live.
    pub fn handle_stream_geometry(&self, geometry: &crate::resource::StreamGeometry) {
        let Some(primary) = geometry.resolutions.first() else {
            return;
        };
        let transposed = geometry.rotate_enabled && geometry.rotation.is_transposed();
        let (width, height) = if transposed {
            (primary.height, primary.width)
        } else {
            (primary.width, primary.height)
        };

        let control = {
            let mut inner = self.inner.lock().expect("encoder document poisoned");
            inner.control.width = width;
            inner.control.height = height;
            inner.control.framerate = primary.framerate;
            inner.doc["input_stream"]["width"] = Value::from(width);
            inner.doc["input_stream"]["height"] = Value::from(height);
            inner.doc["input_stream"]["framerate"] = Value::from(primary.framerate);
            inner.control
        };

        if primary.framerate_changed {
            debug!(framerate = primary.framerate, "Encoder follows framerate change");
            self.subscribers.notify(&Notification::EncoderApply(control));
        }
    }

    /// Ask the pipeline to cycle the encoder element through Null and
    /// back with the current settings.
    pub fn request_reset(&self) {
        self.subscribers
            .notify(&Notification::EncoderReset(self.control()));
    }

    fn mutate(&self, mutation: Mutation) -> Result<Value> {
        let (doc, control, changed) = {
            let mut inner = self.inner.lock().expect("encoder document poisoned");
            let mut next = inner.doc.clone();
            mutation.apply_to(&mut next)?;
            let mut control = parse_control(&next)?;
            // Geometry is owned by the frontend; a document write cannot
            // move it.
            control.width = inner.control.width;
            control.height = inner.control.height;
            control.framerate = inner.control.framerate;
            next["input_stream"] = inner.doc["input_stream"].clone();

            let changed = control != inner.control;
            inner.doc = next.clone();
            inner.control = control;
            (next, control, changed)
        };

        if changed {
            self.subscribers.notify(&Notification::EncoderApply(control));
        }
        Ok(doc)
    }
}

fn parse_control(doc: &Value) -> Result<EncoderControl> {
    let rc_mode = doc["rate_control"]["rc_mode"]
        .as_str()
        .ok_or_else(|| Error::invalid("rate_control.rc_mode must be a string"))
        .and_then(RcMode::parse)?;
    let bitrate = doc["rate_control"]["bitrate"]
        .as_u64()
        .ok_or_else(|| Error::invalid("rate_control.bitrate must be an integer"))? as u32;
    let field = |name: &str| {
        doc["input_stream"][name]
            .as_u64()
            .map(|v| v as u32)
            .ok_or_else(|| Error::invalid(format!("input_stream '{name}' must be an integer")))
    };
    Ok(EncoderControl {
        rc_mode,
        bitrate,
        width: field("width")?,
        height: field("height")?,
        framerate: field("framerate")?,
    })
}

impl Resource for EncoderResource {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Encoder
    }

    fn read(&self) -> Value {
        self.inner.lock().expect("encoder document poisoned").doc.clone()
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
    use crate::resource::{ResolutionChange, Rotation, StreamGeometry};
    use serde_json::json;
    use std::sync::Arc;

    fn resource() -> EncoderResource {
        EncoderResource::new(&Defaults::builtin()).unwrap()
    }

    fn collect(resource: &EncoderResource) -> Arc<Mutex<Vec<Notification>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        resource.subscribe(Box::new(move |notification| {
            sink.lock().unwrap().push(notification.clone());
        }));
        seen
    }

    fn geometry(width: u32, height: u32, framerate: u32) -> StreamGeometry {
        StreamGeometry {
            rotation: Rotation::Deg0,
            rotate_enabled: false,
            resolutions: vec![ResolutionChange {
                width,
                height,
                framerate,
                framerate_changed: false,
                stream_size_changed: false,
            }],
        }
    }

    #[test]
    fn bitrate_patch_applies_live() {
        let encoder = resource();
        let seen = collect(&encoder);
        encoder
            .apply_patch(json!({"rate_control": {"bitrate": 4_000_000}}))
            .unwrap();
        let notifications = seen.lock().unwrap();
        match &notifications[..] {
            [Notification::EncoderApply(control)] => assert_eq!(control.bitrate, 4_000_000),
            other => panic!("unexpected notifications: {other:?}"),
        }
    }

    #[test]
    fn unchanged_patch_is_silent() {
        let encoder = resource();
        let seen = collect(&encoder);
        encoder
            .apply_patch(json!({"rate_control": {"rc_mode": "VBR"}}))
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_rc_mode_rejected() {
        let encoder = resource();
        let before = encoder.read();
        let err = encoder
            .apply_patch(json!({"rate_control": {"rc_mode": "CBR"}}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
        assert_eq!(encoder.read(), before);
    }

    #[test]
    fn transposed_rotation_swaps_dimensions() {
        let encoder = resource();
        let mut geometry = geometry(1920, 1080, 30);
        geometry.rotate_enabled = true;
        geometry.rotation = Rotation::Deg90;
        encoder.handle_stream_geometry(&geometry);

        let control = encoder.control();
        assert_eq!((control.width, control.height), (1080, 1920));
    }

    #[test]
    fn framerate_change_notifies_apply() {
        let encoder = resource();
        let seen = collect(&encoder);
        let mut geometry = geometry(3840, 2160, 15);
        geometry.resolutions[0].framerate_changed = true;
        encoder.handle_stream_geometry(&geometry);

        let notifications = seen.lock().unwrap();
        match &notifications[..] {
            [Notification::EncoderApply(control)] => assert_eq!(control.framerate, 15),
            other => panic!("unexpected notifications: {other:?}"),
        }
    }

    #[test]
    fn patch_cannot_move_geometry() {
        let encoder = resource();
        encoder
            .apply_patch(json!({"input_stream": {"width": 640, "height": 480}}))
            .unwrap();
        let control = encoder.control();
        assert_eq!((control.width, control.height), (3840, 2160));
    }

    #[test]
    fn reset_carries_current_control() {
        let encoder = resource();
        encoder
            .apply_patch(json!({"rate_control": {"rc_mode": "CVBR"}}))
            .unwrap();
        let seen = collect(&encoder);
        encoder.request_reset();
        let notifications = seen.lock().unwrap();
        match &notifications[..] {
            [Notification::EncoderReset(control)] => assert_eq!(control.rc_mode, RcMode::Cvbr),
            other => panic!("unexpected notifications: {other:?}"),
        }
    }
}
