//! Resource abstraction and change-notification protocol
//!
//! A resource owns one configuration document, accepts partial or full
//! updates, and broadcasts typed minimal-delta notifications to its
//! subscribers. Subscribers are invoked synchronously on the mutating
//! thread, in registration order, *after* the resource's own lock has
//! been released — a handler may therefore observe a resource in a state
//! newer than the notification payload describes, which is why payloads
//! are self-contained deltas rather than pointers into live state.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document;
use crate::error::{Error, Result};

pub mod ai;
pub mod defaults;
pub mod encoder;
pub mod frontend;
pub mod isp;
pub mod osd;
pub mod privacy_mask;
pub mod repository;

pub use ai::{AiApplication, AiDelta, AiResource};
pub use defaults::Defaults;
pub use encoder::{EncoderControl, EncoderResource};
pub use frontend::{FrontendResource, FrontendState};
pub use isp::{IspDelta, IspResource};
pub use osd::{OsdDelta, OsdResource, OsdUpsert};
pub use privacy_mask::{MaskDelta, Polygon, PrivacyMaskResource};
pub use repository::Repository;

/// Enumerated resource identities; unique per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Config,
    Ai,
    Osd,
    Isp,
    Frontend,
    Encoder,
    PrivacyMask,
}

impl ResourceKind {
    /// All kinds, in dependency (construction) order.
    pub const ALL: &'static [ResourceKind] = &[
        ResourceKind::Config,
        ResourceKind::Osd,
        ResourceKind::Ai,
        ResourceKind::Isp,
        ResourceKind::Frontend,
        ResourceKind::Encoder,
        ResourceKind::PrivacyMask,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Config => "config",
            ResourceKind::Ai => "ai",
            ResourceKind::Osd => "osd",
            ResourceKind::Isp => "isp",
            ResourceKind::Frontend => "frontend",
            ResourceKind::Encoder => "encoder",
            ResourceKind::PrivacyMask => "privacy_mask",
        }
    }
}

/// Pure-configuration resources only rewrite documents; functional
/// resources additionally touch hardware and are re-initialized after a
/// full pipeline restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Config,
    Functional,
}

/// One of the four canonical rotation angles.
///
/// Documents carry the wire form `ROTATION_ANGLE_<deg>`; anything else is
/// rejected with `InvalidValue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn parse(angle: &str) -> Result<Self> {
        match angle {
            "ROTATION_ANGLE_0" => Ok(Rotation::Deg0),
            "ROTATION_ANGLE_90" => Ok(Rotation::Deg90),
            "ROTATION_ANGLE_180" => Ok(Rotation::Deg180),
            "ROTATION_ANGLE_270" => Ok(Rotation::Deg270),
            other => Err(Error::invalid(format!("rotation angle '{other}'"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rotation::Deg0 => "ROTATION_ANGLE_0",
            Rotation::Deg90 => "ROTATION_ANGLE_90",
            Rotation::Deg180 => "ROTATION_ANGLE_180",
            Rotation::Deg270 => "ROTATION_ANGLE_270",
        }
    }

    /// True when width and height are swapped relative to the 0° frame.
    pub fn is_transposed(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Nominal geometry of one output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

/// Per-output-stream geometry entry carried by [`Notification::StreamGeometry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionChange {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub framerate_changed: bool,
    pub stream_size_changed: bool,
}

/// Stream-geometry payload: nominal per-stream geometry, change flags and
/// the current rotation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamGeometry {
    pub rotation: Rotation,
    pub rotate_enabled: bool,
    pub resolutions: Vec<ResolutionChange>,
}

/// Typed change notification, one payload variant per resource kind.
///
/// Dispatch is an exhaustive match; payloads carry only the delta a
/// subscriber needs, never the full document.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Frontend document changed (recomposed config string + freeze state).
    Frontend(FrontendState),
    /// Per-stream geometry/framerate report; informational on its own.
    StreamGeometry(StreamGeometry),
    /// Geometry or rotation changed in a way that requires a full
    /// pipeline teardown and rebuild.
    Restart(StreamGeometry),
    /// Overlay upserts and deletions.
    Osd(OsdDelta),
    /// Applications newly enabled or disabled.
    Ai(AiDelta),
    /// Encoder tunables changed; apply live, no restart.
    EncoderApply(EncoderControl),
    /// Encoder format assumptions changed; cycle just the encoder element.
    EncoderReset(EncoderControl),
    /// Privacy mask enable/disable/upsert/delete delta.
    PrivacyMask(MaskDelta),
    /// ISP 3A/tuning configuration updated.
    Isp(IspDelta),
}

impl Notification {
    /// The resource kind that emitted this notification.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Notification::Frontend(_)
            | Notification::StreamGeometry(_)
            | Notification::Restart(_) => ResourceKind::Frontend,
            Notification::Osd(_) => ResourceKind::Osd,
            Notification::Ai(_) => ResourceKind::Ai,
            Notification::EncoderApply(_) | Notification::EncoderReset(_) => ResourceKind::Encoder,
            Notification::PrivacyMask(_) => ResourceKind::PrivacyMask,
            Notification::Isp(_) => ResourceKind::Isp,
        }
    }
}

pub type Subscriber = Box<dyn Fn(&Notification) + Send + Sync>;

/// Subscriber list with a documented ordering contract: registration
/// order equals delivery order. Subscribers live for the process
/// lifetime; there is no unsubscribe.
#[derive(Default)]
pub struct Subscribers {
    callbacks: Mutex<Vec<Subscriber>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: Subscriber) {
        self.callbacks
            .lock()
            .expect("subscriber list poisoned")
            .push(callback);
    }

    /// Deliver one notification to every subscriber, synchronously, on
    /// the calling thread. Must only be called after the emitting
    /// resource has released its document lock.
    pub fn notify(&self, notification: &Notification) {
        let callbacks = self.callbacks.lock().expect("subscriber list poisoned");
        for callback in callbacks.iter() {
            callback(notification);
        }
    }
}

/// The base contract every configuration resource implements.
pub trait Resource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn behavior(&self) -> Behavior {
        Behavior::Config
    }

    /// Re-establish baseline hardware state after a full pipeline
    /// rebuild. Only meaningful for functional resources; the default is
    /// a no-op.
    fn init(&self) {}

    /// Current document; never blocks on pipeline I/O.
    fn read(&self) -> Value;

    /// Merge a partial document, recompute derived state, notify
    /// subscribers. Either the whole patch is accepted or nothing
    /// changes. Returns the new full document.
    fn apply_patch(&self, patch: Value) -> Result<Value>;

    /// Replace the full document; behaves as `apply_patch` of
    /// `diff(current, full)`.
    fn apply_replace(&self, full: Value) -> Result<Value>;

    fn subscribe(&self, callback: Subscriber);
}

/// How a mutation rewrites a document. Both forms are applied under the
/// same resource lock; `Replace` replays a structural diff so sequence
/// removals work.
pub(crate) enum Mutation {
    Patch(Value),
    Replace(Value),
}

impl Mutation {
    pub(crate) fn apply_to(&self, doc: &mut Value) -> Result<()> {
        match self {
            Mutation::Patch(partial) => {
                document::merge_patch(doc, partial);
                Ok(())
            }
            Mutation::Replace(full) => {
                let ops = document::diff(doc, full);
                document::apply_ops(doc, &ops)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn rotation_parse_rejects_unknown_angle() {
        assert!(Rotation::parse("ROTATION_ANGLE_90").is_ok());
        let err = Rotation::parse("ROTATION_ANGLE_45").unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }

    #[test]
    fn rotation_round_trips_wire_form() {
        for angle in [
            Rotation::Deg0,
            Rotation::Deg90,
            Rotation::Deg180,
            Rotation::Deg270,
        ] {
            assert_eq!(Rotation::parse(angle.as_str()).unwrap(), angle);
        }
    }

    #[test]
    fn subscribers_deliver_in_registration_order() {
        let subscribers = Subscribers::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            let counter = counter.clone();
            subscribers.subscribe(Box::new(move |_| {
                order
                    .lock()
                    .unwrap()
                    .push((tag, counter.fetch_add(1, Ordering::SeqCst)));
            }));
        }
        subscribers.notify(&Notification::Isp(IspDelta {
            three_a_updated: true,
        }));
        let seen = order.lock().unwrap();
        assert_eq!(
            *seen,
            vec![("first", 0), ("second", 1), ("third", 2)]
        );
    }
}
