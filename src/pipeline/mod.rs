//! Live pipeline abstraction
//!
//! The controller talks to the element graph through [`MediaBackend`]:
//! named elements with settable properties and state transitions, plus
//! two blender handles (overlays and privacy masks) keyed by id. The
//! in-memory [`SimBackend`] records every action and backs both the
//! development build and the tests.

mod controller;

pub use controller::PipelineController;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::Polygon;

/// Value of a live element property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Null,
    Playing,
}

/// Overlay blender handle. Additions and updates are asynchronous on
/// real hardware; absence of an id means "not yet created".
pub trait OverlayBlender: Send + Sync {
    fn has_overlay(&self, id: &str) -> bool;
    fn add_overlay(&self, id: &str, overlay: Value) -> Result<()>;
    fn update_overlay(&self, id: &str, overlay: Value) -> Result<()>;
    fn set_overlay_enabled(&self, id: &str, enabled: bool) -> Result<()>;
    fn remove_overlay(&self, id: &str) -> Result<()>;
}

/// Privacy mask blender handle.
pub trait MaskBlender: Send + Sync {
    fn set_mask(&self, polygon: &Polygon) -> Result<()>;
    fn remove_mask(&self, id: &str) -> Result<()>;
}

/// The element graph the controller drives.
pub trait MediaBackend: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;

    /// Tear down any active streaming sessions (viewers reconnect after
    /// a restart).
    fn close_transport_sessions(&self);

    fn set_property(&self, element: &str, property: &str, value: PropertyValue) -> Result<()>;
    fn set_state(&self, element: &str, state: ElementState) -> Result<()>;

    fn overlay_blender(&self) -> Arc<dyn OverlayBlender>;
    fn mask_blender(&self) -> Arc<dyn MaskBlender>;
}

/// In-memory element graph. Properties, element states and blender
/// contents are plain maps; tests assert against them directly.
#[derive(Default)]
pub struct SimBackend {
    state: Mutex<SimState>,
    overlays: Arc<SimOverlayBlender>,
    masks: Arc<SimMaskBlender>,
}

#[derive(Default)]
struct SimState {
    running: bool,
    restarts: u32,
    sessions_closed: u32,
    properties: BTreeMap<(String, String), PropertyValue>,
    element_states: BTreeMap<String, ElementState>,
}

impl SimBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().expect("sim state poisoned").running
    }

    pub fn restarts(&self) -> u32 {
        self.state.lock().expect("sim state poisoned").restarts
    }

    pub fn sessions_closed(&self) -> u32 {
        self.state.lock().expect("sim state poisoned").sessions_closed
    }

    pub fn property(&self, element: &str, property: &str) -> Option<PropertyValue> {
        self.state
            .lock()
            .expect("sim state poisoned")
            .properties
            .get(&(element.to_owned(), property.to_owned()))
            .cloned()
    }

    pub fn element_state(&self, element: &str) -> Option<ElementState> {
        self.state
            .lock()
            .expect("sim state poisoned")
            .element_states
            .get(element)
            .copied()
    }

    pub fn overlays(&self) -> &SimOverlayBlender {
        &self.overlays
    }

    pub fn masks(&self) -> &SimMaskBlender {
        &self.masks
    }
}

impl MediaBackend for SimBackend {
    fn start(&self) -> Result<()> {
        let mut state = self.state.lock().expect("sim state poisoned");
        state.running = true;
        state.restarts += 1;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.state.lock().expect("sim state poisoned").running = false;
        Ok(())
    }

    fn close_transport_sessions(&self) {
        self.state.lock().expect("sim state poisoned").sessions_closed += 1;
    }

    fn set_property(&self, element: &str, property: &str, value: PropertyValue) -> Result<()> {
        debug!(element, property, "set_property");
        self.state
            .lock()
            .expect("sim state poisoned")
            .properties
            .insert((element.to_owned(), property.to_owned()), value);
        Ok(())
    }

    fn set_state(&self, element: &str, state: ElementState) -> Result<()> {
        self.state
            .lock()
            .expect("sim state poisoned")
            .element_states
            .insert(element.to_owned(), state);
        Ok(())
    }

    fn overlay_blender(&self) -> Arc<dyn OverlayBlender> {
        self.overlays.clone()
    }

    fn mask_blender(&self) -> Arc<dyn MaskBlender> {
        self.masks.clone()
    }
}

#[derive(Default)]
pub struct SimOverlayBlender {
    overlays: Mutex<BTreeMap<String, (bool, Value)>>,
}

impl SimOverlayBlender {
    pub fn ids(&self) -> Vec<String> {
        self.overlays
            .lock()
            .expect("overlay blender poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn enabled(&self, id: &str) -> Option<bool> {
        self.overlays
            .lock()
            .expect("overlay blender poisoned")
            .get(id)
            .map(|(enabled, _)| *enabled)
    }

    pub fn value(&self, id: &str) -> Option<Value> {
        self.overlays
            .lock()
            .expect("overlay blender poisoned")
            .get(id)
            .map(|(_, value)| value.clone())
    }
}

impl OverlayBlender for SimOverlayBlender {
    fn has_overlay(&self, id: &str) -> bool {
        self.overlays
            .lock()
            .expect("overlay blender poisoned")
            .contains_key(id)
    }

    fn add_overlay(&self, id: &str, overlay: Value) -> Result<()> {
        self.overlays
            .lock()
            .expect("overlay blender poisoned")
            .insert(id.to_owned(), (true, overlay));
        Ok(())
    }

    fn update_overlay(&self, id: &str, overlay: Value) -> Result<()> {
        let mut overlays = self.overlays.lock().expect("overlay blender poisoned");
        match overlays.get_mut(id) {
            Some(entry) => {
                entry.1 = overlay;
                Ok(())
            }
            None => Err(Error::PipelineTransitionFailed(format!(
                "update of unknown overlay '{id}'"
            ))),
        }
    }

    fn set_overlay_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut overlays = self.overlays.lock().expect("overlay blender poisoned");
        match overlays.get_mut(id) {
            Some(entry) => {
                entry.0 = enabled;
                Ok(())
            }
            None => Err(Error::PipelineTransitionFailed(format!(
                "enable of unknown overlay '{id}'"
            ))),
        }
    }

    fn remove_overlay(&self, id: &str) -> Result<()> {
        self.overlays
            .lock()
            .expect("overlay blender poisoned")
            .remove(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct SimMaskBlender {
    masks: Mutex<BTreeMap<String, Polygon>>,
}

impl SimMaskBlender {
    pub fn ids(&self) -> Vec<String> {
        self.masks
            .lock()
            .expect("mask blender poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn polygon(&self, id: &str) -> Option<Polygon> {
        self.masks
            .lock()
            .expect("mask blender poisoned")
            .get(id)
            .cloned()
    }
}

impl MaskBlender for SimMaskBlender {
    fn set_mask(&self, polygon: &Polygon) -> Result<()> {
        self.masks
            .lock()
            .expect("mask blender poisoned")
            .insert(polygon.id.clone(), polygon.clone());
        Ok(())
    }

    fn remove_mask(&self, id: &str) -> Result<()> {
        self.masks.lock().expect("mask blender poisoned").remove(id);
        Ok(())
    }
}
