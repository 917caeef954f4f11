//! Notification dispatch against the live element graph
//!
//! The controller is the one subscriber shared by every resource. Each
//! notification kind maps to a fixed action: a property write, a blender
//! operation, an element state cycle or a full pipeline rebuild. Failed
//! transitions are logged and left to the next mutation; they never
//! unwind into the caller that mutated the resource.

use std::sync::{Arc, Weak};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::constants::{elements, properties};
use crate::error::{Error, Result};
use crate::pipeline::{ElementState, MediaBackend, OverlayBlender, PropertyValue};
use crate::resource::{
    AiApplication, AiDelta, EncoderControl, FrontendState, IspDelta, MaskDelta, Notification,
    OsdDelta, OsdUpsert, Repository, Resource,
};

pub struct PipelineController {
    repository: Arc<Repository>,
    backend: Arc<dyn MediaBackend>,
}

impl PipelineController {
    /// Build the controller and register it on every resource. The
    /// subscriptions hold a weak reference so resources never keep the
    /// controller alive.
    pub fn attach(repository: Arc<Repository>, backend: Arc<dyn MediaBackend>) -> Arc<Self> {
        let controller = Arc::new(Self {
            repository,
            backend,
        });
        for resource in controller.repository.all() {
            let weak: Weak<PipelineController> = Arc::downgrade(&controller);
            resource.subscribe(Box::new(move |notification| {
                if let Some(controller) = weak.upgrade() {
                    controller.handle(notification);
                }
            }));
        }
        controller
    }

    /// Bring the pipeline up and push the full current configuration
    /// into it.
    pub fn start(&self) -> Result<()> {
        self.backend.start()?;
        self.push_configuration()?;
        self.repository.privacy_mask().reenable_masks();
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.backend.stop()
    }

    fn handle(&self, notification: &Notification) {
        debug!(resource = notification.kind().name(), "Dispatching notification");
        let outcome = match notification {
            Notification::Frontend(state) => self.handle_frontend(state),
            // The stream-geometry report is consumed by dependent
            // resources; the element graph itself has nothing to do.
            Notification::StreamGeometry(_) => Ok(()),
            Notification::Restart(_) => self.handle_restart(),
            Notification::Osd(delta) => self.handle_osd(delta),
            Notification::EncoderApply(control) => self.apply_encoder(control),
            Notification::EncoderReset(control) => self.handle_encoder_reset(control),
            Notification::Ai(delta) => self.handle_ai(delta),
            Notification::PrivacyMask(delta) => self.handle_privacy_mask(delta),
            Notification::Isp(delta) => self.handle_isp(delta),
        };
        if let Err(e) = outcome {
            error!(resource = notification.kind().name(), "Pipeline action failed: {e}");
        }
    }

    fn handle_frontend(&self, state: &FrontendState) -> Result<()> {
        if state.freeze_changed {
            self.backend.set_property(
                elements::FRONTEND,
                properties::FREEZE,
                PropertyValue::Bool(state.freeze),
            )?;
        }
        self.backend.set_property(
            elements::FRONTEND,
            properties::CONFIG_STRING,
            PropertyValue::Str(state.config.clone()),
        )
    }

    /// Full rebuild: stop, drop viewers, start, re-push configuration,
    /// then bring derived state back to a known baseline.
    fn handle_restart(&self) -> Result<()> {
        info!("Restarting pipeline");
        self.backend
            .stop()
            .map_err(|e| Error::PipelineTransitionFailed(format!("stop: {e}")))?;
        self.backend.close_transport_sessions();
        self.backend
            .start()
            .map_err(|e| Error::PipelineTransitionFailed(format!("start: {e}")))?;
        self.push_configuration()?;
        self.repository.privacy_mask().reenable_masks();
        self.repository.ai().set_detection_enabled(false);
        for resource in self.repository.functional() {
            resource.init();
        }
        Ok(())
    }

    fn handle_osd(&self, delta: &OsdDelta) -> Result<()> {
        let blender = self.backend.overlay_blender();
        for id in &delta.overlays_to_delete {
            info!(id = %id, "Removing overlay");
            blender.remove_overlay(id)?;
        }
        upsert_overlays(&*blender, &delta.text, |o| &o.id)?;
        upsert_overlays(&*blender, &delta.image, |o| &o.id)?;
        upsert_overlays(&*blender, &delta.datetime, |o| &o.id)?;
        upsert_overlays(&*blender, &delta.autofocus, |o| &o.id)?;
        Ok(())
    }

    fn apply_encoder(&self, control: &EncoderControl) -> Result<()> {
        self.backend.set_property(
            elements::ENCODER,
            properties::USER_CONFIG,
            PropertyValue::Str(encoder_user_config(control)),
        )
    }

    /// Cycle just the encoder element; the rest of the graph keeps
    /// running.
    fn handle_encoder_reset(&self, control: &EncoderControl) -> Result<()> {
        if let Err(e) = self.backend.set_state(elements::ENCODER, ElementState::Null) {
            error!("Failed to stop encoder: {e}");
        }
        self.apply_encoder(control)?;
        self.backend
            .set_state(elements::ENCODER, ElementState::Playing)
            .map_err(|e| Error::PipelineTransitionFailed(format!("encoder start: {e}")))
    }

    /// Only the detection application maps to a live element; denoise
    /// reconfiguration travels through the frontend restart path.
    fn handle_ai(&self, delta: &AiDelta) -> Result<()> {
        if delta.disabled.contains(&AiApplication::Detection) {
            debug!("Disabling detection");
            self.backend.set_property(
                elements::DETECTION,
                properties::PASS_THROUGH,
                PropertyValue::Bool(true),
            )
        } else if delta.enabled.contains(&AiApplication::Detection) {
            debug!("Enabling detection");
            self.backend.set_property(
                elements::DETECTION,
                properties::PASS_THROUGH,
                PropertyValue::Bool(false),
            )
        } else {
            Ok(())
        }
    }

    fn handle_privacy_mask(&self, delta: &MaskDelta) -> Result<()> {
        let blender = self.backend.mask_blender();
        for polygon in &delta.polygon_to_update {
            debug!(id = %polygon.id, "Updating privacy mask");
            blender.set_mask(polygon)?;
        }
        for id in delta.changed_to_disabled.iter().chain(&delta.polygon_to_delete) {
            debug!(id = %id, "Removing privacy mask");
            blender.remove_mask(id)?;
        }
        Ok(())
    }

    /// Narrower than a restart: cycle only the frontend element with the
    /// updated configuration, keeping viewer sessions alive.
    fn handle_isp(&self, delta: &IspDelta) -> Result<()> {
        info!(
            three_a = delta.three_a_updated,
            "ISP configuration changed, cycling frontend element"
        );
        if let Err(e) = self.backend.set_state(elements::FRONTEND, ElementState::Null) {
            error!("Failed to stop frontend: {e}");
        }
        self.push_frontend_config()?;
        self.backend
            .set_state(elements::FRONTEND, ElementState::Playing)
            .map_err(|e| Error::PipelineTransitionFailed(format!("frontend start: {e}")))
    }

    fn push_frontend_config(&self) -> Result<()> {
        self.backend.set_property(
            elements::FRONTEND,
            properties::CONFIG_STRING,
            PropertyValue::Str(self.repository.frontend().read().to_string()),
        )
    }

    fn push_configuration(&self) -> Result<()> {
        self.push_frontend_config()?;
        self.apply_encoder(&self.repository.encoder().control())?;
        let osd = json!({"osd": self.repository.osd().encoder_osd_config()});
        self.backend.set_property(
            elements::ENCODER,
            properties::CONFIG_STRING,
            PropertyValue::Str(osd.to_string()),
        )?;
        let detection_enabled = self
            .repository
            .ai()
            .enabled_applications()
            .contains(&AiApplication::Detection);
        self.backend.set_property(
            elements::DETECTION,
            properties::PASS_THROUGH,
            PropertyValue::Bool(!detection_enabled),
        )
    }
}

fn encoder_user_config(control: &EncoderControl) -> String {
    json!({
        "rate_control": {
            "rc_mode": control.rc_mode.as_str(),
            "bitrate": control.bitrate,
        },
        "input_stream": {
            "width": control.width,
            "height": control.height,
            "framerate": control.framerate,
        },
    })
    .to_string()
}

fn upsert_overlays<T: Serialize>(
    blender: &dyn OverlayBlender,
    upserts: &[OsdUpsert<T>],
    id_of: impl Fn(&T) -> &str,
) -> Result<()> {
    for upsert in upserts {
        let id = id_of(&upsert.overlay);
        let value = overlay_value(&upsert.overlay)?;
        if !blender.has_overlay(id) {
            info!(id, "Adding overlay");
            blender.add_overlay(id, value)?;
            continue;
        }
        blender.set_overlay_enabled(id, upsert.enabled)?;
        if upsert.enabled {
            blender.update_overlay(id, value)?;
        }
    }
    Ok(())
}

fn overlay_value<T: Serialize>(overlay: &T) -> Result<Value> {
    serde_json::to_value(overlay).map_err(|e| Error::invalid(format!("overlay: {e}")))
}
