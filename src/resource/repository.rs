//! Resource repository: construction order and dependency wiring
//!
//! Resources are built in dependency order, then wired to each other
//! through the same subscription mechanism external consumers use. The
//! repository is the only place that knows the concrete resource types;
//! everything downstream works through [`Resource`] and [`ResourceKind`].

use std::sync::Arc;

use crate::error::Result;
use crate::resource::defaults::ConfigResource;
use crate::resource::{
    AiResource, Behavior, Defaults, EncoderResource, FrontendResource, IspResource, Notification,
    OsdResource, PrivacyMaskResource, Resource, ResourceKind,
};

pub struct Repository {
    config: Arc<ConfigResource>,
    osd: Arc<OsdResource>,
    ai: Arc<AiResource>,
    isp: Arc<IspResource>,
    frontend: Arc<FrontendResource>,
    encoder: Arc<EncoderResource>,
    privacy_mask: Arc<PrivacyMaskResource>,
}

impl Repository {
    /// Build every resource and wire the inter-resource subscriptions:
    /// ISP follows AI tuning changes, encoder and privacy masks follow
    /// frontend stream geometry.
    pub fn build(defaults: &Defaults) -> Result<Self> {
        let config = Arc::new(ConfigResource::new(defaults));
        let osd = Arc::new(OsdResource::new(defaults)?);
        let ai = Arc::new(AiResource::new(defaults)?);
        let isp = Arc::new(IspResource::new(defaults));

        {
            let isp = isp.clone();
            ai.subscribe(Box::new(move |notification| {
                if let Notification::Ai(delta) = notification {
                    isp.handle_ai_change(delta);
                }
            }));
        }

        let frontend = Arc::new(FrontendResource::new(defaults, ai.clone(), isp.clone())?);
        let encoder = Arc::new(EncoderResource::new(defaults)?);

        {
            let encoder = encoder.clone();
            frontend.subscribe(Box::new(move |notification| {
                if let Notification::StreamGeometry(geometry) = notification {
                    encoder.handle_stream_geometry(geometry);
                }
            }));
        }

        let privacy_mask = Arc::new(PrivacyMaskResource::new(&frontend.stream_geometry()));

        {
            let privacy_mask = privacy_mask.clone();
            frontend.subscribe(Box::new(move |notification| {
                if let Notification::StreamGeometry(geometry) = notification {
                    privacy_mask.handle_stream_geometry(geometry);
                }
            }));
        }

        Ok(Self {
            config,
            osd,
            ai,
            isp,
            frontend,
            encoder,
            privacy_mask,
        })
    }

    /// Type-erased lookup.
    pub fn get(&self, kind: ResourceKind) -> Arc<dyn Resource> {
        match kind {
            ResourceKind::Config => self.config.clone(),
            ResourceKind::Osd => self.osd.clone(),
            ResourceKind::Ai => self.ai.clone(),
            ResourceKind::Isp => self.isp.clone(),
            ResourceKind::Frontend => self.frontend.clone(),
            ResourceKind::Encoder => self.encoder.clone(),
            ResourceKind::PrivacyMask => self.privacy_mask.clone(),
        }
    }

    /// Every resource, in construction (dependency) order.
    pub fn all(&self) -> Vec<Arc<dyn Resource>> {
        ResourceKind::ALL.iter().map(|&kind| self.get(kind)).collect()
    }

    /// The hardware-touching resources, re-initialized after a restart.
    pub fn functional(&self) -> Vec<Arc<dyn Resource>> {
        self.all()
            .into_iter()
            .filter(|resource| resource.behavior() == Behavior::Functional)
            .collect()
    }

    pub fn ai(&self) -> &Arc<AiResource> {
        &self.ai
    }

    pub fn osd(&self) -> &Arc<OsdResource> {
        &self.osd
    }

    pub fn isp(&self) -> &Arc<IspResource> {
        &self.isp
    }

    pub fn frontend(&self) -> &Arc<FrontendResource> {
        &self.frontend
    }

    pub fn encoder(&self) -> &Arc<EncoderResource> {
        &self.encoder
    }

    pub fn privacy_mask(&self) -> &Arc<PrivacyMaskResource> {
        &self.privacy_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repository() -> Repository {
        Repository::build(&Defaults::builtin()).unwrap()
    }

    #[test]
    fn lookup_covers_every_kind() {
        let repository = repository();
        for &kind in ResourceKind::ALL {
            assert_eq!(repository.get(kind).kind(), kind);
        }
    }

    #[test]
    fn isp_follows_ai_tuning() {
        let repository = repository();
        repository
            .get(ResourceKind::Ai)
            .apply_patch(json!({"denoise": {"enabled": true}}))
            .unwrap();
        let tuning = repository.isp().read();
        assert_eq!(tuning["tuning"]["profile"], json!("Denoise"));
    }

    #[test]
    fn encoder_follows_frontend_rotation() {
        let repository = repository();
        repository
            .get(ResourceKind::Frontend)
            .apply_patch(json!({"rotation": {"enabled": true, "angle": "ROTATION_ANGLE_90"}}))
            .unwrap();
        let control = repository.encoder().control();
        assert_eq!((control.width, control.height), (2160, 3840));
    }

    #[test]
    fn privacy_masks_follow_frontend_rotation() {
        let repository = repository();
        repository
            .privacy_mask()
            .apply_patch(json!({"masks": [
                {"id": "m", "enabled": true, "vertices": [{"x": 10, "y": 20}]}
            ]}))
            .unwrap();
        repository
            .get(ResourceKind::Frontend)
            .apply_patch(json!({"rotation": {"enabled": true, "angle": "ROTATION_ANGLE_90"}}))
            .unwrap();
        let masks = repository.privacy_mask().masks();
        assert_eq!(masks["m"].vertices[0].x, 2140);
    }

    #[test]
    fn functional_resources_subset() {
        let repository = repository();
        let kinds: Vec<ResourceKind> = repository
            .functional()
            .iter()
            .map(|resource| resource.kind())
            .collect();
        assert!(kinds.contains(&ResourceKind::Isp));
        assert!(!kinds.contains(&ResourceKind::Config));
    }
}
