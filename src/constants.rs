//! Application-wide constants
//!
//! Fixed base directories, element names and protocol limits used across
//! the resource core and the pipeline controller.

/// Control socket constants
pub mod control {
    /// Directory under the runtime dir holding the control socket
    pub const APP_DIR: &str = "camctl";

    /// Control socket file name
    pub const SOCKET_NAME: &str = "control.sock";

    /// Maximum control message size (10 MB) to prevent unbounded allocation
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
}

/// On-disk locations for overlay assets and inference networks
pub mod paths {
    /// Base directory for OSD overlay images (stored paths are absolute)
    pub const OSD_IMAGE_DIR: &str = "/usr/share/camctl/overlays/";

    /// Base directory for OSD fonts
    pub const OSD_FONT_DIR: &str = "/usr/share/fonts/ttf/";

    /// Directory holding the denoising network files
    pub const DENOISE_NETWORK_DIR: &str = "/usr/lib/camctl/denoise/";

    /// Default directory for resource default documents
    pub const DEFAULTS_DIR: &str = "/etc/camctl/defaults";
}

/// Denoising network file names, one per symbolic size
pub mod denoise {
    pub const SMALL_NETWORK_FILE: &str = "vd_small.hef";
    pub const MEDIUM_NETWORK_FILE: &str = "vd_medium.hef";
    pub const LARGE_NETWORK_FILE: &str = "vd_large.hef";
}

/// Names of the addressable elements in the live pipeline graph
pub mod elements {
    /// Capture/frontend bin (owns freeze, config-string and the mask blender)
    pub const FRONTEND: &str = "frontend";

    /// Inference element (owns the pass-through flag)
    pub const DETECTION: &str = "detection";

    /// Encoder bin (owns user-config and the overlay blender)
    pub const ENCODER: &str = "enc";
}

/// Live element property names
pub mod properties {
    pub const FREEZE: &str = "freeze";
    pub const CONFIG_STRING: &str = "config-string";
    pub const PASS_THROUGH: &str = "pass-through";
    pub const USER_CONFIG: &str = "user-config";
}
