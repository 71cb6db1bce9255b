//! GStreamer initialization
//!
//! GStreamer must be initialized once per process before any element is
//! created. Encoder factories call [`init_gstreamer_env`] themselves.

use std::sync::Once;

static GSTREAMER_INIT: Once = Once::new();

/// Initialize GStreamer (idempotent)
pub fn init_gstreamer_env() {
    GSTREAMER_INIT.call_once(|| match gstreamer::init() {
        Ok(_) => {
            log::info!("GStreamer initialized successfully");
            log_gstreamer_version();
        }
        Err(e) => {
            log::error!("Failed to initialize GStreamer: {}", e);
            log::error!("Video encoding will not be available");
        }
    });
}

fn log_gstreamer_version() {
    let (major, minor, micro, nano) = gstreamer::version();
    let nano_str = match nano {
        0 => String::new(),
        1 => " (CVS)".to_string(),
        2 => " (prerelease)".to_string(),
        _ => format!(" (nano: {})", nano),
    };
    log::info!("GStreamer version: {}.{}.{}{}", major, minor, micro, nano_str);
}

/// Check if GStreamer is available and properly configured
pub fn is_gstreamer_available() -> bool {
    gstreamer::init().is_ok()
}
