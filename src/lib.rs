// Facecap - synchronized face video and blend-shape telemetry recorder
// Main library entry point

pub mod cli;
pub mod config;
pub mod encoding;
#[cfg(feature = "gstreamer")]
pub mod gstreamer_init;
pub mod recording;
pub mod session;

pub use config::Config;
pub use recording::{
    ChannelSchema, IngestOutcome, RecordingError, RecordingStatus, SampleOutcome,
    SessionController, Timestamp, TrackingUpdate, VideoFrame,
};
pub use session::{SessionInfo, StopReport, TelemetryDocument};
