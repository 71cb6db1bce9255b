// Recording modules

pub mod controller;
pub mod frame_buffer;
pub mod schema;
pub mod timestamp;
pub mod tracking;

pub use controller::{IngestOutcome, SampleOutcome, SessionController};
pub use frame_buffer::FrameBuffer;
pub use schema::ChannelSchema;
pub use timestamp::{Timestamp, TimestampIndex};
pub use tracking::{FaceGeometry, TrackingUpdate, VideoFrame};

use serde::{Deserialize, Serialize};

use crate::encoding::EncoderError;
use crate::session::StorageError;

/// Current recording status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    /// Ready to record
    Idle,
    /// Encoder is being created; producers still see this as idle
    Starting,
    /// Currently recording
    Recording,
}

impl RecordingStatus {
    pub fn is_recording(&self) -> bool {
        *self == RecordingStatus::Recording
    }

    /// Check if the system is ready to start recording
    pub fn can_start_recording(&self) -> bool {
        *self == RecordingStatus::Idle
    }
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Error type for recording operations
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Tracking result is missing channel '{0}'")]
    MissingChannel(String),

    #[error("Duplicate channel '{0}' in schema")]
    DuplicateChannel(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecordingError>;
