// Video encoding seam
//
// The session controller only talks to encoders through the traits in this
// module. The GStreamer-backed implementation lives in `encoder.rs` and is
// compiled with the `gstreamer` feature. To add a new codec:
// 1. Add variant to VideoCodec enum
// 2. Add container mapping in container()
// 3. Add encoder element names in encoder.rs

#[cfg(feature = "gstreamer")]
pub mod encoder;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

#[cfg(feature = "gstreamer")]
pub use encoder::{AsyncVideoEncoder, GstEncoderFactory, HardwareEncoderType};

/// Error type for encoder operations
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("Encoder not available: {0}")]
    NotAvailable(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Encoder not ready after {0:?}")]
    NotReady(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EncoderError>;

/// Supported video codecs for recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264/AVC - widely supported, good compression
    H264,
    /// H.265/HEVC - better compression than H.264
    H265,
}

impl VideoCodec {
    /// Get the appropriate container format for this codec
    pub fn container(&self) -> ContainerFormat {
        match self {
            VideoCodec::H264 => ContainerFormat::Mp4,
            VideoCodec::H265 => ContainerFormat::Mp4,
        }
    }

    /// Get the GStreamer parser element name for this codec
    pub fn gst_parser(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264parse",
            VideoCodec::H265 => "h265parse",
        }
    }

    /// Human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H.264",
            VideoCodec::H265 => "H.265",
        }
    }
}

impl Default for VideoCodec {
    fn default() -> Self {
        Self::H264
    }
}

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// MP4 (.mp4) - widely compatible, good for H.264/H.265
    Mp4,
}

impl ContainerFormat {
    /// Get the file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
        }
    }

    /// Get the GStreamer muxer element name
    pub fn gst_muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4mux",
        }
    }
}

/// Configuration for video encoding
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Target codec for encoding
    pub codec: VideoCodec,
    /// Target bitrate in bits per second (0 = automatic)
    pub bitrate: u32,
    /// Keyframe interval in frames (0 = automatic)
    pub keyframe_interval: u32,
    /// Maximum frames buffered ahead of the encoder before frames are dropped
    pub queue_depth: usize,
    /// Nominal capture rate, used for caps and frame durations
    pub framerate: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            bitrate: 0,
            keyframe_interval: 60, // Every second at 60fps
            queue_depth: 60,
            framerate: 60,
        }
    }
}

/// A raw video frame ready to hand to an encoder
#[derive(Clone)]
pub struct RawVideoFrame {
    /// Raw pixel data (typically NV12)
    pub data: Vec<u8>,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
    /// Duration in nanoseconds (0 = unknown)
    pub duration: u64,
    pub width: u32,
    pub height: u32,
    /// Pixel format (GStreamer format string, e.g., "NV12", "I420", "BGRA")
    pub format: String,
}

impl std::fmt::Debug for RawVideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawVideoFrame")
            .field("bytes", &self.data.len())
            .field("pts", &self.pts)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// Statistics from a finished encoding session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub frames_dropped: u64,
    pub bytes_written: u64,
    pub encoding_duration: Duration,
}

/// Parameters for one session's encoder
#[derive(Debug, Clone)]
pub struct EncoderSettings<'a> {
    pub output_path: &'a Path,
    pub width: u32,
    pub height: u32,
    pub pixel_format: &'a str,
}

/// Creates one encoder per recording session
pub trait EncoderFactory: Send + Sync {
    /// Container the encoder writes, used to name the output file
    fn container(&self) -> ContainerFormat;

    /// Create the encoder and its output file. The encoder may not be ready
    /// to accept frames when this returns; see [`SessionEncoder::is_ready`].
    fn create(&self, settings: EncoderSettings<'_>) -> Result<Box<dyn SessionEncoder>>;
}

/// A live encoder bound to a single output file
pub trait SessionEncoder: Send {
    /// True once the encoder can accept frames
    fn is_ready(&self) -> bool;

    /// Hand a frame to the encoder. Must not block; called with the session
    /// lock held. Returns `Ok(false)` if the frame was dropped for
    /// backpressure.
    fn append(&mut self, frame: RawVideoFrame) -> Result<bool>;

    /// Signal end of stream. Finalization continues in the background;
    /// the returned handle resolves when the file is complete.
    fn finish(self: Box<Self>) -> FinalizeHandle;
}

/// Poll an encoder until it reports ready, bounded by `timeout`.
///
/// Blocks the calling thread; never call with the session lock held.
pub fn wait_until_ready(
    encoder: &dyn SessionEncoder,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if encoder.is_ready() {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(EncoderError::NotReady(timeout));
        }
        std::thread::sleep(poll_interval.min(deadline - now));
    }
}

/// Sending half of a [`FinalizeHandle`], owned by the encoder
pub struct FinalizeNotifier {
    tx: oneshot::Sender<Result<EncoderStats>>,
}

impl FinalizeNotifier {
    pub fn complete(self, result: Result<EncoderStats>) {
        // Receiver may have been dropped by a caller that didn't care
        let _ = self.tx.send(result);
    }
}

/// Completion of an encoder's finalize step.
///
/// Await it from async code, or call [`FinalizeHandle::wait`] from a plain
/// thread. Dropping it does not cancel finalization.
pub struct FinalizeHandle {
    rx: oneshot::Receiver<Result<EncoderStats>>,
}

impl FinalizeHandle {
    pub fn channel() -> (FinalizeNotifier, FinalizeHandle) {
        let (tx, rx) = oneshot::channel();
        (FinalizeNotifier { tx }, FinalizeHandle { rx })
    }

    /// A handle that is already resolved
    pub fn resolved(result: Result<EncoderStats>) -> Self {
        let (notifier, handle) = Self::channel();
        notifier.complete(result);
        handle
    }

    /// Block until finalization completes.
    ///
    /// Panics if called from within an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(self) -> Result<EncoderStats> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(notifier_dropped()))
    }

    /// Non-blocking check. Returns `None` while the encoder is still flushing.
    pub fn try_result(&mut self) -> Option<Result<EncoderStats>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(notifier_dropped())),
        }
    }
}

impl Future for FinalizeHandle {
    type Output = Result<EncoderStats>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(notifier_dropped())))
    }
}

impl std::fmt::Debug for FinalizeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizeHandle").finish_non_exhaustive()
    }
}

fn notifier_dropped() -> EncoderError {
    EncoderError::Channel("Encoder exited without reporting a result".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SlowStart {
        polls: Arc<AtomicUsize>,
        ready_after: usize,
    }

    impl SessionEncoder for SlowStart {
        fn is_ready(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst) + 1 >= self.ready_after
        }

        fn append(&mut self, _frame: RawVideoFrame) -> Result<bool> {
            Ok(true)
        }

        fn finish(self: Box<Self>) -> FinalizeHandle {
            FinalizeHandle::resolved(Ok(EncoderStats::default()))
        }
    }

    #[test]
    fn readiness_wait_polls_until_ready() {
        let polls = Arc::new(AtomicUsize::new(0));
        let enc = SlowStart { polls: polls.clone(), ready_after: 3 };
        wait_until_ready(&enc, Duration::from_millis(1), Duration::from_secs(5)).unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn readiness_wait_times_out() {
        let enc = SlowStart { polls: Arc::new(AtomicUsize::new(0)), ready_after: usize::MAX };
        let started = Instant::now();
        let err = wait_until_ready(&enc, Duration::from_millis(5), Duration::from_millis(30))
            .unwrap_err();
        assert!(matches!(err, EncoderError::NotReady(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn finalize_handle_blocking_wait() {
        let (notifier, handle) = FinalizeHandle::channel();
        std::thread::spawn(move || {
            notifier.complete(Ok(EncoderStats { frames_encoded: 7, ..Default::default() }));
        });
        assert_eq!(handle.wait().unwrap().frames_encoded, 7);
    }

    #[test]
    fn finalize_handle_reports_dropped_notifier() {
        let (notifier, mut handle) = FinalizeHandle::channel();
        assert!(handle.try_result().is_none());
        drop(notifier);
        assert!(matches!(handle.try_result(), Some(Err(EncoderError::Channel(_)))));
    }

    #[tokio::test]
    async fn finalize_handle_is_a_future() {
        let (notifier, handle) = FinalizeHandle::channel();
        tokio::spawn(async move {
            notifier.complete(Ok(EncoderStats { frames_encoded: 2, ..Default::default() }));
        });
        assert_eq!(handle.await.unwrap().frames_encoded, 2);
    }

    #[test]
    fn h264_lands_in_mp4() {
        assert_eq!(VideoCodec::H264.container().extension(), "mp4");
        assert_eq!(VideoCodec::default(), VideoCodec::H264);
    }
}
