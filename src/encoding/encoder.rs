//! GStreamer-backed session encoder
//!
//! Encodes raw camera frames to H.264/H.265 in an MP4 container on a
//! background thread.
//!
//! ## Design Goals
//! - Non-blocking `append` so the capture path never waits on the encoder
//! - Readiness is reported once the pipeline reaches PLAYING
//! - Finalization (EOS + muxer flush) runs after `finish` returns, with the
//!   result delivered through a [`FinalizeHandle`]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{
    ContainerFormat, EncoderConfig, EncoderError, EncoderFactory, EncoderSettings, EncoderStats,
    FinalizeHandle, FinalizeNotifier, RawVideoFrame, Result, SessionEncoder, VideoCodec,
};

/// Orientation written into the container; sensor frames are landscape
/// and the recording is meant to be viewed rotated by a quarter turn.
const OUTPUT_ORIENTATION: &str = "rotate-90";

/// Type of hardware encoder available
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HardwareEncoderType {
    /// NVIDIA NVENC
    Nvenc,
    /// AMD AMF
    Amf,
    /// Intel QuickSync
    Qsv,
    /// VA-API (Linux)
    VaApi,
    /// Apple VideoToolbox
    VideoToolbox,
    /// Software fallback
    Software,
}

impl HardwareEncoderType {
    const SEARCH_ORDER: [HardwareEncoderType; 6] = [
        HardwareEncoderType::Nvenc,
        HardwareEncoderType::Amf,
        HardwareEncoderType::Qsv,
        HardwareEncoderType::VaApi,
        HardwareEncoderType::VideoToolbox,
        HardwareEncoderType::Software,
    ];

    /// Get the GStreamer element name for the given codec
    pub fn encoder_element(&self, codec: VideoCodec) -> &'static str {
        match (self, codec) {
            (HardwareEncoderType::Nvenc, VideoCodec::H264) => "nvh264enc",
            (HardwareEncoderType::Nvenc, VideoCodec::H265) => "nvh265enc",
            (HardwareEncoderType::Amf, VideoCodec::H264) => "amfh264enc",
            (HardwareEncoderType::Amf, VideoCodec::H265) => "amfh265enc",
            (HardwareEncoderType::Qsv, VideoCodec::H264) => "qsvh264enc",
            (HardwareEncoderType::Qsv, VideoCodec::H265) => "qsvh265enc",
            (HardwareEncoderType::VaApi, VideoCodec::H264) => "vah264enc",
            (HardwareEncoderType::VaApi, VideoCodec::H265) => "vah265enc",
            (HardwareEncoderType::VideoToolbox, VideoCodec::H264) => "vtenc_h264",
            (HardwareEncoderType::VideoToolbox, VideoCodec::H265) => "vtenc_h265",
            (HardwareEncoderType::Software, VideoCodec::H264) => "x264enc",
            (HardwareEncoderType::Software, VideoCodec::H265) => "x265enc",
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            HardwareEncoderType::Nvenc => "NVIDIA NVENC",
            HardwareEncoderType::Amf => "AMD AMF",
            HardwareEncoderType::Qsv => "Intel QuickSync",
            HardwareEncoderType::VaApi => "VA-API",
            HardwareEncoderType::VideoToolbox => "VideoToolbox",
            HardwareEncoderType::Software => "Software",
        }
    }
}

/// Detect the best available encoder for a codec
pub fn detect_best_encoder(codec: VideoCodec) -> HardwareEncoderType {
    HardwareEncoderType::SEARCH_ORDER
        .iter()
        .copied()
        .find(|hw| gst::ElementFactory::find(hw.encoder_element(codec)).is_some())
        .unwrap_or(HardwareEncoderType::Software)
}

/// Builds a GStreamer encoder for each recording session
pub struct GstEncoderFactory {
    config: EncoderConfig,
}

impl GstEncoderFactory {
    pub fn new(config: EncoderConfig) -> Result<Self> {
        crate::gstreamer_init::init_gstreamer_env();
        if !crate::gstreamer_init::is_gstreamer_available() {
            return Err(EncoderError::NotAvailable("GStreamer failed to initialize".into()));
        }
        Ok(Self { config })
    }
}

impl EncoderFactory for GstEncoderFactory {
    fn container(&self) -> ContainerFormat {
        self.config.codec.container()
    }

    fn create(&self, settings: EncoderSettings<'_>) -> Result<Box<dyn SessionEncoder>> {
        let encoder = AsyncVideoEncoder::new(
            settings.output_path.to_path_buf(),
            settings.width,
            settings.height,
            settings.pixel_format.to_string(),
            self.config.clone(),
        )?;
        Ok(Box::new(encoder))
    }
}

/// Asynchronous video encoder that runs encoding in a background thread
///
/// This encoder uses a producer-consumer pattern:
/// - Producer: the capture path pushes raw frames via `append()`
/// - Consumer: background thread feeds the GStreamer pipeline
///
/// The channel is bounded; when the encoder falls behind, frames are
/// dropped rather than blocking the producer.
pub struct AsyncVideoEncoder {
    /// Channel to send frames to the encoder thread
    frame_sender: Sender<EncoderMessage>,
    /// Shared state for checking encoder status
    state: Arc<Mutex<EncoderState>>,
    /// Resolves when the encoder thread exits
    finalize: FinalizeHandle,
}

/// Messages sent to the encoder thread
enum EncoderMessage {
    /// A frame to encode
    Frame(RawVideoFrame),
    /// Flush and finalize the output
    Finish,
}

/// Encoder state shared between threads
#[derive(Default)]
struct EncoderState {
    ready: bool,
    frames_dropped: u64,
    last_error: Option<String>,
}

impl AsyncVideoEncoder {
    /// Create a new async video encoder and start its pipeline.
    ///
    /// Returns once the thread is spawned; poll [`SessionEncoder::is_ready`]
    /// before sending frames.
    pub fn new(
        output_path: PathBuf,
        width: u32,
        height: u32,
        pixel_format: String,
        config: EncoderConfig,
    ) -> Result<Self> {
        let hw_type = detect_best_encoder(config.codec);
        log::info!(
            "Using {} for {} encoding ({}x{} {})",
            hw_type.display_name(),
            config.codec.display_name(),
            width,
            height,
            pixel_format
        );

        // Create bounded channel for frames (provides backpressure)
        let (frame_sender, frame_receiver) = bounded::<EncoderMessage>(config.queue_depth.max(1));
        let state = Arc::new(Mutex::new(EncoderState::default()));
        let (notifier, finalize) = FinalizeHandle::channel();

        let thread_state = state.clone();
        std::thread::Builder::new()
            .name("facecap-video-encoder".into())
            .spawn(move || {
                let pipeline = PipelineParams {
                    output_path,
                    width,
                    height,
                    pixel_format,
                    config,
                    hw_type,
                };
                encoder_thread_main(frame_receiver, pipeline, thread_state, notifier)
            })
            .map_err(|e| EncoderError::Pipeline(format!("Failed to spawn encoder thread: {}", e)))?;

        Ok(Self { frame_sender, state, finalize })
    }

    /// Check if the encoder has encountered an error
    pub fn has_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }
}

impl SessionEncoder for AsyncVideoEncoder {
    fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state.ready && state.last_error.is_none()
    }

    fn append(&mut self, frame: RawVideoFrame) -> Result<bool> {
        if let Some(err) = self.has_error() {
            return Err(EncoderError::Pipeline(err));
        }

        match self.frame_sender.try_send(EncoderMessage::Frame(frame)) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.state.lock().frames_dropped += 1;
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(EncoderError::Channel("Encoder thread disconnected".into()))
            }
        }
    }

    fn finish(self: Box<Self>) -> FinalizeHandle {
        let this = *self;
        // Blocking send: Finish must not be lost behind a full queue
        let _ = this.frame_sender.send(EncoderMessage::Finish);
        this.finalize
    }
}

struct PipelineParams {
    output_path: PathBuf,
    width: u32,
    height: u32,
    pixel_format: String,
    config: EncoderConfig,
    hw_type: HardwareEncoderType,
}

fn encoder_thread_main(
    receiver: Receiver<EncoderMessage>,
    params: PipelineParams,
    state: Arc<Mutex<EncoderState>>,
    notifier: FinalizeNotifier,
) {
    let result = run_pipeline(&receiver, &params, &state);
    if let Err(ref e) = result {
        log::error!("Encoder for {:?} failed: {}", params.output_path, e);
        state.lock().last_error = Some(e.to_string());
    }
    notifier.complete(result);
}

fn run_pipeline(
    receiver: &Receiver<EncoderMessage>,
    params: &PipelineParams,
    state: &Arc<Mutex<EncoderState>>,
) -> Result<EncoderStats> {
    let start_time = Instant::now();

    let pipeline = create_pipeline(params)?;

    let appsrc = pipeline
        .by_name("src")
        .ok_or_else(|| EncoderError::Pipeline("Could not find appsrc".into()))?
        .downcast::<gst_app::AppSrc>()
        .map_err(|_| EncoderError::Pipeline("Could not downcast to AppSrc".into()))?;

    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| EncoderError::Pipeline(format!("Failed to start pipeline: {:?}", e)))?;

    // Wait for pipeline to be ready (up to 5 seconds)
    let (state_result, _, _) = pipeline.state(Some(gst::ClockTime::from_seconds(5)));
    match state_result {
        Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::NoPreroll) => {
            log::debug!("Encoder pipeline ready");
        }
        Ok(gst::StateChangeSuccess::Async) => {
            log::debug!("Encoder pipeline starting asynchronously");
        }
        Err(e) => {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(EncoderError::Pipeline(format!(
                "Failed to reach PLAYING state: {:?}",
                e
            )));
        }
    }

    let mut tags = gst::TagList::new();
    if let Some(tags) = tags.get_mut() {
        tags.add::<gst::tags::ImageOrientation>(&OUTPUT_ORIENTATION, gst::TagMergeMode::Replace);
    }
    if !appsrc.send_event(gst::event::Tag::new(tags)) {
        log::warn!("Orientation tag was not accepted by the pipeline");
    }

    state.lock().ready = true;

    let nominal_duration = 1_000_000_000u64 / params.config.framerate.max(1) as u64;
    let mut frames_encoded = 0u64;
    let mut first_pts: Option<u64> = None;

    loop {
        match receiver.recv() {
            Ok(EncoderMessage::Frame(frame)) => {
                // Normalize PTS relative to first frame
                let base = *first_pts.get_or_insert(frame.pts);
                let pts = frame.pts.saturating_sub(base);
                let duration = if frame.duration > 0 { frame.duration } else { nominal_duration };

                let mut buffer = gst::Buffer::from_slice(frame.data);
                if let Some(buffer_ref) = buffer.get_mut() {
                    buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
                    buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
                }

                if let Err(e) = appsrc.push_buffer(buffer) {
                    let _ = pipeline.set_state(gst::State::Null);
                    return Err(EncoderError::Pipeline(format!("Failed to push buffer: {:?}", e)));
                }

                frames_encoded += 1;

                if frames_encoded % 300 == 0 {
                    log::debug!("Encoded {} frames", frames_encoded);
                }
            }
            Ok(EncoderMessage::Finish) | Err(_) => break,
        }
    }

    log::debug!("Sending EOS to encoder pipeline");
    if let Err(e) = appsrc.end_of_stream() {
        log::warn!("EOS send failed: {:?}", e);
    }

    // Wait for EOS on bus with a long timeout to allow the muxer to finalize
    let mut pipeline_error = None;
    let mut got_eos = false;
    if let Some(bus) = pipeline.bus() {
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(30)) {
            match msg.view() {
                gst::MessageView::Eos(..) => {
                    got_eos = true;
                    break;
                }
                gst::MessageView::Error(err) => {
                    pipeline_error = Some(format!("Pipeline error: {} ({:?})", err.error(), err.debug()));
                    break;
                }
                _ => {}
            }
        }
    }

    // Always set pipeline to NULL before dropping to avoid GStreamer warnings
    let _ = pipeline.set_state(gst::State::Null);

    if let Some(err) = pipeline_error {
        return Err(EncoderError::Pipeline(err));
    }
    if !got_eos {
        log::warn!("Did not receive EOS, output may be truncated");
    }

    let bytes_written = std::fs::metadata(&params.output_path)
        .map(|m| m.len())
        .unwrap_or(0);
    let frames_dropped = state.lock().frames_dropped;

    log::info!(
        "Encoder finished {:?}: {} frames ({} dropped), {} bytes",
        params.output_path,
        frames_encoded,
        frames_dropped,
        bytes_written
    );

    Ok(EncoderStats {
        frames_encoded,
        frames_dropped,
        bytes_written,
        encoding_duration: start_time.elapsed(),
    })
}

/// Pipeline: appsrc -> queue -> videoconvert -> encoder -> parser -> muxer -> filesink
fn create_pipeline(params: &PipelineParams) -> Result<gst::Pipeline> {
    let pipeline = gst::Pipeline::new();

    let format = gst_video::VideoFormat::from_string(&params.pixel_format);
    if format == gst_video::VideoFormat::Unknown {
        return Err(EncoderError::Pipeline(format!(
            "Unsupported pixel format: {}",
            params.pixel_format
        )));
    }

    let caps = gst_video::VideoInfo::builder(format, params.width, params.height)
        .fps(gst::Fraction::new(params.config.framerate.max(1) as i32, 1))
        .build()
        .map_err(|e| EncoderError::Gst(format!("Invalid video info: {}", e)))?
        .to_caps()
        .map_err(|e| EncoderError::Gst(format!("Failed to build caps: {}", e)))?;

    let appsrc = gst_app::AppSrc::builder()
        .name("src")
        .caps(&caps)
        .format(gst::Format::Time)
        .is_live(true)
        .stream_type(gst_app::AppStreamType::Stream)
        .build();

    let queue = make_element("queue")?;
    queue.set_property("max-size-buffers", 30u32);
    queue.set_property("max-size-time", 0u64);
    queue.set_property("max-size-bytes", 0u32);

    let videoconvert = make_element("videoconvert")?;
    let encoder = create_encoder(params.hw_type, &params.config)?;
    let parser = make_element(params.config.codec.gst_parser())?;
    let muxer = make_element(params.config.codec.container().gst_muxer())?;

    let filesink = make_element("filesink")?;
    filesink.set_property("location", params.output_path.to_string_lossy().to_string());
    filesink.set_property("async", false);
    filesink.set_property("sync", false);

    let elements = [
        appsrc.upcast_ref(),
        &queue,
        &videoconvert,
        &encoder,
        &parser,
        &muxer,
        &filesink,
    ];
    pipeline
        .add_many(elements)
        .map_err(|e| EncoderError::Pipeline(format!("Failed to add elements: {}", e)))?;
    gst::Element::link_many(elements)
        .map_err(|e| EncoderError::Pipeline(format!("Failed to link elements: {}", e)))?;

    Ok(pipeline)
}

fn make_element(name: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| EncoderError::Pipeline(format!("Failed to create {}: {}", name, e)))
}

/// Create the encoder element based on hardware type
fn create_encoder(hw_type: HardwareEncoderType, config: &EncoderConfig) -> Result<gst::Element> {
    let name = hw_type.encoder_element(config.codec);
    let encoder = gst::ElementFactory::make(name)
        .build()
        .map_err(|e| EncoderError::NotAvailable(format!("Failed to create {}: {}", name, e)))?;

    let kbps = config.bitrate / 1000;
    match hw_type {
        HardwareEncoderType::Software => {
            // Real-time capture: favour latency over compression
            encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property_from_str("speed-preset", "veryfast");
            if kbps > 0 {
                encoder.set_property("bitrate", kbps);
            }
            if config.keyframe_interval > 0 && config.codec == VideoCodec::H264 {
                encoder.set_property("key-int-max", config.keyframe_interval);
            }
        }
        HardwareEncoderType::Nvenc => {
            if kbps > 0 {
                encoder.set_property("bitrate", kbps);
            }
            if config.keyframe_interval > 0 {
                encoder.set_property("gop-size", config.keyframe_interval as i32);
            }
        }
        HardwareEncoderType::VideoToolbox => {
            if kbps > 0 {
                encoder.set_property("bitrate", kbps);
            }
            encoder.set_property("realtime", true);
        }
        HardwareEncoderType::Amf | HardwareEncoderType::Qsv | HardwareEncoderType::VaApi => {
            if kbps > 0 {
                encoder.set_property("bitrate", kbps);
            }
        }
    }

    Ok(encoder)
}
