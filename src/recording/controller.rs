// Session controller - owns the recording state shared by the control,
// capture and tracking threads.
//
// Everything lives behind one mutex. Critical sections only touch in-memory
// bookkeeping and the non-blocking encoder hand-off; encoder setup, readiness
// polling and artifact writes all run with the lock released.

use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;

use crate::config::Config;
use crate::encoding::{self, EncoderFactory, EncoderSettings, SessionEncoder};
use crate::session::{self, SessionInfo, StopReport, TelemetryDocument};

use super::frame_buffer::FrameBuffer;
use super::schema::ChannelSchema;
use super::timestamp::{Timestamp, TimestampIndex};
use super::tracking::{TrackingUpdate, VideoFrame};
use super::{RecordingError, RecordingStatus, Result};

/// What `ingest` did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A telemetry slot was allocated at `frame_index`
    Recorded { frame_index: usize },
    /// No session was recording
    Dropped,
}

/// What `sample` did with a tracking update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// No session was recording
    Idle,
    /// Recording, but no frame has been ingested yet
    NoFrames,
    /// No frame in this session has that timestamp
    Unmatched(Timestamp),
    Written { frame_index: usize },
}

struct SessionState {
    status: RecordingStatus,
    session: Option<SessionInfo>,
    encoder: Option<Box<dyn SessionEncoder>>,
    buffer: FrameBuffer,
    index: TimestampIndex,
    /// Sequence number of the last frame ingested this session
    last_index: Option<usize>,
    /// Survive across sessions; updated even while idle
    last_seen: Option<Timestamp>,
    frame_size: Option<(u32, u32)>,
    pixel_format: Option<String>,
    /// Id of the most recent session; its encoder may still be finalizing
    last_session_id: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: RecordingStatus::Idle,
            session: None,
            encoder: None,
            buffer: FrameBuffer::new(),
            index: TimestampIndex::new(),
            last_index: None,
            last_seen: None,
            frame_size: None,
            pixel_format: None,
            last_session_id: None,
        }
    }
}

/// Coordinates one recording session at a time.
///
/// Share it as `Arc<SessionController>`; every method takes `&self`.
pub struct SessionController {
    config: Config,
    schema: ChannelSchema,
    factory: Arc<dyn EncoderFactory>,
    state: Mutex<SessionState>,
}

impl SessionController {
    pub fn new(config: Config, schema: ChannelSchema, factory: Arc<dyn EncoderFactory>) -> Self {
        Self {
            config,
            schema,
            factory,
            state: Mutex::new(SessionState::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> &ChannelSchema {
        &self.schema
    }

    /// Start a session, reporting only whether it started.
    pub fn start(&self) -> bool {
        match self.try_start() {
            Ok(_) => true,
            Err(RecordingError::AlreadyRecording) => {
                log::debug!("Start ignored, a session is already active");
                false
            }
            Err(e) => {
                log::error!("Failed to start recording: {}", e);
                false
            }
        }
    }

    /// Start a session.
    ///
    /// Blocks until the encoder is ready or the readiness timeout elapses.
    pub fn try_start(&self) -> Result<SessionInfo> {
        // Atomically check and set Starting so a concurrent start is rejected
        let (width, height, pixel_format, previous_id) = {
            let mut state = self.state.lock();
            if !state.status.can_start_recording() {
                return Err(RecordingError::AlreadyRecording);
            }
            state.status = RecordingStatus::Starting;

            let (width, height) = state.frame_size.unwrap_or(self.config.fallback_frame_size);
            let pixel_format = state
                .pixel_format
                .clone()
                .unwrap_or_else(|| self.config.fallback_pixel_format.clone());
            (width, height, pixel_format, state.last_session_id.clone())
        };

        let opened = self.open_session(width, height, &pixel_format, previous_id.as_deref());
        let (info, encoder) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.state.lock().status = RecordingStatus::Idle;
                return Err(e);
            }
        };

        {
            let mut state = self.state.lock();
            state.buffer.clear();
            state.index.clear();
            state.last_index = None;
            state.encoder = Some(encoder);
            state.session = Some(info.clone());
            state.last_session_id = Some(info.id.clone());
            state.status = RecordingStatus::Recording;
        }

        log::info!(
            "Recording started: {} ({}x{} {})",
            info.id,
            info.width,
            info.height,
            pixel_format
        );
        Ok(info)
    }

    /// Create the encoder and wait for it. Runs without the lock.
    fn open_session(
        &self,
        width: u32,
        height: u32,
        pixel_format: &str,
        previous_id: Option<&str>,
    ) -> Result<(SessionInfo, Box<dyn SessionEncoder>)> {
        std::fs::create_dir_all(&self.config.storage_path)?;

        let extension = self.factory.container().extension();
        let id = session::unique_session_id(
            &self.config.storage_path,
            Local::now(),
            extension,
            previous_id,
        );
        let (video_path, telemetry_path) =
            session::artifact_paths(&self.config.storage_path, &id, extension);

        let encoder = self.factory.create(EncoderSettings {
            output_path: &video_path,
            width,
            height,
            pixel_format,
        })?;

        if let Err(e) = encoding::wait_until_ready(
            encoder.as_ref(),
            self.config.readiness_poll_interval(),
            self.config.readiness_timeout(),
        ) {
            log::warn!("Encoder for {} never became ready, abandoning it", id);
            // Finalization of the abandoned encoder is not awaited
            drop(encoder.finish());
            return Err(e.into());
        }

        let info = SessionInfo {
            id,
            video_path,
            telemetry_path,
            width,
            height,
        };
        Ok((info, encoder))
    }

    /// Stop the active session and write its telemetry.
    ///
    /// Returns `None` unless a session was recording. The controller is Idle
    /// when this returns, even if the telemetry file could not be written.
    pub fn stop(&self) -> Option<StopReport> {
        let (info, encoder, buffer) = {
            let mut state = self.state.lock();
            if !state.status.is_recording() {
                return None;
            }
            state.status = RecordingStatus::Idle;
            state.last_index = None;
            state.index.clear();
            let buffer = std::mem::take(&mut state.buffer);
            (state.session.take()?, state.encoder.take()?, buffer)
        };

        let frames = buffer.len();
        let filled_frames = buffer.filled();
        let finalize = encoder.finish();

        let (values, vertices, texture_coordinates, triangle_indices) = buffer.into_parts();
        let document = TelemetryDocument {
            blend_shape_keys: self.schema.names().to_vec(),
            blend_shape_values: values,
            vertices,
            texture_coordinates,
            triangle_indices,
        };

        let telemetry =
            session::write_telemetry(&info.telemetry_path, &document, self.config.pretty_json);
        match &telemetry {
            Ok(_) => log::info!(
                "Recording stopped: {} ({} frames, {} with telemetry)",
                info.id,
                frames,
                filled_frames
            ),
            Err(e) => log::error!(
                "Recording stopped but telemetry for {} was not written: {}",
                info.id,
                e
            ),
        }

        Some(StopReport {
            session: info,
            frames,
            filled_frames,
            telemetry,
            finalize,
        })
    }

    /// Accept a camera frame. Called from the capture thread.
    pub fn ingest(&self, frame: VideoFrame) -> IngestOutcome {
        let timestamp = frame.timestamp;
        let (width, height) = (frame.width, frame.height);
        let raw = frame.into_raw();

        let mut state = self.state.lock();
        state.frame_size = Some((width, height));
        state.last_seen = Some(timestamp);
        if state.pixel_format.as_deref() != Some(raw.format.as_str()) {
            state.pixel_format = Some(raw.format.clone());
        }

        if !state.status.is_recording() {
            return IngestOutcome::Dropped;
        }

        let frame_index = state.buffer.push_empty();
        state.last_index = Some(frame_index);
        if let Some(previous) = state.index.insert(timestamp, frame_index) {
            log::warn!(
                "Duplicate frame timestamp {}; frame {} replaces frame {}",
                timestamp,
                frame_index,
                previous
            );
        }

        if let Some(encoder) = state.encoder.as_mut() {
            match encoder.append(raw) {
                Ok(true) => {}
                Ok(false) => log::warn!("Encoder queue full, video frame {} dropped", frame_index),
                Err(e) => log::warn!("Encoder rejected video frame {}: {}", frame_index, e),
            }
        }

        IngestOutcome::Recorded { frame_index }
    }

    /// Attach a tracking result to a recorded frame. Called from the
    /// tracking thread.
    pub fn sample(&self, update: &TrackingUpdate) -> Result<SampleOutcome> {
        let mut state = self.state.lock();
        if !state.status.is_recording() {
            return Ok(SampleOutcome::Idle);
        }
        if state.last_index.is_none() {
            return Ok(SampleOutcome::NoFrames);
        }

        let Some(timestamp) = update.timestamp.or(state.last_seen) else {
            return Ok(SampleOutcome::NoFrames);
        };

        let values = match self.schema.extract(&update.blend_shapes) {
            Ok(values) => values,
            Err(e) => {
                log::error!("Dropping tracking result at {}: {}", timestamp, e);
                return Err(e);
            }
        };

        let Some(frame_index) = state.index.get(timestamp) else {
            return Ok(SampleOutcome::Unmatched(timestamp));
        };

        let filled = state.buffer.set_blend_shapes(frame_index, values);
        debug_assert!(filled, "index points past the frame buffer");
        if self.config.capture_mesh {
            if let Some(geometry) = &update.geometry {
                state.buffer.set_geometry(frame_index, geometry);
            }
        }

        Ok(SampleOutcome::Written { frame_index })
    }

    pub fn state(&self) -> RecordingStatus {
        self.state.lock().status
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().status.is_recording()
    }

    /// Frames ingested in the active session
    pub fn frame_count(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session.as_ref().map(|s| s.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{
        ContainerFormat, EncoderError, EncoderStats, FinalizeHandle, RawVideoFrame,
    };
    use crate::recording::FaceGeometry;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorded {
        pts: Mutex<Vec<u64>>,
        created: Mutex<Vec<(u32, u32, String)>>,
        finished: AtomicBool,
    }

    struct MockFactory {
        ready: bool,
        recorded: Arc<Recorded>,
    }

    struct MockEncoder {
        ready: bool,
        recorded: Arc<Recorded>,
    }

    impl EncoderFactory for MockFactory {
        fn container(&self) -> ContainerFormat {
            ContainerFormat::Mp4
        }

        fn create(&self, settings: EncoderSettings<'_>) -> encoding::Result<Box<dyn SessionEncoder>> {
            self.recorded.created.lock().push((
                settings.width,
                settings.height,
                settings.pixel_format.to_string(),
            ));
            Ok(Box::new(MockEncoder {
                ready: self.ready,
                recorded: self.recorded.clone(),
            }))
        }
    }

    impl SessionEncoder for MockEncoder {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn append(&mut self, frame: RawVideoFrame) -> encoding::Result<bool> {
            self.recorded.pts.lock().push(frame.pts);
            Ok(true)
        }

        fn finish(self: Box<Self>) -> FinalizeHandle {
            self.recorded.finished.store(true, Ordering::SeqCst);
            let frames = self.recorded.pts.lock().len() as u64;
            FinalizeHandle::resolved(Ok(EncoderStats {
                frames_encoded: frames,
                ..Default::default()
            }))
        }
    }

    fn controller(dir: &std::path::Path, ready: bool) -> (SessionController, Arc<Recorded>) {
        let mut config = Config::with_storage_path(dir);
        config.readiness_timeout_ms = 50;
        config.readiness_poll_interval_ms = 5;
        let recorded = Arc::new(Recorded::default());
        let factory = MockFactory {
            ready,
            recorded: recorded.clone(),
        };
        let controller = SessionController::new(config, ChannelSchema::arkit(), Arc::new(factory));
        (controller, recorded)
    }

    fn frame(secs: f64) -> VideoFrame {
        VideoFrame {
            data: vec![0u8; 24],
            width: 4,
            height: 4,
            pixel_format: "NV12".to_string(),
            timestamp: Timestamp::from_secs_f64(secs),
        }
    }

    fn update(schema: &ChannelSchema, value: f32, secs: Option<f64>) -> TrackingUpdate {
        TrackingUpdate {
            blend_shapes: schema.names().iter().map(|n| (n.clone(), value)).collect(),
            geometry: None,
            timestamp: secs.map(Timestamp::from_secs_f64),
        }
    }

    #[test]
    fn start_and_stop_transition_state() {
        let dir = tempdir().unwrap();
        let (ctl, recorded) = controller(dir.path(), true);

        assert_eq!(ctl.state(), RecordingStatus::Idle);
        assert!(ctl.start());
        assert!(ctl.is_recording());
        assert!(ctl.session_id().is_some());
        assert!(!ctl.start());

        let report = ctl.stop().unwrap();
        assert_eq!(ctl.state(), RecordingStatus::Idle);
        assert_eq!(report.frames, 0);
        assert!(report.telemetry.is_ok());
        assert!(report.session.telemetry_path.exists());
        assert!(recorded.finished.load(Ordering::SeqCst));
        assert!(ctl.session_id().is_none());
    }

    #[test]
    fn stop_when_idle_does_nothing() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);
        assert!(ctl.stop().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn first_start_uses_fallback_size() {
        let dir = tempdir().unwrap();
        let (ctl, recorded) = controller(dir.path(), true);
        let info = ctl.try_start().unwrap();
        assert_eq!((info.width, info.height), (1920, 1440));
        assert_eq!(recorded.created.lock()[0], (1920, 1440, "NV12".to_string()));
    }

    #[test]
    fn start_uses_last_seen_frame_size() {
        let dir = tempdir().unwrap();
        let (ctl, recorded) = controller(dir.path(), true);
        assert_eq!(ctl.ingest(frame(0.0)), IngestOutcome::Dropped);
        ctl.try_start().unwrap();
        assert_eq!(recorded.created.lock()[0], (4, 4, "NV12".to_string()));
    }

    #[test]
    fn encoder_that_never_becomes_ready_fails_start() {
        let dir = tempdir().unwrap();
        let (ctl, recorded) = controller(dir.path(), false);
        let err = ctl.try_start().unwrap_err();
        assert!(matches!(err, RecordingError::Encoder(EncoderError::NotReady(_))));
        assert_eq!(ctl.state(), RecordingStatus::Idle);
        assert!(recorded.finished.load(Ordering::SeqCst));
        assert_eq!(ctl.ingest(frame(0.0)), IngestOutcome::Dropped);
    }

    #[test]
    fn frames_are_indexed_in_arrival_order() {
        let dir = tempdir().unwrap();
        let (ctl, recorded) = controller(dir.path(), true);
        ctl.start();

        assert_eq!(ctl.ingest(frame(0.0)), IngestOutcome::Recorded { frame_index: 0 });
        assert_eq!(ctl.ingest(frame(0.033333)), IngestOutcome::Recorded { frame_index: 1 });
        assert_eq!(ctl.frame_count(), 2);
        assert_eq!(*recorded.pts.lock(), vec![0, 33_333_000]);
    }

    #[test]
    fn sample_fills_matching_slot() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);
        let schema = ctl.schema().clone();
        ctl.start();

        assert_eq!(
            ctl.sample(&update(&schema, 0.5, Some(0.0))).unwrap(),
            SampleOutcome::NoFrames
        );

        ctl.ingest(frame(0.0));
        ctl.ingest(frame(0.033333));
        assert_eq!(
            ctl.sample(&update(&schema, 0.5, Some(0.033333))).unwrap(),
            SampleOutcome::Written { frame_index: 1 }
        );

        let report = ctl.stop().unwrap();
        assert_eq!(report.frames, 2);
        assert_eq!(report.filled_frames, 1);

        let doc = session::read_telemetry(&report.session.telemetry_path).unwrap();
        assert!(doc.blend_shape_values[0].is_empty());
        assert_eq!(doc.blend_shape_values[1], vec![0.5; schema.len()]);
        assert_eq!(doc.blend_shape_keys, schema.names());
    }

    #[test]
    fn sample_without_timestamp_uses_last_seen_frame() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);
        let schema = ctl.schema().clone();
        ctl.start();
        ctl.ingest(frame(1.0));
        ctl.ingest(frame(2.0));
        assert_eq!(
            ctl.sample(&update(&schema, 0.25, None)).unwrap(),
            SampleOutcome::Written { frame_index: 1 }
        );
    }

    #[test]
    fn unmatched_sample_changes_nothing() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);
        let schema = ctl.schema().clone();
        ctl.start();
        ctl.ingest(frame(0.0));
        assert_eq!(
            ctl.sample(&update(&schema, 0.5, Some(9.0))).unwrap(),
            SampleOutcome::Unmatched(Timestamp::from_secs_f64(9.0))
        );
        assert_eq!(ctl.stop().unwrap().filled_frames, 0);
    }

    #[test]
    fn missing_channel_is_rejected_without_mutation() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);
        let schema = ctl.schema().clone();
        ctl.start();
        ctl.ingest(frame(0.0));

        let mut partial = update(&schema, 0.5, Some(0.0));
        partial.blend_shapes.remove("jawOpen");
        let err = ctl.sample(&partial).unwrap_err();
        assert!(matches!(err, RecordingError::MissingChannel(ref n) if n == "jawOpen"));
        assert_eq!(ctl.stop().unwrap().filled_frames, 0);
    }

    #[test]
    fn sample_while_idle_is_ignored() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);
        let outcome = ctl.sample(&TrackingUpdate::new(HashMap::new(), Timestamp::ZERO));
        assert_eq!(outcome.unwrap(), SampleOutcome::Idle);
    }

    #[test]
    fn duplicate_timestamp_points_to_newest_frame() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);
        let schema = ctl.schema().clone();
        ctl.start();
        ctl.ingest(frame(0.5));
        ctl.ingest(frame(0.5));
        assert_eq!(
            ctl.sample(&update(&schema, 1.0, Some(0.5))).unwrap(),
            SampleOutcome::Written { frame_index: 1 }
        );
    }

    #[test]
    fn mesh_is_written_only_when_enabled() {
        let geometry = FaceGeometry {
            vertices: vec![[0.1, 0.2, 0.3]],
            texture_coordinates: vec![[0.5, 0.5]],
            triangle_indices: vec![0, 0, 0],
        };

        for capture_mesh in [false, true] {
            let dir = tempdir().unwrap();
            let mut config = Config::with_storage_path(dir.path());
            config.capture_mesh = capture_mesh;
            let factory = MockFactory {
                ready: true,
                recorded: Arc::new(Recorded::default()),
            };
            let ctl = SessionController::new(config, ChannelSchema::arkit(), Arc::new(factory));
            let schema = ctl.schema().clone();

            ctl.start();
            ctl.ingest(frame(0.0));
            let tracked = update(&schema, 0.5, Some(0.0)).with_geometry(geometry.clone());
            ctl.sample(&tracked).unwrap();

            let report = ctl.stop().unwrap();
            let doc = session::read_telemetry(&report.session.telemetry_path).unwrap();
            assert_eq!(doc.vertices.len(), 1);
            assert_eq!(doc.vertices[0].is_empty(), !capture_mesh);
            assert_eq!(doc.triangle_indices[0].is_empty(), !capture_mesh);
        }
    }

    #[test]
    fn new_session_starts_with_empty_buffers() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);
        assert!(ctl.start());
        ctl.ingest(frame(0.0));
        assert!(!ctl.start());
        ctl.stop();

        assert!(ctl.start());
        assert_eq!(ctl.frame_count(), 0);
        assert_eq!(ctl.ingest(frame(0.0)), IngestOutcome::Recorded { frame_index: 0 });
    }

    #[test]
    fn back_to_back_sessions_keep_their_own_artifacts() {
        let dir = tempdir().unwrap();
        let (ctl, _) = controller(dir.path(), true);

        for _ in 0..20 {
            let first = ctl.try_start().unwrap();
            for i in 0..3 {
                ctl.ingest(frame(i as f64));
            }
            ctl.stop().unwrap();

            let second = ctl.try_start().unwrap();
            ctl.stop().unwrap();

            assert_ne!(first.id, second.id);
            assert_ne!(first.telemetry_path, second.telemetry_path);
            assert_ne!(first.video_path, second.video_path);
            let doc = session::read_telemetry(&first.telemetry_path).unwrap();
            assert_eq!(doc.blend_shape_values.len(), 3);
        }

        let sessions = session::list_sessions(dir.path(), "mp4").unwrap();
        assert_eq!(sessions.len(), 40);
        assert!(sessions.iter().all(|s| s.recorded_at.is_some()));
    }
}
