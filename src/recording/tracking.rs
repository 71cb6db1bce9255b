// Inputs delivered by the capture and tracking subsystems

use std::collections::HashMap;

use crate::encoding::RawVideoFrame;

use super::timestamp::Timestamp;

/// One captured camera frame
#[derive(Clone)]
pub struct VideoFrame {
    /// Raw pixel data
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Pixel format (GStreamer format string, e.g. "NV12")
    pub pixel_format: String,
    /// Presentation timestamp
    pub timestamp: Timestamp,
}

impl VideoFrame {
    /// Convert to an encodable sample, consuming the pixel data
    pub fn into_raw(self) -> RawVideoFrame {
        RawVideoFrame {
            data: self.data,
            pts: self.timestamp.as_nanos(),
            duration: 0,
            width: self.width,
            height: self.height,
            format: self.pixel_format,
        }
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Tracked face mesh for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceGeometry {
    pub vertices: Vec<[f32; 3]>,
    pub texture_coordinates: Vec<[f32; 2]>,
    pub triangle_indices: Vec<i16>,
}

/// One update from the face tracker
#[derive(Debug, Clone, Default)]
pub struct TrackingUpdate {
    /// Channel name -> coefficient, conventionally in [0, 1]
    pub blend_shapes: HashMap<String, f32>,
    /// Mesh, only recorded when mesh capture is enabled
    pub geometry: Option<FaceGeometry>,
    /// Frame this update belongs to. `None` means "the most recently
    /// ingested frame".
    pub timestamp: Option<Timestamp>,
}

impl TrackingUpdate {
    pub fn new(blend_shapes: HashMap<String, f32>, timestamp: Timestamp) -> Self {
        Self {
            blend_shapes,
            geometry: None,
            timestamp: Some(timestamp),
        }
    }

    pub fn with_geometry(mut self, geometry: FaceGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_carries_pts_in_nanos() {
        let frame = VideoFrame {
            data: vec![0u8; 6],
            width: 2,
            height: 2,
            pixel_format: "NV12".to_string(),
            timestamp: Timestamp::from_secs_f64(0.033333),
        };
        let raw = frame.into_raw();
        assert_eq!(raw.pts, 33_333_000);
        assert_eq!(raw.data.len(), 6);
        assert_eq!(raw.format, "NV12");
    }
}
