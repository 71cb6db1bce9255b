// Session metadata structures

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::encoding::FinalizeHandle;

use super::StorageError;

/// On-disk telemetry file.
///
/// Field names are a fixed interchange format; the three mesh sequences
/// are always written, one (possibly empty) entry per frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryDocument {
    pub blend_shape_keys: Vec<String>,
    pub blend_shape_values: Vec<Vec<f32>>,
    pub vertices: Vec<Vec<[f32; 3]>>,
    pub texture_coordinates: Vec<Vec<[f32; 2]>>,
    pub triangle_indices: Vec<Vec<i16>>,
}

impl TelemetryDocument {
    /// Check the structural invariants of a telemetry file
    pub fn validate(&self) -> Result<TelemetrySummary, StorageError> {
        let frames = self.blend_shape_values.len();
        if self.vertices.len() != frames
            || self.texture_coordinates.len() != frames
            || self.triangle_indices.len() != frames
        {
            return Err(StorageError::InvalidTelemetry(format!(
                "sequence lengths differ: values={}, vertices={}, texture_coordinates={}, triangle_indices={}",
                frames,
                self.vertices.len(),
                self.texture_coordinates.len(),
                self.triangle_indices.len()
            )));
        }

        let channels = self.blend_shape_keys.len();
        let mut filled = 0;
        for (i, values) in self.blend_shape_values.iter().enumerate() {
            if values.is_empty() {
                continue;
            }
            if values.len() != channels {
                return Err(StorageError::InvalidTelemetry(format!(
                    "frame {} has {} values, expected {}",
                    i,
                    values.len(),
                    channels
                )));
            }
            filled += 1;
        }

        let mesh_frames = self.vertices.iter().filter(|v| !v.is_empty()).count();

        Ok(TelemetrySummary {
            frames,
            filled_frames: filled,
            channels,
            mesh_frames,
        })
    }
}

/// Counts from a validated telemetry file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetrySummary {
    pub frames: usize,
    /// Frames whose coefficient vector was written
    pub filled_frames: usize,
    pub channels: usize,
    /// Frames carrying a mesh
    pub mesh_frames: usize,
}

/// A session found in the storage directory
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    /// Parsed from the session id; None for foreign file names
    pub recorded_at: Option<NaiveDateTime>,
    pub telemetry_path: PathBuf,
    pub video_path: Option<PathBuf>,
}

/// Returned by a successful start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub video_path: PathBuf,
    pub telemetry_path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// What happened when a session was stopped
#[derive(Debug)]
pub struct StopReport {
    pub session: SessionInfo,
    /// Frames ingested during the session
    pub frames: usize,
    /// Frames that received telemetry
    pub filled_frames: usize,
    /// Bytes written to the telemetry file, or why it could not be written
    pub telemetry: Result<u64, StorageError>,
    /// Resolves once the video file is finalized
    pub finalize: FinalizeHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(frames: usize) -> TelemetryDocument {
        TelemetryDocument {
            blend_shape_keys: vec!["a".into(), "b".into()],
            blend_shape_values: vec![vec![0.1, 0.2]; frames],
            vertices: vec![Vec::new(); frames],
            texture_coordinates: vec![Vec::new(); frames],
            triangle_indices: vec![Vec::new(); frames],
        }
    }

    #[test]
    fn serializes_with_interchange_field_names() {
        let json = serde_json::to_value(doc(1)).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "blend_shape_keys",
                "blend_shape_values",
                "texture_coordinates",
                "triangle_indices",
                "vertices"
            ]
        );
        assert_eq!(obj["vertices"], serde_json::json!([[]]));
    }

    #[test]
    fn validate_counts_filled_frames() {
        let mut d = doc(3);
        d.blend_shape_values[1].clear();
        let summary = d.validate().unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.filled_frames, 2);
        assert_eq!(summary.channels, 2);
        assert_eq!(summary.mesh_frames, 0);
    }

    #[test]
    fn validate_rejects_ragged_sequences() {
        let mut d = doc(2);
        d.triangle_indices.pop();
        assert!(matches!(d.validate(), Err(StorageError::InvalidTelemetry(_))));

        let mut d = doc(2);
        d.blend_shape_values[0].push(0.3);
        assert!(matches!(d.validate(), Err(StorageError::InvalidTelemetry(_))));
    }
}
