// Blend shape channel schema
//
// Fixed, ordered list of coefficient channels recorded for every frame.
// The order here is the column order of `blend_shape_values` in the
// telemetry file, so it must never change for a given schema.

use std::collections::{HashMap, HashSet};

use super::RecordingError;

/// ARKit blend shape locations, by raw name, in sensor enumeration order.
pub const ARKIT_BLEND_SHAPES: [&str; 52] = [
    "browDown_L",
    "browDown_R",
    "browInnerUp",
    "browOuterUp_L",
    "browOuterUp_R",
    "cheekPuff",
    "cheekSquint_L",
    "cheekSquint_R",
    "eyeBlink_L",
    "eyeBlink_R",
    "eyeLookDown_L",
    "eyeLookDown_R",
    "eyeLookIn_L",
    "eyeLookIn_R",
    "eyeLookOut_L",
    "eyeLookOut_R",
    "eyeLookUp_L",
    "eyeLookUp_R",
    "eyeSquint_L",
    "eyeSquint_R",
    "eyeWide_L",
    "eyeWide_R",
    "jawForward",
    "jawLeft",
    "jawOpen",
    "jawRight",
    "mouthClose",
    "mouthDimple_L",
    "mouthDimple_R",
    "mouthFrown_L",
    "mouthFrown_R",
    "mouthFunnel",
    "mouthLeft",
    "mouthLowerDown_L",
    "mouthLowerDown_R",
    "mouthPress_L",
    "mouthPress_R",
    "mouthPucker",
    "mouthRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthSmile_L",
    "mouthSmile_R",
    "mouthStretch_L",
    "mouthStretch_R",
    "mouthUpperUp_L",
    "mouthUpperUp_R",
    "noseSneer_L",
    "noseSneer_R",
    "tongueOut",
];

/// Ordered set of channel names defining the coefficient vector layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSchema {
    names: Vec<String>,
}

impl ChannelSchema {
    /// Build a schema from an ordered list of names.
    ///
    /// Names must be distinct; the first duplicate is reported.
    pub fn new<I, S>(names: I) -> Result<Self, RecordingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(RecordingError::DuplicateChannel(name.clone()));
            }
        }
        Ok(Self { names })
    }

    /// The sensor's full blend shape set
    pub fn arkit() -> Self {
        Self {
            names: ARKIT_BLEND_SHAPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Read every channel, in schema order, out of a tracking result.
    ///
    /// Extra channels in `values` are ignored. A missing channel is a
    /// contract violation by the tracker and fails the whole vector.
    pub fn extract(&self, values: &HashMap<String, f32>) -> Result<Vec<f32>, RecordingError> {
        self.names
            .iter()
            .map(|name| {
                values
                    .get(name)
                    .copied()
                    .ok_or_else(|| RecordingError::MissingChannel(name.clone()))
            })
            .collect()
    }
}

impl Default for ChannelSchema {
    fn default() -> Self {
        Self::arkit()
    }
}
