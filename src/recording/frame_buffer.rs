// Per-frame telemetry storage
//
// Four parallel sequences, one slot per ingested video frame. Slots are
// appended empty by the frame path and filled later by the tracking path.

use super::tracking::FaceGeometry;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameBuffer {
    blend_shape_values: Vec<Vec<f32>>,
    vertices: Vec<Vec<[f32; 3]>>,
    texture_coordinates: Vec<Vec<[f32; 2]>>,
    triangle_indices: Vec<Vec<i16>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one empty slot to every sequence and return its index
    pub fn push_empty(&mut self) -> usize {
        self.blend_shape_values.push(Vec::new());
        self.vertices.push(Vec::new());
        self.texture_coordinates.push(Vec::new());
        self.triangle_indices.push(Vec::new());
        self.blend_shape_values.len() - 1
    }

    /// Overwrite the coefficient vector at `index`. Returns false if the
    /// slot does not exist.
    pub fn set_blend_shapes(&mut self, index: usize, values: Vec<f32>) -> bool {
        match self.blend_shape_values.get_mut(index) {
            Some(slot) => {
                *slot = values;
                true
            }
            None => false,
        }
    }

    /// Overwrite the three mesh slots at `index`
    pub fn set_geometry(&mut self, index: usize, geometry: &FaceGeometry) -> bool {
        if index >= self.len() {
            return false;
        }
        self.vertices[index] = geometry.vertices.clone();
        self.texture_coordinates[index] = geometry.texture_coordinates.clone();
        self.triangle_indices[index] = geometry.triangle_indices.clone();
        true
    }

    pub fn len(&self) -> usize {
        self.blend_shape_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blend_shape_values.is_empty()
    }

    /// Number of frames whose coefficient vector has been filled
    pub fn filled(&self) -> usize {
        self.blend_shape_values.iter().filter(|v| !v.is_empty()).count()
    }

    pub fn blend_shape_values(&self) -> &[Vec<f32>] {
        &self.blend_shape_values
    }

    pub fn vertices(&self) -> &[Vec<[f32; 3]>] {
        &self.vertices
    }

    pub fn texture_coordinates(&self) -> &[Vec<[f32; 2]>] {
        &self.texture_coordinates
    }

    pub fn triangle_indices(&self) -> &[Vec<i16>] {
        &self.triangle_indices
    }

    pub fn clear(&mut self) {
        self.blend_shape_values.clear();
        self.vertices.clear();
        self.texture_coordinates.clear();
        self.triangle_indices.clear();
    }

    /// Split into the four sequences
    pub fn into_parts(
        self,
    ) -> (
        Vec<Vec<f32>>,
        Vec<Vec<[f32; 3]>>,
        Vec<Vec<[f32; 2]>>,
        Vec<Vec<i16>>,
    ) {
        (
            self.blend_shape_values,
            self.vertices,
            self.texture_coordinates,
            self.triangle_indices,
        )
    }

    #[cfg(test)]
    fn lengths_agree(&self) -> bool {
        let n = self.blend_shape_values.len();
        self.vertices.len() == n
            && self.texture_coordinates.len() == n
            && self.triangle_indices.len() == n
    }
}
