use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

/// The single searchable key: normalized text segment followed by normalized
/// image segment.
#[derive(Clone, Debug, PartialEq)]
pub struct JointVector {
    values: Vec<f32>,
}

impl JointVector {
    /// Wrap a precomputed joint vector (e.g. one read back from an index).
    #[must_use]
    pub const fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<f32> {
        self.values
    }
}

/// One ANN hit before identity resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub ordinal: usize,
    pub distance: f32,
}
