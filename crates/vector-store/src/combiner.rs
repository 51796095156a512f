use crate::error::{Result, VectorStoreError};
use crate::types::{JointVector, Modality};

/// Result of L2 normalization. `degenerate` is set when the input had zero norm
/// and the zero vector was returned unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    pub vector: Vec<f32>,
    pub degenerate: bool,
}

#[must_use]
pub fn normalize(vector: &[f32]) -> Normalized {
    let norm = l2_norm(vector);
    if norm == 0.0 || !norm.is_finite() {
        log::warn!(
            "Degenerate embedding (norm {norm}) of length {}; using zero vector",
            vector.len()
        );
        return Normalized {
            vector: vec![0.0; vector.len()],
            degenerate: true,
        };
    }
    Normalized {
        vector: vector.iter().map(|v| (f64::from(*v) / norm) as f32).collect(),
        degenerate: false,
    }
}

pub(crate) fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt()
}

/// Merges per-modality vectors into a [`JointVector`] of fixed length
/// `text_dimension + image_dimension`. Layout: text segment, then image segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorCombiner {
    text_dimension: usize,
    image_dimension: usize,
}

impl VectorCombiner {
    #[must_use]
    pub const fn new(text_dimension: usize, image_dimension: usize) -> Self {
        Self {
            text_dimension,
            image_dimension,
        }
    }

    #[must_use]
    pub const fn text_dimension(&self) -> usize {
        self.text_dimension
    }

    #[must_use]
    pub const fn image_dimension(&self) -> usize {
        self.image_dimension
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.text_dimension + self.image_dimension
    }

    pub fn combine(&self, text: Option<&[f32]>, image: Option<&[f32]>) -> Result<JointVector> {
        let mut values = Vec::with_capacity(self.dimension());
        append_segment(&mut values, Modality::Text, text, self.text_dimension)?;
        append_segment(&mut values, Modality::Image, image, self.image_dimension)?;
        Ok(JointVector::from_values(values))
    }
}

fn append_segment(
    out: &mut Vec<f32>,
    modality: Modality,
    segment: Option<&[f32]>,
    expected: usize,
) -> Result<()> {
    match segment {
        Some(vector) => {
            if vector.len() != expected {
                return Err(VectorStoreError::dimension(
                    format!("{} segment", modality.as_str()),
                    expected,
                    vector.len(),
                ));
            }
            out.extend(normalize(vector).vector);
        }
        None => out.resize(out.len() + expected, 0.0),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_vector_is_flagged_degenerate() {
        let out = normalize(&[0.0, 0.0, 0.0]);
        assert!(out.degenerate);
        assert_eq!(out.vector, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn combine_orders_text_before_image() {
        let combiner = VectorCombiner::new(2, 3);
        let joint = combiner
            .combine(Some(&[3.0, 4.0]), Some(&[0.0, 0.0, 2.0]))
            .unwrap();
        assert_eq!(joint.as_slice(), &[0.6, 0.8, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn absent_text_equals_zero_text() {
        let combiner = VectorCombiner::new(4, 3);
        let image = [0.5, -1.0, 2.0];
        let absent = combiner.combine(None, Some(&image)).unwrap();
        let zeros = combiner.combine(Some(&[0.0; 4]), Some(&image)).unwrap();
        assert_eq!(absent, zeros);
        assert_eq!(absent.dimension(), 7);
    }

    #[test]
    fn wrong_segment_length_is_dimension_mismatch() {
        let combiner = VectorCombiner::new(2, 2);
        let err = combiner.combine(Some(&[1.0]), Some(&[1.0, 0.0])).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    proptest! {
        #[test]
        fn normalize_yields_unit_norm(values in prop::collection::vec(-1.0e3f32..1.0e3, 1..64)) {
            prop_assume!(values.iter().any(|v| v.abs() > 1.0e-3));
            let out = normalize(&values);
            prop_assert!(!out.degenerate);
            prop_assert!((l2_norm(&out.vector) - 1.0).abs() < 1.0e-5);
        }

        #[test]
        fn combine_absent_image_matches_zero_image(
            text in prop::collection::vec(-10.0f32..10.0, 3),
        ) {
            let combiner = VectorCombiner::new(3, 5);
            let absent = combiner.combine(Some(&text), None).unwrap();
            let zeros = combiner.combine(Some(&text), Some(&[0.0; 5])).unwrap();
            prop_assert_eq!(absent, zeros);
        }
    }
}
