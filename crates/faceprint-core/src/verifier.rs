//! Verification policy: fresh embedding vs stored target, by cosine distance.

use crate::pipeline::{self, EmbedError, EmbeddingModel};
use crate::profile::ModelProfile;
use crate::types::Embedding;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("target embedding is not a JSON number array: {0}")]
    MalformedTarget(#[from] serde_json::Error),
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("dimension mismatch: probe has {probe}, target has {target}")]
    DimensionMismatch { probe: usize, target: usize },
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

/// Result of comparing a probe against a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyOutcome {
    pub matched: bool,
    /// Cosine distance in [0, 2].
    pub distance: f32,
    pub threshold: f32,
}

/// Fixed-threshold cosine-distance verifier.
///
/// The threshold is only meaningful for the embedding space it was
/// calibrated on, so it is normally taken from the model profile.
#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    threshold: f32,
}

impl Verifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn for_profile(profile: &ModelProfile) -> Self {
        Self::new(profile.distance_threshold())
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Match iff `distance(probe, target) < threshold`.
    pub fn compare(&self, probe: &Embedding, target: &Embedding) -> Result<VerifyOutcome, VerifyError> {
        if probe.values.is_empty() || target.values.is_empty() {
            return Err(VerifyError::EmptyEmbedding);
        }
        if probe.dim() != target.dim() {
            return Err(VerifyError::DimensionMismatch {
                probe: probe.dim(),
                target: target.dim(),
            });
        }

        let distance = probe.cosine_distance(target);
        Ok(VerifyOutcome {
            matched: distance < self.threshold,
            distance,
            threshold: self.threshold,
        })
    }

    /// Embed the image at `path` and compare it with `target`.
    pub fn verify_image<M: EmbeddingModel + ?Sized>(
        &self,
        model: &mut M,
        path: &Path,
        target: &Embedding,
    ) -> Result<VerifyOutcome, VerifyError> {
        if target.values.is_empty() {
            return Err(VerifyError::EmptyEmbedding);
        }
        let probe = pipeline::generate_embedding(model, path)?;
        let outcome = self.compare(&probe, target)?;
        tracing::debug!(
            distance = outcome.distance,
            threshold = outcome.threshold,
            matched = outcome.matched,
            "verification compared"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{scratch_dir, write_image, MeanColourModel};
    use crate::profile::lookup_profile;

    #[test]
    fn test_profile_threshold() {
        let v = Verifier::for_profile(lookup_profile("vgg-face").unwrap());
        assert!((v.threshold() - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_compare_threshold_is_strict() {
        let v = Verifier::new(1.0);
        // Orthogonal vectors sit exactly at distance 1.0
        let out = v
            .compare(&Embedding::new(vec![1.0, 0.0]), &Embedding::new(vec![0.0, 1.0]))
            .unwrap();
        assert!((out.distance - 1.0).abs() < 1e-6);
        assert!(!out.matched);
    }

    #[test]
    fn test_compare_close_vectors_match() {
        let v = Verifier::new(0.40);
        let out = v
            .compare(&Embedding::new(vec![1.0, 0.1, 0.0]), &Embedding::new(vec![0.9, 0.2, 0.05]))
            .unwrap();
        assert!(out.matched, "distance {}", out.distance);
    }

    #[test]
    fn test_compare_is_symmetric() {
        let v = Verifier::new(0.40);
        let a = Embedding::new(vec![0.2, 0.9, -0.4]);
        let b = Embedding::new(vec![0.6, 0.1, 0.3]);
        let ab = v.compare(&a, &b).unwrap();
        let ba = v.compare(&b, &a).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_compare_dimension_mismatch() {
        let v = Verifier::new(0.40);
        let err = v
            .compare(&Embedding::new(vec![1.0; 3]), &Embedding::new(vec![1.0; 4]))
            .unwrap_err();
        assert!(matches!(err, VerifyError::DimensionMismatch { probe: 3, target: 4 }));
    }

    #[test]
    fn test_compare_zero_vector_never_matches() {
        let v = Verifier::new(0.40);
        let out = v
            .compare(&Embedding::new(vec![0.0, 0.0]), &Embedding::new(vec![1.0, 1.0]))
            .unwrap();
        assert!(!out.matched);
    }

    #[test]
    fn test_verify_own_embedding_matches() {
        let dir = scratch_dir("verify-self");
        let path = write_image(&dir, "face.png", [120, 80, 40]);
        let target = pipeline::generate_embedding(&mut MeanColourModel, &path).unwrap();

        // Through the wire format, as a caller would store it
        let stored = Embedding::from_json(&target.to_json().unwrap()).unwrap();
        let out = Verifier::new(0.40)
            .verify_image(&mut MeanColourModel, &path, &stored)
            .unwrap();
        assert!(out.matched);
        assert!(out.distance.abs() < 1e-6);
    }

    #[test]
    fn test_verify_different_image_rejected() {
        let dir = scratch_dir("verify-other");
        let red = write_image(&dir, "red.png", [255, 0, 0]);
        let blue = write_image(&dir, "blue.png", [0, 0, 255]);
        let target = pipeline::generate_embedding(&mut MeanColourModel, &red).unwrap();
        let out = Verifier::new(0.40)
            .verify_image(&mut MeanColourModel, &blue, &target)
            .unwrap();
        assert!(!out.matched);
    }

    #[test]
    fn test_verify_no_face_is_error() {
        let dir = scratch_dir("verify-noface");
        let black = write_image(&dir, "black.png", [0, 0, 0]);
        let err = Verifier::new(0.40)
            .verify_image(&mut MeanColourModel, &black, &Embedding::new(vec![1.0, 0.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Embed(EmbedError::NoFaceDetected)));
    }

    #[test]
    fn test_verify_empty_target_is_error() {
        let err = Verifier::new(0.40)
            .verify_image(&mut MeanColourModel, Path::new("/unused.png"), &Embedding::new(vec![]))
            .unwrap_err();
        assert!(matches!(err, VerifyError::EmptyEmbedding));
    }
}
