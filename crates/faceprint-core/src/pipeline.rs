//! Image → embedding pipeline.
//!
//! [`EmbeddingModel`] is the seam between the CLI and the pretrained
//! models: it maps a decoded image to one [`Representation`] per face.
//! [`OnnxFaceModel`] implements it with SCRFD detection, landmark alignment
//! and a profile-driven recognizer.

use crate::alignment;
use crate::detector::{DetectorError, FaceDetector};
use crate::profile::ModelProfile;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, Representation};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD detector file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("cannot read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("no face detected")]
    NoFaceDetected,
}

/// Something that can turn an image into face embeddings.
pub trait EmbeddingModel {
    /// Return one representation per detected face, most confident first.
    fn represent(&mut self, image: &RgbImage) -> Result<Vec<Representation>, EmbedError>;
}

/// Detection + alignment + recognition backed by ONNX Runtime.
pub struct OnnxFaceModel {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceModel {
    /// Load both models from `model_dir`. Fails fast if either file is missing.
    pub fn load(
        model_dir: &Path,
        profile: &'static ModelProfile,
        enforce_detection: bool,
    ) -> Result<Self, EmbedError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE), enforce_detection)?;
        let recognizer = FaceRecognizer::load(&model_dir.join(&profile.model.file), profile)?;
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingModel for OnnxFaceModel {
    fn represent(&mut self, image: &RgbImage) -> Result<Vec<Representation>, EmbedError> {
        let faces = self.detector.detect(image)?;
        let out_size = self.recognizer.input_size();

        let mut reps = Vec::with_capacity(faces.len());
        for face in faces {
            let chip = alignment::face_chip(image, &face, out_size);
            let embedding = self.recognizer.extract(&chip)?;
            reps.push(Representation { embedding, face });
        }
        Ok(reps)
    }
}

/// Decode an image file into RGB8.
pub fn load_image(path: &Path) -> Result<RgbImage, EmbedError> {
    let image = image::open(path).map_err(|source| EmbedError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Embed the first (most confident) face found in the image at `path`.
pub fn generate_embedding<M: EmbeddingModel + ?Sized>(
    model: &mut M,
    path: &Path,
) -> Result<Embedding, EmbedError> {
    let image = load_image(path)?;
    let reps = model.represent(&image)?;
    tracing::debug!(path = %path.display(), faces = reps.len(), "represented image");

    let first = reps.into_iter().next().ok_or(EmbedError::NoFaceDetected)?;
    if first.embedding.values.is_empty() {
        return Err(EmbedError::NoFaceDetected);
    }

    tracing::info!(
        confidence = first.face.confidence,
        dim = first.embedding.dim(),
        "embedding generated"
    );
    Ok(first.embedding)
}
