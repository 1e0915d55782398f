//! Face recognizer via ONNX Runtime.
//!
//! Turns an aligned face crop into a fixed-length embedding. Input size,
//! normalization, channel order and output dimension come from the
//! [`ModelProfile`], so the same code drives VGG-Face and ArcFace graphs.

use crate::profile::{ChannelOrder, ModelProfile};
use crate::types::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; export the recognition model to ONNX and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is {actual}x{actual}, model expects {expected}x{expected}")]
    CropSize { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Profile-driven face recognizer.
pub struct FaceRecognizer {
    session: Session,
    profile: &'static ModelProfile,
}

impl FaceRecognizer {
    /// Load the recognition model for `profile` from the given path.
    pub fn load(model_path: &Path, profile: &'static ModelProfile) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            profile = profile.name(),
            version = %profile.model.version,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session, profile })
    }

    /// Side length of the square crop this recognizer consumes.
    pub fn input_size(&self) -> u32 {
        self.profile.input.size as u32
    }

    /// Extract an L2-normalized embedding from an aligned face crop.
    pub fn extract(&mut self, chip: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = preprocess(chip, self.profile)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values = postprocess(raw_data.to_vec(), self.profile.embedding.dim)?;

        Ok(Embedding::new(values))
    }
}

/// Convert a square crop into a NCHW float tensor per the profile's `[input]` section.
fn preprocess(chip: &RgbImage, profile: &ModelProfile) -> Result<Array4<f32>, RecognizerError> {
    let size = profile.input.size;
    let (w, h) = chip.dimensions();
    if w as usize != size || h as usize != size {
        return Err(RecognizerError::CropSize { expected: size, actual: w.max(h) as usize });
    }

    let (mean, std) = (profile.input.mean, profile.input.std);
    let channels: [usize; 3] = match profile.input.channel_order {
        ChannelOrder::Rgb => [0, 1, 2],
        ChannelOrder::Bgr => [2, 1, 0],
    };

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in chip.enumerate_pixels() {
        for (plane, &src) in channels.iter().enumerate() {
            tensor[[0, plane, y as usize, x as usize]] = (pixel[src] as f32 - mean) / std;
        }
    }
    Ok(tensor)
}

/// Check the output dimension and L2-normalize.
fn postprocess(raw: Vec<f32>, expected_dim: usize) -> Result<Vec<f32>, RecognizerError> {
    if raw.len() != expected_dim {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {expected_dim}-dim embedding, got {}",
            raw.len()
        )));
    }
    if raw.iter().any(|x| !x.is_finite()) {
        return Err(RecognizerError::InferenceFailed("embedding contains non-finite values".into()));
    }

    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    Ok(if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    })
}
