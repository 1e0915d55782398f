//! faceprint-core: face embedding and verification engine.
//!
//! Uses SCRFD for face detection and a profile-selected recognizer
//! (VGG-Face or ArcFace), both running via ONNX Runtime on the CPU.
//! Verification is a fixed-threshold cosine-distance check whose
//! threshold travels with the model profile.

pub mod alignment;
pub mod detector;
pub mod pipeline;
pub mod profile;
pub mod recognizer;
pub mod types;
pub mod verifier;

pub use detector::FaceDetector;
pub use pipeline::{generate_embedding, EmbedError, EmbeddingModel, OnnxFaceModel};
pub use profile::{lookup_profile, ModelProfile, ProfileName};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding, Representation};
pub use verifier::{Verifier, VerifyError, VerifyOutcome};

use std::path::PathBuf;

/// Default directory for ONNX model files.
///
/// `$XDG_DATA_HOME/faceprint/models`, falling back to
/// `$HOME/.local/share/faceprint/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceprint")
        .join("models")
}
