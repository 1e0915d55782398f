use anyhow::{Context, Result};
use faceprint_core::{ModelProfile, OnnxFaceModel, ProfileName, Verifier};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables and overridden by flags.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Recognition model profile (default: vgg-face).
    pub profile: ProfileName,
    /// Cosine-distance threshold replacing the profile's calibrated value.
    pub threshold_override: Option<f32>,
    /// Use the strict detector confidence cut-off.
    pub enforce_detection: bool,
}

impl Config {
    /// Load configuration from `FACEPRINT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = get("FACEPRINT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(faceprint_core::default_model_dir);

        let profile = match get("FACEPRINT_PROFILE") {
            Some(name) => name.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring FACEPRINT_PROFILE");
                ProfileName::default()
            }),
            None => ProfileName::default(),
        };

        let threshold_override = get("FACEPRINT_DISTANCE_THRESHOLD").and_then(|v| {
            parse_threshold(&v)
                .map_err(|e| tracing::warn!(error = %e, "ignoring FACEPRINT_DISTANCE_THRESHOLD"))
                .ok()
        });

        Self {
            model_dir,
            profile,
            threshold_override,
            enforce_detection: get("FACEPRINT_ENFORCE_DETECTION")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }

    pub fn model_profile(&self) -> Result<&'static ModelProfile> {
        self.profile
            .profile()
            .with_context(|| format!("profile {} is not built in", self.profile))
    }

    /// Verifier using the profile's threshold unless overridden.
    pub fn verifier(&self) -> Result<Verifier> {
        let profile = self.model_profile()?;
        let calibrated = Verifier::for_profile(profile);
        match self.threshold_override {
            Some(t) if (t - calibrated.threshold()).abs() > f32::EPSILON => {
                tracing::warn!(
                    threshold = t,
                    calibrated = calibrated.threshold(),
                    profile = profile.name(),
                    "distance threshold overridden; it is only meaningful for the model it was calibrated on"
                );
                Ok(Verifier::new(t))
            }
            _ => Ok(calibrated),
        }
    }

    /// Load detector and recognizer for the configured profile.
    pub fn load_model(&self) -> Result<OnnxFaceModel> {
        let profile = self.model_profile()?;
        OnnxFaceModel::load(&self.model_dir, profile, self.enforce_detection)
            .with_context(|| format!("loading models from {}", self.model_dir.display()))
    }
}

/// Parse a cosine-distance threshold, which must lie in (0, 2].
pub fn parse_threshold(s: &str) -> Result<f32, String> {
    let t: f32 = s.trim().parse().map_err(|e| format!("{s:?} is not a number: {e}"))?;
    if t.is_finite() && t > 0.0 && t <= 2.0 {
        Ok(t)
    } else {
        Err(format!("threshold {t} outside (0, 2]"))
    }
}
