//! Recognition model profiles.
//!
//! A profile couples a recognition model with the preprocessing it expects
//! and the cosine-distance threshold that is meaningful for its embedding
//! space. Profiles are embedded at compile time from `contrib/profiles/*.toml`.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

const PROFILE_VGG_FACE: &str = include_str!("../../../contrib/profiles/vgg-face.toml");
const PROFILE_ARCFACE: &str = include_str!("../../../contrib/profiles/arcface.toml");

/// Profile used when none is requested.
pub const DEFAULT_PROFILE: &str = "vgg-face";

static PROFILE_DB: OnceLock<Vec<ModelProfile>> = OnceLock::new();

/// Top-level profile file structure (one per `contrib/profiles/*.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct ModelProfile {
    pub model: ModelInfo,
    pub input: InputSpec,
    pub embedding: EmbeddingSpec,
}

/// `[model]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// ONNX file name, resolved against the model directory.
    pub file: String,
    /// Tag recorded on every embedding this model produces.
    pub version: String,
}

/// `[input]` section: recognizer tensor layout and normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct InputSpec {
    /// Side length of the square aligned crop.
    pub size: usize,
    pub mean: f32,
    pub std: f32,
    pub channel_order: ChannelOrder,
}

/// `[embedding]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSpec {
    pub dim: usize,
    /// Cosine distance below which two embeddings are the same identity.
    pub distance_threshold: f32,
}

/// Channel order of the recognizer input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

impl ModelProfile {
    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn distance_threshold(&self) -> f32 {
        self.embedding.distance_threshold
    }
}

fn profile_db() -> &'static Vec<ModelProfile> {
    PROFILE_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [PROFILE_VGG_FACE, PROFILE_ARCFACE] {
            match toml::from_str::<ModelProfile>(src) {
                Ok(p) => db.push(p),
                Err(e) => tracing::error!(error = %e, "bad built-in profile TOML"),
            }
        }
        db
    })
}

/// Look up a built-in profile by name.
pub fn lookup_profile(name: &str) -> Option<&'static ModelProfile> {
    profile_db().iter().find(|p| p.model.name == name)
}

/// List all built-in profiles.
pub fn list_profiles() -> &'static [ModelProfile] {
    profile_db()
}

/// Name of a built-in profile, validated at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileName(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProfile(pub String);

impl fmt::Display for UnknownProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known: Vec<&str> = list_profiles().iter().map(|p| p.name()).collect();
        write!(f, "unknown profile {:?} (known: {})", self.0, known.join(", "))
    }
}

impl std::error::Error for UnknownProfile {}

impl FromStr for ProfileName {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match lookup_profile(s) {
            Some(p) => Ok(Self(p.model.name.clone())),
            None => Err(UnknownProfile(s.to_string())),
        }
    }
}

impl Default for ProfileName {
    fn default() -> Self {
        Self(DEFAULT_PROFILE.to_string())
    }
}

impl ProfileName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve to the embedded profile. Names are validated on construction.
    pub fn profile(&self) -> Option<&'static ModelProfile> {
        lookup_profile(&self.0)
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
