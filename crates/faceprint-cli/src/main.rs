use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use faceprint_core::{generate_embedding, Embedding, EmbeddingModel, ProfileName, Verifier};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::{parse_threshold, Config};

const DEFAULT_LOG_DIRECTIVE: &str = "warn";

#[derive(Parser, Debug)]
#[command(
    name = "faceprint",
    version,
    about = "Face embedding generation and verification",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Directory containing det_10g.onnx and the recognition model
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Recognition model profile (vgg-face, arcface)
    #[arg(long, global = true)]
    profile: Option<ProfileName>,
    /// Cosine-distance threshold, replacing the profile's calibrated value
    #[arg(long, global = true, value_parser = parse_threshold)]
    threshold: Option<f32>,
    /// Only accept confidently detected faces
    #[arg(long, global = true)]
    enforce_detection: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the embedding of the most confident face as a JSON array
    Generate {
        image_path: PathBuf,
    },
    /// Print whether the image matches a stored JSON embedding
    Verify {
        image_path: PathBuf,
        /// Target embedding as a JSON number array
        #[arg(allow_hyphen_values = true)]
        embedding: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return usage_failure(e),
    };

    let mut config = Config::from_env();
    config.apply(cli.opts);

    match cli.command {
        Commands::Generate { image_path } => match generate(&config, &image_path) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("Error generating embedding: {e:#}");
                ExitCode::FAILURE
            }
        },
        Commands::Verify { image_path, embedding } => {
            let matched = verify(&config, &image_path, &embedding).unwrap_or_else(|e| {
                tracing::error!("Error verifying face: {e:#}");
                false
            });
            println!("{}", serde_json::Value::Bool(matched));
            ExitCode::SUCCESS
        }
    }
}

/// `RUST_LOG` when set, otherwise warnings and errors.
fn log_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
}

/// Map argument errors onto the exit-code contract: unknown or missing
/// commands print `Invalid command`, everything else keeps clap's message.
fn usage_failure(e: clap::Error) -> ExitCode {
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = e.print();
            ExitCode::SUCCESS
        }
        kind if is_invalid_command(kind) => {
            eprintln!("Invalid command");
            ExitCode::FAILURE
        }
        _ => {
            let _ = e.print();
            ExitCode::FAILURE
        }
    }
}

fn is_invalid_command(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::InvalidSubcommand
            | ErrorKind::MissingSubcommand
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
    )
}

impl Config {
    fn apply(&mut self, opts: GlobalOpts) {
        if let Some(dir) = opts.model_dir {
            self.model_dir = dir;
        }
        if let Some(profile) = opts.profile {
            self.profile = profile;
        }
        if opts.threshold.is_some() {
            self.threshold_override = opts.threshold;
        }
        self.enforce_detection |= opts.enforce_detection;
    }
}

fn generate(config: &Config, image_path: &Path) -> Result<String> {
    let mut model = config.load_model()?;
    generate_with(&mut model, image_path)
}

fn generate_with<M: EmbeddingModel>(model: &mut M, image_path: &Path) -> Result<String> {
    let embedding = generate_embedding(model, image_path)
        .with_context(|| format!("generating embedding for {}", image_path.display()))?;
    Ok(embedding.to_json()?)
}

fn verify(config: &Config, image_path: &Path, target_json: &str) -> Result<bool> {
    // Reject a bad target before paying for model load.
    let target = parse_target(target_json)?;
    let verifier = config.verifier()?;
    let mut model = config.load_model()?;
    verify_with(&mut model, &verifier, image_path, &target)
}

fn parse_target(target_json: &str) -> Result<Embedding> {
    Embedding::from_json(target_json)
        .map_err(faceprint_core::VerifyError::from)
        .context("parsing target embedding")
}

fn verify_with<M: EmbeddingModel>(
    model: &mut M,
    verifier: &Verifier,
    image_path: &Path,
    target: &Embedding,
) -> Result<bool> {
    let outcome = verifier
        .verify_image(model, image_path, target)
        .with_context(|| format!("verifying {}", image_path.display()))?;
    tracing::info!(
        matched = outcome.matched,
        distance = outcome.distance,
        threshold = outcome.threshold,
        "verification finished"
    );
    Ok(outcome.matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceprint_core::{BoundingBox, EmbedError, Representation};
    use image::{Rgb, RgbImage};

    /// Embeds the colour of the top-left pixel; a black pixel means no face.
    struct CornerPixelModel;

    impl EmbeddingModel for CornerPixelModel {
        fn represent(&mut self, image: &RgbImage) -> Result<Vec<Representation>, EmbedError> {
            let p = image.get_pixel(0, 0);
            if p.0 == [0, 0, 0] {
                return Ok(Vec::new());
            }
            Ok(vec![Representation {
                embedding: Embedding::new(p.0.iter().map(|&c| c as f32).collect()),
                face: BoundingBox {
                    x: 0.0, y: 0.0, width: 1.0, height: 1.0,
                    confidence: 0.99, landmarks: None,
                },
            }])
        }
    }

    fn image_file(name: &str, colour: [u8; 3]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("faceprint-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        RgbImage::from_pixel(4, 4, Rgb(colour)).save(&path).unwrap();
        path
    }

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("faceprint").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_generate() {
        let cli = parse(&["generate", "face.jpg"]).unwrap();
        assert!(matches!(cli.command, Commands::Generate { ref image_path } if image_path == Path::new("face.jpg")));
    }

    #[test]
    fn test_parse_verify_with_json_argument() {
        let cli = parse(&["verify", "face.jpg", "[0.1, -0.2]"]).unwrap();
        match cli.command {
            Commands::Verify { image_path, embedding } => {
                assert_eq!(image_path, PathBuf::from("face.jpg"));
                assert_eq!(embedding, "[0.1, -0.2]");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_options_after_subcommand() {
        let cli = parse(&[
            "verify", "face.jpg", "[1]",
            "--profile", "arcface", "--threshold", "0.5", "--enforce-detection",
        ])
        .unwrap();
        assert_eq!(cli.opts.profile.as_ref().map(|p| p.as_str()), Some("arcface"));
        assert_eq!(cli.opts.threshold, Some(0.5));
        assert!(cli.opts.enforce_detection);
    }

    #[test]
    fn test_unknown_command_is_invalid_command() {
        let err = parse(&["enroll", "face.jpg"]).unwrap_err();
        assert!(is_invalid_command(err.kind()), "kind {:?}", err.kind());
    }

    #[test]
    fn test_missing_command_is_invalid_command() {
        let err = parse(&[]).unwrap_err();
        assert!(is_invalid_command(err.kind()), "kind {:?}", err.kind());
    }

    #[test]
    fn test_help_subcommand_is_invalid_command() {
        for args in [&["help"][..], &["help", "generate"][..]] {
            let err = parse(args).unwrap_err();
            assert!(is_invalid_command(err.kind()), "{args:?}: kind {:?}", err.kind());
            assert_eq!(usage_failure(err), ExitCode::FAILURE);
        }
    }

    #[test]
    fn test_invalid_command_exits_one() {
        assert_eq!(usage_failure(parse(&["enroll", "face.jpg"]).unwrap_err()), ExitCode::FAILURE);
        assert_eq!(usage_failure(parse(&[]).unwrap_err()), ExitCode::FAILURE);
    }

    #[test]
    fn test_missing_argument_exits_one() {
        let err = parse(&["verify", "face.jpg"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(usage_failure(err), ExitCode::FAILURE);
    }

    #[test]
    fn test_help_and_version_flags_succeed() {
        assert_eq!(usage_failure(parse(&["--help"]).unwrap_err()), ExitCode::SUCCESS);
        assert_eq!(usage_failure(parse(&["--version"]).unwrap_err()), ExitCode::SUCCESS);
    }

    #[test]
    fn test_log_filter_defaults_to_warn() {
        use tracing_subscriber::filter::LevelFilter;
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(log_filter(Some("  ".into())).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(log_filter(Some("debug".into())).max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_hyphenated_target_reaches_verify() {
        let cli = parse(&["verify", "face.jpg", "-0.5"]).unwrap();
        match cli.command {
            Commands::Verify { embedding, .. } => {
                assert_eq!(embedding, "-0.5");
                assert!(parse_target(&embedding).is_err());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_missing_argument_is_not_invalid_command() {
        let err = parse(&["verify", "face.jpg"]).unwrap_err();
        assert!(!is_invalid_command(err.kind()));
    }

    #[test]
    fn test_bad_threshold_rejected() {
        assert!(parse(&["generate", "x.jpg", "--threshold", "3"]).is_err());
        assert!(parse(&["generate", "x.jpg", "--profile", "facenet"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "generate", "x.jpg", "--model-dir", "/srv/models", "--threshold", "0.3",
        ])
        .unwrap();
        let mut config = Config::from_lookup(|_| None);
        config.apply(cli.opts);
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert!((config.verifier().unwrap().threshold() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_generate_then_verify_roundtrip() {
        let path = image_file("self.png", [30, 60, 90]);
        let json = generate_with(&mut CornerPixelModel, &path).unwrap();
        assert_eq!(json, "[30.0,60.0,90.0]");

        let target = parse_target(&json).unwrap();
        let matched = verify_with(&mut CornerPixelModel, &Verifier::new(0.40), &path, &target).unwrap();
        assert!(matched);
    }

    #[test]
    fn test_generate_no_face_fails() {
        let path = image_file("dark.png", [0, 0, 0]);
        let err = generate_with(&mut CornerPixelModel, &path).unwrap_err();
        assert!(format!("{err:#}").contains("no face detected"));
    }

    #[test]
    fn test_verify_dimension_mismatch_fails() {
        let path = image_file("mismatch.png", [10, 20, 30]);
        let target = parse_target("[1.0, 2.0]").unwrap();
        assert!(verify_with(&mut CornerPixelModel, &Verifier::new(0.40), &path, &target).is_err());
    }

    #[test]
    fn test_malformed_target_is_handled() {
        let err = parse_target("[0.1, 0.2").unwrap_err();
        assert!(format!("{err:#}").contains("parsing target embedding"));
        assert!(parse_target("\"not an array\"").is_err());
    }
}
