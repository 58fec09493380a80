//! Command-line surface of the `stylegan2` binary.

use std::path::{Path, PathBuf};

use clap::{ArgMatches, Parser, Subcommand, parser::ValueSource};
use stylegan2_config::{ConfigError, TrainParams};

#[derive(Parser)]
#[command(name = "stylegan2", about = "StyleGAN2 training launcher", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model, or sample from one with --generate / --generate-interpolation
    Train {
        /// TOML file with run parameters; explicit flags take precedence
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker program hosting the trainer
        #[arg(long, env = "STYLEGAN2_TRAINER_PROGRAM")]
        trainer_program: Option<String>,

        /// Argument for the worker program (repeatable)
        #[arg(long = "trainer-arg", allow_hyphen_values = true)]
        trainer_args: Vec<String>,

        #[command(flatten)]
        params: TrainParams,
    },

    /// List checkpoints of a run
    Checkpoints {
        #[arg(long, default_value = "./models")]
        models_dir: String,

        #[arg(long, default_value = "default")]
        name: String,
    },

    /// Print the resolved configuration as TOML
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        params: TrainParams,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Layer `config` over the parsed flags, keeping flags the user actually set.
///
/// `matches` are the subcommand's matches; a flag counts as set when its
/// value came from the command line or the environment.
pub fn resolve(
    params: TrainParams,
    config: Option<&Path>,
    matches: &ArgMatches,
) -> Result<TrainParams, ConfigError> {
    let Some(path) = config else {
        return Ok(params);
    };

    tracing::info!("Loading run configuration from {}", path.display());
    params.with_file_overrides(path, |key| {
        matches.ids().any(|id| id.as_str() == key)
            && matches!(
                matches.value_source(key),
                Some(ValueSource::CommandLine | ValueSource::EnvVariable)
            )
    })
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, FromArgMatches};

    use super::*;

    fn resolve_argv(argv: &[&str]) -> TrainParams {
        let matches = Cli::command().try_get_matches_from(argv).unwrap();
        let sub_matches = matches.subcommand().unwrap().1.clone();
        match Cli::from_arg_matches(&matches).unwrap().command {
            Commands::Train { config, params, .. } | Commands::Config { config, params } => {
                resolve(params, config.as_deref(), &sub_matches).unwrap()
            }
            _ => panic!("expected a command with run parameters"),
        }
    }

    fn run_file(dir: &Path) -> String {
        let path = dir.join("run.toml");
        std::fs::write(
            &path,
            r#"
name = "from-file"
batch_size = 8
image_size = 256
upload_models = false
"#,
        )
        .unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_file_beats_defaults_and_flags_beat_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = run_file(dir.path());

        let params = resolve_argv(&[
            "stylegan2",
            "train",
            "--config",
            &path,
            "--batch-size",
            "16",
            "--upload-models",
            "true",
        ]);

        assert_eq!(params.name, "from-file");
        assert_eq!(params.model.image_size, 256);
        assert_eq!(params.optim.batch_size, 16);
        assert!(params.checkpoint.upload_models);
        assert_eq!(params.optim.gradient_accumulate_every, 6);
    }

    #[test]
    fn test_flag_equal_to_default_still_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = run_file(dir.path());

        let params = resolve_argv(&["stylegan2", "config", "-c", &path, "--image-size", "128"]);

        assert_eq!(params.model.image_size, 128);
        assert_eq!(params.optim.batch_size, 8);
    }

    #[test]
    fn test_without_config_flags_are_used_as_is() {
        let params = resolve_argv(&["stylegan2", "train", "--name", "faces", "--load-from", "-1"]);
        assert_eq!(params.name, "faces");
        assert_eq!(params, {
            let mut expected = TrainParams::default();
            expected.name = "faces".into();
            expected
        });
    }
}
