//! StyleGAN2 Training Launcher CLI
//!
//! Trains or samples a StyleGAN2 model through an external trainer worker,
//! and manages the checkpoints it leaves behind.

use std::{path::Path, sync::Arc};

use clap::{CommandFactory, FromArgMatches};
use indicatif::MultiProgress;
use stylegan2_launcher::{
    AzureBlobStore, BlobStore, ProcessGroup, TrainerFactory, WorkerCommand, WorkerFactory,
    checkpoint::{find_latest_checkpoint, list_checkpoints},
    cli::{Cli, Commands, resolve},
    generate::{generate_interpolation, generate_samples},
    launch,
};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // tracing needs to be initialized with indicatif_layer to not clobber progress bars
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with(indicatif_layer)
        .init();

    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    let sub_matches = matches
        .subcommand()
        .map(|(_, m)| m.clone())
        .unwrap_or_default();

    match cli.command {
        Commands::Train {
            config,
            trainer_program,
            trainer_args,
            params,
        } => {
            let params = Arc::new(resolve(params, config.as_deref(), &sub_matches)?);
            let command = match trainer_program {
                Some(program) => WorkerCommand::new(program, trainer_args),
                None => WorkerCommand::default(),
            };
            let factory = Arc::new(WorkerFactory::new(command, params.worker_log_dir()));
            let progress = MultiProgress::new();

            if params.run.generate || params.run.generate_interpolation {
                let mut trainer = factory.create(&ProcessGroup::single(params.seed)).await?;
                if params.run.generate {
                    generate_samples(&mut trainer, &params, &progress).await?;
                } else {
                    generate_interpolation(&mut trainer, &params).await?;
                }
                return Ok(());
            }

            let store: Option<Arc<dyn BlobStore>> = if params.checkpoint.upload_models {
                Some(Arc::new(AzureBlobStore::new(&params.blob)?))
            } else {
                None
            };

            tracing::info!("Training {} for {} steps", params.label(), params.run.num_train_steps);
            launch(params, factory, store, progress).await?;
        }

        Commands::Checkpoints { models_dir, name } => {
            let dir = Path::new(&models_dir).join(&name);
            let checkpoints = list_checkpoints(&dir)?;

            if checkpoints.is_empty() {
                println!("No checkpoints in {}.", dir.display());
                return Ok(());
            }

            println!("=== Checkpoints: {} ===", dir.display());
            println!();
            for ckpt in &checkpoints {
                println!(
                    "  {} ({:.1} MB)",
                    ckpt.path.display(),
                    ckpt.size_bytes as f64 / 1_000_000.0
                );
            }

            if let Some(latest) = find_latest_checkpoint(&dir) {
                println!();
                println!("Latest: {latest}");
            }
        }

        Commands::Config { config, params } => {
            let params = resolve(params, config.as_deref(), &sub_matches)?;
            print!("{}", params.to_toml()?);
        }

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stylegan2", &mut std::io::stdout());
        }
    }

    Ok(())
}
