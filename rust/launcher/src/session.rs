//! The training loop for one rank.

use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use stylegan2_config::{TrainParams, TrainerArgs};

use crate::{
    blob::BlobStore,
    checkpoint::CheckpointHook,
    distributed::ProcessGroup,
    trainer::{TrainError, Trainer},
};

/// Attempts per training step when the trainer reports NaNs.
pub const NAN_TRIES: usize = 3;

/// Steps between loss summaries on the main rank.
pub const LOG_EVERY: u64 = 50;

/// Everything one rank needs to train.
#[derive(Clone)]
pub struct Session {
    pub params: Arc<TrainParams>,
    pub group: ProcessGroup,
    /// Upload target for the checkpoint hook; only rank 0 uses it.
    pub store: Option<Arc<dyn BlobStore>>,
    pub progress: MultiProgress,
}

/// Train until the step target, then save and shut the trainer down.
pub async fn run_training<T: Trainer + ?Sized>(
    trainer: &mut T,
    session: &Session,
) -> Result<(), TrainError> {
    let params = session.params.as_ref();
    let group = &session.group;
    let is_main = group.is_main();
    let is_ddp = group.is_ddp();

    if is_ddp {
        trainer.init_process_group(group).await?;
        tracing::info!("{}/{} process initialized.", group.rank + 1, group.world_size);
    }

    if is_main {
        let store = if params.checkpoint.upload_models {
            session.store.clone()
        } else {
            None
        };
        trainer.set_save_hook(CheckpointHook::new(params.checkpoint.clone(), store));
    }

    trainer
        .init(TrainerArgs::new(params, group.rank, group.world_size))
        .await?;

    if params.run.new {
        trainer.clear().await?;
    } else {
        trainer.load(params.run.load_from).await?;
    }

    trainer.set_data_src(&params.data).await?;

    let pb = session
        .progress
        .add(ProgressBar::new(params.run.num_train_steps));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {msg:30} [{wide_bar:.cyan/blue}] {pos:>7}/{len:7} [{eta:>5}]")
            .expect("progress template is valid")
            .progress_chars("#*-"),
    );
    pb.set_message(if is_ddp {
        format!("{} [rank {}]", params.label(), group.rank)
    } else {
        params.label()
    });
    pb.set_position(trainer.steps());

    while trainer.steps() < params.run.num_train_steps {
        if let Err(e) = train_step(trainer).await {
            pb.abandon_with_message(format!("{}: failed", params.label()));
            return Err(e);
        }
        pb.set_position(trainer.steps());

        if is_main
            && trainer.steps() % LOG_EVERY == 0
            && let Some(line) = trainer.print_log().await?
        {
            tracing::info!("{line}");
        }
    }
    pb.finish();

    let checkpoint_num = trainer.checkpoint_num();
    trainer.save(checkpoint_num).await?;

    if is_ddp {
        trainer.destroy_process_group().await?;
    }

    trainer.shutdown().await
}

/// One `train()` call, retried while the trainer reports NaNs.
pub async fn train_step<T: Trainer + ?Sized>(trainer: &mut T) -> Result<(), TrainError> {
    let mut attempt = 1;
    loop {
        match trainer.train().await {
            Err(e) if e.is_retryable() && attempt < NAN_TRIES => {
                tracing::warn!("{e}; retrying step ({attempt}/{NAN_TRIES})");
                attempt += 1;
            }
            result => return result,
        }
    }
}
