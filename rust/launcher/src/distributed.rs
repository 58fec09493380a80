//! Fanning a training run out over the visible GPUs.
//!
//! Each rank is one tokio task driving its own trainer. Ranks share nothing
//! but the progress display; synchronisation between them is the trainer's
//! collective backend.

use std::sync::Arc;

use async_trait::async_trait;
use indicatif::MultiProgress;
use stylegan2_config::TrainParams;
use tokio::task::JoinSet;

use crate::{
    blob::BlobStore,
    session::{Session, run_training},
    trainer::{TrainError, Trainer},
};

pub const DEFAULT_BACKEND: &str = "nccl";
pub const DEFAULT_MASTER_ADDR: &str = "localhost";
pub const DEFAULT_MASTER_PORT: u16 = 12355;

/// One process's place in a distributed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGroup {
    pub rank: usize,
    pub world_size: usize,
    pub backend: String,
    pub master_addr: String,
    pub master_port: u16,
    pub seed: u64,
}

impl ProcessGroup {
    #[must_use]
    pub fn new(rank: usize, world_size: usize, seed: u64) -> Self {
        Self {
            rank,
            world_size,
            backend: DEFAULT_BACKEND.to_string(),
            master_addr: DEFAULT_MASTER_ADDR.to_string(),
            master_port: DEFAULT_MASTER_PORT,
            seed,
        }
    }

    /// A group of one.
    #[must_use]
    pub fn single(seed: u64) -> Self {
        Self::new(0, 1, seed)
    }

    #[must_use]
    pub fn is_main(&self) -> bool {
        self.rank == 0
    }

    #[must_use]
    pub fn is_ddp(&self) -> bool {
        self.world_size > 1
    }

    /// Environment for a process joining this group.
    #[must_use]
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RANK", self.rank.to_string()),
            ("LOCAL_RANK", self.rank.to_string()),
            ("WORLD_SIZE", self.world_size.to_string()),
            ("MASTER_ADDR", self.master_addr.clone()),
            ("MASTER_PORT", self.master_port.to_string()),
        ]
    }
}

/// Number of CUDA devices this process may use.
///
/// `CUDA_VISIBLE_DEVICES` wins when set; otherwise ask `nvidia-smi`. No
/// driver means no devices.
#[must_use]
pub fn device_count() -> usize {
    if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
        return count_visible_devices(&visible);
    }

    match std::process::Command::new("nvidia-smi").arg("-L").output() {
        Ok(output) if output.status.success() => {
            count_gpu_lines(&String::from_utf8_lossy(&output.stdout))
        }
        _ => 0,
    }
}

fn count_visible_devices(value: &str) -> usize {
    value.split(',').filter(|d| !d.trim().is_empty()).count()
}

fn count_gpu_lines(listing: &str) -> usize {
    listing
        .lines()
        .filter(|l| l.trim_start().starts_with("GPU"))
        .count()
}

/// Creates the trainer for one rank.
#[async_trait]
pub trait TrainerFactory: Send + Sync + 'static {
    type Trainer: Trainer + 'static;

    async fn create(&self, group: &ProcessGroup) -> Result<Self::Trainer, TrainError>;
}

/// Train on every visible device, or in a single process.
pub async fn launch<F: TrainerFactory>(
    params: Arc<TrainParams>,
    factory: Arc<F>,
    store: Option<Arc<dyn BlobStore>>,
    progress: MultiProgress,
) -> Result<(), LaunchError> {
    let world_size = if params.run.multi_gpus {
        device_count()
    } else {
        1
    };
    launch_ranks(params, factory, store, progress, world_size).await
}

/// Train with an explicit world size.
///
/// A world size of one or less runs rank 0 alone. Otherwise every rank gets
/// its own task; the first rank to fail aborts the rest and its error is
/// returned.
pub async fn launch_ranks<F: TrainerFactory>(
    params: Arc<TrainParams>,
    factory: Arc<F>,
    store: Option<Arc<dyn BlobStore>>,
    progress: MultiProgress,
    world_size: usize,
) -> Result<(), LaunchError> {
    if world_size <= 1 || !params.run.multi_gpus {
        let session = Session {
            group: ProcessGroup::single(params.seed),
            params,
            store,
            progress,
        };
        return run_rank(factory.as_ref(), session)
            .await
            .map_err(|source| LaunchError::Rank { rank: 0, source });
    }

    tracing::info!("Launching {world_size} ranks");

    let mut ranks = JoinSet::new();
    for rank in 0..world_size {
        let session = Session {
            params: params.clone(),
            group: ProcessGroup::new(rank, world_size, params.seed),
            store: store.clone(),
            progress: progress.clone(),
        };
        let factory = factory.clone();
        ranks.spawn(async move { (rank, run_rank(factory.as_ref(), session).await) });
    }

    while let Some(joined) = ranks.join_next().await {
        let failure = match joined {
            Ok((_, Ok(()))) => continue,
            Ok((rank, Err(source))) => LaunchError::Rank { rank, source },
            Err(e) => LaunchError::Join(e.to_string()),
        };
        tracing::error!("{failure}");
        ranks.abort_all();
        return Err(failure);
    }

    Ok(())
}

async fn run_rank<F: TrainerFactory>(factory: &F, session: Session) -> Result<(), TrainError> {
    let mut trainer = factory.create(&session.group).await?;
    run_training(&mut trainer, &session).await
}

/// Errors that can occur when launching ranks.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("rank {rank} failed: {source}")]
    Rank {
        rank: usize,
        #[source]
        source: TrainError,
    },
    #[error("rank task panicked or was cancelled: {0}")]
    Join(String),
}
