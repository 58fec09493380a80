//! The external trainer, as seen by the launcher.

use async_trait::async_trait;
use stylegan2_config::{LoadFrom, TrainerArgs};

use crate::{
    checkpoint::{CheckpointError, CheckpointHook},
    distributed::ProcessGroup,
};

/// Operations the launcher drives on a GAN trainer.
///
/// `steps` and `checkpoint_num` reflect the trainer's counters after the most
/// recent call.
#[async_trait]
pub trait Trainer: Send {
    async fn init(&mut self, args: TrainerArgs) -> Result<(), TrainError>;

    async fn init_process_group(&mut self, group: &ProcessGroup) -> Result<(), TrainError>;

    async fn destroy_process_group(&mut self) -> Result<(), TrainError>;

    async fn load(&mut self, from: LoadFrom) -> Result<(), TrainError>;

    /// Discard previous results and checkpoints for this run.
    async fn clear(&mut self) -> Result<(), TrainError>;

    async fn set_data_src(&mut self, path: &str) -> Result<(), TrainError>;

    /// One training step.
    async fn train(&mut self) -> Result<(), TrainError>;

    async fn save(&mut self, num: u64) -> Result<(), TrainError>;

    async fn evaluate(&mut self, name: &str, num_image_tiles: usize) -> Result<(), TrainError>;

    async fn generate_interpolation(
        &mut self,
        name: &str,
        num_image_tiles: usize,
        num_steps: usize,
        save_frames: bool,
    ) -> Result<(), TrainError>;

    /// Current loss summary, if the trainer has one.
    async fn print_log(&mut self) -> Result<Option<String>, TrainError>;

    fn steps(&self) -> u64;

    fn checkpoint_num(&self) -> u64;

    /// Run `hook` after every checkpoint the trainer writes.
    fn set_save_hook(&mut self, hook: CheckpointHook);

    async fn shutdown(&mut self) -> Result<(), TrainError>;
}

/// Errors that can occur while driving a trainer.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("NaN detected: {0}")]
    Nan(String),
    #[error("trainer failed during {op}: {message}")]
    Worker { op: &'static str, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to spawn worker {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("checkpoint hook failed: {0}")]
    Hook(#[from] CheckpointError),
    #[error("worker exited (code {code:?}):\n{stderr_tail}")]
    Closed {
        code: Option<i32>,
        stderr_tail: String,
    },
}

impl TrainError {
    /// Whether the failed step may simply be run again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Nan(_))
    }
}
