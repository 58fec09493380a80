#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

//! StyleGAN2 Training Launcher
//!
//! Drives an external trainer process through training or sampling, fans
//! training out across GPUs, and prunes and uploads checkpoints as they are
//! written.

pub mod blob;
pub mod checkpoint;
pub mod cli;
pub mod distributed;
pub mod generate;
pub mod protocol;
pub mod session;
pub mod trainer;
pub mod worker;

pub use blob::{AzureBlobStore, BlobStore};
pub use checkpoint::{CheckpointHook, SaveReport};
pub use distributed::{ProcessGroup, TrainerFactory, launch};
pub use session::{Session, run_training};
pub use trainer::{TrainError, Trainer};
pub use worker::{WorkerCommand, WorkerFactory, WorkerTrainer};
