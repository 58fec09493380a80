//! Training hyperparameters and run options.

use serde::{Deserialize, Serialize};

use crate::{AugType, LoadFrom};

/// Generator/discriminator architecture.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct ModelParams {
    #[serde(default = "default_image_size")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "128"))]
    pub image_size: usize,
    #[serde(default = "default_network_capacity")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "16"))]
    pub network_capacity: usize,
    #[serde(default = "default_fmap_max")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "512"))]
    pub fmap_max: usize,
    /// Train on RGBA images.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub transparent: bool,
    /// Layers that get self-attention, e.g. `1,2`.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, value_delimiter = ','))]
    pub attn_layers: Vec<usize>,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub no_const: bool,
    /// Layers that get a vector-quantized bottleneck in the discriminator.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, value_delimiter = ','))]
    pub fq_layers: Vec<usize>,
    #[serde(default = "default_fq_dict_size")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "256"))]
    pub fq_dict_size: usize,
}

fn default_image_size() -> usize {
    128
}
fn default_network_capacity() -> usize {
    16
}
fn default_fmap_max() -> usize {
    512
}
fn default_fq_dict_size() -> usize {
    256
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
            network_capacity: default_network_capacity(),
            fmap_max: default_fmap_max(),
            transparent: false,
            attn_layers: Vec::new(),
            no_const: false,
            fq_layers: Vec::new(),
            fq_dict_size: default_fq_dict_size(),
        }
    }
}

/// Optimisation and regularisation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct OptimParams {
    #[serde(default = "default_batch_size")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "5"))]
    pub batch_size: usize,
    #[serde(default = "default_gradient_accumulate_every")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "6"))]
    pub gradient_accumulate_every: usize,
    #[serde(default = "default_learning_rate")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "2e-4"))]
    pub learning_rate: f64,
    #[serde(default = "default_lr_mlp")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.1"))]
    pub lr_mlp: f64,
    /// Discriminator learning rate multiplier (two time-scale update rule).
    #[serde(default = "default_ttur_mult")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "1.5"))]
    pub ttur_mult: f64,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub rel_disc_loss: bool,
    #[serde(default = "default_mixed_prob")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.9"))]
    pub mixed_prob: f64,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub fp16: bool,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub no_pl_reg: bool,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub cl_reg: bool,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub top_k_training: bool,
    #[serde(default = "default_generator_top_k_gamma")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.99"))]
    pub generator_top_k_gamma: f64,
    #[serde(default = "default_generator_top_k_frac")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.5"))]
    pub generator_top_k_frac: f64,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub dual_contrast_loss: bool,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub lookahead: bool,
    #[serde(default = "default_lookahead_alpha")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.5"))]
    pub lookahead_alpha: f64,
    #[serde(default = "default_lookahead_k")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "5"))]
    pub lookahead_k: usize,
    #[serde(default = "default_ema_beta")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.9999"))]
    pub ema_beta: f64,
}

fn default_batch_size() -> usize {
    5
}
fn default_gradient_accumulate_every() -> usize {
    6
}
fn default_learning_rate() -> f64 {
    2e-4
}
fn default_lr_mlp() -> f64 {
    0.1
}
fn default_ttur_mult() -> f64 {
    1.5
}
fn default_mixed_prob() -> f64 {
    0.9
}
fn default_generator_top_k_gamma() -> f64 {
    0.99
}
fn default_generator_top_k_frac() -> f64 {
    0.5
}
fn default_lookahead_alpha() -> f64 {
    0.5
}
fn default_lookahead_k() -> usize {
    5
}
fn default_ema_beta() -> f64 {
    0.9999
}

impl Default for OptimParams {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            gradient_accumulate_every: default_gradient_accumulate_every(),
            learning_rate: default_learning_rate(),
            lr_mlp: default_lr_mlp(),
            ttur_mult: default_ttur_mult(),
            rel_disc_loss: false,
            mixed_prob: default_mixed_prob(),
            fp16: false,
            no_pl_reg: false,
            cl_reg: false,
            top_k_training: false,
            generator_top_k_gamma: default_generator_top_k_gamma(),
            generator_top_k_frac: default_generator_top_k_frac(),
            dual_contrast_loss: false,
            lookahead: false,
            lookahead_alpha: default_lookahead_alpha(),
            lookahead_k: default_lookahead_k(),
            ema_beta: default_ema_beta(),
        }
    }
}

/// Augmentation settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct AugParams {
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.0"))]
    pub aug_prob: f64,
    #[serde(default = "default_aug_types")]
    #[cfg_attr(
        feature = "clap",
        arg(long, value_delimiter = ',', default_values = ["translation", "cutout"])
    )]
    pub aug_types: Vec<AugType>,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.0"))]
    pub dataset_aug_prob: f64,
}

fn default_aug_types() -> Vec<AugType> {
    vec![AugType::Translation, AugType::Cutout]
}

impl Default for AugParams {
    fn default() -> Self {
        Self {
            aug_prob: 0.0,
            aug_types: default_aug_types(),
            dataset_aug_prob: 0.0,
        }
    }
}

/// Saving, sampling and evaluation cadence.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct EvalParams {
    /// Steps between checkpoints written by the trainer.
    #[serde(default = "default_save_every")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "1000"))]
    pub save_every: usize,
    #[serde(default = "default_evaluate_every")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "1000"))]
    pub evaluate_every: usize,
    #[serde(default = "default_num_image_tiles")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "8"))]
    pub num_image_tiles: usize,
    #[serde(default = "default_trunc_psi")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0.75"))]
    pub trunc_psi: f64,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub calculate_fid_every: Option<usize>,
    #[serde(default = "default_calculate_fid_num_images")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "12800"))]
    pub calculate_fid_num_images: usize,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub clear_fid_cache: bool,
    /// Write trainer metrics to the results directory.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub log: bool,
}

fn default_save_every() -> usize {
    1000
}
fn default_evaluate_every() -> usize {
    1000
}
fn default_num_image_tiles() -> usize {
    8
}
fn default_trunc_psi() -> f64 {
    0.75
}
fn default_calculate_fid_num_images() -> usize {
    12800
}

impl Default for EvalParams {
    fn default() -> Self {
        Self {
            save_every: default_save_every(),
            evaluate_every: default_evaluate_every(),
            num_image_tiles: default_num_image_tiles(),
            trunc_psi: default_trunc_psi(),
            calculate_fid_every: None,
            calculate_fid_num_images: default_calculate_fid_num_images(),
            clear_fid_cache: false,
            log: false,
        }
    }
}

/// What this invocation does: train, resume, or generate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct RunOptions {
    /// Start from scratch, clearing previous results and checkpoints.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub new: bool,
    /// Checkpoint number to load, `-1` for the latest.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "-1", allow_hyphen_values = true))]
    pub load_from: LoadFrom,
    #[serde(default = "default_num_train_steps")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "150000"))]
    pub num_train_steps: u64,
    /// Fan out to every visible GPU.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub multi_gpus: bool,
    /// Generate sample images instead of training.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub generate: bool,
    #[serde(default = "default_num_generate")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "1"))]
    pub num_generate: usize,
    /// Generate a latent-space interpolation instead of training.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub generate_interpolation: bool,
    #[serde(default = "default_interpolation_num_steps")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "100"))]
    pub interpolation_num_steps: usize,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub save_frames: bool,
}

fn default_num_train_steps() -> u64 {
    150_000
}
fn default_num_generate() -> usize {
    1
}
fn default_interpolation_num_steps() -> usize {
    100
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            new: false,
            load_from: LoadFrom::Latest,
            num_train_steps: default_num_train_steps(),
            multi_gpus: false,
            generate: false,
            num_generate: default_num_generate(),
            generate_interpolation: false,
            interpolation_num_steps: default_interpolation_num_steps(),
            save_frames: false,
        }
    }
}

/// Full run configuration.
///
/// Every group is flattened, so field names are at once the CLI ids, the TOML
/// keys and the JSON keys.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct TrainParams {
    /// Folder of training images.
    #[serde(default = "default_data")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "./data"))]
    pub data: String,
    #[serde(default = "default_results_dir")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "./results"))]
    pub results_dir: String,
    #[serde(default = "default_models_dir")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "./models"))]
    pub models_dir: String,
    /// Run name; checkpoints live in `<models_dir>/<name>`.
    #[serde(default = "default_name")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "default"))]
    pub name: String,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub num_workers: Option<usize>,
    #[serde(default = "default_seed")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "42"))]
    pub seed: u64,
    #[serde(default, flatten)]
    #[cfg_attr(feature = "clap", command(flatten))]
    pub model: ModelParams,
    #[serde(default, flatten)]
    #[cfg_attr(feature = "clap", command(flatten))]
    pub optim: OptimParams,
    #[serde(default, flatten)]
    #[cfg_attr(feature = "clap", command(flatten))]
    pub aug: AugParams,
    #[serde(default, flatten)]
    #[cfg_attr(feature = "clap", command(flatten))]
    pub eval: EvalParams,
    #[serde(default, flatten)]
    #[cfg_attr(feature = "clap", command(flatten))]
    pub run: RunOptions,
    #[serde(default, flatten)]
    #[cfg_attr(feature = "clap", command(flatten))]
    pub checkpoint: crate::CheckpointPolicy,
    #[serde(default, flatten)]
    #[cfg_attr(feature = "clap", command(flatten))]
    pub blob: crate::BlobSettings,
}

fn default_data() -> String {
    "./data".into()
}
fn default_results_dir() -> String {
    "./results".into()
}
fn default_models_dir() -> String {
    "./models".into()
}
fn default_name() -> String {
    "default".into()
}
fn default_seed() -> u64 {
    42
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            data: default_data(),
            results_dir: default_results_dir(),
            models_dir: default_models_dir(),
            name: default_name(),
            num_workers: None,
            seed: default_seed(),
            model: ModelParams::default(),
            optim: OptimParams::default(),
            aug: AugParams::default(),
            eval: EvalParams::default(),
            run: RunOptions::default(),
            checkpoint: crate::CheckpointPolicy::default(),
            blob: crate::BlobSettings::default(),
        }
    }
}

impl TrainParams {
    /// Directory the trainer writes `model_<N>.pt` files into.
    #[must_use]
    pub fn checkpoint_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.models_dir).join(&self.name)
    }

    /// Directory the trainer writes samples and logs into.
    #[must_use]
    pub fn results_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.results_dir).join(&self.name)
    }

    /// Directory worker logs are appended to, `<results_dir>/<name>.logs`.
    ///
    /// Sits beside `results_path` so that clearing a run keeps its logs.
    #[must_use]
    pub fn worker_log_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.results_dir).join(format!("{}.logs", self.name))
    }

    /// Progress label, `name<data>`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}<{}>", self.name, self.data)
    }
}
