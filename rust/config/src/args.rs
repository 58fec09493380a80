//! Arguments handed to the external trainer.

use serde::{Deserialize, Serialize};

use crate::{AugType, TrainParams};

/// Keyword arguments for the trainer constructor.
///
/// Checkpoint policy and blob settings stay with the launcher and are never
/// forwarded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrainerArgs {
    pub name: String,
    pub results_dir: String,
    pub models_dir: String,
    pub batch_size: usize,
    pub gradient_accumulate_every: usize,
    pub image_size: usize,
    pub network_capacity: usize,
    pub fmap_max: usize,
    pub transparent: bool,
    pub lr: f64,
    pub lr_mlp: f64,
    pub ttur_mult: f64,
    pub rel_disc_loss: bool,
    pub num_workers: Option<usize>,
    pub save_every: usize,
    pub evaluate_every: usize,
    pub num_image_tiles: usize,
    pub trunc_psi: f64,
    pub fp16: bool,
    pub no_pl_reg: bool,
    pub cl_reg: bool,
    pub fq_layers: Vec<usize>,
    pub fq_dict_size: usize,
    pub attn_layers: Vec<usize>,
    pub no_const: bool,
    pub aug_prob: f64,
    pub aug_types: Vec<AugType>,
    pub top_k_training: bool,
    pub generator_top_k_gamma: f64,
    pub generator_top_k_frac: f64,
    pub dual_contrast_loss: bool,
    pub dataset_aug_prob: f64,
    pub calculate_fid_every: Option<usize>,
    pub calculate_fid_num_images: usize,
    pub clear_fid_cache: bool,
    pub mixed_prob: f64,
    pub log: bool,
    pub lookahead: bool,
    pub lookahead_alpha: f64,
    pub lookahead_k: usize,
    pub ema_beta: f64,
    pub is_ddp: bool,
    pub rank: usize,
    pub world_size: usize,
}

impl TrainerArgs {
    /// Assemble trainer arguments for one rank of a run.
    #[must_use]
    pub fn new(params: &TrainParams, rank: usize, world_size: usize) -> Self {
        let TrainParams {
            model, optim, aug, eval, ..
        } = params;

        Self {
            name: params.name.clone(),
            results_dir: params.results_dir.clone(),
            models_dir: params.models_dir.clone(),
            batch_size: optim.batch_size,
            gradient_accumulate_every: optim.gradient_accumulate_every,
            image_size: model.image_size,
            network_capacity: model.network_capacity,
            fmap_max: model.fmap_max,
            transparent: model.transparent,
            lr: optim.learning_rate,
            lr_mlp: optim.lr_mlp,
            ttur_mult: optim.ttur_mult,
            rel_disc_loss: optim.rel_disc_loss,
            num_workers: params.num_workers,
            save_every: eval.save_every,
            evaluate_every: eval.evaluate_every,
            num_image_tiles: eval.num_image_tiles,
            trunc_psi: eval.trunc_psi,
            fp16: optim.fp16,
            no_pl_reg: optim.no_pl_reg,
            cl_reg: optim.cl_reg,
            fq_layers: model.fq_layers.clone(),
            fq_dict_size: model.fq_dict_size,
            attn_layers: model.attn_layers.clone(),
            no_const: model.no_const,
            aug_prob: aug.aug_prob,
            aug_types: aug.aug_types.clone(),
            top_k_training: optim.top_k_training,
            generator_top_k_gamma: optim.generator_top_k_gamma,
            generator_top_k_frac: optim.generator_top_k_frac,
            dual_contrast_loss: optim.dual_contrast_loss,
            dataset_aug_prob: aug.dataset_aug_prob,
            calculate_fid_every: eval.calculate_fid_every,
            calculate_fid_num_images: eval.calculate_fid_num_images,
            clear_fid_cache: eval.clear_fid_cache,
            mixed_prob: optim.mixed_prob,
            log: eval.log,
            lookahead: optim.lookahead,
            lookahead_alpha: optim.lookahead_alpha,
            lookahead_k: optim.lookahead_k,
            ema_beta: optim.ema_beta,
            is_ddp: world_size > 1,
            rank,
            world_size,
        }
    }

    /// Arguments for a single-process run (generation, or one GPU).
    #[must_use]
    pub fn single(params: &TrainParams) -> Self {
        Self::new(params, 0, 1)
    }
}
