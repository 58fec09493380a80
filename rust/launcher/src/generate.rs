//! Sampling from a trained model instead of training it.

use chrono::{Local, NaiveDateTime};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use stylegan2_config::{TrainParams, TrainerArgs};

use crate::trainer::{TrainError, Trainer};

pub const DEFAULT_PREFIX: &str = "generated-";

const TIMESTAMP_FORMAT: &str = "%m-%d-%Y_%H-%M-%S";

/// `prefix` followed by the current local time.
#[must_use]
pub fn timestamped_filename(prefix: &str) -> String {
    timestamped_filename_at(prefix, Local::now().naive_local())
}

#[must_use]
pub fn timestamped_filename_at(prefix: &str, at: NaiveDateTime) -> String {
    format!("{prefix}{}", at.format(TIMESTAMP_FORMAT))
}

async fn prepare<T: Trainer + ?Sized>(trainer: &mut T, params: &TrainParams) -> Result<(), TrainError> {
    trainer.init(TrainerArgs::single(params)).await?;
    trainer.load(params.run.load_from).await
}

/// Render `num_generate` sample grids. Returns the samples name.
pub async fn generate_samples<T: Trainer + ?Sized>(
    trainer: &mut T,
    params: &TrainParams,
    progress: &MultiProgress,
) -> Result<String, TrainError> {
    prepare(trainer, params).await?;

    let samples_name = timestamped_filename(DEFAULT_PREFIX);
    let pb = progress.add(ProgressBar::new(params.run.num_generate as u64));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{wide_bar:.cyan/blue}] {pos}/{len}")
            .expect("progress template is valid")
            .progress_chars("#*-"),
    );
    pb.set_message(samples_name.clone());

    for num in 0..params.run.num_generate {
        trainer
            .evaluate(&format!("{samples_name}-{num}"), params.eval.num_image_tiles)
            .await?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    tracing::info!(
        "sample images generated at {}/{}/{samples_name}",
        params.results_dir,
        params.name
    );
    trainer.shutdown().await?;
    Ok(samples_name)
}

/// Render a latent-space interpolation. Returns the samples name.
pub async fn generate_interpolation<T: Trainer + ?Sized>(
    trainer: &mut T,
    params: &TrainParams,
) -> Result<String, TrainError> {
    prepare(trainer, params).await?;

    let samples_name = timestamped_filename(DEFAULT_PREFIX);
    trainer
        .generate_interpolation(
            &samples_name,
            params.eval.num_image_tiles,
            params.run.interpolation_num_steps,
            params.run.save_frames,
        )
        .await?;

    tracing::info!(
        "interpolation generated at {}/{}/{samples_name}",
        params.results_dir,
        params.name
    );
    trainer.shutdown().await?;
    Ok(samples_name)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use indicatif::ProgressDrawTarget;
    use stylegan2_config::LoadFrom;

    use super::*;
    use crate::{checkpoint::CheckpointHook, distributed::ProcessGroup};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    #[async_trait]
    impl Trainer for Recorder {
        async fn init(&mut self, args: TrainerArgs) -> Result<(), TrainError> {
            self.calls.push(format!("init:{}", args.is_ddp));
            Ok(())
        }
        async fn init_process_group(&mut self, _: &ProcessGroup) -> Result<(), TrainError> {
            unreachable!()
        }
        async fn destroy_process_group(&mut self) -> Result<(), TrainError> {
            unreachable!()
        }
        async fn load(&mut self, from: LoadFrom) -> Result<(), TrainError> {
            self.calls.push(format!("load:{from}"));
            Ok(())
        }
        async fn clear(&mut self) -> Result<(), TrainError> {
            unreachable!()
        }
        async fn set_data_src(&mut self, _: &str) -> Result<(), TrainError> {
            unreachable!()
        }
        async fn train(&mut self) -> Result<(), TrainError> {
            unreachable!()
        }
        async fn save(&mut self, _: u64) -> Result<(), TrainError> {
            unreachable!()
        }
        async fn evaluate(&mut self, name: &str, tiles: usize) -> Result<(), TrainError> {
            self.calls.push(format!("evaluate:{name}:{tiles}"));
            Ok(())
        }
        async fn generate_interpolation(
            &mut self,
            name: &str,
            tiles: usize,
            num_steps: usize,
            save_frames: bool,
        ) -> Result<(), TrainError> {
            self.calls
                .push(format!("interpolate:{name}:{tiles}:{num_steps}:{save_frames}"));
            Ok(())
        }
        async fn print_log(&mut self) -> Result<Option<String>, TrainError> {
            Ok(None)
        }
        fn steps(&self) -> u64 {
            0
        }
        fn checkpoint_num(&self) -> u64 {
            0
        }
        fn set_save_hook(&mut self, _: CheckpointHook) {
            unreachable!()
        }
        async fn shutdown(&mut self) -> Result<(), TrainError> {
            self.calls.push("shutdown".into());
            Ok(())
        }
    }

    #[test]
    fn test_timestamped_filename_format() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap();
        assert_eq!(
            timestamped_filename_at(DEFAULT_PREFIX, at),
            "generated-03-07-2024_09-05-01"
        );
        assert_eq!(timestamped_filename_at("x-", at), "x-03-07-2024_09-05-01");
    }

    #[tokio::test]
    async fn test_generate_samples() {
        let mut params = TrainParams::default();
        params.run.num_generate = 2;
        params.run.load_from = LoadFrom::Step(7);
        let mut trainer = Recorder::default();
        let progress = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());

        let name = generate_samples(&mut trainer, &params, &progress)
            .await
            .unwrap();

        assert!(name.starts_with(DEFAULT_PREFIX));
        assert_eq!(
            trainer.calls,
            vec![
                "init:false".to_string(),
                "load:7".to_string(),
                format!("evaluate:{name}-0:8"),
                format!("evaluate:{name}-1:8"),
                "shutdown".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_generate_interpolation() {
        let mut params = TrainParams::default();
        params.run.interpolation_num_steps = 30;
        params.run.save_frames = true;
        let mut trainer = Recorder::default();

        let name = generate_interpolation(&mut trainer, &params).await.unwrap();

        assert_eq!(
            trainer.calls,
            vec![
                "init:false".to_string(),
                "load:-1".to_string(),
                format!("interpolate:{name}:8:30:true"),
                "shutdown".to_string(),
            ]
        );
    }
}
