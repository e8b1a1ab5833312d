use std::path::PathBuf;

use burn::{
    config::{Config, ConfigError},
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    optim::AdamConfig,
    record::{FileRecorder, RecorderError},
    tensor::backend::AutodiffBackend,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle, style::TemplateError};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    model::{DownscalingGan, DownscalingGanConfig, ModelError, WeightsError},
    noise::NoiseConfig,
    trainer::{GanError, GanTrainer, GanTrainerConfig},
};
use crate::{
    data::{
        batcher::DownscalingBatcher,
        dataset::{DatasetError, DownscalingDataset},
        predictors::PredictorSet,
        provider::{DateRange, ProviderError, ProviderKind, data_providers},
    },
    evaluation::CheckpointSeries,
    logging::DownscalingLogger,
    metrics::generator_metrics,
    network::NetworkKind,
};

#[derive(Serialize, Deserialize, Clone)]
pub enum GanModelProvider {
    Config(DownscalingGanConfig),
    /// Resume from a checkpoint directory holding `generator` and `discriminator`.
    Checkpoint {
        config_path: PathBuf,
        checkpoint_dir: PathBuf,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DataConfig {
    pub provider: ProviderKind,
    pub folder: PathBuf,
    pub dates: DateRange,
    pub predictors: PredictorSet,
    pub tile_size: usize,
    pub steps_per_tile: usize,
}

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer_discriminator: AdamConfig,
    pub optimizer_generator: AdamConfig,
    pub trainer: GanTrainerConfig,
    pub data: DataConfig,
    pub run_id: String,
    #[config(default = 500)]
    pub num_epochs: usize,
    #[config(default = 16)]
    pub batch_size: usize,
    #[config(default = 10)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 0.0001)]
    pub discriminator_learning_rate: f64,
    #[config(default = 0.0001)]
    pub generator_learning_rate: f64,
    #[config(default = 20)]
    pub noise_channels: usize,
    #[config(default = 1.0)]
    pub noise_std: f64,
    #[config(default = 10)]
    pub saving_frequency: usize,
    #[config(default = 0.8)]
    pub train_ratio: f64,
}

fn create_artifact_dir(artifact_dir: &str) -> std::io::Result<()> {
    // checkpoints of other runs share the directory and are kept
    std::fs::create_dir_all(artifact_dir)
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Dataset error: {0}")]
    DatasetError(#[from] DatasetError),
    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),
    #[error("Failed to load DownscalingGanConfig due to: {0}")]
    ModelConfigDeserializationError(#[from] ConfigError),
    #[error("Invalid model: {0}")]
    ModelError(#[from] ModelError),
    #[error("Failed to load model weights due to: {0}")]
    ModelWeightsDeserializationError(#[from] RecorderError),
    #[error("Weights error: {0}")]
    WeightsError(#[from] WeightsError),
    #[error("Training step failed: {0}")]
    GanError(#[from] GanError),
    #[error("Invalid progress bar template: {0}")]
    ProgressTemplate(#[from] TemplateError),
    #[error("The data provides {} = {} but the generator expects {}", .what, .data, .model)]
    DataModelMismatch {
        what: &'static str,
        data: usize,
        model: usize,
    },
    #[error("The train ratio must be in (0, 1), got {}", .0)]
    InvalidTrainRatio(f64),
}

impl TrainingConfig {
    /// Checks that data tiles, noise and split ratio fit the model before any
    /// data is loaded.
    pub fn validate(&self, model: &DownscalingGanConfig) -> Result<(), TrainingError> {
        if !(0. < self.train_ratio && self.train_ratio < 1.) {
            return Err(TrainingError::InvalidTrainRatio(self.train_ratio));
        }
        let g = &model.generator;
        for (what, data, model) in [
            ("tile_size", self.data.tile_size, g.image_size),
            ("steps_per_tile", self.data.steps_per_tile, g.timesteps),
            ("input channels", self.data.predictors.inputs().len(), g.in_channels),
            ("output channels", self.data.predictors.outputs().len(), g.out_channels),
            ("noise_channels", self.noise_channels, g.noise_channels),
        ] {
            if data != model {
                return Err(TrainingError::DataModelMismatch { what, data, model });
            }
        }
        Ok(())
    }
}

pub fn train_gan<B: AutodiffBackend, R: FileRecorder<B>>(
    artifact_dir: &str,
    config: TrainingConfig,
    model_provider: GanModelProvider,
    device: B::Device,
    log: DownscalingLogger,
    recorder: R,
) -> Result<DownscalingGan<B>, TrainingError> {
    create_artifact_dir(artifact_dir)?;
    config.save(format!("{artifact_dir}/training_config_{}.json", config.run_id))?;

    B::seed(config.seed);

    let (model_config, model) = match model_provider {
        GanModelProvider::Config(model_config) => {
            model_config.save(format!("{artifact_dir}/model_config_{}.json", config.run_id))?;
            let model = model_config.init::<B>(&device)?;
            (model_config, model)
        }
        GanModelProvider::Checkpoint {
            config_path,
            checkpoint_dir,
        } => {
            let model_config = DownscalingGanConfig::load(&config_path)?;
            let model = model_config
                .init::<B>(&device)?
                .load_weights(&checkpoint_dir, &recorder, &device)?;
            (model_config, model)
        }
    };

    config.validate(&model_config)?;

    let data = &config.data;
    let (inputs, targets) =
        data_providers(data.provider, &data.folder, data.predictors.cosmo_blurred)?;
    let (train, valid) = DownscalingDataset::load(
        "train",
        inputs.as_ref(),
        targets.as_ref(),
        &data.dates,
        &data.predictors.inputs(),
        &data.predictors.outputs(),
        data.tile_size,
        data.steps_per_tile,
    )?
    .split(config.train_ratio);
    let train_size = train.len();
    let valid_size = valid.len();

    let noise = NoiseConfig::new(
        model_config.generator.timesteps,
        model_config.generator.image_size,
    )
    .with_channels(config.noise_channels)
    .with_std(config.noise_std)
    .init();
    let mut trainer = GanTrainer::new(model, noise, config.trainer.clone());
    trainer.compile(
        config.optimizer_generator.init(),
        config.generator_learning_rate,
        config.optimizer_discriminator.init(),
        config.discriminator_learning_rate,
        generator_metrics(),
    );

    let dataloader_train = DataLoaderBuilder::new(DownscalingBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train);

    let dataloader_valid =
        DataLoaderBuilder::new(DownscalingBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(config.batch_size)
            .num_workers(config.num_workers)
            .build(valid);

    let checkpoints = CheckpointSeries::new(
        artifact_dir,
        NetworkKind::Gan,
        &config.run_id,
        config.saving_frequency,
        config.num_epochs + 1,
    );

    let m = MultiProgress::new();
    let sty = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
    )?
    .progress_chars("##-");
    let epoch_bar = m.add(ProgressBar::new(config.num_epochs as u64));
    epoch_bar.set_style(sty.clone());
    epoch_bar.set_message("Epochs");

    let mut step = 0;
    for epoch in 1..config.num_epochs + 1 {
        epoch_bar.inc(1);
        trainer.reset_metrics();

        let training_bar = m.add(ProgressBar::new(train_size as u64));
        training_bar.set_style(sty.clone());
        training_bar.set_message("Training Progress");
        for batch in dataloader_train.iter() {
            let batch_size = batch.len();
            let metrics = trainer.train_step(batch)?;
            log.log_metrics("training", step, &metrics);
            step += 1;
            training_bar.inc(batch_size as u64);
        }
        m.remove(&training_bar);

        if config.saving_frequency > 0 && epoch % config.saving_frequency == 0 {
            let dir = checkpoints.path(epoch);
            info!("saving checkpoint {}", dir.display());
            trainer.save_weights(&dir, &recorder)?;
        }

        trainer.reset_metrics();
        let valid_bar = m.add(ProgressBar::new(valid_size as u64));
        valid_bar.set_style(sty.clone());
        valid_bar.set_message("Valid Progress");
        let mut last = None;
        for batch in dataloader_valid.iter() {
            let batch_size = batch.len();
            if log.wants_fields(epoch) && last.is_none() {
                let prediction = trainer.forward(batch.low_res.clone());
                log.log_fields("validation", epoch, batch.high_res.clone(), prediction);
            }
            last = Some(trainer.test_step(batch)?);
            valid_bar.inc(batch_size as u64);
        }
        m.remove(&valid_bar);
        if let Some(metrics) = last {
            log.log_metrics("validation", epoch, &metrics);
            info!(
                "epoch {epoch}: validation loss {:.4}",
                metrics.get("loss").copied().unwrap_or(f64::NAN)
            );
        }
    }
    Ok(trainer.network())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn training_config(tile_size: usize, steps_per_tile: usize) -> TrainingConfig {
        let day = NaiveDate::from_ymd_opt(2016, 4, 1).unwrap();
        TrainingConfig::new(
            AdamConfig::new(),
            AdamConfig::new(),
            GanTrainerConfig::new(),
            DataConfig {
                provider: ProviderKind::Local,
                folder: PathBuf::from("data"),
                dates: DateRange::new(day, day),
                predictors: PredictorSet::default(),
                tile_size,
                steps_per_tile,
            },
            "test".into(),
        )
    }

    fn model(image_size: usize, timesteps: usize) -> DownscalingGanConfig {
        let predictors = PredictorSet::default();
        DownscalingGanConfig::for_tiles(
            image_size,
            timesteps,
            predictors.inputs().len(),
            20,
            predictors.outputs().len(),
        )
    }

    #[test]
    fn matching_geometry_is_accepted() {
        assert!(training_config(8, 2).validate(&model(8, 2)).is_ok());
    }

    #[test]
    fn tile_size_must_match_generator() {
        let err = training_config(16, 2).validate(&model(8, 2)).unwrap_err();
        assert!(matches!(
            err,
            TrainingError::DataModelMismatch {
                what: "tile_size",
                data: 16,
                model: 8
            }
        ));
    }

    #[test]
    fn steps_per_tile_must_match_generator() {
        let err = training_config(8, 3).validate(&model(8, 2)).unwrap_err();
        assert!(matches!(
            err,
            TrainingError::DataModelMismatch {
                what: "steps_per_tile",
                ..
            }
        ));
    }

    #[test]
    fn noise_channels_must_match_generator() {
        let config = training_config(8, 2).with_noise_channels(4);
        assert!(matches!(
            config.validate(&model(8, 2)),
            Err(TrainingError::DataModelMismatch {
                what: "noise_channels",
                ..
            })
        ));
    }

    #[test]
    fn train_ratio_outside_unit_interval_fails() {
        for ratio in [0., 1., 1.5, -0.2] {
            let config = training_config(8, 2).with_train_ratio(ratio);
            assert!(matches!(
                config.validate(&model(8, 2)),
                Err(TrainingError::InvalidTrainRatio(_))
            ));
        }
    }
}
