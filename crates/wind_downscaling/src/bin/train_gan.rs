use std::{env, path::PathBuf};

use burn::{
    backend::{Autodiff, Wgpu},
    optim::AdamConfig,
    record::CompactRecorder,
};
use chrono::{Local, NaiveDate};
use wind_downscaling::{
    data::{
        predictors::PredictorSet,
        provider::{DateRange, ProviderKind},
    },
    gan::{
        model::DownscalingGanConfig,
        trainer::GanTrainerConfig,
        training::{DataConfig, GanModelProvider, TrainingConfig, train_gan},
    },
    logging::DownscalingLogger,
};

const IMG_SIZE: usize = 128;
const SEQUENCE_LENGTH: usize = 6;
const NOISE_CHANNELS: usize = 20;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    type MyBackend = Wgpu<f32, i32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;

    let device = burn::backend::wgpu::WgpuDevice::default();
    let artifact_dir = ".";
    let stream = rerun::RecordingStreamBuilder::new("train wind downscaling gan").spawn()?;
    let rec = DownscalingLogger::new(stream.clone());

    rerun::Logger::new(stream) // recording streams are ref-counted
        .with_path_prefix("logs")
        .with_filter(rerun::default_log_filter())
        .init()?;

    let data_root = env::var("DATA_ROOT").unwrap_or_else(|_| "./data".into());
    let provider: ProviderKind = env::var("DATA_PROVIDER")
        .unwrap_or_else(|_| "local".into())
        .parse()?;
    let run_id = env::var("RUN_ID").unwrap_or_else(|_| Local::now().format("%Y%m%d%H%M").to_string());

    let predictors = PredictorSet::default();
    let data = DataConfig {
        provider,
        folder: PathBuf::from(data_root),
        dates: DateRange::new(
            NaiveDate::from_ymd_opt(2016, 4, 1).ok_or("invalid start date")?,
            NaiveDate::from_ymd_opt(2017, 12, 31).ok_or("invalid end date")?,
        ),
        predictors,
        tile_size: IMG_SIZE,
        steps_per_tile: SEQUENCE_LENGTH,
    };

    train_gan::<MyAutodiffBackend, _>(
        artifact_dir,
        TrainingConfig::new(
            AdamConfig::new().with_beta_1(0.5),
            AdamConfig::new().with_beta_1(0.5),
            GanTrainerConfig::new(),
            data,
            run_id,
        )
        .with_noise_channels(NOISE_CHANNELS),
        GanModelProvider::Config(DownscalingGanConfig::for_tiles(
            IMG_SIZE,
            SEQUENCE_LENGTH,
            predictors.inputs().len(),
            NOISE_CHANNELS,
            predictors.outputs().len(),
        )),
        device,
        rec,
        CompactRecorder::new(),
    )?;
    Ok(())
}
