use std::{env, fs, path::PathBuf};

use burn::{backend::Wgpu, record::CompactRecorder};
use chrono::NaiveDate;
use log::info;
use wind_downscaling::{
    data::{
        predictors::PREDICTED_VARIABLES,
        provider::{DateRange, data_providers},
    },
    evaluation::EvaluationConfig,
    logging::DownscalingLogger,
    network::{LoadCheckpoint, NetworkKind},
    tiling::{BorderStrategy, ReconstructionConfig, parse_ensemble_size, reconstruct_map},
};

/// Projected extent of Switzerland (CH1903 / LV03).
const SWITZERLAND_X: (f64, f64) = (480_000., 840_000.);
const SWITZERLAND_Y: (f64, f64) = (70_000., 300_000.);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    type MyBackend = Wgpu<f32, i32>;

    let device = burn::backend::wgpu::WgpuDevice::default();
    let stream = rerun::RecordingStreamBuilder::new("predict wind map").spawn()?;
    let rec = DownscalingLogger::new(stream.clone());
    rerun::Logger::new(stream)
        .with_path_prefix("logs")
        .with_filter(rerun::default_log_filter())
        .init()?;

    let run_id = env::var("RUN_ID")?;
    let epoch: usize = env::var("EPOCH")?.parse()?;
    let date = NaiveDate::parse_from_str(&env::var("DATE")?, "%Y-%m-%d")?;
    let border_strategy: BorderStrategy = env::var("BORDERS")
        .unwrap_or_else(|_| "crop".into())
        .parse()?;
    let ensemble_size = parse_ensemble_size(env::var("ENSEMBLE").ok().as_deref())?;
    let kind = match env::var("NETWORK").as_deref() {
        Ok("generator") => NetworkKind::Generator,
        _ => NetworkKind::Gan,
    };
    let data_root = env::var("DATA_ROOT").unwrap_or_else(|_| "./data".into());

    let config = EvaluationConfig::new(
        run_id,
        kind,
        DateRange::new(date, date),
        PathBuf::from("."),
        PathBuf::from(data_root),
    );
    let mut network = config.network::<MyBackend>(&device)?;
    network.load_checkpoint(
        &config.series().path(epoch),
        &CompactRecorder::new(),
        &device,
    )?;

    let (inputs, _) = data_providers(
        config.provider,
        &config.data_folder,
        config.predictors.cosmo_blurred,
    )?;
    let raster = inputs
        .provide(date)?
        .open_raster()?
        .subset(SWITZERLAND_X, SWITZERLAND_Y)?;

    let reconstruction = ReconstructionConfig::new()
        .with_tile_size(config.image_size)
        .with_steps_per_tile(config.timesteps)
        .with_border_strategy(border_strategy)
        .with_ensemble_size(ensemble_size);
    let map = reconstruct_map(
        &raster,
        &config.predictors.inputs(),
        &PREDICTED_VARIABLES,
        &network,
        &reconstruction,
        &device,
    )?;

    let out_dir = PathBuf::from("predictions").join(config.full_run_id());
    fs::create_dir_all(&out_dir)?;
    let stamp = date.format("%Y%m%d");
    map.mean.save(&out_dir.join(format!("mean_{epoch}_{stamp}.bin")))?;
    if let Some(std) = &map.std {
        std.save(&out_dir.join(format!("std_{epoch}_{stamp}.bin")))?;
    }
    for variable in PREDICTED_VARIABLES {
        rec.log_map(&format!("maps/{variable}/mean"), &map.mean, variable, 0);
        if let Some(std) = &map.std {
            rec.log_map(&format!("maps/{variable}/std"), std, variable, 0);
        }
    }
    info!("map written to {}", out_dir.display());
    Ok(())
}
