use std::{env, path::PathBuf};

use burn::{backend::Wgpu, record::CompactRecorder};
use chrono::NaiveDate;
use log::info;
use wind_downscaling::{
    data::provider::DateRange,
    evaluation::{EvaluationConfig, compute_metrics_val_set},
    metrics::test_metrics,
    network::NetworkKind,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    type MyBackend = Wgpu<f32, i32>;

    let device = burn::backend::wgpu::WgpuDevice::default();
    let stream = rerun::RecordingStreamBuilder::new("evaluate wind downscaling checkpoints").spawn()?;
    rerun::Logger::new(stream)
        .with_path_prefix("logs")
        .with_filter(rerun::default_log_filter())
        .init()?;

    let run_id = env::var("RUN_ID")?;
    let kind = match env::var("NETWORK").as_deref() {
        Ok("generator") => NetworkKind::Generator,
        _ => NetworkKind::Gan,
    };
    let data_root = env::var("DATA_ROOT").unwrap_or_else(|_| "./data".into());

    let config = EvaluationConfig::new(
        run_id,
        kind,
        DateRange::new(
            NaiveDate::from_ymd_opt(2018, 1, 1).ok_or("invalid start date")?,
            NaiveDate::from_ymd_opt(2018, 1, 31).ok_or("invalid end date")?,
        ),
        PathBuf::from("."),
        PathBuf::from(data_root),
    );
    let metrics = test_metrics::<MyBackend>();
    let record = compute_metrics_val_set::<MyBackend, _>(
        &config,
        &metrics,
        &CompactRecorder::new(),
        &device,
    )?;

    let out = PathBuf::from(format!("metrics_{}.ron", config.full_run_id()));
    record.save(&out)?;
    info!("metric record written to {}", out.display());
    for metric in &record.metrics {
        if let Some(best) = record.best_epochs(metric, 3) {
            println!("{metric}: best epochs {best:?}");
        }
    }
    Ok(())
}
