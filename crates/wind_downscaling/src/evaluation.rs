//! Scoring every saved checkpoint of a run on one validation set.

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use burn::{config::Config, prelude::Backend, record::FileRecorder};
use indicatif::ProgressBar;
use log::info;
use ron::de::{SpannedError, from_reader};
use ron::ser::{PrettyConfig, to_writer_pretty};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::{
    data::{
        batcher::DownscalingBatch,
        dataset::{DatasetError, DownscalingDataset},
        predictors::PredictorSet,
        provider::{DateRange, ProviderError, ProviderKind, data_providers},
    },
    gan::{
        generator::GeneratorConfig,
        model::{DownscalingGanConfig, ModelError, WeightsError},
        noise::NoiseConfig,
    },
    metrics::FieldMetric,
    network::{Downscaler, GanNetwork, GeneratorNetwork, LoadCheckpoint, Network, NetworkKind},
};

const WEIGHTS_PREFIX: &str = "weights-";

/// Checkpoints written every `saving_frequency` epochs of a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointSeries {
    pub root: PathBuf,
    pub kind: NetworkKind,
    pub run_id: String,
    pub saving_frequency: usize,
    pub nb_epochs: usize,
}

impl CheckpointSeries {
    pub fn new(
        root: impl Into<PathBuf>,
        kind: NetworkKind,
        run_id: &str,
        saving_frequency: usize,
        nb_epochs: usize,
    ) -> Self {
        Self {
            root: root.into(),
            kind,
            run_id: run_id.into(),
            saving_frequency,
            nb_epochs,
        }
    }

    /// `saving_frequency, 2 * saving_frequency, ...` strictly below `nb_epochs`.
    pub fn epochs(&self) -> Vec<usize> {
        if self.saving_frequency == 0 {
            return vec![];
        }
        (self.saving_frequency..self.nb_epochs)
            .step_by(self.saving_frequency)
            .collect()
    }

    /// `{root}/checkpoints/{kind}/{run_id}`
    pub fn run_dir(&self) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(self.kind.to_string())
            .join(&self.run_id)
    }

    pub fn path(&self, epoch: usize) -> PathBuf {
        self.run_dir().join(format!("{WEIGHTS_PREFIX}{epoch:02}"))
    }

    /// Epochs that actually have a checkpoint directory, sorted.
    pub fn discover(&self) -> Vec<usize> {
        let mut epochs: Vec<usize> = WalkDir::new(self.run_dir())
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()?
                    .strip_prefix(WEIGHTS_PREFIX)?
                    .parse()
                    .ok()
            })
            .collect();
        epochs.sort_unstable();
        epochs
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub epoch: usize,
    pub values: Vec<f64>,
}

#[derive(Error, Debug)]
pub enum MetricRecordError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Unable to parse metric record: {0}")]
    Parse(#[from] SpannedError),
    #[error("Unable to write metric record: {0}")]
    Write(#[from] ron::Error),
}

/// Epoch x metric table, one row per evaluated checkpoint in evaluation order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MetricRecord {
    pub metrics: Vec<String>,
    rows: Vec<MetricRow>,
}

impl MetricRecord {
    pub fn new(metrics: Vec<String>) -> Self {
        Self {
            metrics,
            rows: vec![],
        }
    }

    /// `values` follow the order of `metrics`.
    pub fn push(&mut self, epoch: usize, values: Vec<f64>) {
        self.rows.push(MetricRow { epoch, values });
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn epochs(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.epoch).collect()
    }

    pub fn get(&self, epoch: usize, metric: &str) -> Option<f64> {
        let column = self.metrics.iter().position(|m| m == metric)?;
        let row = self.rows.iter().find(|r| r.epoch == epoch)?;
        row.values.get(column).copied()
    }

    pub fn column(&self, metric: &str) -> Option<Vec<(usize, f64)>> {
        let column = self.metrics.iter().position(|m| m == metric)?;
        Some(
            self.rows
                .iter()
                .filter_map(|r| r.values.get(column).map(|v| (r.epoch, *v)))
                .collect(),
        )
    }

    /// The `n` epochs with the lowest value of `metric`. `NaN` ranks last.
    pub fn best_epochs(&self, metric: &str, n: usize) -> Option<Vec<usize>> {
        let mut column = self.column(metric)?;
        column.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            _ => a.1.total_cmp(&b.1),
        });
        Some(column.into_iter().take(n).map(|(epoch, _)| epoch).collect())
    }

    pub fn save(&self, path: &Path) -> Result<(), MetricRecordError> {
        let f = File::create(path)?;
        to_writer_pretty(f, self, PrettyConfig::default())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, MetricRecordError> {
        let f = File::open(path)?;
        Ok(from_reader(f)?)
    }
}

/// Checkpoint loading failed part-way. `partial` holds every epoch evaluated
/// before `epoch`.
#[derive(Error, Debug)]
#[error("Evaluation stopped at epoch {epoch}: {source}")]
pub struct EvaluationError {
    pub epoch: usize,
    pub partial: MetricRecord,
    #[source]
    pub source: WeightsError,
}

/// Loads every checkpoint of `series` in increasing epoch order into `network`
/// and scores it on the whole `validation` batch.
pub fn evaluate_all_checkpoints<B, N, R>(
    network: &mut N,
    series: &CheckpointSeries,
    validation: &DownscalingBatch<B>,
    metrics: &[Box<dyn FieldMetric<B>>],
    recorder: &R,
    device: &B::Device,
) -> Result<MetricRecord, EvaluationError>
where
    B: Backend,
    N: Downscaler<B> + LoadCheckpoint<B>,
    R: FileRecorder<B>,
{
    let mut record = MetricRecord::new(metrics.iter().map(|m| m.name().to_string()).collect());
    let epochs = series.epochs();
    let bar = ProgressBar::new(epochs.len() as u64);
    for epoch in epochs {
        info!("Loading weights for epoch {epoch}");
        if let Err(source) = network.load_checkpoint(&series.path(epoch), recorder, device) {
            bar.abandon();
            return Err(EvaluationError {
                epoch,
                partial: record,
                source,
            });
        }
        info!("Computing prediction for epoch {epoch}");
        let prediction = network.downscale(validation.low_res.clone());
        let values = metrics
            .iter()
            .map(|m| m.compute(validation.high_res.clone(), prediction.clone()))
            .collect();
        record.push(epoch, values);
        bar.inc(1);
    }
    bar.finish();
    Ok(record)
}

/// Everything needed to score a run from scratch.
#[derive(Config, Debug)]
pub struct EvaluationConfig {
    pub run_id: String,
    pub kind: NetworkKind,
    pub dates: DateRange,
    pub checkpoint_root: PathBuf,
    pub data_folder: PathBuf,
    #[config(default = "ProviderKind::Local")]
    pub provider: ProviderKind,
    #[config(default = "PredictorSet::default()")]
    pub predictors: PredictorSet,
    #[config(default = 10)]
    pub saving_frequency: usize,
    #[config(default = 500)]
    pub nb_epochs: usize,
    #[config(default = 128)]
    pub image_size: usize,
    #[config(default = 6)]
    pub timesteps: usize,
    #[config(default = 20)]
    pub noise_channels: usize,
}

impl EvaluationConfig {
    /// Blurred-COSMO runs are stored under a suffixed run id.
    pub fn full_run_id(&self) -> String {
        if self.predictors.cosmo_blurred {
            format!("{}_cosmo_blurred", self.run_id)
        } else {
            self.run_id.clone()
        }
    }

    pub fn series(&self) -> CheckpointSeries {
        CheckpointSeries::new(
            &self.checkpoint_root,
            self.kind,
            &self.full_run_id(),
            self.saving_frequency,
            self.nb_epochs,
        )
    }

    pub fn network<B: Backend>(&self, device: &B::Device) -> Result<Network<B>, ModelError> {
        let in_channels = self.predictors.inputs().len();
        let out_channels = self.predictors.outputs().len();
        Ok(match self.kind {
            NetworkKind::Gan => {
                let gan = DownscalingGanConfig::for_tiles(
                    self.image_size,
                    self.timesteps,
                    in_channels,
                    self.noise_channels,
                    out_channels,
                )
                .init(device)?;
                let noise = NoiseConfig::new(self.timesteps, self.image_size)
                    .with_channels(self.noise_channels)
                    .init();
                Network::Gan(GanNetwork { gan, noise })
            }
            NetworkKind::Generator => Network::Generator(GeneratorNetwork {
                generator: GeneratorConfig::new(
                    self.image_size,
                    in_channels,
                    0,
                    out_channels,
                    self.timesteps,
                )
                .init(device)?,
            }),
        })
    }
}

#[derive(Error, Debug)]
pub enum ValidationRunError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("{0}")]
    Evaluation(#[from] EvaluationError),
}

/// Builds the network and the validation set described by `config`, then
/// scores every checkpoint.
pub fn compute_metrics_val_set<B: Backend, R: FileRecorder<B>>(
    config: &EvaluationConfig,
    metrics: &[Box<dyn FieldMetric<B>>],
    recorder: &R,
    device: &B::Device,
) -> Result<MetricRecord, ValidationRunError> {
    let (inputs, targets) = data_providers(
        config.provider,
        &config.data_folder,
        config.predictors.cosmo_blurred,
    )?;
    let validation = DownscalingDataset::load(
        "validation",
        inputs.as_ref(),
        targets.as_ref(),
        &config.dates,
        &config.predictors.inputs(),
        &config.predictors.outputs(),
        config.image_size,
        config.timesteps,
    )?
    .to_batch::<B>(device);
    let mut network = config.network::<B>(device)?;
    Ok(evaluate_all_checkpoints(
        &mut network,
        &config.series(),
        &validation,
        metrics,
        recorder,
        device,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MetricRecord {
        let mut r = MetricRecord::new(vec!["rmse".into(), "acd".into()]);
        r.push(10, vec![3., 0.2]);
        r.push(20, vec![1., f64::NAN]);
        r.push(30, vec![2., 0.1]);
        r
    }

    #[test]
    fn epochs_exclude_last_bound() {
        let series = CheckpointSeries::new("/tmp", NetworkKind::Gan, "run", 10, 31);
        assert_eq!(series.epochs(), vec![10, 20, 30]);
        let series = CheckpointSeries::new("/tmp", NetworkKind::Gan, "run", 10, 30);
        assert_eq!(series.epochs(), vec![10, 20]);
    }

    #[test]
    fn checkpoint_path_layout() {
        let series = CheckpointSeries::new("/data", NetworkKind::Generator, "12345", 5, 20);
        assert_eq!(
            series.path(5),
            PathBuf::from("/data/checkpoints/generator/12345/weights-05")
        );
    }

    #[test]
    fn best_epochs_rank_lowest_first() {
        let r = record();
        assert_eq!(r.best_epochs("rmse", 2), Some(vec![20, 30]));
        assert_eq!(r.best_epochs("acd", 3), Some(vec![30, 10, 20]));
        assert_eq!(r.best_epochs("lsd", 3), None);
    }

    #[test]
    fn lookup_by_epoch_and_metric() {
        let r = record();
        assert_eq!(r.get(30, "acd"), Some(0.1));
        assert_eq!(r.get(40, "acd"), None);
        assert_eq!(r.epochs(), vec![10, 20, 30]);
    }

    #[test]
    fn save_and_load_ron() {
        let mut r = MetricRecord::new(vec!["rmse".into()]);
        r.push(10, vec![1.5]);
        let path = std::env::temp_dir().join("wind_downscaling_metric_record.ron");
        r.save(&path).unwrap();
        let loaded = MetricRecord::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(r, loaded);
    }

    #[test]
    fn discover_lists_existing_checkpoints() {
        let root = std::env::temp_dir().join("wind_downscaling_discover");
        let series = CheckpointSeries::new(&root, NetworkKind::Gan, "run", 10, 100);
        let _ = std::fs::remove_dir_all(&root);
        for epoch in [20, 10] {
            std::fs::create_dir_all(series.path(epoch)).unwrap();
        }
        std::fs::create_dir_all(series.run_dir().join("other")).unwrap();
        assert_eq!(series.discover(), vec![10, 20]);
        std::fs::remove_dir_all(&root).unwrap();
    }
}
