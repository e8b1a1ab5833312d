use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::Backend,
    tensor::TensorData,
};
use log::{info, warn};
use rand::Rng;
use thiserror::Error;

use super::{
    batcher::{DownscalingBatch, DownscalingBatcher},
    provider::{DateRange, FileProvider, ProviderError},
    raster::Raster,
};
use crate::tiling::{BorderStrategy, TiledRaster, TilingError, tile_and_normalize, tile_raster};

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Tiling error: {0}")]
    Tiling(#[from] TilingError),
    #[error("Input and target rasters are not on the same grid")]
    GridMismatch,
    #[error("Unable to read tile data: {}", .0)]
    Data(String),
    #[error("No data found between {} and {}", .0.start, .0.end)]
    Empty(DateRange),
}

/// One `(low_res, high_res)` tile pair, both `[time, size, size, channels]`.
#[derive(Clone, Debug)]
pub struct DownscalingItem {
    pub low_res: TensorData,
    pub high_res: TensorData,
    pub sample_weight: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct DownscalingDataset {
    pub name: String,
    items: Vec<DownscalingItem>,
}

fn split_tiles(tiled: TiledRaster) -> Result<Vec<TensorData>, DatasetError> {
    let shape = tiled.data.shape.clone();
    let values = tiled
        .data
        .to_vec::<f32>()
        .map_err(|e| DatasetError::Data(format!("{e:?}")))?;
    let tile_shape = shape[1..].to_vec();
    let tile_len: usize = tile_shape.iter().product();
    if tile_len == 0 {
        return Ok(vec![]);
    }
    Ok(values
        .chunks(tile_len)
        .map(|chunk| TensorData::new(chunk.to_vec(), tile_shape.clone()))
        .collect())
}

impl DownscalingDataset {
    pub fn new(name: &str, items: Vec<DownscalingItem>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }

    /// Tile pairs cut with the crop strategy. Inputs are z-scored over the day,
    /// targets keep their physical units.
    pub fn from_rasters<S: AsRef<str>, O: AsRef<str>>(
        name: &str,
        input: &Raster,
        target: &Raster,
        input_variables: &[S],
        output_variables: &[O],
        tile_size: usize,
        steps_per_tile: usize,
    ) -> Result<Self, DatasetError> {
        let low_res = tile_and_normalize(
            input,
            input_variables,
            tile_size,
            steps_per_tile,
            BorderStrategy::Crop,
        )?;
        let high_res = tile_raster(
            target,
            output_variables,
            tile_size,
            steps_per_tile,
            BorderStrategy::Crop,
        )?;
        if low_res.index != high_res.index {
            return Err(DatasetError::GridMismatch);
        }
        let items = split_tiles(low_res)?
            .into_iter()
            .zip(split_tiles(high_res)?)
            .map(|(low_res, high_res)| DownscalingItem {
                low_res,
                high_res,
                sample_weight: None,
            })
            .collect();
        Ok(Self::new(name, items))
    }

    /// Loads every day of `dates` from the providers. Days missing from either
    /// provider are skipped with a warning.
    #[allow(clippy::too_many_arguments)]
    pub fn load<S: AsRef<str>, O: AsRef<str>>(
        name: &str,
        inputs: &dyn FileProvider,
        targets: &dyn FileProvider,
        dates: &DateRange,
        input_variables: &[S],
        output_variables: &[O],
        tile_size: usize,
        steps_per_tile: usize,
    ) -> Result<Self, DatasetError> {
        let mut dataset = Self::new(name, vec![]);
        let total = dates.num_days();
        for (i, date) in dates.days().enumerate() {
            info!("Creating batch {} over {total} ({date})", i + 1);
            let (input, target) = match (inputs.provide(date), targets.provide(date)) {
                (Ok(input), Ok(target)) => (input, target),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("skipping {date}: {e}");
                    continue;
                }
            };
            let day = Self::from_rasters(
                name,
                &input.open_raster()?,
                &target.open_raster()?,
                input_variables,
                output_variables,
                tile_size,
                steps_per_tile,
            )?;
            dataset.items.extend(day.items);
        }
        if dataset.items.is_empty() {
            return Err(DatasetError::Empty(*dates));
        }
        info!("{name}: {} tiles", dataset.len());
        Ok(dataset)
    }

    pub fn split(mut self, train_split_ratio: f64) -> (Self, Self) {
        assert!(
            0. < train_split_ratio && train_split_ratio < 1.,
            "The ratio must in (0, 1)"
        );

        let train_amount = (train_split_ratio * self.len() as f64) as usize;
        let mut rng = rand::rng();
        let mut train_items = vec![];
        while train_items.len() < train_amount && !self.items.is_empty() {
            let idx = rng.random_range(0..self.items.len());
            train_items.push(self.items.swap_remove(idx));
        }
        (
            Self::new("train", train_items),
            Self::new("valid", self.items),
        )
    }

    /// Every item as a single batch, e.g. for checkpoint validation.
    pub fn to_batch<B: Backend>(&self, device: &B::Device) -> DownscalingBatch<B> {
        DownscalingBatcher::<B>::new(device.clone()).batch(self.items.clone())
    }
}

impl Dataset<DownscalingItem> for DownscalingDataset {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Option<DownscalingItem> {
        self.items.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(names: &[&str], nt: usize, n: usize) -> Raster {
        let mut r = Raster::new(
            (0..n).map(|v| v as f64).collect(),
            (0..n).map(|v| v as f64).collect(),
            (0..nt as i64).collect(),
        );
        for (k, name) in names.iter().enumerate() {
            let values = (0..nt * n * n).map(|v| (v * (k + 1)) as f32).collect();
            r.insert_variable(name, values).unwrap();
        }
        r
    }

    #[test]
    fn pairs_tiles_of_both_rasters() {
        let input = raster(&["a", "b", "c"], 4, 9);
        let target = raster(&["U_10M", "V_10M"], 4, 9);
        let ds = DownscalingDataset::from_rasters(
            "test",
            &input,
            &target,
            &["a", "b", "c"],
            &["U_10M", "V_10M"],
            4,
            2,
        )
        .unwrap();
        // 2 rows, 2 cols, 2 time blocks
        assert_eq!(ds.len(), 8);
        let item = ds.get(0).unwrap();
        assert_eq!(item.low_res.shape, vec![2, 4, 4, 3]);
        assert_eq!(item.high_res.shape, vec![2, 4, 4, 2]);
    }

    #[test]
    fn rejects_different_grids() {
        let input = raster(&["a"], 2, 8);
        let target = raster(&["U_10M"], 2, 12);
        let result =
            DownscalingDataset::from_rasters("test", &input, &target, &["a"], &["U_10M"], 4, 2);
        assert!(matches!(result, Err(DatasetError::GridMismatch)));
    }

    #[test]
    fn split_keeps_every_item() {
        let input = raster(&["a"], 2, 8);
        let target = raster(&["U_10M"], 2, 8);
        let ds =
            DownscalingDataset::from_rasters("test", &input, &target, &["a"], &["U_10M"], 2, 1)
                .unwrap();
        let total = ds.len();
        let (train, valid) = ds.split(0.75);
        assert_eq!(train.len(), total * 3 / 4);
        assert_eq!(train.len() + valid.len(), total);
    }
}
