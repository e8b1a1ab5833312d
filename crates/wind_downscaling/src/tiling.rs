//! Splits a raster into fixed-size spatio-temporal tiles, runs them through a
//! downscaler and stitches the predictions back onto the raster coordinates.

use std::str::FromStr;

use burn::{
    config::Config,
    prelude::Backend,
    tensor::{Tensor, TensorData},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    data::raster::{Raster, RasterError},
    network::Downscaler,
};

/// Number of stochastic passes when ensemble averaging is requested without a size.
pub const DEFAULT_ENSEMBLE_SIZE: usize = 50;

#[derive(Error, Debug)]
pub enum TilingError {
    #[error("Please chose one of \"crop\" or \"overlap\" for handling of image borders, got \"{}\"", .0)]
    InvalidBorderStrategy(String),
    #[error("tile size and steps per tile must be positive")]
    ZeroSize,
    #[error("The {} axis has {} pixels which is smaller than the tile size {}", .axis, .pixels, .tile_size)]
    RasterTooSmall {
        axis: &'static str,
        pixels: usize,
        tile_size: usize,
    },
    #[error("{} time steps cannot fill a single block of {}", .available, .steps)]
    NotEnoughTimesteps { available: usize, steps: usize },
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),
    #[error("Prediction has shape {:?}, expected {:?}", .found, .expected)]
    PredictionShape {
        expected: [usize; 5],
        found: [usize; 5],
    },
    #[error("Ensemble size must be at least 1, got {}", .0)]
    InvalidEnsembleSize(usize),
    #[error("Ensemble size must be a positive integer, got \"{}\"", .0)]
    UnparsableEnsembleSize(String),
    #[error("Unable to read prediction data: {}", .0)]
    Data(String),
}

/// Policy for covering a raster whose size is not a multiple of the tile size.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum BorderStrategy {
    /// `floor(pixels / tile_size)` tiles per axis. Lossy: the trailing
    /// `pixels % tile_size` pixels of every axis are never predicted.
    Crop,
    /// `ceil(pixels / tile_size)` tiles per axis covering every pixel, with the
    /// overlap spread over the grid.
    Overlap,
}

impl FromStr for BorderStrategy {
    type Err = TilingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crop" => Ok(Self::Crop),
            "overlap" => Ok(Self::Overlap),
            other => Err(TilingError::InvalidBorderStrategy(other.into())),
        }
    }
}

/// Reads an ensemble size setting: `None` for a single pass, an empty value
/// for [`DEFAULT_ENSEMBLE_SIZE`], otherwise a positive count.
pub fn parse_ensemble_size(value: Option<&str>) -> Result<Option<usize>, TilingError> {
    let Some(value) = value.map(str::trim) else {
        return Ok(None);
    };
    if value.is_empty() {
        return Ok(Some(DEFAULT_ENSEMBLE_SIZE));
    }
    match value.parse::<usize>() {
        Ok(0) => Err(TilingError::InvalidEnsembleSize(0)),
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(TilingError::UnparsableEnsembleSize(value.into())),
    }
}

impl BorderStrategy {
    /// Start offsets of the tiles along one axis.
    pub fn starts(
        &self,
        axis: &'static str,
        pixels: usize,
        tile_size: usize,
    ) -> Result<Vec<usize>, TilingError> {
        if tile_size == 0 {
            return Err(TilingError::ZeroSize);
        }
        if pixels < tile_size {
            return Err(TilingError::RasterTooSmall {
                axis,
                pixels,
                tile_size,
            });
        }
        Ok(match self {
            BorderStrategy::Crop => (0..pixels / tile_size).map(|i| i * tile_size).collect(),
            BorderStrategy::Overlap => {
                let n = pixels.div_ceil(tile_size);
                if n == 1 {
                    return Ok(vec![0]);
                }
                let dist = (pixels - tile_size) / (n - 1);
                // one extra pixel of stride for the first `leftover` steps
                let leftover = pixels - ((n - 1) * dist + tile_size);
                (0..n).map(|i| i * dist + i.min(leftover)).collect()
            }
        })
    }
}

#[derive(Config, Debug)]
pub struct ReconstructionConfig {
    #[config(default = 128)]
    pub tile_size: usize,
    #[config(default = 6)]
    pub steps_per_tile: usize,
    #[config(default = "BorderStrategy::Crop")]
    pub border_strategy: BorderStrategy,
    /// Number of stochastic passes; `None` runs a single pass without std.
    pub ensemble_size: Option<usize>,
}

/// One tile and the coordinates its pixels came from.
///
/// `y` runs from the top of the tile downwards, i.e. it is the source axis reversed.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub position: usize,
    pub row: usize,
    pub col: usize,
    pub time_block: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub time: Vec<i64>,
}

/// Tiles ordered by their batch position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TileIndex {
    tiles: Vec<TileRecord>,
    pub nrows: usize,
    pub ncols: usize,
    pub ntime_blocks: usize,
}

impl TileIndex {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileRecord> {
        self.tiles.iter()
    }

    pub fn position(&self, row: usize, col: usize, time_block: usize) -> Option<usize> {
        self.tiles
            .iter()
            .find(|t| t.row == row && t.col == col && t.time_block == time_block)
            .map(|t| t.position)
    }

    pub fn get(&self, position: usize) -> Option<&TileRecord> {
        self.tiles.get(position)
    }
}

/// Per-channel statistics used to z-score a tile set.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct TiledRaster {
    /// `[tiles, steps_per_tile, tile_size, tile_size, variables]`
    pub data: TensorData,
    pub index: TileIndex,
    pub variables: Vec<String>,
    pub stats: Option<ChannelStats>,
}

impl TiledRaster {
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 5> {
        Tensor::from_data(self.data.clone(), device)
    }
}

/// Cuts `raster` into tiles of `variables` without normalisation.
pub fn tile_raster<S: AsRef<str>>(
    raster: &Raster,
    variables: &[S],
    tile_size: usize,
    steps_per_tile: usize,
    border_strategy: BorderStrategy,
) -> Result<TiledRaster, TilingError> {
    if steps_per_tile == 0 {
        return Err(TilingError::ZeroSize);
    }
    let (nt, ny, nx) = raster.dims();
    let row_starts = border_strategy.starts("y", ny, tile_size)?;
    let col_starts = border_strategy.starts("x", nx, tile_size)?;
    let ntime_blocks = nt / steps_per_tile;
    if ntime_blocks == 0 {
        return Err(TilingError::NotEnoughTimesteps {
            available: nt,
            steps: steps_per_tile,
        });
    }
    let fields = variables
        .iter()
        .map(|v| raster.variable(v.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let nrows = row_starts.len();
    let channels = fields.len();

    let mut tiles = vec![];
    let mut values =
        Vec::with_capacity(nrows * col_starts.len() * ntime_blocks * steps_per_tile * tile_size * tile_size * channels);
    for (col, x0) in col_starts.iter().enumerate() {
        for row in 0..nrows {
            // row 0 is the top of the map, i.e. the highest y indices
            let y0 = row_starts[nrows - 1 - row];
            let ys: Vec<usize> = (y0..y0 + tile_size).rev().collect();
            for time_block in 0..ntime_blocks {
                let t0 = time_block * steps_per_tile;
                for t in t0..t0 + steps_per_tile {
                    for y in &ys {
                        for x in *x0..x0 + tile_size {
                            let idx = raster.index(t, *y, x);
                            values.extend(fields.iter().map(|f| f[idx]));
                        }
                    }
                }
                tiles.push(TileRecord {
                    position: tiles.len(),
                    row,
                    col,
                    time_block,
                    x: raster.x[*x0..x0 + tile_size].to_vec(),
                    y: ys.iter().map(|y| raster.y[*y]).collect(),
                    time: raster.time[t0..t0 + steps_per_tile].to_vec(),
                });
            }
        }
    }
    debug!(
        "cut {} tiles ({} rows, {} cols, {} time blocks)",
        tiles.len(),
        nrows,
        col_starts.len(),
        ntime_blocks
    );

    let shape = vec![tiles.len(), steps_per_tile, tile_size, tile_size, channels];
    Ok(TiledRaster {
        data: TensorData::new(values, shape),
        index: TileIndex {
            tiles,
            nrows,
            ncols: col_starts.len(),
            ntime_blocks,
        },
        variables: variables.iter().map(|v| v.as_ref().to_string()).collect(),
        stats: None,
    })
}

/// Z-scores every channel with statistics over all tiles, steps and pixels.
/// NaN values are ignored by the statistics and stay NaN.
pub fn normalize_channels(values: &mut [f32], channels: usize) -> ChannelStats {
    let mut sum = vec![0f64; channels];
    let mut count = vec![0usize; channels];
    for (i, v) in values.iter().enumerate() {
        if !v.is_nan() {
            sum[i % channels] += *v as f64;
            count[i % channels] += 1;
        }
    }
    let mean: Vec<f64> = sum
        .iter()
        .zip(&count)
        .map(|(s, c)| if *c > 0 { s / *c as f64 } else { 0. })
        .collect();
    let mut sq = vec![0f64; channels];
    for (i, v) in values.iter().enumerate() {
        if !v.is_nan() {
            let d = *v as f64 - mean[i % channels];
            sq[i % channels] += d * d;
        }
    }
    let std: Vec<f64> = sq
        .iter()
        .zip(&count)
        .map(|(s, c)| if *c > 0 { (s / *c as f64).sqrt() } else { 0. })
        .collect();

    for (i, v) in values.iter_mut().enumerate() {
        let c = i % channels;
        // constant channels are only centred
        let scale = if std[c] > 0. { std[c] } else { 1. };
        *v = ((*v as f64 - mean[c]) / scale) as f32;
    }
    ChannelStats {
        mean: mean.into_iter().map(|m| m as f32).collect(),
        std: std.into_iter().map(|s| s as f32).collect(),
    }
}

/// Tiles `raster` and z-scores each variable over the whole tile set. The
/// statistics belong to this call only.
pub fn tile_and_normalize<S: AsRef<str>>(
    raster: &Raster,
    variables: &[S],
    tile_size: usize,
    steps_per_tile: usize,
    border_strategy: BorderStrategy,
) -> Result<TiledRaster, TilingError> {
    let mut tiled = tile_raster(raster, variables, tile_size, steps_per_tile, border_strategy)?;
    let shape = tiled.data.shape.clone();
    let mut values = tiled
        .data
        .to_vec::<f32>()
        .map_err(|e| TilingError::Data(format!("{e:?}")))?;
    let stats = normalize_channels(&mut values, variables.len());
    tiled.data = TensorData::new(values, shape);
    tiled.stats = Some(stats);
    Ok(tiled)
}

#[derive(Debug, Clone)]
pub struct TilePrediction<B: Backend> {
    pub mean: Tensor<B, 5>,
    /// Ensemble standard deviation, only present for ensemble runs.
    pub std: Option<Tensor<B, 5>>,
}

/// Runs all tiles through `downscaler` in one batch. With an ensemble size the
/// pass is repeated with fresh noise and reduced to mean and population std.
pub fn predict_tiles<B: Backend, D: Downscaler<B>>(
    tiles: Tensor<B, 5>,
    downscaler: &D,
    ensemble_size: Option<usize>,
) -> Result<TilePrediction<B>, TilingError> {
    let Some(n) = ensemble_size else {
        return Ok(TilePrediction {
            mean: downscaler.downscale(tiles),
            std: None,
        });
    };
    if n == 0 {
        return Err(TilingError::InvalidEnsembleSize(n));
    }

    info!("Computing prediction 1 over {n}");
    let mut mean = downscaler.downscale(tiles.clone());
    let mut m2 = mean.zeros_like();
    for k in 2..=n {
        info!("Computing prediction {k} over {n}");
        let sample = downscaler.downscale(tiles.clone());
        let delta = sample.clone() - mean.clone();
        mean = mean + delta.clone().div_scalar(k as f64);
        m2 = m2 + delta * (sample - mean.clone());
    }
    let std = m2.div_scalar(n as f64).clamp_min(0.).sqrt();
    Ok(TilePrediction {
        mean,
        std: Some(std),
    })
}

fn sorted_axis(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut axis: Vec<f64> = values.collect();
    axis.sort_by(|a, b| a.total_cmp(b));
    axis.dedup();
    axis
}

fn locate(axis: &[f64], value: f64) -> usize {
    // every tile coordinate is part of the union axis
    axis.binary_search_by(|p| p.total_cmp(&value))
        .unwrap_or_else(|i| i)
}

/// Places every tile prediction at its source coordinates. The result spans the
/// sorted union of all tile coordinates. Where tiles overlap the tile with the
/// highest position wins.
pub fn stitch<B: Backend, S: AsRef<str>>(
    predictions: Tensor<B, 5>,
    index: &TileIndex,
    variables: &[S],
) -> Result<Raster, TilingError> {
    let found: [usize; 5] = predictions.dims();
    let [_, steps, size, _, channels] = found;
    let expected_steps = index.get(0).map(|t| t.time.len()).unwrap_or(steps);
    let expected_size = index.get(0).map(|t| t.x.len()).unwrap_or(size);
    if found[0] != index.len()
        || steps != expected_steps
        || size != expected_size
        || found[3] != expected_size
        || channels < variables.len()
    {
        return Err(TilingError::PredictionShape {
            expected: [
                index.len(),
                expected_steps,
                expected_size,
                expected_size,
                variables.len().max(channels),
            ],
            found,
        });
    }
    let values = predictions
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TilingError::Data(format!("{e:?}")))?;

    let xs = sorted_axis(index.iter().flat_map(|t| t.x.iter().copied()));
    let ys = sorted_axis(index.iter().flat_map(|t| t.y.iter().copied()));
    let mut times: Vec<i64> = index.iter().flat_map(|t| t.time.iter().copied()).collect();
    times.sort_unstable();
    times.dedup();

    let mut out = Raster::new(xs, ys, times);
    let (nt, ny, nx) = out.dims();
    let mut fields = vec![vec![f32::NAN; nt * ny * nx]; variables.len()];

    for tile in index.iter() {
        let x_pos: Vec<usize> = tile.x.iter().map(|v| locate(&out.x, *v)).collect();
        let y_pos: Vec<usize> = tile.y.iter().map(|v| locate(&out.y, *v)).collect();
        let t_pos: Vec<usize> = tile
            .time
            .iter()
            .map(|v| out.time.binary_search(v).unwrap_or_else(|i| i))
            .collect();
        for (t, tp) in t_pos.iter().enumerate() {
            for (r, yp) in y_pos.iter().enumerate() {
                for (c, xp) in x_pos.iter().enumerate() {
                    let src = (((tile.position * steps + t) * size + r) * size + c) * channels;
                    let dst = out.index(*tp, *yp, *xp);
                    for (v, field) in fields.iter_mut().enumerate() {
                        field[dst] = values[src + v];
                    }
                }
            }
        }
    }
    for (name, field) in variables.iter().zip(fields) {
        out.insert_variable(name.as_ref(), field)?;
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ReconstructedMap {
    pub mean: Raster,
    pub std: Option<Raster>,
}

/// Predicts `output_variables` over the whole raster: tile, normalise, infer, stitch.
pub fn reconstruct_map<B: Backend, D: Downscaler<B>, S: AsRef<str>, O: AsRef<str>>(
    raster: &Raster,
    input_variables: &[S],
    output_variables: &[O],
    downscaler: &D,
    config: &ReconstructionConfig,
    device: &B::Device,
) -> Result<ReconstructedMap, TilingError> {
    let tiled = tile_and_normalize(
        raster,
        input_variables,
        config.tile_size,
        config.steps_per_tile,
        config.border_strategy,
    )?;
    info!(
        "predicting {} tiles of {}x{} pixels",
        tiled.index.len(),
        config.tile_size,
        config.tile_size
    );
    let prediction = predict_tiles(
        tiled.to_tensor::<B>(device),
        downscaler,
        config.ensemble_size,
    )?;
    let mean = stitch(prediction.mean, &tiled.index, output_variables)?;
    let std = prediction
        .std
        .map(|std| stitch(std, &tiled.index, output_variables))
        .transpose()?;
    Ok(ReconstructedMap { mean, std })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn raster(nt: usize, ny: usize, nx: usize) -> Raster {
        let n = nt * ny * nx;
        Raster::new(
            (0..nx).map(|v| 1000. + v as f64).collect(),
            (0..ny).map(|v| 2000. + v as f64).collect(),
            (0..nt as i64).map(|t| t * 3600).collect(),
        )
        .with_variable("a", (0..n).map(|v| v as f32).collect())
        .unwrap()
        .with_variable("b", (0..n).map(|v| (v % 7) as f32 * 2.).collect())
        .unwrap()
    }

    #[test]
    fn invalid_strategy_is_named() {
        let err = "blend".parse::<BorderStrategy>().unwrap_err();
        assert!(err.to_string().contains("blend"));
    }

    #[test]
    fn crop_grid_drops_trailing_pixels() {
        let starts = BorderStrategy::Crop.starts("x", 260, 128).unwrap();
        assert_eq!(starts, vec![0, 128]);
        assert_eq!(starts.last().unwrap() + 128, 256);
    }

    #[test]
    fn overlap_grid_covers_axis() {
        let starts = BorderStrategy::Overlap.starts("x", 260, 128).unwrap();
        assert_eq!(starts.len(), 3);
        let mut covered = vec![false; 260];
        for s in &starts {
            covered[*s..s + 128].iter_mut().for_each(|c| *c = true);
        }
        assert!(covered.iter().all(|c| *c));
    }

    #[test]
    fn overlap_spreads_leftover_pixels() {
        // 133 free pixels over 2 gaps: stride 66 with one pixel left over
        let starts = BorderStrategy::Overlap.starts("x", 261, 128).unwrap();
        assert_eq!(starts, vec![0, 67, 133]);
    }

    #[test]
    fn overlap_single_tile() {
        assert_eq!(BorderStrategy::Overlap.starts("y", 8, 8).unwrap(), vec![0]);
    }

    #[test]
    fn too_small_raster_fails() {
        assert!(matches!(
            BorderStrategy::Overlap.starts("y", 7, 8),
            Err(TilingError::RasterTooSmall { pixels: 7, .. })
        ));
    }

    #[test]
    fn crop_tiles_are_indexed_top_down() {
        let r = raster(4, 10, 9);
        let tiled = tile_raster(&r, &["a"], 4, 2, BorderStrategy::Crop).unwrap();
        assert_eq!(tiled.index.nrows, 2);
        assert_eq!(tiled.index.ncols, 2);
        assert_eq!(tiled.index.ntime_blocks, 2);
        assert_eq!(tiled.index.len(), 8);
        assert_eq!(tiled.data.shape, vec![8, 2, 4, 4, 1]);

        let top = tiled.index.get(tiled.index.position(0, 0, 0).unwrap()).unwrap();
        assert_eq!(top.y, vec![2007., 2006., 2005., 2004.]);
        let bottom = tiled.index.get(tiled.index.position(1, 0, 0).unwrap()).unwrap();
        assert_eq!(bottom.y, vec![2003., 2002., 2001., 2000.]);

        let values = tiled.data.to_vec::<f32>().unwrap();
        // first pixel of the top tile is (t=0, y=7, x=0)
        assert_eq!(values[0], r.value("a", 0, 7, 0).unwrap());
    }

    #[test]
    fn positions_follow_column_row_time_order() {
        let r = raster(4, 8, 8);
        let tiled = tile_raster(&r, &["a"], 4, 2, BorderStrategy::Crop).unwrap();
        let order: Vec<(usize, usize, usize)> = tiled
            .index
            .iter()
            .map(|t| (t.col, t.row, t.time_block))
            .collect();
        assert_eq!(order[0], (0, 0, 0));
        assert_eq!(order[1], (0, 0, 1));
        assert_eq!(order[2], (0, 1, 0));
        assert_eq!(order[4], (1, 0, 0));
        assert!(tiled.index.iter().enumerate().all(|(i, t)| t.position == i));
    }

    #[test]
    fn remainder_frames_are_dropped() {
        let r = raster(5, 4, 4);
        let tiled = tile_raster(&r, &["a"], 4, 2, BorderStrategy::Crop).unwrap();
        assert_eq!(tiled.index.ntime_blocks, 2);
        assert!(matches!(
            tile_raster(&r, &["a"], 4, 6, BorderStrategy::Crop),
            Err(TilingError::NotEnoughTimesteps { available: 5, steps: 6 })
        ));
    }

    #[test]
    fn unknown_variable_fails() {
        let r = raster(2, 4, 4);
        assert!(matches!(
            tile_raster(&r, &["missing"], 4, 2, BorderStrategy::Crop),
            Err(TilingError::Raster(RasterError::UnknownVariable(_)))
        ));
    }

    #[test]
    fn normalisation_is_per_channel() {
        let r = raster(4, 8, 8);
        let tiled = tile_and_normalize(&r, &["a", "b"], 4, 2, BorderStrategy::Crop).unwrap();
        let stats = tiled.stats.clone().unwrap();
        assert_eq!(stats.mean.len(), 2);
        let values = tiled.data.to_vec::<f32>().unwrap();
        for c in 0..2 {
            let channel: Vec<f64> = values.iter().skip(c).step_by(2).map(|v| *v as f64).collect();
            let mean = channel.iter().sum::<f64>() / channel.len() as f64;
            let var = channel.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / channel.len() as f64;
            assert!(mean.abs() < 1e-4, "channel {c} mean {mean}");
            assert!((var - 1.).abs() < 1e-3, "channel {c} var {var}");
        }
    }

    #[test]
    fn ensemble_size_setting() {
        assert_eq!(parse_ensemble_size(None).unwrap(), None);
        assert_eq!(parse_ensemble_size(Some("")).unwrap(), Some(DEFAULT_ENSEMBLE_SIZE));
        assert_eq!(parse_ensemble_size(Some(" 7 ")).unwrap(), Some(7));
        assert!(matches!(
            parse_ensemble_size(Some("ten")),
            Err(TilingError::UnparsableEnsembleSize(v)) if v == "ten"
        ));
        assert!(matches!(
            parse_ensemble_size(Some("0")),
            Err(TilingError::InvalidEnsembleSize(0))
        ));
    }

    #[test]
    fn normalisation_ignores_nan() {
        let mut values = vec![1., f32::NAN, 3., 5.];
        let stats = normalize_channels(&mut values, 1);
        assert_eq!(stats.mean, vec![3.]);
        assert!(values[1].is_nan());
        assert!(values[2].abs() < 1e-6);
        assert!((values[0] + values[3]).abs() < 1e-6);
        assert!(values[0] < 0.);
    }

    #[test]
    fn crop_stitch_restores_covered_subset() {
        let r = raster(5, 10, 9);
        let tiled = tile_raster(&r, &["a", "b"], 4, 2, BorderStrategy::Crop).unwrap();
        let device = Default::default();
        let prediction = tiled.to_tensor::<TestBackend>(&device);
        let stitched = stitch(prediction, &tiled.index, &["a", "b"]).unwrap();

        assert_eq!(stitched.x, r.x[..8].to_vec());
        assert_eq!(stitched.y, r.y[..8].to_vec());
        assert_eq!(stitched.time, r.time[..4].to_vec());
        for t in 0..4 {
            for y in 0..8 {
                for x in 0..8 {
                    assert_eq!(
                        stitched.value("b", t, y, x).unwrap(),
                        r.value("b", t, y, x).unwrap()
                    );
                }
            }
        }
    }

    #[test]
    fn overlap_stitch_restores_full_raster() {
        let r = raster(2, 10, 9);
        let tiled = tile_raster(&r, &["a"], 4, 2, BorderStrategy::Overlap).unwrap();
        assert_eq!(tiled.index.nrows, 3);
        assert_eq!(tiled.index.ncols, 3);
        let device = Default::default();
        let stitched = stitch(tiled.to_tensor::<TestBackend>(&device), &tiled.index, &["a"]).unwrap();
        assert_eq!(stitched.x, r.x);
        assert_eq!(stitched.y, r.y);
        assert_eq!(stitched.variable("a").unwrap(), r.variable("a").unwrap());
    }

    #[test]
    fn stitch_rejects_wrong_batch() {
        let r = raster(2, 8, 8);
        let tiled = tile_raster(&r, &["a"], 4, 2, BorderStrategy::Crop).unwrap();
        let device = Default::default();
        let wrong = Tensor::<TestBackend, 5>::zeros([3, 2, 4, 4, 1], &device);
        assert!(matches!(
            stitch(wrong, &tiled.index, &["a"]),
            Err(TilingError::PredictionShape { .. })
        ));
    }
}
