use std::{
    fs, io,
    path::{Path, PathBuf},
};

use burn::{prelude::Backend, record::FileRecorder, tensor::Tensor};
use image::{Rgb, RgbImage};
use log::info;
use thiserror::Error;

use crate::{
    data::batcher::DownscalingBatch,
    evaluation::CheckpointSeries,
    gan::model::WeightsError,
    network::{Downscaler, LoadCheckpoint},
};

const PANEL_GAP: u32 = 4;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Unable to write image: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Unable to load checkpoint: {0}")]
    Weights(#[from] WeightsError),
    #[error("Unable to read field data: {}", .0)]
    Data(String),
}

/// Piecewise linear approximation of the `jet` colormap on `[0, 1]`.
pub fn jet(v: f32) -> Rgb<u8> {
    let v = if v.is_nan() { 0. } else { v.clamp(0., 1.) };
    let channel = |offset: f32| {
        let x = 1.5 - (4. * v - offset).abs();
        (x.clamp(0., 1.) * 255.).round() as u8
    };
    Rgb([channel(3.), channel(2.), channel(1.)])
}

/// Panels of `height x width` values placed side by side, each scaled to its
/// own range.
pub fn panel_image(panels: &[Vec<f32>], height: usize, width: usize) -> RgbImage {
    let n = panels.len() as u32;
    let total_width = n * width as u32 + n.saturating_sub(1) * PANEL_GAP;
    let mut img = RgbImage::from_pixel(total_width, height as u32, Rgb([255, 255, 255]));
    for (k, panel) in panels.iter().enumerate() {
        let finite = panel.iter().filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
        let range = if hi > lo { hi - lo } else { 1. };
        let x0 = k as u32 * (width as u32 + PANEL_GAP);
        for (i, v) in panel.iter().enumerate().take(height * width) {
            let (row, col) = (i / width, i % width);
            img.put_pixel(x0 + col as u32, row as u32, jet((v - lo) / range));
        }
    }
    img
}

/// Channel `c` of sample `b` at time step 0 of a `[b, t, h, w, c]` field.
fn slice_panel<B: Backend>(
    field: &Tensor<B, 5>,
    sample: usize,
    channel: usize,
) -> Result<Vec<f32>, PlotError> {
    let [_, _, h, w, _] = field.dims();
    field
        .clone()
        .narrow(0, sample, 1)
        .narrow(1, 0, 1)
        .narrow(4, channel, 1)
        .reshape([h * w])
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PlotError::Data(format!("{e:?}")))
}

/// `plots/{kind}/{run_id}/{epoch}/inp_{sample}.png`
pub fn plot_path(root: &Path, series: &CheckpointSeries, epoch: usize, sample: usize) -> PathBuf {
    root.join("plots")
        .join(series.kind.to_string())
        .join(&series.run_id)
        .join(epoch.to_string())
        .join(format!("inp_{sample}.png"))
}

/// For every checkpoint of `series`, writes one PNG per sample of the first
/// `samples` batch entries showing input, target and prediction of the first
/// channel.
pub fn plot_prediction_by_batch<B, N, R>(
    network: &mut N,
    series: &CheckpointSeries,
    batch: &DownscalingBatch<B>,
    samples: usize,
    root: &Path,
    recorder: &R,
    device: &B::Device,
) -> Result<Vec<PathBuf>, PlotError>
where
    B: Backend,
    N: Downscaler<B> + LoadCheckpoint<B>,
    R: FileRecorder<B>,
{
    let batch = batch.head(samples);
    let [_, _, h, w, _] = batch.high_res.dims();
    let mut written = vec![];
    for epoch in series.epochs() {
        network.load_checkpoint(&series.path(epoch), recorder, device)?;
        let prediction = network.downscale(batch.low_res.clone());
        for sample in 0..batch.len() {
            let panels = [
                slice_panel(&batch.low_res, sample, 0)?,
                slice_panel(&batch.high_res, sample, 0)?,
                slice_panel(&prediction, sample, 0)?,
            ];
            let path = plot_path(root, series, epoch, sample);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            panel_image(&panels, h, w).save(&path)?;
            written.push(path);
        }
        info!("plotted epoch {epoch}");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jet_runs_from_blue_to_red() {
        assert_eq!(jet(0.), Rgb([0, 0, 128]));
        assert_eq!(jet(1.), Rgb([128, 0, 0]));
        assert_eq!(jet(0.5), Rgb([128, 255, 128]));
    }

    #[test]
    fn panels_are_placed_side_by_side() {
        let img = panel_image(&[vec![0., 1., 2., 3.], vec![5.; 4]], 2, 2);
        assert_eq!(img.dimensions(), (2 * 2 + PANEL_GAP, 2));
        assert_eq!(*img.get_pixel(0, 0), jet(0.));
        assert_eq!(*img.get_pixel(1, 1), jet(1.));
        // constant panel maps to the bottom of the scale
        assert_eq!(*img.get_pixel(2 + PANEL_GAP, 0), jet(0.));
    }
}
