//! Wind field metrics. All of them take `[batch, time, y, x, channels]` fields
//! whose first two channels are the `u` and `v` wind components.

use std::f64::consts::PI;

use burn::{
    prelude::Backend,
    tensor::{Tensor, cast::ToElement, module::avg_pool2d},
};
use log::warn;
use rustfft::{FftPlanner, num_complex::Complex};

use crate::gan::layout::to_frames;

pub trait FieldMetric<B: Backend>: Send + Sync {
    fn name(&self) -> &str;
    fn compute(&self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) -> f64;
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().to_f64()
}

fn host_values<B: Backend, const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
    match t.into_data().convert::<f32>().to_vec::<f32>() {
        Ok(values) => values,
        Err(e) => {
            warn!("unable to read metric input, the metric is skipped: {e:?}");
            vec![]
        }
    }
}

fn channel<B: Backend>(field: Tensor<B, 5>, index: usize) -> Tensor<B, 5> {
    field.narrow(4, index, 1)
}

fn wind_speed<B: Backend>(field: Tensor<B, 5>) -> Tensor<B, 5> {
    let u = channel(field.clone(), 0);
    let v = channel(field, 1);
    (u.powf_scalar(2.) + v.powf_scalar(2.)).sqrt()
}

/// Nearest-rank quantile, `q` in `[0, 1]`.
fn quantile(mut values: Vec<f32>, q: f64) -> Option<f32> {
    values.retain(|v| !v.is_nan());
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = ((values.len() - 1) as f64 * q.clamp(0., 1.)).round() as usize;
    Some(values[rank])
}

/// Root mean squared error over all channels.
pub struct Rmse;

impl<B: Backend> FieldMetric<B> for Rmse {
    fn name(&self) -> &str {
        "rmse"
    }

    fn compute(&self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) -> f64 {
        scalar((truth - prediction).powf_scalar(2.).mean()).sqrt()
    }
}

/// RMSE of the wind speed.
pub struct WindSpeedRmse;

impl<B: Backend> FieldMetric<B> for WindSpeedRmse {
    fn name(&self) -> &str {
        "ws_rmse"
    }

    fn compute(&self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) -> f64 {
        let err = wind_speed(truth) - wind_speed(prediction);
        scalar(err.powf_scalar(2.).mean()).sqrt()
    }
}

/// Wind speed RMSE where every pixel is weighted by its true speed relative
/// to the mean true speed.
pub struct WindSpeedWeightedRmse;

impl<B: Backend> FieldMetric<B> for WindSpeedWeightedRmse {
    fn name(&self) -> &str {
        "ws_weighted_rmse"
    }

    fn compute(&self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) -> f64 {
        let speed = wind_speed(truth);
        let err = (speed.clone() - wind_speed(prediction)).powf_scalar(2.);
        let mean_speed = scalar(speed.clone().mean());
        if mean_speed <= 0. {
            return scalar(err.mean()).sqrt();
        }
        scalar((speed.div_scalar(mean_speed) * err).mean()).sqrt()
    }
}

/// Wind speed RMSE restricted to pixels whose true speed reaches the given
/// quantile.
pub struct ExtremeRmse {
    pub quantile: f64,
}

impl Default for ExtremeRmse {
    fn default() -> Self {
        Self { quantile: 0.9 }
    }
}

impl<B: Backend> FieldMetric<B> for ExtremeRmse {
    fn name(&self) -> &str {
        "extreme_rmse"
    }

    fn compute(&self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) -> f64 {
        let speed = wind_speed(truth);
        let Some(threshold) = quantile(host_values(speed.clone()), self.quantile) else {
            return f64::NAN;
        };
        let mask = speed.clone().greater_equal_elem(threshold).float();
        let err = (speed - wind_speed(prediction)).powf_scalar(2.);
        let selected = scalar(mask.clone().sum());
        if selected == 0. {
            return f64::NAN;
        }
        (scalar((err * mask).sum()) / selected).sqrt()
    }
}

/// Mean angle between true and predicted wind vectors, scaled to `[0, 1]`.
pub struct AngularCosineDistance;

impl<B: Backend> FieldMetric<B> for AngularCosineDistance {
    fn name(&self) -> &str {
        "acd"
    }

    fn compute(&self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) -> f64 {
        let dot = channel(truth.clone(), 0) * channel(prediction.clone(), 0)
            + channel(truth.clone(), 1) * channel(prediction.clone(), 1);
        let norms = wind_speed(truth) * wind_speed(prediction);
        let cosine = (dot / norms.add_scalar(1e-8)).clamp(-1., 1.);
        let angles: Vec<f64> = host_values(cosine)
            .into_iter()
            .filter(|c| !c.is_nan())
            .map(|c| (c as f64).acos() / PI)
            .collect();
        if angles.is_empty() {
            return f64::NAN;
        }
        angles.iter().sum::<f64>() / angles.len() as f64
    }
}

/// 2D power spectrum `|F|^2 / N^2` of a row-major `h x w` image.
fn power_spectrum(planner: &mut FftPlanner<f64>, image: &[f64], h: usize, w: usize) -> Vec<f64> {
    let mut buffer: Vec<Complex<f64>> = image.iter().map(|v| Complex::new(*v, 0.)).collect();
    let rows = planner.plan_fft_forward(w);
    for row in buffer.chunks_exact_mut(w) {
        rows.process(row);
    }
    let cols = planner.plan_fft_forward(h);
    let mut column = vec![Complex::new(0., 0.); h];
    for x in 0..w {
        for y in 0..h {
            column[y] = buffer[y * w + x];
        }
        cols.process(&mut column);
        for y in 0..h {
            buffer[y * w + x] = column[y];
        }
    }
    let n2 = ((h * w) as f64).powi(2);
    buffer.iter().map(|c| c.norm_sqr() / n2).collect()
}

/// Images `[time, y, x]` of one channel, for every sample, as `f64` planes.
fn planes(values: &[f32], [b, t, h, w, c]: [usize; 5]) -> Vec<Vec<f64>> {
    let mut planes = Vec::with_capacity(b * t * c);
    for frame in values.chunks_exact(h * w * c) {
        for channel in 0..c {
            planes.push(
                frame
                    .iter()
                    .skip(channel)
                    .step_by(c)
                    .map(|v| *v as f64)
                    .collect(),
            );
        }
    }
    planes
}

/// Root mean squared difference of the log power spectra, in decibels,
/// averaged over every sample, timestep and channel.
pub struct LogSpectralDistance;

const SPECTRUM_EPSILON: f64 = 1e-12;

impl<B: Backend> FieldMetric<B> for LogSpectralDistance {
    fn name(&self) -> &str {
        "lsd"
    }

    fn compute(&self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) -> f64 {
        let dims = truth.dims();
        let [.., h, w, _] = dims;
        let truth = planes(&host_values(truth), dims);
        let prediction = planes(&host_values(prediction), dims);
        let mut planner = FftPlanner::new();
        let mut distance = MeanAccumulator::default();
        for (t, p) in truth.iter().zip(prediction.iter()) {
            if t.iter().chain(p.iter()).any(|v| v.is_nan()) {
                continue;
            }
            let pt = power_spectrum(&mut planner, t, h, w);
            let pp = power_spectrum(&mut planner, p, h, w);
            let mean_sq = pt
                .iter()
                .zip(pp.iter())
                .map(|(a, b)| (10. * ((a + SPECTRUM_EPSILON) / (b + SPECTRUM_EPSILON)).log10()).powi(2))
                .sum::<f64>()
                / pt.len() as f64;
            distance.update(mean_sq.sqrt());
        }
        distance.result()
    }
}

/// Two-sample Kolmogorov-Smirnov statistic, NaN ignored.
fn ks_statistic(mut a: Vec<f32>, mut b: Vec<f32>) -> Option<f64> {
    a.retain(|v| !v.is_nan());
    b.retain(|v| !v.is_nan());
    if a.is_empty() || b.is_empty() {
        return None;
    }
    a.sort_by(|x, y| x.total_cmp(y));
    b.sort_by(|x, y| x.total_cmp(y));
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j, mut d) = (0, 0, 0f64);
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / na - j as f64 / nb).abs());
    }
    Some(d)
}

/// KS statistic between true and predicted wind speed after a spatial mean
/// filter, averaged over frames.
pub struct SpatialKs {
    pub kernel_size: usize,
}

impl Default for SpatialKs {
    fn default() -> Self {
        Self { kernel_size: 3 }
    }
}

impl SpatialKs {
    fn smooth<B: Backend>(&self, field: Tensor<B, 5>) -> Vec<f32> {
        let [.., h, w, _] = field.dims();
        let kernel = [self.kernel_size.clamp(1, h), self.kernel_size.clamp(1, w)];
        let frames = to_frames(wind_speed(field));
        host_values(avg_pool2d(frames, kernel, [1, 1], [0, 0], true))
    }
}

impl<B: Backend> FieldMetric<B> for SpatialKs {
    fn name(&self) -> &str {
        "spatial_ks"
    }

    fn compute(&self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) -> f64 {
        let [b, t, ..] = truth.dims();
        let truth = self.smooth(truth);
        let prediction = self.smooth(prediction);
        let frame = truth.len() / (b * t).max(1);
        if frame == 0 {
            return f64::NAN;
        }
        let mut statistic = MeanAccumulator::default();
        for (t, p) in truth.chunks(frame).zip(prediction.chunks(frame)) {
            if let Some(d) = ks_statistic(t.to_vec(), p.to_vec()) {
                statistic.update(d);
            }
        }
        statistic.result()
    }
}

/// Metric battery computed on validation checkpoints.
pub fn test_metrics<B: Backend>() -> Vec<Box<dyn FieldMetric<B>>> {
    vec![
        Box::new(Rmse),
        Box::new(WindSpeedRmse),
        Box::new(WindSpeedWeightedRmse),
        Box::new(ExtremeRmse::default()),
        Box::new(LogSpectralDistance),
        Box::new(SpatialKs::default()),
        Box::new(AngularCosineDistance),
    ]
}

/// Metrics tracked on generator output during training.
pub fn generator_metrics<B: Backend>() -> Vec<Box<dyn FieldMetric<B>>> {
    vec![
        Box::new(AngularCosineDistance),
        Box::new(LogSpectralDistance),
        Box::new(ExtremeRmse::default()),
        Box::new(WindSpeedWeightedRmse),
        Box::new(SpatialKs::default()),
    ]
}

/// Running mean of a scalar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeanAccumulator {
    total: f64,
    count: usize,
}

impl MeanAccumulator {
    pub fn update(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.total += value;
        self.count += 1;
    }

    /// `NaN` until the first update.
    pub fn result(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.total / self.count as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Field metrics paired with running means.
pub struct MetricTracker<B: Backend> {
    entries: Vec<(Box<dyn FieldMetric<B>>, MeanAccumulator)>,
}

impl<B: Backend> Default for MetricTracker<B> {
    fn default() -> Self {
        Self { entries: vec![] }
    }
}

impl<B: Backend> MetricTracker<B> {
    pub fn new(metrics: Vec<Box<dyn FieldMetric<B>>>) -> Self {
        Self {
            entries: metrics
                .into_iter()
                .map(|m| (m, MeanAccumulator::default()))
                .collect(),
        }
    }

    pub fn update(&mut self, truth: Tensor<B, 5>, prediction: Tensor<B, 5>) {
        for (metric, mean) in self.entries.iter_mut() {
            mean.update(metric.compute(truth.clone(), prediction.clone()));
        }
    }

    /// Current running means keyed by metric name.
    pub fn results(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(m, mean)| (m.name(), mean.result()))
    }

    pub fn reset(&mut self) {
        self.entries.iter_mut().for_each(|(_, mean)| mean.reset());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        tensor::{Distribution, TensorData},
    };

    fn field(uv: &[(f32, f32)]) -> Tensor<NdArray, 5> {
        let values: Vec<f32> = uv.iter().flat_map(|(u, v)| [*u, *v]).collect();
        Tensor::from_data(
            TensorData::new(values, [1, 1, 1, uv.len(), 2]),
            &Default::default(),
        )
    }

    #[test]
    fn perfect_prediction_scores_zero() {
        let truth = field(&[(1., 2.), (3., -1.), (0.5, 0.5)]);
        for metric in test_metrics::<NdArray>() {
            let value = metric.compute(truth.clone(), truth.clone());
            assert!(value.abs() < 1e-3, "{} = {value}", metric.name());
        }
    }

    #[test]
    fn rmse_of_constant_offset() {
        let truth = field(&[(0., 0.), (1., 1.)]);
        let pred = field(&[(2., 2.), (3., 3.)]);
        assert!((FieldMetric::<NdArray>::compute(&Rmse, truth, pred) - 2.).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_have_unit_distance() {
        let truth = field(&[(1., 0.), (0., 2.)]);
        let pred = field(&[(-1., 0.), (0., -2.)]);
        let acd = FieldMetric::<NdArray>::compute(&AngularCosineDistance, truth, pred);
        assert!((acd - 1.).abs() < 1e-3);
    }

    #[test]
    fn extreme_rmse_only_counts_strong_wind() {
        // true speeds 1, 1, 1, 10: only the last pixel is above the 0.9 quantile
        let truth = field(&[(1., 0.), (1., 0.), (1., 0.), (10., 0.)]);
        let pred = field(&[(5., 0.), (5., 0.), (5., 0.), (8., 0.)]);
        let value = FieldMetric::<NdArray>::compute(&ExtremeRmse::default(), truth, pred);
        assert!((value - 2.).abs() < 1e-5);
    }

    fn grid(h: usize, w: usize, f: impl Fn(usize, usize) -> (f32, f32)) -> Tensor<NdArray, 5> {
        let values: Vec<f32> = (0..h * w)
            .flat_map(|i| {
                let (u, v) = f(i / w, i % w);
                [u, v]
            })
            .collect();
        Tensor::from_data(TensorData::new(values, [1, 1, h, w, 2]), &Default::default())
    }

    #[test]
    fn scaled_field_has_constant_spectral_distance() {
        // doubling the field multiplies every power by 4, i.e. 10 * log10(4) dB
        let truth = Tensor::<NdArray, 5>::random(
            [2, 1, 4, 4, 2],
            Distribution::Normal(0., 1.),
            &Default::default(),
        );
        let pred = truth.clone().mul_scalar(2.);
        let lsd = FieldMetric::<NdArray>::compute(&LogSpectralDistance, truth.clone(), pred);
        assert!((lsd - 10. * 4f64.log10()).abs() < 1e-2, "lsd = {lsd}");
        let same = FieldMetric::<NdArray>::compute(&LogSpectralDistance, truth.clone(), truth);
        assert!(same.abs() < 1e-9);
    }

    #[test]
    fn ks_statistic_of_disjoint_samples_is_one() {
        assert_eq!(ks_statistic(vec![1., 2., 3.], vec![4., 5.]), Some(1.));
        assert_eq!(ks_statistic(vec![1., 2.], vec![2., 1.]), Some(0.));
        assert_eq!(ks_statistic(vec![1., 2., 3., 4.], vec![3., 4., 5., 6.]), Some(0.5));
        assert_eq!(ks_statistic(vec![f32::NAN], vec![1.]), None);
    }

    #[test]
    fn spatial_ks_detects_shifted_speed() {
        let truth = grid(4, 4, |_, x| (x as f32, 0.));
        let pred = grid(4, 4, |_, x| (x as f32 + 10., 0.));
        let ks = FieldMetric::<NdArray>::compute(&SpatialKs::default(), truth.clone(), pred);
        assert!((ks - 1.).abs() < 1e-9);
        let same = FieldMetric::<NdArray>::compute(&SpatialKs::default(), truth.clone(), truth);
        assert_eq!(same, 0.);
    }

    #[test]
    fn accumulator_averages_and_resets() {
        let mut acc = MeanAccumulator::default();
        assert!(acc.result().is_nan());
        acc.update(1.);
        acc.update(3.);
        acc.update(f64::NAN);
        assert_eq!(acc.result(), 2.);
        acc.reset();
        assert!(acc.result().is_nan());
    }
}
