use burn::prelude::{Backend, Tensor};
use rerun::{AsComponents, RecordingStream, external::ndarray};

use crate::{data::raster::Raster, gan::trainer::StepMetrics};

/// Records training curves and wind fields into a rerun recording.
pub struct DownscalingLogger {
    stream: RecordingStream,
    /// Fields are logged every `log_field_interval` epochs.
    pub log_field_interval: usize,
}

impl DownscalingLogger {
    pub fn new(stream: RecordingStream) -> Self {
        Self {
            stream,
            log_field_interval: 5,
        }
    }

    /// A logger that drops everything, for tests and headless runs.
    pub fn disabled() -> Self {
        Self::new(RecordingStream::disabled())
    }

    pub fn wants_fields(&self, epoch: usize) -> bool {
        self.log_field_interval > 0 && epoch % self.log_field_interval == 0
    }

    pub fn log_metrics(&self, base_path: &str, step: usize, metrics: &StepMetrics) {
        self.stream.set_time_sequence("step", step as i64);
        for (name, value) in metrics {
            let _ = self.stream.log(
                format!("graphs/{base_path}/{name}"),
                &rerun::Scalar::new(*value),
            );
        }
    }

    pub fn log_scalar(&self, path: &str, value: f64) {
        let _ = self.stream.log(path, &rerun::Scalar::new(value));
    }

    /// Wind speed of the first sample and time step of `[b, t, y, x, c]` fields.
    pub fn log_fields<B: Backend>(
        &self,
        base_path: &str,
        epoch: usize,
        truth: Tensor<B, 5>,
        prediction: Tensor<B, 5>,
    ) {
        self.stream.set_time_sequence("epoch", epoch as i64);
        for (name, field) in [("truth", truth), ("prediction", prediction)] {
            let path = format!("{base_path}/fields/{name}_speed");
            match LogContainer::from_burn_field(first_speed(field)) {
                Ok(c) => {
                    let _ = self.stream.log(path, &c);
                }
                Err(e) => self.log_error(&path, &e),
            }
        }
    }

    /// One time step of a raster variable, north up.
    pub fn log_map(&self, path: &str, raster: &Raster, variable: &str, t: usize) {
        match LogContainer::from_raster(raster, variable, t) {
            Ok(c) => {
                let _ = self.stream.log(path, &c);
            }
            Err(e) => self.log_error(path, &e),
        }
    }

    fn log_error(&self, path: &str, e: &LogContainerParsingError) {
        let _ = self.stream.log(
            path,
            &rerun::TextLog::new(format!("Failed to convert {path} due to {e:?}"))
                .with_level(rerun::TextLogLevel::ERROR),
        );
    }
}

fn first_speed<B: Backend>(field: Tensor<B, 5>) -> Tensor<B, 2> {
    let [_, _, h, w, c] = field.dims();
    let frame = field.narrow(0, 0, 1).narrow(1, 0, 1).reshape([h, w, c]);
    if c < 2 {
        return frame.reshape([h, w]);
    }
    let u = frame.clone().narrow(2, 0, 1);
    let v = frame.narrow(2, 1, 1);
    (u.powf_scalar(2.) + v.powf_scalar(2.))
        .sqrt()
        .reshape([h, w])
}

pub struct LogContainer<K: ?Sized + AsComponents> {
    component: K,
}

impl<K: ?Sized + AsComponents> AsComponents for LogContainer<K> {
    fn as_serialized_batches(&self) -> Vec<rerun::SerializedComponentBatch> {
        self.component.as_serialized_batches()
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum LogContainerParsingError {
    #[error("Failed to tensor data to Vec<f32> due to {}", .0)]
    VecParsingError(String),
    #[error("Unable to parse tensor due to {}", .0)]
    RerunTensorParsingError(String),
    #[error("Unable to read raster due to {}", .0)]
    RasterError(String),
}

impl LogContainer<rerun::Tensor> {
    fn from_rows(
        values: Vec<f32>,
        shape: (usize, usize),
    ) -> Result<Self, LogContainerParsingError> {
        let nd = ndarray::Array2::from_shape_vec(shape, values)
            .map_err(|e| LogContainerParsingError::RerunTensorParsingError(format!("{e:?}")))?;
        let t = rerun::Tensor::try_from(nd)
            .map_err(|e| LogContainerParsingError::RerunTensorParsingError(format!("{e:?}")))?;
        Ok(Self {
            component: t.with_dim_names(["y", "x"]),
        })
    }

    /// `[height, width]` tensor, row 0 on top.
    pub fn from_burn_field<B: Backend>(
        field: Tensor<B, 2>,
    ) -> Result<Self, LogContainerParsingError> {
        let [h, w] = field.dims();
        let values = field
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| LogContainerParsingError::VecParsingError(format!("{e:?}")))?;
        Self::from_rows(values, (h, w))
    }

    /// Rasters store `y` ascending, so rows are flipped to put north on top.
    pub fn from_raster(
        raster: &Raster,
        variable: &str,
        t: usize,
    ) -> Result<Self, LogContainerParsingError> {
        let (_, ny, nx) = raster.dims();
        let values = raster
            .variable(variable)
            .map_err(|e| LogContainerParsingError::RasterError(e.to_string()))?;
        let mut rows = Vec::with_capacity(ny * nx);
        for y in (0..ny).rev() {
            let start = raster.index(t, y, 0);
            rows.extend_from_slice(&values[start..start + nx]);
        }
        Self::from_rows(rows, (ny, nx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    #[test]
    fn first_speed_uses_first_sample_and_step() {
        let mut values = vec![0f32; 2 * 2 * 1 * 2 * 2];
        // sample 0, step 0, x = 1: u = 3, v = 4
        values[2] = 3.;
        values[3] = 4.;
        let field =
            Tensor::<NdArray, 5>::from_data(TensorData::new(values, [2, 2, 1, 2, 2]), &Default::default());
        let speed = first_speed(field).into_data().to_vec::<f32>().unwrap();
        assert_eq!(speed, vec![0., 5.]);
    }

    #[test]
    fn raster_rows_are_flipped() {
        let raster = Raster::new(vec![0., 1.], vec![0., 1., 2.], vec![0])
            .with_variable("u10", vec![0., 1., 2., 3., 4., 5.])
            .unwrap();
        assert!(LogContainer::from_raster(&raster, "u10", 0).is_ok());
        assert!(matches!(
            LogContainer::from_raster(&raster, "v10", 0),
            Err(LogContainerParsingError::RasterError(_))
        ));
    }

    #[test]
    fn disabled_logger_accepts_metrics() {
        let log = DownscalingLogger::disabled();
        let mut metrics = StepMetrics::new();
        metrics.insert("d_loss".into(), 1.);
        log.log_metrics("training", 0, &metrics);
        assert!(log.wants_fields(5));
        assert!(!log.wants_fields(3));
    }
}
