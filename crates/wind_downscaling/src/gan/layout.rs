//! Conversions between field tensors `[batch, time, height, width, channels]`
//! and the channel-first layouts used by the convolution layers.

use burn::{prelude::Backend, tensor::Tensor};

/// `[b, t, h, w, c]` -> `[b * t, c, h, w]`
pub fn to_frames<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 4> {
    let [b, t, h, w, c] = x.dims();
    x.permute([0, 1, 4, 2, 3]).reshape([b * t, c, h, w])
}

/// `[b * t, c, h, w]` -> `[b, t, h, w, c]`
pub fn from_frames<B: Backend>(x: Tensor<B, 4>, batch: usize) -> Tensor<B, 5> {
    frames_to_sequence(x, batch).permute([0, 1, 3, 4, 2])
}

/// `[b, t, h, w, c]` -> `[b, t, c, h, w]`
pub fn to_sequence<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 5> {
    x.permute([0, 1, 4, 2, 3])
}

/// `[b * t, c, h, w]` -> `[b, t, c, h, w]`
pub fn frames_to_sequence<B: Backend>(x: Tensor<B, 4>, batch: usize) -> Tensor<B, 5> {
    let [n, c, h, w] = x.dims();
    x.reshape([batch, n / batch, c, h, w])
}

/// `[b, t, c, h, w]` -> `[b * t, c, h, w]`
pub fn sequence_to_frames<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 4> {
    let [b, t, c, h, w] = x.dims();
    x.reshape([b * t, c, h, w])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    #[test]
    fn frames_round_trip_keeps_values() {
        let device = Default::default();
        let values: Vec<f32> = (0..2 * 3 * 2 * 2 * 4).map(|v| v as f32).collect();
        let x = Tensor::<NdArray, 5>::from_data(TensorData::new(values.clone(), [2, 3, 2, 2, 4]), &device);
        let frames = to_frames(x);
        assert_eq!(frames.dims(), [6, 4, 2, 2]);
        let back = from_frames(frames, 2);
        assert_eq!(back.into_data().to_vec::<f32>().unwrap(), values);
    }
}
