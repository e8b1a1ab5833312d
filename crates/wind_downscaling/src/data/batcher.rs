use burn::{
    data::dataloader::batcher::Batcher,
    prelude::Backend,
    tensor::{Tensor, TensorData},
};

use super::dataset::DownscalingItem;

/// `low_res` is `[batch, time, size, size, predictors]`, `high_res` is
/// `[batch, time, size, size, outputs]`.
#[derive(Clone, Debug)]
pub struct DownscalingBatch<B: Backend> {
    pub low_res: Tensor<B, 5>,
    pub high_res: Tensor<B, 5>,
    pub sample_weight: Option<Tensor<B, 1>>,
}

impl<B: Backend> DownscalingBatch<B> {
    pub fn len(&self) -> usize {
        self.low_res.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first `n` samples, or all of them when the batch is smaller.
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.len());
        Self {
            low_res: self.low_res.clone().narrow(0, 0, n),
            high_res: self.high_res.clone().narrow(0, 0, n),
            sample_weight: self.sample_weight.clone().map(|w| w.narrow(0, 0, n)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DownscalingBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> DownscalingBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<DownscalingItem, DownscalingBatch<B>> for DownscalingBatcher<B> {
    fn batch(&self, items: Vec<DownscalingItem>) -> DownscalingBatch<B> {
        let low_res = items
            .iter()
            .map(|item| Tensor::<B, 4>::from_data(item.low_res.clone(), &self.device))
            .collect();
        let high_res = items
            .iter()
            .map(|item| Tensor::<B, 4>::from_data(item.high_res.clone(), &self.device))
            .collect();
        // weights only make sense when every item carries one
        let weights: Option<Vec<f32>> = items.iter().map(|item| item.sample_weight).collect();
        let sample_weight = weights.map(|w| {
            let n = w.len();
            Tensor::<B, 1>::from_data(TensorData::new(w, [n]), &self.device)
        });
        DownscalingBatch {
            low_res: Tensor::stack(low_res, 0),
            high_res: Tensor::stack(high_res, 0),
            sample_weight,
        }
    }
}
