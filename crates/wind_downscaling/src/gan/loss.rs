use burn::{
    prelude::Backend,
    tensor::{Tensor, activation::relu},
};
use serde::{Deserialize, Serialize};

/// Adversarial objective of the critic. Lower is better for the discriminator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum AdversarialLoss {
    /// `fake - real`
    #[default]
    Wasserstein,
    /// `relu(1 - real) + relu(1 + fake)`
    Hinge,
}

impl AdversarialLoss {
    /// `real` and `fake` are `[batch, 1]` scores. Sample weights scale the
    /// per-sample loss, which is then averaged over the batch.
    pub fn discriminator_loss<B: Backend>(
        &self,
        real: Tensor<B, 2>,
        fake: Tensor<B, 2>,
        sample_weight: Option<Tensor<B, 1>>,
    ) -> Tensor<B, 1> {
        let per_sample = match self {
            Self::Wasserstein => fake - real,
            Self::Hinge => relu(real.neg().add_scalar(1.)) + relu(fake.add_scalar(1.)),
        };
        weighted_mean(per_sample, sample_weight)
    }

    /// The generator wants the critic to score its output high.
    pub fn generator_loss<B: Backend>(fake: Tensor<B, 2>) -> Tensor<B, 1> {
        fake.mean().neg()
    }
}

fn weighted_mean<B: Backend>(
    per_sample: Tensor<B, 2>,
    sample_weight: Option<Tensor<B, 1>>,
) -> Tensor<B, 1> {
    let [batch, _] = per_sample.dims();
    match sample_weight {
        None => per_sample.mean(),
        Some(weight) => (per_sample.reshape([batch]) * weight)
            .sum()
            .div_scalar(batch as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    fn scores(values: [f32; 2]) -> Tensor<NdArray, 2> {
        Tensor::from_data(TensorData::new(values.to_vec(), [2, 1]), &Default::default())
    }

    #[test]
    fn wasserstein_is_fake_minus_real() {
        let loss = AdversarialLoss::Wasserstein
            .discriminator_loss(scores([3., 1.]), scores([0., 0.]), None)
            .into_scalar();
        assert!((loss + 2.).abs() < 1e-6);
    }

    #[test]
    fn weights_scale_samples() {
        let weight = Tensor::from_data(TensorData::new(vec![1f32, 0.], [2]), &Default::default());
        let loss = AdversarialLoss::Wasserstein
            .discriminator_loss(scores([4., 100.]), scores([0., 0.]), Some(weight))
            .into_scalar();
        assert!((loss + 2.).abs() < 1e-6);
    }

    #[test]
    fn hinge_is_zero_for_confident_critic() {
        let loss = AdversarialLoss::Hinge
            .discriminator_loss(scores([2., 3.]), scores([-1., -5.]), None)
            .into_scalar();
        assert!(loss.abs() < 1e-6);
    }

    #[test]
    fn generator_loss_is_negated_score() {
        let loss = AdversarialLoss::generator_loss(scores([1., 3.])).into_scalar();
        assert!((loss + 2.).abs() < 1e-6);
    }
}
