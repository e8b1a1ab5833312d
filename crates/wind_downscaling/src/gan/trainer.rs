use std::{collections::BTreeMap, path::Path};

use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::FileRecorder,
    tensor::{Distribution, backend::AutodiffBackend, cast::ToElement},
};
use thiserror::Error;

use super::{
    component::{Component, Role},
    discriminator::DownscalingDiscriminator,
    generator::DownscalingGenerator,
    loss::AdversarialLoss,
    model::{DownscalingGan, WeightsError},
    noise::NoiseGenerator,
};
use crate::{
    data::batcher::DownscalingBatch,
    metrics::{FieldMetric, MeanAccumulator, MetricTracker},
};

/// Default weight of the gradient norm penalty in the critic loss.
pub const GRADIENT_PENALTY_WEIGHT: f64 = 100.0;

/// Scalar results of one step keyed by metric name.
pub type StepMetrics = BTreeMap<String, f64>;

#[derive(Error, Debug)]
pub enum GanError {
    #[error("The {} is not compiled: call compile before training or evaluating", .0)]
    NotCompiled(Role),
    #[error("The discriminator score does not depend on its high res input")]
    MissingInputGradient,
    #[error("The {} batch has frames of shape {:?} but the trainer expects {:?}", .what, .found, .expected)]
    BatchShape {
        what: &'static str,
        expected: [usize; 3],
        found: [usize; 3],
    },
    #[error("Weights error: {0}")]
    Weights(#[from] WeightsError),
}

#[derive(Config, Debug)]
pub struct GanTrainerConfig {
    /// Discriminator updates per generator update.
    #[config(default = 3)]
    pub n_critic: usize,
    #[config(default = "GRADIENT_PENALTY_WEIGHT")]
    pub gradient_penalty_weight: f64,
    #[config(default = "AdversarialLoss::Wasserstein")]
    pub loss: AdversarialLoss,
}

pub struct GradientPenalty<B: Backend> {
    /// `weight * mean((||grad|| - 1)^2)`, a constant with respect to all parameters.
    pub penalty: Tensor<B, 1>,
    /// Mean per-sample gradient norm.
    pub mean_norm: f64,
}

/// `weight * mean((norm - 1)^2)`
pub fn penalty_term<B: Backend>(norms: Tensor<B, 1>, weight: f64) -> Tensor<B, 1> {
    norms.sub_scalar(1.).powf_scalar(2.).mean().mul_scalar(weight)
}

/// Gradient of the critic score with respect to a random interpolate between
/// real and generated fields, reduced to a penalty on its per-sample norm.
///
/// The gradient is taken on its own graph. The penalty is returned on the inner
/// backend so adding it to the critic loss does not feed parameter gradients.
pub fn gradient_penalty<B: AutodiffBackend>(
    discriminator: &DownscalingDiscriminator<B>,
    low_res: Tensor<B, 5>,
    high_res: Tensor<B, 5>,
    fake_high_res: Tensor<B, 5>,
    weight: f64,
) -> Result<GradientPenalty<B::InnerBackend>, GanError> {
    let [batch, ..] = high_res.dims();
    let real = high_res.inner();
    let eps = Tensor::<B::InnerBackend, 5>::random(
        [batch, 1, 1, 1, 1],
        Distribution::Uniform(0., 1.),
        &real.device(),
    );
    let combined = eps.clone() * real + eps.neg().add_scalar(1.) * fake_high_res.inner();
    let combined = Tensor::<B, 5>::from_inner(combined).require_grad();

    let score = discriminator
        .clone()
        .no_grad()
        .forward(low_res.detach(), combined.clone());
    let grads = score.sum().backward();
    let grad = combined
        .grad(&grads)
        .ok_or(GanError::MissingInputGradient)?;

    let norms = grad
        .reshape([batch as i32, -1])
        .powf_scalar(2.)
        .sum_dim(1)
        .sqrt()
        .reshape([batch]);
    let mean_norm = norms.clone().mean().into_scalar().to_f64();
    Ok(GradientPenalty {
        penalty: penalty_term(norms, weight),
        mean_norm,
    })
}

#[derive(Debug, Clone, Default)]
struct ScoreTracker {
    real: MeanAccumulator,
    fake: MeanAccumulator,
}

/// Adversarial training of a [`DownscalingGan`]: `n_critic` critic updates with
/// gradient penalty and instance noise, then one generator update.
pub struct GanTrainer<B: AutodiffBackend> {
    generator: Component<B, DownscalingGenerator<B>>,
    discriminator: Component<B, DownscalingDiscriminator<B>>,
    noise: NoiseGenerator,
    config: GanTrainerConfig,
    generator_metrics: MetricTracker<B::InnerBackend>,
    scores: ScoreTracker,
}

impl<B: AutodiffBackend> GanTrainer<B> {
    pub fn new(gan: DownscalingGan<B>, noise: NoiseGenerator, config: GanTrainerConfig) -> Self {
        Self {
            generator: Component::new(Role::Generator, gan.generator),
            discriminator: Component::new(Role::Discriminator, gan.discriminator),
            noise,
            config,
            generator_metrics: MetricTracker::default(),
            scores: ScoreTracker::default(),
        }
    }

    pub fn compile<OG, OD>(
        &mut self,
        generator_optimizer: OG,
        generator_learning_rate: f64,
        discriminator_optimizer: OD,
        discriminator_learning_rate: f64,
        generator_metrics: Vec<Box<dyn FieldMetric<B::InnerBackend>>>,
    ) where
        OG: Optimizer<DownscalingGenerator<B>, B> + 'static,
        OD: Optimizer<DownscalingDiscriminator<B>, B> + 'static,
    {
        self.compile_generator(generator_optimizer, generator_learning_rate, generator_metrics);
        self.compile_discriminator(discriminator_optimizer, discriminator_learning_rate);
    }

    pub fn compile_generator<O>(
        &mut self,
        optimizer: O,
        learning_rate: f64,
        metrics: Vec<Box<dyn FieldMetric<B::InnerBackend>>>,
    ) where
        O: Optimizer<DownscalingGenerator<B>, B> + 'static,
    {
        self.generator.compile(optimizer, learning_rate);
        self.generator_metrics = MetricTracker::new(metrics);
    }

    pub fn compile_discriminator<O>(&mut self, optimizer: O, learning_rate: f64)
    where
        O: Optimizer<DownscalingDiscriminator<B>, B> + 'static,
    {
        self.discriminator.compile(optimizer, learning_rate);
    }

    fn assert_compiled(&self) -> Result<(), GanError> {
        for (compiled, role) in [
            (self.generator.is_compiled(), Role::Generator),
            (self.discriminator.is_compiled(), Role::Discriminator),
        ] {
            if !compiled {
                return Err(GanError::NotCompiled(role));
            }
        }
        Ok(())
    }

    /// One adversarial step on a batch. Metrics are recomputed with the updated
    /// weights after both updates.
    pub fn train_step(&mut self, batch: DownscalingBatch<B>) -> Result<StepMetrics, GanError> {
        self.assert_compiled()?;
        self.check_frames(&batch.low_res, &batch.high_res)?;
        let DownscalingBatch {
            low_res,
            high_res,
            sample_weight,
        } = batch;
        let [batch_size, .., out_channels] = high_res.dims();
        let device = low_res.device();

        let mut gradient_norm = 0.;
        let mut d_gradient_param = 0.;
        for _ in 0..self.config.n_critic {
            let latent = self.noise.sample::<B>(batch_size, &device);
            let fake_high_res = self
                .generator
                .module
                .forward(low_res.clone(), Some(latent))
                .detach();
            let penalty = gradient_penalty(
                &self.discriminator.module,
                low_res.clone(),
                high_res.clone(),
                fake_high_res.clone(),
                self.config.gradient_penalty_weight,
            )?;
            gradient_norm = penalty.mean_norm;

            let real = high_res.clone()
                + self
                    .noise
                    .sample_channels::<B>(batch_size, out_channels, &device);
            let fake = fake_high_res
                + self
                    .noise
                    .sample_channels::<B>(batch_size, out_channels, &device);
            let real_score = self.discriminator.module.forward(low_res.clone(), real);
            let fake_score = self.discriminator.module.forward(low_res.clone(), fake);
            let loss = self.config.loss.discriminator_loss(
                real_score,
                fake_score,
                sample_weight.clone(),
            ) + Tensor::from_inner(penalty.penalty);
            d_gradient_param = self.discriminator.apply_gradients(loss.backward())?;
        }

        let latent = self.noise.sample::<B>(batch_size, &device);
        let fake_high_res = self.generator.module.forward(low_res.clone(), Some(latent));
        let fake_score = self
            .discriminator
            .module
            .clone()
            .no_grad()
            .forward(low_res.clone(), fake_high_res);
        let g_loss = AdversarialLoss::generator_loss(fake_score);
        let g_gradient_param = self.generator.apply_gradients(g_loss.backward())?;

        let mut metrics = self.evaluate(
            low_res.inner(),
            high_res.inner(),
            sample_weight.map(|w| w.inner()),
        );
        metrics.insert("d_gradient_pen".into(), gradient_norm);
        metrics.insert("d_gradient_param".into(), d_gradient_param);
        metrics.insert("g_gradient_param".into(), g_gradient_param);
        Ok(metrics)
    }

    /// Scores a validation batch without touching any weight.
    pub fn test_step(
        &mut self,
        batch: DownscalingBatch<B::InnerBackend>,
    ) -> Result<StepMetrics, GanError> {
        self.assert_compiled()?;
        self.check_frames(&batch.low_res, &batch.high_res)?;
        let mut metrics = self.evaluate(batch.low_res, batch.high_res, batch.sample_weight);
        if let Some(loss) = metrics.remove("d_loss") {
            metrics.insert("loss".into(), loss);
        }
        Ok(metrics)
    }

    /// Low and high res frames must match the noise geometry.
    fn check_frames<C: Backend>(
        &self,
        low_res: &Tensor<C, 5>,
        high_res: &Tensor<C, 5>,
    ) -> Result<(), GanError> {
        let expected = self.noise.frame_shape();
        for (what, field) in [("low res", low_res), ("high res", high_res)] {
            let [_, t, h, w, _] = field.dims();
            if [t, h, w] != expected {
                return Err(GanError::BatchShape {
                    what,
                    expected,
                    found: [t, h, w],
                });
            }
        }
        Ok(())
    }

    fn evaluate(
        &mut self,
        low_res: Tensor<B::InnerBackend, 5>,
        high_res: Tensor<B::InnerBackend, 5>,
        sample_weight: Option<Tensor<B::InnerBackend, 1>>,
    ) -> StepMetrics {
        let generator = self.generator.module.valid();
        let discriminator = self.discriminator.module.valid();
        let [batch_size, ..] = low_res.dims();
        let latent = self.noise.sample(batch_size, &low_res.device());

        let real_score = discriminator.forward(low_res.clone(), high_res.clone());
        let fake_high_res = generator.forward(low_res.clone(), Some(latent));
        let fake_score = discriminator.forward(low_res, fake_high_res.clone());

        let d_loss = self.config.loss.discriminator_loss(
            real_score.clone(),
            fake_score.clone(),
            sample_weight,
        );
        let g_loss = AdversarialLoss::generator_loss(fake_score.clone());

        self.scores
            .real
            .update(real_score.mean().into_scalar().to_f64());
        self.scores
            .fake
            .update(fake_score.mean().into_scalar().to_f64());
        self.generator_metrics.update(high_res, fake_high_res);

        let mut metrics = StepMetrics::new();
        metrics.insert("d_loss".into(), d_loss.into_scalar().to_f64());
        metrics.insert("g_loss".into(), g_loss.into_scalar().to_f64());
        metrics.insert("d_score_real".into(), self.scores.real.result());
        metrics.insert("d_score_fake".into(), self.scores.fake.result());
        for (name, value) in self.generator_metrics.results() {
            metrics.insert(format!("g_{name}"), value);
        }
        metrics
    }

    /// Generator output for explicit noise.
    pub fn predict(
        &self,
        low_res: Tensor<B::InnerBackend, 5>,
        noise: Tensor<B::InnerBackend, 5>,
    ) -> Tensor<B::InnerBackend, 5> {
        self.generator.module.valid().forward(low_res, Some(noise))
    }

    /// Generator output for freshly drawn noise.
    pub fn forward(&self, low_res: Tensor<B::InnerBackend, 5>) -> Tensor<B::InnerBackend, 5> {
        let [batch_size, ..] = low_res.dims();
        let noise = self.noise.sample(batch_size, &low_res.device());
        self.predict(low_res, noise)
    }

    pub fn reset_metrics(&mut self) {
        self.scores = ScoreTracker::default();
        self.generator_metrics.reset();
    }

    pub fn network(&self) -> DownscalingGan<B> {
        DownscalingGan {
            generator: self.generator.module.clone(),
            discriminator: self.discriminator.module.clone(),
        }
    }

    pub fn noise(&self) -> &NoiseGenerator {
        &self.noise
    }

    pub fn generator_updates(&self) -> usize {
        self.generator.updates()
    }

    pub fn discriminator_updates(&self) -> usize {
        self.discriminator.updates()
    }

    pub fn save_weights<R: FileRecorder<B>>(&self, dir: &Path, recorder: &R) -> Result<(), GanError> {
        Ok(self.network().save_weights(dir, recorder)?)
    }

    /// Replaces both sub-networks. Optimizer state is kept.
    pub fn load_weights<R: FileRecorder<B>>(
        &mut self,
        dir: &Path,
        recorder: &R,
        device: &B::Device,
    ) -> Result<(), GanError> {
        let gan = self.network().load_weights(dir, recorder, device)?;
        self.generator.module = gan.generator;
        self.discriminator.module = gan.discriminator;
        Ok(())
    }
}
