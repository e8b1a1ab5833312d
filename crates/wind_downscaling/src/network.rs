use std::{fmt, path::Path};

use burn::{module::Module, prelude::Backend, record::FileRecorder, tensor::Tensor};
use serde::{Deserialize, Serialize};

use crate::gan::{
    generator::DownscalingGenerator,
    model::{DownscalingGan, GENERATOR_WEIGHTS, WeightsError},
    noise::NoiseGenerator,
};

/// Anything that maps `[batch, time, size, size, predictors]` tiles to
/// `[batch, time, size, size, outputs]` fields. Stochastic implementations draw
/// fresh noise on every call.
pub trait Downscaler<B: Backend> {
    fn downscale(&self, low_res: Tensor<B, 5>) -> Tensor<B, 5>;
}

pub trait LoadCheckpoint<B: Backend> {
    fn load_checkpoint<R: FileRecorder<B>>(
        &mut self,
        dir: &Path,
        recorder: &R,
        device: &B::Device,
    ) -> Result<(), WeightsError>;
}

/// Which kind of network a checkpoint series belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Gan,
    Generator,
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gan => write!(f, "gan"),
            Self::Generator => write!(f, "generator"),
        }
    }
}

/// Generator of a trained GAN, sampling latent noise for every prediction.
#[derive(Debug, Clone)]
pub struct GanNetwork<B: Backend> {
    pub gan: DownscalingGan<B>,
    pub noise: NoiseGenerator,
}

impl<B: Backend> Downscaler<B> for GanNetwork<B> {
    fn downscale(&self, low_res: Tensor<B, 5>) -> Tensor<B, 5> {
        let [batch_size, ..] = low_res.dims();
        let noise = self.noise.sample(batch_size, &low_res.device());
        self.gan.generator.forward(low_res, Some(noise))
    }
}

impl<B: Backend> LoadCheckpoint<B> for GanNetwork<B> {
    fn load_checkpoint<R: FileRecorder<B>>(
        &mut self,
        dir: &Path,
        recorder: &R,
        device: &B::Device,
    ) -> Result<(), WeightsError> {
        self.gan = self.gan.clone().load_weights(dir, recorder, device)?;
        Ok(())
    }
}

/// Deterministic generator trained without adversarial loss.
#[derive(Debug, Clone)]
pub struct GeneratorNetwork<B: Backend> {
    pub generator: DownscalingGenerator<B>,
}

impl<B: Backend> Downscaler<B> for GeneratorNetwork<B> {
    fn downscale(&self, low_res: Tensor<B, 5>) -> Tensor<B, 5> {
        self.generator.forward(low_res, None)
    }
}

impl<B: Backend> LoadCheckpoint<B> for GeneratorNetwork<B> {
    fn load_checkpoint<R: FileRecorder<B>>(
        &mut self,
        dir: &Path,
        recorder: &R,
        device: &B::Device,
    ) -> Result<(), WeightsError> {
        self.generator =
            self.generator
                .clone()
                .load_file(dir.join(GENERATOR_WEIGHTS), recorder, device)?;
        Ok(())
    }
}

/// Either network behind one type, chosen at run time.
#[derive(Debug, Clone)]
pub enum Network<B: Backend> {
    Gan(GanNetwork<B>),
    Generator(GeneratorNetwork<B>),
}

impl<B: Backend> Network<B> {
    pub fn kind(&self) -> NetworkKind {
        match self {
            Self::Gan(_) => NetworkKind::Gan,
            Self::Generator(_) => NetworkKind::Generator,
        }
    }
}

impl<B: Backend> Downscaler<B> for Network<B> {
    fn downscale(&self, low_res: Tensor<B, 5>) -> Tensor<B, 5> {
        match self {
            Self::Gan(n) => n.downscale(low_res),
            Self::Generator(n) => n.downscale(low_res),
        }
    }
}

impl<B: Backend> LoadCheckpoint<B> for Network<B> {
    fn load_checkpoint<R: FileRecorder<B>>(
        &mut self,
        dir: &Path,
        recorder: &R,
        device: &B::Device,
    ) -> Result<(), WeightsError> {
        match self {
            Self::Gan(n) => n.load_checkpoint(dir, recorder, device),
            Self::Generator(n) => n.load_checkpoint(dir, recorder, device),
        }
    }
}
