use std::{fs, io, path::Path};

use burn::{
    config::Config,
    module::Module,
    prelude::Backend,
    record::{FileRecorder, RecorderError},
};
use thiserror::Error;

use super::{
    discriminator::{DiscriminatorConfig, DownscalingDiscriminator},
    generator::{DownscalingGenerator, GeneratorConfig},
};

/// Weight files of both sub-networks live under these names inside a
/// checkpoint directory.
pub const GENERATOR_WEIGHTS: &str = "generator";
pub const DISCRIMINATOR_WEIGHTS: &str = "discriminator";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("The discriminator assumes that the low res ({}) and high res ({}) images have the same size. Upsample the low res image first.", .low_res, .high_res)]
    ShapeMismatch { low_res: usize, high_res: usize },
    #[error("Image size {} must be a positive multiple of 4", .0)]
    InvalidImageSize(usize),
    #[error("Feature channels {} must be a positive multiple of 8", .0)]
    InvalidFeatureChannels(usize),
    #[error("Generator and discriminator disagree on {}: {} vs {}", .what, .generator, .discriminator)]
    Incompatible {
        what: &'static str,
        generator: usize,
        discriminator: usize,
    },
}

#[derive(Error, Debug)]
pub enum WeightsError {
    #[error("Unable to prepare checkpoint directory: {0}")]
    Io(#[from] io::Error),
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),
}

#[derive(Config, Debug)]
pub struct DownscalingGanConfig {
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
}

impl DownscalingGanConfig {
    /// Generator and discriminator sized for the same tiles, with default widths.
    pub fn for_tiles(
        image_size: usize,
        timesteps: usize,
        in_channels: usize,
        noise_channels: usize,
        out_channels: usize,
    ) -> Self {
        Self::new(
            GeneratorConfig::new(
                image_size,
                in_channels,
                noise_channels,
                out_channels,
                timesteps,
            ),
            DiscriminatorConfig::new(
                image_size,
                image_size,
                in_channels,
                out_channels,
                timesteps,
            ),
        )
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DownscalingGan<B>, ModelError> {
        let g = &self.generator;
        let d = &self.discriminator;
        for (what, generator, discriminator) in [
            ("image size", g.image_size, d.high_res_size),
            ("input channels", g.in_channels, d.low_res_channels),
            ("output channels", g.out_channels, d.high_res_channels),
            ("time steps", g.timesteps, d.timesteps),
        ] {
            if generator != discriminator {
                return Err(ModelError::Incompatible {
                    what,
                    generator,
                    discriminator,
                });
            }
        }
        Ok(DownscalingGan {
            generator: g.init(device)?,
            discriminator: d.init(device)?,
        })
    }
}

#[derive(Module, Debug)]
pub struct DownscalingGan<B: Backend> {
    pub generator: DownscalingGenerator<B>,
    pub discriminator: DownscalingDiscriminator<B>,
}

impl<B: Backend> DownscalingGan<B> {
    /// Writes `dir/generator` and `dir/discriminator`, creating `dir` if needed.
    pub fn save_weights<R: FileRecorder<B>>(
        &self,
        dir: &Path,
        recorder: &R,
    ) -> Result<(), WeightsError> {
        fs::create_dir_all(dir)?;
        self.generator
            .clone()
            .save_file(dir.join(GENERATOR_WEIGHTS), recorder)?;
        self.discriminator
            .clone()
            .save_file(dir.join(DISCRIMINATOR_WEIGHTS), recorder)?;
        Ok(())
    }

    pub fn load_weights<R: FileRecorder<B>>(
        self,
        dir: &Path,
        recorder: &R,
        device: &B::Device,
    ) -> Result<Self, WeightsError> {
        Ok(Self {
            generator: self
                .generator
                .load_file(dir.join(GENERATOR_WEIGHTS), recorder, device)?,
            discriminator: self.discriminator.load_file(
                dir.join(DISCRIMINATOR_WEIGHTS),
                recorder,
                device,
            )?,
        })
    }
}
