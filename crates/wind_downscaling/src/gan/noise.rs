use burn::{
    config::Config,
    prelude::Backend,
    tensor::{Distribution, Tensor},
};

#[derive(Config, Debug)]
pub struct NoiseConfig {
    pub timesteps: usize,
    pub image_size: usize,
    #[config(default = 20)]
    pub channels: usize,
    #[config(default = 1.0)]
    pub std: f64,
}

impl NoiseConfig {
    pub fn init(&self) -> NoiseGenerator {
        NoiseGenerator {
            timesteps: self.timesteps,
            image_size: self.image_size,
            channels: self.channels,
            std: self.std,
        }
    }
}

/// Draws centred gaussian noise of shape `[batch, time, size, size, channels]`.
///
/// Nothing is cached: every call returns a fresh draw from the backend RNG,
/// which is reproducible through `Backend::seed`.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseGenerator {
    timesteps: usize,
    image_size: usize,
    channels: usize,
    std: f64,
}

impl NoiseGenerator {
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    /// `[time, size, size]` of every draw.
    pub fn frame_shape(&self) -> [usize; 3] {
        [self.timesteps, self.image_size, self.image_size]
    }

    /// Latent noise for the generator.
    pub fn sample<B: Backend>(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 5> {
        self.sample_channels(batch_size, self.channels, device)
    }

    /// Same distribution with another channel count, e.g. instance noise on
    /// high-res fields.
    pub fn sample_channels<B: Backend>(
        &self,
        batch_size: usize,
        channels: usize,
        device: &B::Device,
    ) -> Tensor<B, 5> {
        Tensor::random(
            [
                batch_size,
                self.timesteps,
                self.image_size,
                self.image_size,
                channels,
            ],
            Distribution::Normal(0., self.std),
            device,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn shape_follows_config() {
        let noise = NoiseConfig::new(3, 8).with_channels(5).init();
        let device = Default::default();
        let sample = noise.sample::<NdArray>(2, &device);
        assert_eq!(sample.dims(), [2, 3, 8, 8, 5]);
        let instance = noise.sample_channels::<NdArray>(4, 2, &device);
        assert_eq!(instance.dims(), [4, 3, 8, 8, 2]);
    }

    #[test]
    fn draws_are_fresh() {
        let noise = NoiseConfig::new(1, 4).init();
        let device = Default::default();
        let a = noise.sample::<NdArray>(1, &device);
        let b = noise.sample::<NdArray>(1, &device);
        let diff = (a - b).abs().sum().into_scalar();
        assert!(diff > 0.);
    }
}
