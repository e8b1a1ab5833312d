use burn::{
    config::Config,
    module::Module,
    nn::{
        BatchNorm, BatchNormConfig, Initializer, LeakyRelu, LeakyReluConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::Backend,
    tensor::Tensor,
};

use super::{
    layout::{frames_to_sequence, from_frames, sequence_to_frames, to_frames},
    model::ModelError,
    recurrent::{ConvRecurrent, ConvRecurrentConfig},
};

/// Encoder, recurrent bottleneck and decoder with skip connections at 1/2 and
/// 1/4 resolution.
#[derive(Module, Debug)]
pub struct DownscalingGenerator<B: Backend> {
    // encoder
    down1: Conv2d<B>,
    down1_bn: BatchNorm<B, 2>,
    down2: Conv2d<B>,
    down2_bn: BatchNorm<B, 2>,

    recurrent: ConvRecurrent<B>,

    // decoder
    squeeze: Conv2d<B>,
    squeeze_bn: BatchNorm<B, 2>,
    up1: ConvTranspose2d<B>,
    up1_bn: BatchNorm<B, 2>,
    up2: ConvTranspose2d<B>,
    up2_bn: BatchNorm<B, 2>,
    out: Conv2d<B>,

    lrelu: LeakyRelu,
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub image_size: usize,
    pub in_channels: usize,
    /// Zero turns the generator into a deterministic network without noise input.
    pub noise_channels: usize,
    pub out_channels: usize,
    pub timesteps: usize,
    #[config(default = 128)]
    pub feature_channels: usize,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<DownscalingGenerator<B>, ModelError> {
        if self.image_size == 0 || self.image_size % 4 != 0 {
            return Err(ModelError::InvalidImageSize(self.image_size));
        }
        if self.feature_channels == 0 || self.feature_channels % 8 != 0 {
            return Err(ModelError::InvalidFeatureChannels(self.feature_channels));
        }
        let init = Initializer::Normal {
            mean: 0.0,
            std: 0.02,
        };
        let conv = |cin, cout, kernel: usize, stride: usize, padding: usize| {
            Conv2dConfig::new([cin, cout], [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_initializer(init.clone())
                .init(device)
        };
        let upsample = |cin, cout| {
            ConvTranspose2dConfig::new([cin, cout], [2, 2])
                .with_stride([2, 2])
                .with_initializer(init.clone())
                .init(device)
        };

        let feat = self.feature_channels;
        let total_in = self.in_channels + self.noise_channels;
        let inter = (total_in * 8).min(feat);
        let last = (feat / 8).max(self.out_channels);

        Ok(DownscalingGenerator {
            down1: conv(total_in, inter, 8, 2, 3),
            down1_bn: BatchNormConfig::new(inter).init(device),
            down2: conv(inter, feat, 4, 2, 1),
            down2_bn: BatchNormConfig::new(feat).init(device),
            recurrent: ConvRecurrentConfig::new([feat, feat]).init(device),
            squeeze: conv(feat, feat / 2, 3, 1, 1),
            squeeze_bn: BatchNormConfig::new(feat / 2).init(device),
            up1: upsample(feat / 2 + feat, feat / 4),
            up1_bn: BatchNormConfig::new(feat / 4).init(device),
            up2: upsample(feat / 4 + inter, last),
            up2_bn: BatchNormConfig::new(last).init(device),
            out: conv(last, self.out_channels, 3, 1, 1),
            lrelu: LeakyReluConfig::new().with_negative_slope(0.2).init(),
        })
    }
}

impl<B: Backend> DownscalingGenerator<B> {
    /// `low_res` is `[b, t, s, s, in]`, `noise` is `[b, t, s, s, noise]` and must be
    /// given exactly when the generator was built with noise channels.
    /// Returns `[b, t, s, s, out]`.
    pub fn forward(&self, low_res: Tensor<B, 5>, noise: Option<Tensor<B, 5>>) -> Tensor<B, 5> {
        let [batch, ..] = low_res.dims();
        let x = match noise {
            Some(noise) => Tensor::cat(vec![low_res, noise], 4),
            None => low_res,
        };
        let x = to_frames(x);

        let res_2 = self
            .down1_bn
            .forward(self.lrelu.forward(self.down1.forward(x)));
        let res_4 = self
            .down2_bn
            .forward(self.lrelu.forward(self.down2.forward(res_2.clone())));

        let x = self
            .recurrent
            .forward(frames_to_sequence(res_4.clone(), batch));
        let x = sequence_to_frames(x);

        let x = self
            .squeeze_bn
            .forward(self.lrelu.forward(self.squeeze.forward(x)));
        let x = Tensor::cat(vec![x, res_4], 1);
        let x = self.up1_bn.forward(self.lrelu.forward(self.up1.forward(x)));
        let x = Tensor::cat(vec![x, res_2], 1);
        let x = self.up2_bn.forward(self.lrelu.forward(self.up2.forward(x)));

        from_frames(self.out.forward(x), batch)
    }
}
