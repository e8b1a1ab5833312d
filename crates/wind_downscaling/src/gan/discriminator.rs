use burn::{
    config::Config,
    module::Module,
    nn::{
        Initializer, LeakyRelu, LeakyReluConfig, Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::Backend,
    tensor::Tensor,
};

use super::{
    layout::{sequence_to_frames, to_sequence},
    model::ModelError,
    recurrent::{ConvRecurrent, ConvRecurrentConfig},
};

/// Critic scoring a `(low_res, high_res)` pair. The score is unbounded and
/// averaged over time.
#[derive(Module, Debug)]
pub struct DownscalingDiscriminator<B: Backend> {
    high_res_recurrent: ConvRecurrent<B>,
    high_res_conv: Conv2d<B>,
    mixed_recurrent: ConvRecurrent<B>,
    mixed_conv: Conv2d<B>,
    downsample: Vec<Conv2d<B>>,
    score: Linear<B>,
    lrelu: LeakyRelu,
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub low_res_size: usize,
    pub high_res_size: usize,
    pub low_res_channels: usize,
    pub high_res_channels: usize,
    pub timesteps: usize,
    #[config(default = 16)]
    pub feature_channels: usize,
    #[config(default = 256)]
    pub max_channels: usize,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<DownscalingDiscriminator<B>, ModelError> {
        if self.low_res_size != self.high_res_size {
            return Err(ModelError::ShapeMismatch {
                low_res: self.low_res_size,
                high_res: self.high_res_size,
            });
        }
        if self.high_res_size == 0 {
            return Err(ModelError::InvalidImageSize(self.high_res_size));
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

        let feat = self.feature_channels;
        let mut size = self.high_res_size;
        let mut channels = 2 * feat;
        let mut downsample = vec![];
        while size > 2 {
            let next = (channels * 2).min(self.max_channels.max(channels));
            downsample.push(conv(channels, next, 4, 2, 1));
            channels = next;
            size /= 2;
        }

        Ok(DownscalingDiscriminator {
            high_res_recurrent: ConvRecurrentConfig::new([
                self.high_res_channels,
                self.high_res_channels,
            ])
            .init(device),
            high_res_conv: conv(self.high_res_channels, feat, 3, 1, 1),
            mixed_recurrent: ConvRecurrentConfig::new([
                self.low_res_channels + self.high_res_channels,
                feat,
            ])
            .init(device),
            mixed_conv: conv(feat, feat, 3, 1, 1),
            downsample,
            score: LinearConfig::new(channels * size * size, 1)
                .with_initializer(init)
                .init(device),
            lrelu: LeakyReluConfig::new().with_negative_slope(0.2).init(),
        })
    }
}

impl<B: Backend> DownscalingDiscriminator<B> {
    /// `[b, t, s, s, c_low]` and `[b, t, s, s, c_high]` -> `[b, 1]`
    pub fn forward(&self, low_res: Tensor<B, 5>, high_res: Tensor<B, 5>) -> Tensor<B, 2> {
        let [batch, timesteps, ..] = high_res.dims();

        let high = self
            .high_res_recurrent
            .forward(to_sequence(high_res.clone()));
        let high = self
            .lrelu
            .forward(self.high_res_conv.forward(sequence_to_frames(high)));

        let mixed = self
            .mixed_recurrent
            .forward(to_sequence(Tensor::cat(vec![low_res, high_res], 4)));
        let mixed = self
            .lrelu
            .forward(self.mixed_conv.forward(sequence_to_frames(mixed)));

        let mut x = Tensor::cat(vec![high, mixed], 1);
        for conv in &self.downsample {
            x = self.lrelu.forward(conv.forward(x));
        }
        let [n, c, h, w] = x.dims();
        let scores = self.score.forward(x.reshape([n, c * h * w]));
        scores.reshape([batch, timesteps]).mean_dim(1)
    }
}
