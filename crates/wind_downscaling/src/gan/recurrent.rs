use burn::{
    nn::{
        PaddingConfig2d, Tanh,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
};

/// Convolutional recurrent cell `h_t = tanh(W_x * x_t + W_h * h_{t-1})` unrolled
/// over the time axis.
#[derive(Module, Debug)]
pub struct ConvRecurrent<B: Backend> {
    input: Conv2d<B>,
    hidden: Conv2d<B>,
    activation: Tanh,
}

#[derive(Config, Debug)]
pub struct ConvRecurrentConfig {
    pub channels: [usize; 2],
    #[config(default = 3)]
    pub kernel_size: usize,
}

impl ConvRecurrentConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvRecurrent<B> {
        let k = self.kernel_size;
        let padding = PaddingConfig2d::Explicit(k / 2, k / 2);
        ConvRecurrent {
            input: Conv2dConfig::new(self.channels, [k, k])
                .with_padding(padding.clone())
                .init(device),
            hidden: Conv2dConfig::new([self.channels[1], self.channels[1]], [k, k])
                .with_padding(padding)
                .with_bias(false)
                .init(device),
            activation: Tanh::new(),
        }
    }
}

impl<B: Backend> ConvRecurrent<B> {
    /// `[b, t, c_in, h, w]` -> `[b, t, c_out, h, w]`, one output per step.
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [b, t, c, h, w] = x.dims();
        let mut state: Option<Tensor<B, 4>> = None;
        let mut outputs = Vec::with_capacity(t);
        for step in 0..t {
            let frame = x
                .clone()
                .slice([0..b, step..step + 1, 0..c, 0..h, 0..w])
                .reshape([b, c, h, w]);
            let mut z = self.input.forward(frame);
            if let Some(previous) = state {
                z = z + self.hidden.forward(previous);
            }
            let out = self.activation.forward(z);
            outputs.push(out.clone());
            state = Some(out);
        }
        Tensor::stack::<5>(outputs, 1)
    }
}
