//! From-scratch CNN
//!
//! Five conv blocks (3x3 valid convolution, ReLU, 2x2 max-pool) with widths
//! 32, 64, 64, 128, 128, then flatten, dropout, a 512-unit dense layer,
//! dropout and a single logit.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Output channels of the five conv blocks
pub const BLOCK_CHANNELS: [usize; 5] = [32, 64, 64, 128, 128];

/// Units of the hidden dense layer
pub const DENSE_UNITS: usize = 512;

/// Spatial size after one block: valid 3x3 conv, then 2x2 pool
fn block_output(size: usize) -> usize {
    size.saturating_sub(2) / 2
}

/// Spatial size after all five blocks (0 if the input is too small)
pub fn feature_size(size: usize) -> usize {
    BLOCK_CHANNELS.iter().fold(size, |s, _| block_output(s))
}

/// Conv2d + ReLU + MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3]).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// The "simple" classifier
#[derive(Module, Debug)]
pub struct SimpleCnn<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub dropout1: Dropout,
    pub fc1: Linear<B>,
    pub dropout2: Dropout,
    pub output: Linear<B>,
}

impl<B: Backend> SimpleCnn<B> {
    /// Build for an input of `height` x `width` x `channels`
    ///
    /// Callers must check that [`feature_size`] is non-zero for both sides.
    pub fn new(
        height: usize,
        width: usize,
        channels: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        let mut blocks = Vec::with_capacity(BLOCK_CHANNELS.len());
        let mut in_channels = channels;
        for &out_channels in BLOCK_CHANNELS.iter() {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        let flat = in_channels * feature_size(height) * feature_size(width);

        Self {
            blocks,
            dropout1: DropoutConfig::new(dropout).init(),
            fc1: LinearConfig::new(flat, DENSE_UNITS).init(device),
            dropout2: DropoutConfig::new(dropout).init(),
            output: LinearConfig::new(DENSE_UNITS, 1).init(device),
        }
    }

    /// Logits with shape [batch_size, 1]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.dropout1.forward(x);
        let x = Relu::new().forward(self.fc1.forward(x));
        let x = self.dropout2.forward(x);
        self.output.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_size() {
        // 224 -> 111 -> 54 -> 26 -> 12 -> 5
        assert_eq!(feature_size(224), 5);
        assert_eq!(feature_size(94), 1);
        assert_eq!(feature_size(93), 0);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = SimpleCnn::<TestBackend>::new(96, 96, 3, 0.5, &device);
        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 96, 96], &device);

        assert_eq!(model.forward(input).dims(), [2, 1]);
    }

    #[test]
    fn test_dense_input_matches_feature_map() {
        let device = Default::default();
        let model = SimpleCnn::<TestBackend>::new(224, 224, 3, 0.5, &device);
        assert_eq!(model.fc1.weight.val().dims(), [128 * 5 * 5, DENSE_UNITS]);
    }
}
