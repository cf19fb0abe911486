//! MobileNetV2 transfer-learning classifier
//!
//! The backbone follows the MobileNetV2 layout: a stride-2 stem, seven
//! stages of inverted residual blocks and a 1x1 conv to 1280 channels,
//! all with batch norm and ReLU6. The head is global average pooling,
//! dropout, a 128-unit dense layer, dropout and a single logit.
//!
//! Every layer stays trainable, so loading pretrained backbone weights and
//! training with a small learning rate fine-tunes the whole network.

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};

use crate::utils::error::{PneumoniaError, Result};

/// Inverted residual settings: (expansion t, channels c, repeats n, stride s)
pub const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

pub const STEM_CHANNELS: usize = 32;
pub const FEATURE_CHANNELS: usize = 1280;
pub const HEAD_UNITS: usize = 128;

/// Smallest input side the backbone accepts (total stride is 32)
pub const MIN_INPUT_SIZE: usize = 32;

fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clamp(0.0, 6.0)
}

/// Conv + BatchNorm, with optional ReLU6
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    activate: bool,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        activate: bool,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel - 1) / 2;
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(channels[1]).init(device),
            activate,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        if self.activate {
            relu6(x)
        } else {
            x
        }
    }
}

/// Expand (1x1) -> depthwise (3x3) -> linear project (1x1)
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand: Option<ConvBn<B>>,
    pub depthwise: ConvBn<B>,
    pub project: ConvBn<B>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expansion;
        let expand = (expansion != 1)
            .then(|| ConvBn::new([in_channels, hidden], 1, 1, 1, true, device));

        Self {
            expand,
            depthwise: ConvBn::new([hidden, hidden], 3, stride, hidden, true, device),
            project: ConvBn::new([hidden, out_channels], 1, 1, 1, false, device),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.project.forward(self.depthwise.forward(x));

        if self.use_residual {
            x + input
        } else {
            x
        }
    }
}

/// MobileNetV2 feature extractor producing [B, 1280, H/32, W/32]
#[derive(Module, Debug)]
pub struct MobileNetV2Backbone<B: Backend> {
    pub stem: ConvBn<B>,
    pub blocks: Vec<InvertedResidual<B>>,
    pub last: ConvBn<B>,
}

impl<B: Backend> MobileNetV2Backbone<B> {
    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        let stem = ConvBn::new([in_channels, STEM_CHANNELS], 3, 2, 1, true, device);

        let mut blocks = Vec::new();
        let mut channels = STEM_CHANNELS;
        for &(t, c, n, s) in INVERTED_RESIDUAL_SETTINGS.iter() {
            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                blocks.push(InvertedResidual::new(channels, c, stride, t, device));
                channels = c;
            }
        }

        let last = ConvBn::new([channels, FEATURE_CHANNELS], 1, 1, 1, true, device);

        Self { stem, blocks, last }
    }

    /// Load pretrained weights saved with `CompactRecorder`
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        self.load_file(path.to_path_buf(), &CompactRecorder::new(), device)
            .map_err(|e| {
                PneumoniaError::Model(format!(
                    "failed to load backbone weights from {:?}: {:?}",
                    path, e
                ))
            })
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.last.forward(x)
    }
}

/// The "transfer" classifier
#[derive(Module, Debug)]
pub struct TransferCnn<B: Backend> {
    pub backbone: MobileNetV2Backbone<B>,
    pub pool: AdaptiveAvgPool2d,
    pub dropout1: Dropout,
    pub fc1: Linear<B>,
    pub dropout2: Dropout,
    pub output: Linear<B>,
}

impl<B: Backend> TransferCnn<B> {
    pub fn new(backbone: MobileNetV2Backbone<B>, dropout: f64, device: &B::Device) -> Self {
        Self {
            backbone,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout1: DropoutConfig::new(dropout).init(),
            fc1: LinearConfig::new(FEATURE_CHANNELS, HEAD_UNITS).init(device),
            dropout2: DropoutConfig::new(dropout).init(),
            output: LinearConfig::new(HEAD_UNITS, 1).init(device),
        }
    }

    /// Logits with shape [batch_size, 1]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(self.backbone.forward(x));

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

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
    fn test_block_count() {
        let device = Default::default();
        let backbone = MobileNetV2Backbone::<TestBackend>::new(3, &device);
        assert_eq!(backbone.blocks.len(), 17);
        assert!(backbone.blocks[0].expand.is_none());
        assert!(backbone.blocks[1].expand.is_some());
    }

    #[test]
    fn test_backbone_downsamples_by_32() {
        let device = Default::default();
        let backbone = MobileNetV2Backbone::<TestBackend>::new(3, &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device);

        assert_eq!(backbone.forward(input).dims(), [1, FEATURE_CHANNELS, 2, 2]);
    }

    #[test]
    fn test_transfer_forward_shape() {
        let device = Default::default();
        let backbone = MobileNetV2Backbone::<TestBackend>::new(3, &device);
        let model = TransferCnn::new(backbone, 0.5, &device);
        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);

        assert_eq!(model.forward(input).dims(), [2, 1]);
    }

    #[test]
    fn test_pretrained_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let path = dir.path().join("backbone");

        let backbone = MobileNetV2Backbone::<TestBackend>::new(3, &device);
        backbone
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .unwrap();

        let fresh = MobileNetV2Backbone::<TestBackend>::new(3, &device);
        let loaded = fresh.load_pretrained(&path, &device).unwrap();

        let a = backbone.stem.conv.weight.val().into_data();
        let b = loaded.stem.conv.weight.val().into_data();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_pretrained_file() {
        let device = Default::default();
        let backbone = MobileNetV2Backbone::<TestBackend>::new(3, &device);
        let err = backbone
            .load_pretrained(Path::new("/no/such/weights"), &device)
            .unwrap_err();
        assert!(matches!(err, PneumoniaError::Model(_)));
    }
}
