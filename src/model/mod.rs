//! Model module
//!
//! Two binary classifiers share one interface: [`PneumoniaModel`] emits a
//! logit per image and `sigmoid(logit)` is P(Pneumonia).
//!
//! - `simple`: a from-scratch five-block CNN ([`simple::SimpleCnn`])
//! - `transfer`: a MobileNetV2 backbone with a small dense head
//!   ([`mobilenet::TransferCnn`])

pub mod artifact;
pub mod mobilenet;
pub mod simple;

use std::path::PathBuf;
use std::str::FromStr;

use burn::{
    config::Config,
    module::Module,
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::utils::error::{self, PneumoniaError};
use mobilenet::{MobileNetV2Backbone, TransferCnn};
use simple::SimpleCnn;

/// Default model input, height x width x channels
pub const DEFAULT_INPUT_SHAPE: InputShape = InputShape {
    height: 224,
    width: 224,
    channels: 3,
};

/// Which network to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// From-scratch CNN
    Simple,
    /// MobileNetV2 backbone, fine-tuned
    Transfer,
}

impl ModelVariant {
    /// Adam learning rate used when none is configured
    pub fn default_learning_rate(self) -> f64 {
        match self {
            ModelVariant::Simple => 1e-3,
            ModelVariant::Transfer => 1e-4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelVariant::Simple => "simple",
            ModelVariant::Transfer => "transfer",
        }
    }
}

impl FromStr for ModelVariant {
    type Err = PneumoniaError;

    fn from_str(s: &str) -> error::Result<Self> {
        match s {
            "simple" => Ok(ModelVariant::Simple),
            "transfer" => Ok(ModelVariant::Transfer),
            other => Err(PneumoniaError::Config(format!(
                "unknown model variant '{}', expected 'simple' or 'transfer'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input shape in height x width x channels order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    /// Square RGB input
    pub fn square(size: usize) -> Self {
        Self {
            height: size,
            width: size,
            channels: 3,
        }
    }

    /// Check the shape can be fed to `variant`
    pub fn validate_for(&self, variant: ModelVariant) -> error::Result<()> {
        if self.channels != 3 {
            return Err(PneumoniaError::Config(format!(
                "input must have 3 channels, got {}",
                self.channels
            )));
        }
        let ok = match variant {
            ModelVariant::Simple => {
                simple::feature_size(self.height) > 0 && simple::feature_size(self.width) > 0
            }
            ModelVariant::Transfer => {
                self.height >= mobilenet::MIN_INPUT_SIZE && self.width >= mobilenet::MIN_INPUT_SIZE
            }
        };
        if !ok {
            return Err(PneumoniaError::Config(format!(
                "input {}x{} is too small for the {} model",
                self.height, self.width, variant
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Architecture description stored next to the weights
#[derive(Config, Debug, PartialEq)]
pub struct ModelConfig {
    /// Network variant
    pub variant: ModelVariant,

    /// Input shape (height, width, channels)
    pub input_shape: InputShape,

    /// Dropout rate of both head dropout layers
    #[config(default = "0.5")]
    pub dropout: f64,

    /// Optional pretrained backbone record (transfer only)
    #[config(default = "None")]
    pub backbone_weights: Option<PathBuf>,
}

impl ModelConfig {
    /// Build the network on `device`, loading pretrained backbone weights
    /// for the transfer variant when configured
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<PneumoniaModel<B>> {
        self.build(device, true)
    }

    /// Build the bare architecture, for loading a saved record into
    pub fn init_for_record<B: Backend>(&self, device: &B::Device) -> error::Result<PneumoniaModel<B>> {
        self.build(device, false)
    }

    fn build<B: Backend>(&self, device: &B::Device, pretrained: bool) -> error::Result<PneumoniaModel<B>> {
        self.input_shape.validate_for(self.variant)?;
        let shape = self.input_shape;

        let model = match self.variant {
            ModelVariant::Simple => PneumoniaModel::Simple(SimpleCnn::new(
                shape.height,
                shape.width,
                shape.channels,
                self.dropout,
                device,
            )),
            ModelVariant::Transfer => {
                let backbone = MobileNetV2Backbone::new(shape.channels, device);
                let backbone = match (&self.backbone_weights, pretrained) {
                    (Some(path), true) => {
                        info!("Loading pretrained backbone weights from {:?}", path);
                        backbone.load_pretrained(path, device)?
                    }
                    (None, true) => {
                        warn!("No pretrained backbone weights given, the transfer model starts from random initialization");
                        backbone
                    }
                    (_, false) => backbone,
                };
                PneumoniaModel::Transfer(TransferCnn::new(backbone, self.dropout, device))
            }
        };

        Ok(model)
    }
}

/// Build an untrained classifier for `variant`
pub fn create_model<B: Backend>(
    input_shape: InputShape,
    variant: ModelVariant,
    device: &B::Device,
) -> error::Result<PneumoniaModel<B>> {
    ModelConfig::new(variant, input_shape).init(device)
}

/// Like [`create_model`], resolving the variant from its name first
pub fn create_model_by_name<B: Backend>(
    input_shape: InputShape,
    variant: &str,
    device: &B::Device,
) -> error::Result<PneumoniaModel<B>> {
    create_model(input_shape, variant.parse()?, device)
}

/// A binary chest X-ray classifier
#[derive(Module, Debug)]
pub enum PneumoniaModel<B: Backend> {
    Simple(SimpleCnn<B>),
    Transfer(TransferCnn<B>),
}

impl<B: Backend> PneumoniaModel<B> {
    /// Logits with shape [batch_size]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 1> {
        let batch_size = images.dims()[0];
        let logits = match self {
            PneumoniaModel::Simple(m) => m.forward(images),
            PneumoniaModel::Transfer(m) => m.forward(images),
        };
        logits.reshape([batch_size])
    }

    /// P(Pneumonia) with shape [batch_size]
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 1> {
        sigmoid(self.forward(images))
    }

    pub fn variant(&self) -> ModelVariant {
        match self {
            PneumoniaModel::Simple(_) => ModelVariant::Simple,
            PneumoniaModel::Transfer(_) => ModelVariant::Transfer,
        }
    }
}
