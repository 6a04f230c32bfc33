//! Model registry for plant image classifiers.
//!
//! Implements:
//! - ResNet-18 (default)
//! - EfficientNet-B0 (inverted residual blocks with squeeze-and-excitation)
//! - PlantCnn, a four-block CNN that trains quickly on CPU
//!
//! Every architecture is a [`Backbone`] producing a pooled feature vector,
//! followed by dropout and a linear head sized to the class count. The head is
//! kept as a separate field so a checkpoint's backbone can be reused with a
//! freshly initialized head.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{
        activation::{relu, sigmoid, silu},
        backend::Backend,
        Tensor,
    },
};
use verdant_core::ModelName;

/// Convolution followed by batch normalization
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNorm<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(kernel / 2, kernel / 2))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);

        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

fn flatten<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, _, _] = x.dims();
    x.reshape([batch, channels])
}

// ---------------------------------------------------------------------------
// ResNet-18
// ---------------------------------------------------------------------------

/// Two 3x3 convolutions with an identity (or projected) shortcut
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvNorm<B>,
    conv2: ConvNorm<B>,
    downsample: Option<ConvNorm<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| ConvNorm::new([in_channels, out_channels], 1, stride, 1, device));

        Self {
            conv1: ConvNorm::new([in_channels, out_channels], 3, stride, 1, device),
            conv2: ConvNorm::new([out_channels, out_channels], 3, 1, 1, device),
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = relu(self.conv1.forward(x));
        let out = self.conv2.forward(out);
        relu(out + identity)
    }
}

/// ResNet-18: 7x7 stem, max pool, four stages of two basic blocks
#[derive(Module, Debug)]
pub struct ResNet18<B: Backend> {
    stem: ConvNorm<B>,
    maxpool: MaxPool2d,
    blocks: Vec<BasicBlock<B>>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNet18<B> {
    pub const FEATURES: usize = 512;

    pub fn new(device: &B::Device) -> Self {
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::new();
        let mut in_channels = 64;
        for (stage, out_channels) in [64, 128, 256, 512].into_iter().enumerate() {
            let stride = if stage == 0 { 1 } else { 2 };
            blocks.push(BasicBlock::new(in_channels, out_channels, stride, device));
            blocks.push(BasicBlock::new(out_channels, out_channels, 1, device));
            in_channels = out_channels;
        }

        Self {
            stem: ConvNorm::new([3, 64], 7, 2, 1, device),
            maxpool,
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.stem.forward(x));
        let x = self.maxpool.forward(x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        flatten(self.pool.forward(x))
    }
}

// ---------------------------------------------------------------------------
// EfficientNet-B0
// ---------------------------------------------------------------------------

/// Channel attention from globally pooled activations
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    pool: AdaptiveAvgPool2d,
    reduce: Conv2d<B>,
    expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcite<B> {
    fn new(channels: usize, squeezed: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, squeezed], [1, 1]).init(device),
            expand: Conv2dConfig::new([squeezed, channels], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = silu(self.reduce.forward(scale));
        let scale = sigmoid(self.expand.forward(scale));
        x * scale
    }
}

/// Inverted residual block: expand, depthwise, squeeze-excite, project
#[derive(Module, Debug)]
pub struct MbConv<B: Backend> {
    expand: Option<ConvNorm<B>>,
    depthwise: ConvNorm<B>,
    se: SqueezeExcite<B>,
    project: ConvNorm<B>,
}

impl<B: Backend> MbConv<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1)
            .then(|| ConvNorm::new([in_channels, hidden], 1, 1, 1, device));

        Self {
            expand,
            depthwise: ConvNorm::new([hidden, hidden], kernel, stride, hidden, device),
            se: SqueezeExcite::new(hidden, (in_channels / 4).max(1), device),
            project: ConvNorm::new([hidden, out_channels], 1, 1, 1, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = match &self.expand {
            Some(expand) => silu(expand.forward(x.clone())),
            None => x.clone(),
        };
        let out = silu(self.depthwise.forward(out));
        let out = self.se.forward(out);
        let out = self.project.forward(out);

        // stride 1 with matching channels keeps the shape
        if out.dims() == x.dims() {
            out + x
        } else {
            out
        }
    }
}

/// EfficientNet-B0 layout: (expand ratio, channels, repeats, stride, kernel)
const EFFICIENTNET_B0_STAGES: [(usize, usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1, 3),
    (6, 24, 2, 2, 3),
    (6, 40, 2, 2, 5),
    (6, 80, 3, 2, 3),
    (6, 112, 3, 1, 5),
    (6, 192, 4, 2, 5),
    (6, 320, 1, 1, 3),
];

#[derive(Module, Debug)]
pub struct EfficientNetB0<B: Backend> {
    stem: ConvNorm<B>,
    blocks: Vec<MbConv<B>>,
    head: ConvNorm<B>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> EfficientNetB0<B> {
    pub const FEATURES: usize = 1280;

    pub fn new(device: &B::Device) -> Self {
        let mut blocks = Vec::new();
        let mut in_channels = 32;
        for (expand_ratio, out_channels, repeats, stride, kernel) in EFFICIENTNET_B0_STAGES {
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                blocks.push(MbConv::new(
                    in_channels,
                    out_channels,
                    expand_ratio,
                    kernel,
                    stride,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        Self {
            stem: ConvNorm::new([3, 32], 3, 2, 1, device),
            blocks,
            head: ConvNorm::new([in_channels, Self::FEATURES], 1, 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = silu(self.stem.forward(x));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = silu(self.head.forward(x));
        flatten(self.pool.forward(x))
    }
}

// ---------------------------------------------------------------------------
// PlantCnn
// ---------------------------------------------------------------------------

/// A CNN block with Conv2d, BatchNorm, ReLU and 2x2 max pooling
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Four conv blocks (16 -> 32 -> 64 -> 128 filters) and global pooling.
/// Inputs must be at least 16 pixels on a side.
#[derive(Module, Debug)]
pub struct PlantCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> PlantCnn<B> {
    pub const FEATURES: usize = 128;

    pub fn new(device: &B::Device) -> Self {
        let blocks = [(3, 16), (16, 32), (32, 64), (64, 128)]
            .into_iter()
            .map(|(i, o)| ConvBlock::new(i, o, device))
            .collect();

        Self {
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        flatten(self.pool.forward(x))
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Feature extractor selected by [`ModelName`]
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    ResNet18(ResNet18<B>),
    EfficientNetB0(EfficientNetB0<B>),
    PlantCnn(PlantCnn<B>),
}

impl<B: Backend> Backbone<B> {
    pub fn new(name: ModelName, device: &B::Device) -> Self {
        match name {
            ModelName::ResNet18 => Backbone::ResNet18(ResNet18::new(device)),
            ModelName::EfficientNetB0 => Backbone::EfficientNetB0(EfficientNetB0::new(device)),
            ModelName::PlantCnn => Backbone::PlantCnn(PlantCnn::new(device)),
        }
    }

    pub fn name(&self) -> ModelName {
        match self {
            Backbone::ResNet18(_) => ModelName::ResNet18,
            Backbone::EfficientNetB0(_) => ModelName::EfficientNetB0,
            Backbone::PlantCnn(_) => ModelName::PlantCnn,
        }
    }

    /// Width of the pooled feature vector
    pub fn features(&self) -> usize {
        match self {
            Backbone::ResNet18(_) => ResNet18::<B>::FEATURES,
            Backbone::EfficientNetB0(_) => EfficientNetB0::<B>::FEATURES,
            Backbone::PlantCnn(_) => PlantCnn::<B>::FEATURES,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::ResNet18(model) => model.forward(x),
            Backbone::EfficientNetB0(model) => model.forward(x),
            Backbone::PlantCnn(model) => model.forward(x),
        }
    }
}

/// Backbone, dropout and a linear classification head
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    backbone: Backbone<B>,
    dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> Classifier<B> {
    /// Build `name` with a head producing `num_classes` logits.
    pub fn build(name: ModelName, num_classes: usize, dropout: f64, device: &B::Device) -> Self {
        let backbone = Backbone::new(name, device);
        let head = LinearConfig::new(backbone.features(), num_classes).init(device);

        Self {
            backbone,
            dropout: DropoutConfig::new(dropout).init(),
            head,
        }
    }

    pub fn model_name(&self) -> ModelName {
        self.backbone.name()
    }

    pub fn num_classes(&self) -> usize {
        self.head.weight.val().dims()[1]
    }

    /// Logits of shape `[batch, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(x);
        self.head.forward(self.dropout.forward(features))
    }

    /// Replace the backbone weights and keep the current head.
    pub fn load_backbone(self, record: ClassifierRecord<B>) -> Self {
        Self {
            backbone: self.backbone.load_record(record.backbone),
            ..self
        }
    }
}
