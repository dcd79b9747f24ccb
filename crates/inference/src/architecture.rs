//! Supported architectures and the layer Grad-CAM instruments on each.
//!
//! This table is the only place target layers are named. They are resolved
//! against the built network once, at load time.

use crate::backend::native::{Conv2d, Layer, Linear, MaxPool2d, Sequential};
use crate::backend::ModelError;

pub struct Architecture {
    pub id: &'static str,
    /// Exact layer name or block prefix, see `Classifier::resolve_layer`.
    pub target_layer: &'static str,
    topology: fn(usize) -> Vec<(String, Layer)>,
}

pub static ARCHITECTURES: &[Architecture] = &[
    Architecture {
        id: "resnet_mini",
        target_layer: "layer4",
        topology: resnet_mini,
    },
    Architecture {
        id: "densenet_mini",
        target_layer: "features",
        topology: densenet_mini,
    },
    Architecture {
        id: "efficientnet_mini",
        target_layer: "features",
        topology: efficientnet_mini,
    },
    Architecture {
        id: "vgg_mini",
        target_layer: "features",
        topology: vgg_mini,
    },
];

pub fn lookup(id: &str) -> Result<&'static Architecture, ModelError> {
    let normalized = id.trim().to_ascii_lowercase().replace('-', "_");
    ARCHITECTURES
        .iter()
        .find(|arch| arch.id == normalized)
        .ok_or_else(|| ModelError::TargetLayerResolution {
            architecture: id.to_string(),
        })
}

pub fn supported() -> impl Iterator<Item = &'static str> {
    ARCHITECTURES.iter().map(|arch| arch.id)
}

impl Architecture {
    /// Build a zero-initialized network for RGB input of `input_size`
    /// (width, height), with a classification head of `num_classes` outputs.
    pub fn build(&self, input_size: (u32, u32), num_classes: usize) -> Result<Sequential, ModelError> {
        if num_classes == 0 {
            return Err(ModelError::Topology("num_classes must be at least 1".to_string()));
        }
        let (width, height) = input_size;
        Sequential::new(
            self.id,
            (3, height as usize, width as usize),
            (self.topology)(num_classes),
        )
    }
}

#[derive(Default)]
struct Stack(Vec<(String, Layer)>);

impl Stack {
    fn push(mut self, name: impl Into<String>, layer: Layer) -> Self {
        self.0.push((name.into(), layer));
        self
    }

    /// 3x3 convolution, padding 1.
    fn conv(self, name: impl Into<String>, in_c: usize, out_c: usize, stride: usize) -> Self {
        self.push(name, Layer::Conv2d(Conv2d::new(in_c, out_c, 3, stride, 1)))
    }

    fn relu(self, name: impl Into<String>) -> Self {
        self.push(name, Layer::Relu)
    }

    fn maxpool(self, name: impl Into<String>) -> Self {
        self.push(name, Layer::MaxPool2d(MaxPool2d::new(2, 2)))
    }

    fn head(self, pool: &str, name: &str, in_features: usize, num_classes: usize) -> Self {
        self.push(pool, Layer::GlobalAvgPool)
            .push(name, Layer::Linear(Linear::new(in_features, num_classes)))
    }
}

fn resnet_mini(num_classes: usize) -> Vec<(String, Layer)> {
    let mut stack = Stack::default()
        .conv("conv1", 3, 16, 2)
        .relu("relu")
        .maxpool("maxpool");

    let widths = [(16, 16, 1), (16, 24, 2), (24, 32, 2), (32, 32, 2)];
    for (i, (in_c, out_c, stride)) in widths.into_iter().enumerate() {
        let block = format!("layer{}", i + 1);
        stack = stack
            .conv(format!("{block}.conv"), in_c, out_c, stride)
            .relu(format!("{block}.relu"));
    }

    stack.head("avgpool", "fc", 32, num_classes).0
}

fn densenet_mini(num_classes: usize) -> Vec<(String, Layer)> {
    Stack::default()
        .conv("features.conv0", 3, 16, 2)
        .relu("features.relu0")
        .maxpool("features.pool0")
        .conv("features.conv1", 16, 24, 2)
        .relu("features.relu1")
        .conv("features.conv2", 24, 32, 2)
        .relu("features.relu2")
        .conv("features.conv3", 32, 48, 2)
        .relu("features.relu3")
        .head("avgpool", "classifier", 48, num_classes)
        .0
}

fn efficientnet_mini(num_classes: usize) -> Vec<(String, Layer)> {
    let stages = [(3, 16, 2), (16, 16, 1), (16, 24, 2), (24, 40, 2), (40, 40, 2), (40, 64, 2)];
    let mut stack = Stack::default();
    for (i, (in_c, out_c, stride)) in stages.into_iter().enumerate() {
        stack = stack
            .conv(format!("features.{i}.conv"), in_c, out_c, stride)
            .relu(format!("features.{i}.act"));
    }
    stack.head("avgpool", "classifier", 64, num_classes).0
}

fn vgg_mini(num_classes: usize) -> Vec<(String, Layer)> {
    // Indices follow the flat numbering of a VGG feature stack.
    Stack::default()
        .conv("features.0", 3, 8, 2)
        .relu("features.1")
        .maxpool("features.2")
        .conv("features.3", 8, 16, 1)
        .relu("features.4")
        .maxpool("features.5")
        .conv("features.6", 16, 32, 1)
        .relu("features.7")
        .maxpool("features.8")
        .conv("features.9", 32, 32, 1)
        .relu("features.10")
        .maxpool("features.11")
        .head("avgpool", "classifier", 32, num_classes)
        .0
}
