use ndarray::{Array1, Array3};
use thiserror::Error;

pub mod native;

pub use native::Sequential;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("No target layer registered for architecture '{architecture}'")]
    TargetLayerResolution { architecture: String },

    #[error("Layer '{layer}' not found in '{architecture}'")]
    UnknownLayer { architecture: String, layer: String },

    #[error("Layer '{layer}' does not produce a spatial feature map")]
    NonSpatialLayer { layer: String },

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid network topology: {0}")]
    Topology(String),

    #[error("Class index {index} out of range for {num_classes} classes")]
    ClassIndexOutOfRange { index: usize, num_classes: usize },

    #[error("Model produced no finite class scores")]
    NoScores,

    #[error("Weights error: {0}")]
    Weights(String),

    #[error("Safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Intermediate output of a layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    /// Channels x height x width.
    Map(Array3<f32>),
    Vector(Array1<f32>),
}

impl Feature {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Feature::Map(map) => map.shape().to_vec(),
            Feature::Vector(vector) => vector.shape().to_vec(),
        }
    }

    pub fn as_map(&self) -> Option<&Array3<f32>> {
        match self {
            Feature::Map(map) => Some(map),
            Feature::Vector(_) => None,
        }
    }
}

/// A layer picked out by name, with the kind of output it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLayer {
    pub name: String,
    pub spatial: bool,
}

/// Callbacks fired by a recorded forward pass and the backward pass that
/// follows it.
///
/// `on_backward` receives the gradient of the backpropagated score with
/// respect to the named layer's output.
pub trait LayerObserver {
    fn on_forward(&mut self, _layer: &str, _output: &Feature) {}

    fn on_backward(&mut self, _layer: &str, _grad_output: &Feature) {}

    /// Once true, the backward pass may stop early.
    fn satisfied(&self) -> bool {
        false
    }
}

pub struct NoopObserver;

impl LayerObserver for NoopObserver {}

/// A differentiable image classifier.
///
/// `forward` is the plain scoring path and records nothing. Gradients only
/// exist for a pass made through `forward_recorded`, whose tape must be handed
/// straight back to `backward`; there is no global gradient mode to toggle.
pub trait Classifier: Send + Sync {
    /// State saved by a recorded forward pass for the matching backward pass.
    type Tape;

    fn architecture(&self) -> &str;

    fn num_classes(&self) -> usize;

    /// Expected input tensor shape as (channels, height, width).
    fn input_shape(&self) -> (usize, usize, usize);

    /// Resolve a layer identifier: an exact layer name, or a block prefix
    /// such as `features`, which resolves to the last layer of that block.
    fn resolve_layer(&self, id: &str) -> Option<ResolvedLayer>;

    fn forward(&self, input: &Array3<f32>) -> Result<Array1<f32>, ModelError>;

    fn forward_recorded(
        &self,
        input: &Array3<f32>,
        observer: &mut dyn LayerObserver,
    ) -> Result<(Array1<f32>, Self::Tape), ModelError>;

    /// Backpropagate `output_grad` (d score / d class output) through the
    /// pass recorded on `tape`.
    fn backward(
        &self,
        tape: Self::Tape,
        output_grad: Array1<f32>,
        observer: &mut dyn LayerObserver,
    ) -> Result<(), ModelError>;
}
