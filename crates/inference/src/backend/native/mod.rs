//! Pure-Rust differentiable backend on `ndarray`.

use crate::backend::{Classifier, Feature, LayerObserver, ModelError, NoopObserver, ResolvedLayer};
use ndarray::{Array1, Array3};

pub mod layers;
pub mod weights;

pub use layers::{Conv2d, Layer, Linear, MaxPool2d};

#[derive(Debug, Clone)]
pub struct NamedLayer {
    pub name: String,
    pub layer: Layer,
    /// Shape this layer produces for the network's input shape.
    pub output_shape: Vec<usize>,
}

/// A feed-forward chain of named layers ending in a class-score vector.
#[derive(Debug, Clone)]
pub struct Sequential {
    architecture: String,
    input_shape: (usize, usize, usize),
    layers: Vec<NamedLayer>,
}

/// Inputs to every layer of one recorded forward pass.
pub struct Tape {
    inputs: Vec<Feature>,
}

impl Sequential {
    /// Assemble a network, checking with a probe pass that every layer accepts
    /// its predecessor's output and that the chain ends in a score vector.
    pub fn new(
        architecture: impl Into<String>,
        input_shape: (usize, usize, usize),
        layers: Vec<(String, Layer)>,
    ) -> Result<Self, ModelError> {
        let architecture = architecture.into();
        let mut current = Feature::Map(Array3::zeros(input_shape));
        let mut named = Vec::with_capacity(layers.len());

        for (name, layer) in layers {
            if named.iter().any(|l: &NamedLayer| l.name == name) {
                return Err(ModelError::Topology(format!("duplicate layer name '{name}'")));
            }
            current = layer.forward(&current).map_err(|e| {
                ModelError::Topology(format!("layer '{name}' in '{architecture}': {e}"))
            })?;
            named.push(NamedLayer {
                name,
                layer,
                output_shape: current.shape(),
            });
        }

        if !matches!(current, Feature::Vector(ref scores) if !scores.is_empty()) {
            return Err(ModelError::Topology(format!(
                "'{architecture}' must end in a non-empty score vector, got shape {:?}",
                current.shape()
            )));
        }

        Ok(Self {
            architecture,
            input_shape,
            layers: named,
        })
    }

    pub fn layers(&self) -> &[NamedLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> impl Iterator<Item = (&str, &mut Layer)> {
        self.layers
            .iter_mut()
            .map(|l| (l.name.as_str(), &mut l.layer))
    }

    fn check_input(&self, input: &Array3<f32>) -> Result<(), ModelError> {
        if input.dim() != self.input_shape {
            let (c, h, w) = self.input_shape;
            return Err(ModelError::ShapeMismatch {
                context: format!("{} input", self.architecture),
                expected: vec![c, h, w],
                actual: input.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn run(
        &self,
        input: &Array3<f32>,
        observer: &mut dyn LayerObserver,
        mut tape: Option<&mut Vec<Feature>>,
    ) -> Result<Array1<f32>, ModelError> {
        self.check_input(input)?;
        let mut current = Feature::Map(input.clone());

        for named in &self.layers {
            let output = named.layer.forward(&current)?;
            observer.on_forward(&named.name, &output);
            let consumed = std::mem::replace(&mut current, output);
            if let Some(tape) = tape.as_deref_mut() {
                tape.push(consumed);
            }
        }

        match current {
            Feature::Vector(scores) => Ok(scores),
            Feature::Map(map) => Err(ModelError::ShapeMismatch {
                context: format!("{} output", self.architecture),
                expected: vec![self.num_classes()],
                actual: map.shape().to_vec(),
            }),
        }
    }
}

impl Classifier for Sequential {
    type Tape = Tape;

    fn architecture(&self) -> &str {
        &self.architecture
    }

    fn num_classes(&self) -> usize {
        self.layers
            .last()
            .and_then(|l| l.output_shape.first().copied())
            .unwrap_or(0)
    }

    fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    fn resolve_layer(&self, id: &str) -> Option<ResolvedLayer> {
        let prefix = format!("{id}.");
        let layer = self
            .layers
            .iter()
            .find(|l| l.name == id)
            .or_else(|| {
                self.layers
                    .iter()
                    .rev()
                    .find(|l| l.name.starts_with(&prefix))
            })?;

        Some(ResolvedLayer {
            name: layer.name.clone(),
            spatial: layer.output_shape.len() == 3,
        })
    }

    fn forward(&self, input: &Array3<f32>) -> Result<Array1<f32>, ModelError> {
        self.run(input, &mut NoopObserver, None)
    }

    fn forward_recorded(
        &self,
        input: &Array3<f32>,
        observer: &mut dyn LayerObserver,
    ) -> Result<(Array1<f32>, Tape), ModelError> {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let scores = self.run(input, observer, Some(&mut inputs))?;
        Ok((scores, Tape { inputs }))
    }

    fn backward(
        &self,
        tape: Tape,
        output_grad: Array1<f32>,
        observer: &mut dyn LayerObserver,
    ) -> Result<(), ModelError> {
        if tape.inputs.len() != self.layers.len() {
            return Err(ModelError::ShapeMismatch {
                context: "backward tape".to_string(),
                expected: vec![self.layers.len()],
                actual: vec![tape.inputs.len()],
            });
        }

        let mut grad = Feature::Vector(output_grad);
        for (named, input) in self.layers.iter().zip(&tape.inputs).rev() {
            observer.on_backward(&named.name, &grad);
            if observer.satisfied() {
                break;
            }
            grad = named.layer.backward(input, &grad)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_network() -> Sequential {
        let mut conv = Conv2d::new(3, 2, 3, 1, 1);
        conv.weight.fill(0.1);
        let mut fc = Linear::new(2, 3);
        fc.weight = ndarray::arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);

        Sequential::new(
            "tiny",
            (3, 4, 4),
            vec![
                ("features.conv".to_string(), Layer::Conv2d(conv)),
                ("features.relu".to_string(), Layer::Relu),
                ("avgpool".to_string(), Layer::GlobalAvgPool),
                ("fc".to_string(), Layer::Linear(fc)),
            ],
        )
        .unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        forward: Vec<String>,
        backward: Vec<String>,
    }

    impl LayerObserver for Recorder {
        fn on_forward(&mut self, layer: &str, _output: &Feature) {
            self.forward.push(layer.to_string());
        }

        fn on_backward(&mut self, layer: &str, _grad_output: &Feature) {
            self.backward.push(layer.to_string());
        }
    }

    #[test]
    fn test_probe_pass_records_output_shapes() {
        let network = tiny_network();
        let shapes: Vec<_> = network.layers().iter().map(|l| l.output_shape.clone()).collect();
        assert_eq!(shapes, vec![vec![2, 4, 4], vec![2, 4, 4], vec![2], vec![3]]);
        assert_eq!(network.num_classes(), 3);
    }

    #[test]
    fn test_topology_must_end_in_scores() {
        let result = Sequential::new(
            "headless",
            (1, 4, 4),
            vec![("conv".to_string(), Layer::Conv2d(Conv2d::new(1, 1, 3, 1, 1)))],
        );
        assert!(matches!(result, Err(ModelError::Topology(_))));
    }

    #[test]
    fn test_incompatible_layers_are_rejected_at_construction() {
        let result = Sequential::new(
            "broken",
            (3, 4, 4),
            vec![
                ("conv".to_string(), Layer::Conv2d(Conv2d::new(1, 1, 3, 1, 1))),
                ("pool".to_string(), Layer::GlobalAvgPool),
            ],
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("conv"), "error should name the layer: {err}");
    }

    #[test]
    fn test_resolve_exact_name_and_block_prefix() {
        let network = tiny_network();

        let exact = network.resolve_layer("features.conv").unwrap();
        assert_eq!(exact.name, "features.conv");
        assert!(exact.spatial);

        let block = network.resolve_layer("features").unwrap();
        assert_eq!(block.name, "features.relu", "block resolves to its last layer");

        let head = network.resolve_layer("fc").unwrap();
        assert!(!head.spatial);

        assert!(network.resolve_layer("feat").is_none());
    }

    #[test]
    fn test_forward_rejects_wrong_input_shape() {
        let err = tiny_network().forward(&Array3::zeros((3, 5, 5))).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_recorded_pass_matches_plain_forward() {
        let network = tiny_network();
        let input = Array3::from_elem((3, 4, 4), 1.0);

        let plain = network.forward(&input).unwrap();
        let mut recorder = Recorder::default();
        let (recorded, tape) = network.forward_recorded(&input, &mut recorder).unwrap();

        assert_eq!(plain, recorded);
        assert_eq!(recorder.forward, ["features.conv", "features.relu", "avgpool", "fc"]);

        network
            .backward(tape, ndarray::arr1(&[1.0, 0.0, 0.0]), &mut recorder)
            .unwrap();
        assert_eq!(recorder.backward, ["fc", "avgpool", "features.relu", "features.conv"]);
    }
}
