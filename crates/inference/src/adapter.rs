use crate::architecture;
use crate::backend::{Classifier, Feature, LayerObserver, ModelError};
use crate::processing::post::top_class;
use ndarray::{Array1, Array3};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Scores and target-layer captures from one forward/backward pass.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub scores: Array1<f32>,
    pub class_index: usize,
    pub class_score: f32,
    /// `None` when the target layer never fired during the pass.
    pub activation: Option<Array3<f32>>,
    pub gradient: Option<Array3<f32>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentationStats {
    pub installed: u64,
    pub removed: u64,
}

#[derive(Default)]
struct Counters {
    installed: AtomicU64,
    removed: AtomicU64,
}

/// Capture state behind the adapter's mutex. Only populated while a
/// `Capture` guard is alive.
#[derive(Default)]
struct Hooks {
    target: Option<String>,
    activation: Option<Array3<f32>>,
    gradient: Option<Array3<f32>>,
}

/// Installs capture hooks on creation and removes them on drop, so every exit
/// from `run_with_capture` (including `?` and unwinding) leaves the model
/// uninstrumented.
struct Capture<'a> {
    hooks: &'a mut Hooks,
    counters: &'a Counters,
}

impl<'a> Capture<'a> {
    fn install(hooks: &'a mut Hooks, target: &str, counters: &'a Counters) -> Self {
        *hooks = Hooks {
            target: Some(target.to_string()),
            ..Hooks::default()
        };
        counters.installed.fetch_add(1, Ordering::SeqCst);
        Self { hooks, counters }
    }

    fn take(&mut self) -> (Option<Array3<f32>>, Option<Array3<f32>>) {
        (self.hooks.activation.take(), self.hooks.gradient.take())
    }

    fn is_target(&self, layer: &str) -> bool {
        self.hooks.target.as_deref() == Some(layer)
    }
}

impl LayerObserver for Capture<'_> {
    fn on_forward(&mut self, layer: &str, output: &Feature) {
        if self.is_target(layer) {
            self.hooks.activation = output.as_map().cloned();
        }
    }

    fn on_backward(&mut self, layer: &str, grad_output: &Feature) {
        if self.is_target(layer) {
            self.hooks.gradient = grad_output.as_map().cloned();
        }
    }

    fn satisfied(&self) -> bool {
        self.hooks.gradient.is_some()
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        *self.hooks = Hooks::default();
        self.counters.removed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A loaded classifier plus its resolved Grad-CAM target layer.
///
/// Shared by reference across requests. `score` runs lock-free; captures are
/// serialized per model instance.
pub struct ModelAdapter<C: Classifier> {
    model: C,
    target_layer: String,
    hooks: Mutex<Hooks>,
    counters: Counters,
}

impl<C: Classifier> ModelAdapter<C> {
    /// Resolve the target layer registered for the model's architecture.
    pub fn for_architecture(model: C) -> Result<Self, ModelError> {
        let registered = architecture::lookup(model.architecture())?.target_layer;
        Self::with_target(model, registered)
    }

    /// Resolve `layer_id` against the model, requiring a spatial output.
    pub fn with_target(model: C, layer_id: &str) -> Result<Self, ModelError> {
        let resolved = model
            .resolve_layer(layer_id)
            .ok_or_else(|| ModelError::UnknownLayer {
                architecture: model.architecture().to_string(),
                layer: layer_id.to_string(),
            })?;
        if !resolved.spatial {
            return Err(ModelError::NonSpatialLayer {
                layer: resolved.name,
            });
        }

        tracing::info!(
            architecture = model.architecture(),
            target_layer = %resolved.name,
            "Resolved Grad-CAM target layer"
        );
        Ok(Self::unresolved(model, resolved.name))
    }

    /// Skip resolution and instrument `target_layer` verbatim. A name the
    /// model never emits degrades to empty captures.
    pub fn unresolved(model: C, target_layer: impl Into<String>) -> Self {
        Self {
            model,
            target_layer: target_layer.into(),
            hooks: Mutex::new(Hooks::default()),
            counters: Counters::default(),
        }
    }

    pub fn model(&self) -> &C {
        &self.model
    }

    pub fn target_layer(&self) -> &str {
        &self.target_layer
    }

    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// Plain class scores; nothing is recorded or captured.
    pub fn score(&self, tensor: &Array3<f32>) -> Result<Array1<f32>, ModelError> {
        self.model.forward(tensor)
    }

    /// One forward pass, then one backward pass of the chosen class score
    /// (`class_index`, or the arg-max), capturing the target layer's output
    /// and its gradient from that same pass.
    pub fn run_with_capture(
        &self,
        tensor: &Array3<f32>,
        class_index: Option<usize>,
    ) -> Result<CaptureOutput, ModelError> {
        // The guard clears the hooks even while unwinding, so a poisoned lock
        // still holds clean state.
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut capture = Capture::install(&mut hooks, &self.target_layer, &self.counters);

        let (scores, tape) = self.model.forward_recorded(tensor, &mut capture)?;

        let num_classes = scores.len();
        let class_index = match class_index {
            Some(index) if index >= num_classes => {
                return Err(ModelError::ClassIndexOutOfRange { index, num_classes });
            }
            Some(index) => index,
            None => top_class(&scores).ok_or(ModelError::NoScores)?,
        };
        let class_score = scores[class_index];

        let mut seed = Array1::zeros(num_classes);
        seed[class_index] = 1.0;
        self.model.backward(tape, seed, &mut capture)?;

        let (activation, gradient) = capture.take();
        drop(capture);

        Ok(CaptureOutput {
            scores,
            class_index,
            class_score,
            activation,
            gradient,
        })
    }

    pub fn instrumentation_stats(&self) -> InstrumentationStats {
        InstrumentationStats {
            installed: self.counters.installed.load(Ordering::SeqCst),
            removed: self.counters.removed.load(Ordering::SeqCst),
        }
    }
}
