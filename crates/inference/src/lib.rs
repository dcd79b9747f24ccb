pub mod adapter;
pub mod architecture;
pub mod backend;
pub mod config;
pub mod error;
pub mod gradcam;
pub mod processing;
pub mod serialization;
pub mod service;

pub use adapter::{CaptureOutput, InstrumentationStats, ModelAdapter};
pub use backend::{Classifier, ModelError, Sequential};
pub use config::{ConfigError, InferenceConfig, InputSize, ProbabilityMode};
pub use error::{ErrorKind, PipelineError};
pub use gradcam::{GradCam, Localization};
pub use service::{Explanation, InferenceService, NativeService, PredictionResult};
