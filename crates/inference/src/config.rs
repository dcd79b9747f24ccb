use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::processing::post::ProbabilityMode;

pub const DEFAULT_ARCHITECTURE: &str = "densenet_mini";

/// NIH ChestX-ray findings the default head is sized for.
pub const DEFAULT_CLASS_LABELS: [&str; 8] = [
    "Atelectasis",
    "Cardiomegaly",
    "Effusion",
    "Infiltration",
    "Mass",
    "Nodule",
    "Pneumonia",
    "Pneumothorax",
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("class_labels must not be empty")]
    NoLabels,

    #[error("class label '{0}' is configured more than once")]
    DuplicateLabel(String),

    #[error("num_classes is {num_classes} but {labels} class labels are configured")]
    LabelCountMismatch { num_classes: usize, labels: usize },

    #[error("input_size must be non-zero, got {width}x{height}")]
    ZeroInputSize { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl Default for InputSize {
    fn default() -> Self {
        let (width, height) = preprocess::DEFAULT_INPUT_SIZE;
        Self { width, height }
    }
}

impl From<InputSize> for (u32, u32) {
    fn from(size: InputSize) -> Self {
        (size.width, size.height)
    }
}

/// Model section of the service configuration.
///
/// `probability_mode` has no default and must always be given.
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_architecture")]
    pub architecture: String,
    #[serde(default = "default_class_labels")]
    pub class_labels: Vec<String>,
    #[serde(default)]
    pub num_classes: Option<usize>,
    #[serde(default)]
    pub weights_path: Option<PathBuf>,
    #[serde(default)]
    pub input_size: InputSize,
    #[serde(default)]
    pub init_seed: u64,
    pub probability_mode: ProbabilityMode,
}

fn default_architecture() -> String {
    DEFAULT_ARCHITECTURE.to_string()
}

fn default_class_labels() -> Vec<String> {
    DEFAULT_CLASS_LABELS.iter().map(|s| s.to_string()).collect()
}

impl InferenceConfig {
    /// Defaults for everything except the probability mode.
    pub fn new(probability_mode: ProbabilityMode) -> Self {
        Self {
            architecture: default_architecture(),
            class_labels: default_class_labels(),
            num_classes: None,
            weights_path: None,
            input_size: InputSize::default(),
            init_seed: 0,
            probability_mode,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.class_labels.is_empty() {
            return Err(ConfigError::NoLabels);
        }
        for (i, label) in self.class_labels.iter().enumerate() {
            if self.class_labels[..i].contains(label) {
                return Err(ConfigError::DuplicateLabel(label.clone()));
            }
        }
        if let Some(num_classes) = self.num_classes
            && num_classes != self.class_labels.len()
        {
            return Err(ConfigError::LabelCountMismatch {
                num_classes,
                labels: self.class_labels.len(),
            });
        }
        let InputSize { width, height } = self.input_size;
        if width == 0 || height == 0 {
            return Err(ConfigError::ZeroInputSize { width, height });
        }
        Ok(())
    }

    /// Size of the classification head.
    pub fn num_classes(&self) -> usize {
        self.num_classes.unwrap_or(self.class_labels.len())
    }
}
