use crate::backend::ModelError;
use crate::config::ConfigError;
use crate::serialization::EncodeError;
use preprocess::PreprocessError;
use thiserror::Error;

/// Failure categories the transports report to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputDecode,
    ModelNotLoaded,
    TargetLayerResolution,
    Encoding,
    Internal,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Invalid model configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Localization map is {map:?} but the image is {image:?}")]
    CompositeSize { map: (usize, usize), image: (u32, u32) },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Preprocess(e) if e.is_input_error() => ErrorKind::InputDecode,
            PipelineError::Model(
                ModelError::TargetLayerResolution { .. }
                | ModelError::UnknownLayer { .. }
                | ModelError::NonSpatialLayer { .. },
            ) => ErrorKind::TargetLayerResolution,
            PipelineError::Encode(_) => ErrorKind::Encoding,
            _ => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let decode: PipelineError = PreprocessError::EmptyInput.into();
        assert_eq!(decode.kind(), ErrorKind::InputDecode);

        let resize: PipelineError = PreprocessError::InvalidSize { width: 0, height: 0 }.into();
        assert_eq!(resize.kind(), ErrorKind::Internal, "resize failures are not client errors");

        let resolution: PipelineError = ModelError::TargetLayerResolution {
            architecture: "alexnet".to_string(),
        }
        .into();
        assert_eq!(resolution.kind(), ErrorKind::TargetLayerResolution);

        let shape: PipelineError = ModelError::NoScores.into();
        assert_eq!(shape.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_transparent_display() {
        let err: PipelineError = PreprocessError::EmptyInput.into();
        assert_eq!(err.to_string(), "Image payload is empty");
    }
}
