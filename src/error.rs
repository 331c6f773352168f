//! Error taxonomy for filter loading, input handling and backend setup.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Shader pipeline stage, used to report which source failed to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("Vertex"),
            ShaderStage::Fragment => f.write_str("Fragment"),
        }
    }
}

impl From<ShaderStage> for naga::ShaderStage {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// Errors surfaced by the filter catalog, program loader and input handling.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Catalog miss. Cannot happen through the built-in selectors.
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    #[error("could not compile {stage} shader of filter `{filter}`: {log}")]
    ShaderCompileError {
        stage: ShaderStage,
        filter: String,
        log: String,
    },

    #[error("could not link shader program of filter `{filter}`: {log}")]
    ShaderLinkError { filter: String, log: String },

    /// The provided file is not a decodable image.
    #[error("unsupported input file {}: {reason}", .path.display())]
    UnsupportedInputFile { path: PathBuf, reason: String },

    /// The rendering backend could not be initialized. Fatal at startup.
    #[error("rasterizer unavailable: {0}")]
    RasterizerUnavailable(String),
}

impl FilterError {
    /// True for errors that only invalidate one filter selection.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FilterError::RasterizerUnavailable(_))
    }
}

pub type Result<T, E = FilterError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_filter_and_stage() {
        let err = FilterError::ShaderCompileError {
            stage: ShaderStage::Fragment,
            filter: "Pride".to_string(),
            log: "syntax error".to_string(),
        };
        assert_eq!(err.to_string(), "could not compile Fragment shader of filter `Pride`: syntax error");

        let err = FilterError::UnsupportedInputFile {
            path: PathBuf::from("notes.txt"),
            reason: "not an image".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported input file notes.txt: not an image");
    }

    #[test]
    fn test_only_backend_failures_are_fatal() {
        assert!(FilterError::UnknownFilter("Dance".to_string()).is_recoverable());
        assert!(!FilterError::RasterizerUnavailable("no adapter".to_string()).is_recoverable());
    }
}
