//! Typed startup and call errors for the detection engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The pattern battery failed to compile. This is the only fatal
    /// startup path: without the pattern layer there is no accuracy floor.
    #[error("invalid detection pattern '{name}': {source}")]
    Pattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("context model weights unavailable: {0}")]
    ModelLoad(String),

    #[error("exclusion pack '{0}' failed to load: {1}")]
    PackLoad(String, String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Returned by `detect` only when graceful fallback has been disabled
    /// and an enabled layer could not run.
    #[error("layer '{0}' unavailable and fallback is disabled")]
    LayerUnavailable(crate::entity::Layer),
}
