pub mod aggregate;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod exclusion;
pub mod external;
pub mod model;
pub mod pattern;
pub mod redact;


pub use aggregate::Aggregator;
pub use config::{
    Config, DetectionConfig, ExclusionConfig, ExternalConfig, ExternalMode, RedactionConfig,
};
pub use engine::DetectionEngine;
pub use entity::{AlternateType, DetectionResult, Entity, EntityType, Layer};
pub use error::EngineError;
pub use exclusion::{ExclusionCategory, ExclusionEntry, ExclusionFilter};
pub use external::{ExternalLayer, ExternalOutcome, ResolvedMode};
pub use model::ContextModelLayer;
pub use pattern::PatternLayer;
pub use redact::{redact, RedactionMode, RedactionOptions, RedactionReport, Replacement};
