//! Configuration management for textscrub

use crate::entity::Layer;
use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detection: DetectionConfig,
    pub external: ExternalConfig,
    pub exclusions: ExclusionConfig,
    pub redaction: RedactionConfig,
}

/// Detection tunables, snapshotted per call. An in-flight call keeps the
/// snapshot it started with even if settings change underneath it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub enabled_layers: BTreeSet<Layer>,
    /// Minimum confidence a pattern match must carry to be reported.
    pub pattern_min_confidence: f64,
    /// Minimum score the context model must assign to a span.
    pub model_min_score: f64,
    /// Minimum score accepted from the external analyzer.
    pub external_min_score: f64,
    /// Span overlap fraction beyond which detections cluster together.
    pub overlap_fraction: f64,
    /// Confidence added on top of the cluster maximum when two layers
    /// independently agree on a type. Capped at 1.0 downstream.
    pub cross_validation_boost: f64,
    /// When false, an enabled layer that cannot run fails the call instead
    /// of silently degrading it.
    pub fallback_enabled: bool,
    /// Override for the context model weights file. None loads the
    /// built-in weights.
    pub model_weights_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalMode {
    /// Pick Lite/Full/Disabled from available system memory at startup.
    Auto,
    Disabled,
    Lite,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConfig {
    pub mode: ExternalMode,
    pub endpoint: String,
    pub timeout_ms: u64,
    /// Concurrent in-flight requests allowed against the external process.
    pub pool_size: usize,
    /// Available memory required before Auto selects Full mode.
    pub full_budget_mib: u64,
    /// Available memory required before Auto selects Lite mode.
    pub lite_budget_mib: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionConfig {
    /// Region packs to activate, e.g. ["en-us"].
    pub regions: Vec<String>,
    /// Directory with additional region pack files (one TOML per region).
    pub pack_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Include original matched values in redaction reports.
    pub include_original_values: bool,
    /// Seed for the realistic anonymizer. None uses entropy.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let mut enabled_layers = BTreeSet::new();
        enabled_layers.insert(Layer::Pattern);
        enabled_layers.insert(Layer::ContextModel);
        enabled_layers.insert(Layer::External);

        Self {
            detection: DetectionConfig {
                enabled_layers,
                pattern_min_confidence: 0.5,
                model_min_score: 0.5,
                external_min_score: 0.5,
                overlap_fraction: 0.5,
                cross_validation_boost: 0.1,
                fallback_enabled: true,
                model_weights_path: None,
            },
            external: ExternalConfig {
                mode: ExternalMode::Auto,
                endpoint: "http://localhost:8753".to_string(),
                timeout_ms: 2_000,
                pool_size: 4,
                full_budget_mib: 8_192,
                lite_budget_mib: 3_072,
            },
            exclusions: ExclusionConfig {
                regions: vec!["en-us".to_string()],
                pack_dir: None,
            },
            redaction: RedactionConfig {
                include_original_values: false,
                seed: None,
            },
        }
    }
}

impl Config {
    pub fn get_app_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "textscrub", "textscrub")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine application directories"))
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        let project_dirs = Self::get_app_dirs()?;
        let config_dir = project_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.join("textscrub.toml"))
    }

    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("pattern_min_confidence", self.detection.pattern_min_confidence),
            ("model_min_score", self.detection.model_min_score),
            ("external_min_score", self.detection.external_min_score),
            ("overlap_fraction", self.detection.overlap_fraction),
            ("cross_validation_boost", self.detection.cross_validation_boost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow::anyhow!("{} must be between 0.0 and 1.0", name));
            }
        }

        if self.detection.enabled_layers.is_empty() {
            return Err(anyhow::anyhow!("at least one detection layer must be enabled"));
        }

        if self.external.timeout_ms == 0 {
            return Err(anyhow::anyhow!("external timeout must be non-zero"));
        }

        if self.external.pool_size == 0 {
            return Err(anyhow::anyhow!("external pool size must be non-zero"));
        }

        if self.external.lite_budget_mib > self.external.full_budget_mib {
            return Err(anyhow::anyhow!(
                "lite memory budget cannot exceed the full budget"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert!(config.detection.enabled_layers.contains(&Layer::Pattern));
        assert!(config.detection.enabled_layers.contains(&Layer::ContextModel));
        assert!(config.detection.enabled_layers.contains(&Layer::External));
        assert!(matches!(config.external.mode, ExternalMode::Auto));
        assert!(config.detection.fallback_enabled);
        assert_eq!(config.exclusions.regions, vec!["en-us".to_string()]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.validate().unwrap();

        config.detection.overlap_fraction = 1.5;
        assert!(config.validate().is_err());

        config = Config::default();
        config.detection.enabled_layers.clear();
        assert!(config.validate().is_err());

        config = Config::default();
        config.external.pool_size = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.external.lite_budget_mib = config.external.full_budget_mib + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        config.to_file(temp_path).unwrap();

        let loaded = Config::from_file(temp_path).unwrap();
        assert_eq!(loaded.detection.enabled_layers, config.detection.enabled_layers);
        assert_eq!(loaded.external.endpoint, config.external.endpoint);
        assert_eq!(loaded.exclusions.regions, config.exclusions.regions);
        assert_eq!(
            loaded.redaction.include_original_values,
            config.redaction.include_original_values
        );
    }

    #[test]
    fn test_external_mode_serde() {
        let toml_str = "mode = \"lite\"\nendpoint = \"http://localhost:1\"\ntimeout_ms = 100\npool_size = 1\nfull_budget_mib = 8192\nlite_budget_mib = 3072\n";
        let external: ExternalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(external.mode, ExternalMode::Lite);
    }
}
