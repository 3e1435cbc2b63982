//! Exclusion filter: regional allow-lists for known-safe terms
//!
//! Region packs (legal phrases, place names, institutions, calendar terms)
//! are merged into one lookup set at load time. Matching is against the
//! entire detected span, never substring containment, so genuine PII that
//! shares characters with an excluded phrase is not suppressed.

use crate::config::ExclusionConfig;
use crate::entity::Entity;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

const EMBEDDED_PACKS: &[(&str, &str)] = &[
    ("en-us", include_str!("data/exclusions/en_us.toml")),
    ("en-gb", include_str!("data/exclusions/en_gb.toml")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionCategory {
    Legal,
    Location,
    Organization,
    Time,
    Custom,
}

/// One allow-listed term from a region pack.
#[derive(Debug, Clone)]
pub struct ExclusionEntry {
    pub term: String,
    pub category: ExclusionCategory,
    pub region: String,
    pub case_sensitive: bool,
}

#[derive(Debug, Deserialize)]
struct PackFile {
    region: String,
    #[serde(default)]
    case_sensitive: Vec<String>,
    #[serde(default)]
    terms: PackTerms,
}

#[derive(Debug, Default, Deserialize)]
struct PackTerms {
    #[serde(default)]
    legal: Vec<String>,
    #[serde(default)]
    location: Vec<String>,
    #[serde(default)]
    organization: Vec<String>,
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    custom: Vec<String>,
}

fn parse_pack(name: &str, contents: &str) -> Result<Vec<ExclusionEntry>, EngineError> {
    let pack: PackFile = toml::from_str(contents)
        .map_err(|e| EngineError::PackLoad(name.to_string(), e.to_string()))?;

    let mut entries = Vec::new();
    let mut push = |terms: &[String], category: ExclusionCategory| {
        for term in terms {
            entries.push(ExclusionEntry {
                term: term.clone(),
                category,
                region: pack.region.clone(),
                case_sensitive: false,
            });
        }
    };
    push(&pack.terms.legal, ExclusionCategory::Legal);
    push(&pack.terms.location, ExclusionCategory::Location);
    push(&pack.terms.organization, ExclusionCategory::Organization);
    push(&pack.terms.time, ExclusionCategory::Time);
    push(&pack.terms.custom, ExclusionCategory::Custom);

    for term in &pack.case_sensitive {
        entries.push(ExclusionEntry {
            term: term.clone(),
            category: ExclusionCategory::Custom,
            region: pack.region.clone(),
            case_sensitive: true,
        });
    }

    Ok(entries)
}

/// Merged lookup set over all active region packs.
pub struct ExclusionFilter {
    folded: HashSet<String>,
    exact: HashSet<String>,
    regions: Vec<String>,
}

impl ExclusionFilter {
    pub fn empty() -> Self {
        Self {
            folded: HashSet::new(),
            exact: HashSet::new(),
            regions: Vec::new(),
        }
    }

    /// Load and merge every active region pack. A pack that fails to load
    /// is skipped with a loud warning; startup never blocks on it.
    pub fn load(config: &ExclusionConfig) -> Self {
        let mut filter = Self::empty();

        for region in &config.regions {
            let mut loaded = false;

            if let Some((_, contents)) = EMBEDDED_PACKS.iter().find(|(r, _)| *r == region.as_str()) {
                match parse_pack(region, contents) {
                    Ok(entries) => {
                        filter.merge(entries);
                        loaded = true;
                    }
                    Err(e) => warn_degraded(region, &e.to_string()),
                }
            }

            if let Some(dir) = &config.pack_dir {
                match load_pack_file(dir, region) {
                    Ok(Some(entries)) => {
                        filter.merge(entries);
                        loaded = true;
                    }
                    Ok(None) => {}
                    Err(e) => warn_degraded(region, &e.to_string()),
                }
            }

            if !loaded {
                warn_degraded(region, "no pack found for region");
            }
        }

        info!(
            "exclusion filter active: {} terms across {:?}",
            filter.len(),
            filter.regions
        );
        filter
    }

    fn merge(&mut self, entries: Vec<ExclusionEntry>) {
        for entry in entries {
            if !self.regions.contains(&entry.region) {
                self.regions.push(entry.region.clone());
            }
            if entry.case_sensitive {
                self.exact.insert(entry.term);
            } else {
                self.folded.insert(entry.term.to_lowercase());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.folded.len() + self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whole-span lookup. Substrings never match.
    pub fn is_excluded(&self, span_text: &str) -> bool {
        let trimmed = span_text.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.exact.contains(trimmed) || self.folded.contains(&trimmed.to_lowercase())
    }

    /// Drop detections whose full span is a known-safe term. Structural
    /// categories have no exclusion entries and bypass this stage.
    pub fn filter(&self, entities: Vec<Entity>) -> Vec<Entity> {
        if self.is_empty() {
            return entities;
        }
        entities
            .into_iter()
            .filter(|e| {
                if e.entity_type.is_structural() {
                    return true;
                }
                if self.is_excluded(&e.text) {
                    debug!("excluded known-safe term '{}'", e.text);
                    return false;
                }
                true
            })
            .collect()
    }
}

fn load_pack_file(dir: &Path, region: &str) -> Result<Option<Vec<ExclusionEntry>>, EngineError> {
    let path = dir.join(format!("{region}.toml"));
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| EngineError::PackLoad(region.to_string(), e.to_string()))?;
    parse_pack(region, &contents).map(Some)
}

fn warn_degraded(region: &str, cause: &str) {
    warn!(
        "exclusion pack '{}' unavailable ({}); continuing with a reduced \
         exclusion set — legitimate legal, place, and institutional terms \
         may now be redacted as PII",
        region, cause
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityType, Layer};
    use std::io::Write;

    fn us_filter() -> ExclusionFilter {
        ExclusionFilter::load(&ExclusionConfig {
            regions: vec!["en-us".to_string()],
            pack_dir: None,
        })
    }

    #[test]
    fn test_embedded_pack_loads() {
        let filter = us_filter();
        assert!(filter.len() > 50);
        assert_eq!(filter.regions, vec!["en-us".to_string()]);
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let filter = us_filter();
        assert!(filter.is_excluded("Supreme Court"));
        assert!(filter.is_excluded("supreme court"));
        assert!(filter.is_excluded("SUPREME COURT"));
    }

    #[test]
    fn test_whole_span_only() {
        let filter = us_filter();
        assert!(filter.is_excluded("First Amendment"));
        assert!(!filter.is_excluded("First Amendment Services LLC"));
        assert!(!filter.is_excluded("Amendment"));
    }

    #[test]
    fn test_filter_removes_safe_terms() {
        let filter = us_filter();
        let entities = vec![
            Entity::new(EntityType::Organization, 0, 13, "Supreme Court", 0.6, Layer::ContextModel),
            Entity::new(EntityType::PersonName, 20, 30, "John Smith", 0.75, Layer::ContextModel),
        ];
        let kept = filter.filter(entities);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "John Smith");
    }

    #[test]
    fn test_structural_types_bypass() {
        let filter = us_filter();
        // A pathological span that happens to equal an excluded term must
        // still be redacted when it is structurally shaped PII.
        let entities = vec![Entity::new(
            EntityType::Email,
            0,
            6,
            "Monday",
            0.9,
            Layer::Pattern,
        )];
        assert_eq!(filter.filter(entities).len(), 1);
    }

    #[test]
    fn test_merge_multiple_regions() {
        let filter = ExclusionFilter::load(&ExclusionConfig {
            regions: vec!["en-us".to_string(), "en-gb".to_string()],
            pack_dir: None,
        });
        assert!(filter.is_excluded("Supreme Court"));
        assert!(filter.is_excluded("House of Lords"));
    }

    #[test]
    fn test_unknown_region_degrades() {
        let filter = ExclusionFilter::load(&ExclusionConfig {
            regions: vec!["zz-zz".to_string()],
            pack_dir: None,
        });
        assert!(filter.is_empty());
        // An empty set filters nothing.
        let entities = vec![Entity::new(
            EntityType::Location,
            0,
            8,
            "New York",
            0.8,
            Layer::ContextModel,
        )];
        assert_eq!(filter.filter(entities).len(), 1);
    }

    #[test]
    fn test_pack_dir_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xx-test.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
region = "xx-test"
case_sensitive = ["May"]

[terms]
legal = ["Writ of Certiorari"]
"#
        )
        .unwrap();

        let filter = ExclusionFilter::load(&ExclusionConfig {
            regions: vec!["xx-test".to_string()],
            pack_dir: Some(dir.path().to_path_buf()),
        });

        assert!(filter.is_excluded("Writ of Certiorari"));
        assert!(filter.is_excluded("writ of certiorari"));
        assert!(filter.is_excluded("May"));
        assert!(!filter.is_excluded("MAY"));
    }

    #[test]
    fn test_malformed_pack_degrades() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "region = [[[").unwrap();

        let filter = ExclusionFilter::load(&ExclusionConfig {
            regions: vec!["bad".to_string(), "en-us".to_string()],
            pack_dir: Some(dir.path().to_path_buf()),
        });

        // The bad pack is skipped, the good one still loads.
        assert!(filter.is_excluded("Supreme Court"));
    }
}
