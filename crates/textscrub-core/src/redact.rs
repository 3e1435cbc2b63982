//! Redactor: turns final entities into masked or pseudonymized text
//!
//! Mask mode substitutes a fixed per-type token. Anonymize mode hands out
//! per-document pseudonyms that repeat for identical matches. Realistic
//! mode generates plausible fake values for types with a natural fake
//! form, falling back to pseudonyms for the rest.

use crate::entity::{Entity, EntityType};
use fake::faker::internet::en::{SafeEmail, IP};
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    #[default]
    Mask,
    Anonymize,
    Realistic,
}

#[derive(Debug, Clone)]
pub struct RedactionOptions {
    pub mode: RedactionMode,
    /// Include the original matched value in each report record. Off by
    /// default so reports are safe to persist alongside the clean text.
    pub include_original_values: bool,
    pub seed: Option<u64>,
}

impl Default for RedactionOptions {
    fn default() -> Self {
        Self {
            mode: RedactionMode::Mask,
            include_original_values: false,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub entity_type: EntityType,
    pub start: usize,
    pub end: usize,
    pub replacement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionReport {
    pub id: String,
    pub mode: RedactionMode,
    pub replacements: Vec<Replacement>,
}

/// Replace every entity span in the text. Entities are expected sorted
/// and non-overlapping, as produced by the aggregator.
pub fn redact(
    text: &str,
    entities: &[Entity],
    options: &RedactionOptions,
) -> (String, RedactionReport) {
    let mut report = RedactionReport {
        id: Uuid::new_v4().to_string(),
        mode: options.mode,
        replacements: Vec::with_capacity(entities.len()),
    };

    if entities.is_empty() {
        return (text.to_string(), report);
    }

    let mut ordered: Vec<&Entity> = entities.iter().collect();
    ordered.sort_by_key(|e| e.start);

    let mut assigner = ReplacementAssigner::new(options);
    let mut clean = String::with_capacity(text.len());
    let mut last_end = 0;

    for entity in ordered {
        if entity.start < last_end || entity.end > text.len() {
            debug!("skipping out-of-order span {}..{}", entity.start, entity.end);
            continue;
        }

        clean.push_str(&text[last_end..entity.start]);
        let token = assigner.assign(entity);
        clean.push_str(&token);

        report.replacements.push(Replacement {
            entity_type: entity.entity_type,
            start: entity.start,
            end: entity.end,
            replacement: token,
            original: options
                .include_original_values
                .then(|| entity.text.clone()),
        });

        last_end = entity.end;
    }

    clean.push_str(&text[last_end..]);
    (clean, report)
}

/// Hands out replacement tokens, reusing the same token for repeated
/// identical matches within one document.
struct ReplacementAssigner {
    mode: RedactionMode,
    rng: StdRng,
    assigned: HashMap<(EntityType, String), String>,
    counters: HashMap<EntityType, usize>,
}

impl ReplacementAssigner {
    fn new(options: &RedactionOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            mode: options.mode,
            rng,
            assigned: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    fn assign(&mut self, entity: &Entity) -> String {
        if self.mode == RedactionMode::Mask {
            return entity.entity_type.mask_token().to_string();
        }

        let key = (entity.entity_type, entity.text.clone());
        if let Some(existing) = self.assigned.get(&key) {
            return existing.clone();
        }

        let token = if self.mode == RedactionMode::Realistic {
            self.fake_value(entity.entity_type)
                .unwrap_or_else(|| self.next_pseudonym(entity.entity_type))
        } else {
            self.next_pseudonym(entity.entity_type)
        };

        self.assigned.insert(key, token.clone());
        token
    }

    fn next_pseudonym(&mut self, entity_type: EntityType) -> String {
        let n = self.counters.entry(entity_type).or_insert(0);
        *n += 1;
        format!("{}_{}", entity_type.pseudonym_prefix(), n)
    }

    fn fake_value(&mut self, entity_type: EntityType) -> Option<String> {
        let value = match entity_type {
            EntityType::Email => SafeEmail().fake_with_rng(&mut self.rng),
            EntityType::PersonName => {
                let first: String = FirstName().fake_with_rng(&mut self.rng);
                let last: String = LastName().fake_with_rng(&mut self.rng);
                format!("{} {}", first, last)
            }
            EntityType::Phone => format!(
                "555-{:03}-{:04}",
                self.rng.gen_range(100..999),
                self.rng.gen_range(1000..9999)
            ),
            // 9xx area numbers are never issued, so the fake is obvious.
            EntityType::Ssn => format!(
                "9{:02}-{:02}-{:04}",
                self.rng.gen_range(10..99),
                self.rng.gen_range(10..99),
                self.rng.gen_range(1000..9999)
            ),
            EntityType::IpAddress => IP().fake_with_rng(&mut self.rng),
            _ => return None,
        };
        Some(value)
    }
}
