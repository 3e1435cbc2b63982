//! Pattern layer: regex and checksum based PII detection
//!
//! Always available, in-process, and the accuracy floor of the pipeline.
//! Other layers supplement this one, never replace it. Known limitation:
//! untitled lowercase person names are out of reach for pattern matching
//! and are left to the contextual layers.

use crate::entity::{Entity, EntityType, Layer};
use crate::error::EngineError;
use regex::Regex;
use tracing::debug;

/// Structural check applied to a raw regex match.
enum Validation {
    Accept,
    Downgrade(f64),
    Reject,
}

struct CompiledPattern {
    name: &'static str,
    entity_type: EntityType,
    regex: Regex,
    base_confidence: f64,
    validator: Option<fn(&str) -> Validation>,
}

/// The fixed detection battery. Compiled once at startup; compilation
/// failure is the engine's only fatal startup path.
pub struct PatternLayer {
    battery: Vec<CompiledPattern>,
}

const BATTERY: &[(&str, EntityType, &str, f64, Option<fn(&str) -> Validation>)] = &[
    (
        "ssn",
        EntityType::Ssn,
        r"\b\d{3}-\d{2}-\d{4}\b",
        0.9,
        Some(validate_ssn),
    ),
    (
        "email",
        EntityType::Email,
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        0.95,
        None,
    ),
    (
        "phone",
        EntityType::Phone,
        r"(?:\+?1[-.\s])?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b",
        0.85,
        Some(validate_phone),
    ),
    (
        "credit_card",
        EntityType::CreditCard,
        r"\b(?:\d{4}[-\s]?){3}\d{1,7}\b",
        0.95,
        Some(validate_credit_card),
    ),
    (
        "ipv4",
        EntityType::IpAddress,
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
        0.95,
        None,
    ),
    (
        "ipv6",
        EntityType::IpAddress,
        r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b",
        0.9,
        None,
    ),
    (
        "case_number_docket",
        EntityType::CaseNumber,
        r"\b\d{1,2}:\d{2}-(?:cv|cr|mj|md|mc|bk)-\d{3,6}\b",
        0.9,
        None,
    ),
    (
        "case_number_labeled",
        EntityType::CaseNumber,
        r"(?i)\bcase\s+no\.?\s*\d{2}-\d{3,6}\b",
        0.8,
        None,
    ),
    (
        "medical_record_number",
        EntityType::MedicalRecordNumber,
        r"(?i)\bmrn[:#\s]\s*\d{6,10}\b",
        0.9,
        None,
    ),
];

impl PatternLayer {
    pub fn new() -> Result<Self, EngineError> {
        let mut battery = Vec::with_capacity(BATTERY.len());
        for &(name, entity_type, pattern, base_confidence, validator) in BATTERY {
            let regex = Regex::new(pattern)
                .map_err(|source| EngineError::Pattern { name, source })?;
            debug!("compiled pattern '{}' for {}", name, entity_type);
            battery.push(CompiledPattern {
                name,
                entity_type,
                regex,
                base_confidence,
                validator,
            });
        }
        Ok(Self { battery })
    }

    /// Pure computation over the input text. Never fails, near-linear in
    /// text length.
    pub fn detect(&self, text: &str, min_confidence: f64) -> Vec<Entity> {
        let mut entities = Vec::new();

        for pattern in &self.battery {
            for mat in pattern.regex.find_iter(text) {
                let matched = mat.as_str();
                let confidence = match pattern.validator.map(|v| v(matched)) {
                    Some(Validation::Reject) => {
                        debug!("pattern '{}' rejected '{}' structurally", pattern.name, matched);
                        continue;
                    }
                    Some(Validation::Downgrade(c)) => c,
                    Some(Validation::Accept) | None => pattern.base_confidence,
                };

                if confidence < min_confidence {
                    continue;
                }

                entities.push(Entity::new(
                    pattern.entity_type,
                    mat.start(),
                    mat.end(),
                    matched,
                    confidence,
                    Layer::Pattern,
                ));
            }
        }

        entities.sort_by_key(|e| e.start);
        entities
    }
}

/// SSA structural rules: no 000/666/9xx area, no 00 group, no 0000 serial.
fn validate_ssn(ssn: &str) -> Validation {
    let digits: String = ssn.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 9 {
        return Validation::Reject;
    }
    if digits.starts_with("000") || digits.starts_with("666") || digits.starts_with('9') {
        return Validation::Reject;
    }
    if &digits[3..5] == "00" || &digits[5..9] == "0000" {
        return Validation::Reject;
    }
    Validation::Accept
}

/// Luhn checksum over the digit sequence; 13-19 digits.
fn validate_credit_card(number: &str) -> Validation {
    let digits: Vec<u32> = number
        .chars()
        .filter(|c| c.is_ascii_digit())
        .filter_map(|c| c.to_digit(10))
        .collect();

    if digits.len() < 13 || digits.len() > 19 {
        return Validation::Reject;
    }

    let checksum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    if checksum % 10 == 0 {
        Validation::Accept
    } else {
        Validation::Reject
    }
}

fn validate_phone(phone: &str) -> Validation {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() < 10 || digits.len() > 15 {
        return Validation::Reject;
    }
    if digits.len() == 11 && !digits.starts_with('1') {
        return Validation::Reject;
    }
    // Obviously fictional exchanges still redact, just less confidently.
    if digits.ends_with("0000") {
        return Validation::Downgrade(0.6);
    }
    Validation::Accept
}
