//! Core data model: entity types, detected entities, detection results

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Canonical PII categories the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Ssn,
    CreditCard,
    Email,
    Phone,
    IpAddress,
    CaseNumber,
    MedicalRecordNumber,
    PersonName,
    Organization,
    Location,
    Other,
}

impl EntityType {
    /// Fixed mask token used in redacted output.
    pub fn mask_token(&self) -> &'static str {
        match self {
            EntityType::Ssn => "[SSN]",
            EntityType::CreditCard => "[CREDIT_CARD]",
            EntityType::Email => "[EMAIL]",
            EntityType::Phone => "[PHONE]",
            EntityType::IpAddress => "[IP_ADDRESS]",
            EntityType::CaseNumber => "[CASE_NUMBER]",
            EntityType::MedicalRecordNumber => "[MRN]",
            EntityType::PersonName => "[PERSON]",
            EntityType::Organization => "[ORGANIZATION]",
            EntityType::Location => "[LOCATION]",
            EntityType::Other => "[REDACTED]",
        }
    }

    /// Prefix for per-document pseudonym tokens, e.g. `PERSON_1`.
    pub fn pseudonym_prefix(&self) -> &'static str {
        match self {
            EntityType::Ssn => "SSN",
            EntityType::CreditCard => "CARD",
            EntityType::Email => "EMAIL",
            EntityType::Phone => "PHONE",
            EntityType::IpAddress => "IP",
            EntityType::CaseNumber => "CASE",
            EntityType::MedicalRecordNumber => "MRN",
            EntityType::PersonName => "PERSON",
            EntityType::Organization => "ORG",
            EntityType::Location => "LOCATION",
            EntityType::Other => "REDACTED",
        }
    }

    /// Structurally-shaped categories never appear in exclusion packs and
    /// bypass the exclusion filter entirely.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EntityType::Ssn
                | EntityType::CreditCard
                | EntityType::Email
                | EntityType::Phone
                | EntityType::IpAddress
                | EntityType::CaseNumber
                | EntityType::MedicalRecordNumber
        )
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Ssn => "ssn",
            EntityType::CreditCard => "credit_card",
            EntityType::Email => "email",
            EntityType::Phone => "phone",
            EntityType::IpAddress => "ip_address",
            EntityType::CaseNumber => "case_number",
            EntityType::MedicalRecordNumber => "medical_record_number",
            EntityType::PersonName => "person_name",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
            EntityType::Other => "other",
        };
        f.write_str(name)
    }
}

/// One detection strategy in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Pattern,
    ContextModel,
    External,
}

impl Layer {
    /// Arbitration priority: External > ContextModel > Pattern.
    pub fn priority(&self) -> u8 {
        match self {
            Layer::Pattern => 0,
            Layer::ContextModel => 1,
            Layer::External => 2,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Pattern => "pattern",
            Layer::ContextModel => "context_model",
            Layer::External => "external",
        };
        f.write_str(name)
    }
}

/// A type claim that lost arbitration but is kept as metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternateType {
    pub entity_type: EntityType,
    pub layer: Layer,
    pub confidence: f64,
}

/// A single detected piece of PII with character offsets into the
/// original text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub confidence: f64,
    pub sources: BTreeSet<Layer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternate_types: Vec<AlternateType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

impl Entity {
    pub fn new(
        entity_type: EntityType,
        start: usize,
        end: usize,
        text: impl Into<String>,
        confidence: f64,
        layer: Layer,
    ) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(layer);
        Self {
            entity_type,
            start,
            end,
            text: text.into(),
            confidence,
            sources,
            alternate_types: Vec::new(),
            replacement: None,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Entity) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Overlap measured against the shorter of the two spans, so a short
    /// span fully inside a long one counts as a full overlap.
    pub fn overlap_fraction(&self, other: &Entity) -> f64 {
        let overlap = self.end.min(other.end).saturating_sub(self.start.max(other.start));
        if overlap == 0 {
            return 0.0;
        }
        let shorter = self.len().min(other.len());
        if shorter == 0 {
            return 0.0;
        }
        overlap as f64 / shorter as f64
    }

    /// The layer with the highest arbitration priority among this
    /// entity's sources.
    pub fn top_source(&self) -> Layer {
        self.sources
            .iter()
            .copied()
            .max_by_key(|l| l.priority())
            .unwrap_or(Layer::Pattern)
    }
}

/// Outcome of one detection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Ordered by start offset, guaranteed non-overlapping.
    pub entities: Vec<Entity>,
    /// Layers that actually produced results for this call.
    pub layers_used: BTreeSet<Layer>,
    /// True when an enabled layer was unavailable and the call completed
    /// on the remaining layers.
    pub fallback_used: bool,
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_detection() {
        let a = Entity::new(EntityType::Email, 10, 20, "a@b.com", 0.9, Layer::Pattern);
        let b = Entity::new(EntityType::Email, 15, 25, "b@c.com", 0.9, Layer::External);
        let c = Entity::new(EntityType::Phone, 20, 30, "555-123-4567", 0.9, Layer::Pattern);

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_overlap_fraction_contained_span() {
        let outer = Entity::new(EntityType::PersonName, 0, 20, "John Smith Jr", 0.8, Layer::External);
        let inner = Entity::new(EntityType::PersonName, 0, 10, "John Smith", 0.7, Layer::ContextModel);

        // Fully contained span measures against the shorter one.
        assert_eq!(inner.overlap_fraction(&outer), 1.0);
        assert_eq!(outer.overlap_fraction(&inner), 1.0);
    }

    #[test]
    fn test_overlap_fraction_partial() {
        let a = Entity::new(EntityType::Location, 0, 10, "Springfield", 0.6, Layer::ContextModel);
        let b = Entity::new(EntityType::Location, 5, 15, "field Mass", 0.6, Layer::External);

        assert!((a.overlap_fraction(&b) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_layer_priority_ordering() {
        assert!(Layer::External.priority() > Layer::ContextModel.priority());
        assert!(Layer::ContextModel.priority() > Layer::Pattern.priority());
    }

    #[test]
    fn test_top_source() {
        let mut e = Entity::new(EntityType::Email, 0, 5, "x@y.z", 0.9, Layer::Pattern);
        e.sources.insert(Layer::External);
        assert_eq!(e.top_source(), Layer::External);
    }

    #[test]
    fn test_mask_tokens_are_bracketed() {
        for t in [
            EntityType::Ssn,
            EntityType::Email,
            EntityType::PersonName,
            EntityType::Other,
        ] {
            let mask = t.mask_token();
            assert!(mask.starts_with('[') && mask.ends_with(']'));
        }
    }

    #[test]
    fn test_structural_types_bypass_exclusions() {
        assert!(EntityType::Ssn.is_structural());
        assert!(EntityType::Email.is_structural());
        assert!(EntityType::CreditCard.is_structural());
        assert!(EntityType::Phone.is_structural());
        assert!(!EntityType::PersonName.is_structural());
        assert!(!EntityType::Location.is_structural());
        assert!(!EntityType::Organization.is_structural());
    }

    #[test]
    fn test_entity_type_serde_round_trip() {
        let json = serde_json::to_string(&EntityType::MedicalRecordNumber).unwrap();
        assert_eq!(json, "\"medical_record_number\"");
        let back: EntityType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EntityType::MedicalRecordNumber);
    }
}
