//! Code catalogs and mapping rows
//!
//! These mirror the `source_codes`, `target_codes` and `mappings` tables.
//! Enum-valued columns are stored as TEXT and decoded via `TryFrom<String>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A traditional-medicine source catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    Ayurveda,
    Siddha,
    Unani,
}

impl SourceSystem {
    pub const ALL: [SourceSystem; 3] = [
        SourceSystem::Ayurveda,
        SourceSystem::Siddha,
        SourceSystem::Unani,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Ayurveda => "ayurveda",
            SourceSystem::Siddha => "siddha",
            SourceSystem::Unani => "unani",
        }
    }

    /// BCP-47 language of the native designation for this catalog.
    pub fn designation_language(&self) -> &'static str {
        match self {
            SourceSystem::Ayurveda => "sa",
            SourceSystem::Siddha => "ta",
            SourceSystem::Unani => "ur",
        }
    }

    /// Canonical CodeSystem URI for FHIR payloads.
    pub fn system_uri(&self) -> String {
        format!("https://ayush.gov.in/fhir/CodeSystem/namaste-{}", self.as_str())
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ayurveda" => Ok(SourceSystem::Ayurveda),
            "siddha" => Ok(SourceSystem::Siddha),
            "unani" => Ok(SourceSystem::Unani),
            other => Err(format!(
                "Unknown system '{other}' (expected ayurveda, siddha or unani)"
            )),
        }
    }
}

impl TryFrom<String> for SourceSystem {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// FHIR-style relationship between a source concept and its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Equivalence {
    Equivalent,
    Wider,
    Narrower,
    Inexact,
    Unmatched,
    Disjoint,
}

impl Equivalence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Equivalence::Equivalent => "EQUIVALENT",
            Equivalence::Wider => "WIDER",
            Equivalence::Narrower => "NARROWER",
            Equivalence::Inexact => "INEXACT",
            Equivalence::Unmatched => "UNMATCHED",
            Equivalence::Disjoint => "DISJOINT",
        }
    }

    /// Lowercase code used in ConceptMap `$translate` matches.
    pub fn fhir_code(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl std::str::FromStr for Equivalence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EQUIVALENT" => Ok(Equivalence::Equivalent),
            "WIDER" => Ok(Equivalence::Wider),
            "NARROWER" => Ok(Equivalence::Narrower),
            "INEXACT" => Ok(Equivalence::Inexact),
            "UNMATCHED" => Ok(Equivalence::Unmatched),
            "DISJOINT" => Ok(Equivalence::Disjoint),
            other => Err(format!("Unknown equivalence '{other}'")),
        }
    }
}

impl TryFrom<String> for Equivalence {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Provenance of a mapping row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingSource {
    Deterministic,
    Semantic,
    AiValidated,
    HumanValidated,
}

impl MappingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingSource::Deterministic => "DETERMINISTIC",
            MappingSource::Semantic => "SEMANTIC",
            MappingSource::AiValidated => "AI_VALIDATED",
            MappingSource::HumanValidated => "HUMAN_VALIDATED",
        }
    }
}

impl std::str::FromStr for MappingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DETERMINISTIC" => Ok(MappingSource::Deterministic),
            "SEMANTIC" => Ok(MappingSource::Semantic),
            "AI_VALIDATED" => Ok(MappingSource::AiValidated),
            "HUMAN_VALIDATED" => Ok(MappingSource::HumanValidated),
            other => Err(format!("Unknown mapping source '{other}'")),
        }
    }
}

impl TryFrom<String> for MappingSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
    NeedsReview,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "PENDING",
            ValidationStatus::Approved => "APPROVED",
            ValidationStatus::Rejected => "REJECTED",
            ValidationStatus::NeedsReview => "NEEDS_REVIEW",
        }
    }
}

impl std::str::FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ValidationStatus::Pending),
            "APPROVED" => Ok(ValidationStatus::Approved),
            "REJECTED" => Ok(ValidationStatus::Rejected),
            "NEEDS_REVIEW" => Ok(ValidationStatus::NeedsReview),
            other => Err(format!("Unknown validation status '{other}'")),
        }
    }
}

impl TryFrom<String> for ValidationStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Row from `source_codes`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SourceCode {
    pub id: Uuid,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub system: SourceSystem,
    pub term: String,
    pub term_normalized: Option<String>,
    pub native_script: Option<String>,
    pub short_definition: Option<String>,
    pub long_definition: Option<String>,
    pub english_name: Option<String>,
    pub searchable_text: Option<String>,
    #[serde(skip)]
    pub embedding: Option<pgvector::Vector>,
}

/// Row from `target_codes` (ICD-11 TM2 catalog).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TargetCode {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub definition: Option<String>,
    pub category: Option<String>,
    pub parent_code: Option<String>,
    pub synonyms: Vec<String>,
    pub inclusions: Vec<String>,
    pub exclusions: Vec<String>,
    pub traditional_systems: Vec<String>,
    #[serde(skip)]
    pub embedding: Option<pgvector::Vector>,
}

/// Row from `mappings`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Mapping {
    pub id: Uuid,
    pub source_code_id: Uuid,
    pub target_code_id: Uuid,
    #[sqlx(try_from = "String")]
    pub equivalence: Equivalence,
    pub confidence: f64,
    #[sqlx(try_from = "String")]
    pub mapping_source: MappingSource,
    #[sqlx(try_from = "String")]
    pub validation_status: ValidationStatus,
    pub validator: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing row joining a mapping to its source and target codes.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MappingListRow {
    pub id: Uuid,
    pub source_code: String,
    #[sqlx(try_from = "String")]
    pub source_system: SourceSystem,
    pub source_term: String,
    pub source_english_name: Option<String>,
    pub target_code: String,
    pub target_title: String,
    #[sqlx(try_from = "String")]
    pub equivalence: Equivalence,
    pub confidence: f64,
    #[sqlx(try_from = "String")]
    pub mapping_source: MappingSource,
    #[sqlx(try_from = "String")]
    pub validation_status: ValidationStatus,
    pub validator: Option<String>,
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate mapping statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MappingStats {
    pub total: i64,
    pub by_mapping_source: Vec<(String, i64)>,
    pub by_validation_status: Vec<(String, i64)>,
    pub average_confidence: Option<f64>,
}

/// Where a retrieval candidate came from, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalOrigin {
    Vector,
    FullText,
    Keyword,
}

/// Ranked target candidate produced by the retriever.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub target: TargetCode,
    pub score: f64,
    pub origin: RetrievalOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_roundtrip_and_language() {
        for system in SourceSystem::ALL {
            let parsed: SourceSystem = system.as_str().parse().unwrap();
            assert_eq!(parsed, system);
        }
        assert_eq!(SourceSystem::Ayurveda.designation_language(), "sa");
        assert_eq!(SourceSystem::Siddha.designation_language(), "ta");
        assert_eq!(SourceSystem::Unani.designation_language(), "ur");
        assert!("homeopathy".parse::<SourceSystem>().is_err());
    }

    #[test]
    fn equivalence_parses_case_insensitively() {
        assert_eq!(
            "narrower".parse::<Equivalence>().unwrap(),
            Equivalence::Narrower
        );
        assert_eq!(Equivalence::Equivalent.fhir_code(), "equivalent");
        assert!("sideways".parse::<Equivalence>().is_err());
    }

    #[test]
    fn mapping_source_serializes_screaming_snake() {
        let json = serde_json::to_string(&MappingSource::AiValidated).unwrap();
        assert_eq!(json, "\"AI_VALIDATED\"");
        assert_eq!(
            "ai_validated".parse::<MappingSource>().unwrap(),
            MappingSource::AiValidated
        );
    }
}
