//! FHIR R4 façade
//!
//! Thin translator between store contents / pipeline output and the three
//! terminology operations (`CodeSystem/$lookup`, `ConceptMap/$translate`,
//! `ValueSet/$expand`) plus the CapabilityStatement and CodeSystem reads
//! that give them a browsable parent. The façade holds no state of its own.

use crate::db::{SourceCodeRepository, TargetCodeRepository};
use crate::models::{SourceCode, SourceSystem, TargetCode};
use crate::services::mapping::{TranslateOutcome, TranslateService};
use crate::{Error, Result};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// Canonical URI of the ICD-11 target catalog.
pub const TARGET_SYSTEM_URI: &str = "http://id.who.int/icd/release/11/mms";

pub struct FhirService {
    sources: SourceCodeRepository,
    targets: TargetCodeRepository,
    translate: Arc<TranslateService>,
    base_url: String,
}

impl FhirService {
    pub fn new(
        sources: SourceCodeRepository,
        targets: TargetCodeRepository,
        translate: Arc<TranslateService>,
        base_url: String,
    ) -> Self {
        Self {
            sources,
            targets,
            translate,
            base_url,
        }
    }

    pub fn capability_statement(&self) -> JsonValue {
        json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "date": chrono::Utc::now().to_rfc3339(),
            "kind": "instance",
            "software": {
                "name": "setu",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "implementation": {
                "description": "NAMASTE to ICD-11 TM2 terminology bridge",
                "url": format!("{}/fhir", self.base_url),
            },
            "fhirVersion": "4.0.1",
            "format": ["application/fhir+json"],
            "rest": [{
                "mode": "server",
                "resource": [
                    {
                        "type": "CodeSystem",
                        "interaction": [{ "code": "read" }, { "code": "search-type" }],
                        "operation": [{
                            "name": "lookup",
                            "definition": "http://hl7.org/fhir/OperationDefinition/CodeSystem-lookup"
                        }]
                    },
                    {
                        "type": "ConceptMap",
                        "operation": [{
                            "name": "translate",
                            "definition": "http://hl7.org/fhir/OperationDefinition/ConceptMap-translate"
                        }]
                    },
                    {
                        "type": "ValueSet",
                        "operation": [{
                            "name": "expand",
                            "definition": "http://hl7.org/fhir/OperationDefinition/ValueSet-expand"
                        }]
                    }
                ]
            }]
        })
    }

    /// Bundle of the four known CodeSystems with concept counts.
    pub async fn list_code_systems(&self) -> Result<JsonValue> {
        let mut entries = Vec::new();
        for system in SourceSystem::ALL {
            let count = self.sources.count_by_system(system).await?;
            entries.push(json!({ "resource": source_code_system(system, count) }));
        }
        let target_count = self.targets.count().await?;
        entries.push(json!({ "resource": target_code_system(target_count) }));

        Ok(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": entries.len(),
            "entry": entries,
        }))
    }

    pub async fn read_code_system(&self, id: &str) -> Result<JsonValue> {
        if let Some(name) = id.strip_prefix("namaste-") {
            let system: SourceSystem = name
                .parse()
                .map_err(|_| Error::NotFound(format!("CodeSystem {id} not found")))?;
            let count = self.sources.count_by_system(system).await?;
            return Ok(source_code_system(system, count));
        }
        if id == "icd11-tm2" {
            let count = self.targets.count().await?;
            return Ok(target_code_system(count));
        }
        Err(Error::NotFound(format!("CodeSystem {id} not found")))
    }

    /// `CodeSystem/$lookup`. `system` accepts either a canonical URI or a
    /// catalog name; source concepts carry a native-language designation.
    pub async fn lookup(&self, system: &str, code: &str) -> Result<JsonValue> {
        if system == TARGET_SYSTEM_URI || system.eq_ignore_ascii_case("icd11-tm2") {
            let target = self
                .targets
                .find(code)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Code {code} not found in ICD-11 TM2")))?;
            return Ok(target_lookup_parameters(&target));
        }

        let source_system = resolve_source_system(system)
            .ok_or_else(|| Error::NotFound(format!("Unknown code system '{system}'")))?;
        let source = self
            .sources
            .find(code, source_system)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Code {code} not found in {source_system}"))
            })?;

        Ok(source_lookup_parameters(&source))
    }

    /// `ConceptMap/$translate`: same decision path (and cache) as the
    /// plain translate endpoint, reshaped as Parameters.
    pub async fn translate(&self, code: &str, system: SourceSystem) -> Result<JsonValue> {
        let outcome = self.translate.translate(code, system).await?;
        Ok(translate_parameters(&outcome))
    }

    /// `ValueSet/$expand` over the source catalogs with substring filter.
    pub async fn expand(
        &self,
        filter: Option<&str>,
        system: Option<SourceSystem>,
        count: i64,
        offset: i64,
    ) -> Result<JsonValue> {
        let (total, rows) = self.sources.expand(filter, system, count, offset).await?;

        let contains: Vec<JsonValue> = rows
            .iter()
            .map(|row| {
                json!({
                    "system": row.system.system_uri(),
                    "code": row.code,
                    "display": row.english_name.as_deref().unwrap_or(&row.term),
                })
            })
            .collect();

        Ok(json!({
            "resourceType": "ValueSet",
            "status": "active",
            "expansion": {
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "total": total,
                "offset": offset,
                "contains": contains,
            }
        }))
    }
}

fn resolve_source_system(system: &str) -> Option<SourceSystem> {
    if let Ok(parsed) = system.parse::<SourceSystem>() {
        return Some(parsed);
    }
    SourceSystem::ALL
        .into_iter()
        .find(|s| s.system_uri() == system || system.ends_with(&format!("namaste-{}", s.as_str())))
}

fn source_code_system(system: SourceSystem, count: i64) -> JsonValue {
    json!({
        "resourceType": "CodeSystem",
        "id": format!("namaste-{}", system.as_str()),
        "url": system.system_uri(),
        "name": format!("NAMASTE{}", capitalize(system.as_str())),
        "title": format!("NAMASTE {} terminology", capitalize(system.as_str())),
        "status": "active",
        "content": "complete",
        "count": count,
    })
}

fn target_code_system(count: i64) -> JsonValue {
    json!({
        "resourceType": "CodeSystem",
        "id": "icd11-tm2",
        "url": TARGET_SYSTEM_URI,
        "name": "ICD11TM2",
        "title": "ICD-11 Traditional Medicine Module 2",
        "status": "active",
        "content": "fragment",
        "count": count,
    })
}

fn source_lookup_parameters(source: &SourceCode) -> JsonValue {
    let mut parameters = vec![
        value_string("name", &format!("NAMASTE{}", capitalize(source.system.as_str()))),
        value_string(
            "display",
            source.english_name.as_deref().unwrap_or(&source.term),
        ),
    ];

    if let Some(definition) = source
        .short_definition
        .as_deref()
        .or(source.long_definition.as_deref())
    {
        parameters.push(value_string("definition", definition));
    }

    parameters.push(json!({
        "name": "designation",
        "part": [
            { "name": "language", "valueCode": source.system.designation_language() },
            {
                "name": "value",
                "valueString": source.native_script.as_deref().unwrap_or(&source.term)
            },
        ]
    }));

    json!({
        "resourceType": "Parameters",
        "parameter": parameters,
    })
}

fn target_lookup_parameters(target: &TargetCode) -> JsonValue {
    let mut parameters = vec![
        value_string("name", "ICD11TM2"),
        value_string("display", &target.title),
    ];
    if let Some(definition) = &target.definition {
        parameters.push(value_string("definition", definition));
    }

    json!({
        "resourceType": "Parameters",
        "parameter": parameters,
    })
}

fn translate_parameters(outcome: &TranslateOutcome) -> JsonValue {
    let mapping = &outcome.mapping;
    let matched = outcome.matched && !mapping["target"].is_null();

    let mut parameters = vec![json!({ "name": "result", "valueBoolean": matched })];

    if matched {
        let equivalence = mapping["equivalence"]
            .as_str()
            .unwrap_or("INEXACT")
            .to_ascii_lowercase();
        let provenance = outcome
            .mapping_source
            .map(|s| s.as_str())
            .unwrap_or("AI_VALIDATED");
        parameters.push(json!({
            "name": "match",
            "part": [
                { "name": "equivalence", "valueCode": equivalence },
                {
                    "name": "concept",
                    "valueCoding": {
                        "system": TARGET_SYSTEM_URI,
                        "code": mapping["target"]["code"],
                        "display": mapping["target"]["title"],
                    }
                },
                { "name": "source", "valueString": provenance },
                { "name": "confidence", "valueDecimal": mapping["confidence"] },
            ]
        }));
    }

    json!({
        "resourceType": "Parameters",
        "parameter": parameters,
    })
}

fn value_string(name: &str, value: &str) -> JsonValue {
    json!({ "name": name, "valueString": value })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
