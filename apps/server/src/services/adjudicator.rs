//! LLM adjudication of retrieval candidates
//!
//! The adjudicator receives the source concept and the top candidates and
//! returns a structured judgment. The model may wrap its JSON in prose; we
//! extract the first balanced object and parse that. Anything else is an
//! adjudicator failure and the pipeline falls back to the top candidate.

use crate::config::ModelsConfig;
use crate::models::{Candidate, Equivalence, SourceCode};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Structured judgment from the model.
#[derive(Debug, Clone)]
pub struct Adjudication {
    /// One of the candidate codes, or None when the model finds no match.
    pub selected_code: Option<String>,
    pub confidence: f64,
    pub equivalence: Equivalence,
    pub reasoning: String,
}

#[async_trait]
pub trait Adjudicator: Send + Sync {
    async fn adjudicate(
        &self,
        source: &SourceCode,
        candidates: &[Candidate],
    ) -> Result<Adjudication>;
}

pub struct GeminiAdjudicator {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
}

impl GeminiAdjudicator {
    pub fn new(config: &ModelsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.generate_timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.generation_model.clone(),
            max_output_tokens: config.max_output_tokens,
        }
    }
}

#[async_trait]
impl Adjudicator for GeminiAdjudicator {
    async fn adjudicate(
        &self,
        source: &SourceCode,
        candidates: &[Candidate],
    ) -> Result<Adjudication> {
        let prompt = build_prompt(source, candidates);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": {
                    "temperature": 0.1,
                    "maxOutputTokens": self.max_output_tokens,
                },
            }))
            .send()
            .await
            .map_err(|e| Error::UpstreamModel(format!("generateContent request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamModel(format!(
                "generateContent returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::UpstreamModel(format!("generateContent body unreadable: {e}")))?;

        let text = body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| Error::UpstreamModel("generateContent response has no text".into()))?;

        parse_judgment(text)
    }
}

/// Compact, fixed prompt. Candidate definitions are truncated so the prompt
/// stays bounded regardless of catalog verbosity.
fn build_prompt(source: &SourceCode, candidates: &[Candidate]) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(
        "You are a medical terminology expert mapping traditional-medicine concepts \
         to ICD-11 Traditional Medicine Module 2.\n\nSource concept:\n",
    );
    prompt.push_str(&format!(
        "- code: {}\n- system: {}\n- term: {}\n",
        source.code, source.system, source.term
    ));
    if let Some(english) = &source.english_name {
        prompt.push_str(&format!("- english name: {english}\n"));
    }
    if let Some(definition) = &source.short_definition {
        prompt.push_str(&format!("- definition: {}\n", truncate(definition, 300)));
    }

    prompt.push_str("\nCandidate ICD-11 TM2 codes:\n");
    for candidate in candidates {
        let definition = candidate
            .target
            .definition
            .as_deref()
            .map(|d| truncate(d, 200))
            .unwrap_or_default();
        prompt.push_str(&format!(
            "- {} | {} | {}\n",
            candidate.target.code, candidate.target.title, definition
        ));
    }

    prompt.push_str(
        "\nPick the best candidate, or null if none fits. Respond with ONLY a JSON object:\n\
         {\"selected_code\": \"<candidate code or null>\", \"confidence\": <0.0-1.0>, \
         \"equivalence\": \"EQUIVALENT|WIDER|NARROWER|INEXACT|UNMATCHED\", \
         \"reasoning\": \"<one short sentence>\"}\n",
    );
    prompt
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    selected_code: Option<String>,
    confidence: f64,
    equivalence: String,
    #[serde(default)]
    reasoning: String,
}

/// Parse the model's free-form reply into an [`Adjudication`].
pub fn parse_judgment(text: &str) -> Result<Adjudication> {
    let object = extract_first_json_object(text)
        .ok_or_else(|| Error::UpstreamModel("no JSON object in adjudicator reply".into()))?;

    let raw: RawJudgment = serde_json::from_str(object)
        .map_err(|e| Error::UpstreamModel(format!("adjudicator JSON malformed: {e}")))?;

    let equivalence: Equivalence = raw
        .equivalence
        .parse()
        .map_err(|e: String| Error::UpstreamModel(format!("adjudicator equivalence: {e}")))?;

    // Models occasionally return the string "null" instead of a JSON null.
    let selected_code = raw
        .selected_code
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("null"));

    Ok(Adjudication {
        selected_code,
        confidence: raw.confidence.clamp(0.0, 1.0),
        equivalence,
        reasoning: raw.reasoning,
    })
}

/// Locate the first balanced `{…}` in `text`, respecting string literals and
/// escapes.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RetrievalOrigin, SourceSystem, TargetCode};
    use uuid::Uuid;

    fn target(code: &str, title: &str) -> TargetCode {
        TargetCode {
            id: Uuid::new_v4(),
            code: code.to_string(),
            title: title.to_string(),
            definition: Some("A disorder of long standing".to_string()),
            category: None,
            parent_code: None,
            synonyms: vec![],
            inclusions: vec![],
            exclusions: vec![],
            traditional_systems: vec![],
            embedding: None,
        }
    }

    #[test]
    fn extracts_object_from_prose() {
        let text = "Sure! Here is the mapping:\n```json\n{\"selected_code\": \"SK00.0\", \
                    \"confidence\": 0.82, \"equivalence\": \"EQUIVALENT\", \
                    \"reasoning\": \"Same concept\"}\n```\nHope that helps.";
        let judgment = parse_judgment(text).unwrap();
        assert_eq!(judgment.selected_code.as_deref(), Some("SK00.0"));
        assert_eq!(judgment.equivalence, Equivalence::Equivalent);
        assert!((judgment.confidence - 0.82).abs() < 1e-9);
    }

    #[test]
    fn handles_nested_objects_and_braces_in_strings() {
        let text = "{\"selected_code\": \"SK01\", \"confidence\": 1.5, \
                    \"equivalence\": \"narrower\", \
                    \"reasoning\": \"matches {partially} see \\\"note\\\"\"}";
        let judgment = parse_judgment(text).unwrap();
        assert_eq!(judgment.selected_code.as_deref(), Some("SK01"));
        // Out-of-range confidence is clamped into [0, 1].
        assert!((judgment.confidence - 1.0).abs() < 1e-9);
        assert_eq!(judgment.equivalence, Equivalence::Narrower);
    }

    #[test]
    fn null_selected_code_means_no_match() {
        let text = "{\"selected_code\": null, \"confidence\": 0.2, \
                    \"equivalence\": \"UNMATCHED\", \"reasoning\": \"nothing fits\"}";
        let judgment = parse_judgment(text).unwrap();
        assert!(judgment.selected_code.is_none());

        let text = "{\"selected_code\": \"null\", \"confidence\": 0.2, \
                    \"equivalence\": \"UNMATCHED\", \"reasoning\": \"nothing fits\"}";
        assert!(parse_judgment(text).unwrap().selected_code.is_none());
    }

    #[test]
    fn missing_json_is_a_failure() {
        assert!(parse_judgment("I could not decide, sorry.").is_err());
        assert!(parse_judgment("{\"selected_code\": ").is_err());
    }

    #[test]
    fn unknown_equivalence_is_a_failure() {
        let text = "{\"selected_code\": \"SK00\", \"confidence\": 0.5, \
                    \"equivalence\": \"SIMILAR\", \"reasoning\": \"close\"}";
        assert!(parse_judgment(text).is_err());
    }

    #[test]
    fn prompt_is_bounded_and_names_candidates() {
        let source = SourceCode {
            id: Uuid::new_v4(),
            code: "AAA-1".to_string(),
            system: SourceSystem::Ayurveda,
            term: "vātaroga".to_string(),
            term_normalized: None,
            native_script: None,
            short_definition: Some("d".repeat(5_000)),
            long_definition: None,
            english_name: Some("wind disorder".to_string()),
            searchable_text: None,
            embedding: None,
        };
        let candidates = vec![
            Candidate {
                target: target("SK00.0", "Wind pattern disorder"),
                score: 0.6,
                origin: RetrievalOrigin::Vector,
            },
            Candidate {
                target: target("SK01.2", "Dampness pattern"),
                score: 0.5,
                origin: RetrievalOrigin::Vector,
            },
        ];
        let prompt = build_prompt(&source, &candidates);
        assert!(prompt.contains("SK00.0"));
        assert!(prompt.contains("SK01.2"));
        // Source definition is truncated, so the prompt stays small.
        assert!(prompt.len() < 3_000);
    }
}
