//! Entity extraction
//!
//! Prompts the small tier for a strict JSON array of entities and parses the
//! response tolerantly: fences are stripped, the first array span is
//! recovered from chatter, and anything unparseable is treated as "no
//! entities" rather than an error.

use super::{ChatMessage, LlmClient, LlmResult, ModelTier};
use crate::cancel::CancellationToken;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You extract technical entities from developer documentation. Respond with a \
JSON array only, no prose. Each element must be an object with exactly these \
fields: \"name\" (string), \"type\" (string, e.g. framework, library, tool, \
api, pattern, language), \"description\" (string or null), \"aliases\" (array \
of strings). Return [] when the text mentions no identifiable entities.";

/// One extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Extracts structured entities from chunk text via the LLM.
pub struct EntityExtractor {
    llm: Arc<dyn LlmClient>,
    tier: ModelTier,
}

impl EntityExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            tier: ModelTier::Small,
        }
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    /// Extract entities from one chunk. Transport failures propagate;
    /// malformed model output never does.
    pub async fn extract(
        &self,
        chunk_text: &str,
        cancel: &CancellationToken,
    ) -> LlmResult<Vec<ExtractedEntity>> {
        let response = self
            .llm
            .generate(
                EXTRACTION_SYSTEM_PROMPT,
                &[ChatMessage::user(chunk_text)],
                self.tier,
                cancel,
            )
            .await?;
        Ok(parse_entities(&response))
    }
}

/// Parse a model response into entities, returning an empty list for
/// anything that is not a valid entity array.
fn parse_entities(response: &str) -> Vec<ExtractedEntity> {
    let cleaned = strip_code_fences(response.trim());
    if cleaned.is_empty() || cleaned == "null" {
        return Vec::new();
    }

    if let Ok(entities) = serde_json::from_str::<Vec<ExtractedEntity>>(cleaned) {
        return sanitize(entities);
    }

    // Models sometimes wrap the array in prose; recover the first span.
    if let (Some(start), Some(end)) = (cleaned.find('['), cleaned.rfind(']')) {
        if start < end {
            if let Ok(entities) =
                serde_json::from_str::<Vec<ExtractedEntity>>(&cleaned[start..=end])
            {
                return sanitize(entities);
            }
        }
    }

    let snippet: String = cleaned.chars().take(120).collect();
    tracing::warn!(%snippet, "entity extraction returned malformed JSON, treating as empty");
    Vec::new()
}

fn sanitize(entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    entities
        .into_iter()
        .filter(|e| !e.name.trim().is_empty())
        .collect()
}

/// Strip a surrounding ``` fence, with or without an info string.
fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn entity_json() -> &'static str {
        r#"[{"name":"React","type":"framework","description":"UI library","aliases":["ReactJS"]}]"#
    }

    #[tokio::test]
    async fn extracts_from_clean_json() {
        let llm = Arc::new(MockLlm::with_default(entity_json()));
        let extractor = EntityExtractor::new(llm);
        let cancel = CancellationToken::new();

        let entities = extractor.extract("chunk text", &cancel).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "React");
        assert_eq!(entities[0].entity_type, "framework");
        assert_eq!(entities[0].aliases, vec!["ReactJS"]);
    }

    #[test]
    fn parses_fenced_response() {
        let fenced = format!("```json\n{}\n```", entity_json());
        let entities = parse_entities(&fenced);
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn recovers_array_from_prose() {
        let chatty = format!("Here are the entities:\n{}\nLet me know!", entity_json());
        let entities = parse_entities(&chatty);
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn null_and_garbage_yield_empty() {
        assert!(parse_entities("null").is_empty());
        assert!(parse_entities("").is_empty());
        assert!(parse_entities("I could not find any entities.").is_empty());
        assert!(parse_entities("{\"name\":\"not an array\"}").is_empty());
        assert!(parse_entities("[{\"broken\":").is_empty());
    }

    #[test]
    fn missing_optional_fields_default() {
        let entities = parse_entities(r#"[{"name":"Tokio","type":"runtime"}]"#);
        assert_eq!(entities.len(), 1);
        assert!(entities[0].description.is_none());
        assert!(entities[0].aliases.is_empty());
    }

    #[test]
    fn blank_names_are_dropped() {
        let entities = parse_entities(r#"[{"name":"  ","type":"x"},{"name":"Axum","type":"framework"}]"#);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Axum");
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let llm = Arc::new(MockLlm::unavailable());
        let extractor = EntityExtractor::new(llm);
        let cancel = CancellationToken::new();
        assert!(extractor.extract("text", &cancel).await.is_err());
    }
}
