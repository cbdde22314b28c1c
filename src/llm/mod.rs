//! The LLM provider interface and the two prompt/response formats the
//! engine consumes (§6): topic naming and relationship classification.
//!
//! The LLM is an external collaborator (out of scope per the design — no
//! production backend ships in this crate). Parsing here is defensive:
//! malformed output degrades to the caller's documented fallback rather
//! than erroring, per the engine's failure semantics (§4.10 "Degrade").

use anyhow::Result;

pub trait LlmProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// A parsed topic-naming response. Absent fields mean the corresponding
/// line was not found in the LLM's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicNaming {
    pub name: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

/// Parse a topic-naming completion. Expects `NAME:`, `DESCRIPTION:`, and
/// `KEYWORDS:` (comma-separated) lines, matched case-insensitively by
/// prefix. Lines that don't match any prefix are ignored.
pub fn parse_topic_naming(response: &str) -> TopicNaming {
    let mut out = TopicNaming::default();

    for line in response.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();

        if let Some(rest) = strip_prefix_ci(trimmed, &lower, "name:") {
            out.name = Some(rest.trim().to_string());
        } else if let Some(rest) = strip_prefix_ci(trimmed, &lower, "description:") {
            out.description = Some(rest.trim().to_string());
        } else if let Some(rest) = strip_prefix_ci(trimmed, &lower, "keywords:") {
            out.keywords = rest
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
    }

    out
}

fn strip_prefix_ci<'a>(original: &'a str, lower: &str, prefix: &str) -> Option<&'a str> {
    lower
        .strip_prefix(prefix)
        .map(|_| &original[prefix.len()..])
}

/// The relationship a classification response can name; `None` maps to
/// `NONE` or any malformed output — neither links the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifiedRelationship {
    Contradicts,
    Supports,
    EvolvedFrom,
    RelatedTo,
}

/// Parse a `"<RELATIONSHIP> <CONFIDENCE>"` completion. Confidence is
/// clamped to `[0,1]`. Returns `None` when the relationship is `NONE`,
/// unrecognized, or the confidence is unparsable.
pub fn parse_relationship_classification(response: &str) -> Option<(ClassifiedRelationship, f64)> {
    let trimmed = response.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let rel = parts.next()?.to_ascii_uppercase();
    let confidence_str = parts.next()?.trim();
    let confidence: f64 = confidence_str.parse().ok()?;
    let confidence = confidence.clamp(0.0, 1.0);

    let rel = match rel.as_str() {
        "CONTRADICTS" => ClassifiedRelationship::Contradicts,
        "SUPPORTS" => ClassifiedRelationship::Supports,
        "EVOLVED_FROM" => ClassifiedRelationship::EvolvedFrom,
        "RELATED_TO" => ClassifiedRelationship::RelatedTo,
        _ => return None,
    };

    Some((rel, confidence))
}
