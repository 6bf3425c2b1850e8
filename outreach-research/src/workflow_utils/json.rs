//! JSON utilities for extracting and parsing model output

/// Extract a JSON object from markdown code blocks or raw text
///
/// Handles:
/// - ```json blocks
/// - Generic ``` blocks
/// - Prose around a bare object (first `{` to last `}`)
pub fn extract_json(text: &str) -> String {
    if let Some(block) = fenced_block(text, "```json") {
        return block;
    }
    if let Some(block) = fenced_block(text, "```") {
        return block;
    }

    let trimmed = text.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

fn fenced_block(text: &str, fence: &str) -> Option<String> {
    let start = text.find(fence)? + fence.len();
    let rest = &text[start..];
    // skip a language tag on the opening fence line
    let body_start = if fence == "```" {
        rest.find('\n').map(|pos| pos + 1).unwrap_or(0)
    } else {
        0
    };
    let body = &rest[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(body[..end].trim().to_string())
}
