//! Pulling a JSON object out of free-form model output.

/// Strip a surrounding markdown fence (```` ```json ```` or bare ```` ``` ````).
fn strip_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// The JSON object inside `text`, tolerating code fences and chatter
/// around it. Returns the trimmed input when no object bounds are found,
/// so the caller's parser reports the error.
pub fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }

    let body = strip_fence(trimmed).unwrap_or(trimmed);
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => trimmed,
    }
}
