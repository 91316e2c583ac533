pub mod ppt;

/// Pull the JSON document out of a model reply.
///
/// Handles ```json fences, plain fences, and replies that wrap the object
/// in prose. Falls back to the trimmed input.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(after) = trimmed.strip_prefix("```json")
        && let Some(json) = after.strip_suffix("```")
    {
        return json.trim();
    }
    if let Some(after) = trimmed.strip_prefix("```")
        && let Some(json) = after.strip_suffix("```")
    {
        return json.trim();
    }

    if !trimmed.starts_with('{')
        && let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        return &trimmed[start..=end];
    }

    trimmed
}
