use crate::project::Project;
use crate::provider::AiMessage;
use crate::schema::SlideContent;

/// Uploaded documents are cut to this many characters before prompting.
pub const MAX_UPLOADED_CHARS: usize = 12_000;

const OUTLINE_INTRO: &str = "You are a presentation designer. You plan slide decks that are clear, well structured and suited to their audience.";
const OUTLINE_FORMAT: &str = "Respond with a single JSON object:\n{\"title\": \"deck title\", \"slides\": [{\"type\": \"title|agenda|section|content|list|chart|image|conclusion|thankyou\", \"title\": \"slide title\", \"subtitle\": \"optional\", \"bullet_points\": [\"optional\"]}], \"metadata\": {}}";
const OUTLINE_RULES: &[&str] = &[
    "Output JSON only. No markdown, no extra text.",
    "Start with a title slide and end with a conclusion or thank-you slide.",
    "Use between 6 and 15 slides unless the requirements say otherwise.",
    "Slide titles are short; details go in bullet points.",
];

const SLIDE_INTRO: &str = "You write the content of one slide of a presentation.";
const SLIDE_FORMAT: &str = "Respond with a single JSON object:\n{\"title\": \"slide title\", \"subtitle\": \"optional\", \"content\": \"one short paragraph\", \"bullet_points\": [\"3 to 6 points\"], \"image_suggestions\": [\"optional\"]}";
const SLIDE_RULES: &[&str] = &[
    "Output JSON only. No markdown fences, no extra keys.",
    "Keep the slide title unless it is clearly wrong.",
    "Bullet points are at most 15 words each.",
];

fn bullet_list(rules: &[&str]) -> String {
    rules
        .iter()
        .map(|rule| format!("- {}", rule))
        .collect::<Vec<_>>()
        .join("\n")
}

fn language_instruction(language: &str) -> &'static str {
    if language.starts_with("zh") {
        "Write all slide text in Simplified Chinese."
    } else {
        "Write all slide text in English."
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_outline_system_prompt(language: &str) -> String {
    format!(
        "{intro}\n\n{format}\n\nRules:\n{rules}\n- {language}\n",
        intro = OUTLINE_INTRO,
        format = OUTLINE_FORMAT,
        rules = bullet_list(OUTLINE_RULES),
        language = language_instruction(language),
    )
}

/// Everything the project knows about the deck, as one user message.
pub fn build_outline_request(project: &Project) -> String {
    let mut lines = vec![
        format!("Topic: {}", project.topic),
        format!("Scenario: {}", project.scenario),
    ];
    if let Some(requirements) = &project.requirements {
        lines.push(format!("Requirements: {}", requirements));
    }
    for (key, label) in [
        ("target_audience", "Target audience"),
        ("ppt_style", "Style"),
        ("custom_style_prompt", "Style notes"),
        ("description", "Description"),
    ] {
        if let Some(value) = project.metadata(key).and_then(|v| v.as_str()) {
            lines.push(format!("{}: {}", label, value));
        }
    }
    if let Some(content) = project
        .metadata("uploaded_content")
        .and_then(|v| v.as_str())
    {
        lines.push(format!(
            "Source material:\n{}",
            truncate_chars(content, MAX_UPLOADED_CHARS)
        ));
    }
    lines.join("\n")
}

pub fn outline_messages(project: &Project) -> Vec<AiMessage> {
    vec![
        AiMessage::system(build_outline_system_prompt(project.language())),
        AiMessage::user(build_outline_request(project)),
    ]
}

pub fn build_slide_system_prompt(language: &str) -> String {
    format!(
        "{intro}\n\n{format}\n\nRules:\n{rules}\n- {language}\n",
        intro = SLIDE_INTRO,
        format = SLIDE_FORMAT,
        rules = bullet_list(SLIDE_RULES),
        language = language_instruction(language),
    )
}

/// The slide to write, with its place in the deck.
pub fn slide_messages(
    project: &Project,
    deck_title: &str,
    slide: &SlideContent,
    index: usize,
    total: usize,
) -> Vec<AiMessage> {
    let mut request = format!(
        "Deck: {deck_title}\nTopic: {topic}\nSlide {n} of {total}\nType: {kind}\nTitle: {title}",
        topic = project.topic,
        n = index + 1,
        kind = serde_json::to_value(slide.slide_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        title = slide.title,
    );
    if let Some(points) = &slide.bullet_points
        && !points.is_empty()
    {
        request.push_str("\nOutline points:\n");
        request.push_str(&bullet_list(
            &points.iter().map(String::as_str).collect::<Vec<_>>(),
        ));
    }

    vec![
        AiMessage::system(build_slide_system_prompt(project.language())),
        AiMessage::user(request),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PptGenerationRequest, SlideType};

    fn project(language: &str) -> Project {
        let mut request = PptGenerationRequest::new("business", "Quarterly review");
        request.language = language.to_string();
        request.requirements = Some("Focus on revenue".to_string());
        request.target_audience = Some("board members".to_string());
        Project::from_request(&request)
    }

    #[test]
    fn outline_prompt_mentions_format_and_language() {
        let prompt = build_outline_system_prompt("zh");
        assert!(prompt.contains("\"slides\""));
        assert!(prompt.contains("Simplified Chinese"));
        assert!(prompt.contains("- Output JSON only."));
        assert!(build_outline_system_prompt("en").contains("in English"));
    }

    #[test]
    fn outline_request_collects_project_fields() {
        let request = build_outline_request(&project("en"));
        assert!(request.starts_with("Topic: Quarterly review\nScenario: business"));
        assert!(request.contains("Requirements: Focus on revenue"));
        assert!(request.contains("Target audience: board members"));
        assert!(request.contains("Style: general"));
        assert!(!request.contains("Source material"));
    }

    #[test]
    fn uploaded_content_is_truncated() {
        let mut request = PptGenerationRequest::new("general", "Docs");
        request.use_file_content = true;
        request.uploaded_content = Some("字".repeat(MAX_UPLOADED_CHARS + 10));
        let text = build_outline_request(&Project::from_request(&request));
        let material = text.split("Source material:\n").nth(1).unwrap();
        assert_eq!(material.chars().count(), MAX_UPLOADED_CHARS);
    }

    #[test]
    fn outline_messages_are_system_then_user() {
        let messages = outline_messages(&project("en"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, crate::provider::MessageRole::System);
        assert_eq!(messages[1].role, crate::provider::MessageRole::User);
    }

    #[test]
    fn slide_request_places_slide_in_deck() {
        let mut slide = SlideContent::new(SlideType::Agenda, "Agenda");
        slide.bullet_points = Some(vec!["Results".to_string(), "Outlook".to_string()]);
        let messages = slide_messages(&project("en"), "Q3", &slide, 1, 8);
        let user = messages[1].content.to_text();
        assert!(user.contains("Deck: Q3"));
        assert!(user.contains("Slide 2 of 8"));
        assert!(user.contains("Type: agenda"));
        assert!(user.contains("- Results\n- Outlook"));
    }
}
