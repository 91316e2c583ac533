//! HTML rendering of generated slides.
//!
//! Slides are rendered locally with Tera; model output is always escaped
//! because both templates end in `.html`.

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use tera::{Context, Tera};

use crate::schema::{SlideContent, builtin_scenarios};

const SLIDE_TEMPLATE: &str = "slide.html";
const DECK_TEMPLATE: &str = "deck.html";

const SLIDE_HTML: &str = r#"<section class="slide slide-{{ slide.type }} layout-{{ slide.layout }}" data-index="{{ index }}">
  <h2>{{ slide.title }}</h2>
{%- if slide.subtitle %}
  <p class="subtitle">{{ slide.subtitle }}</p>
{%- endif %}
{%- if slide.content %}
  <p class="content">{{ slide.content }}</p>
{%- endif %}
{%- if slide.bullet_points %}
  <ul>
{%- for point in slide.bullet_points %}
    <li>{{ point }}</li>
{%- endfor %}
  </ul>
{%- endif %}
  <footer>{{ index + 1 }} / {{ total }}</footer>
</section>"#;

const DECK_HTML: &str = r#"<!DOCTYPE html>
<html lang="{{ language }}">
<head>
  <meta charset="utf-8">
  <title>{{ title }}</title>
</head>
<body class="deck theme-{{ theme }}">
{%- for section in sections %}
{{ section | safe }}
{%- endfor %}
</body>
</html>
"#;

/// Renders slides and whole decks.
pub struct SlideRenderer {
    tera: Tera,
}

impl SlideRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(SLIDE_TEMPLATE, SLIDE_HTML)
            .map_err(|e| anyhow!("Failed to add template '{}': {}", SLIDE_TEMPLATE, e))?;
        tera.add_raw_template(DECK_TEMPLATE, DECK_HTML)
            .map_err(|e| anyhow!("Failed to add template '{}': {}", DECK_TEMPLATE, e))?;
        Ok(Self { tera })
    }

    pub fn render_slide(&self, slide: &SlideContent, index: usize, total: usize) -> Result<String> {
        let mut ctx = Context::new();
        ctx.insert("slide", slide);
        ctx.insert("index", &index);
        ctx.insert("total", &total);
        self.tera
            .render(SLIDE_TEMPLATE, &ctx)
            .map_err(|e| anyhow!("Failed to render slide {}: {}", index + 1, e))
    }

    /// The full deck as one HTML document, plus the per-slide data that
    /// goes into `slides_data`.
    pub fn render_deck(
        &self,
        title: &str,
        slides: &[SlideContent],
        language: &str,
        scenario: &str,
    ) -> Result<(String, Vec<Map<String, Value>>)> {
        let total = slides.len();
        let mut sections = Vec::with_capacity(total);
        let mut data = Vec::with_capacity(total);

        for (index, slide) in slides.iter().enumerate() {
            let html = self.render_slide(slide, index, total)?;
            let mut entry = match serde_json::to_value(slide)? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            entry.insert("page_number".to_string(), Value::from(index + 1));
            entry.insert("html_content".to_string(), Value::from(html.clone()));
            sections.push(html);
            data.push(entry);
        }

        let mut ctx = Context::new();
        ctx.insert("title", title);
        ctx.insert("language", language);
        ctx.insert("theme", &theme_for(scenario));
        ctx.insert("sections", &sections);
        let deck = self
            .tera
            .render(DECK_TEMPLATE, &ctx)
            .map_err(|e| anyhow!("Failed to render deck: {}", e))?;
        Ok((deck, data))
    }
}

/// The scenario's theme, or `professional` for unknown scenarios.
fn theme_for(scenario: &str) -> String {
    builtin_scenarios()
        .into_iter()
        .find(|s| s.id == scenario)
        .and_then(|s| s.template_config.get("theme")?.as_str().map(str::to_string))
        .unwrap_or_else(|| "professional".to_string())
}
