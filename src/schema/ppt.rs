use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::project::Project;

/// A preset that shapes tone and layout of a deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PptScenario {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    #[serde(default)]
    pub template_config: Map<String, Value>,
}

fn default_language() -> String {
    crate::consts::DEFAULT_LANGUAGE.to_string()
}

fn default_style() -> String {
    "general".to_string()
}

fn default_file_mode() -> String {
    "markitdown".to_string()
}

fn default_depth() -> String {
    "standard".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PptGenerationRequest {
    pub scenario: String,
    pub topic: String,
    #[serde(default)]
    pub requirements: Option<String>,
    #[serde(default)]
    pub network_mode: bool,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub uploaded_content: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    /// `general`, `conference` or `custom`.
    #[serde(default = "default_style")]
    pub ppt_style: String,
    #[serde(default)]
    pub custom_style_prompt: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub use_file_content: bool,
    #[serde(default = "default_file_mode")]
    pub file_processing_mode: String,
    /// `fast`, `standard` or `deep`.
    #[serde(default = "default_depth")]
    pub content_analysis_depth: String,
}

impl PptGenerationRequest {
    pub fn new(scenario: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            topic: topic.into(),
            requirements: None,
            network_mode: false,
            language: default_language(),
            uploaded_content: None,
            target_audience: None,
            ppt_style: default_style(),
            custom_style_prompt: None,
            description: None,
            use_file_content: false,
            file_processing_mode: default_file_mode(),
            content_analysis_depth: default_depth(),
        }
    }
}

/// Loosely-typed outline as stored on a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PptOutline {
    pub title: String,
    pub slides: Vec<Map<String, Value>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PptGenerationResponse {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub outline: Option<PptOutline>,
    #[serde(default)]
    pub slides_html: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideType {
    Title,
    #[default]
    Content,
    Image,
    Chart,
    List,
    Thankyou,
    Agenda,
    Section,
    Conclusion,
}

impl SlideType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => SlideType::Title,
            "image" => SlideType::Image,
            "chart" => SlideType::Chart,
            "list" => SlideType::List,
            "thankyou" => SlideType::Thankyou,
            "agenda" => SlideType::Agenda,
            "section" => SlideType::Section,
            "conclusion" => SlideType::Conclusion,
            _ => SlideType::Content,
        }
    }
}

/// Models invent slide types freely; anything unknown is a content slide.
impl<'de> Deserialize<'de> for SlideType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SlideType::parse(&s))
    }
}

fn default_layout() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideContent {
    #[serde(rename = "type", default)]
    pub slide_type: SlideType,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub bullet_points: Option<Vec<String>>,
    #[serde(default)]
    pub image_suggestions: Option<Vec<String>>,
    #[serde(default)]
    pub chart_data: Option<Map<String, Value>>,
    #[serde(default = "default_layout")]
    pub layout: String,
    /// Locked slides are kept as-is on regeneration.
    #[serde(default)]
    pub locked: bool,
}

impl SlideContent {
    pub fn new(slide_type: SlideType, title: impl Into<String>) -> Self {
        Self {
            slide_type,
            title: title.into(),
            subtitle: None,
            content: None,
            bullet_points: None,
            image_suggestions: None,
            chart_data: None,
            layout: default_layout(),
            locked: false,
        }
    }
}

/// Outline with typed slides; what the outline stage produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedPptOutline {
    pub title: String,
    pub slides: Vec<SlideContent>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub theme_config: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<Project>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateMode {
    /// A user-selected master template.
    Global,
    /// The system default template.
    Default,
    /// No template, the model decides.
    Free,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSelectionRequest {
    pub project_id: String,
    #[serde(default)]
    pub selected_template_id: Option<i64>,
    #[serde(default)]
    pub template_mode: Option<TemplateMode>,
}

/// The scenario catalogue offered to clients.
pub fn builtin_scenarios() -> Vec<PptScenario> {
    let entries = [
        ("general", "通用", "适用于各种通用场景的PPT模板", "📋", "professional"),
        ("tourism", "旅游观光", "旅游线路、景点介绍等旅游相关PPT", "🌍", "vibrant"),
        ("education", "儿童科普", "适合儿童的科普教育PPT", "🎓", "playful"),
        ("analysis", "深入分析", "数据分析、研究报告等深度分析PPT", "📊", "data"),
        ("history", "历史文化", "历史事件、文化介绍等人文类PPT", "🏛️", "classic"),
        ("technology", "科技技术", "技术介绍、产品发布等科技类PPT", "💻", "modern"),
        ("business", "方案汇报", "商业计划、项目汇报等商务PPT", "💼", "corporate"),
    ];
    entries
        .into_iter()
        .map(|(id, name, description, icon, theme)| PptScenario {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            template_config: match json!({ "theme": theme }) {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        })
        .collect()
}
