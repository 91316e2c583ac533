//! Request and response shapes for the HTTP surface.
//!
//! [`openai`] mirrors the OpenAI completion wire format so existing clients
//! can talk to any configured provider; [`ppt`] holds the deck-generation
//! DTOs.

pub mod openai;
pub mod ppt;

pub use openai::{
    ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    CompletionChoice, CompletionRequest, CompletionResponse, StopSequences, UsageInfo,
    ValidationError,
};
pub use ppt::{
    EnhancedPptOutline, PptGenerationRequest, PptGenerationResponse, PptOutline, PptScenario,
    ProjectListResponse, SlideContent, SlideType, TemplateMode, TemplateSelectionRequest,
    builtin_scenarios,
};
