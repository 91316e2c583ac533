use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

use super::{AiMessage, AiProvider, AiResponse, CompletionOptions, estimate_usage};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }
}

/// A scripted provider for tests. Returns pre-defined replies in order and
/// records every request it sees. A gated mock holds each call until
/// [`MockProvider::release`] lets it through.
pub struct MockProvider {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    requests: Mutex<Vec<Vec<AiMessage>>>,
    gate: Option<Semaphore>,
}

impl MockProvider {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Hold every call until released.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Let `calls` held calls through. No-op on an ungated mock.
    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Convenience for all-success scripts.
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(MockReply::text).collect())
    }

    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Messages of every call so far, in order.
    pub fn requests(&self) -> Vec<Vec<AiMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn chat_completion(
        &self,
        messages: &[AiMessage],
        _options: &CompletionOptions,
    ) -> Result<AiResponse> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        self.requests.lock().unwrap().push(messages.to_vec());

        let i = self.index.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.get(i).ok_or_else(|| {
            anyhow::anyhow!("MockProvider: no more replies (called {} times)", i + 1)
        })?;

        match reply {
            MockReply::Text(text) => {
                let prompt: Vec<String> = messages.iter().map(|m| m.content.to_text()).collect();
                Ok(AiResponse {
                    content: text.clone(),
                    model: self.model().to_string(),
                    usage: estimate_usage(&prompt.join("\n"), text),
                    finish_reason: Some("stop".to_string()),
                    metadata: Default::default(),
                })
            }
            MockReply::Fail(reason) => anyhow::bail!("{reason}"),
        }
    }
}
