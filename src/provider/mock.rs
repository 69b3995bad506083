// src/provider/mock.rs — Local scripted provider (tests, dry runs)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ExecuteOptions, ModelProvider};
use crate::infra::errors::{DraftloomError, Result};

enum Behavior {
    /// Reply with the prompt prefixed by the provider id.
    Echo,
    /// Pop scripted replies in order; the last one repeats.
    Script(Mutex<VecDeque<Result<String, String>>>),
    /// Every call fails.
    Fail(String),
}

/// A provider that never touches the network.
pub struct MockProvider {
    id: String,
    behavior: Behavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    fn with_behavior(id: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            id: id.into(),
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn echo(id: impl Into<String>) -> Self {
        Self::with_behavior(id, Behavior::Echo)
    }

    /// Always answers with `reply`.
    pub fn constant(id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::scripted(id, vec![reply.into()])
    }

    pub fn scripted<I, S>(id: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = replies.into_iter().map(|r| Ok(r.into())).collect();
        Self::with_behavior(id, Behavior::Script(Mutex::new(queue)))
    }

    /// Mix of successes and failures, consumed in order.
    pub fn sequence(id: impl Into<String>, replies: Vec<Result<String, String>>) -> Self {
        Self::with_behavior(id, Behavior::Script(Mutex::new(replies.into())))
    }

    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_behavior(id, Behavior::Fail(message.into()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn next_scripted(&self, queue: &Mutex<VecDeque<Result<String, String>>>) -> Result<String> {
        let mut queue = queue
            .lock()
            .map_err(|_| DraftloomError::provider(&self.id, "script lock poisoned"))?;
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(DraftloomError::provider(&self.id, message)),
            None => Err(DraftloomError::provider(&self.id, "script exhausted")),
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, prompt: &str, _options: &ExecuteOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            Behavior::Echo => Ok(format!("[{}] {}", self.id, prompt.trim())),
            Behavior::Script(queue) => self.next_scripted(queue),
            Behavior::Fail(message) => Err(DraftloomError::provider(&self.id, message.clone())),
        }
    }
}
