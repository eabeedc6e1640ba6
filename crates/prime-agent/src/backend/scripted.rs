use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::LlmBackend;
use crate::error::AgentError;

/// Replies from a fixed script, in order. The last reply repeats once the
/// script runs out. Used for `prime turn --reply-file` and in tests.
#[derive(Debug)]
pub struct ScriptedBackend {
    model: String,
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(model: impl Into<String>, replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            model: model.into(),
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, AgentError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| AgentError::Backend("script lock poisoned".into()))?;
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        reply.ok_or_else(|| AgentError::Backend("no scripted reply".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_order_and_repeat() {
        let backend = ScriptedBackend::new("m", ["one", "two"]);
        assert_eq!(backend.complete("a").await.unwrap(), "one");
        assert_eq!(backend.complete("b").await.unwrap(), "two");
        assert_eq!(backend.complete("c").await.unwrap(), "two");
        assert_eq!(backend.prompts(), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_script_is_unreachable() {
        let backend = ScriptedBackend::new("m", Vec::<String>::new());
        assert!(matches!(
            backend.complete("a").await,
            Err(AgentError::Backend(_))
        ));
    }
}
