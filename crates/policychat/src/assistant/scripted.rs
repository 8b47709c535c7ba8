//! Canned-reply assistant for development and tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use policychat_protocol::{ToolCall, ToolOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{Assistant, AssistantEvent, AssistantRequest, AssistantStream};

const DEFAULT_REPLY: &str =
    "I could not find a policy covering \"{message}\". Try rephrasing, or name the department.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedConfig {
    /// Reply text. `{message}` is replaced with the user message.
    pub reply: String,
    /// Emit a tool call and its output before the reply.
    pub tool: Option<String>,
    pub fragment_delay_ms: u64,
}

impl Default for ScriptedConfig {
    fn default() -> Self {
        Self {
            reply: DEFAULT_REPLY.to_string(),
            tool: None,
            fragment_delay_ms: 0,
        }
    }
}

/// Replies with fixed text split into word fragments.
#[derive(Debug, Clone)]
pub struct ScriptedAssistant {
    reply: String,
    tool: Option<String>,
    delay: Duration,
    fail_after: Option<usize>,
    stall_after: Option<usize>,
}

impl ScriptedAssistant {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            tool: None,
            delay: Duration::ZERO,
            fail_after: None,
            stall_after: None,
        }
    }

    pub fn from_config(config: &ScriptedConfig) -> Self {
        let mut assistant = Self::new(config.reply.clone())
            .with_delay(Duration::from_millis(config.fragment_delay_ms));
        assistant.tool = config.tool.clone();
        assistant
    }

    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tool = Some(name.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail with an error after `n` text fragments.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Go silent forever after `n` text fragments.
    pub fn stalling_after(mut self, n: usize) -> Self {
        self.stall_after = Some(n);
        self
    }

    /// The full reply text for `message`. Fragments always concatenate to this.
    pub fn reply_for(&self, message: &str) -> String {
        self.reply.replace("{message}", message.trim())
    }

    fn script(&self, message: &str) -> Vec<Result<AssistantEvent>> {
        let mut events = Vec::new();

        if let Some(tool) = &self.tool {
            let call_id = format!("call_{}", nanoid::nanoid!(8));
            events.push(Ok(AssistantEvent::ToolCall(ToolCall {
                id: call_id.clone(),
                name: tool.clone(),
                input: serde_json::json!({ "query": message.trim() }),
            })));
            events.push(Ok(AssistantEvent::ToolOutput(ToolOutput {
                tool_call_id: call_id,
                output: Value::Array(Vec::new()),
            })));
        }

        let reply = self.reply_for(message);
        for (i, fragment) in split_fragments(&reply).into_iter().enumerate() {
            if self.fail_after == Some(i) {
                events.push(Err(anyhow!("scripted failure after {i} fragments")));
                return events;
            }
            if self.stall_after == Some(i) {
                return events;
            }
            events.push(Ok(AssistantEvent::TextDelta(fragment)));
        }

        events
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn respond(&self, request: AssistantRequest) -> Result<AssistantStream> {
        let events = self.script(&request.message);
        let stall = self
            .stall_after
            .is_some_and(|n| n < split_fragments(&self.reply_for(&request.message)).len());
        let delay = self.delay;

        let scripted = futures::stream::iter(events).then(move |event| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            event
        });

        if stall {
            Ok(Box::pin(scripted.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(scripted))
        }
    }
}

/// Split text into word fragments, each keeping its trailing whitespace.
fn split_fragments(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message: &str) -> AssistantRequest {
        AssistantRequest {
            owner: "usr_a".to_string(),
            chat_id: 1,
            history: Vec::new(),
            message: message.to_string(),
        }
    }

    async fn collect(assistant: &ScriptedAssistant, message: &str) -> Vec<Result<AssistantEvent>> {
        assistant
            .respond(request(message))
            .await
            .unwrap()
            .collect()
            .await
    }

    #[test]
    fn test_fragments_concatenate_to_text() {
        let text = "Pre-medication is  required\nfor prior reactions.";
        assert_eq!(split_fragments(text).concat(), text);
        assert_eq!(split_fragments("").len(), 0);
    }

    #[tokio::test]
    async fn test_reply_fragments() {
        let assistant = ScriptedAssistant::new("Answer to {message}");
        let events = collect(&assistant, " contrast ").await;

        let text: String = events
            .into_iter()
            .map(|e| match e.unwrap() {
                AssistantEvent::TextDelta(t) => t,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(text, "Answer to contrast");
    }

    #[tokio::test]
    async fn test_tool_events_come_first() {
        let assistant = ScriptedAssistant::new("done").with_tool("search_policies");
        let events = collect(&assistant, "contrast").await;

        assert!(matches!(events[0], Ok(AssistantEvent::ToolCall(_))));
        match (&events[0], &events[1]) {
            (Ok(AssistantEvent::ToolCall(call)), Ok(AssistantEvent::ToolOutput(out))) => {
                assert_eq!(call.id, out.tool_call_id);
                assert_eq!(call.name, "search_policies");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_after() {
        let assistant = ScriptedAssistant::new("one two three").failing_after(2);
        let events = collect(&assistant, "q").await;

        assert_eq!(events.len(), 3);
        assert!(events[0].is_ok());
        assert!(events[1].is_ok());
        assert!(events[2].is_err());
    }

    #[tokio::test]
    async fn test_stalling_after_never_ends() {
        let assistant = ScriptedAssistant::new("one two three").stalling_after(1);
        let mut stream = assistant.respond(request("q")).await.unwrap();

        assert!(stream.next().await.is_some());
        let next = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(next.is_err(), "stream should stall");
    }
}
