//! Canonical, source-independent session events.

use serde::{Deserialize, Serialize};

/// One meaningful occurrence in a session, in producer order.
///
/// `ts` is the record's ISO-8601 timestamp, or empty when the record had
/// none. Events are immutable once produced; cached event lists are shared
/// between callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: String,
    #[serde(flatten)]
    pub body: EventBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    SessionStart {
        id: String,
        cwd: String,
        model: String,
        source: String,
    },
    UserMessage {
        text: String,
        #[serde(default)]
        images: Vec<String>,
    },
    AgentMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
    Reasoning {
        text: String,
    },
    FileChange {
        patch: String,
        files: Vec<FileRef>,
        #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(rename = "toolName", default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
    ShellCommand {
        cmd: String,
        workdir: String,
        #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(rename = "toolName", default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    ToolOutput {
        output: String,
        #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    TokenUsage(TokenUsage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub action: FileAction,
    pub path: String,
}

/// Cumulative token counters as of one point in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_input: u64,
    pub cached_input: u64,
    pub total_output: u64,
    pub reasoning_output: u64,
    pub total_tokens: u64,
    pub context_window: u64,
    pub last_input: u64,
    pub last_output: u64,
}

impl Event {
    pub fn new(ts: impl Into<String>, body: EventBody) -> Self {
        Self {
            ts: ts.into(),
            body,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            EventBody::SessionStart { .. } => "session_start",
            EventBody::UserMessage { .. } => "user_message",
            EventBody::AgentMessage { .. } => "agent_message",
            EventBody::Reasoning { .. } => "reasoning",
            EventBody::FileChange { .. } => "file_change",
            EventBody::ShellCommand { .. } => "shell_command",
            EventBody::ToolOutput { .. } => "tool_output",
            EventBody::TokenUsage(_) => "token_usage",
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match &self.body {
            EventBody::FileChange { call_id, .. }
            | EventBody::ShellCommand { call_id, .. }
            | EventBody::ToolOutput { call_id, .. } => call_id.as_deref(),
            _ => None,
        }
    }

    pub fn token_usage(&self) -> Option<&TokenUsage> {
        match &self.body {
            EventBody::TokenUsage(usage) => Some(usage),
            _ => None,
        }
    }
}
