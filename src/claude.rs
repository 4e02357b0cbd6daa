//! Claude Code project transcripts (`~/.claude/projects/<project>/<session>.jsonl`).

use serde_json::Value;

use crate::event::{Event, EventBody, FileAction, FileRef};
use crate::patch::{add_file_patch, update_file_patch};
use crate::tokens::{TokenAccumulator, Usage};
use crate::util::{str_at, string_at, truncate, uint_at, value_text};

pub const SOURCE: &str = "claude-code";

const SENTINELS: &[&str] = &["<system-reminder>", "<task-notification>"];
const FALLBACK_INPUT_CHARS: usize = 200;

/// State threaded through one parse pass over a Claude Code file.
#[derive(Debug, Clone, Default)]
pub struct ClaudeState {
    pub tokens: TokenAccumulator,
    pub session_announced: bool,
}

impl ClaudeState {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn parse_record(record: &Value, state: &mut ClaudeState) -> Vec<Event> {
    let mut events = Vec::new();
    if !record.is_object() {
        return events;
    }
    let ts = string_at(record, &["timestamp"]);
    let kind = str_at(record, &["type"]);

    // User records never carry `message.model`, so the session is announced
    // from the first assistant record instead.
    if !state.session_announced
        && kind == Some("assistant")
        && let Some(id) = str_at(record, &["sessionId"])
    {
        state.session_announced = true;
        events.push(Event::new(
            ts.clone(),
            EventBody::SessionStart {
                id: id.to_string(),
                cwd: string_at(record, &["cwd"]),
                model: string_at(record, &["message", "model"]),
                source: SOURCE.to_string(),
            },
        ));
    }

    match kind {
        Some("user") => user_record(record, &ts, &mut events),
        Some("assistant") => assistant_record(record, &ts, state, &mut events),
        _ => {}
    }
    events
}

fn user_record(record: &Value, ts: &str, events: &mut Vec<Event>) {
    if record.get("isMeta").and_then(Value::as_bool) == Some(true) {
        return;
    }
    let flagged_tool_result = record.get("toolUseResult").is_some_and(|v| !v.is_null());

    match record.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(text)) => {
            if flagged_tool_result || has_sentinel(text) || text.trim().is_empty() {
                return;
            }
            events.push(Event::new(
                ts,
                EventBody::UserMessage {
                    text: text.clone(),
                    images: Vec::new(),
                },
            ));
        }
        Some(Value::Array(blocks)) => {
            let results: Vec<&Value> = blocks
                .iter()
                .filter(|block| str_at(block, &["type"]) == Some("tool_result"))
                .collect();
            if !results.is_empty() {
                for block in results {
                    events.push(Event::new(
                        ts,
                        EventBody::ToolOutput {
                            output: tool_result_text(block.get("content")),
                            call_id: str_at(block, &["tool_use_id"]).map(ToString::to_string),
                        },
                    ));
                }
                return;
            }
            if flagged_tool_result {
                return;
            }

            let mut texts = Vec::new();
            let mut images = Vec::new();
            for block in blocks {
                match str_at(block, &["type"]) {
                    Some("text") => {
                        if let Some(text) = str_at(block, &["text"]) {
                            texts.push(text);
                        }
                    }
                    Some("image") => {
                        if let Some(uri) = image_data_uri(block) {
                            images.push(uri);
                        }
                    }
                    _ => {}
                }
            }
            let text = texts.join("\n");
            if has_sentinel(&text) || (text.trim().is_empty() && images.is_empty()) {
                return;
            }
            events.push(Event::new(ts, EventBody::UserMessage { text, images }));
        }
        _ => {}
    }
}

fn assistant_record(record: &Value, ts: &str, state: &mut ClaudeState, events: &mut Vec<Event>) {
    let message = record.get("message").unwrap_or(&Value::Null);
    let cwd = string_at(record, &["cwd"]);

    match message.get("content") {
        Some(Value::String(text)) if !text.trim().is_empty() => {
            events.push(Event::new(
                ts,
                EventBody::AgentMessage {
                    text: text.clone(),
                    phase: None,
                },
            ));
        }
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match str_at(block, &["type"]) {
                    Some("thinking") => {
                        let text = string_at(block, &["thinking"]);
                        if !text.trim().is_empty() {
                            events.push(Event::new(ts, EventBody::Reasoning { text }));
                        }
                    }
                    Some("text") => {
                        let text = string_at(block, &["text"]);
                        if !text.trim().is_empty() {
                            events.push(Event::new(
                                ts,
                                EventBody::AgentMessage { text, phase: None },
                            ));
                        }
                    }
                    Some("tool_use") => events.push(Event::new(ts, tool_use(block, &cwd))),
                    _ => {}
                }
            }
        }
        _ => {}
    }

    let usage = Usage::from_value(message.get("usage"));
    events.push(Event::new(
        ts,
        EventBody::TokenUsage(state.tokens.apply(&usage)),
    ));
}

fn tool_use(block: &Value, cwd: &str) -> EventBody {
    let name = str_at(block, &["name"]).unwrap_or_default();
    let input = block.get("input").unwrap_or(&Value::Null);
    let call_id = str_at(block, &["id"]).map(ToString::to_string);
    let tool_name = Some(name.to_string());
    let path = string_at(input, &["file_path"]);

    match name {
        "Edit" if !path.is_empty() => {
            let old = str_at(input, &["old_string"]).unwrap_or_default();
            let new = str_at(input, &["new_string"]).unwrap_or_default();
            let patch = update_file_patch(&path, [(old, new)]);
            file_change(patch, FileAction::Update, path, call_id, tool_name)
        }
        "MultiEdit" if !path.is_empty() => {
            let edits = input
                .get("edits")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|edit| {
                    (
                        str_at(edit, &["old_string"]).unwrap_or_default(),
                        str_at(edit, &["new_string"]).unwrap_or_default(),
                    )
                });
            let patch = update_file_patch(&path, edits);
            file_change(patch, FileAction::Update, path, call_id, tool_name)
        }
        "Write" if !path.is_empty() => {
            let content = str_at(input, &["content"]).unwrap_or_default();
            let patch = add_file_patch(&path, content);
            file_change(patch, FileAction::Add, path, call_id, tool_name)
        }
        "Bash" => EventBody::ShellCommand {
            cmd: string_at(input, &["command"]),
            workdir: cwd.to_string(),
            call_id,
            tool_name,
            description: str_at(input, &["description"]).map(ToString::to_string),
        },
        _ => EventBody::ShellCommand {
            cmd: summary_command(name, input),
            workdir: cwd.to_string(),
            call_id,
            tool_name,
            description: None,
        },
    }
}

fn file_change(
    patch: String,
    action: FileAction,
    path: String,
    call_id: Option<String>,
    tool_name: Option<String>,
) -> EventBody {
    EventBody::FileChange {
        patch,
        files: vec![FileRef { action, path }],
        call_id,
        tool_name,
    }
}

/// One-line shell-ish rendering of a tool invocation.
fn summary_command(name: &str, input: &Value) -> String {
    let field = |key: &str| str_at(input, &[key]).unwrap_or_default();
    let with_path = |base: String| match str_at(input, &["path"]) {
        Some(path) if !path.is_empty() => format!("{base} {path}"),
        _ => base,
    };

    match name {
        "Read" => {
            let path = field("file_path");
            let offset = uint_at(input, &["offset"]);
            let limit = uint_at(input, &["limit"]);
            match (offset, limit) {
                (None, None) => format!("cat {path}"),
                (start, Some(limit)) => {
                    let start = start.unwrap_or(1).max(1);
                    let end = start.saturating_add(limit).saturating_sub(1);
                    format!("sed -n '{start},{end}p' {path}")
                }
                (Some(start), None) => format!("sed -n '{},$p' {path}", start.max(1)),
            }
        }
        "Glob" => with_path(format!("rg --files -g '{}'", field("pattern"))),
        "Grep" => with_path(format!("rg '{}'", field("pattern"))),
        "WebSearch" => format!("web-search '{}'", field("query")),
        "WebFetch" => format!("curl {}", field("url")),
        "Task" => format!("task {}: {}", field("subagent_type"), field("description")),
        _ => {
            let compact = match input {
                Value::Null => String::new(),
                other => truncate(&other.to_string(), FALLBACK_INPUT_CHARS),
            };
            if compact.is_empty() {
                name.to_string()
            } else {
                format!("{name} {compact}")
            }
        }
    }
}

fn has_sentinel(text: &str) -> bool {
    SENTINELS.iter().any(|marker| text.contains(marker))
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.as_str()),
                _ => str_at(item, &["text"]),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => value_text(other),
        None => String::new(),
    }
}

fn image_data_uri(block: &Value) -> Option<String> {
    let source = block.get("source")?;
    match str_at(source, &["type"]) {
        Some("base64") => {
            let media_type = str_at(source, &["media_type"]).unwrap_or("image/png");
            let data = str_at(source, &["data"])?;
            Some(format!("data:{media_type};base64,{data}"))
        }
        Some("url") => str_at(source, &["url"]).map(ToString::to_string),
        _ => None,
    }
}
