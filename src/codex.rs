//! Codex CLI rollout records (`~/.codex/sessions/**/rollout-*.jsonl`).
//!
//! Each line is `{"timestamp", "type", "payload"}` where `type` is one of
//! `session_meta`, `event_msg`, `response_item` or `turn_context`. Logical
//! messages show up twice (an `event_msg` and a `response_item`), which the
//! dedup pass collapses afterwards.

use serde_json::Value;

use crate::event::{Event, EventBody, FileAction, FileRef, TokenUsage};
use crate::patch::{add_file_patch, files_from_patch, heredoc_write};
use crate::util::{str_at, string_at, truncate, uint_at, value_text};

pub const SOURCE: &str = "codex";

const FALLBACK_ARGS_CHARS: usize = 200;

const SCAFFOLDING_PREFIXES: &[&str] = &[
    "<environment_context>",
    "<user_instructions>",
    "# AGENTS.md instructions",
];

/// State threaded through one parse pass over a rollout file.
///
/// Resumed and forked rollouts repeat `session_meta`; only the first one
/// becomes a `session_start`.
#[derive(Debug, Clone, Default)]
pub struct CodexState {
    pub session_announced: bool,
}

impl CodexState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a record in without producing events, for resuming at an offset.
    pub fn observe(&mut self, record: &Value) {
        if str_at(record, &["type"]) == Some("session_meta")
            && str_at(record, &["payload", "id"]).is_some()
        {
            self.session_announced = true;
        }
    }
}

/// Maps one decoded record to zero or more events. Unknown shapes yield none.
pub fn parse_record(record: &Value, state: &mut CodexState) -> Vec<Event> {
    let ts = string_at(record, &["timestamp"]);
    let payload = record.get("payload").unwrap_or(&Value::Null);
    if !payload.is_object() {
        return Vec::new();
    }

    match str_at(record, &["type"]) {
        Some("session_meta") if !state.session_announced => {
            let start = session_meta(ts, payload);
            state.session_announced = start.is_some();
            start.into_iter().collect()
        }
        Some("event_msg") => event_msg(ts, payload).into_iter().collect(),
        Some("response_item") => response_item(ts, payload).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn session_meta(ts: String, payload: &Value) -> Option<Event> {
    let id = str_at(payload, &["id"])?;
    Some(Event::new(
        ts,
        EventBody::SessionStart {
            id: id.to_string(),
            cwd: string_at(payload, &["cwd"]),
            model: string_at(payload, &["model"]),
            source: SOURCE.to_string(),
        },
    ))
}

fn event_msg(ts: String, payload: &Value) -> Option<Event> {
    match str_at(payload, &["type"])? {
        "user_message" => {
            let text = string_at(payload, &["message"]);
            let mut images = string_list(payload.get("images"));
            images.extend(string_list(payload.get("local_images")));
            if text.trim().is_empty() && images.is_empty() {
                return None;
            }
            Some(Event::new(ts, EventBody::UserMessage { text, images }))
        }
        "agent_message" => {
            let text = string_at(payload, &["message"]);
            if text.trim().is_empty() {
                return None;
            }
            Some(Event::new(
                ts,
                EventBody::AgentMessage {
                    text,
                    phase: str_at(payload, &["phase"]).map(ToString::to_string),
                },
            ))
        }
        "agent_reasoning" => {
            let text = string_at(payload, &["text"]);
            if text.trim().is_empty() {
                return None;
            }
            Some(Event::new(ts, EventBody::Reasoning { text }))
        }
        "token_count" => {
            let info = payload.get("info").filter(|info| info.is_object())?;
            Some(Event::new(ts, EventBody::TokenUsage(token_usage(info))))
        }
        _ => None,
    }
}

fn token_usage(info: &Value) -> TokenUsage {
    let total = |key: &str| uint_at(info, &["total_token_usage", key]).unwrap_or(0);
    let last = |key: &str| uint_at(info, &["last_token_usage", key]).unwrap_or(0);
    let total_input = total("input_tokens");
    let total_output = total("output_tokens");
    TokenUsage {
        total_input,
        cached_input: total("cached_input_tokens"),
        total_output,
        reasoning_output: total("reasoning_output_tokens"),
        total_tokens: uint_at(info, &["total_token_usage", "total_tokens"])
            .unwrap_or_else(|| total_input.saturating_add(total_output)),
        context_window: uint_at(info, &["model_context_window"]).unwrap_or(0),
        last_input: last("input_tokens"),
        last_output: last("output_tokens"),
    }
}

fn response_item(ts: String, payload: &Value) -> Option<Event> {
    match str_at(payload, &["type"])? {
        "message" => message(ts, payload),
        "function_call" => {
            let name = str_at(payload, &["name"]).unwrap_or_default();
            let raw_args = string_at(payload, &["arguments"]);
            let args = serde_json::from_str::<Value>(&raw_args)
                .unwrap_or_else(|_| Value::String(raw_args.clone()));
            let call_id = str_at(payload, &["call_id"]).map(ToString::to_string);
            Some(function_call(ts, name, &args, &raw_args, call_id))
        }
        "custom_tool_call" => {
            let name = str_at(payload, &["name"]).unwrap_or_default();
            let input = string_at(payload, &["input"]);
            let call_id = str_at(payload, &["call_id"]).map(ToString::to_string);
            if name == "apply_patch" {
                return Some(patch_event(ts, input, call_id, name));
            }
            Some(fallback_call(ts, name, &input, call_id))
        }
        "local_shell_call" => {
            let argv = string_list(payload.get("action").and_then(|a| a.get("command")));
            Some(Event::new(
                ts,
                EventBody::ShellCommand {
                    cmd: argv_script(&argv),
                    workdir: string_at(payload, &["action", "working_directory"]),
                    call_id: str_at(payload, &["call_id"]).map(ToString::to_string),
                    tool_name: Some("local_shell".to_string()),
                    description: None,
                },
            ))
        }
        "function_call_output" | "custom_tool_call_output" => Some(Event::new(
            ts,
            EventBody::ToolOutput {
                output: tool_output_text(payload.get("output").unwrap_or(&Value::Null)),
                call_id: str_at(payload, &["call_id"]).map(ToString::to_string),
            },
        )),
        _ => None,
    }
}

fn message(ts: String, payload: &Value) -> Option<Event> {
    let parts = payload
        .get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    match str_at(payload, &["role"])? {
        "user" => {
            let mut texts = Vec::new();
            let mut images = Vec::new();
            for part in parts {
                match str_at(part, &["type"]) {
                    Some("input_text") => {
                        if let Some(text) = str_at(part, &["text"]) {
                            texts.push(text);
                        }
                    }
                    Some("input_image") => {
                        if let Some(url) = str_at(part, &["image_url"]) {
                            images.push(url.to_string());
                        }
                    }
                    _ => {}
                }
            }
            let text = texts.join("\n");
            let trimmed = text.trim_start();
            if SCAFFOLDING_PREFIXES
                .iter()
                .any(|prefix| trimmed.starts_with(prefix))
            {
                return None;
            }
            if text.trim().is_empty() && images.is_empty() {
                return None;
            }
            Some(Event::new(ts, EventBody::UserMessage { text, images }))
        }
        "assistant" => {
            let text = parts
                .iter()
                .filter(|part| str_at(part, &["type"]) == Some("output_text"))
                .filter_map(|part| str_at(part, &["text"]))
                .collect::<Vec<_>>()
                .join("\n");
            if text.trim().is_empty() {
                return None;
            }
            Some(Event::new(
                ts,
                EventBody::AgentMessage {
                    text,
                    phase: str_at(payload, &["phase"]).map(ToString::to_string),
                },
            ))
        }
        _ => None,
    }
}

fn function_call(
    ts: String,
    name: &str,
    args: &Value,
    raw_args: &str,
    call_id: Option<String>,
) -> Event {
    match name {
        "apply_patch" => {
            let patch = str_at(args, &["input"])
                .or_else(|| str_at(args, &["patch"]))
                .map(ToString::to_string)
                .unwrap_or_else(|| value_text(args));
            patch_event(ts, patch, call_id, name)
        }
        "exec_command" => {
            let cmd = match args.get("cmd") {
                Some(Value::Array(_)) => argv_script(&string_list(args.get("cmd"))),
                Some(value) => value_text(value),
                None => String::new(),
            };
            if let Some(write) = heredoc_write(&cmd) {
                let files = vec![FileRef {
                    action: FileAction::Add,
                    path: write.path.clone(),
                }];
                return Event::new(
                    ts,
                    EventBody::FileChange {
                        patch: add_file_patch(&write.path, &write.content),
                        files,
                        call_id,
                        tool_name: Some(name.to_string()),
                    },
                );
            }
            Event::new(
                ts,
                EventBody::ShellCommand {
                    cmd,
                    workdir: string_at(args, &["workdir"]),
                    call_id,
                    tool_name: Some(name.to_string()),
                    description: None,
                },
            )
        }
        "shell" => Event::new(
            ts,
            EventBody::ShellCommand {
                cmd: argv_script(&string_list(args.get("command"))),
                workdir: string_at(args, &["workdir"]),
                call_id,
                tool_name: Some(name.to_string()),
                description: None,
            },
        ),
        _ => fallback_call(ts, name, raw_args, call_id),
    }
}

fn patch_event(ts: String, patch: String, call_id: Option<String>, tool_name: &str) -> Event {
    let files = files_from_patch(&patch);
    Event::new(
        ts,
        EventBody::FileChange {
            patch,
            files,
            call_id,
            tool_name: Some(tool_name.to_string()),
        },
    )
}

fn fallback_call(ts: String, name: &str, args: &str, call_id: Option<String>) -> Event {
    let args = truncate(args.trim(), FALLBACK_ARGS_CHARS);
    let cmd = if args.is_empty() {
        name.to_string()
    } else {
        format!("{name} {args}")
    };
    Event::new(
        ts,
        EventBody::ShellCommand {
            cmd,
            workdir: String::new(),
            call_id,
            tool_name: Some(name.to_string()),
            description: None,
        },
    )
}

/// Reduces `["bash", "-lc", script]` to `script`; other argv are space-joined.
fn argv_script(argv: &[String]) -> String {
    if let [shell, flag, script, ..] = argv
        && ["bash", "sh", "zsh"]
            .iter()
            .any(|name| shell == name || shell.ends_with(&format!("/{name}")))
        && (flag == "-lc" || flag == "-c")
    {
        return script.clone();
    }
    argv.join(" ")
}

fn tool_output_text(output: &Value) -> String {
    match output {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => match map.get("output") {
                Some(Value::String(inner)) => inner.clone(),
                _ => text.clone(),
            },
            _ => text.clone(),
        },
        Value::Object(map) => map
            .get("output")
            .map(value_text)
            .unwrap_or_else(|| output.to_string()),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| str_at(item, &["text"]))
            .collect::<Vec<_>>()
            .join("\n"),
        other => value_text(other),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(line: &str) -> Vec<Event> {
        let value: Value = serde_json::from_str(line).expect("fixture json");
        parse_one(&value)
    }

    fn parse_one(record: &Value) -> Vec<Event> {
        parse_record(record, &mut CodexState::new())
    }

    #[test]
    fn session_meta_becomes_session_start() {
        let events = parse(
            r#"{"timestamp":"2025-09-18T00:16:27.465Z","type":"session_meta","payload":{"id":"243232f1","timestamp":"2025-09-18T00:16:27.461Z","cwd":"/home/test","originator":"codex_cli_rs","cli_version":"0.38.0"}}"#,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].body,
            EventBody::SessionStart {
                id: "243232f1".to_string(),
                cwd: "/home/test".to_string(),
                model: String::new(),
                source: "codex".to_string(),
            }
        );
        assert_eq!(events[0].ts, "2025-09-18T00:16:27.465Z");
    }

    #[test]
    fn session_meta_model_is_not_filled_from_provider() {
        let events = parse(
            r#"{"timestamp":"t","type":"session_meta","payload":{"id":"s","cwd":"/r","model_provider":"openai"}}"#,
        );
        match &events[0].body {
            EventBody::SessionStart { model, .. } => assert_eq!(model, ""),
            other => panic!("unexpected {other:?}"),
        }

        let events = parse(
            r#"{"timestamp":"t","type":"session_meta","payload":{"id":"s","cwd":"/r","model":"gpt-5-codex","model_provider":"openai"}}"#,
        );
        match &events[0].body {
            EventBody::SessionStart { model, .. } => assert_eq!(model, "gpt-5-codex"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_session_meta_announces_once() {
        let first = json!({"timestamp": "t1", "type": "session_meta", "payload": {"id": "s1", "cwd": "/r"}});
        let resumed = json!({"timestamp": "t2", "type": "session_meta", "payload": {"id": "s1", "cwd": "/r"}});

        let mut state = CodexState::new();
        assert_eq!(parse_record(&first, &mut state).len(), 1);
        assert!(parse_record(&resumed, &mut state).is_empty());

        let mut replayed = CodexState::new();
        replayed.observe(&first);
        assert!(parse_record(&resumed, &mut replayed).is_empty());
    }

    #[test]
    fn event_msg_user_message_collects_images() {
        let events = parse(
            r#"{"timestamp":"t","type":"event_msg","payload":{"type":"user_message","message":"look","images":["data:image/png;base64,AAA"],"local_images":["/tmp/shot.png"]}}"#,
        );
        assert_eq!(
            events[0].body,
            EventBody::UserMessage {
                text: "look".to_string(),
                images: vec![
                    "data:image/png;base64,AAA".to_string(),
                    "/tmp/shot.png".to_string()
                ],
            }
        );
    }

    #[test]
    fn agent_message_and_reasoning() {
        let agent = parse(
            r#"{"timestamp":"t","type":"event_msg","payload":{"type":"agent_message","message":"Done.","phase":"final"}}"#,
        );
        assert_eq!(
            agent[0].body,
            EventBody::AgentMessage {
                text: "Done.".to_string(),
                phase: Some("final".to_string())
            }
        );

        let reasoning = parse(
            r#"{"timestamp":"t","type":"event_msg","payload":{"type":"agent_reasoning","text":"**Planning**"}}"#,
        );
        assert_eq!(reasoning[0].kind(), "reasoning");

        let blank = parse(
            r#"{"timestamp":"t","type":"event_msg","payload":{"type":"agent_message","message":"  "}}"#,
        );
        assert!(blank.is_empty());
    }

    #[test]
    fn token_count_maps_totals_and_last() {
        let events = parse(
            r#"{"timestamp":"t","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":2629,"cached_input_tokens":2560,"output_tokens":14,"reasoning_output_tokens":3,"total_tokens":2643},"last_token_usage":{"input_tokens":100,"cached_input_tokens":0,"output_tokens":7,"reasoning_output_tokens":0,"total_tokens":107},"model_context_window":272000}}}"#,
        );
        let usage = events[0].token_usage().expect("usage");
        assert_eq!(usage.total_input, 2629);
        assert_eq!(usage.cached_input, 2560);
        assert_eq!(usage.total_output, 14);
        assert_eq!(usage.reasoning_output, 3);
        assert_eq!(usage.total_tokens, 2643);
        assert_eq!(usage.context_window, 272000);
        assert_eq!(usage.last_input, 100);
        assert_eq!(usage.last_output, 7);

        let empty = parse(
            r#"{"timestamp":"t","type":"event_msg","payload":{"type":"token_count","info":null}}"#,
        );
        assert!(empty.is_empty());
    }

    #[test]
    fn response_item_messages() {
        let user = parse(
            r#"{"timestamp":"t","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"<image name=[Image #1]>"},{"type":"input_image","image_url":"data:image/png;base64,AAA"},{"type":"input_text","text":"</image>"},{"type":"input_text","text":"fix it"}]}}"#,
        );
        match &user[0].body {
            EventBody::UserMessage { text, images } => {
                assert!(text.ends_with("fix it"));
                assert_eq!(images, &vec!["data:image/png;base64,AAA".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let context = parse(
            r#"{"timestamp":"t","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"<environment_context>\n<cwd>/x</cwd>\n</environment_context>"}]}}"#,
        );
        assert!(context.is_empty());

        let assistant = parse(
            r#"{"timestamp":"t","type":"response_item","payload":{"type":"message","role":"assistant","phase":"commentary","content":[{"type":"output_text","text":"Hey!"}]}}"#,
        );
        assert_eq!(
            assistant[0].body,
            EventBody::AgentMessage {
                text: "Hey!".to_string(),
                phase: Some("commentary".to_string())
            }
        );

        let developer = parse(
            r#"{"timestamp":"t","type":"response_item","payload":{"type":"message","role":"developer","content":[{"type":"input_text","text":"rules"}]}}"#,
        );
        assert!(developer.is_empty());
    }

    #[test]
    fn apply_patch_custom_tool_call_is_file_change() {
        let record = json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {
                "type": "custom_tool_call",
                "name": "apply_patch",
                "call_id": "call_9",
                "input": "*** Begin Patch\n*** Update File: src/a.rs\n@@\n-a\n+b\n*** Delete File: src/old.rs\n*** End Patch"
            }
        });
        let events = parse_one(&record);
        match &events[0].body {
            EventBody::FileChange {
                files,
                call_id,
                tool_name,
                ..
            } => {
                assert_eq!(files.len(), 2);
                assert_eq!(files[0].action, FileAction::Update);
                assert_eq!(files[1].action, FileAction::Delete);
                assert_eq!(call_id.as_deref(), Some("call_9"));
                assert_eq!(tool_name.as_deref(), Some("apply_patch"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn apply_patch_function_call_reads_input_argument() {
        let args = json!({"input": "*** Begin Patch\n*** Add File: new.txt\n+x\n*** End Patch"}).to_string();
        let record = json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {"type": "function_call", "name": "apply_patch", "arguments": args, "call_id": "c1"}
        });
        let events = parse_one(&record);
        assert_eq!(events[0].kind(), "file_change");
        assert_eq!(events[0].call_id(), Some("c1"));
    }

    #[test]
    fn exec_command_is_shell_command() {
        let args = json!({"cmd": "cargo test", "workdir": "/repo"}).to_string();
        let record = json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {"type": "function_call", "name": "exec_command", "arguments": args, "call_id": "c2"}
        });
        let events = parse_one(&record);
        assert_eq!(
            events[0].body,
            EventBody::ShellCommand {
                cmd: "cargo test".to_string(),
                workdir: "/repo".to_string(),
                call_id: Some("c2".to_string()),
                tool_name: Some("exec_command".to_string()),
                description: None,
            }
        );
    }

    #[test]
    fn heredoc_exec_command_is_rewritten_as_add_patch() {
        let args = json!({"cmd": "cat > notes.txt <<'EOF'\nhello\nEOF"}).to_string();
        let record = json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {"type": "function_call", "name": "exec_command", "arguments": args, "call_id": "c3"}
        });
        let events = parse_one(&record);
        assert_eq!(events.len(), 1);
        match &events[0].body {
            EventBody::FileChange { patch, files, .. } => {
                assert_eq!(
                    files,
                    &vec![FileRef {
                        action: FileAction::Add,
                        path: "notes.txt".to_string()
                    }]
                );
                assert!(patch.contains("*** Add File: notes.txt"));
                assert!(patch.contains("+hello"));
            }
            other => panic!("expected file_change, got {other:?}"),
        }
    }

    #[test]
    fn shell_argv_and_local_shell_call() {
        let args = json!({"command": ["bash", "-lc", "ls -la"], "workdir": "/w"}).to_string();
        let shell = parse_one(&json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {"type": "function_call", "name": "shell", "arguments": args}
        }));
        match &shell[0].body {
            EventBody::ShellCommand { cmd, workdir, .. } => {
                assert_eq!(cmd, "ls -la");
                assert_eq!(workdir, "/w");
            }
            other => panic!("unexpected {other:?}"),
        }

        let local = parse_one(&json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {"type": "local_shell_call", "call_id": "l1", "action": {"type": "exec", "command": ["rg", "TODO"], "working_directory": "/r"}}
        }));
        match &local[0].body {
            EventBody::ShellCommand { cmd, workdir, call_id, .. } => {
                assert_eq!(cmd, "rg TODO");
                assert_eq!(workdir, "/r");
                assert_eq!(call_id.as_deref(), Some("l1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_function_falls_back_to_named_command() {
        let args = json!({"plan": [{"step": "a", "status": "pending"}]}).to_string();
        let events = parse_one(&json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {"type": "function_call", "name": "update_plan", "arguments": args, "call_id": "p1"}
        }));
        match &events[0].body {
            EventBody::ShellCommand { cmd, tool_name, .. } => {
                assert!(cmd.starts_with("update_plan {"));
                assert_eq!(tool_name.as_deref(), Some("update_plan"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_outputs_are_unwrapped() {
        let wrapped = json!({"output": "Success. Updated files", "metadata": {"exit_code": 0}}).to_string();
        let events = parse_one(&json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {"type": "custom_tool_call_output", "call_id": "c9", "output": wrapped}
        }));
        assert_eq!(
            events[0].body,
            EventBody::ToolOutput {
                output: "Success. Updated files".to_string(),
                call_id: Some("c9".to_string())
            }
        );

        let plain = parse_one(&json!({
            "timestamp": "t",
            "type": "response_item",
            "payload": {"type": "function_call_output", "call_id": "c2", "output": "total 0"}
        }));
        assert_eq!(plain[0].call_id(), Some("c2"));
    }

    #[test]
    fn unknown_and_malformed_records_yield_nothing() {
        assert!(parse(r#"{"timestamp":"t","type":"turn_context","payload":{"model":"gpt-5"}}"#).is_empty());
        assert!(parse(r#"{"type":"event_msg","payload":"oops"}"#).is_empty());
        assert!(parse(r#"{"type":"response_item","payload":{"type":"reasoning","summary":[]}}"#).is_empty());
        assert!(parse(r#"{"something":"else"}"#).is_empty());
    }
}
