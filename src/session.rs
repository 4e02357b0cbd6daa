use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::claude::{self, ClaudeState};
use crate::codex::{self, CodexState};
use crate::decode::RecordDecoder;
use crate::dedup::dedupe_codex;
use crate::error::{IngestError, Result};
use crate::event::Event;
use crate::lines::LineReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionSource {
    Codex,
    ClaudeCode,
}

impl SessionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Codex => codex::SOURCE,
            Self::ClaudeCode => claude::SOURCE,
        }
    }
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionSource {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "codex" => Ok(Self::Codex),
            "claude-code" | "claude" => Ok(Self::ClaudeCode),
            other => Err(IngestError::UnknownSource(other.to_string())),
        }
    }
}

/// Result of a whole-file parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSession {
    pub events: Vec<Event>,
    pub line_count: usize,
}

/// Events appended since a previous offset; `total` is the next offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResult {
    pub events: Vec<Event>,
    pub total: usize,
}

#[derive(Debug, Clone)]
struct CachedSessionEntry {
    modified: SystemTime,
    file_len: u64,
    source: SessionSource,
    session: Arc<ParsedSession>,
}

/// Whole-file parse results keyed by path and validated by mtime.
///
/// Entries are swapped whole, so readers never see a half-updated entry. Two
/// callers racing on a stale path may both parse it; the later insert wins
/// and both results are equivalent.
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: RwLock<HashMap<PathBuf, CachedSessionEntry>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_session_file(
        &self,
        path: &Path,
        source: SessionSource,
    ) -> Result<Arc<ParsedSession>> {
        let metadata = std::fs::metadata(path).map_err(|err| IngestError::io(path, err))?;
        let modified = metadata
            .modified()
            .map_err(|err| IngestError::io(path, err))?;
        let file_len = metadata.len();

        if let Some(cached) = self.read_entries().get(path)
            && cached.modified == modified
            && cached.file_len == file_len
            && cached.source == source
        {
            debug!(path = %path.display(), "session cache hit");
            return Ok(Arc::clone(&cached.session));
        }

        debug!(path = %path.display(), %source, "session cache miss");
        let session = Arc::new(parse_file(path, source)?);
        self.write_entries().insert(
            path.to_path_buf(),
            CachedSessionEntry {
                modified,
                file_len,
                source,
                session: Arc::clone(&session),
            },
        );
        Ok(session)
    }

    /// Returns events from lines `[offset, end)`, ignoring the whole-file cache.
    pub fn poll_from_offset(
        &self,
        path: &Path,
        source: SessionSource,
        offset: usize,
    ) -> Result<PollResult> {
        let records = read_records(path)?;
        let total = records.len();
        if total <= offset {
            return Ok(PollResult {
                events: Vec::new(),
                total,
            });
        }

        let (seen, fresh) = records.split_at(offset);
        let events = match source {
            SessionSource::Codex => {
                let mut state = CodexState::new();
                for record in seen.iter().flatten() {
                    state.observe(record);
                }
                dedupe_codex(codex_events(fresh, &mut state))
            }
            SessionSource::ClaudeCode => {
                let mut state = ClaudeState::new();
                for record in seen.iter().flatten() {
                    claude::parse_record(record, &mut state);
                }
                claude_events(fresh, &mut state)
            }
        };
        debug!(
            path = %path.display(),
            offset,
            total,
            events = events.len(),
            "polled session"
        );
        Ok(PollResult { events, total })
    }

    /// Drops the cached entry for `path`, e.g. after the file was deleted.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.write_entries().remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, CachedSessionEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, CachedSessionEntry>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Parses a whole file without consulting any cache.
pub fn parse_file(path: &Path, source: SessionSource) -> Result<ParsedSession> {
    let records = read_records(path)?;
    let events = match source {
        SessionSource::Codex => dedupe_codex(codex_events(&records, &mut CodexState::new())),
        SessionSource::ClaudeCode => claude_events(&records, &mut ClaudeState::new()),
    };
    Ok(ParsedSession {
        events,
        line_count: records.len(),
    })
}

fn codex_events(records: &[Option<Value>], state: &mut CodexState) -> Vec<Event> {
    records
        .iter()
        .flatten()
        .flat_map(|record| codex::parse_record(record, state))
        .collect()
}

fn claude_events(records: &[Option<Value>], state: &mut ClaudeState) -> Vec<Event> {
    records
        .iter()
        .flatten()
        .flat_map(|record| claude::parse_record(record, state))
        .collect()
}

/// One slot per counted line; `None` for lines that did not decode.
///
/// An unterminated final line that does not decode is the producer's
/// in-flight write and is left out of the count so the next poll sees it.
fn read_records(path: &Path) -> Result<Vec<Option<Value>>> {
    let file = File::open(path).map_err(|err| IngestError::io(path, err))?;
    let mut lines = LineReader::new(file);
    let mut decoder = RecordDecoder::new();
    let mut records: Vec<Option<Value>> = lines
        .by_ref()
        .map(|line| decoder.decode(&line))
        .collect();

    if !lines.last_line_terminated() && matches!(records.last(), Some(None)) {
        records.pop();
    }
    debug!(
        path = %path.display(),
        lines = records.len(),
        decoded = decoder.decoded(),
        skipped = decoder.skipped(),
        oversized = lines.dropped(),
        "read session lines"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    const CODEX_LINES: &str = r#"{"timestamp":"2025-10-01T10:00:00.000Z","type":"session_meta","payload":{"id":"s1","cwd":"/repo"}}
{"timestamp":"2025-10-01T10:00:01.000Z","type":"event_msg","payload":{"type":"user_message","message":"run the tests"}}
{"timestamp":"2025-10-01T10:00:01.050Z","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"run the tests"}]}}
"#;

    fn claude_line(ts: &str, input: u64, output: u64) -> String {
        format!(
            r#"{{"type":"assistant","sessionId":"c1","cwd":"/repo","timestamp":"{ts}","message":{{"role":"assistant","content":[{{"type":"text","text":"step {ts}"}}],"usage":{{"input_tokens":{input},"output_tokens":{output}}}}}}}"#
        )
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("open append");
        file.write_all(text.as_bytes()).expect("append");
    }

    #[test]
    fn source_names_round_trip() {
        assert_eq!("codex".parse::<SessionSource>().ok(), Some(SessionSource::Codex));
        assert_eq!(
            "claude-code".parse::<SessionSource>().ok(),
            Some(SessionSource::ClaudeCode)
        );
        assert_eq!(SessionSource::ClaudeCode.to_string(), "claude-code");
        assert!(matches!(
            "gemini".parse::<SessionSource>(),
            Err(IngestError::UnknownSource(_))
        ));
    }

    #[test]
    fn codex_parse_counts_lines_and_dedupes() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("rollout.jsonl");
        std::fs::write(&path, CODEX_LINES).expect("write");

        let parsed = parse_file(&path, SessionSource::Codex).expect("parse");
        assert_eq!(parsed.line_count, 3);
        let kinds: Vec<_> = parsed.events.iter().map(Event::kind).collect();
        assert_eq!(kinds, vec!["session_start", "user_message"]);
    }

    #[test]
    fn cache_returns_same_arc_until_file_changes() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("rollout.jsonl");
        std::fs::write(&path, CODEX_LINES).expect("write");

        let cache = SessionCache::new();
        let first = cache
            .parse_session_file(&path, SessionSource::Codex)
            .expect("first");
        let second = cache
            .parse_session_file(&path, SessionSource::Codex)
            .expect("second");
        assert!(Arc::ptr_eq(&first, &second));

        append(
            &path,
            "{\"timestamp\":\"2025-10-01T10:05:00.000Z\",\"type\":\"event_msg\",\"payload\":{\"type\":\"agent_message\",\"message\":\"ok\"}}\n",
        );
        let third = cache
            .parse_session_file(&path, SessionSource::Codex)
            .expect("third");
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.line_count, 4);

        assert!(cache.invalidate(&path));
        assert!(cache.is_empty());
        assert!(!cache.invalidate(&path));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let tmp = TempDir::new().expect("temp dir");
        let cache = SessionCache::new();
        let err = cache
            .parse_session_file(&tmp.path().join("gone.jsonl"), SessionSource::Codex)
            .expect_err("missing");
        assert!(matches!(err, IngestError::Io { .. }));
    }

    #[test]
    fn claude_poll_replays_prefix_for_token_totals() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("session.jsonl");
        let lines = [
            claude_line("2025-10-01T10:00:00Z", 100, 50),
            claude_line("2025-10-01T10:00:05Z", 200, 80),
            claude_line("2025-10-01T10:00:09Z", 50, 20),
        ];
        std::fs::write(&path, format!("{}\n{}\n", lines[0], lines[1])).expect("write");

        let cache = SessionCache::new();
        let first = cache
            .poll_from_offset(&path, SessionSource::ClaudeCode, 0)
            .expect("poll 1");
        assert_eq!(first.total, 2);

        append(&path, &format!("{}\n", lines[2]));
        let second = cache
            .poll_from_offset(&path, SessionSource::ClaudeCode, first.total)
            .expect("poll 2");
        assert_eq!(second.total, 3);
        assert!(second.events.iter().all(|e| e.kind() != "session_start"));
        let usage = second
            .events
            .iter()
            .find_map(Event::token_usage)
            .expect("usage");
        assert_eq!(usage.total_output, 150);
        assert_eq!(usage.total_input, 50);

        let full = parse_file(&path, SessionSource::ClaudeCode).expect("full");
        let mut stitched = first.events;
        stitched.extend(second.events);
        assert_eq!(stitched, full.events);
    }

    #[test]
    fn poll_at_or_past_end_is_empty() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("rollout.jsonl");
        std::fs::write(&path, CODEX_LINES).expect("write");

        let cache = SessionCache::new();
        let result = cache
            .poll_from_offset(&path, SessionSource::Codex, 10)
            .expect("poll");
        assert!(result.events.is_empty());
        assert_eq!(result.total, 3);
    }

    #[test]
    fn partial_final_line_is_not_counted_until_complete() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("rollout.jsonl");
        std::fs::write(
            &path,
            format!("{CODEX_LINES}{{\"timestamp\":\"2025-10-01T10:09:00.000Z\",\"type\":\"event_"),
        )
        .expect("write");

        let cache = SessionCache::new();
        let before = cache
            .poll_from_offset(&path, SessionSource::Codex, 0)
            .expect("poll");
        assert_eq!(before.total, 3);

        append(
            &path,
            "msg\",\"payload\":{\"type\":\"agent_message\",\"message\":\"done\"}}\n",
        );
        let after = cache
            .poll_from_offset(&path, SessionSource::Codex, before.total)
            .expect("poll");
        assert_eq!(after.total, 4);
        assert_eq!(after.events.len(), 1);
        assert_eq!(after.events[0].kind(), "agent_message");
    }

    #[test]
    fn serializes_with_collaborator_field_names() {
        let parsed = ParsedSession {
            events: Vec::new(),
            line_count: 7,
        };
        assert_eq!(
            serde_json::to_value(&parsed).expect("json"),
            serde_json::json!({"events": [], "lineCount": 7})
        );
        let polled = PollResult {
            events: Vec::new(),
            total: 7,
        };
        assert_eq!(
            serde_json::to_value(&polled).expect("json"),
            serde_json::json!({"events": [], "total": 7})
        );
    }
}
