//! Running token totals for Claude Code sessions.
//!
//! Claude Code reports a `usage` block per assistant record rather than
//! session totals, so the totals are rebuilt by folding every record from the
//! start of the file. The accumulator is a plain value owned by one parse
//! pass; resuming at an offset replays the earlier records into a fresh one.

use serde_json::Value;

use crate::event::TokenUsage;
use crate::util::uint_at;

pub const CLAUDE_CONTEXT_WINDOW: u64 = 200_000;

/// The `message.usage` block of an assistant record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl Usage {
    /// Reads each counter on its own; a missing, null or negative field
    /// counts as zero without affecting its neighbours.
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(usage) = value else {
            return Self::default();
        };
        let field = |key: &str| uint_at(usage, &[key]).unwrap_or(0);
        Self {
            input_tokens: field("input_tokens"),
            output_tokens: field("output_tokens"),
            cache_read_tokens: field("cache_read_input_tokens"),
            cache_creation_tokens: field("cache_creation_input_tokens"),
        }
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_creation_tokens)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenAccumulator {
    /// Prompt size of the latest request, cache reads and writes included.
    pub input: u64,
    /// Output tokens summed over every request so far.
    pub output: u64,
    pub cache_read: u64,
    pub cache_create: u64,
}

impl TokenAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one record's usage in and returns the totals as of that record.
    pub fn apply(&mut self, usage: &Usage) -> TokenUsage {
        self.input = usage.prompt_tokens();
        self.cache_read = usage.cache_read_tokens;
        self.cache_create = usage.cache_creation_tokens;
        self.output = self.output.saturating_add(usage.output_tokens);

        TokenUsage {
            total_input: self.input,
            cached_input: self.cache_read,
            total_output: self.output,
            reasoning_output: 0,
            total_tokens: self.input.saturating_add(self.output),
            context_window: CLAUDE_CONTEXT_WINDOW,
            last_input: usage.prompt_tokens(),
            last_output: usage.output_tokens,
        }
    }
}
