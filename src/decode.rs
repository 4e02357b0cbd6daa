use serde_json::Value;
use tracing::trace;

/// Skip-and-continue decoder for transcript lines.
///
/// A line that is blank, not valid JSON, or not a JSON object yields `None`
/// and bumps the skip counter. Callers never see a decode error.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    decoded: usize,
    skipped: usize,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, line: &str) -> Option<Value> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.skipped += 1;
            return None;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) if value.is_object() => {
                self.decoded += 1;
                Some(value)
            }
            Ok(_) => {
                self.skipped += 1;
                trace!("skipping non-object transcript record");
                None
            }
            Err(err) => {
                self.skipped += 1;
                trace!(error = %err, "skipping undecodable transcript line");
                None
            }
        }
    }

    pub fn decoded(&self) -> usize {
        self.decoded
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
