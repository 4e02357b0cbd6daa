//! Streaming newline-delimited line extraction with a per-line ceiling.
//!
//! Session transcripts occasionally contain a single record that embeds a
//! whole file, which can run to hundreds of megabytes. [`LineReader`] never
//! buffers more than [`MAX_LINE_BYTES`] for one line: once a line crosses the
//! ceiling its bytes are discarded until the next newline and nothing is
//! yielded for it.

use std::io::{self, BufRead, BufReader, Read};

use tracing::warn;

pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

const READ_BUFFER_BYTES: usize = 64 * 1024;

pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_line_bytes: usize,
    skipping: bool,
    skipped_bytes: usize,
    dropped: usize,
    last_terminated: bool,
    done: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_LINE_BYTES)
    }

    pub fn with_limit(inner: R, max_line_bytes: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_BYTES, inner),
            buf: Vec::new(),
            max_line_bytes,
            skipping: false,
            skipped_bytes: 0,
            dropped: 0,
            last_terminated: true,
            done: false,
        }
    }

    /// Number of lines discarded for exceeding the ceiling so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Whether the most recently yielded line ended with a newline.
    ///
    /// `false` means the producer may still be writing that line.
    pub fn last_line_terminated(&self) -> bool {
        self.last_terminated
    }

    fn take_line(&mut self, terminated: bool) -> String {
        self.last_terminated = terminated;
        let bytes = std::mem::take(&mut self.buf);
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }

    fn finish_skip(&mut self) {
        self.dropped += 1;
        warn!(
            bytes = self.skipped_bytes,
            limit = self.max_line_bytes,
            "dropping oversized transcript line"
        );
        self.skipping = false;
        self.skipped_bytes = 0;
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let available = match self.reader.fill_buf() {
                Ok(chunk) => chunk,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };

            if available.is_empty() {
                self.done = true;
                if self.skipping {
                    self.finish_skip();
                    return Ok(None);
                }
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line(false)));
            }

            match memchr::memchr(b'\n', available) {
                Some(pos) => {
                    if self.skipping {
                        self.skipped_bytes += pos;
                        self.reader.consume(pos + 1);
                        self.finish_skip();
                        continue;
                    }
                    if self.buf.len() + pos > self.max_line_bytes {
                        self.skipped_bytes = self.buf.len() + pos;
                        self.buf = Vec::new();
                        self.reader.consume(pos + 1);
                        self.finish_skip();
                        continue;
                    }
                    self.buf.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    return Ok(Some(self.take_line(true)));
                }
                None => {
                    let len = available.len();
                    if self.skipping {
                        self.skipped_bytes += len;
                    } else if self.buf.len() + len > self.max_line_bytes {
                        self.skipping = true;
                        self.skipped_bytes = self.buf.len() + len;
                        self.buf = Vec::new();
                    } else {
                        self.buf.extend_from_slice(available);
                    }
                    self.reader.consume(len);
                }
            }
        }
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_line() {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "transcript read failed; stopping at last complete line");
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(input: &[u8], limit: usize) -> Vec<String> {
        LineReader::with_limit(Cursor::new(input.to_vec()), limit).collect()
    }

    #[test]
    fn splits_on_newlines_and_keeps_trailing_partial_line() {
        let lines = collect(b"one\ntwo\nthree", 1024);
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn trailing_newline_does_not_yield_empty_line() {
        let lines = collect(b"one\ntwo\n", 1024);
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn reports_unterminated_final_line() {
        let mut reader = LineReader::with_limit(Cursor::new(b"a\nb".to_vec()), 1024);
        assert_eq!(reader.next().as_deref(), Some("a"));
        assert!(reader.last_line_terminated());
        assert_eq!(reader.next().as_deref(), Some("b"));
        assert!(!reader.last_line_terminated());
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn drops_oversized_line_and_resumes() {
        let mut input = b"short\n".to_vec();
        input.extend(std::iter::repeat_n(b'x', 64));
        input.extend_from_slice(b"\nafter\n");
        let mut reader = LineReader::with_limit(Cursor::new(input), 16);
        let lines: Vec<String> = reader.by_ref().collect();
        assert_eq!(lines, vec!["short", "after"]);
        assert_eq!(reader.dropped(), 1);
    }

    #[test]
    fn drops_oversized_final_partial_line() {
        let mut input = b"keep\n".to_vec();
        input.extend(std::iter::repeat_n(b'y', 40));
        let lines = collect(&input, 16);
        assert_eq!(lines, vec!["keep"]);
    }

    #[test]
    fn line_exactly_at_limit_is_kept() {
        let mut input = vec![b'z'; 16];
        input.push(b'\n');
        let lines = collect(&input, 16);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 16);
    }

    #[test]
    fn oversized_line_spanning_many_reads_is_dropped() {
        let mut input = b"first\n".to_vec();
        input.extend(std::iter::repeat_n(b'q', READ_BUFFER_BYTES * 3));
        input.extend_from_slice(b"\nlast");
        let lines = collect(&input, READ_BUFFER_BYTES);
        assert_eq!(lines, vec!["first", "last"]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let lines = collect(b"ok\n\xff\xfe\nfine\n", 1024);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "fine");
    }
}
