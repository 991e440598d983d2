use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::debug;

/// Incremental parser for newline-delimited JSON streams.
///
/// Bytes are buffered until a full line is available, so a frame (or a
/// multi-byte character) split across network chunks is decoded once whole.
#[derive(Debug)]
pub struct NdjsonStreamParser<T> {
    buffer: Vec<u8>,
    _frame: PhantomData<fn() -> T>,
}

impl<T> Default for NdjsonStreamParser<T> {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            _frame: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> NdjsonStreamParser<T> {
    /// Feed arbitrary bytes into the parser and drain complete frames.
    ///
    /// Blank and malformed lines are skipped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<T> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(split) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=split).collect();
            if let Some(frame) = parse_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Parse whatever remains once the stream has ended without a final newline.
    pub fn finish(&mut self) -> Option<T> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }

    /// Parse a complete NDJSON payload in one shot.
    pub fn parse_lines(input: &str) -> Vec<T> {
        let mut parser = Self::default();
        let mut frames = parser.feed(input.as_bytes());
        frames.extend(parser.finish());
        frames
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Option<T> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    match serde_json::from_str::<T>(text) {
        Ok(frame) => Some(frame),
        Err(error) => {
            debug!(event = "ndjson.frame.malformed", %error, "skipping malformed NDJSON line");
            None
        }
    }
}
