//! Stream-JSON reader for Claude Code output
//!
//! Turns the agent's stdout into a lazy, finite sequence of [`Event`]s.
//! Blank lines are skipped, undecodable lines become `Unknown` events, and
//! a read failure simply ends the sequence.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{trace, warn};

use super::event::{Event, EventType};

/// Lazy event sequence over a byte stream. Not restartable: once it yields
/// `None` it stays exhausted.
pub struct EventStream<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: AsyncRead + Unpin> EventStream<R> {
    /// Wrap a reader (typically the agent's stdout).
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            done: false,
        }
    }

    /// Next event, or `None` at end of stream or on a read error.
    ///
    /// Cancel-safe: a partially read line is kept for the next call.
    pub async fn next_event(&mut self) -> Option<Event> {
        while !self.done {
            match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) => self.done = true,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "agent output stream failed, treating as end of stream");
                    self.done = true;
                    self.buf.clear();
                }
            }

            let line = String::from_utf8_lossy(&self.buf).trim().to_string();
            self.buf.clear();
            if line.is_empty() {
                continue;
            }
            let event = Event::from_json_line(&line);
            if event.kind == EventType::Unknown {
                trace!(raw = %event.raw, "unrecognized stream line");
            }
            return Some(event);
        }
        None
    }

    /// Whether the sequence has ended.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.done
    }
}

/// Collects data across the events of one execution
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    /// Text fragments from assistant events
    pub text_fragments: Vec<String>,
}

impl StreamAccumulator {
    /// Create a new empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event; only assistant text is kept
    pub fn process(&mut self, event: &Event) {
        if event.kind != EventType::Assistant {
            return;
        }
        let text = event.text_content();
        if !text.is_empty() {
            self.text_fragments.push(text);
        }
    }

    /// All collected text, one fragment per line
    #[must_use]
    pub fn output(&self) -> String {
        self.text_fragments.join("\n")
    }
}
