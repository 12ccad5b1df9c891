//! Accumulates streamed fragments and decides when to flush them.
//!
//! Edits to the outward message are rate limited, so text is pushed only when
//! a fragment closes a line or sentence, or after a fixed number of
//! fragments without a flush.

/// Fragment endings that make a flush worthwhile.
pub const FLUSH_DELIMITERS: [&str; 4] = ["\n", "。", "！", "？"];

#[derive(Debug)]
pub struct StreamBuffer {
    text: String,
    pending_fragments: usize,
    threshold: usize,
}

impl StreamBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            text: String::new(),
            pending_fragments: 0,
            threshold: threshold.max(1),
        }
    }

    /// Append a fragment. Returns whether the buffer should be flushed now.
    ///
    /// Runs of newlines collapse to one, including across fragment boundaries.
    pub fn push(&mut self, fragment: &str) -> bool {
        for ch in fragment.chars() {
            if ch == '\n' && self.text.ends_with('\n') {
                continue;
            }
            self.text.push(ch);
        }
        self.pending_fragments += 1;

        let at_delimiter = FLUSH_DELIMITERS.iter().any(|d| fragment.ends_with(d));
        let flush = at_delimiter || self.pending_fragments >= self.threshold;
        if flush {
            self.pending_fragments = 0;
        }
        flush && !self.text.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
