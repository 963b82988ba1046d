//! Output stream processing
//!
//! Turns raw output chunks from the remote shell into scrollback lines.
//! Escape sequences and carriage returns are removed, braille spinner
//! frames collapse into a single updating line, and consecutive lines that
//! re-print the previous one are suppressed.

/// Default scrollback capacity
pub const MAX_LINES: usize = 5000;

/// Braille spinner animation frames
pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Check whether a (trimmed) string is a single spinner frame
pub fn is_spinner_frame(text: &str) -> bool {
    SPINNER_FRAMES.contains(&text)
}

/// Remove ANSI escape sequences and carriage returns from a chunk.
///
/// Tabs are kept: the stripper drops every C0 control except `\n`, so
/// each tab-separated field is stripped on its own.
pub fn sanitize(raw: &str) -> String {
    raw.split('\t')
        .map(strip_ansi_escapes::strip_str)
        .collect::<Vec<_>>()
        .join("\t")
        .replace('\r', "")
}

/// What `append_output` did with a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new line was pushed
    Appended,
    /// The last line was overwritten (spinner frame)
    Replaced,
    /// The chunk was blank or redundant
    Dropped,
}

/// Bounded scrollback fed by the remote output stream
#[derive(Debug, Clone)]
pub struct OutputProcessor {
    /// Lines, oldest first
    lines: Vec<String>,
    /// Maximum number of lines kept
    limit: usize,
    /// Bumped on every mutation
    revision: u64,
}

impl Default for OutputProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputProcessor {
    pub fn new() -> Self {
        Self::with_limit(MAX_LINES)
    }

    /// Create a processor keeping at most `limit` lines (at least one)
    pub fn with_limit(limit: usize) -> Self {
        Self {
            lines: Vec::new(),
            limit: limit.max(1),
            revision: 0,
        }
    }

    /// Feed one raw chunk into the scrollback
    pub fn append_output(&mut self, raw: &str) -> Applied {
        let plain = sanitize(raw);
        let trimmed = plain.trim();
        if trimmed.is_empty() {
            return Applied::Dropped;
        }

        let last_line = self.lines.last().map(|l| l.trim()).unwrap_or("");

        let applied = if is_spinner_frame(trimmed) {
            if is_spinner_frame(last_line) {
                if let Some(last) = self.lines.last_mut() {
                    *last = plain;
                }
                Applied::Replaced
            } else {
                self.lines.push(plain);
                Applied::Appended
            }
        } else if last_line.is_empty() || !is_redundant(trimmed, last_line) {
            // Every string ends with "", so an empty previous line never
            // counts as a re-print.
            self.lines.push(plain);
            Applied::Appended
        } else {
            Applied::Dropped
        };

        if applied != Applied::Dropped {
            self.enforce_limit();
            self.revision += 1;
        }
        applied
    }

    /// Drop every line
    pub fn clear_output(&mut self) {
        self.lines.clear();
        self.revision += 1;
    }

    fn enforce_limit(&mut self) {
        if self.lines.len() > self.limit {
            let excess = self.lines.len() - self.limit;
            self.lines.drain(..excess);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[allow(dead_code)]
    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    #[allow(dead_code)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Mutation counter, used by the renderer to skip redundant redraws
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// A line repeats the previous one if it is equal to it, or either is a
/// suffix of the other.
fn is_redundant(trimmed: &str, last_line: &str) -> bool {
    trimmed == last_line || last_line.ends_with(trimmed) || trimmed.ends_with(last_line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_ansi_and_carriage_returns() {
        let mut out = OutputProcessor::new();
        out.append_output("\x1b[32mHello\x1b[0m\r\n");
        assert_eq!(out.last_line(), Some("Hello\n"));
    }

    #[test]
    fn test_tabs_survive_sanitizing() {
        let mut out = OutputProcessor::new();
        out.append_output("col1\tcol2\n");
        assert_eq!(out.last_line(), Some("col1\tcol2\n"));

        out.append_output("\x1b[1mname\x1b[0m\t\x1b[34msize\x1b[0m\r\n");
        assert_eq!(out.last_line(), Some("name\tsize\n"));
    }

    #[test]
    fn test_blank_chunks_are_ignored() {
        let mut out = OutputProcessor::new();
        for chunk in ["", "   ", "\r\n", "\x1b[0m", "\x1b[2K\r  \t"] {
            assert_eq!(out.append_output(chunk), Applied::Dropped);
        }
        assert!(out.is_empty());
        assert_eq!(out.revision(), 0);
    }

    #[test]
    fn test_spinner_frames_collapse() {
        let mut out = OutputProcessor::new();
        out.append_output("installing deps");
        out.append_output("⠙");
        let after_first = out.len();

        assert_eq!(out.append_output("⠹"), Applied::Replaced);
        assert_eq!(out.len(), after_first);
        assert_eq!(out.last_line(), Some("⠹"));
    }

    #[test]
    fn test_spinner_after_text_appends() {
        let mut out = OutputProcessor::new();
        out.append_output("step 1");
        assert_eq!(out.append_output(" ⠋ "), Applied::Appended);
        assert_eq!(out.lines(), &["step 1".to_string(), " ⠋ ".to_string()]);
    }

    #[test]
    fn test_duplicate_line_suppressed() {
        let mut out = OutputProcessor::new();
        out.append_output("Building... 50%");
        let before = out.lines().to_vec();
        assert_eq!(out.append_output("Building... 50%"), Applied::Dropped);
        assert_eq!(out.lines(), before.as_slice());
    }

    #[test]
    fn test_suffix_growth_suppressed() {
        let mut out = OutputProcessor::new();
        out.append_output("5/10");
        assert_eq!(out.append_output("05/10"), Applied::Dropped);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_suffix_shrink_suppressed() {
        // Known false positive of the heuristic
        let mut out = OutputProcessor::new();
        out.append_output("error: foo");
        assert_eq!(out.append_output("foo"), Applied::Dropped);
    }

    #[test]
    fn test_distinct_lines_both_appended() {
        let mut out = OutputProcessor::new();
        out.append_output("Loading");
        assert_eq!(out.append_output("Loading more"), Applied::Appended);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_first_chunk_into_empty_buffer() {
        let mut out = OutputProcessor::new();
        assert_eq!(out.append_output("hi"), Applied::Appended);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut out = OutputProcessor::with_limit(3);
        for i in 0..5 {
            out.append_output(&format!("line {}a", i));
        }
        assert_eq!(out.len(), 3);
        assert_eq!(out.lines()[0], "line 2a");
        assert_eq!(out.last_line(), Some("line 4a"));
    }

    #[test]
    fn test_clear_output() {
        let mut out = OutputProcessor::new();
        out.append_output("a1");
        out.append_output("b2");
        out.clear_output();
        assert!(out.is_empty());
    }

    proptest! {
        #[test]
        fn prop_buffer_never_exceeds_limit(chunks in proptest::collection::vec("[a-z0-9 ⠋⠙\r]{0,6}", 0..200)) {
            let mut out = OutputProcessor::with_limit(16);
            for chunk in &chunks {
                out.append_output(chunk);
                prop_assert!(out.len() <= 16);
            }
        }

        #[test]
        fn prop_no_adjacent_redundant_lines(chunks in proptest::collection::vec("[ab]{1,4}", 0..100)) {
            let mut out = OutputProcessor::new();
            for chunk in &chunks {
                out.append_output(chunk);
            }
            for pair in out.lines().windows(2) {
                let (prev, next) = (pair[0].trim(), pair[1].trim());
                prop_assert!(!is_redundant(next, prev));
            }
        }
    }
}
