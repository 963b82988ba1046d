//! Command history for termlink
//!
//! Chronological list of executed commands with an up/down recall cursor.

/// Direction for history recall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryDirection {
    /// Towards older commands
    Up,
    /// Towards newer commands
    Down,
}

/// Executed commands, oldest first
#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    entries: Vec<String>,
    /// `None` while not browsing
    cursor: Option<usize>,
}

impl CommandHistory {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an executed command and leave browsing mode.
    ///
    /// Blank commands are not recorded.
    pub fn add(&mut self, command: &str) {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return;
        }
        self.entries.push(trimmed.to_string());
        // "Past the end": the next Up recalls this command
        self.cursor = None;
    }

    /// Move the cursor and return the recalled command.
    ///
    /// The cursor is clamped to the list; Up from the resting position
    /// recalls the newest command, Down outside browsing does nothing.
    pub fn browse(&mut self, direction: HistoryDirection) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.cursor = match (direction, self.cursor) {
            (HistoryDirection::Up, None) => Some(last),
            (HistoryDirection::Up, Some(i)) => Some(i.saturating_sub(1)),
            (HistoryDirection::Down, None) => None,
            (HistoryDirection::Down, Some(i)) => Some((i + 1).min(last)),
        };
        self.current()
    }

    /// Stop browsing
    pub fn reset_index(&mut self) {
        self.cursor = None;
    }

    /// Command under the cursor, if browsing
    pub fn current(&self) -> Option<&str> {
        self.cursor.and_then(|i| self.entries.get(i)).map(String::as_str)
    }

    /// Cursor as a signed index; -1 when not browsing
    #[allow(dead_code)]
    pub fn cursor(&self) -> isize {
        self.cursor.map(|i| i as isize).unwrap_or(-1)
    }

    #[allow(dead_code)]
    pub fn is_browsing(&self) -> bool {
        self.cursor.is_some()
    }

    #[allow(dead_code)]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history(commands: &[&str]) -> CommandHistory {
        let mut h = CommandHistory::new();
        for c in commands {
            h.add(c);
        }
        h
    }

    #[test]
    fn test_up_recalls_newest_first() {
        let mut h = history(&["ls", "pwd", "git status"]);
        assert_eq!(h.browse(HistoryDirection::Up), Some("git status"));
        assert_eq!(h.browse(HistoryDirection::Up), Some("pwd"));
        assert_eq!(h.browse(HistoryDirection::Up), Some("ls"));
    }

    #[test]
    fn test_up_pins_at_oldest() {
        let mut h = history(&["a", "b"]);
        for _ in 0..5 {
            h.browse(HistoryDirection::Up);
        }
        assert_eq!(h.cursor(), 0);
        assert_eq!(h.current(), Some("a"));
    }

    #[test]
    fn test_down_clamps_at_newest() {
        let mut h = history(&["a", "b"]);
        h.browse(HistoryDirection::Up);
        h.browse(HistoryDirection::Up);
        assert_eq!(h.browse(HistoryDirection::Down), Some("b"));
        assert_eq!(h.browse(HistoryDirection::Down), Some("b"));
        assert_eq!(h.cursor(), 1);
    }

    #[test]
    fn test_down_without_browsing_does_nothing() {
        let mut h = history(&["a"]);
        assert_eq!(h.browse(HistoryDirection::Down), None);
        assert_eq!(h.cursor(), -1);
    }

    #[test]
    fn test_empty_history() {
        let mut h = CommandHistory::new();
        assert_eq!(h.browse(HistoryDirection::Up), None);
        assert_eq!(h.cursor(), -1);
    }

    #[test]
    fn test_add_leaves_browsing() {
        let mut h = history(&["a", "b"]);
        h.browse(HistoryDirection::Up);
        h.add("c");
        assert!(!h.is_browsing());
        assert_eq!(h.browse(HistoryDirection::Up), Some("c"));
    }

    #[test]
    fn test_blank_commands_not_recorded() {
        let h = history(&["", "   ", "ls"]);
        assert_eq!(h.entries(), &["ls".to_string()]);
    }

    #[test]
    fn test_reset_index() {
        let mut h = history(&["a"]);
        h.browse(HistoryDirection::Up);
        h.reset_index();
        assert_eq!(h.cursor(), -1);
        assert_eq!(h.current(), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(String),
        Up,
        Down,
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            "[a-z]{1,5}".prop_map(Op::Add),
            Just(Op::Up),
            Just(Op::Down),
            Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn prop_cursor_stays_in_bounds(ops in proptest::collection::vec(op(), 0..100)) {
            let mut h = CommandHistory::new();
            let mut added = 0;
            for op in ops {
                match op {
                    Op::Add(cmd) => { h.add(&cmd); added += 1; }
                    Op::Up => { h.browse(HistoryDirection::Up); }
                    Op::Down => { h.browse(HistoryDirection::Down); }
                    Op::Reset => h.reset_index(),
                }
                prop_assert!(h.cursor() >= -1);
                prop_assert!(h.cursor() < h.len() as isize);
                prop_assert_eq!(h.len(), added);
            }
        }
    }
}
