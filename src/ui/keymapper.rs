//! Key mapping for the command line
//!
//! Converts key events to line-editor actions.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// What a key press asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Insert(char),
    Backspace,
    Delete,
    CursorLeft,
    CursorRight,
    Home,
    End,
    /// Run the current line
    Submit,
    HistoryUp,
    HistoryDown,
    /// Drop the line and leave history browsing
    ClearLine,
    /// Raw bytes for the remote program (Ctrl+C and friends)
    SendRaw(String),
    ScrollUp,
    ScrollDown,
    Reconnect,
    Quit,
}

/// Key mapper for converting key events to actions
pub struct KeyMapper;

impl KeyMapper {
    pub fn map(event: &KeyEvent) -> Option<InputAction> {
        let mods = Modifiers::from(event.modifiers);

        if mods.contains(Modifiers::CTRL) {
            return match event.code {
                KeyCode::Char('d') | KeyCode::Char('D') => Some(InputAction::Quit),
                KeyCode::Char('r') | KeyCode::Char('R') => Some(InputAction::Reconnect),
                KeyCode::Char('u') | KeyCode::Char('U') => Some(InputAction::ClearLine),
                KeyCode::Char('a') | KeyCode::Char('A') => Some(InputAction::Home),
                KeyCode::Char('e') | KeyCode::Char('E') => Some(InputAction::End),
                KeyCode::Char(ch) => Self::control_char(ch).map(InputAction::SendRaw),
                _ => None,
            };
        }

        match event.code {
            KeyCode::Char(ch) => Some(InputAction::Insert(ch)),
            KeyCode::Enter => Some(InputAction::Submit),
            KeyCode::Backspace => Some(InputAction::Backspace),
            KeyCode::Delete => Some(InputAction::Delete),
            KeyCode::Left => Some(InputAction::CursorLeft),
            KeyCode::Right => Some(InputAction::CursorRight),
            KeyCode::Home => Some(InputAction::Home),
            KeyCode::End => Some(InputAction::End),
            KeyCode::Up => Some(InputAction::HistoryUp),
            KeyCode::Down => Some(InputAction::HistoryDown),
            KeyCode::Esc => Some(InputAction::ClearLine),
            KeyCode::PageUp => Some(InputAction::ScrollUp),
            KeyCode::PageDown => Some(InputAction::ScrollDown),
            KeyCode::Tab => Some(InputAction::SendRaw("\t".to_string())),
            _ => None,
        }
    }

    /// Ctrl+letter as its C0 control character
    fn control_char(ch: char) -> Option<String> {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_lowercase() {
            let code = (lower as u8) - b'a' + 1;
            Some((code as char).to_string())
        } else {
            None
        }
    }
}

/// Single-line editor with a char-indexed cursor
#[derive(Debug, Clone, Default)]
pub struct LineEditor {
    chars: Vec<char>,
    cursor: usize,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    /// Cursor position in chars
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Replace the whole line, cursor at the end
    pub fn set(&mut self, text: &str) {
        self.chars = text.chars().collect();
        self.cursor = self.chars.len();
    }

    pub fn clear(&mut self) {
        self.chars.clear();
        self.cursor = 0;
    }

    /// Take the line, leaving the editor empty
    pub fn take(&mut self) -> String {
        let text = self.text();
        self.clear();
        text
    }

    /// Apply an editing action; returns false for non-editing actions
    pub fn apply(&mut self, action: &InputAction) -> bool {
        match action {
            InputAction::Insert(ch) => {
                self.chars.insert(self.cursor, *ch);
                self.cursor += 1;
            }
            InputAction::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.chars.remove(self.cursor);
                }
            }
            InputAction::Delete => {
                if self.cursor < self.chars.len() {
                    self.chars.remove(self.cursor);
                }
            }
            InputAction::CursorLeft => self.cursor = self.cursor.saturating_sub(1),
            InputAction::CursorRight => self.cursor = (self.cursor + 1).min(self.chars.len()),
            InputAction::Home => self.cursor = 0,
            InputAction::End => self.cursor = self.chars.len(),
            InputAction::ClearLine => self.clear(),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(InputAction::Insert('a')));

        let event = key_event(KeyCode::Char('A'), KeyModifiers::SHIFT);
        assert_eq!(KeyMapper::map(&event), Some(InputAction::Insert('A')));
    }

    #[test]
    fn test_control_keys() {
        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(InputAction::SendRaw("\x03".to_string())));

        let event = key_event(KeyCode::Char('z'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(InputAction::SendRaw("\x1a".to_string())));

        let event = key_event(KeyCode::Char('d'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(InputAction::Quit));

        let event = key_event(KeyCode::Char('r'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(InputAction::Reconnect));
    }

    #[test]
    fn test_history_keys() {
        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(InputAction::HistoryUp));

        let event = key_event(KeyCode::Down, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(InputAction::HistoryDown));
    }

    #[test]
    fn test_line_editing() {
        let mut line = LineEditor::new();
        for ch in "lss".chars() {
            line.apply(&InputAction::Insert(ch));
        }
        line.apply(&InputAction::Backspace);
        line.apply(&InputAction::Home);
        line.apply(&InputAction::Insert('>'));
        line.apply(&InputAction::End);
        line.apply(&InputAction::Insert('!'));
        assert_eq!(line.text(), ">ls!");
        assert_eq!(line.cursor(), 4);
    }

    #[test]
    fn test_multibyte_editing() {
        let mut line = LineEditor::new();
        line.set("日本語");
        line.apply(&InputAction::CursorLeft);
        line.apply(&InputAction::Backspace);
        assert_eq!(line.text(), "日語");
        assert_eq!(line.take(), "日語");
        assert!(line.is_empty());
    }

    #[test]
    fn test_non_editing_actions_pass_through() {
        let mut line = LineEditor::new();
        assert!(!line.apply(&InputAction::Submit));
        assert!(!line.apply(&InputAction::HistoryUp));
    }
}
